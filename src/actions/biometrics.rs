/// Browser biometric unlock: export of the master key to a trusted client.
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::actions::{consent_origin, denied, prompt_approval, Action, Services};
use crate::error::Result;
use crate::ipc::messages::{GetBiometricsKeyResponse, IpcMessage};
use crate::ipc::CallingContext;
use crate::systemauth::SessionType;

/// Hand the base64 master key to a caller that either holds a live PIN
/// session or passes a platform biometric check, and then still confirms
/// through the consent prompter.
pub struct GetBiometricsKey;

#[async_trait]
impl Action for GetBiometricsKey {
    async fn run(
        &self,
        _request: &IpcMessage,
        services: &Services,
        ctx: &CallingContext,
    ) -> Result<IpcMessage> {
        // A live PIN session short-circuits the platform check.
        let pre_authorized = services.sessions.verify_pin_session(ctx)
            || (services.os_auth.available()
                && services
                    .os_auth
                    .check(SessionType::BrowserBiometrics, ctx)
                    .await
                    .unwrap_or(false));
        if !pre_authorized {
            return denied("not approved");
        }

        let body = format!(
            "{} is trying to access your vault encryption key for browser biometric unlock.",
            consent_origin(ctx)
        );
        if !prompt_approval(services, "Approve Credential Access", &body).await {
            return denied("not approved");
        }

        let master_key = services.config.get_master_key()?;
        let key_b64 = BASE64.encode(master_key.as_slice());

        IpcMessage::from_payload(&GetBiometricsKeyResponse { key: key_b64 })
    }
}
