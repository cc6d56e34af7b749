/// The authorization pipeline and the frozen action registry.
///
/// Every request traverses the same gate stack before its handler runs:
/// `ensure_is_not_locked(ensure_is_logged_in(ensure_approved(type, handler)))`.
/// Gates short-circuit with a uniform `ActionResponse { success: false, .. }`
/// instead of propagating errors, so a client always gets exactly one
/// well-formed answer. Handlers that skip a gate have to do so visibly in
/// `build_registry`, never ad hoc.
pub mod biometrics;
pub mod logins;
pub mod session;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{AgentError, Result};
use crate::ipc::messages::{
    ActionResponse, GetBiometricsKeyRequest, GetLoginRequest, IpcMessage, ListLoginsRequest,
    LockRequest, Payload, StatusRequest,
};
use crate::ipc::CallingContext;
use crate::sync::SyncClient;
use crate::systemauth::prompter::{ConsentPrompter, OsAuthBackend};
use crate::systemauth::{SessionStore, SessionType, PROMPT_TIMEOUT};
use crate::vault::Vault;

/// Everything a handler can touch, bundled for dispatch.
pub struct Services {
    pub config: Arc<Config>,
    pub vault: Arc<Vault>,
    pub sessions: Arc<SessionStore>,
    pub prompter: Arc<dyn ConsentPrompter>,
    pub os_auth: Arc<dyn OsAuthBackend>,
    pub sync: Arc<dyn SyncClient>,
}

pub type DynAction = Arc<dyn Action>;

#[async_trait]
pub trait Action: Send + Sync {
    async fn run(
        &self,
        request: &IpcMessage,
        services: &Services,
        ctx: &CallingContext,
    ) -> Result<IpcMessage>;
}

/// Uniform gate denial.
pub(crate) fn denied(message: &str) -> Result<IpcMessage> {
    IpcMessage::from_payload(&ActionResponse {
        success: false,
        message: message.to_string(),
    })
}

/// Prompt with the per-operation deadline; a timeout is a denial.
pub(crate) async fn prompt_approval(services: &Services, title: &str, body: &str) -> bool {
    match tokio::time::timeout(PROMPT_TIMEOUT, services.prompter.approve(title, body)).await {
        Ok(Ok(approved)) => approved,
        _ => false,
    }
}

struct EnsureLoggedIn {
    inner: DynAction,
}

#[async_trait]
impl Action for EnsureLoggedIn {
    async fn run(
        &self,
        request: &IpcMessage,
        services: &Services,
        ctx: &CallingContext,
    ) -> Result<IpcMessage> {
        if !services.config.is_logged_in() {
            return denied("Not logged in");
        }
        self.inner.run(request, services, ctx).await
    }
}

/// Deadline for the best-effort sync after an unlock.
const SYNC_DEADLINE: Duration = Duration::from_secs(30);

struct EnsureNotLocked {
    inner: DynAction,
}

#[async_trait]
impl Action for EnsureNotLocked {
    async fn run(
        &self,
        request: &IpcMessage,
        services: &Services,
        ctx: &CallingContext,
    ) -> Result<IpcMessage> {
        if services.config.is_locked() {
            if let Err(e) = try_unlock(services).await {
                let message = match e.to_string() {
                    text if text.is_empty() => "locked".to_string(),
                    text => text,
                };
                return denied(&message);
            }

            // Best-effort refresh; a failed sync never re-locks the vault.
            match tokio::time::timeout(
                SYNC_DEADLINE,
                services.sync.full_sync(&services.config, &services.vault),
            )
            .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "post-unlock sync failed"),
                Err(_) => warn!("post-unlock sync hit its deadline"),
            }

            services.sessions.create_pin_session(ctx);
        }
        self.inner.run(request, services, ctx).await
    }
}

/// Obtain the PIN and unlock the config and vault keyring.
async fn try_unlock(services: &Services) -> Result<()> {
    let config = &services.config;
    if !config.has_pin() {
        return Err(AgentError::LockedAndUnlockFailed(
            "no PIN material enrolled".into(),
        ));
    }

    let pin = match tokio::time::timeout(
        PROMPT_TIMEOUT,
        services
            .prompter
            .read_pin("Unlock Vault", "Enter the vault PIN to unlock"),
    )
    .await
    {
        Ok(Ok(Some(pin))) => pin,
        Ok(Ok(None)) => {
            return Err(AgentError::LockedAndUnlockFailed(
                "PIN entry cancelled".into(),
            ))
        }
        Ok(Err(e)) => return Err(AgentError::LockedAndUnlockFailed(e.to_string())),
        Err(_) => {
            return Err(AgentError::LockedAndUnlockFailed(
                "PIN entry timed out".into(),
            ))
        }
    };

    config.try_unlock(&pin).map_err(|e| match e {
        e @ AgentError::LockedAndUnlockFailed(_) => e,
        other => AgentError::LockedAndUnlockFailed(other.to_string()),
    })?;

    services
        .vault
        .unlock(config)
        .map_err(|e| AgentError::LockedAndUnlockFailed(e.to_string()))
}

struct EnsureApproved {
    session_type: SessionType,
    inner: DynAction,
}

#[async_trait]
impl Action for EnsureApproved {
    async fn run(
        &self,
        request: &IpcMessage,
        services: &Services,
        ctx: &CallingContext,
    ) -> Result<IpcMessage> {
        let approved = services
            .sessions
            .get_permission(
                self.session_type,
                ctx,
                services.os_auth.as_ref(),
                services.prompter.as_ref(),
            )
            .await
            .unwrap_or(false);
        if !approved {
            return denied("not approved");
        }
        self.inner.run(request, services, ctx).await
    }
}

pub fn ensure_is_logged_in(inner: DynAction) -> DynAction {
    Arc::new(EnsureLoggedIn { inner })
}

pub fn ensure_is_not_locked(inner: DynAction) -> DynAction {
    Arc::new(EnsureNotLocked { inner })
}

pub fn ensure_approved(session_type: SessionType, inner: DynAction) -> DynAction {
    Arc::new(EnsureApproved {
        session_type,
        inner,
    })
}

/// The full gate stack, outside-in.
pub fn ensure_everything(session_type: SessionType, inner: DynAction) -> DynAction {
    ensure_is_not_locked(ensure_is_logged_in(ensure_approved(session_type, inner)))
}

/// Message-type → gated handler. Frozen after [`build_registry`] returns.
pub struct ActionRegistry {
    actions: HashMap<&'static str, DynAction>,
}

impl ActionRegistry {
    fn new() -> Self {
        Self {
            actions: HashMap::new(),
        }
    }

    pub fn register(&mut self, kind: &'static str, action: DynAction) {
        self.actions.insert(kind, action);
    }

    pub fn get(&self, kind: &str) -> Option<DynAction> {
        self.actions.get(kind).cloned()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Build the agent's action table.
pub fn build_registry() -> ActionRegistry {
    let mut registry = ActionRegistry::new();
    registry.register(
        GetLoginRequest::KIND,
        ensure_everything(SessionType::AccessVault, Arc::new(logins::GetLoginCipher)),
    );
    registry.register(
        ListLoginsRequest::KIND,
        ensure_everything(SessionType::AccessVault, Arc::new(logins::ListLogins)),
    );
    registry.register(
        GetBiometricsKeyRequest::KIND,
        ensure_is_not_locked(ensure_is_logged_in(Arc::new(biometrics::GetBiometricsKey))),
    );
    registry.register(LockRequest::KIND, Arc::new(session::LockAgent));
    registry.register(StatusRequest::KIND, Arc::new(session::AgentStatus));
    registry
}

/// Route one request to its gated handler.
pub async fn dispatch(
    registry: &ActionRegistry,
    request: &IpcMessage,
    services: &Services,
    ctx: &CallingContext,
) -> Result<IpcMessage> {
    let action = registry
        .get(&request.kind)
        .ok_or_else(|| AgentError::UnknownMessageType(request.kind.clone()))?;
    debug!(kind = %request.kind, caller = %ctx.process_name, "dispatching");
    action.run(request, services, ctx).await
}

pub(crate) fn consent_origin(ctx: &CallingContext) -> String {
    format!(
        "{} on {}>{}>{}",
        ctx.user_name, ctx.grand_parent_process_name, ctx.parent_process_name, ctx.process_name
    )
}

#[cfg(test)]
mod tests {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use uuid::Uuid;

    use super::*;
    use crate::config::ConfigFile;
    use crate::crypto::encstring::{CipherString, EncStringType};
    use crate::crypto::keys::SymmetricEncryptionKey;
    use crate::crypto::{symmetric, totp};
    use crate::ipc::messages::{
        GetBiometricsKeyResponse, GetLoginResponse, GetLoginsResponse, StatusResponse,
    };
    use crate::sync::NoopSync;
    use crate::systemauth::prompter::testing::{MockOsAuth, MockPrompter};
    use crate::vault::items::VaultItem;

    const ITEM_UUID: &str = "11111111-1111-1111-1111-111111111111";
    const TOTP_SEED: &str = "JBSWY3DPEHPK3PXP";
    const USER_KEY_MATERIAL: [u8; 64] = [0x33; 64];
    const MASTER_KEY: &[u8] = b"the master key";
    const PIN: &str = "123456";

    fn ctx() -> CallingContext {
        CallingContext {
            user_name: "alice".into(),
            uid: 1000,
            process_name: "browser".into(),
            parent_process_name: "shell".into(),
            grand_parent_process_name: "init".into(),
            pid: 4321,
            socket_handle: 7,
        }
    }

    fn user_key() -> SymmetricEncryptionKey {
        let mut material = USER_KEY_MATERIAL;
        SymmetricEncryptionKey::from_bytes(&mut material).unwrap()
    }

    fn enc(key: &SymmetricEncryptionKey, value: &str) -> CipherString {
        symmetric::encrypt_with(value.as_bytes(), EncStringType::AesCbc256HmacSha256B64, key)
            .unwrap()
    }

    fn populated_vault() -> Vault {
        let key = user_key();
        let vault = Vault::new();
        vault.with_keyring_mut(|ring| ring.set_user_key(key.clone()));

        let mut item = VaultItem::new(Uuid::parse_str(ITEM_UUID).unwrap());
        item.name = enc(&key, "example.com");
        item.login.username = enc(&key, "alice");
        item.login.password = enc(&key, "hunter2");
        item.login.totp = enc(&key, TOTP_SEED);
        vault.replace_items(vec![item]);
        vault
    }

    fn unlocked_services(prompter: Arc<MockPrompter>, os_auth: Arc<MockOsAuth>) -> Services {
        let config = Config::new_in_memory();
        config.enroll_pin(PIN).unwrap();
        config.set_master_password_hash(b"master password hash").unwrap();
        config.set_master_key(MASTER_KEY).unwrap();
        config.set_user_symmetric_key(&USER_KEY_MATERIAL).unwrap();

        Services {
            config: Arc::new(config),
            vault: Arc::new(populated_vault()),
            sessions: Arc::new(SessionStore::new()),
            prompter,
            os_auth,
            sync: Arc::new(NoopSync),
        }
    }

    fn get_login_request() -> IpcMessage {
        IpcMessage::from_payload(&GetLoginRequest {
            uuid: Some(Uuid::parse_str(ITEM_UUID).unwrap()),
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_list_when_locked_without_pin_material() {
        // Logged in, locked, and nothing to derive an unlock key from.
        let prompter = Arc::new(MockPrompter::approving());
        let config = Config::from_file(ConfigFile {
            encrypted_master_password_hash: "opaque".into(),
            ..ConfigFile::default()
        });
        let services = Services {
            config: Arc::new(config),
            vault: Arc::new(Vault::new()),
            sessions: Arc::new(SessionStore::new()),
            prompter: prompter.clone(),
            os_auth: Arc::new(MockOsAuth::absent()),
            sync: Arc::new(NoopSync),
        };
        let registry = build_registry();

        let request = IpcMessage::from_payload(&ListLoginsRequest {}).unwrap();
        let response = dispatch(&registry, &request, &services, &ctx()).await.unwrap();
        let payload: ActionResponse = response.parse_payload().unwrap();
        assert!(!payload.success);
        assert!(!payload.message.is_empty());
        // The gate failed before any prompt could happen.
        assert_eq!(prompter.approval_count(), 0);
        assert_eq!(prompter.pin_request_count(), 0);
    }

    #[tokio::test]
    async fn test_get_login_not_approved() {
        let prompter = Arc::new(MockPrompter::denying());
        let services = unlocked_services(prompter.clone(), Arc::new(MockOsAuth::absent()));
        let registry = build_registry();

        let response = dispatch(&registry, &get_login_request(), &services, &ctx())
            .await
            .unwrap();
        let payload: ActionResponse = response.parse_payload().unwrap();
        assert!(!payload.success);
        assert_eq!(payload.message, "not approved");
        assert_eq!(prompter.approval_count(), 1);
    }

    #[tokio::test]
    async fn test_get_login_approved() {
        let prompter = Arc::new(MockPrompter::approving());
        let services = unlocked_services(prompter.clone(), Arc::new(MockOsAuth::absent()));
        let registry = build_registry();

        let before = totp::generate_code(TOTP_SEED, chrono::Utc::now().timestamp() as u64).unwrap();
        let response = dispatch(&registry, &get_login_request(), &services, &ctx())
            .await
            .unwrap();
        let after = totp::generate_code(TOTP_SEED, chrono::Utc::now().timestamp() as u64).unwrap();

        let payload: GetLoginResponse = response.parse_payload().unwrap();
        assert!(payload.found);
        assert_eq!(payload.result.uuid, ITEM_UUID);
        assert_eq!(payload.result.name, "example.com");
        assert_eq!(payload.result.username, "alice");
        assert_eq!(payload.result.password, "hunter2");
        assert_eq!(payload.result.two_factor_code.len(), 6);
        assert!(
            payload.result.two_factor_code == before || payload.result.two_factor_code == after
        );
    }

    #[tokio::test]
    async fn test_second_get_login_uses_cached_session() {
        let prompter = Arc::new(MockPrompter::approving());
        let services = unlocked_services(prompter.clone(), Arc::new(MockOsAuth::absent()));
        let registry = build_registry();

        for _ in 0..2 {
            let response = dispatch(&registry, &get_login_request(), &services, &ctx())
                .await
                .unwrap();
            let payload: GetLoginResponse = response.parse_payload().unwrap();
            assert!(payload.found);
        }
        // One approval session plus one per-request consent each time: the
        // vault-access gate prompted once, the handler prompted twice.
        assert_eq!(prompter.approval_count(), 3);
    }

    #[tokio::test]
    async fn test_list_logins_decrypts_names_and_usernames() {
        let prompter = Arc::new(MockPrompter::approving());
        let services = unlocked_services(prompter.clone(), Arc::new(MockOsAuth::absent()));
        let registry = build_registry();

        let request = IpcMessage::from_payload(&ListLoginsRequest {}).unwrap();
        let response = dispatch(&registry, &request, &services, &ctx()).await.unwrap();
        let payload: GetLoginsResponse = response.parse_payload().unwrap();
        assert!(payload.found);
        assert_eq!(payload.result.len(), 1);
        assert_eq!(payload.result[0].name, "example.com");
        assert_eq!(payload.result[0].username, "alice");
        // Listing never exposes passwords.
        assert!(payload.result[0].password.is_empty());
    }

    #[tokio::test]
    async fn test_biometrics_key_with_pin_session_skips_os_auth() {
        let prompter = Arc::new(MockPrompter::approving());
        let os_auth = Arc::new(MockOsAuth::approving());
        let services = unlocked_services(prompter.clone(), os_auth.clone());
        services.sessions.create_pin_session(&ctx());
        let registry = build_registry();

        let request = IpcMessage::from_payload(&GetBiometricsKeyRequest {}).unwrap();
        let response = dispatch(&registry, &request, &services, &ctx()).await.unwrap();
        let payload: GetBiometricsKeyResponse = response.parse_payload().unwrap();
        assert_eq!(payload.key, BASE64.encode(MASTER_KEY));
        assert_eq!(os_auth.check_count(), 0);
        assert_eq!(prompter.approval_count(), 1);
    }

    #[tokio::test]
    async fn test_biometrics_key_without_preauthorization() {
        let prompter = Arc::new(MockPrompter::approving());
        let services = unlocked_services(prompter.clone(), Arc::new(MockOsAuth::absent()));
        let registry = build_registry();

        let request = IpcMessage::from_payload(&GetBiometricsKeyRequest {}).unwrap();
        let response = dispatch(&registry, &request, &services, &ctx()).await.unwrap();
        let payload: ActionResponse = response.parse_payload().unwrap();
        assert!(!payload.success);
        assert_eq!(payload.message, "not approved");
        // Denied before the consent prompt.
        assert_eq!(prompter.approval_count(), 0);
    }

    #[tokio::test]
    async fn test_unlock_through_gate_with_pin() {
        let prompter = Arc::new(MockPrompter::with_pin(PIN));
        let services = unlocked_services(prompter.clone(), Arc::new(MockOsAuth::absent()));
        services.config.lock();
        services.vault.lock();
        let registry = build_registry();

        let response = dispatch(&registry, &get_login_request(), &services, &ctx())
            .await
            .unwrap();
        let payload: GetLoginResponse = response.parse_payload().unwrap();
        assert!(payload.found);
        assert_eq!(payload.result.name, "example.com");
        assert_eq!(prompter.pin_request_count(), 1);
        assert!(!services.config.is_locked());
        // Unlock installs a PIN session for the caller.
        assert!(services.sessions.verify_pin_session(&ctx()));
    }

    #[tokio::test]
    async fn test_lock_wipes_state_and_sessions() {
        let prompter = Arc::new(MockPrompter::approving());
        let services = unlocked_services(prompter.clone(), Arc::new(MockOsAuth::absent()));
        let registry = build_registry();

        dispatch(&registry, &get_login_request(), &services, &ctx())
            .await
            .unwrap();
        assert!(services.sessions.session_count() > 0);

        let request = IpcMessage::from_payload(&LockRequest {}).unwrap();
        let response = dispatch(&registry, &request, &services, &ctx()).await.unwrap();
        let payload: ActionResponse = response.parse_payload().unwrap();
        assert!(payload.success);
        assert!(services.config.is_locked());
        assert!(services.vault.is_keyring_empty());
        assert_eq!(services.sessions.session_count(), 0);
    }

    #[tokio::test]
    async fn test_status_bypasses_gates() {
        let prompter = Arc::new(MockPrompter::denying());
        let services = unlocked_services(prompter.clone(), Arc::new(MockOsAuth::absent()));
        let registry = build_registry();

        let request = IpcMessage::from_payload(&StatusRequest {}).unwrap();
        let response = dispatch(&registry, &request, &services, &ctx()).await.unwrap();
        let payload: StatusResponse = response.parse_payload().unwrap();
        assert!(payload.logged_in);
        assert!(!payload.locked);
        assert_eq!(prompter.approval_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_message_type() {
        let prompter = Arc::new(MockPrompter::approving());
        let services = unlocked_services(prompter, Arc::new(MockOsAuth::absent()));
        let registry = build_registry();

        let request = IpcMessage {
            kind: "BogusRequest".into(),
            payload: serde_json::Value::Null,
        };
        assert!(matches!(
            dispatch(&registry, &request, &services, &ctx()).await.unwrap_err(),
            AgentError::UnknownMessageType(_)
        ));
    }

    #[tokio::test]
    async fn test_get_login_missing_item() {
        let prompter = Arc::new(MockPrompter::approving());
        let services = unlocked_services(prompter.clone(), Arc::new(MockOsAuth::absent()));
        let registry = build_registry();

        let request = IpcMessage::from_payload(&GetLoginRequest {
            uuid: Some(Uuid::new_v4()),
            ..Default::default()
        })
        .unwrap();
        let response = dispatch(&registry, &request, &services, &ctx()).await.unwrap();
        let payload: ActionResponse = response.parse_payload().unwrap();
        assert!(!payload.success);
        assert_eq!(payload.message, "login not found");
    }
}
