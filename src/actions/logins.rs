/// Login retrieval handlers.
use async_trait::async_trait;
use tracing::warn;
use zeroize::Zeroize;

use crate::actions::{consent_origin, denied, prompt_approval, Action, Services};
use crate::crypto::{symmetric, totp};
use crate::error::Result;
use crate::ipc::messages::{
    DecryptedLoginCipher, GetLoginRequest, GetLoginResponse, GetLoginsResponse, IpcMessage,
};
use crate::ipc::CallingContext;

fn current_unix_time() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// Decrypt one login entry, ask the user, and release it.
pub struct GetLoginCipher;

#[async_trait]
impl Action for GetLoginCipher {
    async fn run(
        &self,
        request: &IpcMessage,
        services: &Services,
        ctx: &CallingContext,
    ) -> Result<IpcMessage> {
        let req: GetLoginRequest = request.parse_payload()?;

        let login = match services.vault.get_login_by_filter(
            req.uuid,
            req.organization_id,
            req.name.as_deref(),
            req.username.as_deref(),
        ) {
            Ok(login) => login,
            Err(_) => return denied("login not found"),
        };

        let key = match services.vault.key_for_item(&login) {
            Ok(key) => key,
            Err(_) => return denied("could not get cipher key"),
        };

        let mut decrypted = DecryptedLoginCipher {
            uuid: login.id.to_string(),
            organization_id: login.organization_id.map(|id| id.to_string()),
            name: "NO NAME FOUND".to_string(),
            ..Default::default()
        };

        if !login.name.is_null() {
            if let Ok(name) = symmetric::decrypt_with(&login.name, &key) {
                decrypted.name = String::from_utf8_lossy(&name).into_owned();
            }
        }
        if !login.login.username.is_null() {
            if let Ok(username) = symmetric::decrypt_with(&login.login.username, &key) {
                decrypted.username = String::from_utf8_lossy(&username).into_owned();
            }
        }
        if !login.login.password.is_null() {
            if let Ok(password) = symmetric::decrypt_with(&login.login.password, &key) {
                decrypted.password = String::from_utf8_lossy(&password).into_owned();
            }
        }
        if !login.notes.is_null() {
            if let Ok(notes) = symmetric::decrypt_with(&login.notes, &key) {
                decrypted.notes = String::from_utf8_lossy(&notes).into_owned();
            }
        }
        if !login.login.totp.is_null() {
            match symmetric::decrypt_with(&login.login.totp, &key) {
                Ok(seed) => {
                    let seed = String::from_utf8_lossy(&seed).into_owned();
                    match totp::generate_code(&seed, current_unix_time()) {
                        Ok(code) => decrypted.two_factor_code = code,
                        Err(e) => warn!(error = %e, "could not generate TOTP code"),
                    }
                }
                Err(e) => warn!(error = %e, "could not decrypt TOTP seed"),
            }
        }

        let body = format!(
            "{} is trying to access credentials for user {} on entry {}",
            consent_origin(ctx),
            decrypted.username,
            decrypted.name
        );
        if !prompt_approval(services, "Approve Credential Access", &body).await {
            decrypted.zeroize();
            return denied("not approved");
        }

        IpcMessage::from_payload(&GetLoginResponse {
            found: true,
            result: decrypted,
        })
    }
}

/// Decrypt name and username of every accessible entry.
pub struct ListLogins;

#[async_trait]
impl Action for ListLogins {
    async fn run(
        &self,
        _request: &IpcMessage,
        services: &Services,
        ctx: &CallingContext,
    ) -> Result<IpcMessage> {
        let body = format!(
            "{} is trying to list credentials (name & username)",
            consent_origin(ctx)
        );
        if !prompt_approval(services, "Approve List Credentials", &body).await {
            return denied("not approved");
        }

        let logins = services.vault.get_logins();
        let mut results = Vec::new();
        // Plaintext for each entry stays inside its iteration; the scoped
        // buffers are zeroized before the loop advances.
        for login in logins {
            let key = match services.vault.key_for_item(&login) {
                Ok(key) => key,
                Err(e) => {
                    warn!(uuid = %login.id, error = %e, "could not resolve key, skipping");
                    continue;
                }
            };

            let mut entry = DecryptedLoginCipher {
                uuid: login.id.to_string(),
                ..Default::default()
            };

            if !login.name.is_null() {
                match symmetric::decrypt_with(&login.name, &key) {
                    Ok(name) => entry.name = String::from_utf8_lossy(&name).into_owned(),
                    Err(e) => {
                        warn!(uuid = %login.id, error = %e, "could not decrypt name, skipping");
                        continue;
                    }
                }
            }
            if !login.login.username.is_null() {
                match symmetric::decrypt_with(&login.login.username, &key) {
                    Ok(username) => {
                        entry.username = String::from_utf8_lossy(&username).into_owned()
                    }
                    Err(e) => {
                        warn!(uuid = %login.id, error = %e, "could not decrypt username, skipping");
                        continue;
                    }
                }
            }

            results.push(entry);
        }

        IpcMessage::from_payload(&GetLoginsResponse {
            found: !results.is_empty(),
            result: results,
        })
    }
}
