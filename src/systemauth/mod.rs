/// Time-bounded approval sessions keyed by caller identity.
///
/// A session records that a caller passed interactive approval for one
/// class of operation. Callers are identified by a fingerprint over their
/// uid and three levels of process ancestry, so a different binary (or the
/// same binary launched from somewhere else) never inherits an approval.
///
/// The table mutex is held only across map operations, never across the
/// prompter or the platform auth backend.
pub mod prompter;

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::Result;
use crate::ipc::CallingContext;
use crate::systemauth::prompter::{ConsentPrompter, OsAuthBackend};

const FINGERPRINT_CONTEXT: &str = "credguard caller fingerprint v1";

/// Per-operation deadlines for the external collaborators. On timeout the
/// answer is a denial, not an error.
pub const PROMPT_TIMEOUT: Duration = Duration::from_secs(120);
pub const OS_AUTH_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionType {
    AccessVault,
    SshKey,
    PinSession,
    BrowserBiometrics,
}

impl SessionType {
    /// How long an approval of this class stays cached. Zero means every
    /// call needs fresh consent.
    pub fn ttl(self) -> Duration {
        match self {
            Self::AccessVault => Duration::from_secs(10 * 60),
            Self::SshKey => Duration::from_secs(60 * 60),
            Self::PinSession => Duration::from_secs(4 * 60 * 60),
            Self::BrowserBiometrics => Duration::ZERO,
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Self::AccessVault => "access the vault",
            Self::SshKey => "use an SSH key",
            Self::PinSession => "start a PIN session",
            Self::BrowserBiometrics => "unlock via browser biometrics",
        }
    }
}

/// Digest over (uid, process, parent, grandparent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn for_context(ctx: &CallingContext) -> Self {
        let mut hasher = blake3::Hasher::new_derive_key(FINGERPRINT_CONTEXT);
        hasher.update(&ctx.uid.to_le_bytes());
        for name in [
            &ctx.process_name,
            &ctx.parent_process_name,
            &ctx.grand_parent_process_name,
        ] {
            hasher.update(name.as_bytes());
            hasher.update(&[0]);
        }
        Self(hasher.finalize().into())
    }
}

struct ApprovalSession {
    granted_at: Instant,
    ttl: Duration,
}

impl ApprovalSession {
    fn is_expired(&self) -> bool {
        self.granted_at.elapsed() >= self.ttl
    }
}

#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<(SessionType, Fingerprint), ApprovalSession>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lookup(&self, session_type: SessionType, fingerprint: Fingerprint) -> bool {
        let mut sessions = self.sessions.lock().unwrap_or_else(|p| p.into_inner());
        match sessions.get(&(session_type, fingerprint)) {
            Some(session) if !session.is_expired() => true,
            Some(_) => {
                sessions.remove(&(session_type, fingerprint));
                false
            }
            None => false,
        }
    }

    fn insert(&self, session_type: SessionType, fingerprint: Fingerprint) {
        let ttl = session_type.ttl();
        if ttl.is_zero() {
            return;
        }
        let mut sessions = self.sessions.lock().unwrap_or_else(|p| p.into_inner());
        sessions.insert(
            (session_type, fingerprint),
            ApprovalSession {
                granted_at: Instant::now(),
                ttl,
            },
        );
    }

    /// Check for a cached approval, or walk the caller through the platform
    /// auth backend (if present) and the consent prompter, in that order.
    pub async fn get_permission(
        &self,
        session_type: SessionType,
        ctx: &CallingContext,
        os_auth: &dyn OsAuthBackend,
        prompter: &dyn ConsentPrompter,
    ) -> Result<bool> {
        let fingerprint = Fingerprint::for_context(ctx);
        if self.lookup(session_type, fingerprint) {
            debug!(?session_type, "approval served from session cache");
            return Ok(true);
        }

        if os_auth.available() {
            let checked =
                tokio::time::timeout(OS_AUTH_TIMEOUT, os_auth.check(session_type, ctx)).await;
            match checked {
                Ok(Ok(true)) => {}
                _ => return Ok(false),
            }
        }

        let body = format!(
            "{} on {}>{}>{} wants to {}",
            ctx.user_name,
            ctx.grand_parent_process_name,
            ctx.parent_process_name,
            ctx.process_name,
            session_type.describe()
        );
        let approved = match tokio::time::timeout(
            PROMPT_TIMEOUT,
            prompter.approve("Approve Access", &body),
        )
        .await
        {
            Ok(Ok(approved)) => approved,
            _ => false,
        };

        if approved {
            self.insert(session_type, fingerprint);
        }
        Ok(approved)
    }

    /// Installed unconditionally after a successful unlock.
    pub fn create_pin_session(&self, ctx: &CallingContext) {
        self.insert(SessionType::PinSession, Fingerprint::for_context(ctx));
    }

    pub fn verify_pin_session(&self, ctx: &CallingContext) -> bool {
        self.lookup(SessionType::PinSession, Fingerprint::for_context(ctx))
    }

    /// On lock or logout.
    pub fn invalidate_all(&self) {
        self.sessions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
        debug!("all approval sessions invalidated");
    }

    pub fn session_count(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .len()
    }
}
