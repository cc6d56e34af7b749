/// Seams to the interactive consent prompter and the platform auth backend.
///
/// Both are external processes; the agent only ever sees an approve/deny
/// answer. The default implementations here deny everything so that a
/// misconfigured agent fails closed.
use async_trait::async_trait;
use tokio::process::Command;
use tracing::warn;
use zeroize::Zeroizing;

use crate::error::{AgentError, Result};
use crate::ipc::CallingContext;
use crate::systemauth::SessionType;

/// Interactive consent dialog.
#[async_trait]
pub trait ConsentPrompter: Send + Sync {
    /// Ask the user to approve a described operation.
    async fn approve(&self, title: &str, body: &str) -> Result<bool>;

    /// Ask the user for their PIN. `None` means the dialog was cancelled.
    async fn read_pin(&self, title: &str, body: &str) -> Result<Option<Zeroizing<String>>>;
}

/// Platform authorization service (biometric prompt, policy daemon).
#[async_trait]
pub trait OsAuthBackend: Send + Sync {
    fn available(&self) -> bool;

    async fn check(&self, session_type: SessionType, ctx: &CallingContext) -> Result<bool>;
}

/// Prompter that shells out to a helper binary.
///
/// `helper approve <title> <body>` — exit 0 approves.
/// `helper pin <title> <body>` — prints the PIN on stdout, exit 0.
pub struct CommandPrompter {
    program: std::path::PathBuf,
}

impl CommandPrompter {
    pub fn new(program: std::path::PathBuf) -> Self {
        Self { program }
    }
}

#[async_trait]
impl ConsentPrompter for CommandPrompter {
    async fn approve(&self, title: &str, body: &str) -> Result<bool> {
        let status = Command::new(&self.program)
            .arg("approve")
            .arg(title)
            .arg(body)
            .status()
            .await
            .map_err(AgentError::Io)?;
        Ok(status.success())
    }

    async fn read_pin(&self, title: &str, body: &str) -> Result<Option<Zeroizing<String>>> {
        let output = Command::new(&self.program)
            .arg("pin")
            .arg(title)
            .arg(body)
            .output()
            .await
            .map_err(AgentError::Io)?;
        if !output.status.success() {
            return Ok(None);
        }
        let pin = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if pin.is_empty() {
            return Ok(None);
        }
        Ok(Some(Zeroizing::new(pin)))
    }
}

/// Fails closed: every approval is denied.
pub struct DenyingPrompter;

#[async_trait]
impl ConsentPrompter for DenyingPrompter {
    async fn approve(&self, title: &str, _body: &str) -> Result<bool> {
        warn!(title, "no consent prompter configured, denying");
        Ok(false)
    }

    async fn read_pin(&self, _title: &str, _body: &str) -> Result<Option<Zeroizing<String>>> {
        warn!("no consent prompter configured, cancelling PIN entry");
        Ok(None)
    }
}

/// Platform auth backend that is simply not present.
pub struct NoOsAuth;

#[async_trait]
impl OsAuthBackend for NoOsAuth {
    fn available(&self) -> bool {
        false
    }

    async fn check(&self, _session_type: SessionType, _ctx: &CallingContext) -> Result<bool> {
        Ok(false)
    }
}
