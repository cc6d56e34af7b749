/// Agent lifecycle handlers: lock and status.
use async_trait::async_trait;
use tracing::info;

use crate::actions::{Action, Services};
use crate::error::Result;
use crate::ipc::messages::{ActionResponse, IpcMessage, StatusResponse};
use crate::ipc::CallingContext;

/// Lock the agent: drop the unlock key, wipe the keyring, and invalidate
/// every cached approval.
pub struct LockAgent;

#[async_trait]
impl Action for LockAgent {
    async fn run(
        &self,
        _request: &IpcMessage,
        services: &Services,
        ctx: &CallingContext,
    ) -> Result<IpcMessage> {
        services.config.lock();
        services.vault.lock();
        services.sessions.invalidate_all();
        info!(user = %ctx.user_name, process = %ctx.process_name, "agent locked");

        IpcMessage::from_payload(&ActionResponse {
            success: true,
            message: "locked".to_string(),
        })
    }
}

/// Read-only login/lock state. Deliberately outside the gate stack.
pub struct AgentStatus;

#[async_trait]
impl Action for AgentStatus {
    async fn run(
        &self,
        _request: &IpcMessage,
        services: &Services,
        _ctx: &CallingContext,
    ) -> Result<IpcMessage> {
        IpcMessage::from_payload(&StatusResponse {
            logged_in: services.config.is_logged_in(),
            locked: services.config.is_locked(),
        })
    }
}
