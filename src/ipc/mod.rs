/// Unix-socket transport: length-framed JSON messages plus caller identity.
///
/// Frames are a 4-byte big-endian length followed by the JSON envelope.
/// Connections are served concurrently; within one connection requests are
/// handled and answered strictly in arrival order.
pub mod messages;

use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use crate::actions::{dispatch, ActionRegistry, Services};
use crate::error::{AgentError, Result};
use crate::ipc::messages::{ActionResponse, IpcMessage};

pub const MAX_FRAME_LEN: u32 = 1024 * 1024;

/// The resolved identity of a socket peer: user plus three levels of
/// process ancestry. Populated once at accept time and attached to every
/// request on the connection.
#[derive(Debug, Clone)]
pub struct CallingContext {
    pub user_name: String,
    pub uid: u32,
    pub process_name: String,
    pub parent_process_name: String,
    pub grand_parent_process_name: String,
    pub pid: i32,
    pub socket_handle: i32,
}

impl CallingContext {
    pub fn unknown() -> Self {
        Self {
            user_name: "unknown".into(),
            uid: u32::MAX,
            process_name: "unknown".into(),
            parent_process_name: "unknown".into(),
            grand_parent_process_name: "unknown".into(),
            pid: -1,
            socket_handle: -1,
        }
    }
}

pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<IpcMessage>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_buf);
    if len == 0 || len > MAX_FRAME_LEN {
        return Err(AgentError::Serialization(format!(
            "unreasonable frame length {len}"
        )));
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    let message = serde_json::from_slice(&payload)
        .map_err(|e| AgentError::Serialization(format!("bad frame: {e}")))?;
    Ok(Some(message))
}

pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: &IpcMessage,
) -> Result<()> {
    let payload =
        serde_json::to_vec(message).map_err(|e| AgentError::Serialization(e.to_string()))?;
    if payload.len() > MAX_FRAME_LEN as usize {
        return Err(AgentError::Serialization(format!(
            "frame too large: {} bytes",
            payload.len()
        )));
    }
    writer
        .write_all(&(payload.len() as u32).to_be_bytes())
        .await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Bind the agent socket and serve connections until cancelled.
pub async fn serve(
    socket_path: &Path,
    services: Arc<Services>,
    registry: Arc<ActionRegistry>,
) -> Result<()> {
    if socket_path.exists() {
        std::fs::remove_file(socket_path)?;
    }
    let listener = UnixListener::bind(socket_path)?;
    info!(path = %socket_path.display(), "agent listening");

    loop {
        let (stream, _) = listener.accept().await?;
        let ctx = resolve_calling_context(&stream);
        let services = services.clone();
        let registry = registry.clone();
        tokio::spawn(async move {
            handle_connection(stream, ctx, services, registry).await;
        });
    }
}

async fn handle_connection(
    mut stream: UnixStream,
    ctx: CallingContext,
    services: Arc<Services>,
    registry: Arc<ActionRegistry>,
) {
    debug!(
        user = %ctx.user_name,
        process = %ctx.process_name,
        pid = ctx.pid,
        "client connected"
    );

    loop {
        let request = match read_frame(&mut stream).await {
            Ok(Some(message)) => message,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "dropping connection on bad frame");
                break;
            }
        };

        let kind = request.kind.clone();
        let response = match dispatch(&registry, &request, &services, &ctx).await {
            Ok(response) => response,
            Err(e) => {
                warn!(kind = %kind, error = %e, "request failed");
                match IpcMessage::from_payload(&ActionResponse {
                    success: false,
                    message: e.to_string(),
                }) {
                    Ok(message) => message,
                    Err(_) => break,
                }
            }
        };

        if let Err(e) = write_frame(&mut stream, &response).await {
            // The handler already did its work; the peer just went away.
            warn!(kind = %kind, error = %e, "failed to send response");
            break;
        }
    }

    debug!(user = %ctx.user_name, process = %ctx.process_name, "client disconnected");
}

/// One-shot client used by the CLI.
pub async fn request(socket_path: &Path, message: &IpcMessage) -> Result<IpcMessage> {
    let mut stream = UnixStream::connect(socket_path).await?;
    write_frame(&mut stream, message).await?;
    read_frame(&mut stream).await?.ok_or_else(|| {
        AgentError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "agent closed the connection without answering",
        ))
    })
}

#[cfg(target_os = "linux")]
fn resolve_calling_context(stream: &UnixStream) -> CallingContext {
    use std::os::fd::AsRawFd;

    let socket_handle = stream.as_raw_fd();
    let Ok(cred) = stream.peer_cred() else {
        warn!("could not resolve peer credentials");
        return CallingContext::unknown();
    };

    let uid = cred.uid();
    let pid = cred.pid().unwrap_or(-1);
    let parent = parent_pid(pid);
    let grandparent = parent_pid(parent);

    CallingContext {
        user_name: user_name_for_uid(uid),
        uid,
        process_name: process_name(pid),
        parent_process_name: process_name(parent),
        grand_parent_process_name: process_name(grandparent),
        pid,
        socket_handle,
    }
}

#[cfg(not(target_os = "linux"))]
fn resolve_calling_context(stream: &UnixStream) -> CallingContext {
    use std::os::fd::AsRawFd;

    let mut ctx = CallingContext::unknown();
    ctx.socket_handle = stream.as_raw_fd();
    if let Ok(cred) = stream.peer_cred() {
        ctx.uid = cred.uid();
        ctx.user_name = cred.uid().to_string();
    }
    ctx
}

#[cfg(target_os = "linux")]
fn process_name(pid: i32) -> String {
    if pid <= 0 {
        return "unknown".into();
    }
    std::fs::read_to_string(format!("/proc/{pid}/comm"))
        .map(|name| name.trim().to_string())
        .unwrap_or_else(|_| "unknown".into())
}

#[cfg(target_os = "linux")]
fn parent_pid(pid: i32) -> i32 {
    if pid <= 0 {
        return -1;
    }
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return -1;
    };
    // Fields after the parenthesised comm: state, then ppid.
    let Some(rest) = stat.rfind(')').map(|i| &stat[i + 1..]) else {
        return -1;
    };
    rest.split_whitespace()
        .nth(1)
        .and_then(|ppid| ppid.parse().ok())
        .unwrap_or(-1)
}

#[cfg(target_os = "linux")]
fn user_name_for_uid(uid: u32) -> String {
    if let Ok(passwd) = std::fs::read_to_string("/etc/passwd") {
        for line in passwd.lines() {
            let mut fields = line.split(':');
            let name = fields.next();
            let entry_uid = fields.nth(1).and_then(|u| u.parse::<u32>().ok());
            if let (Some(name), Some(entry_uid)) = (name, entry_uid) {
                if entry_uid == uid {
                    return name.to_string();
                }
            }
        }
    }
    uid.to_string()
}

#[cfg(test)]
mod tests {
    use super::messages::{ListLoginsRequest, Payload};
    use super::*;

    #[tokio::test]
    async fn test_frame_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let message = IpcMessage::from_payload(&ListLoginsRequest {}).unwrap();
        write_frame(&mut client, &message).await.unwrap();
        let received = read_frame(&mut server).await.unwrap().unwrap();
        assert_eq!(received.kind, ListLoginsRequest::KIND);
    }

    #[tokio::test]
    async fn test_multiple_frames_in_order() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        for kind in ["first", "second", "third"] {
            let message = IpcMessage {
                kind: kind.into(),
                payload: serde_json::Value::Null,
            };
            write_frame(&mut client, &message).await.unwrap();
        }
        for kind in ["first", "second", "third"] {
            let received = read_frame(&mut server).await.unwrap().unwrap();
            assert_eq!(received.kind, kind);
        }
    }

    #[tokio::test]
    async fn test_clean_eof_is_none() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        assert!(read_frame(&mut server).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        tokio::spawn(async move {
            let _ = client.write_all(&(MAX_FRAME_LEN + 1).to_be_bytes()).await;
        });
        assert!(read_frame(&mut server).await.is_err());
    }

    #[tokio::test]
    async fn test_zero_length_frame_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        tokio::spawn(async move {
            let _ = client.write_all(&0u32.to_be_bytes()).await;
        });
        assert!(read_frame(&mut server).await.is_err());
    }
}
