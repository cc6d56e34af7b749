/// Typed IPC payloads and the self-describing message envelope.
///
/// A frame on the wire is `{"type": "<kind>", "payload": {...}}`. The kind
/// string is the payload type's name, which is what the action registry
/// dispatches on.
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use zeroize::Zeroize;

use crate::error::{AgentError, Result};

/// A payload type that knows its wire kind.
pub trait Payload: Serialize + DeserializeOwned {
    const KIND: &'static str;
}

macro_rules! payload {
    ($ty:ty, $kind:literal) => {
        impl Payload for $ty {
            const KIND: &'static str = $kind;
        }
    };
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

impl IpcMessage {
    pub fn from_payload<P: Payload>(payload: &P) -> Result<Self> {
        Ok(Self {
            kind: P::KIND.to_string(),
            payload: serde_json::to_value(payload)
                .map_err(|e| AgentError::Serialization(e.to_string()))?,
        })
    }

    pub fn parse_payload<P: Payload>(&self) -> Result<P> {
        if self.kind != P::KIND {
            return Err(AgentError::Serialization(format!(
                "expected a {} payload, got {}",
                P::KIND,
                self.kind
            )));
        }
        let value = if self.payload.is_null() {
            Value::Object(Default::default())
        } else {
            self.payload.clone()
        };
        serde_json::from_value(value).map_err(|e| AgentError::Serialization(e.to_string()))
    }
}

// Requests

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetLoginRequest {
    #[serde(default)]
    pub uuid: Option<Uuid>,
    #[serde(default)]
    pub organization_id: Option<Uuid>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}
payload!(GetLoginRequest, "GetLoginRequest");

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListLoginsRequest {}
payload!(ListLoginsRequest, "ListLoginsRequest");

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetBiometricsKeyRequest {}
payload!(GetBiometricsKeyRequest, "GetBiometricsKeyRequest");

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LockRequest {}
payload!(LockRequest, "LockRequest");

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusRequest {}
payload!(StatusRequest, "StatusRequest");

// Responses

/// Uniform response for gate denials and generic outcomes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ActionResponse {
    pub success: bool,
    pub message: String,
}
payload!(ActionResponse, "ActionResponse");

/// A decrypted login entry. Zeroized before drop wherever a request is
/// denied after decryption already happened.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Zeroize)]
#[serde(rename_all = "camelCase")]
pub struct DecryptedLoginCipher {
    pub uuid: String,
    #[serde(default)]
    pub organization_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub two_factor_code: String,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetLoginResponse {
    pub found: bool,
    pub result: DecryptedLoginCipher,
}
payload!(GetLoginResponse, "GetLoginResponse");

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetLoginsResponse {
    pub found: bool,
    pub result: Vec<DecryptedLoginCipher>,
}
payload!(GetLoginsResponse, "GetLoginsResponse");

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetBiometricsKeyResponse {
    pub key: String,
}
payload!(GetBiometricsKeyResponse, "GetBiometricsKeyResponse");

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub logged_in: bool,
    pub locked: bool,
}
payload!(StatusResponse, "StatusResponse");
