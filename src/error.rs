use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Not logged in")]
    NotLoggedIn,

    #[error("Unlock failed: {0}")]
    LockedAndUnlockFailed(String),

    #[error("not approved")]
    NotApproved,

    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("Malformed cipher string: {0}")]
    MalformedCipherString(String),

    #[error("Unsupported cipher type {0}")]
    UnsupportedCipherType(u8),

    #[error("MAC mismatch")]
    MacMismatch,

    #[error("Bad PKCS#7 padding")]
    BadPadding,

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Ambiguous lookup: {0}")]
    AmbiguousLookup(String),

    #[error("Login not found")]
    NotFound,

    #[error("Invalid PIN")]
    InvalidPin,

    #[error("Crypto failure: {0}")]
    Crypto(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, AgentError>;
