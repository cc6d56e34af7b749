/// XChaCha20-Poly1305 wrapping for secrets persisted in the agent config.
///
/// The 24-byte nonce of XChaCha20 is large enough for random generation
/// without practical collision risk; it is prepended to the ciphertext so
/// each stored blob is self-contained. The AAD binds a blob to its config
/// field, so a ciphertext cannot be swapped into another slot.
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::crypto::sensitive::SecretBuffer;
use crate::error::{AgentError, Result};

pub const NONCE_LEN: usize = 24;

/// Encrypt a config secret. Returns `nonce ∥ ciphertext`.
pub fn wrap(key: &SecretBuffer, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let key_bytes = key.open()?;
    let cipher = XChaCha20Poly1305::new_from_slice(key_bytes.as_bytes())
        .map_err(|e| AgentError::Crypto(format!("bad wrapping key: {e}")))?;

    let mut nonce = [0u8; NONCE_LEN];
    OsRng
        .try_fill_bytes(&mut nonce)
        .map_err(|e| AgentError::Crypto(format!("CSPRNG failure: {e}")))?;

    let ciphertext = cipher
        .encrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| AgentError::Crypto(format!("at-rest encryption failed: {e}")))?;

    let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Decrypt a `nonce ∥ ciphertext` blob produced by [`wrap`].
pub fn unwrap(key: &SecretBuffer, blob: &[u8], aad: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if blob.len() < NONCE_LEN {
        return Err(AgentError::Crypto("at-rest blob too short".into()));
    }
    let (nonce, ciphertext) = blob.split_at(NONCE_LEN);

    let key_bytes = key.open()?;
    let cipher = XChaCha20Poly1305::new_from_slice(key_bytes.as_bytes())
        .map_err(|e| AgentError::Crypto(format!("bad wrapping key: {e}")))?;

    let plaintext = cipher
        .decrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| AgentError::InvalidPin)?;

    Ok(Zeroizing::new(plaintext))
}
