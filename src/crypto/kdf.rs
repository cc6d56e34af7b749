/// Argon2id key derivation for the PIN that protects the agent config.
///
/// Produces a 256-bit key from a PIN and salt.
use argon2::{Algorithm, Argon2, Params, Version};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::crypto::sensitive::SecretBuffer;
use crate::error::{AgentError, Result};

const ARGON2_TIME_COST: u32 = 3;
const ARGON2_MEMORY_KIB: u32 = 65_536; // 64 MiB
const ARGON2_PARALLELISM: u32 = 4;
pub const SALT_LEN: usize = 32;

/// Generate a random 32-byte salt.
pub fn generate_salt() -> Result<[u8; SALT_LEN]> {
    let mut salt = [0u8; SALT_LEN];
    OsRng
        .try_fill_bytes(&mut salt)
        .map_err(|e| AgentError::Crypto(format!("CSPRNG failure: {e}")))?;
    Ok(salt)
}

fn derive_with_params(pin: &[u8], salt: &[u8], params: Params) -> Result<SecretBuffer> {
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut output = [0u8; 32];
    argon2
        .hash_password_into(pin, salt, &mut output)
        .map_err(|e| AgentError::KeyDerivation(e.to_string()))?;

    Ok(SecretBuffer::seal(&mut output))
}

/// Derive the 32-byte config unlock key from a PIN using Argon2id.
pub fn derive_unlock_key(pin: &[u8], salt: &[u8]) -> Result<SecretBuffer> {
    let params = Params::new(
        ARGON2_MEMORY_KIB,
        ARGON2_TIME_COST,
        ARGON2_PARALLELISM,
        Some(32),
    )
    .map_err(|e| AgentError::KeyDerivation(e.to_string()))?;
    derive_with_params(pin, salt, params)
}

/// Derive a key with reduced parameters for testing (fast but insecure).
#[cfg(test)]
pub fn derive_unlock_key_test(pin: &[u8], salt: &[u8]) -> Result<SecretBuffer> {
    let params = Params::new(1024, 1, 1, Some(32))
        .map_err(|e| AgentError::KeyDerivation(e.to_string()))?;
    derive_with_params(pin, salt, params)
}
