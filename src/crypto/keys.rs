/// Key types for the vault cipher engines.
///
/// A [`SymmetricEncryptionKey`] is always a pair of independent 32-byte
/// keys: one for AES-256-CBC and one for HMAC-SHA256. Vault key material
/// arrives either as a full 64-byte blob (split 32|32) or as a 32-byte
/// master key that is stretched with HKDF-SHA256.
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::crypto::sensitive::SecretBuffer;
use crate::error::{AgentError, Result};

pub const ENC_KEY_LEN: usize = 32;
pub const MAC_KEY_LEN: usize = 32;

/// HKDF info labels used when stretching a 32-byte master key.
const STRETCH_INFO_ENC: &[u8] = b"enc";
const STRETCH_INFO_MAC: &[u8] = b"mac";

/// An AES-256 encryption key paired with an HMAC-SHA256 key.
///
/// Equality and hashing are deliberately not implemented.
#[derive(Clone)]
pub struct SymmetricEncryptionKey {
    enc_key: SecretBuffer,
    mac_key: SecretBuffer,
}

impl std::fmt::Debug for SymmetricEncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymmetricEncryptionKey").finish_non_exhaustive()
    }
}

impl SymmetricEncryptionKey {
    /// Build a key from raw material, zeroizing the source.
    ///
    /// Accepts 64 bytes (split into enc|mac) or 32 bytes (HKDF-SHA256
    /// stretched with empty salt and the `enc`/`mac` info labels).
    pub fn from_bytes(material: &mut [u8]) -> Result<Self> {
        match material.len() {
            64 => {
                let (enc, mac) = material.split_at_mut(ENC_KEY_LEN);
                Ok(Self {
                    enc_key: SecretBuffer::seal(enc),
                    mac_key: SecretBuffer::seal(mac),
                })
            }
            32 => {
                let hkdf = Hkdf::<Sha256>::new(None, material);
                let mut enc = [0u8; ENC_KEY_LEN];
                let mut mac = [0u8; MAC_KEY_LEN];
                hkdf.expand(STRETCH_INFO_ENC, &mut enc)
                    .map_err(|e| AgentError::KeyDerivation(e.to_string()))?;
                hkdf.expand(STRETCH_INFO_MAC, &mut mac)
                    .map_err(|e| AgentError::KeyDerivation(e.to_string()))?;
                material.zeroize();
                Ok(Self {
                    enc_key: SecretBuffer::seal(&mut enc),
                    mac_key: SecretBuffer::seal(&mut mac),
                })
            }
            n => Err(AgentError::KeyDerivation(format!(
                "unexpected symmetric key length {n}, want 32 or 64"
            ))),
        }
    }

    /// Generate a fresh random 64-byte key pair.
    pub fn generate() -> Result<Self> {
        let mut material = [0u8; ENC_KEY_LEN + MAC_KEY_LEN];
        OsRng
            .try_fill_bytes(&mut material)
            .map_err(|e| AgentError::Crypto(format!("CSPRNG failure: {e}")))?;
        Self::from_bytes(&mut material)
    }

    pub(crate) fn enc_key(&self) -> &SecretBuffer {
        &self.enc_key
    }

    pub(crate) fn mac_key(&self) -> &SecretBuffer {
        &self.mac_key
    }
}

/// A PKCS#8-encoded RSA-2048 private key. The public half is derived by
/// parsing when needed.
#[derive(Clone)]
pub struct AsymmetricEncryptionKey {
    der: SecretBuffer,
}

impl AsymmetricEncryptionKey {
    /// Wrap a PKCS#8 DER private key, zeroizing the source.
    pub fn from_der(der: &mut [u8]) -> Self {
        Self {
            der: SecretBuffer::seal(der),
        }
    }

    pub(crate) fn der(&self) -> &SecretBuffer {
        &self.der
    }
}
