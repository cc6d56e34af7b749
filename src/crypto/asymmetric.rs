/// RSA-2048 OAEP engine for asymmetric cipher strings.
///
/// Only the SHA-1 OAEP variant (suite 4) is implemented; it is what the
/// existing vault wire format uses for organization key wrapping. Suites 3,
/// 5, and 6 are enumerated but rejected until they are defined.
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use zeroize::Zeroizing;

use crate::crypto::encstring::{CipherString, EncStringType};
use crate::crypto::keys::AsymmetricEncryptionKey;
use crate::error::{AgentError, Result};

pub const RSA_BITS: usize = 2048;

fn parse_private_key(key: &AsymmetricEncryptionKey) -> Result<RsaPrivateKey> {
    let der = key.der().open()?;
    RsaPrivateKey::from_pkcs8_der(der.as_bytes())
        .map_err(|e| AgentError::Crypto(format!("bad PKCS#8 private key: {e}")))
}

/// Generate a fresh RSA-2048 key, stored PKCS#8-encoded.
pub fn generate() -> Result<AsymmetricEncryptionKey> {
    let key = RsaPrivateKey::new(&mut OsRng, RSA_BITS)
        .map_err(|e| AgentError::Crypto(format!("RSA key generation failed: {e}")))?;
    let der = key
        .to_pkcs8_der()
        .map_err(|e| AgentError::Crypto(format!("PKCS#8 encoding failed: {e}")))?;
    let mut bytes = der.as_bytes().to_vec();
    Ok(AsymmetricEncryptionKey::from_der(&mut bytes))
}

/// Decrypt an asymmetric cipher string with the private key.
pub fn decrypt_with(
    s: &CipherString,
    key: &AsymmetricEncryptionKey,
) -> Result<Zeroizing<Vec<u8>>> {
    if s.typ != EncStringType::Rsa2048OaepSha1B64 {
        return Err(AgentError::UnsupportedCipherType(s.typ.tag()));
    }
    let private = parse_private_key(key)?;
    let plaintext = private
        .decrypt(Oaep::new::<Sha1>(), &s.ct)
        .map_err(|_| AgentError::Crypto("RSA-OAEP decryption failed".into()))?;
    Ok(Zeroizing::new(plaintext))
}

/// Encrypt data to the key's public half, producing a `4.`-prefixed token.
pub fn encrypt_with(data: &[u8], key: &AsymmetricEncryptionKey) -> Result<CipherString> {
    let public = RsaPublicKey::from(&parse_private_key(key)?);
    let ct = public
        .encrypt(&mut OsRng, Oaep::new::<Sha1>(), data)
        .map_err(|e| AgentError::Crypto(format!("RSA-OAEP encryption failed: {e}")))?;
    Ok(CipherString {
        typ: EncStringType::Rsa2048OaepSha1B64,
        iv: Vec::new(),
        ct,
        mac: Vec::new(),
    })
}
