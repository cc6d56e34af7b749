/// AES-256-CBC + HMAC-SHA256 engine for symmetric cipher strings.
///
/// The MAC'd suite is encrypt-then-MAC: on decryption the tag over
/// `iv ∥ ct` is verified in constant time before any block is touched,
/// and no plaintext is ever returned on a failed verification.
use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::crypto::encstring::{CipherString, EncStringType, IV_LEN};
use crate::crypto::keys::SymmetricEncryptionKey;
use crate::error::{AgentError, Result};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;

const BLOCK_LEN: usize = 16;

fn compute_mac(mac_key: &[u8], iv: &[u8], ct: &[u8]) -> Result<[u8; 32]> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(mac_key)
        .map_err(|e| AgentError::Crypto(format!("bad MAC key: {e}")))?;
    mac.update(iv);
    mac.update(ct);
    Ok(mac.finalize().into_bytes().into())
}

/// Decrypt a symmetric cipher string. Only `AesCbc256B64` and
/// `AesCbc256HmacSha256B64` are accepted.
pub fn decrypt_with(
    s: &CipherString,
    key: &SymmetricEncryptionKey,
) -> Result<Zeroizing<Vec<u8>>> {
    match s.typ {
        EncStringType::AesCbc256B64 | EncStringType::AesCbc256HmacSha256B64 => {}
        other => return Err(AgentError::UnsupportedCipherType(other.tag())),
    }

    if s.iv.len() != IV_LEN {
        return Err(AgentError::MalformedCipherString(format!(
            "IV is {} bytes, want {IV_LEN}",
            s.iv.len()
        )));
    }
    if s.ct.len() % BLOCK_LEN != 0 {
        return Err(AgentError::MalformedCipherString(format!(
            "ciphertext length {} is not block-aligned",
            s.ct.len()
        )));
    }

    if s.typ == EncStringType::AesCbc256HmacSha256B64 {
        let mac_key = key.mac_key().open()?;
        if s.mac.is_empty() || mac_key.as_bytes().is_empty() {
            return Err(AgentError::MalformedCipherString(
                "cipher string type expects a MAC".into(),
            ));
        }
        let expected = compute_mac(mac_key.as_bytes(), &s.iv, &s.ct)?;
        if expected.as_slice().ct_eq(s.mac.as_slice()).unwrap_u8() == 0 {
            return Err(AgentError::MacMismatch);
        }
    }

    let enc_key = key.enc_key().open()?;
    let plaintext = Aes256CbcDec::new_from_slices(enc_key.as_bytes(), &s.iv)
        .map_err(|e| AgentError::Crypto(format!("bad AES key or IV: {e}")))?
        .decrypt_padded_vec_mut::<Pkcs7>(&s.ct)
        .map_err(|_| AgentError::BadPadding)?;

    Ok(Zeroizing::new(plaintext))
}

/// Encrypt data into a symmetric cipher string with a fresh random IV.
pub fn encrypt_with(
    data: &[u8],
    typ: EncStringType,
    key: &SymmetricEncryptionKey,
) -> Result<CipherString> {
    match typ {
        EncStringType::AesCbc256B64 | EncStringType::AesCbc256HmacSha256B64 => {}
        other => return Err(AgentError::UnsupportedCipherType(other.tag())),
    }

    let mut iv = [0u8; IV_LEN];
    OsRng
        .try_fill_bytes(&mut iv)
        .map_err(|e| AgentError::Crypto(format!("CSPRNG failure: {e}")))?;

    let enc_key = key.enc_key().open()?;
    let ct = Aes256CbcEnc::new_from_slices(enc_key.as_bytes(), &iv)
        .map_err(|e| AgentError::Crypto(format!("bad AES key or IV: {e}")))?
        .encrypt_padded_vec_mut::<Pkcs7>(data);

    let mac = if typ.has_mac() {
        let mac_key = key.mac_key().open()?;
        if mac_key.as_bytes().is_empty() {
            return Err(AgentError::Crypto("cipher string type expects a MAC key".into()));
        }
        compute_mac(mac_key.as_bytes(), &iv, &ct)?.to_vec()
    } else {
        Vec::new()
    };

    Ok(CipherString {
        typ,
        iv: iv.to_vec(),
        ct,
        mac,
    })
}
