/// The textual cipher-string envelope used throughout the vault.
///
/// Symmetric wire format: `<type>.<b64(iv)>|<b64(ct)>[|<b64(mac)>]`.
/// Asymmetric tokens carry a single base64 part: `<type>.<b64(ct)>`.
/// Legacy writers emitted a trailing empty part for MAC-less suites, so the
/// parser accepts both 2-part and 3-part encodings there; the serializer
/// writes the third part only when the suite has a MAC.
use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{AgentError, Result};

pub const IV_LEN: usize = 16;
pub const MAC_LEN: usize = 32;

/// The fixed set of cipher suites a cipher string can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncStringType {
    AesCbc256B64,
    AesCbc128HmacSha256B64,
    AesCbc256HmacSha256B64,
    Rsa2048OaepSha256B64,
    Rsa2048OaepSha1B64,
    Rsa2048OaepSha256HmacSha256B64,
    Rsa2048OaepSha1HmacSha256B64,
}

impl EncStringType {
    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(Self::AesCbc256B64),
            1 => Ok(Self::AesCbc128HmacSha256B64),
            2 => Ok(Self::AesCbc256HmacSha256B64),
            3 => Ok(Self::Rsa2048OaepSha256B64),
            4 => Ok(Self::Rsa2048OaepSha1B64),
            5 => Ok(Self::Rsa2048OaepSha256HmacSha256B64),
            6 => Ok(Self::Rsa2048OaepSha1HmacSha256B64),
            other => Err(AgentError::UnsupportedCipherType(other)),
        }
    }

    pub fn tag(self) -> u8 {
        match self {
            Self::AesCbc256B64 => 0,
            Self::AesCbc128HmacSha256B64 => 1,
            Self::AesCbc256HmacSha256B64 => 2,
            Self::Rsa2048OaepSha256B64 => 3,
            Self::Rsa2048OaepSha1B64 => 4,
            Self::Rsa2048OaepSha256HmacSha256B64 => 5,
            Self::Rsa2048OaepSha1HmacSha256B64 => 6,
        }
    }

    pub fn has_mac(self) -> bool {
        matches!(
            self,
            Self::AesCbc128HmacSha256B64
                | Self::AesCbc256HmacSha256B64
                | Self::Rsa2048OaepSha256HmacSha256B64
                | Self::Rsa2048OaepSha1HmacSha256B64
        )
    }

    pub fn is_symmetric(self) -> bool {
        self.tag() <= 2
    }
}

/// A parsed cipher string. All three byte runs empty is the null state,
/// which serializes to the empty string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherString {
    pub typ: EncStringType,
    pub iv: Vec<u8>,
    pub ct: Vec<u8>,
    pub mac: Vec<u8>,
}

impl CipherString {
    pub fn null() -> Self {
        Self {
            typ: EncStringType::AesCbc256B64,
            iv: Vec::new(),
            ct: Vec::new(),
            mac: Vec::new(),
        }
    }

    pub fn is_null(&self) -> bool {
        self.iv.is_empty() && self.ct.is_empty() && self.mac.is_empty()
    }
}

impl Default for CipherString {
    fn default() -> Self {
        Self::null()
    }
}

fn b64_decode(part: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(part)
        .map_err(|e| AgentError::MalformedCipherString(format!("bad base64: {e}")))
}

impl FromStr for CipherString {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Ok(Self::null());
        }

        let (tag, rest) = s.split_once('.').ok_or_else(|| {
            AgentError::MalformedCipherString("missing type separator".into())
        })?;
        let tag: u8 = tag.parse().map_err(|_| {
            AgentError::MalformedCipherString("non-numeric type tag".into())
        })?;
        let typ = EncStringType::from_tag(tag)?;

        let parts: Vec<&str> = rest.split('|').collect();

        if !typ.is_symmetric() {
            if parts.len() != 1 {
                return Err(AgentError::MalformedCipherString(format!(
                    "asymmetric suite {tag} carries a single part, got {}",
                    parts.len()
                )));
            }
            return Ok(Self {
                typ,
                iv: Vec::new(),
                ct: b64_decode(parts[0])?,
                mac: Vec::new(),
            });
        }

        let (iv_part, ct_part, mac_part) = match parts.as_slice() {
            [iv, ct] if !typ.has_mac() => (*iv, *ct, ""),
            [iv, ct, mac] => (*iv, *ct, *mac),
            _ => {
                return Err(AgentError::MalformedCipherString(format!(
                    "expected 2 or 3 parts, got {}",
                    parts.len()
                )))
            }
        };

        let iv = b64_decode(iv_part)?;
        let ct = b64_decode(ct_part)?;
        let mac = if typ.has_mac() {
            b64_decode(mac_part)?
        } else {
            Vec::new()
        };

        if iv.len() != IV_LEN {
            return Err(AgentError::MalformedCipherString(format!(
                "IV is {} bytes, want {IV_LEN}",
                iv.len()
            )));
        }
        if typ.has_mac() && mac.len() != MAC_LEN {
            return Err(AgentError::MalformedCipherString(format!(
                "MAC is {} bytes, want {MAC_LEN}",
                mac.len()
            )));
        }

        Ok(Self { typ, iv, ct, mac })
    }
}

impl fmt::Display for CipherString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            return Ok(());
        }
        if !self.typ.is_symmetric() {
            return write!(f, "{}.{}", self.typ.tag(), BASE64.encode(&self.ct));
        }
        write!(
            f,
            "{}.{}|{}",
            self.typ.tag(),
            BASE64.encode(&self.iv),
            BASE64.encode(&self.ct)
        )?;
        if self.typ.has_mac() {
            write!(f, "|{}", BASE64.encode(&self.mac))?;
        }
        Ok(())
    }
}

impl Serialize for CipherString {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for CipherString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        // Upstream documents encode unset fields as null.
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(Self::null()),
            Some(s) => s.parse().map_err(de::Error::custom),
        }
    }
}
