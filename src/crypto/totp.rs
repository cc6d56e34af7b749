/// RFC 6238 time-based one-time codes for vault login entries.
///
/// Seeds are stored base32-encoded; whitespace and padding are tolerated
/// since upstream clients are sloppy about both.
use data_encoding::BASE32_NOPAD;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use zeroize::Zeroizing;

use crate::error::{AgentError, Result};

pub const STEP_SECONDS: u64 = 30;
pub const DIGITS: u32 = 6;

fn decode_seed(seed: &str) -> Result<Zeroizing<Vec<u8>>> {
    let normalized: String = seed
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '=')
        .map(|c| c.to_ascii_uppercase())
        .collect();
    let key = BASE32_NOPAD
        .decode(normalized.as_bytes())
        .map_err(|e| AgentError::Crypto(format!("invalid TOTP seed: {e}")))?;
    Ok(Zeroizing::new(key))
}

/// Generate the 6-digit code for `unix_time` seconds since the epoch.
pub fn generate_code(seed: &str, unix_time: u64) -> Result<String> {
    let key = decode_seed(seed)?;
    let counter = unix_time / STEP_SECONDS;

    let mut mac = <Hmac<Sha1> as Mac>::new_from_slice(&key)
        .map_err(|e| AgentError::Crypto(format!("invalid TOTP seed: {e}")))?;
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = (digest[19] & 0x0F) as usize;
    let binary = u32::from_be_bytes([
        digest[offset] & 0x7F,
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]);

    Ok(format!("{:06}", binary % 10u32.pow(DIGITS)))
}
