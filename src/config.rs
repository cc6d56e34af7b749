/// Persisted agent state and its runtime lock.
///
/// Everything secret in the config file — master key, master password hash,
/// user symmetric key, user private key, refresh token, organization key
/// tokens — is stored wrapped with XChaCha20-Poly1305 under a key derived
/// from the user's PIN with Argon2id. Unlocking derives that key and keeps
/// it in a [`SecretBuffer`]; locking drops it. The file layout itself is a
/// versioned JSON document with hex/base64-encoded blobs.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::crypto::encstring::CipherString;
use crate::crypto::sensitive::SecretBuffer;
use crate::crypto::{aead, kdf};
use crate::error::{AgentError, Result};

const CONFIG_VERSION: u32 = 1;

/// On-disk document. Secret fields hold base64 `nonce ∥ ciphertext` blobs;
/// an empty string means the slot is unset.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ConfigFile {
    pub version: u32,
    /// Argon2id salt for the PIN, hex-encoded. Empty when no PIN is enrolled.
    #[serde(default)]
    pub kdf_salt: String,
    #[serde(default)]
    pub encrypted_master_key: String,
    #[serde(default)]
    pub encrypted_master_password_hash: String,
    #[serde(default)]
    pub encrypted_user_symmetric_key: String,
    #[serde(default)]
    pub encrypted_user_private_key: String,
    #[serde(default)]
    pub encrypted_refresh_token: String,
    /// Organization id → RSA-wrapped key token (a `4.` cipher string).
    #[serde(default)]
    pub organization_keys: HashMap<Uuid, String>,
}

pub struct Config {
    path: Option<PathBuf>,
    file: RwLock<ConfigFile>,
    unlock_key: Mutex<Option<SecretBuffer>>,
}

impl Config {
    pub fn new_in_memory() -> Self {
        Self {
            path: None,
            file: RwLock::new(ConfigFile {
                version: CONFIG_VERSION,
                ..ConfigFile::default()
            }),
            unlock_key: Mutex::new(None),
        }
    }

    /// Wrap an already-parsed document. Starts locked.
    pub fn from_file(file: ConfigFile) -> Self {
        Self {
            path: None,
            file: RwLock::new(file),
            unlock_key: Mutex::new(None),
        }
    }

    /// Load the config from disk, or start empty if the file is absent.
    pub fn load(path: &Path) -> Result<Self> {
        let file = match std::fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| AgentError::Serialization(format!("config parse failed: {e}")))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ConfigFile {
                version: CONFIG_VERSION,
                ..ConfigFile::default()
            },
            Err(e) => return Err(e.into()),
        };
        let mut config = Self::from_file(file);
        config.path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Persist the document atomically (write-then-rename).
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_vec_pretty(&*self.read_file())
            .map_err(|e| AgentError::Serialization(e.to_string()))?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    fn read_file(&self) -> std::sync::RwLockReadGuard<'_, ConfigFile> {
        self.file.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write_file(&self) -> std::sync::RwLockWriteGuard<'_, ConfigFile> {
        self.file.write().unwrap_or_else(|p| p.into_inner())
    }

    fn unlock_key(&self) -> Result<SecretBuffer> {
        self.unlock_key
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
            .ok_or_else(|| AgentError::KeyDerivation("config is locked".into()))
    }

    /// Enroll a PIN on a fresh config, leaving it unlocked.
    pub fn enroll_pin(&self, pin: &str) -> Result<()> {
        {
            let file = self.read_file();
            if !file.kdf_salt.is_empty() {
                return Err(AgentError::Crypto("a PIN is already enrolled".into()));
            }
        }
        let salt = kdf::generate_salt()?;
        let key = kdf::derive_unlock_key(pin.as_bytes(), &salt)?;
        self.write_file().kdf_salt = hex::encode(salt);
        *self.unlock_key.lock().unwrap_or_else(|p| p.into_inner()) = Some(key);
        self.save()
    }

    pub fn has_pin(&self) -> bool {
        !self.read_file().kdf_salt.is_empty()
    }

    pub fn is_locked(&self) -> bool {
        self.unlock_key
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .is_none()
    }

    /// Logged-in means a master password hash is on record.
    pub fn is_logged_in(&self) -> bool {
        !self.read_file().encrypted_master_password_hash.is_empty()
    }

    /// Derive the unlock key from the PIN and verify it against a stored
    /// secret before accepting it.
    pub fn try_unlock(&self, pin: &str) -> Result<()> {
        let (salt_hex, verify_blob, verify_aad) = {
            let file = self.read_file();
            if file.kdf_salt.is_empty() {
                return Err(AgentError::LockedAndUnlockFailed(
                    "no PIN material enrolled".into(),
                ));
            }
            // Prefer the master password hash as the verification target.
            let (blob, aad) = if !file.encrypted_master_password_hash.is_empty() {
                (
                    file.encrypted_master_password_hash.clone(),
                    SLOT_MASTER_PASSWORD_HASH,
                )
            } else {
                (file.encrypted_master_key.clone(), SLOT_MASTER_KEY)
            };
            (file.kdf_salt.clone(), blob, aad)
        };

        let salt = hex::decode(&salt_hex)
            .map_err(|e| AgentError::Serialization(format!("bad salt: {e}")))?;
        let key = kdf::derive_unlock_key(pin.as_bytes(), &salt)?;

        if !verify_blob.is_empty() {
            let blob = BASE64
                .decode(&verify_blob)
                .map_err(|e| AgentError::Serialization(format!("bad secret blob: {e}")))?;
            aead::unwrap(&key, &blob, verify_aad.as_bytes())?;
        }

        *self.unlock_key.lock().unwrap_or_else(|p| p.into_inner()) = Some(key);
        info!("config unlocked");
        Ok(())
    }

    /// Drop the unlock key. Stored blobs stay encrypted on disk.
    pub fn lock(&self) {
        *self.unlock_key.lock().unwrap_or_else(|p| p.into_inner()) = None;
        info!("config locked");
    }

    fn get_secret(&self, blob_b64: &str, slot: &str) -> Result<Zeroizing<Vec<u8>>> {
        if blob_b64.is_empty() {
            return Err(AgentError::NotFound);
        }
        let key = self.unlock_key()?;
        let blob = BASE64
            .decode(blob_b64)
            .map_err(|e| AgentError::Serialization(format!("bad secret blob: {e}")))?;
        aead::unwrap(&key, &blob, slot.as_bytes())
    }

    fn put_secret(&self, plaintext: &[u8], slot: &str) -> Result<String> {
        let key = self.unlock_key()?;
        let blob = aead::wrap(&key, plaintext, slot.as_bytes())?;
        Ok(BASE64.encode(blob))
    }

    pub fn get_master_key(&self) -> Result<Zeroizing<Vec<u8>>> {
        let blob = self.read_file().encrypted_master_key.clone();
        self.get_secret(&blob, SLOT_MASTER_KEY)
    }

    pub fn set_master_key(&self, master_key: &[u8]) -> Result<()> {
        let blob = self.put_secret(master_key, SLOT_MASTER_KEY)?;
        self.write_file().encrypted_master_key = blob;
        self.save()
    }

    pub fn set_master_password_hash(&self, hash: &[u8]) -> Result<()> {
        let blob = self.put_secret(hash, SLOT_MASTER_PASSWORD_HASH)?;
        self.write_file().encrypted_master_password_hash = blob;
        self.save()
    }

    pub fn get_user_symmetric_key(&self) -> Result<Zeroizing<Vec<u8>>> {
        let blob = self.read_file().encrypted_user_symmetric_key.clone();
        self.get_secret(&blob, SLOT_USER_SYMMETRIC_KEY)
    }

    pub fn set_user_symmetric_key(&self, key: &[u8]) -> Result<()> {
        let blob = self.put_secret(key, SLOT_USER_SYMMETRIC_KEY)?;
        self.write_file().encrypted_user_symmetric_key = blob;
        self.save()
    }

    pub fn get_user_private_key(&self) -> Result<Option<Zeroizing<Vec<u8>>>> {
        let blob = self.read_file().encrypted_user_private_key.clone();
        if blob.is_empty() {
            return Ok(None);
        }
        self.get_secret(&blob, SLOT_USER_PRIVATE_KEY).map(Some)
    }

    pub fn set_user_private_key(&self, der: &[u8]) -> Result<()> {
        let blob = self.put_secret(der, SLOT_USER_PRIVATE_KEY)?;
        self.write_file().encrypted_user_private_key = blob;
        self.save()
    }

    pub fn get_token(&self) -> Result<Zeroizing<Vec<u8>>> {
        let blob = self.read_file().encrypted_refresh_token.clone();
        self.get_secret(&blob, SLOT_REFRESH_TOKEN)
    }

    pub fn set_token(&self, token: &[u8]) -> Result<()> {
        let blob = self.put_secret(token, SLOT_REFRESH_TOKEN)?;
        self.write_file().encrypted_refresh_token = blob;
        self.save()
    }

    /// Organization key tokens. These are wrapped to the user's RSA key,
    /// not the PIN key, so reading them does not need the unlock key.
    pub fn organization_keys(&self) -> Result<Vec<(Uuid, CipherString)>> {
        let file = self.read_file();
        let mut keys = Vec::with_capacity(file.organization_keys.len());
        for (org_id, token) in &file.organization_keys {
            keys.push((*org_id, token.parse()?));
        }
        Ok(keys)
    }

    pub fn add_organization_key(&self, org_id: Uuid, token: &CipherString) -> Result<()> {
        self.write_file()
            .organization_keys
            .insert(org_id, token.to_string());
        self.save()
    }
}

const SLOT_MASTER_KEY: &str = "masterKey";
const SLOT_MASTER_PASSWORD_HASH: &str = "masterPasswordHash";
const SLOT_USER_SYMMETRIC_KEY: &str = "userSymmetricKey";
const SLOT_USER_PRIVATE_KEY: &str = "userPrivateKey";
const SLOT_REFRESH_TOKEN: &str = "refreshToken";

#[cfg(test)]
mod tests {
    use super::*;

    fn unlocked_config() -> Config {
        let config = Config::new_in_memory();
        config.enroll_pin("123456").unwrap();
        config
    }

    #[test]
    fn test_fresh_config_is_locked_and_logged_out() {
        let config = Config::new_in_memory();
        assert!(config.is_locked());
        assert!(!config.is_logged_in());
        assert!(!config.has_pin());
    }

    #[test]
    fn test_secret_round_trip() {
        let config = unlocked_config();
        config.set_master_key(b"master key material").unwrap();
        assert_eq!(
            config.get_master_key().unwrap().as_slice(),
            b"master key material"
        );
    }

    #[test]
    fn test_lock_blocks_secret_access() {
        let config = unlocked_config();
        config.set_master_key(b"master key material").unwrap();
        config.lock();
        assert!(config.is_locked());
        assert!(config.get_master_key().is_err());
    }

    #[test]
    fn test_unlock_with_wrong_pin_fails() {
        let config = unlocked_config();
        config.set_master_password_hash(b"hash bytes").unwrap();
        config.lock();
        assert!(matches!(
            config.try_unlock("654321").unwrap_err(),
            AgentError::InvalidPin
        ));
        assert!(config.is_locked());
    }

    #[test]
    fn test_unlock_with_correct_pin() {
        let config = unlocked_config();
        config.set_master_password_hash(b"hash bytes").unwrap();
        config.set_master_key(b"master key material").unwrap();
        config.lock();
        config.try_unlock("123456").unwrap();
        assert!(!config.is_locked());
        assert_eq!(
            config.get_master_key().unwrap().as_slice(),
            b"master key material"
        );
    }

    #[test]
    fn test_unlock_without_pin_material_fails() {
        let config = Config::new_in_memory();
        assert!(matches!(
            config.try_unlock("123456").unwrap_err(),
            AgentError::LockedAndUnlockFailed(_)
        ));
    }

    #[test]
    fn test_logged_in_tracks_master_password_hash() {
        let config = unlocked_config();
        assert!(!config.is_logged_in());
        config.set_master_password_hash(b"hash").unwrap();
        assert!(config.is_logged_in());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let path = std::env::temp_dir().join(format!("credguard-test-{}.json", Uuid::new_v4()));
        {
            let config = Config::load(&path).unwrap();
            config.enroll_pin("123456").unwrap();
            config.set_master_key(b"persisted key").unwrap();
            config.set_master_password_hash(b"persisted hash").unwrap();
        }
        let reloaded = Config::load(&path).unwrap();
        assert!(reloaded.is_logged_in());
        assert!(reloaded.is_locked());
        reloaded.try_unlock("123456").unwrap();
        assert_eq!(
            reloaded.get_master_key().unwrap().as_slice(),
            b"persisted key"
        );
        std::fs::remove_file(&path).ok();
    }
}
