/// The collection of symmetric keys available to the unlocked vault.
///
/// Keys are indexed by scope: the distinguished user key plus one key per
/// organization. Per-item wrapped keys are unwrapped on demand through
/// [`Keyring::key_for_item`]. A key that cannot be resolved is reported,
/// never silently substituted.
use std::collections::HashMap;

use uuid::Uuid;

use crate::crypto::encstring::CipherString;
use crate::crypto::keys::{AsymmetricEncryptionKey, SymmetricEncryptionKey};
use crate::crypto::{asymmetric, symmetric};
use crate::error::{AgentError, Result};
use crate::vault::items::VaultItem;

#[derive(Default)]
pub struct Keyring {
    user_key: Option<SymmetricEncryptionKey>,
    user_private_key: Option<AsymmetricEncryptionKey>,
    org_keys: HashMap<Uuid, SymmetricEncryptionKey>,
}

impl Keyring {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_user_key(&mut self, key: SymmetricEncryptionKey) {
        self.user_key = Some(key);
    }

    pub fn set_user_private_key(&mut self, key: AsymmetricEncryptionKey) {
        self.user_private_key = Some(key);
    }

    pub fn user_key(&self) -> Result<&SymmetricEncryptionKey> {
        self.user_key
            .as_ref()
            .ok_or_else(|| AgentError::KeyDerivation("no user key in keyring".into()))
    }

    pub fn set_organization_key(&mut self, org_id: Uuid, key: SymmetricEncryptionKey) {
        self.org_keys.insert(org_id, key);
    }

    /// Unwrap an organization key token (RSA-wrapped to the user's private
    /// key) and add it to the ring.
    pub fn add_organization_key(&mut self, org_id: Uuid, wrapped: &CipherString) -> Result<()> {
        let private = self.user_private_key.as_ref().ok_or_else(|| {
            AgentError::KeyDerivation("no private key to unwrap organization keys".into())
        })?;
        let mut raw = asymmetric::decrypt_with(wrapped, private)?;
        let key = SymmetricEncryptionKey::from_bytes(&mut raw)?;
        self.org_keys.insert(org_id, key);
        Ok(())
    }

    /// Resolve the effective decryption key for an item, unwrapping any
    /// item-specific key.
    pub fn key_for_item(&self, item: &VaultItem) -> Result<SymmetricEncryptionKey> {
        let scope_key = match item.organization_id {
            Some(org_id) => self.org_keys.get(&org_id).ok_or_else(|| {
                AgentError::KeyDerivation(format!("no key for organization {org_id}"))
            })?,
            None => self.user_key()?,
        };

        match &item.key {
            Some(wrapped) if !wrapped.is_null() => {
                let mut raw = symmetric::decrypt_with(wrapped, scope_key)?;
                SymmetricEncryptionKey::from_bytes(&mut raw)
            }
            _ => Ok(scope_key.clone()),
        }
    }

    /// Drop every key. Buffers scrub themselves on drop.
    pub fn clear(&mut self) {
        self.user_key = None;
        self.user_private_key = None;
        self.org_keys.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.user_key.is_none() && self.org_keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::encstring::EncStringType;

    fn user_key() -> SymmetricEncryptionKey {
        let mut material = [0x0Fu8; 64];
        SymmetricEncryptionKey::from_bytes(&mut material).unwrap()
    }

    #[test]
    fn test_user_scope_without_item_key() {
        let mut ring = Keyring::new();
        ring.set_user_key(user_key());
        let item = VaultItem::new(Uuid::new_v4());
        let key = ring.key_for_item(&item).unwrap();
        let cs = symmetric::encrypt_with(b"x", EncStringType::AesCbc256HmacSha256B64, &key).unwrap();
        assert_eq!(
            symmetric::decrypt_with(&cs, &user_key()).unwrap().as_slice(),
            b"x"
        );
    }

    #[test]
    fn test_item_key_unwrap() {
        let mut ring = Keyring::new();
        ring.set_user_key(user_key());

        let item_key = SymmetricEncryptionKey::generate().unwrap();
        let mut raw = Vec::new();
        raw.extend_from_slice(item_key.enc_key().open().unwrap().as_bytes());
        raw.extend_from_slice(item_key.mac_key().open().unwrap().as_bytes());
        let wrapped =
            symmetric::encrypt_with(&raw, EncStringType::AesCbc256HmacSha256B64, &user_key())
                .unwrap();

        let mut item = VaultItem::new(Uuid::new_v4());
        item.key = Some(wrapped);

        let resolved = ring.key_for_item(&item).unwrap();
        let cs =
            symmetric::encrypt_with(b"item data", EncStringType::AesCbc256HmacSha256B64, &item_key)
                .unwrap();
        assert_eq!(
            symmetric::decrypt_with(&cs, &resolved).unwrap().as_slice(),
            b"item data"
        );
    }

    #[test]
    fn test_missing_org_key_is_reported() {
        let mut ring = Keyring::new();
        ring.set_user_key(user_key());
        let mut item = VaultItem::new(Uuid::new_v4());
        item.organization_id = Some(Uuid::new_v4());
        assert!(matches!(
            ring.key_for_item(&item).unwrap_err(),
            AgentError::KeyDerivation(_)
        ));
    }

    #[test]
    fn test_organization_key_unwrap() {
        let mut ring = Keyring::new();
        ring.set_user_key(user_key());
        let private = asymmetric::generate().unwrap();
        ring.set_user_private_key(private.clone());

        let org_key = SymmetricEncryptionKey::generate().unwrap();
        let mut raw = Vec::new();
        raw.extend_from_slice(org_key.enc_key().open().unwrap().as_bytes());
        raw.extend_from_slice(org_key.mac_key().open().unwrap().as_bytes());
        let wrapped = asymmetric::encrypt_with(&raw, &private).unwrap();

        let org_id = Uuid::new_v4();
        ring.add_organization_key(org_id, &wrapped).unwrap();

        let mut item = VaultItem::new(Uuid::new_v4());
        item.organization_id = Some(org_id);
        let resolved = ring.key_for_item(&item).unwrap();
        let cs =
            symmetric::encrypt_with(b"org data", EncStringType::AesCbc256HmacSha256B64, &org_key)
                .unwrap();
        assert_eq!(
            symmetric::decrypt_with(&cs, &resolved).unwrap().as_slice(),
            b"org data"
        );
    }

    #[test]
    fn test_clear_empties_ring() {
        let mut ring = Keyring::new();
        ring.set_user_key(user_key());
        assert!(!ring.is_empty());
        ring.clear();
        assert!(ring.is_empty());
        assert!(ring.user_key().is_err());
    }
}
