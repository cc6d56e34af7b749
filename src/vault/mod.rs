/// In-memory vault state: the encrypted item catalog and the keyring.
///
/// The catalog is mostly read; writes happen on sync and swap the whole
/// collection under an exclusive guard. Readers clone value-like items out
/// of the read guard, so no guard is ever held across crypto or prompts.
pub mod items;
pub mod keyring;

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::crypto::keys::{AsymmetricEncryptionKey, SymmetricEncryptionKey};
use crate::crypto::symmetric;
use crate::error::{AgentError, Result};
use crate::vault::items::VaultItem;
use crate::vault::keyring::Keyring;

#[derive(Default)]
pub struct Vault {
    catalog: RwLock<Vec<VaultItem>>,
    keyring: RwLock<Keyring>,
}

fn read_guard<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_guard<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Vault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap the whole catalog, as sync does.
    pub fn replace_items(&self, items: Vec<VaultItem>) {
        let mut catalog = write_guard(&self.catalog);
        *catalog = items;
    }

    pub fn get_logins(&self) -> Vec<VaultItem> {
        read_guard(&self.catalog).clone()
    }

    pub fn item_count(&self) -> usize {
        read_guard(&self.catalog).len()
    }

    /// Resolve the effective decryption key for an item.
    pub fn key_for_item(&self, item: &VaultItem) -> Result<SymmetricEncryptionKey> {
        read_guard(&self.keyring).key_for_item(item)
    }

    pub fn with_keyring_mut<R>(&self, f: impl FnOnce(&mut Keyring) -> R) -> R {
        f(&mut write_guard(&self.keyring))
    }

    /// Populate the keyring from the unlocked config: the user symmetric
    /// key, the user private key, and every organization key it can unwrap.
    pub fn unlock(&self, config: &Config) -> Result<()> {
        let mut raw = config.get_user_symmetric_key()?;
        let user_key = SymmetricEncryptionKey::from_bytes(&mut raw)?;

        let mut ring = Keyring::new();
        ring.set_user_key(user_key);

        if let Some(mut der) = config.get_user_private_key()? {
            ring.set_user_private_key(AsymmetricEncryptionKey::from_der(&mut der));
            for (org_id, wrapped) in config.organization_keys()? {
                if let Err(e) = ring.add_organization_key(org_id, &wrapped) {
                    warn!(%org_id, error = %e, "Could not unwrap organization key");
                }
            }
        }

        *write_guard(&self.keyring) = ring;
        Ok(())
    }

    /// Wipe every derived key. The encrypted catalog stays.
    pub fn lock(&self) {
        write_guard(&self.keyring).clear();
        debug!("keyring wiped");
    }

    pub fn is_keyring_empty(&self) -> bool {
        read_guard(&self.keyring).is_empty()
    }

    /// Find at most one login. Precedence: exact UUID, then exact
    /// (organization, decrypted name), then decrypted name, then decrypted
    /// username. More than one surviving candidate is an error, never a
    /// silent first-match.
    pub fn get_login_by_filter(
        &self,
        uuid: Option<Uuid>,
        org_id: Option<Uuid>,
        name: Option<&str>,
        username: Option<&str>,
    ) -> Result<VaultItem> {
        let catalog = read_guard(&self.catalog);

        if let Some(uuid) = uuid {
            return catalog
                .iter()
                .find(|item| item.id == uuid)
                .cloned()
                .ok_or(AgentError::NotFound);
        }

        let keyring = read_guard(&self.keyring);

        let rules: [(&str, Box<dyn Fn(&VaultItem) -> bool + '_>); 3] = [
            (
                "organization and name",
                Box::new(|item: &VaultItem| {
                    org_id.is_some()
                        && name.is_some()
                        && item.organization_id == org_id
                        && field_matches(&keyring, item, &item.name, name)
                }),
            ),
            (
                "name",
                Box::new(|item: &VaultItem| {
                    name.is_some() && field_matches(&keyring, item, &item.name, name)
                }),
            ),
            (
                "username",
                Box::new(|item: &VaultItem| {
                    username.is_some()
                        && field_matches(&keyring, item, &item.login.username, username)
                }),
            ),
        ];

        for (label, rule) in &rules {
            let mut candidates = catalog.iter().filter(|item| rule(item));
            if let Some(first) = candidates.next() {
                if candidates.next().is_some() {
                    return Err(AgentError::AmbiguousLookup(format!(
                        "more than one login matches by {label}"
                    )));
                }
                return Ok(first.clone());
            }
        }

        Err(AgentError::NotFound)
    }
}

/// Compare a decrypted field against a wanted value. Items whose field
/// cannot be decrypted simply do not match.
fn field_matches(
    keyring: &Keyring,
    item: &VaultItem,
    field: &crate::crypto::encstring::CipherString,
    wanted: Option<&str>,
) -> bool {
    let Some(wanted) = wanted else { return false };
    if field.is_null() {
        return false;
    }
    let Ok(key) = keyring.key_for_item(item) else {
        return false;
    };
    match symmetric::decrypt_with(field, &key) {
        Ok(plaintext) => plaintext.as_slice() == wanted.as_bytes(),
        Err(_) => false,
    }
}
