/// Vault item documents as they arrive from upstream sync.
///
/// Every secret-bearing field is a cipher string; the catalog never holds
/// plaintext. A null cipher string means the field is unset.
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::encstring::CipherString;

/// The login-specific fields of a vault item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginFields {
    #[serde(default)]
    pub username: CipherString,
    #[serde(default)]
    pub password: CipherString,
    #[serde(default)]
    pub totp: CipherString,
}

/// A single login entry in the vault catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultItem {
    pub id: Uuid,
    #[serde(default)]
    pub organization_id: Option<Uuid>,
    #[serde(default)]
    pub name: CipherString,
    #[serde(default)]
    pub login: LoginFields,
    #[serde(default)]
    pub notes: CipherString,
    /// Item-specific key, wrapped under the user or organization key.
    #[serde(default)]
    pub key: Option<CipherString>,
}

impl VaultItem {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            organization_id: None,
            name: CipherString::null(),
            login: LoginFields::default(),
            notes: CipherString::null(),
            key: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_sparse_document() {
        let json = r#"{"id":"11111111-1111-1111-1111-111111111111"}"#;
        let item: VaultItem = serde_json::from_str(json).unwrap();
        assert!(item.name.is_null());
        assert!(item.login.username.is_null());
        assert!(item.organization_id.is_none());
        assert!(item.key.is_none());
    }

    #[test]
    fn test_round_trip() {
        let mut item = VaultItem::new(Uuid::new_v4());
        item.organization_id = Some(Uuid::new_v4());
        let json = serde_json::to_string(&item).unwrap();
        let back: VaultItem = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, item.id);
        assert_eq!(back.organization_id, item.organization_id);
    }
}
