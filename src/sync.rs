/// Seam to the upstream vault backend.
///
/// The real client lives outside this crate; the agent only ever calls
/// `full_sync` best-effort from the unlock path, and a failure there never
/// re-locks the vault.
use async_trait::async_trait;

use crate::config::Config;
use crate::error::Result;
use crate::vault::Vault;

#[async_trait]
pub trait SyncClient: Send + Sync {
    /// Refresh the token and replace the vault catalog from upstream.
    async fn full_sync(&self, config: &Config, vault: &Vault) -> Result<()>;
}

/// Used when no upstream is configured; the agent serves its cached catalog.
pub struct NoopSync;

#[async_trait]
impl SyncClient for NoopSync {
    async fn full_sync(&self, _config: &Config, _vault: &Vault) -> Result<()> {
        Ok(())
    }
}
