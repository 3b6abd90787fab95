use adapter_service::AdapterRegistry;
use async_trait::async_trait;
use sync_types::GameAsset;

/// Source of truth for asset ownership
#[async_trait]
pub trait OwnershipSource: Send + Sync {
    /// `Ok(false)` means the source disagrees with the record, `Err` that it
    /// could not answer.
    async fn confirm_ownership(&self, asset: &GameAsset) -> Result<bool, String>;
}

/// Ownership is confirmed by the active adapter for the asset's game
#[async_trait]
impl OwnershipSource for AdapterRegistry {
    async fn confirm_ownership(&self, asset: &GameAsset) -> Result<bool, String> {
        let adapter = self
            .get_adapter(&asset.game_id)
            .await
            .ok_or_else(|| format!("no active adapter for {}", asset.game_id))?;

        adapter
            .validate_asset(asset)
            .await
            .map_err(|e| e.to_string())
    }
}
