//! Concrete source adapters

pub mod rest;

pub use rest::{RawAchievement, RawItem, RawPlayer, RestGameAdapter};

use crate::source::SourceAdapter;
use crate::{AdapterError, Result};
use std::sync::Arc;
use sync_config::AdapterConfig;

/// Construct the adapter named by `config.kind`
pub fn build_adapter(config: &AdapterConfig) -> Result<Arc<dyn SourceAdapter>> {
    match config.kind.as_str() {
        "rest" => Ok(Arc::new(RestGameAdapter::new(config)?)),
        other => Err(AdapterError::BusinessLogic(format!(
            "Unknown adapter kind '{}' for {}",
            other, config.game_id
        ))),
    }
}
