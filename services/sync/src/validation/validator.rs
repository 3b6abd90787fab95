use super::{codes, Findings, OwnershipSource, Severity, ValidationMetadata, ValidationResult};
use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use futures::FutureExt;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use sync_config::ValidationConfig;
use sync_types::StandardizedGameData;
use tracing::{debug, error};

static CONTRACT_ADDRESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{40}$").expect("contract address regex"));

/// Stateless scorer for normalized records
pub struct GameDataValidator {
    config: ValidationConfig,
    ownership: Option<Arc<dyn OwnershipSource>>,
}

impl GameDataValidator {
    pub fn new(config: ValidationConfig) -> Self {
        Self {
            config,
            ownership: None,
        }
    }

    /// Consulted only when `enable_ownership_validation` is set
    pub fn with_ownership_source(mut self, source: Arc<dyn OwnershipSource>) -> Self {
        self.ownership = Some(source);
        self
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    pub async fn validate_game_data(&self, data: &StandardizedGameData) -> ValidationResult {
        let started = Instant::now();
        let now = Utc::now();

        let findings = match AssertUnwindSafe(self.run_checks(data, now))
            .catch_unwind()
            .await
        {
            Ok(findings) => findings,
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(
                    "Validation of {}/{} panicked: {}",
                    data.game_id, data.player_id, reason
                );
                let mut findings = Findings::default();
                findings.error(
                    Severity::Critical,
                    codes::VALIDATION_EXCEPTION,
                    None,
                    format!("validation aborted: {}", reason),
                );
                return self.finish(data, findings, now, started, true);
            }
        };

        let short_circuit = findings.has_critical() && is_structural(&findings);
        self.finish(data, findings, now, started, short_circuit)
    }

    fn finish(
        &self,
        data: &StandardizedGameData,
        findings: Findings,
        now: DateTime<Utc>,
        started: Instant,
        zero_score: bool,
    ) -> ValidationResult {
        let score = if zero_score { 0 } else { findings.score() };
        let is_valid = !findings.has_critical() && score >= self.config.min_valid_score;

        let result = ValidationResult {
            is_valid,
            score,
            metadata: ValidationMetadata {
                player_id: data.player_id.clone(),
                game_id: data.game_id.clone(),
                validated_at: now,
                asset_count: data.assets.len(),
                achievement_count: data.achievements.len(),
                duration_us: started.elapsed().as_micros() as u64,
            },
            errors: findings.errors,
            warnings: findings.warnings,
        };

        debug!(
            "Validated {}/{}: valid={} score={} errors={} warnings={}",
            data.game_id,
            data.player_id,
            result.is_valid,
            result.score,
            result.errors.len(),
            result.warnings.len()
        );
        result
    }

    async fn run_checks(&self, data: &StandardizedGameData, now: DateTime<Utc>) -> Findings {
        let mut findings = Findings::default();

        self.check_structure(data, &mut findings);
        if findings.has_critical() {
            return findings;
        }

        match serde_json::to_value(data) {
            Ok(document) => self.check_required_fields(&document, &mut findings),
            Err(e) => {
                findings.error(
                    Severity::Critical,
                    codes::VALIDATION_EXCEPTION,
                    None,
                    format!("record could not be inspected: {}", e),
                );
                return findings;
            }
        }

        self.check_freshness(data, now, &mut findings);
        self.check_assets(data, &mut findings);
        self.check_achievements(data, now, &mut findings);
        self.check_statistics(data, &mut findings);
        self.check_cross_references(data, &mut findings);

        if self.config.enable_ownership_validation {
            self.check_ownership(data, &mut findings).await;
        }

        findings
    }

    fn check_structure(&self, data: &StandardizedGameData, findings: &mut Findings) {
        if data.player_id.trim().is_empty() {
            findings.error(
                Severity::Critical,
                codes::MISSING_PLAYER_ID,
                Some("playerId"),
                "record has no player id".to_string(),
            );
        }
        if data.game_id.trim().is_empty() {
            findings.error(
                Severity::Critical,
                codes::MISSING_GAME_ID,
                Some("gameId"),
                "record has no game id".to_string(),
            );
        }
    }

    fn check_required_fields(&self, document: &Value, findings: &mut Findings) {
        let required = &self.config.required_fields;

        for field in missing_fields(document, &required.game_data) {
            findings.error(
                Severity::Medium,
                codes::MISSING_REQUIRED_FIELD,
                Some(&field),
                format!("record is missing {}", field),
            );
        }

        let children = [
            ("assets", &required.asset, codes::MISSING_ASSET_FIELD),
            (
                "achievements",
                &required.achievement,
                codes::MISSING_ACHIEVEMENT_FIELD,
            ),
        ];
        for (collection, fields, code) in children {
            let Some(items) = document.get(collection).and_then(Value::as_array) else {
                continue;
            };
            for (index, item) in items.iter().enumerate() {
                for field in missing_fields(item, fields) {
                    let path = format!("{}[{}].{}", collection, index, field);
                    findings.error(
                        Severity::Medium,
                        code,
                        Some(&path),
                        format!("{} is missing", path),
                    );
                }
            }
        }
    }

    fn check_freshness(&self, data: &StandardizedGameData, now: DateTime<Utc>, findings: &mut Findings) {
        let skew = seconds(self.config.future_skew_secs);
        let max_age = seconds(self.config.max_data_age_secs);

        if data.last_updated > now + skew {
            findings.error(
                Severity::High,
                codes::INVALID_TIMESTAMP,
                Some("lastUpdated"),
                format!("lastUpdated {} is in the future", data.last_updated),
            );
        } else if now - data.last_updated > max_age {
            findings.warning(
                codes::STALE_DATA,
                Some("lastUpdated"),
                format!("record is older than {}s", self.config.max_data_age_secs),
            );
        }
    }

    fn check_assets(&self, data: &StandardizedGameData, findings: &mut Findings) {
        let mut seen = HashSet::new();
        let known = self.config.known_contracts.get(&data.game_id);

        for asset in &data.assets {
            if !seen.insert(asset.id.as_str()) {
                findings.error(
                    Severity::High,
                    codes::DUPLICATE_ASSET_ID,
                    Some("assets"),
                    format!("asset {} appears more than once", asset.id),
                );
            }

            if !self.config.enable_contract_validation {
                continue;
            }

            if !CONTRACT_ADDRESS.is_match(&asset.contract_address) {
                findings.error(
                    Severity::Medium,
                    codes::INVALID_CONTRACT_ADDRESS,
                    Some("contractAddress"),
                    format!(
                        "asset {} has malformed contract {}",
                        asset.id, asset.contract_address
                    ),
                );
            } else if let Some(known) = known {
                let address = asset.contract_address.to_ascii_lowercase();
                if !known.iter().any(|k| k.eq_ignore_ascii_case(&address)) {
                    findings.warning(
                        codes::UNKNOWN_CONTRACT_ADDRESS,
                        Some("contractAddress"),
                        format!("asset {} uses unlisted contract {}", asset.id, address),
                    );
                }
            }
        }
    }

    fn check_achievements(
        &self,
        data: &StandardizedGameData,
        now: DateTime<Utc>,
        findings: &mut Findings,
    ) {
        let mut seen = HashSet::new();

        for achievement in &data.achievements {
            if !seen.insert(achievement.id.as_str()) {
                findings.error(
                    Severity::High,
                    codes::DUPLICATE_ACHIEVEMENT_ID,
                    Some("achievements"),
                    format!("achievement {} appears more than once", achievement.id),
                );
            }

            if achievement.earned_at > now {
                findings.error(
                    Severity::Critical,
                    codes::FUTURE_ACHIEVEMENT,
                    Some("earnedAt"),
                    format!(
                        "achievement {} earned at {} is in the future",
                        achievement.id, achievement.earned_at
                    ),
                );
            }
        }
    }

    fn check_statistics(&self, data: &StandardizedGameData, findings: &mut Findings) {
        let stats = &data.statistics;

        if stats.total_playtime_secs < 0 {
            findings.error(
                Severity::Medium,
                codes::INVALID_PLAYTIME,
                Some("statistics.totalPlaytimeSecs"),
                format!("negative playtime {}", stats.total_playtime_secs),
            );
        }
        if stats.level < 1 {
            findings.error(
                Severity::Medium,
                codes::INVALID_LEVEL,
                Some("statistics.level"),
                format!("level {} is below 1", stats.level),
            );
        }
        if stats.wins > stats.games_played {
            findings.error(
                Severity::Low,
                codes::INVALID_WIN_COUNT,
                Some("statistics.wins"),
                format!("{} wins in {} games", stats.wins, stats.games_played),
            );
        }
    }

    fn check_cross_references(&self, data: &StandardizedGameData, findings: &mut Findings) {
        for achievement in &data.achievements {
            if achievement.game_id != data.game_id {
                findings.error(
                    Severity::High,
                    codes::ACHIEVEMENT_GAME_MISMATCH,
                    Some("achievements.gameId"),
                    format!(
                        "achievement {} belongs to {}, record is {}",
                        achievement.id, achievement.game_id, data.game_id
                    ),
                );
            }
            if achievement.player_id != data.player_id {
                findings.error(
                    Severity::High,
                    codes::ACHIEVEMENT_PLAYER_MISMATCH,
                    Some("achievements.playerId"),
                    format!(
                        "achievement {} belongs to {}, record is {}",
                        achievement.id, achievement.player_id, data.player_id
                    ),
                );
            }
        }

        for asset in &data.assets {
            if asset.game_id != data.game_id {
                findings.warning(
                    codes::ASSET_GAME_MISMATCH,
                    Some("assets.gameId"),
                    format!(
                        "asset {} belongs to {}, record is {}",
                        asset.id, asset.game_id, data.game_id
                    ),
                );
            }
        }
    }

    async fn check_ownership(&self, data: &StandardizedGameData, findings: &mut Findings) {
        let Some(source) = &self.ownership else {
            return;
        };

        let checks = data.assets.iter().map(|asset| async move {
            (asset, source.confirm_ownership(asset).await)
        });

        for (asset, outcome) in join_all(checks).await {
            match outcome {
                Ok(true) => {}
                Ok(false) => findings.error(
                    Severity::High,
                    codes::OWNERSHIP_MISMATCH,
                    Some("owner"),
                    format!("{} does not own asset {} upstream", asset.owner, asset.id),
                ),
                Err(reason) => findings.warning(
                    codes::OWNERSHIP_CHECK_FAILED,
                    Some("owner"),
                    format!("ownership of asset {} unconfirmed: {}", asset.id, reason),
                ),
            }
        }
    }
}

fn is_structural(findings: &Findings) -> bool {
    findings.errors.iter().any(|e| {
        e.code == codes::MISSING_PLAYER_ID
            || e.code == codes::MISSING_GAME_ID
            || e.code == codes::VALIDATION_EXCEPTION
    })
}

fn seconds(secs: u64) -> Duration {
    Duration::seconds(secs.min(i32::MAX as u64) as i64)
}

/// Names from `fields` that are absent, null or blank in `document`
fn missing_fields(document: &Value, fields: &[String]) -> Vec<String> {
    fields
        .iter()
        .filter(|field| match document.get(field.as_str()) {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.trim().is_empty(),
            Some(_) => false,
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_fields_treats_blank_as_missing() {
        let doc = json!({ "id": "a", "owner": " ", "tokenId": null });
        let fields = vec!["id".to_string(), "owner".to_string(), "tokenId".to_string(), "gameId".to_string()];
        assert_eq!(missing_fields(&doc, &fields), vec!["owner", "tokenId", "gameId"]);
    }

    #[test]
    fn test_contract_address_shape() {
        assert!(CONTRACT_ADDRESS.is_match("0x00000000000000000000000000000000000000aB"));
        assert!(!CONTRACT_ADDRESS.is_match("0xabc"));
        assert!(!CONTRACT_ADDRESS.is_match("00000000000000000000000000000000000000000a"));
    }
}
