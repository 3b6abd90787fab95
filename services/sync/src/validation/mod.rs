//! # Game Data Validation
//!
//! ## Purpose
//!
//! Scores every normalized record before it is allowed into the batch queue.
//! Checks run in a fixed order:
//!
//! 1. Basic structure (player and game identity)
//! 2. Required field presence, configurable per entity
//! 3. Freshness of `lastUpdated`
//! 4. Per-asset checks (duplicates, required fields, contract allowlist)
//! 5. Per-achievement checks (duplicates, required fields, earned in the past)
//! 6. Statistics sanity
//! 7. Cross references between the record and its children
//! 8. Optional ownership confirmation through an [`OwnershipSource`]
//!
//! ## Scoring
//!
//! The score starts at 100 and loses 25/15/10/5 points per
//! CRITICAL/HIGH/MEDIUM/LOW error and 2 per warning, floored at 0. A record is
//! valid when it has no CRITICAL error and reaches `min_valid_score`.
//!
//! Validation never fails. A panic inside a check produces a CRITICAL
//! `VALIDATION_EXCEPTION` result with score 0.

mod ownership;
mod validator;

pub use ownership::OwnershipSource;
pub use validator::GameDataValidator;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error weight classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn penalty(&self) -> u32 {
        match self {
            Severity::Critical => 25,
            Severity::High => 15,
            Severity::Medium => 10,
            Severity::Low => 5,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Critical => "CRITICAL",
            Severity::High => "HIGH",
            Severity::Medium => "MEDIUM",
            Severity::Low => "LOW",
        };
        f.write_str(name)
    }
}

/// Points lost per warning
pub const WARNING_PENALTY: u32 = 2;

/// Error codes produced by the validator
pub mod codes {
    pub const MISSING_PLAYER_ID: &str = "MISSING_PLAYER_ID";
    pub const MISSING_GAME_ID: &str = "MISSING_GAME_ID";
    pub const MISSING_REQUIRED_FIELD: &str = "MISSING_REQUIRED_FIELD";
    pub const INVALID_TIMESTAMP: &str = "INVALID_TIMESTAMP";
    pub const STALE_DATA: &str = "STALE_DATA";
    pub const DUPLICATE_ASSET_ID: &str = "DUPLICATE_ASSET_ID";
    pub const MISSING_ASSET_FIELD: &str = "MISSING_ASSET_FIELD";
    pub const INVALID_CONTRACT_ADDRESS: &str = "INVALID_CONTRACT_ADDRESS";
    pub const UNKNOWN_CONTRACT_ADDRESS: &str = "UNKNOWN_CONTRACT_ADDRESS";
    pub const DUPLICATE_ACHIEVEMENT_ID: &str = "DUPLICATE_ACHIEVEMENT_ID";
    pub const MISSING_ACHIEVEMENT_FIELD: &str = "MISSING_ACHIEVEMENT_FIELD";
    pub const FUTURE_ACHIEVEMENT: &str = "FUTURE_ACHIEVEMENT";
    pub const INVALID_PLAYTIME: &str = "INVALID_PLAYTIME";
    pub const INVALID_LEVEL: &str = "INVALID_LEVEL";
    pub const INVALID_WIN_COUNT: &str = "INVALID_WIN_COUNT";
    pub const ACHIEVEMENT_GAME_MISMATCH: &str = "ACHIEVEMENT_GAME_MISMATCH";
    pub const ACHIEVEMENT_PLAYER_MISMATCH: &str = "ACHIEVEMENT_PLAYER_MISMATCH";
    pub const ASSET_GAME_MISMATCH: &str = "ASSET_GAME_MISMATCH";
    pub const OWNERSHIP_MISMATCH: &str = "OWNERSHIP_MISMATCH";
    pub const OWNERSHIP_CHECK_FAILED: &str = "OWNERSHIP_CHECK_FAILED";
    pub const VALIDATION_EXCEPTION: &str = "VALIDATION_EXCEPTION";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    pub code: String,
    pub message: String,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationWarning {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationMetadata {
    pub player_id: String,
    pub game_id: String,
    pub validated_at: DateTime<Utc>,
    pub asset_count: usize,
    pub achievement_count: usize,
    pub duration_us: u64,
}

/// Outcome of validating one record, computed fresh per call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,
    pub score: u32,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationWarning>,
    pub metadata: ValidationMetadata,
}

impl ValidationResult {
    pub fn has_error(&self, code: &str) -> bool {
        self.errors.iter().any(|e| e.code == code)
    }

    pub fn has_warning(&self, code: &str) -> bool {
        self.warnings.iter().any(|w| w.code == code)
    }

    pub fn critical_count(&self) -> usize {
        self.errors
            .iter()
            .filter(|e| e.severity == Severity::Critical)
            .count()
    }

    pub fn error_codes(&self) -> Vec<String> {
        self.errors.iter().map(|e| e.code.clone()).collect()
    }
}

/// Collects issues while the checks run
#[derive(Debug, Default)]
pub(crate) struct Findings {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationWarning>,
}

impl Findings {
    pub fn error(&mut self, severity: Severity, code: &str, field: Option<&str>, message: String) {
        self.errors.push(ValidationIssue {
            code: code.to_string(),
            message,
            severity,
            field: field.map(str::to_string),
        });
    }

    pub fn warning(&mut self, code: &str, field: Option<&str>, message: String) {
        self.warnings.push(ValidationWarning {
            code: code.to_string(),
            message,
            field: field.map(str::to_string),
        });
    }

    pub fn has_critical(&self) -> bool {
        self.errors.iter().any(|e| e.severity == Severity::Critical)
    }

    pub fn score(&self) -> u32 {
        let penalty: u32 = self.errors.iter().map(|e| e.severity.penalty()).sum::<u32>()
            + WARNING_PENALTY * self.warnings.len() as u32;
        100u32.saturating_sub(penalty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_is_floored_at_zero() {
        let mut findings = Findings::default();
        for _ in 0..5 {
            findings.error(Severity::Critical, codes::FUTURE_ACHIEVEMENT, None, String::new());
        }
        assert_eq!(findings.score(), 0);
    }

    #[test]
    fn test_penalties() {
        let mut findings = Findings::default();
        findings.error(Severity::High, codes::DUPLICATE_ASSET_ID, None, String::new());
        findings.error(Severity::Low, codes::INVALID_WIN_COUNT, None, String::new());
        findings.warning(codes::STALE_DATA, None, String::new());
        assert_eq!(findings.score(), 100 - 15 - 5 - 2);
        assert!(!findings.has_critical());
    }
}
