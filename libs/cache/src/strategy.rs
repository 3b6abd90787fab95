//! Trigger-based invalidation strategies

use crate::keys::escape_segment;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::{HashMap, HashSet};
use sync_config::InvalidationStrategyConfig;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z0-9_]+)\}").expect("placeholder regex is valid"));

// Glob rejects `**` unless it is a whole path component
static WILDCARD_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\*{2,}").expect("wildcard regex is valid"));

/// A named rule mapping trigger events to a key pattern
#[derive(Debug, Clone)]
pub struct InvalidationStrategy {
    pub name: String,
    triggers: HashSet<String>,
    pattern: String,
}

impl InvalidationStrategy {
    pub fn new(name: impl Into<String>, triggers: &[&str], pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            triggers: triggers.iter().map(|t| t.to_string()).collect(),
            pattern: pattern.into(),
        }
    }

    pub fn matches(&self, trigger: &str) -> bool {
        self.triggers.contains(trigger)
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Substitute `{field}` placeholders from `context`
    ///
    /// `{prefix}` resolves to the cache prefix unless the context overrides it.
    /// Context values are escaped the way key segments are, then glob-escaped;
    /// placeholders with no value become `*`.
    pub fn resolve(&self, prefix: &str, context: &HashMap<String, String>) -> String {
        let substituted = PLACEHOLDER.replace_all(&self.pattern, |caps: &Captures<'_>| {
            let field = &caps[1];
            match context.get(field) {
                Some(value) if field == "prefix" => glob::Pattern::escape(value),
                Some(value) => glob::Pattern::escape(&escape_segment(value)),
                None if field == "prefix" => prefix.to_string(),
                None => "*".to_string(),
            }
        });
        WILDCARD_RUN.replace_all(&substituted, "*").into_owned()
    }
}

impl From<&InvalidationStrategyConfig> for InvalidationStrategy {
    fn from(config: &InvalidationStrategyConfig) -> Self {
        Self {
            name: config.name.clone(),
            triggers: config.triggers.iter().cloned().collect(),
            pattern: config.pattern.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_resolves_known_placeholders() {
        let strategy = InvalidationStrategy::new(
            "assets",
            &["ASSET_CHANGE"],
            "{prefix}:player_assets:{gameId}:{playerId}*",
        );

        let pattern = strategy.resolve("gs", &context(&[("gameId", "g1"), ("playerId", "p1")]));
        assert_eq!(pattern, "gs:player_assets:g1:p1*");
    }

    #[test]
    fn test_missing_placeholders_become_wildcards() {
        let strategy = InvalidationStrategy::new(
            "assets",
            &["ASSET_CHANGE"],
            "{prefix}:player_assets:{gameId}:{playerId}*",
        );

        let pattern = strategy.resolve("gs", &context(&[("gameId", "g1")]));
        assert_eq!(pattern, "gs:player_assets:g1:*");
        assert!(glob::Pattern::new(&pattern).unwrap().matches("gs:player_assets:g1:p9"));
    }

    #[test]
    fn test_context_values_are_escaped() {
        let strategy = InvalidationStrategy::new("s", &["T"], "{prefix}:x:{gameId}");
        let pattern = strategy.resolve("gs", &context(&[("gameId", "g[1]")]));
        assert!(glob::Pattern::new(&pattern).unwrap().matches("gs:x:g[1]"));
    }

    #[test]
    fn test_context_ids_match_rendered_keys() {
        let strategy = InvalidationStrategy::new(
            "assets",
            &["ASSET_CHANGE"],
            "{prefix}:player_assets:{gameId}:{playerId}*",
        );
        let keys = crate::keys::CacheKeyBuilder::new("gs");
        let pattern = strategy.resolve("gs", &context(&[("gameId", "a:b"), ("playerId", "c")]));
        let pattern = glob::Pattern::new(&pattern).unwrap();

        assert!(pattern.matches(&keys.player_assets("a:b", "c")));
        assert!(!pattern.matches(&keys.player_assets("a", "b:c")));
    }

    #[test]
    fn test_trigger_matching() {
        let strategy = InvalidationStrategy::new("s", &["A", "B"], "p");
        assert!(strategy.matches("A"));
        assert!(!strategy.matches("C"));
    }
}
