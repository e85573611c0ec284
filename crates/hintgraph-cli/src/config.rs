//! Optional JSON configuration file (`--config`). Command-line flags are
//! applied on top of it.
//!
//! `path_finder` drives `hint` and, unless the file also has a
//! `harness.path_finder` section, `evaluate`. When both are set and differ,
//! `evaluate` uses `harness.path_finder` and logs a warning.

use anyhow::{Context, Result};
use hintgraph_space::{AggregatorConfig, HarnessConfig, PathFinderConfig};
use hintgraph_syntax::CanonBudget;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub canon: CanonBudget,
    pub aggregator: AggregatorConfig,
    pub path_finder: PathFinderConfig,
    pub harness: HarnessConfig,
}

impl CliConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Harness settings for `evaluate`. A `harness.path_finder` section wins
    /// when present; otherwise the top-level `path_finder` applies.
    pub fn harness_config(&self) -> HarnessConfig {
        let unset = PathFinderConfig::default();
        let mut harness = self.harness.clone();
        if harness.path_finder == unset {
            harness.path_finder = self.path_finder;
        } else if self.path_finder != unset && self.path_finder != harness.path_finder {
            tracing::warn!(
                "config sets both `path_finder` and `harness.path_finder`; evaluation uses `harness.path_finder`"
            );
        }
        harness
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_files_fill_defaults() {
        let config: CliConfig = serde_json::from_str(
            r#"{ "aggregator": { "remove_loops": true },
                 "path_finder": { "search": { "max_exact_distances": 8 } } }"#,
        )
        .unwrap();
        assert!(config.aggregator.remove_loops);
        assert!(!config.aggregator.prepend_empty_state);
        assert_eq!(config.path_finder.search.max_exact_distances, 8);
        assert_eq!(config.path_finder.search.batch_size, 32);
        assert_eq!(config.canon, CanonBudget::default());
        assert_eq!(config.harness.age_band_width, 5);
    }

    #[test]
    fn top_level_path_finder_reaches_the_harness() {
        let config: CliConfig = serde_json::from_str(
            r#"{ "path_finder": { "search": { "max_exact_distances": 8 } },
                 "harness": { "age_band_width": 10 } }"#,
        )
        .unwrap();
        let harness = config.harness_config();
        assert_eq!(harness.path_finder.search.max_exact_distances, 8);
        assert_eq!(harness.age_band_width, 10);
    }

    #[test]
    fn harness_path_finder_wins_when_both_are_set() {
        let config: CliConfig = serde_json::from_str(
            r#"{ "path_finder": { "search": { "max_exact_distances": 8 } },
                 "harness": { "path_finder": { "search": { "batch_size": 4 } } } }"#,
        )
        .unwrap();
        let harness = config.harness_config();
        assert_eq!(harness.path_finder.search.batch_size, 4);
        assert_eq!(harness.path_finder.search.max_exact_distances, 512);

        let only_harness: CliConfig = serde_json::from_str(
            r#"{ "harness": { "path_finder": { "scoring": { "age": 1.0 } } } }"#,
        )
        .unwrap();
        let scoring = only_harness.harness_config().path_finder.scoring.unwrap();
        assert_eq!(scoring.age, 1.0);
        assert_eq!(scoring.slack, 2);
    }
}
