//! Classifier configuration types.

use std::io::Read;

use serde::{Deserialize, Serialize};

use crate::rule::Interval;
use crate::Result;

/// How a fresh single-rule partition picks its field order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldOrderStrategy {
    /// Most selective fields of the rule first
    #[default]
    Selectivity,
    /// Fields in index order
    Identity,
    /// Seeded random permutation
    Shuffled,
}

impl FieldOrderStrategy {
    /// Get the configuration name of this strategy.
    pub fn name(&self) -> &'static str {
        match self {
            FieldOrderStrategy::Selectivity => "selectivity",
            FieldOrderStrategy::Identity => "identity",
            FieldOrderStrategy::Shuffled => "shuffled",
        }
    }

    /// Parse a strategy from a string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "selectivity" => Some(FieldOrderStrategy::Selectivity),
            "identity" => Some(FieldOrderStrategy::Identity),
            "shuffled" | "random" => Some(FieldOrderStrategy::Shuffled),
            _ => None,
        }
    }
}

/// Per-field domain widths used to rank how selective a range is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectivityRanking {
    /// Domain width in bits per field; field `i` uses entry `i % len`
    pub field_bits: Vec<u32>,
}

impl SelectivityRanking {
    pub fn new(field_bits: Vec<u32>) -> Self {
        Self { field_bits }
    }

    fn bits(&self, field: usize) -> u32 {
        if self.field_bits.is_empty() {
            return 32;
        }
        self.field_bits[field % self.field_bits.len()]
    }

    /// Rank of `range` on `field`; lower is more selective.
    ///
    /// 0 for a single value, 1 below half the domain, 2 below the full
    /// domain, 3 for the full domain or wider.
    pub fn rank(&self, field: usize, range: Interval) -> u8 {
        let width = range.width();
        if width == 1 {
            return 0;
        }
        let bits = self.bits(field);
        let half = bits
            .checked_sub(1)
            .and_then(|b| 1u64.checked_shl(b))
            .unwrap_or(0);
        let full = 1u64.checked_shl(bits).unwrap_or(u64::MAX);
        if width < half {
            1
        } else if width < full {
            2
        } else {
            3
        }
    }
}

impl Default for SelectivityRanking {
    fn default() -> Self {
        // ClassBench 5-tuple: source/destination address, ports, protocol
        Self {
            field_bits: vec![32, 32, 16, 16, 8],
        }
    }
}

/// Configuration for a [`PartitionSet`](crate::PartitionSet).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Partitions with at most this many rules are re-optimised after
    /// each insert
    pub reconstruction_threshold: usize,
    /// Field order for fresh partitions
    pub field_order: FieldOrderStrategy,
    /// Thresholds for [`FieldOrderStrategy::Selectivity`]
    pub selectivity: SelectivityRanking,
    /// Seed for [`FieldOrderStrategy::Shuffled`]
    pub seed: u64,
    /// Record per-lookup partition counts in [`QueryStats`](crate::QueryStats)
    pub query_stats: bool,
}

impl ClassifierConfig {
    /// Parse a configuration from YAML text; missing keys take defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Read a YAML configuration from any reader.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        Ok(serde_yaml::from_reader(reader)?)
    }

    pub fn with_field_order(mut self, strategy: FieldOrderStrategy) -> Self {
        self.field_order = strategy;
        self
    }

    pub fn with_reconstruction_threshold(mut self, threshold: usize) -> Self {
        self.reconstruction_threshold = threshold;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_query_stats(mut self, enabled: bool) -> Self {
        self.query_stats = enabled;
        self
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            reconstruction_threshold: 10,
            field_order: FieldOrderStrategy::Selectivity,
            selectivity: SelectivityRanking::default(),
            seed: 0,
            query_stats: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClassifierConfig::default();
        assert_eq!(config.reconstruction_threshold, 10);
        assert_eq!(config.field_order, FieldOrderStrategy::Selectivity);
        assert_eq!(config.selectivity.field_bits, vec![32, 32, 16, 16, 8]);
        assert!(!config.query_stats);
    }

    #[test]
    fn test_from_yaml_partial() {
        let config = ClassifierConfig::from_yaml_str(
            "field_order: shuffled\nseed: 42\nquery_stats: true\nselectivity:\n  field_bits: [16]\n",
        )
        .unwrap();

        assert_eq!(config.field_order, FieldOrderStrategy::Shuffled);
        assert_eq!(config.seed, 42);
        assert!(config.query_stats);
        assert_eq!(config.selectivity.field_bits, vec![16]);
        assert_eq!(config.reconstruction_threshold, 10);
    }

    #[test]
    fn test_from_yaml_rejects_unknown_strategy() {
        assert!(ClassifierConfig::from_yaml_str("field_order: sideways\n").is_err());
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!(
            FieldOrderStrategy::from_str("Identity"),
            Some(FieldOrderStrategy::Identity)
        );
        assert_eq!(FieldOrderStrategy::from_str("unknown"), None);
        assert_eq!(FieldOrderStrategy::Shuffled.name(), "shuffled");
    }

    #[test]
    fn test_selectivity_rank() {
        let ranking = SelectivityRanking::new(vec![8]);

        assert_eq!(ranking.rank(0, Interval::point(7)), 0);
        assert_eq!(ranking.rank(0, Interval::new(0, 126).unwrap()), 1);
        assert_eq!(ranking.rank(0, Interval::new(0, 127).unwrap()), 2);
        assert_eq!(ranking.rank(0, Interval::new(0, 255).unwrap()), 3);
        // Wider than the nominal domain
        assert_eq!(ranking.rank(3, Interval::full()), 3);
    }
}
