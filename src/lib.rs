//! PartitionSort - online multi-field packet classification.
//!
//! This crate classifies packets (fixed-length vectors of header field
//! values) against prioritized rules made of one inclusive range per field,
//! and supports inserting and deleting rules without rebuilding.
//!
//! # Features
//!
//! - **Sortable partitions**: rules are split into partitions in which any
//!   two rules are identical or disjoint at the first field where they
//!   differ, so each partition answers a lookup along a single path
//! - **Greedy field ordering**: weighted interval scheduling picks the
//!   field nesting order that keeps the most rules in one partition
//! - **Path compression**: single-occupant subtrees are stored as flat
//!   chains and split only when a second rule needs them
//! - **Priority pruning**: partitions are kept sorted by maximum priority
//!   so lookups stop early
//! - **ClassBench input**: filter files and packet traces, optionally gzip
//!   compressed
//!
//! # Quick Start
//!
//! ```
//! use partition_sort::{ClassifierConfig, PartitionSet, Rule};
//!
//! let mut set = PartitionSet::with_config(ClassifierConfig::default());
//! set.insert(Rule::from_bounds(&[(0, 3), (0, 3)], 1)?)?;
//! set.insert(Rule::from_bounds(&[(1, 1), (5, 5)], 2)?)?;
//! set.insert(Rule::from_bounds(&[(0, 10), (0, 10)], 0)?)?;
//!
//! assert_eq!(set.classify(&[1, 1]), Some(1));
//! assert_eq!(set.classify(&[1, 5]), Some(2));
//! assert_eq!(set.classify(&[20, 20]), None);
//!
//! // Delete by position in insertion order
//! set.delete_rule(0);
//! assert_eq!(set.classify(&[1, 1]), Some(0));
//! # Ok::<(), partition_sort::Error>(())
//! ```
//!
//! # Components
//!
//! - [`scheduler`]: maximum-weight set of disjoint intervals on one field
//! - [`selector`]: field order selection and offline bucketing
//! - [`index`]: the nested interval index behind one partition
//! - [`PartitionSet`]: the online coordinator exposed to callers
//! - [`PacketClassifier`]: the contract shared with [`BruteForce`]

mod error;

pub mod classbench;
pub mod classifier;
pub mod config;
pub mod index;
pub mod partition;
pub mod rule;
pub mod scheduler;
pub mod selector;

// Re-export core types
pub use error::{Error, Result};
pub use rule::{FieldOrder, Interval, Point, Priority, Relation, Rule};

// Re-export configuration
pub use config::{ClassifierConfig, FieldOrderStrategy, SelectivityRanking};

// Re-export classifiers
pub use classifier::{BruteForce, PacketClassifier, QueryStats};
pub use index::{CompressedIntervalIndex, DeleteOutcome};
pub use partition::PartitionSet;

// Re-export selection algorithms
pub use scheduler::{schedule, Schedule, WeightedInterval};
pub use selector::{
    field_order_by_rule, greedy_field_selection, is_sortable, sortable_ruleset_partitioning,
    Selection, SortableRuleset,
};
