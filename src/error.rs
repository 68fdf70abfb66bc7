//! Error types for partition-sort.

use thiserror::Error;

use crate::rule::Point;

/// Error type for partition-sort operations.
#[derive(Error, Debug)]
pub enum Error {
    /// An operation that needs at least one rule was given none
    #[error("empty rule set")]
    EmptyRuleSet,

    /// A rule or field order with no fields
    #[error("rules must have at least one field")]
    ZeroDimension,

    /// Range with its bounds swapped
    #[error("inverted range: low {low} is greater than high {high}")]
    InvertedRange { low: Point, high: Point },

    /// Rule or field order whose field count differs from the rest
    #[error("dimension mismatch: expected {expected} fields, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Field order that is not a permutation of the field indices
    #[error("invalid field order: {0}")]
    InvalidFieldOrder(String),

    /// Insertion would break the sortability of a partition
    #[error("rule overlaps a sibling range in this partition")]
    Unsortable,

    /// Malformed ClassBench filter or trace line
    #[error("parse error on line {line}: {message}")]
    Parse { line: usize, message: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias for partition-sort operations.
pub type Result<T> = std::result::Result<T, Error>;
