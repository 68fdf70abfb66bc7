//! Rule model shared by every classifier component.

use std::fmt;

use serde::Serialize;

use crate::{Error, Result};

/// A single header field value.
pub type Point = u32;

/// Rule priority; higher values win.
pub type Priority = u32;

/// Closed integer range `[low, high]` on one field.
///
/// Intervals can only be built through validating constructors, so
/// `low <= high` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Interval {
    low: Point,
    high: Point,
}

/// How two intervals on the same field relate to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    /// Same bounds
    Identical,
    /// No shared point
    Disjoint,
    /// Share at least one point without being identical
    Overlapping,
}

impl Interval {
    /// Create a new interval, rejecting inverted bounds.
    pub fn new(low: Point, high: Point) -> Result<Self> {
        if low > high {
            return Err(Error::InvertedRange { low, high });
        }
        Ok(Self { low, high })
    }

    /// Interval covering exactly one value.
    pub fn point(value: Point) -> Self {
        Self {
            low: value,
            high: value,
        }
    }

    /// Interval covering the whole `Point` domain.
    pub fn full() -> Self {
        Self {
            low: Point::MIN,
            high: Point::MAX,
        }
    }

    pub fn low(&self) -> Point {
        self.low
    }

    pub fn high(&self) -> Point {
        self.high
    }

    /// Number of values covered. Never zero.
    pub fn width(&self) -> u64 {
        u64::from(self.high - self.low) + 1
    }

    pub fn contains(&self, value: Point) -> bool {
        self.low <= value && value <= self.high
    }

    pub fn overlaps(&self, other: &Interval) -> bool {
        self.low <= other.high && other.low <= self.high
    }

    /// Classify the relation between `self` and `other`.
    pub fn relation(&self, other: &Interval) -> Relation {
        if self == other {
            Relation::Identical
        } else if self.overlaps(other) {
            Relation::Overlapping
        } else {
            Relation::Disjoint
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.low, self.high)
    }
}

/// A prioritized conjunction of per-field ranges.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Rule {
    ranges: Vec<Interval>,
    priority: Priority,
}

impl Rule {
    /// Create a rule from one range per field.
    pub fn new(ranges: Vec<Interval>, priority: Priority) -> Result<Self> {
        if ranges.is_empty() {
            return Err(Error::ZeroDimension);
        }
        Ok(Self { ranges, priority })
    }

    /// Convenience constructor from raw `(low, high)` pairs.
    pub fn from_bounds(bounds: &[(Point, Point)], priority: Priority) -> Result<Self> {
        let ranges = bounds
            .iter()
            .map(|&(low, high)| Interval::new(low, high))
            .collect::<Result<Vec<_>>>()?;
        Self::new(ranges, priority)
    }

    /// Same ranges under a different priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Number of fields.
    pub fn dim(&self) -> usize {
        self.ranges.len()
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn ranges(&self) -> &[Interval] {
        &self.ranges
    }

    pub fn range(&self, field: usize) -> Interval {
        self.ranges[field]
    }

    /// Check whether every field value of `packet` falls inside this rule.
    ///
    /// A packet shorter than the rule never matches.
    pub fn matches(&self, packet: &[Point]) -> bool {
        packet.len() >= self.ranges.len()
            && self
                .ranges
                .iter()
                .zip(packet)
                .all(|(range, &value)| range.contains(value))
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for range in &self.ranges {
            write!(f, "{} ", range)?;
        }
        write!(f, "-> {}", self.priority)
    }
}

/// Nesting order of fields inside one partition.
///
/// `order[level]` is the field examined at depth `level`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FieldOrder(Vec<usize>);

impl FieldOrder {
    /// Validate that `order` is a permutation of `0..order.len()`.
    pub fn new(order: Vec<usize>) -> Result<Self> {
        if order.is_empty() {
            return Err(Error::ZeroDimension);
        }
        let mut seen = vec![false; order.len()];
        for &field in &order {
            match seen.get_mut(field) {
                Some(slot) if !*slot => *slot = true,
                Some(_) => {
                    return Err(Error::InvalidFieldOrder(format!(
                        "field {} appears twice in {:?}",
                        field, order
                    )))
                }
                None => {
                    return Err(Error::InvalidFieldOrder(format!(
                        "field {} out of range for {} fields",
                        field,
                        order.len()
                    )))
                }
            }
        }
        Ok(Self(order))
    }

    /// Fields in index order.
    pub fn identity(dim: usize) -> Self {
        Self((0..dim).collect())
    }

    /// Wrap a vector already known to be a permutation.
    pub(crate) fn from_permutation(order: Vec<usize>) -> Self {
        debug_assert!(Self::new(order.clone()).is_ok());
        Self(order)
    }

    pub fn dim(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    /// Field examined at `level`.
    pub fn field(&self, level: usize) -> usize {
        self.0[level]
    }

    /// The rule's ranges rearranged into nesting order.
    pub fn permute(&self, rule: &Rule) -> Vec<Interval> {
        self.0.iter().map(|&field| rule.range(field)).collect()
    }

    /// Inverse of [`permute`](Self::permute).
    pub fn restore(&self, levels: &[Interval], priority: Priority) -> Rule {
        let mut ranges = levels.to_vec();
        for (level, &field) in self.0.iter().enumerate() {
            ranges[field] = levels[level];
        }
        Rule { ranges, priority }
    }
}

impl fmt::Display for FieldOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields: Vec<String> = self.0.iter().map(|f| f.to_string()).collect();
        write!(f, "[{}]", fields.join(" "))
    }
}

/// Check that every rule has `dim` fields, returning `dim`.
pub(crate) fn common_dim(rules: &[Rule]) -> Result<usize> {
    let first = rules.first().ok_or(Error::EmptyRuleSet)?;
    let dim = first.dim();
    for rule in rules {
        if rule.dim() != dim {
            return Err(Error::DimensionMismatch {
                expected: dim,
                actual: rule.dim(),
            });
        }
    }
    Ok(dim)
}
