//! Compressed nested interval index for one sortable partition.
//!
//! The index nests one level per field, in the partition's field order.
//! Because every pair of stored rules is identical or disjoint at the first
//! level where they differ, a lookup descends a single path:
//!
//! ```text
//! level 0    [0:3] ─────────────── [8:15]
//!              │                      │
//! level 1    [2:2] ───── [5:9]      chain [0:65535] [6:6] -> {4}
//!              │           │
//! level 2    chain        chain
//!            [80:80]      [0:1023]
//!            -> {7, 2}    -> {3}
//! ```
//!
//! Runs of single-occupant levels are stored as flat chains until a second
//! rule forces them apart.

mod node;


use crate::rule::{common_dim, FieldOrder, Point, Priority, Rule};
use crate::selector::greedy_field_selection;
use crate::{Error, Result};

use node::{Leaf, Node, Removal};

/// What [`CompressedIntervalIndex::delete`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOutcome {
    /// The rule was stored and has been removed
    pub removed: bool,
    /// The index's maximum priority differs from before the call
    pub max_changed: bool,
}

/// Nested per-field interval index under a fixed field order.
#[derive(Debug, Clone)]
pub struct CompressedIntervalIndex {
    field_order: FieldOrder,
    root: Option<Node>,
    len: usize,
    /// Set once the rule count has exceeded the reconstruction threshold
    mature: bool,
}

impl CompressedIntervalIndex {
    /// Create an empty index.
    pub fn new(field_order: FieldOrder) -> Self {
        Self {
            field_order,
            root: None,
            len: 0,
            mature: false,
        }
    }

    /// Build an index holding `rules`.
    ///
    /// Fails with [`Error::Unsortable`] if the rules are not sortable
    /// under `field_order`.
    pub fn from_rules(rules: &[Rule], field_order: FieldOrder) -> Result<Self> {
        let mut index = Self::new(field_order);
        if rules.is_empty() {
            return Ok(index);
        }
        common_dim(rules)?;
        for rule in rules {
            index.insert(rule)?;
        }
        Ok(index)
    }

    pub fn field_order(&self) -> &FieldOrder {
        &self.field_order
    }

    pub fn dim(&self) -> usize {
        self.field_order.dim()
    }

    /// Number of stored rules, counting duplicates.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_mature(&self) -> bool {
        self.mature
    }

    /// Highest stored priority.
    pub fn max_priority(&self) -> Option<Priority> {
        self.root.as_ref().and_then(Node::max_priority)
    }

    fn check_dim(&self, rule: &Rule) -> Result<()> {
        if rule.dim() != self.dim() {
            return Err(Error::DimensionMismatch {
                expected: self.dim(),
                actual: rule.dim(),
            });
        }
        Ok(())
    }

    /// Whether `rule` can join without breaking sortability.
    pub fn can_insert(&self, rule: &Rule) -> bool {
        if rule.dim() != self.dim() {
            return false;
        }
        match &self.root {
            None => true,
            Some(root) => root.can_insert(&self.field_order.permute(rule)),
        }
    }

    /// Insert `rule`.
    ///
    /// Returns [`Error::Unsortable`] and leaves the index untouched when
    /// [`can_insert`](Self::can_insert) is false.
    pub fn insert(&mut self, rule: &Rule) -> Result<()> {
        self.check_dim(rule)?;
        if !self.can_insert(rule) {
            return Err(Error::Unsortable);
        }
        self.insert_unchecked(rule);
        Ok(())
    }

    fn insert_unchecked(&mut self, rule: &Rule) {
        let key = self.field_order.permute(rule);
        match &mut self.root {
            Some(root) => root.insert(&key, rule.priority()),
            None => self.root = Some(Node::tail(key, Leaf::single(rule.priority()))),
        }
        self.len += 1;
    }

    /// Remove one copy of `rule`. Unknown rules are a no-op.
    pub fn delete(&mut self, rule: &Rule) -> DeleteOutcome {
        if rule.dim() != self.dim() {
            return DeleteOutcome::default();
        }
        let key = self.field_order.permute(rule);
        let before = self.max_priority();
        let Some(root) = self.root.as_mut() else {
            return DeleteOutcome::default();
        };
        match root.delete(&key, rule.priority()) {
            Removal::NotFound => return DeleteOutcome::default(),
            Removal::Removed => {}
            Removal::Emptied => self.root = None,
        }
        self.len -= 1;
        DeleteOutcome {
            removed: true,
            max_changed: self.max_priority() != before,
        }
    }

    /// Priority of the best rule matching `packet`.
    pub fn classify(&self, packet: &[Point]) -> Option<Priority> {
        self.classify_above(packet, None)
    }

    /// Priority of the best rule matching `packet`, only if it beats `floor`.
    ///
    /// Subtrees whose cached maximum cannot beat `floor` are skipped.
    pub fn classify_above(&self, packet: &[Point], floor: Option<Priority>) -> Option<Priority> {
        if packet.len() < self.dim() {
            return None;
        }
        self.root
            .as_ref()?
            .classify(packet, self.field_order.as_slice(), floor)
    }

    /// Re-optimise the field order of a small partition.
    ///
    /// While the index holds at most `threshold` rules and is not mature,
    /// greedy field selection is rerun; the tree is rebuilt when it finds a
    /// different order covering every rule. Growing past `threshold` marks
    /// the index mature for good. Returns whether a rebuild happened.
    pub fn reconstruct_if_immature(&mut self, threshold: usize) -> bool {
        if self.mature {
            return false;
        }
        if self.len > threshold {
            self.mature = true;
            return false;
        }

        let rules = self.serialize_into_rules();
        let Ok(selection) = greedy_field_selection(&rules) else {
            return false;
        };
        if selection.field_order == self.field_order || !selection.covers_all(rules.len()) {
            return false;
        }

        let mut rebuilt = Self::new(selection.field_order);
        for rule in &rules {
            if !rebuilt.can_insert(rule) {
                return false;
            }
            rebuilt.insert_unchecked(rule);
        }
        log::debug!(
            "Rebuilt partition of {} rules: field order {} -> {}",
            rules.len(),
            self.field_order,
            rebuilt.field_order
        );
        self.field_order = rebuilt.field_order;
        self.root = rebuilt.root;
        true
    }

    /// Every stored rule, with duplicates, in no particular order.
    pub fn serialize_into_rules(&self) -> Vec<Rule> {
        let mut rules = Vec::with_capacity(self.len);
        if let Some(root) = &self.root {
            let mut prefix = Vec::with_capacity(self.dim());
            root.for_each_box(&mut prefix, &mut |levels, leaf| {
                for &priority in leaf.priorities() {
                    rules.push(self.field_order.restore(levels, priority));
                }
            });
        }
        rules
    }

    /// Approximate memory footprint in bytes.
    pub fn mem_size_bytes(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.dim() * std::mem::size_of::<usize>()
            + self.root.as_ref().map_or(0, Node::mem_size_bytes)
    }

    /// Worst-case range comparisons for one lookup.
    pub fn worst_case_accesses(&self) -> usize {
        self.root.as_ref().map_or(0, Node::worst_case_accesses)
    }

    #[cfg(test)]
    pub(crate) fn root(&self) -> Option<&Node> {
        self.root.as_ref()
    }
}
