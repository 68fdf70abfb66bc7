//! Online partition coordinator.
//!
//! A [`PartitionSet`] owns a dynamic collection of sortable partitions,
//! each a [`CompressedIntervalIndex`], and keeps them ordered by descending
//! maximum priority. A lookup walks the partitions in that order and stops
//! as soon as the best match so far outranks every rule left to visit.

use std::cmp::Reverse;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::classifier::QueryStats;
use crate::config::{ClassifierConfig, FieldOrderStrategy};
use crate::index::CompressedIntervalIndex;
use crate::rule::{common_dim, FieldOrder, Point, Priority, Rule};
use crate::selector::{field_order_by_rule, sortable_ruleset_partitioning};
use crate::{Error, Result};

/// Dynamic set of sortable partitions.
///
/// Rules are addressed externally by their position in insertion order,
/// the way a benchmark harness tracks them. Deleting position `i` moves
/// the last rule into `i`.
#[derive(Debug)]
pub struct PartitionSet {
    config: ClassifierConfig,
    rng: StdRng,
    /// Field count shared by every stored rule
    dim: Option<usize>,
    /// Partition arena; `None` marks a free slot
    slots: Vec<Option<CompressedIntervalIndex>>,
    free_slots: Vec<usize>,
    /// Live slots by descending max priority
    order: Vec<usize>,
    /// External rule list and the slot owning each rule
    entries: Vec<(Rule, usize)>,
    stats: QueryStats,
}

fn slot_max(slots: &[Option<CompressedIntervalIndex>], slot: usize) -> Option<Priority> {
    slots[slot].as_ref().and_then(|p| p.max_priority())
}

impl PartitionSet {
    /// Create an empty set with default configuration.
    pub fn new() -> Self {
        Self::with_config(ClassifierConfig::default())
    }

    /// Create an empty set with the given configuration.
    pub fn with_config(config: ClassifierConfig) -> Self {
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            dim: None,
            slots: Vec::new(),
            free_slots: Vec::new(),
            order: Vec::new(),
            entries: Vec::new(),
            stats: QueryStats::default(),
        }
    }

    /// Build by inserting `rules` one at a time.
    ///
    /// Fails on an empty slice or on rules of differing dimensions.
    pub fn from_rules(rules: &[Rule], config: ClassifierConfig) -> Result<Self> {
        common_dim(rules)?;
        let mut set = Self::with_config(config);
        set.extend(rules)?;
        Ok(set)
    }

    /// Build by bucketing the whole ruleset up front.
    ///
    /// Each bucket found by greedy field selection becomes one partition
    /// under its own field order. The result accepts online updates like
    /// any other set.
    pub fn build_offline(rules: &[Rule], config: ClassifierConfig) -> Result<Self> {
        let dim = common_dim(rules)?;
        let buckets = sortable_ruleset_partitioning(rules)?;

        let mut set = Self::with_config(config);
        set.dim = Some(dim);
        let mut owner = vec![0; rules.len()];
        for bucket in buckets {
            let members: Vec<Rule> = bucket.members.iter().map(|&i| rules[i].clone()).collect();
            let index = CompressedIntervalIndex::from_rules(&members, bucket.field_order)?;
            let slot = set.allocate(index);
            for &i in &bucket.members {
                owner[i] = slot;
            }
        }
        set.entries = rules.iter().cloned().zip(owner).collect();
        set.restore_order();

        log::info!(
            "Partitioned {} rules into {} sortable buckets",
            rules.len(),
            set.num_partitions()
        );
        Ok(set)
    }

    /// Insert every rule in order.
    pub fn extend(&mut self, rules: &[Rule]) -> Result<()> {
        for rule in rules {
            self.insert(rule.clone())?;
        }
        Ok(())
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Field count of the stored rules, if any are stored.
    pub fn dim(&self) -> Option<usize> {
        self.dim
    }

    /// Number of stored rules.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rules in external index order.
    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.entries.iter().map(|(rule, _)| rule)
    }

    /// Partitions in query order.
    pub fn partitions(&self) -> impl Iterator<Item = &CompressedIntervalIndex> {
        self.order.iter().filter_map(|&slot| self.slots[slot].as_ref())
    }

    pub fn num_partitions(&self) -> usize {
        self.order.len()
    }

    fn partition(&self, i: usize) -> Option<&CompressedIntervalIndex> {
        self.order.get(i).and_then(|&slot| self.slots[slot].as_ref())
    }

    /// Rule count of the `i`-th partition in query order.
    pub fn rules_in_partition(&self, i: usize) -> usize {
        self.partition(i).map_or(0, CompressedIntervalIndex::len)
    }

    /// Max priority of the `i`-th partition in query order.
    pub fn max_priority_of_partition(&self, i: usize) -> Option<Priority> {
        self.partition(i).and_then(CompressedIntervalIndex::max_priority)
    }

    /// Lookup statistics; only populated when
    /// [`ClassifierConfig::query_stats`] is set.
    pub fn stats(&self) -> &QueryStats {
        &self.stats
    }

    fn accepts_packet(&self, packet: &[Point]) -> bool {
        match self.dim {
            Some(dim) if packet.len() < dim => {
                log::warn!(
                    "Packet has {} fields but rules have {}; treating as no match",
                    packet.len(),
                    dim
                );
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Priority of the best rule matching `packet`.
    pub fn classify(&self, packet: &[Point]) -> Option<Priority> {
        if !self.accepts_packet(packet) {
            return None;
        }
        let mut best = None;
        let mut queried = 0;
        for partition in self.partitions() {
            // Nothing from here on can beat `best`
            if best >= partition.max_priority() {
                break;
            }
            queried += 1;
            if let Some(priority) = partition.classify_above(packet, best) {
                best = Some(priority);
            }
        }
        if self.config.query_stats {
            self.stats.record(queried);
        }
        best
    }

    /// Like [`classify`](Self::classify) but visits every partition.
    pub fn classify_exhaustive(&self, packet: &[Point]) -> Option<Priority> {
        if !self.accepts_packet(packet) {
            return None;
        }
        self.partitions()
            .filter_map(|partition| partition.classify(packet))
            .max()
    }

    fn check_dim(&self, rule: &Rule) -> Result<()> {
        match self.dim {
            Some(dim) if dim != rule.dim() => Err(Error::DimensionMismatch {
                expected: dim,
                actual: rule.dim(),
            }),
            _ => Ok(()),
        }
    }

    /// Insert `rule` at the end of the external rule list.
    ///
    /// The rule joins the first partition in query order that can take it;
    /// otherwise a new partition is created for it.
    pub fn insert(&mut self, rule: Rule) -> Result<()> {
        self.check_dim(&rule)?;
        let threshold = self.config.reconstruction_threshold;

        let mut owner = None;
        for &slot in &self.order {
            let Some(partition) = self.slots[slot].as_mut() else {
                continue;
            };
            if partition.can_insert(&rule) {
                partition.insert(&rule)?;
                partition.reconstruct_if_immature(threshold);
                owner = Some(slot);
                break;
            }
        }

        let slot = match owner {
            Some(slot) => slot,
            None => {
                let mut partition = CompressedIntervalIndex::new(self.fresh_field_order(&rule));
                partition.insert(&rule)?;
                let slot = self.allocate(partition);
                log::debug!(
                    "Created partition {} for rule {} ({} partitions)",
                    slot,
                    rule,
                    self.order.len()
                );
                slot
            }
        };

        self.dim = Some(rule.dim());
        self.entries.push((rule, slot));
        self.restore_order();
        Ok(())
    }

    /// Delete the rule at external position `index`.
    ///
    /// The last rule moves into `index`. Out-of-range positions are ignored
    /// and return `false`.
    pub fn delete_rule(&mut self, index: usize) -> bool {
        if index >= self.entries.len() {
            log::warn!(
                "Delete index {} out of range for {} rules; ignoring",
                index,
                self.entries.len()
            );
            return false;
        }
        let (rule, slot) = self.entries.swap_remove(index);
        let Some(partition) = self.slots[slot].as_mut() else {
            return false;
        };
        let outcome = partition.delete(&rule);
        debug_assert!(outcome.removed, "rule missing from its partition");

        if partition.is_empty() {
            self.slots[slot] = None;
            self.free_slots.push(slot);
            self.order.retain(|&s| s != slot);
            log::debug!(
                "Destroyed partition {} ({} partitions)",
                slot,
                self.order.len()
            );
        } else if outcome.max_changed {
            self.restore_order();
        }

        if self.entries.is_empty() {
            self.dim = None;
        }
        outcome.removed
    }

    /// Delete the first stored rule equal to `rule`.
    pub fn remove_rule(&mut self, rule: &Rule) -> bool {
        match self.entries.iter().position(|(r, _)| r == rule) {
            Some(index) => self.delete_rule(index),
            None => false,
        }
    }

    fn fresh_field_order(&mut self, rule: &Rule) -> FieldOrder {
        match self.config.field_order {
            FieldOrderStrategy::Selectivity => field_order_by_rule(rule, &self.config.selectivity),
            FieldOrderStrategy::Identity => FieldOrder::identity(rule.dim()),
            FieldOrderStrategy::Shuffled => {
                let mut fields: Vec<usize> = (0..rule.dim()).collect();
                fields.shuffle(&mut self.rng);
                FieldOrder::from_permutation(fields)
            }
        }
    }

    /// Store a partition and append it to the query order.
    fn allocate(&mut self, partition: CompressedIntervalIndex) -> usize {
        let slot = match self.free_slots.pop() {
            Some(slot) => {
                self.slots[slot] = Some(partition);
                slot
            }
            None => {
                self.slots.push(Some(partition));
                self.slots.len() - 1
            }
        };
        self.order.push(slot);
        slot
    }

    /// Re-sort the query order if a max priority moved out of place.
    ///
    /// The sort is stable, so equal partitions keep their relative order.
    fn restore_order(&mut self) {
        let slots = &self.slots;
        let sorted = self
            .order
            .windows(2)
            .all(|w| slot_max(slots, w[0]) >= slot_max(slots, w[1]));
        if !sorted {
            self.order.sort_by_key(|&slot| Reverse(slot_max(slots, slot)));
        }
    }

    /// Whether the query order is sorted by descending max priority.
    pub fn is_priority_sorted(&self) -> bool {
        self.order
            .windows(2)
            .all(|w| slot_max(&self.slots, w[0]) >= slot_max(&self.slots, w[1]))
    }

    /// Approximate memory footprint in bytes.
    pub fn mem_size_bytes(&self) -> usize {
        let partitions: usize = self.partitions().map(|p| p.mem_size_bytes()).sum();
        partitions
            + self.order.len() * std::mem::size_of::<usize>()
            + self.entries.len() * std::mem::size_of::<usize>()
    }

    /// Worst-case range comparisons for one lookup visiting every partition.
    pub fn memory_access(&self) -> usize {
        self.partitions().map(|p| p.worst_case_accesses()).sum()
    }
}

impl Default for PartitionSet {
    fn default() -> Self {
        Self::new()
    }
}
