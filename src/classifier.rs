//! Uniform classifier contract shared by the partition set and its oracle.

use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashMap;
use parking_lot::Mutex;

use crate::partition::PartitionSet;
use crate::rule::{common_dim, Point, Priority, Rule};
use crate::Result;

/// Operations every packet classifier exposes to a benchmark harness.
///
/// Rules are addressed by their position in insertion order; deleting
/// position `i` moves the last rule into `i`.
pub trait PacketClassifier {
    /// Short name for reports.
    fn name(&self) -> &'static str;

    /// Replace the current rules with `rules`.
    fn construct(&mut self, rules: &[Rule]) -> Result<()>;

    /// Priority of the best rule matching `packet`, or `None`.
    fn classify(&self, packet: &[Point]) -> Option<Priority>;

    fn insert_rule(&mut self, rule: Rule) -> Result<()>;

    /// Delete the rule at position `index`; `false` if out of range.
    fn delete_rule(&mut self, index: usize) -> bool;

    fn mem_size_bytes(&self) -> usize;

    /// Worst-case comparisons per lookup.
    fn memory_access(&self) -> usize;

    fn num_tables(&self) -> usize;

    fn rules_in_table(&self, index: usize) -> usize;

    fn priority_of_table(&self, index: usize) -> Option<Priority>;
}

impl PacketClassifier for PartitionSet {
    fn name(&self) -> &'static str {
        "PartitionSort"
    }

    fn construct(&mut self, rules: &[Rule]) -> Result<()> {
        // Build aside so a rejected ruleset leaves the current rules in place
        *self = PartitionSet::from_rules(rules, self.config().clone())?;
        Ok(())
    }

    fn classify(&self, packet: &[Point]) -> Option<Priority> {
        PartitionSet::classify(self, packet)
    }

    fn insert_rule(&mut self, rule: Rule) -> Result<()> {
        self.insert(rule)
    }

    fn delete_rule(&mut self, index: usize) -> bool {
        PartitionSet::delete_rule(self, index)
    }

    fn mem_size_bytes(&self) -> usize {
        PartitionSet::mem_size_bytes(self)
    }

    fn memory_access(&self) -> usize {
        PartitionSet::memory_access(self)
    }

    fn num_tables(&self) -> usize {
        self.num_partitions()
    }

    fn rules_in_table(&self, index: usize) -> usize {
        self.rules_in_partition(index)
    }

    fn priority_of_table(&self, index: usize) -> Option<Priority> {
        self.max_priority_of_partition(index)
    }
}

/// Linear scan over every rule. Slow, obviously correct.
#[derive(Debug, Clone, Default)]
pub struct BruteForce {
    rules: Vec<Rule>,
}

impl BruteForce {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rules(rules: &[Rule]) -> Self {
        Self {
            rules: rules.to_vec(),
        }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }
}

impl PacketClassifier for BruteForce {
    fn name(&self) -> &'static str {
        "BruteForce"
    }

    fn construct(&mut self, rules: &[Rule]) -> Result<()> {
        common_dim(rules)?;
        self.rules = rules.to_vec();
        Ok(())
    }

    fn classify(&self, packet: &[Point]) -> Option<Priority> {
        self.rules
            .iter()
            .filter(|rule| rule.matches(packet))
            .map(Rule::priority)
            .max()
    }

    fn insert_rule(&mut self, rule: Rule) -> Result<()> {
        self.rules.push(rule);
        Ok(())
    }

    fn delete_rule(&mut self, index: usize) -> bool {
        if index >= self.rules.len() {
            return false;
        }
        self.rules.swap_remove(index);
        true
    }

    fn mem_size_bytes(&self) -> usize {
        self.rules
            .iter()
            .map(|r| std::mem::size_of::<Rule>() + r.dim() * std::mem::size_of::<(Point, Point)>())
            .sum()
    }

    fn memory_access(&self) -> usize {
        self.rules.len()
    }

    fn num_tables(&self) -> usize {
        usize::from(!self.rules.is_empty())
    }

    fn rules_in_table(&self, index: usize) -> usize {
        if index == 0 {
            self.rules.len()
        } else {
            0
        }
    }

    fn priority_of_table(&self, index: usize) -> Option<Priority> {
        if index == 0 {
            self.rules.iter().map(Rule::priority).max()
        } else {
            None
        }
    }
}

/// Per-lookup partition counts, updatable through a shared reference.
#[derive(Debug, Default)]
pub struct QueryStats {
    packets: AtomicU64,
    partitions_queried: AtomicU64,
    /// Partitions queried per packet -> number of packets
    histogram: Mutex<AHashMap<usize, u64>>,
}

impl QueryStats {
    /// Record one lookup that queried `partitions` partitions.
    pub fn record(&self, partitions: usize) {
        self.packets.fetch_add(1, Ordering::Relaxed);
        self.partitions_queried
            .fetch_add(partitions as u64, Ordering::Relaxed);
        *self.histogram.lock().entry(partitions).or_insert(0) += 1;
    }

    /// Number of lookups recorded.
    pub fn packets(&self) -> u64 {
        self.packets.load(Ordering::Relaxed)
    }

    /// Total partitions queried over all lookups.
    pub fn partitions_queried(&self) -> u64 {
        self.partitions_queried.load(Ordering::Relaxed)
    }

    pub fn average_partitions(&self) -> f64 {
        let packets = self.packets();
        if packets == 0 {
            return 0.0;
        }
        self.partitions_queried() as f64 / packets as f64
    }

    /// `(partitions queried, packets)` pairs sorted by partition count.
    pub fn histogram(&self) -> Vec<(usize, u64)> {
        let mut buckets: Vec<(usize, u64)> =
            self.histogram.lock().iter().map(|(&k, &v)| (k, v)).collect();
        buckets.sort_unstable();
        buckets
    }

    pub fn reset(&self) {
        self.packets.store(0, Ordering::Relaxed);
        self.partitions_queried.store(0, Ordering::Relaxed);
        self.histogram.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn rule(bounds: &[(u32, u32)], priority: u32) -> Rule {
        Rule::from_bounds(bounds, priority).unwrap()
    }

    fn sample() -> Vec<Rule> {
        vec![
            rule(&[(0, 3), (0, 3)], 1),
            rule(&[(1, 1), (5, 5)], 2),
            rule(&[(0, 10), (0, 10)], 0),
        ]
    }

    #[test]
    fn test_brute_force_picks_highest_priority() {
        let oracle = BruteForce::from_rules(&sample());

        assert_eq!(oracle.classify(&[1, 1]), Some(1));
        assert_eq!(oracle.classify(&[1, 5]), Some(2));
        assert_eq!(oracle.classify(&[10, 10]), Some(0));
        assert_eq!(oracle.classify(&[11, 10]), None);
        assert_eq!(oracle.num_tables(), 1);
        assert_eq!(oracle.priority_of_table(0), Some(2));
    }

    #[test]
    fn test_brute_force_delete_out_of_range() {
        let mut oracle = BruteForce::from_rules(&sample());

        assert!(!oracle.delete_rule(3));
        assert!(oracle.delete_rule(1));
        assert_eq!(oracle.classify(&[1, 5]), Some(0));
        assert_eq!(oracle.rules().len(), 2);
    }

    #[test]
    fn test_contract_agrees_across_classifiers() {
        let mut classifiers: Vec<Box<dyn PacketClassifier>> =
            vec![Box::new(PartitionSet::new()), Box::new(BruteForce::new())];
        for classifier in classifiers.iter_mut() {
            classifier.construct(&sample()).unwrap();
            classifier.insert_rule(rule(&[(2, 2), (2, 2)], 7)).unwrap();
            assert!(classifier.delete_rule(0));
        }

        for x in 0..12 {
            for y in 0..12 {
                let results: Vec<Option<u32>> =
                    classifiers.iter().map(|c| c.classify(&[x, y])).collect();
                assert_eq!(results[0], results[1], "packet ({}, {})", x, y);
            }
        }
        let total: usize = (0..classifiers[0].num_tables())
            .map(|i| classifiers[0].rules_in_table(i))
            .sum();
        assert_eq!(total, 3);
    }

    #[test]
    fn test_construct_replaces_rules() {
        let mut set = PartitionSet::new();
        set.construct(&sample()).unwrap();
        set.construct(&[rule(&[(0, 0), (0, 0)], 4)]).unwrap();

        assert_eq!(set.len(), 1);
        assert_eq!(PacketClassifier::classify(&set, &[1, 1]), None);
        assert_eq!(set.priority_of_table(0), Some(4));
    }

    #[test]
    fn test_construct_rejects_empty_ruleset() {
        let mut classifiers: Vec<Box<dyn PacketClassifier>> =
            vec![Box::new(PartitionSet::new()), Box::new(BruteForce::new())];
        for classifier in classifiers.iter_mut() {
            assert!(matches!(
                classifier.construct(&[]),
                Err(Error::EmptyRuleSet)
            ));
        }
    }

    #[test]
    fn test_failed_construct_keeps_previous_rules() {
        let mut classifiers: Vec<Box<dyn PacketClassifier>> =
            vec![Box::new(PartitionSet::new()), Box::new(BruteForce::new())];
        let mixed = vec![rule(&[(0, 1), (0, 1)], 7), rule(&[(0, 1)], 8)];

        for classifier in classifiers.iter_mut() {
            classifier
                .construct(&[rule(&[(0, 5), (0, 5)], 1), rule(&[(9, 9), (9, 9)], 2)])
                .unwrap();

            assert!(matches!(
                classifier.construct(&mixed),
                Err(Error::DimensionMismatch {
                    expected: 2,
                    actual: 1
                })
            ));
            assert!(matches!(classifier.construct(&[]), Err(Error::EmptyRuleSet)));

            let total: usize = (0..classifier.num_tables())
                .map(|i| classifier.rules_in_table(i))
                .sum();
            assert_eq!(total, 2, "{}", classifier.name());
            assert_eq!(classifier.classify(&[0, 0]), Some(1));
            assert_eq!(classifier.classify(&[9, 9]), Some(2));
        }
    }

    #[test]
    fn test_query_stats_histogram() {
        let stats = QueryStats::default();
        stats.record(1);
        stats.record(3);
        stats.record(1);

        assert_eq!(stats.packets(), 3);
        assert_eq!(stats.partitions_queried(), 5);
        assert_eq!(stats.histogram(), vec![(1, 2), (3, 1)]);
        assert!((stats.average_partitions() - 5.0 / 3.0).abs() < 1e-9);

        stats.reset();
        assert_eq!(stats.packets(), 0);
        assert!(stats.histogram().is_empty());
    }
}
