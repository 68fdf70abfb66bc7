//! Field order selection.
//!
//! A field order is good for a set of rules when many of them can live in a
//! single sortable partition under it. [`greedy_field_selection`] picks the
//! order one field at a time, each time keeping the rule groups chosen by
//! weighted interval scheduling on the best remaining field.

use crate::config::SelectivityRanking;
use crate::rule::{common_dim, FieldOrder, Interval, Rule};
use crate::scheduler::{self, WeightedInterval};
use crate::Result;

/// Outcome of [`greedy_field_selection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Indices of the input rules that are sortable under `field_order`.
    pub covered: Vec<usize>,
    /// Full permutation of the fields.
    pub field_order: FieldOrder,
}

impl Selection {
    /// Whether every one of `total` input rules was covered.
    pub fn covers_all(&self, total: usize) -> bool {
        self.covered.len() == total
    }

    /// Clone the covered rules out of the input slice.
    pub fn covered_rules(&self, rules: &[Rule]) -> Vec<Rule> {
        self.covered.iter().map(|&i| rules[i].clone()).collect()
    }
}

/// A rule subset together with a field order it is sortable under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortableRuleset {
    /// Indices into the rules passed to [`sortable_ruleset_partitioning`].
    pub members: Vec<usize>,
    pub field_order: FieldOrder,
}

/// Rules grouped by their identical range on one field.
struct RangeGroup {
    interval: Interval,
    members: Vec<usize>,
}

/// Group `members` by identical range on `field`, ordered by range.
fn group_by_range(rules: &[Rule], members: &[usize], field: usize) -> Vec<RangeGroup> {
    let mut sorted = members.to_vec();
    sorted.sort_by_key(|&i| rules[i].range(field));

    let mut groups: Vec<RangeGroup> = Vec::new();
    for i in sorted {
        let interval = rules[i].range(field);
        match groups.last_mut() {
            Some(group) if group.interval == interval => group.members.push(i),
            _ => groups.push(RangeGroup {
                interval,
                members: vec![i],
            }),
        }
    }
    groups
}

/// Run the scheduler on every group for one field.
///
/// Returns the surviving subgroups and the total scheduled weight.
fn schedule_field(rules: &[Rule], groups: &[Vec<usize>], field: usize) -> (Vec<Vec<usize>>, u64) {
    let mut next = Vec::new();
    let mut total = 0;
    for group in groups {
        let ranges = group_by_range(rules, group, field);
        let weighted: Vec<WeightedInterval> = ranges
            .iter()
            .map(|g| WeightedInterval::new(g.interval, g.members.len() as u64 + 1))
            .collect();
        let result = scheduler::schedule(&weighted);
        total += result.weight;

        let mut ranges: Vec<Option<RangeGroup>> = ranges.into_iter().map(Some).collect();
        for i in result.selected {
            if let Some(g) = ranges[i].take() {
                next.push(g.members);
            }
        }
    }
    (next, total)
}

/// Greedily choose a field order covering as many rules as possible.
///
/// Each round evaluates every unchosen field; the one with the largest
/// scheduled weight wins, later fields winning ties. Rules not scheduled on
/// the winning field are dropped from further rounds.
pub fn greedy_field_selection(rules: &[Rule]) -> Result<Selection> {
    let dim = common_dim(rules)?;

    let mut groups: Vec<Vec<usize>> = vec![(0..rules.len()).collect()];
    let mut chosen: Vec<usize> = Vec::with_capacity(dim);

    for _ in 0..dim {
        let mut winner: Option<(usize, u64, Vec<Vec<usize>>)> = None;
        for field in (0..dim).filter(|f| !chosen.contains(f)) {
            let (next, weight) = schedule_field(rules, &groups, field);
            if winner.as_ref().map_or(true, |(_, best, _)| weight >= *best) {
                winner = Some((field, weight, next));
            }
        }
        if let Some((field, _, next)) = winner {
            chosen.push(field);
            groups = next;
        }
    }

    let mut covered: Vec<usize> = groups.into_iter().flatten().collect();
    covered.sort_unstable();

    Ok(Selection {
        covered,
        field_order: FieldOrder::from_permutation(chosen),
    })
}

/// Split a whole ruleset into sortable buckets.
///
/// Repeatedly runs [`greedy_field_selection`] on the rules not yet placed
/// and emits the covered subset as the next bucket.
pub fn sortable_ruleset_partitioning(rules: &[Rule]) -> Result<Vec<SortableRuleset>> {
    common_dim(rules)?;

    let mut remaining: Vec<usize> = (0..rules.len()).collect();
    let mut buckets = Vec::new();
    while !remaining.is_empty() {
        let subset: Vec<Rule> = remaining.iter().map(|&i| rules[i].clone()).collect();
        let selection = greedy_field_selection(&subset)?;

        let mut taken = vec![false; remaining.len()];
        for &i in &selection.covered {
            taken[i] = true;
        }
        let members: Vec<usize> = selection.covered.iter().map(|&i| remaining[i]).collect();
        debug_assert!(!members.is_empty(), "selection must cover at least one rule");

        remaining = remaining
            .iter()
            .zip(&taken)
            .filter(|(_, &t)| !t)
            .map(|(&i, _)| i)
            .collect();
        buckets.push(SortableRuleset {
            members,
            field_order: selection.field_order,
        });
    }
    Ok(buckets)
}

/// Check that `rules` form a sortable partition under `order`.
///
/// At every level, rules that agree on all earlier levels must have
/// identical or disjoint ranges.
pub fn is_sortable(rules: &[Rule], order: &FieldOrder) -> bool {
    if rules.is_empty() {
        return true;
    }
    if rules.iter().any(|r| r.dim() != order.dim()) {
        return false;
    }

    let mut groups: Vec<Vec<usize>> = vec![(0..rules.len()).collect()];
    for &field in order.as_slice() {
        let mut next = Vec::new();
        for group in &groups {
            let ranges = group_by_range(rules, group, field);
            // Unique ranges sorted by low bound: disjoint iff each ends
            // before the next one starts.
            if ranges
                .windows(2)
                .any(|w| w[0].interval.high() >= w[1].interval.low())
            {
                return false;
            }
            next.extend(ranges.into_iter().map(|g| g.members));
        }
        groups = next;
    }
    true
}

/// Cheap default order for a fresh single-rule partition.
///
/// Fields where the rule is most selective come first: exact points, then
/// ranges narrower than half the field domain, then wider ones, then the
/// full domain. Ties keep field index order.
pub fn field_order_by_rule(rule: &Rule, ranking: &SelectivityRanking) -> FieldOrder {
    let mut fields: Vec<usize> = (0..rule.dim()).collect();
    fields.sort_by_key(|&field| ranking.rank(field, rule.range(field)));
    FieldOrder::from_permutation(fields)
}
