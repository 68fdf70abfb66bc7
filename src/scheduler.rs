//! Weighted interval scheduling.
//!
//! Given weighted closed intervals on one field, find a pairwise
//! non-overlapping subset of maximum total weight. The field order
//! selector runs this once per candidate field and rule group.

use crate::rule::Interval;

/// Interval carrying a scheduling weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeightedInterval {
    pub interval: Interval,
    pub weight: u64,
}

impl WeightedInterval {
    pub fn new(interval: Interval, weight: u64) -> Self {
        Self { interval, weight }
    }
}

/// Result of [`schedule`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schedule {
    /// Indices into the input slice, ordered by increasing high endpoint.
    pub selected: Vec<usize>,
    /// Total weight of the selected intervals.
    pub weight: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum EventKind {
    // Opens sort before closes at the same coordinate: closed ranges
    // ending and starting at the same point overlap there.
    Open,
    Close,
}

#[derive(Debug, Clone, Copy)]
struct Event {
    coord: u32,
    kind: EventKind,
    /// Position of the interval in high-endpoint order.
    rank: usize,
}

/// Compute a maximum-weight set of pairwise disjoint intervals.
///
/// Ties between equally good answers are broken by input order.
pub fn schedule(intervals: &[WeightedInterval]) -> Schedule {
    if intervals.is_empty() {
        return Schedule::default();
    }

    let mut by_high: Vec<usize> = (0..intervals.len()).collect();
    by_high.sort_by_key(|&i| intervals[i].interval.high());

    let mut events = Vec::with_capacity(by_high.len() * 2);
    for (rank, &i) in by_high.iter().enumerate() {
        let interval = intervals[i].interval;
        events.push(Event {
            coord: interval.low(),
            kind: EventKind::Open,
            rank,
        });
        events.push(Event {
            coord: interval.high(),
            kind: EventKind::Close,
            rank,
        });
    }
    events.sort_by_key(|e| (e.coord, e.kind));

    // best[rank]: heaviest chain of disjoint intervals ending with `rank`
    let mut best = vec![0u64; by_high.len()];
    let mut running = 0u64;
    let mut last = None;
    for event in &events {
        match event.kind {
            EventKind::Open => {
                best[event.rank] = running + intervals[by_high[event.rank]].weight;
            }
            EventKind::Close => {
                if best[event.rank] > running {
                    running = best[event.rank];
                    last = Some(event.rank);
                }
            }
        }
    }

    let Some(mut current) = last else {
        return Schedule::default();
    };

    let weight_of = |rank: usize| intervals[by_high[rank]].weight;
    let interval_of = |rank: usize| intervals[by_high[rank]].interval;

    let mut selected = vec![by_high[current]];
    let mut remaining = running - weight_of(current);
    for rank in (0..current).rev() {
        if remaining == 0 {
            break;
        }
        if best[rank] == remaining && interval_of(rank).high() < interval_of(current).low() {
            selected.push(by_high[rank]);
            remaining -= weight_of(rank);
            current = rank;
        }
    }
    selected.reverse();

    Schedule {
        selected,
        weight: running,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wi(low: u32, high: u32, weight: u64) -> WeightedInterval {
        WeightedInterval::new(Interval::new(low, high).unwrap(), weight)
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(schedule(&[]), Schedule::default());
    }

    #[test]
    fn test_single_interval() {
        let result = schedule(&[wi(3, 9, 4)]);
        assert_eq!(result.selected, vec![0]);
        assert_eq!(result.weight, 4);
    }

    #[test]
    fn test_disjoint_intervals_all_selected() {
        let result = schedule(&[wi(10, 12, 1), wi(0, 3, 2), wi(5, 8, 3)]);
        assert_eq!(result.weight, 6);
        assert_eq!(result.selected, vec![1, 2, 0]);
    }

    #[test]
    fn test_shared_endpoint_counts_as_overlap() {
        // [0,5] and [5,9] share the point 5
        let result = schedule(&[wi(0, 5, 2), wi(5, 9, 2)]);
        assert_eq!(result.weight, 2);
        assert_eq!(result.selected.len(), 1);
    }

    #[test]
    fn test_heavy_interval_beats_many_light() {
        let result = schedule(&[wi(0, 100, 10), wi(0, 10, 2), wi(20, 30, 2), wi(40, 50, 2)]);
        assert_eq!(result.weight, 10);
        assert_eq!(result.selected, vec![0]);
    }

    #[test]
    fn test_many_light_beat_heavy() {
        let result = schedule(&[wi(0, 100, 5), wi(0, 10, 2), wi(20, 30, 2), wi(40, 50, 2)]);
        assert_eq!(result.weight, 6);
        assert_eq!(result.selected, vec![1, 2, 3]);
    }

    #[test]
    fn test_ties_prefer_input_order() {
        let result = schedule(&[wi(0, 4, 3), wi(2, 4, 3)]);
        assert_eq!(result.weight, 3);
        assert_eq!(result.selected, vec![0]);
    }

    #[test]
    fn test_selected_are_pairwise_disjoint() {
        let input = [
            wi(0, 4, 3),
            wi(3, 7, 5),
            wi(6, 9, 3),
            wi(8, 12, 4),
            wi(11, 15, 2),
            wi(13, 13, 1),
        ];
        let result = schedule(&input);
        let total: u64 = result.selected.iter().map(|&i| input[i].weight).sum();
        assert_eq!(total, result.weight);
        for (n, &a) in result.selected.iter().enumerate() {
            for &b in &result.selected[n + 1..] {
                assert!(!input[a].interval.overlaps(&input[b].interval));
            }
        }
        // [3,7] + [8,12] + [13,13]
        assert_eq!(result.weight, 10);
    }
}
