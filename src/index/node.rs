//! Node variants of the nested interval index.
//!
//! A node sits at one level of the field order and covers the remaining
//! levels below it:
//!
//! - [`Node::Leaf`] lives past the last level and holds the priorities of
//!   every rule sharing one full box.
//! - [`Node::Chain`] is a compressed run of single-occupant levels: the
//!   remaining ranges of exactly one box, stored flat.
//! - [`Node::Branch`] holds mutually disjoint sibling ranges for its level,
//!   each owning the node for the next level.
//!
//! Subtrees holding a single distinct box are always a chain (or a leaf
//! at the last level); inserts unzip chains into branches and deletes
//! zip them back.

use std::collections::BTreeMap;
use std::mem;

use crate::rule::{Interval, Point, Priority, Relation};

/// Priorities of the rules sharing one full box.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Leaf {
    /// Sorted ascending, duplicates allowed
    priorities: Vec<Priority>,
}

impl Leaf {
    pub(crate) fn single(priority: Priority) -> Self {
        Self {
            priorities: vec![priority],
        }
    }

    pub(crate) fn add(&mut self, priority: Priority) {
        let at = self.priorities.partition_point(|&p| p <= priority);
        self.priorities.insert(at, priority);
    }

    /// Remove one occurrence of `priority`.
    pub(crate) fn remove(&mut self, priority: Priority) -> bool {
        match self.priorities.binary_search(&priority) {
            Ok(at) => {
                self.priorities.remove(at);
                true
            }
            Err(_) => false,
        }
    }

    pub(crate) fn max(&self) -> Option<Priority> {
        self.priorities.last().copied()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.priorities.is_empty()
    }

    pub(crate) fn priorities(&self) -> &[Priority] {
        &self.priorities
    }
}

/// One sibling range of a branch and the subtree below it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Child {
    pub(crate) range: Interval,
    pub(crate) next: Node,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Branch {
    /// Keyed by the low bound of each (disjoint) range
    children: BTreeMap<Point, Child>,
    max: Priority,
}

impl Branch {
    /// Sibling whose range could contain `value`.
    fn locate(&self, value: Point) -> Option<&Child> {
        self.children
            .range(..=value)
            .next_back()
            .map(|(_, child)| child)
            .filter(|child| child.range.contains(value))
    }

    /// Sibling with the greatest low bound not above `high`.
    ///
    /// Siblings are disjoint, so if any sibling overlaps a range ending at
    /// `high`, this one does.
    fn candidate(&self, high: Point) -> Option<&Child> {
        self.children.range(..=high).next_back().map(|(_, c)| c)
    }

    fn refresh_max(&mut self) {
        self.max = self
            .children
            .values()
            .filter_map(|c| c.next.max_priority())
            .max()
            .unwrap_or(0);
    }

    pub(crate) fn children(&self) -> impl Iterator<Item = &Child> {
        self.children.values()
    }

    pub(crate) fn len(&self) -> usize {
        self.children.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Node {
    Leaf(Leaf),
    Chain { ranges: Vec<Interval>, leaf: Leaf },
    Branch(Branch),
}

/// Result of [`Node::delete`].
pub(crate) enum Removal {
    /// Priority not stored under this key
    NotFound,
    /// Removed; the subtree is still populated
    Removed,
    /// Removed the last priority; the subtree must be dropped
    Emptied,
}

impl Node {
    /// Node holding exactly one box with the given remaining levels.
    pub(crate) fn tail(ranges: Vec<Interval>, leaf: Leaf) -> Node {
        if ranges.is_empty() {
            Node::Leaf(leaf)
        } else {
            Node::Chain { ranges, leaf }
        }
    }

    pub(crate) fn max_priority(&self) -> Option<Priority> {
        match self {
            Node::Leaf(leaf) | Node::Chain { leaf, .. } => leaf.max(),
            Node::Branch(branch) => Some(branch.max),
        }
    }

    /// Whether a rule with per-level `key` keeps this subtree sortable.
    pub(crate) fn can_insert(&self, key: &[Interval]) -> bool {
        match self {
            Node::Leaf(_) => true,
            Node::Chain { ranges, .. } => {
                for (new, old) in key.iter().zip(ranges) {
                    match new.relation(old) {
                        Relation::Identical => continue,
                        Relation::Disjoint => return true,
                        Relation::Overlapping => return false,
                    }
                }
                true
            }
            Node::Branch(branch) => {
                let Some((first, rest)) = key.split_first() else {
                    return true;
                };
                let Some(child) = branch.candidate(first.high()) else {
                    return true;
                };
                match child.range.relation(first) {
                    Relation::Identical => child.next.can_insert(rest),
                    Relation::Disjoint => true,
                    Relation::Overlapping => false,
                }
            }
        }
    }

    /// Add `priority` under `key`. The caller has checked [`can_insert`](Self::can_insert).
    pub(crate) fn insert(&mut self, key: &[Interval], priority: Priority) {
        match self {
            Node::Leaf(leaf) => leaf.add(priority),
            Node::Chain { ranges, leaf } => {
                match key.iter().zip(ranges.iter()).position(|(a, b)| a != b) {
                    None => leaf.add(priority),
                    Some(level) => {
                        let ranges = mem::take(ranges);
                        let leaf = mem::take(leaf);
                        *self = Node::unzip(ranges, leaf, key, priority, level);
                    }
                }
            }
            Node::Branch(branch) => {
                let Some((first, rest)) = key.split_first() else {
                    return;
                };
                branch.max = branch.max.max(priority);
                match branch.children.get_mut(&first.low()) {
                    Some(child) => {
                        debug_assert_eq!(child.range, *first, "partial overlap at branch level");
                        child.next.insert(rest, priority);
                    }
                    None => {
                        let next = Node::tail(rest.to_vec(), Leaf::single(priority));
                        branch.children.insert(
                            first.low(),
                            Child {
                                range: *first,
                                next,
                            },
                        );
                    }
                }
            }
        }
    }

    /// Split a chain at the first level where `key` departs from it.
    ///
    /// Shared levels above `level` become single-child branches; `level`
    /// itself becomes a two-child branch whose children restart as chains.
    fn unzip(
        ranges: Vec<Interval>,
        leaf: Leaf,
        key: &[Interval],
        priority: Priority,
        level: usize,
    ) -> Node {
        debug_assert!(!ranges[level].overlaps(&key[level]), "partial overlap in chain");

        let old_max = leaf.max().unwrap_or(0);
        let max = old_max.max(priority);

        let old = Child {
            range: ranges[level],
            next: Node::tail(ranges[level + 1..].to_vec(), leaf),
        };
        let new = Child {
            range: key[level],
            next: Node::tail(key[level + 1..].to_vec(), Leaf::single(priority)),
        };
        let mut children = BTreeMap::new();
        children.insert(old.range.low(), old);
        children.insert(new.range.low(), new);
        let mut node = Node::Branch(Branch { children, max });

        for &range in ranges[..level].iter().rev() {
            let mut children = BTreeMap::new();
            children.insert(range.low(), Child { range, next: node });
            node = Node::Branch(Branch { children, max });
        }
        node
    }

    /// Remove one occurrence of `priority` stored under `key`.
    ///
    /// A branch left with a single child whose subtree is a chain or leaf
    /// is zipped back into one chain.
    pub(crate) fn delete(&mut self, key: &[Interval], priority: Priority) -> Removal {
        match self {
            Node::Leaf(leaf) => Self::remove_from(leaf, priority),
            Node::Chain { ranges, leaf } => {
                if key.len() < ranges.len() || key[..ranges.len()] != ranges[..] {
                    return Removal::NotFound;
                }
                Self::remove_from(leaf, priority)
            }
            Node::Branch(branch) => {
                let Some((first, rest)) = key.split_first() else {
                    return Removal::NotFound;
                };
                let child = match branch.children.get_mut(&first.low()) {
                    Some(child) if child.range == *first => child,
                    _ => return Removal::NotFound,
                };
                match child.next.delete(rest, priority) {
                    Removal::NotFound => return Removal::NotFound,
                    Removal::Removed => {}
                    Removal::Emptied => {
                        branch.children.remove(&first.low());
                    }
                }
                if branch.children.is_empty() {
                    return Removal::Emptied;
                }
                branch.refresh_max();
                self.zip();
                Removal::Removed
            }
        }
    }

    fn remove_from(leaf: &mut Leaf, priority: Priority) -> Removal {
        if !leaf.remove(priority) {
            Removal::NotFound
        } else if leaf.is_empty() {
            Removal::Emptied
        } else {
            Removal::Removed
        }
    }

    /// Collapse a single-occupant branch back into a chain.
    fn zip(&mut self) {
        let Node::Branch(branch) = self else {
            return;
        };
        if branch.len() != 1 {
            return;
        }
        let Some(mut entry) = branch.children.first_entry() else {
            return;
        };
        let child = entry.get_mut();
        let zipped = match &mut child.next {
            Node::Leaf(leaf) => Node::Chain {
                ranges: vec![child.range],
                leaf: mem::take(leaf),
            },
            Node::Chain { ranges, leaf } => {
                let mut joined = Vec::with_capacity(ranges.len() + 1);
                joined.push(child.range);
                joined.append(ranges);
                Node::Chain {
                    ranges: joined,
                    leaf: mem::take(leaf),
                }
            }
            Node::Branch(_) => return,
        };
        *self = zipped;
    }

    /// Best priority matching `packet`, if it beats `floor`.
    ///
    /// `fields[0]` is the packet field examined at this node's level.
    pub(crate) fn classify(
        &self,
        packet: &[Point],
        fields: &[usize],
        floor: Option<Priority>,
    ) -> Option<Priority> {
        let mut node = self;
        let mut fields = fields;
        loop {
            match node {
                Node::Leaf(leaf) => return leaf.max().filter(|&p| Some(p) > floor),
                Node::Chain { ranges, leaf } => {
                    let hit = ranges
                        .iter()
                        .zip(fields)
                        .all(|(range, &field)| range.contains(packet[field]));
                    return if hit {
                        leaf.max().filter(|&p| Some(p) > floor)
                    } else {
                        None
                    };
                }
                Node::Branch(branch) => {
                    if floor >= Some(branch.max) {
                        return None;
                    }
                    let (&field, rest) = fields.split_first()?;
                    node = &branch.locate(packet[field])?.next;
                    fields = rest;
                }
            }
        }
    }

    /// Call `visit` with the per-level ranges and leaf of every stored box.
    pub(crate) fn for_each_box<F>(&self, prefix: &mut Vec<Interval>, visit: &mut F)
    where
        F: FnMut(&[Interval], &Leaf),
    {
        match self {
            Node::Leaf(leaf) => visit(prefix, leaf),
            Node::Chain { ranges, leaf } => {
                let depth = prefix.len();
                prefix.extend_from_slice(ranges);
                visit(prefix, leaf);
                prefix.truncate(depth);
            }
            Node::Branch(branch) => {
                for child in branch.children() {
                    prefix.push(child.range);
                    child.next.for_each_box(prefix, visit);
                    prefix.pop();
                }
            }
        }
    }

    /// Approximate heap and inline footprint of this subtree.
    pub(crate) fn mem_size_bytes(&self) -> usize {
        let own = mem::size_of::<Node>();
        match self {
            Node::Leaf(leaf) => own + leaf.priorities.len() * mem::size_of::<Priority>(),
            Node::Chain { ranges, leaf } => {
                own + ranges.len() * mem::size_of::<Interval>()
                    + leaf.priorities.len() * mem::size_of::<Priority>()
            }
            Node::Branch(branch) => {
                let entry = mem::size_of::<Point>() + mem::size_of::<Interval>();
                own + branch
                    .children()
                    .map(|c| entry + c.next.mem_size_bytes())
                    .sum::<usize>()
            }
        }
    }

    /// Worst-case number of range comparisons for one lookup.
    ///
    /// A branch costs one comparison per level of its binary search tree.
    pub(crate) fn worst_case_accesses(&self) -> usize {
        match self {
            Node::Leaf(_) => 1,
            Node::Chain { ranges, .. } => ranges.len() + 1,
            Node::Branch(branch) => {
                let search = (usize::BITS - branch.len().leading_zeros()) as usize;
                search
                    + branch
                        .children()
                        .map(|c| c.next.worst_case_accesses())
                        .max()
                        .unwrap_or(0)
            }
        }
    }
}
