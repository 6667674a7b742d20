//! Adaptive partition of the integration domain.
//!
//! The list holds every sub-interval that has not been accepted yet. Nodes live
//! in an arena and are addressed by generation-checked [`SegmentId`] handles, so
//! a handle that outlives its segment (accepted or split) is detected instead of
//! silently aliasing a newer node that reused the slot.
//!
//! ```text
//!   domain  [a ─────────────────────────────── b]
//!   list     [a,m1] ⇄ [m1,m2] ⇄ [m2,m3] ⇄ ... ⇄ [mk,b]     (ascending `left`)
//!   slots    0:#0.3   4:#4.1   1:#1.2 ...   free = [2, 3]
//! ```
//!
//! Intervals of accepted segments leave the list. With the audit ledger enabled
//! their bounds are remembered so [`SegmentList::check_partition`] can verify
//! that live and accepted intervals still tile the domain exactly.

use crate::worker::WorkerId;
use std::collections::TryReserveError;
use std::fmt;
use thiserror::Error;

/// Stable handle to a segment in a [`SegmentList`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentId {
    index: u32,
    generation: u32,
}

impl SegmentId {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

/// Errors raised by segment list operations.
///
/// Everything except [`SegmentError::Unsplittable`] indicates a broken
/// scheduler and is fatal for the run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SegmentError {
    #[error("segment {0} is no longer in the list")]
    Stale(SegmentId),

    #[error("segment [{left}, {right}] is too narrow to split")]
    Unsplittable { left: String, right: String },

    #[error("a partition needs at least one segment")]
    EmptyPartition,

    #[error("partition invariant broken: {0}")]
    PartitionBroken(String),

    #[error("allocation failed: {0}")]
    Allocation(#[from] TryReserveError),
}

/// One candidate sub-interval of the domain.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub left: f64,
    pub right: f64,
    /// Worker currently computing this segment.
    pub owner: Option<WorkerId>,
    /// Set when the segment went back to the queue because its worker died.
    pub reclaimed: bool,
    /// Number of splits between the initial partition and this segment.
    pub depth: u32,
    /// Creation order, used to hand out the oldest unassigned segment first.
    seq: u64,
}

impl Segment {
    fn unassigned(left: f64, right: f64, depth: u32, seq: u64) -> Self {
        Self {
            left,
            right,
            owner: None,
            reclaimed: false,
            depth,
            seq,
        }
    }

    /// Width of the interval.
    pub fn width(&self) -> f64 {
        self.right - self.left
    }
}

#[derive(Debug)]
struct Node {
    segment: Segment,
    prev: Option<u32>,
    next: Option<u32>,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Ordered, mutable partition of `[left, right]` into outstanding segments.
#[derive(Debug)]
pub struct SegmentList {
    slots: Vec<Slot>,
    free: Vec<u32>,
    head: Option<u32>,
    tail: Option<u32>,
    len: usize,
    next_seq: u64,
    domain: (f64, f64),
    accepted_width: f64,
    audit: Option<Vec<(f64, f64)>>,
}

impl SegmentList {
    /// Partition `[left, right]` into `count` contiguous equal-width segments.
    ///
    /// Boundaries that collapse onto their neighbour in floating point are
    /// dropped, so a tiny domain may yield fewer segments than requested.
    pub fn initialize(left: f64, right: f64, count: usize) -> Result<Self, SegmentError> {
        if count == 0 {
            return Err(SegmentError::EmptyPartition);
        }
        if !(left < right) {
            return Err(SegmentError::PartitionBroken(format!(
                "domain [{left}, {right}] is empty"
            )));
        }
        if !(right - left).is_finite() {
            return Err(SegmentError::PartitionBroken(format!(
                "domain [{left}, {right}] is wider than the largest float"
            )));
        }

        let mut list = Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
            next_seq: 0,
            domain: (left, right),
            accepted_width: 0.0,
            audit: None,
        };
        list.slots.try_reserve(count)?;

        let width = right - left;
        let mut lo = left;
        for i in 1..=count {
            let hi = if i == count {
                right
            } else {
                left + width * (i as f64) / (count as f64)
            };
            if hi <= lo {
                continue;
            }
            let seq = list.bump_seq();
            list.insert_between(list.tail, None, Segment::unassigned(lo, hi, 0, seq))?;
            lo = hi;
        }

        Ok(list)
    }

    /// Keep a ledger of accepted intervals for [`Self::check_partition`].
    pub fn with_audit(mut self) -> Self {
        self.audit = Some(Vec::new());
        self
    }

    /// The domain this list partitions.
    pub fn domain(&self) -> (f64, f64) {
        self.domain
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of outstanding segments.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Total width already folded into the result.
    pub fn accepted_width(&self) -> f64 {
        self.accepted_width
    }

    /// Total width still outstanding (assigned or not).
    pub fn outstanding_width(&self) -> f64 {
        self.iter().map(|(_, seg)| seg.width()).sum()
    }

    /// Look up a live segment.
    pub fn get(&self, id: SegmentId) -> Option<&Segment> {
        self.node(id).ok().map(|node| &node.segment)
    }

    /// Iterate outstanding segments in ascending `left` order.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            list: self,
            cursor: self.head,
        }
    }

    /// The oldest segment nobody is working on.
    pub fn find_unassigned(&self) -> Option<SegmentId> {
        self.iter()
            .filter(|(_, seg)| seg.owner.is_none())
            .min_by_key(|(_, seg)| seg.seq)
            .map(|(id, _)| id)
    }

    /// The segment currently assigned to `worker`.
    pub fn find_by_owner(&self, worker: WorkerId) -> Option<SegmentId> {
        self.iter()
            .find(|(_, seg)| seg.owner == Some(worker))
            .map(|(id, _)| id)
    }

    /// Mark `id` as being computed by `worker`.
    pub fn assign(&mut self, id: SegmentId, worker: WorkerId) -> Result<(), SegmentError> {
        let seg = &mut self.node_mut(id)?.segment;
        seg.owner = Some(worker);
        seg.reclaimed = false;
        Ok(())
    }

    /// Return an assigned segment to the queue after its worker was lost.
    pub fn release(&mut self, id: SegmentId) -> Result<(), SegmentError> {
        let seg = &mut self.node_mut(id)?.segment;
        seg.owner = None;
        seg.reclaimed = true;
        Ok(())
    }

    /// Replace `id` by its two halves, both unassigned.
    ///
    /// The handle `id` is retired. Returns the handles of the left and right
    /// halves.
    pub fn split(&mut self, id: SegmentId) -> Result<(SegmentId, SegmentId), SegmentError> {
        let (left, right, depth, prev, next) = {
            let node = self.node(id)?;
            let seg = &node.segment;
            (seg.left, seg.right, seg.depth, node.prev, node.next)
        };

        let mid = (left + right) / 2.0;
        if !(mid > left && mid < right) {
            return Err(SegmentError::Unsplittable {
                left: left.to_string(),
                right: right.to_string(),
            });
        }

        // Both halves must fit before the parent is unlinked.
        self.slots.try_reserve(2)?;
        self.free.try_reserve(1)?;

        self.remove_node(id.index);
        let seq = self.bump_seq();
        let lower = self.insert_between(prev, next, Segment::unassigned(left, mid, depth + 1, seq))?;
        let seq = self.bump_seq();
        let upper = self.insert_between(
            Some(lower.index),
            next,
            Segment::unassigned(mid, right, depth + 1, seq),
        )?;

        Ok((lower, upper))
    }

    /// Remove `id` from the list and return its contribution to the integral.
    ///
    /// `estimate` is the integral over the segment itself, so the contribution
    /// is the estimate verbatim. Accepting a handle twice fails with
    /// [`SegmentError::Stale`].
    pub fn accept(&mut self, id: SegmentId, estimate: f64) -> Result<f64, SegmentError> {
        let seg = &self.node(id)?.segment;
        let (left, right) = (seg.left, seg.right);

        if let Some(ledger) = self.audit.as_mut() {
            ledger.try_reserve(1)?;
            ledger.push((left, right));
        }
        self.accepted_width += right - left;
        self.remove_node(id.index);

        Ok(estimate)
    }

    /// Verify that the outstanding list is ordered and disjoint and, when the
    /// audit ledger is enabled, that live and accepted intervals tile the
    /// domain with no gap and no overlap.
    pub fn check_partition(&self) -> Result<(), SegmentError> {
        let mut previous: Option<&Segment> = None;
        for (id, seg) in self.iter() {
            if !(seg.left < seg.right) {
                return Err(SegmentError::PartitionBroken(format!(
                    "segment {id} [{}, {}] is empty",
                    seg.left, seg.right
                )));
            }
            if let Some(prev) = previous
                && prev.right > seg.left
            {
                return Err(SegmentError::PartitionBroken(format!(
                    "segment {id} starts at {} before its predecessor ends at {}",
                    seg.left, prev.right
                )));
            }
            previous = Some(seg);
        }

        let Some(ledger) = self.audit.as_ref() else {
            return Ok(());
        };

        let mut intervals: Vec<(f64, f64)> = ledger.clone();
        intervals.extend(self.iter().map(|(_, seg)| (seg.left, seg.right)));
        intervals.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut cursor = self.domain.0;
        for (left, right) in intervals {
            if left != cursor {
                return Err(SegmentError::PartitionBroken(format!(
                    "expected an interval starting at {cursor}, found [{left}, {right}]"
                )));
            }
            cursor = right;
        }
        if cursor != self.domain.1 {
            return Err(SegmentError::PartitionBroken(format!(
                "coverage ends at {cursor}, domain ends at {}",
                self.domain.1
            )));
        }
        Ok(())
    }

    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn node(&self, id: SegmentId) -> Result<&Node, SegmentError> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
            .ok_or(SegmentError::Stale(id))
    }

    fn node_mut(&mut self, id: SegmentId) -> Result<&mut Node, SegmentError> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
            .ok_or(SegmentError::Stale(id))
    }

    /// Link a new node between two adjacent nodes (or list ends).
    fn insert_between(
        &mut self,
        prev: Option<u32>,
        next: Option<u32>,
        segment: Segment,
    ) -> Result<SegmentId, SegmentError> {
        let node = Node {
            segment,
            prev,
            next,
        };

        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index as usize].node = Some(node);
                index
            }
            None => {
                self.slots.try_reserve(1)?;
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                (self.slots.len() - 1) as u32
            }
        };

        match prev {
            Some(p) => self.link_mut(p).next = Some(index),
            None => self.head = Some(index),
        }
        match next {
            Some(n) => self.link_mut(n).prev = Some(index),
            None => self.tail = Some(index),
        }
        self.len += 1;

        Ok(SegmentId::new(index, self.slots[index as usize].generation))
    }

    /// Unlink a node and retire its slot. The caller has validated `index`.
    fn remove_node(&mut self, index: u32) {
        let slot = &mut self.slots[index as usize];
        let Some(node) = slot.node.take() else {
            return;
        };
        slot.generation = slot.generation.wrapping_add(1);

        match node.prev {
            Some(p) => self.link_mut(p).next = node.next,
            None => self.head = node.next,
        }
        match node.next {
            Some(n) => self.link_mut(n).prev = node.prev,
            None => self.tail = node.prev,
        }
        self.free.push(index);
        self.len -= 1;
    }

    fn link_mut(&mut self, index: u32) -> &mut Node {
        self.slots[index as usize]
            .node
            .as_mut()
            .unwrap_or_else(|| panic!("segment list link points at vacant slot {index}"))
    }
}

/// Iterator over outstanding segments in list order.
pub struct Iter<'a> {
    list: &'a SegmentList,
    cursor: Option<u32>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (SegmentId, &'a Segment);

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.cursor?;
        let slot = &self.list.slots[index as usize];
        let node = slot.node.as_ref()?;
        self.cursor = node.next;
        Some((SegmentId::new(index, slot.generation), &node.segment))
    }
}
