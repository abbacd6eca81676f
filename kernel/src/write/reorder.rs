//! Restores the sequential order of scan output for each output of a write.

use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap};

use tracing::trace;

use crate::scan::SequenceNumber;

type Label = (u64, u64);

/// Holds row groups destined for numbered outputs until no earlier batch can still add rows to
/// their output.
///
/// Batches may arrive in any order. The buffer tracks the longest prefix of the sequential order
/// that has fully arrived (the watermark). A group whose label lies inside that prefix is
/// released; everything else waits in a min-heap belonging to its output. Groups for one output
/// are always released in label order; nothing is dropped.
#[derive(Debug)]
pub(crate) struct ReorderBuffer<T> {
    next_expected: Label,
    // Labels past the watermark that have arrived, with their end-of-fragment flag
    arrived: BTreeMap<Label, bool>,
    pending: BTreeMap<usize, BinaryHeap<Reverse<Pending<T>>>>,
    num_pending: usize,
}

#[derive(Debug)]
struct Pending<T> {
    label: Label,
    value: T,
}

impl<T> PartialEq for Pending<T> {
    fn eq(&self, other: &Self) -> bool {
        self.label == other.label
    }
}

impl<T> Eq for Pending<T> {}

impl<T> PartialOrd for Pending<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Pending<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.label.cmp(&other.label)
    }
}

impl<T> Default for ReorderBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ReorderBuffer<T> {
    pub(crate) fn new() -> Self {
        Self {
            next_expected: SequenceNumber::FIRST,
            arrived: BTreeMap::new(),
            pending: BTreeMap::new(),
            num_pending: 0,
        }
    }

    /// Records the arrival of the batch labelled `sequence`, whose rows were split into `groups`
    /// of `(output, value)`. Returns every group that can now be released, in label order per
    /// output. A batch may contribute no groups at all.
    pub(crate) fn push(
        &mut self,
        sequence: SequenceNumber,
        groups: impl IntoIterator<Item = (usize, T)>,
    ) -> Vec<(usize, T)> {
        let label = sequence.label();
        if label < self.next_expected || self.arrived.contains_key(&label) {
            // A label is only ever issued once; a repeat would break the watermark
            trace!("Ignoring repeated label {sequence}");
        } else {
            self.arrived.insert(label, sequence.last_in_fragment);
        }
        for (output, value) in groups {
            self.pending
                .entry(output)
                .or_default()
                .push(Reverse(Pending { label, value }));
            self.num_pending += 1;
        }
        self.advance();
        let released = self.release();
        if self.num_pending > 0 {
            trace!(
                "Holding {} groups; waiting for {:?}",
                self.num_pending,
                self.next_expected
            );
        }
        released
    }

    /// The number of groups waiting for earlier batches.
    pub(crate) fn num_pending(&self) -> usize {
        self.num_pending
    }

    /// The label of the earliest batch that has not arrived.
    pub(crate) fn next_expected(&self) -> Label {
        self.next_expected
    }

    /// Releases everything still held, in label order per output. Called once the input is
    /// exhausted, when there can be no more arrivals to wait for.
    pub(crate) fn drain(&mut self) -> Vec<(usize, T)> {
        self.arrived.clear();
        self.num_pending = 0;
        std::mem::take(&mut self.pending)
            .into_iter()
            .flat_map(|(output, heap)| {
                heap.into_sorted_vec()
                    .into_iter()
                    .rev()
                    .map(move |Reverse(pending)| (output, pending.value))
            })
            .collect()
    }

    fn advance(&mut self) {
        while let Some(last) = self.arrived.remove(&self.next_expected) {
            let (fragment, batch) = self.next_expected;
            self.next_expected = if last {
                (fragment + 1, 0)
            } else {
                (fragment, batch + 1)
            };
        }
    }

    fn release(&mut self) -> Vec<(usize, T)> {
        let mut released = vec![];
        for (output, heap) in self.pending.iter_mut() {
            while heap
                .peek()
                .is_some_and(|Reverse(top)| top.label < self.next_expected)
            {
                if let Some(Reverse(pending)) = heap.pop() {
                    released.push((*output, pending.value));
                }
            }
        }
        self.pending.retain(|_, heap| !heap.is_empty());
        self.num_pending -= released.len();
        released
    }
}
