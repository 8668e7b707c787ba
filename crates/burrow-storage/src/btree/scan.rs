//! Range scans over an index.
//!
//! A scan pins its current leaf between calls and walks rightward along
//! the sibling chain, holding exactly one pin in steady state and a second
//! transient pin inside each call.

use super::index::BTreeIndex;
use super::key::IndexKey;
use super::node::{LeafView, NonLeafView};
use crate::record::RecordId;
use burrow_common::page::INVALID_PAGE_NO;
use burrow_common::{BurrowError, Result};
use std::cmp::Ordering;
use tracing::trace;

/// Comparison operator bounding one end of a scan range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOp {
    /// Less than.
    LT,
    /// Less than or equal.
    LTE,
    /// Greater than or equal.
    GTE,
    /// Greater than.
    GT,
}

/// State of the one in-flight scan.
pub(crate) struct ScanState<K> {
    /// Leaf currently being scanned (0 once an empty tree's scan starts).
    pub current_page: u32,
    /// Slot to examine on the next call.
    pub next_entry: usize,
    /// Slot of the first match in the first leaf, -1 until located.
    pub start_scan_index: i32,
    pub low: K,
    pub high: K,
    pub low_op: RangeOp,
    pub high_op: RangeOp,
}

/// Outcome of examining the current leaf.
enum Step {
    /// Emit this record ID.
    Emit(RecordId),
    /// Current leaf exhausted; move to this sibling (0 = none).
    Move(u32),
    /// The high bound cuts the scan off here.
    Completed,
}

impl<K: IndexKey> BTreeIndex<K> {
    /// Begins a range scan over keys between `low` and `high`.
    ///
    /// `low_op` must be `GT` or `GTE` and `high_op` must be `LT` or `LTE`,
    /// otherwise `BadOpcodes`; `low > high` is `BadScanRange`. Starting a
    /// scan while one is live ends the previous scan first.
    pub fn start_scan(&mut self, low: K, low_op: RangeOp, high: K, high_op: RangeOp) -> Result<()> {
        if !matches!(low_op, RangeOp::GT | RangeOp::GTE)
            || !matches!(high_op, RangeOp::LT | RangeOp::LTE)
        {
            return Err(BurrowError::BadOpcodes);
        }
        if low.compare(&high) == Ordering::Greater {
            return Err(BurrowError::BadScanRange);
        }

        if self.scan.is_some() {
            self.end_scan()?;
        }

        let leaf_page = self.locate_scan_leaf(&low)?;
        self.scan = Some(ScanState {
            current_page: leaf_page,
            next_entry: 0,
            start_scan_index: -1,
            low,
            high,
            low_op,
            high_op,
        });
        trace!(index = %self.index_name, leaf = leaf_page, "scan started");
        Ok(())
    }

    /// Returns the record ID of the next entry matching the scan range.
    ///
    /// Fails with `ScanNotInitialized` without a live scan and with
    /// `IndexScanCompleted` once the range is exhausted; the latter repeats
    /// on every further call until `end_scan`.
    pub fn scan_next(&mut self) -> Result<RecordId> {
        let mut state = self.scan.take().ok_or(BurrowError::ScanNotInitialized)?;
        let result = self.scan_advance(&mut state);
        self.scan = Some(state);
        result
    }

    /// Terminates the scan, unpinning the current page.
    pub fn end_scan(&mut self) -> Result<()> {
        let state = self.scan.take().ok_or(BurrowError::ScanNotInitialized)?;
        if state.current_page != INVALID_PAGE_NO {
            self.pool
                .unpin_page(self.file.file_id(), state.current_page, false);
        }
        trace!(index = %self.index_name, "scan ended");
        Ok(())
    }

    /// Descends to the leaf where the scan should begin and leaves it
    /// pinned. An empty tree yields no page.
    fn locate_scan_leaf(&self, low: &K) -> Result<u32> {
        if self.root_page_no == INVALID_PAGE_NO {
            return Ok(INVALID_PAGE_NO);
        }

        let mut page_no = self.root_page_no;
        let mut level = self.root_level;
        while level > 0 {
            let next = {
                let guard = self.pool.read_page(&self.file, page_no)?;
                let data = guard.data();
                NonLeafView::<_, K>::new(&data[..]).route_scan(low)
            };
            if next == INVALID_PAGE_NO {
                return Err(BurrowError::Internal(format!(
                    "non-leaf {page_no} routed scan to a null child"
                )));
            }
            page_no = next;
            level -= 1;
        }

        // The scan owns one pin on its current leaf until it moves on or
        // ends.
        self.pool.fetch_page(&self.file, page_no)?;
        Ok(page_no)
    }

    fn scan_advance(&self, state: &mut ScanState<K>) -> Result<RecordId> {
        if state.current_page == INVALID_PAGE_NO {
            return Err(BurrowError::IndexScanCompleted);
        }

        let file_id = self.file.file_id();
        loop {
            let current = state.current_page;
            let frame = self.pool.fetch_page(&self.file, current)?;
            let step = {
                let data = frame.read_data();
                let leaf = LeafView::<_, K>::new(&data[..]);
                Self::step_within_leaf(state, &leaf)
            };

            match step {
                Step::Emit(rid) => {
                    self.pool.unpin_page(file_id, current, false);
                    return Ok(rid);
                }
                Step::Completed => {
                    self.pool.unpin_page(file_id, current, false);
                    return Err(BurrowError::IndexScanCompleted);
                }
                Step::Move(INVALID_PAGE_NO) => {
                    self.pool.unpin_page(file_id, current, false);
                    return Err(BurrowError::IndexScanCompleted);
                }
                Step::Move(sibling) => {
                    // Pin the sibling before releasing the old leaf, so the
                    // scan transiently holds two pins while advancing.
                    if let Err(e) = self.pool.fetch_page(&self.file, sibling) {
                        self.pool.unpin_page(file_id, current, false);
                        return Err(e);
                    }
                    self.pool.unpin_page(file_id, current, false);
                    self.pool.unpin_page(file_id, current, false);
                    state.current_page = sibling;
                    state.next_entry = 0;
                    trace!(from = current, to = sibling, "scan advanced to sibling");
                }
            }
        }
    }

    /// Advances through one leaf: skips entries below the low bound (only
    /// before the first match), stops at the high bound, and emits one
    /// record ID per call otherwise.
    fn step_within_leaf(state: &mut ScanState<K>, leaf: &LeafView<&[u8], K>) -> Step {
        loop {
            if state.next_entry >= K::LEAF_CAPACITY {
                return Step::Move(leaf.right_sibling());
            }

            let key = leaf.key_at(state.next_entry);
            if key.is_sentinel() {
                return Step::Move(leaf.right_sibling());
            }

            match key.compare(&state.high) {
                Ordering::Greater => return Step::Completed,
                Ordering::Equal if state.high_op == RangeOp::LT => return Step::Completed,
                _ => {}
            }

            if state.start_scan_index < 0 {
                let below = match key.compare(&state.low) {
                    Ordering::Less => true,
                    Ordering::Equal => state.low_op == RangeOp::GT,
                    Ordering::Greater => false,
                };
                if below {
                    state.next_entry += 1;
                    continue;
                }
                state.start_scan_index = state.next_entry as i32;
            }

            let rid = leaf.rid_at(state.next_entry);
            state.next_entry += 1;
            return Step::Emit(rid);
        }
    }
}
