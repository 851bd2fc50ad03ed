//! Gap detection over persisted block coverage.
//!
//! Works only on data that has already been persisted, so it is safe to run
//! at the top of every cycle, including right after a crash.

use std::collections::BTreeSet;

use crate::domain::{BlockRange, Gap, TransferRecord};

/// Compute the ordered list of uncovered intervals.
///
/// Emits a leading gap `[origin, lowest - 1]` when the lowest observed block
/// is above `origin`, and an internal gap for every pair of consecutive
/// observed blocks more than `tolerance` apart. Blocks with no transfers are
/// normal, which is why small distances are not reported. The trailing
/// interval up to the chain head is not a gap; the loop extends to it.
pub fn find_gaps<I>(blocks: I, origin: u64, tolerance: u64) -> Vec<Gap>
where
    I: IntoIterator<Item = u64>,
{
    let observed: BTreeSet<u64> = blocks.into_iter().collect();
    let Some(&lowest) = observed.first() else {
        return Vec::new();
    };

    let mut gaps = Vec::new();
    if lowest > origin {
        gaps.extend(span(origin, lowest - 1));
    }

    let mut previous = lowest;
    for &block in observed.iter().skip(1) {
        let distance = block - previous;
        // Observed data below the origin never produces gaps below it.
        if distance > tolerance && distance >= 2 {
            gaps.extend(span((previous + 1).max(origin), block - 1));
        }
        previous = block;
    }

    gaps
}

/// [`find_gaps`] over the block numbers of a record set
pub fn find_record_gaps(records: &[TransferRecord], origin: u64, tolerance: u64) -> Vec<Gap> {
    find_gaps(records.iter().map(|r| r.block_number), origin, tolerance)
}

/// Sort `ranges` and merge the ones that overlap or touch
pub fn coalesce(mut ranges: Vec<BlockRange>) -> Vec<BlockRange> {
    ranges.sort();
    let mut merged: Vec<BlockRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        if let Some(last) = merged.last_mut() {
            if range.start() <= last.end().saturating_add(1) {
                if range.end() > last.end() {
                    *last = BlockRange::new(last.start(), range.end()).unwrap_or(*last);
                }
                continue;
            }
        }
        merged.push(range);
    }
    merged
}

fn span(start: u64, end: u64) -> Option<BlockRange> {
    BlockRange::new(start, end).ok()
}
