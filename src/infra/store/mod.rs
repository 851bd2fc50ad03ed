//! Deduplicating record store.
//!
//! Records are content-addressed by transaction hash. Merging keeps the first
//! occurrence of every hash and silently drops later duplicates.

pub mod json_file;

use std::collections::HashSet;

use crate::domain::TransferRecord;

pub use json_file::{JsonFileStore, StagedWrite};

/// Set of transaction hashes already present in a record collection.
///
/// Kept alive across a sync cycle so each merge costs O(incoming).
#[derive(Debug, Default, Clone)]
pub struct RecordIndex {
    seen: HashSet<String>,
}

impl RecordIndex {
    /// Build an index over `records`, dropping any duplicates they contain.
    pub fn build(records: &mut Vec<TransferRecord>) -> Self {
        let mut index = Self::default();
        records.retain(|r| index.seen.insert(r.hash.clone()));
        index
    }

    /// Append the records of `incoming` whose hash is new. Returns how many
    /// were appended.
    pub fn merge_into(
        &mut self,
        existing: &mut Vec<TransferRecord>,
        incoming: impl IntoIterator<Item = TransferRecord>,
    ) -> usize {
        let before = existing.len();
        for record in incoming {
            if self.seen.insert(record.hash.clone()) {
                existing.push(record);
            }
        }
        existing.len() - before
    }

    #[must_use]
    pub fn contains(&self, hash: &str) -> bool {
        self.seen.contains(hash)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Merge `incoming` into `existing` by transaction hash.
///
/// Returns the merged collection and the number of records taken from
/// `incoming`.
pub fn merge(
    mut existing: Vec<TransferRecord>,
    incoming: Vec<TransferRecord>,
) -> (Vec<TransferRecord>, usize) {
    let mut index = RecordIndex::build(&mut existing);
    let merged_count = index.merge_into(&mut existing, incoming);
    (existing, merged_count)
}

/// Highest block present in `records`, the sync checkpoint.
///
/// Always derived from the records themselves, never cached.
pub fn checkpoint(records: &[TransferRecord]) -> Option<u64> {
    records.iter().map(|r| r.block_number).max()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(hash: &str, block: u64) -> TransferRecord {
        TransferRecord::from_raw(hash, "0xa", "0xb", "1000", block, 1_700_000_000, 3).unwrap()
    }

    #[test]
    fn test_merge_same_window_twice_is_idempotent() {
        let window = vec![record("0x1", 10), record("0x2", 11), record("0x3", 12)];

        let (once, added_once) = merge(Vec::new(), window.clone());
        let (twice, added_twice) = merge(once.clone(), window);

        assert_eq!(added_once, 3);
        assert_eq!(added_twice, 0);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_merge_keeps_first_occurrence() {
        let existing = vec![record("0x1", 10)];
        let mut replacement = record("0x1", 99);
        replacement.to = "0xother".to_string();

        let (merged, added) = merge(existing, vec![replacement, record("0x2", 11)]);

        assert_eq!(added, 1);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].block_number, 10);
        assert_eq!(merged[0].to, "0xb");
    }

    #[test]
    fn test_merge_collapses_duplicates_inside_incoming() {
        let incoming = vec![record("0x1", 10), record("0x1", 10), record("0x2", 11)];
        let (merged, added) = merge(Vec::new(), incoming);
        assert_eq!(added, 2);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_index_build_drops_existing_duplicates() {
        let mut records = vec![record("0x1", 10), record("0x1", 10)];
        let index = RecordIndex::build(&mut records);
        assert_eq!(records.len(), 1);
        assert_eq!(index.len(), 1);
        assert!(index.contains("0x1"));
    }

    #[test]
    fn test_checkpoint_is_max_block() {
        assert_eq!(checkpoint(&[]), None);
        let records = vec![record("0x1", 40), record("0x2", 12), record("0x3", 25)];
        assert_eq!(checkpoint(&records), Some(40));
    }
}
