//! Tombstone registry: logical deletions across both sub-indices.
//!
//! Deletion is two-tiered. The label set is authoritative and survives
//! merges; the row set is a derived view over the *currently loaded* disk
//! index and is rebuilt after every load, because row ids are only stable
//! within one load generation.

use std::collections::{HashMap, HashSet};

/// Set of logically deleted labels plus the derived set of deleted rows in
/// the current on-disk index.
#[derive(Debug, Default)]
pub struct TombstoneRegistry {
    deleted_labels: HashSet<u32>,
    deleted_rows: HashSet<u32>,
}

impl TombstoneRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a label as deleted. Idempotent.
    ///
    /// If the label is present in the given disk label map, its row is added
    /// to the derived row set so the disk search stops returning it. The
    /// caller remains responsible for lazy-deleting the label from the mem
    /// index.
    pub fn mark_deleted(&mut self, label: u32, disk_label_to_row: &HashMap<u32, u32>) {
        self.deleted_labels.insert(label);
        if let Some(&row) = disk_label_to_row.get(&label) {
            self.deleted_rows.insert(row);
        }
    }

    /// Clear a label's tombstone on reinsertion.
    ///
    /// The row-level tombstone is *kept*: the disk index still holds the old
    /// vector for this label, and the fresh mem copy must shadow it until the
    /// next merge drops the stale row.
    pub fn unmark_deleted(&mut self, label: u32, disk_label_to_row: &HashMap<u32, u32>) {
        self.deleted_labels.remove(&label);
        if let Some(&row) = disk_label_to_row.get(&label) {
            self.deleted_rows.insert(row);
        }
    }

    #[must_use]
    pub fn is_deleted_label(&self, label: u32) -> bool {
        self.deleted_labels.contains(&label)
    }

    #[must_use]
    pub fn is_deleted_row(&self, row: u32) -> bool {
        self.deleted_rows.contains(&row)
    }

    /// Rebuild the derived row set from a freshly loaded disk label map.
    ///
    /// Called after every disk (re)load. The label set is untouched.
    pub fn refresh_from_label_map(&mut self, disk_label_to_row: &HashMap<u32, u32>) {
        self.deleted_rows.clear();
        for label in &self.deleted_labels {
            if let Some(&row) = disk_label_to_row.get(label) {
                self.deleted_rows.insert(row);
            }
        }
    }

    /// Rows that must not surface from the disk search.
    #[must_use]
    pub fn deleted_rows(&self) -> &HashSet<u32> {
        &self.deleted_rows
    }

    #[must_use]
    pub fn deleted_label_count(&self) -> usize {
        self.deleted_labels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(u32, u32)]) -> HashMap<u32, u32> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn mark_is_idempotent_and_tracks_rows() {
        let disk = map(&[(7, 0), (9, 1)]);
        let mut reg = TombstoneRegistry::new();

        reg.mark_deleted(7, &disk);
        reg.mark_deleted(7, &disk);
        reg.mark_deleted(100, &disk); // mem-only label, no row entry

        assert!(reg.is_deleted_label(7));
        assert!(reg.is_deleted_label(100));
        assert!(reg.is_deleted_row(0));
        assert!(!reg.is_deleted_row(1));
        assert_eq!(reg.deleted_label_count(), 2);
    }

    #[test]
    fn unmark_keeps_row_tombstone() {
        let disk = map(&[(7, 3)]);
        let mut reg = TombstoneRegistry::new();

        reg.mark_deleted(7, &disk);
        reg.unmark_deleted(7, &disk);

        // Label is live again (shadowed by a fresh mem copy), but the stale
        // disk row stays hidden until the next merge.
        assert!(!reg.is_deleted_label(7));
        assert!(reg.is_deleted_row(3));
    }

    #[test]
    fn refresh_rebuilds_rows_for_new_generation() {
        let old_disk = map(&[(7, 0)]);
        let mut reg = TombstoneRegistry::new();
        reg.mark_deleted(7, &old_disk);
        reg.mark_deleted(8, &old_disk);
        assert!(reg.is_deleted_row(0));

        // After a merge, label 7 landed at row 5 and label 8 is gone entirely.
        let new_disk = map(&[(7, 5), (1, 0)]);
        reg.refresh_from_label_map(&new_disk);

        assert!(reg.is_deleted_row(5));
        assert!(!reg.is_deleted_row(0));
        assert!(reg.is_deleted_label(7));
        assert!(reg.is_deleted_label(8));
    }
}
