//! Dynamic overlay: the public facade over the mem index, the disk index,
//! and the tombstone registry.
//!
//! Writes land in the in-memory index; deletions are tombstones; queries fan
//! out to both sub-indices and fuse the results; a threshold-triggered
//! [`merge`](DynamicDiskIndex::merge) periodically folds everything into a
//! rebuilt disk index.
//!
//! A single readers-writer gate protects the whole overlay: searches share
//! it, mutations and the merge take it exclusively.

mod merge;

use crate::config::{IndexConfig, MemBudget};
use crate::disk::{DiskIndex, DiskIndexReader};
use crate::element::Element;
use crate::error::{IndexError, Result};
use crate::mem::VamanaMemIndex;
use crate::tombstone::TombstoneRegistry;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use tracing::{debug, warn};

/// Fixed-width search output: `indices[i]` pairs with `distances[i]`.
///
/// Unused slots hold label `0` and `f32::MAX`.
#[derive(Debug, Clone)]
pub struct QueryOutput {
    pub indices: Vec<u64>,
    pub distances: Vec<f32>,
}

struct OverlayState<T: Element, D> {
    mem: VamanaMemIndex<T>,
    disk: Option<D>,
    tombstones: TombstoneRegistry,
}

/// Dynamic disk-resident ANN index.
///
/// Generic over the stored element type (`f32`, `i8`, `u8`) and, for tests
/// and alternative readers, the disk-index implementation.
pub struct DynamicDiskIndex<T: Element, D: DiskIndex<T> = DiskIndexReader<T>> {
    config: IndexConfig,
    data_path: PathBuf,
    disk_prefix: PathBuf,
    mem_threshold: usize,
    ram_budget_gb: Option<f64>,
    state: RwLock<OverlayState<T, D>>,
}

impl<T: Element, D: DiskIndex<T>> DynamicDiskIndex<T, D> {
    /// Open (or start fresh) an overlay.
    ///
    /// A disk index already present under `disk_prefix` is loaded; a load
    /// failure at this point is non-fatal and leaves the overlay running
    /// mem-only until the first merge.
    pub fn open(
        config: IndexConfig,
        data_path: impl Into<PathBuf>,
        disk_prefix: impl Into<PathBuf>,
        budget: MemBudget,
    ) -> Result<Self> {
        let mem_threshold = budget.resolve::<T>(&config)?;
        let ram_budget_gb = match budget {
            MemBudget::RamGb(gb) => Some(gb),
            MemBudget::Points(_) => None,
        };
        let disk_prefix = disk_prefix.into();

        let mem = VamanaMemIndex::new(&config, mem_threshold * 2);
        let disk = match D::load(&disk_prefix, &config) {
            Ok(disk) => Some(disk),
            Err(e) => {
                warn!(
                    "no disk index under {}: {e}; starting mem-only",
                    disk_prefix.display()
                );
                None
            }
        };

        let mut tombstones = TombstoneRegistry::new();
        if let Some(disk) = &disk {
            tombstones.refresh_from_label_map(disk.label_to_row());
        }

        Ok(Self {
            config,
            data_path: data_path.into(),
            disk_prefix,
            mem_threshold,
            ram_budget_gb,
            state: RwLock::new(OverlayState {
                mem,
                disk,
                tombstones,
            }),
        })
    }

    /// Insert a vector under `label`.
    ///
    /// Reinserting a tombstoned label resurrects it with the new vector; the
    /// stale disk copy stays shadowed until the next merge. Crossing the mem
    /// threshold triggers a merge after the write gate is released.
    pub fn insert(&self, vector: &[T], label: u32) -> Result<()> {
        if vector.len() != self.config.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.config.dimension,
                actual: vector.len(),
            });
        }

        let crossed = {
            let mut guard = self.state.write();
            let OverlayState {
                mem,
                disk,
                tombstones,
            } = &mut *guard;

            if tombstones.is_deleted_label(label) {
                let empty = HashMap::new();
                let map = disk.as_ref().map(|d| d.label_to_row()).unwrap_or(&empty);
                // Resurrect, keeping the old disk row hidden.
                tombstones.unmark_deleted(label, map);
            }

            match mem.insert(vector, label) {
                Ok(()) => {}
                Err(IndexError::DuplicateLabel(label)) => {
                    // Mem index keeps the existing copy; observably a no-op.
                    debug!(label, "insert over live label ignored by mem index");
                }
                Err(e) => return Err(e),
            }

            mem.num_points() >= self.mem_threshold
        };

        // The gate is released before merging; a racing insert may see the
        // threshold already crossed and merge an under-full mem index, which
        // is harmless.
        if crossed {
            self.merge()?;
        }
        Ok(())
    }

    /// Tombstone `label` everywhere.
    ///
    /// Unknown labels are tolerated; the tombstone still guards against a
    /// copy surfacing from disk.
    pub fn remove(&self, label: u32) -> Result<()> {
        let mut guard = self.state.write();
        let OverlayState {
            mem,
            disk,
            tombstones,
        } = &mut *guard;

        let empty = HashMap::new();
        let map = disk.as_ref().map(|d| d.label_to_row()).unwrap_or(&empty);
        tombstones.mark_deleted(label, map);
        mem.lazy_delete(label);
        Ok(())
    }

    /// Search both sub-indices and fuse the results.
    ///
    /// Returns exactly `k` output slots. The effective beam width is
    /// `beam_width` floored by `k` and by the configured search width.
    pub fn search(&self, query: &[T], k: usize, beam_width: usize) -> Result<QueryOutput> {
        if query.len() != self.config.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.config.dimension,
                actual: query.len(),
            });
        }
        let l = beam_width.max(k).max(self.config.search_beam_width);

        let fused = {
            let state = self.state.read();

            let mut candidates: Vec<(u32, f32)> = state
                .mem
                .search_with_tags(query, k, l)
                .into_iter()
                .filter(|&(label, _)| !state.tombstones.is_deleted_label(label))
                .collect();

            if let Some(disk) = &state.disk {
                let hits = disk.search(query, k, l, usize::MAX, state.tombstones.deleted_rows());
                candidates.extend(resolve_disk_candidates::<T, D>(disk, hits, &state.tombstones));
            }

            fuse(candidates, k)
        };

        let mut output = QueryOutput {
            indices: vec![0u64; k],
            distances: vec![f32::MAX; k],
        };
        for (slot, (label, dist)) in fused.into_iter().enumerate() {
            output.indices[slot] = label as u64;
            output.distances[slot] = dist;
        }
        Ok(output)
    }

    /// Maximum graph out-degree (R).
    #[must_use]
    pub fn max_degree(&self) -> usize {
        self.config.max_degree
    }

    /// Construction beam width (L).
    #[must_use]
    pub fn build_beam_width(&self) -> usize {
        self.config.build_beam_width
    }

    /// Mem-index point count that triggers a merge.
    #[must_use]
    pub fn mem_threshold(&self) -> usize {
        self.mem_threshold
    }

    /// Active mem-index points. Test and introspection hook.
    #[must_use]
    pub fn mem_points(&self) -> usize {
        self.state.read().mem.num_points()
    }

    /// Rows in the current disk index (tombstoned rows included).
    #[must_use]
    pub fn disk_points(&self) -> usize {
        self.state
            .read()
            .disk
            .as_ref()
            .map(|d| d.num_points())
            .unwrap_or(0)
    }
}

/// Map disk rows to labels, dropping tombstoned and unresolvable results.
fn resolve_disk_candidates<T: Element, D: DiskIndex<T>>(
    disk: &D,
    hits: Vec<(u32, f32)>,
    tombstones: &TombstoneRegistry,
) -> Vec<(u32, f32)> {
    hits.into_iter()
        .filter_map(|(row, dist)| {
            if dist == f32::MAX || tombstones.is_deleted_row(row) {
                return None;
            }
            let label = disk.get_label(row)?;
            if tombstones.is_deleted_label(label) {
                return None;
            }
            Some((label, dist))
        })
        .collect()
}

/// Sort candidates by distance and deduplicate by label, keeping the first
/// (closest) occurrence; mem results precede disk results at equal distance
/// because they were appended first and the sort is stable.
fn fuse(mut candidates: Vec<(u32, f32)>, k: usize) -> Vec<(u32, f32)> {
    candidates.sort_by(|a, b| a.1.total_cmp(&b.1));
    let mut seen: HashSet<u32> = HashSet::with_capacity(k);
    let mut out = Vec::with_capacity(k);
    for (label, dist) in candidates {
        if out.len() >= k {
            break;
        }
        if seen.insert(label) {
            out.push((label, dist));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IndexError;
    use std::path::Path;

    // Mock disk index: canned rows, optionally unresolvable labels.
    struct MockDisk {
        rows: Vec<Option<u32>>, // row -> label, None = lookup fails
        map: HashMap<u32, u32>,
    }

    impl MockDisk {
        fn new(rows: Vec<Option<u32>>) -> Self {
            let map = rows
                .iter()
                .enumerate()
                .filter_map(|(row, label)| label.map(|l| (l, row as u32)))
                .collect();
            Self { rows, map }
        }
    }

    impl DiskIndex<f32> for MockDisk {
        fn load(_prefix: &Path, _config: &IndexConfig) -> Result<Self> {
            Err(IndexError::Config("mock disk cannot load".into()))
        }

        fn search(
            &self,
            _query: &[f32],
            k: usize,
            _beam_width: usize,
            _io_limit: usize,
            deleted_rows: &HashSet<u32>,
        ) -> Vec<(u32, f32)> {
            (0..self.rows.len() as u32)
                .filter(|row| !deleted_rows.contains(row))
                .map(|row| (row, row as f32))
                .take(k)
                .collect()
        }

        fn get_label(&self, row: u32) -> Option<u32> {
            self.rows.get(row as usize).copied().flatten()
        }

        fn num_points(&self) -> usize {
            self.rows.len()
        }

        fn label_to_row(&self) -> &HashMap<u32, u32> {
            &self.map
        }
    }

    #[test]
    fn resolve_drops_tombstones_and_failed_lookups() {
        let disk = MockDisk::new(vec![Some(10), None, Some(30), Some(40)]);
        let mut tombstones = TombstoneRegistry::new();
        tombstones.mark_deleted(40, disk.label_to_row());

        let hits = vec![(0, 0.0), (1, 1.0), (2, 2.0), (3, 3.0), (9, f32::MAX)];
        let resolved = resolve_disk_candidates(&disk, hits, &tombstones);

        // Row 1 has no label, label 40 is tombstoned, the MAX slot is empty.
        assert_eq!(resolved, vec![(10, 0.0), (30, 2.0)]);
    }

    #[test]
    fn fuse_dedups_by_label_keeping_closest() {
        let fused = fuse(
            vec![(7, 0.5), (8, 1.0), (7, 2.0), (9, 0.25)],
            3,
        );
        assert_eq!(fused, vec![(9, 0.25), (7, 0.5), (8, 1.0)]);
    }

    #[test]
    fn fuse_breaks_ties_by_insertion_order() {
        // Mem candidate first in the list wins the tie against disk.
        let fused = fuse(vec![(1, 1.0), (2, 1.0)], 1);
        assert_eq!(fused, vec![(1, 1.0)]);
    }

    #[test]
    fn fuse_truncates_to_k() {
        let fused = fuse(vec![(1, 1.0), (2, 2.0), (3, 3.0)], 2);
        assert_eq!(fused.len(), 2);
    }
}
