//! Merge: fold the mem index and the tombstones into a rebuilt disk index.
//!
//! Stop-the-world under the exclusive gate. The sequence appends the mem
//! snapshot to the base data file, reconciles the labels sidecar, rebuilds
//! the disk index family from scratch, reloads it, and resets the mem index.
//!
//! The merge is not transactional: a failure after the data-file append
//! leaves the base file ahead of the index, and the instance should be
//! treated as corrupted. Each step is a named function so a staged
//! (write-to-temp-prefix, rename-on-success) variant can slot in later.

use super::DynamicDiskIndex;
use crate::config::BuildParams;
use crate::disk::{
    build_disk_index, DiskIndex, BUILDER_LABELS_SUFFIX, LABELS_SUFFIX, PQ_COMPRESSED_SUFFIX,
    PQ_PIVOTS_SUFFIX,
};
use crate::element::{self, Element};
use crate::error::{IndexError, Result};
use crate::io::{self, suffixed};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use tracing::{error, info, warn};

/// Suffix of the transient mem-index snapshot under the disk prefix.
const TEMP_MEM_SUFFIX: &str = "_temp_mem.index";

impl<T: Element, D: DiskIndex<T>> DynamicDiskIndex<T, D> {
    /// Rebuild the disk index from the base data file plus the current mem
    /// contents, then reset the mem index.
    ///
    /// Takes the gate exclusively for the whole rebuild; concurrent searches
    /// block until it completes.
    pub fn merge(&self) -> Result<()> {
        let mut guard = self.state.write();
        let state = &mut *guard;

        // Consolidate, then snapshot the active points.
        state.mem.consolidate_deletes()?;
        let num_active = state.mem.num_points();
        let temp_prefix = suffixed(&self.disk_prefix, TEMP_MEM_SUFFIX);
        state.mem.save(&temp_prefix)?;

        info!(
            num_active,
            tombstones = state.tombstones.deleted_label_count(),
            "merging into {}",
            self.disk_prefix.display()
        );

        let old_rows = append_snapshot::<T>(
            &self.data_path,
            &suffixed(&temp_prefix, ".data"),
            self.config.dimension,
        )?;
        reconcile_label_sidecar(
            &suffixed(&self.disk_prefix, LABELS_SUFFIX),
            old_rows,
            &suffixed(&temp_prefix, ".tags"),
        )?;

        // Release the old handle before touching its files.
        state.disk = None;
        remove_stale_pq(&self.disk_prefix)?;

        let total_rows = old_rows + num_active;
        // The builder rejects empty inputs; with no rows anywhere there is
        // no index to rebuild and the disk handle stays absent.
        if total_rows > 0 {
            let params = BuildParams::derive(&self.config, self.ram_budget_gb);
            let labels_path = suffixed(&self.disk_prefix, LABELS_SUFFIX);
            build_disk_index::<T>(
                &self.data_path,
                &self.disk_prefix,
                &params,
                Some(&labels_path),
            )
            .map_err(|e| IndexError::Merge(format!("disk rebuild: {e}")))?;

            // The builder recodes its own label file; the sidecar stays
            // authoritative.
            std::fs::copy(
                &labels_path,
                suffixed(&self.disk_prefix, BUILDER_LABELS_SUFFIX),
            )?;

            let disk = D::load(&self.disk_prefix, &self.config)
                .map_err(|e| IndexError::Merge(format!("reload after rebuild: {e}")))?;
            state.disk = Some(disk);
        }

        state.mem.init_empty();

        let empty = HashMap::new();
        let map = state
            .disk
            .as_ref()
            .map(|d| d.label_to_row())
            .unwrap_or(&empty);
        state.tombstones.refresh_from_label_map(map);

        cleanup_temp(&temp_prefix);
        info!(total_rows, "merge complete");
        Ok(())
    }
}

/// Append the snapshot's vectors to the base data file and bump its header
/// row count. Returns the row count before the append.
///
/// A missing or sub-header-size file is (re)initialised. A header dimension
/// of zero is an uninitialised file and is overridden; any other mismatch is
/// fatal.
fn append_snapshot<T: Element>(
    data_path: &Path,
    snapshot_data: &Path,
    dimension: usize,
) -> Result<usize> {
    let (snapshot, snap_rows, snap_dim) = io::load_bin::<T>(snapshot_data)?;
    if snap_rows > 0 && snap_dim != dimension {
        return Err(IndexError::DimensionMismatch {
            expected: dimension,
            actual: snap_dim,
        });
    }

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(data_path)?;

    let len = file.metadata()?.len();
    let old_rows = if len < io::BIN_HEADER_BYTES {
        // New or unusable file: start over with a fresh header.
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        io::write_bin_header(&mut file, 0, dimension as u32)?;
        0
    } else {
        let (n, d) = io::read_bin_header(&mut file)?;
        if d as usize != dimension && d != 0 {
            return Err(IndexError::DimensionMismatch {
                expected: dimension,
                actual: d as usize,
            });
        }
        n as usize
    };

    file.seek(SeekFrom::End(0))?;
    file.write_all(&element::encode_slice(&snapshot))?;

    file.seek(SeekFrom::Start(0))?;
    io::write_bin_header(&mut file, (old_rows + snap_rows) as u32, dimension as u32)?;
    file.sync_all()?;
    Ok(old_rows)
}

/// Bring the labels sidecar in line with the data file: `old_rows` existing
/// labels followed by the snapshot's tags.
///
/// A short sidecar means labels were lost in a prior incident; it is padded
/// with sequential row ids so the merge can proceed, and loudly logged. An
/// over-long sidecar is truncated.
fn reconcile_label_sidecar(
    sidecar: &Path,
    old_rows: usize,
    snapshot_tags: &Path,
) -> Result<usize> {
    let mut labels = if io::file_exists(sidecar) {
        io::read_label_file(sidecar)?
    } else {
        Vec::new()
    };

    if labels.len() < old_rows {
        error!(
            have = labels.len(),
            need = old_rows,
            "labels sidecar shorter than data file; padding with row ids"
        );
        labels.extend(labels.len() as u32..old_rows as u32);
    } else if labels.len() > old_rows {
        warn!(
            have = labels.len(),
            need = old_rows,
            "labels sidecar longer than data file; truncating"
        );
        labels.truncate(old_rows);
    }

    let (tags, tag_rows, _) = io::load_bin::<u32>(snapshot_tags)?;
    debug_assert_eq!(tags.len(), tag_rows);
    labels.extend_from_slice(&tags);

    io::write_label_file(sidecar, &labels)?;
    Ok(labels.len())
}

/// Drop the PQ artifacts so the builder regenerates them with the current
/// chunk configuration.
fn remove_stale_pq(prefix: &Path) -> Result<()> {
    for suffix in [PQ_PIVOTS_SUFFIX, PQ_COMPRESSED_SUFFIX] {
        let path = suffixed(prefix, suffix);
        if io::file_exists(&path) {
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}

/// Best-effort removal of the three snapshot files.
fn cleanup_temp(temp_prefix: &Path) {
    for path in [
        temp_prefix.to_path_buf(),
        suffixed(temp_prefix, ".data"),
        suffixed(temp_prefix, ".tags"),
    ] {
        if let Err(e) = std::fs::remove_file(&path) {
            warn!("leaving temp file {}: {e}", path.display());
        }
    }
}
