//! Read side of the on-disk index.
//!
//! The graph file is memory-mapped so shared-gate readers can search
//! concurrently without seeking a shared file handle. PQ codes live in
//! memory and steer the beam; exact distances are computed only for the
//! records the beam actually expands.

use crate::config::IndexConfig;
use crate::distance::l2_distance;
use crate::element::{self, Element};
use crate::error::{IndexError, Result};
use crate::io::{self, suffixed};
use memmap2::Mmap;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::marker::PhantomData;
use std::path::Path;
use tracing::{debug, warn};

use super::build::{DISK_INDEX_SUFFIX, LABELS_SUFFIX, PQ_COMPRESSED_SUFFIX, PQ_PIVOTS_SUFFIX};
use super::format::{self, GraphHeader};
use super::pq::{self, ProductQuantizer};

/// Contract the overlay holds the disk index to.
///
/// The default implementation is [`DiskIndexReader`]; tests inject mocks,
/// and an async-capable reader can slot in behind the same surface.
pub trait DiskIndex<T: Element>: Send + Sync + Sized {
    /// Load the index family under `prefix`.
    fn load(prefix: &Path, config: &IndexConfig) -> Result<Self>;

    /// Beam search for up to `k` rows with a frontier of width `l`.
    ///
    /// Rows in `deleted_rows` are traversed but never returned. At most
    /// `io_limit` records are expanded. Results are `(row, distance)`
    /// ascending; fewer than `k` may return.
    fn search(
        &self,
        query: &[T],
        k: usize,
        l: usize,
        io_limit: usize,
        deleted_rows: &HashSet<u32>,
    ) -> Vec<(u32, f32)>;

    /// Label of a row, if the row exists and its label is known.
    fn get_label(&self, row: u32) -> Option<u32>;

    /// Total rows in this load generation, deleted or not.
    fn num_points(&self) -> usize;

    /// Label-to-row correspondence for this load generation.
    fn label_to_row(&self) -> &HashMap<u32, u32>;
}

/// Memory-mapped reader over the `<prefix>*` file family.
pub struct DiskIndexReader<T: Element> {
    mmap: Mmap,
    header: GraphHeader,
    row_to_label: Vec<Option<u32>>,
    label_to_row: HashMap<u32, u32>,
    quantizer: ProductQuantizer,
    pq_codes: Vec<u8>,
    // Records expanded per beam step.
    beam_width: usize,
    _marker: PhantomData<T>,
}

/// Search candidate ordered by PQ distance.
#[derive(Clone, Copy)]
struct Candidate {
    row: u32,
    approx: f32,
    expanded: bool,
}

impl<T: Element> DiskIndexReader<T> {
    fn pq_distance(&self, table: &[f32], row: u32) -> f32 {
        let chunks = self.quantizer.num_chunks();
        let codes = &self.pq_codes[row as usize * chunks..(row as usize + 1) * chunks];
        self.quantizer.table_distance(table, codes)
    }

    fn record(&self, row: u32) -> Result<format::NodeRecord<'_>> {
        format::read_record(&self.mmap, &self.header, row)
    }
}

/// Build the label↔row correspondence for a load generation.
///
/// Prefers the labels sidecar when its length matches the row count;
/// otherwise falls back to the labels embedded in the graph records,
/// skipping rows whose record cannot be decoded.
///
/// The base data file is append-only, so a reinserted label can occupy two
/// rows. The newest row owns the label; older duplicates get no label at
/// all, which makes the query coordinator drop them.
fn build_label_map(
    bytes: &[u8],
    header: &GraphHeader,
    prefix: &Path,
) -> Result<(Vec<Option<u32>>, HashMap<u32, u32>)> {
    let sidecar = suffixed(prefix, LABELS_SUFFIX);
    let num_nodes = header.num_nodes;

    let mut row_to_label: Vec<Option<u32>>;
    let mut label_to_row: HashMap<u32, u32> = HashMap::with_capacity(num_nodes);

    let sidecar_labels = if io::file_exists(&sidecar) {
        let labels = io::read_label_file(&sidecar)?;
        if labels.len() == num_nodes {
            Some(labels)
        } else {
            warn!(
                sidecar_len = labels.len(),
                num_nodes,
                "labels sidecar length disagrees with disk index; \
                 falling back to per-record labels"
            );
            None
        }
    } else {
        None
    };

    match sidecar_labels {
        Some(labels) => {
            row_to_label = labels.iter().map(|&l| Some(l)).collect();
            for (row, &label) in labels.iter().enumerate() {
                label_to_row.insert(label, row as u32);
            }
        }
        None => {
            row_to_label = vec![None; num_nodes];
            for row in 0..num_nodes as u32 {
                let label = match format::read_record(bytes, header, row) {
                    Ok(rec) => rec.label,
                    Err(e) => {
                        debug!(row, "skipping unreadable record during label scan: {e}");
                        continue;
                    }
                };
                row_to_label[row as usize] = Some(label);
                label_to_row.insert(label, row);
            }
        }
    }

    // Disown superseded duplicates: the map points at the newest row.
    for (row, slot) in row_to_label.iter_mut().enumerate() {
        if let Some(label) = *slot {
            if label_to_row.get(&label) != Some(&(row as u32)) {
                *slot = None;
            }
        }
    }

    Ok((row_to_label, label_to_row))
}

impl<T: Element> DiskIndex<T> for DiskIndexReader<T> {
    fn load(prefix: &Path, config: &IndexConfig) -> Result<Self> {
        let graph_path = suffixed(prefix, DISK_INDEX_SUFFIX);
        let file = File::open(&graph_path)?;
        // Safety: the file family is only rewritten under the overlay's
        // exclusive gate, after this handle has been dropped.
        let mmap = unsafe { Mmap::map(&file)? };

        let header = GraphHeader::parse(&mmap)?;
        if header.dimension != config.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: config.dimension,
                actual: header.dimension,
            });
        }
        if header.elem_bytes != T::BYTES {
            return Err(IndexError::Format(format!(
                "{}: element width {} does not match index type ({})",
                graph_path.display(),
                header.elem_bytes,
                T::BYTES
            )));
        }
        let expected = format::HEADER_BYTES + header.num_nodes * header.record_bytes();
        if mmap.len() < expected {
            return Err(IndexError::Format(format!(
                "{}: {} bytes, need {expected}",
                graph_path.display(),
                mmap.len()
            )));
        }

        let quantizer = ProductQuantizer::load_pivots(&suffixed(prefix, PQ_PIVOTS_SUFFIX))?;
        let (pq_codes, code_rows, code_chunks) =
            pq::load_compressed(&suffixed(prefix, PQ_COMPRESSED_SUFFIX))?;
        if code_rows != header.num_nodes || code_chunks != quantizer.num_chunks() {
            return Err(IndexError::Format(format!(
                "PQ codes are {code_rows}x{code_chunks}, index needs {}x{}",
                header.num_nodes,
                quantizer.num_chunks()
            )));
        }

        let (row_to_label, label_to_row) = build_label_map(&mmap, &header, prefix)?;
        Ok(Self {
            mmap,
            header,
            row_to_label,
            label_to_row,
            quantizer,
            pq_codes,
            beam_width: config.beam_width.max(1),
            _marker: PhantomData,
        })
    }

    fn search(
        &self,
        query: &[T],
        k: usize,
        l: usize,
        io_limit: usize,
        deleted_rows: &HashSet<u32>,
    ) -> Vec<(u32, f32)> {
        if self.header.num_nodes == 0 || query.len() != self.header.dimension {
            return Vec::new();
        }
        let l = l.max(k);

        let widened: Vec<f32> = query.iter().map(|v| v.to_f32()).collect();
        let table = self.quantizer.adc_table(&widened);

        let entry = self.header.entry.min(self.header.num_nodes as u32 - 1);
        let mut visited: HashSet<u32> = HashSet::new();
        let mut frontier: Vec<Candidate> = vec![Candidate {
            row: entry,
            approx: self.pq_distance(&table, entry),
            expanded: false,
        }];
        visited.insert(entry);

        let mut results: Vec<(u32, f32)> = Vec::new();
        let mut expansions = 0usize;

        loop {
            frontier.sort_by(|a, b| a.approx.total_cmp(&b.approx));
            frontier.truncate(l);

            let batch: Vec<u32> = frontier
                .iter_mut()
                .filter(|c| !c.expanded)
                .take(self.beam_width)
                .map(|c| {
                    c.expanded = true;
                    c.row
                })
                .collect();
            if batch.is_empty() || expansions >= io_limit {
                break;
            }

            for row in batch {
                if expansions >= io_limit {
                    break;
                }
                let Ok(rec) = self.record(row) else {
                    continue;
                };
                expansions += 1;

                let Ok(vector) =
                    element::decode_slice::<T>(rec.vector_bytes, self.header.dimension)
                else {
                    continue;
                };
                results.push((row, l2_distance(query, &vector)));

                for nb in rec.neighbors {
                    if nb as usize >= self.header.num_nodes || !visited.insert(nb) {
                        continue;
                    }
                    frontier.push(Candidate {
                        row: nb,
                        approx: self.pq_distance(&table, nb),
                        expanded: false,
                    });
                }
            }
        }

        results.sort_by(|a, b| a.1.total_cmp(&b.1));
        results.retain(|(row, _)| !deleted_rows.contains(row));
        results.truncate(k);
        results
    }

    fn get_label(&self, row: u32) -> Option<u32> {
        self.row_to_label.get(row as usize).copied().flatten()
    }

    fn num_points(&self) -> usize {
        self.header.num_nodes
    }

    fn label_to_row(&self) -> &HashMap<u32, u32> {
        &self.label_to_row
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BuildParams;
    use crate::disk::build::build_disk_index;
    use std::path::PathBuf;

    fn line_vectors(n: usize, d: usize) -> Vec<f32> {
        // Distinct, well-spread points on a line with per-axis jitter.
        let mut data = Vec::with_capacity(n * d);
        for i in 0..n {
            for j in 0..d {
                data.push(i as f32 * 3.0 + (j as f32 * 0.1));
            }
        }
        data
    }

    fn built_index(dir: &Path, n: usize, d: usize) -> (PathBuf, Vec<f32>, Vec<u32>) {
        let data = line_vectors(n, d);
        let labels: Vec<u32> = (0..n as u32).map(|i| 1000 + i).collect();

        let data_path = dir.join("base.bin");
        io::save_bin(&data_path, &data, n, d).unwrap();
        let prefix = dir.join("idx");
        io::write_label_file(&suffixed(&prefix, LABELS_SUFFIX), &labels).unwrap();

        let config = IndexConfig::new(d).unwrap();
        let params = BuildParams::derive(&config, None);
        build_disk_index::<f32>(
            &data_path,
            &prefix,
            &params,
            Some(&suffixed(&prefix, LABELS_SUFFIX)),
        )
        .unwrap();
        (prefix, data, labels)
    }

    #[test]
    fn build_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let (prefix, _, labels) = built_index(dir.path(), 50, 8);

        let config = IndexConfig::new(8).unwrap();
        let reader = DiskIndexReader::<f32>::load(&prefix, &config).unwrap();

        assert_eq!(reader.num_points(), 50);
        assert_eq!(reader.get_label(0), Some(labels[0]));
        assert_eq!(reader.label_to_row().len(), 50);
        assert_eq!(reader.label_to_row()[&1049], 49);
    }

    #[test]
    fn search_recalls_inserted_rows() {
        let dir = tempfile::tempdir().unwrap();
        let (prefix, data, _) = built_index(dir.path(), 60, 8);

        let config = IndexConfig::new(8).unwrap();
        let reader = DiskIndexReader::<f32>::load(&prefix, &config).unwrap();

        let none = HashSet::new();
        let mut hits = 0;
        for row in [0usize, 17, 42, 59] {
            let query = &data[row * 8..(row + 1) * 8];
            let results = reader.search(query, 1, 50, usize::MAX, &none);
            if results.first().map(|&(r, _)| r as usize) == Some(row) {
                hits += 1;
            }
        }
        assert_eq!(hits, 4);
    }

    #[test]
    fn deleted_rows_never_surface() {
        let dir = tempfile::tempdir().unwrap();
        let (prefix, data, _) = built_index(dir.path(), 40, 8);

        let config = IndexConfig::new(8).unwrap();
        let reader = DiskIndexReader::<f32>::load(&prefix, &config).unwrap();

        let query = &data[5 * 8..6 * 8];
        let deleted: HashSet<u32> = [5u32].into_iter().collect();
        let results = reader.search(query, 10, 50, usize::MAX, &deleted);
        assert!(!results.is_empty());
        assert!(results.iter().all(|&(row, _)| row != 5));
    }

    #[test]
    fn io_limit_caps_expansions() {
        let dir = tempfile::tempdir().unwrap();
        let (prefix, data, _) = built_index(dir.path(), 40, 8);

        let config = IndexConfig::new(8).unwrap();
        let reader = DiskIndexReader::<f32>::load(&prefix, &config).unwrap();

        let none = HashSet::new();
        let results = reader.search(&data[0..8], 10, 50, 2, &none);
        assert!(results.len() <= 2);
    }

    #[test]
    fn missing_sidecar_falls_back_to_record_labels() {
        let dir = tempfile::tempdir().unwrap();
        let (prefix, _, labels) = built_index(dir.path(), 30, 8);

        std::fs::remove_file(suffixed(&prefix, LABELS_SUFFIX)).unwrap();

        let config = IndexConfig::new(8).unwrap();
        let reader = DiskIndexReader::<f32>::load(&prefix, &config).unwrap();
        assert_eq!(reader.get_label(3), Some(labels[3]));
        assert_eq!(reader.label_to_row().len(), 30);
    }

    #[test]
    fn short_sidecar_falls_back_to_record_labels() {
        let dir = tempfile::tempdir().unwrap();
        let (prefix, _, labels) = built_index(dir.path(), 30, 8);

        // Corrupt the sidecar to half length; embedded labels still win.
        io::write_label_file(&suffixed(&prefix, LABELS_SUFFIX), &labels[..15]).unwrap();

        let config = IndexConfig::new(8).unwrap();
        let reader = DiskIndexReader::<f32>::load(&prefix, &config).unwrap();
        assert_eq!(reader.get_label(20), Some(labels[20]));
    }

    #[test]
    fn superseded_duplicate_rows_lose_their_label() {
        let dir = tempfile::tempdir().unwrap();
        let n = 20;
        let data = line_vectors(n, 8);
        // Label 10 appears twice; the later row owns it.
        let mut labels: Vec<u32> = (0..n as u32).map(|i| 100 + i).collect();
        labels[3] = 10;
        labels[15] = 10;

        let data_path = dir.path().join("base.bin");
        io::save_bin(&data_path, &data, n, 8).unwrap();
        let prefix = dir.path().join("idx");
        let sidecar = suffixed(&prefix, LABELS_SUFFIX);
        io::write_label_file(&sidecar, &labels).unwrap();

        let config = IndexConfig::new(8).unwrap();
        let params = BuildParams::derive(&config, None);
        build_disk_index::<f32>(&data_path, &prefix, &params, Some(&sidecar)).unwrap();

        let reader = DiskIndexReader::<f32>::load(&prefix, &config).unwrap();
        assert_eq!(reader.get_label(3), None);
        assert_eq!(reader.get_label(15), Some(10));
        assert_eq!(reader.label_to_row()[&10], 15);
    }

    #[test]
    fn wrong_element_width_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (prefix, _, _) = built_index(dir.path(), 20, 8);

        let config = IndexConfig::new(8).unwrap();
        assert!(DiskIndexReader::<u8>::load(&prefix, &config).is_err());
    }
}
