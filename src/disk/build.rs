//! Disk index construction.
//!
//! `build_disk_index` is the rebuild primitive the merge invokes: it reads
//! the base data file, constructs a fresh two-pass Vamana graph over all
//! rows, trains product quantization, and writes the complete `<prefix>*`
//! file family from scratch. Any prior artifacts under the prefix are
//! overwritten.

use crate::config::{BuildParams, IndexConfig};
use crate::disk::pq;
use crate::element::Element;
use crate::error::{IndexError, Result};
use crate::io::{self, suffixed};
use crate::mem::VamanaMemIndex;
use std::path::Path;
use tracing::{debug, info};

/// Graph file suffix under the index prefix.
pub const DISK_INDEX_SUFFIX: &str = "_disk.index";
/// PQ codebook file suffix.
pub const PQ_PIVOTS_SUFFIX: &str = "_pq_pivots.bin";
/// PQ code matrix file suffix.
pub const PQ_COMPRESSED_SUFFIX: &str = "_pq_compressed.bin";
/// Authoritative labels sidecar suffix.
pub const LABELS_SUFFIX: &str = "_labels.txt";
/// Label file the builder emits (numerically recoded row ids).
pub const BUILDER_LABELS_SUFFIX: &str = "_disk.index_labels.txt";

/// Build the on-disk index family from a base data file.
///
/// `label_file` supplies the per-row labels; when absent (or missing on
/// disk), rows are labeled by their position. The builder also emits its own
/// recoded label file at `<prefix>_disk.index_labels.txt`.
pub fn build_disk_index<T: Element>(
    data_file: &Path,
    prefix: &Path,
    params: &BuildParams,
    label_file: Option<&Path>,
) -> Result<()> {
    let (data, num_points, dimension) = io::load_bin::<T>(data_file)?;
    if num_points == 0 {
        return Err(IndexError::Build(format!(
            "{}: data file holds no vectors",
            data_file.display()
        )));
    }

    let labels = match label_file {
        Some(path) if io::file_exists(path) => {
            let labels = io::read_label_file(path)?;
            if labels.len() != num_points {
                return Err(IndexError::Build(format!(
                    "label file {} has {} entries for {} rows",
                    path.display(),
                    labels.len(),
                    num_points
                )));
            }
            labels
        }
        _ => (0..num_points as u32).collect(),
    };

    let data_gb = (num_points * dimension * T::BYTES) as f64 / (1u64 << 30) as f64;
    if data_gb > params.build_ram_gb {
        debug!(
            data_gb,
            budget_gb = params.build_ram_gb,
            "data exceeds build RAM budget; building unsharded anyway"
        );
    }
    info!(
        num_points,
        dimension,
        max_degree = params.max_degree,
        "building disk index at {}",
        prefix.display()
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(params.threads)
        .build()
        .map_err(|e| IndexError::Build(format!("thread pool: {e}")))?;

    // Graph construction reuses the in-memory Vamana machinery in batch mode.
    let mut config = IndexConfig::new(dimension)?;
    config.metric = params.metric;
    config.max_degree = params.max_degree;
    config.build_beam_width = params.build_beam_width;
    config.alpha = params.alpha;
    let graph = VamanaMemIndex::<T>::build_from_rows(&config, data.clone(), labels.clone());
    let entry = graph.entry_node().unwrap_or(0);

    // PQ artifacts, regenerated from scratch on every build.
    let widened = pq::widen(&data);
    let (quantizer, codes) = pool.install(|| -> Result<_> {
        let quantizer =
            pq::ProductQuantizer::train(&widened, num_points, dimension, params.pq_ram_gb)?;
        let codes = quantizer.encode_all(&widened, num_points);
        Ok((quantizer, codes))
    })?;
    quantizer.save_pivots(&suffixed(prefix, PQ_PIVOTS_SUFFIX))?;
    pq::save_compressed(
        &suffixed(prefix, PQ_COMPRESSED_SUFFIX),
        &codes,
        num_points,
        quantizer.num_chunks(),
    )?;

    // Graph file: label + adjacency + vector per record.
    let graph_path = suffixed(prefix, DISK_INDEX_SUFFIX);
    let mut writer = super::format::GraphFileWriter::create::<T>(
        &graph_path,
        num_points,
        dimension,
        params.max_degree,
        entry,
    )?;
    for node in 0..num_points as u32 {
        writer.write_node(labels[node as usize], graph.adjacency(node), graph.row(node))?;
    }
    writer.finish()?;

    // The builder's own label map is row-id recoded; the caller restores the
    // authoritative labels over it afterwards.
    let recoded: Vec<u32> = (0..num_points as u32).collect();
    io::write_label_file(&suffixed(prefix, BUILDER_LABELS_SUFFIX), &recoded)?;

    Ok(())
}
