//! Index configuration and memory capacity planning.

use crate::distance::DistanceMetric;
use crate::element::Element;
use crate::error::{IndexError, Result};

/// Graph and search parameters shared by the mem index, the disk builder,
/// and the overlay.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct IndexConfig {
    /// Distance metric.
    pub metric: DistanceMetric,
    /// Vector dimension, fixed for the lifetime of the index.
    pub dimension: usize,
    /// Maximum out-degree per graph node (R in the DiskANN paper).
    pub max_degree: usize,
    /// Beam width during construction (L in the paper).
    pub build_beam_width: usize,
    /// Pruning aggressiveness; > 1.0 keeps long-range edges.
    pub alpha: f32,
    /// Default beam width during search.
    pub search_beam_width: usize,
    /// Concurrent sector reads per beam step in the disk search.
    pub beam_width: usize,
}

impl IndexConfig {
    /// Config with the given dimension and default graph parameters.
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(IndexError::Config("dimension must be nonzero".into()));
        }
        Ok(Self {
            metric: DistanceMetric::L2,
            dimension,
            max_degree: 32,
            build_beam_width: 100,
            alpha: 1.2,
            search_beam_width: 100,
            beam_width: 4,
        })
    }
}

/// How the in-memory index is sized: an explicit point threshold, or a RAM
/// budget from which the threshold is derived.
#[derive(Debug, Clone, Copy)]
pub enum MemBudget {
    /// Merge once the mem index holds this many points.
    Points(usize),
    /// Total RAM budget in GiB; a fixed fraction is reserved for the mem
    /// index, the rest for disk-index cache and transients.
    RamGb(f64),
}

/// Multiplier covering allocator and bookkeeping overhead per point.
const OVERHEAD_FACTOR: f64 = 1.1;
/// Adjacency lists are over-allocated by this factor during insertion.
const GRAPH_SLACK_FACTOR: f64 = 1.3;
/// Fraction of the RAM budget granted to the mem index.
const DYNAMIC_INDEX_RATIO: f64 = 0.2;
/// Per-point lock and indirection costs in the mem index accounting.
const MUTEX_BYTES: usize = 40;
const POINTER_BYTES: usize = 8;

/// Estimated resident bytes per point in the mem index.
#[must_use]
pub fn per_point_bytes<T: Element>(dimension: usize, degree: usize) -> f64 {
    let data = dimension.div_ceil(8) * 8 * T::BYTES;
    let graph = degree as f64 * 4.0 * GRAPH_SLACK_FACTOR;
    OVERHEAD_FACTOR * (data as f64 + graph + (MUTEX_BYTES + POINTER_BYTES) as f64)
}

/// Derive the mem-index point threshold from a RAM budget in bytes.
#[must_use]
pub fn threshold_for_budget<T: Element>(
    ram_budget_bytes: u64,
    dimension: usize,
    degree: usize,
) -> usize {
    let budget = ram_budget_bytes as f64 * DYNAMIC_INDEX_RATIO;
    (budget / per_point_bytes::<T>(dimension, degree)).floor() as usize
}

impl MemBudget {
    /// Resolve to a concrete point threshold.
    ///
    /// Fails at construction time if the threshold is explicit but zero, or
    /// if the budget cannot hold a single point.
    pub fn resolve<T: Element>(self, config: &IndexConfig) -> Result<usize> {
        match self {
            MemBudget::Points(0) => {
                Err(IndexError::Config("mem threshold must be nonzero".into()))
            }
            MemBudget::Points(n) => Ok(n),
            MemBudget::RamGb(gb) => {
                if !(gb > 0.0) {
                    return Err(IndexError::Config("RAM budget must be positive".into()));
                }
                let bytes = (gb * (1u64 << 30) as f64) as u64;
                let threshold =
                    threshold_for_budget::<T>(bytes, config.dimension, config.max_degree);
                if threshold == 0 {
                    return Err(IndexError::Config(format!(
                        "RAM budget of {gb} GiB cannot hold a single point at dimension {}",
                        config.dimension
                    )));
                }
                Ok(threshold)
            }
        }
    }
}

/// Parameters handed to the disk-index builder.
#[derive(Debug, Clone)]
pub struct BuildParams {
    pub max_degree: usize,
    pub build_beam_width: usize,
    pub alpha: f32,
    pub metric: DistanceMetric,
    /// Build-time working-set budget in GiB.
    pub build_ram_gb: f64,
    /// PQ training working-set budget in GiB.
    pub pq_ram_gb: f64,
    /// Worker threads for the parallelizable build stages.
    pub threads: usize,
}

impl BuildParams {
    /// Derive builder parameters from the index config and the caller's RAM
    /// budget (if one was given; explicit-threshold indices get the floors).
    #[must_use]
    pub fn derive(config: &IndexConfig, ram_budget_gb: Option<f64>) -> Self {
        let ram = ram_budget_gb.unwrap_or(0.0);
        Self {
            max_degree: config.max_degree,
            build_beam_width: config.build_beam_width,
            alpha: config.alpha,
            metric: config.metric,
            build_ram_gb: (ram * 0.7).max(0.003),
            pq_ram_gb: (ram * 0.7).max(0.001),
            threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_threshold_wins() {
        let config = IndexConfig::new(16).unwrap();
        assert_eq!(MemBudget::Points(50).resolve::<f32>(&config).unwrap(), 50);
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let config = IndexConfig::new(16).unwrap();
        assert!(MemBudget::Points(0).resolve::<f32>(&config).is_err());
    }

    #[test]
    fn budget_derivation_matches_formula() {
        let config = IndexConfig::new(16).unwrap();
        let threshold = MemBudget::RamGb(5e-5).resolve::<f32>(&config).unwrap();

        let bytes = (5e-5 * (1u64 << 30) as f64) as u64;
        let expected = (bytes as f64 * 0.2 / per_point_bytes::<f32>(16, 32)).floor() as usize;
        assert_eq!(threshold, expected);
        assert!(threshold > 0);
    }

    #[test]
    fn starvation_budget_is_rejected() {
        let config = IndexConfig::new(1024).unwrap();
        assert!(MemBudget::RamGb(1e-9).resolve::<f32>(&config).is_err());
    }

    #[test]
    fn build_params_floors() {
        let config = IndexConfig::new(16).unwrap();
        let params = BuildParams::derive(&config, None);
        assert_eq!(params.build_ram_gb, 0.003);
        assert_eq!(params.pq_ram_gb, 0.001);
        assert!(params.threads >= 1);

        let params = BuildParams::derive(&config, Some(2.0));
        assert!((params.build_ram_gb - 1.4).abs() < 1e-9);
    }
}
