//! freshann: dynamic disk-resident approximate nearest-neighbor search.
//!
//! # The Problem
//!
//! Graph-based disk indices (the Vamana/DiskANN family) serve datasets far
//! larger than RAM, but the on-disk graph is expensive to mutate: inserting
//! a point means rewriting co-located records, and deleting one means
//! repairing every in-neighbor. Naive approaches rebuild the entire index
//! per batch, which stalls writers for hours at scale.
//!
//! # Architecture
//!
//! freshann keeps the disk index immutable and layers a small dynamic
//! overlay on top:
//!
//! ```text
//! insert/remove                    search
//!      │                             │
//!      ▼                             ▼
//! ┌─────────────┐  tombstones  ┌───────────────┐
//! │  Mem index  │◄────────────►│  Coordinator  │
//! │ (Vamana, RAM)│             └──────┬────────┘
//! └──────┬──────┘                     │ fused top-k
//!        │ merge (stop-the-world)     ▼
//! ┌──────▼──────────────────────────────────────┐
//! │  Disk index (Vamana graph + PQ, immutable)  │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! - **Inserts** land in an in-memory Vamana graph sized by a point
//!   threshold or a RAM budget.
//! - **Deletes** are tombstones: a label set that survives merges, plus a
//!   per-load-generation row set the disk search filters.
//! - **Searches** fan out to both sub-indices, drop tombstoned results,
//!   deduplicate by label, and return the fused top-k.
//! - **Merge** appends the mem contents to the base data file, rebuilds the
//!   disk index family from scratch (graph, PQ codebooks, label sidecars),
//!   reloads it, and resets the mem index. Deleted rows simply do not come
//!   back.
//!
//! # Usage
//!
//! ```rust,no_run
//! use freshann::{DynamicDiskIndex, IndexConfig, MemBudget};
//!
//! # fn main() -> freshann::Result<()> {
//! let config = IndexConfig::new(128)?;
//! let index: DynamicDiskIndex<f32> = DynamicDiskIndex::open(
//!     config,
//!     "/data/base.bin",
//!     "/data/index/ann",
//!     MemBudget::RamGb(4.0),
//! )?;
//!
//! index.insert(&vec![0.1; 128], 42)?;
//! let out = index.search(&vec![0.1; 128], 10, 50)?;
//! assert_eq!(out.indices[0], 42);
//! index.remove(42)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Element Types
//!
//! The index is generic over its stored scalar: `f32` for full-precision
//! embeddings, `i8`/`u8` for pre-quantized ones. Distances are L2,
//! accumulated in `f32` on every path so mem and disk results stay
//! comparable.
//!
//! # Concurrency
//!
//! One readers-writer gate serialises mutations against queries; queries run
//! in parallel with one another. The merge is stop-the-world: readers block
//! until the rebuild finishes. There is no cross-process coordination — one
//! overlay instance owns its file family.

pub mod config;
pub mod disk;
pub mod distance;
pub mod element;
pub mod error;
pub mod io;
pub mod mem;
pub mod overlay;
pub mod tombstone;

pub use config::{BuildParams, IndexConfig, MemBudget};
pub use disk::{build_disk_index, DiskIndex, DiskIndexReader};
pub use element::Element;
pub use error::{IndexError, Result};
pub use mem::VamanaMemIndex;
pub use overlay::{DynamicDiskIndex, QueryOutput};
