//! Mutable in-memory Vamana index.
//!
//! Absorbs insertions between merges. Points are addressed by caller labels
//! (tags); deletion is lazy, with physical removal deferred to
//! [`VamanaMemIndex::consolidate_deletes`], which the merge runs before
//! snapshotting.
//!
//! Insertion is incremental: a greedy search seeds the candidate pool, robust
//! pruning picks the new node's out-edges, and reverse edges are added with
//! the same pruning applied to any neighbor that overflows its degree bound.

use crate::config::IndexConfig;
use crate::distance::l2_distance;
use crate::element::Element;
use crate::error::{IndexError, Result};
use crate::io::{self, suffixed};
use rand::seq::SliceRandom;
use rand::Rng;
use smallvec::SmallVec;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Candidate for search frontiers and pruning pools.
#[derive(Clone, Copy, PartialEq)]
struct Candidate {
    node: u32,
    dist: f32,
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // total_cmp for IEEE 754 total ordering (NaN-safe)
        self.dist.total_cmp(&other.dist)
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Mutable tagged Vamana graph held entirely in memory.
pub struct VamanaMemIndex<T: Element> {
    dimension: usize,
    max_degree: usize,
    build_beam_width: usize,
    alpha: f32,

    // Row-major vector storage; node id = row position. Lazy-deleted nodes
    // keep their row until consolidation.
    vectors: Vec<T>,
    tags: Vec<u32>,
    adj: Vec<SmallVec<[u32; 32]>>,

    label_to_node: HashMap<u32, u32>,
    deleted_nodes: HashSet<u32>,
    entry: Option<u32>,
}

impl<T: Element> VamanaMemIndex<T> {
    /// Empty index sized for `max_points` (capacity hint only; the index
    /// grows past it rather than rejecting writes).
    pub fn new(config: &IndexConfig, max_points: usize) -> Self {
        Self {
            dimension: config.dimension,
            max_degree: config.max_degree,
            build_beam_width: config.build_beam_width,
            alpha: config.alpha,
            vectors: Vec::with_capacity(max_points.saturating_mul(config.dimension)),
            tags: Vec::with_capacity(max_points),
            adj: Vec::with_capacity(max_points),
            label_to_node: HashMap::new(),
            deleted_nodes: HashSet::new(),
            entry: None,
        }
    }

    /// Build a static graph over pre-collected rows.
    ///
    /// Used by the disk builder: same pruning machinery, batch two-pass
    /// construction instead of incremental linking.
    pub(crate) fn build_from_rows(config: &IndexConfig, vectors: Vec<T>, tags: Vec<u32>) -> Self {
        let mut index = Self::new(config, tags.len());
        index.vectors = vectors;
        index.label_to_node = tags
            .iter()
            .enumerate()
            .map(|(node, &label)| (label, node as u32))
            .collect();
        index.tags = tags;
        index.rebuild_graph();
        index
    }

    pub(crate) fn adjacency(&self, node: u32) -> &[u32] {
        &self.adj[node as usize]
    }

    pub(crate) fn entry_node(&self) -> Option<u32> {
        self.entry
    }

    pub(crate) fn row(&self, node: u32) -> &[T] {
        self.vector(node)
    }

    /// Number of active (not lazy-deleted) points.
    #[must_use]
    pub fn num_points(&self) -> usize {
        self.label_to_node.len()
    }

    /// Reset to the empty state, keeping allocations where possible.
    pub fn init_empty(&mut self) {
        self.vectors.clear();
        self.tags.clear();
        self.adj.clear();
        self.label_to_node.clear();
        self.deleted_nodes.clear();
        self.entry = None;
    }

    /// Insert a vector under `label`.
    ///
    /// A label that is already live returns [`IndexError::DuplicateLabel`];
    /// the caller decides whether that is fatal. Reinserting a lazy-deleted
    /// label maps it to a fresh node, leaving the old row for consolidation.
    pub fn insert(&mut self, vector: &[T], label: u32) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        if self.label_to_node.contains_key(&label) {
            return Err(IndexError::DuplicateLabel(label));
        }

        let node = self.node_count() as u32;
        self.vectors.extend_from_slice(vector);
        self.tags.push(label);
        self.adj.push(SmallVec::new());
        self.label_to_node.insert(label, node);

        self.link(node);

        // A dead or absent entry point would strand the new node.
        match self.entry {
            Some(e) if !self.deleted_nodes.contains(&e) => {}
            _ => self.entry = Some(node),
        }
        Ok(())
    }

    /// Mark `label` as deleted. Absent labels are tolerated.
    pub fn lazy_delete(&mut self, label: u32) {
        let Some(node) = self.label_to_node.remove(&label) else {
            return;
        };
        self.deleted_nodes.insert(node);
        if self.entry == Some(node) {
            self.entry = self.label_to_node.values().next().map(|&n| n);
        }
    }

    /// Physically remove lazy-deleted rows and rebuild the graph over the
    /// survivors. Returns the number of rows removed.
    pub fn consolidate_deletes(&mut self) -> Result<usize> {
        if self.deleted_nodes.is_empty() {
            return Ok(0);
        }
        let removed = self.deleted_nodes.len();

        let old_count = self.node_count();
        let mut vectors = Vec::with_capacity(self.num_points() * self.dimension);
        let mut tags = Vec::with_capacity(self.num_points());
        for node in 0..old_count as u32 {
            if self.deleted_nodes.contains(&node) {
                continue;
            }
            vectors.extend_from_slice(self.vector(node));
            tags.push(self.tags[node as usize]);
        }

        self.vectors = vectors;
        self.tags = tags;
        self.deleted_nodes.clear();
        self.label_to_node = self
            .tags
            .iter()
            .enumerate()
            .map(|(node, &label)| (label, node as u32))
            .collect();

        self.rebuild_graph();
        Ok(removed)
    }

    /// Search for up to `k` nearest active points.
    ///
    /// Lazy-deleted entries are traversed (they still carry edges) but never
    /// returned. Results are `(label, distance)` sorted ascending.
    #[must_use]
    pub fn search_with_tags(&self, query: &[T], k: usize, beam_width: usize) -> Vec<(u32, f32)> {
        let Some(entry) = self.entry else {
            return Vec::new();
        };
        if query.len() != self.dimension {
            return Vec::new();
        }

        let l = beam_width.max(k);
        let (_, frontier) = self.greedy_search(query, l, entry);
        frontier
            .into_iter()
            .filter(|c| !self.deleted_nodes.contains(&c.node))
            .take(k)
            .map(|c| (self.tags[c.node as usize], c.dist))
            .collect()
    }

    /// Snapshot the active points to disk.
    ///
    /// Writes three files: `<prefix>` (JSON metadata), `<prefix>.data`
    /// (active vectors as a bin file), and `<prefix>.tags` (the parallel
    /// label sequence as an `N x 1` bin file of `u32`).
    pub fn save(&self, prefix: &Path) -> Result<()> {
        let mut order: Vec<u32> = self.label_to_node.values().copied().collect();
        order.sort_unstable();

        let mut data = Vec::with_capacity(order.len() * self.dimension);
        let mut tags = Vec::with_capacity(order.len());
        for &node in &order {
            data.extend_from_slice(self.vector(node));
            tags.push(self.tags[node as usize]);
        }

        let metadata = serde_json::json!({
            "dimension": self.dimension,
            "num_points": order.len(),
            "max_degree": self.max_degree,
        });
        std::fs::write(prefix, serde_json::to_vec_pretty(&metadata).map_err(
            |e| IndexError::Format(format!("mem snapshot metadata: {e}")),
        )?)?;

        io::save_bin(&suffixed(prefix, ".data"), &data, order.len(), self.dimension)?;
        io::save_bin(&suffixed(prefix, ".tags"), &tags, order.len(), 1)?;
        Ok(())
    }

    fn node_count(&self) -> usize {
        self.tags.len()
    }

    fn vector(&self, node: u32) -> &[T] {
        let start = node as usize * self.dimension;
        &self.vectors[start..start + self.dimension]
    }

    /// Wire a freshly appended node into the graph.
    fn link(&mut self, node: u32) {
        let entry = match self.entry {
            Some(e) if e != node => e,
            _ => return, // first node, or nothing live to link against
        };

        let query: Vec<T> = self.vector(node).to_vec();
        let (visited, _) = self.greedy_search(&query, self.build_beam_width, entry);

        let neighbors = self.robust_prune(node, &visited, self.alpha);
        self.adj[node as usize] = neighbors.iter().copied().collect();

        // Reverse edges, pruning any neighbor that overflows its degree.
        for &nb in &neighbors {
            let list = &mut self.adj[nb as usize];
            if !list.contains(&node) {
                list.push(node);
            }
            if self.adj[nb as usize].len() > self.max_degree {
                let pool: Vec<u32> = self.adj[nb as usize].to_vec();
                let pruned = self.robust_prune(nb, &pool, self.alpha);
                self.adj[nb as usize] = pruned.into_iter().collect();
            }
        }
    }

    /// Best-first graph traversal keeping a frontier of width `l`.
    ///
    /// Returns `(visited live nodes, frontier sorted by distance)`.
    fn greedy_search(&self, query: &[T], l: usize, entry: u32) -> (Vec<u32>, Vec<Candidate>) {
        let mut visited: HashSet<u32> = HashSet::new();
        let mut frontier: Vec<Candidate> = Vec::with_capacity(l + 1);

        frontier.push(Candidate {
            node: entry,
            dist: l2_distance(query, self.vector(entry)),
        });
        visited.insert(entry);

        let mut expanded = 0;
        while expanded < frontier.len() {
            frontier.sort();
            let current = frontier[expanded];
            expanded += 1;

            for &nb in &self.adj[current.node as usize] {
                if !visited.insert(nb) {
                    continue;
                }
                frontier.push(Candidate {
                    node: nb,
                    dist: l2_distance(query, self.vector(nb)),
                });
            }

            frontier.sort();
            if frontier.len() > l {
                frontier.truncate(l);
            }
        }

        let live: Vec<u32> = frontier
            .iter()
            .map(|c| c.node)
            .filter(|n| !self.deleted_nodes.contains(n))
            .collect();
        (live, frontier)
    }

    /// Alpha-pruning: keep candidates that are not dominated by an already
    /// chosen neighbor, up to `max_degree`.
    fn robust_prune(&self, node: u32, candidates: &[u32], alpha: f32) -> Vec<u32> {
        let node_vec: Vec<T> = self.vector(node).to_vec();

        let mut pool: Vec<Candidate> = candidates
            .iter()
            .copied()
            .filter(|&c| c != node && !self.deleted_nodes.contains(&c))
            .map(|c| Candidate {
                node: c,
                dist: l2_distance(&node_vec, self.vector(c)),
            })
            .collect();
        pool.sort();
        pool.dedup_by_key(|c| c.node);

        let mut chosen: Vec<u32> = Vec::with_capacity(self.max_degree);
        for cand in pool {
            if chosen.len() >= self.max_degree {
                break;
            }
            let dominated = chosen.iter().any(|&existing| {
                let via = l2_distance(self.vector(existing), self.vector(cand.node));
                alpha * via <= cand.dist
            });
            if !dominated {
                chosen.push(cand.node);
            }
        }
        chosen
    }

    /// Two-pass Vamana rebuild over the current (compacted) rows.
    fn rebuild_graph(&mut self) {
        let n = self.node_count();
        self.adj = vec![SmallVec::new(); n];
        self.entry = if n > 0 { Some(self.medoid()) } else { None };
        if n < 2 {
            return;
        }

        self.initialize_random_graph();
        // First pass approximates an RNG graph, the second adds long-range
        // edges for small-world navigation.
        self.vamana_pass(1.0);
        self.vamana_pass(self.alpha);
    }

    /// Node closest to the dataset centroid.
    fn medoid(&self) -> u32 {
        let n = self.node_count();
        let mut centroid = vec![0f64; self.dimension];
        for node in 0..n as u32 {
            for (j, v) in self.vector(node).iter().enumerate() {
                centroid[j] += v.to_f32() as f64;
            }
        }
        let centroid: Vec<f32> = centroid.iter().map(|&s| (s / n as f64) as f32).collect();

        let mut best = 0u32;
        let mut best_dist = f32::INFINITY;
        for node in 0..n as u32 {
            let dist: f32 = self
                .vector(node)
                .iter()
                .zip(centroid.iter())
                .map(|(v, c)| {
                    let d = v.to_f32() - c;
                    d * d
                })
                .sum();
            if dist < best_dist {
                best_dist = dist;
                best = node;
            }
        }
        best
    }

    fn initialize_random_graph(&mut self) {
        let n = self.node_count();
        let r = self.max_degree.min(n - 1);
        let mut rng = rand::rng();

        for node in 0..n {
            let mut neighbors: HashSet<u32> = HashSet::with_capacity(r);
            while neighbors.len() < r {
                let cand = rng.random_range(0..n) as u32;
                if cand != node as u32 {
                    neighbors.insert(cand);
                }
            }
            self.adj[node] = neighbors.into_iter().collect();
        }
    }

    fn vamana_pass(&mut self, alpha: f32) {
        let entry = match self.entry {
            Some(e) => e,
            None => return,
        };
        let mut order: Vec<u32> = (0..self.node_count() as u32).collect();
        order.shuffle(&mut rand::rng());

        for node in order {
            let query: Vec<T> = self.vector(node).to_vec();
            let (visited, _) = self.greedy_search(&query, self.build_beam_width, entry);
            let neighbors = self.robust_prune(node, &visited, alpha);
            self.adj[node as usize] = neighbors.into_iter().collect();
        }
    }
}
