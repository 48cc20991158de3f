//! Product quantization for the on-disk index.
//!
//! Vectors are split into contiguous chunks and each chunk is replaced by a
//! codeword index into a per-chunk codebook learned with k-means. The disk
//! search keeps all codes in memory and ranks graph neighbors by asymmetric
//! (query-to-codeword) L2 distance, reserving real record reads for the
//! nodes it actually expands.
//!
//! Both artifacts are regenerated on every merge:
//! `<prefix>_pq_pivots.bin` holds the codebooks, `<prefix>_pq_compressed.bin`
//! the per-row codes.

use crate::distance::l2_distance_f32;
use crate::element::{self, Element};
use crate::error::{IndexError, Result};
use crate::io;
use rand::seq::SliceRandom;
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

// Magic bytes for the pivots file: "FPQP" + version 1
const PIVOTS_MAGIC: &[u8; 8] = b"FPQP\x00\x00\x00\x01";

/// Preferred number of chunks; reduced to the largest divisor of the
/// dimension at or below this.
const TARGET_CHUNKS: usize = 16;

/// Lloyd iterations during codebook training.
const KMEANS_ITERS: usize = 12;

/// Trained per-chunk codebooks.
#[derive(Debug, Clone)]
pub struct ProductQuantizer {
    dimension: usize,
    num_chunks: usize,
    codebook_size: usize,
    sub_dim: usize,
    // Flat layout: [chunk][codeword][sub_dim]
    codebooks: Vec<f32>,
}

impl ProductQuantizer {
    /// Train codebooks on row-major `f32` data.
    ///
    /// `pq_ram_gb` bounds the training sample; rows beyond the budget are
    /// dropped after a random shuffle.
    pub fn train(
        data: &[f32],
        num_vectors: usize,
        dimension: usize,
        pq_ram_gb: f64,
    ) -> Result<Self> {
        if num_vectors == 0 || dimension == 0 {
            return Err(IndexError::Build("PQ training needs data".into()));
        }

        let num_chunks = (1..=TARGET_CHUNKS.min(dimension))
            .rev()
            .find(|c| dimension % c == 0)
            .unwrap_or(1);
        let sub_dim = dimension / num_chunks;

        let budget_rows =
            ((pq_ram_gb * (1u64 << 30) as f64) / (dimension * 4) as f64).floor() as usize;
        let sample_rows = num_vectors.min(budget_rows.max(256));
        let codebook_size = 256usize.min(sample_rows);

        let mut rows: Vec<usize> = (0..num_vectors).collect();
        if sample_rows < num_vectors {
            rows.shuffle(&mut rand::rng());
            rows.truncate(sample_rows);
        }

        let mut codebooks = Vec::with_capacity(num_chunks * codebook_size * sub_dim);
        for chunk in 0..num_chunks {
            let offset = chunk * sub_dim;
            let mut sub: Vec<f32> = Vec::with_capacity(rows.len() * sub_dim);
            for &row in &rows {
                let start = row * dimension + offset;
                sub.extend_from_slice(&data[start..start + sub_dim]);
            }
            let centroids = kmeans(&sub, rows.len(), sub_dim, codebook_size);
            codebooks.extend_from_slice(&centroids);
        }

        Ok(Self {
            dimension,
            num_chunks,
            codebook_size,
            sub_dim,
            codebooks,
        })
    }

    #[must_use]
    pub fn num_chunks(&self) -> usize {
        self.num_chunks
    }

    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn codeword(&self, chunk: usize, code: usize) -> &[f32] {
        let start = (chunk * self.codebook_size + code) * self.sub_dim;
        &self.codebooks[start..start + self.sub_dim]
    }

    /// Quantize one vector to its per-chunk codeword indices.
    #[must_use]
    pub fn encode(&self, vector: &[f32]) -> Vec<u8> {
        let mut codes = Vec::with_capacity(self.num_chunks);
        for chunk in 0..self.num_chunks {
            let sub = &vector[chunk * self.sub_dim..(chunk + 1) * self.sub_dim];
            let mut best = 0usize;
            let mut best_dist = f32::INFINITY;
            for code in 0..self.codebook_size {
                let dist = l2_distance_f32(sub, self.codeword(chunk, code));
                if dist < best_dist {
                    best_dist = dist;
                    best = code;
                }
            }
            codes.push(best as u8);
        }
        codes
    }

    /// Quantize all rows of a row-major matrix, in parallel.
    #[must_use]
    pub fn encode_all(&self, data: &[f32], num_vectors: usize) -> Vec<u8> {
        let mut codes = vec![0u8; num_vectors * self.num_chunks];
        codes
            .par_chunks_mut(self.num_chunks)
            .enumerate()
            .for_each(|(row, out)| {
                let vector = &data[row * self.dimension..(row + 1) * self.dimension];
                out.copy_from_slice(&self.encode(vector));
            });
        codes
    }

    /// Precompute query-to-codeword distances for asymmetric lookup.
    ///
    /// Layout: `[chunk][codeword]`, `num_chunks * codebook_size` entries.
    #[must_use]
    pub fn adc_table(&self, query: &[f32]) -> Vec<f32> {
        let mut table = Vec::with_capacity(self.num_chunks * self.codebook_size);
        for chunk in 0..self.num_chunks {
            let sub = &query[chunk * self.sub_dim..(chunk + 1) * self.sub_dim];
            for code in 0..self.codebook_size {
                table.push(l2_distance_f32(sub, self.codeword(chunk, code)));
            }
        }
        table
    }

    /// Approximate distance from a precomputed ADC table. Lookups only.
    #[inline]
    #[must_use]
    pub fn table_distance(&self, table: &[f32], codes: &[u8]) -> f32 {
        codes
            .iter()
            .enumerate()
            .map(|(chunk, &code)| table[chunk * self.codebook_size + code as usize])
            .sum()
    }

    /// Write the pivots file.
    pub fn save_pivots(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(PIVOTS_MAGIC)?;
        writer.write_all(&(self.dimension as u32).to_le_bytes())?;
        writer.write_all(&(self.num_chunks as u32).to_le_bytes())?;
        writer.write_all(&(self.codebook_size as u32).to_le_bytes())?;
        writer.write_all(&element::encode_slice(&self.codebooks))?;
        writer.flush()?;
        Ok(())
    }

    /// Read a pivots file written by [`ProductQuantizer::save_pivots`].
    pub fn load_pivots(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let mut magic = [0u8; 8];
        file.read_exact(&mut magic)?;
        if &magic != PIVOTS_MAGIC {
            return Err(IndexError::Format(format!(
                "{}: not a PQ pivots file",
                path.display()
            )));
        }

        let mut word = [0u8; 4];
        file.read_exact(&mut word)?;
        let dimension = u32::from_le_bytes(word) as usize;
        file.read_exact(&mut word)?;
        let num_chunks = u32::from_le_bytes(word) as usize;
        file.read_exact(&mut word)?;
        let codebook_size = u32::from_le_bytes(word) as usize;

        if num_chunks == 0 || dimension == 0 || dimension % num_chunks != 0 {
            return Err(IndexError::Format(format!(
                "{}: inconsistent PQ header ({dimension} dims, {num_chunks} chunks)",
                path.display()
            )));
        }
        let sub_dim = dimension / num_chunks;

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        let codebooks = element::decode_slice(&bytes, num_chunks * codebook_size * sub_dim)?;

        Ok(Self {
            dimension,
            num_chunks,
            codebook_size,
            sub_dim,
            codebooks,
        })
    }
}

/// Write the per-row code matrix.
pub fn save_compressed(path: &Path, codes: &[u8], num_vectors: usize, num_chunks: usize) -> Result<()> {
    io::save_bin(path, codes, num_vectors, num_chunks)
}

/// Read a code matrix: `(codes, num_vectors, num_chunks)`.
pub fn load_compressed(path: &Path) -> Result<(Vec<u8>, usize, usize)> {
    io::load_bin::<u8>(path)
}

/// Widen stored elements to the `f32` domain PQ operates in.
pub fn widen<T: Element>(data: &[T]) -> Vec<f32> {
    data.iter().map(|v| v.to_f32()).collect()
}

/// Lloyd's k-means over row-major points. Returns flat `k x d` centroids.
fn kmeans(points: &[f32], n: usize, d: usize, k: usize) -> Vec<f32> {
    debug_assert!(k <= n);
    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(&mut rand::rng());
    let mut centroids: Vec<f32> = Vec::with_capacity(k * d);
    for &row in order.iter().take(k) {
        centroids.extend_from_slice(&points[row * d..(row + 1) * d]);
    }

    let mut assignment = vec![0usize; n];
    for _ in 0..KMEANS_ITERS {
        // Assign
        assignment
            .par_iter_mut()
            .enumerate()
            .for_each(|(row, slot)| {
                let point = &points[row * d..(row + 1) * d];
                let mut best = 0usize;
                let mut best_dist = f32::INFINITY;
                for c in 0..k {
                    let dist = l2_distance_f32(point, &centroids[c * d..(c + 1) * d]);
                    if dist < best_dist {
                        best_dist = dist;
                        best = c;
                    }
                }
                *slot = best;
            });

        // Update
        let mut sums = vec![0f64; k * d];
        let mut counts = vec![0usize; k];
        for (row, &c) in assignment.iter().enumerate() {
            counts[c] += 1;
            for j in 0..d {
                sums[c * d + j] += points[row * d + j] as f64;
            }
        }
        for c in 0..k {
            if counts[c] == 0 {
                // Reseed dead centroid from an arbitrary point.
                let row = order[c % n];
                centroids[c * d..(c + 1) * d]
                    .copy_from_slice(&points[row * d..(row + 1) * d]);
                continue;
            }
            for j in 0..d {
                centroids[c * d + j] = (sums[c * d + j] / counts[c] as f64) as f32;
            }
        }
    }
    centroids
}
