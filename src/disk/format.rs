//! On-disk graph file format.
//!
//! Single file, `<prefix>_disk.index`. Vectors are co-located with their
//! adjacency lists so one record read serves both, and each record carries
//! its row's label so the label map can be rebuilt without the text sidecar.
//!
//! Layout:
//! - Header (64 bytes):
//!   - Magic (8 bytes)
//!   - Num nodes (8 bytes)
//!   - Dimension (8 bytes)
//!   - Max degree (8 bytes)
//!   - Entry node (8 bytes)
//!   - Element width in bytes (8 bytes)
//!   - Padding (16 bytes)
//! - Fixed-size records, one per node:
//!   - Label (4 bytes)
//!   - Degree (4 bytes)
//!   - Neighbors (max_degree * 4 bytes, zero padded)
//!   - Vector (dimension * element width bytes)

use crate::element::Element;
use crate::error::{IndexError, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

// Magic bytes: "FDSK" + version 1
const GRAPH_MAGIC: &[u8; 8] = b"FDSK\x00\x00\x00\x01";

/// Header byte width, magic and padding included.
pub const HEADER_BYTES: usize = 64;

/// Parsed graph file header.
#[derive(Debug, Clone, Copy)]
pub struct GraphHeader {
    pub num_nodes: usize,
    pub dimension: usize,
    pub max_degree: usize,
    pub entry: u32,
    pub elem_bytes: usize,
}

impl GraphHeader {
    /// Parse and validate the fixed-size header at the start of `bytes`.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_BYTES {
            return Err(IndexError::Format("graph file shorter than header".into()));
        }
        if &bytes[..8] != GRAPH_MAGIC {
            return Err(IndexError::Format("not a freshann graph file".into()));
        }
        let word = |i: usize| {
            let start = 8 + i * 8;
            u64::from_le_bytes(bytes[start..start + 8].try_into().unwrap())
        };
        Ok(Self {
            num_nodes: word(0) as usize,
            dimension: word(1) as usize,
            max_degree: word(2) as usize,
            entry: word(3) as u32,
            elem_bytes: word(4) as usize,
        })
    }

    /// Byte width of one node record.
    #[must_use]
    pub fn record_bytes(&self) -> usize {
        8 + self.max_degree * 4 + self.dimension * self.elem_bytes
    }

    /// Byte offset of a node's record.
    #[must_use]
    pub fn record_offset(&self, node: u32) -> usize {
        HEADER_BYTES + node as usize * self.record_bytes()
    }
}

/// Streaming writer for the graph file.
pub struct GraphFileWriter {
    writer: BufWriter<File>,
    max_degree: usize,
    dimension: usize,
    written: usize,
    num_nodes: usize,
}

impl GraphFileWriter {
    pub fn create<T: Element>(
        path: &Path,
        num_nodes: usize,
        dimension: usize,
        max_degree: usize,
        entry: u32,
    ) -> Result<Self> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        writer.write_all(GRAPH_MAGIC)?;
        writer.write_all(&(num_nodes as u64).to_le_bytes())?;
        writer.write_all(&(dimension as u64).to_le_bytes())?;
        writer.write_all(&(max_degree as u64).to_le_bytes())?;
        writer.write_all(&(entry as u64).to_le_bytes())?;
        writer.write_all(&(T::BYTES as u64).to_le_bytes())?;
        writer.write_all(&[0u8; 16])?;

        Ok(Self {
            writer,
            max_degree,
            dimension,
            written: 0,
            num_nodes,
        })
    }

    /// Append one node record.
    pub fn write_node<T: Element>(
        &mut self,
        label: u32,
        neighbors: &[u32],
        vector: &[T],
    ) -> Result<()> {
        if neighbors.len() > self.max_degree {
            return Err(IndexError::Format(format!(
                "node degree {} exceeds max degree {}",
                neighbors.len(),
                self.max_degree
            )));
        }
        if vector.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        self.writer.write_all(&label.to_le_bytes())?;
        self.writer
            .write_all(&(neighbors.len() as u32).to_le_bytes())?;
        for &nb in neighbors {
            self.writer.write_all(&nb.to_le_bytes())?;
        }
        let padding = (self.max_degree - neighbors.len()) * 4;
        self.writer.write_all(&vec![0u8; padding])?;
        self.writer
            .write_all(&crate::element::encode_slice(vector))?;

        self.written += 1;
        Ok(())
    }

    /// Flush; errors if the record count disagrees with the header.
    pub fn finish(mut self) -> Result<()> {
        if self.written != self.num_nodes {
            return Err(IndexError::Format(format!(
                "graph writer closed after {} of {} records",
                self.written, self.num_nodes
            )));
        }
        self.writer.flush()?;
        Ok(())
    }
}

/// A node record decoded from a mapped graph file.
#[derive(Debug)]
pub struct NodeRecord<'a> {
    pub label: u32,
    pub neighbors: Vec<u32>,
    pub vector_bytes: &'a [u8],
}

/// Decode the record at `node` from the full file image.
pub fn read_record<'a>(bytes: &'a [u8], header: &GraphHeader, node: u32) -> Result<NodeRecord<'a>> {
    if node as usize >= header.num_nodes {
        return Err(IndexError::Format(format!(
            "row {node} out of bounds ({} rows)",
            header.num_nodes
        )));
    }
    let start = header.record_offset(node);
    let end = start + header.record_bytes();
    if bytes.len() < end {
        return Err(IndexError::Format(format!(
            "graph file truncated at row {node}"
        )));
    }
    let rec = &bytes[start..end];

    let label = u32::from_le_bytes(rec[0..4].try_into().unwrap());
    let degree = u32::from_le_bytes(rec[4..8].try_into().unwrap()) as usize;
    if degree > header.max_degree {
        return Err(IndexError::Format(format!(
            "row {node} claims degree {degree} > max {}",
            header.max_degree
        )));
    }

    let mut neighbors = Vec::with_capacity(degree);
    for i in 0..degree {
        let off = 8 + i * 4;
        neighbors.push(u32::from_le_bytes(rec[off..off + 4].try_into().unwrap()));
    }

    let vec_start = 8 + header.max_degree * 4;
    Ok(NodeRecord {
        label,
        neighbors,
        vector_bytes: &rec[vec_start..],
    })
}
