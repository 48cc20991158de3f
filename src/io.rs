//! Flat binary and text file helpers.
//!
//! Two formats recur across the crate:
//!
//! - **bin file**: `[u32 N][u32 D]` little-endian header followed by
//!   `N * D` elements in row-major order. The base data file, the mem-index
//!   snapshot sidecars, and the PQ artifacts all use this shape.
//! - **label file**: UTF-8 text, one decimal label per line, LF terminated.

use crate::element::{self, Element};
use crate::error::{IndexError, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Byte width of the `[u32 N][u32 D]` bin header.
pub const BIN_HEADER_BYTES: u64 = 8;

/// Check whether a path exists and is a regular file.
#[must_use]
pub fn file_exists(path: &Path) -> bool {
    path.is_file()
}

/// Append a suffix to a path's final component, `prefix` + `_disk.index`
/// style.
#[must_use]
pub fn suffixed(path: &Path, suffix: &str) -> std::path::PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(suffix);
    std::path::PathBuf::from(s)
}

/// Read a bin header from an open file positioned at the start.
pub fn read_bin_header(file: &mut File) -> Result<(u32, u32)> {
    let mut header = [0u8; 8];
    file.read_exact(&mut header)?;
    let n = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let d = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    Ok((n, d))
}

/// Write a bin header to an open file positioned at the start.
pub fn write_bin_header(file: &mut File, n: u32, d: u32) -> Result<()> {
    file.write_all(&n.to_le_bytes())?;
    file.write_all(&d.to_le_bytes())?;
    Ok(())
}

/// Load a whole bin file: `(rows flattened row-major, N, D)`.
pub fn load_bin<T: Element>(path: &Path) -> Result<(Vec<T>, usize, usize)> {
    let mut file = File::open(path)?;
    let (n, d) = read_bin_header(&mut file)?;
    let (n, d) = (n as usize, d as usize);

    let mut bytes = Vec::with_capacity(n * d * T::BYTES);
    file.read_to_end(&mut bytes)?;
    if bytes.len() < n * d * T::BYTES {
        return Err(IndexError::Format(format!(
            "bin file {} truncated: header says {}x{}, body holds {} bytes",
            path.display(),
            n,
            d,
            bytes.len()
        )));
    }

    let data = element::decode_slice(&bytes, n * d)?;
    Ok((data, n, d))
}

/// Write a whole bin file from flattened row-major data.
pub fn save_bin<T: Element>(path: &Path, data: &[T], n: usize, d: usize) -> Result<()> {
    debug_assert_eq!(data.len(), n * d);
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(&(n as u32).to_le_bytes())?;
    writer.write_all(&(d as u32).to_le_bytes())?;
    writer.write_all(&element::encode_slice(data))?;
    writer.flush()?;
    Ok(())
}

/// Read a label file: one decimal `u32` per line.
pub fn read_label_file(path: &Path) -> Result<Vec<u32>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut labels = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let label = trimmed.parse::<u32>().map_err(|_| {
            IndexError::Format(format!(
                "label file {}:{}: not a u32: {trimmed:?}",
                path.display(),
                lineno + 1
            ))
        })?;
        labels.push(label);
    }
    Ok(labels)
}

/// Write a label file, truncating any previous content.
pub fn write_label_file(path: &Path, labels: &[u32]) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    for label in labels {
        writeln!(writer, "{label}")?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bin_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.bin");

        let data = vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0];
        save_bin(&path, &data, 2, 3).unwrap();

        let (back, n, d) = load_bin::<f32>(&path).unwrap();
        assert_eq!((n, d), (2, 3));
        assert_eq!(back, data);
    }

    #[test]
    fn truncated_bin_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.bin");

        let mut file = File::create(&path).unwrap();
        write_bin_header(&mut file, 10, 8).unwrap();
        file.write_all(&[0u8; 16]).unwrap();
        drop(file);

        assert!(load_bin::<f32>(&path).is_err());
    }

    #[test]
    fn label_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.txt");

        let labels = vec![42u32, 0, 4_294_967_295];
        write_label_file(&path, &labels).unwrap();
        assert_eq!(read_label_file(&path).unwrap(), labels);
    }

    #[test]
    fn label_file_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.txt");
        std::fs::write(&path, "12\nnope\n").unwrap();
        assert!(read_label_file(&path).is_err());
    }
}
