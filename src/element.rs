//! Scalar element types for stored vectors.
//!
//! The index is monomorphised over its element type: `f32` for full-precision
//! embeddings, `i8`/`u8` for pre-quantized ones. Distances are always
//! accumulated in `f32` regardless of the storage type.

use crate::error::{IndexError, Result};

/// A fixed-width scalar that can live in a vector row.
///
/// Implementations must encode to little-endian bytes of exactly
/// [`Element::BYTES`] width; the flat data-file and graph-record formats are
/// built from these codecs.
pub trait Element: Copy + Default + Send + Sync + 'static {
    /// Encoded width in bytes.
    const BYTES: usize;

    /// Widen to `f32` for distance computation.
    fn to_f32(self) -> f32;

    /// Decode from a little-endian byte slice of length `BYTES`.
    fn from_le(bytes: &[u8]) -> Self;

    /// Encode into a little-endian byte buffer of length `BYTES`.
    fn write_le(self, out: &mut [u8]);
}

impl Element for f32 {
    const BYTES: usize = 4;

    #[inline]
    fn to_f32(self) -> f32 {
        self
    }

    #[inline]
    fn from_le(bytes: &[u8]) -> Self {
        f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    #[inline]
    fn write_le(self, out: &mut [u8]) {
        out[..4].copy_from_slice(&self.to_le_bytes());
    }
}

impl Element for i8 {
    const BYTES: usize = 1;

    #[inline]
    fn to_f32(self) -> f32 {
        self as f32
    }

    #[inline]
    fn from_le(bytes: &[u8]) -> Self {
        bytes[0] as i8
    }

    #[inline]
    fn write_le(self, out: &mut [u8]) {
        out[0] = self as u8;
    }
}

impl Element for u8 {
    const BYTES: usize = 1;

    #[inline]
    fn to_f32(self) -> f32 {
        self as f32
    }

    #[inline]
    fn from_le(bytes: &[u8]) -> Self {
        bytes[0]
    }

    #[inline]
    fn write_le(self, out: &mut [u8]) {
        out[0] = self
    }
}

// Not a vector element type: this impl exists so label sequences (tags
// sidecars) can reuse the same bin-file codec as vector data.
impl Element for u32 {
    const BYTES: usize = 4;

    #[inline]
    fn to_f32(self) -> f32 {
        self as f32
    }

    #[inline]
    fn from_le(bytes: &[u8]) -> Self {
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    #[inline]
    fn write_le(self, out: &mut [u8]) {
        out[..4].copy_from_slice(&self.to_le_bytes());
    }
}

/// Decode a contiguous little-endian run of `count` elements.
pub fn decode_slice<T: Element>(bytes: &[u8], count: usize) -> Result<Vec<T>> {
    if bytes.len() < count * T::BYTES {
        return Err(IndexError::Format(format!(
            "element run truncated: need {} bytes, have {}",
            count * T::BYTES,
            bytes.len()
        )));
    }
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        out.push(T::from_le(&bytes[i * T::BYTES..(i + 1) * T::BYTES]));
    }
    Ok(out)
}

/// Encode a slice of elements into a little-endian byte buffer.
pub fn encode_slice<T: Element>(values: &[T]) -> Vec<u8> {
    let mut out = vec![0u8; values.len() * T::BYTES];
    for (i, v) in values.iter().enumerate() {
        v.write_le(&mut out[i * T::BYTES..(i + 1) * T::BYTES]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn f32_roundtrip() {
        let values = [1.5f32, -2.25, 0.0, f32::MAX];
        let bytes = encode_slice(&values);
        let back: Vec<f32> = decode_slice(&bytes, values.len()).unwrap();
        assert_eq!(&values[..], &back[..]);
    }

    #[test]
    fn i8_roundtrip() {
        let values = [-128i8, -1, 0, 1, 127];
        let bytes = encode_slice(&values);
        assert_eq!(bytes.len(), 5);
        let back: Vec<i8> = decode_slice(&bytes, values.len()).unwrap();
        assert_eq!(&values[..], &back[..]);
    }

    #[test]
    fn truncated_run_is_an_error() {
        let bytes = [0u8; 7];
        let res: Result<Vec<f32>> = decode_slice(&bytes, 2);
        assert!(res.is_err());
    }
}
