//! Distance metrics for stored vectors.
//!
//! The overlay is an L2 index: both sub-indices rank candidates by squared
//! Euclidean distance, accumulated in `f32` whatever the storage element
//! type. Distances from the two sub-indices are compared directly, so a
//! single shared definition matters more than raw speed here.

use crate::element::Element;

/// Distance metric for dense vectors.
///
/// Only [`DistanceMetric::L2`] is currently wired through the build and
/// search paths; the enum exists so configuration and on-disk metadata name
/// the metric explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DistanceMetric {
    /// Squared Euclidean (L2) distance.
    L2,
}

impl DistanceMetric {
    /// Compute distance between two element slices.
    ///
    /// Mismatched lengths return `f32::INFINITY` so the pair is never
    /// selected as a nearest neighbor.
    #[inline]
    #[must_use]
    pub fn distance<T: Element>(self, a: &[T], b: &[T]) -> f32 {
        match self {
            DistanceMetric::L2 => l2_distance(a, b),
        }
    }
}

/// Squared L2 (Euclidean) distance.
#[inline]
#[must_use]
pub fn l2_distance<T: Element>(a: &[T], b: &[T]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x.to_f32() - y.to_f32();
            d * d
        })
        .sum()
}

/// Squared L2 distance between two `f32` slices.
///
/// Used on paths that have already widened (PQ codebooks, ADC tables).
#[inline]
#[must_use]
pub fn l2_distance_f32(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum()
}
