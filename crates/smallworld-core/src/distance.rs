//! Distance metrics for vector dissimilarity.
//!
//! All three metrics return a scalar where lower means more similar, so the
//! graph engine can rank candidates uniformly regardless of the configured
//! metric. Dispatch is a tagged enum resolved once per index; the inner loop
//! pays a single predictable branch rather than a virtual call.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Distance metric for vector dissimilarity calculations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistanceMetric {
    /// Squared Euclidean distance (no square root; monotone with true L2).
    L2,
    /// Angular distance: `1 - cosine_similarity`.
    /// Zero-norm inputs yield the sentinel `1.0` (maximal dissimilarity).
    Angular,
    /// Negative inner product, so that smaller is more similar.
    Dot,
}

impl DistanceMetric {
    /// Parses a metric name.
    ///
    /// Accepts `"L2"` / `"euclidean"`, `"angular"`, and `"dot"`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for unrecognized names.
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "L2" | "euclidean" => Ok(Self::L2),
            "angular" => Ok(Self::Angular),
            "dot" => Ok(Self::Dot),
            other => Err(Error::Config(format!(
                "invalid value for DistanceMetric: {other}"
            ))),
        }
    }

    /// Returns the canonical metric name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::L2 => "L2",
            Self::Angular => "angular",
            Self::Dot => "dot",
        }
    }

    /// Returns the stable one-byte code used in the persisted model header.
    #[must_use]
    pub const fn code(&self) -> u8 {
        match self {
            Self::L2 => 0,
            Self::Angular => 1,
            Self::Dot => 2,
        }
    }

    /// Decodes a metric from its persisted header code.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Format`] for unknown codes.
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Self::L2),
            1 => Ok(Self::Angular),
            2 => Ok(Self::Dot),
            other => Err(Error::Format(format!("unknown metric code {other}"))),
        }
    }

    /// Evaluates the dissimilarity between two vectors of equal length.
    ///
    /// Pure and safe to invoke concurrently without synchronization.
    ///
    /// # Panics
    ///
    /// Panics if the vectors have different lengths; callers validate
    /// dimensions at every insertion and query boundary.
    #[must_use]
    #[inline]
    pub fn evaluate(&self, a: &[f32], b: &[f32]) -> f32 {
        assert_eq!(a.len(), b.len(), "vector length mismatch");
        match self {
            Self::L2 => squared_euclidean(a, b),
            Self::Angular => angular(a, b),
            Self::Dot => -dot(a, b),
        }
    }
}

#[inline]
fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[inline]
fn squared_euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

#[inline]
fn angular(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}
