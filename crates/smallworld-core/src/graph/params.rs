//! Construction parameters and build-time policies.

use serde::{Deserialize, Serialize};

/// Neighbor-selection policy applied during insertion.
///
/// The selection policy is the single largest determinant of search quality:
/// pure closest-M selection produces clustered, poorly connected graphs,
/// while the diversity-aware heuristic preserves long-range navigability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NeighborSelecting {
    /// Keep the M closest candidates.
    Closest,
    /// Diversity-aware selection: reject a candidate that is closer to an
    /// already-selected neighbor than to the inserted node.
    #[default]
    Heuristic,
}

/// Post-construction graph refinement policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GraphPostProcessing {
    /// No refinement pass.
    #[default]
    Skip,
    /// Re-run layer-0 neighbor selection over all nodes in reverse insertion
    /// order, merging the fresh candidates into the existing lists. Evens out
    /// the degree distribution skew that early insertions accumulate.
    MergeLevel0,
}

/// Parameters controlling graph construction.
///
/// `ef_construction` controls the width of the candidate frontier explored
/// during insertion: larger values trade construction time for graph quality
/// (better recall at query time).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildParams {
    /// Degree cap per node at layers >= 1 (M parameter).
    pub m: usize,
    /// Degree cap per node at layer 0 (usually `2 * m`).
    pub max_m0: usize,
    /// Candidate frontier width during construction.
    pub ef_construction: usize,
    /// Worker threads used by the bulk build pass.
    pub n_threads: usize,
    /// Level multiplier for the exponential layer draw.
    /// A non-positive value selects the default `1 / ln(m)`.
    pub level_mult: f64,
    /// Neighbor-selection policy.
    pub neighbor_selecting: NeighborSelecting,
    /// Post-construction refinement policy.
    pub graph_post_processing: GraphPostProcessing,
}

impl Default for BuildParams {
    fn default() -> Self {
        Self {
            m: 12,
            max_m0: 24,
            ef_construction: 150,
            n_threads: 4,
            level_mult: 0.0,
            neighbor_selecting: NeighborSelecting::default(),
            graph_post_processing: GraphPostProcessing::default(),
        }
    }
}

impl BuildParams {
    /// Effective level multiplier: the configured value, or `1 / ln(m)` when
    /// unset.
    #[must_use]
    pub fn effective_level_mult(&self) -> f64 {
        if self.level_mult > 0.0 {
            self.level_mult
        } else {
            1.0 / (self.m.max(2) as f64).ln()
        }
    }

    /// Degree cap for a given layer.
    #[must_use]
    pub fn cap_for_level(&self, level: usize) -> usize {
        if level == 0 {
            self.max_m0
        } else {
            self.m
        }
    }
}
