//! The frozen, query-ready index representation.
//!
//! A [`Model`] is the immutable union of graph adjacency, vector data, entry
//! point, metric and dimension emitted by a
//! [`GraphBuilder`](crate::graph::GraphBuilder). Once constructed or loaded
//! its structural content never changes; any number of searchers may read it
//! concurrently. Mutation requires exporting the node data back into a
//! builder and re-running insertion/build.
//!
//! Two backings exist: fully materialized buffers (portable, owned) and a
//! `memmap2` mapping that serves adjacency and vector reads zero-copy from
//! the file.

mod format;

#[cfg(test)]
mod persistence_tests;

use crate::distance::DistanceMetric;
use crate::error::{Error, Result};
use crate::graph::NodeId;
use format::{FrozenGraph, Header, LevelIndex};
use memmap2::Mmap;
use roaring::RoaringBitmap;
use std::fs::File;
use std::path::Path;
use tracing::info;

/// Owned, fully materialized graph buffers.
#[derive(Debug)]
struct OwnedGraph {
    /// Max layer per node.
    levels: Vec<u32>,
    /// adjacency[level][id] -> neighbor ids.
    adjacency: Vec<Vec<Vec<u32>>>,
    /// Fixed-stride vector data.
    vectors: Vec<f32>,
}

/// Zero-copy view over a mapped model file.
#[derive(Debug)]
struct MappedGraph {
    mmap: Mmap,
    header: Header,
    level_index: Vec<LevelIndex>,
}

#[derive(Debug)]
enum Repr {
    Owned(OwnedGraph),
    Mapped(MappedGraph),
}

/// Immutable, query-ready index: graph + vectors + entry point + metadata.
#[derive(Debug)]
pub struct Model {
    metric: DistanceMetric,
    dimension: usize,
    entry_point: Option<NodeId>,
    max_level: usize,
    item_count: usize,
    deleted: RoaringBitmap,
    repr: Repr,
}

static EMPTY_IDS: [u32; 0] = [];

impl Model {
    /// Assembles an owned model from builder output.
    pub(crate) fn from_parts(
        metric: DistanceMetric,
        dimension: usize,
        entry_point: Option<NodeId>,
        levels: Vec<u32>,
        adjacency: Vec<Vec<Vec<u32>>>,
        deleted: RoaringBitmap,
        vectors: Vec<f32>,
    ) -> Self {
        let item_count = levels.len();
        let max_level = adjacency.len().saturating_sub(1);
        Self {
            metric,
            dimension,
            entry_point,
            max_level,
            item_count,
            deleted,
            repr: Repr::Owned(OwnedGraph {
                levels,
                adjacency,
                vectors,
            }),
        }
    }

    /// Returns the stored vector dimension.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Returns the distance metric the graph was built under.
    #[must_use]
    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    /// Returns the topmost-layer entry point, if the model is non-empty.
    #[must_use]
    pub fn entry_point(&self) -> Option<NodeId> {
        self.entry_point
    }

    /// Returns the highest layer index.
    #[must_use]
    pub fn max_level(&self) -> usize {
        self.max_level
    }

    /// Number of stored items, including tombstoned ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.item_count
    }

    /// Returns true when the model holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.item_count == 0
    }

    /// Number of live (non-tombstoned) items.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.item_count - self.deleted.len() as usize
    }

    /// Returns true if `id` exists and is not tombstoned.
    #[must_use]
    pub fn is_live(&self, id: NodeId) -> bool {
        id < self.item_count && !self.deleted.contains(id as u32)
    }

    /// Returns true when this model reads from a memory mapping.
    #[must_use]
    pub fn is_mapped(&self) -> bool {
        matches!(self.repr, Repr::Mapped(_))
    }

    /// Max layer of `id` (0 for unknown ids).
    #[must_use]
    pub fn node_level(&self, id: NodeId) -> usize {
        match &self.repr {
            Repr::Owned(g) => g.levels.get(id).copied().unwrap_or(0) as usize,
            Repr::Mapped(g) => {
                if id >= self.item_count {
                    return 0;
                }
                let off = g.header.levels_off + id * 4;
                format::u32_slice(&g.mmap, off, 1)[0] as usize
            }
        }
    }

    /// Neighbor ids of `id` at `level`; empty for out-of-range arguments.
    #[must_use]
    pub fn neighbors(&self, level: usize, id: NodeId) -> &[u32] {
        match &self.repr {
            Repr::Owned(g) => g
                .adjacency
                .get(level)
                .and_then(|lists| lists.get(id))
                .map_or(&EMPTY_IDS[..], Vec::as_slice),
            Repr::Mapped(g) => {
                let Some(li) = g.level_index.get(level) else {
                    return &EMPTY_IDS;
                };
                if id >= self.item_count {
                    return &EMPTY_IDS;
                }
                let start = format::u64_at(&g.mmap, li.offsets_off + id * 8) as usize;
                let end = format::u64_at(&g.mmap, li.offsets_off + (id + 1) * 8) as usize;
                format::u32_slice(&g.mmap, li.ids_off + start * 4, end - start)
            }
        }
    }

    /// The vector stored for `id`.
    ///
    /// # Panics
    ///
    /// Panics when `id` is out of range; ids handed out by the engine are
    /// always in range.
    #[must_use]
    pub fn vector(&self, id: NodeId) -> &[f32] {
        assert!(id < self.item_count, "id {id} out of range");
        match &self.repr {
            Repr::Owned(g) => &g.vectors[id * self.dimension..(id + 1) * self.dimension],
            Repr::Mapped(g) => format::f32_slice(
                &g.mmap,
                g.header.vectors_off + id * self.dimension * 4,
                self.dimension,
            ),
        }
    }

    /// Validates a caller-declared dimension against the stored one.
    ///
    /// # Errors
    ///
    /// [`Error::DimensionMismatch`] when `declared` is non-zero and differs.
    pub fn validate_dimension(&self, declared: usize) -> Result<()> {
        if declared != 0 && declared != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: declared,
                actual: self.dimension,
            });
        }
        Ok(())
    }

    /// Serializes the model into a self-describing binary artifact.
    ///
    /// # Errors
    ///
    /// [`Error::Io`] on write failure.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        format::write_file(self, path.as_ref())?;
        info!(
            items = self.item_count,
            max_level = self.max_level,
            metric = self.metric.name(),
            path = %path.as_ref().display(),
            "model saved"
        );
        Ok(())
    }

    /// Loads a model either fully materialized (`use_mmap = false`) or as a
    /// zero-copy memory mapping (`use_mmap = true`).
    ///
    /// # Errors
    ///
    /// [`Error::Io`] when the file cannot be opened; [`Error::Format`] on a
    /// corrupt, truncated or version-incompatible artifact. No partially
    /// constructed model is left behind on failure.
    pub fn load_from_file<P: AsRef<Path>>(path: P, use_mmap: bool) -> Result<Self> {
        let path = path.as_ref();
        let model = if use_mmap {
            let file = File::open(path)?;
            // SAFETY: the mapping is read-only and the file handle is owned
            // by the Mmap for its whole lifetime. Concurrent truncation of
            // the file by another process is outside the supported contract.
            let mmap = unsafe { Mmap::map(&file)? };
            Self::from_mapped(mmap)?
        } else {
            let bytes = std::fs::read(path)?;
            Self::from_owned_bytes(&bytes)?
        };
        info!(
            items = model.item_count,
            live = model.live_count(),
            metric = model.metric.name(),
            mmap = use_mmap,
            path = %path.display(),
            "model loaded"
        );
        Ok(model)
    }

    fn from_mapped(mmap: Mmap) -> Result<Self> {
        let header = format::parse_header(&mmap)?;
        let level_index = format::parse_level_index(&mmap, &header)?;
        let deleted = format::parse_tombstones(&mmap, &header)?;
        Ok(Self {
            metric: header.metric,
            dimension: header.dim,
            entry_point: header.entry_point,
            max_level: header.max_level,
            item_count: header.item_count,
            deleted,
            repr: Repr::Mapped(MappedGraph {
                header,
                level_index,
                mmap,
            }),
        })
    }

    fn from_owned_bytes(bytes: &[u8]) -> Result<Self> {
        let header = format::parse_header(bytes)?;
        let level_index = format::parse_level_index(bytes, &header)?;
        let deleted = format::parse_tombstones(bytes, &header)?;

        let n = header.item_count;
        let levels: Vec<u32> = bytes[header.levels_off..header.levels_off + n * 4]
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        let adjacency: Vec<Vec<Vec<u32>>> = level_index
            .iter()
            .map(|li| {
                (0..n)
                    .map(|id| {
                        let start = format::u64_at(bytes, li.offsets_off + id * 8) as usize;
                        let end = format::u64_at(bytes, li.offsets_off + (id + 1) * 8) as usize;
                        bytes[li.ids_off + start * 4..li.ids_off + end * 4]
                            .chunks_exact(4)
                            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                            .collect()
                    })
                    .collect()
            })
            .collect();

        let vectors: Vec<f32> = bytes
            [header.vectors_off..header.vectors_off + n * header.dim * 4]
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        Ok(Self {
            metric: header.metric,
            dimension: header.dim,
            entry_point: header.entry_point,
            max_level: header.max_level,
            item_count: n,
            deleted,
            repr: Repr::Owned(OwnedGraph {
                levels,
                adjacency,
                vectors,
            }),
        })
    }
}

impl FrozenGraph for Model {
    fn metric(&self) -> DistanceMetric {
        self.metric
    }
    fn dimension(&self) -> usize {
        self.dimension
    }
    fn item_count(&self) -> usize {
        self.item_count
    }
    fn max_level(&self) -> usize {
        self.max_level
    }
    fn entry_point(&self) -> Option<NodeId> {
        self.entry_point
    }
    fn node_level(&self, id: NodeId) -> usize {
        Self::node_level(self, id)
    }
    fn neighbors(&self, level: usize, id: NodeId) -> &[u32] {
        Self::neighbors(self, level, id)
    }
    fn vector(&self, id: NodeId) -> &[f32] {
        Self::vector(self, id)
    }
    fn deleted(&self) -> &RoaringBitmap {
        &self.deleted
    }
}
