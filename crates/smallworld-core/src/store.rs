//! Contiguous vector storage with tombstoning.
//!
//! Vectors are kept in a single `Vec<f32>` buffer with each item occupying
//! `dimension` consecutive elements, giving O(1) id lookup and good cache
//! locality during graph traversal.
//!
//! # Memory Layout
//!
//! ```text
//! Buffer: [v0_d0, v0_d1, ..., v0_dn, v1_d0, v1_d1, ..., v1_dn, ...]
//! Index:  |<---- vector 0 ---->|    |<---- vector 1 ---->|
//! ```
//!
//! Ids are dense and append-only; deletion tombstones an id without
//! reclaiming its slot, so ids stay stable for the lifetime of the index.

use crate::error::{Error, Result};
use crate::graph::NodeId;
use roaring::RoaringBitmap;

/// Contiguous fixed-stride vector storage.
#[derive(Debug, Clone)]
pub struct VectorStore {
    /// Contiguous buffer holding all vectors.
    buffer: Vec<f32>,
    /// Vector dimension, fixed per index instance.
    dimension: usize,
    /// Number of vectors stored, including tombstoned ones.
    count: usize,
    /// Tombstoned ids.
    deleted: RoaringBitmap,
}

impl VectorStore {
    /// Creates a new vector store with the specified dimension.
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            buffer: Vec::new(),
            dimension,
            count: 0,
            deleted: RoaringBitmap::new(),
        }
    }

    /// Returns the vector dimension.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Returns the number of stored vectors, including tombstoned ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.count
    }

    /// Returns true if the store holds no vectors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Returns the number of live (non-tombstoned) vectors.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.count - self.deleted.len() as usize
    }

    /// Appends a vector and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] when the vector length differs
    /// from the configured dimension.
    pub fn push(&mut self, vector: &[f32]) -> Result<NodeId> {
        if vector.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        let id = self.count;
        self.buffer.extend_from_slice(vector);
        self.count += 1;
        Ok(id)
    }

    /// Returns the vector for `id`, tombstoned or not.
    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<&[f32]> {
        if id >= self.count {
            return None;
        }
        let offset = id * self.dimension;
        Some(&self.buffer[offset..offset + self.dimension])
    }

    /// Tombstones `id`. The slot is retained so ids stay stable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if `id` is unknown or already tombstoned.
    pub fn tombstone(&mut self, id: NodeId) -> Result<()> {
        if id >= self.count || !self.deleted.insert(id as u32) {
            return Err(Error::NotFound(id));
        }
        Ok(())
    }

    /// Returns true if `id` exists and is not tombstoned.
    #[must_use]
    pub fn is_live(&self, id: NodeId) -> bool {
        id < self.count && !self.deleted.contains(id as u32)
    }

    /// Returns the tombstone set.
    #[must_use]
    pub fn deleted(&self) -> &RoaringBitmap {
        &self.deleted
    }

    /// Returns the raw contiguous buffer.
    #[must_use]
    pub fn as_flat_slice(&self) -> &[f32] {
        &self.buffer
    }

    /// Rebuilds a store from its serialized parts.
    pub(crate) fn from_parts(
        dimension: usize,
        buffer: Vec<f32>,
        deleted: RoaringBitmap,
    ) -> Self {
        let count = if dimension == 0 {
            0
        } else {
            buffer.len() / dimension
        };
        Self {
            buffer,
            dimension,
            count,
            deleted,
        }
    }
}
