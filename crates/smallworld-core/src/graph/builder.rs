//! Hierarchical proximity-graph construction and maintenance.
//!
//! The builder owns the mutable, in-progress counterpart of a [`Model`]:
//! vectors accumulate here, the multi-layer graph is linked here (either in
//! one parallel bulk pass or through incremental single-item insertion), and
//! deletion/reinsertion repair the graph in place. A `build*` call freezes
//! the current state into an immutable [`Model`]; afterwards the builder
//! refuses further structural mutation.
//!
//! # Concurrency
//!
//! The bulk build pass partitions the item set across a rayon pool. Adjacency
//! mutation is serialized per node via the per-slot locks in [`Layer`], and
//! entry-point updates take a mutex so the layer comparison and the store are
//! atomic. Incremental insert/delete/reinsert are single-writer (`&mut self`).

use super::layer::{Layer, LayerSnapshot};
use super::params::{BuildParams, GraphPostProcessing, NeighborSelecting};
use super::{Dist, NodeId};
use crate::distance::DistanceMetric;
use crate::error::{Error, Result};
use crate::model::Model;
use crate::store::VectorStore;
use parking_lot::Mutex;
use rayon::prelude::*;
use roaring::RoaringBitmap;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Maximum layer a node can be assigned by the random draw.
const MAX_LEVEL: usize = 15;

/// Lifecycle stage of a builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Vectors accumulate without a graph; the bulk `build` pass links them.
    Accumulating,
    /// A graph is maintained incrementally by insert/delete/reinsert.
    Incremental,
    /// A model has been emitted; structural mutation is refused.
    Built,
}

/// The topmost-layer access point for search descent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EntryPoint {
    node: NodeId,
    level: usize,
}

/// Builder for the hierarchical navigable small-world graph.
#[derive(Debug)]
pub struct GraphBuilder {
    metric: DistanceMetric,
    params: BuildParams,
    store: VectorStore,
    /// Max layer per node; parallel to the store once a graph exists.
    levels: Vec<usize>,
    /// Layer 0 first; one adjacency arena per layer.
    layers: Vec<Layer>,
    entry: Mutex<Option<EntryPoint>>,
    /// xorshift64 state for the exponential layer draw.
    rng_state: AtomicU64,
    /// Ids ingested through the multi-value/variant path.
    variants: RoaringBitmap,
    phase: Phase,
}

impl GraphBuilder {
    /// Creates a builder for vectors of the given dimension with default
    /// [`BuildParams`].
    #[must_use]
    pub fn new(dimension: usize, metric: DistanceMetric) -> Self {
        Self::with_params(dimension, metric, BuildParams::default())
    }

    /// Creates a builder with explicit construction parameters.
    #[must_use]
    pub fn with_params(dimension: usize, metric: DistanceMetric, params: BuildParams) -> Self {
        Self {
            metric,
            params,
            store: VectorStore::new(dimension),
            levels: Vec::new(),
            layers: Vec::new(),
            entry: Mutex::new(None),
            rng_state: AtomicU64::new(0x5DEE_CE66_D1A4_B5B5),
            variants: RoaringBitmap::new(),
            phase: Phase::Accumulating,
        }
    }

    /// Returns the vector dimension.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.store.dimension()
    }

    /// Returns the configured distance metric.
    #[must_use]
    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    /// Returns the current construction parameters.
    #[must_use]
    pub fn params(&self) -> &BuildParams {
        &self.params
    }

    /// Number of stored vectors, including tombstoned ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Returns true if no vectors have been added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Number of live (non-tombstoned) vectors.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.store.live_count()
    }

    /// Returns true if `id` was added through the variant path.
    #[must_use]
    pub fn is_variant(&self, id: NodeId) -> bool {
        self.variants.contains(id as u32)
    }

    // ========================================================================
    // Ingestion
    // ========================================================================

    /// Accumulates a vector for a later bulk [`build`](Self::build) pass.
    ///
    /// # Errors
    ///
    /// [`Error::DimensionMismatch`] on a wrong-length vector;
    /// [`Error::State`] once a model has been built or an incremental graph
    /// is in progress.
    pub fn add_vector(&mut self, vector: &[f32]) -> Result<NodeId> {
        match self.phase {
            Phase::Built => Err(Error::State(
                "this index already has a trained model; adding an item is not allowed".into(),
            )),
            Phase::Incremental => Err(Error::State(
                "incremental graph in progress; use insert() instead".into(),
            )),
            Phase::Accumulating => self.store.push(vector),
        }
    }

    /// Accumulates a vector tagged for multi-value/variant handling.
    ///
    /// The vector participates in the graph like any other item; the id is
    /// additionally recorded so callers can distinguish variant entries.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`add_vector`](Self::add_vector).
    pub fn add_vector_variant(&mut self, vector: &[f32]) -> Result<NodeId> {
        let id = self.add_vector(vector)?;
        self.variants.insert(id as u32);
        Ok(id)
    }

    // ========================================================================
    // Incremental mutation (single-writer)
    // ========================================================================

    /// Inserts a vector into the incrementally maintained graph.
    ///
    /// Draws the node's max layer from the exponential distribution, walks
    /// the graph greedily above that layer, then links the node at every
    /// layer from its max down to 0 with `ef_construction`-wide candidate
    /// search and the configured neighbor-selection policy.
    ///
    /// # Errors
    ///
    /// [`Error::DimensionMismatch`] on a wrong-length vector;
    /// [`Error::State`] once a model exists, or when vectors were accumulated
    /// for a bulk build (the two ingestion paths do not mix).
    pub fn insert(&mut self, vector: &[f32]) -> Result<NodeId> {
        match self.phase {
            Phase::Built => {
                return Err(Error::State(
                    "this index already has a trained model; inserting is not allowed".into(),
                ))
            }
            Phase::Accumulating if !self.store.is_empty() => {
                return Err(Error::State(
                    "vectors were accumulated for a bulk build; call build() instead".into(),
                ))
            }
            Phase::Accumulating | Phase::Incremental => {}
        }

        let id = self.store.push(vector)?;
        let level = self.draw_level();
        self.levels.push(level);
        self.ensure_layers(level, id);
        self.link_node(id, level);
        self.phase = Phase::Incremental;
        Ok(id)
    }

    /// Deletes an item from the incrementally maintained graph.
    ///
    /// Tombstones the item, removes it from every adjacency list at every
    /// layer it occupied, reconnects its former neighbors among themselves to
    /// preserve local connectivity, and relocates the entry point if the
    /// deleted item held it. Returns the former layer-0 neighbors whose
    /// neighborhoods were invalidated; pass them to
    /// [`reinsert`](Self::reinsert) for a full repair.
    ///
    /// # Errors
    ///
    /// [`Error::State`] when no incremental graph exists;
    /// [`Error::NotFound`] for an unknown or already-deleted id.
    pub fn delete(&mut self, id: NodeId) -> Result<Vec<NodeId>> {
        if self.phase != Phase::Incremental {
            return Err(Error::State(
                "no incremental graph to delete from; insert items first".into(),
            ));
        }
        if !self.store.is_live(id) {
            return Err(Error::NotFound(id));
        }

        let node_level = self.levels[id];
        let reinsert: Vec<NodeId> = self.layers[0]
            .get(id)
            .into_iter()
            .filter(|&n| n != id && self.store.is_live(n))
            .collect();

        for level in 0..=node_level {
            let former = self.layers[level].get(id);
            self.layers[level].set(id, Vec::new());
            self.layers[level].purge(id);
            self.repair_neighborhood(level, &former);
        }

        self.store.tombstone(id)?;

        let needs_relocation = { self.entry.lock().map_or(false, |ep| ep.node == id) };
        if needs_relocation {
            let replacement = self.find_entry_replacement();
            *self.entry.lock() = replacement;
            debug!(
                deleted = id,
                new_entry = ?replacement.map(|ep| ep.node),
                "entry point relocated after deletion"
            );
        }

        Ok(reinsert)
    }

    /// Re-runs the insertion neighbor-selection procedure for known ids
    /// whose neighborhoods were invalidated by deletions, keeping their
    /// original layer assignments.
    ///
    /// # Errors
    ///
    /// [`Error::State`] when no incremental graph exists;
    /// [`Error::NotFound`] for an unknown or deleted id.
    pub fn reinsert(&mut self, ids: &[NodeId]) -> Result<()> {
        if self.phase != Phase::Incremental {
            return Err(Error::State(
                "no incremental graph to reinsert into; insert items first".into(),
            ));
        }
        for &id in ids {
            if !self.store.is_live(id) {
                return Err(Error::NotFound(id));
            }
        }
        for &id in ids {
            let level = self.levels[id];
            for l in 0..=level {
                self.layers[l].set(id, Vec::new());
                self.layers[l].purge(id);
            }
            self.link_node(id, level);
        }
        Ok(())
    }

    /// Removes the directed edge `source -> neighbor` (and its reverse) at
    /// layer 0 and records `source` as needing repair.
    ///
    /// # Errors
    ///
    /// [`Error::State`] when no incremental graph exists;
    /// [`Error::NotFound`] when either endpoint is unknown or deleted.
    pub fn remove_edge(
        &mut self,
        source: NodeId,
        neighbor: NodeId,
        reinsert: &mut Vec<NodeId>,
    ) -> Result<()> {
        if self.phase != Phase::Incremental {
            return Err(Error::State("no incremental graph to modify".into()));
        }
        if !self.store.is_live(source) {
            return Err(Error::NotFound(source));
        }
        if !self.store.is_live(neighbor) {
            return Err(Error::NotFound(neighbor));
        }
        self.layers[0].remove(source, neighbor);
        self.layers[0].remove(neighbor, source);
        reinsert.push(source);
        Ok(())
    }

    // ========================================================================
    // Entry point
    // ========================================================================

    /// Returns the current entry point, if any.
    #[must_use]
    pub fn entry_point(&self) -> Option<NodeId> {
        self.entry.lock().map(|ep| ep.node)
    }

    /// Returns true if `id` currently holds the entry point.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown id.
    pub fn is_entry_point(&self, id: NodeId) -> Result<bool> {
        if id >= self.store.len() {
            return Err(Error::NotFound(id));
        }
        Ok(self.entry.lock().map_or(false, |ep| ep.node == id))
    }

    /// Forces the entry point to `id`.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown or deleted id.
    pub fn set_entry_point(&mut self, id: NodeId) -> Result<()> {
        if !self.store.is_live(id) {
            return Err(Error::NotFound(id));
        }
        let level = self.levels.get(id).copied().unwrap_or(0);
        *self.entry.lock() = Some(EntryPoint { node: id, level });
        Ok(())
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    /// Number of layer-0 adjacency lists referencing `id`.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown id.
    pub fn in_degree(&self, id: NodeId) -> Result<usize> {
        if id >= self.store.len() {
            return Err(Error::NotFound(id));
        }
        let Some(layer) = self.layers.first() else {
            return Ok(0);
        };
        let mut count = 0;
        for node in 0..layer.slots() {
            if node != id && layer.get(node).contains(&id) {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Max distance from `id` to its layer-0 neighbors, or 0 when isolated.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown or deleted id.
    pub fn radius(&self, id: NodeId) -> Result<f32> {
        if !self.store.is_live(id) {
            return Err(Error::NotFound(id));
        }
        let Some(layer) = self.layers.first() else {
            return Ok(0.0);
        };
        let query = self.vector_of(id);
        Ok(layer
            .get(id)
            .iter()
            .map(|&n| self.metric.evaluate(query, self.vector_of(n)))
            .fold(0.0f32, f32::max))
    }

    /// Layer-0 out-degree histogram over live nodes: degree -> node count.
    #[must_use]
    pub fn degree_distribution(&self) -> BTreeMap<usize, usize> {
        let mut dist = BTreeMap::new();
        if let Some(layer) = self.layers.first() {
            for id in 0..self.store.len() {
                if self.store.is_live(id) {
                    *dist.entry(layer.degree(id)).or_insert(0) += 1;
                }
            }
        }
        dist
    }

    // ========================================================================
    // Build / freeze
    // ========================================================================

    /// Performs the full parallel construction pass over all accumulated
    /// vectors and returns the finalized [`Model`].
    ///
    /// Workers partition the item set; adjacency mutation is serialized per
    /// node, so the resulting graph honors the degree caps and symmetry
    /// invariants under any interleaving.
    ///
    /// # Errors
    ///
    /// [`Error::State`] when a model was already built, when an incremental
    /// graph exists (use [`build_from_insert`](Self::build_from_insert)), or
    /// when no vectors were accumulated; [`Error::Config`] on invalid
    /// parameters.
    pub fn build(&mut self, params: &BuildParams) -> Result<Model> {
        match self.phase {
            Phase::Built => {
                return Err(Error::State(
                    "this index already has a trained model; building is not allowed".into(),
                ))
            }
            Phase::Incremental => {
                return Err(Error::State(
                    "incremental graph exists; use build_from_insert() or build_from_deletion()"
                        .into(),
                ))
            }
            Phase::Accumulating => {}
        }
        if self.store.is_empty() {
            return Err(Error::State("no data to fit; add vectors first".into()));
        }
        validate_params(params)?;
        self.params = params.clone();

        let n = self.store.len();
        self.levels = (0..n).map(|_| self.draw_level()).collect();
        let max_level = self.levels.iter().copied().max().unwrap_or(0);
        self.layers = (0..=max_level).map(|_| Layer::new(n)).collect();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(params.n_threads)
            .build()
            .map_err(|e| Error::Config(format!("thread pool: {e}")))?;
        pool.install(|| {
            (0..n)
                .into_par_iter()
                .for_each(|id| self.link_node(id, self.levels[id]));
        });

        match params.graph_post_processing {
            GraphPostProcessing::Skip => {}
            GraphPostProcessing::MergeLevel0 => self.merge_level0(),
        }

        info!(
            items = n,
            max_level,
            m = params.m,
            ef_construction = params.ef_construction,
            "bulk graph construction complete"
        );
        self.phase = Phase::Built;
        Ok(self.freeze())
    }

    /// Bulk build with the parameters the builder was created with.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`build`](Self::build).
    pub fn fit(&mut self) -> Result<Model> {
        let params = self.params.clone();
        self.build(&params)
    }

    /// Finalizes a [`Model`] from the incrementally maintained graph after a
    /// sequence of inserts.
    ///
    /// # Errors
    ///
    /// [`Error::State`] when a model was already built or no incremental
    /// graph state exists.
    pub fn build_from_insert(&mut self) -> Result<Model> {
        self.freeze_incremental("build_from_insert")
    }

    /// Finalizes a [`Model`] from the incrementally maintained graph after
    /// deletions; tombstones are carried into the model so searches skip
    /// deleted items.
    ///
    /// # Errors
    ///
    /// [`Error::State`] when a model was already built or no incremental
    /// graph state exists.
    pub fn build_from_deletion(&mut self) -> Result<Model> {
        self.freeze_incremental("build_from_deletion")
    }

    fn freeze_incremental(&mut self, op: &str) -> Result<Model> {
        match self.phase {
            Phase::Built => Err(Error::State(
                "this index already has a trained model; building is not allowed".into(),
            )),
            Phase::Accumulating => Err(Error::State(format!(
                "no incremental graph state for {op}; insert items first"
            ))),
            Phase::Incremental => {
                info!(
                    items = self.store.len(),
                    live = self.store.live_count(),
                    op,
                    "incremental graph finalized"
                );
                self.phase = Phase::Built;
                Ok(self.freeze())
            }
        }
    }

    fn freeze(&self) -> Model {
        let levels: Vec<u32> = self.levels.iter().map(|&l| l as u32).collect();
        let adjacency: Vec<Vec<Vec<u32>>> = self
            .layers
            .iter()
            .map(|layer| {
                let mut lists = layer.snapshot();
                lists.resize(self.store.len(), Vec::new());
                lists
                    .into_iter()
                    .map(|list| list.into_iter().map(|n| n as u32).collect())
                    .collect()
            })
            .collect();
        Model::from_parts(
            self.metric,
            self.store.dimension(),
            self.entry.lock().map(|ep| ep.node),
            levels,
            adjacency,
            self.store.deleted().clone(),
            self.store.as_flat_slice().to_vec(),
        )
    }

    // ========================================================================
    // Builder snapshots
    // ========================================================================

    /// Serializes the builder state (vectors, levels, adjacency, tombstones)
    /// so a later process can resume incremental maintenance.
    ///
    /// # Errors
    ///
    /// [`Error::Io`] / [`Error::Serialization`] on write failure.
    pub fn save_nodes<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let snapshot = BuilderSnapshot {
            dimension: self.store.dimension(),
            metric: self.metric,
            params: self.params.clone(),
            levels: self.levels.clone(),
            layers: self
                .layers
                .iter()
                .map(|l| {
                    let mut lists = l.snapshot();
                    lists.resize(self.store.len(), Vec::new());
                    LayerSnapshot(lists)
                })
                .collect(),
            entry: self.entry.lock().map(|ep| (ep.node, ep.level)),
            buffer: self.store.as_flat_slice().to_vec(),
            deleted: self.store.deleted().clone(),
            variants: self.variants.clone(),
            incremental: self.phase == Phase::Incremental,
        };
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        bincode::serialize_into(writer, &snapshot)
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Restores a builder from a [`save_nodes`](Self::save_nodes) snapshot.
    ///
    /// # Errors
    ///
    /// [`Error::Io`] / [`Error::Serialization`] on a missing or corrupt
    /// snapshot file.
    pub fn load_nodes<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let snapshot: BuilderSnapshot =
            bincode::deserialize_from(reader).map_err(|e| Error::Serialization(e.to_string()))?;

        let store = VectorStore::from_parts(snapshot.dimension, snapshot.buffer, snapshot.deleted);
        let phase = if snapshot.incremental {
            Phase::Incremental
        } else {
            Phase::Accumulating
        };
        Ok(Self {
            metric: snapshot.metric,
            params: snapshot.params,
            store,
            levels: snapshot.levels,
            layers: snapshot
                .layers
                .into_iter()
                .map(|LayerSnapshot(lists)| Layer::from_lists(lists))
                .collect(),
            entry: Mutex::new(
                snapshot
                    .entry
                    .map(|(node, level)| EntryPoint { node, level }),
            ),
            rng_state: AtomicU64::new(0x5DEE_CE66_D1A4_B5B5),
            variants: snapshot.variants,
            phase,
        })
    }

    // ========================================================================
    // Graph core
    // ========================================================================

    fn vector_of(&self, id: NodeId) -> &[f32] {
        let dim = self.store.dimension();
        &self.store.as_flat_slice()[id * dim..(id + 1) * dim]
    }

    /// Draws a node's max layer from the exponential distribution
    /// parameterized by the level multiplier.
    fn draw_level(&self) -> usize {
        // xorshift64; good enough for the layer draw and dependency-free.
        let mut state = self.rng_state.load(Ordering::Relaxed);
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        self.rng_state.store(state, Ordering::Relaxed);

        let uniform = (state as f64) / (u64::MAX as f64);
        let uniform = uniform.max(f64::MIN_POSITIVE);
        let level = (-uniform.ln() * self.params.effective_level_mult()).floor() as usize;
        level.min(MAX_LEVEL)
    }

    fn ensure_layers(&mut self, level: usize, id: NodeId) {
        while self.layers.len() <= level {
            self.layers.push(Layer::new(id + 1));
        }
        for layer in &mut self.layers {
            layer.ensure_capacity(id);
        }
    }

    /// Links `id` into every layer from `level` down to 0.
    ///
    /// Safe to call concurrently from the bulk build workers: adjacency
    /// mutation goes through per-node locks and entry-point updates hold the
    /// entry mutex across the level comparison.
    fn link_node(&self, id: NodeId, level: usize) {
        let query = self.vector_of(id);

        let ep = {
            let mut guard = self.entry.lock();
            match *guard {
                None => {
                    *guard = Some(EntryPoint { node: id, level });
                    return;
                }
                Some(ep) => ep,
            }
        };

        // Relinking the entry node itself: descend from some other live node
        // instead, since the node's own lists were just cleared.
        let mut current = ep.node;
        if current == id {
            match (0..self.store.len()).find(|&n| n != id && self.store.is_live(n)) {
                Some(node) => current = node,
                None => return,
            }
        }
        for l in ((level + 1)..=ep.level).rev() {
            current = self.search_layer_single(query, current, l);
        }

        for l in (0..=level.min(ep.level)).rev() {
            let candidates = self.search_layer(
                query,
                &[current],
                self.params.ef_construction,
                l,
                Some(id),
            );
            let cap = self.params.cap_for_level(l);
            let selected =
                self.select_neighbors(&candidates, cap, self.params.neighbor_selecting);
            self.layers[l].set(id, selected.clone());
            for &neighbor in &selected {
                self.link_back(id, neighbor, l, cap);
            }
            if let Some(&(best, _)) = candidates.first() {
                current = best;
            }
        }

        let mut guard = self.entry.lock();
        if let Some(ep) = *guard {
            if level > ep.level {
                *guard = Some(EntryPoint { node: id, level });
            }
        }
    }

    /// Greedy single-best descent within one layer.
    fn search_layer_single(&self, query: &[f32], entry: NodeId, level: usize) -> NodeId {
        let mut best = entry;
        let mut best_dist = self.metric.evaluate(query, self.vector_of(best));

        loop {
            let mut improved = false;
            for neighbor in self.layers[level].get(best) {
                let dist = self.metric.evaluate(query, self.vector_of(neighbor));
                if dist < best_dist {
                    best = neighbor;
                    best_dist = dist;
                    improved = true;
                }
            }
            if !improved {
                break;
            }
        }
        best
    }

    /// Bounded best-first search within one layer, returning up to `ef`
    /// candidates sorted by ascending distance.
    fn search_layer(
        &self,
        query: &[f32],
        entry_points: &[NodeId],
        ef: usize,
        level: usize,
        exclude: Option<NodeId>,
    ) -> Vec<(NodeId, f32)> {
        let mut visited: FxHashSet<NodeId> = FxHashSet::default();
        let mut candidates: BinaryHeap<Reverse<(Dist, NodeId)>> = BinaryHeap::new();
        let mut results: BinaryHeap<(Dist, NodeId)> = BinaryHeap::new();

        for &ep in entry_points {
            if Some(ep) == exclude || !visited.insert(ep) {
                continue;
            }
            let dist = self.metric.evaluate(query, self.vector_of(ep));
            candidates.push(Reverse((Dist(dist), ep)));
            results.push((Dist(dist), ep));
        }

        while let Some(Reverse((Dist(c_dist), c_node))) = candidates.pop() {
            let furthest = results.peek().map_or(f32::MAX, |r| r.0 .0);
            if c_dist > furthest && results.len() >= ef {
                break;
            }

            for neighbor in self.layers[level].get(c_node) {
                if Some(neighbor) == exclude || !visited.insert(neighbor) {
                    continue;
                }
                let dist = self.metric.evaluate(query, self.vector_of(neighbor));
                let furthest = results.peek().map_or(f32::MAX, |r| r.0 .0);
                if dist < furthest || results.len() < ef {
                    candidates.push(Reverse((Dist(dist), neighbor)));
                    results.push((Dist(dist), neighbor));
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut out: Vec<(NodeId, f32)> = results.into_iter().map(|(d, n)| (n, d.0)).collect();
        out.sort_by(|a, b| a.1.total_cmp(&b.1));
        out
    }

    /// Applies the neighbor-selection policy to distance-ranked candidates.
    fn select_neighbors(
        &self,
        candidates: &[(NodeId, f32)],
        max_neighbors: usize,
        policy: NeighborSelecting,
    ) -> Vec<NodeId> {
        if candidates.len() <= max_neighbors || policy == NeighborSelecting::Closest {
            return candidates
                .iter()
                .take(max_neighbors)
                .map(|&(id, _)| id)
                .collect();
        }

        // Diversity-aware heuristic: keep a candidate only if no selected
        // neighbor is closer to it than the inserted node is.
        let mut selected: Vec<NodeId> = Vec::with_capacity(max_neighbors);
        for &(candidate, candidate_dist) in candidates {
            if selected.len() >= max_neighbors {
                break;
            }
            let candidate_vec = self.vector_of(candidate);
            let diverse = selected.iter().all(|&s| {
                candidate_dist <= self.metric.evaluate(candidate_vec, self.vector_of(s))
            });
            if diverse || selected.is_empty() {
                selected.push(candidate);
            }
        }

        // Backfill with the remaining closest candidates if the heuristic
        // rejected too many.
        if selected.len() < max_neighbors {
            for &(candidate, _) in candidates {
                if selected.len() >= max_neighbors {
                    break;
                }
                if !selected.contains(&candidate) {
                    selected.push(candidate);
                }
            }
        }
        selected
    }

    /// Adds the reciprocal edge `neighbor -> new_node`, pruning the
    /// neighbor's list back to `cap` when full.
    fn link_back(&self, new_node: NodeId, neighbor: NodeId, level: usize, cap: usize) {
        if self.layers[level].try_add(neighbor, new_node, cap) {
            return;
        }

        let mut all = self.layers[level].get(neighbor);
        if all.contains(&new_node) {
            return;
        }
        all.push(new_node);

        let neighbor_vec = self.vector_of(neighbor);
        let mut with_dist: Vec<(NodeId, f32)> = all
            .into_iter()
            .map(|n| (n, self.metric.evaluate(neighbor_vec, self.vector_of(n))))
            .collect();
        with_dist.sort_by(|a, b| a.1.total_cmp(&b.1));
        let pruned: Vec<NodeId> = with_dist.into_iter().take(cap).map(|(n, _)| n).collect();
        self.layers[level].set(neighbor, pruned);
    }

    /// Reconnects a deleted node's former neighbors among themselves,
    /// closest pairs first, respecting the layer's degree cap.
    fn repair_neighborhood(&self, level: usize, former: &[NodeId]) {
        let live: Vec<NodeId> = former
            .iter()
            .copied()
            .filter(|&n| self.store.is_live(n))
            .collect();
        if live.len() < 2 {
            return;
        }
        let cap = self.params.cap_for_level(level);

        let mut pairs: Vec<(f32, NodeId, NodeId)> = Vec::new();
        for (i, &a) in live.iter().enumerate() {
            for &b in &live[i + 1..] {
                pairs.push((self.metric.evaluate(self.vector_of(a), self.vector_of(b)), a, b));
            }
        }
        pairs.sort_by(|x, y| x.0.total_cmp(&y.0));

        for (_, a, b) in pairs {
            if self.layers[level].degree(a) < cap && self.layers[level].degree(b) < cap {
                if self.layers[level].try_add(a, b, cap) {
                    self.layers[level].try_add(b, a, cap);
                }
            }
        }
    }

    /// Reverse-order layer-0 refinement: merges fresh candidates into each
    /// node's list and reapplies the selection policy.
    fn merge_level0(&self) {
        let n = self.store.len();
        let cap = self.params.max_m0;
        let Some(ep) = *self.entry.lock() else {
            return;
        };

        for id in (0..n).rev() {
            if !self.store.is_live(id) {
                continue;
            }
            let query = self.vector_of(id);

            let mut current = ep.node;
            for l in (1..=ep.level).rev() {
                current = self.search_layer_single(query, current, l);
            }
            let fresh = self.search_layer(
                query,
                &[current],
                self.params.ef_construction,
                0,
                Some(id),
            );

            let mut merged: Vec<NodeId> = self.layers[0].get(id);
            for &(candidate, _) in &fresh {
                if !merged.contains(&candidate) {
                    merged.push(candidate);
                }
            }
            let mut ranked: Vec<(NodeId, f32)> = merged
                .into_iter()
                .map(|nb| (nb, self.metric.evaluate(query, self.vector_of(nb))))
                .collect();
            ranked.sort_by(|a, b| a.1.total_cmp(&b.1));

            let selected =
                self.select_neighbors(&ranked, cap, self.params.neighbor_selecting);
            self.layers[0].set(id, selected.clone());
            for &neighbor in &selected {
                self.link_back(id, neighbor, 0, cap);
            }
        }
        debug!(items = n, "merge_level0 refinement pass complete");
    }

    fn find_entry_replacement(&self) -> Option<EntryPoint> {
        let mut best: Option<EntryPoint> = None;
        for id in 0..self.store.len() {
            if !self.store.is_live(id) {
                continue;
            }
            let level = self.levels[id];
            if best.map_or(true, |ep| level > ep.level) {
                best = Some(EntryPoint { node: id, level });
            }
        }
        best
    }
}

fn validate_params(params: &BuildParams) -> Result<()> {
    if params.m < 2 {
        return Err(Error::Config(format!("m must be >= 2, got {}", params.m)));
    }
    if params.max_m0 < params.m {
        return Err(Error::Config(format!(
            "max_m0 ({}) must be >= m ({})",
            params.max_m0, params.m
        )));
    }
    if params.ef_construction == 0 {
        return Err(Error::Config("ef_construction must be > 0".into()));
    }
    if params.n_threads == 0 {
        return Err(Error::Config("n_threads must be > 0".into()));
    }
    Ok(())
}

/// Serializable builder state for save/load of in-progress graphs.
#[derive(Serialize, Deserialize)]
struct BuilderSnapshot {
    dimension: usize,
    metric: DistanceMetric,
    params: BuildParams,
    levels: Vec<usize>,
    layers: Vec<LayerSnapshot>,
    entry: Option<(NodeId, usize)>,
    buffer: Vec<f32>,
    deleted: RoaringBitmap,
    variants: RoaringBitmap,
    incremental: bool,
}
