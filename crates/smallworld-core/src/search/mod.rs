//! Query execution over a frozen [`Model`].
//!
//! A [`Searcher`] carries reusable scratch state (visited set, widening rng)
//! so repeated queries avoid per-call allocation churn. Searchers are cheap
//! to create and single-threaded; share the [`Model`] through an `Arc` and
//! give each thread its own searcher, or draw them from a
//! [`SearcherPool`](pool::SearcherPool).

mod pool;

#[cfg(test)]
mod searcher_tests;

pub use pool::{PooledSearcher, SearcherPool};

use crate::error::{Error, Result};
use crate::graph::{Dist, NodeId};
use crate::model::Model;
use rustc_hash::FxHashSet;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use tracing::warn;

/// One ranked search result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Item id.
    pub id: NodeId,
    /// Distance to the query under the model's metric.
    pub distance: f32,
}

/// Reusable query executor bound to one model.
pub struct Searcher {
    model: Arc<Model>,
    visited: FxHashSet<NodeId>,
    /// xorshift64 state for the widening probes.
    rng_state: u64,
}

impl Searcher {
    /// Creates a searcher over `model`.
    #[must_use]
    pub fn new(model: Arc<Model>) -> Self {
        Self {
            model,
            visited: FxHashSet::default(),
            rng_state: 0x9E37_79B9_7F4A_7C15,
        }
    }

    /// Returns the model this searcher queries.
    #[must_use]
    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    /// Finds the `k` nearest live items to `query`.
    ///
    /// `ef_search` bounds the layer-0 candidate frontier; it is raised to at
    /// least `k`. With `ensure_k` set, a search that surfaces fewer than `k`
    /// live items keeps widening the frontier (doubling `ef` and probing from
    /// extra random entry points) until `k` are found or the graph is
    /// exhausted.
    ///
    /// Fewer than `k` results without an error means the model simply holds
    /// fewer than `k` live items; with `ensure_k` set that case still returns
    /// every live item distance-ranked, even ones in components the entry
    /// point cannot reach.
    ///
    /// # Errors
    ///
    /// [`Error::DimensionMismatch`] on a wrong-length query;
    /// [`Error::InsufficientReachable`] when `ensure_k` is set, at least `k`
    /// live items exist, and widening still cannot reach `k` of them.
    pub fn search(
        &mut self,
        query: &[f32],
        k: usize,
        ef_search: usize,
        ensure_k: bool,
    ) -> Result<Vec<Neighbor>> {
        if query.len() != self.model.dimension() {
            return Err(Error::DimensionMismatch {
                expected: self.model.dimension(),
                actual: query.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }
        let Some(entry) = self.model.entry_point() else {
            return Ok(Vec::new());
        };
        let live = self.model.live_count();
        if live == 0 {
            return Ok(Vec::new());
        }

        let start = self.descend(query, entry);
        let mut ef = ef_search.max(k);
        let mut extra_entries: Vec<NodeId> = Vec::new();
        let mut results = self.search_layer0(query, start, &extra_entries, ef, k);

        if ensure_k {
            if live >= k {
                while results.len() < k {
                    if ef > live.saturating_mul(2) {
                        warn!(
                            found = results.len(),
                            requested = k,
                            ef,
                            live,
                            "frontier widening exhausted without reaching k items"
                        );
                        return Err(Error::InsufficientReachable {
                            found: results.len(),
                            requested: k,
                        });
                    }
                    ef *= 2;
                    if let Some(probe) = self.random_live_node() {
                        extra_entries.push(probe);
                    }
                    results = self.search_layer0(query, start, &extra_entries, ef, k);
                }
            } else if results.len() < live {
                // The caller asked for more items than exist; graph traversal
                // cannot promise to visit components the entry point does not
                // reach, so rank the live set directly.
                results = self.rank_all_live(query);
            }
        }

        Ok(results)
    }

    /// Finds the `k` nearest live items to the stored item `id`, excluding
    /// the item itself.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown or deleted id; otherwise the same
    /// failure modes as [`search`](Self::search).
    pub fn search_by_id(
        &mut self,
        id: NodeId,
        k: usize,
        ef_search: usize,
        ensure_k: bool,
    ) -> Result<Vec<Neighbor>> {
        if !self.model.is_live(id) {
            return Err(Error::NotFound(id));
        }
        let query = self.model.vector(id).to_vec();
        let mut results = self.search(&query, k + 1, ef_search.max(k + 1), ensure_k)?;
        results.retain(|n| n.id != id);
        results.truncate(k);
        Ok(results)
    }

    /// Greedy single-best descent from the top layer down to layer 1.
    fn descend(&self, query: &[f32], entry: NodeId) -> NodeId {
        let metric = self.model.metric();
        let mut current = entry;
        let mut current_dist = metric.evaluate(query, self.model.vector(current));

        for level in (1..=self.model.max_level()).rev() {
            loop {
                let mut improved = false;
                for &neighbor in self.model.neighbors(level, current) {
                    let neighbor = neighbor as NodeId;
                    let dist = metric.evaluate(query, self.model.vector(neighbor));
                    if dist < current_dist {
                        current = neighbor;
                        current_dist = dist;
                        improved = true;
                    }
                }
                if !improved {
                    break;
                }
            }
        }
        current
    }

    /// Bounded best-first search at layer 0.
    ///
    /// Tombstoned nodes are traversed (their edges still carry the graph) but
    /// never surface as results.
    fn search_layer0(
        &mut self,
        query: &[f32],
        start: NodeId,
        extra_entries: &[NodeId],
        ef: usize,
        k: usize,
    ) -> Vec<Neighbor> {
        let metric = self.model.metric();
        self.visited.clear();

        let mut candidates: BinaryHeap<Reverse<(Dist, NodeId)>> = BinaryHeap::new();
        let mut frontier: BinaryHeap<(Dist, NodeId)> = BinaryHeap::new();
        let mut live: Vec<Neighbor> = Vec::new();

        for &ep in std::iter::once(&start).chain(extra_entries) {
            if !self.visited.insert(ep) {
                continue;
            }
            let dist = metric.evaluate(query, self.model.vector(ep));
            candidates.push(Reverse((Dist(dist), ep)));
            frontier.push((Dist(dist), ep));
            if self.model.is_live(ep) {
                live.push(Neighbor { id: ep, distance: dist });
            }
        }

        while let Some(Reverse((Dist(c_dist), c_node))) = candidates.pop() {
            let furthest = frontier.peek().map_or(f32::MAX, |f| f.0 .0);
            if c_dist > furthest && frontier.len() >= ef {
                break;
            }

            for &neighbor in self.model.neighbors(0, c_node) {
                let neighbor = neighbor as NodeId;
                if !self.visited.insert(neighbor) {
                    continue;
                }
                let dist = metric.evaluate(query, self.model.vector(neighbor));
                let furthest = frontier.peek().map_or(f32::MAX, |f| f.0 .0);
                if dist < furthest || frontier.len() < ef {
                    candidates.push(Reverse((Dist(dist), neighbor)));
                    frontier.push((Dist(dist), neighbor));
                    if frontier.len() > ef {
                        frontier.pop();
                    }
                    if self.model.is_live(neighbor) {
                        live.push(Neighbor {
                            id: neighbor,
                            distance: dist,
                        });
                    }
                }
            }
        }

        live.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        live.truncate(k);
        live
    }

    /// Distance-ranks every live item; used when `k` exceeds the live count
    /// under `ensure_k`, where the result must cover the whole live set.
    fn rank_all_live(&self, query: &[f32]) -> Vec<Neighbor> {
        let metric = self.model.metric();
        let mut all: Vec<Neighbor> = (0..self.model.len())
            .filter(|&id| self.model.is_live(id))
            .map(|id| Neighbor {
                id,
                distance: metric.evaluate(query, self.model.vector(id)),
            })
            .collect();
        all.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        all
    }

    /// Draws a random live node for the widening probes.
    fn random_live_node(&mut self) -> Option<NodeId> {
        let n = self.model.len();
        if n == 0 {
            return None;
        }
        for _ in 0..64 {
            self.rng_state ^= self.rng_state << 13;
            self.rng_state ^= self.rng_state >> 7;
            self.rng_state ^= self.rng_state << 17;
            let id = (self.rng_state % n as u64) as NodeId;
            if self.model.is_live(id) {
                return Some(id);
            }
        }
        None
    }
}
