//! Approximate nearest-neighbor search over a hierarchical navigable
//! small-world graph.
//!
//! The crate splits the index lifecycle in two:
//!
//! - [`GraphBuilder`] owns ingestion and graph maintenance: bulk accumulation
//!   followed by a parallel [`build`](GraphBuilder::build), or incremental
//!   [`insert`](GraphBuilder::insert) / [`delete`](GraphBuilder::delete) /
//!   [`reinsert`](GraphBuilder::reinsert) with in-place repair.
//! - [`Model`] is the immutable result: queryable from any number of threads,
//!   serializable to a single file, reloadable either fully in memory or as a
//!   zero-copy memory mapping.
//!
//! Queries go through a [`Searcher`] (or a [`SearcherPool`] for server-style
//! workloads), which carries reusable scratch state.
//!
//! ```no_run
//! use smallworld_core::{DistanceMetric, GraphBuilder, Searcher};
//! use std::sync::Arc;
//!
//! # fn main() -> smallworld_core::Result<()> {
//! let mut builder = GraphBuilder::new(4, DistanceMetric::L2);
//! builder.add_vector(&[0.0, 0.0, 0.0, 0.0])?;
//! builder.add_vector(&[1.0, 0.0, 0.0, 0.0])?;
//! let model = Arc::new(builder.fit()?);
//!
//! let mut searcher = Searcher::new(model);
//! let hits = searcher.search(&[0.1, 0.0, 0.0, 0.0], 1, 50, false)?;
//! assert_eq!(hits[0].id, 0);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod distance;
pub mod error;
pub mod graph;
pub mod model;
pub mod search;
pub mod store;

#[cfg(test)]
mod distance_tests;
#[cfg(test)]
mod store_tests;

pub use distance::DistanceMetric;
pub use error::{Error, Result};
pub use graph::{BuildParams, GraphBuilder, GraphPostProcessing, NeighborSelecting, NodeId};
pub use model::Model;
pub use search::{Neighbor, PooledSearcher, Searcher, SearcherPool};
pub use store::VectorStore;
