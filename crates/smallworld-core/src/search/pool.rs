//! A bounded pool of reusable searchers.
//!
//! Server-style callers want one searcher per in-flight query without paying
//! scratch-state allocation per request. The pool pre-creates searchers and
//! hands them out through an RAII guard that returns them on drop.

use super::Searcher;
use crate::model::Model;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Fixed-size pool of [`Searcher`]s over one shared model.
pub struct SearcherPool {
    model: Arc<Model>,
    free_tx: Sender<Searcher>,
    free_rx: Receiver<Searcher>,
}

impl SearcherPool {
    /// Creates a pool holding `capacity` searchers over `model`.
    #[must_use]
    pub fn new(model: Arc<Model>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (free_tx, free_rx) = bounded(capacity);
        for _ in 0..capacity {
            // The channel was sized to hold every searcher.
            let _ = free_tx.send(Searcher::new(Arc::clone(&model)));
        }
        Self {
            model,
            free_tx,
            free_rx,
        }
    }

    /// Takes a searcher from the pool, blocking until one is free.
    #[must_use]
    pub fn acquire(&self) -> PooledSearcher {
        let searcher = self
            .free_rx
            .recv()
            .unwrap_or_else(|_| Searcher::new(Arc::clone(&self.model)));
        PooledSearcher {
            searcher: Some(searcher),
            free_tx: self.free_tx.clone(),
        }
    }

    /// Takes a searcher without blocking; `None` when all are in use.
    #[must_use]
    pub fn try_acquire(&self) -> Option<PooledSearcher> {
        self.free_rx.try_recv().ok().map(|searcher| PooledSearcher {
            searcher: Some(searcher),
            free_tx: self.free_tx.clone(),
        })
    }
}

/// RAII guard over a pooled [`Searcher`]; returns it to the pool on drop.
pub struct PooledSearcher {
    searcher: Option<Searcher>,
    free_tx: Sender<Searcher>,
}

impl Deref for PooledSearcher {
    type Target = Searcher;

    fn deref(&self) -> &Searcher {
        self.searcher.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PooledSearcher {
    fn deref_mut(&mut self) -> &mut Searcher {
        self.searcher.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledSearcher {
    fn drop(&mut self) {
        if let Some(searcher) = self.searcher.take() {
            // try_send never fails here: the channel holds at most as many
            // searchers as were created.
            let _ = self.free_tx.try_send(searcher);
        }
    }
}
