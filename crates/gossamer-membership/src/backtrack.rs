//! Reverse-path routing for asynchronous responses.

use std::num::NonZeroUsize;
use std::sync::Arc;

use gossamer_link::Link;
use lru::LruCache;

use crate::uid::PeerId;

/// Message identity: the origin peer and its counter at creation time.
pub type Identity = (PeerId, u64);

/// Bounded correlation map from a request's identity to the link it arrived
/// on, so a later response can travel the reverse path without anyone
/// knowing the full route.
///
/// A `None` value marks this node as the final destination rather than a
/// router. Capacity pressure evicts least-recently-used routes; a response
/// whose route was evicted is silently undeliverable, which the protocol
/// tolerates.
pub struct Backtrack {
    routes: LruCache<Identity, Option<Arc<dyn Link>>>,
}

impl std::fmt::Debug for Backtrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backtrack")
            .field("len", &self.routes.len())
            .field("cap", &self.routes.cap())
            .finish()
    }
}

impl Backtrack {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            routes: LruCache::new(capacity),
        }
    }

    pub fn insert(&mut self, identity: Identity, link: Option<Arc<dyn Link>>) {
        self.routes.put(identity, link);
    }

    /// First writer wins: never replaces an existing route, in particular
    /// the local-delivery marker.
    pub fn insert_if_absent(&mut self, identity: Identity, link: Option<Arc<dyn Link>>) {
        if !self.routes.contains(&identity) {
            self.routes.put(identity, link);
        }
    }

    /// Look the reverse route up, refreshing its recency.
    pub fn route(&mut self, identity: &Identity) -> Option<Option<Arc<dyn Link>>> {
        self.routes.get(identity).cloned()
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.routes.contains(identity)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
