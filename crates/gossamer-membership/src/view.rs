//! Weighted, ordered neighbor views.
//!
//! Two instances exist per peer: the partial view (outbound arcs, where
//! messages are pushed to) and the in-view (inbound arcs, where they come
//! from). Entries stay sorted by peer id; the weight total is tracked
//! incrementally so insertions and removals never rescan the store.

use std::sync::Arc;

use gossamer_link::Link;
use tracing::trace;

use crate::uid::PeerId;

/// Tolerance used to decide a view is already normalized.
const WEIGHT_EPSILON: f64 = 1e-9;

/// One neighbor arc: the remote peer, its link, and the arc weight that
/// drives the indirection walk.
#[derive(Debug, Clone)]
pub struct ViewEntry {
    pub peer: PeerId,
    pub link: Arc<dyn Link>,
    pub weight: f64,
}

/// Ordered, weighted registry of active neighbor links.
#[derive(Debug, Default)]
pub struct View {
    entries: Vec<ViewEntry>,
    total_weight: f64,
}

impl View {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }

    /// Insert a link for `peer` at its sorted position.
    ///
    /// The starting weight is the current average (1 for the first entry).
    /// Callers wanting uniqueness must check [`contains`](Self::contains)
    /// first; the store itself does not reject duplicates.
    pub fn add(&mut self, peer: PeerId, link: Arc<dyn Link>) {
        let weight = if self.entries.is_empty() {
            1.0
        } else {
            self.total_weight / self.entries.len() as f64
        };
        let at = match self.entries.binary_search_by(|entry| entry.peer.cmp(&peer)) {
            Ok(found) => found,
            Err(slot) => slot,
        };
        self.entries.insert(at, ViewEntry { peer, link, weight });
        self.total_weight += weight;
    }

    /// Remove the entry at `index` and terminate its link.
    ///
    /// Terminating the transport is a documented side effect: the view owns
    /// its links for teardown purposes.
    pub fn del(&mut self, index: usize) -> Option<PeerId> {
        if index >= self.entries.len() {
            return None;
        }
        let entry = self.entries.remove(index);
        self.total_weight -= entry.weight;
        entry.link.close();
        Some(entry.peer)
    }

    /// Remove (and terminate) the entry for `peer`, if present.
    pub fn del_peer(&mut self, peer: &PeerId) -> bool {
        match self.position(peer) {
            Some(index) => self.del(index).is_some(),
            None => false,
        }
    }

    /// Remove (and terminate) the entry holding the link created under
    /// `counter`, if any.
    pub fn del_by_link(&mut self, counter: u64) -> bool {
        match self.entries.iter().position(|entry| entry.link.counter() == counter) {
            Some(index) => self.del(index).is_some(),
            None => false,
        }
    }

    /// Terminate every link and empty the view.
    pub fn clear(&mut self) {
        for entry in self.entries.drain(..) {
            entry.link.close();
        }
        self.total_weight = 0.0;
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.position(peer).is_some()
    }

    fn position(&self, peer: &PeerId) -> Option<usize> {
        self.entries.binary_search_by(|entry| entry.peer.cmp(peer)).ok()
    }

    pub fn get(&self, index: usize) -> Option<&ViewEntry> {
        self.entries.get(index)
    }

    pub fn get_peer(&self, peer: &PeerId) -> Option<&ViewEntry> {
        self.position(peer).and_then(|index| self.entries.get(index))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ViewEntry> {
        self.entries.iter()
    }

    /// Replace the weight at `index`, adjusting the total by the delta.
    /// Returns whether the stored value actually changed, so callers can
    /// suppress redundant network chatter.
    pub fn update_weight(&mut self, index: usize, weight: f64) -> bool {
        let Some(entry) = self.entries.get_mut(index) else {
            return false;
        };
        if entry.weight == weight {
            return false;
        }
        self.total_weight += weight - entry.weight;
        entry.weight = weight;
        true
    }

    /// [`update_weight`](Self::update_weight) addressed by peer id.
    pub fn update_weight_peer(&mut self, peer: &PeerId, weight: f64) -> bool {
        match self.position(peer) {
            Some(index) => self.update_weight(index, weight),
            None => {
                trace!(peer = %peer, "weight update for an absent entry");
                false
            }
        }
    }

    /// Rescale every weight to `weight / total` so the view sums to 1,
    /// returning the indices whose value changed. Calling again with no
    /// intervening mutation returns nothing.
    pub fn normalize_weights(&mut self) -> Vec<usize> {
        if self.entries.is_empty() || (self.total_weight - 1.0).abs() <= WEIGHT_EPSILON {
            return Vec::new();
        }
        if self.total_weight <= 0.0 {
            trace!(total = self.total_weight, "skipping normalization of weightless view");
            return Vec::new();
        }
        let total = self.total_weight;
        let mut changed = Vec::new();
        for (index, entry) in self.entries.iter_mut().enumerate() {
            let scaled = entry.weight / total;
            if scaled != entry.weight {
                entry.weight = scaled;
                changed.push(index);
            }
        }
        self.total_weight = self.entries.iter().map(|entry| entry.weight).sum();
        changed
    }

    /// Inverse-CDF selection: the first entry whose cumulative weight
    /// reaches `draw`. Ties resolve to the lowest index. Weights are
    /// expected to be normalized; accumulated floating-point error falls
    /// back to the final entry.
    pub fn pick_weighted(&self, draw: f64) -> Option<usize> {
        if self.entries.is_empty() {
            return None;
        }
        let mut cumulative = 0.0;
        for (index, entry) in self.entries.iter().enumerate() {
            cumulative += entry.weight;
            if cumulative >= draw {
                return Some(index);
            }
        }
        Some(self.entries.len() - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::StubLink;

    fn uid(n: u8) -> PeerId {
        let mut bytes = [0u8; 32];
        bytes[0] = n;
        PeerId::from_bytes(bytes)
    }

    #[test]
    fn stays_sorted_without_duplicates() {
        let mut view = View::new();
        for n in [5u8, 1, 9, 3, 7] {
            view.add(uid(n), StubLink::new(u64::from(n)));
        }
        let peers: Vec<_> = view.iter().map(|entry| entry.peer).collect();
        let mut sorted = peers.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(peers, sorted);

        view.del_peer(&uid(5));
        view.add(uid(4), StubLink::new(40));
        let peers: Vec<_> = view.iter().map(|entry| entry.peer).collect();
        let mut sorted = peers.clone();
        sorted.sort();
        assert_eq!(peers, sorted);
    }

    #[test]
    fn starting_weights_follow_the_running_average() {
        let mut view = View::new();
        view.add(uid(1), StubLink::new(1));
        assert_eq!(view.get_peer(&uid(1)).expect("entry").weight, 1.0);

        view.add(uid(2), StubLink::new(2));
        // Second entry starts at total/len = 1/1.
        assert_eq!(view.get_peer(&uid(2)).expect("entry").weight, 1.0);
        assert_eq!(view.total_weight(), 2.0);

        view.add(uid(3), StubLink::new(3));
        assert_eq!(view.get_peer(&uid(3)).expect("entry").weight, 1.0);
        assert_eq!(view.total_weight(), 3.0);
    }

    #[test]
    fn del_terminates_the_link() {
        let mut view = View::new();
        let link = StubLink::new(1);
        view.add(uid(1), link.clone());
        assert!(view.del_peer(&uid(1)));
        assert!(link.is_closed());
        assert!(view.is_empty());
        assert_eq!(view.total_weight(), 0.0);
    }

    #[test]
    fn clear_terminates_every_link() {
        let mut view = View::new();
        let links: Vec<_> = (1..=3).map(StubLink::new).collect();
        for (n, link) in links.iter().enumerate() {
            view.add(uid(n as u8 + 1), link.clone());
        }
        view.clear();
        assert!(view.is_empty());
        assert!(links.iter().all(|link| link.is_closed()));
    }

    #[test]
    fn del_by_link_matches_the_creation_counter() {
        let mut view = View::new();
        view.add(uid(1), StubLink::new(11));
        view.add(uid(2), StubLink::new(22));
        assert!(view.del_by_link(22));
        assert!(!view.contains(&uid(2)));
        assert!(view.contains(&uid(1)));
        assert!(!view.del_by_link(22));
    }

    #[test]
    fn normalization_sums_to_one_and_reports_changes() {
        let mut view = View::new();
        view.add(uid(1), StubLink::new(1));
        view.add(uid(2), StubLink::new(2));
        view.add(uid(3), StubLink::new(3));
        assert!(!view.update_weight(0, 1.0));
        view.update_weight(1, 3.0);
        view.update_weight(2, 4.0);

        let changed = view.normalize_weights();
        assert_eq!(changed, vec![0, 1, 2]);
        let sum: f64 = view.iter().map(|entry| entry.weight).sum();
        assert!((sum - 1.0).abs() < 1e-9, "weights sum to {sum}");
        assert_eq!(view.get(0).expect("entry").weight, 1.0 / 8.0);
        assert_eq!(view.get(1).expect("entry").weight, 3.0 / 8.0);
        assert_eq!(view.get(2).expect("entry").weight, 0.5);
    }

    #[test]
    fn normalization_is_idempotent() {
        let mut view = View::new();
        view.add(uid(1), StubLink::new(1));
        view.add(uid(2), StubLink::new(2));
        view.update_weight(1, 3.0);

        assert!(!view.normalize_weights().is_empty());
        assert!(view.normalize_weights().is_empty());
    }

    #[test]
    fn update_weight_suppresses_no_ops() {
        let mut view = View::new();
        view.add(uid(1), StubLink::new(1));
        assert!(!view.update_weight(0, 1.0));
        assert!(view.update_weight(0, 0.25));
        assert_eq!(view.total_weight(), 0.25);
        assert!(!view.update_weight_peer(&uid(9), 0.5));
    }

    #[test]
    fn weighted_pick_crosses_at_the_first_boundary() {
        let mut view = View::new();
        view.add(uid(1), StubLink::new(1));
        view.add(uid(2), StubLink::new(2));
        view.add(uid(3), StubLink::new(3));
        view.update_weight(0, 0.2);
        view.update_weight(1, 0.3);
        view.update_weight(2, 0.5);

        assert_eq!(view.pick_weighted(0.0), Some(0));
        assert_eq!(view.pick_weighted(0.2), Some(0));
        assert_eq!(view.pick_weighted(0.21), Some(1));
        assert_eq!(view.pick_weighted(0.5), Some(1));
        assert_eq!(view.pick_weighted(0.51), Some(2));
        assert_eq!(view.pick_weighted(0.999), Some(2));
        // Accumulated error never walks off the end.
        assert_eq!(view.pick_weighted(2.0), Some(2));
        assert_eq!(View::new().pick_weighted(0.5), None);
    }
}
