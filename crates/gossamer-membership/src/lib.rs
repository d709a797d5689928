//! Gossamer Membership - a self-organizing overlay membership engine
//!
//! Every peer keeps two bounded, weighted, partial views of the overlay: the
//! partial view (neighbors it pushes messages to) and the in-view (neighbors
//! that push to it). Nobody ever holds the full membership.
//!
//! # How peers join
//!
//! A new peer generates one subscription request and hands it, out-of-band,
//! to any current member (the rendezvous). That member re-injects the
//! request with a hop budget of `2 * |partial_view| + 1` and forwards it
//! along a weighted random walk; the peer holding the request when the
//! budget hits the floor becomes the joiner's contact point, admits it into
//! its in-view, and asks the new peer for enough offers to seed its own
//! partial view. Those offers are sprayed through the overlay and accepted
//! with probability `1 / (1 + |partial_view|)`, bounding in-degree skew as
//! fan-out grows.
//!
//! # How the overlay stays healthy
//!
//! Arc weights are periodically renormalized and exchanged so the weighted
//! walk keeps working as the graph churns. An optional lease forces periodic
//! resubscription, healing the overlay after silent peer death. Responses
//! travel the reverse paths of their requests through a bounded,
//! LRU-evicted routing table; an evicted route degrades to a dropped
//! message, never an error.

mod backtrack;
mod config;
mod engine;
mod error;
mod messages;
mod pending;
mod uid;
mod view;

#[cfg(test)]
pub(crate) mod test_support;

pub use backtrack::{Backtrack, Identity};
pub use config::MembershipConfig;
pub use engine::{Callback, ConnectionState, MembershipEvent, Scamp, Settle};
pub use error::{Error, Result};
pub use messages::{Category, Message};
pub use pending::{Pending, PendingEntry, Promotion};
pub use uid::PeerId;
pub use view::{View, ViewEntry};
