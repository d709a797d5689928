//! Gossamer Node - runtime wrapper around the membership engine
//!
//! A [`Node`] owns one membership engine and drives it from a single ordered
//! event loop: link notices, settled sends and application commands all
//! funnel through one dispatch task, so every engine mutation happens on one
//! logical thread. Periodic work (weight renormalization, lease renewal)
//! runs off timers inside the same loop.
//!
//! The [`rendezvous_join`] helper plays the out-of-band courier a real
//! deployment would provide: it carries the launch offer from a joiner to a
//! member and the accept message back.

mod node;

#[cfg(test)]
mod convergence_test;

pub use node::{rendezvous_join, Node};
