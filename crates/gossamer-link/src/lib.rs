//! Gossamer Link - the point-to-point boundary of the overlay
//!
//! A [`Link`] is a bidirectional, message-oriented, possibly-failing channel
//! to exactly one remote peer. The membership layer never manages transport
//! internals: it opens links through a [`LinkFactory`], feeds opaque
//! signaling fragments into them, and observes their lifecycle through
//! [`LinkEvent`]s delivered on a single ordered channel per peer.
//!
//! # Event delivery
//!
//! Every link is tagged with the creation counter its owner assigned to it.
//! All events of all links owned by one peer flow through one
//! [`NoticeSender`], which preserves FIFO order per link while letting events
//! of different links interleave arbitrarily.
//!
//! # Handshakes
//!
//! Links come in initiator and acceptor flavors (see [`LinkKind`]). An
//! initiator produces one or more [`LinkEvent::Signal`] fragments that must
//! reach the acceptor out-of-band (the membership protocol itself carries
//! them); the acceptor answers with its own fragments, and both halves report
//! [`LinkEvent::Ready`] once negotiation completes.

pub mod error;
pub mod memory;

pub use error::{Error, Result};

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

/// Role of a link in the offer/answer handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkKind {
    /// Very first offer of a peer entering the overlay (initiator).
    Launch,
    /// Contact-point side answering a joiner (acceptor).
    Answer,
    /// Offer sprayed through the overlay on behalf of a joiner (initiator).
    Subscription,
    /// Accepting side of a sprayed offer (acceptor).
    Response,
}

impl LinkKind {
    /// Whether this side starts the handshake by producing the offer.
    pub const fn is_initiator(self) -> bool {
        matches!(self, LinkKind::Launch | LinkKind::Subscription)
    }
}

/// Lifecycle and traffic events a link reports to its owner.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// A locally produced signaling fragment to attach to the pending offer.
    Signal(Value),
    /// The link finished negotiating and can carry traffic.
    Ready,
    /// A payload arrived from the remote peer.
    Message(Vec<u8>),
    /// The link was torn down, locally or remotely.
    Closed,
    /// The transport reported a failure.
    Error(String),
}

/// One event of one link, tagged with the owner-assigned counter.
#[derive(Debug, Clone)]
pub struct LinkNotice {
    pub counter: u64,
    pub event: LinkEvent,
}

/// Sending half of a peer's inbound event channel.
pub type NoticeSender = mpsc::UnboundedSender<LinkNotice>;
/// Receiving half of a peer's inbound event channel.
pub type NoticeReceiver = mpsc::UnboundedReceiver<LinkNotice>;

/// Create the inbound event channel one peer dispatches from.
pub fn notice_channel() -> (NoticeSender, NoticeReceiver) {
    mpsc::unbounded_channel()
}

/// A live channel to one remote peer.
///
/// Sending into a torn-down link returns [`Error::Closed`]; owners are
/// expected to tolerate that and drop the message.
pub trait Link: fmt::Debug + Send + Sync {
    /// Creation counter assigned by the owning peer. This is the only stable
    /// key for the link before the remote identity is known.
    fn counter(&self) -> u64;

    /// Handshake role of this link.
    fn kind(&self) -> LinkKind;

    /// Feed a signaling fragment produced by the remote half.
    fn signal(&self, fragment: Value) -> Result<()>;

    /// Push one payload to the remote peer.
    fn send(&self, payload: &[u8]) -> Result<()>;

    /// Tear the link down. The remote half observes a close event.
    fn close(&self);

    /// Whether the link has been closed on either side.
    fn is_closed(&self) -> bool;
}

/// Opens links on behalf of one peer.
pub trait LinkFactory: Send + Sync {
    fn open(&self, kind: LinkKind, counter: u64) -> Arc<dyn Link>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initiator_roles() {
        assert!(LinkKind::Launch.is_initiator());
        assert!(LinkKind::Subscription.is_initiator());
        assert!(!LinkKind::Answer.is_initiator());
        assert!(!LinkKind::Response.is_initiator());
    }
}
