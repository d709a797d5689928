//! Wire messages of the membership protocol.
//!
//! Offers (`offer` fields) are opaque transport signaling fragments: the
//! engine never inspects their contents, it only accumulates and forwards
//! them. The `hop` field of a subscription request separates the two phases
//! of a join: values >= 1 keep the request inside the weighted walk, 0 makes
//! it an acceptable subscription.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::uid::PeerId;

/// Reverse-routing class of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    /// Arrival is recorded so a later response can travel the reverse path.
    Request,
    /// Routed back along a recorded reverse path.
    Response,
    /// No routing bookkeeping.
    None,
}

/// Everything the membership layer puts on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// A peer asking to enter the overlay, or a sprayed copy of that ask.
    SubscriptionRequest {
        uid: PeerId,
        counter: u64,
        offer: Vec<Value>,
        #[serde(default)]
        hop: u32,
    },
    /// Acceptance of a subscription, carrying the answer fragments.
    SubscriptionResponse {
        uid: PeerId,
        counter: u64,
        dest_uid: PeerId,
        dest_counter: u64,
        offer: Vec<Value>,
    },
    /// Ask the receiver for `k` fresh subscription offers.
    OfferRequest { uid: PeerId, counter: u64, k: usize },
    /// The requested offers, bundled.
    OfferResponse {
        uid: PeerId,
        dest_uid: PeerId,
        dest_counter: u64,
        offers: Vec<Message>,
    },
    /// One side of an arc renormalized its weight.
    WeightUpdate {
        uid: PeerId,
        is_from_in_view: bool,
        weight: f64,
    },
    /// The sender's inbound subscriptions expired; it is resubscribing.
    LeaseOver { uid: PeerId, counter: u64 },
    /// Application payload the engine does not interpret.
    App { body: Value },
}

impl Message {
    pub fn category(&self) -> Category {
        match self {
            Message::SubscriptionRequest { .. }
            | Message::OfferRequest { .. }
            | Message::WeightUpdate { .. }
            | Message::LeaseOver { .. } => Category::Request,
            Message::SubscriptionResponse { .. } | Message::OfferResponse { .. } => {
                Category::Response
            }
            Message::App { .. } => Category::None,
        }
    }

    /// `(origin uid, origin counter)` for messages that carry one.
    pub fn identity(&self) -> Option<(PeerId, u64)> {
        match self {
            Message::SubscriptionRequest { uid, counter, .. }
            | Message::SubscriptionResponse { uid, counter, .. }
            | Message::OfferRequest { uid, counter, .. }
            | Message::LeaseOver { uid, counter } => Some((*uid, *counter)),
            Message::OfferResponse { .. } | Message::WeightUpdate { .. } | Message::App { .. } => {
                None
            }
        }
    }

    /// Attach a signaling fragment to an offer-bearing draft.
    /// Returns false when the variant has nowhere to put it.
    pub fn push_fragment(&mut self, fragment: Value) -> bool {
        match self {
            Message::SubscriptionRequest { offer, .. }
            | Message::SubscriptionResponse { offer, .. } => {
                offer.push(fragment);
                true
            }
            _ => false,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(Error::from)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn uid(seed: &[u8]) -> PeerId {
        PeerId::from_seed(seed)
    }

    #[test]
    fn categories() {
        let a = uid(b"a");
        assert_eq!(
            Message::SubscriptionRequest { uid: a, counter: 1, offer: vec![], hop: 0 }.category(),
            Category::Request
        );
        assert_eq!(
            Message::OfferResponse { uid: a, dest_uid: a, dest_counter: 1, offers: vec![] }
                .category(),
            Category::Response
        );
        assert_eq!(Message::App { body: json!({}) }.category(), Category::None);
    }

    #[test]
    fn identity_only_where_a_counter_exists() {
        let a = uid(b"a");
        let request = Message::OfferRequest { uid: a, counter: 9, k: 3 };
        assert_eq!(request.identity(), Some((a, 9)));
        let update = Message::WeightUpdate { uid: a, is_from_in_view: true, weight: 0.5 };
        assert_eq!(update.identity(), None);
    }

    #[test]
    fn hop_defaults_to_zero_on_decode() {
        let raw = format!(
            r#"{{"type":"subscription_request","uid":{},"counter":4,"offer":[]}}"#,
            serde_json::to_string(&uid(b"a")).expect("uid json")
        );
        let decoded = Message::from_bytes(raw.as_bytes()).expect("decode");
        assert!(
            matches!(decoded, Message::SubscriptionRequest { hop: 0, counter: 4, .. }),
            "stripped hop must read back as 0"
        );
    }

    #[test]
    fn fragments_only_attach_to_offer_bearing_messages() {
        let a = uid(b"a");
        let mut request = Message::SubscriptionRequest { uid: a, counter: 1, offer: vec![], hop: 0 };
        assert!(request.push_fragment(json!({ "token": 1 })));
        assert!(matches!(
            request,
            Message::SubscriptionRequest { ref offer, .. } if offer.len() == 1
        ));
        let mut lease = Message::LeaseOver { uid: a, counter: 2 };
        assert!(!lease.push_fragment(json!({ "token": 1 })));
    }
}
