//! In-memory transport for tests, simulations and demo overlays.
//!
//! A [`MemoryNetwork`] is a broker shared by every endpoint of a simulated
//! deployment. Initiator links mint a one-fragment offer carrying a routing
//! token; when an acceptor link consumes that fragment the two halves are
//! wired together, queued traffic drains in order, and the acceptor reports
//! ready. The initiator reports ready once the answer fragment travels back
//! to it, which happens out-of-band through whatever carries the handshake.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde_json::{json, Value};
use tracing::trace;

use crate::error::{Error, Result};
use crate::{Link, LinkEvent, LinkFactory, LinkKind, LinkNotice, NoticeSender};

#[derive(Debug, Default)]
struct Registry {
    next_token: u64,
    offers: HashMap<u64, Weak<MemoryLink>>,
}

/// Shared broker routing offers between in-memory endpoints.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    registry: Arc<Mutex<Registry>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a factory whose links report to `notices`.
    pub fn endpoint(&self, notices: NoticeSender) -> MemoryEndpoint {
        MemoryEndpoint {
            network: self.clone(),
            notices,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn register(&self, link: &Arc<MemoryLink>) -> u64 {
        let mut registry = self.lock();
        registry.next_token += 1;
        let token = registry.next_token;
        registry.offers.insert(token, Arc::downgrade(link));
        token
    }

    fn claim(&self, token: u64) -> Option<Arc<MemoryLink>> {
        self.lock().offers.remove(&token)?.upgrade()
    }

    fn forget(&self, token: u64) {
        self.lock().offers.remove(&token);
    }
}

/// Per-peer [`LinkFactory`] over a [`MemoryNetwork`].
#[derive(Debug, Clone)]
pub struct MemoryEndpoint {
    network: MemoryNetwork,
    notices: NoticeSender,
}

impl LinkFactory for MemoryEndpoint {
    fn open(&self, kind: LinkKind, counter: u64) -> Arc<dyn Link> {
        let link = Arc::new(MemoryLink {
            counter,
            kind,
            notices: self.notices.clone(),
            network: self.network.clone(),
            state: Mutex::new(LinkState::default()),
        });
        if kind.is_initiator() {
            let token = self.network.register(&link);
            link.lock_state().token = Some(token);
            link.notify(LinkEvent::Signal(offer_fragment(token)));
        }
        trace!(counter, ?kind, "opened in-memory link");
        link
    }
}

fn offer_fragment(token: u64) -> Value {
    json!({ "type": "offer", "token": token })
}

fn answer_fragment(token: u64) -> Value {
    json!({ "type": "answer", "token": token })
}

#[derive(Debug, Clone)]
struct Route {
    peer_counter: u64,
    peer_notices: NoticeSender,
    shut: Arc<AtomicBool>,
}

#[derive(Debug, Default)]
struct LinkState {
    token: Option<u64>,
    route: Option<Route>,
    queued: Vec<Vec<u8>>,
    closed: bool,
}

/// One half of an in-memory link pair.
#[derive(Debug)]
pub struct MemoryLink {
    counter: u64,
    kind: LinkKind,
    notices: NoticeSender,
    network: MemoryNetwork,
    state: Mutex<LinkState>,
}

impl MemoryLink {
    fn lock_state(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn notify(&self, event: LinkEvent) {
        let _ = self.notices.send(LinkNotice {
            counter: self.counter,
            event,
        });
    }

    fn accept_offer(&self, token: u64) -> Result<()> {
        let initiator = self
            .network
            .claim(token)
            .ok_or_else(|| Error::Signaling(format!("unknown offer token {token}")))?;
        let shut = Arc::new(AtomicBool::new(false));
        let ours;
        let theirs;
        {
            let mut state = self.lock_state();
            state.token = Some(token);
            state.route = Some(Route {
                peer_counter: initiator.counter,
                peer_notices: initiator.notices.clone(),
                shut: shut.clone(),
            });
            ours = std::mem::take(&mut state.queued);
        }
        {
            let mut state = initiator.lock_state();
            state.route = Some(Route {
                peer_counter: self.counter,
                peer_notices: self.notices.clone(),
                shut,
            });
            theirs = std::mem::take(&mut state.queued);
        }
        for payload in theirs {
            self.notify(LinkEvent::Message(payload));
        }
        for payload in ours {
            initiator.notify(LinkEvent::Message(payload));
        }
        self.notify(LinkEvent::Signal(answer_fragment(token)));
        self.notify(LinkEvent::Ready);
        trace!(token, acceptor = self.counter, initiator = initiator.counter, "paired");
        Ok(())
    }

    fn take_answer(&self, token: u64) -> Result<()> {
        {
            let state = self.lock_state();
            if state.route.is_none() {
                return Err(Error::Signaling("answer before pairing".into()));
            }
            if state.token != Some(token) {
                return Err(Error::Signaling(format!("token mismatch: {token}")));
            }
        }
        self.notify(LinkEvent::Ready);
        Ok(())
    }
}

impl Link for MemoryLink {
    fn counter(&self) -> u64 {
        self.counter
    }

    fn kind(&self) -> LinkKind {
        self.kind
    }

    fn signal(&self, fragment: Value) -> Result<()> {
        if self.lock_state().closed {
            return Err(Error::Closed);
        }
        let token = fragment
            .get("token")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::Signaling("fragment without token".into()))?;
        let role = fragment.get("type").and_then(Value::as_str).unwrap_or_default();
        match role {
            "offer" if !self.kind.is_initiator() => self.accept_offer(token),
            "answer" if self.kind.is_initiator() => self.take_answer(token),
            other => Err(Error::Signaling(format!("unexpected {other} fragment"))),
        }
    }

    fn send(&self, payload: &[u8]) -> Result<()> {
        let mut state = self.lock_state();
        if state.closed {
            return Err(Error::Closed);
        }
        match &state.route {
            Some(route) => {
                if route.shut.load(Ordering::Acquire) {
                    return Err(Error::Closed);
                }
                route
                    .peer_notices
                    .send(LinkNotice {
                        counter: route.peer_counter,
                        event: LinkEvent::Message(payload.to_vec()),
                    })
                    .map_err(|_| Error::Closed)
            }
            // Not paired yet: park the payload, it drains at pairing time.
            None => {
                state.queued.push(payload.to_vec());
                Ok(())
            }
        }
    }

    fn close(&self) {
        let route = {
            let mut state = self.lock_state();
            if state.closed {
                return;
            }
            state.closed = true;
            if let Some(token) = state.token.take() {
                self.network.forget(token);
            }
            state.route.clone()
        };
        if let Some(route) = route {
            if !route.shut.swap(true, Ordering::AcqRel) {
                let _ = route.peer_notices.send(LinkNotice {
                    counter: route.peer_counter,
                    event: LinkEvent::Closed,
                });
            }
        }
        self.notify(LinkEvent::Closed);
    }

    fn is_closed(&self) -> bool {
        let state = self.lock_state();
        state.closed
            || state
                .route
                .as_ref()
                .is_some_and(|route| route.shut.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notice_channel;

    fn fragment(notice: &LinkNotice) -> Value {
        match &notice.event {
            LinkEvent::Signal(value) => value.clone(),
            other => panic!("expected signal, got {other:?}"),
        }
    }

    #[test]
    fn offer_answer_pairing_reports_ready_in_order() {
        let network = MemoryNetwork::new();
        let (a_tx, mut a_rx) = notice_channel();
        let (b_tx, mut b_rx) = notice_channel();
        let a = network.endpoint(a_tx);
        let b = network.endpoint(b_tx);

        let initiator = a.open(LinkKind::Launch, 1);
        let offer = fragment(&a_rx.try_recv().expect("offer fragment"));

        let acceptor = b.open(LinkKind::Answer, 7);
        acceptor.signal(offer).expect("accept offer");

        let answer = fragment(&b_rx.try_recv().expect("answer fragment"));
        assert!(matches!(
            b_rx.try_recv().expect("acceptor ready").event,
            LinkEvent::Ready
        ));

        // The initiator only becomes ready once the answer reaches it.
        assert!(a_rx.try_recv().is_err());
        initiator.signal(answer).expect("take answer");
        assert!(matches!(
            a_rx.try_recv().expect("initiator ready").event,
            LinkEvent::Ready
        ));
    }

    #[test]
    fn traffic_queued_before_pairing_drains_in_order() {
        let network = MemoryNetwork::new();
        let (a_tx, mut a_rx) = notice_channel();
        let (b_tx, mut b_rx) = notice_channel();
        let a = network.endpoint(a_tx);
        let b = network.endpoint(b_tx);

        let initiator = a.open(LinkKind::Subscription, 3);
        let offer = fragment(&a_rx.try_recv().expect("offer"));
        initiator.send(b"first").expect("queued");
        initiator.send(b"second").expect("queued");

        let acceptor = b.open(LinkKind::Response, 9);
        acceptor.signal(offer).expect("pairing");

        let first = b_rx.try_recv().expect("first payload");
        let second = b_rx.try_recv().expect("second payload");
        assert_eq!(first.counter, 9);
        assert!(matches!(first.event, LinkEvent::Message(ref p) if p == b"first"));
        assert!(matches!(second.event, LinkEvent::Message(ref p) if p == b"second"));

        // Live traffic in the other direction lands tagged with the
        // initiator's own counter.
        acceptor.send(b"reply").expect("live send");
        let reply = a_rx.try_recv().expect("reply payload");
        assert_eq!(reply.counter, 3);
        assert!(matches!(reply.event, LinkEvent::Message(ref p) if p == b"reply"));
    }

    #[test]
    fn close_reaches_both_sides_and_rejects_sends() {
        let network = MemoryNetwork::new();
        let (a_tx, mut a_rx) = notice_channel();
        let (b_tx, mut b_rx) = notice_channel();
        let a = network.endpoint(a_tx);
        let b = network.endpoint(b_tx);

        let initiator = a.open(LinkKind::Launch, 1);
        let offer = fragment(&a_rx.try_recv().expect("offer"));
        let acceptor = b.open(LinkKind::Answer, 2);
        acceptor.signal(offer).expect("pairing");

        initiator.close();
        assert!(initiator.is_closed());
        assert!(acceptor.is_closed());
        assert!(matches!(
            a_rx.try_recv().expect("local close").event,
            LinkEvent::Closed
        ));
        // Drain the acceptor's pairing events, then observe the close.
        let mut saw_close = false;
        while let Ok(notice) = b_rx.try_recv() {
            if matches!(notice.event, LinkEvent::Closed) {
                saw_close = true;
            }
        }
        assert!(saw_close);
        assert!(matches!(acceptor.send(b"late"), Err(Error::Closed)));
        assert!(matches!(initiator.send(b"late"), Err(Error::Closed)));
    }

    #[test]
    fn unknown_token_is_a_signaling_error() {
        let network = MemoryNetwork::new();
        let (tx, _rx) = notice_channel();
        let endpoint = network.endpoint(tx);
        let acceptor = endpoint.open(LinkKind::Answer, 4);
        let err = acceptor
            .signal(json!({ "type": "offer", "token": 999 }))
            .expect_err("no such offer");
        assert!(matches!(err, Error::Signaling(_)));
    }
}
