//! The membership engine: join walk, offer distribution, weight exchange,
//! lease renewal and message dispatch.
//!
//! # Joining
//!
//! A peer enters the overlay in three moves. [`Scamp::launch`] produces one
//! subscription request the application must carry out-of-band to any
//! current member. That member calls [`Scamp::answer`], which re-injects the
//! request with a hop budget of `2 * |partial_view| + 1` and pushes it along
//! a weighted random walk; whoever holds the request when the budget runs
//! out becomes the joiner's contact point, admits it inbound, and asks the
//! new peer for enough offers to populate the overlay. The accept message
//! travels the reverse path back to the member that answered, which hands it
//! to the joiner for [`Scamp::handshake`].
//!
//! # Dispatch model
//!
//! The engine is a single-owner state machine: every mutation happens inside
//! one of its methods, driven by one ordered event stream (link notices,
//! settle timers, application commands). Handlers run to completion; the
//! only asynchrony is external.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, trace, warn};

use gossamer_link::{Link, LinkEvent, LinkFactory, LinkKind, LinkNotice};

use crate::backtrack::{Backtrack, Identity};
use crate::config::MembershipConfig;
use crate::error::{Error, Result};
use crate::messages::{Category, Message};
use crate::pending::{Pending, Promotion};
use crate::uid::PeerId;
use crate::view::View;

/// Connection state derived from the two view sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Both views are empty.
    Disconnect,
    /// Exactly one view is populated.
    Partial,
    /// Both views are populated.
    Connect,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnect => write!(f, "disconnect"),
            Self::Partial => write!(f, "partial"),
            Self::Connect => write!(f, "connect"),
        }
    }
}

/// Notifications the engine pushes to the application layer.
#[derive(Debug, Clone)]
pub enum MembershipEvent {
    /// The connection state changed after a view mutation.
    StateChange(ConnectionState),
    /// A launch offer is ready for out-of-band delivery to a member.
    Launch(Message),
    /// An accept message is ready for out-of-band delivery to the joiner.
    Answer(Message),
    /// A payload the engine does not interpret arrived on `from`.
    Churn { from: u64, body: Value },
}

/// A delayed action scheduled behind the settle delay.
///
/// There is no cancellation: once scheduled, the action fires even if the
/// engine state has moved on, and tolerates whatever it finds.
#[derive(Debug, Clone)]
pub enum Settle {
    /// Snapshot the launch draft and hand it to the application.
    EmitLaunch { counter: u64 },
    /// Snapshot an accept draft and route it toward `origin`.
    DeliverAnswer { counter: u64, origin: Identity },
    /// Snapshot a response draft and send it along the reverse path.
    SendDraft { counter: u64 },
    /// Bundle the drafted offers and answer the requester.
    OfferBatch { dest: Identity, counters: Vec<u64> },
}

/// Callback invoked with an offer message once its fragments settled.
pub type Callback = Box<dyn FnMut(Message) + Send>;

enum ViewSide {
    Partial,
    In,
}

/// SCAMP membership engine.
///
/// Owns the two views, the pending table, the reverse-routing table and the
/// local counter. See the module docs for the join choreography.
pub struct Scamp {
    uid: PeerId,
    counter: u64,
    state: ConnectionState,
    partial_view: View,
    in_view: View,
    pending: Pending,
    backtrack: Backtrack,
    /// Offer messages under construction, accumulating signaling fragments
    /// until a settle snapshot sends them.
    drafts: HashMap<u64, Message>,
    /// Every live link by creation counter, for resolving inbound notices.
    links: HashMap<u64, Arc<dyn Link>>,
    factory: Arc<dyn LinkFactory>,
    config: MembershipConfig,
    rng: StdRng,
    settle_tx: mpsc::UnboundedSender<Settle>,
    events: broadcast::Sender<MembershipEvent>,
    launch_callback: Option<Callback>,
    answer_callback: Option<Callback>,
}

impl Scamp {
    pub fn new(
        uid: PeerId,
        config: MembershipConfig,
        factory: Arc<dyn LinkFactory>,
        settle_tx: mpsc::UnboundedSender<Settle>,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        let backtrack = Backtrack::new(config.backtrack_capacity);
        Self {
            uid,
            counter: 0,
            state: ConnectionState::Disconnect,
            partial_view: View::new(),
            in_view: View::new(),
            pending: Pending::new(),
            backtrack,
            drafts: HashMap::new(),
            links: HashMap::new(),
            factory,
            config,
            rng: StdRng::from_entropy(),
            settle_tx,
            events,
            launch_callback: None,
            answer_callback: None,
        }
    }

    pub fn uid(&self) -> PeerId {
        self.uid
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Subscribe to engine notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<MembershipEvent> {
        self.events.subscribe()
    }

    /// Handle for creating subscriptions without borrowing the engine.
    pub fn event_sender(&self) -> broadcast::Sender<MembershipEvent> {
        self.events.clone()
    }

    fn increment(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }

    /// Generate the very first subscription request. Once its fragments
    /// settled it is handed to `callback` (or emitted as
    /// [`MembershipEvent::Launch`]); the application must deliver it
    /// out-of-band to some current member.
    pub fn launch(&mut self, callback: Option<Callback>) {
        self.launch_callback = callback;
        if let Some(counter) = self.generate_offers(1, LinkKind::Launch, None).pop() {
            debug!(counter, "launching subscription");
            self.schedule_settle(Settle::EmitLaunch { counter });
        }
    }

    /// Act as the rendezvous for a joining peer: re-inject its launch
    /// request with a hop budget scaled to the local fan-out. The eventual
    /// accept message comes back through `callback` (or
    /// [`MembershipEvent::Answer`]).
    pub fn answer(&mut self, message: Message, callback: Option<Callback>) -> Result<()> {
        let Message::SubscriptionRequest { uid, counter, offer, .. } = message else {
            return Err(Error::UnexpectedMessage("answer expects a subscription request"));
        };
        self.answer_callback = callback;
        self.backtrack.insert((uid, counter), None);
        let hop = 2 * self.partial_view.len() as u32 + 1;
        debug!(peer = %uid, hop, "answering join request");
        self.on_forwarded_contact(uid, counter, &offer, hop);
        Ok(())
    }

    /// Complete the join handshake with the accept message the application
    /// carried back from the overlay.
    pub fn handshake(&mut self, message: Message) -> Result<()> {
        let Message::SubscriptionResponse { uid, dest_counter, offer, .. } = message else {
            return Err(Error::UnexpectedMessage("handshake expects a subscription response"));
        };
        let Some(entry) = self.pending.by_counter_mut(dest_counter) else {
            return Err(Error::UnknownHandshake(dest_counter));
        };
        entry.peer = Some(uid);
        entry.promotion = Some(Promotion::Outbound { peer: uid });
        let link = entry.link.clone();
        debug!(peer = %uid, counter = dest_counter, "completing join handshake");
        for fragment in offer {
            if let Err(err) = link.signal(fragment) {
                warn!(%err, "handshake signaling failed");
            }
        }
        Ok(())
    }

    /// Mint `k` offers of the given kind, park their links in the pending
    /// table and their messages in the draft table. Returns the counters
    /// assigned to the new drafts.
    fn generate_offers(
        &mut self,
        k: usize,
        kind: LinkKind,
        dest: Option<Identity>,
    ) -> Vec<u64> {
        let mut counters = Vec::with_capacity(k);
        for _ in 0..k {
            let counter = self.increment();
            let draft = match kind {
                LinkKind::Launch | LinkKind::Subscription => Message::SubscriptionRequest {
                    uid: self.uid,
                    counter,
                    offer: Vec::new(),
                    hop: 0,
                },
                LinkKind::Answer | LinkKind::Response => {
                    let Some((dest_uid, dest_counter)) = dest else {
                        warn!(?kind, "offer of this kind needs a destination");
                        return counters;
                    };
                    Message::SubscriptionResponse {
                        uid: self.uid,
                        counter,
                        dest_uid,
                        dest_counter,
                        offer: Vec::new(),
                    }
                }
            };
            let link = self.factory.open(kind, counter);
            self.links.insert(counter, link.clone());
            self.pending.add(dest.map(|(peer, _)| peer), link);
            self.drafts.insert(counter, draft);
            counters.push(counter);
        }
        counters
    }

    /// Walk or terminate the indirection for a subscription request holding
    /// hop budget. While budget remains the request moves to a neighbor
    /// drawn from the normalized weight distribution; at the floor this peer
    /// becomes the joiner's contact point.
    fn on_forwarded_contact(&mut self, uid: PeerId, counter: u64, offer: &[Value], hop: u32) {
        if hop == 1 && uid == self.uid && self.partial_view.is_empty() {
            return;
        }
        if hop > 1 || (uid == self.uid && hop == 1) {
            if self.partial_view.is_empty() {
                trace!(peer = %uid, hop, "no neighbor to continue the walk");
            } else {
                self.partial_view.normalize_weights();
                let draw = self.rng.gen::<f64>();
                if let Some(index) = self.partial_view.pick_weighted(draw) {
                    let forwarded = Message::SubscriptionRequest {
                        uid,
                        counter,
                        offer: offer.to_vec(),
                        hop: hop.saturating_sub(1).max(1),
                    };
                    if let Some(entry) = self.partial_view.get(index) {
                        let link = entry.link.clone();
                        trace!(peer = %uid, hop, index, "forwarding walk");
                        self.send_on(&link, &forwarded);
                    }
                }
            }
        }
        if hop == 1 && uid != self.uid {
            let Some(offer_counter) =
                self.generate_offers(1, LinkKind::Answer, Some((uid, counter))).pop()
            else {
                return;
            };
            self.pending
                .set_promotion(offer_counter, Promotion::Contact { peer: uid });
            if let Some(entry) = self.pending.by_counter(offer_counter) {
                let link = entry.link.clone();
                for fragment in offer {
                    if let Err(err) = link.signal(fragment.clone()) {
                        warn!(%err, "signaling joiner fragment failed");
                    }
                }
            }
            debug!(peer = %uid, "acting as contact point");
            self.schedule_settle(Settle::DeliverAnswer {
                counter: offer_counter,
                origin: (uid, counter),
            });
        }
    }

    /// Decide whether to keep a sprayed subscription. Acceptance probability
    /// is `1 / (1 + |partial_view|)`, and only offers whose hop budget is
    /// exhausted qualify; everything else moves to one uniformly random
    /// neighbor, losing any hop context.
    fn on_forwarded_subscription(
        &mut self,
        uid: PeerId,
        counter: u64,
        offer: Vec<Value>,
        hop: u32,
    ) {
        if hop >= 1 {
            return;
        }
        let fanout = self.partial_view.len();
        let accept = uid != self.uid
            && !self.partial_view.contains(&uid)
            && !self.pending.contains(&uid)
            && self.rng.gen::<f64>() <= 1.0 / (1.0 + fanout as f64);
        if accept {
            let Some(offer_counter) =
                self.generate_offers(1, LinkKind::Response, Some((uid, counter))).pop()
            else {
                return;
            };
            self.pending
                .set_promotion(offer_counter, Promotion::Outbound { peer: uid });
            if let Some(entry) = self.pending.by_counter(offer_counter) {
                let link = entry.link.clone();
                for fragment in &offer {
                    if let Err(err) = link.signal(fragment.clone()) {
                        warn!(%err, "signaling subscriber fragment failed");
                    }
                }
            }
            debug!(peer = %uid, fanout, "accepted forwarded subscription");
            self.schedule_settle(Settle::SendDraft { counter: offer_counter });
        } else if self.partial_view.is_empty() {
            trace!(peer = %uid, "no neighbor to pass the subscription to");
        } else {
            let index = self.rng.gen_range(0..self.partial_view.len());
            if let Some(entry) = self.partial_view.get(index) {
                let link = entry.link.clone();
                self.send_on(&link, &Message::SubscriptionRequest { uid, counter, offer, hop: 0 });
            }
        }
    }

    /// Spray a bundle of offers: keep the first for ourselves when the
    /// partial view is empty, otherwise pair one offer per occupied slot.
    fn dispatch_subscriptions(&mut self, offers: Vec<Message>) {
        if self.partial_view.is_empty() {
            if let Some(Message::SubscriptionRequest { uid, counter, offer, .. }) =
                offers.into_iter().next()
            {
                self.on_forwarded_subscription(uid, counter, offer, 0);
            }
        } else {
            for (index, offer) in offers.iter().take(self.partial_view.len()).enumerate() {
                if let Some(entry) = self.partial_view.get(index) {
                    let link = entry.link.clone();
                    self.send_on(&link, offer);
                }
            }
        }
    }

    /// Periodic weight exchange: renormalize both views and tell each
    /// neighbor whose arc weight actually changed. An update tagged as
    /// coming from the sender's in-view describes the arc our partial view
    /// holds, and vice versa.
    pub fn on_weight_tick(&mut self) {
        for index in self.in_view.normalize_weights() {
            if let Some(entry) = self.in_view.get(index) {
                let (link, weight) = (entry.link.clone(), entry.weight);
                self.send_on(
                    &link,
                    &Message::WeightUpdate { uid: self.uid, is_from_in_view: true, weight },
                );
            }
        }
        for index in self.partial_view.normalize_weights() {
            if let Some(entry) = self.partial_view.get(index) {
                let (link, weight) = (entry.link.clone(), entry.weight);
                self.send_on(
                    &link,
                    &Message::WeightUpdate { uid: self.uid, is_from_in_view: false, weight },
                );
            }
        }
        if let Some(ttl) = self.config.pending_ttl {
            self.sweep_pending(ttl);
        }
    }

    /// Drop handshakes that have been in flight longer than `ttl`.
    pub fn sweep_pending(&mut self, ttl: Duration) {
        for entry in self.pending.sweep(ttl) {
            debug!(counter = entry.link.counter(), "dropping abandoned handshake");
            self.links.remove(&entry.link.counter());
            entry.link.close();
        }
    }

    /// Periodic lease renewal: drop every inbound arc, forcing the peers
    /// that held us in their partial views to resubscribe us, then ask one
    /// random neighbor to restart the offer cycle.
    pub fn on_lease_tick(&mut self) {
        if self.partial_view.is_empty() {
            return;
        }
        debug!(in_view = self.in_view.len(), "lease over, resubscribing");
        self.in_view.clear();
        self.check_connection_state();
        let index = self.rng.gen_range(0..self.partial_view.len());
        if let Some(entry) = self.partial_view.get(index) {
            let link = entry.link.clone();
            let counter = self.increment();
            self.send_on(&link, &Message::LeaseOver { uid: self.uid, counter });
        }
    }

    /// Dispatch one inbound message. Requests are recorded for reverse
    /// routing before anything else happens.
    pub fn receive(&mut self, link: Arc<dyn Link>, message: Message) {
        if message.category() == Category::Request {
            if let Some(identity) = message.identity() {
                self.backtrack.insert_if_absent(identity, Some(link.clone()));
            }
        }
        match message {
            Message::LeaseOver { uid, .. } => {
                debug!(peer = %uid, "lease expired upstream, soliciting offers");
                let counter = self.increment();
                let k = self.partial_view.len();
                self.send_on(&link, &Message::OfferRequest { uid: self.uid, counter, k });
            }
            Message::OfferResponse { uid, offers, .. } => {
                debug!(peer = %uid, offers = offers.len(), "received offer bundle");
                for offer in &offers {
                    if let Some(identity) = offer.identity() {
                        self.backtrack.insert_if_absent(identity, Some(link.clone()));
                    }
                }
                self.dispatch_subscriptions(offers);
            }
            Message::OfferRequest { uid, counter, k } => {
                let wanted = k.max(1);
                debug!(peer = %uid, wanted, "generating requested offers");
                let counters =
                    self.generate_offers(wanted, LinkKind::Subscription, Some((uid, counter)));
                self.schedule_settle(Settle::OfferBatch { dest: (uid, counter), counters });
            }
            Message::WeightUpdate { uid, is_from_in_view, weight } => {
                let view = if is_from_in_view { &mut self.partial_view } else { &mut self.in_view };
                if view.update_weight_peer(&uid, weight) {
                    trace!(peer = %uid, weight, "applied weight update");
                }
            }
            Message::SubscriptionRequest { uid, counter, offer, hop } => {
                self.on_forwarded_contact(uid, counter, &offer, hop);
                self.on_forwarded_subscription(uid, counter, offer, hop);
            }
            Message::SubscriptionResponse { uid, counter, dest_uid, dest_counter, offer } => {
                if dest_uid == self.uid {
                    let Some(entry) = self.pending.by_counter_mut(dest_counter) else {
                        trace!(counter = dest_counter, "response for an unknown handshake");
                        return;
                    };
                    entry.peer = Some(uid);
                    entry.promotion = Some(Promotion::Inbound { peer: uid });
                    let pending_link = entry.link.clone();
                    for fragment in offer {
                        if let Err(err) = pending_link.signal(fragment) {
                            warn!(%err, "completing inbound handshake failed");
                        }
                    }
                } else {
                    let message = Message::SubscriptionResponse {
                        uid,
                        counter,
                        dest_uid,
                        dest_counter,
                        offer,
                    };
                    match self.backtrack.route(&(dest_uid, dest_counter)) {
                        Some(None) => self.deliver_answer(message),
                        _ => self.send(message, None),
                    }
                }
            }
            Message::App { body } => {
                let _ = self
                    .events
                    .send(MembershipEvent::Churn { from: link.counter(), body });
            }
        }
    }

    /// Send a message on a specific link, or, for responses without one,
    /// along the recorded reverse path. A missing route drops the message.
    pub fn send(&mut self, message: Message, link: Option<Arc<dyn Link>>) {
        if let Some(link) = link {
            self.send_on(&link, &message);
            return;
        }
        if message.category() != Category::Response {
            trace!("link-less send of a non-response message dropped");
            return;
        }
        let dest = match &message {
            Message::SubscriptionResponse { dest_uid, dest_counter, .. }
            | Message::OfferResponse { dest_uid, dest_counter, .. } => (*dest_uid, *dest_counter),
            _ => return,
        };
        match self.backtrack.route(&dest) {
            Some(Some(route)) => self.send_on(&route, &message),
            Some(None) => trace!(peer = %dest.0, "response addressed to a local marker"),
            None => {
                trace!(peer = %dest.0, counter = dest.1, "no reverse route, dropping response");
            }
        }
    }

    /// Up to `k` distinct random links from the partial view.
    pub fn get_peers(&mut self, k: Option<usize>) -> Vec<Arc<dyn Link>> {
        let len = self.partial_view.len();
        let take = k.unwrap_or(len).min(len);
        if take == 0 {
            return Vec::new();
        }
        rand::seq::index::sample(&mut self.rng, len, take)
            .into_iter()
            .filter_map(|index| self.partial_view.get(index).map(|entry| entry.link.clone()))
            .collect()
    }

    /// Push a message to every neighbor in the partial view.
    pub fn send_to_partial_view(&self, message: &Message) {
        for entry in self.partial_view.iter() {
            self.send_on(&entry.link, message);
        }
    }

    /// Gossip an application payload to the partial view.
    pub fn broadcast(&self, body: Value) {
        self.send_to_partial_view(&Message::App { body });
    }

    /// Process one link notice from the inbound event channel.
    pub fn handle_notice(&mut self, notice: LinkNotice) {
        match notice.event {
            LinkEvent::Signal(fragment) => match self.drafts.get_mut(&notice.counter) {
                Some(draft) => {
                    if !draft.push_fragment(fragment) {
                        warn!(counter = notice.counter, "draft cannot carry fragments");
                    }
                }
                None => trace!(counter = notice.counter, "fragment for an unknown draft"),
            },
            LinkEvent::Ready => self.on_link_ready(notice.counter),
            LinkEvent::Message(bytes) => {
                let Some(link) = self.links.get(&notice.counter).cloned() else {
                    trace!(counter = notice.counter, "payload on an unknown link");
                    return;
                };
                match Message::from_bytes(&bytes) {
                    Ok(message) => self.receive(link, message),
                    Err(err) => {
                        warn!(counter = notice.counter, %err, "dropping undecodable frame");
                    }
                }
            }
            LinkEvent::Closed => self.purge_link(notice.counter, "closed"),
            LinkEvent::Error(reason) => {
                warn!(counter = notice.counter, %reason, "link failure");
                self.purge_link(notice.counter, "error");
            }
        }
    }

    /// Run a settled action with a snapshot of its draft.
    pub fn handle_settle(&mut self, settle: Settle) {
        match settle {
            Settle::EmitLaunch { counter } => {
                let Some(draft) = self.drafts.remove(&counter) else {
                    trace!(counter, "launch draft vanished before settling");
                    return;
                };
                match self.launch_callback.as_mut() {
                    Some(callback) => callback(draft),
                    None => {
                        let _ = self.events.send(MembershipEvent::Launch(draft));
                    }
                }
            }
            Settle::DeliverAnswer { counter, origin } => {
                let Some(draft) = self.drafts.remove(&counter) else {
                    trace!(counter, "accept draft vanished before settling");
                    return;
                };
                match self.backtrack.route(&origin) {
                    Some(None) => self.deliver_answer(draft),
                    Some(Some(link)) => self.send_on(&link, &draft),
                    None => trace!(peer = %origin.0, "reverse route evicted, dropping accept"),
                }
            }
            Settle::SendDraft { counter } => {
                let Some(draft) = self.drafts.remove(&counter) else {
                    return;
                };
                self.send(draft, None);
            }
            Settle::OfferBatch { dest, counters } => {
                let offers: Vec<Message> = counters
                    .iter()
                    .filter_map(|counter| self.drafts.remove(counter))
                    .collect();
                let response = Message::OfferResponse {
                    uid: self.uid,
                    dest_uid: dest.0,
                    dest_counter: dest.1,
                    offers,
                };
                self.send(response, None);
            }
        }
    }

    fn deliver_answer(&mut self, message: Message) {
        match self.answer_callback.as_mut() {
            Some(callback) => callback(message),
            None => {
                let _ = self.events.send(MembershipEvent::Answer(message));
            }
        }
    }

    fn on_link_ready(&mut self, counter: u64) {
        let promotion = match self.pending.by_counter(counter) {
            Some(entry) => match entry.promotion {
                Some(promotion) => promotion,
                None => {
                    trace!(counter, "link ready before its peer is known");
                    return;
                }
            },
            None => {
                trace!(counter, "ready on a link that is not pending");
                return;
            }
        };
        let Some(entry) = self.pending.remove_by_counter(counter) else {
            return;
        };
        match promotion {
            Promotion::Contact { peer } => {
                self.admit(ViewSide::In, peer, entry.link.clone());
                let request_counter = self.increment();
                let k = self.partial_view.len() + self.config.extra_offers;
                debug!(peer = %peer, k, "joiner admitted, requesting offers");
                self.send_on(
                    &entry.link,
                    &Message::OfferRequest { uid: self.uid, counter: request_counter, k },
                );
            }
            Promotion::Outbound { peer } => {
                debug!(peer = %peer, "outbound arc established");
                self.admit(ViewSide::Partial, peer, entry.link);
            }
            Promotion::Inbound { peer } => {
                debug!(peer = %peer, "inbound arc established");
                self.admit(ViewSide::In, peer, entry.link);
            }
        }
        self.check_connection_state();
    }

    fn admit(&mut self, side: ViewSide, peer: PeerId, link: Arc<dyn Link>) {
        let view = match side {
            ViewSide::Partial => &mut self.partial_view,
            ViewSide::In => &mut self.in_view,
        };
        if view.contains(&peer) {
            trace!(peer = %peer, "replacing stale arc");
            view.del_peer(&peer);
        }
        view.add(peer, link);
    }

    /// Purge a failed or closed link from every structure that may hold it.
    fn purge_link(&mut self, counter: u64, cause: &str) {
        let mut touched = self.links.remove(&counter).is_some();
        touched |= self.partial_view.del_by_link(counter);
        touched |= self.in_view.del_by_link(counter);
        touched |= self.pending.remove_by_counter(counter).is_some();
        if touched {
            debug!(counter, cause, "purged link");
            self.check_connection_state();
        }
    }

    /// Recompute the connection state from the current view sizes and notify
    /// on change. Always derived, never tracked incrementally.
    fn check_connection_state(&mut self) {
        let next = match (self.partial_view.is_empty(), self.in_view.is_empty()) {
            (false, false) => ConnectionState::Connect,
            (true, true) => ConnectionState::Disconnect,
            _ => ConnectionState::Partial,
        };
        if next != self.state {
            debug!(from = %self.state, to = %next, "connection state changed");
            self.state = next;
            let _ = self.events.send(MembershipEvent::StateChange(next));
        }
    }

    fn send_on(&self, link: &Arc<dyn Link>, message: &Message) {
        match message.to_bytes() {
            Ok(bytes) => {
                if let Err(err) = link.send(&bytes) {
                    debug!(counter = link.counter(), %err, "dropping message on failed link");
                }
            }
            Err(err) => warn!(%err, "failed to encode message"),
        }
    }

    fn schedule_settle(&self, settle: Settle) {
        let tx = self.settle_tx.clone();
        let delay = self.config.settle_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(settle);
        });
    }
}
