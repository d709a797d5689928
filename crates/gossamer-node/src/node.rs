//! The node event loop and its command surface.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::warn;

use gossamer_link::{notice_channel, Link, LinkFactory, NoticeReceiver, NoticeSender};
use gossamer_membership::{
    ConnectionState, MembershipConfig, MembershipEvent, Message, PeerId, Scamp, Settle,
};

/// How long the in-process courier waits for each leg of a join.
const RENDEZVOUS_TIMEOUT: Duration = Duration::from_secs(5);

enum NodeCommand {
    Launch,
    Answer(Message),
    Handshake(Message),
    Broadcast(serde_json::Value),
    Peers {
        k: Option<usize>,
        reply: oneshot::Sender<Vec<Arc<dyn Link>>>,
    },
    State {
        reply: oneshot::Sender<ConnectionState>,
    },
    Shutdown,
}

/// One overlay peer: a membership engine plus the task dispatching its
/// events.
pub struct Node {
    uid: PeerId,
    commands: mpsc::UnboundedSender<NodeCommand>,
    events: broadcast::Sender<MembershipEvent>,
    task: JoinHandle<()>,
}

impl Node {
    /// Spawn a node. `build` receives the inbound event channel the node's
    /// links must report to and returns the link factory to open them with.
    pub fn spawn<F, B>(uid: PeerId, config: MembershipConfig, build: B) -> Self
    where
        F: LinkFactory + 'static,
        B: FnOnce(NoticeSender) -> F,
    {
        let (notice_tx, notice_rx) = notice_channel();
        let (settle_tx, settle_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let factory: Arc<dyn LinkFactory> = Arc::new(build(notice_tx));
        let engine = Scamp::new(uid, config.clone(), factory, settle_tx);
        let events = engine.event_sender();
        let task = tokio::spawn(run(engine, config, notice_rx, settle_rx, command_rx));
        Self {
            uid,
            commands: command_tx,
            events,
            task,
        }
    }

    pub fn uid(&self) -> PeerId {
        self.uid
    }

    /// Subscribe to the engine's notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<MembershipEvent> {
        self.events.subscribe()
    }

    /// Generate the launch offer; it arrives as [`MembershipEvent::Launch`]
    /// once its fragments settled.
    pub fn launch(&self) {
        let _ = self.commands.send(NodeCommand::Launch);
    }

    /// Answer a joiner's launch offer as a rendezvous member.
    pub fn answer(&self, message: Message) {
        let _ = self.commands.send(NodeCommand::Answer(message));
    }

    /// Complete a join with the accept message carried back to this node.
    pub fn handshake(&self, message: Message) {
        let _ = self.commands.send(NodeCommand::Handshake(message));
    }

    /// Gossip an application payload to every outbound neighbor.
    pub fn broadcast(&self, body: serde_json::Value) {
        let _ = self.commands.send(NodeCommand::Broadcast(body));
    }

    /// Up to `k` distinct random outbound links.
    pub async fn peers(&self, k: Option<usize>) -> Vec<Arc<dyn Link>> {
        let (reply, response) = oneshot::channel();
        if self.commands.send(NodeCommand::Peers { k, reply }).is_err() {
            return Vec::new();
        }
        response.await.unwrap_or_default()
    }

    /// Current connection state.
    pub async fn state(&self) -> ConnectionState {
        let (reply, response) = oneshot::channel();
        if self.commands.send(NodeCommand::State { reply }).is_err() {
            return ConnectionState::Disconnect;
        }
        response.await.unwrap_or(ConnectionState::Disconnect)
    }

    /// Resolve once the node is connected in both directions. Returns
    /// immediately when it already is.
    pub async fn ready(&self) {
        let mut events = self.subscribe();
        if self.state().await == ConnectionState::Connect {
            return;
        }
        loop {
            match events.recv().await {
                Ok(MembershipEvent::StateChange(ConnectionState::Connect)) => return,
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => {
                    if self.state().await == ConnectionState::Connect {
                        return;
                    }
                }
                Err(RecvError::Closed) => return,
            }
        }
    }

    /// Stop the dispatch loop and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.commands.send(NodeCommand::Shutdown);
        let _ = self.task.await;
    }
}

async fn run(
    mut engine: Scamp,
    config: MembershipConfig,
    mut notices: NoticeReceiver,
    mut settles: mpsc::UnboundedReceiver<Settle>,
    mut commands: mpsc::UnboundedReceiver<NodeCommand>,
) {
    let mut weights = time::interval_at(
        time::Instant::now() + config.weight_update,
        config.weight_update,
    );
    weights.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut lease = config.lease.map(|period| {
        let mut interval = time::interval_at(time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval
    });
    loop {
        tokio::select! {
            Some(notice) = notices.recv() => engine.handle_notice(notice),
            Some(settle) = settles.recv() => engine.handle_settle(settle),
            command = commands.recv() => match command {
                None | Some(NodeCommand::Shutdown) => break,
                Some(command) => apply(&mut engine, command),
            },
            _ = weights.tick() => engine.on_weight_tick(),
            _ = lease_tick(&mut lease) => engine.on_lease_tick(),
        }
    }
}

fn apply(engine: &mut Scamp, command: NodeCommand) {
    match command {
        NodeCommand::Launch => engine.launch(None),
        NodeCommand::Answer(message) => {
            if let Err(err) = engine.answer(message, None) {
                warn!(%err, "answer rejected");
            }
        }
        NodeCommand::Handshake(message) => {
            if let Err(err) = engine.handshake(message) {
                warn!(%err, "handshake rejected");
            }
        }
        NodeCommand::Broadcast(body) => engine.broadcast(body),
        NodeCommand::Peers { k, reply } => {
            let _ = reply.send(engine.get_peers(k));
        }
        NodeCommand::State { reply } => {
            let _ = reply.send(engine.state());
        }
        NodeCommand::Shutdown => {}
    }
}

async fn lease_tick(lease: &mut Option<time::Interval>) {
    match lease {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Carry a join's out-of-band messages between two in-process nodes: the
/// launch offer from `joiner` to `member`, the accept message back. Returns
/// whether both legs completed in time.
pub async fn rendezvous_join(joiner: &Node, member: &Node) -> bool {
    let mut joiner_events = joiner.subscribe();
    let mut member_events = member.subscribe();

    joiner.launch();
    let Some(launch) = next_matching(&mut joiner_events, |event| match event {
        MembershipEvent::Launch(message) => Some(message.clone()),
        _ => None,
    })
    .await
    else {
        warn!(joiner = %joiner.uid(), "launch offer never settled");
        return false;
    };

    member.answer(launch);
    let target = joiner.uid();
    let Some(accept) = next_matching(&mut member_events, |event| match event {
        MembershipEvent::Answer(message) => match message {
            Message::SubscriptionResponse { dest_uid, .. } if *dest_uid == target => {
                Some(message.clone())
            }
            _ => None,
        },
        _ => None,
    })
    .await
    else {
        warn!(joiner = %joiner.uid(), member = %member.uid(), "no accept came back");
        return false;
    };

    joiner.handshake(accept);
    true
}

async fn next_matching<T>(
    events: &mut broadcast::Receiver<MembershipEvent>,
    mut pick: impl FnMut(&MembershipEvent) -> Option<T>,
) -> Option<T> {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(found) = pick(&event) {
                        return Some(found);
                    }
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return None,
            }
        }
    };
    time::timeout(RENDEZVOUS_TIMEOUT, wait).await.ok().flatten()
}
