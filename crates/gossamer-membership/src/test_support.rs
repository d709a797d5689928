//! Recording link doubles shared by the unit tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use gossamer_link::{Error, Link, LinkFactory, LinkKind, Result};
use serde_json::Value;

use crate::messages::Message;

/// A link that records what flows through it instead of transporting it.
#[derive(Debug)]
pub(crate) struct StubLink {
    counter: u64,
    kind: LinkKind,
    closed: AtomicBool,
    pub sent: Mutex<Vec<Message>>,
    pub signaled: Mutex<Vec<Value>>,
}

impl StubLink {
    pub fn new(counter: u64) -> Arc<Self> {
        Self::with_kind(counter, LinkKind::Subscription)
    }

    pub fn with_kind(counter: u64, kind: LinkKind) -> Arc<Self> {
        Arc::new(Self {
            counter,
            kind,
            closed: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            signaled: Mutex::new(Vec::new()),
        })
    }

    pub fn sent_messages(&self) -> Vec<Message> {
        self.sent.lock().expect("sent lock").clone()
    }

    pub fn signaled_fragments(&self) -> Vec<Value> {
        self.signaled.lock().expect("signaled lock").clone()
    }
}

impl Link for StubLink {
    fn counter(&self) -> u64 {
        self.counter
    }

    fn kind(&self) -> LinkKind {
        self.kind
    }

    fn signal(&self, fragment: Value) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        self.signaled.lock().expect("signaled lock").push(fragment);
        Ok(())
    }

    fn send(&self, payload: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        let message = Message::from_bytes(payload).expect("test payloads are valid frames");
        self.sent.lock().expect("sent lock").push(message);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Factory handing out [`StubLink`]s and remembering every one of them.
#[derive(Debug, Default)]
pub(crate) struct RecordingFactory {
    pub created: Mutex<Vec<Arc<StubLink>>>,
}

impl RecordingFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().expect("created lock").len()
    }

    pub fn link(&self, index: usize) -> Arc<StubLink> {
        self.created.lock().expect("created lock")[index].clone()
    }

    pub fn last(&self) -> Arc<StubLink> {
        self.created
            .lock()
            .expect("created lock")
            .last()
            .expect("a link was created")
            .clone()
    }
}

impl LinkFactory for RecordingFactory {
    fn open(&self, kind: LinkKind, counter: u64) -> Arc<dyn Link> {
        let link = StubLink::with_kind(counter, kind);
        self.created.lock().expect("created lock").push(link.clone());
        link
    }
}
