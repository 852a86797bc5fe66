use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tracing::trace;

use crate::protocol::Inbound;

struct PendingCall {
    id: String,
    outbound_kind: String,
    expected: Vec<String>,
    reply: oneshot::Sender<Inbound>,
}

impl PendingCall {
    fn accepts(&self, inbound: &Inbound) -> bool {
        match inbound.request_id.as_deref() {
            Some(id) if id == self.id => true,
            _ => self.expected.iter().any(|kind| *kind == inbound.kind),
        }
    }
}

/// Requests waiting for a reply. A reply echoing a known `request_id` is
/// routed to that request only; any other reply satisfies every request that
/// listed its type.
pub struct PendingCalls {
    calls: Mutex<Vec<PendingCall>>,
    busy: watch::Sender<bool>,
}

impl Default for PendingCalls {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            busy: watch::channel(false).0,
        }
    }
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<S: AsRef<str>>(
        &self,
        id: &str,
        outbound_kind: &str,
        expected: &[S],
    ) -> oneshot::Receiver<Inbound> {
        let (reply, rx) = oneshot::channel();
        let mut calls = self.calls.lock();
        calls.push(PendingCall {
            id: id.to_string(),
            outbound_kind: outbound_kind.to_string(),
            expected: expected.iter().map(|s| s.as_ref().to_string()).collect(),
            reply,
        });
        self.busy.send_replace(true);
        rx
    }

    pub fn cancel(&self, id: &str) -> bool {
        let mut calls = self.calls.lock();
        let before = calls.len();
        calls.retain(|call| call.id != id);
        let removed = calls.len() != before;
        self.busy.send_replace(!calls.is_empty());
        removed
    }

    /// Hands `inbound` to every call it satisfies and returns how many.
    pub fn resolve(&self, inbound: &Inbound) -> usize {
        let mut calls = self.calls.lock();
        let echoed = inbound
            .request_id
            .as_deref()
            .filter(|id| calls.iter().any(|call| call.id == *id));

        let mut satisfied = Vec::new();
        let mut index = 0;
        while index < calls.len() {
            let hit = match echoed {
                Some(id) => calls[index].id == id,
                None => calls[index].accepts(inbound),
            };
            if hit {
                satisfied.push(calls.remove(index));
            } else {
                index += 1;
            }
        }
        self.busy.send_replace(!calls.is_empty());
        drop(calls);

        let mut delivered = 0;
        for call in satisfied {
            trace!(
                target = "chartroom::transport",
                request_id = %call.id,
                request = %call.outbound_kind,
                response = %inbound.kind,
                "pending call satisfied"
            );
            if call.reply.send(inbound.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Drops every waiting call; their futures observe a closed channel.
    pub fn clear(&self) -> usize {
        let mut calls = self.calls.lock();
        let dropped = calls.len();
        calls.clear();
        self.busy.send_replace(false);
        dropped
    }

    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_busy(&self) -> bool {
        *self.busy.borrow()
    }

    pub fn subscribe_busy(&self) -> watch::Receiver<bool> {
        self.busy.subscribe()
    }
}

/// Removes its call when dropped, so an abandoned request future does not
/// leave a registration behind.
pub(crate) struct PendingGuard {
    pub(crate) id: String,
    pub(crate) calls: Arc<PendingCalls>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.calls.cancel(&self.id);
    }
}
