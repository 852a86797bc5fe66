//! In-memory connector with a scripted server side, for tests and demos.
//!
//! [`pair`] returns the connector to hand to a transport and a
//! [`MockServer`] that accepts each connection attempt as a [`MockPeer`].

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use url::Url;

use super::TransportError;
use super::connection::{CloseInfo, Connection, Connector, Frame};

#[derive(Default)]
struct Shared {
    refuse_next: u32,
    attempts: Vec<Url>,
}

pub fn pair() -> (MockConnector, MockServer) {
    let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Mutex::new(Shared::default()));
    (
        MockConnector {
            accepted: accepted_tx,
            shared: shared.clone(),
        },
        MockServer {
            accepted: accepted_rx,
            shared,
        },
    )
}

#[derive(Clone)]
pub struct MockConnector {
    accepted: mpsc::UnboundedSender<MockPeer>,
    shared: Arc<Mutex<Shared>>,
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Connection>, TransportError> {
        {
            let mut shared = self.shared.lock();
            shared.attempts.push(url.clone());
            if shared.refuse_next > 0 {
                shared.refuse_next -= 1;
                return Err(TransportError::Connect("connection refused".into()));
            }
        }
        let (to_client, from_server) = mpsc::unbounded_channel();
        let (to_server, from_client) = mpsc::unbounded_channel();
        let peer = MockPeer {
            url: url.clone(),
            to_client,
            from_client,
        };
        self.accepted
            .send(peer)
            .map_err(|_| TransportError::Connect("mock server dropped".into()))?;
        Ok(Box::new(MockConnection {
            to_server,
            from_server,
        }))
    }
}

struct MockConnection {
    to_server: mpsc::UnboundedSender<String>,
    from_server: mpsc::UnboundedReceiver<Frame>,
}

#[async_trait]
impl Connection for MockConnection {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.to_server
            .send(text)
            .map_err(|_| TransportError::Socket("mock peer hung up".into()))
    }

    async fn recv(&mut self) -> Option<Result<Frame, TransportError>> {
        self.from_server.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.from_server.close();
    }
}

pub struct MockServer {
    accepted: mpsc::UnboundedReceiver<MockPeer>,
    shared: Arc<Mutex<Shared>>,
}

impl MockServer {
    pub async fn accept(&mut self) -> Option<MockPeer> {
        self.accepted.recv().await
    }

    /// Makes the next `count` connection attempts fail before opening.
    pub fn refuse_next(&self, count: u32) {
        self.shared.lock().refuse_next = count;
    }

    /// Every URL a connect was attempted with, refused ones included.
    pub fn attempts(&self) -> Vec<Url> {
        self.shared.lock().attempts.clone()
    }
}

/// Server side of one accepted mock connection. Dropping it looks like an
/// abrupt disconnect to the client.
pub struct MockPeer {
    pub url: Url,
    to_client: mpsc::UnboundedSender<Frame>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl MockPeer {
    pub fn session_param(&self) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(key, _)| key == "session_id")
            .map(|(_, value)| value.into_owned())
    }

    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.to_client.send(Frame::Text(text.into())).is_ok()
    }

    pub fn send_json(&self, value: Value) -> bool {
        self.send_text(value.to_string())
    }

    pub fn send_binary(&self, data: impl Into<Bytes>) -> bool {
        self.to_client.send(Frame::Binary(data.into())).is_ok()
    }

    pub fn close(&self, code: u16, reason: &str) -> bool {
        self.to_client
            .send(Frame::Close(Some(CloseInfo {
                code,
                reason: reason.to_string(),
            })))
            .is_ok()
    }

    pub async fn recv_text(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    pub async fn recv_json(&mut self) -> Option<Value> {
        let text = self.recv_text().await?;
        serde_json::from_str(&text).ok()
    }

    pub fn try_recv_text(&mut self) -> Option<String> {
        self.from_client.try_recv().ok()
    }
}
