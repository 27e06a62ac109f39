//! In-process loopback transport.
//!
//! [`MemoryConnector`] plugs into the gateway like a real websocket connector,
//! while [`MemoryExchange`] plays the exchange side: it pushes frames to the
//! current session, observes everything the gateway transmits and can inject
//! connect or send failures. Used for dry runs and tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, Notify};

use super::{WsConnector, WsSink, WsStream};
use crate::error::TransportError;

struct Shared {
    inbound_tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
    sent_tx: mpsc::UnboundedSender<String>,
    sessions: AtomicUsize,
    refuse_connects: AtomicUsize,
    fail_sends: AtomicUsize,
    stall_sends: AtomicUsize,
    connected: Notify,
}

impl Shared {
    fn inbound(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<String>>> {
        self.inbound_tx.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Creates a connected connector / exchange pair.
pub fn memory_transport() -> (MemoryConnector, MemoryExchange) {
    let (sent_tx, sent_rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared {
        inbound_tx: Mutex::new(None),
        sent_tx,
        sessions: AtomicUsize::new(0),
        refuse_connects: AtomicUsize::new(0),
        fail_sends: AtomicUsize::new(0),
        stall_sends: AtomicUsize::new(0),
        connected: Notify::new(),
    });
    (
        MemoryConnector {
            shared: shared.clone(),
        },
        MemoryExchange { shared, sent_rx },
    )
}

#[derive(Clone)]
pub struct MemoryConnector {
    shared: Arc<Shared>,
}

#[async_trait]
impl WsConnector for MemoryConnector {
    async fn connect(
        &self,
        _url: &str,
    ) -> Result<(Box<dyn WsSink>, Box<dyn WsStream>), TransportError> {
        let refused = self
            .shared
            .refuse_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::Connect("connection refused".to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        // replacing the sender ends the previous session's stream
        *self.shared.inbound() = Some(tx);
        let session = self.shared.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.connected.notify_waiters();

        Ok((
            Box::new(MemorySink {
                shared: self.shared.clone(),
                session,
                open: true,
            }),
            Box::new(MemoryStream { rx }),
        ))
    }
}

struct MemorySink {
    shared: Arc<Shared>,
    session: usize,
    open: bool,
}

#[async_trait]
impl WsSink for MemorySink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        if !self.open || self.shared.sessions.load(Ordering::SeqCst) != self.session {
            return Err(TransportError::Closed);
        }
        let failed = self
            .shared
            .fail_sends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(TransportError::Send("injected send failure".to_string()));
        }
        let stalled = self
            .shared
            .stall_sends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if stalled {
            // a peer that stopped reading
            return std::future::pending().await;
        }
        self.shared
            .sent_tx
            .send(text)
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) {
        self.open = false;
    }
}

struct MemoryStream {
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl WsStream for MemoryStream {
    async fn next_text(&mut self) -> Result<String, TransportError> {
        self.rx.recv().await.ok_or(TransportError::Closed)
    }
}

/// Exchange side of the loopback.
pub struct MemoryExchange {
    shared: Arc<Shared>,
    sent_rx: mpsc::UnboundedReceiver<String>,
}

impl MemoryExchange {
    /// Delivers a raw frame to the current session. False when nobody is connected.
    pub fn push(&self, text: impl Into<String>) -> bool {
        match self.shared.inbound().as_ref() {
            Some(tx) => tx.send(text.into()).is_ok(),
            None => false,
        }
    }

    pub fn push_json(&self, value: &Value) -> bool {
        self.push(value.to_string())
    }

    /// Next frame the gateway transmitted, decoded as JSON.
    pub async fn next_sent(&mut self) -> Option<Value> {
        let text = self.sent_rx.recv().await?;
        Some(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }

    pub fn try_next_sent(&mut self) -> Option<Value> {
        let text = self.sent_rx.try_recv().ok()?;
        Some(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }

    /// Ends the current session as if the exchange closed the socket.
    pub fn drop_session(&self) {
        self.shared.inbound().take();
    }

    /// Refuses the next `n` connection attempts.
    pub fn refuse_connects(&self, n: usize) {
        self.shared.refuse_connects.store(n, Ordering::SeqCst);
    }

    /// Fails the next `n` transmissions.
    pub fn fail_sends(&self, n: usize) {
        self.shared.fail_sends.store(n, Ordering::SeqCst);
    }

    /// Blocks the next `n` transmissions forever.
    pub fn stall_sends(&self, n: usize) {
        self.shared.stall_sends.store(n, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.shared.sessions.load(Ordering::SeqCst)
    }

    pub async fn wait_for_connects(&self, n: usize) {
        loop {
            let notified = self.shared.connected.notified();
            if self.connect_count() >= n {
                return;
            }
            notified.await;
        }
    }
}
