use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, Notify};
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::exchanges::{WsConnector, WsSink, WsStream};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Down,
    Connecting,
    Up,
}

impl LinkState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => LinkState::Connecting,
            2 => LinkState::Up,
            _ => LinkState::Down,
        }
    }
}

/// Owns the write half of the live connection.
///
/// Every connect and every teardown bumps the epoch, so a reader holding a
/// stream from an older epoch knows it has been superseded.
///
/// The sink slot is never locked across transport I/O. A sender takes the
/// sink out, writes under `send_timeout` and puts it back only if the epoch
/// did not move meanwhile, so teardown never waits on a stuck write.
pub struct ConnectionManager {
    url: String,
    connector: Arc<dyn WsConnector>,
    sink: Mutex<Option<Box<dyn WsSink>>>,
    /// Serializes writers; each holder is bounded by `send_timeout`.
    writer: AsyncMutex<()>,
    state: AtomicU8,
    epoch: AtomicU64,
    down: Notify,
    settle_delay: Duration,
    send_timeout: Duration,
}

impl ConnectionManager {
    pub fn new(
        url: impl Into<String>,
        connector: Arc<dyn WsConnector>,
        settle_delay: Duration,
        send_timeout: Duration,
    ) -> Self {
        ConnectionManager {
            url: url.into(),
            connector,
            sink: Mutex::new(None),
            writer: AsyncMutex::new(()),
            state: AtomicU8::new(LinkState::Down as u8),
            epoch: AtomicU64::new(0),
            down: Notify::new(),
            settle_delay,
            send_timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> LinkState {
        LinkState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_live(&self) -> bool {
        self.state() == LinkState::Up
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub fn is_current(&self, epoch: u64) -> bool {
        self.is_live() && self.epoch() == epoch
    }

    /// Opens a new connection, waits out the settle delay and returns the
    /// read half together with its epoch.
    pub async fn connect(&self) -> Result<(Box<dyn WsStream>, u64), TransportError> {
        self.set_state(LinkState::Connecting);
        info!("Connecting to {}", self.url);
        let (sink, stream) = match self.connector.connect(&self.url).await {
            Ok(halves) => halves,
            Err(e) => {
                self.set_state(LinkState::Down);
                return Err(e);
            }
        };

        let (previous, epoch) = {
            let mut slot = self.slot();
            let previous = slot.replace(sink);
            (previous, self.epoch.fetch_add(1, Ordering::SeqCst) + 1)
        };
        if let Some(previous) = previous {
            self.close_sink(previous).await;
        }

        tokio::time::sleep(self.settle_delay).await;
        if self.epoch() != epoch {
            return Err(TransportError::Closed);
        }
        self.set_state(LinkState::Up);
        debug!("Connection epoch {} up", epoch);
        Ok((stream, epoch))
    }

    pub async fn send_text(&self, text: String) -> Result<(), TransportError> {
        let _writer = self.writer.lock().await;
        let epoch = self.epoch();
        let taken = if self.is_live() { self.slot().take() } else { None };
        let Some(mut sink) = taken else {
            return Err(TransportError::NotConnected);
        };

        let result = match tokio::time::timeout(self.send_timeout, sink.send_text(text)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.send_timeout)),
        };

        if let Err(e) = &result {
            warn!("Send failed: {}", e);
            self.close_sink(sink).await;
            if self.epoch() == epoch {
                self.set_down();
            }
            return result;
        }

        let stale = {
            let mut slot = self.slot();
            if self.epoch() == epoch && slot.is_none() {
                *slot = Some(sink);
                None
            } else {
                Some(sink)
            }
        };
        if let Some(stale) = stale {
            debug!("Connection epoch {} ended during send", epoch);
            self.close_sink(stale).await;
        }
        result
    }

    /// Marks the link down first, then closes whatever sink is parked. A sink
    /// out on a write is closed by its sender.
    pub async fn disconnect(&self) {
        self.set_down();
        let sink = self.slot().take();
        if let Some(sink) = sink {
            self.close_sink(sink).await;
            info!("Disconnected from {}", self.url);
        }
    }

    /// Marks the link down without touching the sink. The next `connect`
    /// replaces it.
    pub fn set_down(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.set_state(LinkState::Down);
        self.down.notify_waiters();
    }

    /// Resolves once the connection of `epoch` is no longer current.
    pub async fn wait_down(&self, epoch: u64) {
        loop {
            let notified = self.down.notified();
            if self.epoch() != epoch {
                return;
            }
            notified.await;
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<Box<dyn WsSink>>> {
        self.sink.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn close_sink(&self, mut sink: Box<dyn WsSink>) {
        if tokio::time::timeout(self.send_timeout, sink.close()).await.is_err() {
            debug!("Closing sink timed out");
        }
    }

    fn set_state(&self, state: LinkState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }
}
