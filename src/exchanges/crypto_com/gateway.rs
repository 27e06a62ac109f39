use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::auth::AuthState;
use super::bootstrap::{self, BootstrapEntry, BootstrapTracker};
use super::connection::{ConnectionManager, LinkState};
use super::message::{Incoming, MessageFactory, Request};
use super::queue::PendingQueue;
use super::signer::Credentials;
use super::{inbound, needs_api_key, outbound, ClientType};
use crate::alert::{AlertHook, DedupAlert, LogAlert};
use crate::error::GatewayError;
use crate::exchanges::ws::TungsteniteConnector;
use crate::exchanges::WsConnector;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub sandbox: bool,
    /// Overrides the endpoint picked from client type and sandbox flag.
    pub url: Option<String>,
    pub settle_delay: Duration,
    /// Longer than the exchange heartbeat interval (30s).
    pub recv_timeout: Duration,
    pub send_backoff: Duration,
    /// Upper bound on a single websocket write.
    pub send_timeout: Duration,
    pub reconnect_delay: Duration,
    pub bootstrap_retry: Duration,
    pub decode_error_delay: Duration,
    pub connect_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            sandbox: false,
            url: None,
            settle_delay: Duration::from_secs(1),
            recv_timeout: Duration::from_secs(35),
            send_backoff: Duration::from_secs(1),
            send_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(1),
            bootstrap_retry: Duration::from_secs(5),
            decode_error_delay: Duration::from_millis(100),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Unauthenticated,
    Authenticated,
}

/// State shared by the gateway tasks.
pub(crate) struct Shared {
    pub(crate) config: GatewayConfig,
    pub(crate) client_type: ClientType,
    pub(crate) channels: Vec<String>,
    pub(crate) factory: MessageFactory,
    pub(crate) pending: PendingQueue,
    pub(crate) postponed: PendingQueue,
    pub(crate) events_tx: mpsc::UnboundedSender<Incoming>,
    pub(crate) auth: AuthState,
    bootstrap: Mutex<BootstrapTracker>,
    pub(crate) bootstrap_wake: Notify,
    pub(crate) connection: ConnectionManager,
    pub(crate) alerts: Arc<dyn AlertHook>,
    /// Connection and login failures, one alert per distinct cause.
    pub(crate) connect_alerts: DedupAlert,
}

impl Shared {
    pub(crate) fn bootstrap(&self) -> MutexGuard<'_, BootstrapTracker> {
        self.bootstrap.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn needs_login(&self) -> bool {
        self.client_type == ClientType::User && self.factory.has_credentials()
    }

    pub(crate) fn is_gated(&self, method: &str) -> bool {
        self.client_type.gates(method)
    }

    /// Sends one request on the live connection. A transport failure marks the
    /// connection down and drops authentication, unless a newer connection is
    /// already up by the time a stale write gives up.
    pub(crate) async fn transmit(&self, request: &Request) -> Result<(), GatewayError> {
        let text = request.to_json()?;
        debug!("Sending {} (id {})", request.method, request.id);
        if let Err(e) = self.connection.send_text(text).await {
            if !self.connection.is_live() {
                self.auth.set(false);
            }
            return Err(e.into());
        }
        Ok(())
    }

    pub(crate) async fn subscribe(&self) -> Result<(), GatewayError> {
        if self.channels.is_empty() {
            return Ok(());
        }
        let request = self.factory.subscribe(&self.channels)?;
        info!("Subscribing to {:?}", self.channels);
        self.transmit(&request).await
    }

    pub(crate) async fn drop_connection(&self, reason: &str) {
        warn!("Dropping connection: {}", reason);
        self.connection.disconnect().await;
        self.auth.set(false);
    }

    /// Moves held requests back to the head of the pending queue.
    pub(crate) fn restore_postponed(&self) {
        let held = self.postponed.drain();
        if !held.is_empty() {
            debug!("Restoring {} postponed requests", held.len());
            self.pending.prepend(held);
        }
    }

    pub(crate) fn forward(&self, incoming: Incoming) {
        if self.events_tx.send(incoming).is_err() {
            debug!("Event receiver gone, dropping message");
        }
    }
}

pub struct GatewayBuilder {
    client_type: ClientType,
    config: GatewayConfig,
    credentials: Option<Credentials>,
    channels: Vec<String>,
    bootstrap: Vec<(String, Option<Map<String, Value>>)>,
    alerts: Option<Arc<dyn AlertHook>>,
    connector: Option<Arc<dyn WsConnector>>,
}

impl GatewayBuilder {
    pub fn new(client_type: ClientType) -> Self {
        GatewayBuilder {
            client_type,
            config: GatewayConfig::default(),
            credentials: None,
            channels: Vec::new(),
            bootstrap: Vec::new(),
            alerts: None,
            connector: None,
        }
    }

    pub fn config(mut self, config: GatewayConfig) -> Self {
        self.config = config;
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn channels<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.channels.extend(channels.into_iter().map(Into::into));
        self
    }

    /// Adds a request reissued after every login until it succeeds.
    pub fn bootstrap_request(
        mut self,
        method: impl Into<String>,
        params: Option<Map<String, Value>>,
    ) -> Self {
        self.bootstrap.push((method.into(), params));
        self
    }

    pub fn alerts(mut self, alerts: Arc<dyn AlertHook>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    pub fn connector(mut self, connector: Arc<dyn WsConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn build(self) -> Result<Gateway, GatewayError> {
        if self.credentials.is_none() {
            if let Some((method, _)) = self.bootstrap.iter().find(|(m, _)| needs_api_key(m)) {
                return Err(GatewayError::Configuration(format!(
                    "bootstrap request {} needs an api key",
                    method
                )));
            }
        }

        let url = self
            .config
            .url
            .clone()
            .unwrap_or_else(|| self.client_type.ws_url(self.config.sandbox).to_string());
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(TungsteniteConnector::new(self.config.connect_timeout)));
        let alerts = self.alerts.unwrap_or_else(|| Arc::new(LogAlert));
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let bootstrap_requests = self.bootstrap;
        let shared = Arc::new_cyclic(|weak: &Weak<Shared>| {
            let entries = bootstrap_requests
                .into_iter()
                .map(|(method, params)| bootstrap_entry(weak.clone(), method, params))
                .collect();
            Shared {
                connection: ConnectionManager::new(
                    url,
                    connector,
                    self.config.settle_delay,
                    self.config.send_timeout,
                ),
                config: self.config,
                client_type: self.client_type,
                channels: self.channels,
                factory: MessageFactory::new(self.credentials),
                pending: PendingQueue::new(),
                postponed: PendingQueue::new(),
                events_tx,
                auth: AuthState::new(),
                bootstrap: Mutex::new(BootstrapTracker::new(entries)),
                bootstrap_wake: Notify::new(),
                connect_alerts: DedupAlert::new(alerts.clone()),
                alerts,
            }
        });

        let weak = Arc::downgrade(&shared);
        shared.auth.register(Arc::new(move |authenticated| {
            if let Some(shared) = weak.upgrade() {
                if authenticated {
                    shared.restore_postponed();
                }
                shared.bootstrap().on_auth_change(authenticated);
                shared.bootstrap_wake.notify_one();
            }
        }));

        let (shutdown_tx, _) = watch::channel(false);
        Ok(Gateway {
            shared,
            events_rx,
            shutdown_tx,
            tasks: Vec::new(),
        })
    }
}

fn bootstrap_entry(
    shared: Weak<Shared>,
    method: String,
    params: Option<Map<String, Value>>,
) -> BootstrapEntry {
    let api_method = method.clone();
    BootstrapEntry::new(
        api_method,
        Box::new(move || {
            let Some(shared) = shared.upgrade() else {
                return;
            };
            match shared.factory.build(&method, params.clone()) {
                Ok(request) => shared.pending.push_back(request),
                Err(e) => error!("Building bootstrap request {} failed: {}", method, e),
            }
        }),
    )
}

/// Facade over one exchange connection.
pub struct Gateway {
    pub(crate) shared: Arc<Shared>,
    events_rx: mpsc::UnboundedReceiver<Incoming>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Gateway {
    pub fn builder(client_type: ClientType) -> GatewayBuilder {
        GatewayBuilder::new(client_type)
    }

    /// Spawns the outbound, inbound and bootstrap tasks on the current runtime.
    pub fn start(&mut self) {
        if !self.tasks.is_empty() {
            return;
        }
        self.shutdown_tx.send_replace(false);
        info!(
            "Starting {:?} gateway on {}",
            self.shared.client_type,
            self.shared.connection.url()
        );
        self.tasks.push(tokio::spawn(outbound::run(
            self.shared.clone(),
            self.shutdown_tx.subscribe(),
        )));
        self.tasks.push(tokio::spawn(inbound::run(
            self.shared.clone(),
            self.shutdown_tx.subscribe(),
        )));
        self.tasks.push(tokio::spawn(bootstrap::run_issuer(
            self.shared.clone(),
            self.shutdown_tx.subscribe(),
        )));
    }

    /// Cancels the tasks and closes the transport. Queued requests are kept.
    pub async fn stop(&mut self) {
        self.shutdown_tx.send_replace(true);
        for task in self.tasks.drain(..) {
            task.abort();
            let _ = task.await;
        }
        self.shared.connection.disconnect().await;
        self.shared.auth.set(false);
        info!("{:?} gateway stopped", self.shared.client_type);
    }

    pub fn build_request(
        &self,
        method: &str,
        params: Option<Map<String, Value>>,
    ) -> Result<Request, GatewayError> {
        self.shared.factory.build(method, params)
    }

    pub fn send(&self, request: Request) {
        self.shared.pending.push_back(request);
    }

    /// Builds and enqueues a request, returning its id.
    pub fn request(
        &self,
        method: &str,
        params: Option<Map<String, Value>>,
    ) -> Result<i64, GatewayError> {
        let request = self.build_request(method, params)?;
        let id = request.id;
        self.send(request);
        Ok(id)
    }

    pub fn try_next_event(&mut self) -> Option<Incoming> {
        self.events_rx.try_recv().ok()
    }

    pub async fn next_event(&mut self) -> Option<Incoming> {
        self.events_rx.recv().await
    }

    pub fn is_authenticated(&self) -> bool {
        self.shared.auth.is_authenticated()
    }

    pub fn is_bootstrap_complete(&self) -> bool {
        self.shared.bootstrap().is_complete()
    }

    pub fn pending_bootstrap(&self) -> Vec<String> {
        self.shared.bootstrap().pending_methods()
    }

    /// Observers run synchronously on every authentication transition.
    pub fn register_auth_observer<F>(&self, observer: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.shared.auth.register(Arc::new(observer));
    }

    pub fn connection_state(&self) -> ConnectionState {
        match self.shared.connection.state() {
            LinkState::Down => ConnectionState::Disconnected,
            LinkState::Connecting => ConnectionState::Connecting,
            LinkState::Up if self.is_authenticated() => ConnectionState::Authenticated,
            LinkState::Up => ConnectionState::Unauthenticated,
        }
    }

    pub fn client_type(&self) -> ClientType {
        self.shared.client_type
    }

    pub fn pending_ids(&self) -> Vec<i64> {
        self.shared.pending.ids()
    }

    pub fn pending_len(&self) -> usize {
        self.shared.pending.len()
    }

    pub fn postponed_len(&self) -> usize {
        self.shared.postponed.len()
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchanges::memory::memory_transport;

    #[test]
    fn test_bootstrap_needing_key_without_credentials_is_rejected() {
        let (connector, _exchange) = memory_transport();
        let result = Gateway::builder(ClientType::User)
            .connector(Arc::new(connector))
            .bootstrap_request("private/get-account-summary", None)
            .build();
        assert!(matches!(result, Err(GatewayError::Configuration(_))));
    }

    #[test]
    fn test_auth_true_restores_postponed_in_order() {
        let (connector, _exchange) = memory_transport();
        let gateway = Gateway::builder(ClientType::User)
            .connector(Arc::new(connector))
            .credentials(Credentials::new("key", "secret"))
            .build()
            .unwrap();
        let shared = &gateway.shared;
        for _ in 0..3 {
            let request = shared
                .factory
                .build("private/get-account-summary", None)
                .unwrap();
            shared.postponed.push_back(request);
        }
        let heartbeat = shared.factory.heartbeat_ack(99);
        shared.pending.push_back(heartbeat);

        shared.auth.set(true);
        assert_eq!(gateway.pending_ids(), vec![1, 2, 3, 99]);
        assert_eq!(gateway.postponed_len(), 0);
    }

    #[test]
    fn test_initial_state() {
        let (connector, _exchange) = memory_transport();
        let gateway = Gateway::builder(ClientType::Market)
            .connector(Arc::new(connector))
            .build()
            .unwrap();
        assert_eq!(gateway.connection_state(), ConnectionState::Disconnected);
        assert!(!gateway.is_authenticated());
        assert!(!gateway.is_bootstrap_complete());
        assert!(matches!(
            gateway.request("public/auth", None),
            Err(GatewayError::Configuration(_))
        ));
    }
}
