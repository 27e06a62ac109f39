use std::sync::Arc;

use anyhow::{anyhow, bail};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use super::{report_dispatch_error, wait_for_shutdown};
use crate::alert::AlertHook;
use crate::error::GatewayError;
use crate::exchanges::crypto_com::{
    ClientType, EventDispatcher, Gateway, GatewayBuilder, Incoming, Response,
    METHOD_GET_INSTRUMENTS,
};
use crate::signal::{SignalReceiver, TradeSignal};
use crate::store::{user_key, SharedStore};
use crate::utils::balance::Balance;

pub const BALANCE_CHANNEL: &str = "user.balance";

const DECIMAL_FIELDS: [&str; 2] = ["price_decimals", "quantity_decimals"];

enum Wake {
    Message(Option<Incoming>),
    Signal(Option<TradeSignal>),
    Shutdown,
}

/// A validated signal accepted by a bootstrapped user worker.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub user: String,
    pub signal: TradeSignal,
}

/// Authenticated gateway of one exchange user.
pub struct UserApiWorker {
    user: String,
    gateway: Gateway,
    dispatcher: EventDispatcher,
    signals: Option<SignalReceiver>,
    decisions: mpsc::UnboundedSender<Decision>,
    alerts: Arc<dyn AlertHook>,
}

impl UserApiWorker {
    /// `builder` carries the user's credentials; the balance channel and the
    /// instruments bootstrap request are added here.
    pub fn new(
        user: impl Into<String>,
        builder: GatewayBuilder,
        tickers: Vec<String>,
        store: Arc<SharedStore>,
        signals: SignalReceiver,
        decisions: mpsc::UnboundedSender<Decision>,
        alerts: Arc<dyn AlertHook>,
    ) -> Result<Self, GatewayError> {
        let user = user.into();
        let gateway = builder
            .channels([BALANCE_CHANNEL])
            .bootstrap_request(METHOD_GET_INSTRUMENTS, None)
            .alerts(alerts.clone())
            .build()?;
        if gateway.client_type() != ClientType::User {
            return Err(GatewayError::Configuration(
                "user api worker needs a user gateway".to_string(),
            ));
        }

        let mut dispatcher = EventDispatcher::new();
        {
            let store = store.clone();
            let user = user.clone();
            dispatcher.register_channel(BALANCE_CHANNEL, move |event| {
                for balance in Balance::from_event(event)? {
                    store.set(
                        user_key(&user, &format!("balance_{}", balance.currency)),
                        balance.available,
                    );
                }
                Ok(())
            });
        }
        {
            let user = user.clone();
            dispatcher.register_response(METHOD_GET_INSTRUMENTS, move |response| {
                update_ticker_decimals(&store, &user, &tickers, response)
            });
        }

        Ok(UserApiWorker {
            user,
            gateway,
            dispatcher,
            signals: Some(signals),
            decisions,
            alerts,
        })
    }

    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        self.alerts
            .notify(&format!("Started user api worker for {}.", self.user));
        self.gateway.start();
        loop {
            // signals wait until the instrument decimals are known
            let accepting = self.gateway.is_bootstrap_complete() && self.signals.is_some();
            let wake = tokio::select! {
                message = self.gateway.next_event() => Wake::Message(message),
                signal = next_signal(&mut self.signals), if accepting => Wake::Signal(signal),
                _ = wait_for_shutdown(&mut shutdown) => Wake::Shutdown,
            };
            match wake {
                Wake::Message(Some(message)) => {
                    if let Err(e) = self.dispatcher.dispatch(&message) {
                        report_dispatch_error(e, self.alerts.as_ref());
                    }
                }
                Wake::Signal(Some(signal)) => self.accept(signal),
                Wake::Signal(None) => {
                    warn!("Signal queue of {} closed", self.user);
                    self.signals = None;
                }
                Wake::Message(None) | Wake::Shutdown => break,
            }
        }
        self.gateway.stop().await;
        info!("User api worker for {} stopped", self.user);
    }

    fn accept(&self, signal: TradeSignal) {
        info!("{} accepted {:?} signal at {}", self.user, signal.side, signal.price);
        let decision = Decision {
            user: self.user.clone(),
            signal,
        };
        if self.decisions.send(decision).is_err() {
            warn!("Decision channel closed, dropping signal for {}", self.user);
        }
    }
}

async fn next_signal(signals: &mut Option<SignalReceiver>) -> Option<TradeSignal> {
    match signals {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Stores `<user>.tickers.<T>.price_decimals` and `quantity_decimals` for every
/// tracked ticker. A tracked ticker missing from the response is an error.
fn update_ticker_decimals(
    store: &SharedStore,
    user: &str,
    tickers: &[String],
    response: &Response,
) -> anyhow::Result<()> {
    if !response.is_success() {
        bail!(
            "{} failed with code {}: {}",
            response.method,
            response.code,
            response.message.as_deref().unwrap_or_default()
        );
    }
    let instruments = response
        .result
        .as_ref()
        .and_then(|result| result.get("instruments"))
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("No instruments in response {}", response.id))?;

    for ticker in tickers {
        let instrument = instruments
            .iter()
            .find(|i| i.get("instrument_name").and_then(Value::as_str) == Some(ticker.as_str()))
            .ok_or_else(|| anyhow!("Cannot get ticker decimals for ticker: {}", ticker))?;
        for field in DECIMAL_FIELDS {
            let decimals = instrument
                .get(field)
                .and_then(Value::as_u64)
                .ok_or_else(|| anyhow!("The {} for ticker {} are missing", field, ticker))?;
            store.set(
                user_key(user, &format!("tickers.{}.{}", ticker, field)),
                decimals,
            );
        }
    }
    Ok(())
}
