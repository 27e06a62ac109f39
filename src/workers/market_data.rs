use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::{debug, info};

use super::{report_dispatch_error, wait_for_shutdown};
use crate::alert::AlertHook;
use crate::error::GatewayError;
use crate::exchanges::crypto_com::{ClientType, EventDispatcher, Gateway, GatewayBuilder};
use crate::store::SharedStore;
use crate::utils::tick::{Tick, TickBuffer};

pub const HISTORY_SIZE: usize = 100;

type History = Arc<Mutex<HashMap<String, TickBuffer<HISTORY_SIZE>>>>;

/// Unauthenticated market gateway writing ticker prices into the store.
pub struct MarketDataWorker {
    gateway: Gateway,
    dispatcher: EventDispatcher,
    history: History,
    alerts: Arc<dyn AlertHook>,
}

impl MarketDataWorker {
    /// `builder` must be a market builder; `channels` are added to it.
    pub fn new(
        builder: GatewayBuilder,
        channels: Vec<String>,
        store: Arc<SharedStore>,
        alerts: Arc<dyn AlertHook>,
    ) -> Result<Self, GatewayError> {
        let gateway = builder
            .channels(channels.iter().cloned())
            .alerts(alerts.clone())
            .build()?;
        if gateway.client_type() != ClientType::Market {
            return Err(GatewayError::Configuration(
                "market data worker needs a market gateway".to_string(),
            ));
        }

        let history: History = Arc::new(Mutex::new(HashMap::new()));
        let mut dispatcher = EventDispatcher::new();
        for channel in channels.iter().filter(|c| c.starts_with("ticker.")) {
            let store = store.clone();
            let history = history.clone();
            dispatcher.register_channel(channel.clone(), move |event| {
                let tick = Tick::from_ticker_event(event)?;
                record_tick(&store, &history, tick);
                Ok(())
            });
        }

        Ok(MarketDataWorker {
            gateway,
            dispatcher,
            history,
            alerts,
        })
    }

    pub fn latest_tick(&self, instrument: &str) -> Option<Tick> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(instrument)
            .and_then(|buffer| buffer.latest().cloned())
    }

    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        self.alerts.notify("Started market data worker.");
        self.gateway.start();
        loop {
            let message = tokio::select! {
                message = self.gateway.next_event() => message,
                _ = wait_for_shutdown(&mut shutdown) => None,
            };
            let Some(message) = message else {
                break;
            };
            if let Err(e) = self.dispatcher.dispatch(&message) {
                report_dispatch_error(e, self.alerts.as_ref());
            }
        }
        self.gateway.stop().await;
        info!("Market data worker stopped");
    }
}

fn record_tick(store: &SharedStore, history: &Mutex<HashMap<String, TickBuffer<HISTORY_SIZE>>>, tick: Tick) {
    let pair = &tick.instrument;
    if let Some(bid) = tick.bid {
        store.set(format!("price_{}_bid", pair), bid);
    }
    if let Some(ask) = tick.ask {
        store.set(format!("price_{}_ask", pair), ask);
    }
    if let Some(last) = tick.last {
        store.set(format!("last_{}", pair), last);
    }
    debug!("{} bid {:?} ask {:?}", pair, tick.bid, tick.ask);

    history
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .entry(pair.clone())
        .or_insert_with(|| TickBuffer::new(pair.clone()))
        .add_tick(tick);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::LogAlert;
    use crate::exchanges::crypto_com::{Event, Incoming};
    use crate::exchanges::memory::memory_transport;
    use serde_json::json;

    #[test]
    fn test_ticker_events_update_store_and_history() {
        let (connector, _exchange) = memory_transport();
        let store = Arc::new(SharedStore::new());
        let mut worker = MarketDataWorker::new(
            Gateway::builder(ClientType::Market).connector(Arc::new(connector)),
            vec!["ticker.CRO_USDT".to_string()],
            store.clone(),
            Arc::new(LogAlert),
        )
        .unwrap();

        let event = Incoming::Event(Event {
            subscription: "ticker.CRO_USDT".to_string(),
            channel: Some("ticker".to_string()),
            instrument_name: Some("CRO_USDT".to_string()),
            data: vec![json!({"b": 0.0711, "k": 0.0713, "a": 0.0712, "t": 1587523078844u64})],
        });
        worker.dispatcher.dispatch(&event).unwrap();

        assert_eq!(store.get_f64("price_CRO_USDT_bid"), Some(0.0711));
        assert_eq!(store.get_f64("price_CRO_USDT_ask"), Some(0.0713));
        assert_eq!(store.get_f64("last_CRO_USDT"), Some(0.0712));
        assert_eq!(
            worker.latest_tick("CRO_USDT").map(|t| t.timestamp),
            Some(1587523078844)
        );
    }

    #[test]
    fn test_user_builder_is_rejected() {
        let (connector, _exchange) = memory_transport();
        let result = MarketDataWorker::new(
            Gateway::builder(ClientType::User).connector(Arc::new(connector)),
            Vec::new(),
            Arc::new(SharedStore::new()),
            Arc::new(LogAlert),
        );
        assert!(matches!(result, Err(GatewayError::Configuration(_))));
    }
}
