use anyhow::{anyhow, Result};
use circular_buffer::CircularBuffer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::exchanges::crypto_com::Event;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Tick {
    pub instrument: String,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub last: Option<f64>,
    pub timestamp: u64,
}

#[derive(Debug, Clone)]
pub struct TickBuffer<const SIZE: usize> {
    pub buffer: CircularBuffer<SIZE, Tick>,
    pub instrument: String,
}

/// Ticker prices are numbers or numeric strings. Null means an empty book side.
fn price(data: &Value, field: &str) -> Result<Option<f64>> {
    match data.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(Value::String(s)) => s
            .parse::<f64>()
            .map(Some)
            .map_err(|_| anyhow!("Invalid format for {}: {}", field, s)),
        Some(other) => Err(anyhow!("Invalid format for {}: {}", field, other)),
    }
}

impl Tick {
    /// Builds a tick from the first entry of a `ticker.<PAIR>` event.
    pub fn from_ticker_event(event: &Event) -> Result<Tick> {
        let data = event
            .data
            .first()
            .ok_or_else(|| anyhow!("Empty data in {} event", event.subscription))?;

        let instrument = match &event.instrument_name {
            Some(name) => name.clone(),
            None => event
                .subscription
                .strip_prefix("ticker.")
                .ok_or_else(|| anyhow!("Not a ticker subscription: {}", event.subscription))?
                .to_string(),
        };

        let timestamp = data["t"]
            .as_u64()
            .ok_or_else(|| anyhow!("Missing timestamp"))?;

        Ok(Tick {
            instrument,
            bid: price(data, "b")?,
            ask: price(data, "k")?,
            last: price(data, "a")?,
            timestamp,
        })
    }
}

impl<const SIZE: usize> TickBuffer<SIZE> {
    pub fn new(instrument: String) -> TickBuffer<SIZE> {
        TickBuffer {
            buffer: CircularBuffer::<SIZE, Tick>::new(),
            instrument,
        }
    }

    pub fn add_tick(&mut self, tick: Tick) {
        if self.instrument == tick.instrument {
            self.buffer.push_back(tick);
        }
    }

    pub fn latest(&self) -> Option<&Tick> {
        self.buffer.back()
    }

    pub fn serialize_to_json(&self) -> Result<String, serde_json::Error> {
        let ticks: Vec<&Tick> = self.buffer.iter().collect();
        serde_json::to_string(&ticks)
    }
}
