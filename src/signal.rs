//! Trade signals produced by the webhook side and consumed by user workers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeSignal {
    #[serde(rename = "type")]
    pub side: Side,
    pub price: f64,
    pub fiat: String,
}

#[derive(Error, Debug, PartialEq)]
pub enum SignalError {
    #[error("Signal is not an object")]
    NotAnObject,

    #[error("Missing field {0}")]
    MissingField(&'static str),

    #[error("Invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Signal queue closed")]
    Closed,
}

impl TradeSignal {
    pub fn from_value(value: &Value) -> Result<TradeSignal, SignalError> {
        let object = value.as_object().ok_or(SignalError::NotAnObject)?;

        let side = match object.get("type").ok_or(SignalError::MissingField("type"))? {
            Value::String(s) if s == "buy" => Side::Buy,
            Value::String(s) if s == "sell" => Side::Sell,
            other => {
                return Err(SignalError::InvalidField {
                    field: "type",
                    reason: format!("expected buy or sell, got {}", other),
                })
            }
        };

        let price = match object.get("price").ok_or(SignalError::MissingField("price"))? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
        .filter(|p| p.is_finite() && *p > 0.0)
        .ok_or_else(|| SignalError::InvalidField {
            field: "price",
            reason: "expected a positive number".to_string(),
        })?;

        let fiat = object
            .get("fiat")
            .ok_or(SignalError::MissingField("fiat"))?
            .as_str()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| SignalError::InvalidField {
                field: "fiat",
                reason: "expected a currency code".to_string(),
            })?
            .to_string();

        Ok(TradeSignal { side, price, fiat })
    }
}

#[derive(Clone)]
pub struct SignalSender {
    tx: mpsc::UnboundedSender<TradeSignal>,
}

impl SignalSender {
    /// Validates `value` and queues it. Malformed items never reach the queue.
    pub fn submit(&self, value: &Value) -> Result<(), SignalError> {
        let signal = TradeSignal::from_value(value)?;
        self.tx.send(signal).map_err(|_| SignalError::Closed)
    }
}

pub type SignalReceiver = mpsc::UnboundedReceiver<TradeSignal>;

pub fn signal_queue() -> (SignalSender, SignalReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (SignalSender { tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_signals() {
        let signal = TradeSignal::from_value(&json!({"type": "buy", "price": 27000.5, "fiat": "USDT"}))
            .unwrap();
        assert_eq!(signal.side, Side::Buy);
        assert_eq!(signal.price, 27000.5);

        let signal =
            TradeSignal::from_value(&json!({"type": "sell", "price": "0.071", "fiat": "USDT"}))
                .unwrap();
        assert_eq!(signal.side, Side::Sell);
        assert_eq!(signal.price, 0.071);
    }

    #[test]
    fn test_malformed_signals_are_rejected() {
        assert_eq!(
            TradeSignal::from_value(&json!([1, 2])),
            Err(SignalError::NotAnObject)
        );
        assert_eq!(
            TradeSignal::from_value(&json!({"price": 1, "fiat": "USDT"})),
            Err(SignalError::MissingField("type"))
        );
        assert!(matches!(
            TradeSignal::from_value(&json!({"type": "hold", "price": 1, "fiat": "USDT"})),
            Err(SignalError::InvalidField { field: "type", .. })
        ));
        assert!(matches!(
            TradeSignal::from_value(&json!({"type": "buy", "price": -3, "fiat": "USDT"})),
            Err(SignalError::InvalidField { field: "price", .. })
        ));
        assert!(matches!(
            TradeSignal::from_value(&json!({"type": "buy", "price": "abc", "fiat": "USDT"})),
            Err(SignalError::InvalidField { field: "price", .. })
        ));
    }

    #[tokio::test]
    async fn test_submit_only_queues_valid_items() {
        let (sender, mut receiver) = signal_queue();
        assert!(sender.submit(&json!({"type": "buy"})).is_err());
        sender
            .submit(&json!({"type": "sell", "price": 2, "fiat": "USDT"}))
            .unwrap();
        let signal = receiver.recv().await.unwrap();
        assert_eq!(signal.side, Side::Sell);
        assert!(receiver.try_recv().is_err());
    }
}
