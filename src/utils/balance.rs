use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::exchanges::crypto_com::Event;

/// One currency entry of a `user.balance` event.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Balance {
    pub currency: String,
    pub balance: f64,
    pub available: f64,
    #[serde(default)]
    pub order: f64,
    #[serde(default)]
    pub stake: f64,
}

impl Balance {
    pub fn from_value(value: &Value) -> Result<Balance> {
        serde_json::from_value(value.clone())
            .map_err(|e| anyhow!("Wrong data structure in balance entry {}: {}", value, e))
    }

    pub fn from_event(event: &Event) -> Result<Vec<Balance>> {
        event.data.iter().map(Balance::from_value).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_balances_from_event() {
        let event = Event {
            subscription: "user.balance".to_string(),
            channel: Some("user.balance".to_string()),
            instrument_name: None,
            data: vec![
                json!({"currency": "CRO", "balance": 99999999947.99626, "available": 99999988201.50826, "order": 11746.488, "stake": 0}),
                json!({"currency": "USDT", "balance": 10.0, "available": 7.5}),
            ],
        };
        let balances = Balance::from_event(&event).unwrap();
        assert_eq!(balances.len(), 2);
        assert_eq!(balances[0].currency, "CRO");
        assert_eq!(balances[0].stake, 0.0);
        assert_eq!(balances[1].available, 7.5);
    }

    #[test]
    fn test_missing_available_is_an_error() {
        assert!(Balance::from_value(&json!({"currency": "BTC", "balance": 1.0})).is_err());
    }
}
