//! Key/value store shared between worker threads.
//!
//! Writes are last-writer-wins per key. Each key has a single owning worker:
//!
//! - `price_<PAIR>_bid`, `price_<PAIR>_ask`, `last_<PAIR>`: market-data worker
//! - `<user>.balance_<CURRENCY>`, `<user>.tickers.<PAIR>.*`: that user's worker
//!
//! Other workers only read them.

use std::collections::BTreeMap;

use dashmap::DashMap;
use serde_json::Value;

#[derive(Debug, Default)]
pub struct SharedStore {
    values: DashMap<String, Value>,
}

impl SharedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).map(|entry| entry.value().clone())
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.values.get(key).and_then(|entry| entry.value().as_f64())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Sorted copy of every entry.
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.values
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

pub fn user_key(user: &str, key: &str) -> String {
    format!("{}.{}", user, key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_last_writer_wins() {
        let store = SharedStore::new();
        store.set("price_BTC_USDT_bid", 100.5);
        store.set("price_BTC_USDT_bid", 101.0);
        assert_eq!(store.get_f64("price_BTC_USDT_bid"), Some(101.0));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_snapshot_and_user_keys() {
        let store = SharedStore::new();
        store.set(user_key("alice", "balance_USDT"), 12.5);
        store.set("last_CRO_USDT", json!(0.07));
        let snapshot = store.snapshot();
        let keys: Vec<&String> = snapshot.keys().collect();
        assert_eq!(keys, vec!["alice.balance_USDT", "last_CRO_USDT"]);
        assert!(store.get("missing").is_none());
    }
}
