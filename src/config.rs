// Settings loaded from defaults, an optional file and CDC__* environment variables

use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::exchanges::crypto_com::GatewayConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct Market {
    pub channels: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct User {
    pub name: String,
    /// File with `api_key:` and `api_sec:` lines.
    pub credentials_file: String,
    /// Instruments whose decimals are looked up after login.
    #[serde(default)]
    pub tickers: Vec<String>,
    /// Subscribed in addition to `user.balance`.
    #[serde(default)]
    pub channels: Vec<String>,
    /// Reissued after every login in addition to `public/get-instruments`.
    #[serde(default)]
    pub bootstrap_methods: Vec<String>,
    /// This user's own alert recipient. Without it the user's alerts go to
    /// every configured key.
    #[serde(default)]
    pub pushover_user_key: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Timings {
    pub settle_delay_ms: u64,
    pub recv_timeout_ms: u64,
    pub send_backoff_ms: u64,
    pub send_timeout_ms: u64,
    pub reconnect_delay_ms: u64,
    pub bootstrap_retry_ms: u64,
    pub decode_error_delay_ms: u64,
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Pushover {
    pub title: String,
    pub token: String,
    pub user_keys: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub sandbox: bool,
    pub log_level: String,
    pub market: Market,
    #[serde(default)]
    pub users: Vec<User>,
    pub gateway: Timings,
    pub pushover: Option<Pushover>,
}

impl Settings {
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("sandbox", false)?
            .set_default("log_level", "info")?
            .set_default(
                "market.channels",
                vec!["ticker.BTC_USDT", "ticker.CRO_USDT", "ticker.CRO_BTC"],
            )?
            .set_default("gateway.settle_delay_ms", 1000)?
            .set_default("gateway.recv_timeout_ms", 35_000)?
            .set_default("gateway.send_backoff_ms", 1000)?
            .set_default("gateway.send_timeout_ms", 10_000)?
            .set_default("gateway.reconnect_delay_ms", 1000)?
            .set_default("gateway.bootstrap_retry_ms", 5000)?
            .set_default("gateway.decode_error_delay_ms", 100)?
            .set_default("gateway.connect_timeout_ms", 10_000)?;

        builder = match path {
            Some(path) => builder.add_source(File::with_name(path)),
            None => builder.add_source(File::with_name("cdc-gateway").required(false)),
        };

        builder
            .add_source(Environment::with_prefix("CDC").separator("__"))
            .build()?
            .try_deserialize()
    }

    /// Pushover settings narrowed to `user`'s own key, if both are configured.
    pub fn user_pushover(&self, user: &User) -> Option<Pushover> {
        let pushover = self.pushover.as_ref()?;
        let key = user.pushover_user_key.as_ref()?;
        Some(Pushover {
            user_keys: vec![key.clone()],
            ..pushover.clone()
        })
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        let t = &self.gateway;
        GatewayConfig {
            sandbox: self.sandbox,
            url: None,
            settle_delay: Duration::from_millis(t.settle_delay_ms),
            recv_timeout: Duration::from_millis(t.recv_timeout_ms),
            send_backoff: Duration::from_millis(t.send_backoff_ms),
            send_timeout: Duration::from_millis(t.send_timeout_ms),
            reconnect_delay: Duration::from_millis(t.reconnect_delay_ms),
            bootstrap_retry: Duration::from_millis(t.bootstrap_retry_ms),
            decode_error_delay: Duration::from_millis(t.decode_error_delay_ms),
            connect_timeout: Duration::from_millis(t.connect_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = Settings::load(None).unwrap();
        assert!(!settings.sandbox);
        assert_eq!(settings.market.channels.len(), 3);
        assert!(settings.pushover.is_none());

        let config = settings.gateway_config();
        assert_eq!(config.recv_timeout, Duration::from_secs(35));
        assert_eq!(config.bootstrap_retry, Duration::from_secs(5));
        assert_eq!(config.send_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_file_overrides() {
        let path = std::env::temp_dir().join(format!("cdc-gateway-test-{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
sandbox = true

[market]
channels = ["ticker.A_B"]

[[users]]
name = "alice"
credentials_file = "alice_api_key"
tickers = ["CRO_USDT"]
pushover_user_key = "u1"

[[users]]
name = "bob"
credentials_file = "bob_api_key"

[pushover]
title = "cdc-gateway"
token = "app"
user_keys = ["u1", "u2"]
"#
        )
        .unwrap();

        let settings = Settings::load(path.to_str()).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert!(settings.sandbox);
        assert!(settings.gateway_config().sandbox);
        assert_eq!(settings.market.channels, vec!["ticker.A_B"]);
        assert_eq!(settings.users[0].name, "alice");
        assert_eq!(settings.users[0].tickers, vec!["CRO_USDT"]);
        assert_eq!(settings.pushover.as_ref().unwrap().user_keys, vec!["u1", "u2"]);

        let alice = settings.user_pushover(&settings.users[0]).unwrap();
        assert_eq!(alice.user_keys, vec!["u1"]);
        assert_eq!(alice.token, "app");
        assert!(settings.user_pushover(&settings.users[1]).is_none());
    }
}
