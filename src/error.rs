// Error types for the gateway and its transports

use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Transport-level failures. All of them are recovered by reconnecting.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Connection closed")]
    Closed,

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Receive failed: {0}")]
    Receive(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),
}

impl From<tungstenite::Error> for TransportError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                TransportError::Closed
            }
            other => TransportError::Receive(other.to_string()),
        }
    }
}

#[derive(Error, Debug)]
pub enum GatewayError {
    /// Missing credentials for a method that needs them. Never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Non-zero response code for auth or subscribe.
    #[error("Protocol error: {method} returned code {code}: {message}")]
    Protocol {
        method: String,
        code: i64,
        message: String,
    },

    #[error("Decode error: {0}")]
    Decode(String),
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Decode(err.to_string())
    }
}

/// Caller-side routing failures. The gateway never raises these itself.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("No handler registered for channel {0}")]
    UnregisteredChannel(String),

    #[error("No handler registered for method {0}")]
    UnregisteredMethod(String),

    #[error("Handler for {route} failed: {reason:#}")]
    Handler { route: String, reason: anyhow::Error },
}

impl DispatchError {
    pub fn is_unregistered(&self) -> bool {
        matches!(
            self,
            DispatchError::UnregisteredChannel(_) | DispatchError::UnregisteredMethod(_)
        )
    }
}
