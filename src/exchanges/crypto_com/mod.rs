//! crypto.com v2 websocket gateway.
//!
//! ```text
//!  caller ──send──► PendingQueue ──outbound──► ConnectionManager ──► exchange
//!                        ▲   │ (auth gate)          │
//!                        │   ▼                      │ inbound
//!                   PostponedQueue          heartbeat ack / auth / subscribe
//!                                                   │
//!  caller ◄──next_event── events queue ◄────────────┘
//! ```
//!
//! Authentication changes are published through [`auth::AuthState`]; the
//! [`bootstrap::BootstrapTracker`] listens to them and reissues the
//! state-establishing requests after every (re)connection.

pub mod auth;
pub mod bootstrap;
pub mod connection;
pub mod dispatcher;
pub mod gateway;
pub mod inbound;
pub mod message;
pub mod outbound;
pub mod queue;
pub mod signer;

use serde::{Deserialize, Serialize};

pub use dispatcher::EventDispatcher;
pub use gateway::{ConnectionState, Gateway, GatewayBuilder, GatewayConfig};
pub use message::{Event, Incoming, MessageFactory, Request, Response};
pub use signer::Credentials;

pub const MARKET_URI: &str = "wss://stream.crypto.com/v2/market";
pub const SANDBOX_MARKET_URI: &str = "wss://uat-stream.3ona.co/v2/market";
pub const USER_URI: &str = "wss://stream.crypto.com/v2/user";
pub const SANDBOX_USER_URI: &str = "wss://uat-stream.3ona.co/v2/user";

pub const METHOD_AUTH: &str = "public/auth";
pub const METHOD_HEARTBEAT: &str = "public/heartbeat";
pub const METHOD_RESPOND_HEARTBEAT: &str = "public/respond-heartbeat";
pub const METHOD_SUBSCRIBE: &str = "subscribe";
pub const METHOD_GET_INSTRUMENTS: &str = "public/get-instruments";

pub const SUCCESS_CODE: i64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    Market,
    User,
}

impl ClientType {
    pub fn ws_url(&self, sandbox: bool) -> &'static str {
        match (self, sandbox) {
            (ClientType::Market, false) => MARKET_URI,
            (ClientType::Market, true) => SANDBOX_MARKET_URI,
            (ClientType::User, false) => USER_URI,
            (ClientType::User, true) => SANDBOX_USER_URI,
        }
    }

    /// Whether `method` has to wait for authentication on this kind of connection.
    ///
    /// The user endpoint refuses everything but the exempt methods before
    /// `public/auth` succeeds; the market endpoint never authenticates.
    pub fn gates(&self, method: &str) -> bool {
        *self == ClientType::User && !is_auth_exempt(method)
    }
}

pub fn is_private(method: &str) -> bool {
    method.starts_with("private/")
}

/// Methods that carry `api_key` and `sig`.
pub fn needs_api_key(method: &str) -> bool {
    method == METHOD_AUTH || is_private(method)
}

pub fn is_auth_exempt(method: &str) -> bool {
    matches!(
        method,
        METHOD_RESPOND_HEARTBEAT | METHOD_AUTH | METHOD_SUBSCRIBE
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_selection() {
        assert_eq!(ClientType::Market.ws_url(false), MARKET_URI);
        assert_eq!(ClientType::User.ws_url(true), SANDBOX_USER_URI);
    }

    #[test]
    fn test_method_classes() {
        assert!(needs_api_key("public/auth"));
        assert!(needs_api_key("private/create-order"));
        assert!(!needs_api_key("public/get-instruments"));

        assert!(ClientType::User.gates("private/get-account-summary"));
        assert!(ClientType::User.gates("public/get-instruments"));
        assert!(!ClientType::User.gates("public/respond-heartbeat"));
        assert!(!ClientType::User.gates("subscribe"));
        assert!(!ClientType::Market.gates("private/create-order"));
    }
}
