// Exchange transports and the crypto.com gateway
pub mod crypto_com;
pub mod memory;
pub mod ws;

use async_trait::async_trait;

use crate::error::TransportError;

/// Opens a streaming connection and hands back its two halves.
#[async_trait]
pub trait WsConnector: Send + Sync {
    async fn connect(
        &self,
        url: &str,
    ) -> Result<(Box<dyn WsSink>, Box<dyn WsStream>), TransportError>;
}

/// Write half of a connection.
#[async_trait]
pub trait WsSink: Send {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    async fn close(&mut self);
}

/// Read half of a connection. Control frames are handled below this trait.
#[async_trait]
pub trait WsStream: Send {
    async fn next_text(&mut self) -> Result<String, TransportError>;
}
