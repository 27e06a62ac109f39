use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::{WsConnector, WsSink, WsStream};
use crate::error::TransportError;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Websocket connector backed by tokio-tungstenite.
pub struct TungsteniteConnector {
    connect_timeout: Duration,
}

impl TungsteniteConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        TungsteniteConnector { connect_timeout }
    }
}

#[async_trait]
impl WsConnector for TungsteniteConnector {
    async fn connect(
        &self,
        url: &str,
    ) -> Result<(Box<dyn WsSink>, Box<dyn WsStream>), TransportError> {
        let (ws_stream, _) = tokio::time::timeout(self.connect_timeout, connect_async(url))
            .await
            .map_err(|_| TransportError::Timeout(self.connect_timeout))?
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        info!("WebSocket connected to {}", url);

        let (write, read) = ws_stream.split();
        Ok((
            Box::new(TungsteniteSink { write }),
            Box::new(TungsteniteStream { read }),
        ))
    }
}

struct TungsteniteSink {
    write: SplitSink<Socket, Message>,
}

#[async_trait]
impl WsSink for TungsteniteSink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.write
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&mut self) {
        if let Err(e) = self.write.close().await {
            debug!("Closing websocket failed: {}", e);
        }
    }
}

struct TungsteniteStream {
    read: SplitStream<Socket>,
}

#[async_trait]
impl WsStream for TungsteniteStream {
    async fn next_text(&mut self) -> Result<String, TransportError> {
        loop {
            match self.read.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text),
                Some(Ok(Message::Binary(bin))) => return Ok(binary_text(bin)),
                // tungstenite answers pings itself
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Frame(_))) => continue,
                Some(Ok(Message::Close(_))) | None => return Err(TransportError::Closed),
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }
}

/// Invalid UTF-8 is replaced rather than rejected here, so a bad payload fails
/// JSON decoding upstream instead of tearing the connection down.
fn binary_text(bin: Vec<u8>) -> String {
    match String::from_utf8(bin) {
        Ok(text) => text,
        Err(e) => {
            warn!("Binary frame is not valid UTF-8: {}", e);
            String::from_utf8_lossy(e.as_bytes()).into_owned()
        }
    }
}
