//! Wire envelopes and the message factory.

use std::sync::atomic::{AtomicI64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::signer::Credentials;
use super::{
    needs_api_key, METHOD_AUTH, METHOD_HEARTBEAT, METHOD_RESPOND_HEARTBEAT, METHOD_SUBSCRIBE,
    SUCCESS_CODE,
};
use crate::error::GatewayError;

/// Outbound request envelope. Requeued verbatim on transient failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: i64,
    pub method: String,
    pub nonce: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(rename = "sig", default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Request {
    pub fn to_json(&self) -> Result<String, GatewayError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: i64,
    pub method: String,
    pub code: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Response {
    pub fn is_success(&self) -> bool {
        self.code == SUCCESS_CODE
    }
}

/// Unsolicited channel payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub subscription: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrument_name: Option<String>,
    #[serde(default)]
    pub data: Vec<Value>,
}

/// What callers drain from the gateway.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Event(Event),
    Response(Response),
}

impl Incoming {
    /// Channel name for events, method name for responses.
    pub fn route(&self) -> &str {
        match self {
            Incoming::Event(event) => &event.subscription,
            Incoming::Response(response) => &response.method,
        }
    }
}

/// Classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Frame {
    Heartbeat { id: i64 },
    SubscribeAck { code: i64, message: Option<String> },
    AuthAck { code: i64, message: Option<String> },
    Event(Event),
    Response(Response),
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    id: Option<i64>,
    method: Option<String>,
    code: Option<i64>,
    result: Option<Value>,
    message: Option<String>,
    subscription: Option<String>,
    channel: Option<String>,
    instrument_name: Option<String>,
    data: Option<Vec<Value>>,
}

impl Frame {
    pub(crate) fn decode(text: &str) -> Result<Frame, GatewayError> {
        let raw: RawFrame = serde_json::from_str(text)?;

        let method = match raw.method {
            Some(method) => method,
            None => {
                let subscription = raw
                    .subscription
                    .ok_or_else(|| GatewayError::Decode("frame without method".to_string()))?;
                return Ok(Frame::Event(Event {
                    subscription,
                    channel: raw.channel,
                    instrument_name: raw.instrument_name,
                    data: raw.data.unwrap_or_default(),
                }));
            }
        };

        let required_code = |code: Option<i64>, method: &str| {
            code.ok_or_else(|| GatewayError::Decode(format!("{} without code", method)))
        };

        match method.as_str() {
            METHOD_HEARTBEAT => {
                let id = raw
                    .id
                    .ok_or_else(|| GatewayError::Decode("heartbeat without id".to_string()))?;
                Ok(Frame::Heartbeat { id })
            }
            METHOD_SUBSCRIBE => match raw.result {
                Some(result) if !result.is_null() => {
                    Ok(Frame::Event(serde_json::from_value(result)?))
                }
                _ => Ok(Frame::SubscribeAck {
                    code: required_code(raw.code, &method)?,
                    message: raw.message,
                }),
            },
            METHOD_AUTH => Ok(Frame::AuthAck {
                code: required_code(raw.code, &method)?,
                message: raw.message,
            }),
            _ => {
                let id = raw
                    .id
                    .ok_or_else(|| GatewayError::Decode(format!("{} response without id", method)))?;
                let code = required_code(raw.code, &method)?;
                Ok(Frame::Response(Response {
                    id,
                    method,
                    code,
                    result: raw.result,
                    message: raw.message,
                }))
            }
        }
    }
}

/// Builds request envelopes: ids, nonces, api key and signature.
pub struct MessageFactory {
    next_id: AtomicI64,
    last_nonce: AtomicI64,
    credentials: Option<Credentials>,
}

impl MessageFactory {
    pub fn new(credentials: Option<Credentials>) -> Self {
        MessageFactory {
            next_id: AtomicI64::new(1),
            last_nonce: AtomicI64::new(0),
            credentials,
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    pub fn build(
        &self,
        method: &str,
        params: Option<Map<String, Value>>,
    ) -> Result<Request, GatewayError> {
        let signing = match (&self.credentials, needs_api_key(method)) {
            (None, true) => {
                return Err(GatewayError::Configuration(format!(
                    "calling {} without providing api_key",
                    method
                )))
            }
            (Some(credentials), true) => Some(credentials),
            (_, false) => None,
        };

        let mut request = Request {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            method: method.to_string(),
            nonce: self.next_nonce(),
            params,
            api_key: None,
            signature: None,
        };
        if let Some(credentials) = signing {
            request.api_key = Some(credentials.api_key.clone());
            request.signature = Some(credentials.sign(
                &request.method,
                request.id,
                request.params.as_ref(),
                request.nonce,
            ));
        }
        Ok(request)
    }

    pub fn subscribe(&self, channels: &[String]) -> Result<Request, GatewayError> {
        let mut params = Map::new();
        params.insert("channels".to_string(), json!(channels));
        self.build(METHOD_SUBSCRIBE, Some(params))
    }

    /// Answer to a heartbeat. Reuses the heartbeat id instead of the counter.
    pub fn heartbeat_ack(&self, id: i64) -> Request {
        Request {
            id,
            method: METHOD_RESPOND_HEARTBEAT.to_string(),
            nonce: self.next_nonce(),
            params: None,
            api_key: None,
            signature: None,
        }
    }

    /// Epoch millis, bumped when the clock has not moved since the last nonce.
    fn next_nonce(&self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        let previous = match self.last_nonce.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(now.max(last + 1))
        }) {
            Ok(last) | Err(last) => last,
        };
        now.max(previous + 1)
    }
}
