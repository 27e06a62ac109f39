use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::gateway::Shared;
use super::message::{Frame, Incoming};
use super::{METHOD_AUTH, METHOD_SUBSCRIBE, SUCCESS_CODE};
use crate::alert::AlertHook;
use crate::error::{GatewayError, TransportError};
use crate::exchanges::WsStream;

struct Session {
    stream: Box<dyn WsStream>,
    epoch: u64,
}

pub(crate) async fn run(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let mut session: Option<Session> = None;
    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = step(&shared, &mut session) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!("Inbound loop stopped");
}

async fn step(shared: &Shared, session: &mut Option<Session>) {
    if matches!(session, Some(s) if s.epoch != shared.connection.epoch()) {
        debug!("Discarding superseded connection");
        *session = None;
    }

    if session.is_none() {
        match establish(shared).await {
            Ok(established) => {
                shared.connect_alerts.reset();
                *session = Some(established);
            }
            Err(e) => {
                let message = format!("Connection to {} failed: {}", shared.connection.url(), e);
                error!("{}", message);
                shared.connect_alerts.notify(&message);
                shared.auth.set(false);
                tokio::time::sleep(shared.config.reconnect_delay).await;
            }
        }
        return;
    }
    let Some(current) = session.as_mut() else {
        return;
    };

    let epoch = current.epoch;
    let timeout = shared.config.recv_timeout;
    let received = tokio::select! {
        received = tokio::time::timeout(timeout, current.stream.next_text()) => Some(received),
        _ = shared.connection.wait_down(epoch) => None,
    };

    match received {
        None => {
            debug!("Connection epoch {} went down", epoch);
            *session = None;
        }
        Some(Err(_)) => {
            let e = TransportError::Timeout(timeout);
            warn!("No message received: {}", e);
            shared.drop_connection(&e.to_string()).await;
            *session = None;
        }
        Some(Ok(Err(e))) => {
            shared.drop_connection(&e.to_string()).await;
            shared
                .connect_alerts
                .notify(&format!("Connection to {} lost: {}", shared.connection.url(), e));
            *session = None;
        }
        Some(Ok(Ok(text))) => handle_text(shared, &text).await,
    }
}

/// Connects and either logs in or, without credentials, counts as
/// authenticated right away and subscribes.
async fn establish(shared: &Shared) -> Result<Session, GatewayError> {
    let (stream, epoch) = shared.connection.connect().await?;
    if shared.needs_login() {
        let auth = shared.factory.build(METHOD_AUTH, None)?;
        info!("Authenticating (id {})", auth.id);
        shared.transmit(&auth).await?;
    } else {
        shared.auth.set(true);
        shared.subscribe().await?;
    }
    Ok(Session { stream, epoch })
}

async fn handle_text(shared: &Shared, text: &str) {
    match process(shared, text).await {
        Ok(()) => {}
        Err(e @ GatewayError::Protocol { .. }) | Err(e @ GatewayError::Transport(_)) => {
            error!("{}", e);
            shared.drop_connection(&e.to_string()).await;
            shared.connect_alerts.notify(&e.to_string());
        }
        Err(e) => {
            error!("Failed to handle message {}: {}", text, e);
            shared
                .alerts
                .notify(&format!("Failed to handle message: {}", e));
            tokio::time::sleep(shared.config.decode_error_delay).await;
        }
    }
}

async fn process(shared: &Shared, text: &str) -> Result<(), GatewayError> {
    match Frame::decode(text)? {
        Frame::Heartbeat { id } => {
            debug!("Heartbeat {}", id);
            shared.pending.push_front(shared.factory.heartbeat_ack(id));
        }
        Frame::SubscribeAck { code, message } => {
            if code != SUCCESS_CODE {
                return Err(protocol_error(METHOD_SUBSCRIBE, code, message));
            }
            info!("Subscribed to {:?}", shared.channels);
        }
        Frame::AuthAck { code, message } => {
            if code != SUCCESS_CODE {
                return Err(protocol_error(METHOD_AUTH, code, message));
            }
            info!("Authenticated");
            shared.auth.set(true);
            shared.subscribe().await?;
        }
        Frame::Event(event) => shared.forward(Incoming::Event(event)),
        Frame::Response(response) => {
            shared.bootstrap().on_response(&response);
            shared.forward(Incoming::Response(response));
        }
    }
    Ok(())
}

fn protocol_error(method: &str, code: i64, message: Option<String>) -> GatewayError {
    GatewayError::Protocol {
        method: method.to_string(),
        code,
        message: message.unwrap_or_default(),
    }
}
