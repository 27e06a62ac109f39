use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error};

use super::gateway::Shared;
use crate::alert::AlertHook;

const IDLE_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Idle,
    Progressed,
}

/// Handles at most one pending request.
pub(crate) async fn step(shared: &Shared) -> Step {
    if !shared.connection.is_live() {
        return Step::Idle;
    }
    let Some(request) = shared.pending.pop_front() else {
        return Step::Idle;
    };

    if shared.is_gated(&request.method) && !shared.auth.is_authenticated() {
        debug!(
            "Holding {} (id {}) until authenticated",
            request.method, request.id
        );
        shared.postponed.push_back(request);
        // login may have completed while the request was out of both queues
        if shared.auth.is_authenticated() {
            shared.restore_postponed();
        }
        return Step::Progressed;
    }

    if let Err(e) = shared.transmit(&request).await {
        error!("Sending {} (id {}) failed: {}", request.method, request.id, e);
        let alert = format!("Sending {} failed: {}", request.method, e);
        shared.pending.push_front(request);
        shared.alerts.notify(&alert);
        tokio::time::sleep(shared.config.send_backoff).await;
    }
    Step::Progressed
}

pub(crate) async fn run(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        match step(&shared).await {
            Step::Progressed => tokio::task::yield_now().await,
            Step::Idle => {
                tokio::select! {
                    _ = shared.pending.notified() => {}
                    _ = tokio::time::sleep(IDLE_POLL) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }
    debug!("Outbound processor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchanges::crypto_com::{ClientType, Credentials, Gateway, GatewayConfig};
    use crate::exchanges::memory::{memory_transport, MemoryExchange};

    fn user_gateway() -> (Gateway, MemoryExchange) {
        let (connector, exchange) = memory_transport();
        let config = GatewayConfig {
            settle_delay: Duration::ZERO,
            send_backoff: Duration::from_millis(1),
            ..GatewayConfig::default()
        };
        let gateway = Gateway::builder(ClientType::User)
            .config(config)
            .connector(Arc::new(connector))
            .credentials(Credentials::new("key", "secret"))
            .build()
            .unwrap();
        (gateway, exchange)
    }

    #[tokio::test]
    async fn test_idle_without_connection() {
        let (gateway, _exchange) = user_gateway();
        gateway.request("private/get-account-summary", None).unwrap();
        assert_eq!(step(&gateway.shared).await, Step::Idle);
        assert_eq!(gateway.pending_len(), 1);
    }

    #[tokio::test]
    async fn test_gated_request_is_postponed() {
        let (gateway, mut exchange) = user_gateway();
        gateway.shared.connection.connect().await.unwrap();
        gateway.request("private/get-account-summary", None).unwrap();

        assert_eq!(step(&gateway.shared).await, Step::Progressed);
        assert_eq!(gateway.postponed_len(), 1);
        assert!(exchange.try_next_sent().is_none());
    }

    #[tokio::test]
    async fn test_send_failure_requeues_same_request_at_head() {
        let (gateway, mut exchange) = user_gateway();
        gateway.shared.connection.connect().await.unwrap();
        gateway.shared.auth.set(true);
        let first = gateway.request("private/get-account-summary", None).unwrap();
        let second = gateway.request("private/get-order-detail", None).unwrap();

        exchange.fail_sends(1);
        assert_eq!(step(&gateway.shared).await, Step::Progressed);
        assert_eq!(gateway.pending_ids(), vec![first, second]);
        assert!(!gateway.is_authenticated());
        assert!(!gateway.shared.connection.is_live());
    }
}
