// Workers that drive one gateway each and feed the shared store
pub mod market_data;
pub mod user_api;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error};

use crate::alert::AlertHook;
use crate::error::DispatchError;
use crate::store::SharedStore;

pub use market_data::MarketDataWorker;
pub use user_api::{Decision, UserApiWorker};

/// Resolves once shutdown is requested or the sender is gone.
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Logs the whole store at debug level every `period` until shutdown and
/// returns how many dumps were written.
pub async fn dump_store_periodically(
    store: Arc<SharedStore>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> usize {
    let mut interval = tokio::time::interval(period);
    let mut dumps = 0;
    loop {
        tokio::select! {
            biased;
            _ = wait_for_shutdown(&mut shutdown) => return dumps,
            _ = interval.tick() => {
                debug!("Shared data: {:?}", store.snapshot());
                dumps += 1;
            }
        }
    }
}

/// Messages nobody registered for are expected; failing handlers are alerted.
pub(crate) fn report_dispatch_error(err: DispatchError, alerts: &dyn AlertHook) {
    if err.is_unregistered() {
        debug!("{}", err);
    } else {
        error!("{}", err);
        alerts.notify(&err.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_for_shutdown() {
        let (tx, mut rx) = watch::channel(false);
        let waiter = tokio::spawn(async move { wait_for_shutdown(&mut rx).await });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_dump_runs_until_shutdown() {
        let store = Arc::new(SharedStore::new());
        store.set("last_CRO_USDT", 0.07);
        let (tx, rx) = watch::channel(false);
        let dumper = tokio::spawn(dump_store_periodically(store, Duration::from_secs(5), rx));

        // ticks at 0s, 5s and 10s
        tokio::time::sleep(Duration::from_secs(11)).await;
        tx.send(true).unwrap();
        assert_eq!(dumper.await.unwrap(), 3);
    }
}
