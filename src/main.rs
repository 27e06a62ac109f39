use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, info_span, Instrument};
use tracing_subscriber::EnvFilter;

use cdc_gateway::alert::{AlertHook, LogAlert, PushoverNotifier};
use cdc_gateway::config::{Settings, User};
use cdc_gateway::exchanges::crypto_com::{
    ClientType, Gateway, GatewayConfig, METHOD_GET_INSTRUMENTS,
};
use cdc_gateway::signal::{signal_queue, SignalSender};
use cdc_gateway::store::SharedStore;
use cdc_gateway::utils::api_key_man::read_api_credentials_from_file;
use cdc_gateway::workers::user_api::BALANCE_CHANNEL;
use cdc_gateway::workers::{dump_store_periodically, Decision, MarketDataWorker, UserApiWorker};

const STORE_DUMP_PERIOD: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "cdc-gateway")]
#[command(about = "crypto.com websocket gateway feeding market and account data to trading workers")]
struct Args {
    /// Settings file (toml, yaml or json)
    #[arg(long)]
    config: Option<String>,

    /// Use the exchange sandbox endpoints
    #[arg(long)]
    sandbox: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut settings = Settings::load(args.config.as_deref()).context("Failed to load settings")?;
    settings.sandbox |= args.sandbox;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_level.as_str()));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let pushover = settings.pushover.as_ref().map(|p| {
        Arc::new(PushoverNotifier::new(
            p.title.clone(),
            p.token.clone(),
            p.user_keys.clone(),
        ))
    });
    let alerts: Arc<dyn AlertHook> = match &pushover {
        Some(p) => p.clone(),
        None => Arc::new(LogAlert),
    };
    let store = Arc::new(SharedStore::new());
    let gateway_config = settings.gateway_config();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (decisions_tx, mut decisions_rx) = mpsc::unbounded_channel::<Decision>();

    if settings.sandbox {
        tokio::spawn(dump_store_periodically(
            store.clone(),
            STORE_DUMP_PERIOD,
            shutdown_rx.clone(),
        ));
    }

    let mut workers = Vec::new();

    let market = MarketDataWorker::new(
        Gateway::builder(ClientType::Market).config(gateway_config.clone()),
        settings.market.channels.clone(),
        store.clone(),
        alerts.clone(),
    )?;
    workers.push(spawn_worker("market_data", shutdown_rx.clone(), move |shutdown| async move {
        let mut market = market;
        market.run(shutdown).await;
    })?);

    // kept alive so the queues stay open for the webhook side
    let mut signal_senders: Vec<SignalSender> = Vec::new();
    for user in &settings.users {
        let (signal_tx, signal_rx) = signal_queue();
        signal_senders.push(signal_tx);
        let user_alerts: Arc<dyn AlertHook> = match settings.user_pushover(user) {
            Some(p) => Arc::new(PushoverNotifier::new(p.title, p.token, p.user_keys)),
            None => alerts.clone(),
        };
        let worker = user_worker(
            user,
            &gateway_config,
            store.clone(),
            signal_rx,
            decisions_tx.clone(),
            user_alerts,
        )?;
        let name = format!("user_api_{}", user.name);
        workers.push(spawn_worker(&name, shutdown_rx.clone(), move |shutdown| async move {
            let mut worker = worker;
            worker.run(shutdown).await;
        })?);
    }
    drop(decisions_tx);

    info!("Started {} workers", workers.len());
    let mut decisions_open = true;
    loop {
        tokio::select! {
            decision = decisions_rx.recv(), if decisions_open => match decision {
                // order placement happens downstream of this log
                Some(decision) => info!("Decision for {}: {:?}", decision.user, decision.signal),
                None => decisions_open = false,
            },
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Failed to listen for ctrl-c: {}", e);
                }
                break;
            }
        }
    }

    info!("Interrupted, stopping workers");
    shutdown_tx.send_replace(true);
    for worker in workers {
        if worker.join().is_err() {
            error!("Worker thread panicked");
        }
    }
    match &pushover {
        Some(p) => p.notify_and_wait("Bye bye!").await,
        None => alerts.notify("Bye bye!"),
    }
    drop(signal_senders);
    Ok(())
}

fn user_worker(
    user: &User,
    gateway_config: &GatewayConfig,
    store: Arc<SharedStore>,
    signals: cdc_gateway::signal::SignalReceiver,
    decisions: mpsc::UnboundedSender<Decision>,
    alerts: Arc<dyn AlertHook>,
) -> Result<UserApiWorker> {
    let credentials = read_api_credentials_from_file(&user.credentials_file)
        .with_context(|| format!("Failed to read credentials of {}", user.name))?;

    let mut builder = Gateway::builder(ClientType::User)
        .config(gateway_config.clone())
        .credentials(credentials)
        .channels(user.channels.iter().filter(|c| *c != BALANCE_CHANNEL).cloned());
    for method in user
        .bootstrap_methods
        .iter()
        .filter(|m| *m != METHOD_GET_INSTRUMENTS)
    {
        builder = builder.bootstrap_request(method.clone(), None);
    }

    Ok(UserApiWorker::new(
        user.name.clone(),
        builder,
        user.tickers.clone(),
        store,
        signals,
        decisions,
        alerts,
    )?)
}

/// Runs `work` on its own thread with a current-thread runtime.
fn spawn_worker<F, Fut>(
    name: &str,
    shutdown: watch::Receiver<bool>,
    work: F,
) -> Result<thread::JoinHandle<()>>
where
    F: FnOnce(watch::Receiver<bool>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()>,
{
    let span = info_span!("worker", name = %name);
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build worker runtime")?;
    let handle = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || runtime.block_on(work(shutdown).instrument(span)))
        .context("Failed to spawn worker thread")?;
    Ok(handle)
}
