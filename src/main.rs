use std::sync::Arc;

use eyre::{bail, WrapErr};
use tokio::sync::{mpsc, oneshot};

use dexbridge_relayer::api::{self, AppState};
use dexbridge_relayer::chains::ChainRegistry;
use dexbridge_relayer::config::{Config, LogFormat};
use dexbridge_relayer::metrics;
use dexbridge_relayer::monitor::Monitor;
use dexbridge_relayer::notify::{LogNotifier, Notification, NotificationKind, Notifier, WebhookNotifier};
use dexbridge_relayer::scheduler::Scheduler;
use dexbridge_relayer::settlement::SettlementProcessor;
use dexbridge_relayer::store::{EventStore, PgStore};
use dexbridge_relayer::watchers::EventWatcher;

fn main() -> eyre::Result<()> {
    // Install color-eyre for better error reporting
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> eyre::Result<()> {
    // LOG_FORMAT may come from .env, so load it before the subscriber
    let _ = dotenvy::dotenv();
    let log_format = match std::env::var("LOG_FORMAT") {
        Ok(v) => v.parse()?,
        Err(_) => LogFormat::default(),
    };
    init_logging(log_format);

    tracing::info!("Starting DexBridge Relayer");

    let config = Config::load()?;
    tracing::info!(
        chains = config.chains.len(),
        api = %config.api_bind_address(),
        "Configuration loaded"
    );

    let registry = Arc::new(ChainRegistry::from_settings(&config.chains));
    if registry.is_empty() {
        bail!("No chains configured; set <CHAIN>_RPC_URL and <CHAIN>_BRIDGE_ADDRESS");
    }

    let store: Arc<dyn EventStore> = Arc::new(
        PgStore::connect(&config.database.url, config.database.max_connections)
            .await
            .wrap_err("Failed to connect to database")?,
    );
    tracing::info!("Database connected, migrations complete");

    let notifier: Arc<dyn Notifier> = if config.alerts.any_enabled() {
        Arc::new(WebhookNotifier::new(config.alerts.clone()))
    } else {
        tracing::info!("No alert webhooks configured, notifications are logged only");
        Arc::new(LogNotifier)
    };

    // Panics anywhere trigger the same graceful shutdown as a signal
    let (panic_tx, mut panic_rx) = mpsc::unbounded_channel::<String>();
    let previous_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let _ = panic_tx.send(info.to_string());
        previous_hook(info);
    }));

    let watcher = Arc::new(EventWatcher::initialize(
        registry.clone(),
        store.clone(),
        notifier.clone(),
        config.watcher,
    ));
    let processor = Arc::new(
        SettlementProcessor::initialize(
            registry.clone(),
            &config.relayer.private_key,
            store.clone(),
            notifier.clone(),
            config.processor,
        )
        .await?,
    );

    watcher.start();
    processor.start();

    let monitor = Arc::new(Monitor::new(
        watcher.clone(),
        processor.clone(),
        store.clone(),
        notifier.clone(),
        config.monitor.clone(),
    ));
    let mut monitors = Scheduler::new();
    monitor.schedule(&mut monitors);

    let (api_shutdown_tx, api_shutdown_rx) = oneshot::channel::<()>();
    let api_state = AppState {
        store: store.clone(),
        watcher: watcher.clone(),
        processor: processor.clone(),
        registry: registry.clone(),
        admin_token: config.api.admin_token.clone(),
    };
    let bind = config.api_bind_address();
    let api_task = tokio::spawn(async move {
        let shutdown = async {
            let _ = api_shutdown_rx.await;
        };
        if let Err(e) = api::start_server(&bind, api_state, shutdown).await {
            tracing::error!(error = %e, "API server error");
        }
    });

    metrics::set_up(true);
    notifier.notify(
        Notification::new(NotificationKind::ServiceLifecycle, "Relayer started").with_data(
            serde_json::json!({
                "relayerAddress": processor.status().relayer_address,
                "chains": registry.all_chain_ids(),
            }),
        ),
    );
    tracing::info!(chains = ?registry.all_chain_ids(), "Relayer running");

    let reason = tokio::select! {
        _ = wait_for_shutdown_signal() => "signal".to_string(),
        Some(panic) = panic_rx.recv() => {
            tracing::error!(panic = %panic, "Panic detected, shutting down");
            format!("panic: {}", panic)
        }
    };

    tracing::info!(reason = %reason, "Shutting down");
    watcher.stop().await;
    processor.stop().await;
    monitors.stop();
    monitors.join().await;
    let _ = api_shutdown_tx.send(());
    let _ = api_task.await;
    store.close().await;

    metrics::set_up(false);
    notifier.notify(
        Notification::new(NotificationKind::ServiceLifecycle, "Relayer stopped")
            .with_field("reason", reason),
    );
    notifier.flush().await;

    tracing::info!("DexBridge Relayer stopped");
    Ok(())
}

/// Initialize tracing/logging with structured output
fn init_logging(format: LogFormat) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,dexbridge_relayer=debug"));

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(true))
            .with(filter)
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .with(filter)
            .init(),
    }
}

/// Wait for shutdown signals (SIGINT/SIGTERM)
async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
