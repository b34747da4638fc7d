use pairbot::adapters::CoinbaseClient;
use pairbot::cli::Cli;
use pairbot::config::{AppConfig, LoggingConfig};
use pairbot::coordination::ShutdownToken;
use pairbot::error::{PairbotError, Result};
use pairbot::exchange::ExchangeGateway;
use pairbot::services::OrderUpdateListener;
use pairbot::signing::ApiCredentials;
use pairbot::strategy::{BuySellPairs, FillWaiter, OrderExecutionService, PairingSettings};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_DIR: &str = "logs";

/// Load configuration: an explicit `--config` file, else `config/` plus
/// environment, else built-in defaults for the product.
pub fn load_config(cli: &Cli, product_id: &str) -> Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::load_file(path)?,
        None => AppConfig::load().unwrap_or_else(|e| {
            eprintln!("Warning: no usable config ({}), using defaults", e);
            AppConfig::default_config(cli.dry_run, product_id)
        }),
    };

    config.trading.product_id = product_id.to_string();
    if cli.dry_run {
        config.dry_run.enabled = true;
    }

    config.validate().map_err(|errors| PairbotError::Validation(errors.join("; ")))?;
    Ok(config)
}

pub fn build_gateway(config: &AppConfig, shutdown: ShutdownToken) -> Result<Arc<dyn ExchangeGateway>> {
    let credentials = ApiCredentials::from_env()?;
    let client = CoinbaseClient::new(config, credentials, shutdown)?;
    if client.is_dry_run() {
        warn!("Dry run: orders are simulated, nothing is sent to the exchange");
    }
    Ok(Arc::new(client))
}

pub fn build_executor(config: &AppConfig, gateway: Arc<dyn ExchangeGateway>) -> OrderExecutionService {
    OrderExecutionService::new(gateway, config.fees.schedule()).with_post_only(config.trading.post_only)
}

/// Wire the pairing engine; with the listener enabled it is started for the
/// product and feeds the fill waiter.
pub fn build_engine(
    config: &AppConfig,
    gateway: Arc<dyn ExchangeGateway>,
    shutdown: ShutdownToken,
) -> BuySellPairs {
    let exec = &config.execution;
    let mut waiter = FillWaiter::new(
        gateway.clone(),
        Duration::from_millis(exec.poll_interval_ms),
        Duration::from_millis(exec.max_poll_interval_ms),
    );

    if config.listener.enabled {
        let listener = Arc::new(OrderUpdateListener::new(gateway.clone(), config.listener.dedupe_window));
        waiter = waiter.with_listener(listener.clone());

        let product_ids = vec![config.trading.product_id.clone()];
        let channel = config.listener.channel;
        let token = shutdown.clone();
        tokio::spawn(async move {
            match listener.run(&product_ids, channel, &token).await {
                Ok(stats) => info!("Order listener finished: {:?}", stats),
                Err(e) => warn!("Order listener stopped: {}", e),
            }
        });
    }

    BuySellPairs::new(
        Arc::new(build_executor(config, gateway)),
        waiter,
        exec.retry_policy(),
        PairingSettings::from_config(config),
        shutdown,
    )
}

pub fn init_logging(config: &LoggingConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let log_dir = config
        .dir
        .clone()
        .or_else(|| std::env::var("PAIRBOT_LOG_DIR").ok())
        .unwrap_or_else(|| DEFAULT_LOG_DIR.to_string());

    // `rolling::daily` panics if it cannot create the file, so check first
    let writable = std::fs::create_dir_all(&log_dir).is_ok() && {
        let test_path = std::path::Path::new(&log_dir).join(".pairbot_write_test");
        let ok = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&test_path)
            .is_ok();
        let _ = std::fs::remove_file(&test_path);
        ok
    };

    let (json_layer, text_layer) = if writable {
        let file_appender = tracing_appender::rolling::daily(&log_dir, "pairbot.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        // Keep the guard alive for the life of the process
        Box::leak(Box::new(guard));

        if config.json {
            (
                Some(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking)
                        .with_current_span(true)
                        .with_target(true),
                ),
                None,
            )
        } else {
            (
                None,
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(true),
                ),
            )
        }
    } else {
        eprintln!(
            "Warning: Could not write to log directory {}, file logging disabled",
            log_dir
        );
        (None, None)
    };

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(json_layer)
        .with(text_layer)
        .init();

    if writable {
        eprintln!("Logging to: {}/pairbot.log", log_dir);
    }
}

pub fn init_logging_simple() {
    // Minimal logging for one-shot commands
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .try_init();
}
