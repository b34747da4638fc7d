use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::coordination::RetryPolicy;
use crate::domain::ProductId;
use crate::exchange::ChannelType;
use crate::strategy::pricing::FeeSchedule;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub exchange: ExchangeConfig,
    pub trading: TradingConfig,
    #[serde(default)]
    pub fees: FeeConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub listener: ListenerConfig,
    pub dry_run: DryRunConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    /// REST API base URL
    pub rest_url: String,
    /// WebSocket endpoint for order events
    pub ws_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradingConfig {
    /// Trading pair, "BUYING-PAYING"
    pub product_id: String,
    /// Base size of each buy
    pub base_size: Decimal,
    /// Markdown (percent) of the first buy in the buy loop
    pub start_markdown_pct: Decimal,
    /// Markdown increase (percent) per buy-loop iteration
    #[serde(default = "default_markdown_step")]
    pub markdown_step_pct: Decimal,
    /// Percent below best bid for the monitor loop's buy
    pub buy_pct: Decimal,
    /// Percent above the filled buy's value for the paired sell
    pub sell_pct: Decimal,
    #[serde(default = "default_true")]
    pub post_only: bool,
}

fn default_markdown_step() -> Decimal {
    Decimal::new(1, 3)
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeeConfig {
    /// Fee rate for post-only (maker) orders
    pub maker_rate: Decimal,
    /// Fee rate for orders that may take liquidity
    pub taker_rate: Decimal,
}

impl Default for FeeConfig {
    fn default() -> Self {
        let schedule = FeeSchedule::default();
        Self {
            maker_rate: schedule.maker_rate,
            taker_rate: schedule.taker_rate,
        }
    }
}

impl FeeConfig {
    pub fn schedule(&self) -> FeeSchedule {
        FeeSchedule {
            maker_rate: self.maker_rate,
            taker_rate: self.taker_rate,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    /// First polling interval while waiting for a fill
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Polling interval ceiling after backoff
    #[serde(default = "default_max_poll_interval")]
    pub max_poll_interval_ms: u64,
    /// How long a buy may rest before it is cancelled
    #[serde(default = "default_fill_timeout")]
    pub fill_timeout_ms: u64,
    /// How long to wait on a sell before moving on (the sell keeps resting)
    #[serde(default = "default_sell_fill_timeout")]
    pub sell_fill_timeout_ms: u64,
    /// Attempts per gateway operation, including the first
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_ms: u64,
    /// Pause between buy-loop iterations
    #[serde(default = "default_iteration_delay")]
    pub iteration_delay_ms: u64,
    /// Buy-loop iteration cap
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Monitor-loop cycle cap (unbounded when absent)
    #[serde(default)]
    pub max_cycles: Option<u32>,
}

fn default_poll_interval() -> u64 {
    5_000
}

fn default_max_poll_interval() -> u64 {
    30_000
}

fn default_fill_timeout() -> u64 {
    15 * 60 * 1_000
}

fn default_sell_fill_timeout() -> u64 {
    60 * 60 * 1_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay() -> u64 {
    500
}

fn default_retry_max_delay() -> u64 {
    10_000
}

fn default_iteration_delay() -> u64 {
    1_000
}

fn default_max_iterations() -> u32 {
    50
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            max_poll_interval_ms: default_max_poll_interval(),
            fill_timeout_ms: default_fill_timeout(),
            sell_fill_timeout_ms: default_sell_fill_timeout(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay(),
            retry_max_delay_ms: default_retry_max_delay(),
            iteration_delay_ms: default_iteration_delay(),
            max_iterations: default_max_iterations(),
            max_cycles: None,
        }
    }
}

impl ExecutionConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries.max(1),
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListenerConfig {
    /// Use the order-event stream as the primary fill signal
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub channel: ChannelType,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_max_reconnect_delay")]
    pub max_reconnect_delay_ms: u64,
    /// Number of recent updates remembered for deduplication
    #[serde(default = "default_dedupe_window")]
    pub dedupe_window: usize,
}

fn default_reconnect_delay() -> u64 {
    1_000
}

fn default_max_reconnect_delay() -> u64 {
    60_000
}

fn default_dedupe_window() -> usize {
    1_024
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            channel: ChannelType::User,
            reconnect_delay_ms: default_reconnect_delay(),
            max_reconnect_delay_ms: default_max_reconnect_delay(),
            dedupe_window: default_dedupe_window(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DryRunConfig {
    /// Enable dry run mode (no real orders)
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directives, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Write JSON records to the log file
    #[serde(default)]
    pub json: bool,
    /// Directory for the rolling log file
    #[serde(default)]
    pub dir: Option<String>,
}

fn default_log_level() -> String {
    "info,pairbot=debug".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            dir: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("exchange.rest_url", DEFAULT_REST_URL)?
            .set_default("exchange.ws_url", DEFAULT_WS_URL)?
            .set_default("dry_run.enabled", true)?
            .set_default("logging.level", "info,pairbot=debug")?
            .set_default("logging.json", false)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("PAIRBOT_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (PAIRBOT_TRADING__PRODUCT_ID, etc.)
            .add_source(
                Environment::with_prefix("PAIRBOT")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Load a single config file
    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Config::builder()
            .set_default("exchange.rest_url", DEFAULT_REST_URL)?
            .set_default("exchange.ws_url", DEFAULT_WS_URL)?
            .set_default("dry_run.enabled", true)?
            .add_source(File::from(path.as_ref()))
            .add_source(
                Environment::with_prefix("PAIRBOT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Create a default configuration for CLI usage
    pub fn default_config(dry_run: bool, product_id: &str) -> Self {
        use rust_decimal_macros::dec;

        Self {
            exchange: ExchangeConfig {
                rest_url: DEFAULT_REST_URL.to_string(),
                ws_url: DEFAULT_WS_URL.to_string(),
            },
            trading: TradingConfig {
                product_id: product_id.to_string(),
                base_size: dec!(1),
                start_markdown_pct: dec!(0.05),
                markdown_step_pct: default_markdown_step(),
                buy_pct: dec!(1),
                sell_pct: dec!(1),
                post_only: true,
            },
            fees: FeeConfig::default(),
            execution: ExecutionConfig::default(),
            listener: ListenerConfig::default(),
            dry_run: DryRunConfig { enabled: dry_run },
            logging: LoggingConfig::default(),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if let Err(e) = ProductId::parse(&self.trading.product_id) {
            errors.push(e.to_string());
        }

        if self.trading.base_size <= Decimal::ZERO {
            errors.push("base_size must be positive".to_string());
        }

        let hundred = Decimal::ONE_HUNDRED;
        if self.trading.start_markdown_pct < Decimal::ZERO || self.trading.start_markdown_pct >= hundred {
            errors.push("start_markdown_pct must be in [0, 100)".to_string());
        }

        if self.trading.markdown_step_pct <= Decimal::ZERO {
            errors.push("markdown_step_pct must be positive".to_string());
        }

        if self.trading.buy_pct < Decimal::ZERO || self.trading.buy_pct >= hundred {
            errors.push("buy_pct must be in [0, 100)".to_string());
        }

        if self.trading.sell_pct < Decimal::ZERO {
            errors.push("sell_pct must not be negative".to_string());
        }

        if self.fees.maker_rate < Decimal::ZERO || self.fees.taker_rate < Decimal::ZERO {
            errors.push("fee rates must not be negative".to_string());
        }

        if self.execution.poll_interval_ms == 0 {
            errors.push("poll_interval_ms must be positive".to_string());
        }

        if self.execution.max_poll_interval_ms < self.execution.poll_interval_ms {
            errors.push("max_poll_interval_ms must be >= poll_interval_ms".to_string());
        }

        if self.execution.max_iterations == 0 {
            errors.push("max_iterations must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

pub const DEFAULT_REST_URL: &str = "https://api.coinbase.com";
pub const DEFAULT_WS_URL: &str = "wss://advanced-trade-ws.coinbase.com";
