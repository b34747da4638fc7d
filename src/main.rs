use anyhow::anyhow;
use clap::Parser;
use pairbot::cli::{self, Cli, Commands};
use pairbot::config::AppConfig;
use pairbot::coordination::{install_signal_handlers, GracefulShutdown, ShutdownSignal, ShutdownToken};
use pairbot::domain::Outcome;
use pairbot::error::{PairbotError, Result};
use pairbot::exchange::ExchangeGateway;
use pairbot::services::OrderUpdateListener;
use pairbot::strategy::{preview_order, AccountValidator};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info};

mod main_runtime;

use main_runtime::{build_engine, build_executor, build_gateway, init_logging, init_logging_simple, load_config};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let product = cli.command.product().to_string();

    let config = load_config(&cli, &product)?;
    if cli.command.is_long_running() {
        init_logging(&config.logging);
    } else {
        init_logging_simple();
    }

    // Preview is purely local
    if let Commands::Preview { side, base_size, limit_price, taker, .. } = &cli.command {
        let preview = preview_order(&product, *side, *base_size, *limit_price, !taker, &config.fees.schedule());
        cli::print_preview(&preview);
        return Ok(());
    }

    let shutdown = Arc::new(GracefulShutdown::new());
    install_signal_handlers(shutdown.clone());
    let token = shutdown.token();

    let gateway = build_gateway(&config, token.clone())?;
    let result = run_command(&cli.command, &config, gateway, token).await;

    // Stops the background order listener, if one was started
    if !shutdown.is_shutdown_requested() {
        shutdown.request_shutdown(ShutdownSignal::Completed);
    }

    if let Err(e) = &result {
        error!("{} failed: {}", product, e);
    }
    result
}

async fn run_command(
    command: &Commands,
    config: &AppConfig,
    gateway: Arc<dyn ExchangeGateway>,
    shutdown: ShutdownToken,
) -> Result<()> {
    match command {
        Commands::BuyLoop { product, base_size, start_markdown } => {
            let engine = build_engine(config, gateway, shutdown);
            let outcome = engine
                .buy_loop_till_funds_run_out(
                    product,
                    base_size.unwrap_or(config.trading.base_size),
                    start_markdown.unwrap_or(config.trading.start_markdown_pct),
                )
                .await;
            report(outcome)
        }
        Commands::Monitor { product, buy_pct, sell_pct } => {
            let engine = build_engine(config, gateway, shutdown);
            let outcome = engine
                .monitor_and_trade(
                    product,
                    buy_pct.unwrap_or(config.trading.buy_pct),
                    sell_pct.unwrap_or(config.trading.sell_pct),
                )
                .await;
            report(outcome)
        }
        Commands::Buy { product, markdown, base_size } => {
            let placed = build_executor(config, gateway)
                .buy(product, *markdown, *base_size, &shutdown)
                .await?;
            cli::print_preview(&placed.preview);
            cli::print_order(&placed.order);
            Ok(())
        }
        Commands::Sell { product, markup, base_size } => {
            let placed = build_executor(config, gateway)
                .sell(product, *markup, *base_size, &shutdown)
                .await?;
            cli::print_preview(&placed.preview);
            cli::print_order(&placed.order);
            Ok(())
        }
        Commands::Accounts { product, side } => {
            let accounts = AccountValidator::new(gateway)
                .validate(product, *side, &shutdown)
                .await?;
            cli::print_accounts(&accounts);
            Ok(())
        }
        Commands::Listen { product, order_ids } => {
            let mut listener = OrderUpdateListener::new(gateway, config.listener.dedupe_window);
            if order_ids.is_empty() {
                listener = listener.watching_all();
            }
            for id in order_ids {
                listener.watch(id).await;
            }
            let listener = Arc::new(listener);

            let mut updates = listener.subscribe();
            tokio::spawn(async move {
                loop {
                    match updates.recv().await {
                        Ok(update) => cli::print_update(&update),
                        Err(RecvError::Lagged(_)) => continue,
                        Err(RecvError::Closed) => break,
                    }
                }
            });

            let stats = listener
                .run(&[product.clone()], config.listener.channel, &shutdown)
                .await?;
            info!("Listener stats: {:?}", stats);
            Ok(())
        }
        Commands::Preview { .. } => Ok(()),
    }
}

fn report<T: serde::Serialize>(outcome: Outcome<T>) -> Result<()> {
    cli::print_outcome(&outcome);
    if outcome.is_ok() {
        Ok(())
    } else {
        Err(PairbotError::Other(anyhow!(outcome
            .message
            .unwrap_or_else(|| "operation failed".to_string()))))
    }
}
