use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::{Order, OrderSide, Outcome, Status, ValidatedAccounts};
use crate::services::OrderUpdate;
use crate::strategy::OrderPreview;

#[derive(Parser, Debug)]
#[command(name = "pairbot")]
#[command(version)]
#[command(about = "Coinbase buy-then-sell limit order bot", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Simulate order placement and cancels (reads still hit the exchange)
    #[arg(short, long, global = true)]
    pub dry_run: bool,

    /// Config file path (defaults to config/ plus PAIRBOT_* environment)
    #[arg(short, long, global = true, env = "PAIRBOT_CONFIG")]
    pub config: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Stack buys at a growing markdown until the paying balance runs out
    BuyLoop {
        /// Product id, e.g. BTC-USD
        #[arg(short, long)]
        product: String,
        /// Base size per buy (default from config)
        #[arg(long)]
        base_size: Option<Decimal>,
        /// Starting markdown percent (default from config)
        #[arg(long)]
        start_markdown: Option<Decimal>,
    },
    /// Buy below the bid, wait for the fill, sell above cost; repeat
    Monitor {
        #[arg(short, long)]
        product: String,
        /// Percent below the best bid to buy at
        #[arg(long)]
        buy_pct: Option<Decimal>,
        /// Percent above the filled value to sell at
        #[arg(long)]
        sell_pct: Option<Decimal>,
    },
    /// Place a single limit buy
    Buy {
        #[arg(short, long)]
        product: String,
        /// Percent below the reference price
        #[arg(long)]
        markdown: Decimal,
        #[arg(long)]
        base_size: Decimal,
    },
    /// Place a single limit sell above the best ask
    Sell {
        #[arg(short, long)]
        product: String,
        /// Percent above the best ask
        #[arg(long)]
        markup: Decimal,
        #[arg(long)]
        base_size: Decimal,
    },
    /// Preview cost and fee of a limit order without placing it
    Preview {
        #[arg(short, long)]
        product: String,
        #[arg(long, default_value = "buy")]
        side: OrderSide,
        #[arg(long)]
        base_size: Decimal,
        #[arg(long)]
        limit_price: Decimal,
        /// Price the fee at the taker rate
        #[arg(long)]
        taker: bool,
    },
    /// Show and check the accounts behind a product
    Accounts {
        #[arg(short, long)]
        product: String,
        #[arg(long, default_value = "buy")]
        side: OrderSide,
    },
    /// Stream order updates for a product
    Listen {
        #[arg(short, long)]
        product: String,
        /// Only report these orders (all orders when omitted)
        #[arg(long = "order-id")]
        order_ids: Vec<String>,
    },
}

impl Commands {
    pub fn product(&self) -> &str {
        match self {
            Commands::BuyLoop { product, .. }
            | Commands::Monitor { product, .. }
            | Commands::Buy { product, .. }
            | Commands::Sell { product, .. }
            | Commands::Preview { product, .. }
            | Commands::Accounts { product, .. }
            | Commands::Listen { product, .. } => product,
        }
    }

    /// Long-running commands get file logging
    pub fn is_long_running(&self) -> bool {
        matches!(
            self,
            Commands::BuyLoop { .. } | Commands::Monitor { .. } | Commands::Listen { .. }
        )
    }
}

pub fn print_preview(preview: &OrderPreview) {
    let mark = if preview.is_valid { "\x1b[32m✓" } else { "\x1b[31m✗" };
    println!("{} {} {} {}\x1b[0m", mark, preview.side, preview.base_size, preview.product_id);
    println!("  Limit price:      {}", preview.limit_price);
    println!("  Total price:      {}", preview.total_price);
    println!("  Fee:              {}", preview.fee);
    println!("  Total with fee:   {}", preview.total_price_with_fee);
    if let Some(message) = &preview.message {
        println!("  \x1b[33m{}\x1b[0m", message);
    }
}

pub fn print_accounts(accounts: &ValidatedAccounts) {
    println!("\x1b[32m✓ Accounts valid\x1b[0m");
    for (role, account) in [("Buying", &accounts.buying), ("Paying", &accounts.paying)] {
        println!(
            "  {:<7} {:<6} available: {:<20} hold: {}",
            role, account.currency, account.available_balance, account.hold
        );
    }
}

pub fn print_order(order: &Order) {
    println!(
        "\x1b[32m✓ {} {}\x1b[0m {} status={} size={} price={} hold={}",
        order.side,
        order.product_id,
        order.order_id,
        order.status,
        order.base_size.unwrap_or_default(),
        order.limit_price.unwrap_or_default(),
        order.outstanding_hold_amount
    );
}

pub fn print_update(update: &OrderUpdate) {
    println!(
        "[{}] {} {} filled={} avg={} value_after_fees={}",
        update.received_at.format("%H:%M:%S"),
        update.order_id,
        update.status,
        update.cumulative_quantity,
        update.avg_price.unwrap_or_default(),
        update.total_value_after_fees.unwrap_or_default()
    );
}

/// Print an operation report as JSON
pub fn print_outcome<T: Serialize>(outcome: &Outcome<T>) {
    let color = match outcome.status {
        Status::Error => "\x1b[31m",
        _ => "\x1b[32m",
    };
    match serde_json::to_string_pretty(outcome) {
        Ok(json) => println!("{}{:?}\x1b[0m\n{}", color, outcome.status, json),
        Err(e) => eprintln!("Failed to render report: {}", e),
    }
}
