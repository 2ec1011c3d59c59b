// src/bin/trader.rs
use anyhow::Result;
use clap::{Parser, Subcommand};
use log::*;
use pivot_trader::{
    config::{Config, Credentials},
    exchange::{BybitGateway, ExchangeGateway, PaperGateway},
    setup_logging,
    signals::FeaturePipeline,
    strategy::RuleSet,
    TradingEngine,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the decision loop
    Trade {
        /// Path to configuration file
        #[clap(short, long, default_value = "config/trader.toml")]
        config: PathBuf,

        /// Symbols to trade (comma separated, overrides the config file)
        #[clap(short, long)]
        symbols: Option<String>,

        /// Route orders to the in-memory paper gateway instead of Bybit
        #[clap(long)]
        dry_run: bool,
    },

    /// Fetch candles once and print the current signal per symbol
    Check {
        /// Path to configuration file
        #[clap(short, long, default_value = "config/trader.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging();

    match args.command {
        Commands::Trade { config, symbols, dry_run } => trade(config, symbols, dry_run).await,
        Commands::Check { config } => check(config).await,
    }
}

fn build_gateway(config: &Config, dry_run: bool) -> Result<Arc<dyn ExchangeGateway>> {
    if dry_run {
        info!("Dry-run mode: orders go to the paper gateway");
        return Ok(Arc::new(PaperGateway::new()));
    }
    let credentials = Credentials::from_env()?;
    Ok(Arc::new(BybitGateway::new(config.exchange.clone(), credentials)?))
}

async fn trade(config_path: PathBuf, symbols: Option<String>, dry_run: bool) -> Result<()> {
    let mut config = Config::load(&config_path)?;

    if let Some(list) = symbols {
        let selected: Vec<String> =
            list.split(',').map(|s| s.trim().to_uppercase()).collect();
        config.symbols.retain(|name, _| selected.contains(name));
        config.validate()?;
    }

    let gateway = build_gateway(&config, dry_run)?;
    let mut engine = TradingEngine::new(gateway, config)?;
    engine.run().await
}

async fn check(config_path: PathBuf) -> Result<()> {
    let config = Config::load(&config_path)?;
    let gateway = build_gateway(&config, false)?;
    let pipeline = FeaturePipeline::default();
    let rules = RuleSet::by_name(&config.strategy.name, &config.strategy)?;

    for symbol in config.symbol_names() {
        let candles = match gateway
            .get_candles(&symbol, config.general.interval_minutes, config.general.candle_limit)
            .await
        {
            Ok(candles) => candles,
            Err(e) => {
                warn!("{}: candle fetch failed: {}", symbol, e);
                continue;
            }
        };

        match pipeline.compute_row(&symbol, &candles) {
            Ok(row) => {
                let symbol_cfg = config.symbol(&symbol).expect("validated symbol");
                let signal = rules
                    .evaluate(&row, symbol_cfg)
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "none".to_string());
                info!(
                    "{}: close {} | rsi {:.1} | adx {:.1} | pct_atr {:.3} | signal {}",
                    symbol, row.close, row.rsi, row.adx, row.pct_atr, signal
                );
            }
            Err(e) => info!("{}", e),
        }
    }
    Ok(())
}
