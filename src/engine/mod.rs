// Cycle-driven decision loop: wake just after each wall-clock interval
// boundary, fetch market data concurrently, then decide and act strictly
// sequentially per symbol. A cycle always runs to completion; shutdown is
// only honored between cycles so no order sequence is cut in half.

use anyhow::Result;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use log::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::config::Config;
use crate::exchange::{ExchangeError, ExchangeGateway};
use crate::models::{Candle, ExitReason};
use crate::position::{PositionError, PositionManager};
use crate::risk::PositionSizer;
use crate::signals::FeaturePipeline;
use crate::strategy::{manage_position, ManagementAction, RuleSet, StrategyConfig};

pub struct TradingEngine {
    gateway: Arc<dyn ExchangeGateway>,
    manager: PositionManager,
    pipeline: FeaturePipeline,
    rules: RuleSet,
    strategy_config: StrategyConfig,
    config: Config,
    cycles_run: u64,
}

impl TradingEngine {
    pub fn new(gateway: Arc<dyn ExchangeGateway>, config: Config) -> Result<Self> {
        let sizer = PositionSizer::new(config.risk.clone(), &config.symbols);
        let manager = PositionManager::new(gateway.clone(), sizer, config.strategy.clone());
        let rules = RuleSet::by_name(&config.strategy.name, &config.strategy)?;

        Ok(Self {
            gateway,
            manager,
            pipeline: FeaturePipeline::default(),
            rules,
            strategy_config: config.strategy.clone(),
            config,
            cycles_run: 0,
        })
    }

    pub fn manager(&self) -> &PositionManager {
        &self.manager
    }

    /// Leverage init plus a first reconcile so positions opened while the
    /// bot was down are adopted before any decision is made.
    pub async fn startup(&mut self) {
        let symbols = self.config.symbol_names();
        self.manager.initialize_leverage(&symbols).await;
        if let Err(e) = self.manager.reconcile().await {
            error!("Startup reconcile failed: {}", e);
        }
    }

    pub async fn run(&mut self) -> Result<()> {
        self.startup().await;

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = shutdown_tx.send(true);
            }
        });

        info!(
            "Engine started | symbols: {:?} | interval: {}m | strategy: {}",
            self.config.symbol_names(),
            self.config.general.interval_minutes,
            self.rules.name
        );

        loop {
            let wait = self.time_until_next_cycle();
            debug!("Sleeping {:?} until next cycle boundary", wait);
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown_rx.changed() => {}
            }
            if *shutdown_rx.borrow() {
                info!("Shutdown signal received; stopping between cycles");
                break;
            }

            self.run_cycle().await;

            if *shutdown_rx.borrow() {
                info!("Shutdown signal received; stopping after cycle");
                break;
            }
        }
        Ok(())
    }

    // Next wall-clock multiple of the interval, plus a small buffer so the
    // exchange has sealed the candle we are about to fetch.
    fn time_until_next_cycle(&self) -> Duration {
        let interval = (self.config.general.interval_minutes * 60) as i64;
        let buffer = self.config.general.cycle_buffer_secs as i64;
        let now = Utc::now().timestamp();
        let next = (now / interval + 1) * interval + buffer;
        Duration::from_secs((next - now).max(1) as u64)
    }

    /// One full decision pass. Every per-symbol failure is contained so the
    /// remaining symbols still get their decision step.
    pub async fn run_cycle(&mut self) {
        self.cycles_run += 1;
        debug!("Cycle {} starting", self.cycles_run);

        self.manager.monitor_paired_orders().await;

        if self.cycles_run % self.config.general.reconcile_every == 0 {
            if let Err(e) = self.manager.reconcile().await {
                error!("Reconcile failed: {}", e);
            }
        }

        let batch = self.fetch_all_candles().await;

        // Decision and action are strictly sequential per symbol.
        for symbol in self.config.symbol_names() {
            match batch.get(&symbol) {
                Some(Ok(candles)) => self.process_symbol(&symbol, candles).await,
                Some(Err(e)) => warn!("{}: candle fetch failed: {}", symbol, e),
                None => warn!("{}: missing from candle batch", symbol),
            }
        }

        debug!("Cycle {} complete", self.cycles_run);
    }

    // Concurrent fetch stage: independent network calls, bounded by
    // fetch_concurrency. Never touches the position table.
    async fn fetch_all_candles(&self) -> HashMap<String, Result<Vec<Candle>, ExchangeError>> {
        let interval = self.config.general.interval_minutes;
        let limit = self.config.general.candle_limit;
        let gateway = self.gateway.clone();

        stream::iter(self.config.symbol_names())
            .map(|symbol| {
                let gateway = gateway.clone();
                async move {
                    let result = gateway.get_candles(&symbol, interval, limit).await;
                    (symbol, result)
                }
            })
            .buffer_unordered(self.config.general.fetch_concurrency.max(1))
            .collect()
            .await
    }

    async fn process_symbol(&mut self, symbol: &str, candles: &[Candle]) {
        let row = match self.pipeline.compute_row(symbol, candles) {
            Ok(row) => row,
            Err(e) => {
                // Insufficient history skips the symbol for this cycle.
                info!("{}", e);
                return;
            }
        };

        let Some(symbol_cfg) = self.config.symbol(symbol) else {
            return;
        };
        let signal = self.rules.evaluate(&row, symbol_cfg);
        if let Some(direction) = signal {
            debug!("{}: {} signal (pct_atr {:.3})", symbol, direction, row.pct_atr);
        }

        if let Some(position) = self.manager.get(symbol).cloned() {
            let live_price = match self.gateway.get_ticker(symbol).await {
                Ok(price) => price,
                Err(e) => {
                    warn!("{}: ticker unavailable ({}); using last close", symbol, e);
                    row.close
                }
            };

            let action =
                manage_position(&position, signal, live_price, row.pct_atr, &self.strategy_config);
            match action {
                ManagementAction::ReverseSignal(direction) => {
                    info!("{}: reverse signal {} -> {}", symbol, position.direction, direction);
                    match self.manager.close(symbol, ExitReason::ReverseSignal).await {
                        Ok(true) => {
                            self.try_open(symbol, direction, row.close, row.pct_atr).await;
                        }
                        Ok(false) => warn!("{}: close before reverse failed; not reopening", symbol),
                        Err(e) => error!("{}: close before reverse errored: {}", symbol, e),
                    }
                }
                ManagementAction::UpdateLevels { take_profit, stop_loss } => {
                    if let Err(e) = self.manager.update_levels(symbol, take_profit, stop_loss).await
                    {
                        error!("{}: level update errored: {}", symbol, e);
                    }
                }
                ManagementAction::CloseOnTarget(reason) => {
                    if let Err(e) = self.manager.close(symbol, reason).await {
                        error!("{}: close on target errored: {}", symbol, e);
                    }
                }
                ManagementAction::NoAction => {}
            }
        } else if let Some(direction) = signal {
            self.try_open(symbol, direction, row.close, row.pct_atr).await;
        }
    }

    async fn try_open(&mut self, symbol: &str, direction: crate::models::Direction, entry: f64, pct_atr: f64) {
        match self.manager.open(symbol, direction, entry, pct_atr).await {
            Ok(position) => debug!("{}: position {} opened", symbol, position.id),
            Err(PositionError::PairedOrderFailed(e)) => {
                error!("{}: opened without protection and closed again: {}", symbol, e);
            }
            Err(e) => warn!("{}: open failed: {}", symbol, e),
        }
    }
}
