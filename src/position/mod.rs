// Position lifecycle: open with paired protection, update, close, and keep
// the local table reconverged with what the exchange actually holds.
//
// The active-positions table is owned exclusively by this manager; nothing
// else in the process mutates it.

use chrono::Utc;
use log::*;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::exchange::{ExchangeError, ExchangeGateway, OrderSide, OrderStatus, TriggerDirection};
use crate::models::{Direction, ExitReason, PairedOrders, Position};
use crate::risk::{PositionSizer, SizingError};
use crate::strategy::{calculate_levels, StrategyConfig};

/// Relative quantity tolerance when matching exchange state to local state.
const QTY_TOLERANCE: f64 = 0.01;

#[derive(Debug, Error)]
pub enum PositionError {
    #[error(transparent)]
    Sizing(#[from] SizingError),

    #[error("entry order rejected: {0}")]
    OrderRejected(ExchangeError),

    /// A position was opened but could not be protected; it has been
    /// closed again.
    #[error("paired order failed: {0}")]
    PairedOrderFailed(ExchangeError),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),
}

pub struct PositionManager {
    gateway: Arc<dyn ExchangeGateway>,
    positions: HashMap<String, Position>,
    sizer: PositionSizer,
    strategy_config: StrategyConfig,
}

fn entry_side(direction: Direction) -> OrderSide {
    match direction {
        Direction::Long => OrderSide::Buy,
        Direction::Short => OrderSide::Sell,
    }
}

fn close_side(direction: Direction) -> OrderSide {
    entry_side(direction).opposite()
}

fn within_tolerance(a: f64, b: f64) -> bool {
    if b == 0.0 {
        return a == 0.0;
    }
    ((a - b) / b).abs() <= QTY_TOLERANCE
}

impl PositionManager {
    pub fn new(
        gateway: Arc<dyn ExchangeGateway>,
        sizer: PositionSizer,
        strategy_config: StrategyConfig,
    ) -> Self {
        Self {
            gateway,
            positions: HashMap::new(),
            sizer,
            strategy_config,
        }
    }

    pub fn has_position(&self, symbol: &str) -> bool {
        self.positions.contains_key(symbol)
    }

    pub fn get(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn open_positions(&self) -> Vec<&Position> {
        self.positions.values().collect()
    }

    /// Open a position and protect it with a reduce-only TP/SL pair. Either
    /// both paired orders go on the book or the position is closed again.
    pub async fn open(
        &mut self,
        symbol: &str,
        direction: Direction,
        entry_price: f64,
        pct_atr: f64,
    ) -> Result<Position, PositionError> {
        let quantity = self.sizer.size(symbol, entry_price)?;

        let entry_order_id = self
            .gateway
            .place_market_order(symbol, entry_side(direction), quantity, false)
            .await
            .map_err(PositionError::OrderRejected)?;

        let (take_profit, stop_loss) =
            calculate_levels(entry_price, pct_atr, direction, &self.strategy_config);

        let paired = match self
            .place_paired_orders(symbol, direction, quantity, take_profit, stop_loss)
            .await
        {
            Ok(paired) => paired,
            Err(e) => {
                error!(
                    "{}: paired orders failed ({}); closing naked position",
                    symbol, e
                );
                self.emergency_close(symbol, direction, quantity).await;
                return Err(PositionError::PairedOrderFailed(e));
            }
        };

        let position = Position {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            direction,
            entry_price,
            quantity,
            opened_at: Utc::now(),
            take_profit,
            stop_loss,
            entry_order_id: Some(entry_order_id),
            paired: Some(paired),
        };

        info!(
            "{}: opened {} {} @ {} (TP {}, SL {})",
            symbol, direction, quantity, entry_price, take_profit, stop_loss
        );
        self.positions.insert(symbol.to_string(), position.clone());
        Ok(position)
    }

    async fn place_paired_orders(
        &self,
        symbol: &str,
        direction: Direction,
        quantity: f64,
        take_profit: f64,
        stop_loss: f64,
    ) -> Result<PairedOrders, ExchangeError> {
        let side = close_side(direction);
        // A long is stopped out when price falls to the trigger, a short
        // when it rises.
        let trigger_direction = match direction {
            Direction::Long => TriggerDirection::Fall,
            Direction::Short => TriggerDirection::Rise,
        };

        let tp_order_id = self
            .gateway
            .place_limit_order(symbol, side, quantity, take_profit, true)
            .await?;

        let sl_order_id = match self
            .gateway
            .place_stop_order(symbol, side, quantity, stop_loss, trigger_direction, true)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                // Half a pair is worse than none; pull the TP before bailing.
                self.cancel_tolerant(symbol, &tp_order_id).await;
                return Err(e);
            }
        };

        Ok(PairedOrders { tp_order_id, sl_order_id, active: true })
    }

    async fn emergency_close(&self, symbol: &str, direction: Direction, quantity: f64) {
        match self
            .gateway
            .place_market_order(symbol, close_side(direction), quantity, true)
            .await
        {
            Ok(_) => info!("{}: emergency close done", symbol),
            Err(e) if e.is_idempotent() => info!("{}: emergency close unnecessary", symbol),
            Err(e) => error!("{}: emergency close failed: {}", symbol, e),
        }
    }

    async fn cancel_tolerant(&self, symbol: &str, order_id: &str) {
        if let Err(e) = self.gateway.cancel_order(symbol, order_id).await {
            // Filled or already-gone orders are expected here.
            debug!("{}: cancel of {} tolerated failure: {}", symbol, order_id, e);
        }
    }

    /// Replace the paired orders with new TP/SL levels. Returns false (and
    /// deactivates the pair) when the replacement could not be placed.
    pub async fn update_levels(
        &mut self,
        symbol: &str,
        new_tp: f64,
        new_sl: f64,
    ) -> Result<bool, PositionError> {
        let Some(position) = self.positions.get(symbol).cloned() else {
            return Ok(false);
        };

        if let Some(paired) = &position.paired {
            self.cancel_tolerant(symbol, &paired.tp_order_id).await;
            self.cancel_tolerant(symbol, &paired.sl_order_id).await;
        }

        let replacement = self
            .place_paired_orders(symbol, position.direction, position.quantity, new_tp, new_sl)
            .await;
        let Some(cached) = self.positions.get_mut(symbol) else {
            return Ok(false);
        };
        match replacement {
            Ok(paired) => {
                cached.take_profit = new_tp;
                cached.stop_loss = new_sl;
                cached.paired = Some(paired);
                info!("{}: levels updated (TP {}, SL {})", symbol, new_tp, new_sl);
                Ok(true)
            }
            Err(e) => {
                error!("{}: failed to replace paired orders: {}", symbol, e);
                cached.paired = None;
                Ok(false)
            }
        }
    }

    /// Close the cached position with a reduce-only market order. A
    /// position the exchange already reports as zero counts as success, so
    /// repeated closes are harmless.
    pub async fn close(&mut self, symbol: &str, reason: ExitReason) -> Result<bool, PositionError> {
        let Some(position) = self.positions.get(symbol).cloned() else {
            debug!("{}: close requested but no cached position", symbol);
            return Ok(true);
        };

        if let Some(paired) = position.paired.as_ref().filter(|p| p.active) {
            self.cancel_tolerant(symbol, &paired.tp_order_id).await;
            self.cancel_tolerant(symbol, &paired.sl_order_id).await;
        }

        match self
            .gateway
            .place_market_order(symbol, close_side(position.direction), position.quantity, true)
            .await
        {
            Ok(_) => {
                info!("{}: position closed ({})", symbol, reason);
                self.positions.remove(symbol);
                Ok(true)
            }
            Err(e) if e.is_idempotent() => {
                info!("{}: position already closed on exchange ({})", symbol, reason);
                self.positions.remove(symbol);
                Ok(true)
            }
            Err(e) => {
                error!("{}: close failed: {}", symbol, e);
                Ok(false)
            }
        }
    }

    /// Emulated OCO: when one side of a pair has executed, cancel the other
    /// and drop the position the fill closed.
    pub async fn monitor_paired_orders(&mut self) {
        let watched: Vec<(String, PairedOrders)> = self
            .positions
            .iter()
            .filter_map(|(symbol, p)| {
                p.paired
                    .as_ref()
                    .filter(|pair| pair.active)
                    .map(|pair| (symbol.clone(), pair.clone()))
            })
            .collect();

        for (symbol, pair) in watched {
            let tp_status = match self.gateway.get_order_status(&symbol, &pair.tp_order_id).await {
                Ok(status) => status,
                Err(e) => {
                    warn!("{}: TP status check failed: {}", symbol, e);
                    continue;
                }
            };
            let sl_status = match self.gateway.get_order_status(&symbol, &pair.sl_order_id).await {
                Ok(status) => status,
                Err(e) => {
                    warn!("{}: SL status check failed: {}", symbol, e);
                    continue;
                }
            };

            if tp_status == OrderStatus::Filled {
                info!("{}: take profit filled; cancelling stop loss", symbol);
                self.cancel_tolerant(&symbol, &pair.sl_order_id).await;
                self.positions.remove(&symbol);
            } else if sl_status == OrderStatus::Filled || sl_status == OrderStatus::Triggered {
                info!("{}: stop loss executed; cancelling take profit", symbol);
                self.cancel_tolerant(&symbol, &pair.tp_order_id).await;
                self.positions.remove(&symbol);
            } else if matches!(tp_status, OrderStatus::NotFound | OrderStatus::Cancelled)
                || matches!(sl_status, OrderStatus::NotFound | OrderStatus::Cancelled)
            {
                warn!(
                    "{}: paired order record stale (TP {}, SL {}); deactivating pair",
                    symbol, tp_status, sl_status
                );
                if let Some(position) = self.positions.get_mut(&symbol) {
                    if let Some(pair) = position.paired.as_mut() {
                        pair.active = false;
                    }
                }
            }
        }
    }

    /// Reconverge the local table with the exchange's authoritative view:
    /// drop what the exchange closed, adopt what it reports that we never
    /// recorded, and rebuild adopted paired-order records from the open
    /// orders on the book.
    pub async fn reconcile(&mut self) -> Result<(), ExchangeError> {
        let snapshot = self.gateway.get_open_positions().await?;
        let by_symbol: HashMap<String, _> = snapshot
            .into_iter()
            .map(|p| (p.symbol.clone(), p))
            .collect();

        let cached: Vec<String> = self.positions.keys().cloned().collect();
        for symbol in cached {
            let Some(exchange_pos) = by_symbol.get(&symbol) else {
                info!("{}: exchange reports no position; dropping local record", symbol);
                self.positions.remove(&symbol);
                continue;
            };
            if let Some(local) = self.positions.get_mut(&symbol) {
                if !within_tolerance(local.quantity, exchange_pos.quantity) {
                    warn!(
                        "{}: reconciliation mismatch (local qty {}, exchange {}); adopting exchange value",
                        symbol, local.quantity, exchange_pos.quantity
                    );
                    local.quantity = exchange_pos.quantity;
                }
            }
        }

        for (symbol, exchange_pos) in by_symbol {
            if self.positions.contains_key(&symbol) {
                continue;
            }
            let paired = self.rebuild_paired_orders(&symbol, &exchange_pos).await;
            info!(
                "{}: adopting exchange position {} {} @ {} (pair {})",
                symbol,
                exchange_pos.direction,
                exchange_pos.quantity,
                exchange_pos.entry_price,
                if paired.is_some() { "rebuilt" } else { "not found" }
            );
            let (take_profit, stop_loss) = match &paired {
                Some((pair_levels, _)) => *pair_levels,
                None => (f64::NAN, f64::NAN),
            };
            self.positions.insert(
                symbol.clone(),
                Position {
                    id: uuid::Uuid::new_v4().to_string(),
                    symbol: symbol.clone(),
                    direction: exchange_pos.direction,
                    entry_price: exchange_pos.entry_price,
                    quantity: exchange_pos.quantity,
                    opened_at: Utc::now(),
                    take_profit,
                    stop_loss,
                    entry_order_id: None,
                    paired: paired.map(|(_, pair)| pair),
                },
            );
        }

        Ok(())
    }

    // Scan the symbol's resting orders for a reduce-only closing-side
    // limit/stop pair whose quantity matches the position within tolerance.
    async fn rebuild_paired_orders(
        &self,
        symbol: &str,
        exchange_pos: &crate::models::ExchangePosition,
    ) -> Option<((f64, f64), PairedOrders)> {
        let orders = match self.gateway.get_open_orders(symbol).await {
            Ok(orders) => orders,
            Err(e) => {
                warn!("{}: open-order scan failed during reconcile: {}", symbol, e);
                return None;
            }
        };

        let expected_side = close_side(exchange_pos.direction);
        let mut tp: Option<(String, f64)> = None;
        let mut sl: Option<(String, f64)> = None;
        for order in orders {
            if order.side != expected_side
                || !order.reduce_only
                || !within_tolerance(order.quantity, exchange_pos.quantity)
            {
                continue;
            }
            if order.is_stop() {
                if sl.is_none() {
                    sl = order.trigger_price.map(|p| (order.order_id.clone(), p));
                }
            } else if tp.is_none() {
                tp = order.price.map(|p| (order.order_id.clone(), p));
            }
        }

        let (tp_order_id, take_profit) = tp?;
        let (sl_order_id, stop_loss) = sl?;
        Some((
            (take_profit, stop_loss),
            PairedOrders { tp_order_id, sl_order_id, active: true },
        ))
    }

    /// Set leverage on every configured symbol; "leverage not modified" is
    /// already treated as success by the gateway error taxonomy.
    pub async fn initialize_leverage(&self, symbols: &[String]) {
        for symbol in symbols {
            match self.gateway.set_leverage(symbol, self.sizer.leverage()).await {
                Ok(()) => debug!("{}: leverage set to {}x", symbol, self.sizer.leverage()),
                Err(e) if e.is_idempotent() => {}
                Err(e) => warn!("{}: failed to set leverage: {}", symbol, e),
            }
        }
    }
}
