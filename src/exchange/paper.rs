// Simulated exchange used by --dry-run and the integration tests. Market
// orders fill instantly against the seeded price; limit and stop orders rest
// until a test hook fills them.

use super::{
    ExchangeError, ExchangeGateway, OpenOrder, OrderSide, OrderStatus, TriggerDirection,
};
use crate::models::{Candle, Direction, ExchangePosition};
use async_trait::async_trait;
use log::debug;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct PaperOrder {
    symbol: String,
    side: OrderSide,
    quantity: f64,
    price: Option<f64>,
    trigger_price: Option<f64>,
    reduce_only: bool,
    status: OrderStatus,
}

#[derive(Debug, Default)]
struct PaperState {
    prices: HashMap<String, f64>,
    candles: HashMap<String, Vec<Candle>>,
    positions: HashMap<String, ExchangePosition>,
    orders: HashMap<String, PaperOrder>,
    next_id: u64,
    market_orders_placed: u64,
    fail_limit_orders: bool,
    fail_stop_orders: bool,
}

impl PaperState {
    fn next_order_id(&mut self) -> String {
        self.next_id += 1;
        format!("paper-{}", self.next_id)
    }

    fn apply_fill(&mut self, symbol: &str, side: OrderSide, quantity: f64, reduce_only: bool) {
        if reduce_only {
            if let Some(position) = self.positions.get_mut(symbol) {
                position.quantity -= quantity.min(position.quantity);
                if position.quantity <= 0.0 {
                    self.positions.remove(symbol);
                }
            }
            return;
        }

        let direction = match side {
            OrderSide::Buy => Direction::Long,
            OrderSide::Sell => Direction::Short,
        };
        let entry_price = self.prices.get(symbol).copied().unwrap_or(f64::NAN);
        self.positions.insert(
            symbol.to_string(),
            ExchangePosition {
                symbol: symbol.to_string(),
                direction,
                quantity,
                entry_price,
            },
        );
    }
}

#[derive(Clone, Default)]
pub struct PaperGateway {
    state: Arc<Mutex<PaperState>>,
}

impl PaperGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_price(&self, symbol: &str, price: f64) {
        self.state.lock().await.prices.insert(symbol.to_string(), price);
    }

    pub async fn seed_candles(&self, symbol: &str, candles: Vec<Candle>) {
        let mut state = self.state.lock().await;
        if let Some(last) = candles.last() {
            state.prices.insert(symbol.to_string(), last.close);
        }
        state.candles.insert(symbol.to_string(), candles);
    }

    /// Seed an exchange-side position the local manager knows nothing
    /// about, as manual intervention would.
    pub async fn seed_position(&self, position: ExchangePosition) {
        let mut state = self.state.lock().await;
        state.positions.insert(position.symbol.clone(), position);
    }

    pub async fn seed_resting_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
        price: Option<f64>,
        trigger_price: Option<f64>,
        reduce_only: bool,
    ) -> String {
        let mut state = self.state.lock().await;
        let id = state.next_order_id();
        state.orders.insert(
            id.clone(),
            PaperOrder {
                symbol: symbol.to_string(),
                side,
                quantity,
                price,
                trigger_price,
                reduce_only,
                status: OrderStatus::Open,
            },
        );
        id
    }

    /// Fill a resting order and apply its position effect, as the exchange
    /// would when the market trades through it.
    pub async fn mark_order_filled(&self, order_id: &str) {
        let mut state = self.state.lock().await;
        let Some(order) = state.orders.get(order_id).cloned() else {
            return;
        };
        if let Some(entry) = state.orders.get_mut(order_id) {
            entry.status = OrderStatus::Filled;
        }
        state.apply_fill(&order.symbol, order.side, order.quantity, order.reduce_only);
    }

    pub async fn fail_limit_orders(&self, fail: bool) {
        self.state.lock().await.fail_limit_orders = fail;
    }

    pub async fn fail_stop_orders(&self, fail: bool) {
        self.state.lock().await.fail_stop_orders = fail;
    }

    pub async fn market_orders_placed(&self) -> u64 {
        self.state.lock().await.market_orders_placed
    }

    pub async fn order_status_raw(&self, order_id: &str) -> Option<OrderStatus> {
        self.state.lock().await.orders.get(order_id).map(|o| o.status)
    }

    pub async fn position(&self, symbol: &str) -> Option<ExchangePosition> {
        self.state.lock().await.positions.get(symbol).cloned()
    }
}

#[async_trait]
impl ExchangeGateway for PaperGateway {
    async fn get_candles(
        &self,
        symbol: &str,
        _interval_minutes: u64,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let state = self.state.lock().await;
        let candles = state
            .candles
            .get(symbol)
            .ok_or_else(|| ExchangeError::Api {
                code: -1,
                message: format!("no candles seeded for {}", symbol),
            })?;
        let start = candles.len().saturating_sub(limit);
        Ok(candles[start..].to_vec())
    }

    async fn get_ticker(&self, symbol: &str) -> Result<f64, ExchangeError> {
        self.state
            .lock()
            .await
            .prices
            .get(symbol)
            .copied()
            .ok_or_else(|| ExchangeError::Api {
                code: -1,
                message: format!("no price seeded for {}", symbol),
            })
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
        reduce_only: bool,
    ) -> Result<String, ExchangeError> {
        let mut state = self.state.lock().await;

        if reduce_only && !state.positions.contains_key(symbol) {
            return Err(ExchangeError::PositionAlreadyClosed(format!(
                "{}: current position is zero",
                symbol
            )));
        }

        state.market_orders_placed += 1;
        let id = state.next_order_id();
        state.orders.insert(
            id.clone(),
            PaperOrder {
                symbol: symbol.to_string(),
                side,
                quantity,
                price: None,
                trigger_price: None,
                reduce_only,
                status: OrderStatus::Filled,
            },
        );
        state.apply_fill(symbol, side, quantity, reduce_only);
        debug!("paper: market {} {} {} filled as {}", symbol, side, quantity, id);
        Ok(id)
    }

    async fn place_limit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
        price: f64,
        reduce_only: bool,
    ) -> Result<String, ExchangeError> {
        let mut state = self.state.lock().await;
        if state.fail_limit_orders {
            return Err(ExchangeError::OrderRejected("limit orders disabled".to_string()));
        }
        let id = state.next_order_id();
        state.orders.insert(
            id.clone(),
            PaperOrder {
                symbol: symbol.to_string(),
                side,
                quantity,
                price: Some(price),
                trigger_price: None,
                reduce_only,
                status: OrderStatus::Open,
            },
        );
        Ok(id)
    }

    async fn place_stop_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
        trigger_price: f64,
        _trigger_direction: TriggerDirection,
        reduce_only: bool,
    ) -> Result<String, ExchangeError> {
        let mut state = self.state.lock().await;
        if state.fail_stop_orders {
            return Err(ExchangeError::OrderRejected("stop orders disabled".to_string()));
        }
        let id = state.next_order_id();
        state.orders.insert(
            id.clone(),
            PaperOrder {
                symbol: symbol.to_string(),
                side,
                quantity,
                price: None,
                trigger_price: Some(trigger_price),
                reduce_only,
                status: OrderStatus::Open,
            },
        );
        Ok(id)
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), ExchangeError> {
        let mut state = self.state.lock().await;
        match state.orders.get_mut(order_id) {
            Some(order) if order.symbol == symbol && order.status == OrderStatus::Open => {
                order.status = OrderStatus::Cancelled;
                Ok(())
            }
            Some(_) => Err(ExchangeError::OrderNotFound(format!(
                "{} not open any more",
                order_id
            ))),
            None => Err(ExchangeError::OrderNotFound(order_id.to_string())),
        }
    }

    async fn get_order_status(
        &self,
        _symbol: &str,
        order_id: &str,
    ) -> Result<OrderStatus, ExchangeError> {
        let state = self.state.lock().await;
        Ok(state
            .orders
            .get(order_id)
            .map(|o| o.status)
            .unwrap_or(OrderStatus::NotFound))
    }

    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>, ExchangeError> {
        let state = self.state.lock().await;
        Ok(state
            .orders
            .iter()
            .filter(|(_, o)| o.symbol == symbol && o.status == OrderStatus::Open)
            .map(|(id, o)| OpenOrder {
                order_id: id.clone(),
                side: o.side,
                quantity: o.quantity,
                price: o.price,
                trigger_price: o.trigger_price,
                reduce_only: o.reduce_only,
            })
            .collect())
    }

    async fn get_open_positions(&self) -> Result<Vec<ExchangePosition>, ExchangeError> {
        let state = self.state.lock().await;
        Ok(state.positions.values().cloned().collect())
    }

    async fn set_leverage(&self, symbol: &str, leverage: f64) -> Result<(), ExchangeError> {
        debug!("paper: leverage {}x on {}", leverage, symbol);
        Ok(())
    }
}
