use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::models::{Candle, ExchangePosition};

pub mod bybit;
pub mod paper;

pub use bybit::BybitGateway;
pub use paper::PaperGateway;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "Buy"),
            OrderSide::Sell => write!(f, "Sell"),
        }
    }
}

impl OrderSide {
    pub fn opposite(&self) -> OrderSide {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

/// Trigger direction for conditional orders: fire when the mark crosses the
/// trigger price from below (Rise) or from above (Fall).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerDirection {
    Rise,
    Fall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Open,
    Filled,
    Triggered,
    Cancelled,
    NotFound,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderStatus::Open => write!(f, "Open"),
            OrderStatus::Filled => write!(f, "Filled"),
            OrderStatus::Triggered => write!(f, "Triggered"),
            OrderStatus::Cancelled => write!(f, "Cancelled"),
            OrderStatus::NotFound => write!(f, "NotFound"),
        }
    }
}

/// An order the exchange reports as resting, as needed for rebuilding a
/// paired-order record during reconciliation.
#[derive(Debug, Clone)]
pub struct OpenOrder {
    pub order_id: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub price: Option<f64>,
    pub trigger_price: Option<f64>,
    pub reduce_only: bool,
}

impl OpenOrder {
    pub fn is_stop(&self) -> bool {
        self.trigger_price.is_some()
    }
}

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("API error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Order rejected: {0}")]
    OrderRejected(String),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Position already closed: {0}")]
    PositionAlreadyClosed(String),

    #[error("Leverage unchanged: {0}")]
    LeverageUnchanged(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),
}

impl ExchangeError {
    /// Failures that mean the requested state already holds; callers treat
    /// these as success.
    pub fn is_idempotent(&self) -> bool {
        matches!(
            self,
            ExchangeError::PositionAlreadyClosed(_) | ExchangeError::LeverageUnchanged(_)
        )
    }
}

/// Market-data and order primitives the decision core depends on. Transport
/// details live behind this seam.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    async fn get_candles(
        &self,
        symbol: &str,
        interval_minutes: u64,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError>;

    async fn get_ticker(&self, symbol: &str) -> Result<f64, ExchangeError>;

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
        reduce_only: bool,
    ) -> Result<String, ExchangeError>;

    async fn place_limit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
        price: f64,
        reduce_only: bool,
    ) -> Result<String, ExchangeError>;

    async fn place_stop_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
        trigger_price: f64,
        trigger_direction: TriggerDirection,
        reduce_only: bool,
    ) -> Result<String, ExchangeError>;

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), ExchangeError>;

    async fn get_order_status(
        &self,
        symbol: &str,
        order_id: &str,
    ) -> Result<OrderStatus, ExchangeError>;

    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>, ExchangeError>;

    async fn get_open_positions(&self) -> Result<Vec<ExchangePosition>, ExchangeError>;

    async fn set_leverage(&self, symbol: &str, leverage: f64) -> Result<(), ExchangeError>;
}
