pub mod config;
pub mod engine;
pub mod exchange;
pub mod indicators;
pub mod models;
pub mod position;
pub mod risk;
pub mod signals;
pub mod strategy;

// Re-export commonly used types
pub use crate::config::{Config, GeneralConfig, RiskConfig, SymbolConfig};
pub use crate::engine::TradingEngine;
pub use crate::exchange::{ExchangeGateway, ExchangeError, OrderSide, OrderStatus, TriggerDirection};
pub use crate::models::{Candle, Direction, FeatureRow, Pivot, PivotKind, Position};
pub use crate::position::{PositionManager, PositionError};
pub use crate::risk::PositionSizer;
pub use crate::signals::{FeaturePipeline, FeatureError};
pub use crate::strategy::{ManagementAction, RuleSet, StrategyConfig};

use log::info;
use tracing_subscriber::{fmt, EnvFilter};

pub fn setup_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,pivot_trader=debug"));

    fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!("Logging initialized");
}
