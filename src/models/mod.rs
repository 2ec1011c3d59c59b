// src/models/mod.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trend {
    Uptrend,
    Downtrend,
}

/// RSI bucketed into the classic 30/50/70 zones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RsiZone {
    Oversold,
    BelowAvg,
    AboveAvg,
    Overbought,
}

impl RsiZone {
    pub fn from_value(rsi: f64) -> Option<RsiZone> {
        if rsi.is_nan() {
            return None;
        }
        Some(if rsi <= 30.0 {
            RsiZone::Oversold
        } else if rsi <= 50.0 {
            RsiZone::BelowAvg
        } else if rsi <= 70.0 {
            RsiZone::AboveAvg
        } else {
            RsiZone::Overbought
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandleClass {
    WeakBullish,
    MediumBullish,
    StrongBullish,
    WeakBearish,
    MediumBearish,
    StrongBearish,
}

impl CandleClass {
    pub fn is_bullish(&self) -> bool {
        matches!(
            self,
            CandleClass::WeakBullish | CandleClass::MediumBullish | CandleClass::StrongBullish
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PivotKind {
    High,
    Low,
}

/// A confirmed swing extremum. Never revised after confirmation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pivot {
    pub index: usize,
    pub price: f64,
    /// ATR observed at the extreme bar, not at confirmation time.
    pub atr_at_pivot: f64,
    pub confirmed_at_index: usize,
    pub kind: PivotKind,
}

impl Pivot {
    /// Confirmation lag in bars.
    pub fn bars_ago(&self) -> usize {
        self.confirmed_at_index - self.index
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructureLabel {
    HigherHigh,
    LowerHigh,
    HigherLow,
    LowerLow,
}

/// Pivot columns for one zigzag multiple, forward-filled to the latest bar.
#[derive(Debug, Clone)]
pub struct PivotFeatures {
    pub high_confirmed: bool,
    pub low_confirmed: bool,
    pub last_high: f64,
    pub last_low: f64,
    pub bars_since_high: Option<usize>,
    pub bars_since_low: Option<usize>,
    pub high_structure: Option<StructureLabel>,
    pub low_structure: Option<StructureLabel>,
}

impl PivotFeatures {
    pub fn empty() -> Self {
        Self {
            high_confirmed: false,
            low_confirmed: false,
            last_high: f64::NAN,
            last_low: f64::NAN,
            bars_since_high: None,
            bars_since_low: None,
            high_structure: None,
            low_structure: None,
        }
    }
}

/// Derived indicator values for the most recent candle of one symbol.
///
/// Numeric fields that could not be computed are NaN; every rule predicate
/// over a NaN value evaluates false.
#[derive(Debug, Clone)]
pub struct FeatureRow {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,

    pub atr: f64,
    pub pct_atr: f64,
    pub rsi: f64,
    pub rsi_zone: Option<RsiZone>,
    pub adx: f64,

    pub sma_13: f64,
    pub sma_20: f64,
    pub sma_50: f64,
    pub sma_200: f64,
    pub trend_13_50: Option<Trend>,
    pub trend_50_200: Option<Trend>,
    pub supertrend: Option<Trend>,

    pub bb_middle: f64,
    pub bb_upper: f64,
    pub bb_lower: f64,

    pub dc_upper_20: f64,
    pub dc_lower_20: f64,
    pub dc_position_ratio_20: f64,
    pub dc_upper_50: f64,
    pub dc_lower_50: f64,
    pub dc_position_ratio_50: f64,

    pub nw: f64,
    pub nw_upper: f64,
    pub nw_lower: f64,

    pub candle_class: Option<CandleClass>,

    pub dc_breakout_50: bool,
    pub dc_breakdown_50: bool,
    pub dc_breakout_clean_50: bool,
    pub dc_breakdown_clean_50: bool,
    pub bb_touch_long: bool,
    pub bb_touch_short: bool,
    pub bb_touch_long_clean: bool,
    pub bb_touch_short_clean: bool,

    pub pivots_2x: PivotFeatures,
    pub pivots_3x: PivotFeatures,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    ReverseSignal,
    Manual,
    Reconciled,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::TakeProfit => write!(f, "TAKE_PROFIT"),
            ExitReason::StopLoss => write!(f, "STOP_LOSS"),
            ExitReason::ReverseSignal => write!(f, "REVERSE_SIGNAL"),
            ExitReason::Manual => write!(f, "MANUAL_CLOSE"),
            ExitReason::Reconciled => write!(f, "RECONCILED"),
        }
    }
}

/// Take-profit / stop-loss order pair tracked for OCO emulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairedOrders {
    pub tp_order_id: String,
    pub sl_order_id: String,
    pub active: bool,
}

#[derive(Debug, Clone)]
pub struct Position {
    pub id: String,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub quantity: f64,
    pub opened_at: DateTime<Utc>,
    pub take_profit: f64,
    pub stop_loss: f64,
    pub entry_order_id: Option<String>,
    pub paired: Option<PairedOrders>,
}

impl Position {
    pub fn paired_order_active(&self) -> bool {
        self.paired.as_ref().map(|p| p.active).unwrap_or(false)
    }

    pub fn current_pnl(&self, current_price: f64) -> f64 {
        match self.direction {
            Direction::Long => (current_price - self.entry_price) * self.quantity,
            Direction::Short => (self.entry_price - current_price) * self.quantity,
        }
    }

    /// Direction-aware TP/SL crossing test against a live price.
    pub fn target_hit(&self, current_price: f64) -> Option<ExitReason> {
        match self.direction {
            Direction::Long => {
                if current_price >= self.take_profit {
                    Some(ExitReason::TakeProfit)
                } else if current_price <= self.stop_loss {
                    Some(ExitReason::StopLoss)
                } else {
                    None
                }
            }
            Direction::Short => {
                if current_price <= self.take_profit {
                    Some(ExitReason::TakeProfit)
                } else if current_price >= self.stop_loss {
                    Some(ExitReason::StopLoss)
                } else {
                    None
                }
            }
        }
    }
}

/// A position as reported by the exchange, used during reconciliation.
#[derive(Debug, Clone)]
pub struct ExchangePosition {
    pub symbol: String,
    pub direction: Direction,
    pub quantity: f64,
    pub entry_price: f64,
}
