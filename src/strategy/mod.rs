// Entry and exit decisions over a feature row.
//
// Strategies are data: a rule set is a conjunction of predicates over named
// features, so variants differ in configuration rather than in code paths.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::config::SymbolConfig;
use crate::models::{CandleClass, Direction, ExitReason, FeatureRow, Position, Trend};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub name: String,
    pub tp_atr_mult: f64,
    pub sl_atr_mult_long: f64,
    pub sl_atr_mult_short: f64,
    pub min_adx: f64,
    pub max_adx: f64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            name: "donchian_breakout".to_string(),
            tp_atr_mult: 4.0,
            sl_atr_mult_long: 1.0,
            sl_atr_mult_short: 2.0,
            min_adx: 25.0,
            max_adx: 60.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumFeature {
    Close,
    Rsi,
    Adx,
    PctAtr,
    BbMiddle,
    BbUpper,
    BbLower,
    Nw,
    NwUpper,
    NwLower,
    DcPositionRatio20,
    DcPositionRatio50,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolFeature {
    DcBreakoutClean50,
    DcBreakdownClean50,
    BbTouchLongClean,
    BbTouchShortClean,
    LowPivotConfirmed2x,
    HighPivotConfirmed2x,
    LowPivotConfirmed3x,
    HighPivotConfirmed3x,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendField {
    Fast,
    Slow,
    Supertrend,
}

impl FeatureRow {
    fn num(&self, feature: NumFeature) -> f64 {
        match feature {
            NumFeature::Close => self.close,
            NumFeature::Rsi => self.rsi,
            NumFeature::Adx => self.adx,
            NumFeature::PctAtr => self.pct_atr,
            NumFeature::BbMiddle => self.bb_middle,
            NumFeature::BbUpper => self.bb_upper,
            NumFeature::BbLower => self.bb_lower,
            NumFeature::Nw => self.nw,
            NumFeature::NwUpper => self.nw_upper,
            NumFeature::NwLower => self.nw_lower,
            NumFeature::DcPositionRatio20 => self.dc_position_ratio_20,
            NumFeature::DcPositionRatio50 => self.dc_position_ratio_50,
        }
    }

    fn flag(&self, feature: BoolFeature) -> bool {
        match feature {
            BoolFeature::DcBreakoutClean50 => self.dc_breakout_clean_50,
            BoolFeature::DcBreakdownClean50 => self.dc_breakdown_clean_50,
            BoolFeature::BbTouchLongClean => self.bb_touch_long_clean,
            BoolFeature::BbTouchShortClean => self.bb_touch_short_clean,
            BoolFeature::LowPivotConfirmed2x => self.pivots_2x.low_confirmed,
            BoolFeature::HighPivotConfirmed2x => self.pivots_2x.high_confirmed,
            BoolFeature::LowPivotConfirmed3x => self.pivots_3x.low_confirmed,
            BoolFeature::HighPivotConfirmed3x => self.pivots_3x.high_confirmed,
        }
    }

    fn trend(&self, field: TrendField) -> Option<Trend> {
        match field {
            TrendField::Fast => self.trend_13_50,
            TrendField::Slow => self.trend_50_200,
            TrendField::Supertrend => self.supertrend,
        }
    }
}

/// One condition of a rule set. Every numeric comparison involving NaN
/// evaluates false, so an unavailable feature can never satisfy a rule.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    GreaterThan(NumFeature, f64),
    LessThan(NumFeature, f64),
    FeatureAbove(NumFeature, NumFeature),
    FeatureBelow(NumFeature, NumFeature),
    TrendIs(TrendField, Trend),
    CandleClassIn(Vec<CandleClass>),
    Flag(BoolFeature),
    /// Current-bar ATR% inside the per-symbol eligibility band.
    PctAtrInBand,
}

impl Predicate {
    pub fn holds(&self, row: &FeatureRow, symbol_cfg: &SymbolConfig) -> bool {
        match self {
            Predicate::GreaterThan(f, threshold) => row.num(*f) > *threshold,
            Predicate::LessThan(f, threshold) => row.num(*f) < *threshold,
            Predicate::FeatureAbove(lhs, rhs) => row.num(*lhs) > row.num(*rhs),
            Predicate::FeatureBelow(lhs, rhs) => row.num(*lhs) < row.num(*rhs),
            Predicate::TrendIs(field, trend) => row.trend(*field) == Some(*trend),
            Predicate::CandleClassIn(classes) => match row.candle_class {
                Some(class) => classes.contains(&class),
                None => false,
            },
            Predicate::Flag(f) => row.flag(*f),
            Predicate::PctAtrInBand => {
                let (lo, hi) = symbol_cfg.atr_band;
                row.pct_atr > lo && row.pct_atr < hi
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RuleSet {
    pub name: String,
    pub long: Vec<Predicate>,
    pub short: Vec<Predicate>,
}

impl RuleSet {
    /// Evaluate the rule set against one feature row. Long and Short are
    /// disjoint by construction, but if both ever fired Long wins.
    pub fn evaluate(&self, row: &FeatureRow, symbol_cfg: &SymbolConfig) -> Option<Direction> {
        if self.long.iter().all(|p| p.holds(row, symbol_cfg)) {
            return Some(Direction::Long);
        }
        if self.short.iter().all(|p| p.holds(row, symbol_cfg)) {
            return Some(Direction::Short);
        }
        None
    }

    pub fn by_name(name: &str, config: &StrategyConfig) -> Result<RuleSet> {
        match name {
            "donchian_breakout" => Ok(donchian_breakout(config)),
            "pivot_reversal" => Ok(pivot_reversal()),
            other => Err(anyhow::anyhow!("Unknown strategy: {}", other)),
        }
    }
}

/// Donchian-50 breakout continuation: cleaned channel break in the slow
/// trend direction, confirmed by momentum (RSI, ADX), price holding above
/// the regression estimate but below its upper envelope, and an acceptable
/// candle body.
pub fn donchian_breakout(config: &StrategyConfig) -> RuleSet {
    let long_candles = vec![
        CandleClass::WeakBearish,
        CandleClass::WeakBullish,
        CandleClass::MediumBullish,
        CandleClass::StrongBullish,
    ];
    let short_candles = vec![
        CandleClass::WeakBullish,
        CandleClass::WeakBearish,
        CandleClass::MediumBearish,
        CandleClass::StrongBearish,
    ];

    RuleSet {
        name: "donchian_breakout".to_string(),
        long: vec![
            Predicate::Flag(BoolFeature::DcBreakoutClean50),
            Predicate::GreaterThan(NumFeature::DcPositionRatio20, 60.0),
            Predicate::GreaterThan(NumFeature::Rsi, 50.0),
            Predicate::FeatureAbove(NumFeature::Close, NumFeature::Nw),
            Predicate::FeatureBelow(NumFeature::Close, NumFeature::NwUpper),
            Predicate::FeatureAbove(NumFeature::Close, NumFeature::BbMiddle),
            Predicate::GreaterThan(NumFeature::Adx, config.min_adx),
            Predicate::LessThan(NumFeature::Adx, config.max_adx),
            Predicate::CandleClassIn(long_candles),
            Predicate::PctAtrInBand,
        ],
        short: vec![
            Predicate::Flag(BoolFeature::DcBreakdownClean50),
            Predicate::LessThan(NumFeature::DcPositionRatio20, 40.0),
            Predicate::LessThan(NumFeature::Rsi, 50.0),
            Predicate::FeatureBelow(NumFeature::Close, NumFeature::Nw),
            Predicate::FeatureAbove(NumFeature::Close, NumFeature::NwLower),
            Predicate::FeatureBelow(NumFeature::Close, NumFeature::BbMiddle),
            Predicate::GreaterThan(NumFeature::Adx, config.min_adx),
            Predicate::LessThan(NumFeature::Adx, config.max_adx),
            Predicate::CandleClassIn(short_candles),
            Predicate::PctAtrInBand,
        ],
    }
}

/// Swing continuation off a freshly confirmed 2x-ATR zigzag pivot in the
/// direction of the fast trend.
pub fn pivot_reversal() -> RuleSet {
    RuleSet {
        name: "pivot_reversal".to_string(),
        long: vec![
            Predicate::Flag(BoolFeature::LowPivotConfirmed2x),
            Predicate::TrendIs(TrendField::Fast, Trend::Uptrend),
            Predicate::GreaterThan(NumFeature::DcPositionRatio50, 60.0),
            Predicate::FeatureBelow(NumFeature::Close, NumFeature::NwUpper),
            Predicate::PctAtrInBand,
        ],
        short: vec![
            Predicate::Flag(BoolFeature::HighPivotConfirmed2x),
            Predicate::TrendIs(TrendField::Fast, Trend::Downtrend),
            Predicate::LessThan(NumFeature::DcPositionRatio50, 40.0),
            Predicate::FeatureAbove(NumFeature::Close, NumFeature::NwLower),
            Predicate::PctAtrInBand,
        ],
    }
}

/// TP/SL levels as ATR-percent offsets from the entry price. Longs risk one
/// ATR step, shorts two, both targeting four.
pub fn calculate_levels(
    entry_price: f64,
    pct_atr: f64,
    direction: Direction,
    config: &StrategyConfig,
) -> (f64, f64) {
    let (take_profit, stop_loss) = match direction {
        Direction::Long => (
            entry_price * (1.0 + config.tp_atr_mult * pct_atr / 100.0),
            entry_price * (1.0 - config.sl_atr_mult_long * pct_atr / 100.0),
        ),
        Direction::Short => (
            entry_price * (1.0 - config.tp_atr_mult * pct_atr / 100.0),
            entry_price * (1.0 + config.sl_atr_mult_short * pct_atr / 100.0),
        ),
    };
    (round_price(take_profit), round_price(stop_loss))
}

fn round_price(price: f64) -> f64 {
    (price * 10_000.0).round() / 10_000.0
}

#[derive(Debug, Clone, PartialEq)]
pub enum ManagementAction {
    /// Opposite signal: close, then reopen in the new direction.
    ReverseSignal(Direction),
    /// Same-direction signal: refresh TP/SL from the current price and ATR%.
    UpdateLevels { take_profit: f64, stop_loss: f64 },
    CloseOnTarget(ExitReason),
    NoAction,
}

/// Management decision for an open position given this cycle's signal and
/// the live price. Pure; the lifecycle manager executes the outcome.
pub fn manage_position(
    position: &Position,
    signal: Option<Direction>,
    current_price: f64,
    current_pct_atr: f64,
    config: &StrategyConfig,
) -> ManagementAction {
    match signal {
        Some(direction) if direction != position.direction => {
            ManagementAction::ReverseSignal(direction)
        }
        Some(direction) => {
            let (take_profit, stop_loss) =
                calculate_levels(current_price, current_pct_atr, direction, config);
            ManagementAction::UpdateLevels { take_profit, stop_loss }
        }
        None => match position.target_hit(current_price) {
            Some(reason) => ManagementAction::CloseOnTarget(reason),
            None => ManagementAction::NoAction,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PivotFeatures;
    use chrono::Utc;

    fn symbol_cfg() -> SymbolConfig {
        SymbolConfig { qty_precision: 1, atr_band: (0.4, 1.2) }
    }

    fn passing_long_row() -> FeatureRow {
        FeatureRow {
            symbol: "SOLUSDT".to_string(),
            timestamp: Utc::now(),
            open: 99.0,
            high: 101.0,
            low: 98.5,
            close: 100.0,
            volume: 1000.0,
            atr: 0.8,
            pct_atr: 0.8,
            rsi: 58.0,
            rsi_zone: crate::models::RsiZone::from_value(58.0),
            adx: 30.0,
            sma_13: 99.0,
            sma_20: 98.5,
            sma_50: 97.0,
            sma_200: 95.0,
            trend_13_50: Some(Trend::Uptrend),
            trend_50_200: Some(Trend::Uptrend),
            supertrend: Some(Trend::Uptrend),
            bb_middle: 99.0,
            bb_upper: 102.0,
            bb_lower: 96.0,
            dc_upper_20: 101.0,
            dc_lower_20: 95.0,
            dc_position_ratio_20: 83.0,
            dc_upper_50: 101.0,
            dc_lower_50: 92.0,
            dc_position_ratio_50: 88.0,
            nw: 99.2,
            nw_upper: 101.5,
            nw_lower: 96.9,
            candle_class: Some(CandleClass::MediumBullish),
            dc_breakout_50: true,
            dc_breakdown_50: false,
            dc_breakout_clean_50: true,
            dc_breakdown_clean_50: false,
            bb_touch_long: false,
            bb_touch_short: false,
            bb_touch_long_clean: false,
            bb_touch_short_clean: false,
            pivots_2x: PivotFeatures::empty(),
            pivots_3x: PivotFeatures::empty(),
        }
    }

    #[test]
    fn donchian_long_fires_when_all_conditions_hold() {
        let rules = donchian_breakout(&StrategyConfig::default());
        assert_eq!(
            rules.evaluate(&passing_long_row(), &symbol_cfg()),
            Some(Direction::Long)
        );
    }

    #[test]
    fn out_of_band_atr_blocks_entry() {
        let rules = donchian_breakout(&StrategyConfig::default());
        let mut row = passing_long_row();
        row.pct_atr = 2.5;
        assert_eq!(rules.evaluate(&row, &symbol_cfg()), None);
    }

    #[test]
    fn nan_feature_blocks_entry() {
        let rules = donchian_breakout(&StrategyConfig::default());
        let mut row = passing_long_row();
        row.rsi = f64::NAN;
        assert_eq!(rules.evaluate(&row, &symbol_cfg()), None);
    }

    #[test]
    fn levels_bracket_entry_for_long() {
        let config = StrategyConfig::default();
        let (tp, sl) = calculate_levels(100.0, 1.0, Direction::Long, &config);
        assert!(tp > 100.0);
        assert!(sl < 100.0);
        assert_eq!(tp, 104.0);
        assert_eq!(sl, 99.0);
    }

    #[test]
    fn levels_bracket_entry_for_short() {
        let config = StrategyConfig::default();
        let (tp, sl) = calculate_levels(100.0, 1.0, Direction::Short, &config);
        assert!(tp < 100.0);
        assert!(sl > 100.0);
        assert_eq!(tp, 96.0);
        assert_eq!(sl, 102.0);
    }

    #[test]
    fn opposite_signal_reverses() {
        let position = Position {
            id: "p1".to_string(),
            symbol: "SOLUSDT".to_string(),
            direction: Direction::Long,
            entry_price: 100.0,
            quantity: 1.0,
            opened_at: Utc::now(),
            take_profit: 104.0,
            stop_loss: 99.0,
            entry_order_id: None,
            paired: None,
        };
        let action = manage_position(
            &position,
            Some(Direction::Short),
            100.5,
            0.8,
            &StrategyConfig::default(),
        );
        assert_eq!(action, ManagementAction::ReverseSignal(Direction::Short));
    }

    #[test]
    fn same_signal_updates_levels_from_current_price() {
        let position = Position {
            id: "p1".to_string(),
            symbol: "SOLUSDT".to_string(),
            direction: Direction::Long,
            entry_price: 100.0,
            quantity: 1.0,
            opened_at: Utc::now(),
            take_profit: 104.0,
            stop_loss: 99.0,
            entry_order_id: None,
            paired: None,
        };
        let action = manage_position(
            &position,
            Some(Direction::Long),
            110.0,
            1.0,
            &StrategyConfig::default(),
        );
        assert_eq!(
            action,
            ManagementAction::UpdateLevels { take_profit: 114.4, stop_loss: 108.9 }
        );
    }

    #[test]
    fn no_signal_checks_targets() {
        let position = Position {
            id: "p1".to_string(),
            symbol: "SOLUSDT".to_string(),
            direction: Direction::Long,
            entry_price: 100.0,
            quantity: 1.0,
            opened_at: Utc::now(),
            take_profit: 104.0,
            stop_loss: 99.0,
            entry_order_id: None,
            paired: None,
        };
        let config = StrategyConfig::default();

        assert_eq!(
            manage_position(&position, None, 104.2, 0.8, &config),
            ManagementAction::CloseOnTarget(ExitReason::TakeProfit)
        );
        assert_eq!(
            manage_position(&position, None, 98.7, 0.8, &config),
            ManagementAction::CloseOnTarget(ExitReason::StopLoss)
        );
        assert_eq!(
            manage_position(&position, None, 101.0, 0.8, &config),
            ManagementAction::NoAction
        );
    }
}
