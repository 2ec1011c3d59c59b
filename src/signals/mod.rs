// Feature pipeline: turns a candle history into the indicator columns and
// cleaned signal columns the decision layer consumes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::indicators::{
    self, AtrZigzag, BollingerBands, DonchianChannel, NadarayaWatson, Supertrend,
};
use crate::models::{Candle, CandleClass, FeatureRow, RsiZone, Trend};

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("{symbol}: insufficient history ({available} bars, need {required})")]
    InsufficientHistory {
        symbol: String,
        required: usize,
        available: usize,
    },
}

/// Window parameters for every indicator in the pipeline. The largest
/// window is the sole source of the minimum-history requirement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub rsi_window: usize,
    pub atr_window: usize,
    pub bb_window: usize,
    pub bb_std_mult: f64,
    pub bb_touch_count: usize,
    pub dc_fast_window: usize,
    pub dc_slow_window: usize,
    pub sma_short: usize,
    pub sma_mid: usize,
    pub sma_long: usize,
    pub sma_trend_long: usize,
    pub nw_window: usize,
    pub nw_bandwidth: f64,
    pub nw_deviation_window: usize,
    pub nw_multiplier: f64,
    pub adx_period: usize,
    pub supertrend_period: usize,
    pub supertrend_mult: f64,
    pub clean_window: usize,
    pub zigzag_fast_mult: f64,
    pub zigzag_slow_mult: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            rsi_window: 14,
            atr_window: 14,
            bb_window: 20,
            bb_std_mult: 2.0,
            bb_touch_count: 3,
            dc_fast_window: 20,
            dc_slow_window: 50,
            sma_short: 13,
            sma_mid: 20,
            sma_long: 50,
            sma_trend_long: 200,
            nw_window: 20,
            nw_bandwidth: 3.0,
            nw_deviation_window: 20,
            nw_multiplier: 1.0,
            adx_period: 14,
            supertrend_period: 10,
            supertrend_mult: 3.0,
            clean_window: 10,
            zigzag_fast_mult: 2.0,
            zigzag_slow_mult: 3.0,
        }
    }
}

impl PipelineConfig {
    /// Bars needed before a feature row can be emitted. One extra bar on
    /// top of the largest window because every indicator lags at least one
    /// bar of history (RSI deltas, shifted Donchian breakouts).
    pub fn required_history(&self) -> usize {
        let largest = self
            .sma_trend_long
            .max(self.dc_slow_window)
            .max(self.nw_window + self.nw_deviation_window)
            .max(self.adx_period * 2)
            .max(self.rsi_window)
            .max(self.bb_window);
        largest + 1
    }
}

/// Bulk output of the pipeline: indicator-augmented columns aligned with
/// the input candles, plus the zigzag detectors in their end state.
pub struct FeatureSeries {
    pub atr: Vec<f64>,
    pub pct_atr: Vec<f64>,
    pub rsi: Vec<f64>,
    pub adx: Vec<f64>,
    pub sma_short: Vec<f64>,
    pub sma_mid: Vec<f64>,
    pub sma_long: Vec<f64>,
    pub sma_trend_long: Vec<f64>,
    pub trend_fast: Vec<Option<Trend>>,
    pub trend_slow: Vec<Option<Trend>>,
    pub supertrend: Supertrend,
    pub bollinger: BollingerBands,
    pub dc_fast: DonchianChannel,
    pub dc_slow: DonchianChannel,
    pub nw: NadarayaWatson,
    pub candle_class: Vec<Option<CandleClass>>,
    pub dc_breakout: Vec<bool>,
    pub dc_breakdown: Vec<bool>,
    pub dc_breakout_clean: Vec<bool>,
    pub dc_breakdown_clean: Vec<bool>,
    pub bb_touch_long: Vec<bool>,
    pub bb_touch_short: Vec<bool>,
    pub bb_touch_long_clean: Vec<bool>,
    pub bb_touch_short_clean: Vec<bool>,
    pub zigzag_fast: AtrZigzag,
    pub zigzag_slow: AtrZigzag,
}

#[derive(Debug, Clone, Default)]
pub struct FeaturePipeline {
    config: PipelineConfig,
}

impl FeaturePipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Compute the full indicator-augmented series for a symbol.
    pub fn compute_series(
        &self,
        symbol: &str,
        candles: &[Candle],
    ) -> Result<FeatureSeries, FeatureError> {
        let required = self.config.required_history();
        if candles.len() < required {
            return Err(FeatureError::InsufficientHistory {
                symbol: symbol.to_string(),
                required,
                available: candles.len(),
            });
        }

        let cfg = &self.config;
        let atr = indicators::atr(candles, cfg.atr_window);
        let pct_atr = indicators::pct_atr(candles, &atr);
        let rsi = indicators::rsi(candles, cfg.rsi_window);
        let adx = indicators::adx(candles, cfg.adx_period);

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let sma_short = indicators::sma(&closes, cfg.sma_short);
        let sma_mid = indicators::sma(&closes, cfg.sma_mid);
        let sma_long = indicators::sma(&closes, cfg.sma_long);
        let sma_trend_long = indicators::sma(&closes, cfg.sma_trend_long);
        let trend_fast = indicators::sma_trend(candles, cfg.sma_short, cfg.sma_long);
        let trend_slow = indicators::sma_trend(candles, cfg.sma_long, cfg.sma_trend_long);
        let supertrend =
            indicators::supertrend(candles, cfg.supertrend_period, cfg.supertrend_mult);

        let bollinger = indicators::bollinger_bands(candles, cfg.bb_window, cfg.bb_std_mult);
        let dc_fast = indicators::donchian_channel(candles, cfg.dc_fast_window);
        let dc_slow = indicators::donchian_channel(candles, cfg.dc_slow_window);
        let nw = indicators::nadaraya_watson(
            candles,
            cfg.nw_window,
            cfg.nw_bandwidth,
            cfg.nw_deviation_window,
            cfg.nw_multiplier,
        );

        let candle_class = indicators::classify_candles(candles, &atr);

        let (dc_breakout, dc_breakdown) = dc_breakout_signal(candles, &dc_slow, &trend_slow);
        let dc_breakout_clean = clean_signals(&dc_breakout, cfg.clean_window);
        let dc_breakdown_clean = clean_signals(&dc_breakdown, cfg.clean_window);

        let (bb_touch_long, bb_touch_short) =
            bb_touch_signal(candles, &bollinger, cfg.bb_touch_count, &trend_slow);
        let bb_touch_long_clean = clean_signals(&bb_touch_long, cfg.clean_window);
        let bb_touch_short_clean = clean_signals(&bb_touch_short, cfg.clean_window);

        let mut zigzag_fast = AtrZigzag::new(cfg.zigzag_fast_mult);
        let mut zigzag_slow = AtrZigzag::new(cfg.zigzag_slow_mult);
        for (close, a) in closes.iter().zip(&atr) {
            zigzag_fast.update(*close, *a);
            zigzag_slow.update(*close, *a);
        }

        Ok(FeatureSeries {
            atr,
            pct_atr,
            rsi,
            adx,
            sma_short,
            sma_mid,
            sma_long,
            sma_trend_long,
            trend_fast,
            trend_slow,
            supertrend,
            bollinger,
            dc_fast,
            dc_slow,
            nw,
            candle_class,
            dc_breakout,
            dc_breakdown,
            dc_breakout_clean,
            dc_breakdown_clean,
            bb_touch_long,
            bb_touch_short,
            bb_touch_long_clean,
            bb_touch_short_clean,
            zigzag_fast,
            zigzag_slow,
        })
    }

    /// Feature row for the most recent candle.
    pub fn compute_row(
        &self,
        symbol: &str,
        candles: &[Candle],
    ) -> Result<FeatureRow, FeatureError> {
        let series = self.compute_series(symbol, candles)?;
        let i = candles.len() - 1;
        let last = &candles[i];

        Ok(FeatureRow {
            symbol: symbol.to_string(),
            timestamp: last.timestamp,
            open: last.open,
            high: last.high,
            low: last.low,
            close: last.close,
            volume: last.volume,
            atr: series.atr[i],
            pct_atr: series.pct_atr[i],
            rsi: series.rsi[i],
            rsi_zone: RsiZone::from_value(series.rsi[i]),
            adx: series.adx[i],
            sma_13: series.sma_short[i],
            sma_20: series.sma_mid[i],
            sma_50: series.sma_long[i],
            sma_200: series.sma_trend_long[i],
            trend_13_50: series.trend_fast[i],
            trend_50_200: series.trend_slow[i],
            supertrend: series.supertrend.direction[i],
            bb_middle: series.bollinger.middle[i],
            bb_upper: series.bollinger.upper[i],
            bb_lower: series.bollinger.lower[i],
            dc_upper_20: series.dc_fast.upper[i],
            dc_lower_20: series.dc_fast.lower[i],
            dc_position_ratio_20: series.dc_fast.position_ratio[i],
            dc_upper_50: series.dc_slow.upper[i],
            dc_lower_50: series.dc_slow.lower[i],
            dc_position_ratio_50: series.dc_slow.position_ratio[i],
            nw: series.nw.estimate[i],
            nw_upper: series.nw.upper[i],
            nw_lower: series.nw.lower[i],
            candle_class: series.candle_class[i],
            dc_breakout_50: series.dc_breakout[i],
            dc_breakdown_50: series.dc_breakdown[i],
            dc_breakout_clean_50: series.dc_breakout_clean[i],
            dc_breakdown_clean_50: series.dc_breakdown_clean[i],
            bb_touch_long: series.bb_touch_long[i],
            bb_touch_short: series.bb_touch_short[i],
            bb_touch_long_clean: series.bb_touch_long_clean[i],
            bb_touch_short_clean: series.bb_touch_short_clean[i],
            pivots_2x: series.zigzag_fast.features(),
            pivots_3x: series.zigzag_slow.features(),
        })
    }
}

/// Donchian breakout against the previous bar's channel, filtered by the
/// slow trend: breakouts only count with the trend, breakdowns against it.
pub fn dc_breakout_signal(
    candles: &[Candle],
    dc: &DonchianChannel,
    trend: &[Option<Trend>],
) -> (Vec<bool>, Vec<bool>) {
    let n = candles.len();
    let mut long = vec![false; n];
    let mut short = vec![false; n];
    for i in 1..n {
        let prev_upper = dc.upper[i - 1];
        let prev_lower = dc.lower[i - 1];
        // NaN channel bounds compare false and suppress the signal.
        let breakout = candles[i].high > prev_upper;
        let breakdown = candles[i].low < prev_lower;
        long[i] = breakout && trend[i] == Some(Trend::Uptrend);
        short[i] = breakdown && trend[i] != Some(Trend::Uptrend) && trend[i].is_some();
    }
    (long, short)
}

/// Band-touch signal: fires when each of the previous `touch_count` bars
/// touched the band (upper for longs, lower for shorts), with the same
/// trend filter as the breakout signal.
pub fn bb_touch_signal(
    candles: &[Candle],
    bb: &BollingerBands,
    touch_count: usize,
    trend: &[Option<Trend>],
) -> (Vec<bool>, Vec<bool>) {
    let n = candles.len();
    let touched_upper: Vec<bool> = (0..n).map(|i| candles[i].high >= bb.upper[i]).collect();
    let touched_lower: Vec<bool> = (0..n).map(|i| candles[i].low <= bb.lower[i]).collect();

    let mut long = vec![false; n];
    let mut short = vec![false; n];
    for i in touch_count..n {
        let upper_run = touched_upper[i - touch_count..i].iter().all(|&t| t);
        let lower_run = touched_lower[i - touch_count..i].iter().all(|&t| t);
        long[i] = upper_run && trend[i] == Some(Trend::Uptrend);
        short[i] = lower_run && trend[i] != Some(Trend::Uptrend) && trend[i].is_some();
    }
    (long, short)
}

/// Suppress a True that has a True predecessor within the trailing
/// `window` bars of the input series. Guarantees no two Trues in the
/// output are `window` bars or closer apart.
pub fn clean_signals(signals: &[bool], window: usize) -> Vec<bool> {
    let mut cleaned = signals.to_vec();
    for i in 0..signals.len() {
        if signals[i] {
            let start = i.saturating_sub(window);
            if signals[start..i].iter().any(|&s| s) {
                cleaned[i] = false;
            }
        }
    }
    cleaned
}
