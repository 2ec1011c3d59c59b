// Indicator math over candle slices.
//
// Every function returns a Vec aligned with the input; positions that fall
// inside an indicator's warm-up window hold NaN. Consumers must treat any
// comparison against NaN as false.

pub mod zigzag;

pub use zigzag::AtrZigzag;

use itertools::Itertools;

use crate::models::{Candle, CandleClass, Trend};

/// Simple moving average of `values` over `window` bars.
pub fn sma(values: &[f64], window: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if window == 0 || values.len() < window {
        return out;
    }
    let mut sum: f64 = values[..window].iter().sum();
    out[window - 1] = sum / window as f64;
    for i in window..values.len() {
        sum += values[i] - values[i - window];
        out[i] = sum / window as f64;
    }
    out
}

/// Rolling sample standard deviation (n-1 divisor).
pub fn rolling_std(values: &[f64], window: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if window < 2 || values.len() < window {
        return out;
    }
    for i in (window - 1)..values.len() {
        let slice = &values[i + 1 - window..=i];
        let mean = slice.iter().sum::<f64>() / window as f64;
        let var = slice.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>()
            / (window as f64 - 1.0);
        out[i] = var.sqrt();
    }
    out
}

/// RSI from simple rolling means of gains and losses (not Wilder's
/// smoothing). A window with zero average loss saturates at exactly 100.
pub fn rsi(candles: &[Candle], window: usize) -> Vec<f64> {
    let n = candles.len();
    let mut out = vec![f64::NAN; n];
    if n < window + 1 {
        return out;
    }

    let mut gains = vec![0.0; n];
    let mut losses = vec![0.0; n];
    for i in 1..n {
        let delta = candles[i].close - candles[i - 1].close;
        if delta > 0.0 {
            gains[i] = delta;
        } else {
            losses[i] = -delta;
        }
    }

    // First delta exists at index 1, so the first full window ends at `window`.
    for i in window..n {
        let avg_gain: f64 = gains[i + 1 - window..=i].iter().sum::<f64>() / window as f64;
        let avg_loss: f64 = losses[i + 1 - window..=i].iter().sum::<f64>() / window as f64;
        // avg_loss == 0 drives rs to +inf and RSI to 100; 0/0 stays NaN.
        let rs = avg_gain / avg_loss;
        out[i] = 100.0 - (100.0 / (1.0 + rs));
    }
    out
}

/// True range series; the first bar has no previous close and falls back to
/// high - low.
pub fn true_range(candles: &[Candle]) -> Vec<f64> {
    let mut out = Vec::with_capacity(candles.len());
    if let Some(first) = candles.first() {
        out.push(first.high - first.low);
    }
    for (prev, c) in candles.iter().tuple_windows() {
        let tr = (c.high - c.low)
            .max((c.high - prev.close).abs())
            .max((c.low - prev.close).abs());
        out.push(tr);
    }
    out
}

/// ATR as Wilder's RMA of the true range: atr[i] = atr[i-1] + (tr[i] -
/// atr[i-1]) / window, seeded with the first true range.
pub fn atr(candles: &[Candle], window: usize) -> Vec<f64> {
    let tr = true_range(candles);
    let mut out = vec![f64::NAN; candles.len()];
    if candles.is_empty() || window == 0 {
        return out;
    }
    let alpha = 1.0 / window as f64;
    let mut value = tr[0];
    out[0] = value;
    for i in 1..tr.len() {
        value += (tr[i] - value) * alpha;
        out[i] = value;
    }
    out
}

/// ATR expressed as a percentage of the close.
pub fn pct_atr(candles: &[Candle], atr: &[f64]) -> Vec<f64> {
    candles
        .iter()
        .zip(atr)
        .map(|(c, a)| a / c.close * 100.0)
        .collect()
}

#[derive(Debug, Clone)]
pub struct BollingerBands {
    pub middle: Vec<f64>,
    pub upper: Vec<f64>,
    pub lower: Vec<f64>,
}

pub fn bollinger_bands(candles: &[Candle], window: usize, std_multiplier: f64) -> BollingerBands {
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let middle = sma(&closes, window);
    let std = rolling_std(&closes, window);
    let upper = middle
        .iter()
        .zip(&std)
        .map(|(m, s)| m + std_multiplier * s)
        .collect();
    let lower = middle
        .iter()
        .zip(&std)
        .map(|(m, s)| m - std_multiplier * s)
        .collect();
    BollingerBands { middle, upper, lower }
}

#[derive(Debug, Clone)]
pub struct DonchianChannel {
    pub upper: Vec<f64>,
    pub lower: Vec<f64>,
    /// (close - lower) / (upper - lower) * 100; NaN on a zero-width channel.
    pub position_ratio: Vec<f64>,
}

pub fn donchian_channel(candles: &[Candle], window: usize) -> DonchianChannel {
    let n = candles.len();
    let mut upper = vec![f64::NAN; n];
    let mut lower = vec![f64::NAN; n];
    let mut ratio = vec![f64::NAN; n];
    if window == 0 || n < window {
        return DonchianChannel { upper, lower, position_ratio: ratio };
    }
    for i in (window - 1)..n {
        let slice = &candles[i + 1 - window..=i];
        let hi = slice.iter().map(|c| c.high).fold(f64::MIN, f64::max);
        let lo = slice.iter().map(|c| c.low).fold(f64::MAX, f64::min);
        upper[i] = hi;
        lower[i] = lo;
        let width = hi - lo;
        if width > 0.0 {
            ratio[i] = (candles[i].close - lo) / width * 100.0;
        }
    }
    DonchianChannel { upper, lower, position_ratio: ratio }
}

/// SMA-crossover trend: uptrend iff the short SMA is above the long SMA.
/// Binary by construction; there is no flat state.
pub fn sma_trend(candles: &[Candle], short_window: usize, long_window: usize) -> Vec<Option<Trend>> {
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let short = sma(&closes, short_window);
    let long = sma(&closes, long_window);
    short
        .iter()
        .zip(&long)
        .map(|(s, l)| {
            if s.is_nan() || l.is_nan() {
                None
            } else if s > l {
                Some(Trend::Uptrend)
            } else {
                Some(Trend::Downtrend)
            }
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct NadarayaWatson {
    pub estimate: Vec<f64>,
    pub upper: Vec<f64>,
    pub lower: Vec<f64>,
}

/// Non-repainting Nadaraya-Watson envelope: a causal Gaussian kernel over
/// the previous `window` closes (the current bar is excluded), with the
/// envelope width set by the rolling mean absolute deviation between price
/// and the estimate.
pub fn nadaraya_watson(
    candles: &[Candle],
    window: usize,
    bandwidth: f64,
    deviation_window: usize,
    deviation_multiplier: f64,
) -> NadarayaWatson {
    let n = candles.len();
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let mut estimate = vec![f64::NAN; n];

    if window > 0 && n > window {
        let weights: Vec<f64> = (0..window)
            .map(|x| {
                let z = (x as f64 - (window as f64 - 1.0)) / bandwidth;
                (-0.5 * z * z).exp()
            })
            .collect();
        let weight_sum: f64 = weights.iter().sum();

        for i in window..n {
            let y = &closes[i - window..i];
            let dot: f64 = weights.iter().zip(y).map(|(w, v)| w * v).sum();
            estimate[i] = dot / weight_sum;
        }
    }

    let deviation: Vec<f64> = closes
        .iter()
        .zip(&estimate)
        .map(|(c, e)| (c - e).abs())
        .collect();
    let avg_deviation = rolling_mean_skipless(&deviation, deviation_window);

    let upper = estimate
        .iter()
        .zip(&avg_deviation)
        .map(|(e, d)| e + deviation_multiplier * d)
        .collect();
    let lower = estimate
        .iter()
        .zip(&avg_deviation)
        .map(|(e, d)| e - deviation_multiplier * d)
        .collect();

    NadarayaWatson { estimate, upper, lower }
}

// Rolling mean that yields NaN while any NaN is inside the window.
fn rolling_mean_skipless(values: &[f64], window: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if window == 0 || values.len() < window {
        return out;
    }
    for i in (window - 1)..values.len() {
        let slice = &values[i + 1 - window..=i];
        out[i] = slice.iter().sum::<f64>() / window as f64;
    }
    out
}

// EMA seeded with the simple mean of the first `period` values (NaN entries
// excluded from the seed), then recursive with alpha = 2 / (period + 1).
fn ema_seeded(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let mut out = vec![f64::NAN; n];
    if period == 0 || n < period {
        return out;
    }
    let head: Vec<f64> = values[..period].iter().copied().filter(|v| !v.is_nan()).collect();
    if head.is_empty() {
        return out;
    }
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut value = head.iter().sum::<f64>() / head.len() as f64;
    out[period - 1] = value;
    for i in period..n {
        value = values[i] * alpha + value * (1.0 - alpha);
        out[i] = value;
    }
    out
}

/// Wilder directional movement index. Directional movement and true range
/// are smoothed with a seeded EMA (first-`period` simple mean, then
/// alpha = 2 / (period + 1)); DX is smoothed the same way into ADX.
pub fn adx(candles: &[Candle], period: usize) -> Vec<f64> {
    let n = candles.len();
    if n == 0 {
        return Vec::new();
    }
    let tr = true_range(candles);
    let mut plus_dm = vec![0.0; n];
    let mut minus_dm = vec![0.0; n];
    for i in 1..n {
        let up_move = candles[i].high - candles[i - 1].high;
        let down_move = candles[i - 1].low - candles[i].low;
        if up_move > down_move && up_move > 0.0 {
            plus_dm[i] = up_move;
        }
        if down_move > up_move && down_move > 0.0 {
            minus_dm[i] = down_move;
        }
    }

    let tr_ema = ema_seeded(&tr, period);
    let plus_ema = ema_seeded(&plus_dm, period);
    let minus_ema = ema_seeded(&minus_dm, period);

    let mut dx = vec![f64::NAN; n];
    for i in 0..n {
        let plus_di = plus_ema[i] / tr_ema[i] * 100.0;
        let minus_di = minus_ema[i] / tr_ema[i] * 100.0;
        dx[i] = (plus_di - minus_di).abs() / (plus_di + minus_di) * 100.0;
    }

    ema_seeded(&dx, period)
}

/// Body size normalized by ATR, bucketed at 0.7 / 1.1 into weak / medium /
/// strong, split by candle color.
pub fn classify_candles(candles: &[Candle], atr: &[f64]) -> Vec<Option<CandleClass>> {
    candles
        .iter()
        .zip(atr)
        .map(|(c, a)| {
            if a.is_nan() || *a <= 0.0 {
                return None;
            }
            let strength = (c.close - c.open).abs() / a;
            Some(if c.close > c.open {
                if strength > 1.1 {
                    CandleClass::StrongBullish
                } else if strength > 0.7 {
                    CandleClass::MediumBullish
                } else {
                    CandleClass::WeakBullish
                }
            } else {
                if strength > 1.1 {
                    CandleClass::StrongBearish
                } else if strength > 0.7 {
                    CandleClass::MediumBearish
                } else {
                    CandleClass::WeakBearish
                }
            })
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct Supertrend {
    pub line: Vec<f64>,
    pub direction: Vec<Option<Trend>>,
}

/// SuperTrend with a simple-moving-average ATR and the usual band ratchet:
/// in an uptrend the lower band never falls, in a downtrend the upper band
/// never rises.
pub fn supertrend(candles: &[Candle], atr_period: usize, multiplier: f64) -> Supertrend {
    let n = candles.len();
    let mut line = vec![f64::NAN; n];
    let mut direction: Vec<Option<Trend>> = vec![None; n];
    if n < atr_period + 1 {
        return Supertrend { line, direction };
    }

    let tr = true_range(candles);
    let atr_sma = rolling_mean_skipless(&tr, atr_period);

    let mut upper = vec![f64::NAN; n];
    let mut lower = vec![f64::NAN; n];
    for i in 0..n {
        let hl2 = (candles[i].high + candles[i].low) / 2.0;
        upper[i] = hl2 + multiplier * atr_sma[i];
        lower[i] = hl2 - multiplier * atr_sma[i];
    }

    let mut up = true;
    for i in atr_period..n {
        let close = candles[i].close;
        if close > upper[i - 1] {
            up = true;
        } else if close < lower[i - 1] {
            up = false;
        } else {
            if up && lower[i] < lower[i - 1] {
                lower[i] = lower[i - 1];
            }
            if !up && upper[i] > upper[i - 1] {
                upper[i] = upper[i - 1];
            }
        }
        line[i] = if up { lower[i] } else { upper[i] };
        direction[i] = Some(if up { Trend::Uptrend } else { Trend::Downtrend });
    }

    Supertrend { line, direction }
}
