// tests/signals_test.rs
use chrono::{TimeZone, Utc};
use pivot_trader::indicators;
use pivot_trader::models::Candle;
use pivot_trader::signals::{clean_signals, FeatureError, FeaturePipeline};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn candle(i: usize, open: f64, high: f64, low: f64, close: f64) -> Candle {
    Candle {
        timestamp: Utc.timestamp_opt(1_700_000_000 + i as i64 * 900, 0).unwrap(),
        open,
        high,
        low,
        close,
        volume: 1000.0,
    }
}

fn random_walk(n: usize, seed: u64) -> Vec<Candle> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut close: f64 = 100.0;
    (0..n)
        .map(|i| {
            let open = close;
            close = (close + rng.gen_range(-1.0..1.05)).max(1.0);
            let high = open.max(close) + rng.gen_range(0.0..0.5);
            let low = open.min(close) - rng.gen_range(0.0..0.5);
            candle(i, open, high, low, close)
        })
        .collect()
}

#[test]
fn clean_signals_never_fires_twice_within_window() {
    let mut rng = StdRng::seed_from_u64(11);
    for window in [3usize, 10, 25] {
        let signals: Vec<bool> = (0..500).map(|_| rng.gen_bool(0.2)).collect();
        let cleaned = clean_signals(&signals, window);

        let fired: Vec<usize> = cleaned
            .iter()
            .enumerate()
            .filter_map(|(i, &s)| s.then_some(i))
            .collect();
        for pair in fired.windows(2) {
            assert!(
                pair[1] - pair[0] > window,
                "outputs {} and {} violate window {}",
                pair[0],
                pair[1],
                window
            );
        }
        // Cleaning only ever suppresses; it never invents a signal.
        for (i, &s) in cleaned.iter().enumerate() {
            assert!(!s || signals[i]);
        }
    }
}

#[test]
fn rsi_saturates_on_a_loss_free_window() {
    let candles: Vec<Candle> = (0..30)
        .map(|i| {
            let c = 100.0 + i as f64;
            candle(i, c - 0.5, c + 0.5, c - 1.0, c)
        })
        .collect();
    let rsi = indicators::rsi(&candles, 14);
    assert_eq!(*rsi.last().unwrap(), 100.0);
}

#[test]
fn donchian_ratio_guards_zero_width() {
    let candles: Vec<Candle> = (0..60).map(|i| candle(i, 50.0, 50.0, 50.0, 50.0)).collect();
    let dc = indicators::donchian_channel(&candles, 20);
    assert!(dc.position_ratio.last().unwrap().is_nan());

    // NaN features must never satisfy a threshold comparison.
    let ratio = *dc.position_ratio.last().unwrap();
    assert!(!(ratio > 60.0));
    assert!(!(ratio < 40.0));
}

#[test]
fn insufficient_history_is_reported_not_computed() {
    let pipeline = FeaturePipeline::default();
    let candles = random_walk(120, 5);

    let result = pipeline.compute_row("SOLUSDT", &candles);
    match result {
        Err(FeatureError::InsufficientHistory { required, available, .. }) => {
            assert_eq!(available, 120);
            assert!(required > 120);
        }
        other => panic!("expected InsufficientHistory, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn full_history_produces_a_complete_row() {
    let pipeline = FeaturePipeline::default();
    let candles = random_walk(400, 17);

    let row = pipeline.compute_row("SOLUSDT", &candles).unwrap();
    assert_eq!(row.close, candles.last().unwrap().close);
    assert!(!row.atr.is_nan());
    assert!(!row.pct_atr.is_nan());
    assert!(!row.rsi.is_nan());
    assert!(!row.adx.is_nan());
    assert!(!row.bb_middle.is_nan());
    assert!(!row.nw.is_nan());
    assert!(row.trend_13_50.is_some());
    assert!(row.trend_50_200.is_some());
    assert!(row.candle_class.is_some());
}

#[test]
fn feature_rows_are_stable_under_appended_bars() {
    // The row computed for bar i must not change when later bars arrive:
    // nothing in the pipeline may look ahead.
    let pipeline = FeaturePipeline::default();
    let candles = random_walk(320, 23);

    let row_at_310 = pipeline.compute_row("SOLUSDT", &candles[..311]).unwrap();
    let series = pipeline.compute_series("SOLUSDT", &candles).unwrap();

    assert_eq!(row_at_310.rsi, series.rsi[310]);
    assert_eq!(row_at_310.atr, series.atr[310]);
    assert_eq!(row_at_310.adx, series.adx[310]);
    assert_eq!(row_at_310.nw, series.nw.estimate[310]);
    assert_eq!(row_at_310.dc_breakout_clean_50, series.dc_breakout_clean[310]);
}
