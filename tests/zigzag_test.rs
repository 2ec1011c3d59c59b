// tests/zigzag_test.rs
use pivot_trader::indicators::AtrZigzag;
use pivot_trader::models::PivotKind;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn feed(detector: &mut AtrZigzag, closes: &[f64], atr: f64) -> Vec<pivot_trader::models::Pivot> {
    closes.iter().filter_map(|&c| detector.update(c, atr)).collect()
}

#[test]
fn monotone_rise_never_confirms_a_low() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut closes: Vec<f64> = vec![100.0];
    for _ in 0..500 {
        let last = *closes.last().unwrap();
        closes.push(last + rng.gen_range(0.0..2.0));
    }

    let mut zz = AtrZigzag::new(2.0);
    let pivots = feed(&mut zz, &closes, 1.0);
    assert!(
        pivots.iter().all(|p| p.kind != PivotKind::Low),
        "a rising series must only confirm high pivots (or none)"
    );
}

#[test]
fn monotone_fall_never_confirms_a_high() {
    let mut rng = StdRng::seed_from_u64(8);
    let mut closes = vec![1000.0];
    for _ in 0..500 {
        let last = *closes.last().unwrap();
        closes.push(last - rng.gen_range(0.0..2.0));
    }

    let mut zz = AtrZigzag::new(2.0);
    let pivots = feed(&mut zz, &closes, 1.0);
    assert!(pivots.iter().all(|p| p.kind != PivotKind::High));
}

#[test]
fn replay_yields_identical_pivot_lists() {
    let mut rng = StdRng::seed_from_u64(42);
    let mut closes: Vec<f64> = vec![100.0];
    for _ in 0..2000 {
        let last = *closes.last().unwrap();
        closes.push((last + rng.gen_range(-1.5..1.5)).max(1.0));
    }

    let mut first = AtrZigzag::new(2.0);
    let mut second = AtrZigzag::new(2.0);
    let a = feed(&mut first, &closes, 1.0);
    let b = feed(&mut second, &closes, 1.0);

    assert!(!a.is_empty(), "random walk should produce confirmations");
    assert_eq!(a, b);
}

#[test]
fn confirmation_is_always_retrospective() {
    let mut rng = StdRng::seed_from_u64(99);
    let mut closes: Vec<f64> = vec![100.0];
    for _ in 0..2000 {
        let last = *closes.last().unwrap();
        closes.push((last + rng.gen_range(-2.0..2.0)).max(1.0));
    }

    let mut zz = AtrZigzag::new(3.0);
    let pivots = feed(&mut zz, &closes, 1.0);
    for p in &pivots {
        assert!(p.confirmed_at_index > p.index);
        assert!(p.bars_ago() >= 1);
    }
}

#[test]
fn confirmed_pivots_strictly_alternate() {
    let mut rng = StdRng::seed_from_u64(3);
    let mut closes: Vec<f64> = vec![100.0];
    for _ in 0..3000 {
        let last = *closes.last().unwrap();
        closes.push((last + rng.gen_range(-2.0..2.0)).max(1.0));
    }

    let mut zz = AtrZigzag::new(2.0);
    let pivots = feed(&mut zz, &closes, 0.8);
    assert!(pivots.len() >= 4);
    for pair in pivots.windows(2) {
        assert_ne!(pair[0].kind, pair[1].kind, "zigzag swings must alternate");
    }
}

#[test]
fn boundary_retracement_confirms_on_the_exact_bar() {
    // 2.0 * atr 1.0 retracement from 120: 118.0 exactly triggers.
    let closes = [100.0, 110.0, 120.0, 118.0];
    let mut zz = AtrZigzag::new(2.0);
    let pivots = feed(&mut zz, &closes, 1.0);

    assert_eq!(pivots.len(), 1);
    assert_eq!(pivots[0].kind, PivotKind::High);
    assert_eq!(pivots[0].price, 120.0);
    assert_eq!(pivots[0].index, 2);
    assert_eq!(pivots[0].confirmed_at_index, 3);

    // One tick shy of the boundary must NOT confirm.
    let closes = [100.0, 110.0, 120.0, 118.001];
    let mut zz = AtrZigzag::new(2.0);
    let pivots = feed(&mut zz, &closes, 1.0);
    assert!(pivots.is_empty());
}

#[test]
fn forward_fill_counter_increments_once_per_bar() {
    let mut zz = AtrZigzag::new(2.0);
    for &c in &[100.0, 105.0, 112.0, 110.0] {
        zz.update(c, 1.0);
    }
    assert_eq!(zz.features().bars_since_high, Some(0));
    assert_eq!(zz.features().last_high, 112.0);

    let mut expected = 0;
    for &c in &[110.5, 110.2, 110.8, 110.4] {
        zz.update(c, 1.0);
        expected += 1;
        assert_eq!(zz.features().bars_since_high, Some(expected));
        assert_eq!(zz.features().last_high, 112.0);
    }
}
