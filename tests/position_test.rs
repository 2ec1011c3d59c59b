// tests/position_test.rs
//
// Lifecycle manager against the simulated gateway: paired-order protection,
// idempotent close, OCO emulation, reconciliation.

use pivot_trader::config::{RiskConfig, SymbolConfig};
use pivot_trader::exchange::{ExchangeGateway, OrderSide, OrderStatus, PaperGateway};
use pivot_trader::models::{Direction, ExchangePosition, ExitReason};
use pivot_trader::position::{PositionError, PositionManager};
use pivot_trader::risk::PositionSizer;
use pivot_trader::strategy::StrategyConfig;
use std::collections::HashMap;
use std::sync::Arc;

const SYMBOL: &str = "SOLUSDT";

fn manager_over(paper: &PaperGateway) -> PositionManager {
    let mut symbols = HashMap::new();
    symbols.insert(
        SYMBOL.to_string(),
        SymbolConfig { qty_precision: 3, atr_band: (0.3, 1.2) },
    );
    let sizer = PositionSizer::new(
        RiskConfig { risk_per_trade: 10.0, leverage: 10.0 },
        &symbols,
    );
    let gateway: Arc<dyn ExchangeGateway> = Arc::new(paper.clone());
    PositionManager::new(gateway, sizer, StrategyConfig::default())
}

#[tokio::test]
async fn open_sizes_and_protects_the_position() {
    let paper = PaperGateway::new();
    let mut manager = manager_over(&paper);

    let position = manager.open(SYMBOL, Direction::Long, 100.0, 1.0).await.unwrap();

    // risk 10 x leverage 10 / entry 100, at precision 3
    assert_eq!(position.quantity, 1.000);
    assert!(position.take_profit > position.entry_price);
    assert!(position.stop_loss < position.entry_price);
    assert!(position.paired_order_active());

    // Entry landed on the exchange, and both paired orders are resting.
    assert!(paper.position(SYMBOL).await.is_some());
    let pair = position.paired.unwrap();
    assert_eq!(paper.order_status_raw(&pair.tp_order_id).await, Some(OrderStatus::Open));
    assert_eq!(paper.order_status_raw(&pair.sl_order_id).await, Some(OrderStatus::Open));
}

#[tokio::test]
async fn short_levels_are_mirrored() {
    let paper = PaperGateway::new();
    let mut manager = manager_over(&paper);

    let position = manager.open(SYMBOL, Direction::Short, 100.0, 1.0).await.unwrap();
    assert!(position.take_profit < position.entry_price);
    assert!(position.stop_loss > position.entry_price);
}

#[tokio::test]
async fn failed_paired_order_closes_the_naked_position() {
    let paper = PaperGateway::new();
    paper.fail_stop_orders(true).await;
    let mut manager = manager_over(&paper);

    let result = manager.open(SYMBOL, Direction::Long, 100.0, 1.0).await;
    assert!(matches!(result, Err(PositionError::PairedOrderFailed(_))));

    // No local record, and the exchange position was closed again.
    assert!(!manager.has_position(SYMBOL));
    assert!(paper.position(SYMBOL).await.is_none());
}

#[tokio::test]
async fn close_is_idempotent_when_exchange_is_already_flat() {
    let paper = PaperGateway::new();
    let mut manager = manager_over(&paper);

    let position = manager.open(SYMBOL, Direction::Long, 100.0, 1.0).await.unwrap();
    let pair = position.paired.unwrap();

    // The TP fills behind the bot's back, flattening the exchange position.
    paper.mark_order_filled(&pair.tp_order_id).await;
    assert!(paper.position(SYMBOL).await.is_none());

    let placed_before = paper.market_orders_placed().await;
    assert!(manager.close(SYMBOL, ExitReason::Manual).await.unwrap());
    assert!(manager.close(SYMBOL, ExitReason::Manual).await.unwrap());
    // Neither close produced a fresh market order.
    assert_eq!(paper.market_orders_placed().await, placed_before);
    assert!(!manager.has_position(SYMBOL));
}

#[tokio::test]
async fn oco_monitor_cancels_the_sibling_on_fill() {
    let paper = PaperGateway::new();
    let mut manager = manager_over(&paper);

    let position = manager.open(SYMBOL, Direction::Long, 100.0, 1.0).await.unwrap();
    let pair = position.paired.unwrap();

    paper.mark_order_filled(&pair.tp_order_id).await;
    manager.monitor_paired_orders().await;

    assert_eq!(
        paper.order_status_raw(&pair.sl_order_id).await,
        Some(OrderStatus::Cancelled)
    );
    // The fill closed the exchange position, so the cache entry is gone too.
    assert!(!manager.has_position(SYMBOL));
}

#[tokio::test]
async fn oco_monitor_handles_stop_side_first() {
    let paper = PaperGateway::new();
    let mut manager = manager_over(&paper);

    let position = manager.open(SYMBOL, Direction::Long, 100.0, 1.0).await.unwrap();
    let pair = position.paired.unwrap();

    paper.mark_order_filled(&pair.sl_order_id).await;
    manager.monitor_paired_orders().await;

    assert_eq!(
        paper.order_status_raw(&pair.tp_order_id).await,
        Some(OrderStatus::Cancelled)
    );
    assert!(!manager.has_position(SYMBOL));
}

#[tokio::test]
async fn update_levels_replaces_the_pair() {
    let paper = PaperGateway::new();
    let mut manager = manager_over(&paper);

    let position = manager.open(SYMBOL, Direction::Long, 100.0, 1.0).await.unwrap();
    let old_pair = position.paired.unwrap();

    assert!(manager.update_levels(SYMBOL, 107.0, 98.5).await.unwrap());

    let updated = manager.get(SYMBOL).unwrap();
    assert_eq!(updated.take_profit, 107.0);
    assert_eq!(updated.stop_loss, 98.5);
    let new_pair = updated.paired.clone().unwrap();
    assert_ne!(new_pair.tp_order_id, old_pair.tp_order_id);
    assert_ne!(new_pair.sl_order_id, old_pair.sl_order_id);

    assert_eq!(
        paper.order_status_raw(&old_pair.tp_order_id).await,
        Some(OrderStatus::Cancelled)
    );
    assert_eq!(
        paper.order_status_raw(&old_pair.sl_order_id).await,
        Some(OrderStatus::Cancelled)
    );
    assert_eq!(
        paper.order_status_raw(&new_pair.tp_order_id).await,
        Some(OrderStatus::Open)
    );
}

#[tokio::test]
async fn reconcile_adopts_unknown_position_and_rebuilds_the_pair() {
    let paper = PaperGateway::new();
    let mut manager = manager_over(&paper);

    // A position opened manually, protected by a matching reduce-only pair.
    paper
        .seed_position(ExchangePosition {
            symbol: SYMBOL.to_string(),
            direction: Direction::Long,
            quantity: 2.0,
            entry_price: 100.0,
        })
        .await;
    let tp_id = paper
        .seed_resting_order(SYMBOL, OrderSide::Sell, 2.0, Some(110.0), None, true)
        .await;
    let sl_id = paper
        .seed_resting_order(SYMBOL, OrderSide::Sell, 2.0, None, Some(95.0), true)
        .await;
    // Noise that must not be matched: wrong side, not reduce-only, wrong size.
    paper
        .seed_resting_order(SYMBOL, OrderSide::Buy, 2.0, Some(90.0), None, false)
        .await;
    paper
        .seed_resting_order(SYMBOL, OrderSide::Sell, 5.0, Some(120.0), None, true)
        .await;

    manager.reconcile().await.unwrap();

    let adopted = manager.get(SYMBOL).expect("position adopted");
    assert_eq!(adopted.direction, Direction::Long);
    assert_eq!(adopted.quantity, 2.0);
    assert!(adopted.paired_order_active());
    let pair = adopted.paired.clone().unwrap();
    assert_eq!(pair.tp_order_id, tp_id);
    assert_eq!(pair.sl_order_id, sl_id);
    assert_eq!(adopted.take_profit, 110.0);
    assert_eq!(adopted.stop_loss, 95.0);
}

#[tokio::test]
async fn reconcile_tolerates_one_percent_quantity_drift() {
    let paper = PaperGateway::new();
    let mut manager = manager_over(&paper);

    paper
        .seed_position(ExchangePosition {
            symbol: SYMBOL.to_string(),
            direction: Direction::Short,
            quantity: 1.0,
            entry_price: 100.0,
        })
        .await;
    // 0.995 is within 1% of 1.0 and must still match.
    let tp_id = paper
        .seed_resting_order(SYMBOL, OrderSide::Buy, 0.995, Some(95.0), None, true)
        .await;
    let sl_id = paper
        .seed_resting_order(SYMBOL, OrderSide::Buy, 0.995, None, Some(104.0), true)
        .await;

    manager.reconcile().await.unwrap();

    let adopted = manager.get(SYMBOL).expect("position adopted");
    let pair = adopted.paired.clone().unwrap();
    assert_eq!(pair.tp_order_id, tp_id);
    assert_eq!(pair.sl_order_id, sl_id);
}

#[tokio::test]
async fn reconcile_drops_positions_the_exchange_no_longer_reports() {
    let paper = PaperGateway::new();
    let mut manager = manager_over(&paper);

    let position = manager.open(SYMBOL, Direction::Long, 100.0, 1.0).await.unwrap();
    let pair = position.paired.unwrap();

    // Stop loss executes while the bot is not looking.
    paper.mark_order_filled(&pair.sl_order_id).await;
    assert!(paper.position(SYMBOL).await.is_none());

    manager.reconcile().await.unwrap();
    assert!(!manager.has_position(SYMBOL));
}
