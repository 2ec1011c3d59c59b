// Position sizing with per-symbol quantity precision.

use log::debug;
use std::collections::HashMap;
use thiserror::Error;

use crate::config::{RiskConfig, SymbolConfig};

#[derive(Debug, Error)]
pub enum SizingError {
    /// Per-symbol precision is required configuration; sizing never falls
    /// back to a default number of decimals.
    #[error("{symbol}: no quantity precision configured")]
    PrecisionMissing { symbol: String },

    #[error("{symbol}: computed quantity {quantity} is not positive (entry price {entry_price})")]
    InvalidQuantity {
        symbol: String,
        quantity: f64,
        entry_price: f64,
    },
}

#[derive(Debug, Clone)]
pub struct PositionSizer {
    risk: RiskConfig,
    precisions: HashMap<String, i32>,
}

impl PositionSizer {
    pub fn new(risk: RiskConfig, symbols: &HashMap<String, SymbolConfig>) -> Self {
        let precisions = symbols
            .iter()
            .map(|(name, cfg)| (name.clone(), cfg.qty_precision))
            .collect();
        Self { risk, precisions }
    }

    /// Quantity for a new position: fixed risk amount times leverage,
    /// divided by the entry price, rounded to the symbol's precision.
    pub fn size(&self, symbol: &str, entry_price: f64) -> Result<f64, SizingError> {
        let precision = *self
            .precisions
            .get(symbol)
            .ok_or_else(|| SizingError::PrecisionMissing { symbol: symbol.to_string() })?;

        let raw = self.risk.risk_per_trade * self.risk.leverage / entry_price;
        let quantity = round_to_precision(raw, precision);

        if !(quantity > 0.0) {
            return Err(SizingError::InvalidQuantity {
                symbol: symbol.to_string(),
                quantity,
                entry_price,
            });
        }

        debug!(
            "{}: sized {} at entry {} (raw {:.6}, precision {})",
            symbol, quantity, entry_price, raw, precision
        );
        Ok(quantity)
    }

    pub fn leverage(&self) -> f64 {
        self.risk.leverage
    }
}

/// Round to `precision` decimal places; negative precision rounds to tens,
/// hundreds, ... (1000PEPEUSDT-style lot sizes).
pub fn round_to_precision(value: f64, precision: i32) -> f64 {
    let factor = 10f64.powi(precision);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SymbolConfig;

    fn sizer(precision: i32) -> PositionSizer {
        let mut symbols = HashMap::new();
        symbols.insert(
            "SOLUSDT".to_string(),
            SymbolConfig { qty_precision: precision, atr_band: (0.4, 1.2) },
        );
        PositionSizer::new(
            RiskConfig { risk_per_trade: 10.0, leverage: 10.0 },
            &symbols,
        )
    }

    #[test]
    fn sizes_risk_times_leverage_over_entry() {
        // 10 USDT risk at 10x over a 100 entry is exactly 1.000.
        let quantity = sizer(3).size("SOLUSDT", 100.0).unwrap();
        assert_eq!(quantity, 1.000);
    }

    #[test]
    fn negative_precision_rounds_to_tens() {
        // 10 * 10 / 0.0042 = 23809.52... -> 23810 at -1.
        let quantity = sizer(-1).size("SOLUSDT", 0.0042).unwrap();
        assert_eq!(quantity, 23810.0);
    }

    #[test]
    fn missing_precision_is_an_error() {
        let result = sizer(3).size("DOGEUSDT", 0.1);
        assert!(matches!(result, Err(SizingError::PrecisionMissing { .. })));
    }

    #[test]
    fn zero_after_rounding_is_rejected() {
        // 100 / 300000 rounds to 0.000 at precision 3.
        let result = sizer(3).size("SOLUSDT", 300_000.0);
        assert!(matches!(result, Err(SizingError::InvalidQuantity { .. })));
    }
}
