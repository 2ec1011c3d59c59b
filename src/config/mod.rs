// src/config/mod.rs
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::strategy::StrategyConfig;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub general: GeneralConfig,
    pub risk: RiskConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
    pub exchange: ExchangeSettings,
    pub symbols: HashMap<String, SymbolConfig>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Decision interval; cycles are aligned to wall-clock multiples of this.
    pub interval_minutes: u64,
    #[serde(default = "default_candle_limit")]
    pub candle_limit: usize,
    /// Seconds past the interval boundary before a cycle starts, so the
    /// exchange has closed the candle we are about to fetch.
    #[serde(default = "default_cycle_buffer")]
    pub cycle_buffer_secs: u64,
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,
    /// Run a full reconcile pass every N cycles (always on startup).
    #[serde(default = "default_reconcile_every")]
    pub reconcile_every: u64,
}

fn default_candle_limit() -> usize {
    500
}

fn default_cycle_buffer() -> u64 {
    5
}

fn default_fetch_concurrency() -> usize {
    4
}

fn default_reconcile_every() -> u64 {
    4
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Fixed risk per trade in quote currency (USDT).
    pub risk_per_trade: f64,
    pub leverage: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExchangeSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub testnet: bool,
    #[serde(default = "default_recv_window")]
    pub recv_window_ms: u64,
}

fn default_base_url() -> String {
    "https://api.bybit.com".to_string()
}

fn default_recv_window() -> u64 {
    5000
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SymbolConfig {
    /// Decimal places for order quantity. Negative values round to tens,
    /// hundreds, ... (e.g. 1000PEPEUSDT uses -2).
    pub qty_precision: i32,
    /// Inclusive-exclusive ATR% eligibility band (min, max).
    pub atr_band: (f64, f64),
}

/// API credentials, loaded from the environment rather than the config file.
#[derive(Clone, Debug)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
}

impl Credentials {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let api_key = std::env::var("BYBIT_API_KEY")
            .map_err(|_| anyhow::anyhow!("BYBIT_API_KEY environment variable not set"))?;
        let api_secret = std::env::var("BYBIT_API_SECRET")
            .map_err(|_| anyhow::anyhow!("BYBIT_API_SECRET environment variable not set"))?;

        Ok(Self { api_key, api_secret })
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file {}", path.as_ref().display()))?;
        let config: Config = toml::from_str(&contents).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Misconfiguration here aborts startup; sizing must never fall back to
    /// a silent default precision.
    pub fn validate(&self) -> Result<()> {
        if self.symbols.is_empty() {
            anyhow::bail!("No symbols configured");
        }
        if self.general.interval_minutes == 0 {
            anyhow::bail!("interval_minutes must be positive");
        }
        if self.risk.risk_per_trade <= 0.0 {
            anyhow::bail!("risk_per_trade must be positive");
        }
        if self.risk.leverage <= 0.0 {
            anyhow::bail!("leverage must be positive");
        }
        for (symbol, cfg) in &self.symbols {
            let (lo, hi) = cfg.atr_band;
            if lo < 0.0 || hi <= lo {
                anyhow::bail!("{}: invalid ATR band ({}, {})", symbol, lo, hi);
            }
        }
        Ok(())
    }

    pub fn symbol(&self, symbol: &str) -> Option<&SymbolConfig> {
        self.symbols.get(symbol)
    }

    pub fn symbol_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.symbols.keys().cloned().collect();
        names.sort();
        names
    }
}
