use serde::{Deserialize, Serialize};

// -----------------------------------------------
// CANDIDATE SELECTION THRESHOLDS
// -----------------------------------------------

/// Every filter and scoring knob of the candidate selector, spelled out.
/// Defaults are the tightened production window: DTE tilted toward better
/// expectancy for long options, moneyness kept close to the money, and a
/// price floor to avoid micro-premiums with punitive percentage spreads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorConfig {
    pub min_dte: i64,
    pub max_dte: i64,
    /// Moneyness is oriented per side: strike/spot for calls, spot/strike
    /// for puts, so both read as "how far out of the money in the trade's
    /// favorable direction".
    pub min_moneyness: f64,
    pub max_moneyness: f64,
    pub min_open_interest: i64,
    pub min_volume: i64,
    /// (ask - bid) / mid
    pub max_spread_pct: f64,
    pub min_mid_price: f64,
    pub min_abs_delta: f64,
    pub max_abs_delta: f64,
    /// Discount applied to the statistical expected move, in (0, 1].
    pub expected_move_haircut: f64,
    /// None ranks everything; Some(n) keeps the top n per
    /// (ticker, option_type) partition.
    pub max_candidates_per_partition: Option<usize>,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            min_dte: 10,
            max_dte: 60,
            min_moneyness: 1.02,
            max_moneyness: 1.10,
            min_open_interest: 300,
            min_volume: 0,
            max_spread_pct: 0.12,
            min_mid_price: 0.50,
            min_abs_delta: 0.25,
            max_abs_delta: 0.45,
            expected_move_haircut: 0.85,
            max_candidates_per_partition: None,
        }
    }
}

// -----------------------------------------------
// MARKET STRUCTURE THRESHOLDS
// -----------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureConfig {
    /// DTE window for the ATM implied-volatility average.
    pub atm_dte_min: i64,
    pub atm_dte_max: i64,
    /// |strike - spot| / spot band for "at the money".
    pub atm_moneyness_band: f64,
    /// Strikes must carry more open interest than this to be max-pain
    /// candidates; falls back to all strikes when none qualify.
    pub max_pain_oi_floor: i64,
}

impl Default for StructureConfig {
    fn default() -> Self {
        Self {
            atm_dte_min: 7,
            atm_dte_max: 90,
            atm_moneyness_band: 0.05,
            max_pain_oi_floor: 100,
        }
    }
}

// -----------------------------------------------
// TECHNICAL INDICATOR WINDOWS
// -----------------------------------------------

pub const RSI_LEN: usize = 14;
pub const MACD_FAST: usize = 12;
pub const MACD_SLOW: usize = 26;
pub const SMA_FAST: usize = 50;
pub const SMA_SLOW: usize = 200;
pub const HV_WINDOW: usize = 30;
pub const VOLUME_AVG_WINDOW: usize = 30;
/// Annualization factor for daily realized volatility.
pub const TRADING_DAYS: f64 = 252.0;
/// iv_signal flips to "high" once ATM IV exceeds realized vol by this gap.
pub const IV_SIGNAL_GAP: f64 = 0.10;
/// Contract IV vs HV ratio bounds for cheap/expensive classification.
pub const VOL_EXPENSIVE_RATIO: f64 = 1.25;
pub const VOL_CHEAP_RATIO: f64 = 0.80;

/// Trailing price-history window fetched per ticker. Wide enough for the
/// 200-day SMA plus the 90-day delta lookback on qualifying rows.
pub const PRICE_LOOKBACK_DAYS: i64 = 400;

// -----------------------------------------------
// UPSERT RETRY CONFIG
// -----------------------------------------------

pub const RETRY_BASE_DELAY_MS: u64 = 100;
pub const RETRY_FACTOR: u64 = 2;
pub const RETRY_MAX_DELAY_SECS: u64 = 3;
pub const RETRY_MAX_ATTEMPTS: usize = 5;

// -----------------------------------------------
// CONCURRENCY LIMITS
// -----------------------------------------------

pub const DEFAULT_MAX_CONCURRENT: usize = 10;
/// Tickers per chunk for the feature pipeline; price-history reads batch
/// efficiently at this granularity.
pub const FEATURE_CHUNK_SIZE: usize = 25;

// -----------------------------------------------
// RUNTIME CONFIGURATION
// -----------------------------------------------

/// Get the execution mode from environment or default to batch
pub fn get_execution_mode() -> String {
    std::env::var("ANALYZER_MODE").unwrap_or_else(|_| "batch".to_string())
}

/// Get ticker for single mode execution
pub fn get_single_ticker() -> String {
    std::env::var("ANALYZER_TICKER").unwrap_or_else(|_| "AAPL".to_string())
}

/// Directory holding chain/price/universe input files and run outputs
pub fn get_data_dir() -> String {
    std::env::var("ANALYZER_DATA_DIR").unwrap_or_else(|_| "./data".to_string())
}

/// Get worker-pool width, with environment override
pub fn get_max_concurrent() -> usize {
    if let Ok(val) = std::env::var("ANALYZER_MAX_CONCURRENT") {
        if let Ok(num) = val.parse::<usize>() {
            return num.clamp(1, 50);
        }
    }
    DEFAULT_MAX_CONCURRENT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_selector_window() {
        let cfg = SelectorConfig::default();
        assert!(cfg.min_dte < cfg.max_dte);
        assert!(cfg.min_moneyness >= 1.0);
        assert!(cfg.expected_move_haircut > 0.0 && cfg.expected_move_haircut <= 1.0);
        assert!(cfg.max_candidates_per_partition.is_none());
    }
}
