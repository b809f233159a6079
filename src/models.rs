use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    Call,
    Put,
}

/// Directional signal carried on a candidate: calls map to Buy, puts to Sell,
/// unless the caller supplies an explicit hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Signal {
    Buy,
    Sell,
}

impl Signal {
    pub fn from_option_type(option_type: OptionType) -> Self {
        match option_type {
            OptionType::Call => Signal::Buy,
            OptionType::Put => Signal::Sell,
        }
    }
}

/// One observed option contract at one capture time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionContractQuote {
    pub ticker: String,
    pub contract_id: String,
    pub option_type: OptionType,
    pub expiration_date: NaiveDate,
    pub strike: f64,
    pub last_price: Option<f64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub volume: Option<i64>,
    pub open_interest: Option<i64>,
    pub implied_volatility: Option<f64>,
    pub delta: Option<f64>,
    pub theta: Option<f64>,
    pub vega: Option<f64>,
    pub gamma: Option<f64>,
    pub underlying_price: Option<f64>,
    pub capture_date: NaiveDate,
}

impl OptionContractQuote {
    /// Mid price: (bid+ask)/2 when both sides are positive, else last traded
    /// price when positive, else undefined.
    pub fn mid_price(&self) -> Option<f64> {
        match (self.bid, self.ask) {
            (Some(bid), Some(ask)) if bid > 0.0 && ask > 0.0 => Some((bid + ask) / 2.0),
            _ => self.last_price.filter(|p| *p > 0.0),
        }
    }

    /// Calendar days from capture to expiration.
    pub fn dte(&self) -> i64 {
        (self.expiration_date - self.capture_date).num_days()
    }

    pub fn volume_nz(&self) -> i64 {
        self.volume.unwrap_or(0)
    }

    pub fn open_interest_nz(&self) -> i64 {
        self.open_interest.unwrap_or(0)
    }
}

/// All contracts observed for one ticker at one capture date. Immutable once
/// captured; the latest snapshot for a ticker is the one with the maximum
/// capture_date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainSnapshot {
    pub ticker: String,
    pub capture_date: NaiveDate,
    pub contracts: Vec<OptionContractQuote>,
}

/// Daily OHLCV bar for one underlying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub ticker: String,
    pub date: NaiveDate,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: f64,
    pub volume: Option<i64>,
}

/// Contract-level implied-vs-realized volatility classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolComparison {
    Cheap,
    Expensive,
    FairlyPriced,
}

/// One ranked trade candidate. A full batch of these is produced per
/// selection run and wholly replaces the prior batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub selection_run_id: String,
    pub ticker: String,
    pub signal: Signal,

    // Carried-through contract fields
    pub contract_id: String,
    pub option_type: OptionType,
    pub expiration_date: NaiveDate,
    pub strike: f64,
    pub last_price: Option<f64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub volume: i64,
    pub open_interest: i64,
    pub implied_volatility: f64,
    pub delta: f64,
    pub theta: Option<f64>,
    pub vega: Option<f64>,
    pub gamma: Option<f64>,
    pub underlying_price: f64,
    pub capture_date: NaiveDate,

    // Derived trade metrics
    pub mid_price: f64,
    pub spread_pct: f64,
    pub dte: i64,
    pub moneyness: f64,
    pub expected_move_pct: f64,
    pub breakeven_distance_pct: f64,
    pub vol_comparison: Option<VolComparison>,

    pub composite_score: f64,
    /// 1-based, unique within the (ticker, option_type) partition.
    pub rank: u32,
}

/// Per (ticker, capture_date) structural metrics derived from one snapshot.
/// Purely computed, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketStructureSnapshot {
    pub ticker: String,
    pub capture_date: NaiveDate,
    pub call_wall: Option<f64>,
    pub put_wall: Option<f64>,
    pub max_pain: Option<f64>,
    pub put_call_volume_ratio: Option<f64>,
    pub put_call_oi_ratio: Option<f64>,
    pub net_call_gamma: Option<f64>,
    pub net_put_gamma: Option<f64>,
    pub total_gex: Option<f64>,
    pub iv_avg_atm: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IvSignal {
    High,
    Low,
    Unknown,
}

/// One feature row per (ticker, date). Upserted into a historical store:
/// fields a newer computation produced overwrite, everything else is left
/// untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechnicalFeatureRecord {
    pub ticker: String,
    pub date: NaiveDate,

    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<i64>,

    pub rsi_14: Option<f64>,
    pub macd: Option<f64>,
    pub sma_50: Option<f64>,
    pub sma_200: Option<f64>,
    pub hv_30: Option<f64>,
    pub iv_avg_atm: Option<f64>,
    pub iv_signal: IvSignal,

    pub close_30d_delta_pct: Option<f64>,
    pub rsi_30d_delta: Option<f64>,
    pub macd_30d_delta: Option<f64>,
    pub close_90d_delta_pct: Option<f64>,
    pub rsi_90d_delta: Option<f64>,
    pub macd_90d_delta: Option<f64>,

    pub volume_surge_pct: Option<f64>,
}

impl TechnicalFeatureRecord {
    /// Empty record for a key; every metric field starts undefined.
    pub fn new(ticker: String, date: NaiveDate) -> Self {
        Self {
            ticker,
            date,
            open: None,
            high: None,
            low: None,
            close: None,
            volume: None,
            rsi_14: None,
            macd: None,
            sma_50: None,
            sma_200: None,
            hv_30: None,
            iv_avg_atm: None,
            iv_signal: IvSignal::Unknown,
            close_30d_delta_pct: None,
            rsi_30d_delta: None,
            macd_30d_delta: None,
            close_90d_delta_pct: None,
            rsi_90d_delta: None,
            macd_90d_delta: None,
            volume_surge_pct: None,
        }
    }

    /// Field-wise merge: values the newer computation produced overwrite,
    /// absent values never null out what is already stored.
    pub fn merge_from(&mut self, newer: &TechnicalFeatureRecord) {
        macro_rules! take_if_some {
            ($field:ident) => {
                if newer.$field.is_some() {
                    self.$field = newer.$field;
                }
            };
        }
        take_if_some!(open);
        take_if_some!(high);
        take_if_some!(low);
        take_if_some!(close);
        take_if_some!(volume);
        take_if_some!(rsi_14);
        take_if_some!(macd);
        take_if_some!(sma_50);
        take_if_some!(sma_200);
        take_if_some!(hv_30);
        take_if_some!(iv_avg_atm);
        take_if_some!(close_30d_delta_pct);
        take_if_some!(rsi_30d_delta);
        take_if_some!(macd_30d_delta);
        take_if_some!(close_90d_delta_pct);
        take_if_some!(rsi_90d_delta);
        take_if_some!(macd_90d_delta);
        take_if_some!(volume_surge_pct);
        // Unknown means "not computed this run", not "reset to unknown".
        if newer.iv_signal != IvSignal::Unknown {
            self.iv_signal = newer.iv_signal;
        }
    }
}
