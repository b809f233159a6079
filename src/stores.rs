use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::models::{CandidateRecord, ChainSnapshot, PriceBar, TechnicalFeatureRecord};

// -----------------------------------------------
// STORE CONTRACTS
// -----------------------------------------------

/// Read side of the option-chain snapshot store, keyed by
/// (ticker, capture_date).
#[async_trait]
pub trait ChainStore: Send + Sync {
    async fn latest_capture_date(&self, ticker: &str) -> Result<Option<NaiveDate>, StoreError>;

    async fn fetch_snapshot(
        &self,
        ticker: &str,
        capture_date: NaiveDate,
    ) -> Result<Option<ChainSnapshot>, StoreError>;

    /// The snapshot with the maximum capture date for a ticker.
    async fn latest_snapshot(&self, ticker: &str) -> Result<Option<ChainSnapshot>, StoreError> {
        match self.latest_capture_date(ticker).await? {
            Some(date) => self.fetch_snapshot(ticker, date).await,
            None => Ok(None),
        }
    }
}

/// Read side of the daily price-history store, keyed by (ticker, date).
#[async_trait]
pub trait PriceStore: Send + Sync {
    /// Ascending trailing window, measured back from the ticker's most
    /// recent bar.
    async fn fetch_history(
        &self,
        ticker: &str,
        lookback_days: i64,
    ) -> Result<Vec<PriceBar>, StoreError>;

    async fn latest_close(&self, ticker: &str) -> Result<Option<f64>, StoreError>;
}

/// Write side for selection output. One run's batch wholly replaces the
/// prior batch: implementations stage under the fresh run id and swap, so
/// readers never observe a half-written or empty set.
#[async_trait]
pub trait CandidateStore: Send + Sync {
    async fn replace_batch(
        &self,
        run_id: &str,
        records: Vec<CandidateRecord>,
    ) -> Result<(), StoreError>;

    /// The latest complete batch, as downstream consumers see it.
    async fn latest_batch(&self) -> Result<Vec<CandidateRecord>, StoreError>;
}

/// Write side for the historical feature table. Keyed (ticker, date)
/// insert-or-merge; repeated writes for the same key must be tolerated.
#[async_trait]
pub trait FeatureStore: Send + Sync {
    async fn upsert(&self, records: Vec<TechnicalFeatureRecord>) -> Result<(), StoreError>;

    async fn fetch(
        &self,
        ticker: &str,
        date: NaiveDate,
    ) -> Result<Option<TechnicalFeatureRecord>, StoreError>;
}

// -----------------------------------------------
// IN-MEMORY IMPLEMENTATIONS
// -----------------------------------------------

/// Snapshots held in memory, grouped by ticker.
#[derive(Default)]
pub struct MemoryChainStore {
    snapshots: RwLock<HashMap<String, Vec<ChainSnapshot>>>,
}

impl MemoryChainStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshots(snapshots: Vec<ChainSnapshot>) -> Self {
        let mut map: HashMap<String, Vec<ChainSnapshot>> = HashMap::new();
        for snap in snapshots {
            map.entry(snap.ticker.clone()).or_default().push(snap);
        }
        Self {
            snapshots: RwLock::new(map),
        }
    }

    pub async fn insert(&self, snapshot: ChainSnapshot) {
        self.snapshots
            .write()
            .await
            .entry(snapshot.ticker.clone())
            .or_default()
            .push(snapshot);
    }
}

#[async_trait]
impl ChainStore for MemoryChainStore {
    async fn latest_capture_date(&self, ticker: &str) -> Result<Option<NaiveDate>, StoreError> {
        Ok(self
            .snapshots
            .read()
            .await
            .get(ticker)
            .and_then(|snaps| snaps.iter().map(|s| s.capture_date).max()))
    }

    async fn fetch_snapshot(
        &self,
        ticker: &str,
        capture_date: NaiveDate,
    ) -> Result<Option<ChainSnapshot>, StoreError> {
        Ok(self
            .snapshots
            .read()
            .await
            .get(ticker)
            .and_then(|snaps| snaps.iter().find(|s| s.capture_date == capture_date))
            .cloned())
    }
}

/// Daily bars held in memory, ascending per ticker.
#[derive(Default)]
pub struct MemoryPriceStore {
    bars: RwLock<HashMap<String, Vec<PriceBar>>>,
}

impl MemoryPriceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bars(bars: Vec<PriceBar>) -> Self {
        let mut map: HashMap<String, Vec<PriceBar>> = HashMap::new();
        for bar in bars {
            map.entry(bar.ticker.clone()).or_default().push(bar);
        }
        for series in map.values_mut() {
            series.sort_by_key(|b| b.date);
        }
        Self {
            bars: RwLock::new(map),
        }
    }
}

#[async_trait]
impl PriceStore for MemoryPriceStore {
    async fn fetch_history(
        &self,
        ticker: &str,
        lookback_days: i64,
    ) -> Result<Vec<PriceBar>, StoreError> {
        let bars = self.bars.read().await;
        let Some(series) = bars.get(ticker) else {
            return Ok(Vec::new());
        };
        let Some(end) = series.last().map(|b| b.date) else {
            return Ok(Vec::new());
        };
        let start = end - chrono::Duration::days(lookback_days);
        Ok(series.iter().filter(|b| b.date >= start).cloned().collect())
    }

    async fn latest_close(&self, ticker: &str) -> Result<Option<f64>, StoreError> {
        Ok(self
            .bars
            .read()
            .await
            .get(ticker)
            .and_then(|series| series.last())
            .map(|b| b.close))
    }
}

/// Candidate batches staged per run id with an atomic current-run pointer;
/// readers always see exactly one complete generation.
#[derive(Default)]
pub struct MemoryCandidateStore {
    generations: RwLock<HashMap<String, Vec<CandidateRecord>>>,
    current: RwLock<Option<String>>,
}

impl MemoryCandidateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CandidateStore for MemoryCandidateStore {
    async fn replace_batch(
        &self,
        run_id: &str,
        records: Vec<CandidateRecord>,
    ) -> Result<(), StoreError> {
        // Stage the new generation first, then swap the pointer and drop
        // the superseded one. There is no window where the store is empty.
        self.generations
            .write()
            .await
            .insert(run_id.to_string(), records);
        let mut current = self.current.write().await;
        let previous = current.replace(run_id.to_string());
        drop(current);
        if let Some(old_run) = previous {
            if old_run != run_id {
                self.generations.write().await.remove(&old_run);
            }
        }
        Ok(())
    }

    async fn latest_batch(&self) -> Result<Vec<CandidateRecord>, StoreError> {
        let current = self.current.read().await;
        let Some(run_id) = current.as_ref() else {
            return Ok(Vec::new());
        };
        Ok(self
            .generations
            .read()
            .await
            .get(run_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Historical feature rows keyed by (ticker, date) with field-wise merge.
#[derive(Default)]
pub struct MemoryFeatureStore {
    rows: RwLock<HashMap<(String, NaiveDate), TechnicalFeatureRecord>>,
}

impl MemoryFeatureStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored row, ordered by key; used when persisting a run's
    /// output to disk.
    pub async fn dump(&self) -> Vec<TechnicalFeatureRecord> {
        let rows = self.rows.read().await;
        let mut out: Vec<TechnicalFeatureRecord> = rows.values().cloned().collect();
        out.sort_by(|a, b| a.ticker.cmp(&b.ticker).then(a.date.cmp(&b.date)));
        out
    }
}

#[async_trait]
impl FeatureStore for MemoryFeatureStore {
    async fn upsert(&self, records: Vec<TechnicalFeatureRecord>) -> Result<(), StoreError> {
        let mut rows = self.rows.write().await;
        for record in records {
            let key = (record.ticker.clone(), record.date);
            match rows.get_mut(&key) {
                Some(existing) => existing.merge_from(&record),
                None => {
                    rows.insert(key, record);
                }
            }
        }
        Ok(())
    }

    async fn fetch(
        &self,
        ticker: &str,
        date: NaiveDate,
    ) -> Result<Option<TechnicalFeatureRecord>, StoreError> {
        Ok(self
            .rows
            .read()
            .await
            .get(&(ticker.to_string(), date))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IvSignal, OptionContractQuote, OptionType, Signal};

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn snapshot(ticker: &str, capture: NaiveDate) -> ChainSnapshot {
        ChainSnapshot {
            ticker: ticker.to_string(),
            capture_date: capture,
            contracts: vec![OptionContractQuote {
                ticker: ticker.to_string(),
                contract_id: format!("{ticker}-C100"),
                option_type: OptionType::Call,
                expiration_date: capture + chrono::Duration::days(30),
                strike: 100.0,
                last_price: Some(2.0),
                bid: Some(1.9),
                ask: Some(2.1),
                volume: Some(10),
                open_interest: Some(100),
                implied_volatility: Some(0.4),
                delta: Some(0.3),
                theta: Some(-0.02),
                vega: Some(0.1),
                gamma: Some(0.02),
                underlying_price: Some(100.0),
                capture_date: capture,
            }],
        }
    }

    fn candidate(run_id: &str, ticker: &str) -> CandidateRecord {
        CandidateRecord {
            selection_run_id: run_id.to_string(),
            ticker: ticker.to_string(),
            signal: Signal::Buy,
            contract_id: format!("{ticker}-C100"),
            option_type: OptionType::Call,
            expiration_date: date(30),
            strike: 100.0,
            last_price: Some(2.0),
            bid: Some(1.9),
            ask: Some(2.1),
            volume: 10,
            open_interest: 100,
            implied_volatility: 0.4,
            delta: 0.3,
            theta: Some(-0.02),
            vega: Some(0.1),
            gamma: Some(0.02),
            underlying_price: 100.0,
            capture_date: date(1),
            mid_price: 2.0,
            spread_pct: 0.1,
            dte: 29,
            moneyness: 1.05,
            expected_move_pct: 9.0,
            breakeven_distance_pct: 7.0,
            vol_comparison: None,
            composite_score: 0.5,
            rank: 1,
        }
    }

    #[tokio::test]
    async fn test_latest_snapshot_picks_max_capture_date() {
        let store = MemoryChainStore::from_snapshots(vec![
            snapshot("AAPL", date(1)),
            snapshot("AAPL", date(5)),
            snapshot("AAPL", date(3)),
        ]);
        let latest = store.latest_snapshot("AAPL").await.unwrap().unwrap();
        assert_eq!(latest.capture_date, date(5));
        assert!(store.latest_snapshot("MSFT").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replace_batch_swaps_generations() {
        let store = MemoryCandidateStore::new();
        store
            .replace_batch("run-1", vec![candidate("run-1", "AAPL"), candidate("run-1", "MSFT")])
            .await
            .unwrap();
        assert_eq!(store.latest_batch().await.unwrap().len(), 2);

        store
            .replace_batch("run-2", vec![candidate("run-2", "AAPL")])
            .await
            .unwrap();
        let batch = store.latest_batch().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].selection_run_id, "run-2");
    }

    #[tokio::test]
    async fn test_feature_upsert_is_an_idempotent_merge() {
        let store = MemoryFeatureStore::new();
        let mut first = TechnicalFeatureRecord::new("AAPL".to_string(), date(1));
        first.rsi_14 = Some(55.0);
        first.iv_signal = IvSignal::Low;
        store.upsert(vec![first.clone()]).await.unwrap();
        store.upsert(vec![first]).await.unwrap();

        let mut second = TechnicalFeatureRecord::new("AAPL".to_string(), date(1));
        second.hv_30 = Some(0.22);
        store.upsert(vec![second]).await.unwrap();

        let merged = store.fetch("AAPL", date(1)).await.unwrap().unwrap();
        assert_eq!(merged.rsi_14, Some(55.0));
        assert_eq!(merged.hv_30, Some(0.22));
        assert_eq!(merged.iv_signal, IvSignal::Low);
    }
}
