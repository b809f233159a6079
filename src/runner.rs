use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use futures::future::join_all;
use rand::Rng;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::{info, warn};

use crate::config::{
    FEATURE_CHUNK_SIZE, PRICE_LOOKBACK_DAYS, RETRY_BASE_DELAY_MS, RETRY_FACTOR,
    RETRY_MAX_ATTEMPTS, RETRY_MAX_DELAY_SECS, SelectorConfig, StructureConfig,
};
use crate::error::{AnalyzerError, SkipReason, StoreError};
use crate::market_structure;
use crate::models::{CandidateRecord, ChainSnapshot, MarketStructureSnapshot};
use crate::selector::{self, TickerContext};
use crate::stores::{CandidateStore, ChainStore, FeatureStore, PriceStore};
use crate::technicals;

/// Fresh identifier for one selection run; candidates are staged under it
/// before the batch pointer swaps.
pub fn new_run_id() -> String {
    let stamp = Local::now().format("%Y%m%dT%H%M%S");
    let suffix: u16 = rand::thread_rng().r#gen();
    format!("sel-{stamp}-{suffix:04x}")
}

/// Per-ticker outcomes of one selection run. Skips are normal; failures are
/// isolated task panics. Either way the committed batch stays internally
/// consistent.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub run_id: String,
    pub selected: Vec<(String, usize)>,
    pub skipped: Vec<(String, SkipReason)>,
    pub failed: Vec<(String, String)>,
}

impl BatchReport {
    pub fn total_candidates(&self) -> usize {
        self.selected.iter().map(|(_, n)| n).sum()
    }
}

/// Per-ticker outcomes of one feature run.
#[derive(Debug, Clone, Serialize)]
pub struct FeatureReport {
    pub processed: Vec<String>,
    pub skipped: Vec<(String, SkipReason)>,
    pub failed: Vec<(String, String)>,
}

enum TickerYield {
    Selected(Vec<CandidateRecord>),
    Skipped(SkipReason),
}

/// Select candidates for every ticker in the universe and commit the batch
/// as one generation. A ticker without data is skipped and logged; a store
/// outage aborts the run before anything is written, leaving the previous
/// batch authoritative.
pub async fn run_candidate_selection(
    chains: Arc<dyn ChainStore>,
    prices: Arc<dyn PriceStore>,
    sink: Arc<dyn CandidateStore>,
    tickers: Vec<String>,
    mut contexts: HashMap<String, TickerContext>,
    cfg: SelectorConfig,
    max_concurrent: usize,
) -> Result<BatchReport, AnalyzerError> {
    let run_id = new_run_id();
    let cfg = Arc::new(cfg);
    let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let mut handles = Vec::with_capacity(tickers.len());

    for ticker in tickers {
        let chains = Arc::clone(&chains);
        let prices = Arc::clone(&prices);
        let cfg = Arc::clone(&cfg);
        let sem = Arc::clone(&semaphore);
        let run_id = run_id.clone();
        let name = ticker.clone();
        let mut ctx = contexts.remove(&ticker).unwrap_or_default();

        let handle = tokio::spawn(async move {
            let _permit = sem
                .acquire_owned()
                .await
                .map_err(|e| StoreError::Unavailable(format!("semaphore closed: {e}")))?;

            let Some(snapshot) = chains.latest_snapshot(&ticker).await? else {
                warn!(ticker = %ticker, "no chain snapshot, skipping");
                return Ok((ticker, TickerYield::Skipped(SkipReason::NoSnapshot)));
            };
            if snapshot.contracts.is_empty() {
                warn!(ticker = %ticker, "chain snapshot is empty, skipping");
                return Ok((ticker, TickerYield::Skipped(SkipReason::EmptyChain)));
            }

            if ctx.spot_fallback.is_none() {
                ctx.spot_fallback = prices.latest_close(&ticker).await?;
            }

            let candidates = selector::select_candidates(&run_id, &snapshot, &ctx, &cfg);
            Ok::<_, StoreError>((ticker, TickerYield::Selected(candidates)))
        });
        handles.push((name, handle));
    }

    let mut report = BatchReport {
        run_id: run_id.clone(),
        selected: Vec::new(),
        skipped: Vec::new(),
        failed: Vec::new(),
    };
    let mut batch: Vec<CandidateRecord> = Vec::new();

    for (name, handle) in handles {
        match handle.await {
            Ok(Ok((ticker, TickerYield::Selected(candidates)))) => {
                report.selected.push((ticker, candidates.len()));
                batch.extend(candidates);
            }
            Ok(Ok((ticker, TickerYield::Skipped(reason)))) => {
                report.skipped.push((ticker, reason));
            }
            // Store outage is the one condition that kills the whole run:
            // nothing is committed, the previous batch stays visible.
            Ok(Err(err)) => return Err(AnalyzerError::Store(err)),
            Err(join_err) => {
                warn!(ticker = %name, error = %join_err, "selection task failed");
                report.failed.push((name, join_err.to_string()));
            }
        }
    }

    sink.replace_batch(&run_id, batch).await?;
    info!(
        run_id = %run_id,
        candidates = report.total_candidates(),
        tickers = report.selected.len(),
        skipped = report.skipped.len(),
        "selection batch committed"
    );
    Ok(report)
}

/// Derive market structure and technical features for every ticker,
/// upserting feature rows keyed by (ticker, date). Structure snapshots are
/// returned in-process; they carry no storage contract of their own.
pub async fn run_feature_pipeline(
    chains: Arc<dyn ChainStore>,
    prices: Arc<dyn PriceStore>,
    sink: Arc<dyn FeatureStore>,
    tickers: Vec<String>,
    cfg: StructureConfig,
) -> Result<(FeatureReport, Vec<MarketStructureSnapshot>), AnalyzerError> {
    let cfg = Arc::new(cfg);
    let mut report = FeatureReport {
        processed: Vec::new(),
        skipped: Vec::new(),
        failed: Vec::new(),
    };
    let mut structures = Vec::new();

    // Price-history reads batch efficiently, so work proceeds a chunk of
    // tickers at a time rather than one task per ticker.
    for chunk in tickers.chunks(FEATURE_CHUNK_SIZE) {
        let names: Vec<String> = chunk.to_vec();
        let handles: Vec<_> = chunk
            .iter()
            .cloned()
            .map(|ticker| {
                let chains = Arc::clone(&chains);
                let prices = Arc::clone(&prices);
                let sink = Arc::clone(&sink);
                let cfg = Arc::clone(&cfg);
                tokio::spawn(async move { process_feature_ticker(ticker, chains, prices, sink, cfg).await })
            })
            .collect();

        for (name, handle) in names.into_iter().zip(join_all(handles).await) {
            match handle {
                Ok(Ok((ticker, structure, None))) => {
                    report.processed.push(ticker);
                    structures.extend(structure);
                }
                Ok(Ok((ticker, structure, Some(reason)))) => {
                    report.skipped.push((ticker, reason));
                    structures.extend(structure);
                }
                Ok(Err(err)) => return Err(AnalyzerError::Store(err)),
                Err(join_err) => {
                    warn!(ticker = %name, error = %join_err, "feature task failed");
                    report.failed.push((name, join_err.to_string()));
                }
            }
        }
    }

    info!(
        processed = report.processed.len(),
        skipped = report.skipped.len(),
        structures = structures.len(),
        "feature pipeline finished"
    );
    Ok((report, structures))
}

async fn process_feature_ticker(
    ticker: String,
    chains: Arc<dyn ChainStore>,
    prices: Arc<dyn PriceStore>,
    sink: Arc<dyn FeatureStore>,
    cfg: Arc<StructureConfig>,
) -> Result<(String, Option<MarketStructureSnapshot>, Option<SkipReason>), StoreError> {
    let history = prices.fetch_history(&ticker, PRICE_LOOKBACK_DAYS).await?;
    let snapshot = chains.latest_snapshot(&ticker).await?;

    let spot = snapshot
        .as_ref()
        .and_then(spot_from_snapshot)
        .or_else(|| history.last().map(|b| b.close))
        .filter(|s| *s > 0.0);

    let structure = match (&snapshot, spot) {
        (Some(snap), Some(spot)) => Some(market_structure::analyze(snap, spot, &cfg)),
        _ => None,
    };
    let iv_avg_atm = structure.as_ref().and_then(|s| s.iv_avg_atm);

    let Some(features) = technicals::compute_features(&ticker, &history, iv_avg_atm) else {
        warn!(ticker = %ticker, "no price history, skipping features");
        return Ok((ticker, structure, Some(SkipReason::NoPriceHistory)));
    };

    // Transient write conflicts back off and retry; anything else bubbles
    // up as a run-level store failure.
    RetryIf::spawn(
        upsert_backoff(),
        || sink.upsert(vec![features.clone()]),
        |err: &StoreError| matches!(err, StoreError::Conflict(_)),
    )
    .await?;

    Ok((ticker, structure, None))
}

fn spot_from_snapshot(snapshot: &ChainSnapshot) -> Option<f64> {
    snapshot
        .contracts
        .iter()
        .filter_map(|c| c.underlying_price)
        .find(|p| *p > 0.0)
}

fn upsert_backoff() -> impl Iterator<Item = Duration> {
    ExponentialBackoff::from_millis(RETRY_BASE_DELAY_MS)
        .factor(RETRY_FACTOR)
        .max_delay(Duration::from_secs(RETRY_MAX_DELAY_SECS))
        .map(jitter)
        .take(RETRY_MAX_ATTEMPTS)
}
