use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;

use chain_analyzer::{
    config, logging, market_structure, runner, selector, technicals, ChainSnapshot,
    MemoryCandidateStore, MemoryChainStore, MemoryFeatureStore, MemoryPriceStore, PriceBar,
    SelectorConfig, StructureConfig, TickerContext,
};
use chain_analyzer::stores::{CandidateStore, ChainStore, PriceStore};

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Ticker universe from tickers.txt, falling back to every ticker that has
/// a chain snapshot.
fn load_universe(data_dir: &Path, chains: &[ChainSnapshot]) -> Vec<String> {
    let path = data_dir.join("tickers.txt");
    if let Ok(text) = std::fs::read_to_string(&path) {
        let tickers: Vec<String> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(str::to_string)
            .collect();
        if !tickers.is_empty() {
            return tickers;
        }
    }
    let mut tickers: Vec<String> = chains.iter().map(|c| c.ticker.clone()).collect();
    tickers.sort();
    tickers.dedup();
    tickers
}

struct LoadedStores {
    chains: Arc<MemoryChainStore>,
    prices: Arc<MemoryPriceStore>,
    universe: Vec<String>,
}

fn load_stores(data_dir: &Path) -> Result<LoadedStores> {
    let snapshots: Vec<ChainSnapshot> = load_json(&data_dir.join("chain_snapshots.json"))?;
    let bars: Vec<PriceBar> = load_json(&data_dir.join("price_history.json"))?;
    let universe = load_universe(data_dir, &snapshots);

    println!(
        "{} Loaded {} snapshots, {} price bars, {} tickers",
        "✓".green(),
        snapshots.len(),
        bars.len(),
        universe.len()
    );

    Ok(LoadedStores {
        chains: Arc::new(MemoryChainStore::from_snapshots(snapshots)),
        prices: Arc::new(MemoryPriceStore::from_bars(bars)),
        universe,
    })
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    std::fs::write(path, serde_json::to_string_pretty(value)?)
        .with_context(|| format!("Failed to write {}", path.display()))
}

/// Run selection plus the feature pipeline over the whole universe.
async fn run_batch(data_dir: PathBuf) -> Result<()> {
    println!("{}", "=".repeat(60).blue());
    println!("{}", "Chain Analyzer Batch Run".green().bold());
    println!("{}", "=".repeat(60).blue());
    println!();

    let stores = load_stores(&data_dir)?;
    let candidates_sink = Arc::new(MemoryCandidateStore::new());
    let features_sink = Arc::new(MemoryFeatureStore::new());
    let max_concurrent = config::get_max_concurrent();
    println!("{} Max concurrent tickers: {}", "ℹ".blue(), max_concurrent);
    println!();

    let start_time = std::time::Instant::now();

    println!("{}", "Step 1: Selecting trade candidates...".cyan());
    let report = runner::run_candidate_selection(
        stores.chains.clone(),
        stores.prices.clone(),
        candidates_sink.clone(),
        stores.universe.clone(),
        HashMap::new(),
        SelectorConfig::default(),
        max_concurrent,
    )
    .await?;

    println!(
        "{} {} candidates across {} tickers ({} skipped, {} failed)",
        "✓".green(),
        report.total_candidates(),
        report.selected.len(),
        report.skipped.len(),
        report.failed.len()
    );
    for (ticker, reason) in report.skipped.iter().take(10) {
        println!("  {} {} → {}", "⚠".yellow(), ticker.yellow(), reason);
    }
    if report.skipped.len() > 10 {
        println!("  ... and {} more", report.skipped.len() - 10);
    }
    println!();

    println!("{}", "Step 2: Market structure + technical features...".cyan());
    let (feature_report, structures) = runner::run_feature_pipeline(
        stores.chains.clone(),
        stores.prices.clone(),
        features_sink.clone(),
        stores.universe.clone(),
        StructureConfig::default(),
    )
    .await?;
    println!(
        "{} {} tickers processed, {} structure snapshots ({} skipped)",
        "✓".green(),
        feature_report.processed.len(),
        structures.len(),
        feature_report.skipped.len()
    );
    println!();

    let elapsed = start_time.elapsed();

    // Persist run outputs next to the inputs.
    let batch = candidates_sink.latest_batch().await?;
    let candidates_path = data_dir.join(format!("candidates_{}.json", report.run_id));
    write_json(&candidates_path, &batch)?;
    write_json(&data_dir.join("market_structure.json"), &structures)?;
    write_json(&data_dir.join("features.json"), &features_sink.dump().await)?;

    println!("{}", "=".repeat(60).blue());
    println!("{}", "Summary".cyan().bold());
    println!("{}", "=".repeat(60).blue());
    println!("{} Run id: {}", "✓".green(), report.run_id.yellow());
    println!("{} Candidates written: {}", "✓".green(), batch.len());
    println!("{} Wrote {}", "✓".green(), candidates_path.display());
    println!("{} Time taken: {:.2}s", "⏱".yellow(), elapsed.as_secs_f64());
    println!();
    println!("{}", "Done!".green().bold());

    Ok(())
}

/// Detailed printout for one ticker.
async fn run_single(data_dir: PathBuf, ticker: &str) -> Result<()> {
    println!("{}", "=".repeat(60).blue());
    println!("{}", "Chain Analyzer Single Ticker".green().bold());
    println!("{}", "=".repeat(60).blue());
    println!();

    let stores = load_stores(&data_dir)?;

    let Some(snapshot) = stores.chains.latest_snapshot(ticker).await? else {
        println!("{} No chain snapshot for {}", "✗".red(), ticker.yellow());
        return Ok(());
    };
    println!(
        "{} {}: {} contracts captured {}",
        "✓".green(),
        ticker.yellow(),
        snapshot.contracts.len(),
        snapshot.capture_date
    );

    let history = stores
        .prices
        .fetch_history(ticker, config::PRICE_LOOKBACK_DAYS)
        .await?;
    let spot = snapshot
        .contracts
        .iter()
        .filter_map(|c| c.underlying_price)
        .find(|p| *p > 0.0)
        .or_else(|| history.last().map(|b| b.close));

    if let Some(spot) = spot {
        let structure = market_structure::analyze(&snapshot, spot, &StructureConfig::default());
        println!();
        println!("{}", "Market structure:".cyan());
        println!("{}", serde_json::to_string_pretty(&structure)?);

        if let Some(features) =
            technicals::compute_features(ticker, &history, structure.iv_avg_atm)
        {
            println!();
            println!("{}", "Technical features:".cyan());
            println!("{}", serde_json::to_string_pretty(&features)?);
        }

        let ctx = TickerContext {
            spot_fallback: Some(spot),
            ..Default::default()
        };
        let run_id = runner::new_run_id();
        let candidates =
            selector::select_candidates(&run_id, &snapshot, &ctx, &SelectorConfig::default());
        println!();
        println!("{} {} ranked candidates", "ℹ".blue(), candidates.len());
        println!("{}", serde_json::to_string_pretty(&candidates)?);
    } else {
        println!("{} No usable spot price for {}", "✗".red(), ticker.yellow());
    }

    println!("{}", "=".repeat(60).blue());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logging();

    let mode = config::get_execution_mode();
    let data_dir = PathBuf::from(config::get_data_dir());

    match mode.as_str() {
        "batch" => run_batch(data_dir).await?,
        "single" => {
            let ticker = config::get_single_ticker();
            run_single(data_dir, &ticker).await?;
        }
        _ => {
            eprintln!("Invalid mode '{}'. Use 'batch' or 'single'", mode);
            eprintln!("Set ANALYZER_MODE environment variable to control execution mode");
            eprintln!("Examples:");
            eprintln!("  ANALYZER_MODE=batch ANALYZER_DATA_DIR=./data cargo run");
            eprintln!("  ANALYZER_MODE=single ANALYZER_TICKER=AAPL cargo run");
            std::process::exit(1);
        }
    }

    Ok(())
}
