use crate::config::{SelectorConfig, VOL_CHEAP_RATIO, VOL_EXPENSIVE_RATIO};
use crate::models::{
    CandidateRecord, ChainSnapshot, OptionContractQuote, OptionType, Signal, VolComparison,
};
use tracing::debug;

/// Composite score weights: delta, inverse theta decay, liquidity,
/// IV-percentile complement, gamma.
const W_DELTA: f64 = 0.35;
const W_THETA: f64 = 0.25;
const W_LIQUIDITY: f64 = 0.20;
const W_IV_PCTL: f64 = 0.10;
const W_GAMMA: f64 = 0.10;

/// Spread penalty saturates at this width; anything wider is treated the same.
const SPREAD_PENALTY_CAP: f64 = 0.20;

/// Sub-score fallback when a partition cannot be normalized (single member,
/// or max == min).
const NEUTRAL_SUBSCORE: f64 = 0.5;

/// Per-ticker inputs supplied by the caller alongside the snapshot.
#[derive(Debug, Clone, Default)]
pub struct TickerContext {
    /// Latest known close, used when a quote carries no underlying price.
    pub spot_fallback: Option<f64>,
    /// IV percentile in [0, 1]; its complement enters the score when present.
    pub iv_percentile: Option<f64>,
    /// 30-day realized volatility, enabling the cheap/expensive IV tag.
    pub hv_30: Option<f64>,
    /// Externally supplied directional hint; overrides the call→Buy /
    /// put→Sell derivation.
    pub directional_hint: Option<Signal>,
}

/// A contract that cleared every filter gate, with its derived trade metrics.
struct Survivor<'a> {
    quote: &'a OptionContractQuote,
    spot: f64,
    mid_price: f64,
    spread_pct: f64,
    dte: i64,
    moneyness: f64,
    expected_move_pct: f64,
    breakeven_distance_pct: f64,
    abs_delta: f64,
    implied_volatility: f64,
}

/// Filter and score one snapshot, returning ranked candidates for both
/// option-type partitions. An empty result is a normal outcome.
pub fn select_candidates(
    run_id: &str,
    snapshot: &ChainSnapshot,
    ctx: &TickerContext,
    cfg: &SelectorConfig,
) -> Vec<CandidateRecord> {
    let survivors: Vec<Survivor<'_>> = snapshot
        .contracts
        .iter()
        .filter_map(|quote| apply_filters(quote, ctx, cfg))
        .collect();

    debug!(
        ticker = %snapshot.ticker,
        total = snapshot.contracts.len(),
        survivors = survivors.len(),
        "filter pass complete"
    );

    let (calls, puts): (Vec<_>, Vec<_>) = survivors
        .into_iter()
        .partition(|s| s.quote.option_type == OptionType::Call);

    let mut out = rank_partition(run_id, calls, ctx, cfg);
    out.extend(rank_partition(run_id, puts, ctx, cfg));
    out
}

/// All gates from the selection window. Any undefined intermediate value
/// (missing Greek, zero denominator) fails the contract, never panics.
fn apply_filters<'a>(
    quote: &'a OptionContractQuote,
    ctx: &TickerContext,
    cfg: &SelectorConfig,
) -> Option<Survivor<'a>> {
    let dte = quote.dte();
    if dte < cfg.min_dte || dte > cfg.max_dte {
        return None;
    }

    let spot = quote
        .underlying_price
        .filter(|p| *p > 0.0)
        .or(ctx.spot_fallback.filter(|p| *p > 0.0))?;

    if quote.strike <= 0.0 {
        return None;
    }
    let moneyness = match quote.option_type {
        OptionType::Call => quote.strike / spot,
        OptionType::Put => spot / quote.strike,
    };
    if moneyness < cfg.min_moneyness || moneyness > cfg.max_moneyness {
        return None;
    }

    if quote.open_interest_nz() < cfg.min_open_interest {
        return None;
    }
    if quote.volume_nz() < cfg.min_volume {
        return None;
    }

    let mid_price = quote.mid_price()?;
    if mid_price < cfg.min_mid_price {
        return None;
    }

    let spread_pct = match (quote.bid, quote.ask) {
        (Some(bid), Some(ask)) if mid_price > 0.0 => (ask - bid) / mid_price,
        _ => return None,
    };
    if !spread_pct.is_finite() || spread_pct > cfg.max_spread_pct {
        return None;
    }

    let abs_delta = quote.delta?.abs();
    if abs_delta < cfg.min_abs_delta || abs_delta > cfg.max_abs_delta {
        return None;
    }

    // Edge realism: the breakeven move must fit inside the discounted
    // expected move implied by the contract's own IV and horizon.
    let implied_volatility = quote.implied_volatility.filter(|iv| *iv >= 0.0)?;
    let expected_move_pct =
        implied_volatility * (dte as f64 / 365.0).sqrt() * cfg.expected_move_haircut * 100.0;
    let breakeven_distance_pct = match quote.option_type {
        OptionType::Call => ((quote.strike + mid_price) - spot) / spot * 100.0,
        OptionType::Put => (spot - (quote.strike - mid_price)) / spot * 100.0,
    };
    if !expected_move_pct.is_finite() || !breakeven_distance_pct.is_finite() {
        return None;
    }
    if breakeven_distance_pct > expected_move_pct {
        return None;
    }

    Some(Survivor {
        quote,
        spot,
        mid_price,
        spread_pct,
        dte,
        moneyness,
        expected_move_pct,
        breakeven_distance_pct,
        abs_delta,
        implied_volatility,
    })
}

/// Score and rank one (ticker, option_type) partition.
fn rank_partition(
    run_id: &str,
    survivors: Vec<Survivor<'_>>,
    ctx: &TickerContext,
    cfg: &SelectorConfig,
) -> Vec<CandidateRecord> {
    if survivors.is_empty() {
        return Vec::new();
    }

    let abs_deltas: Vec<f64> = survivors.iter().map(|s| s.abs_delta).collect();
    let abs_thetas: Vec<f64> = survivors
        .iter()
        .map(|s| s.quote.theta.map(f64::abs).unwrap_or(0.0))
        .collect();
    let abs_gammas: Vec<f64> = survivors
        .iter()
        .map(|s| s.quote.gamma.map(f64::abs).unwrap_or(0.0))
        .collect();
    let liquidity: Vec<f64> = survivors
        .iter()
        .map(|s| {
            (1.0 + s.quote.volume_nz() as f64).ln() + (1.0 + s.quote.open_interest_nz() as f64).ln()
        })
        .collect();

    let nd = min_max_normalize(&abs_deltas);
    let nt = min_max_normalize(&abs_thetas);
    let ng = min_max_normalize(&abs_gammas);
    let nl = min_max_normalize(&liquidity);

    let iv_pctl_complement = 1.0 - ctx.iv_percentile.unwrap_or(0.5);

    let mut scored: Vec<(f64, Survivor<'_>)> = survivors
        .into_iter()
        .enumerate()
        .map(|(i, s)| {
            let nd_i = nd.as_ref().map_or(NEUTRAL_SUBSCORE, |v| v[i]);
            // Lower decay is preferred, so theta enters inverted.
            let it_i = nt.as_ref().map_or(NEUTRAL_SUBSCORE, |v| 1.0 - v[i]);
            let ng_i = ng.as_ref().map_or(NEUTRAL_SUBSCORE, |v| v[i]);
            // The spread penalty only applies when normalization held;
            // a degenerate partition stays at the neutral sub-score.
            let ls_i = nl
                .as_ref()
                .map_or(NEUTRAL_SUBSCORE, |v| v[i] * spread_penalty(s.spread_pct));

            let score = W_DELTA * nd_i
                + W_THETA * it_i
                + W_LIQUIDITY * ls_i
                + W_IV_PCTL * iv_pctl_complement
                + W_GAMMA * ng_i;
            (score, s)
        })
        .collect();

    // Score descending; ties broken by volume, then open interest, then
    // contract id so reruns over the same snapshot are byte-identical.
    scored.sort_by(|(sa, a), (sb, b)| {
        sb.partial_cmp(sa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.quote.volume_nz().cmp(&a.quote.volume_nz()))
            .then_with(|| b.quote.open_interest_nz().cmp(&a.quote.open_interest_nz()))
            .then_with(|| a.quote.contract_id.cmp(&b.quote.contract_id))
    });

    if let Some(cap) = cfg.max_candidates_per_partition {
        scored.truncate(cap);
    }

    scored
        .into_iter()
        .enumerate()
        .map(|(i, (score, s))| to_record(run_id, score, (i + 1) as u32, s, ctx))
        .collect()
}

fn to_record(
    run_id: &str,
    composite_score: f64,
    rank: u32,
    s: Survivor<'_>,
    ctx: &TickerContext,
) -> CandidateRecord {
    let quote = s.quote;
    CandidateRecord {
        selection_run_id: run_id.to_string(),
        ticker: quote.ticker.clone(),
        signal: ctx
            .directional_hint
            .unwrap_or_else(|| Signal::from_option_type(quote.option_type)),
        contract_id: quote.contract_id.clone(),
        option_type: quote.option_type,
        expiration_date: quote.expiration_date,
        strike: quote.strike,
        last_price: quote.last_price,
        bid: quote.bid,
        ask: quote.ask,
        volume: quote.volume_nz(),
        open_interest: quote.open_interest_nz(),
        implied_volatility: s.implied_volatility,
        delta: quote.delta.unwrap_or(0.0),
        theta: quote.theta,
        vega: quote.vega,
        gamma: quote.gamma,
        underlying_price: s.spot,
        capture_date: quote.capture_date,
        mid_price: s.mid_price,
        spread_pct: s.spread_pct,
        dte: s.dte,
        moneyness: s.moneyness,
        expected_move_pct: s.expected_move_pct,
        breakeven_distance_pct: s.breakeven_distance_pct,
        vol_comparison: classify_vol(s.implied_volatility, ctx.hv_30),
        composite_score,
        rank,
    }
}

/// Min-max normalization over one partition. None when the partition cannot
/// discriminate (single member or max == min); callers fall back to the
/// neutral sub-score.
fn min_max_normalize(values: &[f64]) -> Option<Vec<f64>> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if values.len() < 2 || max - min <= f64::EPSILON {
        return None;
    }
    Some(values.iter().map(|v| (v - min) / (max - min)).collect())
}

/// Liquidity multiplier punishing wide spreads, saturating at the cap.
fn spread_penalty(spread_pct: f64) -> f64 {
    1.0 - spread_pct.min(SPREAD_PENALTY_CAP) / SPREAD_PENALTY_CAP
}

/// Tag a contract's IV against the stock's realized 30-day vol.
pub fn classify_vol(implied_volatility: f64, hv_30: Option<f64>) -> Option<VolComparison> {
    let hv = hv_30.filter(|hv| *hv > 0.01)?;
    let ratio = implied_volatility / hv;
    Some(if ratio > VOL_EXPENSIVE_RATIO {
        VolComparison::Expensive
    } else if ratio < VOL_CHEAP_RATIO {
        VolComparison::Cheap
    } else {
        VolComparison::FairlyPriced
    })
}
