use crate::config::StructureConfig;
use crate::models::{ChainSnapshot, MarketStructureSnapshot, OptionContractQuote, OptionType};

/// Standard option contract multiplier.
const CONTRACT_MULTIPLIER: f64 = 100.0;

/// Aggregate one snapshot into per-underlying structural metrics. Pure
/// function of (snapshot, spot): same input, same output.
pub fn analyze(
    snapshot: &ChainSnapshot,
    spot: f64,
    cfg: &StructureConfig,
) -> MarketStructureSnapshot {
    let calls: Vec<&OptionContractQuote> = snapshot
        .contracts
        .iter()
        .filter(|c| c.option_type == OptionType::Call)
        .collect();
    let puts: Vec<&OptionContractQuote> = snapshot
        .contracts
        .iter()
        .filter(|c| c.option_type == OptionType::Put)
        .collect();

    let (net_call_gamma, net_put_gamma, total_gex) = if snapshot.contracts.is_empty() {
        (None, None, None)
    } else {
        // Both sides stored as positive magnitudes; the net subtracts puts.
        let call_gex = gamma_exposure(&calls, spot);
        let put_gex = gamma_exposure(&puts, spot);
        (Some(call_gex), Some(put_gex), Some(call_gex - put_gex))
    };

    MarketStructureSnapshot {
        ticker: snapshot.ticker.clone(),
        capture_date: snapshot.capture_date,
        call_wall: wall(&calls),
        put_wall: wall(&puts),
        max_pain: max_pain(&calls, &puts, cfg.max_pain_oi_floor),
        put_call_volume_ratio: ratio(
            puts.iter().map(|c| c.volume_nz()).sum::<i64>(),
            calls.iter().map(|c| c.volume_nz()).sum::<i64>(),
        ),
        put_call_oi_ratio: ratio(
            puts.iter().map(|c| c.open_interest_nz()).sum::<i64>(),
            calls.iter().map(|c| c.open_interest_nz()).sum::<i64>(),
        ),
        net_call_gamma,
        net_put_gamma,
        total_gex,
        iv_avg_atm: iv_avg_atm(snapshot, spot, cfg),
    }
}

/// Sum of gamma * OI * 100 * spot over one side of the chain. Contracts
/// without a gamma contribute nothing.
fn gamma_exposure(side: &[&OptionContractQuote], spot: f64) -> f64 {
    side.iter()
        .map(|c| {
            c.gamma.unwrap_or(0.0) * c.open_interest_nz() as f64 * CONTRACT_MULTIPLIER * spot
        })
        .sum()
}

/// Strike carrying the most open interest on one side; ties resolve to the
/// lower strike so input order never matters. None for an empty side.
fn wall(side: &[&OptionContractQuote]) -> Option<f64> {
    let mut best: Option<(i64, f64)> = None;
    for c in side {
        let oi = c.open_interest_nz();
        match best {
            None => best = Some((oi, c.strike)),
            Some((best_oi, best_strike)) => {
                if oi > best_oi || (oi == best_oi && c.strike < best_strike) {
                    best = Some((oi, c.strike));
                }
            }
        }
    }
    best.map(|(_, strike)| strike)
}

fn ratio(numerator: i64, denominator: i64) -> Option<f64> {
    if denominator > 0 {
        Some(numerator as f64 / denominator as f64)
    } else {
        None
    }
}

/// Settlement strike minimizing aggregate option-holder value. Brute force
/// over candidate strikes: chains run to a few hundred strikes, so the
/// quadratic scan stays cheap.
fn max_pain(
    calls: &[&OptionContractQuote],
    puts: &[&OptionContractQuote],
    oi_floor: i64,
) -> Option<f64> {
    let all_strikes = |min_oi: i64| -> Vec<f64> {
        let mut strikes: Vec<f64> = calls
            .iter()
            .chain(puts.iter())
            .filter(|c| c.open_interest_nz() > min_oi)
            .map(|c| c.strike)
            .collect();
        strikes.sort_by(f64::total_cmp);
        strikes.dedup();
        strikes
    };

    // Strikes below the noise floor rarely pin price; only fall back to the
    // full set when nothing clears it.
    let mut candidates = all_strikes(oi_floor);
    if candidates.is_empty() {
        candidates = all_strikes(i64::MIN);
    }

    let mut best: Option<(f64, f64)> = None;
    for &k in &candidates {
        let call_loss: f64 = calls
            .iter()
            .map(|c| (k - c.strike).max(0.0) * c.open_interest_nz() as f64)
            .sum();
        let put_loss: f64 = puts
            .iter()
            .map(|p| (p.strike - k).max(0.0) * p.open_interest_nz() as f64)
            .sum();
        let loss = call_loss + put_loss;
        // Strict comparison over ascending strikes: ties resolve to the
        // lowest strike regardless of contract order.
        if best.map_or(true, |(min_loss, _)| loss < min_loss) {
            best = Some((loss, k));
        }
    }
    best.map(|(_, k)| k)
}

/// Mean implied volatility of near-dated, near-the-money contracts.
fn iv_avg_atm(snapshot: &ChainSnapshot, spot: f64, cfg: &StructureConfig) -> Option<f64> {
    if spot <= 0.0 {
        return None;
    }
    let ivs: Vec<f64> = snapshot
        .contracts
        .iter()
        .filter(|c| {
            let dte = c.dte();
            dte >= cfg.atm_dte_min
                && dte <= cfg.atm_dte_max
                && (c.strike - spot).abs() / spot <= cfg.atm_moneyness_band
        })
        .filter_map(|c| c.implied_volatility)
        .collect();
    if ivs.is_empty() {
        return None;
    }
    Some(ivs.iter().sum::<f64>() / ivs.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OptionType;
    use chrono::NaiveDate;

    fn capture() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    fn contract(
        option_type: OptionType,
        strike: f64,
        oi: i64,
        volume: i64,
        gamma: f64,
        iv: f64,
        dte: i64,
    ) -> OptionContractQuote {
        OptionContractQuote {
            ticker: "TEST".to_string(),
            contract_id: format!("{:?}-{}", option_type, strike),
            option_type,
            expiration_date: capture() + chrono::Duration::days(dte),
            strike,
            last_price: Some(1.0),
            bid: Some(0.9),
            ask: Some(1.1),
            volume: Some(volume),
            open_interest: Some(oi),
            implied_volatility: Some(iv),
            delta: Some(0.3),
            theta: Some(-0.02),
            vega: Some(0.1),
            gamma: Some(gamma),
            underlying_price: Some(100.0),
            capture_date: capture(),
        }
    }

    fn snapshot(contracts: Vec<OptionContractQuote>) -> ChainSnapshot {
        ChainSnapshot {
            ticker: "TEST".to_string(),
            capture_date: capture(),
            contracts,
        }
    }

    #[test]
    fn test_gex_identity() {
        let snap = snapshot(vec![
            contract(OptionType::Call, 105.0, 100, 50, 0.02, 0.4, 30),
            contract(OptionType::Put, 95.0, 50, 30, 0.01, 0.4, 30),
        ]);
        let out = analyze(&snap, 100.0, &StructureConfig::default());
        // 0.02 * 100 * 100 * 100 and 0.01 * 50 * 100 * 100
        assert_eq!(out.net_call_gamma, Some(20_000.0));
        assert_eq!(out.net_put_gamma, Some(5_000.0));
        assert_eq!(
            out.total_gex,
            Some(out.net_call_gamma.unwrap() - out.net_put_gamma.unwrap())
        );
    }

    #[test]
    fn test_walls_and_empty_side() {
        let snap = snapshot(vec![
            contract(OptionType::Call, 105.0, 400, 50, 0.02, 0.4, 30),
            contract(OptionType::Call, 110.0, 900, 50, 0.02, 0.4, 30),
        ]);
        let out = analyze(&snap, 100.0, &StructureConfig::default());
        assert_eq!(out.call_wall, Some(110.0));
        // No puts at all: the wall is undefined, not zero.
        assert_eq!(out.put_wall, None);
        assert_eq!(out.put_call_volume_ratio, None);
    }

    #[test]
    fn test_wall_tie_takes_lower_strike() {
        let snap = snapshot(vec![
            contract(OptionType::Call, 110.0, 500, 50, 0.02, 0.4, 30),
            contract(OptionType::Call, 105.0, 500, 50, 0.02, 0.4, 30),
        ]);
        let out = analyze(&snap, 100.0, &StructureConfig::default());
        assert_eq!(out.call_wall, Some(105.0));
    }

    #[test]
    fn test_max_pain_minimizes_holder_value() {
        let snap = snapshot(vec![
            contract(OptionType::Call, 100.0, 200, 10, 0.02, 0.4, 30),
            contract(OptionType::Call, 110.0, 500, 10, 0.02, 0.4, 30),
            contract(OptionType::Put, 90.0, 300, 10, 0.01, 0.4, 30),
            contract(OptionType::Put, 100.0, 400, 10, 0.01, 0.4, 30),
        ]);
        let out = analyze(&snap, 100.0, &StructureConfig::default());
        // Settling at 100 leaves every contract worthless.
        assert_eq!(out.max_pain, Some(100.0));
    }

    #[test]
    fn test_max_pain_order_invariance() {
        let contracts = vec![
            contract(OptionType::Call, 100.0, 200, 10, 0.02, 0.4, 30),
            contract(OptionType::Call, 110.0, 500, 10, 0.02, 0.4, 30),
            contract(OptionType::Put, 90.0, 300, 10, 0.01, 0.4, 30),
            contract(OptionType::Put, 100.0, 400, 10, 0.01, 0.4, 30),
        ];
        let forward = analyze(&snapshot(contracts.clone()), 100.0, &StructureConfig::default());
        let mut reversed = contracts;
        reversed.reverse();
        let backward = analyze(&snapshot(reversed), 100.0, &StructureConfig::default());
        assert_eq!(forward.max_pain, backward.max_pain);
    }

    #[test]
    fn test_max_pain_falls_back_below_oi_floor() {
        // Every strike sits under the noise floor; the search widens to all.
        let snap = snapshot(vec![
            contract(OptionType::Call, 105.0, 20, 10, 0.02, 0.4, 30),
            contract(OptionType::Put, 95.0, 30, 10, 0.01, 0.4, 30),
        ]);
        let out = analyze(&snap, 100.0, &StructureConfig::default());
        assert!(out.max_pain.is_some());
    }

    #[test]
    fn test_put_call_ratios() {
        let snap = snapshot(vec![
            contract(OptionType::Call, 105.0, 400, 200, 0.02, 0.4, 30),
            contract(OptionType::Put, 95.0, 100, 300, 0.01, 0.4, 30),
        ]);
        let out = analyze(&snap, 100.0, &StructureConfig::default());
        assert_eq!(out.put_call_volume_ratio, Some(1.5));
        assert_eq!(out.put_call_oi_ratio, Some(0.25));
    }

    #[test]
    fn test_iv_avg_atm_window() {
        let snap = snapshot(vec![
            // In the window: within 5% of spot, 30 DTE.
            contract(OptionType::Call, 103.0, 100, 10, 0.02, 0.40, 30),
            contract(OptionType::Put, 98.0, 100, 10, 0.01, 0.50, 30),
            // Out of band by strike.
            contract(OptionType::Call, 120.0, 100, 10, 0.02, 0.90, 30),
            // Out of window by DTE.
            contract(OptionType::Call, 100.0, 100, 10, 0.02, 0.90, 3),
        ]);
        let out = analyze(&snap, 100.0, &StructureConfig::default());
        let iv = out.iv_avg_atm.unwrap();
        assert!((iv - 0.45).abs() < 1e-12);
    }

    #[test]
    fn test_empty_snapshot_yields_no_metrics() {
        let out = analyze(&snapshot(vec![]), 100.0, &StructureConfig::default());
        assert_eq!(out.call_wall, None);
        assert_eq!(out.max_pain, None);
        assert_eq!(out.net_call_gamma, None);
        assert_eq!(out.total_gex, None);
        assert_eq!(out.iv_avg_atm, None);
    }
}
