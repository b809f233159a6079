use crate::config::{
    HV_WINDOW, IV_SIGNAL_GAP, MACD_FAST, MACD_SLOW, RSI_LEN, SMA_FAST, SMA_SLOW, TRADING_DAYS,
    VOLUME_AVG_WINDOW,
};
use crate::models::{IvSignal, PriceBar, TechnicalFeatureRecord};

/// 14-period RSI with Wilder's smoothing. Defined from index `period`
/// onward; earlier slots stay None.
pub fn rsi_series(closes: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; closes.len()];
    if period == 0 || closes.len() <= period {
        return out;
    }

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let change = closes[i] - closes[i - 1];
        if change > 0.0 {
            avg_gain += change;
        } else {
            avg_loss -= change;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;
    out[period] = Some(rsi_value(avg_gain, avg_loss));

    for i in (period + 1)..closes.len() {
        let change = closes[i] - closes[i - 1];
        let (gain, loss) = if change > 0.0 {
            (change, 0.0)
        } else {
            (0.0, -change)
        };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
        out[i] = Some(rsi_value(avg_gain, avg_loss));
    }
    out
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    // Flat series has neither gains nor losses; pin it to neutral instead
    // of letting 0/0 poison the output.
    if avg_loss <= 0.0 && avg_gain <= 0.0 {
        50.0
    } else if avg_loss <= 0.0 {
        100.0
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}

/// EMA seeded with the simple mean of the first `period` values, defined
/// from index `period - 1` onward.
pub fn ema_series(closes: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; closes.len()];
    if period == 0 || closes.len() < period {
        return out;
    }
    let seed: f64 = closes[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = Some(seed);
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut prev = seed;
    for i in period..closes.len() {
        prev = alpha * closes[i] + (1.0 - alpha) * prev;
        out[i] = Some(prev);
    }
    out
}

/// MACD line, EMA(12) − EMA(26).
pub fn macd_series(closes: &[f64]) -> Vec<Option<f64>> {
    let fast = ema_series(closes, MACD_FAST);
    let slow = ema_series(closes, MACD_SLOW);
    fast.iter()
        .zip(slow.iter())
        .map(|(f, s)| match (f, s) {
            (Some(f), Some(s)) => Some(f - s),
            _ => None,
        })
        .collect()
}

/// Simple mean of the trailing `window` closes; None with too little history.
pub fn trailing_sma(closes: &[f64], window: usize) -> Option<f64> {
    if window == 0 || closes.len() < window {
        return None;
    }
    let tail = &closes[closes.len() - window..];
    Some(tail.iter().sum::<f64>() / window as f64)
}

/// Annualized realized volatility: sample stdev of the trailing `window`
/// daily log returns, scaled by sqrt(252). Needs window + 1 closes.
pub fn realized_vol(closes: &[f64], window: usize) -> Option<f64> {
    if window < 2 || closes.len() < window + 1 {
        return None;
    }
    let tail = &closes[closes.len() - (window + 1)..];
    if tail.iter().any(|c| *c <= 0.0) {
        return None;
    }
    let returns: Vec<f64> = tail.windows(2).map(|w| (w[1] / w[0]).ln()).collect();
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>()
        / (returns.len() as f64 - 1.0);
    Some(var.sqrt() * TRADING_DAYS.sqrt())
}

/// Implied-vs-realized volatility regime flag.
pub fn iv_signal(iv_avg_atm: Option<f64>, hv_30: Option<f64>) -> IvSignal {
    match (iv_avg_atm, hv_30) {
        (Some(iv), Some(hv)) => {
            if iv > hv + IV_SIGNAL_GAP {
                IvSignal::High
            } else {
                IvSignal::Low
            }
        }
        _ => IvSignal::Unknown,
    }
}

/// Derive the feature record for the most recent date in the history.
/// Fields without enough history come back None; that is the normal outcome
/// for recently listed tickers, not an error. None only when the history is
/// completely empty.
pub fn compute_features(
    ticker: &str,
    bars: &[PriceBar],
    iv_avg_atm: Option<f64>,
) -> Option<TechnicalFeatureRecord> {
    if bars.is_empty() {
        return None;
    }
    let mut bars: Vec<&PriceBar> = bars.iter().collect();
    bars.sort_by_key(|b| b.date);

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let rsi = rsi_series(&closes, RSI_LEN);
    let macd = macd_series(&closes);

    // Rows where close, RSI and MACD are all defined; delta lookbacks count
    // in these qualifying rows.
    let valid: Vec<usize> = (0..closes.len())
        .filter(|&i| rsi[i].is_some() && macd[i].is_some())
        .collect();

    let latest_bar = bars[bars.len() - 1];
    let mut rec = TechnicalFeatureRecord::new(ticker.to_string(), latest_bar.date);
    rec.open = latest_bar.open;
    rec.high = latest_bar.high;
    rec.low = latest_bar.low;
    rec.close = Some(latest_bar.close);
    rec.volume = latest_bar.volume;

    if let Some(&now) = valid.last() {
        rec.rsi_14 = rsi[now];
        rec.macd = macd[now];

        if let Some(&ago) = lookback(&valid, 30) {
            rec.close_30d_delta_pct = pct_change(closes[ago], closes[now]);
            rec.rsi_30d_delta = diff(rsi[ago], rsi[now]);
            rec.macd_30d_delta = diff(macd[ago], macd[now]);
        }
        if let Some(&ago) = lookback(&valid, 90) {
            rec.close_90d_delta_pct = pct_change(closes[ago], closes[now]);
            rec.rsi_90d_delta = diff(rsi[ago], rsi[now]);
            rec.macd_90d_delta = diff(macd[ago], macd[now]);
        }
    }

    rec.sma_50 = trailing_sma(&closes, SMA_FAST);
    rec.sma_200 = trailing_sma(&closes, SMA_SLOW);
    rec.hv_30 = realized_vol(&closes, HV_WINDOW);
    rec.iv_avg_atm = iv_avg_atm;
    rec.iv_signal = iv_signal(iv_avg_atm, rec.hv_30);
    rec.volume_surge_pct = volume_surge(&bars);

    Some(rec)
}

/// The qualifying row `n` entries behind the latest; requires n + 1 rows.
fn lookback(valid: &[usize], n: usize) -> Option<&usize> {
    if valid.len() < n + 1 {
        return None;
    }
    valid.get(valid.len() - 1 - n)
}

fn pct_change(from: f64, to: f64) -> Option<f64> {
    if from == 0.0 {
        return None;
    }
    Some((to - from) / from * 100.0)
}

fn diff(from: Option<f64>, to: Option<f64>) -> Option<f64> {
    match (from, to) {
        (Some(a), Some(b)) => Some(b - a),
        _ => None,
    }
}

/// Latest volume versus its trailing 30-day average, in percent.
fn volume_surge(bars: &[&PriceBar]) -> Option<f64> {
    if bars.len() < VOLUME_AVG_WINDOW {
        return None;
    }
    let latest = bars[bars.len() - 1].volume? as f64;
    let tail = &bars[bars.len() - VOLUME_AVG_WINDOW..];
    let volumes: Vec<f64> = tail.iter().filter_map(|b| b.volume).map(|v| v as f64).collect();
    if volumes.is_empty() {
        return None;
    }
    let avg = volumes.iter().sum::<f64>() / volumes.len() as f64;
    if avg <= 0.0 {
        return None;
    }
    Some((latest / avg - 1.0) * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn bars(closes: &[f64], volume: i64) -> Vec<PriceBar> {
        let start = NaiveDate::from_ymd_opt(2023, 6, 1).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| PriceBar {
                ticker: "TEST".to_string(),
                date: start + chrono::Duration::days(i as i64),
                open: Some(close),
                high: Some(close),
                low: Some(close),
                close,
                volume: Some(volume),
            })
            .collect()
    }

    #[test]
    fn test_rsi_all_gains_pins_high() {
        let closes: Vec<f64> = (1..=20).map(|i| i as f64).collect();
        let rsi = rsi_series(&closes, 14);
        assert_eq!(rsi[13], None);
        assert_eq!(rsi[19], Some(100.0));
    }

    #[test]
    fn test_rsi_all_losses_pins_low() {
        let closes: Vec<f64> = (1..=20).rev().map(|i| i as f64).collect();
        let rsi = rsi_series(&closes, 14);
        assert_eq!(rsi[19], Some(0.0));
    }

    #[test]
    fn test_rsi_flat_is_neutral() {
        let closes = vec![50.0; 20];
        let rsi = rsi_series(&closes, 14);
        assert_eq!(rsi[19], Some(50.0));
    }

    #[test]
    fn test_rsi_insufficient_history() {
        let closes = vec![50.0; 10];
        assert!(rsi_series(&closes, 14).iter().all(Option::is_none));
    }

    #[test]
    fn test_macd_flat_series_is_zero() {
        let closes = vec![80.0; 40];
        let macd = macd_series(&closes);
        assert_eq!(macd[24], None);
        let last = macd[39].unwrap();
        assert!(last.abs() < 1e-12);
    }

    #[test]
    fn test_trailing_sma() {
        let closes: Vec<f64> = (1..=60).map(|i| i as f64).collect();
        // Mean of 11..=60.
        assert_eq!(trailing_sma(&closes, 50), Some(35.5));
        assert_eq!(trailing_sma(&closes, 200), None);
    }

    #[test]
    fn test_realized_vol_flat_is_zero() {
        let closes = vec![100.0; 40];
        let hv = realized_vol(&closes, 30).unwrap();
        assert!(hv.abs() < 1e-12);
    }

    #[test]
    fn test_realized_vol_needs_window_plus_one() {
        let closes = vec![100.0; 30];
        assert_eq!(realized_vol(&closes, 30), None);
    }

    #[test]
    fn test_iv_signal_thresholds() {
        assert_eq!(iv_signal(Some(0.45), Some(0.30)), IvSignal::High);
        assert_eq!(iv_signal(Some(0.35), Some(0.30)), IvSignal::Low);
        assert_eq!(iv_signal(None, Some(0.30)), IvSignal::Unknown);
        assert_eq!(iv_signal(Some(0.45), None), IvSignal::Unknown);
    }

    #[test]
    fn test_features_on_long_flat_history() {
        let history = bars(&vec![100.0; 250], 1_000);
        let rec = compute_features("TEST", &history, Some(0.25)).unwrap();
        assert_eq!(rec.rsi_14, Some(50.0));
        assert!(rec.macd.unwrap().abs() < 1e-12);
        assert_eq!(rec.sma_50, Some(100.0));
        assert_eq!(rec.sma_200, Some(100.0));
        assert!(rec.hv_30.unwrap().abs() < 1e-12);
        assert_eq!(rec.close_30d_delta_pct, Some(0.0));
        assert_eq!(rec.rsi_30d_delta, Some(0.0));
        assert_eq!(rec.close_90d_delta_pct, Some(0.0));
        assert_eq!(rec.volume_surge_pct, Some(0.0));
        // Flat realized vol against 0.25 IV reads as rich premium.
        assert_eq!(rec.iv_signal, IvSignal::High);
    }

    #[test]
    fn test_features_short_history_leaves_fields_null() {
        let history = bars(&vec![100.0; 40], 1_000);
        let rec = compute_features("TEST", &history, None).unwrap();
        // 40 bars: RSI/MACD resolve but no 30-row delta lookback yet.
        assert!(rec.rsi_14.is_some());
        assert_eq!(rec.close_30d_delta_pct, None);
        assert_eq!(rec.close_90d_delta_pct, None);
        assert_eq!(rec.sma_50, None);
        assert_eq!(rec.sma_200, None);
        assert!(rec.hv_30.is_some());
        assert_eq!(rec.iv_signal, IvSignal::Unknown);
    }

    #[test]
    fn test_features_empty_history() {
        assert!(compute_features("TEST", &[], None).is_none());
    }

    #[test]
    fn test_delta_lookback_counts_qualifying_rows() {
        // 130 bars: rows qualify from index 25, so 105 qualifying rows
        // support the 30-row delta but the close compared against is the
        // one 30 qualifying rows back, not 30 calendar bars back.
        let mut closes = vec![100.0; 130];
        let n = closes.len();
        closes[n - 31] = 80.0;
        let history = bars(&closes, 1_000);
        let rec = compute_features("TEST", &history, None).unwrap();
        let delta = rec.close_30d_delta_pct.unwrap();
        assert!((delta - 25.0).abs() < 1e-9);
    }
}
