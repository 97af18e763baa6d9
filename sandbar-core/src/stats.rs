//! Run statistics — pure functions over the equity curve and trade list.
//!
//! `BacktestStats` serializes with the key names used by common Python
//! backtesting engines (`"Return [%]"`, `"Sharpe Ratio"`, ...), which is the
//! raw statistics document downstream consumers normalize. Values that are
//! undefined for a run (e.g. win rate with no trades) serialize as `null`.

use crate::domain::{Bar, TradeRecord};
use crate::engine::{BacktestOutcome, EngineSettings};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestStats {
    #[serde(rename = "Start")]
    pub start: String,
    #[serde(rename = "End")]
    pub end: String,
    #[serde(rename = "Duration")]
    pub duration: String,
    #[serde(rename = "Exposure Time [%]")]
    pub exposure_time_pct: f64,
    #[serde(rename = "Equity Final [$]")]
    pub equity_final: f64,
    #[serde(rename = "Equity Peak [$]")]
    pub equity_peak: f64,
    #[serde(rename = "Commissions [$]")]
    pub commissions: f64,
    #[serde(rename = "Return [%]")]
    pub return_pct: f64,
    #[serde(rename = "Buy & Hold Return [%]")]
    pub buy_hold_return_pct: f64,
    #[serde(rename = "Return (Ann.) [%]")]
    pub return_ann_pct: Option<f64>,
    #[serde(rename = "Volatility (Ann.) [%]")]
    pub volatility_ann_pct: Option<f64>,
    #[serde(rename = "Sharpe Ratio")]
    pub sharpe_ratio: Option<f64>,
    #[serde(rename = "Sortino Ratio")]
    pub sortino_ratio: Option<f64>,
    #[serde(rename = "Calmar Ratio")]
    pub calmar_ratio: Option<f64>,
    #[serde(rename = "Max. Drawdown [%]")]
    pub max_drawdown_pct: f64,
    #[serde(rename = "Avg. Drawdown [%]")]
    pub avg_drawdown_pct: Option<f64>,
    #[serde(rename = "Max. Drawdown Duration")]
    pub max_drawdown_duration: Option<String>,
    #[serde(rename = "Avg. Drawdown Duration")]
    pub avg_drawdown_duration: Option<String>,
    #[serde(rename = "# Trades")]
    pub trade_count: usize,
    #[serde(rename = "Win Rate [%]")]
    pub win_rate_pct: Option<f64>,
    #[serde(rename = "Best Trade [%]")]
    pub best_trade_pct: Option<f64>,
    #[serde(rename = "Worst Trade [%]")]
    pub worst_trade_pct: Option<f64>,
    #[serde(rename = "Avg. Trade [%]")]
    pub avg_trade_pct: Option<f64>,
    #[serde(rename = "Max. Trade Duration")]
    pub max_trade_duration: Option<String>,
    #[serde(rename = "Avg. Trade Duration")]
    pub avg_trade_duration: Option<String>,
    #[serde(rename = "Profit Factor")]
    pub profit_factor: Option<f64>,
    #[serde(rename = "Expectancy [%]")]
    pub expectancy_pct: Option<f64>,
    #[serde(rename = "SQN")]
    pub sqn: Option<f64>,
    #[serde(rename = "Best Day [%]")]
    pub best_day_pct: Option<f64>,
    #[serde(rename = "Worst Day [%]")]
    pub worst_day_pct: Option<f64>,
}

impl BacktestStats {
    /// Compute all statistics for a finished run.
    pub fn compute(bars: &[Bar], outcome: &BacktestOutcome, settings: &EngineSettings) -> Self {
        let equity = &outcome.equity_curve;
        let trades = &outcome.trades;
        let index: Vec<DateTime<Utc>> = bars.iter().map(|b| b.timestamp).collect();

        let start = index.first().copied().unwrap_or_default();
        let end = index.last().copied().unwrap_or_default();
        let final_equity = equity.last().copied().unwrap_or(settings.cash);

        let days = daily_returns(&index, equity);
        let periods = annualization_periods(&index);
        let gmean_day = geometric_mean(&days);
        let annual_return = (1.0 + gmean_day).powf(periods) - 1.0;
        let return_ann = (!days.is_empty()).then_some(annual_return * 100.0);
        let volatility_ann = annualized_volatility(&days, gmean_day, periods).map(|v| v * 100.0);

        let max_dd = max_drawdown(equity);
        let drawdowns = drawdown_periods(&index, equity);

        let trade_returns: Vec<f64> = trades.iter().map(TradeRecord::return_pct).collect();
        let trade_durations: Vec<Duration> = trades.iter().map(TradeRecord::duration).collect();

        Self {
            start: format_time(start),
            end: format_time(end),
            duration: format_duration(end - start),
            exposure_time_pct: exposure_time(trades, bars.len()) * 100.0,
            equity_final: final_equity,
            equity_peak: equity.iter().copied().fold(settings.cash, f64::max),
            commissions: outcome.commissions,
            return_pct: (final_equity - settings.cash) / settings.cash * 100.0,
            buy_hold_return_pct: buy_and_hold_return(bars) * 100.0,
            return_ann_pct: return_ann,
            volatility_ann_pct: volatility_ann,
            sharpe_ratio: match (return_ann, volatility_ann) {
                (Some(r), Some(v)) => finite(r / v),
                _ => None,
            },
            sortino_ratio: sortino_ratio(&days, annual_return, periods),
            calmar_ratio: if max_dd < 0.0 {
                finite(annual_return / -max_dd)
            } else {
                None
            },
            max_drawdown_pct: max_dd * 100.0,
            avg_drawdown_pct: (!drawdowns.is_empty())
                .then(|| mean_f64(&drawdowns.iter().map(|d| d.depth).collect::<Vec<_>>()) * 100.0),
            max_drawdown_duration: drawdowns
                .iter()
                .map(|d| d.duration)
                .max()
                .map(format_duration),
            avg_drawdown_duration: mean_duration(
                &drawdowns.iter().map(|d| d.duration).collect::<Vec<_>>(),
            )
            .map(format_duration),
            trade_count: trades.len(),
            win_rate_pct: (!trades.is_empty()).then(|| win_rate(trades) * 100.0),
            best_trade_pct: max_of(&trade_returns).map(|r| r * 100.0),
            worst_trade_pct: min_of(&trade_returns).map(|r| r * 100.0),
            avg_trade_pct: (!trades.is_empty()).then(|| geometric_mean(&trade_returns) * 100.0),
            max_trade_duration: trade_durations.iter().max().copied().map(format_duration),
            avg_trade_duration: mean_duration(&trade_durations).map(format_duration),
            profit_factor: profit_factor(trades),
            expectancy_pct: (!trades.is_empty()).then(|| mean_f64(&trade_returns) * 100.0),
            sqn: sqn(trades),
            best_day_pct: max_of(&days).map(|r| r * 100.0),
            worst_day_pct: min_of(&days).map(|r| r * 100.0),
        }
    }

    /// The raw statistics document (a JSON object keyed by display name).
    pub fn to_raw(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

// ─── Individual metric functions ────────────────────────────────────

/// Buy-and-hold return of the close series as a fraction.
pub fn buy_and_hold_return(bars: &[Bar]) -> f64 {
    match (bars.first(), bars.last()) {
        (Some(first), Some(last)) if first.close > 0.0 => (last.close - first.close) / first.close,
        _ => 0.0,
    }
}

/// Maximum drawdown as a negative fraction (e.g., -0.15 = 15% drawdown).
///
/// Returns 0.0 if equity is constant or monotonically increasing.
pub fn max_drawdown(equity_curve: &[f64]) -> f64 {
    if equity_curve.len() < 2 {
        return 0.0;
    }
    let mut peak = equity_curve[0];
    let mut max_dd = 0.0_f64;

    for &eq in equity_curve {
        if eq > peak {
            peak = eq;
        }
        if peak > 0.0 {
            let dd = (eq - peak) / peak;
            if dd < max_dd {
                max_dd = dd;
            }
        }
    }
    max_dd
}

/// A completed or still-open drawdown episode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Drawdown {
    /// Deepest point as a negative fraction.
    pub depth: f64,
    pub duration: Duration,
}

/// Split the equity curve into drawdown episodes (peak to recovery).
pub fn drawdown_periods(index: &[DateTime<Utc>], equity_curve: &[f64]) -> Vec<Drawdown> {
    let mut episodes = Vec::new();
    let mut peak = f64::MIN;
    let mut peak_at = 0usize;
    let mut depth = 0.0_f64;

    for (i, &eq) in equity_curve.iter().enumerate() {
        if eq >= peak {
            if depth < 0.0 {
                episodes.push(Drawdown {
                    depth,
                    duration: index[i] - index[peak_at],
                });
            }
            peak = eq;
            peak_at = i;
            depth = 0.0;
        } else if peak > 0.0 {
            depth = depth.min((eq - peak) / peak);
        }
    }
    if depth < 0.0 {
        if let Some(&last) = index.last() {
            episodes.push(Drawdown {
                depth,
                duration: last - index[peak_at],
            });
        }
    }
    episodes
}

/// Fraction of bars on which a position was held.
pub fn exposure_time(trades: &[TradeRecord], n_bars: usize) -> f64 {
    if n_bars == 0 {
        return 0.0;
    }
    let mut held = vec![false; n_bars];
    for trade in trades {
        let end = trade.exit_bar.min(n_bars - 1);
        for slot in held.iter_mut().take(end + 1).skip(trade.entry_bar) {
            *slot = true;
        }
    }
    held.iter().filter(|&&h| h).count() as f64 / n_bars as f64
}

/// Win rate: fraction of trades that were winners.
pub fn win_rate(trades: &[TradeRecord]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    let winners = trades.iter().filter(|t| t.is_winner()).count();
    winners as f64 / trades.len() as f64
}

/// Profit factor: gross profits / gross losses.
///
/// Capped at 100.0 for edge cases (all winners, zero losses).
pub fn profit_factor(trades: &[TradeRecord]) -> Option<f64> {
    if trades.is_empty() {
        return None;
    }
    let gross_profit: f64 = trades
        .iter()
        .filter(|t| t.net_pnl > 0.0)
        .map(|t| t.net_pnl)
        .sum();
    let gross_loss: f64 = trades
        .iter()
        .filter(|t| t.net_pnl < 0.0)
        .map(|t| t.net_pnl.abs())
        .sum();

    if gross_loss < 1e-10 {
        return Some(if gross_profit > 0.0 { 100.0 } else { 0.0 });
    }
    Some((gross_profit / gross_loss).min(100.0))
}

/// System Quality Number: sqrt(n) * mean(pnl) / std(pnl).
pub fn sqn(trades: &[TradeRecord]) -> Option<f64> {
    let pnl: Vec<f64> = trades.iter().map(|t| t.net_pnl).collect();
    let std = std_dev(&pnl);
    if pnl.len() < 2 || std < 1e-15 {
        return None;
    }
    finite((pnl.len() as f64).sqrt() * mean_f64(&pnl) / std)
}

/// Sortino ratio: annual return / annualized downside deviation.
pub fn sortino_ratio(day_returns: &[f64], annual_return: f64, periods: f64) -> Option<f64> {
    if day_returns.is_empty() {
        return None;
    }
    let downside = day_returns.iter().map(|r| r.min(0.0).powi(2)).sum::<f64>()
        / day_returns.len() as f64;
    let denom = downside.sqrt() * periods.sqrt();
    if denom < 1e-15 {
        return None;
    }
    finite(annual_return / denom)
}

/// Annualized volatility of compounded daily returns.
fn annualized_volatility(day_returns: &[f64], gmean_day: f64, periods: f64) -> Option<f64> {
    if day_returns.len() < 2 {
        return None;
    }
    let var = std_dev(day_returns).powi(2);
    let growth = (1.0 + gmean_day).powi(2);
    let v = ((var + growth).powf(periods) - growth.powf(periods)).max(0.0).sqrt();
    finite(v)
}

// ─── Helpers ────────────────────────────────────────────────────────

/// Returns between the last equity values of consecutive UTC days.
pub fn daily_returns(index: &[DateTime<Utc>], equity_curve: &[f64]) -> Vec<f64> {
    let mut closes: Vec<(NaiveDate, f64)> = Vec::new();
    for (ts, &eq) in index.iter().zip(equity_curve) {
        let day = ts.date_naive();
        match closes.last_mut() {
            Some((d, v)) if *d == day => *v = eq,
            _ => closes.push((day, eq)),
        }
    }
    closes
        .windows(2)
        .map(|w| {
            if w[0].1 > 0.0 {
                (w[1].1 - w[0].1) / w[0].1
            } else {
                0.0
            }
        })
        .collect()
}

/// 365 periods per year when the index trades on weekends, otherwise 252.
pub fn annualization_periods(index: &[DateTime<Utc>]) -> f64 {
    let weekend = index
        .iter()
        .any(|ts| matches!(ts.weekday(), Weekday::Sat | Weekday::Sun));
    if weekend {
        365.0
    } else {
        252.0
    }
}

/// Geometric mean return; 0 when any period lost everything.
pub fn geometric_mean(returns: &[f64]) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let growth: Vec<f64> = returns.iter().map(|r| 1.0 + r).collect();
    if growth.iter().any(|g| *g <= 0.0) {
        return 0.0;
    }
    (growth.iter().map(|g| g.ln()).sum::<f64>() / growth.len() as f64).exp() - 1.0
}

pub(crate) fn mean_f64(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub(crate) fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = mean_f64(values);
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

fn max_of(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::max)
}

fn min_of(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::min)
}

fn finite(v: f64) -> Option<f64> {
    v.is_finite().then_some(v)
}

fn mean_duration(durations: &[Duration]) -> Option<Duration> {
    if durations.is_empty() {
        return None;
    }
    let total: i64 = durations.iter().map(|d| d.num_seconds()).sum();
    Some(Duration::seconds(total / durations.len() as i64))
}

fn format_time(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// `"<days> days HH:MM:SS"`.
pub fn format_duration(d: Duration) -> String {
    let secs = d.num_seconds().max(0);
    let days = secs / 86_400;
    let rem = secs % 86_400;
    format!(
        "{days} days {:02}:{:02}:{:02}",
        rem / 3_600,
        (rem % 3_600) / 60,
        rem % 60
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ExitReason, PositionSide};

    fn ts(day: i64) -> DateTime<Utc> {
        // 2024-01-01 is a Monday
        DateTime::from_timestamp(1_704_067_200 + day * 86_400, 0).unwrap()
    }

    fn make_trade(net_pnl: f64) -> TradeRecord {
        TradeRecord {
            side: PositionSide::Long,
            entry_bar: 0,
            entry_time: ts(0),
            entry_price: 100.0,
            exit_bar: 2,
            exit_time: ts(2),
            exit_price: 100.0 + net_pnl / 50.0,
            exit_reason: ExitReason::Signal,
            quantity: 50.0,
            gross_pnl: net_pnl,
            commission: 0.0,
            net_pnl,
            bars_held: 2,
        }
    }

    fn bar(day: i64, close: f64) -> Bar {
        Bar {
            timestamp: ts(day),
            open: close,
            high: close,
            low: close,
            close,
            volume: 0.0,
        }
    }

    // ── Drawdown ──

    #[test]
    fn max_drawdown_basic() {
        let eq = vec![100.0, 110.0, 88.0, 120.0];
        assert!((max_drawdown(&eq) - (-0.2)).abs() < 1e-10);
    }

    #[test]
    fn max_drawdown_monotonic_is_zero() {
        assert_eq!(max_drawdown(&[1.0, 2.0, 3.0]), 0.0);
    }

    #[test]
    fn drawdown_episodes_and_durations() {
        let index: Vec<_> = (0..6).map(ts).collect();
        let eq = vec![100.0, 90.0, 100.0, 120.0, 60.0, 80.0];
        let episodes = drawdown_periods(&index, &eq);
        assert_eq!(episodes.len(), 2);
        assert!((episodes[0].depth + 0.1).abs() < 1e-12);
        assert_eq!(episodes[0].duration.num_days(), 2);
        // Still open at the end
        assert!((episodes[1].depth + 0.5).abs() < 1e-12);
        assert_eq!(episodes[1].duration.num_days(), 2);
    }

    // ── Trades ──

    #[test]
    fn win_rate_and_profit_factor() {
        let trades = vec![make_trade(100.0), make_trade(-50.0), make_trade(50.0)];
        assert!((win_rate(&trades) - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(profit_factor(&trades), Some(3.0));
    }

    #[test]
    fn profit_factor_capped_without_losses() {
        assert_eq!(profit_factor(&[make_trade(10.0)]), Some(100.0));
        assert_eq!(profit_factor(&[]), None);
    }

    #[test]
    fn exposure_counts_held_bars() {
        let trades = vec![make_trade(1.0)];
        assert!((exposure_time(&trades, 6) - 0.5).abs() < 1e-12);
    }

    // ── Daily aggregation ──

    #[test]
    fn daily_returns_use_last_value_per_day() {
        let index = vec![
            ts(0),
            ts(0) + Duration::hours(6),
            ts(1),
            ts(1) + Duration::hours(6),
        ];
        let eq = vec![100.0, 110.0, 99.0, 121.0];
        let days = daily_returns(&index, &eq);
        assert_eq!(days.len(), 1);
        assert!((days[0] - 0.1).abs() < 1e-12);
    }

    #[test]
    fn weekend_data_annualizes_over_365() {
        let weekdays: Vec<_> = (0..5).map(ts).collect();
        let week: Vec<_> = (0..7).map(ts).collect();
        assert_eq!(annualization_periods(&weekdays), 252.0);
        assert_eq!(annualization_periods(&week), 365.0);
    }

    #[test]
    fn geometric_mean_of_equal_returns() {
        assert!((geometric_mean(&[0.1, 0.1]) - 0.1).abs() < 1e-12);
        assert_eq!(geometric_mean(&[0.1, -1.0]), 0.0);
    }

    #[test]
    fn duration_format() {
        assert_eq!(
            format_duration(Duration::days(3) + Duration::minutes(90)),
            "3 days 01:30:00"
        );
    }

    // ── Full computation ──

    #[test]
    fn stats_without_trades_have_nulls() {
        let bars: Vec<Bar> = (0..5).map(|d| bar(d, 100.0 + d as f64)).collect();
        let outcome = BacktestOutcome {
            strategy_name: "Idle".into(),
            equity_curve: vec![1_000.0; 5],
            trades: Vec::new(),
            commissions: 0.0,
            first_trading_bar: 0,
            cancelled_orders: 0,
            dropped_orders: 0,
            bankrupt_at: None,
        };
        let stats = BacktestStats::compute(&bars, &outcome, &EngineSettings::new(1_000.0, 0.0));
        assert_eq!(stats.trade_count, 0);
        assert_eq!(stats.return_pct, 0.0);
        assert!((stats.buy_hold_return_pct - 4.0).abs() < 1e-12);
        assert_eq!(stats.win_rate_pct, None);
        assert_eq!(stats.sharpe_ratio, None);

        let raw = stats.to_raw();
        assert!(raw["Win Rate [%]"].is_null());
        assert_eq!(raw["# Trades"], 0);
        assert_eq!(raw["Start"], "2024-01-01 00:00:00");
        assert_eq!(raw["Duration"], "4 days 00:00:00");
    }

    #[test]
    fn stats_with_trades() {
        let bars: Vec<Bar> = (0..5).map(|d| bar(d, 100.0)).collect();
        let outcome = BacktestOutcome {
            strategy_name: "Busy".into(),
            equity_curve: vec![10_000.0, 10_100.0, 10_050.0, 10_200.0, 10_100.0],
            trades: vec![make_trade(150.0), make_trade(-50.0)],
            commissions: 4.0,
            first_trading_bar: 0,
            cancelled_orders: 0,
            dropped_orders: 0,
            bankrupt_at: None,
        };
        let stats = BacktestStats::compute(&bars, &outcome, &EngineSettings::new(10_000.0, 0.0));
        assert!((stats.return_pct - 1.0).abs() < 1e-9);
        assert_eq!(stats.trade_count, 2);
        assert_eq!(stats.win_rate_pct, Some(50.0));
        assert_eq!(stats.profit_factor, Some(3.0));
        assert!(stats.max_drawdown_pct < 0.0);
        assert_eq!(stats.equity_peak, 10_200.0);
        assert!(stats.best_day_pct.unwrap() > 1.4);
        assert!(stats.worst_day_pct.unwrap() < 0.0);
        assert!(stats.sharpe_ratio.is_some());
    }
}
