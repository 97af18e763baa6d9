//! Self-contained HTML report for a single backtest run.
//!
//! The document has no external assets: styles are inline and both charts
//! (equity curve, close price with trade markers) are inline SVG. Every
//! piece of user-derived text goes through `escape_html`.

use crate::domain::{Bar, PositionSide, TradeRecord};
use crate::engine::BacktestOutcome;
use crate::stats::BacktestStats;
use serde::{Deserialize, Serialize};

const CHART_WIDTH: f64 = 900.0;
const CHART_HEIGHT: f64 = 260.0;
const PAD: f64 = 40.0;

/// Presentation options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportOptions {
    pub title: String,
    /// Charts are thinned to at most this many points.
    pub max_chart_points: usize,
    pub include_trade_table: bool,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            title: "Backtest Report".to_string(),
            max_chart_points: 1_000,
            include_trade_table: true,
        }
    }
}

/// Facts about the run shown in the header.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RunSummary {
    pub strategy_name: String,
    /// Requested date range, as given by the caller.
    pub period: Option<(String, String)>,
    pub cash: f64,
    pub commission: f64,
    pub fingerprint: Option<String>,
}

pub fn render_html(
    bars: &[Bar],
    outcome: &BacktestOutcome,
    stats: &BacktestStats,
    summary: &RunSummary,
    options: &ReportOptions,
) -> String {
    let title = escape_html(&options.title);
    let mut html = format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
<title>{title}</title>\n<style>{STYLE}</style>\n</head>\n<body>\n<h1>{title}</h1>\n"
    );

    // ─── Run summary ───
    html.push_str("<section class=\"summary\">\n<table>\n");
    push_row(&mut html, "Strategy", &escape_html(&summary.strategy_name));
    if let Some((start, end)) = &summary.period {
        push_row(
            &mut html,
            "Requested period",
            &format!("{} &rarr; {}", escape_html(start), escape_html(end)),
        );
    }
    push_row(&mut html, "Bars", &bars.len().to_string());
    push_row(&mut html, "Initial cash", &format!("{:.2}", summary.cash));
    push_row(&mut html, "Commission", &format!("{:.4}%", summary.commission * 100.0));
    if let Some(fp) = &summary.fingerprint {
        push_row(&mut html, "Run fingerprint", &format!("<code>{}</code>", escape_html(fp)));
    }
    html.push_str("</table>\n</section>\n");

    // ─── Statistics ───
    html.push_str("<section class=\"stats\">\n<h2>Statistics</h2>\n<table>\n");
    for (name, value) in stat_rows(stats) {
        push_row(&mut html, name, &escape_html(&value));
    }
    html.push_str("</table>\n</section>\n");

    // ─── Charts ───
    html.push_str("<section class=\"charts\">\n<h2>Equity</h2>\n");
    html.push_str(&line_chart_svg(&outcome.equity_curve, options.max_chart_points, "#1f6feb", &[]));
    html.push_str("<h2>Close price and trades</h2>\n");
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let markers = trade_markers(&outcome.trades);
    html.push_str(&line_chart_svg(&closes, options.max_chart_points, "#444444", &markers));
    html.push_str("</section>\n");

    // ─── Trades ───
    if options.include_trade_table {
        html.push_str(&trade_table(&outcome.trades));
    }

    html.push_str("</body>\n</html>\n");
    html
}

/// Escape text for HTML element and attribute content.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

// ─── Helpers ────────────────────────────────────────────────────────

const STYLE: &str = "body{font-family:sans-serif;margin:2em;color:#222}\
table{border-collapse:collapse;margin-bottom:1.5em}\
td,th{border:1px solid #ddd;padding:4px 10px;text-align:right}\
td:first-child,th:first-child{text-align:left}\
th{background:#f3f3f3}\
.win{color:#137333}.loss{color:#b3261e}";

fn push_row(html: &mut String, label: &str, value: &str) {
    html.push_str(&format!("<tr><td>{label}</td><td>{value}</td></tr>\n"));
}

fn num(v: f64) -> String {
    format!("{v:.2}")
}

fn opt_num(v: Option<f64>) -> String {
    v.map(num).unwrap_or_else(|| "n/a".to_string())
}

fn opt_text(v: &Option<String>) -> String {
    v.clone().unwrap_or_else(|| "n/a".to_string())
}

fn stat_rows(s: &BacktestStats) -> Vec<(&'static str, String)> {
    vec![
        ("Start", s.start.clone()),
        ("End", s.end.clone()),
        ("Duration", s.duration.clone()),
        ("Exposure Time [%]", num(s.exposure_time_pct)),
        ("Equity Final [$]", num(s.equity_final)),
        ("Equity Peak [$]", num(s.equity_peak)),
        ("Commissions [$]", num(s.commissions)),
        ("Return [%]", num(s.return_pct)),
        ("Buy & Hold Return [%]", num(s.buy_hold_return_pct)),
        ("Return (Ann.) [%]", opt_num(s.return_ann_pct)),
        ("Volatility (Ann.) [%]", opt_num(s.volatility_ann_pct)),
        ("Sharpe Ratio", opt_num(s.sharpe_ratio)),
        ("Sortino Ratio", opt_num(s.sortino_ratio)),
        ("Calmar Ratio", opt_num(s.calmar_ratio)),
        ("Max. Drawdown [%]", num(s.max_drawdown_pct)),
        ("Avg. Drawdown [%]", opt_num(s.avg_drawdown_pct)),
        ("Max. Drawdown Duration", opt_text(&s.max_drawdown_duration)),
        ("Avg. Drawdown Duration", opt_text(&s.avg_drawdown_duration)),
        ("# Trades", s.trade_count.to_string()),
        ("Win Rate [%]", opt_num(s.win_rate_pct)),
        ("Best Trade [%]", opt_num(s.best_trade_pct)),
        ("Worst Trade [%]", opt_num(s.worst_trade_pct)),
        ("Avg. Trade [%]", opt_num(s.avg_trade_pct)),
        ("Max. Trade Duration", opt_text(&s.max_trade_duration)),
        ("Avg. Trade Duration", opt_text(&s.avg_trade_duration)),
        ("Profit Factor", opt_num(s.profit_factor)),
        ("Expectancy [%]", opt_num(s.expectancy_pct)),
        ("SQN", opt_num(s.sqn)),
        ("Best Day [%]", opt_num(s.best_day_pct)),
        ("Worst Day [%]", opt_num(s.worst_day_pct)),
    ]
}

/// A point of interest drawn over the price line.
#[derive(Debug, Clone, Copy)]
struct Marker {
    bar: usize,
    price: f64,
    color: &'static str,
    entry: bool,
}

fn trade_markers(trades: &[TradeRecord]) -> Vec<Marker> {
    let mut markers = Vec::with_capacity(trades.len() * 2);
    for t in trades {
        let long = t.side == PositionSide::Long;
        markers.push(Marker {
            bar: t.entry_bar,
            price: t.entry_price,
            color: if long { "#137333" } else { "#b3261e" },
            entry: true,
        });
        markers.push(Marker {
            bar: t.exit_bar,
            price: t.exit_price,
            color: if t.is_winner() { "#137333" } else { "#b3261e" },
            entry: false,
        });
    }
    markers
}

/// Indices kept when thinning a series to `max_points` (always keeps the last).
fn thin_indices(n: usize, max_points: usize) -> Vec<usize> {
    if n == 0 {
        return Vec::new();
    }
    let stride = n.div_ceil(max_points.max(2)).max(1);
    let mut idx: Vec<usize> = (0..n).step_by(stride).collect();
    if idx.last() != Some(&(n - 1)) {
        idx.push(n - 1);
    }
    idx
}

fn line_chart_svg(values: &[f64], max_points: usize, stroke: &str, markers: &[Marker]) -> String {
    let mut svg = format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{CHART_WIDTH}\" height=\"{CHART_HEIGHT}\" \
viewBox=\"0 0 {CHART_WIDTH} {CHART_HEIGHT}\">\n<rect width=\"100%\" height=\"100%\" fill=\"white\"/>\n"
    );

    let finite: Vec<f64> = values
        .iter()
        .chain(markers.iter().map(|m| &m.price))
        .copied()
        .filter(|v| v.is_finite())
        .collect();
    if values.is_empty() || finite.is_empty() {
        svg.push_str("</svg>\n");
        return svg;
    }

    let lo = finite.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let span = if hi > lo { hi - lo } else { 1.0 };
    let last = (values.len() - 1).max(1) as f64;

    let x = |i: usize| PAD + i as f64 / last * (CHART_WIDTH - 2.0 * PAD);
    let y = |v: f64| CHART_HEIGHT - PAD - (v - lo) / span * (CHART_HEIGHT - 2.0 * PAD);

    let points: Vec<String> = thin_indices(values.len(), max_points)
        .into_iter()
        .filter(|&i| values[i].is_finite())
        .map(|i| format!("{:.1},{:.1}", x(i), y(values[i])))
        .collect();
    svg.push_str(&format!(
        "<polyline fill=\"none\" stroke=\"{stroke}\" stroke-width=\"1.5\" points=\"{}\"/>\n",
        points.join(" ")
    ));

    for m in markers {
        let (cx, cy) = (x(m.bar), y(m.price));
        if m.entry {
            svg.push_str(&format!(
                "<polygon points=\"{:.1},{:.1} {:.1},{:.1} {:.1},{:.1}\" fill=\"{}\"/>\n",
                cx,
                cy - 6.0,
                cx - 5.0,
                cy + 4.0,
                cx + 5.0,
                cy + 4.0,
                m.color
            ));
        } else {
            svg.push_str(&format!(
                "<circle cx=\"{cx:.1}\" cy=\"{cy:.1}\" r=\"4\" fill=\"none\" stroke=\"{}\" stroke-width=\"2\"/>\n",
                m.color
            ));
        }
    }

    svg.push_str(&format!(
        "<text x=\"4\" y=\"{:.1}\" font-family=\"sans-serif\" font-size=\"10\">{hi:.2}</text>\n\
<text x=\"4\" y=\"{:.1}\" font-family=\"sans-serif\" font-size=\"10\">{lo:.2}</text>\n",
        PAD - 4.0,
        CHART_HEIGHT - PAD + 12.0
    ));
    svg.push_str("</svg>\n");
    svg
}

fn trade_table(trades: &[TradeRecord]) -> String {
    let mut html = String::from("<section class=\"trades\">\n<h2>Trades</h2>\n");
    if trades.is_empty() {
        html.push_str("<p>No trades.</p>\n</section>\n");
        return html;
    }
    html.push_str(
        "<table>\n<tr><th>#</th><th>Side</th><th>Entry</th><th>Entry price</th><th>Exit</th>\
<th>Exit price</th><th>Size</th><th>PnL</th><th>Return [%]</th><th>Exit reason</th></tr>\n",
    );
    for (i, t) in trades.iter().enumerate() {
        let class = if t.is_winner() { "win" } else { "loss" };
        html.push_str(&format!(
            "<tr><td>{}</td><td>{:?}</td><td>{}</td><td>{:.2}</td><td>{}</td><td>{:.2}</td>\
<td>{}</td><td class=\"{class}\">{:+.2}</td><td class=\"{class}\">{:+.2}</td><td>{:?}</td></tr>\n",
            i + 1,
            t.side,
            t.entry_time.format("%Y-%m-%d %H:%M"),
            t.entry_price,
            t.exit_time.format("%Y-%m-%d %H:%M"),
            t.exit_price,
            t.quantity,
            t.net_pnl,
            t.return_pct() * 100.0,
            t.exit_reason,
        ));
    }
    html.push_str("</table>\n</section>\n");
    html
}
