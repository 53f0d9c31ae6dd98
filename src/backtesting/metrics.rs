// Performance metrics from the equity curve and the trade log

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::backtesting::trade::Trade;
use crate::momentum::TRADING_DAYS_PER_YEAR;

/// Ordered (timestamp, value) equity series.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EquityCurve {
    pub dates: Vec<NaiveDate>,
    pub values: Vec<f64>,
}

impl EquityCurve {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from (date, value) pairs in any order; duplicates collapse to
    /// the last value seen for the date, so callers can hand over raw rows.
    pub fn from_points(points: Vec<(NaiveDate, f64)>) -> Self {
        let ordered: std::collections::BTreeMap<NaiveDate, f64> = points.into_iter().collect();
        let mut curve = Self::new();
        for (date, value) in ordered {
            curve.add_point(date, value);
        }
        curve
    }

    pub fn add_point(&mut self, date: NaiveDate, value: f64) {
        self.dates.push(date);
        self.values.push(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Period-over-period simple returns, paired with the period-end date.
    pub fn returns(&self) -> Vec<(NaiveDate, f64)> {
        (1..self.len())
            .map(|i| (self.dates[i], self.values[i] / self.values[i - 1] - 1.0))
            .collect()
    }

    /// Month-end values: the last observation of each (year, month).
    pub fn monthly(&self) -> Vec<(NaiveDate, f64)> {
        let mut out: Vec<(NaiveDate, f64)> = Vec::new();
        for (i, &date) in self.dates.iter().enumerate() {
            let key = (date.year(), date.month());
            match out.last() {
                Some(&(prev, _)) if (prev.year(), prev.month()) == key => {
                    *out.last_mut().unwrap() = (date, self.values[i]);
                }
                _ => out.push((date, self.values[i])),
            }
        }
        out
    }
}

/// Benchmark-relative block; present only when benchmark data was usable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkMetrics {
    /// Annualized regression intercept of strategy returns on benchmark returns.
    pub alpha: f64,
    /// Regression slope.
    pub beta: f64,
    pub information_ratio: f64,
    /// Annualized stdev of active returns.
    pub tracking_error: f64,
    pub correlation: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    // Return block
    pub total_return: f64,
    pub annualized_return: f64,
    pub cagr: f64,
    pub best_month: f64,
    pub worst_month: f64,
    /// Share of positive months, 0-100.
    pub positive_months_pct: f64,

    // Risk block
    pub volatility: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub calmar_ratio: f64,
    /// Worst peak-to-trough decline, as a negative fraction.
    pub max_drawdown: f64,
    /// Mean trough across distinct drawdown periods, negative.
    pub avg_drawdown: f64,

    // Benchmark block
    pub benchmark: Option<BenchmarkMetrics>,

    // Trade block
    pub total_trades: usize,
    /// Winning share of closed trades, 0-100.
    pub win_rate: f64,
    pub avg_trade_pnl: f64,
    pub profit_factor: f64,
    pub avg_holding_days: f64,
}

impl PerformanceMetrics {
    /// Compute all metric blocks. A degenerate curve (fewer than two
    /// points, or a flat series) produces zeros rather than errors.
    pub fn calculate(
        equity: &EquityCurve,
        trades: &[Trade],
        benchmark: Option<&EquityCurve>,
        risk_free_rate: f64,
    ) -> Self {
        let returns: Vec<f64> = equity.returns().into_iter().map(|(_, r)| r).collect();

        let (total_return, annualized_return, cagr) = return_block(equity);
        let (best_month, worst_month, positive_months_pct) = monthly_block(equity);
        let volatility = annualized_volatility(&returns);
        let sharpe_ratio = if volatility > 0.0 {
            (annualized_return - risk_free_rate) / volatility
        } else {
            0.0
        };
        let downside = downside_deviation(&returns);
        let sortino_ratio = if downside > 0.0 {
            (annualized_return - risk_free_rate) / downside
        } else {
            0.0
        };
        let (max_drawdown, avg_drawdown) = drawdown_block(&equity.values);
        let calmar_ratio = if max_drawdown < 0.0 {
            annualized_return / max_drawdown.abs()
        } else {
            0.0
        };

        let benchmark = benchmark.and_then(|b| benchmark_block(equity, b));

        let (total_trades, win_rate, avg_trade_pnl, profit_factor, avg_holding_days) =
            trade_block(trades);

        Self {
            total_return,
            annualized_return,
            cagr,
            best_month,
            worst_month,
            positive_months_pct,
            volatility,
            sharpe_ratio,
            sortino_ratio,
            calmar_ratio,
            max_drawdown,
            avg_drawdown,
            benchmark,
            total_trades,
            win_rate,
            avg_trade_pnl,
            profit_factor,
            avg_holding_days,
        }
    }
}

fn return_block(equity: &EquityCurve) -> (f64, f64, f64) {
    if equity.len() < 2 {
        return (0.0, 0.0, 0.0);
    }
    let first = equity.values[0];
    let last = *equity.values.last().unwrap();
    if first <= 0.0 {
        return (0.0, 0.0, 0.0);
    }
    let growth = last / first;
    let total_return = growth - 1.0;

    let periods = (equity.len() - 1) as f64;
    let annualized_return = growth.powf(TRADING_DAYS_PER_YEAR / periods) - 1.0;

    let years =
        (*equity.dates.last().unwrap() - equity.dates[0]).num_days() as f64 / 365.25;
    let cagr = if years < 1.0 / 365.0 {
        0.0
    } else {
        growth.powf(1.0 / years) - 1.0
    };

    (total_return, annualized_return, cagr)
}

fn monthly_block(equity: &EquityCurve) -> (f64, f64, f64) {
    let monthly = equity.monthly();
    if monthly.len() < 2 {
        return (0.0, 0.0, 0.0);
    }
    let monthly_returns: Vec<f64> = monthly
        .windows(2)
        .map(|w| w[1].1 / w[0].1 - 1.0)
        .collect();
    let best = monthly_returns.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let worst = monthly_returns.iter().copied().fold(f64::INFINITY, f64::min);
    let positive = monthly_returns.iter().filter(|&&r| r > 0.0).count();
    let pct = positive as f64 / monthly_returns.len() as f64 * 100.0;
    (best, worst, pct)
}

fn annualized_volatility(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance = returns
        .iter()
        .map(|r| (r - mean).powi(2))
        .sum::<f64>()
        / returns.len() as f64;
    variance.sqrt() * TRADING_DAYS_PER_YEAR.sqrt()
}

/// Annualized downside deviation: root-mean-square of negative returns.
fn downside_deviation(returns: &[f64]) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let downside_sq = returns
        .iter()
        .map(|&r| r.min(0.0).powi(2))
        .sum::<f64>()
        / returns.len() as f64;
    downside_sq.sqrt() * TRADING_DAYS_PER_YEAR.sqrt()
}

/// (max drawdown, average trough across drawdown periods), both ≤ 0.
fn drawdown_block(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let mut peak = values[0];
    let mut max_dd = 0.0f64;
    let mut troughs: Vec<f64> = Vec::new();
    let mut current_trough = 0.0f64;
    let mut in_drawdown = false;

    for &value in values {
        if value > peak {
            if in_drawdown {
                troughs.push(current_trough);
                in_drawdown = false;
                current_trough = 0.0;
            }
            peak = value;
        }
        let dd = if peak > 0.0 { (value - peak) / peak } else { 0.0 };
        if dd < 0.0 {
            in_drawdown = true;
            current_trough = current_trough.min(dd);
        }
        max_dd = max_dd.min(dd);
    }
    if in_drawdown {
        troughs.push(current_trough);
    }

    let avg = if troughs.is_empty() {
        0.0
    } else {
        troughs.iter().sum::<f64>() / troughs.len() as f64
    };
    (max_dd, avg)
}

/// OLS of strategy period returns on benchmark period returns over the
/// intersection of dates.
fn benchmark_block(equity: &EquityCurve, benchmark: &EquityCurve) -> Option<BenchmarkMetrics> {
    let strategy: std::collections::BTreeMap<NaiveDate, f64> =
        equity.returns().into_iter().collect();
    let mut paired: Vec<(f64, f64)> = Vec::new();
    for (date, b) in benchmark.returns() {
        if let Some(&s) = strategy.get(&date) {
            paired.push((s, b));
        }
    }
    if paired.len() < 2 {
        return None;
    }

    let n = paired.len() as f64;
    let mean_s = paired.iter().map(|(s, _)| s).sum::<f64>() / n;
    let mean_b = paired.iter().map(|(_, b)| b).sum::<f64>() / n;
    let cov = paired
        .iter()
        .map(|(s, b)| (s - mean_s) * (b - mean_b))
        .sum::<f64>()
        / n;
    let var_b = paired.iter().map(|(_, b)| (b - mean_b).powi(2)).sum::<f64>() / n;
    let var_s = paired.iter().map(|(s, _)| (s - mean_s).powi(2)).sum::<f64>() / n;

    let beta = if var_b > 0.0 { cov / var_b } else { 0.0 };
    let alpha = (mean_s - beta * mean_b) * TRADING_DAYS_PER_YEAR;

    let active: Vec<f64> = paired.iter().map(|(s, b)| s - b).collect();
    let mean_active = active.iter().sum::<f64>() / n;
    let var_active = active
        .iter()
        .map(|a| (a - mean_active).powi(2))
        .sum::<f64>()
        / n;
    let tracking_error = var_active.sqrt() * TRADING_DAYS_PER_YEAR.sqrt();
    let information_ratio = if tracking_error > 0.0 {
        mean_active * TRADING_DAYS_PER_YEAR / tracking_error
    } else {
        0.0
    };
    let correlation = if var_s > 0.0 && var_b > 0.0 {
        cov / (var_s.sqrt() * var_b.sqrt())
    } else {
        0.0
    };

    Some(BenchmarkMetrics {
        alpha,
        beta,
        information_ratio,
        tracking_error,
        correlation,
    })
}

fn trade_block(trades: &[Trade]) -> (usize, f64, f64, f64, f64) {
    let total = trades.len();
    if total == 0 {
        return (0, 0.0, 0.0, 0.0, 0.0);
    }
    let winners = trades.iter().filter(|t| t.is_winner()).count();
    let win_rate = winners as f64 / total as f64 * 100.0;
    let avg_pnl = trades.iter().map(|t| t.pnl).sum::<f64>() / total as f64;

    let gross_profit: f64 = trades.iter().filter(|t| t.pnl > 0.0).map(|t| t.pnl).sum();
    let gross_loss: f64 = trades
        .iter()
        .filter(|t| t.pnl < 0.0)
        .map(|t| t.pnl.abs())
        .sum();
    let profit_factor = if gross_loss > 0.0 {
        gross_profit / gross_loss
    } else if gross_profit > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };

    let avg_holding =
        trades.iter().map(|t| t.holding_days() as f64).sum::<f64>() / total as f64;

    (total, win_rate, avg_pnl, profit_factor, avg_holding)
}
