// Small dense linear algebra for the optimizer
// The selected set is tiny (position_count assets), so plain Vec<Vec<f64>>
// with Gauss-Jordan elimination is all that is needed.

use crate::momentum::TRADING_DAYS_PER_YEAR;

/// Annualized mean returns, one per asset row.
pub fn mean_returns(returns: &[Vec<f64>]) -> Vec<f64> {
    returns
        .iter()
        .map(|r| {
            if r.is_empty() {
                0.0
            } else {
                r.iter().sum::<f64>() / r.len() as f64 * TRADING_DAYS_PER_YEAR
            }
        })
        .collect()
}

/// Annualized sample covariance matrix of the asset-by-observation returns.
pub fn covariance_matrix(returns: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let n = returns.len();
    let obs = returns.first().map_or(0, |r| r.len());
    let mut cov = vec![vec![0.0; n]; n];
    if obs < 2 {
        return cov;
    }

    let means: Vec<f64> = returns
        .iter()
        .map(|r| r.iter().sum::<f64>() / obs as f64)
        .collect();

    for i in 0..n {
        for j in i..n {
            let mut acc = 0.0;
            for k in 0..obs {
                acc += (returns[i][k] - means[i]) * (returns[j][k] - means[j]);
            }
            let c = acc / (obs - 1) as f64 * TRADING_DAYS_PER_YEAR;
            cov[i][j] = c;
            cov[j][i] = c;
        }
    }
    cov
}

/// Per-asset annualized volatility from the covariance diagonal.
pub fn volatilities(cov: &[Vec<f64>]) -> Vec<f64> {
    cov.iter()
        .enumerate()
        .map(|(i, row)| row[i].max(0.0).sqrt())
        .collect()
}

/// Correlation matrix derived from a covariance matrix.
pub fn correlation_matrix(cov: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let vols = volatilities(cov);
    let n = cov.len();
    let mut corr = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..n {
            let denom = vols[i] * vols[j];
            corr[i][j] = if denom > 0.0 {
                (cov[i][j] / denom).clamp(-1.0, 1.0)
            } else if i == j {
                1.0
            } else {
                0.0
            };
        }
    }
    corr
}

/// Cheap condition proxy: ratio of the largest to smallest absolute pivot
/// under Gaussian elimination with partial pivoting. Infinity if a pivot
/// vanishes.
pub fn condition_estimate(matrix: &[Vec<f64>]) -> f64 {
    let n = matrix.len();
    if n == 0 {
        return 1.0;
    }
    let mut a: Vec<Vec<f64>> = matrix.to_vec();
    let mut max_pivot = 0.0f64;
    let mut min_pivot = f64::INFINITY;

    for col in 0..n {
        let pivot_row = (col..n)
            .max_by(|&r1, &r2| {
                a[r1][col]
                    .abs()
                    .partial_cmp(&a[r2][col].abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap();
        a.swap(col, pivot_row);
        let pivot = a[col][col];
        if pivot.abs() < 1e-300 {
            return f64::INFINITY;
        }
        max_pivot = max_pivot.max(pivot.abs());
        min_pivot = min_pivot.min(pivot.abs());
        for row in col + 1..n {
            let factor = a[row][col] / pivot;
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
        }
    }
    max_pivot / min_pivot
}

/// Ridge-regularize a near-singular covariance in place:
/// add `1e-8 × trace/n` to the diagonal when the condition proxy exceeds 1e10.
/// Returns true when the adjustment was applied.
pub fn regularize_if_singular(cov: &mut [Vec<f64>]) -> bool {
    let n = cov.len();
    if n == 0 {
        return false;
    }
    if condition_estimate(cov) <= 1e10 {
        return false;
    }
    let trace: f64 = (0..n).map(|i| cov[i][i]).sum();
    let ridge = 1e-8 * trace.max(1e-12) / n as f64;
    for (i, row) in cov.iter_mut().enumerate() {
        row[i] += ridge;
    }
    log::warn!(
        "covariance near-singular (cond > 1e10); ridge-regularized with {:.3e}",
        ridge
    );
    true
}

/// Solve `A x = b` by Gauss-Jordan with partial pivoting.
/// None when the system is singular.
pub fn solve(matrix: &[Vec<f64>], rhs: &[f64]) -> Option<Vec<f64>> {
    let n = matrix.len();
    if n == 0 || rhs.len() != n {
        return None;
    }
    let mut a: Vec<Vec<f64>> = matrix.to_vec();
    let mut b: Vec<f64> = rhs.to_vec();

    for col in 0..n {
        let pivot_row = (col..n)
            .max_by(|&r1, &r2| {
                a[r1][col]
                    .abs()
                    .partial_cmp(&a[r2][col].abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap();
        if a[pivot_row][col].abs() < 1e-14 {
            return None;
        }
        a.swap(col, pivot_row);
        b.swap(col, pivot_row);

        let pivot = a[col][col];
        for k in col..n {
            a[col][k] /= pivot;
        }
        b[col] /= pivot;

        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = a[row][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    Some(b)
}

/// Matrix-vector product.
pub fn matvec(matrix: &[Vec<f64>], v: &[f64]) -> Vec<f64> {
    matrix
        .iter()
        .map(|row| row.iter().zip(v).map(|(a, b)| a * b).sum())
        .collect()
}

/// Quadratic form `vᵀ A v`.
pub fn quadratic_form(matrix: &[Vec<f64>], v: &[f64]) -> f64 {
    matvec(matrix, v).iter().zip(v).map(|(a, b)| a * b).sum()
}
