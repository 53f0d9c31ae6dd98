// Equal-risk-contribution weights via damped fixed-point iteration
//
// Optimality condition: w_i × (Σw)_i equal across assets. The fixed point
// w_i ∝ 1 / (Σw)_i is iterated with damping until the contributions
// equalize; non-convergence is reported so the caller can fall back.

use crate::optimizer::matrix::{matvec, quadratic_form};

const MAX_ITERATIONS: usize = 1_000;
const CONVERGENCE_TOL: f64 = 1e-12;

/// Risk-parity weights for the given covariance, or None when the
/// iteration fails to converge (degenerate covariance).
pub fn risk_parity_weights(cov: &[Vec<f64>]) -> Option<Vec<f64>> {
    let n = cov.len();
    if n == 0 {
        return None;
    }
    if n == 1 {
        return Some(vec![1.0]);
    }

    let mut w = vec![1.0 / n as f64; n];

    for _ in 0..MAX_ITERATIONS {
        let marginal = matvec(cov, &w);
        if marginal.iter().any(|&m| !m.is_finite() || m <= 0.0) {
            return None;
        }

        let mut proposal: Vec<f64> = marginal.iter().map(|&m| 1.0 / m).collect();
        let total: f64 = proposal.iter().sum();
        for p in &mut proposal {
            *p /= total;
        }

        // Damping keeps the iteration from oscillating on high-correlation
        // covariances.
        for (wi, pi) in w.iter_mut().zip(&proposal) {
            *wi = 0.5 * *wi + 0.5 * pi;
        }
        let total: f64 = w.iter().sum();
        for wi in &mut w {
            *wi /= total;
        }

        if contribution_spread(cov, &w) < CONVERGENCE_TOL {
            return Some(w);
        }
    }

    // Accept a looser tolerance before giving up entirely.
    if contribution_spread(cov, &w) < 1e-6 {
        return Some(w);
    }
    None
}

/// Max absolute deviation of fractional risk contributions from 1/n.
pub fn contribution_spread(cov: &[Vec<f64>], w: &[f64]) -> f64 {
    let n = w.len();
    let total_var = quadratic_form(cov, w);
    if total_var <= 0.0 {
        return f64::INFINITY;
    }
    let marginal = matvec(cov, w);
    let target = 1.0 / n as f64;
    w.iter()
        .zip(&marginal)
        .map(|(wi, mi)| (wi * mi / total_var - target).abs())
        .fold(0.0, f64::max)
}
