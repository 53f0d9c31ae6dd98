// Hierarchical risk parity
// Correlation-distance clustering (single linkage) orders the assets so
// correlated names sit together; recursive bisection then splits capital
// by inverse cluster variance. Below three assets the hierarchy is
// meaningless and the caller should use equal weight.

use crate::optimizer::matrix::correlation_matrix;

/// Minimum asset count for the hierarchy to be worth building.
pub const MIN_ASSETS: usize = 3;

/// HRP weights over the covariance, in input asset order.
/// None for fewer than `MIN_ASSETS` assets.
pub fn hrp_weights(cov: &[Vec<f64>]) -> Option<Vec<f64>> {
    let n = cov.len();
    if n < MIN_ASSETS {
        return None;
    }

    let order = quasi_diagonal_order(cov);
    let mut weights = vec![1.0; n];
    bisect(&order, cov, 1.0, &mut weights);

    let total: f64 = weights.iter().sum();
    if total <= 0.0 || !total.is_finite() {
        return None;
    }
    for w in &mut weights {
        *w /= total;
    }
    Some(weights)
}

/// Correlation distance: `sqrt(0.5 × (1 − ρ))`, zero for perfectly
/// correlated assets, one for perfectly anti-correlated.
fn distance_matrix(cov: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let corr = correlation_matrix(cov);
    corr.iter()
        .map(|row| row.iter().map(|&r| (0.5 * (1.0 - r)).max(0.0).sqrt()).collect())
        .collect()
}

/// Leaf order from greedy single-linkage agglomeration: repeatedly merge
/// the two closest clusters, concatenating their member lists. Correlated
/// assets end up adjacent, which is all the bisection needs.
fn quasi_diagonal_order(cov: &[Vec<f64>]) -> Vec<usize> {
    let dist = distance_matrix(cov);
    let mut clusters: Vec<Vec<usize>> = (0..cov.len()).map(|i| vec![i]).collect();

    while clusters.len() > 1 {
        let mut best = (0usize, 1usize);
        let mut best_dist = f64::INFINITY;
        for a in 0..clusters.len() {
            for b in a + 1..clusters.len() {
                let linkage = single_linkage(&clusters[a], &clusters[b], &dist);
                if linkage < best_dist {
                    best_dist = linkage;
                    best = (a, b);
                }
            }
        }
        let merged_tail = clusters.remove(best.1);
        clusters[best.0].extend(merged_tail);
    }

    clusters.pop().unwrap()
}

fn single_linkage(a: &[usize], b: &[usize], dist: &[Vec<f64>]) -> f64 {
    let mut min = f64::INFINITY;
    for &i in a {
        for &j in b {
            if dist[i][j] < min {
                min = dist[i][j];
            }
        }
    }
    min
}

/// Inverse-variance weights within a cluster, normalized to sum 1.
fn inverse_variance_weights(items: &[usize], cov: &[Vec<f64>]) -> Vec<f64> {
    let raw: Vec<f64> = items
        .iter()
        .map(|&i| {
            let var = cov[i][i];
            if var > 0.0 {
                1.0 / var
            } else {
                0.0
            }
        })
        .collect();
    let total: f64 = raw.iter().sum();
    if total <= 0.0 {
        return vec![1.0 / items.len() as f64; items.len()];
    }
    raw.into_iter().map(|w| w / total).collect()
}

/// Cluster variance under its internal inverse-variance allocation.
fn cluster_variance(items: &[usize], cov: &[Vec<f64>]) -> f64 {
    let w = inverse_variance_weights(items, cov);
    let mut var = 0.0;
    for (a, &i) in items.iter().enumerate() {
        for (b, &j) in items.iter().enumerate() {
            var += w[a] * w[b] * cov[i][j];
        }
    }
    var
}

/// Recursive bisection: split the ordered list in half, allocate between
/// the halves by inverse cluster variance, recurse.
fn bisect(items: &[usize], cov: &[Vec<f64>], allocation: f64, weights: &mut [f64]) {
    if items.len() == 1 {
        weights[items[0]] = allocation;
        return;
    }
    let mid = items.len() / 2;
    let (left, right) = items.split_at(mid);

    let var_left = cluster_variance(left, cov);
    let var_right = cluster_variance(right, cov);
    let total = var_left + var_right;
    let alpha = if total > 0.0 {
        1.0 - var_left / total
    } else {
        0.5
    };

    bisect(left, cov, allocation * alpha, weights);
    bisect(right, cov, allocation * (1.0 - alpha), weights);
}
