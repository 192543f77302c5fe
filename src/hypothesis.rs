//! Two-sample and paired tests used to compare simulated and theoretical
//! win probabilities.

use crate::special::{kolmogorov_q, normal_cdf, student_t_two_sided};

/// Largest sample for which the Wilcoxon null distribution is enumerated.
const WILCOXON_EXACT_MAX: usize = 50;
/// Largest `n1 * n2` for which the KS null distribution is enumerated.
const KS_EXACT_MAX_CELLS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TestOutcome {
    pub statistic: f64,
    pub p_value: f64,
}

impl TestOutcome {
    /// True when the test fails to reject equality at `alpha`.
    pub fn passes(&self, alpha: f64) -> bool {
        self.p_value > alpha
    }
}

/// Two-sample Kolmogorov-Smirnov test.
///
/// When `n1 * n2 <= 10_000` the p-value is exact, from counting the lattice
/// paths that stay inside the observed band. Larger samples use the
/// asymptotic Kolmogorov distribution with Stephens' effective-size
/// correction `sqrt(ne) + 0.12 + 0.11 / sqrt(ne)`.
pub fn ks_two_sample(a: &[f64], b: &[f64]) -> TestOutcome {
    if a.is_empty() || b.is_empty() {
        return TestOutcome {
            statistic: f64::NAN,
            p_value: f64::NAN,
        };
    }
    let mut x = a.to_vec();
    let mut y = b.to_vec();
    x.sort_by(f64::total_cmp);
    y.sort_by(f64::total_cmp);

    let (n1, n2) = (x.len() as f64, y.len() as f64);
    let (mut i, mut j) = (0, 0);
    let mut d: f64 = 0.0;
    while i < x.len() && j < y.len() {
        let v = x[i].min(y[j]);
        while i < x.len() && x[i] <= v {
            i += 1;
        }
        while j < y.len() && y[j] <= v {
            j += 1;
        }
        d = d.max((i as f64 / n1 - j as f64 / n2).abs());
    }

    let p_value = if x.len() * y.len() <= KS_EXACT_MAX_CELLS {
        ks_exact_p_value(x.len(), y.len(), d)
    } else {
        let en = (n1 * n2 / (n1 + n2)).sqrt();
        kolmogorov_q((en + 0.12 + 0.11 / en) * d)
    };
    TestOutcome {
        statistic: d,
        p_value: p_value.clamp(0.0, 1.0),
    }
}

/// P(D >= d) under the null for samples of size `m` and `n`.
///
/// D is a multiple of 1 / (m n), so the band |i/m - j/n| < d is tested in
/// integers as |i n - j m| < round(d m n).
fn ks_exact_p_value(m: usize, n: usize, d: f64) -> f64 {
    let band = (d * (m * n) as f64).round() as i64;
    if band <= 0 {
        return 1.0;
    }
    let inside = |i: usize, j: usize| ((i * n) as i64 - (j * m) as i64).abs() < band;

    let mut paths = vec![0.0_f64; n + 1];
    for i in 0..=m {
        for j in 0..=n {
            paths[j] = if !inside(i, j) {
                0.0
            } else if i == 0 && j == 0 {
                1.0
            } else {
                let up = if i > 0 { paths[j] } else { 0.0 };
                let left = if j > 0 { paths[j - 1] } else { 0.0 };
                up + left
            };
        }
    }

    let mut total = 1.0_f64;
    for k in 1..=m {
        total = total * (n + k) as f64 / k as f64;
    }
    1.0 - paths[n] / total
}

/// Wilcoxon signed-rank test on paired samples, two-sided.
///
/// Zero differences are dropped. The statistic is min(W+, W-). The null
/// distribution is enumerated exactly for up to 50 untied differences,
/// otherwise the normal approximation with tie correction is used.
pub fn wilcoxon_signed_rank(x: &[f64], y: &[f64]) -> TestOutcome {
    let diffs: Vec<f64> = x
        .iter()
        .zip(y)
        .map(|(a, b)| a - b)
        .filter(|d| *d != 0.0)
        .collect();
    let n = diffs.len();
    if n == 0 {
        return TestOutcome {
            statistic: 0.0,
            p_value: 1.0,
        };
    }

    let abs: Vec<f64> = diffs.iter().map(|d| d.abs()).collect();
    let (ranks, tie_sizes) = average_ranks(&abs);
    let w_plus: f64 = diffs
        .iter()
        .zip(&ranks)
        .filter(|(d, _)| **d > 0.0)
        .map(|(_, r)| r)
        .sum();
    let total = (n * (n + 1)) as f64 / 2.0;
    let statistic = w_plus.min(total - w_plus);

    let has_ties = tie_sizes.iter().any(|t| *t > 1);
    let p_value = if n <= WILCOXON_EXACT_MAX && !has_ties {
        wilcoxon_exact_p(n, statistic)
    } else {
        let nf = n as f64;
        let mean = nf * (nf + 1.0) / 4.0;
        let tie_term: f64 = tie_sizes
            .iter()
            .map(|&t| {
                let t = t as f64;
                t * t * t - t
            })
            .sum();
        let var = nf * (nf + 1.0) * (2.0 * nf + 1.0) / 24.0 - tie_term / 48.0;
        if var <= 0.0 {
            1.0
        } else {
            let z = (statistic - mean) / var.sqrt();
            2.0 * normal_cdf(-z.abs())
        }
    };
    TestOutcome {
        statistic,
        p_value: p_value.clamp(0.0, 1.0),
    }
}

/// 2 * P(W <= w) under the exact null, by counting subsets of 1..=n per rank sum.
fn wilcoxon_exact_p(n: usize, w: f64) -> f64 {
    let max_sum = n * (n + 1) / 2;
    let mut counts = vec![0.0f64; max_sum + 1];
    counts[0] = 1.0;
    for k in 1..=n {
        for s in (k..=max_sum).rev() {
            counts[s] += counts[s - k];
        }
    }
    let limit = w.floor() as usize;
    let below: f64 = counts.iter().take(limit + 1).sum();
    let total = 2f64.powi(n as i32);
    (2.0 * below / total).min(1.0)
}

/// 1-based average ranks and the size of each tie block.
fn average_ranks(values: &[f64]) -> (Vec<f64>, Vec<usize>) {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
    let mut ranks = vec![0.0; values.len()];
    let mut ties = Vec::new();
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && values[order[end]] == values[order[start]] {
            end += 1;
        }
        let avg = (start + end + 1) as f64 / 2.0;
        for &idx in &order[start..end] {
            ranks[idx] = avg;
        }
        ties.push(end - start);
        start = end;
    }
    (ranks, ties)
}

/// Paired-samples t-test on the mean difference, two-sided.
pub fn paired_t(x: &[f64], y: &[f64]) -> TestOutcome {
    let diffs: Vec<f64> = x.iter().zip(y).map(|(a, b)| a - b).collect();
    let n = diffs.len();
    if n < 2 {
        return TestOutcome {
            statistic: f64::NAN,
            p_value: f64::NAN,
        };
    }
    let nf = n as f64;
    let mean = diffs.iter().sum::<f64>() / nf;
    let var = diffs.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / (nf - 1.0);
    if var == 0.0 {
        let (statistic, p_value) = if mean == 0.0 {
            (0.0, 1.0)
        } else {
            (mean.signum() * f64::INFINITY, 0.0)
        };
        return TestOutcome { statistic, p_value };
    }
    let statistic = mean / (var / nf).sqrt();
    TestOutcome {
        statistic,
        p_value: student_t_two_sided(statistic, nf - 1.0),
    }
}

/// Normal-approximation half-width of a binomial proportion: z * sqrt(p(1-p)/trials).
pub fn binomial_half_width(p: f64, trials: u64, z: f64) -> f64 {
    if trials == 0 {
        return f64::INFINITY;
    }
    z * (p * (1.0 - p) / trials as f64).max(0.0).sqrt()
}

pub fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    if n < 2 {
        return f64::NAN;
    }
    let nf = n as f64;
    let mx = x[..n].iter().sum::<f64>() / nf;
    let my = y[..n].iter().sum::<f64>() / nf;
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (a, b) in x.iter().zip(y) {
        sxy += (a - mx) * (b - my);
        sxx += (a - mx).powi(2);
        syy += (b - my).powi(2);
    }
    if sxx == 0.0 || syy == 0.0 {
        return f64::NAN;
    }
    sxy / (sxx * syy).sqrt()
}
