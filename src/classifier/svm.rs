use log::{debug, warn};
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use crate::error::ClassifierError;

/// Clamp for non-positive curvature in the pair update.
const TAU: f64 = 1e-12;

/// SMO training parameters.
#[derive(Clone, Copy, Debug)]
pub struct SvmParams {
    pub c: f64,
    /// RBF coefficient; `None` means `1 / n_features`.
    pub gamma: Option<f64>,
    pub tolerance: f64,
    pub max_iterations: usize,
    /// Memory budget for cached kernel rows; at least two rows are kept.
    pub cache_bytes: usize,
}

impl Default for SvmParams {
    fn default() -> Self {
        Self {
            c: 100.0,
            gamma: None,
            tolerance: 1e-3,
            max_iterations: 100_000,
            cache_bytes: 128 << 20,
        }
    }
}

/// Trained binary RBF support-vector machine. Targets are `+1.0`/`-1.0`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SvmModel {
    pub gamma: f64,
    pub c: f64,
    pub support_vectors: Vec<Vec<f64>>,
    /// `alpha_i * y_i` for each support vector.
    pub dual_coef: Vec<f64>,
    pub rho: f64,
}

fn rbf(gamma: f64, a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    let dist: f64 = a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum();
    (-gamma * dist).exp()
}

/// Kernel rows computed on demand; the oldest row is evicted once the
/// budget is spent.
struct KernelCache<'a> {
    x: &'a Array2<f64>,
    gamma: f64,
    capacity: usize,
    rows: HashMap<usize, Rc<Vec<f64>>>,
    order: VecDeque<usize>,
}

impl<'a> KernelCache<'a> {
    fn new(x: &'a Array2<f64>, gamma: f64, cache_bytes: usize) -> Self {
        let row_bytes = (x.nrows() * std::mem::size_of::<f64>()).max(1);
        Self {
            x,
            gamma,
            capacity: (cache_bytes / row_bytes).max(2),
            rows: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn row(&mut self, i: usize) -> Rc<Vec<f64>> {
        if let Some(row) = self.rows.get(&i) {
            return Rc::clone(row);
        }
        if self.rows.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.rows.remove(&oldest);
            }
        }
        let xi = self.x.row(i);
        let row: Rc<Vec<f64>> = Rc::new(
            self.x
                .rows()
                .into_iter()
                .map(|xk| rbf(self.gamma, xi, xk))
                .collect(),
        );
        self.rows.insert(i, Rc::clone(&row));
        self.order.push_back(i);
        row
    }
}

impl SvmModel {
    /// Solves the C-SVC dual with maximal-violating-pair SMO.
    pub fn fit(x: &Array2<f64>, y: &[f64], params: SvmParams) -> Result<Self, ClassifierError> {
        let n = x.nrows();
        if n != y.len() {
            return Err(ClassifierError::LengthMismatch {
                rows: n,
                labels: y.len(),
            });
        }
        let positives = y.iter().filter(|v| **v > 0.0).count();
        if positives == 0 || positives == n {
            return Err(ClassifierError::SingleClass(if n == 0 { 0 } else { 1 }));
        }
        let gamma = params
            .gamma
            .unwrap_or_else(|| 1.0 / x.ncols().max(1) as f64);
        let c = params.c;

        let diag: Vec<f64> = x.rows().into_iter().map(|r| rbf(gamma, r, r)).collect();
        let mut kernel = KernelCache::new(x, gamma, params.cache_bytes);

        let mut alpha = vec![0.0f64; n];
        let mut grad = vec![-1.0f64; n];
        let mut iterations = 0;
        loop {
            if iterations >= params.max_iterations {
                warn!("SMO stopped at the iteration cap ({iterations})");
                break;
            }
            let mut i_best = None;
            let mut g_max = f64::NEG_INFINITY;
            let mut j_best = None;
            let mut g_min = f64::INFINITY;
            for t in 0..n {
                let score = -y[t] * grad[t];
                let in_up = (y[t] > 0.0 && alpha[t] < c) || (y[t] < 0.0 && alpha[t] > 0.0);
                let in_low = (y[t] > 0.0 && alpha[t] > 0.0) || (y[t] < 0.0 && alpha[t] < c);
                if in_up && score > g_max {
                    g_max = score;
                    i_best = Some(t);
                }
                if in_low && score < g_min {
                    g_min = score;
                    j_best = Some(t);
                }
            }
            let (Some(i), Some(j)) = (i_best, j_best) else {
                break;
            };
            if g_max - g_min < params.tolerance {
                break;
            }
            iterations += 1;

            let k_i = kernel.row(i);
            let k_j = kernel.row(j);
            let q_ij = y[i] * y[j] * k_i[j];
            let (old_i, old_j) = (alpha[i], alpha[j]);
            if y[i] != y[j] {
                let quad = (diag[i] + diag[j] + 2.0 * q_ij).max(TAU);
                let delta = (-grad[i] - grad[j]) / quad;
                let diff = alpha[i] - alpha[j];
                alpha[i] += delta;
                alpha[j] += delta;
                if diff > 0.0 {
                    if alpha[j] < 0.0 {
                        alpha[j] = 0.0;
                        alpha[i] = diff;
                    }
                } else if alpha[i] < 0.0 {
                    alpha[i] = 0.0;
                    alpha[j] = -diff;
                }
                if diff > 0.0 {
                    if alpha[i] > c {
                        alpha[i] = c;
                        alpha[j] = c - diff;
                    }
                } else if alpha[j] > c {
                    alpha[j] = c;
                    alpha[i] = c + diff;
                }
            } else {
                let quad = (diag[i] + diag[j] - 2.0 * q_ij).max(TAU);
                let delta = (grad[i] - grad[j]) / quad;
                let sum = alpha[i] + alpha[j];
                alpha[i] -= delta;
                alpha[j] += delta;
                if sum > c {
                    if alpha[i] > c {
                        alpha[i] = c;
                        alpha[j] = sum - c;
                    }
                } else if alpha[j] < 0.0 {
                    alpha[j] = 0.0;
                    alpha[i] = sum;
                }
                if sum > c {
                    if alpha[j] > c {
                        alpha[j] = c;
                        alpha[i] = sum - c;
                    }
                } else if alpha[i] < 0.0 {
                    alpha[i] = 0.0;
                    alpha[j] = sum;
                }
            }

            let d_i = alpha[i] - old_i;
            let d_j = alpha[j] - old_j;
            for k in 0..n {
                grad[k] += y[i] * y[k] * k_i[k] * d_i + y[j] * y[k] * k_j[k] * d_j;
            }
        }

        let rho = compute_rho(&alpha, &grad, y, c);
        let mut support_vectors = Vec::new();
        let mut dual_coef = Vec::new();
        for (idx, a) in alpha.iter().enumerate() {
            if *a > 0.0 {
                support_vectors.push(x.row(idx).to_vec());
                dual_coef.push(a * y[idx]);
            }
        }
        debug!(
            "SMO converged after {iterations} iterations with {} support vectors",
            support_vectors.len()
        );
        Ok(Self {
            gamma,
            c,
            support_vectors,
            dual_coef,
            rho,
        })
    }

    pub fn n_features(&self) -> usize {
        self.support_vectors.first().map_or(0, |sv| sv.len())
    }

    pub fn decision_function(&self, sample: ArrayView1<f64>) -> f64 {
        self.support_vectors
            .iter()
            .zip(&self.dual_coef)
            .map(|(sv, coef)| coef * rbf(self.gamma, ArrayView1::from(sv.as_slice()), sample))
            .sum::<f64>()
            - self.rho
    }

    /// `+1.0` or `-1.0` per row.
    pub fn predict(&self, x: &Array2<f64>) -> Vec<f64> {
        x.rows()
            .into_iter()
            .map(|row| {
                if self.decision_function(row) > 0.0 {
                    1.0
                } else {
                    -1.0
                }
            })
            .collect()
    }
}

fn compute_rho(alpha: &[f64], grad: &[f64], y: &[f64], c: f64) -> f64 {
    let mut upper = f64::INFINITY;
    let mut lower = f64::NEG_INFINITY;
    let mut free_sum = 0.0;
    let mut free_count = 0usize;
    for t in 0..alpha.len() {
        let yg = y[t] * grad[t];
        if alpha[t] >= c {
            if y[t] < 0.0 {
                upper = upper.min(yg);
            } else {
                lower = lower.max(yg);
            }
        } else if alpha[t] <= 0.0 {
            if y[t] > 0.0 {
                upper = upper.min(yg);
            } else {
                lower = lower.max(yg);
            }
        } else {
            free_sum += yg;
            free_count += 1;
        }
    }
    if free_count > 0 {
        free_sum / free_count as f64
    } else {
        (upper + lower) / 2.0
    }
}
