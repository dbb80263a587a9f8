//! CPU reference solver for fixed-effect least squares.
//!
//! Solves `y_i ≈ Σ_q x_q[i] · a_q[refs_q[i]]` by alternating projections:
//! each sweep updates one fixed effect at a time (Gauss–Seidel), projecting
//! the current residual onto that dimension's groups.
//!
//! # Coefficient updates
//!
//! For fixed effect `q` with interaction `x` and observation weights `w`,
//! the update of group `g` is
//!
//! ```text
//! delta_g = Σ_{i ∈ g} w_i x_i r_i / Σ_{i ∈ g} w_i x_i²
//! ```
//!
//! followed by `r_i -= x_i · delta_{g(i)}`. Iteration stops when the largest
//! update of a sweep falls below `tol`.
//!
//! The coefficients returned are raw: with two or more unweighted fixed
//! effects they are only one of many equivalent solutions, and
//! [`normalize`](crate::normalize) picks the canonical one.

use crate::errors::{check_len, Result};
use crate::fixed_effect::FixedEffect;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;
use tracing::{debug, warn};

// =============================================================================
// SolverConfig
// =============================================================================

/// Iteration parameters.
#[derive(Clone, Copy, Debug)]
pub struct SolverConfig {
    /// Convergence tolerance on the largest coefficient update of a sweep.
    pub tol: f64,

    /// Maximum number of sweeps before giving up.
    pub maxiter: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            tol: 1e-8,
            maxiter: 10_000,
        }
    }
}

// =============================================================================
// Results
// =============================================================================

/// Whether the iterative algorithm has converged.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConvergenceState {
    Converged,
    #[default]
    NotConverged,
}

/// Result of solving for a single response.
#[derive(Debug, Clone)]
pub struct SolveResult {
    /// `y` minus the fitted fixed effects (length: `n_obs`).
    pub residuals: Array1<f64>,

    /// Raw coefficients, one vector of length `n_groups` per fixed effect.
    pub coefficients: Vec<Array1<f64>>,

    pub convergence: ConvergenceState,

    /// Number of sweeps used.
    pub iterations: usize,
}

/// Result of solving several responses column by column.
pub struct ColumnsResult {
    /// Residuals with the shape of the input.
    pub residuals: Array2<f64>,

    /// True if all columns converged.
    pub success: bool,
}

// =============================================================================
// SolverContext
// =============================================================================

/// Everything that does not depend on the response: group masses and weights.
struct SolverContext<'a> {
    fes: &'a [FixedEffect],
    weights: Option<ArrayView1<'a, f64>>,
    /// `1 / Σ_{i ∈ g} w_i x_i²` per fixed effect and group; 0 for empty groups.
    inv_mass: Vec<Vec<f64>>,
}

impl<'a> SolverContext<'a> {
    fn new(
        fes: &'a [FixedEffect],
        n_obs: usize,
        weights: Option<ArrayView1<'a, f64>>,
    ) -> Result<Self> {
        for fe in fes {
            check_len("fixed effect", n_obs, fe.len())?;
        }
        if let Some(w) = &weights {
            check_len("weights", n_obs, w.len())?;
        }

        let inv_mass: Vec<Vec<f64>> = fes
            .iter()
            .map(|fe| {
                let mut mass = vec![0.0; fe.n_groups()];
                for (i, &g) in fe.refs().iter().enumerate() {
                    if g == 0 {
                        continue;
                    }
                    let x = fe.weight(i);
                    let w = weights.as_ref().map_or(1.0, |w| w[i]);
                    mass[g as usize - 1] += w * x * x;
                }
                mass.into_iter()
                    .map(|m| if m > 0.0 { 1.0 / m } else { 0.0 })
                    .collect::<Vec<f64>>()
            })
            .collect();

        Ok(Self {
            fes,
            weights,
            inv_mass,
        })
    }

    #[inline]
    fn obs_weight(&self, i: usize) -> f64 {
        self.weights.as_ref().map_or(1.0, |w| w[i])
    }
}

// =============================================================================
// Sweeper
// =============================================================================

/// Owns the per-group buffers, reused across `solve` calls.
struct Sweeper<'s, 'a> {
    ctx: &'s SolverContext<'a>,
    config: &'s SolverConfig,
    /// Per-group scratch: weighted residual sums, then coefficient updates.
    deltas: Vec<Vec<f64>>,
}

impl<'s, 'a> Sweeper<'s, 'a> {
    fn new(ctx: &'s SolverContext<'a>, config: &'s SolverConfig) -> Self {
        Self {
            ctx,
            config,
            deltas: ctx.fes.iter().map(|fe| vec![0.0; fe.n_groups()]).collect(),
        }
    }

    /// Project the residual onto fixed effect `q`; returns the largest update.
    fn sweep(&mut self, q: usize, residuals: &mut [f64], coef: &mut [f64]) -> f64 {
        let fe = &self.ctx.fes[q];
        let refs = fe.refs();
        let delta = &mut self.deltas[q];
        delta.fill(0.0);

        for (i, &g) in refs.iter().enumerate() {
            if g != 0 {
                delta[g as usize - 1] += self.ctx.obs_weight(i) * fe.weight(i) * residuals[i];
            }
        }

        let mut max_delta = 0.0f64;
        for ((d, c), &inv) in delta.iter_mut().zip(coef.iter_mut()).zip(&self.ctx.inv_mass[q]) {
            *d *= inv;
            *c += *d;
            max_delta = max_delta.max(d.abs());
        }

        for (i, &g) in refs.iter().enumerate() {
            if g != 0 {
                residuals[i] -= fe.weight(i) * delta[g as usize - 1];
            }
        }
        max_delta
    }

    fn solve(&mut self, y: ArrayView1<f64>) -> SolveResult {
        let n_fe = self.ctx.fes.len();
        let mut residuals: Vec<f64> = y.to_vec();
        let mut coefficients: Vec<Vec<f64>> =
            self.ctx.fes.iter().map(|fe| vec![0.0; fe.n_groups()]).collect();

        let (convergence, iterations) = match n_fe {
            0 => (ConvergenceState::Converged, 0),
            // A single projection is exact
            1 => {
                self.sweep(0, &mut residuals, &mut coefficients[0]);
                (ConvergenceState::Converged, 1)
            }
            _ => {
                let mut state = ConvergenceState::NotConverged;
                let mut iter = 0;
                while iter < self.config.maxiter {
                    iter += 1;
                    let mut max_delta = 0.0f64;
                    for q in 0..n_fe {
                        let delta = self.sweep(q, &mut residuals, &mut coefficients[q]);
                        max_delta = max_delta.max(delta);
                    }
                    if max_delta < self.config.tol {
                        state = ConvergenceState::Converged;
                        break;
                    }
                }
                (state, iter)
            }
        };

        SolveResult {
            residuals: Array1::from(residuals),
            coefficients: coefficients.into_iter().map(Array1::from).collect(),
            convergence,
            iterations,
        }
    }
}

// =============================================================================
// Entry points
// =============================================================================

/// Solve for the raw fixed-effect coefficients of `y`.
///
/// # Arguments
///
/// * `fes` - Fixed effects over the observations of `y`
/// * `y` - Response (length: `n_obs`)
/// * `weights` - Observation weights, or `None` for an unweighted fit
/// * `config` - Tolerance and iteration cap
///
/// # Errors
///
/// `DimensionMismatch` if a fixed effect or `weights` does not match `y`.
pub fn solve_coefficients<'a>(
    fes: &'a [FixedEffect],
    y: ArrayView1<f64>,
    weights: Option<ArrayView1<'a, f64>>,
    config: &SolverConfig,
) -> Result<SolveResult> {
    let ctx = SolverContext::new(fes, y.len(), weights)?;
    let result = Sweeper::new(&ctx, config).solve(y);

    match result.convergence {
        ConvergenceState::Converged => debug!(
            "Solved {} fixed effects in {} iterations",
            fes.len(),
            result.iterations
        ),
        ConvergenceState::NotConverged => warn!(
            "Fixed effect solver stopped after {} iterations without converging",
            result.iterations
        ),
    }
    Ok(result)
}

/// Residualize `y` on the fixed effects.
///
/// Same as [`solve_coefficients`]; the coefficients are part of the result
/// but callers typically only read `residuals` and `convergence`.
pub fn solve_residuals<'a>(
    fes: &'a [FixedEffect],
    y: ArrayView1<f64>,
    weights: Option<ArrayView1<'a, f64>>,
    config: &SolverConfig,
) -> Result<SolveResult> {
    solve_coefficients(fes, y, weights, config)
}

/// Residualize every column of `x`, in parallel.
///
/// Uses `map_init` so that each rayon worker builds one sweeper and reuses
/// its buffers for all the columns it processes.
pub fn solve_residuals_columns<'a>(
    fes: &'a [FixedEffect],
    x: ArrayView2<f64>,
    weights: Option<ArrayView1<'a, f64>>,
    config: &SolverConfig,
) -> Result<ColumnsResult> {
    let (n_obs, n_cols) = x.dim();
    let ctx = SolverContext::new(fes, n_obs, weights)?;

    let results: Vec<SolveResult> = (0..n_cols)
        .into_par_iter()
        .map_init(
            || Sweeper::new(&ctx, config),
            |sweeper, k| sweeper.solve(x.column(k)),
        )
        .collect();

    let mut residuals = Array2::<f64>::zeros((n_obs, n_cols));
    let mut not_converged = 0usize;
    for (k, result) in results.into_iter().enumerate() {
        if result.convergence == ConvergenceState::NotConverged {
            not_converged += 1;
        }
        residuals.index_axis_mut(Axis(1), k).assign(&result.residuals);
    }

    if not_converged > 0 {
        warn!("{} of {} columns did not converge", not_converged, n_cols);
    }
    Ok(ColumnsResult {
        residuals,
        success: not_converged == 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FixedEffectError;
    use crate::normalize::normalize;
    use approx::assert_relative_eq;

    fn fe(refs: Vec<u32>) -> FixedEffect {
        let n = refs.iter().copied().max().unwrap_or(0) as usize;
        FixedEffect::from_labels(Array1::from(refs), n, None).unwrap()
    }

    /// Balanced panel: 10 firms x 5 years.
    fn panel() -> (Vec<FixedEffect>, Array1<f64>, Vec<Array1<f64>>) {
        let n_obs = 50;
        let firm: Vec<u32> = (0..n_obs).map(|i| (i % 10) as u32 + 1).collect();
        let year: Vec<u32> = (0..n_obs).map(|i| (i / 10) as u32 + 1).collect();

        let a: Array1<f64> = (0..10).map(|g| g as f64 * 0.7 - 2.0).collect();
        let b: Array1<f64> = (0..5).map(|t| (t as f64).powi(2)).collect();
        let y: Array1<f64> = (0..n_obs)
            .map(|i| a[firm[i] as usize - 1] + b[year[i] as usize - 1])
            .collect();

        (vec![fe(firm), fe(year)], y, vec![a, b])
    }

    #[test]
    fn test_single_fe_closed_form() {
        let fes = vec![fe(vec![1, 1, 2, 2, 2])];
        let y = Array1::from(vec![1.0, 3.0, 2.0, 4.0, 6.0]);

        let result = solve_coefficients(&fes, y.view(), None, &SolverConfig::default()).unwrap();

        assert_eq!(result.convergence, ConvergenceState::Converged);
        assert_eq!(result.iterations, 1);
        assert_relative_eq!(result.coefficients[0][0], 2.0, epsilon = 1e-12);
        assert_relative_eq!(result.coefficients[0][1], 4.0, epsilon = 1e-12);
        assert_relative_eq!(result.residuals.sum(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_two_fe_recovers_normalized_truth() {
        let (fes, y, truth) = panel();
        let result = solve_coefficients(&fes, y.view(), None, &SolverConfig::default()).unwrap();

        assert_eq!(result.convergence, ConvergenceState::Converged);
        assert!(result.residuals.iter().all(|r| r.abs() < 1e-6));

        let estimated = normalize(result.coefficients, &fes).unwrap();
        let expected = normalize(truth, &fes).unwrap();
        for (est, exp) in estimated.iter().zip(&expected) {
            for (e, t) in est.iter().zip(exp.iter()) {
                assert_relative_eq!(*e, *t, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_interaction_slope_per_group() {
        // y = slope_g * x, one slope per group
        let x = Array1::from(vec![1.0, 2.0, 3.0, 1.0, 2.0]);
        let g = crate::group::GroupedArray::from_refs(Array1::from(vec![1u32, 1, 1, 2, 2]).view())
            .unwrap();
        let fes = vec![FixedEffect::with_interaction(g, x.clone()).unwrap()];
        let y = Array1::from(vec![2.0, 4.0, 6.0, -1.0, -2.0]);

        let result = solve_coefficients(&fes, y.view(), None, &SolverConfig::default()).unwrap();
        assert_relative_eq!(result.coefficients[0][0], 2.0, epsilon = 1e-12);
        assert_relative_eq!(result.coefficients[0][1], -1.0, epsilon = 1e-12);
        assert!(result.residuals.iter().all(|r| r.abs() < 1e-12));
    }

    #[test]
    fn test_weighted_mean() {
        let fes = vec![fe(vec![1, 1])];
        let y = Array1::from(vec![0.0, 3.0]);
        let w = Array1::from(vec![1.0, 2.0]);

        let result =
            solve_coefficients(&fes, y.view(), Some(w.view()), &SolverConfig::default()).unwrap();
        assert_relative_eq!(result.coefficients[0][0], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_missing_observations_are_skipped() {
        let fes = vec![fe(vec![1, 0, 1])];
        let y = Array1::from(vec![1.0, 100.0, 3.0]);

        let result = solve_residuals(&fes, y.view(), None, &SolverConfig::default()).unwrap();
        assert_eq!(result.convergence, ConvergenceState::Converged);
        assert_eq!(result.residuals.to_vec(), vec![-1.0, 100.0, 1.0]);
    }

    #[test]
    fn test_not_converged_with_tiny_budget() {
        // Unbalanced chain converges slowly
        let fes = vec![fe(vec![1, 2, 2, 3, 3, 4]), fe(vec![1, 1, 2, 2, 3, 3])];
        let y = Array1::from(vec![1.0, 5.0, -2.0, 7.0, 0.5, 3.0]);
        let config = SolverConfig {
            maxiter: 1,
            tol: 1e-14,
        };
        let result = solve_coefficients(&fes, y.view(), None, &config).unwrap();
        assert_eq!(result.convergence, ConvergenceState::NotConverged);
        assert_eq!(result.iterations, 1);
    }

    #[test]
    fn test_columns_match_single_solves() {
        let (fes, y, _) = panel();
        let noise: Array1<f64> = (0..y.len()).map(|i| ((i * 7) % 11) as f64).collect();
        let mut x = Array2::<f64>::zeros((y.len(), 2));
        x.column_mut(0).assign(&y);
        x.column_mut(1).assign(&(&y + &noise));

        let config = SolverConfig::default();
        let batch = solve_residuals_columns(&fes, x.view(), None, &config).unwrap();
        assert!(batch.success);

        for k in 0..2 {
            let single = solve_residuals(&fes, x.column(k), None, &config).unwrap();
            for (a, b) in batch.residuals.column(k).iter().zip(single.residuals.iter()) {
                assert_relative_eq!(*a, *b, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_weighted_columns_borrow_short_lived_weights() {
        let (fes, y, _) = panel();
        let x = y.clone().insert_axis(Axis(1));
        let config = SolverConfig::default();

        let batch = {
            let w: Array1<f64> = (0..y.len()).map(|i| 1.0 + (i % 3) as f64).collect();
            solve_residuals_columns(&fes, x.view(), Some(w.view()), &config).unwrap()
        };
        assert!(batch.success);
        assert!(batch.residuals.iter().all(|r| r.abs() < 1e-6));
    }

    #[test]
    fn test_length_errors() {
        let fes = vec![fe(vec![1, 2, 1])];
        let y = Array1::from(vec![1.0, 2.0]);
        assert!(matches!(
            solve_coefficients(&fes, y.view(), None, &SolverConfig::default()),
            Err(FixedEffectError::DimensionMismatch { .. })
        ));

        let y = Array1::from(vec![1.0, 2.0, 3.0]);
        let w = Array1::from(vec![1.0]);
        assert_eq!(
            solve_coefficients(&fes, y.view(), Some(w.view()), &SolverConfig::default())
                .unwrap_err(),
            FixedEffectError::DimensionMismatch {
                what: "weights",
                expected: 3,
                found: 1
            }
        );
    }
}
