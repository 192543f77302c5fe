//! Projected-gradient minimizer for smooth objectives with lower bounds only.
//!
//! Steps use the Barzilai-Borwein length with Armijo backtracking along the
//! projection arc, so every accepted iterate has an objective no larger than
//! the one before it.

pub trait Objective {
    fn value(&self, x: &[f64]) -> f64;
    fn gradient(&self, x: &[f64], grad: &mut [f64]);
}

#[derive(Debug, Clone, Copy)]
pub struct MinimizeOptions {
    pub max_iterations: usize,
    /// Stop when (f_k - f_{k+1}) / max(|f_k|, |f_{k+1}|) falls below this.
    pub ftol: f64,
    /// Stop when the infinity norm of the projected gradient falls below this.
    pub pgtol: f64,
    /// Stop when the objective itself falls below this.
    pub fatol: f64,
    pub max_backtracks: usize,
}

impl Default for MinimizeOptions {
    fn default() -> Self {
        Self {
            max_iterations: 10_000,
            ftol: 2.2e-9,
            pgtol: 1e-10,
            fatol: 1e-30,
            max_backtracks: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    ProjectedGradient,
    RelativeReduction,
    ObjectiveFloor,
    MaxIterations,
    LineSearchFailed,
    NonFinite,
}

impl Termination {
    pub fn converged(self) -> bool {
        matches!(
            self,
            Termination::ProjectedGradient
                | Termination::RelativeReduction
                | Termination::ObjectiveFloor
        )
    }
}

#[derive(Debug, Clone)]
pub struct Minimum {
    pub x: Vec<f64>,
    pub value: f64,
    pub iterations: usize,
    pub termination: Termination,
    /// Objective after each accepted iterate, starting with the initial point.
    pub history: Vec<f64>,
}

impl Minimum {
    pub fn converged(&self) -> bool {
        self.termination.converged()
    }
}

const ARMIJO_C: f64 = 1e-4;
const STEP_MIN: f64 = 1e-30;
const STEP_MAX: f64 = 1e30;

pub fn minimize_bounded<F: Objective>(
    objective: &F,
    x0: &[f64],
    lower: &[f64],
    opts: MinimizeOptions,
) -> Minimum {
    let n = x0.len();
    let mut x: Vec<f64> = x0.to_vec();
    project(&mut x, lower);

    let mut fx = objective.value(&x);
    let mut grad = vec![0.0; n];
    objective.gradient(&x, &mut grad);
    let mut history = vec![fx];

    if !fx.is_finite() || grad.iter().any(|g| !g.is_finite()) {
        return Minimum {
            x,
            value: fx,
            iterations: 0,
            termination: Termination::NonFinite,
            history,
        };
    }

    let pg0 = projected_gradient_norm(&x, &grad, lower);
    let mut step = if pg0 > 0.0 { 1.0 / pg0 } else { 1.0 };

    let mut x_new = vec![0.0; n];
    let mut grad_new = vec![0.0; n];

    for iter in 0..opts.max_iterations {
        if fx <= opts.fatol {
            return finish(x, fx, iter, Termination::ObjectiveFloor, history);
        }
        if projected_gradient_norm(&x, &grad, lower) <= opts.pgtol {
            return finish(x, fx, iter, Termination::ProjectedGradient, history);
        }

        let mut accepted = None;
        let mut trial = step;
        for _ in 0..opts.max_backtracks {
            for i in 0..n {
                x_new[i] = (x[i] - trial * grad[i]).max(lower[i]);
            }
            let descent: f64 = (0..n).map(|i| grad[i] * (x_new[i] - x[i])).sum();
            if descent >= 0.0 {
                // Projection pinned every moving coordinate; nothing left to gain.
                break;
            }
            let f_new = objective.value(&x_new);
            if f_new.is_finite() && f_new <= fx + ARMIJO_C * descent {
                accepted = Some(f_new);
                break;
            }
            trial *= 0.5;
        }

        let Some(f_new) = accepted else {
            return finish(x, fx, iter, Termination::LineSearchFailed, history);
        };

        objective.gradient(&x_new, &mut grad_new);
        if grad_new.iter().any(|g| !g.is_finite()) {
            return finish(x, fx, iter, Termination::NonFinite, history);
        }

        let mut ss = 0.0;
        let mut sy = 0.0;
        for i in 0..n {
            let s = x_new[i] - x[i];
            let y = grad_new[i] - grad[i];
            ss += s * s;
            sy += s * y;
        }
        step = if sy > 0.0 {
            (ss / sy).clamp(STEP_MIN, STEP_MAX)
        } else {
            (trial * 2.0).min(STEP_MAX)
        };

        let denom = fx.abs().max(f_new.abs()).max(f64::MIN_POSITIVE);
        let reduction = (fx - f_new) / denom;

        std::mem::swap(&mut x, &mut x_new);
        std::mem::swap(&mut grad, &mut grad_new);
        fx = f_new;
        history.push(fx);

        if reduction <= opts.ftol {
            return finish(x, fx, iter + 1, Termination::RelativeReduction, history);
        }
    }

    let iterations = opts.max_iterations;
    finish(x, fx, iterations, Termination::MaxIterations, history)
}

fn finish(
    x: Vec<f64>,
    value: f64,
    iterations: usize,
    termination: Termination,
    history: Vec<f64>,
) -> Minimum {
    Minimum {
        x,
        value,
        iterations,
        termination,
        history,
    }
}

fn project(x: &mut [f64], lower: &[f64]) {
    for (xi, lo) in x.iter_mut().zip(lower) {
        if !(*xi >= *lo) {
            *xi = *lo;
        }
    }
}

fn projected_gradient_norm(x: &[f64], grad: &[f64], lower: &[f64]) -> f64 {
    x.iter()
        .zip(grad)
        .zip(lower)
        .map(|((xi, gi), lo)| {
            // At the bound a positive gradient points out of the feasible set.
            if *xi <= *lo && *gi > 0.0 { 0.0 } else { gi.abs() }
        })
        .fold(0.0, f64::max)
}
