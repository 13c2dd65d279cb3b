//! Backward differentiation formulas of order one and two
//!
//! Each step predicts the new differential state with explicit Euler and
//! corrects it with a bounded number of fixed-point iterations on the
//! implicit formula. The time-dependent variables are advanced to the end of
//! the step before the corrector runs, since the implicit formula evaluates
//! the model at the new time.
//!
//! BDF2 needs the state at the start of the previous step. Steps may differ
//! in length, so the variable-coefficient form is used:
//!
//! ```text
//! w = h_n / h_{n-1}
//! y_{n+1} = ((1+w)^2 y_n - w^2 y_{n-1}) / (1+2w) + h_n (1+w)/(1+2w) f(y_{n+1})
//! ```
//!
//! Without history the step falls back to BDF1, which is self-starting.

use super::{History, Stepper};
use crate::model::{StateLayout, TimeDrivenModel};

/// BDF predictor-corrector stepper
#[derive(Debug, Clone)]
pub struct Bdf {
    order: u32,
    n_differential: usize,
    max_iterations: usize,
    tolerance: f32,
    /// Right-hand side of the implicit formula without the f term
    rhs: Vec<f32>,
    /// Current corrector iterate
    guess: Vec<f32>,
    derivatives: Vec<f32>,
}

impl Bdf {
    /// Create a BDF stepper; orders above two are clamped to two
    pub fn new(order: u32, layout: StateLayout, max_iterations: usize, tolerance: f32) -> Self {
        let nd = layout.n_differential;
        Self {
            order: order.clamp(1, 2),
            n_differential: nd,
            max_iterations: max_iterations.max(1),
            tolerance,
            rhs: vec![0.0; nd],
            guess: vec![0.0; nd],
            derivatives: vec![0.0; nd],
        }
    }
}

impl Stepper for Bdf {
    fn name(&self) -> &'static str {
        if self.order == 1 {
            "bdf1"
        } else {
            "bdf2"
        }
    }

    fn order(&self) -> u32 {
        self.order
    }

    fn uses_history(&self) -> bool {
        self.order > 1
    }

    fn step(
        &mut self,
        model: &dyn TimeDrivenModel,
        state: &mut [f32],
        h: f64,
        history: Option<History<'_>>,
    ) {
        let nd = self.n_differential;

        let beta = match history.filter(|_| self.order == 2) {
            Some(previous) => {
                let w = previous.step.map_or(1.0, |p| if p > 0.0 { h / p } else { 1.0 });
                let denom = 1.0 + 2.0 * w;
                let a_n = (1.0 + w) * (1.0 + w) / denom;
                let a_prev = -(w * w) / denom;
                for v in 0..nd {
                    self.rhs[v] =
                        (a_n * state[v] as f64 + a_prev * previous.previous[v] as f64) as f32;
                }
                (1.0 + w) / denom
            }
            None => {
                self.rhs.copy_from_slice(&state[..nd]);
                1.0
            }
        };

        model.evaluate_time_dependent(state, h as f32);

        // Predictor
        model.evaluate_differential(state, &mut self.derivatives);
        for v in 0..nd {
            self.guess[v] = (state[v] as f64 + h * self.derivatives[v] as f64) as f32;
        }

        // Corrector
        let scale = beta * h;
        for _ in 0..self.max_iterations {
            state[..nd].copy_from_slice(&self.guess);
            model.evaluate_differential(state, &mut self.derivatives);
            let mut delta = 0.0f32;
            for v in 0..nd {
                let next = (self.rhs[v] as f64 + scale * self.derivatives[v] as f64) as f32;
                delta = delta.max((next - self.guess[v]).abs());
                self.guess[v] = next;
            }
            if delta <= self.tolerance {
                break;
            }
        }
        state[..nd].copy_from_slice(&self.guess);
    }
}
