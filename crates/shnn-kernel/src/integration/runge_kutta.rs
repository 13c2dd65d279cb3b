//! Explicit Runge-Kutta steppers driven by a Butcher tableau
//!
//! Euler, midpoint RK2, classical RK4 and Runge-Kutta-Fehlberg 4(5) are all
//! the same algorithm with different coefficients. Stages that evaluate the
//! model at an intermediate time first advance the time-dependent variables
//! of a scratch copy of the row to that time.

use super::{History, Stepper};
use crate::model::{StateLayout, TimeDrivenModel};

/// Coefficients of an explicit Runge-Kutta method
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ButcherTableau {
    /// Name of the formula
    pub name: &'static str,
    /// Order of the propagated solution
    pub order: u32,
    /// Stage times as fractions of the step
    pub c: &'static [f64],
    /// Lower-triangular stage coefficients
    pub a: &'static [&'static [f64]],
    /// Weights of the propagated solution
    pub b: &'static [f64],
    /// Weights of the embedded higher-order reference solution
    pub b_reference: Option<&'static [f64]>,
}

impl ButcherTableau {
    /// Explicit Euler
    pub const EULER: ButcherTableau = ButcherTableau {
        name: "euler",
        order: 1,
        c: &[0.0],
        a: &[&[]],
        b: &[1.0],
        b_reference: None,
    };

    /// Explicit midpoint
    pub const MIDPOINT: ButcherTableau = ButcherTableau {
        name: "rk2",
        order: 2,
        c: &[0.0, 0.5],
        a: &[&[], &[0.5]],
        b: &[0.0, 1.0],
        b_reference: None,
    };

    /// Classical fourth-order Runge-Kutta
    pub const RK4: ButcherTableau = ButcherTableau {
        name: "rk4",
        order: 4,
        c: &[0.0, 0.5, 0.5, 1.0],
        a: &[&[], &[0.5], &[0.0, 0.5], &[0.0, 0.0, 1.0]],
        b: &[1.0 / 6.0, 1.0 / 3.0, 1.0 / 3.0, 1.0 / 6.0],
        b_reference: None,
    };

    /// Runge-Kutta-Fehlberg 4(5): fourth-order propagation, fifth-order reference
    #[rustfmt::skip]
    pub const FEHLBERG45: ButcherTableau = ButcherTableau {
        name: "rk45",
        order: 4,
        c: &[0.0, 1.0 / 4.0, 3.0 / 8.0, 12.0 / 13.0, 1.0, 1.0 / 2.0],
        a: &[
            &[],
            &[1.0 / 4.0],
            &[3.0 / 32.0, 9.0 / 32.0],
            &[1932.0 / 2197.0, -7200.0 / 2197.0, 7296.0 / 2197.0],
            &[439.0 / 216.0, -8.0, 3680.0 / 513.0, -845.0 / 4104.0],
            &[-8.0 / 27.0, 2.0, -3544.0 / 2565.0, 1859.0 / 4104.0, -11.0 / 40.0],
        ],
        b: &[25.0 / 216.0, 0.0, 1408.0 / 2565.0, 2197.0 / 4104.0, -1.0 / 5.0, 0.0],
        b_reference: Some(&[
            16.0 / 135.0, 0.0, 6656.0 / 12825.0, 28561.0 / 56430.0, -9.0 / 50.0, 2.0 / 55.0,
        ]),
    };

    /// Number of stages
    pub fn stages(&self) -> usize {
        self.b.len()
    }
}

/// Explicit Runge-Kutta stepper with per-thread stage buffers
#[derive(Debug, Clone)]
pub struct ExplicitRk {
    tableau: ButcherTableau,
    n_differential: usize,
    /// Differential variables at the start of the step
    base: Vec<f32>,
    /// Row at the current stage
    aux: Vec<f32>,
    /// Stage derivatives, `stages * n_differential`
    k: Vec<f32>,
    /// |reference - propagated| of the last step
    epsilon: Vec<f32>,
}

impl ExplicitRk {
    /// Create a stepper for the given tableau and state layout
    pub fn new(tableau: ButcherTableau, layout: StateLayout) -> Self {
        let nd = layout.n_differential;
        Self {
            tableau,
            n_differential: nd,
            base: vec![0.0; nd],
            aux: vec![0.0; layout.n_state],
            k: vec![0.0; tableau.stages() * nd],
            epsilon: if tableau.b_reference.is_some() {
                vec![0.0; nd]
            } else {
                Vec::new()
            },
        }
    }

    /// Tableau in use
    pub fn tableau(&self) -> &ButcherTableau {
        &self.tableau
    }
}

impl Stepper for ExplicitRk {
    fn name(&self) -> &'static str {
        self.tableau.name
    }

    fn order(&self) -> u32 {
        self.tableau.order
    }

    fn step(
        &mut self,
        model: &dyn TimeDrivenModel,
        state: &mut [f32],
        h: f64,
        _history: Option<History<'_>>,
    ) {
        let nd = self.n_differential;
        let tableau = self.tableau;
        self.base.copy_from_slice(&state[..nd]);

        for (i, (&ci, row)) in tableau.c.iter().zip(tableau.a.iter()).enumerate() {
            self.aux.copy_from_slice(state);
            if ci > 0.0 {
                model.evaluate_time_dependent(&mut self.aux, (ci * h) as f32);
            }
            for v in 0..nd {
                let acc: f64 = row
                    .iter()
                    .enumerate()
                    .map(|(j, &a)| a * self.k[j * nd + v] as f64)
                    .sum();
                self.aux[v] = (self.base[v] as f64 + h * acc) as f32;
            }
            model.evaluate_differential(&self.aux, &mut self.k[i * nd..(i + 1) * nd]);
        }

        for v in 0..nd {
            let weighted = |weights: &[f64]| -> f64 {
                weights
                    .iter()
                    .enumerate()
                    .map(|(i, &b)| b * self.k[i * nd + v] as f64)
                    .sum()
            };
            let propagated = weighted(tableau.b);
            state[v] = (self.base[v] as f64 + h * propagated) as f32;
            if let Some(reference) = tableau.b_reference {
                self.epsilon[v] = (h * (weighted(reference) - propagated)).abs() as f32;
            }
        }

        model.evaluate_time_dependent(state, h as f32);
    }

    fn error_estimate(&self) -> Option<&[f32]> {
        self.tableau.b_reference.map(|_| self.epsilon.as_slice())
    }
}
