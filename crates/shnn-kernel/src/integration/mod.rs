//! Numerical integration methods for time-driven neuron state
//!
//! Every method implements [`IntegrationMethod`]. One instance exists per
//! worker thread and addresses neurons by their local index inside that
//! thread's partition, so the per-neuron scratch (multistep history, adaptive
//! predictions) is never shared between threads.
//!
//! Methods are composed from two layers:
//! - a [`Stepper`] computes a single step of one formula (explicit
//!   Runge-Kutta tableaus, BDF predictor-corrector);
//! - a driver decides which steps to take: [`FixedStep`] splits the
//!   requested interval into equal sub-steps, [`AdaptiveStep`] sizes steps
//!   from a step-doubling error estimate.

use std::fmt;
use std::str::FromStr;

use crate::{error::*, model::StateLayout, model::TimeDrivenModel};

pub mod adaptive;
pub mod bdf;
pub mod fixed;
pub mod runge_kutta;

pub use adaptive::{AdaptiveBounds, AdaptiveStep};
pub use bdf::Bdf;
pub use fixed::FixedStep;
pub use runge_kutta::{ButcherTableau, ExplicitRk};

/// Counters collected by an integration method instance
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntegrationStats {
    /// Single steps of the underlying formula
    pub steps: u64,
    /// Accepted adaptive steps
    pub accepted: u64,
    /// Rejected adaptive steps (retried with a smaller step)
    pub rejected: u64,
    /// Steps forced through at `h_min` with an error above `e_max`
    pub accuracy_warnings: u64,
    /// Calls served from a cached prediction
    pub prediction_hits: u64,
    /// Smallest step chosen by the step-size controller
    pub smallest_step: Option<f64>,
    /// Largest step chosen by the step-size controller
    pub largest_step: Option<f64>,
}

impl IntegrationStats {
    /// Fold another instance's counters into this one
    pub fn merge(&mut self, other: &IntegrationStats) {
        self.steps += other.steps;
        self.accepted += other.accepted;
        self.rejected += other.rejected;
        self.accuracy_warnings += other.accuracy_warnings;
        self.prediction_hits += other.prediction_hits;
        self.smallest_step = match (self.smallest_step, other.smallest_step) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.largest_step = match (self.largest_step, other.largest_step) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }

    pub(crate) fn record_controller_step(&mut self, h: f64) {
        self.smallest_step = Some(self.smallest_step.map_or(h, |s| s.min(h)));
        self.largest_step = Some(self.largest_step.map_or(h, |s| s.max(h)));
    }
}

/// Integration method bound to one partition of neurons
pub trait IntegrationMethod: Send + fmt::Debug {
    /// Method name as used in configuration files
    fn name(&self) -> &'static str;

    /// Advance the neuron at `local` by `elapsed` seconds
    ///
    /// `state` is the neuron's full row. On return its differential
    /// variables hold the new solution and its time-dependent variables are
    /// consistent with the new time.
    fn next_differential_equation_value(
        &mut self,
        local: usize,
        model: &dyn TimeDrivenModel,
        state: &mut [f32],
        elapsed: f64,
    );

    /// Size scratch for `n_neurons` and seed memory-dependent methods with
    /// the `initial` state row
    fn initialize_states(&mut self, n_neurons: usize, initial: &[f32]);

    /// Forget the memory of one neuron (post-spike reset)
    ///
    /// Memoryless methods have nothing to forget.
    fn reset_state(&mut self, _local: usize) {}

    /// The neuron's row was modified outside the integrator
    fn invalidate_prediction(&mut self, _local: usize) {}

    /// Step size the method would like to take next for this neuron
    fn next_step_hint(&self, _local: usize) -> Option<f64> {
        None
    }

    /// Per-variable error estimate of the most recent step, if the method has one
    fn last_error_estimate(&self) -> Option<&[f32]> {
        None
    }

    /// Reallocate per-neuron scratch for `n_neurons`
    fn resize(&mut self, n_neurons: usize);

    /// Number of neurons with per-neuron scratch, `None` when the method keeps none
    fn capacity(&self) -> Option<usize> {
        None
    }

    /// Whether the method keeps history between calls
    fn is_memory_dependent(&self) -> bool {
        false
    }

    /// Counters collected so far
    fn statistics(&self) -> IntegrationStats;
}

/// Previous step of a neuron, as seen by multistep formulas
#[derive(Debug, Clone, Copy)]
pub struct History<'a> {
    /// Differential variables at the start of the previous step
    pub previous: &'a [f32],
    /// Length of the previous step, `None` when seeded without one
    pub step: Option<f64>,
}

/// A single step of one integration formula
pub trait Stepper: Send + fmt::Debug {
    /// Formula name
    fn name(&self) -> &'static str;

    /// Order of the propagated solution
    fn order(&self) -> u32;

    /// Whether [`Stepper::step`] consumes history
    fn uses_history(&self) -> bool {
        false
    }

    /// Advance `state` by `h`
    fn step(
        &mut self,
        model: &dyn TimeDrivenModel,
        state: &mut [f32],
        h: f64,
        history: Option<History<'_>>,
    );

    /// Per-variable error estimate of the last step
    fn error_estimate(&self) -> Option<&[f32]> {
        None
    }
}

/// One neuron's history, copied out of a [`NeuronHistory`] arena
#[derive(Debug, Clone, Default)]
pub(crate) struct HistoryRow {
    pub previous: Vec<f32>,
    pub step: Option<f64>,
    pub valid: bool,
}

impl HistoryRow {
    pub fn new(width: usize) -> Self {
        Self {
            previous: vec![0.0; width],
            step: None,
            valid: false,
        }
    }

    pub fn view(&self) -> Option<History<'_>> {
        self.valid.then(|| History {
            previous: &self.previous,
            step: self.step,
        })
    }

    pub fn record(&mut self, previous: &[f32], step: f64) {
        self.previous.copy_from_slice(previous);
        self.step = Some(step);
        self.valid = true;
    }
}

/// Flat per-neuron history arena (differential variables of the previous step)
#[derive(Debug, Clone, Default)]
pub(crate) struct NeuronHistory {
    width: usize,
    previous: Vec<f32>,
    step: Vec<Option<f64>>,
    valid: Vec<bool>,
}

impl NeuronHistory {
    pub fn new(width: usize) -> Self {
        Self {
            width,
            ..Default::default()
        }
    }

    pub fn resize(&mut self, n_neurons: usize) {
        self.previous = vec![0.0; n_neurons * self.width];
        self.step = vec![None; n_neurons];
        self.valid = vec![false; n_neurons];
    }

    pub fn len(&self) -> usize {
        self.valid.len()
    }

    pub fn get(&self, local: usize) -> Option<History<'_>> {
        self.valid[local].then(|| History {
            previous: &self.previous[local * self.width..(local + 1) * self.width],
            step: self.step[local],
        })
    }

    pub fn seed(&mut self, local: usize, previous: &[f32]) {
        self.previous[local * self.width..(local + 1) * self.width]
            .copy_from_slice(&previous[..self.width]);
        self.step[local] = None;
        self.valid[local] = true;
    }

    pub fn record(&mut self, local: usize, previous: &[f32], step: f64) {
        self.previous[local * self.width..(local + 1) * self.width]
            .copy_from_slice(&previous[..self.width]);
        self.step[local] = Some(step);
        self.valid[local] = true;
    }

    pub fn clear(&mut self, local: usize) {
        self.valid[local] = false;
        self.step[local] = None;
    }

    pub fn load(&self, local: usize, row: &mut HistoryRow) {
        row.previous
            .copy_from_slice(&self.previous[local * self.width..(local + 1) * self.width]);
        row.step = self.step[local];
        row.valid = self.valid[local];
    }

    pub fn store(&mut self, local: usize, row: &HistoryRow) {
        self.previous[local * self.width..(local + 1) * self.width].copy_from_slice(&row.previous);
        self.step[local] = row.step;
        self.valid[local] = row.valid;
    }
}

/// Integration method selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodKind {
    /// Explicit Euler
    Euler,
    /// Second-order Runge-Kutta (midpoint)
    Rk2,
    /// Classical fourth-order Runge-Kutta
    Rk4,
    /// Runge-Kutta-Fehlberg 4(5) with a fixed step
    Rk45,
    /// First-order backward differentiation, fixed step
    Bdf1,
    /// Second-order backward differentiation, fixed step
    Bdf2,
    /// Runge-Kutta-Fehlberg 4(5) with step-doubling control
    Rk45Adaptive,
    /// BDF1 with step-doubling control
    Bdf1Adaptive,
    /// BDF2 with step-doubling control
    Bdf2Adaptive,
}

impl MethodKind {
    /// Name used in configuration files
    pub fn as_str(&self) -> &'static str {
        match self {
            MethodKind::Euler => "euler",
            MethodKind::Rk2 => "rk2",
            MethodKind::Rk4 => "rk4",
            MethodKind::Rk45 => "rk45",
            MethodKind::Bdf1 => "bdf1",
            MethodKind::Bdf2 => "bdf2",
            MethodKind::Rk45Adaptive => "rk45-adaptive",
            MethodKind::Bdf1Adaptive => "bdf1-adaptive",
            MethodKind::Bdf2Adaptive => "bdf2-adaptive",
        }
    }

    /// Whether the method sizes its own steps
    pub fn is_adaptive(&self) -> bool {
        matches!(
            self,
            MethodKind::Rk45Adaptive | MethodKind::Bdf1Adaptive | MethodKind::Bdf2Adaptive
        )
    }
}

impl fmt::Display for MethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MethodKind {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "euler" => MethodKind::Euler,
            "rk2" => MethodKind::Rk2,
            "rk4" => MethodKind::Rk4,
            "rk45" => MethodKind::Rk45,
            "bdf1" => MethodKind::Bdf1,
            "bdf2" => MethodKind::Bdf2,
            "rk45-adaptive" | "rk45ad" => MethodKind::Rk45Adaptive,
            "bdf1-adaptive" | "bdf1ad" => MethodKind::Bdf1Adaptive,
            "bdf2-adaptive" | "bdf2ad" => MethodKind::Bdf2Adaptive,
            other => {
                return Err(KernelError::invalid_parameter(
                    "method",
                    other,
                    "one of euler, rk2, rk4, rk45, bdf1, bdf2, rk45-adaptive, bdf1-adaptive, bdf2-adaptive",
                ))
            }
        })
    }
}

/// Validated integration parameters
#[derive(Debug, Clone, PartialEq)]
pub struct IntegrationConfig {
    /// Selected method
    pub method: MethodKind,
    /// Fixed sub-step size (s); `None` integrates each interval in one step
    pub step: Option<f64>,
    /// Step-size controller bounds, required by adaptive methods
    pub bounds: Option<AdaptiveBounds>,
    /// Corrector iterations for BDF methods
    pub bdf_max_iterations: usize,
    /// Corrector convergence tolerance for BDF methods
    pub bdf_tolerance: f32,
}

impl Default for IntegrationConfig {
    fn default() -> Self {
        Self {
            method: MethodKind::Rk4,
            step: None,
            bounds: None,
            bdf_max_iterations: 8,
            bdf_tolerance: 1e-6,
        }
    }
}

impl IntegrationConfig {
    /// Fixed-step configuration
    pub fn fixed(method: MethodKind, step: Option<f64>) -> Result<Self> {
        let config = Self {
            method,
            step,
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Adaptive configuration
    pub fn adaptive(method: MethodKind, bounds: AdaptiveBounds) -> Result<Self> {
        let config = Self {
            method,
            bounds: Some(bounds),
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate parameters
    pub fn validate(&self) -> Result<()> {
        if let Some(step) = self.step {
            if !(step > 0.0) {
                return Err(KernelError::invalid_parameter("step", step.to_string(), "> 0.0"));
            }
        }
        if self.method.is_adaptive() {
            let bounds = self.bounds.as_ref().ok_or_else(|| {
                KernelError::invalid_config(format!(
                    "method {} requires e_min, e_max, h_min and h_max",
                    self.method
                ))
            })?;
            bounds.validate()?;
        }
        if self.bdf_max_iterations == 0 {
            return Err(KernelError::invalid_parameter("bdf_max_iterations", "0", ">= 1"));
        }
        Ok(())
    }

    /// Build one method instance per worker thread
    pub fn instantiate(&self, layout: StateLayout, threads: usize) -> Result<IntegratorSet> {
        self.validate()?;
        let methods = (0..threads.max(1))
            .map(|_| self.build(layout))
            .collect::<Result<Vec<_>>>()?;
        Ok(IntegratorSet { layout, methods })
    }

    fn build(&self, layout: StateLayout) -> Result<Box<dyn IntegrationMethod>> {
        let bdf = |order| Bdf::new(order, layout, self.bdf_max_iterations, self.bdf_tolerance);
        let bounds = || {
            self.bounds
                .clone()
                .ok_or_else(|| KernelError::invalid_config("adaptive method without bounds"))
        };
        let method: Box<dyn IntegrationMethod> = match self.method {
            MethodKind::Euler => Box::new(FixedStep::new(
                ExplicitRk::new(ButcherTableau::EULER, layout),
                "euler",
                layout,
                self.step,
            )),
            MethodKind::Rk2 => Box::new(FixedStep::new(
                ExplicitRk::new(ButcherTableau::MIDPOINT, layout),
                "rk2",
                layout,
                self.step,
            )),
            MethodKind::Rk4 => Box::new(FixedStep::new(
                ExplicitRk::new(ButcherTableau::RK4, layout),
                "rk4",
                layout,
                self.step,
            )),
            MethodKind::Rk45 => Box::new(FixedStep::new(
                ExplicitRk::new(ButcherTableau::FEHLBERG45, layout),
                "rk45",
                layout,
                self.step,
            )),
            MethodKind::Bdf1 => Box::new(FixedStep::new(bdf(1), "bdf1", layout, self.step)),
            MethodKind::Bdf2 => Box::new(FixedStep::new(bdf(2), "bdf2", layout, self.step)),
            MethodKind::Rk45Adaptive => Box::new(AdaptiveStep::new(
                ExplicitRk::new(ButcherTableau::FEHLBERG45, layout),
                "rk45-adaptive",
                layout,
                bounds()?,
            )),
            MethodKind::Bdf1Adaptive => Box::new(AdaptiveStep::new(
                bdf(1),
                "bdf1-adaptive",
                layout,
                bounds()?,
            )),
            MethodKind::Bdf2Adaptive => Box::new(AdaptiveStep::new(
                bdf(2),
                "bdf2-adaptive",
                layout,
                bounds()?,
            )),
        };
        Ok(method)
    }
}

/// One method instance per worker thread
#[derive(Debug)]
pub struct IntegratorSet {
    layout: StateLayout,
    methods: Vec<Box<dyn IntegrationMethod>>,
}

impl IntegratorSet {
    /// Number of instances (worker threads)
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Instance bound to `thread`
    pub fn method(&self, thread: usize) -> Option<&dyn IntegrationMethod> {
        self.methods.get(thread).map(|m| m.as_ref())
    }

    /// Size `thread`'s instance for `n_neurons` and seed it with `initial`
    pub fn initialize_states(
        &mut self,
        thread: usize,
        n_neurons: usize,
        initial: &[f32],
    ) -> Result<()> {
        self.check_row(initial)?;
        self.thread_mut(thread)?.initialize_states(n_neurons, initial);
        Ok(())
    }

    /// Forget the memory of neuron `local` of `thread`'s partition
    pub fn reset_state(&mut self, thread: usize, local: usize) -> Result<()> {
        self.neuron_mut(thread, local)?.reset_state(local);
        Ok(())
    }

    /// Advance neuron `local` of `thread`'s partition by `elapsed` seconds
    ///
    /// Memory-dependent methods must be sized with [`initialize_states`]
    /// first; an unsized or out-of-range `local` is an error.
    ///
    /// [`initialize_states`]: IntegratorSet::initialize_states
    pub fn next_differential_equation_value(
        &mut self,
        local: usize,
        model: &dyn TimeDrivenModel,
        state: &mut [f32],
        elapsed: f64,
        thread: usize,
    ) -> Result<()> {
        self.check_row(state)?;
        self.neuron_mut(thread, local)?
            .next_differential_equation_value(local, model, state, elapsed);
        Ok(())
    }

    fn check_row(&self, row: &[f32]) -> Result<()> {
        if row.len() != self.layout.n_state {
            return Err(KernelError::invalid_parameter(
                "state",
                format!("{} variables", row.len()),
                format!("{} variables", self.layout.n_state),
            ));
        }
        Ok(())
    }

    fn thread_mut(&mut self, thread: usize) -> Result<&mut Box<dyn IntegrationMethod>> {
        self.methods
            .get_mut(thread)
            .ok_or_else(|| KernelError::thread_pool(format!("no integrator for thread {}", thread)))
    }

    fn neuron_mut(
        &mut self,
        thread: usize,
        local: usize,
    ) -> Result<&mut Box<dyn IntegrationMethod>> {
        let method = self.thread_mut(thread)?;
        if let Some(capacity) = method.capacity() {
            if local >= capacity {
                return Err(KernelError::invalid_parameter(
                    "local",
                    local.to_string(),
                    format!("< {} sized neurons of {}", capacity, method.name()),
                ));
            }
        }
        Ok(method)
    }

    /// Counters of all instances combined
    pub fn statistics(&self) -> IntegrationStats {
        let mut total = IntegrationStats::default();
        for method in &self.methods {
            total.merge(&method.statistics());
        }
        total
    }

    /// Hand the instances over to their partitions
    pub fn into_methods(self) -> Vec<Box<dyn IntegrationMethod>> {
        self.methods
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::model::{LifConductanceModel, TimeDrivenModel};

    /// Membrane potential after `t` seconds of passive decay from `v0`
    pub fn exact_decay(model: &LifConductanceModel, v0: f32, t: f64) -> f64 {
        let p = &model.params;
        p.v_rest as f64 + (v0 as f64 - p.v_rest as f64) * (-t / p.tau_m as f64).exp()
    }

    /// A displaced, input-free neuron row
    pub fn displaced_row(model: &LifConductanceModel, v0: f32) -> Vec<f32> {
        let mut row = model.initial_state();
        row[LifConductanceModel::V] = v0;
        row
    }
}
