//! Neuron model contract and a reference conductance-based LIF model
//!
//! The kernel never prescribes neuron biophysics. Anything implementing
//! [`TimeDrivenModel`] can be integrated: the model exposes its state layout,
//! the derivative function of its differential variables and the closed-form
//! update of its time-dependent variables. Integration methods call into the
//! model from whichever worker thread owns the neuron, so models must be
//! `Send + Sync` and must not keep per-neuron mutable state of their own.

use crate::error::*;

/// Layout of one neuron's state row
///
/// A row is `[differential | time-dependent | other]`. Differential
/// variables are evolved by the integrator, time-dependent ones are advanced
/// analytically through [`TimeDrivenModel::evaluate_time_dependent`], the rest
/// are only touched by the model itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateLayout {
    /// Total variables per neuron
    pub n_state: usize,
    /// Variables computed with a differential equation
    pub n_differential: usize,
    /// Variables computed with a closed-form function of elapsed time
    pub n_time_dependent: usize,
}

impl StateLayout {
    /// Create a validated layout
    pub fn new(n_state: usize, n_differential: usize, n_time_dependent: usize) -> Result<Self> {
        if n_differential + n_time_dependent > n_state {
            return Err(KernelError::invalid_parameter(
                "n_state",
                format!(
                    "{} (with {} differential, {} time-dependent)",
                    n_state, n_differential, n_time_dependent
                ),
                ">= n_differential + n_time_dependent",
            ));
        }
        Ok(Self {
            n_state,
            n_differential,
            n_time_dependent,
        })
    }
}

/// Callback contract between the kernel and a neuron model
pub trait TimeDrivenModel: Send + Sync + std::fmt::Debug {
    /// State row layout used by every neuron of this model
    fn layout(&self) -> StateLayout;

    /// Initial state row of a freshly created neuron
    fn initial_state(&self) -> Vec<f32>;

    /// Number of distinct synaptic input types the model accepts
    fn input_types(&self) -> usize;

    /// Write the derivatives of the differential variables of `state` into
    /// `derivatives` (length `n_differential`)
    fn evaluate_differential(&self, state: &[f32], derivatives: &mut [f32]);

    /// Advance the time-dependent variables of `state` by `elapsed` seconds
    fn evaluate_time_dependent(&self, state: &mut [f32], elapsed: f32);

    /// Whether the neuron fires in its current state
    fn check_spike(&self, state: &[f32]) -> bool;

    /// Post-spike reset of the state row
    fn reset_after_spike(&self, state: &mut [f32]);

    /// Apply a synaptic event of the given input type and weight
    fn apply_synaptic_input(&self, state: &mut [f32], input_type: usize, weight: f32);
}

/// Parameters for the conductance-based leaky integrate-and-fire model
#[derive(Debug, Clone, PartialEq)]
pub struct LifParams {
    /// Membrane time constant (s)
    pub tau_m: f32,
    /// Resting potential (mV)
    pub v_rest: f32,
    /// Reset potential (mV)
    pub v_reset: f32,
    /// Threshold potential (mV)
    pub v_thresh: f32,
    /// Refractory period (s)
    pub t_refrac: f32,
    /// Excitatory reversal potential (mV)
    pub e_exc: f32,
    /// Inhibitory reversal potential (mV)
    pub e_inh: f32,
    /// Excitatory conductance decay constant (s)
    pub tau_exc: f32,
    /// Inhibitory conductance decay constant (s)
    pub tau_inh: f32,
}

impl Default for LifParams {
    fn default() -> Self {
        Self {
            tau_m: 0.02,     // 20ms membrane time constant
            v_rest: -70.0,   // -70mV resting potential
            v_reset: -70.0,  // -70mV reset potential
            v_thresh: -50.0, // -50mV threshold
            t_refrac: 0.002, // 2ms refractory period
            e_exc: 0.0,
            e_inh: -80.0,
            tau_exc: 0.005,
            tau_inh: 0.01,
        }
    }
}

impl LifParams {
    /// Validate parameters
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("tau_m", self.tau_m),
            ("tau_exc", self.tau_exc),
            ("tau_inh", self.tau_inh),
        ] {
            if value <= 0.0 {
                return Err(KernelError::invalid_parameter(name, value.to_string(), "> 0.0"));
            }
        }
        if self.v_thresh <= self.v_rest {
            return Err(KernelError::invalid_parameter(
                "v_thresh",
                format!("{} (with v_rest={})", self.v_thresh, self.v_rest),
                "> v_rest",
            ));
        }
        if self.t_refrac < 0.0 {
            return Err(KernelError::invalid_parameter(
                "t_refrac",
                self.t_refrac.to_string(),
                ">= 0.0",
            ));
        }
        Ok(())
    }
}

/// Leaky integrate-and-fire neuron with exponential synaptic conductances
///
/// State row: `[v, g_exc, g_inh, refractory_remaining]`, one differential
/// variable and three time-dependent ones. Input type 0 is excitatory,
/// input type 1 inhibitory.
#[derive(Debug, Clone)]
pub struct LifConductanceModel {
    /// Model parameters
    pub params: LifParams,
}

impl LifConductanceModel {
    /// Index of the membrane potential in the state row
    pub const V: usize = 0;
    /// Index of the excitatory conductance
    pub const G_EXC: usize = 1;
    /// Index of the inhibitory conductance
    pub const G_INH: usize = 2;
    /// Index of the remaining refractory time
    pub const REFRACTORY: usize = 3;

    /// Create a new model
    pub fn new(params: LifParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }
}

impl Default for LifConductanceModel {
    fn default() -> Self {
        Self {
            params: LifParams::default(),
        }
    }
}

impl TimeDrivenModel for LifConductanceModel {
    fn layout(&self) -> StateLayout {
        StateLayout {
            n_state: 4,
            n_differential: 1,
            n_time_dependent: 3,
        }
    }

    fn initial_state(&self) -> Vec<f32> {
        vec![self.params.v_rest, 0.0, 0.0, 0.0]
    }

    fn input_types(&self) -> usize {
        2
    }

    fn evaluate_differential(&self, state: &[f32], derivatives: &mut [f32]) {
        if state[Self::REFRACTORY] > 0.0 {
            derivatives[Self::V] = 0.0;
            return;
        }
        let p = &self.params;
        let v = state[Self::V];
        derivatives[Self::V] = ((p.v_rest - v)
            + state[Self::G_EXC] * (p.e_exc - v)
            + state[Self::G_INH] * (p.e_inh - v))
            / p.tau_m;
    }

    fn evaluate_time_dependent(&self, state: &mut [f32], elapsed: f32) {
        let p = &self.params;
        state[Self::G_EXC] *= (-elapsed / p.tau_exc).exp();
        state[Self::G_INH] *= (-elapsed / p.tau_inh).exp();
        state[Self::REFRACTORY] = (state[Self::REFRACTORY] - elapsed).max(0.0);
    }

    fn check_spike(&self, state: &[f32]) -> bool {
        state[Self::REFRACTORY] <= 0.0 && state[Self::V] >= self.params.v_thresh
    }

    fn reset_after_spike(&self, state: &mut [f32]) {
        state[Self::V] = self.params.v_reset;
        state[Self::REFRACTORY] = self.params.t_refrac;
    }

    fn apply_synaptic_input(&self, state: &mut [f32], input_type: usize, weight: f32) {
        match input_type {
            0 => state[Self::G_EXC] += weight,
            _ => state[Self::G_INH] += weight,
        }
    }
}
