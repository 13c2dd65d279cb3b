//! Additive spike-timing dependent plasticity
//!
//! Every synapse carries a presynaptic trace (decaying with `tau_ltp`) and a
//! postsynaptic trace (decaying with `tau_ltd`). A postsynaptic spike
//! potentiates by `max_change_ltp * pre_trace`; a presynaptic spike depresses
//! by `max_change_ltd * post_trace`. With all-to-all pairing each spike adds
//! one to its trace, with nearest-spike pairing the trace is set to one.

use serde::{Deserialize, Serialize};

use super::LearningRule;
use crate::error::*;
use crate::synapse::SynapseMut;

const PRE: usize = 0;
const POST: usize = 1;

/// Parameters for STDP
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StdpParams {
    /// Potentiation per unit of presynaptic trace
    pub max_change_ltp: f32,
    /// Presynaptic trace time constant (s)
    pub tau_ltp: f32,
    /// Depression per unit of postsynaptic trace
    pub max_change_ltd: f32,
    /// Postsynaptic trace time constant (s)
    pub tau_ltd: f32,
}

impl Default for StdpParams {
    fn default() -> Self {
        Self {
            max_change_ltp: 0.01,  // 1% potentiation
            tau_ltp: 0.02,         // 20ms potentiation window
            max_change_ltd: 0.012, // slightly stronger depression
            tau_ltd: 0.02,         // 20ms depression window
        }
    }
}

impl StdpParams {
    /// Create new STDP parameters with validation
    pub fn new(max_change_ltp: f32, tau_ltp: f32, max_change_ltd: f32, tau_ltd: f32) -> Result<Self> {
        let params = Self {
            max_change_ltp,
            tau_ltp,
            max_change_ltd,
            tau_ltd,
        };
        params.validate()?;
        Ok(params)
    }

    /// Validate parameters
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("max_change_ltp", self.max_change_ltp),
            ("max_change_ltd", self.max_change_ltd),
        ] {
            if !(value >= 0.0) {
                return Err(KernelError::invalid_parameter(name, value.to_string(), ">= 0.0"));
            }
        }
        for (name, value) in [("tau_ltp", self.tau_ltp), ("tau_ltd", self.tau_ltd)] {
            if !(value > 0.0) {
                return Err(KernelError::invalid_parameter(name, value.to_string(), "> 0.0"));
            }
        }
        Ok(())
    }
}

/// How spikes are paired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpikePairing {
    /// Every earlier spike contributes
    AllToAll,
    /// Only the most recent spike contributes
    Nearest,
}

/// STDP rule with a postsynaptic part
#[derive(Debug, Clone)]
pub struct StdpWeightChange {
    /// Rule parameters
    pub params: StdpParams,
    pairing: SpikePairing,
}

impl StdpWeightChange {
    /// Create a new rule
    pub fn new(params: StdpParams, pairing: SpikePairing) -> Result<Self> {
        params.validate()?;
        Ok(Self { params, pairing })
    }

    /// Spike pairing in use
    pub fn pairing(&self) -> SpikePairing {
        self.pairing
    }

    fn decay(&self, vars: &mut [f32], elapsed: f64) {
        if elapsed <= 0.0 {
            return;
        }
        let dt = elapsed as f32;
        vars[PRE] *= (-dt / self.params.tau_ltp).exp();
        vars[POST] *= (-dt / self.params.tau_ltd).exp();
    }

    fn bump(&self, trace: &mut f32) {
        match self.pairing {
            SpikePairing::AllToAll => *trace += 1.0,
            SpikePairing::Nearest => *trace = 1.0,
        }
    }
}

impl LearningRule for StdpWeightChange {
    fn name(&self) -> &'static str {
        match self.pairing {
            SpikePairing::AllToAll => "stdp",
            SpikePairing::Nearest => "stdp-ls",
        }
    }

    fn number_of_vars(&self) -> usize {
        2
    }

    fn implements_post_synaptic(&self) -> bool {
        true
    }

    fn apply_pre_synaptic_spike(&self, mut synapse: SynapseMut<'_>, time: f64) {
        let elapsed = synapse.elapse_to(time);
        self.decay(synapse.vars, elapsed);
        let change = -self.params.max_change_ltd * synapse.vars[POST];
        synapse.add_weight(change);
        self.bump(&mut synapse.vars[PRE]);
    }

    fn apply_post_synaptic_spike(&self, mut synapse: SynapseMut<'_>, time: f64) {
        let elapsed = synapse.elapse_to(time);
        self.decay(synapse.vars, elapsed);
        let change = self.params.max_change_ltp * synapse.vars[PRE];
        synapse.add_weight(change);
        self.bump(&mut synapse.vars[POST]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::test_support::LoneSynapse;

    fn stdp(pairing: SpikePairing) -> StdpWeightChange {
        StdpWeightChange::new(StdpParams::default(), pairing).unwrap()
    }

    #[test]
    fn test_stdp_params_validation() {
        assert!(StdpParams::new(0.01, 0.02, 0.012, 0.02).is_ok());
        assert!(StdpParams::new(-0.01, 0.02, 0.012, 0.02).is_err());
        assert!(StdpParams::new(0.01, 0.0, 0.012, 0.02).is_err());
        assert!(StdpParams::default().validate().is_ok());
    }

    #[test]
    fn test_potentiation_vs_depression() {
        let rule = stdp(SpikePairing::AllToAll);

        // Pre before post
        let mut causal = LoneSynapse::new(0.5, 2);
        rule.apply_pre_synaptic_spike(causal.view(), 0.010);
        rule.apply_post_synaptic_spike(causal.view(), 0.015);
        assert!(causal.weight > 0.5);
        let expected = 0.5 + 0.01 * (-0.005f32 / 0.02).exp();
        assert!((causal.weight - expected).abs() < 1e-6);

        // Post before pre
        let mut acausal = LoneSynapse::new(0.5, 2);
        rule.apply_post_synaptic_spike(acausal.view(), 0.010);
        rule.apply_pre_synaptic_spike(acausal.view(), 0.015);
        assert!(acausal.weight < 0.5);
    }

    #[test]
    fn test_pairing_modes() {
        let mut all = LoneSynapse::new(0.5, 2);
        let mut nearest = LoneSynapse::new(0.5, 2);
        for (rule, synapse) in [
            (stdp(SpikePairing::AllToAll), &mut all),
            (stdp(SpikePairing::Nearest), &mut nearest),
        ] {
            rule.apply_pre_synaptic_spike(synapse.view(), 0.010);
            rule.apply_pre_synaptic_spike(synapse.view(), 0.011);
            rule.apply_post_synaptic_spike(synapse.view(), 0.012);
        }
        assert!(all.weight > nearest.weight);
        assert!(nearest.weight > 0.5);
    }

    #[test]
    fn test_weight_bounds() {
        let rule = StdpWeightChange::new(
            StdpParams::new(1.0, 0.02, 1.0, 0.02).unwrap(),
            SpikePairing::AllToAll,
        )
        .unwrap();

        let mut high = LoneSynapse::new(0.99, 2);
        rule.apply_pre_synaptic_spike(high.view(), 0.010);
        rule.apply_post_synaptic_spike(high.view(), 0.011);
        assert_eq!(high.weight, 1.0);

        let mut low = LoneSynapse::new(0.01, 2);
        rule.apply_post_synaptic_spike(low.view(), 0.010);
        rule.apply_pre_synaptic_spike(low.view(), 0.011);
        assert_eq!(low.weight, 0.0);
    }
}
