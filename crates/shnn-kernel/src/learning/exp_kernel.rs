//! Activity-kernel learning without a postsynaptic part
//!
//! Each presynaptic spike adds a fixed amount to the weight and feeds an
//! alpha-shaped activity trace `k(t) = (t/tau) e^(1 - t/tau)` that peaks at
//! `t = tau = max_pos`. When a trigger synapse of the same target fires,
//! every non-trigger input changes by `a2_prepre * activity`. Postsynaptic
//! spikes leave the weights untouched.
//!
//! The alpha kernel is kept as two exponentials:
//! `A` jumps by one on every spike and decays as `e^(-dt/tau)`;
//! `B` integrates it, `B' = (B + A dt/tau) e^(-dt/tau)`; activity is `e * B`.

use serde::{Deserialize, Serialize};

use super::LearningRule;
use crate::error::*;
use crate::synapse::SynapseMut;

const A: usize = 0;
const B: usize = 1;

/// Parameters of [`ExpWeightChange`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpKernelParams {
    /// Time of the kernel's maximum (s)
    pub max_pos: f32,
    /// Weight change per presynaptic spike
    pub a1_pre: f32,
    /// Weight change per unit of activity on a triggered update
    pub a2_prepre: f32,
    /// Synapses bound to this rule are trigger synapses
    pub trigger: bool,
}

impl Default for ExpKernelParams {
    fn default() -> Self {
        Self {
            max_pos: 0.1,
            a1_pre: 0.001,
            a2_prepre: -0.01,
            trigger: false,
        }
    }
}

impl ExpKernelParams {
    /// Validate parameters
    pub fn validate(&self) -> Result<()> {
        if !(self.max_pos > 0.0) {
            return Err(KernelError::invalid_parameter(
                "max_pos",
                self.max_pos.to_string(),
                "> 0.0",
            ));
        }
        Ok(())
    }
}

/// Alpha-kernel activity rule
#[derive(Debug, Clone)]
pub struct ExpWeightChange {
    /// Rule parameters
    pub params: ExpKernelParams,
}

impl ExpWeightChange {
    /// Create a new rule
    pub fn new(params: ExpKernelParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    fn decay(&self, vars: &mut [f32], elapsed: f64) {
        if elapsed <= 0.0 {
            return;
        }
        let ratio = elapsed as f32 / self.params.max_pos;
        let factor = (-ratio).exp();
        vars[B] = (vars[B] + vars[A] * ratio) * factor;
        vars[A] *= factor;
    }

    /// Kernel activity held in a synapse's variables
    pub fn activity(vars: &[f32]) -> f32 {
        std::f32::consts::E * vars[B]
    }
}

impl LearningRule for ExpWeightChange {
    fn name(&self) -> &'static str {
        "exp-kernel"
    }

    fn number_of_vars(&self) -> usize {
        2
    }

    fn implements_post_synaptic(&self) -> bool {
        false
    }

    fn is_trigger(&self) -> bool {
        self.params.trigger
    }

    fn apply_pre_synaptic_spike(&self, mut synapse: SynapseMut<'_>, time: f64) {
        let elapsed = synapse.elapse_to(time);
        if self.params.trigger {
            return;
        }
        self.decay(synapse.vars, elapsed);
        synapse.add_weight(self.params.a1_pre);
        synapse.vars[A] += 1.0;
    }

    fn apply_triggered_update(&self, mut synapse: SynapseMut<'_>, time: f64) {
        let elapsed = synapse.elapse_to(time);
        self.decay(synapse.vars, elapsed);
        let change = self.params.a2_prepre * Self::activity(synapse.vars);
        synapse.add_weight(change);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::test_support::LoneSynapse;

    fn rule(trigger: bool) -> ExpWeightChange {
        ExpWeightChange::new(ExpKernelParams {
            max_pos: 0.05,
            a1_pre: 0.01,
            a2_prepre: -0.1,
            trigger,
        })
        .unwrap()
    }

    #[test]
    fn test_kernel_peaks_at_max_pos() {
        let rule = rule(false);
        let mut synapse = LoneSynapse::new(0.5, 2);
        rule.apply_pre_synaptic_spike(synapse.view(), 0.0);

        let at = |t: f64| {
            let mut vars = synapse.vars.clone();
            rule.decay(&mut vars, t);
            ExpWeightChange::activity(&vars)
        };
        assert!((at(0.05) - 1.0).abs() < 1e-5);
        assert!(at(0.02) < at(0.05));
        assert!(at(0.1) < at(0.05));
    }

    #[test]
    fn test_decay_composes() {
        let rule = rule(false);
        let mut once = vec![1.0, 0.0];
        rule.decay(&mut once, 0.03);
        let mut twice = vec![1.0, 0.0];
        rule.decay(&mut twice, 0.01);
        rule.decay(&mut twice, 0.02);
        assert!((once[A] - twice[A]).abs() < 1e-6);
        assert!((once[B] - twice[B]).abs() < 1e-6);
    }

    #[test]
    fn test_presynaptic_spike_potentiates() {
        let rule = rule(false);
        let mut synapse = LoneSynapse::new(0.5, 2);
        rule.apply_pre_synaptic_spike(synapse.view(), 0.01);
        assert!((synapse.weight - 0.51).abs() < 1e-6);
        assert_eq!(synapse.last_update, 0.01);
    }

    #[test]
    fn test_postsynaptic_spike_is_ignored() {
        let rule = rule(false);
        let mut synapse = LoneSynapse::new(0.5, 2);
        rule.apply_pre_synaptic_spike(synapse.view(), 0.0);
        let before = synapse.clone();
        for t in [0.01, 0.02, 0.5] {
            rule.apply_post_synaptic_spike(synapse.view(), t);
        }
        assert_eq!(synapse.weight, before.weight);
        assert_eq!(synapse.vars, before.vars);
    }

    #[test]
    fn test_triggered_update_scales_with_activity() {
        let rule = rule(false);
        let mut recent = LoneSynapse::new(0.5, 2);
        let mut silent = LoneSynapse::new(0.5, 2);
        rule.apply_pre_synaptic_spike(recent.view(), 0.0);

        rule.apply_triggered_update(recent.view(), 0.05);
        rule.apply_triggered_update(silent.view(), 0.05);
        // 0.5 + 0.01 - 0.1 * 1.0
        assert!((recent.weight - 0.41).abs() < 1e-4);
        assert_eq!(silent.weight, 0.5);
    }

    #[test]
    fn test_trigger_synapse_weight_is_fixed() {
        let rule = rule(true);
        assert!(rule.is_trigger());
        let mut synapse = LoneSynapse::new(0.5, 2);
        rule.apply_pre_synaptic_spike(synapse.view(), 0.02);
        assert_eq!(synapse.weight, 0.5);
        assert_eq!(synapse.last_update, 0.02);
    }
}
