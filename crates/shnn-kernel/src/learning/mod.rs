//! Spike-triggered learning rules
//!
//! A rule is a stateless description shared by every synapse bound to it;
//! the per-synapse variables live in a [`ConnectionState`] owned by the
//! partition that stores the synapse. The driver calls into a rule when a
//! presynaptic spike reaches the synapse, when its target neuron fires, and
//! when a trigger synapse of the same target fires.

use serde::{Deserialize, Serialize};

use crate::error::*;
use crate::synapse::{ConnectionState, SynapseMut};

pub mod exp_kernel;
pub mod stdp;

pub use exp_kernel::{ExpKernelParams, ExpWeightChange};
pub use stdp::{SpikePairing, StdpParams, StdpWeightChange};

/// Plasticity rule applied on spike events
pub trait LearningRule: Send + Sync + std::fmt::Debug {
    /// Rule name as used in configuration files
    fn name(&self) -> &'static str;

    /// Auxiliary variables per synapse
    fn number_of_vars(&self) -> usize;

    /// Fresh state for `synapse_count` synapses bound to this rule
    fn initialize_connection_state(&self, synapse_count: usize) -> ConnectionState {
        ConnectionState::new(self.number_of_vars(), synapse_count)
    }

    /// Whether spikes of the target neuron change the weight
    fn implements_post_synaptic(&self) -> bool;

    /// Whether synapses bound to this rule drive triggered updates on the
    /// other plastic inputs of their target
    fn is_trigger(&self) -> bool {
        false
    }

    /// A presynaptic spike reached the synapse at `time`
    fn apply_pre_synaptic_spike(&self, synapse: SynapseMut<'_>, time: f64);

    /// The target neuron fired at `time`
    fn apply_post_synaptic_spike(&self, _synapse: SynapseMut<'_>, _time: f64) {}

    /// A trigger synapse of the same target fired at `time`
    fn apply_triggered_update(&self, _synapse: SynapseMut<'_>, _time: f64) {}
}

/// Serializable rule description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum LearningRuleConfig {
    /// Alpha-kernel activity rule without a postsynaptic part
    ExpKernel(ExpKernelParams),
    /// Additive STDP with all-to-all spike pairing
    Stdp(StdpParams),
    /// Additive STDP with nearest-spike pairing
    StdpLs(StdpParams),
}

impl LearningRuleConfig {
    /// Validate parameters
    pub fn validate(&self) -> Result<()> {
        match self {
            LearningRuleConfig::ExpKernel(params) => params.validate(),
            LearningRuleConfig::Stdp(params) | LearningRuleConfig::StdpLs(params) => {
                params.validate()
            }
        }
    }

    /// Instantiate the rule
    pub fn build(&self) -> Result<Box<dyn LearningRule>> {
        Ok(match self {
            LearningRuleConfig::ExpKernel(params) => {
                Box::new(ExpWeightChange::new(params.clone())?)
            }
            LearningRuleConfig::Stdp(params) => {
                Box::new(StdpWeightChange::new(params.clone(), SpikePairing::AllToAll)?)
            }
            LearningRuleConfig::StdpLs(params) => {
                Box::new(StdpWeightChange::new(params.clone(), SpikePairing::Nearest)?)
            }
        })
    }
}
