//! Interconnections and their learning-rule state
//!
//! Synapses are stored in the partition that owns their target neuron, so
//! every weight and trace mutation happens on the thread that owns the
//! target and no synapse is ever touched by two threads at once.

use crate::ids::{NeuronId, RuleId, SynapseId};

/// Learning rule attached to a synapse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleBinding {
    /// Rule in the network's rule table
    pub rule: RuleId,
    /// Slot of this synapse in the rule's connection state
    pub slot: usize,
}

/// A synaptic connection between two neurons
#[derive(Debug, Clone, PartialEq)]
pub struct Interconnection {
    /// Global synapse ID
    pub id: SynapseId,
    /// Pre-synaptic neuron
    pub source: NeuronId,
    /// Post-synaptic neuron
    pub target: NeuronId,
    /// Transmission delay (s)
    pub delay: f64,
    /// Current weight
    pub weight: f32,
    /// Weight at construction, restored on reset
    pub initial_weight: f32,
    /// Upper weight bound for learning
    pub max_weight: f32,
    /// Input type passed to the target's model
    pub input_type: usize,
    /// Learning rule, if the synapse is plastic
    pub rule: Option<RuleBinding>,
}

/// Per-synapse auxiliary variables of one learning rule
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionState {
    n_vars: usize,
    values: Vec<f32>,
    last_update: Vec<f64>,
}

impl ConnectionState {
    /// Zeroed state for `synapse_count` synapses of `n_vars` variables each
    pub fn new(n_vars: usize, synapse_count: usize) -> Self {
        Self {
            n_vars,
            values: vec![0.0; n_vars * synapse_count],
            last_update: vec![0.0; synapse_count],
        }
    }

    /// Variables per synapse
    pub fn n_vars(&self) -> usize {
        self.n_vars
    }

    /// Number of synapse slots
    pub fn len(&self) -> usize {
        self.last_update.len()
    }

    /// Whether the state has no slots
    pub fn is_empty(&self) -> bool {
        self.last_update.is_empty()
    }

    /// Variables of one slot
    pub fn values(&self, slot: usize) -> &[f32] {
        &self.values[slot * self.n_vars..(slot + 1) * self.n_vars]
    }

    /// Time of the last update of one slot
    pub fn last_update(&self, slot: usize) -> f64 {
        self.last_update[slot]
    }

    /// Zero every variable and timestamp
    pub fn reset(&mut self) {
        self.values.iter_mut().for_each(|v| *v = 0.0);
        self.last_update.iter_mut().for_each(|t| *t = 0.0);
    }

    fn slot_mut(&mut self, slot: usize) -> (&mut [f32], &mut f64) {
        (
            &mut self.values[slot * self.n_vars..(slot + 1) * self.n_vars],
            &mut self.last_update[slot],
        )
    }
}

/// Mutable view of one plastic synapse handed to a learning rule
#[derive(Debug)]
pub struct SynapseMut<'a> {
    /// Synaptic weight
    pub weight: &'a mut f32,
    /// Upper weight bound
    pub max_weight: f32,
    /// Rule variables of this synapse
    pub vars: &'a mut [f32],
    /// Time the variables were last brought up to date
    pub last_update: &'a mut f64,
}

impl SynapseMut<'_> {
    /// Add `delta` to the weight, clamped to `[0, max_weight]`
    pub fn add_weight(&mut self, delta: f32) {
        *self.weight = (*self.weight + delta).clamp(0.0, self.max_weight);
    }

    /// Seconds since the last update; moves the timestamp to `time`
    pub fn elapse_to(&mut self, time: f64) -> f64 {
        let elapsed = (time - *self.last_update).max(0.0);
        *self.last_update = time;
        elapsed
    }
}

/// Incoming synapses of one partition together with their rule state
#[derive(Debug, Clone, Default)]
pub struct SynapsePartition {
    /// Synapses whose target lies in the partition
    pub(crate) synapses: Vec<Interconnection>,
    /// Connection state per rule, indexed by rule ID
    pub(crate) rule_states: Vec<ConnectionState>,
    /// Per local neuron: input synapses whose rule learns on post-synaptic spikes
    pub(crate) post_learning_inputs: Vec<Vec<usize>>,
    /// Per local neuron: plastic non-trigger input synapses updated when a
    /// trigger synapse of that neuron fires
    pub(crate) triggered_inputs: Vec<Vec<usize>>,
}

impl SynapsePartition {
    /// Synapses stored in the partition
    pub fn synapses(&self) -> &[Interconnection] {
        &self.synapses
    }

    /// Connection state of a rule within the partition
    pub fn rule_state(&self, rule: RuleId) -> Option<&ConnectionState> {
        self.rule_states.get(rule.index())
    }

    /// Learning view of the synapse at `offset`, with its rule
    pub(crate) fn synapse_mut(&mut self, offset: usize) -> Option<(RuleId, SynapseMut<'_>)> {
        let synapse = &mut self.synapses[offset];
        let binding = synapse.rule?;
        let (vars, last_update) = self.rule_states[binding.rule.index()].slot_mut(binding.slot);
        Some((
            binding.rule,
            SynapseMut {
                weight: &mut synapse.weight,
                max_weight: synapse.max_weight,
                vars,
                last_update,
            },
        ))
    }

    /// Restore initial weights and zero the rule state
    pub(crate) fn reset(&mut self) {
        for synapse in &mut self.synapses {
            synapse.weight = synapse.initial_weight;
        }
        for state in &mut self.rule_states {
            state.reset();
        }
    }
}
