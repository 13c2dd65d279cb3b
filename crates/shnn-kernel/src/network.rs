//! Network topology and its partitioning across worker threads

use std::ops::Range;
use std::sync::Arc;

use crate::{
    error::*,
    ids::{NeuronId, RuleId, SynapseId},
    learning::LearningRule,
    model::TimeDrivenModel,
    state::partition_ranges,
    synapse::{Interconnection, RuleBinding, SynapsePartition},
};

/// Description of one synapse to be built
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSpec {
    /// Pre-synaptic neuron
    pub source: NeuronId,
    /// Post-synaptic neuron
    pub target: NeuronId,
    /// Initial weight
    pub weight: f32,
    /// Transmission delay (s)
    pub delay: f64,
    /// Upper weight bound for learning
    pub max_weight: f32,
    /// Input type passed to the target's model
    pub input_type: usize,
    /// Learning rule, if the synapse is plastic
    pub rule: Option<RuleId>,
}

impl ConnectionSpec {
    /// Static excitatory connection with `max_weight` 1.0
    pub fn new(source: NeuronId, target: NeuronId, weight: f32, delay: f64) -> Self {
        Self {
            source,
            target,
            weight,
            delay,
            max_weight: 1.0,
            input_type: 0,
            rule: None,
        }
    }

    /// Set the upper weight bound
    pub fn with_max_weight(mut self, max_weight: f32) -> Self {
        self.max_weight = max_weight;
        self
    }

    /// Set the input type
    pub fn with_input_type(mut self, input_type: usize) -> Self {
        self.input_type = input_type;
        self
    }

    /// Bind a learning rule
    pub fn with_rule(mut self, rule: RuleId) -> Self {
        self.rule = Some(rule);
        self
    }
}

/// Built network, ready to be simulated
#[derive(Debug)]
pub struct Network {
    pub(crate) model: Arc<dyn TimeDrivenModel>,
    pub(crate) neuron_count: usize,
    pub(crate) rules: Vec<Box<dyn LearningRule>>,
    pub(crate) partitions: Vec<Range<usize>>,
    /// Per neuron: outgoing synapses with their delays, by delay then ID
    pub(crate) outgoing: Vec<Vec<(SynapseId, f64)>>,
    /// Per synapse: (partition, offset within the partition)
    pub(crate) synapse_owner: Vec<(usize, usize)>,
    /// Incoming synapses of each partition, moved into the state store
    pub(crate) synapses: Vec<SynapsePartition>,
}

impl Network {
    /// Neuron model shared by every neuron
    pub fn model(&self) -> &dyn TimeDrivenModel {
        self.model.as_ref()
    }

    /// Get neuron count
    pub fn neuron_count(&self) -> usize {
        self.neuron_count
    }

    /// Get synapse count
    pub fn synapse_count(&self) -> usize {
        self.synapse_owner.len()
    }

    /// Number of partitions (worker threads)
    pub fn threads(&self) -> usize {
        self.partitions.len()
    }

    /// Neuron range owned by each partition
    pub fn partitions(&self) -> &[Range<usize>] {
        &self.partitions
    }

    /// Learning rule by ID
    pub fn rule(&self, id: RuleId) -> Result<&dyn LearningRule> {
        self.rules
            .get(id.index())
            .map(|rule| rule.as_ref())
            .ok_or(KernelError::RuleNotFound { rule_id: id.index() })
    }

    /// Outgoing synapses of a neuron with their delays
    pub fn outgoing(&self, neuron: NeuronId) -> Result<&[(SynapseId, f64)]> {
        self.outgoing
            .get(neuron.index())
            .map(Vec::as_slice)
            .ok_or(KernelError::NeuronNotFound {
                neuron_id: neuron.raw(),
            })
    }

    /// Partition and local index owning a neuron
    pub fn locate(&self, neuron: NeuronId) -> Result<(usize, usize)> {
        let index = neuron.index();
        self.partitions
            .iter()
            .position(|range| range.contains(&index))
            .map(|thread| (thread, index - self.partitions[thread].start))
            .ok_or(KernelError::NeuronNotFound {
                neuron_id: neuron.raw(),
            })
    }
}

/// Builder for constructing networks
#[derive(Debug, Default)]
pub struct NetworkBuilder {
    neuron_count: u32,
    rules: Vec<Box<dyn LearningRule>>,
    connections: Vec<ConnectionSpec>,
}

impl NetworkBuilder {
    /// Create a new network builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `count` neurons; IDs are dense and assigned in order
    pub fn add_neurons(mut self, count: u32) -> Self {
        self.neuron_count += count;
        self
    }

    /// Add a learning rule; its ID is its position among added rules
    pub fn add_rule(mut self, rule: Box<dyn LearningRule>) -> Self {
        self.rules.push(rule);
        self
    }

    /// Add several learning rules
    pub fn with_rules(mut self, rules: impl IntoIterator<Item = Box<dyn LearningRule>>) -> Self {
        self.rules.extend(rules);
        self
    }

    /// Add a static excitatory synapse
    pub fn add_synapse(self, source: NeuronId, target: NeuronId, weight: f32, delay: f64) -> Self {
        self.connect(ConnectionSpec::new(source, target, weight, delay))
    }

    /// Add a synapse from a full description
    pub fn connect(mut self, spec: ConnectionSpec) -> Self {
        self.connections.push(spec);
        self
    }

    /// Connect all neurons in a fully connected pattern
    pub fn fully_connected(mut self, weight: f32, delay: f64) -> Self {
        for pre in 0..self.neuron_count {
            for post in 0..self.neuron_count {
                if pre != post {
                    self.connections.push(ConnectionSpec::new(
                        NeuronId::new(pre),
                        NeuronId::new(post),
                        weight,
                        delay,
                    ));
                }
            }
        }
        self
    }

    /// Build the network for `threads` worker threads
    ///
    /// Neurons are split into contiguous blocks, one per thread. Synapse IDs
    /// follow insertion order; each synapse is stored in the partition of its
    /// target.
    pub fn build(self, model: Arc<dyn TimeDrivenModel>, threads: usize) -> Result<Network> {
        if threads == 0 {
            return Err(KernelError::invalid_parameter("threads", "0", ">= 1"));
        }
        let neuron_count = self.neuron_count as usize;
        let partitions = partition_ranges(neuron_count, threads);
        let input_types = model.input_types();

        let owner_of = |neuron: usize| -> usize {
            partitions
                .iter()
                .position(|range| range.contains(&neuron))
                .unwrap_or(0)
        };

        let mut synapses: Vec<SynapsePartition> = partitions
            .iter()
            .map(|range| SynapsePartition {
                synapses: Vec::new(),
                rule_states: Vec::new(),
                post_learning_inputs: vec![Vec::new(); range.len()],
                triggered_inputs: vec![Vec::new(); range.len()],
            })
            .collect();
        let mut slots = vec![vec![0usize; self.rules.len()]; partitions.len()];
        let mut outgoing = vec![Vec::new(); neuron_count];
        let mut synapse_owner = Vec::with_capacity(self.connections.len());

        for (index, spec) in self.connections.into_iter().enumerate() {
            for neuron in [spec.source, spec.target] {
                if neuron.index() >= neuron_count {
                    return Err(KernelError::NeuronNotFound {
                        neuron_id: neuron.raw(),
                    });
                }
            }
            if !(spec.delay >= 0.0) || !spec.delay.is_finite() {
                return Err(KernelError::invalid_parameter(
                    "delay",
                    spec.delay.to_string(),
                    ">= 0.0",
                ));
            }
            if !(spec.weight >= 0.0) || !spec.weight.is_finite() {
                return Err(KernelError::invalid_parameter(
                    "weight",
                    spec.weight.to_string(),
                    "finite and >= 0.0",
                ));
            }
            if spec.input_type >= input_types {
                return Err(KernelError::invalid_parameter(
                    "input_type",
                    spec.input_type.to_string(),
                    format!("< {}", input_types),
                ));
            }

            let id = SynapseId::new(index as u32);
            let thread = owner_of(spec.target.index());
            let local = spec.target.index() - partitions[thread].start;

            let rule = match spec.rule {
                Some(rule_id) => {
                    let rule = self
                        .rules
                        .get(rule_id.index())
                        .ok_or(KernelError::RuleNotFound {
                            rule_id: rule_id.index(),
                        })?;
                    if !spec.max_weight.is_finite() || !(spec.weight <= spec.max_weight) {
                        return Err(KernelError::invalid_parameter(
                            "weight",
                            format!("{} (with max_weight={})", spec.weight, spec.max_weight),
                            "<= max_weight, max_weight finite",
                        ));
                    }
                    let slot = &mut slots[thread][rule_id.index()];
                    let binding = RuleBinding {
                        rule: rule_id,
                        slot: *slot,
                    };
                    *slot += 1;

                    let offset = synapses[thread].synapses.len();
                    if rule.implements_post_synaptic() {
                        synapses[thread].post_learning_inputs[local].push(offset);
                    }
                    if !rule.is_trigger() {
                        synapses[thread].triggered_inputs[local].push(offset);
                    }
                    Some(binding)
                }
                None => None,
            };

            synapse_owner.push((thread, synapses[thread].synapses.len()));
            outgoing[spec.source.index()].push((id, spec.delay));
            synapses[thread].synapses.push(Interconnection {
                id,
                source: spec.source,
                target: spec.target,
                delay: spec.delay,
                weight: spec.weight,
                initial_weight: spec.weight,
                max_weight: spec.max_weight,
                input_type: spec.input_type,
                rule,
            });
        }

        for (partition, counts) in synapses.iter_mut().zip(&slots) {
            partition.rule_states = self
                .rules
                .iter()
                .zip(counts)
                .map(|(rule, &count)| rule.initialize_connection_state(count))
                .collect();
        }
        for list in &mut outgoing {
            list.sort_by(|a: &(SynapseId, f64), b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        }

        log::debug!(
            "Built network: {} neurons, {} synapses, {} rules, {} partitions",
            neuron_count,
            synapse_owner.len(),
            self.rules.len(),
            partitions.len()
        );

        Ok(Network {
            model,
            neuron_count,
            rules: self.rules,
            partitions,
            outgoing,
            synapse_owner,
            synapses,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::{ExpKernelParams, ExpWeightChange, SpikePairing, StdpParams, StdpWeightChange};
    use crate::model::LifConductanceModel;

    fn model() -> Arc<dyn TimeDrivenModel> {
        Arc::new(LifConductanceModel::default())
    }

    #[test]
    fn test_network_builder() {
        let network = NetworkBuilder::new()
            .add_neurons(3)
            .add_synapse(NeuronId::new(0), NeuronId::new(1), 0.5, 1e-3)
            .add_synapse(NeuronId::new(1), NeuronId::new(2), 0.3, 1e-3)
            .build(model(), 1)
            .unwrap();

        assert_eq!(network.neuron_count(), 3);
        assert_eq!(network.synapse_count(), 2);
        assert_eq!(network.outgoing(NeuronId::new(0)).unwrap().len(), 1);
        assert!(network.outgoing(NeuronId::new(2)).unwrap().is_empty());
    }

    #[test]
    fn test_fully_connected_builder() {
        let network = NetworkBuilder::new()
            .add_neurons(3)
            .fully_connected(0.1, 1e-3)
            .build(model(), 2)
            .unwrap();

        assert_eq!(network.neuron_count(), 3);
        assert_eq!(network.synapse_count(), 6); // 3x3 - 3 (no self-connections)
    }

    #[test]
    fn test_synapses_stored_with_target() {
        let network = NetworkBuilder::new()
            .add_neurons(4)
            .add_synapse(NeuronId::new(0), NeuronId::new(3), 0.5, 1e-3)
            .add_synapse(NeuronId::new(3), NeuronId::new(0), 0.5, 1e-3)
            .build(model(), 2)
            .unwrap();

        assert_eq!(network.partitions(), &[0..2, 2..4]);
        assert_eq!(network.locate(NeuronId::new(3)).unwrap(), (1, 1));
        assert_eq!(network.synapse_owner, vec![(1, 0), (0, 0)]);
        assert_eq!(network.synapses[1].synapses()[0].target, NeuronId::new(3));
    }

    #[test]
    fn test_outgoing_sorted_by_delay() {
        let network = NetworkBuilder::new()
            .add_neurons(3)
            .add_synapse(NeuronId::new(0), NeuronId::new(1), 0.5, 3e-3)
            .add_synapse(NeuronId::new(0), NeuronId::new(2), 0.5, 1e-3)
            .build(model(), 1)
            .unwrap();
        let delays: Vec<f64> = network
            .outgoing(NeuronId::new(0))
            .unwrap()
            .iter()
            .map(|(_, delay)| *delay)
            .collect();
        assert_eq!(delays, vec![1e-3, 3e-3]);
    }

    #[test]
    fn test_learning_input_lists() {
        let stdp = StdpWeightChange::new(StdpParams::default(), SpikePairing::AllToAll).unwrap();
        let trigger = ExpWeightChange::new(ExpKernelParams {
            trigger: true,
            ..ExpKernelParams::default()
        })
        .unwrap();
        let network = NetworkBuilder::new()
            .add_neurons(3)
            .add_rule(Box::new(stdp))
            .add_rule(Box::new(trigger))
            .connect(ConnectionSpec::new(NeuronId::new(0), NeuronId::new(2), 0.5, 1e-3).with_rule(RuleId(0)))
            .connect(ConnectionSpec::new(NeuronId::new(1), NeuronId::new(2), 0.5, 1e-3).with_rule(RuleId(1)))
            .add_synapse(NeuronId::new(1), NeuronId::new(2), 0.5, 1e-3)
            .build(model(), 1)
            .unwrap();

        let partition = &network.synapses[0];
        assert_eq!(partition.post_learning_inputs[2], vec![0]);
        assert_eq!(partition.triggered_inputs[2], vec![0]);
        assert_eq!(partition.rule_state(RuleId(0)).unwrap().len(), 1);
        assert_eq!(partition.rule_state(RuleId(1)).unwrap().len(), 1);
    }

    #[test]
    fn test_build_errors() {
        let unknown_neuron = NetworkBuilder::new()
            .add_neurons(2)
            .add_synapse(NeuronId::new(0), NeuronId::new(5), 0.5, 1e-3)
            .build(model(), 1);
        assert!(matches!(unknown_neuron, Err(KernelError::NeuronNotFound { neuron_id: 5 })));

        let unknown_rule = NetworkBuilder::new()
            .add_neurons(2)
            .connect(ConnectionSpec::new(NeuronId::new(0), NeuronId::new(1), 0.5, 1e-3).with_rule(RuleId(0)))
            .build(model(), 1);
        assert!(matches!(unknown_rule, Err(KernelError::RuleNotFound { rule_id: 0 })));

        let negative_delay = NetworkBuilder::new()
            .add_neurons(2)
            .add_synapse(NeuronId::new(0), NeuronId::new(1), 0.5, -1.0)
            .build(model(), 1);
        assert!(negative_delay.is_err());

        let bad_input = NetworkBuilder::new()
            .add_neurons(2)
            .connect(ConnectionSpec::new(NeuronId::new(0), NeuronId::new(1), 0.5, 1e-3).with_input_type(7))
            .build(model(), 1);
        assert!(bad_input.is_err());

        assert!(NetworkBuilder::new().add_neurons(1).build(model(), 0).is_err());
    }

    #[test]
    fn test_plastic_weight_bounds_must_be_finite() {
        let plastic = |max_weight: f32| {
            let stdp = StdpWeightChange::new(StdpParams::default(), SpikePairing::AllToAll).unwrap();
            NetworkBuilder::new()
                .add_neurons(2)
                .add_rule(Box::new(stdp))
                .connect(
                    ConnectionSpec::new(NeuronId::new(0), NeuronId::new(1), 0.5, 1e-3)
                        .with_rule(RuleId(0))
                        .with_max_weight(max_weight),
                )
                .build(model(), 1)
        };
        assert!(plastic(2.0).is_ok());
        assert!(plastic(0.25).is_err());
        assert!(plastic(f32::NAN).is_err());
        assert!(plastic(f32::INFINITY).is_err());

        let infinite_weight = NetworkBuilder::new()
            .add_neurons(2)
            .add_synapse(NeuronId::new(0), NeuronId::new(1), f32::INFINITY, 1e-3)
            .build(model(), 1);
        assert!(infinite_weight.is_err());
    }
}
