//! Neuron state store
//!
//! Neurons are split into contiguous partitions, one per worker thread. A
//! partition owns the state rows of its neurons, the integration method
//! instance that advances them, and the synapses targeting them. Parallel
//! phases hand each partition to one rayon worker, so rows, integrator
//! scratch and learning state are never shared.

use std::ops::Range;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::{
    error::*,
    ids::NeuronId,
    integration::{IntegrationMethod, IntegrationStats, IntegratorSet},
    learning::LearningRule,
    model::TimeDrivenModel,
    synapse::SynapsePartition,
};

/// Split `n` neurons into `threads` contiguous blocks whose sizes differ by at most one
pub fn partition_ranges(n: usize, threads: usize) -> Vec<Range<usize>> {
    let threads = threads.max(1);
    let base = n / threads;
    let extra = n % threads;
    let mut start = 0;
    (0..threads)
        .map(|thread| {
            let len = base + usize::from(thread < extra);
            let range = start..start + len;
            start += len;
            range
        })
        .collect()
}

/// Neurons, integrator and incoming synapses owned by one worker thread
#[derive(Debug)]
pub struct Partition {
    thread: usize,
    first: usize,
    len: usize,
    n_state: usize,
    rows: Vec<f32>,
    last_update: Vec<f64>,
    integrator: Box<dyn IntegrationMethod>,
    pub(crate) synapses: SynapsePartition,
}

impl Partition {
    /// Worker thread owning the partition
    pub fn thread(&self) -> usize {
        self.thread
    }

    /// Global neuron range of the partition
    pub fn range(&self) -> Range<usize> {
        self.first..self.first + self.len
    }

    /// State row of a local neuron
    pub fn row(&self, local: usize) -> &[f32] {
        &self.rows[local * self.n_state..(local + 1) * self.n_state]
    }

    fn row_mut(&mut self, local: usize) -> &mut [f32] {
        &mut self.rows[local * self.n_state..(local + 1) * self.n_state]
    }

    /// Time the local neuron was last advanced to
    pub fn last_update(&self, local: usize) -> f64 {
        self.last_update[local]
    }

    /// Integration method bound to the partition
    pub fn integrator(&self) -> &dyn IntegrationMethod {
        self.integrator.as_ref()
    }

    /// Incoming synapses
    pub fn synapses(&self) -> &SynapsePartition {
        &self.synapses
    }

    /// Bring a local neuron up to `time`
    pub(crate) fn advance(&mut self, local: usize, model: &dyn TimeDrivenModel, time: f64) {
        let elapsed = time - self.last_update[local];
        if elapsed > 0.0 {
            let row = &mut self.rows[local * self.n_state..(local + 1) * self.n_state];
            self.integrator
                .next_differential_equation_value(local, model, row, elapsed);
            self.last_update[local] = time;
        }
    }

    /// Bring every neuron up to `time`
    pub(crate) fn advance_all(&mut self, model: &dyn TimeDrivenModel, time: f64) {
        for local in 0..self.len {
            self.advance(local, model, time);
        }
    }

    /// Advance every neuron to `time`, reset the ones above threshold and
    /// apply postsynaptic learning to their inputs; returns the fired neurons
    /// in ID order
    pub(crate) fn sweep(
        &mut self,
        model: &dyn TimeDrivenModel,
        rules: &[Box<dyn LearningRule>],
        time: f64,
    ) -> Vec<NeuronId> {
        let mut fired = Vec::new();
        for local in 0..self.len {
            self.advance(local, model, time);
            let row = self.row_mut(local);
            if model.check_spike(row) {
                model.reset_after_spike(row);
                self.integrator.reset_state(local);
                fired.push(local);
            }
        }
        for &local in &fired {
            self.learn_post_synaptic(local, rules, time);
        }
        fired
            .into_iter()
            .map(|local| NeuronId::new((self.first + local) as u32))
            .collect()
    }

    /// Postsynaptic learning on the plastic inputs of a neuron that fired
    pub(crate) fn learn_post_synaptic(
        &mut self,
        local: usize,
        rules: &[Box<dyn LearningRule>],
        time: f64,
    ) {
        for i in 0..self.synapses.post_learning_inputs[local].len() {
            let offset = self.synapses.post_learning_inputs[local][i];
            if let Some((rule, synapse)) = self.synapses.synapse_mut(offset) {
                rules[rule.index()].apply_post_synaptic_spike(synapse, time);
            }
        }
    }

    /// Deliver spikes arriving at `time` through the synapses at `offsets`,
    /// in order
    pub(crate) fn deliver(
        &mut self,
        model: &dyn TimeDrivenModel,
        rules: &[Box<dyn LearningRule>],
        offsets: &[usize],
        time: f64,
    ) {
        for &offset in offsets {
            let synapse = &self.synapses.synapses[offset];
            let local = synapse.target.index() - self.first;
            let (input_type, weight) = (synapse.input_type, synapse.weight);

            self.advance(local, model, time);
            model.apply_synaptic_input(self.row_mut(local), input_type, weight);
            self.integrator.invalidate_prediction(local);

            let Some((rule_id, view)) = self.synapses.synapse_mut(offset) else {
                continue;
            };
            let rule = &rules[rule_id.index()];
            rule.apply_pre_synaptic_spike(view, time);
            if rule.is_trigger() {
                for i in 0..self.synapses.triggered_inputs[local].len() {
                    let other = self.synapses.triggered_inputs[local][i];
                    if let Some((other_rule, view)) = self.synapses.synapse_mut(other) {
                        rules[other_rule.index()].apply_triggered_update(view, time);
                    }
                }
            }
        }
    }

    fn reset(&mut self, initial: &[f32], integrator: Box<dyn IntegrationMethod>) {
        for row in self.rows.chunks_mut(self.n_state) {
            row.copy_from_slice(initial);
        }
        self.last_update.iter_mut().for_each(|t| *t = 0.0);
        self.integrator = integrator;
        self.integrator.initialize_states(self.len, initial);
        self.synapses.reset();
    }
}

/// Per-neuron state rows, partitioned by worker thread
#[derive(Debug)]
pub struct NeuronStateStore {
    partitions: Vec<Partition>,
    initial: Vec<f32>,
    #[cfg(feature = "parallel")]
    pool: Option<rayon::ThreadPool>,
}

impl NeuronStateStore {
    /// Allocate rows for every partition and seed the integrators
    pub fn new(
        model: &dyn TimeDrivenModel,
        ranges: &[Range<usize>],
        integrators: IntegratorSet,
        synapses: Vec<SynapsePartition>,
    ) -> Result<Self> {
        if integrators.len() != ranges.len() || synapses.len() != ranges.len() {
            return Err(KernelError::invalid_config(format!(
                "{} partitions but {} integrators and {} synapse partitions",
                ranges.len(),
                integrators.len(),
                synapses.len()
            )));
        }
        let layout = model.layout();
        let initial = model.initial_state();
        if initial.len() != layout.n_state {
            return Err(KernelError::invalid_parameter(
                "initial_state",
                format!("{} values", initial.len()),
                format!("{} values", layout.n_state),
            ));
        }

        let partitions = ranges
            .iter()
            .zip(integrators.into_methods())
            .zip(synapses)
            .enumerate()
            .map(|(thread, ((range, mut integrator), synapses))| {
                integrator.initialize_states(range.len(), &initial);
                Partition {
                    thread,
                    first: range.start,
                    len: range.len(),
                    n_state: layout.n_state,
                    rows: initial.repeat(range.len()),
                    last_update: vec![0.0; range.len()],
                    integrator,
                    synapses,
                }
            })
            .collect::<Vec<_>>();

        #[cfg(feature = "parallel")]
        let pool = if partitions.len() > 1 {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(partitions.len())
                    .build()
                    .map_err(|e| KernelError::thread_pool(e.to_string()))?,
            )
        } else {
            None
        };

        Ok(Self {
            partitions,
            initial,
            #[cfg(feature = "parallel")]
            pool,
        })
    }

    /// Partitions in thread order
    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    pub(crate) fn partition_mut(&mut self, thread: usize) -> &mut Partition {
        &mut self.partitions[thread]
    }

    /// Total number of neurons
    pub fn neuron_count(&self) -> usize {
        self.partitions.iter().map(|p| p.len).sum()
    }

    /// Partition and local index of a neuron
    pub fn locate(&self, neuron: NeuronId) -> Result<(usize, usize)> {
        let index = neuron.index();
        self.partitions
            .iter()
            .find(|p| p.range().contains(&index))
            .map(|p| (p.thread, index - p.first))
            .ok_or(KernelError::NeuronNotFound {
                neuron_id: neuron.raw(),
            })
    }

    /// State row of a neuron as of its last update
    pub fn state(&self, neuron: NeuronId) -> Result<&[f32]> {
        let (thread, local) = self.locate(neuron)?;
        Ok(self.partitions[thread].row(local))
    }

    /// Time a neuron was last advanced to
    pub fn last_update(&self, neuron: NeuronId) -> Result<f64> {
        let (thread, local) = self.locate(neuron)?;
        Ok(self.partitions[thread].last_update(local))
    }

    /// Bring a single neuron up to `time`
    pub fn advance(&mut self, neuron: NeuronId, model: &dyn TimeDrivenModel, time: f64) -> Result<()> {
        let (thread, local) = self.locate(neuron)?;
        self.partitions[thread].advance(local, model, time);
        Ok(())
    }

    /// Run `f` on every partition, in parallel when a pool is available;
    /// results come back in partition order
    #[cfg(feature = "parallel")]
    pub(crate) fn map_partitions<R, F>(&mut self, f: F) -> Vec<R>
    where
        R: Send,
        F: Fn(&mut Partition) -> R + Sync + Send,
    {
        match &self.pool {
            Some(pool) => {
                let partitions = &mut self.partitions;
                pool.install(|| partitions.par_iter_mut().map(|p| f(p)).collect())
            }
            None => self.partitions.iter_mut().map(f).collect(),
        }
    }

    /// Run `f` on every partition in order
    #[cfg(not(feature = "parallel"))]
    pub(crate) fn map_partitions<R, F>(&mut self, f: F) -> Vec<R>
    where
        R: Send,
        F: Fn(&mut Partition) -> R + Sync + Send,
    {
        self.partitions.iter_mut().map(f).collect()
    }

    /// Integration counters of all partitions combined
    pub fn statistics(&self) -> IntegrationStats {
        let mut total = IntegrationStats::default();
        for partition in &self.partitions {
            total.merge(&partition.integrator.statistics());
        }
        total
    }

    /// Restore every row, weight and rule variable to its initial value,
    /// installing fresh integrators
    pub fn reset(&mut self, integrators: IntegratorSet) -> Result<()> {
        if integrators.len() != self.partitions.len() {
            return Err(KernelError::invalid_config(format!(
                "{} partitions but {} integrators",
                self.partitions.len(),
                integrators.len()
            )));
        }
        let initial = &self.initial;
        for (partition, integrator) in self.partitions.iter_mut().zip(integrators.into_methods()) {
            partition.reset(initial, integrator);
        }
        Ok(())
    }
}
