//! Simulation driver
//!
//! The driver pops the earliest event, brings the affected neurons up to the
//! event time and dispatches it:
//! - `Emit` records the spike, applies postsynaptic learning to the firing
//!   neuron's inputs and schedules one `Arrival` per outgoing synapse;
//! - consecutive `Arrival`s sharing a timestamp are delivered as one batch,
//!   each partition handling its own synapses in parallel;
//! - `TimeDrivenStep` sweeps every partition in parallel, resetting the
//!   neurons above threshold; their spikes are merged in partition order;
//! - `Sampling` records state and feeds the weight sinks;
//! - `StopSimulation` ends the run and discards whatever is still queued.
//!
//! Partitions are contiguous neuron blocks and every merge follows partition
//! order, so the event sequence does not depend on the thread count.

use std::time::{Duration, Instant};

use crate::{
    error::*,
    event::{Event, EventKind},
    ids::{NeuronId, Spike, SynapseId},
    integration::{IntegrationConfig, IntegrationStats},
    network::Network,
    output::{WeightEntry, WeightSink, WeightSnapshot},
    queue::{InputHandle, SharedEventQueue},
    state::NeuronStateStore,
};

/// Simulation parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationParams {
    /// Period of the time-driven sweep (s); `None` disables it
    pub time_driven_step: Option<f64>,
    /// Period of state sampling and weight output (s); `None` disables it
    pub sampling_period: Option<f64>,
    /// Wall-clock budget of one `run` call
    pub real_time_budget: Option<Duration>,
    /// Record state rows on sampling events
    pub record_states: bool,
    /// Neurons whose state is recorded (None = all)
    pub record_neurons: Option<Vec<NeuronId>>,
    /// Maximum spikes to record (prevents memory issues)
    pub max_recorded_spikes: Option<usize>,
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            time_driven_step: Some(1e-3), // 1ms sweep
            sampling_period: None,
            real_time_budget: None,
            record_states: false,
            record_neurons: None,
            max_recorded_spikes: Some(1_000_000), // 1M spike limit
        }
    }
}

impl SimulationParams {
    /// Set the time-driven sweep period
    pub fn with_time_driven_step(mut self, step: Option<f64>) -> Self {
        self.time_driven_step = step;
        self
    }

    /// Set the sampling period
    pub fn with_sampling_period(mut self, period: Option<f64>) -> Self {
        self.sampling_period = period;
        self
    }

    /// Set the wall-clock budget of a run
    pub fn with_real_time_budget(mut self, budget: Duration) -> Self {
        self.real_time_budget = Some(budget);
        self
    }

    /// Enable state recording, optionally for a subset of neurons
    pub fn with_state_recording(mut self, neurons: Option<Vec<NeuronId>>) -> Self {
        self.record_states = true;
        self.record_neurons = neurons;
        self
    }

    /// Set maximum spike recording limit
    pub fn with_spike_limit(mut self, limit: usize) -> Self {
        self.max_recorded_spikes = Some(limit);
        self
    }

    /// Validate parameters
    pub fn validate(&self) -> Result<()> {
        for (name, period) in [
            ("time_driven_step", self.time_driven_step),
            ("sampling_period", self.sampling_period),
        ] {
            if let Some(period) = period {
                if !(period > 0.0) || !period.is_finite() {
                    return Err(KernelError::invalid_parameter(
                        name,
                        period.to_string(),
                        "> 0.0",
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Lifecycle of a simulation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationStatus {
    /// Created or reset, never run
    Idle,
    /// Inside `run`
    Running,
    /// A stop event was processed
    Stopped,
    /// The queue ran empty
    Exhausted,
    /// The wall-clock budget expired; `run` resumes
    TimedOut,
    /// An event handler or weight sink returned an error
    Failed,
}

/// Recorded state row
#[derive(Debug, Clone, PartialEq)]
pub struct StateSample {
    /// Neuron ID
    pub neuron_id: NeuronId,
    /// Sample time (s)
    pub time: f64,
    /// Full state row
    pub state: Vec<f32>,
}

/// Outcome of a run
#[derive(Debug, Clone)]
pub struct SimulationReport {
    /// Why the run returned
    pub status: SimulationStatus,
    /// All recorded spikes
    pub spikes: Vec<Spike>,
    /// Recorded state rows
    pub samples: Vec<StateSample>,
    /// Time of the last dispatched event (s)
    pub final_time: f64,
    /// Events dispatched since creation or reset
    pub events_processed: u64,
    /// Integration counters of all partitions
    pub stats: IntegrationStats,
}

impl SimulationReport {
    /// Get spikes for a specific neuron
    pub fn spikes_for_neuron(&self, neuron_id: NeuronId) -> Vec<&Spike> {
        self.spikes
            .iter()
            .filter(|spike| spike.neuron_id == neuron_id)
            .collect()
    }

    /// Get firing rate for a neuron over the simulated time (Hz)
    pub fn firing_rate(&self, neuron_id: NeuronId) -> f64 {
        if self.final_time <= 0.0 {
            return 0.0;
        }
        self.spikes_for_neuron(neuron_id).len() as f64 / self.final_time
    }

    /// Export spikes to simple format (time, neuron_id)
    pub fn export_spikes(&self) -> Vec<(f64, u32)> {
        self.spikes
            .iter()
            .map(|spike| (spike.time, spike.neuron_id.raw()))
            .collect()
    }
}

/// Hybrid event-driven / time-driven simulation
#[derive(Debug)]
pub struct Simulation {
    network: Network,
    store: NeuronStateStore,
    queue: SharedEventQueue,
    params: SimulationParams,
    integration: IntegrationConfig,
    status: SimulationStatus,
    sinks: Vec<Box<dyn WeightSink>>,
    spikes: Vec<Spike>,
    samples: Vec<StateSample>,
    events_processed: u64,
    /// Periodic events currently queued
    periodic_pending: usize,
    spike_limit_warned: bool,
}

impl Simulation {
    /// Create a simulation of `network`
    pub fn new(
        mut network: Network,
        params: SimulationParams,
        integration: IntegrationConfig,
    ) -> Result<Self> {
        params.validate()?;
        integration.validate()?;
        if let Some(neurons) = &params.record_neurons {
            for neuron in neurons {
                if neuron.index() >= network.neuron_count() {
                    return Err(KernelError::NeuronNotFound {
                        neuron_id: neuron.raw(),
                    });
                }
            }
        }

        let integrators = integration.instantiate(network.model().layout(), network.threads())?;
        let synapses = std::mem::take(&mut network.synapses);
        let store = NeuronStateStore::new(
            network.model(),
            network.partitions(),
            integrators,
            synapses,
        )?;

        Ok(Self {
            network,
            store,
            queue: SharedEventQueue::new(),
            params,
            integration,
            status: SimulationStatus::Idle,
            sinks: Vec::new(),
            spikes: Vec::new(),
            samples: Vec::new(),
            events_processed: 0,
            periodic_pending: 0,
            spike_limit_warned: false,
        })
    }

    /// Schedule a spike of `neuron` at `time`
    pub fn inject_spike(&mut self, neuron: NeuronId, time: f64) -> Result<()> {
        self.check_neuron(neuron)?;
        self.queue.insert(Event::emit(neuron, time))
    }

    /// Handle for injecting spikes from other threads
    pub fn input_handle(&self) -> InputHandle {
        InputHandle::new(self.queue.clone(), self.network.neuron_count())
    }

    /// Register a weight sink, fed on every sampling event and at stop
    pub fn add_weight_sink(&mut self, sink: Box<dyn WeightSink>) {
        self.sinks.push(sink);
    }

    /// Schedule a stop at `t_end` and run
    pub fn run_until(&mut self, t_end: f64) -> Result<SimulationReport> {
        self.queue.insert(Event::stop(t_end))?;
        self.run()
    }

    /// Dispatch events until a stop, an empty queue or the wall-clock budget
    pub fn run(&mut self) -> Result<SimulationReport> {
        self.schedule_periodic()?;
        self.status = SimulationStatus::Running;
        log::info!(
            "Starting simulation at {}s: {} neurons, {} synapses, {} threads, {}",
            self.current_time(),
            self.network.neuron_count(),
            self.network.synapse_count(),
            self.network.threads(),
            self.integration.method
        );

        let started = Instant::now();
        let processed_before = self.events_processed;
        while self.status == SimulationStatus::Running {
            if let Some(budget) = self.params.real_time_budget {
                if started.elapsed() >= budget {
                    log::warn!(
                        "Real-time budget of {:?} exhausted at {}s",
                        budget,
                        self.current_time()
                    );
                    self.status = SimulationStatus::TimedOut;
                    break;
                }
            }

            let event = match self.queue.pop_earliest() {
                Ok(event) => event,
                Err(e) if e.is_empty_queue() => {
                    self.status = SimulationStatus::Exhausted;
                    break;
                }
                Err(e) => return Err(e),
            };
            let time = event.time;
            if let Err(e) = self.dispatch(event) {
                log::error!("Simulation failed at {}s: {}", time, e);
                self.status = SimulationStatus::Failed;
                return Err(e);
            }
        }

        for sink in &mut self.sinks {
            if let Err(e) = sink.flush() {
                log::error!("Flushing weight sink failed: {}", e);
                self.status = SimulationStatus::Failed;
                return Err(e);
            }
        }
        log::info!(
            "Simulation {:?} at {}s: {} events, {} spikes recorded",
            self.status,
            self.current_time(),
            self.events_processed - processed_before,
            self.spikes.len()
        );
        Ok(self.report())
    }

    /// Current status
    pub fn status(&self) -> SimulationStatus {
        self.status
    }

    /// Time of the last dispatched event (s)
    pub fn current_time(&self) -> f64 {
        self.queue.now()
    }

    /// Snapshot of every synaptic weight
    pub fn weights(&self) -> WeightSnapshot {
        let mut entries: Vec<WeightEntry> = self
            .store
            .partitions()
            .iter()
            .flat_map(|p| p.synapses().synapses())
            .map(|s| WeightEntry {
                synapse: s.id,
                source: s.source,
                target: s.target,
                weight: s.weight,
            })
            .collect();
        entries.sort_by_key(|entry| entry.synapse);
        WeightSnapshot {
            time: self.current_time(),
            entries,
        }
    }

    /// State row of a neuron as of its last update
    pub fn neuron_state(&self, neuron: NeuronId) -> Result<&[f32]> {
        self.store.state(neuron)
    }

    /// The simulated network
    pub fn network(&self) -> &Network {
        &self.network
    }

    /// Get simulation parameters
    pub fn params(&self) -> &SimulationParams {
        &self.params
    }

    /// Restore the initial state: rows, weights, rule state, clock and queue
    pub fn reset(&mut self) -> Result<()> {
        let integrators = self
            .integration
            .instantiate(self.network.model().layout(), self.network.threads())?;
        self.store.reset(integrators)?;
        self.queue.lock().reset();
        self.spikes.clear();
        self.samples.clear();
        self.events_processed = 0;
        self.periodic_pending = 0;
        self.spike_limit_warned = false;
        self.status = SimulationStatus::Idle;
        Ok(())
    }

    /// Report of everything recorded so far
    pub fn report(&self) -> SimulationReport {
        SimulationReport {
            status: self.status,
            spikes: self.spikes.clone(),
            samples: self.samples.clone(),
            final_time: self.current_time(),
            events_processed: self.events_processed,
            stats: self.store.statistics(),
        }
    }

    fn check_neuron(&self, neuron: NeuronId) -> Result<()> {
        if neuron.index() >= self.network.neuron_count() {
            return Err(KernelError::NeuronNotFound {
                neuron_id: neuron.raw(),
            });
        }
        Ok(())
    }

    /// Queue the periodic events if none are pending
    fn schedule_periodic(&mut self) -> Result<()> {
        if self.periodic_pending > 0 {
            return Ok(());
        }
        let now = self.current_time();
        let mut queue = self.queue.lock();
        if let Some(step) = self.params.time_driven_step {
            queue.insert(Event::new(now + step, EventKind::TimeDrivenStep))?;
            self.periodic_pending += 1;
        }
        if let Some(period) = self.params.sampling_period {
            queue.insert(Event::new(now + period, EventKind::Sampling))?;
            self.periodic_pending += 1;
        }
        Ok(())
    }

    /// Re-queue a periodic event while anything else is still pending
    fn reschedule(&mut self, kind: EventKind, time: f64, period: Option<f64>) -> Result<()> {
        self.periodic_pending -= 1;
        let Some(period) = period else {
            return Ok(());
        };
        let mut queue = self.queue.lock();
        if queue.len() > self.periodic_pending {
            queue.insert(Event::new(time + period, kind))?;
            self.periodic_pending += 1;
        }
        Ok(())
    }

    fn dispatch(&mut self, event: Event) -> Result<()> {
        log::trace!("Dispatch {}", event);
        self.events_processed += 1;
        let time = event.time;
        match event.kind {
            EventKind::Emit { neuron } => {
                let (thread, local) = self.store.locate(neuron)?;
                self.store
                    .partition_mut(thread)
                    .learn_post_synaptic(local, &self.network.rules, time);
                self.propagate(&[neuron], time)
            }
            EventKind::Arrival { synapse } => {
                let mut batch = vec![synapse];
                {
                    let mut queue = self.queue.lock();
                    while let Some(next) = queue.pop_if(|next| {
                        next.time == time && matches!(next.kind, EventKind::Arrival { .. })
                    }) {
                        if let EventKind::Arrival { synapse } = next.kind {
                            batch.push(synapse);
                        }
                    }
                }
                self.events_processed += batch.len() as u64 - 1;
                self.deliver(&batch, time)
            }
            EventKind::TimeDrivenStep => {
                let model = self.network.model.as_ref();
                let rules = &self.network.rules;
                let fired: Vec<NeuronId> = self
                    .store
                    .map_partitions(|p| p.sweep(model, rules, time))
                    .into_iter()
                    .flatten()
                    .collect();
                // Keep the periodic bookkeeping intact even if this event fails
                let propagated = self.propagate(&fired, time);
                self.reschedule(EventKind::TimeDrivenStep, time, self.params.time_driven_step)?;
                propagated
            }
            EventKind::Sampling => {
                let sampled = self.sample(time);
                self.reschedule(EventKind::Sampling, time, self.params.sampling_period)?;
                sampled
            }
            EventKind::StopSimulation => self.stop(time),
        }
    }

    /// Record spikes fired at `time` and schedule their arrivals
    fn propagate(&mut self, fired: &[NeuronId], time: f64) -> Result<()> {
        if fired.is_empty() {
            return Ok(());
        }
        let mut queue = self.queue.lock();
        for &neuron in fired {
            match self.params.max_recorded_spikes {
                Some(limit) if self.spikes.len() >= limit => {
                    if !self.spike_limit_warned {
                        log::warn!("Spike recording limit reached: {}", limit);
                        self.spike_limit_warned = true;
                    }
                }
                _ => self.spikes.push(Spike::new(neuron, time)),
            }
            for &(synapse, delay) in self.network.outgoing(neuron)? {
                queue.insert(Event::arrival(synapse, time + delay))?;
            }
        }
        Ok(())
    }

    fn deliver(&mut self, batch: &[SynapseId], time: f64) -> Result<()> {
        let mut per_partition = vec![Vec::new(); self.network.threads()];
        for synapse in batch {
            let &(thread, offset) = self
                .network
                .synapse_owner
                .get(synapse.index())
                .ok_or(KernelError::SynapseNotFound {
                    synapse_id: synapse.raw(),
                })?;
            per_partition[thread].push(offset);
        }

        let model = self.network.model.as_ref();
        let rules = &self.network.rules;
        let per_partition = &per_partition;
        self.store.map_partitions(|p| {
            let offsets = &per_partition[p.thread()];
            if !offsets.is_empty() {
                p.deliver(model, rules, offsets, time);
            }
        });
        Ok(())
    }

    fn sample(&mut self, time: f64) -> Result<()> {
        let model = self.network.model.as_ref();
        self.store.map_partitions(|p| p.advance_all(model, time));

        if self.params.record_states {
            let neurons: Vec<NeuronId> = match &self.params.record_neurons {
                Some(neurons) => neurons.clone(),
                None => (0..self.network.neuron_count() as u32)
                    .map(NeuronId::new)
                    .collect(),
            };
            for neuron_id in neurons {
                self.samples.push(StateSample {
                    neuron_id,
                    time,
                    state: self.store.state(neuron_id)?.to_vec(),
                });
            }
        }
        self.write_weights()
    }

    fn stop(&mut self, time: f64) -> Result<()> {
        let model = self.network.model.as_ref();
        self.store.map_partitions(|p| p.advance_all(model, time));

        let dropped = self.queue.lock().clear();
        self.periodic_pending = 0;
        log::debug!("Stop at {}s, {} pending events discarded", time, dropped);
        self.status = SimulationStatus::Stopped;
        self.write_weights()
    }

    fn write_weights(&mut self) -> Result<()> {
        if self.sinks.is_empty() {
            return Ok(());
        }
        let snapshot = self.weights();
        for sink in &mut self.sinks {
            sink.write_weights(&snapshot)?;
        }
        Ok(())
    }
}
