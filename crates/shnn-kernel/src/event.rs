//! Simulation events

use core::fmt;

use crate::ids::{NeuronId, SynapseId};

/// What happens when an event is dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// The neuron fires now (external input or forced spike)
    Emit {
        /// Firing neuron
        neuron: NeuronId,
    },
    /// A spike reaches the target of a synapse
    Arrival {
        /// Synapse carrying the spike
        synapse: SynapseId,
    },
    /// Advance every time-driven neuron and detect threshold crossings
    TimeDrivenStep,
    /// Record neuron state and hand weights to the sinks
    Sampling,
    /// End the run
    StopSimulation,
}

impl EventKind {
    /// Dispatch precedence among events sharing a timestamp (lower first)
    ///
    /// Spikes emitted at `t` are propagated before anything else happens at
    /// `t`; arrivals are delivered before the neurons are swept, so a sweep
    /// sees every input of its own timestamp; stop comes last.
    pub const fn precedence(&self) -> u8 {
        match self {
            EventKind::Emit { .. } => 0,
            EventKind::Arrival { .. } => 1,
            EventKind::TimeDrivenStep => 2,
            EventKind::Sampling => 3,
            EventKind::StopSimulation => 4,
        }
    }

    /// Whether the driver re-schedules the event on its own
    pub const fn is_periodic(&self) -> bool {
        matches!(self, EventKind::TimeDrivenStep | EventKind::Sampling)
    }
}

/// An event scheduled at a simulation time (s)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Event {
    /// Simulation time (s)
    pub time: f64,
    /// Event payload
    pub kind: EventKind,
}

impl Event {
    /// Create an event
    pub const fn new(time: f64, kind: EventKind) -> Self {
        Self { time, kind }
    }

    /// Spike emitted by `neuron` at `time`
    pub const fn emit(neuron: NeuronId, time: f64) -> Self {
        Self::new(time, EventKind::Emit { neuron })
    }

    /// Spike reaching the target of `synapse` at `time`
    pub const fn arrival(synapse: SynapseId, time: f64) -> Self {
        Self::new(time, EventKind::Arrival { synapse })
    }

    /// Stop the run at `time`
    pub const fn stop(time: f64) -> Self {
        Self::new(time, EventKind::StopSimulation)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            EventKind::Emit { neuron } => write!(f, "emit {} @ {}s", neuron, self.time),
            EventKind::Arrival { synapse } => write!(f, "arrival {} @ {}s", synapse, self.time),
            EventKind::TimeDrivenStep => write!(f, "time-driven step @ {}s", self.time),
            EventKind::Sampling => write!(f, "sampling @ {}s", self.time),
            EventKind::StopSimulation => write!(f, "stop @ {}s", self.time),
        }
    }
}
