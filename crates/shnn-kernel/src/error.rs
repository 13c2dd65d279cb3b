//! Error types for the simulation kernel

use thiserror::Error;

use crate::config::ConfigError;

/// Result type for kernel operations
pub type Result<T> = std::result::Result<T, KernelError>;

/// Errors that can occur in the simulation kernel
#[derive(Error, Debug)]
pub enum KernelError {
    /// Configuration file could not be loaded or validated
    #[error("Configuration error: {source}")]
    Config {
        #[from]
        /// Source configuration error
        source: ConfigError,
    },

    /// Invalid network or simulation configuration
    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration {
        /// Reason for invalid configuration
        reason: String,
    },

    /// Invalid parameter value
    #[error("Invalid parameter {parameter}: {value} (expected {constraint})")]
    InvalidParameter {
        /// Parameter name
        parameter: String,
        /// Invalid value
        value: String,
        /// Constraint description
        constraint: String,
    },

    /// Neuron not found
    #[error("Neuron {neuron_id} not found")]
    NeuronNotFound {
        /// Neuron ID that was not found
        neuron_id: u32,
    },

    /// Synapse not found
    #[error("Synapse {synapse_id} not found")]
    SynapseNotFound {
        /// Synapse ID that was not found
        synapse_id: u32,
    },

    /// Learning rule not found
    #[error("Learning rule {rule_id} not found")]
    RuleNotFound {
        /// Rule index that was not found
        rule_id: usize,
    },

    /// An event was scheduled before the current simulation clock
    #[error("Event at {time}s is earlier than the simulation clock ({now}s)")]
    EventInPast {
        /// Requested event time
        time: f64,
        /// Queue clock when the insert was attempted
        now: f64,
    },

    /// Pop on an empty event queue
    #[error("Event queue is empty")]
    EmptyQueue,

    /// Output sink failure
    #[error("Output error: {source}")]
    Output {
        #[from]
        /// Source I/O error
        source: std::io::Error,
    },

    /// Worker pool could not be created
    #[error("Thread pool error: {reason}")]
    ThreadPool {
        /// Reason for the failure
        reason: String,
    },
}

impl KernelError {
    /// Create an invalid configuration error
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            reason: reason.into(),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(
        parameter: impl Into<String>,
        value: impl Into<String>,
        constraint: impl Into<String>,
    ) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            value: value.into(),
            constraint: constraint.into(),
        }
    }

    /// Create a thread pool error
    pub fn thread_pool(reason: impl Into<String>) -> Self {
        Self::ThreadPool {
            reason: reason.into(),
        }
    }

    /// True for the queue-exhaustion condition, which is normal termination
    pub fn is_empty_queue(&self) -> bool {
        matches!(self, Self::EmptyQueue)
    }
}
