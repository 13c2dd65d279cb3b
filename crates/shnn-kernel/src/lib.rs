//! Hybrid event-driven / time-driven spiking neural network kernel
//!
//! Spikes travel through a time-ordered event queue; between events, neuron
//! state is advanced by a pluggable ODE integrator (fixed-step Euler, RK2,
//! RK4, RK45 and BDF, or their step-doubling adaptive variants). Synapses may
//! carry learning rules with or without a postsynaptic part.
//!
//! ```no_run
//! use std::sync::Arc;
//! use shnn_kernel::*;
//!
//! # fn main() -> Result<()> {
//! let network = NetworkBuilder::new()
//!     .add_neurons(2)
//!     .add_synapse(NeuronId::new(0), NeuronId::new(1), 0.5, 1e-3)
//!     .build(Arc::new(LifConductanceModel::default()), 1)?;
//! let integration = IntegrationConfig::fixed(MethodKind::Rk4, Some(1e-4))?;
//! let mut sim = Simulation::new(network, SimulationParams::default(), integration)?;
//! sim.inject_spike(NeuronId::new(0), 0.001)?;
//! let report = sim.run_until(0.1)?;
//! println!("{} spikes", report.spikes.len());
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod config;
pub mod error;
pub mod event;
pub mod ids;
pub mod input;
pub mod integration;
pub mod learning;
pub mod model;
pub mod network;
pub mod output;
pub mod queue;
pub mod simulation;
pub mod state;
pub mod synapse;

// Re-export essential types
pub use config::{ConfigError, KernelConfig};
pub use error::{KernelError, Result};
pub use event::{Event, EventKind};
pub use ids::{NeuronId, RuleId, Spike, SynapseId};
pub use input::poisson_train;
pub use integration::{
    AdaptiveBounds, IntegrationConfig, IntegrationMethod, IntegrationStats, IntegratorSet,
    MethodKind,
};
pub use learning::{
    ExpKernelParams, ExpWeightChange, LearningRule, LearningRuleConfig, SpikePairing, StdpParams,
    StdpWeightChange,
};
pub use model::{LifConductanceModel, LifParams, StateLayout, TimeDrivenModel};
pub use network::{ConnectionSpec, Network, NetworkBuilder};
pub use output::{TextWeightWriter, WeightEntry, WeightSink, WeightSnapshot};
pub use queue::{EventQueue, InputHandle, SharedEventQueue};
pub use simulation::{
    Simulation, SimulationParams, SimulationReport, SimulationStatus, StateSample,
};
pub use state::NeuronStateStore;

/// Kernel crate version for compatibility checking
pub const KERNEL_VERSION: u32 = 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_integration() {
        // Test that all components can be imported and basic objects created
        let params = LifParams::default();
        assert!(params.tau_m > 0.0);

        let stdp_params = StdpParams::default();
        assert!(stdp_params.max_change_ltp > 0.0);

        let sim_params = SimulationParams::default();
        assert_eq!(sim_params.time_driven_step, Some(1e-3));

        assert!("rk45-adaptive".parse::<MethodKind>().unwrap().is_adaptive());
    }
}
