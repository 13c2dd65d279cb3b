//! Identifier and spike types shared across the kernel

use core::fmt;

/// Neuron identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NeuronId(pub u32);

impl NeuronId {
    /// Create a new neuron ID
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub const fn raw(&self) -> u32 {
        self.0
    }

    /// Index form of the ID
    pub const fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NeuronId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "N{}", self.0)
    }
}

/// Synapse (interconnection) identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SynapseId(pub u32);

impl SynapseId {
    /// Create a new synapse ID
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub const fn raw(&self) -> u32 {
        self.0
    }

    /// Index form of the ID
    pub const fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SynapseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.0)
    }
}

/// Learning rule identifier (index into the network's rule table)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RuleId(pub u16);

impl RuleId {
    /// Index form of the ID
    pub const fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Spike emitted by a neuron
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spike {
    /// Neuron that spiked
    pub neuron_id: NeuronId,
    /// Time of spike (s)
    pub time: f64,
}

impl Spike {
    /// Create a new spike
    pub fn new(neuron_id: NeuronId, time: f64) -> Self {
        Self { neuron_id, time }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display() {
        assert_eq!(NeuronId::new(7).to_string(), "N7");
        assert_eq!(SynapseId::new(3).to_string(), "S3");
        assert_eq!(NeuronId::new(7).index(), 7);
    }
}
