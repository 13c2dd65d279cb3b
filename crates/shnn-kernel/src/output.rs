//! Weight output sinks

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::*;
use crate::ids::{NeuronId, SynapseId};

/// Weight of one synapse at snapshot time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightEntry {
    /// Synapse ID
    pub synapse: SynapseId,
    /// Pre-synaptic neuron
    pub source: NeuronId,
    /// Post-synaptic neuron
    pub target: NeuronId,
    /// Weight
    pub weight: f32,
}

/// Read-only copy of every synaptic weight, ordered by synapse ID
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeightSnapshot {
    /// Simulation time of the snapshot (s)
    pub time: f64,
    /// One entry per synapse
    pub entries: Vec<WeightEntry>,
}

impl WeightSnapshot {
    /// Weight of a synapse
    pub fn weight(&self, synapse: SynapseId) -> Option<f32> {
        self.entries
            .binary_search_by_key(&synapse, |entry| entry.synapse)
            .ok()
            .map(|i| self.entries[i].weight)
    }

    /// Number of synapses
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the snapshot holds no synapse
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Destination for weight snapshots
pub trait WeightSink: Send + std::fmt::Debug {
    /// Consume one snapshot
    fn write_weights(&mut self, snapshot: &WeightSnapshot) -> Result<()>;

    /// Flush buffered output
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Plain-text weight writer
///
/// Each snapshot is a `# t=<time>` header followed by one
/// `<source> <target> <weight>` line per synapse.
#[derive(Debug)]
pub struct TextWeightWriter<W: Write> {
    writer: W,
}

impl<W: Write> TextWeightWriter<W> {
    /// Wrap a writer
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Recover the writer
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl TextWeightWriter<BufWriter<File>> {
    /// Create (or truncate) a weight file
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write + Send + std::fmt::Debug> WeightSink for TextWeightWriter<W> {
    fn write_weights(&mut self, snapshot: &WeightSnapshot) -> Result<()> {
        writeln!(self.writer, "# t={}", snapshot.time)?;
        for entry in &snapshot.entries {
            writeln!(
                self.writer,
                "{} {} {}",
                entry.source.raw(),
                entry.target.raw(),
                entry.weight
            )?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
