//! TOML configuration loading
//!
//! ```toml
//! [simulation]
//! time_driven_step = 0.001
//! sampling_period = 0.1
//!
//! [integration]
//! method = "rk45-adaptive"
//! e_min = 1e-6
//! e_max = 1e-4
//! h_min = 1e-6
//! h_max = 1e-3
//!
//! [[learning_rules]]
//! type = "stdp"
//! tau_ltp = 0.02
//! ```
//!
//! Every error names the file and the 1-based line of the offending value.

use std::ops::Range;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use toml::Spanned;

use crate::{
    ids::NeuronId,
    integration::{AdaptiveBounds, IntegrationConfig, MethodKind},
    learning::{LearningRule, LearningRuleConfig},
    simulation::SimulationParams,
};

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The document is not valid TOML or does not match the schema
    #[error("{file}:{line}: parse error: {message}")]
    Parse {
        /// File name
        file: String,
        /// 1-based line
        line: usize,
        /// Parser message
        message: String,
    },

    /// A value is out of range or inconsistent with another one
    #[error("{file}:{line}: {message}")]
    Invalid {
        /// File name
        file: String,
        /// 1-based line
        line: usize,
        /// What is wrong
        message: String,
    },

    /// The file could not be read
    #[error("{file}: {source}")]
    Io {
        /// File name
        file: String,
        /// Source I/O error
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    /// Line of the offending value, if the error has one
    pub fn line(&self) -> Option<usize> {
        match self {
            ConfigError::Parse { line, .. } | ConfigError::Invalid { line, .. } => Some(*line),
            ConfigError::Io { .. } => None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    simulation: RawSimulation,
    integration: Option<RawIntegration>,
    #[serde(default)]
    learning_rules: Vec<LearningRuleConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSimulation {
    time_driven: Option<bool>,
    time_driven_step: Option<Spanned<f64>>,
    sampling_period: Option<Spanned<f64>>,
    real_time_budget: Option<Spanned<f64>>,
    #[serde(default)]
    record_states: bool,
    record_neurons: Option<Vec<u32>>,
    max_recorded_spikes: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawIntegration {
    method: Spanned<String>,
    step: Option<Spanned<f64>>,
    e_min: Option<Spanned<f32>>,
    e_max: Option<Spanned<f32>>,
    h_min: Option<Spanned<f64>>,
    h_max: Option<Spanned<f64>>,
    bdf_max_iterations: Option<Spanned<usize>>,
    bdf_tolerance: Option<Spanned<f32>>,
}

/// Complete kernel configuration
#[derive(Debug, Clone, Default)]
pub struct KernelConfig {
    /// Driver parameters
    pub simulation: SimulationParams,
    /// Integration method and its parameters
    pub integration: IntegrationConfig,
    /// Learning rules, in rule ID order
    pub learning_rules: Vec<LearningRuleConfig>,
}

impl KernelConfig {
    /// Load and validate a configuration file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let file = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            file: file.clone(),
            source,
        })?;
        Self::parse(&file, &text)
    }

    /// Parse and validate a configuration document; `file` names it in errors
    pub fn parse(file: &str, text: &str) -> Result<Self, ConfigError> {
        let doc = Document { file, text };
        let raw: RawConfig = toml::from_str(text).map_err(|e| ConfigError::Parse {
            file: file.to_string(),
            line: e.span().map(|span| doc.line_of(&span)).unwrap_or(1),
            message: e.message().trim().to_string(),
        })?;

        let simulation = doc.simulation(raw.simulation)?;
        let integration = match raw.integration {
            Some(integration) => doc.integration(integration)?,
            None => IntegrationConfig::default(),
        };
        let headers = doc.rule_lines();
        for (index, rule) in raw.learning_rules.iter().enumerate() {
            if let Err(e) = rule.validate() {
                let line = headers.get(index).copied().unwrap_or(1);
                return Err(doc.invalid(line, format!("learning rule {}: {}", index, e)));
            }
        }

        log::debug!(
            "Loaded {}: method {}, {} learning rules",
            file,
            integration.method,
            raw.learning_rules.len()
        );
        Ok(Self {
            simulation,
            integration,
            learning_rules: raw.learning_rules,
        })
    }

    /// Instantiate the learning rules; rule IDs follow document order
    pub fn build_rules(&self) -> crate::error::Result<Vec<Box<dyn LearningRule>>> {
        self.learning_rules.iter().map(LearningRuleConfig::build).collect()
    }
}

struct Document<'a> {
    file: &'a str,
    text: &'a str,
}

impl Document<'_> {
    fn line_of(&self, span: &Range<usize>) -> usize {
        let end = span.start.min(self.text.len());
        self.text[..end].matches('\n').count() + 1
    }

    fn line<T>(&self, value: &Spanned<T>) -> usize {
        self.line_of(&value.span())
    }

    fn invalid(&self, line: usize, message: impl Into<String>) -> ConfigError {
        ConfigError::Invalid {
            file: self.file.to_string(),
            line,
            message: message.into(),
        }
    }

    /// Lines of the `[[learning_rules]]` headers
    fn rule_lines(&self) -> Vec<usize> {
        self.text
            .lines()
            .enumerate()
            .filter(|(_, line)| line.trim_start().starts_with("[[learning_rules]]"))
            .map(|(index, _)| index + 1)
            .collect()
    }

    fn positive(&self, name: &str, value: &Spanned<f64>) -> Result<f64, ConfigError> {
        let v = *value.get_ref();
        if v > 0.0 && v.is_finite() {
            Ok(v)
        } else {
            Err(self.invalid(self.line(value), format!("{} must be > 0, got {}", name, v)))
        }
    }

    fn simulation(&self, raw: RawSimulation) -> Result<SimulationParams, ConfigError> {
        let defaults = SimulationParams::default();
        let time_driven_step = match (raw.time_driven, &raw.time_driven_step) {
            (Some(false), _) => None,
            (_, Some(step)) => Some(self.positive("time_driven_step", step)?),
            (_, None) => defaults.time_driven_step,
        };
        let sampling_period = raw
            .sampling_period
            .as_ref()
            .map(|period| self.positive("sampling_period", period))
            .transpose()?;
        let real_time_budget = raw
            .real_time_budget
            .as_ref()
            .map(|budget| self.positive("real_time_budget", budget).map(Duration::from_secs_f64))
            .transpose()?;

        Ok(SimulationParams {
            time_driven_step,
            sampling_period,
            real_time_budget,
            record_states: raw.record_states || raw.record_neurons.is_some(),
            record_neurons: raw
                .record_neurons
                .map(|ids| ids.into_iter().map(NeuronId::new).collect()),
            max_recorded_spikes: raw.max_recorded_spikes.or(defaults.max_recorded_spikes),
        })
    }

    fn integration(&self, raw: RawIntegration) -> Result<IntegrationConfig, ConfigError> {
        let method_line = self.line(&raw.method);
        let method: MethodKind = raw
            .method
            .get_ref()
            .parse()
            .map_err(|e| self.invalid(method_line, format!("{}", e)))?;

        let mut config = IntegrationConfig {
            method,
            ..IntegrationConfig::default()
        };
        if let Some(step) = &raw.step {
            config.step = Some(self.positive("step", step)?);
        }
        if let Some(iterations) = &raw.bdf_max_iterations {
            if *iterations.get_ref() == 0 {
                return Err(self.invalid(self.line(iterations), "bdf_max_iterations must be >= 1"));
            }
            config.bdf_max_iterations = *iterations.get_ref();
        }
        if let Some(tolerance) = &raw.bdf_tolerance {
            if !(*tolerance.get_ref() > 0.0) {
                return Err(self.invalid(self.line(tolerance), "bdf_tolerance must be > 0"));
            }
            config.bdf_tolerance = *tolerance.get_ref();
        }

        let bounds = (&raw.e_min, &raw.e_max, &raw.h_min, &raw.h_max);
        if method.is_adaptive() {
            let (Some(e_min), Some(e_max), Some(h_min), Some(h_max)) = bounds else {
                return Err(self.invalid(
                    method_line,
                    format!("method {} requires e_min, e_max, h_min and h_max", method),
                ));
            };
            config.bounds = Some(self.bounds(e_min, e_max, h_min, h_max)?);
        } else if bounds.0.is_some() || bounds.1.is_some() || bounds.2.is_some() || bounds.3.is_some() {
            log::warn!(
                "{}:{}: step-size bounds ignored by fixed-step method {}",
                self.file,
                method_line,
                method
            );
        }

        config
            .validate()
            .map_err(|e| self.invalid(method_line, e.to_string()))?;
        Ok(config)
    }

    fn bounds(
        &self,
        e_min: &Spanned<f32>,
        e_max: &Spanned<f32>,
        h_min: &Spanned<f64>,
        h_max: &Spanned<f64>,
    ) -> Result<AdaptiveBounds, ConfigError> {
        let (e_lo, e_hi) = (*e_min.get_ref(), *e_max.get_ref());
        if !(e_lo >= 0.0 && e_lo.is_finite()) {
            return Err(self.invalid(self.line(e_min), format!("e_min must be >= 0, got {}", e_lo)));
        }
        if !e_hi.is_finite() {
            return Err(self.invalid(self.line(e_max), format!("e_max must be finite, got {}", e_hi)));
        }
        if !(e_lo <= e_hi) {
            return Err(self.invalid(
                self.line(e_min),
                format!("e_min ({}) must not exceed e_max ({})", e_lo, e_hi),
            ));
        }
        let h_lo = self.positive("h_min", h_min)?;
        let h_hi = self.positive("h_max", h_max)?;
        if !(h_lo <= h_hi) {
            return Err(self.invalid(
                self.line(h_min),
                format!("h_min ({}) must not exceed h_max ({})", h_lo, h_hi),
            ));
        }
        AdaptiveBounds::new(e_lo, e_hi, h_lo, h_hi)
            .map_err(|e| self.invalid(self.line(e_min), e.to_string()))
    }
}
