//! Step-size control by step doubling
//!
//! Each candidate step of size `h` is taken once whole and once as two
//! halves. The largest difference over the differential variables is the
//! local error estimate:
//! - above `e_max` the step is rejected and retried with `h/2`, never going
//!   below `h_min`; a step still failing at `h_min` is forced through and
//!   counted as an accuracy warning;
//! - below `e_min` the next step doubles, never exceeding `h_max`.
//!
//! The last step of an interval is cut short so that integration stops
//! exactly at the requested time, which is where the next event lives.
//!
//! After every call the method also predicts the next interval of the same
//! length. If the following call asks for exactly that interval and the row
//! was not touched in between, the prediction is adopted as is. A spike
//! arriving earlier invalidates it and only the shorter interval is
//! integrated.

use super::{HistoryRow, IntegrationMethod, IntegrationStats, NeuronHistory, Stepper};
use crate::error::*;
use crate::model::{StateLayout, TimeDrivenModel};

/// Error and step-size bounds of the controller
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveBounds {
    /// Below this error the step grows
    pub e_min: f32,
    /// Above this error the step is rejected
    pub e_max: f32,
    /// Smallest step (s)
    pub h_min: f64,
    /// Largest step (s)
    pub h_max: f64,
}

impl AdaptiveBounds {
    /// Create validated bounds
    pub fn new(e_min: f32, e_max: f32, h_min: f64, h_max: f64) -> Result<Self> {
        let bounds = Self {
            e_min,
            e_max,
            h_min,
            h_max,
        };
        bounds.validate()?;
        Ok(bounds)
    }

    /// Validate bounds
    ///
    /// All four values must be finite; NaN fails every check.
    pub fn validate(&self) -> Result<()> {
        if !(self.e_min >= 0.0 && self.e_min.is_finite()) {
            return Err(KernelError::invalid_parameter(
                "e_min",
                self.e_min.to_string(),
                "finite and >= 0.0",
            ));
        }
        if !(self.e_max.is_finite() && self.e_min <= self.e_max) {
            return Err(KernelError::invalid_parameter(
                "e_min",
                format!("{} (with e_max={})", self.e_min, self.e_max),
                "<= e_max, e_max finite",
            ));
        }
        if !(self.h_min > 0.0 && self.h_min.is_finite()) {
            return Err(KernelError::invalid_parameter(
                "h_min",
                self.h_min.to_string(),
                "finite and > 0.0",
            ));
        }
        if !(self.h_max.is_finite() && self.h_min <= self.h_max) {
            return Err(KernelError::invalid_parameter(
                "h_min",
                format!("{} (with h_max={})", self.h_min, self.h_max),
                "<= h_max, h_max finite",
            ));
        }
        Ok(())
    }
}

/// Scratch rows used while stepping one neuron
#[derive(Debug)]
struct Workspace {
    whole: Vec<f32>,
    mid: Vec<f32>,
    halves: Vec<f32>,
    start: Vec<f32>,
    history: HistoryRow,
}

/// Adaptive step-size driver around any [`Stepper`]
#[derive(Debug)]
pub struct AdaptiveStep<S> {
    stepper: S,
    name: &'static str,
    layout: StateLayout,
    bounds: AdaptiveBounds,
    /// Controller step for the next step of each neuron
    next_h: Vec<f64>,
    /// Multistep history of each neuron, when the stepper uses it
    history: Option<NeuronHistory>,
    /// Cached forward predictions, `n_neurons * n_state`
    predicted_state: Vec<f32>,
    valid_prediction: Vec<bool>,
    next_step_predicted_elapsed: Vec<f64>,
    /// Controller state matching each prediction, installed when adopted
    predicted_next_h: Vec<f64>,
    predicted_history: Option<NeuronHistory>,
    work: Workspace,
    stats: IntegrationStats,
}

impl<S: Stepper> AdaptiveStep<S> {
    /// Wrap a stepper with step-doubling control
    pub fn new(stepper: S, name: &'static str, layout: StateLayout, bounds: AdaptiveBounds) -> Self {
        let nd = layout.n_differential;
        let history = stepper.uses_history().then(|| NeuronHistory::new(nd));
        let predicted_history = history.clone();
        Self {
            stepper,
            name,
            layout,
            bounds,
            next_h: Vec::new(),
            history,
            predicted_state: Vec::new(),
            valid_prediction: Vec::new(),
            next_step_predicted_elapsed: Vec::new(),
            predicted_next_h: Vec::new(),
            predicted_history,
            work: Workspace {
                whole: vec![0.0; layout.n_state],
                mid: vec![0.0; layout.n_state],
                halves: vec![0.0; layout.n_state],
                start: vec![0.0; layout.n_state],
                history: HistoryRow::new(nd),
            },
            stats: IntegrationStats::default(),
        }
    }

    /// Controller bounds
    pub fn bounds(&self) -> &AdaptiveBounds {
        &self.bounds
    }

    /// Whether a usable prediction is cached for the neuron
    pub fn has_prediction(&self, local: usize) -> bool {
        self.valid_prediction.get(local).copied().unwrap_or(false)
    }

    fn row_range(&self, local: usize) -> std::ops::Range<usize> {
        local * self.layout.n_state..(local + 1) * self.layout.n_state
    }

    fn load_history(&mut self, local: usize) {
        match self.history.as_ref() {
            Some(history) => history.load(local, &mut self.work.history),
            None => self.work.history.valid = false,
        }
    }

    /// Integrate `row` over `elapsed` with controlled steps, using and
    /// updating the controller state held in `next_h` and `self.work.history`
    fn advance(
        &mut self,
        model: &dyn TimeDrivenModel,
        row: &mut [f32],
        elapsed: f64,
        next_h: &mut f64,
    ) {
        let nd = self.layout.n_differential;
        let AdaptiveBounds {
            e_min,
            e_max,
            h_min,
            h_max,
        } = self.bounds;
        let w = &mut self.work;
        let mut remaining = elapsed;

        while remaining > 0.0 {
            let preferred = next_h.clamp(h_min, h_max);
            let landing = preferred >= remaining;
            let mut h = if landing { remaining } else { preferred };
            let mut halved = false;

            let error = loop {
                w.whole.copy_from_slice(row);
                self.stepper.step(model, &mut w.whole, h, w.history.view());

                w.mid.copy_from_slice(row);
                self.stepper.step(model, &mut w.mid, h / 2.0, w.history.view());
                w.halves.copy_from_slice(&w.mid);
                w.start.copy_from_slice(row);
                let start_history = super::History {
                    previous: &w.start[..nd],
                    step: Some(h / 2.0),
                };
                self.stepper.step(model, &mut w.halves, h / 2.0, Some(start_history));
                self.stats.steps += 3;

                let error = w.whole[..nd]
                    .iter()
                    .zip(&w.halves[..nd])
                    .fold(0.0f32, |acc, (a, b)| acc.max((a - b).abs()));

                if error > e_max {
                    if h > h_min {
                        self.stats.rejected += 1;
                        h = (h / 2.0).max(h_min);
                        halved = true;
                        continue;
                    }
                    self.stats.accuracy_warnings += 1;
                    log::warn!(
                        "{}: error {:.3e} above e_max {:.3e} at h_min {:.3e}, step forced",
                        self.name,
                        error,
                        e_max,
                        h_min
                    );
                }
                break error;
            };

            self.stats.accepted += 1;
            if !landing || halved {
                self.stats.record_controller_step(h);
            }

            if self.stepper.uses_history() {
                w.history.record(&w.mid[..nd], h / 2.0);
            }
            row.copy_from_slice(&w.halves);
            remaining -= h;
            if remaining < h_min * 1e-6 {
                remaining = 0.0;
            }

            let base = if landing && !halved { preferred } else { h };
            *next_h = if error < e_min {
                (base * 2.0).min(h_max)
            } else {
                base
            };
        }
    }
}

impl<S: Stepper> IntegrationMethod for AdaptiveStep<S> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn next_differential_equation_value(
        &mut self,
        local: usize,
        model: &dyn TimeDrivenModel,
        state: &mut [f32],
        elapsed: f64,
    ) {
        if elapsed <= 0.0 {
            return;
        }
        let range = self.row_range(local);
        let predicted = self.valid_prediction[local]
            && (self.next_step_predicted_elapsed[local] - elapsed).abs() <= elapsed * 1e-9;

        if predicted {
            state.copy_from_slice(&self.predicted_state[range.clone()]);
            self.next_h[local] = self.predicted_next_h[local];
            if let (Some(history), Some(predicted)) =
                (self.history.as_mut(), self.predicted_history.as_ref())
            {
                predicted.load(local, &mut self.work.history);
                history.store(local, &self.work.history);
            }
            self.stats.prediction_hits += 1;
        } else {
            self.load_history(local);
            let mut h = self.next_h[local];
            self.advance(model, state, elapsed, &mut h);
            self.next_h[local] = h;
            if let Some(history) = self.history.as_mut() {
                history.store(local, &self.work.history);
            }
        }

        // Predict the next interval of the same length from the new state
        let mut prediction = std::mem::take(&mut self.predicted_state);
        prediction[range.clone()].copy_from_slice(state);
        self.load_history(local);
        let mut h = self.next_h[local];
        self.advance(model, &mut prediction[range], elapsed, &mut h);
        self.predicted_state = prediction;
        self.predicted_next_h[local] = h;
        if let Some(predicted) = self.predicted_history.as_mut() {
            predicted.store(local, &self.work.history);
        }
        self.next_step_predicted_elapsed[local] = elapsed;
        self.valid_prediction[local] = true;
    }

    fn initialize_states(&mut self, n_neurons: usize, initial: &[f32]) {
        self.resize(n_neurons);
        if let Some(history) = self.history.as_mut() {
            for local in 0..n_neurons {
                history.seed(local, initial);
            }
        }
    }

    fn reset_state(&mut self, local: usize) {
        self.valid_prediction[local] = false;
        if let Some(history) = self.history.as_mut() {
            history.clear(local);
        }
    }

    fn invalidate_prediction(&mut self, local: usize) {
        self.valid_prediction[local] = false;
    }

    fn next_step_hint(&self, local: usize) -> Option<f64> {
        self.next_h.get(local).copied()
    }

    fn resize(&mut self, n_neurons: usize) {
        let h0 = self.bounds.h_max;
        self.next_h = vec![h0; n_neurons];
        self.predicted_next_h = vec![h0; n_neurons];
        self.predicted_state = vec![0.0; n_neurons * self.layout.n_state];
        self.valid_prediction = vec![false; n_neurons];
        self.next_step_predicted_elapsed = vec![0.0; n_neurons];
        if let Some(history) = self.history.as_mut() {
            history.resize(n_neurons);
        }
        if let Some(history) = self.predicted_history.as_mut() {
            history.resize(n_neurons);
        }
    }

    fn capacity(&self) -> Option<usize> {
        Some(self.valid_prediction.len())
    }

    fn is_memory_dependent(&self) -> bool {
        true
    }

    fn statistics(&self) -> IntegrationStats {
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integration::test_support::{displaced_row, exact_decay};
    use crate::integration::{Bdf, ButcherTableau, ExplicitRk};
    use crate::model::LifConductanceModel;

    fn rk45(bounds: AdaptiveBounds, n: usize) -> AdaptiveStep<ExplicitRk> {
        let layout = LifConductanceModel::default().layout();
        let mut method = AdaptiveStep::new(
            ExplicitRk::new(ButcherTableau::FEHLBERG45, layout),
            "rk45-adaptive",
            layout,
            bounds,
        );
        method.resize(n);
        method
    }

    fn bdf(order: u32, bounds: AdaptiveBounds, n: usize) -> AdaptiveStep<Bdf> {
        let layout = LifConductanceModel::default().layout();
        let mut method = AdaptiveStep::new(Bdf::new(order, layout, 20, 1e-7), "bdf", layout, bounds);
        method.resize(n);
        method
    }

    #[test]
    fn test_bounds_validation() {
        assert!(AdaptiveBounds::new(1e-6, 1e-4, 1e-6, 1e-3).is_ok());
        assert!(AdaptiveBounds::new(1e-3, 1e-4, 1e-6, 1e-3).is_err());
        assert!(AdaptiveBounds::new(1e-6, 1e-4, 1e-2, 1e-3).is_err());
        assert!(AdaptiveBounds::new(1e-6, 1e-4, 0.0, 1e-3).is_err());
    }

    #[test]
    fn test_bounds_reject_non_finite() {
        assert!(AdaptiveBounds::new(1e-6, 1e-4, 1e-6, f64::NAN).is_err());
        assert!(AdaptiveBounds::new(1e-6, 1e-4, f64::NAN, 1e-3).is_err());
        assert!(AdaptiveBounds::new(1e-6, f32::NAN, 1e-6, 1e-3).is_err());
        assert!(AdaptiveBounds::new(f32::NAN, 1e-4, 1e-6, 1e-3).is_err());
        assert!(AdaptiveBounds::new(1e-6, 1e-4, 1e-6, f64::INFINITY).is_err());
        assert!(AdaptiveBounds::new(1e-6, f32::INFINITY, 1e-6, 1e-3).is_err());
    }

    #[test]
    fn test_steps_stay_within_bounds() {
        let bounds = AdaptiveBounds::new(1e-5, 1e-3, 1e-5, 2e-3).unwrap();
        let model = LifConductanceModel::default();
        let methods: Vec<Box<dyn IntegrationMethod>> = vec![
            Box::new(rk45(bounds.clone(), 1)),
            Box::new(bdf(1, bounds.clone(), 1)),
            Box::new(bdf(2, bounds.clone(), 1)),
        ];
        for mut method in methods {
            let mut row = displaced_row(&model, 0.0);
            row[LifConductanceModel::G_EXC] = 2.0;
            for _ in 0..20 {
                method.next_differential_equation_value(0, &model, &mut row, 0.004);
            }
            let stats = method.statistics();
            assert!(stats.accepted > 0);
            assert!(stats.smallest_step.unwrap() >= bounds.h_min);
            assert!(stats.largest_step.unwrap() <= bounds.h_max);
            assert_eq!(stats.accuracy_warnings, 0, "{}", method.name());
        }
    }

    #[test]
    fn test_rejects_until_error_within_tolerance() {
        // A tight e_max forces rejections on a fast transient
        let bounds = AdaptiveBounds::new(1e-7, 1e-4, 1e-7, 5e-3).unwrap();
        let model = LifConductanceModel::default();
        let mut method = bdf(1, bounds.clone(), 1);
        let mut row = displaced_row(&model, 0.0);
        method.next_differential_equation_value(0, &model, &mut row, 0.005);

        let stats = method.statistics();
        assert!(stats.rejected > 0);
        assert_eq!(stats.accuracy_warnings, 0);
        assert!(stats.smallest_step.unwrap() >= bounds.h_min);
        // The controller carried the reduced step over to the next call
        assert!(method.next_step_hint(0).unwrap() < bounds.h_max);
    }

    #[test]
    fn test_forced_step_at_h_min_is_counted() {
        let bounds = AdaptiveBounds::new(0.0, 1e-12, 1e-3, 1e-3).unwrap();
        let model = LifConductanceModel::default();
        let mut method = rk45(bounds, 1);
        let mut row = displaced_row(&model, 0.0);
        method.next_differential_equation_value(0, &model, &mut row, 0.002);
        assert!(method.statistics().accuracy_warnings > 0);
        // Still lands on the requested time with a sane value
        let exact = exact_decay(&model, 0.0, 0.002);
        assert!((row[0] as f64 - exact).abs() < 0.01);
    }

    #[test]
    fn test_accuracy_against_exact_solution() {
        let bounds = AdaptiveBounds::new(1e-7, 1e-5, 1e-6, 1e-3).unwrap();
        let model = LifConductanceModel::default();
        let mut method = rk45(bounds, 1);
        let mut row = displaced_row(&model, -20.0);
        for _ in 0..10 {
            method.next_differential_equation_value(0, &model, &mut row, 0.001);
        }
        let exact = exact_decay(&model, -20.0, 0.01);
        assert!((row[0] as f64 - exact).abs() < 1e-3);
    }

    #[test]
    fn test_prediction_adopted_on_regular_cadence() {
        let bounds = AdaptiveBounds::new(1e-6, 1e-4, 1e-6, 1e-3).unwrap();
        let model = LifConductanceModel::default();
        let mut cached = rk45(bounds.clone(), 1);
        let mut row = displaced_row(&model, -40.0);
        cached.next_differential_equation_value(0, &model, &mut row, 0.001);
        assert!(cached.has_prediction(0));
        cached.next_differential_equation_value(0, &model, &mut row, 0.001);
        assert_eq!(cached.statistics().prediction_hits, 1);

        // Same trajectory when every call recomputes
        let mut uncached = rk45(bounds, 1);
        let mut other = displaced_row(&model, -40.0);
        uncached.next_differential_equation_value(0, &model, &mut other, 0.001);
        uncached.invalidate_prediction(0);
        uncached.next_differential_equation_value(0, &model, &mut other, 0.001);
        assert_eq!(uncached.statistics().prediction_hits, 0);
        assert_eq!(row, other);
    }

    #[test]
    fn test_intervening_event_integrates_shorter_interval() {
        let bounds = AdaptiveBounds::new(1e-6, 1e-4, 1e-6, 1e-3).unwrap();
        let model = LifConductanceModel::default();
        let mut method = rk45(bounds, 1);
        let mut row = displaced_row(&model, -40.0);
        method.next_differential_equation_value(0, &model, &mut row, 0.001);

        // An event 0.4ms later: the 1ms prediction does not apply
        method.next_differential_equation_value(0, &model, &mut row, 0.0004);
        assert_eq!(method.statistics().prediction_hits, 0);
        let exact = exact_decay(&model, -40.0, 0.0014);
        assert!((row[0] as f64 - exact).abs() < 1e-3);
    }

    #[test]
    fn test_external_change_invalidates_prediction() {
        let bounds = AdaptiveBounds::new(1e-6, 1e-4, 1e-6, 1e-3).unwrap();
        let model = LifConductanceModel::default();
        let mut method = bdf(2, bounds, 2);
        let mut row = displaced_row(&model, -40.0);
        method.next_differential_equation_value(1, &model, &mut row, 0.001);
        assert!(method.has_prediction(1));

        model.apply_synaptic_input(&mut row, 0, 0.5);
        method.invalidate_prediction(1);
        assert!(!method.has_prediction(1));
        method.next_differential_equation_value(1, &model, &mut row, 0.001);
        assert_eq!(method.statistics().prediction_hits, 0);

        method.reset_state(1);
        assert!(!method.has_prediction(1));
    }
}
