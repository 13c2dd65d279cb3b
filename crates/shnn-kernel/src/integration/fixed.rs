//! Fixed-step driver: equal sub-steps, no error feedback

use super::{IntegrationMethod, IntegrationStats, NeuronHistory, Stepper};
use crate::model::{StateLayout, TimeDrivenModel};

/// Integrates each requested interval in `ceil(elapsed / step)` equal sub-steps
#[derive(Debug)]
pub struct FixedStep<S> {
    stepper: S,
    name: &'static str,
    layout: StateLayout,
    step: Option<f64>,
    /// Per-neuron history, only kept when the stepper consumes it
    history: Option<NeuronHistory>,
    /// Differential variables at the start of the current sub-step
    carry: Vec<f32>,
    stats: IntegrationStats,
}

impl<S: Stepper> FixedStep<S> {
    /// Wrap a stepper
    pub fn new(stepper: S, name: &'static str, layout: StateLayout, step: Option<f64>) -> Self {
        let history = stepper
            .uses_history()
            .then(|| NeuronHistory::new(layout.n_differential));
        Self {
            stepper,
            name,
            layout,
            step,
            history,
            carry: vec![0.0; layout.n_differential],
            stats: IntegrationStats::default(),
        }
    }

    /// Configured sub-step size
    pub fn step_size(&self) -> Option<f64> {
        self.step
    }

    fn substeps(&self, elapsed: f64) -> usize {
        match self.step {
            Some(step) if step > 0.0 => ((elapsed / step) - 1e-9).ceil().max(1.0) as usize,
            _ => 1,
        }
    }
}

impl<S: Stepper> IntegrationMethod for FixedStep<S> {
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
        let n = self.substeps(elapsed);
        let h = elapsed / n as f64;
        let nd = self.layout.n_differential;

        for _ in 0..n {
            match self.history.as_mut() {
                Some(history) => {
                    self.carry.copy_from_slice(&state[..nd]);
                    self.stepper.step(model, state, h, history.get(local));
                    history.record(local, &self.carry, h);
                }
                None => self.stepper.step(model, state, h, None),
            }
            self.stats.steps += 1;
        }
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
        if let Some(history) = self.history.as_mut() {
            history.clear(local);
        }
    }

    fn last_error_estimate(&self) -> Option<&[f32]> {
        self.stepper.error_estimate()
    }

    fn resize(&mut self, n_neurons: usize) {
        if let Some(history) = self.history.as_mut() {
            history.resize(n_neurons);
        }
    }

    fn capacity(&self) -> Option<usize> {
        self.history.as_ref().map(NeuronHistory::len)
    }

    fn is_memory_dependent(&self) -> bool {
        self.history.is_some()
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

    fn rk(tableau: ButcherTableau, step: Option<f64>) -> FixedStep<ExplicitRk> {
        let layout = LifConductanceModel::default().layout();
        FixedStep::new(ExplicitRk::new(tableau, layout), tableau.name, layout, step)
    }

    /// Error of integrating `h` in one call vs two calls of `h/2`
    fn split_errors(tableau: ButcherTableau, h: f64) -> (f64, f64) {
        let model = LifConductanceModel::default();
        let exact = exact_decay(&model, -20.0, h);

        let mut whole = rk(tableau, None);
        let mut row = displaced_row(&model, -20.0);
        whole.next_differential_equation_value(0, &model, &mut row, h);
        let e_whole = (row[0] as f64 - exact).abs();

        let mut halves = rk(tableau, None);
        let mut row = displaced_row(&model, -20.0);
        halves.next_differential_equation_value(0, &model, &mut row, h / 2.0);
        halves.next_differential_equation_value(0, &model, &mut row, h / 2.0);
        let e_halves = (row[0] as f64 - exact).abs();

        (e_whole, e_halves)
    }

    #[test]
    fn test_half_steps_agree_to_truncation_order() {
        for (tableau, h) in [
            (ButcherTableau::EULER, 0.002),
            (ButcherTableau::MIDPOINT, 0.002),
            (ButcherTableau::RK4, 0.01),
            (ButcherTableau::FEHLBERG45, 0.01),
        ] {
            let (e_whole, e_halves) = split_errors(tableau, h);
            let expected_ratio = 2f64.powi(tableau.order as i32);
            assert!(
                e_halves * expected_ratio * 0.5 < e_whole,
                "{}: whole={} halves={}",
                tableau.name,
                e_whole,
                e_halves
            );
        }
    }

    #[test]
    fn test_substep_count() {
        let method = rk(ButcherTableau::EULER, Some(1e-4));
        assert_eq!(method.substeps(1e-3), 10);
        assert_eq!(method.substeps(1.05e-3), 11);
        assert_eq!(method.substeps(1e-5), 1);
        assert_eq!(rk(ButcherTableau::EULER, None).substeps(1.0), 1);
    }

    #[test]
    fn test_configured_substeps_match_manual_splitting() {
        let model = LifConductanceModel::default();
        let mut configured = rk(ButcherTableau::RK4, Some(0.001));
        let mut a = displaced_row(&model, -40.0);
        configured.next_differential_equation_value(0, &model, &mut a, 0.004);
        assert_eq!(configured.statistics().steps, 4);

        let mut manual = rk(ButcherTableau::RK4, None);
        let mut b = displaced_row(&model, -40.0);
        for _ in 0..4 {
            manual.next_differential_equation_value(0, &model, &mut b, 0.001);
        }
        assert_eq!(a, b);
    }

    #[test]
    fn test_zero_elapsed_is_noop() {
        let model = LifConductanceModel::default();
        let mut method = rk(ButcherTableau::RK4, None);
        let mut row = displaced_row(&model, -40.0);
        let before = row.clone();
        method.next_differential_equation_value(0, &model, &mut row, 0.0);
        assert_eq!(row, before);
    }

    #[test]
    fn test_memoryless_reset_is_noop() {
        let model = LifConductanceModel::default();
        let mut method = rk(ButcherTableau::EULER, None);
        method.initialize_states(2, &model.initial_state());
        assert!(!method.is_memory_dependent());

        let mut a = displaced_row(&model, -40.0);
        let mut b = a.clone();
        method.next_differential_equation_value(0, &model, &mut a, 0.001);
        method.reset_state(1);
        method.next_differential_equation_value(1, &model, &mut b, 0.001);
        assert_eq!(a, b);
    }

    #[test]
    fn test_reset_discards_seeded_history() {
        let model = LifConductanceModel::default();
        let layout = model.layout();
        let new_bdf2 = || FixedStep::new(Bdf::new(2, layout, 20, 1e-7), "bdf2", layout, None);

        // History seeded from a state far from the neuron's actual one
        let mut seeded = new_bdf2();
        seeded.initialize_states(1, &displaced_row(&model, 10.0));
        seeded.reset_state(0);
        let mut a = displaced_row(&model, -40.0);
        seeded.next_differential_equation_value(0, &model, &mut a, 0.001);

        let mut fresh = new_bdf2();
        fresh.resize(1);
        let mut b = displaced_row(&model, -40.0);
        fresh.next_differential_equation_value(0, &model, &mut b, 0.001);

        assert_eq!(a, b);

        // Without the reset the seeded history leaks into the step
        let mut leaky = new_bdf2();
        leaky.initialize_states(1, &displaced_row(&model, 10.0));
        let mut c = displaced_row(&model, -40.0);
        leaky.next_differential_equation_value(0, &model, &mut c, 0.001);
        assert_ne!(a, c);
    }
}
