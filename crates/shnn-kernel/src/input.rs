//! Spike train generators for driving input neurons

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::error::*;

/// Poisson spike times in `[start, end)` at `rate` Hz
///
/// Inter-spike intervals are exponential; the same seed always yields the
/// same train.
pub fn poisson_train(rate: f64, start: f64, end: f64, seed: u64) -> Result<Vec<f64>> {
    if !(rate >= 0.0) || !rate.is_finite() {
        return Err(KernelError::invalid_parameter("rate", rate.to_string(), ">= 0.0"));
    }
    if !(start >= 0.0) || !(end >= start) || !end.is_finite() {
        return Err(KernelError::invalid_parameter(
            "interval",
            format!("[{}, {})", start, end),
            "0 <= start <= end",
        ));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut times = Vec::new();
    if rate == 0.0 {
        return Ok(times);
    }
    let mut t = start;
    loop {
        // 1 - u lies in (0, 1], keeping ln finite
        let u: f64 = rng.gen();
        t += -(1.0 - u).ln() / rate;
        if t >= end {
            break;
        }
        times.push(t);
    }
    Ok(times)
}
