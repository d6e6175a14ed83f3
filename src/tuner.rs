//! Module implementing automatic weight tuning.
//!
//! Finding initial weights that drive a group at a wanted rate is usually
//! done by hand. The tuner automates the search: it repeatedly probes the
//! network for a short interval, compares the observed mean rate of a target
//! group against the wanted one, and rescales the weights of the feed
//! connection until the rates agree. Probing runs in the testing phase, so
//! plastic weights are not perturbed by the search itself.

use log::debug;

use super::error::SnnError;
use super::simulator::Simulator;

/// Largest per-iteration rescaling of the tuned weights. Capping the factor
/// keeps the search stable when the observed rate is far off (or zero).
const MAX_STEP: f64 = 2.0;

/// Outcome of a successful tuning run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TuneResult {
    /// Probe iterations used.
    pub iterations: usize,
    /// Mean rate of the target group during the last probe (Hz).
    pub rate: f64,
}

/// Tunes the weights of one connection until a target group fires at a wanted
/// mean rate.
#[derive(Debug, Clone, Copy)]
pub struct WeightTuner {
    connection: usize,
    target_group: usize,
    target_rate: f64,
    error_margin: f64,
    probe_ms: u32,
    max_iters: usize,
}

impl WeightTuner {
    /// A tuner adjusting `connection` until `target_group` fires at
    /// `target_rate` Hz, with the default probe length (1 s), margin (0.3 Hz)
    /// and iteration budget (50).
    pub fn new(
        connection: usize,
        target_group: usize,
        target_rate: f64,
    ) -> Result<Self, SnnError> {
        if target_rate <= 0.0 {
            return Err(SnnError::InvalidParameter(
                "Target rates must be positive".to_string(),
            ));
        }
        Ok(WeightTuner {
            connection,
            target_group,
            target_rate,
            error_margin: 0.3,
            probe_ms: 1000,
            max_iters: 50,
        })
    }

    /// Sets the acceptable deviation from the target rate (Hz).
    pub fn with_error_margin(mut self, margin: f64) -> Result<Self, SnnError> {
        if margin <= 0.0 {
            return Err(SnnError::InvalidParameter(
                "Error margins must be positive".to_string(),
            ));
        }
        self.error_margin = margin;
        Ok(self)
    }

    /// Sets the probe duration per iteration (ms).
    pub fn with_probe_duration(mut self, probe_ms: u32) -> Result<Self, SnnError> {
        if probe_ms == 0 {
            return Err(SnnError::InvalidParameter(
                "Probe durations must be positive".to_string(),
            ));
        }
        self.probe_ms = probe_ms;
        Ok(self)
    }

    pub fn with_max_iterations(mut self, max_iters: usize) -> Self {
        self.max_iters = max_iters.max(1);
        self
    }

    /// Runs the search on a built simulator.
    ///
    /// Each iteration probes for the configured duration, then rescales the
    /// connection weights by the rate mismatch. Returns an error if the rate
    /// does not settle within the iteration budget.
    pub fn tune(&self, sim: &mut Simulator) -> Result<TuneResult, SnnError> {
        sim.network().connection(self.connection)?;
        sim.network().group(self.target_group)?;

        let was_testing = sim.is_testing();
        sim.start_testing();
        let result = self.search(sim);
        if !was_testing {
            sim.stop_testing();
        }
        result
    }

    fn search(&self, sim: &mut Simulator) -> Result<TuneResult, SnnError> {
        for iteration in 1..=self.max_iters {
            // a fresh monitor per probe so earlier probes do not bias the rate
            sim.set_spike_monitor(self.target_group)?;
            sim.run(self.probe_ms);
            let rate = sim.spike_monitor(self.target_group)?.mean_rate(sim.time());

            debug!(
                "weight tuning iteration {}: group {} at {:.2} Hz (target {:.2})",
                iteration, self.target_group, rate, self.target_rate
            );

            if (rate - self.target_rate).abs() <= self.error_margin {
                return Ok(TuneResult { iterations: iteration, rate });
            }

            let factor = if rate <= 0.0 {
                MAX_STEP
            } else {
                (self.target_rate / rate).clamp(1.0 / MAX_STEP, MAX_STEP)
            };
            sim.scale_connection_weights(self.connection, factor as f32)?;
        }
        Err(SnnError::ConvergenceError(format!(
            "Rate of group {} did not reach {:.2} Hz within {} iterations",
            self.target_group, self.target_rate, self.max_iters
        )))
    }
}
