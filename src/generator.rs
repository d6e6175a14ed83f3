//! Module implementing spike generator groups.
//!
//! Generator groups have no membrane dynamics: their spikes come either from a
//! Poisson process with per-neuron mean rates, or from a user callback that
//! schedules exact spike times. Either way, a generator neuron emits at most
//! one spike per millisecond.

use rand::Rng;
use rand_distr::{Distribution, Exp};

use super::error::SnnError;

/// Sentinel spike time meaning "no further spikes".
pub const NO_SPIKE: u32 = u32::MAX;

/// Mean firing rates (Hz) for the neurons of a generator group.
#[derive(Debug, PartialEq, Clone)]
pub struct PoissonRate {
    rates: Vec<f32>,
}

impl PoissonRate {
    /// All-zero rates for `n` neurons.
    pub fn new(n: usize) -> Self {
        PoissonRate {
            rates: vec![0.0; n],
        }
    }

    /// The same mean rate for every neuron.
    pub fn uniform(n: usize, rate_hz: f32) -> Result<Self, SnnError> {
        let mut rate = PoissonRate::new(n);
        for i in 0..n {
            rate.set(i, rate_hz)?;
        }
        Ok(rate)
    }

    pub fn from_vec(rates: Vec<f32>) -> Result<Self, SnnError> {
        if rates.iter().any(|&r| r < 0.0 || !r.is_finite()) {
            return Err(SnnError::InvalidParameter(
                "Firing rates must be finite and non-negative".to_string(),
            ));
        }
        Ok(PoissonRate { rates })
    }

    pub fn set(&mut self, neuron: usize, rate_hz: f32) -> Result<(), SnnError> {
        if rate_hz < 0.0 || !rate_hz.is_finite() {
            return Err(SnnError::InvalidParameter(
                "Firing rates must be finite and non-negative".to_string(),
            ));
        }
        self.rates[neuron] = rate_hz;
        Ok(())
    }

    pub fn get(&self, neuron: usize) -> f32 {
        self.rates[neuron]
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}

/// User-defined spike scheduling for a generator group.
///
/// The scheduler calls this once per spike: given the neuron, the current time
/// and the last spike it scheduled for that neuron, the implementation returns
/// the next spike time in ms, or [`NO_SPIKE`] to stop. Returned times must be
/// strictly increasing per neuron; times in the past are moved up to the
/// current millisecond.
pub trait SpikeGenerator {
    fn next_spike_time(&mut self, neuron: usize, current_ms: u32, last_scheduled_ms: u32) -> u32;
}

impl<F> SpikeGenerator for F
where
    F: FnMut(usize, u32, u32) -> u32,
{
    fn next_spike_time(&mut self, neuron: usize, current_ms: u32, last_scheduled_ms: u32) -> u32 {
        self(neuron, current_ms, last_scheduled_ms)
    }
}

/// Where a generator group's spikes come from.
pub(crate) enum SpikeSource {
    /// No spikes until a rate or callback is attached.
    Silent,
    Rate {
        rates: PoissonRate,
        /// Minimum inter-spike interval (ms), at least 1.
        refractory_ms: u32,
    },
    Callback(Box<dyn SpikeGenerator + Send>),
}

/// Draws the next Poisson spike time after `last`, rejecting inter-spike
/// intervals shorter than the refractory period.
fn poisson_next<R: Rng>(last: u32, rate_hz: f32, refractory_ms: u32, rng: &mut R) -> u32 {
    let isi_dist = match Exp::new(f64::from(rate_hz) / 1000.0) {
        Ok(dist) => dist,
        Err(_) => return NO_SPIKE,
    };
    loop {
        let isi = isi_dist.sample(rng) as u32;
        if isi >= refractory_ms {
            // saturating add keeps the sentinel stable at the end of time
            return last.saturating_add(isi.max(1));
        }
    }
}

/// Runtime spike scheduling state of one generator group.
pub(crate) struct GeneratorState {
    pub source: SpikeSource,
    /// Next scheduled spike time per neuron, [`NO_SPIKE`] when none.
    next_spike: Vec<u32>,
    /// Last spike time handed to a callback, per neuron.
    last_scheduled: Vec<u32>,
}

impl GeneratorState {
    pub fn new(size: usize) -> Self {
        GeneratorState {
            source: SpikeSource::Silent,
            next_spike: vec![NO_SPIKE; size],
            last_scheduled: vec![NO_SPIKE; size],
        }
    }

    pub fn size(&self) -> usize {
        self.next_spike.len()
    }

    /// Attaches Poisson rates, replacing any previous source. Scheduled spike
    /// times are dropped so the new rates take effect from the next tick on;
    /// first spike times are drawn lazily so that all randomness flows through
    /// the network RNG.
    pub fn set_rates(&mut self, rates: PoissonRate, refractory_ms: u32) -> Result<(), SnnError> {
        if rates.len() != self.size() {
            return Err(SnnError::SizeMismatch {
                expected: self.size(),
                found: rates.len(),
            });
        }
        if refractory_ms == 0 {
            return Err(SnnError::InvalidParameter(
                "Refractory period must be at least 1 ms".to_string(),
            ));
        }
        self.source = SpikeSource::Rate {
            rates,
            refractory_ms,
        };
        for t in self.next_spike.iter_mut() {
            *t = NO_SPIKE;
        }
        Ok(())
    }

    /// Attaches a spike callback, replacing any previous source.
    pub fn set_callback(&mut self, generator: Box<dyn SpikeGenerator + Send>) {
        self.source = SpikeSource::Callback(generator);
        for t in self.next_spike.iter_mut() {
            *t = NO_SPIKE;
        }
        for t in self.last_scheduled.iter_mut() {
            *t = NO_SPIKE;
        }
    }

    /// Advances the scheduler by one millisecond and appends the neurons that
    /// fire during `now` to `fired` (as group-relative indices).
    pub fn tick<R: Rng>(&mut self, now: u32, rng: &mut R, fired: &mut Vec<usize>) {
        match &mut self.source {
            SpikeSource::Silent => {}
            SpikeSource::Rate {
                rates,
                refractory_ms,
            } => {
                for i in 0..self.next_spike.len() {
                    let rate = rates.get(i);
                    if rate <= 0.0 {
                        self.next_spike[i] = NO_SPIKE;
                        continue;
                    }
                    if self.next_spike[i] == NO_SPIKE {
                        // newly enabled; first spike lies strictly after the
                        // previous tick
                        self.next_spike[i] = poisson_next(now.saturating_sub(1), rate, *refractory_ms, rng);
                    }
                    // catch up neurons whose schedule lagged behind a rate change
                    while self.next_spike[i] < now {
                        self.next_spike[i] =
                            poisson_next(self.next_spike[i], rate, *refractory_ms, rng);
                    }
                    if self.next_spike[i] == now {
                        fired.push(i);
                        self.next_spike[i] = poisson_next(now, rate, *refractory_ms, rng);
                    }
                }
            }
            SpikeSource::Callback(generator) => {
                for i in 0..self.next_spike.len() {
                    if self.next_spike[i] == NO_SPIKE && self.last_scheduled[i] == NO_SPIKE {
                        // first query for this neuron
                        let t = generator.next_spike_time(i, now, NO_SPIKE);
                        self.next_spike[i] = t.max(now);
                    }
                    while self.next_spike[i] < now && self.next_spike[i] != NO_SPIKE {
                        let last = self.next_spike[i];
                        self.last_scheduled[i] = last;
                        let t = generator.next_spike_time(i, now, last);
                        self.next_spike[i] = if t == NO_SPIKE { NO_SPIKE } else { t.max(last + 1) };
                    }
                    if self.next_spike[i] == now {
                        fired.push(i);
                        self.last_scheduled[i] = now;
                        let t = generator.next_spike_time(i, now, now);
                        self.next_spike[i] = if t == NO_SPIKE { NO_SPIKE } else { t.max(now + 1) };
                    }
                }
            }
        }
    }
}
