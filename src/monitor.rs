//! Module implementing recording of simulation activity.
//!
//! Monitors are passive observers attached to groups or connections. Spike
//! monitors collect exact spike trains, group monitors trace the dopamine
//! concentration, connection monitors store weight snapshots, and spike
//! counters accumulate per-neuron counts over a rolling window.

use serde::{Deserialize, Serialize};

/// Records the spike train of a group.
///
/// Spikes are only collected between [`SpikeMonitor::start_recording`] and
/// [`SpikeMonitor::stop_recording`]; the monitor tracks the accumulated
/// recording time so that mean rates stay meaningful across several
/// start/stop intervals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpikeMonitor {
    group: usize,
    size: usize,
    recording: bool,
    /// Time the current recording interval started.
    started_at: u32,
    /// Total completed recording time (ms), excluding the running interval.
    recorded_ms: u32,
    /// Spike times per neuron (group-relative), each non-decreasing.
    spikes: Vec<Vec<u32>>,
}

impl SpikeMonitor {
    pub(crate) fn new(group: usize, size: usize) -> Self {
        SpikeMonitor {
            group,
            size,
            recording: false,
            started_at: 0,
            recorded_ms: 0,
            spikes: vec![Vec::new(); size],
        }
    }

    /// Returns the id of the monitored group.
    pub fn group(&self) -> usize {
        self.group
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub(crate) fn start_recording(&mut self, now: u32) {
        if !self.recording {
            self.recording = true;
            self.started_at = now;
        }
    }

    pub(crate) fn stop_recording(&mut self, now: u32) {
        if self.recording {
            self.recording = false;
            self.recorded_ms += now - self.started_at;
        }
    }

    pub(crate) fn record(&mut self, neuron: usize, time: u32) {
        if self.recording {
            self.spikes[neuron].push(time);
        }
    }

    /// Discards all recorded spikes and resets the recording time.
    pub fn clear(&mut self) {
        for train in self.spikes.iter_mut() {
            train.clear();
        }
        self.recorded_ms = 0;
    }

    /// Total recording time in ms, up to `now`.
    pub fn recording_time(&self, now: u32) -> u32 {
        if self.recording {
            self.recorded_ms + (now - self.started_at)
        } else {
            self.recorded_ms
        }
    }

    /// The recorded spike times of one neuron (group-relative index).
    pub fn spike_times(&self, neuron: usize) -> &[u32] {
        &self.spikes[neuron]
    }

    /// Number of recorded spikes of one neuron.
    pub fn num_spikes(&self, neuron: usize) -> usize {
        self.spikes[neuron].len()
    }

    /// Number of recorded spikes across the group.
    pub fn total_spikes(&self) -> usize {
        self.spikes.iter().map(Vec::len).sum()
    }

    /// Mean firing rate of the group (Hz) over the recorded time.
    pub fn mean_rate(&self, now: u32) -> f64 {
        let ms = self.recording_time(now);
        if ms == 0 || self.size == 0 {
            return 0.0;
        }
        self.total_spikes() as f64 / self.size as f64 * 1000.0 / f64::from(ms)
    }

    /// Fraction of neurons (in percent) with no recorded spike.
    pub fn percent_silent(&self) -> f64 {
        if self.size == 0 {
            return 0.0;
        }
        let silent = self.spikes.iter().filter(|train| train.is_empty()).count();
        silent as f64 * 100.0 / self.size as f64
    }

    /// Per-neuron firing rates (Hz) over the recorded time.
    pub fn rates(&self, now: u32) -> Vec<f64> {
        let ms = self.recording_time(now);
        self.spikes
            .iter()
            .map(|train| {
                if ms == 0 {
                    0.0
                } else {
                    train.len() as f64 * 1000.0 / f64::from(ms)
                }
            })
            .collect()
    }
}

/// Traces the dopamine concentration of a group, one sample per ms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMonitor {
    group: usize,
    recording: bool,
    /// (time, concentration) samples.
    dopamine: Vec<(u32, f32)>,
}

impl GroupMonitor {
    pub(crate) fn new(group: usize) -> Self {
        GroupMonitor {
            group,
            recording: true,
            dopamine: Vec::new(),
        }
    }

    pub fn group(&self) -> usize {
        self.group
    }

    pub(crate) fn record(&mut self, time: u32, concentration: f32) {
        if self.recording {
            self.dopamine.push((time, concentration));
        }
    }

    pub fn dopamine_trace(&self) -> &[(u32, f32)] {
        &self.dopamine
    }

    pub fn clear(&mut self) {
        self.dopamine.clear();
    }
}

/// One weight snapshot of a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightSnapshot {
    pub time: u32,
    /// (pre, post, weight) triplets with group-relative neuron indices. The
    /// weight carries the sign of the pre-synaptic group.
    pub weights: Vec<(usize, usize, f32)>,
}

impl WeightSnapshot {
    /// Mean absolute weight of the snapshot.
    pub fn mean_weight(&self) -> f64 {
        if self.weights.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.weights.iter().map(|&(_, _, w)| f64::from(w.abs())).sum();
        sum / self.weights.len() as f64
    }
}

/// Stores weight snapshots of a connection over the course of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionMonitor {
    connection: usize,
    snapshots: Vec<WeightSnapshot>,
}

impl ConnectionMonitor {
    pub(crate) fn new(connection: usize) -> Self {
        ConnectionMonitor {
            connection,
            snapshots: Vec::new(),
        }
    }

    pub fn connection(&self) -> usize {
        self.connection
    }

    pub(crate) fn push(&mut self, snapshot: WeightSnapshot) {
        self.snapshots.push(snapshot);
    }

    pub fn snapshots(&self) -> &[WeightSnapshot] {
        &self.snapshots
    }

    pub fn last(&self) -> Option<&WeightSnapshot> {
        self.snapshots.last()
    }

    /// Total absolute weight change between two consecutive snapshots.
    pub fn total_change(&self) -> Option<f64> {
        let n = self.snapshots.len();
        if n < 2 {
            return None;
        }
        let (prev, last) = (&self.snapshots[n - 2], &self.snapshots[n - 1]);
        if prev.weights.len() != last.weights.len() {
            return None;
        }
        Some(
            prev.weights
                .iter()
                .zip(last.weights.iter())
                .map(|(&(_, _, a), &(_, _, b))| f64::from((b - a).abs()))
                .sum(),
        )
    }
}

/// Per-neuron spike counts over a rolling window.
///
/// With `period_ms == None` the counter accumulates until reset; otherwise the
/// counts restart every `period_ms` milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpikeCounter {
    group: usize,
    period_ms: Option<u32>,
    window_start: u32,
    counts: Vec<u32>,
}

impl SpikeCounter {
    pub(crate) fn new(group: usize, size: usize, period_ms: Option<u32>, now: u32) -> Self {
        SpikeCounter {
            group,
            period_ms,
            window_start: now,
            counts: vec![0; size],
        }
    }

    pub fn group(&self) -> usize {
        self.group
    }

    pub(crate) fn record(&mut self, neuron: usize) {
        self.counts[neuron] += 1;
    }

    pub(crate) fn roll(&mut self, now: u32) {
        if let Some(period) = self.period_ms {
            if now - self.window_start >= period {
                self.reset(now);
            }
        }
    }

    pub fn reset(&mut self, now: u32) {
        self.window_start = now;
        for c in self.counts.iter_mut() {
            *c = 0;
        }
    }

    pub fn count(&self, neuron: usize) -> u32 {
        self.counts[neuron]
    }

    pub fn counts(&self) -> &[u32] {
        &self.counts
    }
}
