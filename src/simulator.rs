//! Module implementing the simulation engine.
//!
//! [`Simulator::build`] expands a [`Network`] description into flat state
//! arrays and runs it in 1 ms ticks. Each tick decays the synaptic state,
//! schedules generator spikes, detects threshold crossings, delivers spikes
//! whose axonal delay elapses this tick, and integrates the membrane
//! equations. Weight changes accumulated by STDP are applied at the
//! configured update interval.
//!
//! All randomness (parameter sampling, wiring, Poisson spike times) is drawn
//! from a single seeded stream, so two simulators built from the same
//! description and seed produce identical spike trains.

use log::{debug, info};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use super::error::SnnError;
use super::generator::{GeneratorState, PoissonRate, SpikeGenerator};
use super::group::NeuronParams;
use super::io::{GroupSummary, NetworkSnapshot, SavedSynapse, SNAPSHOT_VERSION};
use super::monitor::{
    ConnectionMonitor, GroupMonitor, SpikeCounter, SpikeMonitor, WeightSnapshot,
};
use super::network::{IntegrationMethod, Network};
use super::plasticity::StdpType;
use super::synapse::{clamp_signed, BuiltSynapse, ConnMeta, SynapseStore};

/// Dopamine released onto the target group per delivered dopaminergic spike.
const DA_PER_SPIKE: f32 = 0.04;

/// Lower clamp on the membrane voltage (mV).
const V_FLOOR: f32 = -90.0;

/// Sentinel for "has never spiked".
const NEVER: u32 = u32::MAX;

/// A built network being simulated.
pub struct Simulator {
    network: Network,
    rng: ChaCha8Rng,
    store: SynapseStore,
    max_delay: u8,
    /// Milliseconds simulated so far.
    time: u32,
    testing: bool,

    // per-neuron state
    params: Vec<NeuronParams>,
    group_idx: Vec<u16>,
    is_generator: Vec<bool>,
    voltage: Vec<f32>,
    recovery: Vec<f32>,
    g_ampa: Vec<f32>,
    g_nmda_r: Vec<f32>,
    g_nmda_d: Vec<f32>,
    g_gabaa: Vec<f32>,
    g_gabab_r: Vec<f32>,
    g_gabab_d: Vec<f32>,
    /// Synaptic current accumulator, used by current-based synapses.
    current: Vec<f32>,
    ext_current: Vec<f32>,
    last_spike_time: Vec<u32>,
    num_spikes: Vec<u64>,
    avg_firing: Vec<f32>,
    base_firing: Vec<f32>,

    /// Short-term plasticity buffers over a `max_delay + 1` ms window,
    /// laid out `[window_slot * num_neurons + neuron]`.
    stp_u: Vec<f32>,
    stp_x: Vec<f32>,

    /// Dopamine concentration per group.
    dopamine: Vec<f32>,
    /// Peak normalization of the dual-exponential NMDA/GABAb conductances.
    s_nmda: f32,
    s_gabab: f32,

    /// Neurons fired during each of the last `max_delay` ticks.
    fired_ring: Vec<Vec<u32>>,
    /// Spike scheduling state, per generator group.
    generators: Vec<Option<GeneratorState>>,

    spike_monitors: Vec<Option<SpikeMonitor>>,
    group_monitors: Vec<Option<GroupMonitor>>,
    conn_monitors: Vec<Option<ConnectionMonitor>>,
    spike_counters: Vec<Option<SpikeCounter>>,
}

impl Simulator {
    /// Expands a network description into runtime state.
    ///
    /// The seed fixes every random draw of the build and the run: parameter
    /// sampling, wiring, delays and Poisson spike times.
    pub fn build(mut network: Network, seed: u64) -> Result<Self, SnnError> {
        network.verify()?;
        if network.num_connections() > usize::from(u16::MAX) {
            return Err(SnnError::InvalidParameter(
                "At most 65535 connections are supported".to_string(),
            ));
        }
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let n = network.num_neurons();

        // sample per-neuron model parameters in group order
        let generator_params = NeuronParams {
            nine_param: false,
            c_m: 0.0,
            k: 0.0,
            v_r: 0.0,
            v_t: 0.0,
            v_peak: f32::INFINITY,
            a: 0.0,
            b: 0.0,
            c: 0.0,
            d: 0.0,
        };
        let mut params = Vec::with_capacity(n);
        let mut group_idx = Vec::with_capacity(n);
        let mut is_generator = Vec::with_capacity(n);
        let mut base_firing = Vec::with_capacity(n);
        for group in &network.groups {
            for _ in 0..group.size() {
                params.push(match &group.model {
                    Some(model) => model.sample(&mut rng),
                    None => generator_params,
                });
                group_idx.push(group.id() as u16);
                is_generator.push(group.is_generator());
                base_firing.push(match group.homeostasis {
                    Some(h) => (h.base_firing + h.base_firing_sd * (2.0 * rng.gen::<f32>() - 1.0))
                        .max(0.1),
                    None => 0.0,
                });
            }
        }

        // expand the connections into synapses
        let mut built: Vec<BuiltSynapse> = Vec::new();
        let mut metas = Vec::with_capacity(network.connections.len());
        let mut counts = vec![0usize; network.connections.len()];
        for conn in &network.connections {
            let pre = network.group(conn.pre_group())?;
            let post = network.group(conn.post_group())?;
            let sign = pre.polarity().sign();
            let specs = conn.expand(pre, post, &mut rng)?;
            counts[conn.id()] = specs.len();
            for spec in specs {
                built.push(BuiltSynapse {
                    pre: (pre.start() + spec.pre) as u32,
                    post: (post.start() + spec.post) as u32,
                    wt: sign * spec.weight,
                    max_wt: sign * spec.max_weight,
                    delay: spec.delay,
                    conn: conn.id() as u16,
                    plastic: conn.is_plastic(),
                });
            }
            metas.push(ConnMeta {
                pre_group: pre.id(),
                post_group: post.id(),
                inhibitory: pre.polarity().sign() < 0.0,
                plastic: conn.is_plastic(),
                dopaminergic: pre.dopaminergic,
                mul_fast: conn.mul_fast,
                mul_slow: conn.mul_slow,
            });
        }
        for conn in network.connections.iter_mut() {
            conn.num_synapses = counts[conn.id()];
        }

        let store = SynapseStore::build(n, &built, metas);
        let max_delay = store.max_delay();

        let voltage: Vec<f32> = params.iter().map(NeuronParams::rest_voltage).collect();
        let recovery: Vec<f32> = params.iter().map(NeuronParams::rest_recovery).collect();

        let (s_nmda, s_gabab) = match &network.conductances {
            Some(c) => (c.nmda_scale(), c.gabab_scale()),
            None => (1.0, 1.0),
        };

        let generators = network
            .groups
            .iter()
            .map(|g| g.is_generator().then(|| GeneratorState::new(g.size())))
            .collect();
        let dopamine = network.groups.iter().map(|g| g.dopamine.base).collect();

        let num_groups = network.num_groups();
        let num_conns = network.num_connections();
        let window = usize::from(max_delay) + 1;

        info!(
            "built network: {} neurons in {} groups, {} synapses, max delay {} ms",
            n,
            num_groups,
            store.num_synapses(),
            max_delay
        );

        Ok(Simulator {
            network,
            rng,
            store,
            max_delay,
            time: 0,
            testing: false,
            params,
            group_idx,
            is_generator,
            voltage,
            recovery,
            g_ampa: vec![0.0; n],
            g_nmda_r: vec![0.0; n],
            g_nmda_d: vec![0.0; n],
            g_gabaa: vec![0.0; n],
            g_gabab_r: vec![0.0; n],
            g_gabab_d: vec![0.0; n],
            current: vec![0.0; n],
            ext_current: vec![0.0; n],
            last_spike_time: vec![NEVER; n],
            num_spikes: vec![0; n],
            avg_firing: vec![0.0; n],
            base_firing,
            stp_u: vec![0.0; window * n],
            stp_x: vec![1.0; window * n],
            dopamine,
            s_nmda,
            s_gabab,
            fired_ring: vec![Vec::new(); usize::from(max_delay)],
            generators,
            spike_monitors: vec![None; num_groups],
            group_monitors: vec![None; num_groups],
            conn_monitors: vec![None; num_conns],
            spike_counters: vec![None; num_groups],
        })
    }

    /// Advances the simulation by `ms` milliseconds.
    pub fn run(&mut self, ms: u32) {
        let spikes_before = self.total_spike_count();
        for _ in 0..ms {
            let t = self.time;
            self.tick(t);
            self.time += 1;
            if self.time % 1000 == 0 {
                debug!("simulated {} ms", self.time);
            }
        }
        info!(
            "ran {} ms up to t = {} ms: {} spikes",
            ms,
            self.time,
            self.total_spike_count() - spikes_before
        );
    }

    fn tick(&mut self, t: u32) {
        self.decay_state(t);

        let mut fired: Vec<u32> = Vec::new();

        // generator spikes scheduled for this tick
        let mut scratch: Vec<usize> = Vec::new();
        for gid in 0..self.generators.len() {
            if let Some(gen) = self.generators[gid].as_mut() {
                scratch.clear();
                gen.tick(t, &mut self.rng, &mut scratch);
                let start = self.network.groups[gid].start();
                fired.extend(scratch.iter().map(|&r| (start + r) as u32));
            }
        }

        // threshold crossings from the previous integration step
        for i in 0..self.voltage.len() {
            if !self.is_generator[i] && self.voltage[i] >= self.params[i].v_peak {
                fired.push(i as u32);
            }
        }

        self.process_fired(t, &fired);

        let ring = (t % u32::from(self.max_delay)) as usize;
        self.fired_ring[ring].clear();
        self.fired_ring[ring].extend_from_slice(&fired);

        self.deliver(t);
        self.integrate();
        self.sample_monitors(t);

        if !self.testing && (t + 1) % self.network.weight_update.interval.ms() == 0 {
            self.update_weights();
        }
    }

    /// Per-ms decay of conductances, dopamine, firing averages and the
    /// short-term plasticity window.
    fn decay_state(&mut self, t: u32) {
        match self.network.conductances {
            Some(c) => {
                let d_ampa = 1.0 - 1.0 / c.tau_decay_ampa;
                let d_nmda = 1.0 - 1.0 / c.tau_decay_nmda;
                let d_gabaa = 1.0 - 1.0 / c.tau_decay_gabaa;
                let d_gabab = 1.0 - 1.0 / c.tau_decay_gabab;
                for g in self.g_ampa.iter_mut() {
                    *g *= d_ampa;
                }
                for g in self.g_nmda_d.iter_mut() {
                    *g *= d_nmda;
                }
                for g in self.g_gabaa.iter_mut() {
                    *g *= d_gabaa;
                }
                for g in self.g_gabab_d.iter_mut() {
                    *g *= d_gabab;
                }
                if c.with_nmda_rise() {
                    let r_nmda = 1.0 - 1.0 / c.tau_rise_nmda;
                    for g in self.g_nmda_r.iter_mut() {
                        *g *= r_nmda;
                    }
                }
                if c.with_gabab_rise() {
                    let r_gabab = 1.0 - 1.0 / c.tau_rise_gabab;
                    for g in self.g_gabab_r.iter_mut() {
                        *g *= r_gabab;
                    }
                }
            }
            None => {
                for c in self.current.iter_mut() {
                    *c = 0.0;
                }
            }
        }

        let n = self.voltage.len();
        let window = usize::from(self.max_delay) + 1;
        let cur = (t as usize % window) * n;
        let prev = ((t as usize + window - 1) % window) * n;

        for gid in 0..self.network.groups.len() {
            let (start, end) = {
                let g = &self.network.groups[gid];
                (g.start(), g.end())
            };
            let da = self.network.groups[gid].dopamine;
            self.dopamine[gid] = da.base + (self.dopamine[gid] - da.base) * da.decay();

            if let Some(h) = self.network.groups[gid].homeostasis {
                let decay = h.avg_decay();
                for i in start..end {
                    self.avg_firing[i] *= decay;
                }
            }

            if let Some(stp) = self.network.groups[gid].stp {
                let du = 1.0 - 1.0 / stp.tau_u;
                for i in start..end {
                    self.stp_u[cur + i] = self.stp_u[prev + i] * du;
                    self.stp_x[cur + i] =
                        self.stp_x[prev + i] + (1.0 - self.stp_x[prev + i]) / stp.tau_x;
                }
            }
        }
    }

    /// Resets fired neurons, applies on-spike plasticity bookkeeping and
    /// records the spikes.
    fn process_fired(&mut self, t: u32, fired: &[u32]) {
        let n = self.voltage.len();
        let window = usize::from(self.max_delay) + 1;
        let cur = (t as usize % window) * n;

        for &id in fired {
            let i = id as usize;
            let gid = usize::from(self.group_idx[i]);
            self.last_spike_time[i] = t;
            self.num_spikes[i] += 1;

            if !self.is_generator[i] {
                let p = self.params[i];
                self.voltage[i] = p.c;
                self.recovery[i] += p.d;
            }

            if let Some(h) = self.network.groups[gid].homeostasis {
                self.avg_firing[i] += 1.0 / h.avg_time_scale;
            }

            if let Some(stp) = self.network.groups[gid].stp {
                let x_minus = self.stp_x[cur + i];
                self.stp_u[cur + i] += stp.u * (1.0 - self.stp_u[cur + i]);
                self.stp_x[cur + i] -= self.stp_u[cur + i] * x_minus;
            }

            // potentiation of plastic afferents against their last pre arrival
            if !self.testing && self.network.groups[gid].has_stdp() {
                let exc = self.network.groups[gid].exc_stdp;
                let inh = self.network.groups[gid].inh_stdp;
                for slot in self.store.plastic_afferents(i) {
                    let arrival = self.store.syn_spike_time[slot];
                    if arrival == NEVER {
                        continue;
                    }
                    let dt = (t - arrival) as f32;
                    let delta = if self.store.meta(self.store.conn_of[slot]).inhibitory {
                        inh.map(|s| s.curve.on_post_after_pre(dt))
                    } else {
                        exc.map(|s| s.curve.ltp(dt))
                    };
                    if let Some(delta) = delta {
                        self.store.wt_change[slot] += delta;
                    }
                }
            }

            let rel = i - self.network.groups[gid].start();
            if let Some(m) = self.spike_monitors[gid].as_mut() {
                m.record(rel, t);
            }
            if let Some(c) = self.spike_counters[gid].as_mut() {
                c.record(rel);
            }
        }
    }

    /// Delivers every spike whose axonal delay elapses during this tick.
    fn deliver(&mut self, t: u32) {
        let n = self.voltage.len();
        let window = usize::from(self.max_delay) + 1;

        for k in 0..u32::from(self.max_delay) {
            if k > t {
                break;
            }
            let tf = t - k;
            let delay = (k + 1) as u8;
            let ring = (tf % u32::from(self.max_delay)) as usize;
            let fired = std::mem::take(&mut self.fired_ring[ring]);
            for &pre_id in &fired {
                let pre = pre_id as usize;
                let range = self.store.efferent_slots_with_delay(pre, delay);
                if range.is_empty() {
                    continue;
                }

                // short-term modulation of everything leaving this neuron
                let stp_scale = match self.network.groups[usize::from(self.group_idx[pre])].stp {
                    Some(stp) => {
                        let plus = (tf as usize % window) * n + pre;
                        let minus = ((tf as usize + window - 1) % window) * n + pre;
                        stp.amplitude() * self.stp_u[plus] * self.stp_x[minus]
                    }
                    None => 1.0,
                };

                for idx in range {
                    let syn = self.store.post_syn_at(idx);
                    let slot = syn.slot as usize;
                    let post = syn.target as usize;
                    let meta = *self.store.meta(self.store.conn_of[slot]);
                    let change = self.store.wt[slot] * stp_scale;
                    let post_gid = usize::from(self.group_idx[post]);

                    self.store.syn_spike_time[slot] = t;

                    // depression against the post neuron's last spike
                    if meta.plastic && !self.testing {
                        let last = self.last_spike_time[post];
                        if last != NEVER {
                            let dt = (t - last) as f32;
                            let grp = &self.network.groups[post_gid];
                            let delta = if meta.inhibitory {
                                grp.inh_stdp.map(|s| s.curve.on_pre_after_post(dt))
                            } else {
                                grp.exc_stdp.map(|s| s.curve.ltd(dt))
                            };
                            if let Some(delta) = delta {
                                self.store.wt_change[slot] += delta;
                            }
                        }
                    }

                    if meta.dopaminergic {
                        self.dopamine[post_gid] += DA_PER_SPIKE;
                    }

                    match self.network.conductances {
                        Some(c) => {
                            let mag = change.abs();
                            if meta.inhibitory {
                                self.g_gabaa[post] += mag * meta.mul_fast;
                                let slow = mag * meta.mul_slow * self.s_gabab;
                                self.g_gabab_d[post] += slow;
                                if c.with_gabab_rise() {
                                    self.g_gabab_r[post] += slow;
                                }
                            } else {
                                self.g_ampa[post] += mag * meta.mul_fast;
                                let slow = mag * meta.mul_slow * self.s_nmda;
                                self.g_nmda_d[post] += slow;
                                if c.with_nmda_rise() {
                                    self.g_nmda_r[post] += slow;
                                }
                            }
                        }
                        None => self.current[post] += change,
                    }
                }
            }
            self.fired_ring[ring] = fired;
        }
    }

    /// Integrates the membrane equations over one millisecond.
    fn integrate(&mut self) {
        let cfg = self.network.integration;
        let cond = self.network.conductances;
        let steps = cfg.steps_per_ms;
        let h = 1.0 / steps as f32;

        let Simulator {
            ref params,
            ref is_generator,
            ref g_ampa,
            ref g_nmda_r,
            ref g_nmda_d,
            ref g_gabaa,
            ref g_gabab_r,
            ref g_gabab_d,
            ref current,
            ref ext_current,
            ref mut voltage,
            ref mut recovery,
            ..
        } = *self;

        voltage
            .par_iter_mut()
            .zip(recovery.par_iter_mut())
            .enumerate()
            .for_each(|(i, (v, u))| {
                if is_generator[i] {
                    return;
                }
                let p = &params[i];
                let uu = *u;
                let mut vv = *v;

                let total_current = |v: f32| -> f32 {
                    let syn = match cond {
                        Some(c) => {
                            let g_nmda = if c.with_nmda_rise() {
                                g_nmda_d[i] - g_nmda_r[i]
                            } else {
                                g_nmda_d[i]
                            };
                            let g_gabab = if c.with_gabab_rise() {
                                g_gabab_d[i] - g_gabab_r[i]
                            } else {
                                g_gabab_d[i]
                            };
                            let tmp = ((v + 80.0) / 60.0) * ((v + 80.0) / 60.0);
                            -(g_ampa[i] * v
                                + g_nmda * tmp / (1.0 + tmp) * v
                                + g_gabaa[i] * (v + 70.0)
                                + g_gabab * (v + 90.0))
                        }
                        None => current[i],
                    };
                    syn + ext_current[i]
                };
                let dvdt = |v: f32| -> f32 {
                    let i_in = total_current(v);
                    if p.nine_param {
                        (p.k * (v - p.v_r) * (v - p.v_t) - uu + i_in) / p.c_m
                    } else {
                        (0.04 * v + 5.0) * v + 140.0 - uu + i_in
                    }
                };

                for _ in 0..steps {
                    vv += match cfg.method {
                        IntegrationMethod::ForwardEuler => h * dvdt(vv),
                        IntegrationMethod::RungeKutta4 => {
                            let k1 = dvdt(vv);
                            let k2 = dvdt(vv + 0.5 * h * k1);
                            let k3 = dvdt(vv + 0.5 * h * k2);
                            let k4 = dvdt(vv + h * k3);
                            h / 6.0 * (k1 + 2.0 * k2 + 2.0 * k3 + k4)
                        }
                    };
                    if vv >= p.v_peak {
                        // threshold reached: the spike is handled next tick
                        vv = p.v_peak;
                        break;
                    }
                    if vv < V_FLOOR {
                        vv = V_FLOOR;
                    }
                }
                *v = vv;

                // the recovery variable follows once per ms
                *u = if p.nine_param {
                    uu + p.a * (p.b * (vv - p.v_r) - uu)
                } else {
                    uu + p.a * (p.b * vv - uu)
                };
            });
    }

    /// Applies accumulated STDP changes, homeostasis and dopamine modulation
    /// to the plastic weights.
    fn update_weights(&mut self) {
        let scale = self.network.weight_update.scale();
        let decay = self.network.weight_update.decay();

        for gid in 0..self.network.groups.len() {
            let grp = &self.network.groups[gid];
            if grp.is_generator() || !grp.has_stdp() {
                continue;
            }
            let exc = grp.exc_stdp;
            let inh = grp.inh_stdp;
            let homeo = grp.homeostasis;
            let (start, end) = (grp.start(), grp.end());
            let da = self.dopamine[gid];

            for i in start..end {
                let diff_firing = homeo.map(|_| 1.0 - self.avg_firing[i] / self.base_firing[i]);
                for slot in self.store.plastic_afferents(i) {
                    let inhibitory = self.store.meta(self.store.conn_of[slot]).inhibitory;
                    let kind = match if inhibitory {
                        inh.map(|s| s.kind)
                    } else {
                        exc.map(|s| s.kind)
                    } {
                        Some(kind) => kind,
                        None => continue,
                    };

                    let mut change = scale * self.store.wt_change[slot];
                    if kind == StdpType::DaModulated {
                        change *= da;
                    }
                    let mut wt = self.store.wt[slot];
                    match (homeo, diff_firing) {
                        (Some(h), Some(diff)) => {
                            wt += (diff * wt * h.scale + change) * self.base_firing[i]
                                / h.avg_time_scale
                                / (1.0 + diff.abs() * 50.0);
                        }
                        _ => wt += change,
                    }
                    self.store.wt_change[slot] *= decay;
                    self.store.wt[slot] = clamp_signed(wt, self.store.max_wt[slot]);
                }
            }
        }
    }

    fn sample_monitors(&mut self, t: u32) {
        for gid in 0..self.group_monitors.len() {
            if let Some(m) = self.group_monitors[gid].as_mut() {
                m.record(t, self.dopamine[gid]);
            }
        }
        for counter in self.spike_counters.iter_mut().flatten() {
            counter.roll(t + 1);
        }
    }

    // ---- inputs ----------------------------------------------------------

    /// Sets the Poisson mean rates of a generator group. The refractory
    /// period bounds the inter-spike intervals from below.
    pub fn set_spike_rate(
        &mut self,
        group: usize,
        rates: PoissonRate,
        refractory_ms: u32,
    ) -> Result<(), SnnError> {
        self.generator_state(group)?.set_rates(rates, refractory_ms)
    }

    /// Attaches a spike-time callback to a generator group.
    pub fn set_spike_generator(
        &mut self,
        group: usize,
        generator: Box<dyn SpikeGenerator + Send>,
    ) -> Result<(), SnnError> {
        self.generator_state(group)?.set_callback(generator);
        Ok(())
    }

    fn generator_state(&mut self, group: usize) -> Result<&mut GeneratorState, SnnError> {
        self.network.group(group)?;
        self.generators[group]
            .as_mut()
            .ok_or_else(|| {
                SnnError::InvalidOperation(format!("Group {} is not a spike generator", group))
            })
    }

    /// Injects a constant external current (per neuron) into a group. The
    /// current persists until changed.
    pub fn set_external_current(&mut self, group: usize, current: &[f32]) -> Result<(), SnnError> {
        let (start, size, generator) = {
            let g = self.network.group(group)?;
            (g.start(), g.size(), g.is_generator())
        };
        if generator {
            return Err(SnnError::InvalidOperation(
                "Spike generator groups carry no membrane current".to_string(),
            ));
        }
        if current.len() != size {
            return Err(SnnError::SizeMismatch {
                expected: size,
                found: current.len(),
            });
        }
        self.ext_current[start..start + size].copy_from_slice(current);
        Ok(())
    }

    /// Injects the same constant external current into every neuron of a
    /// group.
    pub fn set_uniform_external_current(
        &mut self,
        group: usize,
        current: f32,
    ) -> Result<(), SnnError> {
        let size = self.network.group(group)?.size();
        self.set_external_current(group, &vec![current; size])
    }

    // ---- testing phase ---------------------------------------------------

    /// Enters the testing phase: any accumulated weight changes are applied
    /// once, then spike-timing updates stop and weights are frozen until
    /// [`Simulator::stop_testing`].
    pub fn start_testing(&mut self) {
        if !self.testing {
            self.update_weights();
        }
        self.testing = true;
    }

    /// Leaves the testing phase and resumes learning.
    pub fn stop_testing(&mut self) {
        self.testing = false;
    }

    pub fn is_testing(&self) -> bool {
        self.testing
    }

    // ---- monitors --------------------------------------------------------

    /// Attaches a spike monitor to a group and starts recording.
    pub fn set_spike_monitor(&mut self, group: usize) -> Result<(), SnnError> {
        let size = self.network.group(group)?.size();
        let mut monitor = SpikeMonitor::new(group, size);
        monitor.start_recording(self.time);
        self.spike_monitors[group] = Some(monitor);
        Ok(())
    }

    pub fn spike_monitor(&self, group: usize) -> Result<&SpikeMonitor, SnnError> {
        self.network.group(group)?;
        self.spike_monitors[group]
            .as_ref()
            .ok_or_else(|| SnnError::InvalidOperation(format!("Group {} has no spike monitor", group)))
    }

    pub fn start_recording(&mut self, group: usize) -> Result<(), SnnError> {
        let now = self.time;
        self.spike_monitor_mut(group)?.start_recording(now);
        Ok(())
    }

    pub fn stop_recording(&mut self, group: usize) -> Result<(), SnnError> {
        let now = self.time;
        self.spike_monitor_mut(group)?.stop_recording(now);
        Ok(())
    }

    fn spike_monitor_mut(&mut self, group: usize) -> Result<&mut SpikeMonitor, SnnError> {
        self.network.group(group)?;
        self.spike_monitors[group]
            .as_mut()
            .ok_or_else(|| SnnError::InvalidOperation(format!("Group {} has no spike monitor", group)))
    }

    /// Attaches a dopamine trace monitor to a group.
    pub fn set_group_monitor(&mut self, group: usize) -> Result<(), SnnError> {
        self.network.group(group)?;
        self.group_monitors[group] = Some(GroupMonitor::new(group));
        Ok(())
    }

    pub fn group_monitor(&self, group: usize) -> Result<&GroupMonitor, SnnError> {
        self.network.group(group)?;
        self.group_monitors[group]
            .as_ref()
            .ok_or_else(|| SnnError::InvalidOperation(format!("Group {} has no group monitor", group)))
    }

    /// Attaches a weight monitor to a connection.
    pub fn set_connection_monitor(&mut self, connection: usize) -> Result<(), SnnError> {
        self.network.connection(connection)?;
        self.conn_monitors[connection] = Some(ConnectionMonitor::new(connection));
        Ok(())
    }

    pub fn connection_monitor(&self, connection: usize) -> Result<&ConnectionMonitor, SnnError> {
        self.network.connection(connection)?;
        self.conn_monitors[connection].as_ref().ok_or_else(|| {
            SnnError::InvalidOperation(format!("Connection {} has no monitor", connection))
        })
    }

    /// Records the current weights of a connection into its monitor.
    pub fn take_weight_snapshot(&mut self, connection: usize) -> Result<(), SnnError> {
        let snapshot = WeightSnapshot {
            time: self.time,
            weights: self.weights(connection)?,
        };
        self.conn_monitors[connection]
            .as_mut()
            .ok_or_else(|| {
                SnnError::InvalidOperation(format!("Connection {} has no monitor", connection))
            })?
            .push(snapshot);
        Ok(())
    }

    /// Attaches a spike counter to a group; `period_ms` of `None` counts
    /// until reset, otherwise the counts restart every period.
    pub fn set_spike_counter(
        &mut self,
        group: usize,
        period_ms: Option<u32>,
    ) -> Result<(), SnnError> {
        let size = self.network.group(group)?.size();
        self.spike_counters[group] = Some(SpikeCounter::new(group, size, period_ms, self.time));
        Ok(())
    }

    pub fn spike_counter(&self, group: usize) -> Result<&SpikeCounter, SnnError> {
        self.network.group(group)?;
        self.spike_counters[group]
            .as_ref()
            .ok_or_else(|| SnnError::InvalidOperation(format!("Group {} has no spike counter", group)))
    }

    pub fn reset_spike_counter(&mut self, group: usize) -> Result<(), SnnError> {
        let now = self.time;
        self.network.group(group)?;
        self.spike_counters[group]
            .as_mut()
            .ok_or_else(|| SnnError::InvalidOperation(format!("Group {} has no spike counter", group)))?
            .reset(now);
        Ok(())
    }

    // ---- state access ----------------------------------------------------

    /// Milliseconds simulated so far.
    pub fn time(&self) -> u32 {
        self.time
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn num_neurons(&self) -> usize {
        self.voltage.len()
    }

    pub fn num_synapses(&self) -> usize {
        self.store.num_synapses()
    }

    /// Membrane voltage of a neuron (global id).
    pub fn voltage(&self, neuron: usize) -> Result<f32, SnnError> {
        self.check_neuron(neuron)?;
        Ok(self.voltage[neuron])
    }

    /// Recovery variable of a neuron (global id).
    pub fn recovery(&self, neuron: usize) -> Result<f32, SnnError> {
        self.check_neuron(neuron)?;
        Ok(self.recovery[neuron])
    }

    /// Total spikes emitted by a neuron since the start of the run.
    pub fn neuron_spike_count(&self, neuron: usize) -> Result<u64, SnnError> {
        self.check_neuron(neuron)?;
        Ok(self.num_spikes[neuron])
    }

    /// Total spikes emitted by a group since the start of the run.
    pub fn group_spike_count(&self, group: usize) -> Result<u64, SnnError> {
        let g = self.network.group(group)?;
        Ok(self.num_spikes[g.start()..g.end()].iter().sum())
    }

    /// Total spikes emitted by the whole network since the start of the run.
    pub fn total_spike_count(&self) -> u64 {
        self.num_spikes.iter().sum()
    }

    /// Dopamine concentration of a group.
    pub fn dopamine(&self, group: usize) -> Result<f32, SnnError> {
        self.network.group(group)?;
        Ok(self.dopamine[group])
    }

    /// Synaptic conductances (AMPA, NMDA, GABAa, GABAb) of a neuron, with the
    /// rise components already folded in.
    pub fn conductances(&self, neuron: usize) -> Result<(f32, f32, f32, f32), SnnError> {
        self.check_neuron(neuron)?;
        let c = self.network.conductances.ok_or_else(|| {
            SnnError::InvalidOperation("The network runs current-based synapses".to_string())
        })?;
        let nmda = if c.with_nmda_rise() {
            self.g_nmda_d[neuron] - self.g_nmda_r[neuron]
        } else {
            self.g_nmda_d[neuron]
        };
        let gabab = if c.with_gabab_rise() {
            self.g_gabab_d[neuron] - self.g_gabab_r[neuron]
        } else {
            self.g_gabab_d[neuron]
        };
        Ok((self.g_ampa[neuron], nmda, self.g_gabaa[neuron], gabab))
    }

    /// Signed weights of a connection as (pre, post, weight) triplets with
    /// group-relative indices.
    pub fn weights(&self, connection: usize) -> Result<Vec<(usize, usize, f32)>, SnnError> {
        let conn = self.network.connection(connection)?;
        let pre_start = self.network.group(conn.pre_group())?.start();
        let post_start = self.network.group(conn.post_group())?.start();
        Ok(self
            .store
            .connection_weights(connection as u16)
            .into_iter()
            .map(|(pre, post, wt)| (pre - pre_start, post - post_start, wt))
            .collect())
    }

    /// Dense weight matrix of a connection, indexed `[pre][post]` with
    /// group-relative ids; `NaN` where no synapse exists.
    pub fn weight_matrix(&self, connection: usize) -> Result<Vec<Vec<f32>>, SnnError> {
        let conn = self.network.connection(connection)?;
        let pre_size = self.network.group(conn.pre_group())?.size();
        let post_size = self.network.group(conn.post_group())?.size();
        let mut matrix = vec![vec![f32::NAN; post_size]; pre_size];
        for (pre, post, wt) in self.weights(connection)? {
            matrix[pre][post] = wt;
        }
        Ok(matrix)
    }

    /// Delays of a connection as (pre, post, delay_ms) triplets with
    /// group-relative indices.
    pub fn delays(&self, connection: usize) -> Result<Vec<(usize, usize, u8)>, SnnError> {
        let conn = self.network.connection(connection)?;
        let pre_start = self.network.group(conn.pre_group())?.start();
        let post_start = self.network.group(conn.post_group())?.start();
        Ok(self
            .store
            .connection_delays(connection as u16)
            .into_iter()
            .map(|(pre, post, d)| (pre - pre_start, post - post_start, d))
            .collect())
    }

    /// Overwrites the weight of one synapse (group-relative ids). The weight
    /// is a magnitude; the stored sign follows the pre group's polarity, and
    /// the synapse's bound is raised when the new weight exceeds it.
    pub fn set_weight(
        &mut self,
        connection: usize,
        pre: usize,
        post: usize,
        weight: f32,
    ) -> Result<(), SnnError> {
        if weight < 0.0 || !weight.is_finite() {
            return Err(SnnError::InvalidParameter(
                "Weights are magnitudes and must be finite and non-negative".to_string(),
            ));
        }
        let (pre_id, post_id, sign) = {
            let conn = self.network.connection(connection)?;
            let pre_grp = self.network.group(conn.pre_group())?;
            let post_grp = self.network.group(conn.post_group())?;
            if pre >= pre_grp.size() || post >= post_grp.size() {
                return Err(SnnError::InvalidParameter(format!(
                    "Neuron pair ({}, {}) out of range for connection {}",
                    pre, post, connection
                )));
            }
            (
                (pre_grp.start() + pre) as u32,
                (post_grp.start() + post) as u32,
                pre_grp.polarity().sign(),
            )
        };
        let slot = self
            .store
            .find_slot(connection as u16, pre_id, post_id)
            .ok_or_else(|| {
                SnnError::InvalidOperation(format!(
                    "Connection {} has no synapse {} -> {}",
                    connection, pre, post
                ))
            })?;
        let wt = sign * weight;
        if wt.abs() > self.store.max_wt[slot].abs() {
            self.store.max_wt[slot] = wt;
        }
        self.store.wt[slot] = wt;
        Ok(())
    }

    /// Adds a constant to every weight magnitude of a connection, clamping
    /// each synapse to its range.
    pub fn bias_weights(&mut self, connection: usize, bias: f32) -> Result<(), SnnError> {
        if !bias.is_finite() {
            return Err(SnnError::InvalidParameter(
                "Weight biases must be finite".to_string(),
            ));
        }
        let sign = {
            let conn = self.network.connection(connection)?;
            self.network.group(conn.pre_group())?.polarity().sign()
        };
        self.store.bias_connection(connection as u16, sign * bias);
        Ok(())
    }

    /// Multiplies the weights of a connection by a factor; plastic synapses
    /// are clamped to their range, fixed ones scale their bounds along.
    pub fn scale_connection_weights(
        &mut self,
        connection: usize,
        factor: f32,
    ) -> Result<(), SnnError> {
        if factor < 0.0 || !factor.is_finite() {
            return Err(SnnError::InvalidParameter(
                "Weight scale factors must be finite and non-negative".to_string(),
            ));
        }
        self.network.connection(connection)?;
        self.store.scale_connection(connection as u16, factor);
        Ok(())
    }

    // ---- persistence -----------------------------------------------------

    /// Captures the expanded structure and current weights as a snapshot.
    pub fn snapshot(&self) -> NetworkSnapshot {
        let groups = self
            .network
            .groups
            .iter()
            .map(|g| GroupSummary {
                name: g.name().to_string(),
                start: g.start(),
                size: g.size(),
            })
            .collect();
        let delays = self.store.delays_by_slot();
        let synapses = (0..self.store.num_synapses())
            .map(|slot| SavedSynapse {
                pre: self.store.pre_id[slot],
                post: self.store.post_of_slot(slot) as u32,
                conn: self.store.conn_of[slot],
                delay: delays[slot],
                wt: self.store.wt[slot],
                max_wt: self.store.max_wt[slot],
            })
            .collect();
        NetworkSnapshot {
            version: SNAPSHOT_VERSION,
            time: self.time,
            groups,
            synapses,
        }
    }

    /// Restores the weights of a snapshot taken from a structurally identical
    /// simulator (same groups, same wiring, same delays). Only the weights and
    /// their bounds are overwritten; the simulated time keeps running.
    pub fn restore_weights(&mut self, snapshot: &NetworkSnapshot) -> Result<(), SnnError> {
        let current = self.snapshot();
        if current.groups != snapshot.groups {
            return Err(SnnError::VerificationFailed(
                "Snapshot group layout does not match the network".to_string(),
            ));
        }
        if current.synapses.len() != snapshot.synapses.len() {
            return Err(SnnError::SizeMismatch {
                expected: current.synapses.len(),
                found: snapshot.synapses.len(),
            });
        }
        for (slot, (have, want)) in current
            .synapses
            .iter()
            .zip(snapshot.synapses.iter())
            .enumerate()
        {
            if have.pre != want.pre
                || have.post != want.post
                || have.conn != want.conn
                || have.delay != want.delay
            {
                return Err(SnnError::VerificationFailed(format!(
                    "Snapshot synapse {} does not match the network wiring",
                    slot
                )));
            }
            self.store.wt[slot] = want.wt;
            self.store.max_wt[slot] = want.max_wt;
        }
        Ok(())
    }

    fn check_neuron(&self, neuron: usize) -> Result<(), SnnError> {
        if neuron >= self.voltage.len() {
            return Err(SnnError::InvalidParameter(format!(
                "Neuron id {} out of range",
                neuron
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::connection::{ConnectRule, RangeDelay, RangeWeight, SynapseType};
    use super::super::grid::Grid3D;
    use super::super::group::{NeuronModel, Polarity};
    use super::*;

    fn single_neuron_net() -> Network {
        let mut network = Network::new();
        let g = network
            .create_group("exc", Grid3D::line(1).unwrap(), Polarity::Excitatory)
            .unwrap();
        network
            .set_neuron_model(g, NeuronModel::regular_spiking())
            .unwrap();
        network
    }

    #[test]
    fn test_neuron_settles_without_input() {
        let mut sim = Simulator::build(single_neuron_net(), 42).unwrap();
        sim.run(500);
        // a regular spiking cell initialized at c = -65 relaxes to its resting
        // point near -70 mV and stays silent
        let v = sim.voltage(0).unwrap();
        assert!((-75.0..-65.0).contains(&v), "voltage {}", v);
        assert_eq!(sim.neuron_spike_count(0).unwrap(), 0);
    }

    #[test]
    fn test_tonic_spiking_under_current() {
        let mut sim = Simulator::build(single_neuron_net(), 42).unwrap();
        sim.set_uniform_external_current(0, 10.0).unwrap();
        sim.run(1000);
        let spikes = sim.neuron_spike_count(0).unwrap();
        // a regular spiking cell under 10 pA fires tonically
        assert!((5..200).contains(&spikes), "spike count {}", spikes);
    }

    #[test]
    fn test_delivery_respects_delay() {
        let mut network = Network::new();
        network.set_conductances(None);
        let input = network
            .create_generator_group("in", Grid3D::line(1).unwrap(), Polarity::Excitatory)
            .unwrap();
        let out = network
            .create_group("out", Grid3D::line(1).unwrap(), Polarity::Excitatory)
            .unwrap();
        network
            .set_neuron_model(out, NeuronModel::regular_spiking())
            .unwrap();
        network
            .connect(
                input,
                out,
                ConnectRule::OneToOne,
                RangeWeight::fixed(5.0).unwrap(),
                RangeDelay::fixed(3).unwrap(),
                SynapseType::Fixed,
            )
            .unwrap();

        let mut sim = Simulator::build(network, 42).unwrap();
        // single input spike at t = 5
        sim.set_spike_generator(
            input,
            Box::new(|_n: usize, _now: u32, last: u32| if last == u32::MAX { 5 } else { u32::MAX }),
        )
        .unwrap();

        // the spike is delivered during tick 7 (fired at 5, delay 3)
        sim.run(7);
        let before = sim.voltage(1).unwrap();
        assert!(before <= -65.0, "voltage bumped early: {}", before);
        sim.run(1);
        let after = sim.voltage(1).unwrap();
        assert!(after > before + 1.0, "no delivery: {} -> {}", before, after);
    }

    #[test]
    fn test_single_weight_edits() {
        let mut network = Network::new();
        let input = network
            .create_generator_group("in", Grid3D::line(2).unwrap(), Polarity::Excitatory)
            .unwrap();
        let out = network
            .create_group("out", Grid3D::line(2).unwrap(), Polarity::Excitatory)
            .unwrap();
        network
            .set_neuron_model(out, NeuronModel::regular_spiking())
            .unwrap();
        network
            .connect(
                input,
                out,
                ConnectRule::OneToOne,
                RangeWeight::fixed(0.5).unwrap(),
                RangeDelay::fixed(3).unwrap(),
                SynapseType::Fixed,
            )
            .unwrap();
        let mut sim = Simulator::build(network, 42).unwrap();

        // only the diagonal exists
        assert!(sim.set_weight(0, 0, 1, 0.1).is_err());
        for (pre, post, d) in sim.delays(0).unwrap() {
            assert_eq!(pre, post);
            assert_eq!(d, 3);
        }

        // raising a weight past its bound extends the bound
        sim.set_weight(0, 0, 0, 0.8).unwrap();
        sim.bias_weights(0, -0.2).unwrap();
        let m = sim.weight_matrix(0).unwrap();
        approx::assert_relative_eq!(m[0][0], 0.6, epsilon = 1e-6);
        approx::assert_relative_eq!(m[1][1], 0.3, epsilon = 1e-6);
        assert!(m[0][1].is_nan());
        assert!(m[1][0].is_nan());
    }

    #[test]
    fn test_same_seed_same_spike_trains() {
        let build = || {
            let mut network = Network::new();
            let input = network
                .create_generator_group("in", Grid3D::line(20).unwrap(), Polarity::Excitatory)
                .unwrap();
            let exc = network
                .create_group("exc", Grid3D::line(20).unwrap(), Polarity::Excitatory)
                .unwrap();
            network
                .set_neuron_model(exc, NeuronModel::regular_spiking())
                .unwrap();
            network
                .connect(
                    input,
                    exc,
                    ConnectRule::Random { prob: 0.5 },
                    RangeWeight::fixed(0.5).unwrap(),
                    RangeDelay::new(1, 10).unwrap(),
                    SynapseType::Fixed,
                )
                .unwrap();
            let mut sim = Simulator::build(network, 1234).unwrap();
            sim.set_spike_rate(0, PoissonRate::uniform(20, 30.0).unwrap(), 1)
                .unwrap();
            sim.set_spike_monitor(1).unwrap();
            sim.run(2000);
            sim
        };
        let (a, b) = (build(), build());
        assert!(a.spike_monitor(1).unwrap().total_spikes() > 0);
        for i in 0..20 {
            assert_eq!(
                a.spike_monitor(1).unwrap().spike_times(i),
                b.spike_monitor(1).unwrap().spike_times(i)
            );
        }
        assert_eq!(a.group_spike_count(0).unwrap(), b.group_spike_count(0).unwrap());
    }

    #[test]
    fn test_testing_phase_freezes_weights() {
        use super::super::plasticity::{ExcCurve, ExcStdp, StdpType};

        let mut network = Network::new();
        let input = network
            .create_generator_group("in", Grid3D::line(10).unwrap(), Polarity::Excitatory)
            .unwrap();
        let exc = network
            .create_group("exc", Grid3D::line(10).unwrap(), Polarity::Excitatory)
            .unwrap();
        network
            .set_neuron_model(exc, NeuronModel::regular_spiking())
            .unwrap();
        network
            .connect(
                input,
                exc,
                ConnectRule::Full { allow_self: true },
                RangeWeight::new(0.0, 0.2, 0.4).unwrap(),
                RangeDelay::fixed(1).unwrap(),
                SynapseType::Plastic,
            )
            .unwrap();
        network
            .set_exc_stdp(
                exc,
                ExcStdp {
                    kind: StdpType::Standard,
                    curve: ExcCurve::Exponential {
                        alpha_plus: 0.1,
                        tau_plus: 20.0,
                        alpha_minus: -0.12,
                        tau_minus: 20.0,
                    },
                },
            )
            .unwrap();

        let mut sim = Simulator::build(network, 7).unwrap();
        sim.set_spike_rate(0, PoissonRate::uniform(10, 40.0).unwrap(), 1)
            .unwrap();
        sim.set_uniform_external_current(1, 6.0).unwrap();

        sim.start_testing();
        let before = sim.weights(0).unwrap();
        sim.run(3000);
        assert_eq!(sim.weights(0).unwrap(), before);
        sim.stop_testing();
        sim.run(3000);
        assert_ne!(sim.weights(0).unwrap(), before);
    }

    #[test]
    fn test_plastic_weights_stay_in_range() {
        use super::super::plasticity::{ExcCurve, ExcStdp, StdpType};

        let mut network = Network::new();
        let input = network
            .create_generator_group("in", Grid3D::line(5).unwrap(), Polarity::Excitatory)
            .unwrap();
        let exc = network
            .create_group("exc", Grid3D::line(5).unwrap(), Polarity::Excitatory)
            .unwrap();
        network
            .set_neuron_model(exc, NeuronModel::regular_spiking())
            .unwrap();
        network
            .connect(
                input,
                exc,
                ConnectRule::Full { allow_self: true },
                RangeWeight::new(0.0, 0.1, 0.15).unwrap(),
                RangeDelay::fixed(1).unwrap(),
                SynapseType::Plastic,
            )
            .unwrap();
        network
            .set_exc_stdp(
                exc,
                ExcStdp {
                    kind: StdpType::Standard,
                    curve: ExcCurve::Exponential {
                        alpha_plus: 0.5,
                        tau_plus: 20.0,
                        alpha_minus: -0.6,
                        tau_minus: 20.0,
                    },
                },
            )
            .unwrap();

        let mut sim = Simulator::build(network, 99).unwrap();
        sim.set_spike_rate(0, PoissonRate::uniform(5, 50.0).unwrap(), 1)
            .unwrap();
        sim.set_uniform_external_current(1, 8.0).unwrap();
        sim.run(5000);

        for (_, _, wt) in sim.weights(0).unwrap() {
            assert!((0.0..=0.15).contains(&wt), "weight {} out of range", wt);
        }
    }
}
