//! Module implementing the flattened synapse tables.
//!
//! Synapses are stored twice: once grouped by post-synaptic neuron (the
//! afferent view, which carries the mutable weight state and is what
//! plasticity operates on) and once grouped by pre-synaptic neuron sorted by
//! delay (the efferent view, which spike delivery walks). The efferent
//! entries point back into the afferent arrays, so the weight of a synapse
//! lives in exactly one place.

use super::connection::MAX_DELAY;

/// Per-connection constants shared by all its synapses.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ConnMeta {
    pub pre_group: usize,
    pub post_group: usize,
    /// Sign of the pre-synaptic group: inhibitory synapses store negative
    /// weights and target the GABA receptors.
    pub inhibitory: bool,
    pub plastic: bool,
    /// Whether delivered spikes release dopamine onto the post group.
    pub dopaminergic: bool,
    pub mul_fast: f32,
    pub mul_slow: f32,
}

/// One entry of the efferent view: a synapse leaving a neuron.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PostSyn {
    /// Global id of the post-synaptic neuron.
    pub target: u32,
    /// Absolute index of the synapse in the afferent arrays.
    pub slot: u32,
    pub delay: u8,
}

/// A synapse as produced by expanding the connections, with global neuron ids
/// and a signed weight.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BuiltSynapse {
    pub pre: u32,
    pub post: u32,
    pub wt: f32,
    pub max_wt: f32,
    pub delay: u8,
    pub conn: u16,
    pub plastic: bool,
}

/// The flattened synapse tables of a built network.
#[derive(Debug)]
pub(crate) struct SynapseStore {
    num_neurons: usize,
    max_delay: u8,

    // afferent view, grouped by post neuron with plastic synapses first
    cum_pre: Vec<usize>,
    num_pre_plastic: Vec<usize>,
    pub wt: Vec<f32>,
    pub max_wt: Vec<f32>,
    pub wt_change: Vec<f32>,
    /// Arrival time of the last pre-synaptic spike at each synapse.
    pub syn_spike_time: Vec<u32>,
    pub pre_id: Vec<u32>,
    pub conn_of: Vec<u16>,

    // efferent view, grouped by pre neuron and sorted by delay
    cum_post: Vec<usize>,
    post_syn: Vec<PostSyn>,

    metas: Vec<ConnMeta>,
}

impl SynapseStore {
    pub fn build(num_neurons: usize, synapses: &[BuiltSynapse], metas: Vec<ConnMeta>) -> Self {
        debug_assert!(synapses
            .iter()
            .all(|s| s.delay >= 1 && s.delay <= MAX_DELAY));

        // afferent layout: plastic synapses first within each post slice, so
        // that plasticity scans touch a contiguous prefix
        let mut num_pre = vec![0usize; num_neurons];
        let mut num_pre_plastic = vec![0usize; num_neurons];
        for syn in synapses {
            num_pre[syn.post as usize] += 1;
            if syn.plastic {
                num_pre_plastic[syn.post as usize] += 1;
            }
        }
        let mut cum_pre = vec![0usize; num_neurons + 1];
        for i in 0..num_neurons {
            cum_pre[i + 1] = cum_pre[i] + num_pre[i];
        }

        let total = synapses.len();
        let mut wt = vec![0.0f32; total];
        let mut max_wt = vec![0.0f32; total];
        let mut pre_id = vec![0u32; total];
        let mut conn_of = vec![0u16; total];
        let mut slot_of = vec![0usize; total];

        let mut next_plastic: Vec<usize> = cum_pre[..num_neurons].to_vec();
        let mut next_fixed: Vec<usize> = (0..num_neurons)
            .map(|i| cum_pre[i] + num_pre_plastic[i])
            .collect();
        for (k, syn) in synapses.iter().enumerate() {
            let post = syn.post as usize;
            let slot = if syn.plastic {
                let s = next_plastic[post];
                next_plastic[post] += 1;
                s
            } else {
                let s = next_fixed[post];
                next_fixed[post] += 1;
                s
            };
            wt[slot] = syn.wt;
            max_wt[slot] = syn.max_wt;
            pre_id[slot] = syn.pre;
            conn_of[slot] = syn.conn;
            slot_of[k] = slot;
        }

        // efferent layout, sorted by delay per pre neuron
        let mut num_post = vec![0usize; num_neurons];
        for syn in synapses {
            num_post[syn.pre as usize] += 1;
        }
        let mut cum_post = vec![0usize; num_neurons + 1];
        for i in 0..num_neurons {
            cum_post[i + 1] = cum_post[i] + num_post[i];
        }
        let mut post_syn = vec![
            PostSyn {
                target: 0,
                slot: 0,
                delay: 0
            };
            total
        ];
        let mut next_post: Vec<usize> = cum_post[..num_neurons].to_vec();
        for (k, syn) in synapses.iter().enumerate() {
            let pre = syn.pre as usize;
            post_syn[next_post[pre]] = PostSyn {
                target: syn.post,
                slot: slot_of[k] as u32,
                delay: syn.delay,
            };
            next_post[pre] += 1;
        }
        for i in 0..num_neurons {
            post_syn[cum_post[i]..cum_post[i + 1]].sort_by_key(|s| s.delay);
        }

        let max_delay = synapses.iter().map(|s| s.delay).max().unwrap_or(1);

        SynapseStore {
            num_neurons,
            max_delay,
            cum_pre,
            num_pre_plastic,
            wt,
            max_wt,
            wt_change: vec![0.0; total],
            syn_spike_time: vec![u32::MAX; total],
            pre_id,
            conn_of,
            cum_post,
            post_syn,
            metas,
        }
    }

    pub fn num_synapses(&self) -> usize {
        self.wt.len()
    }

    /// Largest delay of any synapse, at least 1.
    pub fn max_delay(&self) -> u8 {
        self.max_delay
    }

    pub fn meta(&self, conn: u16) -> &ConnMeta {
        &self.metas[conn as usize]
    }

    /// Slot range of all afferent synapses of a neuron.
    pub fn afferents(&self, post: usize) -> std::ops::Range<usize> {
        self.cum_pre[post]..self.cum_pre[post + 1]
    }

    /// Slot range of the plastic afferent synapses of a neuron.
    pub fn plastic_afferents(&self, post: usize) -> std::ops::Range<usize> {
        self.cum_pre[post]..self.cum_pre[post] + self.num_pre_plastic[post]
    }

    /// Efferent synapses of a neuron with exactly the given delay.
    pub fn efferents_with_delay(&self, pre: usize, delay: u8) -> &[PostSyn] {
        &self.post_syn[self.efferent_slots_with_delay(pre, delay)]
    }

    /// Absolute efferent-array indices of the synapses of a neuron with
    /// exactly the given delay. Index-based access keeps delivery loops free
    /// of long-lived borrows of the store.
    pub fn efferent_slots_with_delay(&self, pre: usize, delay: u8) -> std::ops::Range<usize> {
        let base = self.cum_post[pre];
        let slice = &self.post_syn[base..self.cum_post[pre + 1]];
        let lo = slice.partition_point(|s| s.delay < delay);
        let hi = slice.partition_point(|s| s.delay <= delay);
        base + lo..base + hi
    }

    pub fn post_syn_at(&self, idx: usize) -> PostSyn {
        self.post_syn[idx]
    }

    /// All efferent synapses of a neuron.
    pub fn efferents(&self, pre: usize) -> &[PostSyn] {
        &self.post_syn[self.cum_post[pre]..self.cum_post[pre + 1]]
    }

    /// Delay of every synapse, indexed by afferent slot.
    pub fn delays_by_slot(&self) -> Vec<u8> {
        let mut delays = vec![0u8; self.num_synapses()];
        for syn in &self.post_syn {
            delays[syn.slot as usize] = syn.delay;
        }
        delays
    }

    /// The post-synaptic neuron owning an afferent slot.
    pub fn post_of_slot(&self, slot: usize) -> usize {
        self.cum_pre.partition_point(|&c| c <= slot) - 1
    }

    /// Signed weights of one connection as (pre, post, weight) triplets with
    /// global neuron ids, in afferent order.
    pub fn connection_weights(&self, conn: u16) -> Vec<(usize, usize, f32)> {
        let mut out = Vec::new();
        for post in 0..self.num_neurons {
            for slot in self.afferents(post) {
                if self.conn_of[slot] == conn {
                    out.push((self.pre_id[slot] as usize, post, self.wt[slot]));
                }
            }
        }
        out
    }

    /// Delays of one connection as (pre, post, delay) triplets with global
    /// neuron ids, in afferent order.
    pub fn connection_delays(&self, conn: u16) -> Vec<(usize, usize, u8)> {
        let delays = self.delays_by_slot();
        let mut out = Vec::new();
        for post in 0..self.num_neurons {
            for slot in self.afferents(post) {
                if self.conn_of[slot] == conn {
                    out.push((self.pre_id[slot] as usize, post, delays[slot]));
                }
            }
        }
        out
    }

    /// Adds a signed delta to every weight of one connection, clamping each
    /// synapse to its bounds.
    pub fn bias_connection(&mut self, conn: u16, delta: f32) {
        for slot in 0..self.wt.len() {
            if self.conn_of[slot] == conn {
                self.wt[slot] = clamp_signed(self.wt[slot] + delta, self.max_wt[slot]);
            }
        }
    }

    /// Finds the afferent slot of the synapse of one connection between two
    /// neurons (global ids), if it exists.
    pub fn find_slot(&self, conn: u16, pre: u32, post: u32) -> Option<usize> {
        self.afferents(post as usize)
            .find(|&slot| self.conn_of[slot] == conn && self.pre_id[slot] == pre)
    }

    /// Multiplies all weights of one connection, clamping plastic synapses to
    /// their bounds. Scaling the weights of a fixed connection also scales its
    /// bounds, so the tuner can push them past the initial range.
    pub fn scale_connection(&mut self, conn: u16, factor: f32) {
        let plastic = self.metas[conn as usize].plastic;
        for slot in 0..self.wt.len() {
            if self.conn_of[slot] != conn {
                continue;
            }
            if plastic {
                self.wt[slot] = clamp_signed(self.wt[slot] * factor, self.max_wt[slot]);
            } else {
                self.wt[slot] *= factor;
                self.max_wt[slot] *= factor;
            }
        }
    }
}

/// Clamps a signed weight to `[0, max]` for excitatory synapses
/// (`max >= 0`) or `[max, 0]` for inhibitory ones.
pub(crate) fn clamp_signed(wt: f32, max_wt: f32) -> f32 {
    if max_wt >= 0.0 {
        wt.clamp(0.0, max_wt)
    } else {
        wt.clamp(max_wt, 0.0)
    }
}
