//! Module implementing connections between neuron groups.
//!
//! A connection describes how the neurons of a pre-synaptic group project onto
//! the neurons of a post-synaptic group: the wiring rule, the weight and delay
//! ranges, the receptive field, and whether the resulting synapses are plastic.
//! Connections are specifications; the network builder expands them into
//! concrete synapses.

use std::fmt;

use itertools::iproduct;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::error::SnnError;
use super::grid::RadiusRF;
use super::group::Group;

/// Largest admissible axonal delay (ms). Spike propagation keeps a ring buffer
/// of this many one-ms slots.
pub const MAX_DELAY: u8 = 64;

/// Weight range of a connection, as magnitudes.
///
/// Synapses are created at `init` and, when plastic, clamped to `[min, max]`.
/// The sign of the stored weight is determined by the pre-synaptic group's
/// polarity, not by the range.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub struct RangeWeight {
    pub min: f32,
    pub init: f32,
    pub max: f32,
}

impl RangeWeight {
    pub fn new(min: f32, init: f32, max: f32) -> Result<Self, SnnError> {
        if !(0.0 <= min && min <= init && init <= max) {
            return Err(SnnError::InvalidParameter(
                "Weight range requires 0 <= min <= init <= max".to_string(),
            ));
        }
        Ok(RangeWeight { min, init, max })
    }

    /// A degenerate range for fixed synapses.
    pub fn fixed(weight: f32) -> Result<Self, SnnError> {
        RangeWeight::new(weight, weight, weight)
    }
}

/// Delay range of a connection, in whole milliseconds.
///
/// A synapse with delay `d` delivers a spike fired during tick `t` at the
/// start of tick `t + d - 1`, which together with the end-of-tick membrane
/// update amounts to `d` ms from membrane to membrane.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub struct RangeDelay {
    pub min: u8,
    pub max: u8,
}

impl RangeDelay {
    pub fn new(min: u8, max: u8) -> Result<Self, SnnError> {
        if min < 1 || min > max || max > MAX_DELAY {
            return Err(SnnError::InvalidParameter(format!(
                "Delay range requires 1 <= min <= max <= {}",
                MAX_DELAY
            )));
        }
        Ok(RangeDelay { min, max })
    }

    pub fn fixed(delay: u8) -> Result<Self, SnnError> {
        RangeDelay::new(delay, delay)
    }

    fn sample<R: Rng>(&self, rng: &mut R) -> u8 {
        if self.min == self.max {
            self.min
        } else {
            rng.gen_range(self.min..=self.max)
        }
    }
}

/// Whether the synapses of a connection learn.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum SynapseType {
    /// Weights stay at their initial value.
    Fixed,
    /// Weights are updated by STDP and homeostasis, when enabled on the
    /// post-synaptic group.
    Plastic,
}

/// One synapse produced by expanding a connection, with group-relative ids.
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct SynapseSpec {
    pub pre: usize,
    pub post: usize,
    /// Weight magnitude; the pre-group polarity supplies the sign.
    pub weight: f32,
    pub max_weight: f32,
    pub delay: u8,
}

/// User-defined wiring, called once for every admissible pre/post pair.
pub trait ConnectionGenerator {
    /// Returns the synapse for the pair, or `None` to leave it unconnected.
    /// `pre` and `post` are group-relative neuron indices.
    fn connect(&self, pre: usize, post: usize) -> Option<SynapseSpec>;
}

impl<F> ConnectionGenerator for F
where
    F: Fn(usize, usize) -> Option<SynapseSpec>,
{
    fn connect(&self, pre: usize, post: usize) -> Option<SynapseSpec> {
        self(pre, post)
    }
}

/// The wiring rule of a connection.
pub enum ConnectRule {
    /// Every admissible pair is connected.
    Full { allow_self: bool },
    /// Neuron `i` of the pre-group connects to neuron `i` of the post-group.
    /// Requires both groups to have the same size.
    OneToOne,
    /// Every admissible pair is connected independently with probability `prob`.
    Random { prob: f64 },
    /// Every in-field pair is connected independently with probability `prob`,
    /// with the initial weight scaled by a Gaussian of the normalized receptive
    /// field distance. Pairs whose scale factor falls below 0.1 are dropped.
    Gaussian { prob: f64 },
    /// Wiring fully delegated to a user callback.
    Custom(Box<dyn ConnectionGenerator + Send + Sync>),
}

impl fmt::Debug for ConnectRule {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConnectRule::Full { allow_self } => {
                f.debug_struct("Full").field("allow_self", allow_self).finish()
            }
            ConnectRule::OneToOne => write!(f, "OneToOne"),
            ConnectRule::Random { prob } => {
                f.debug_struct("Random").field("prob", prob).finish()
            }
            ConnectRule::Gaussian { prob } => {
                f.debug_struct("Gaussian").field("prob", prob).finish()
            }
            ConnectRule::Custom(_) => write!(f, "Custom"),
        }
    }
}

/// A projection from one group onto another.
#[derive(Debug)]
pub struct Connection {
    id: usize,
    pub(crate) pre_group: usize,
    pub(crate) post_group: usize,
    pub(crate) rule: ConnectRule,
    pub(crate) weight: RangeWeight,
    pub(crate) delay: RangeDelay,
    pub(crate) radius: RadiusRF,
    pub(crate) syn_type: SynapseType,
    /// Receptor-specific gain on the fast conductances (AMPA, GABAa).
    pub(crate) mul_fast: f32,
    /// Receptor-specific gain on the slow conductances (NMDA, GABAb).
    pub(crate) mul_slow: f32,
    /// Filled in when the connection is expanded.
    pub(crate) num_synapses: usize,
}

impl Connection {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: usize,
        pre_group: usize,
        post_group: usize,
        rule: ConnectRule,
        weight: RangeWeight,
        delay: RangeDelay,
        radius: RadiusRF,
        syn_type: SynapseType,
    ) -> Self {
        Connection {
            id,
            pre_group,
            post_group,
            rule,
            weight,
            delay,
            radius,
            syn_type,
            mul_fast: 1.0,
            mul_slow: 1.0,
            num_synapses: 0,
        }
    }

    /// Returns the connection id.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Returns the id of the pre-synaptic group.
    pub fn pre_group(&self) -> usize {
        self.pre_group
    }

    /// Returns the id of the post-synaptic group.
    pub fn post_group(&self) -> usize {
        self.post_group
    }

    /// Returns whether the synapses of the connection are plastic.
    pub fn is_plastic(&self) -> bool {
        self.syn_type == SynapseType::Plastic
    }

    /// Returns the number of synapses the connection expanded into.
    pub fn num_synapses(&self) -> usize {
        self.num_synapses
    }

    /// Expands the connection into concrete synapses.
    ///
    /// Pairs are visited post-major so that the synapse order, and with it the
    /// stream of random draws, is reproducible for a fixed seed.
    pub(crate) fn expand<R: Rng>(
        &self,
        pre: &Group,
        post: &Group,
        rng: &mut R,
    ) -> Result<Vec<SynapseSpec>, SnnError> {
        let same_group = pre.id() == post.id();
        let mut synapses = Vec::new();

        match &self.rule {
            ConnectRule::Full { allow_self } => {
                for (j, i) in iproduct!(0..post.size(), 0..pre.size()) {
                    if same_group && i == j && !allow_self {
                        continue;
                    }
                    if !self
                        .radius
                        .contains(&pre.grid().location(i), &post.grid().location(j))
                    {
                        continue;
                    }
                    synapses.push(SynapseSpec {
                        pre: i,
                        post: j,
                        weight: self.weight.init,
                        max_weight: self.weight.max,
                        delay: self.delay.sample(rng),
                    });
                }
            }
            ConnectRule::OneToOne => {
                if pre.size() != post.size() {
                    return Err(SnnError::SizeMismatch {
                        expected: pre.size(),
                        found: post.size(),
                    });
                }
                for i in 0..pre.size() {
                    synapses.push(SynapseSpec {
                        pre: i,
                        post: i,
                        weight: self.weight.init,
                        max_weight: self.weight.max,
                        delay: self.delay.sample(rng),
                    });
                }
            }
            ConnectRule::Random { prob } => {
                if !(0.0..=1.0).contains(prob) {
                    return Err(SnnError::InvalidParameter(
                        "Connection probability must lie in [0, 1]".to_string(),
                    ));
                }
                for j in 0..post.size() {
                    let post_loc = post.grid().location(j);
                    for i in 0..pre.size() {
                        if same_group && i == j {
                            continue;
                        }
                        let pre_loc = pre.grid().location(i);
                        if !self.radius.contains(&pre_loc, &post_loc) {
                            continue;
                        }
                        if rng.gen::<f64>() < *prob {
                            synapses.push(SynapseSpec {
                                pre: i,
                                post: j,
                                weight: self.weight.init,
                                max_weight: self.weight.max,
                                delay: self.delay.sample(rng),
                            });
                        }
                    }
                }
            }
            ConnectRule::Gaussian { prob } => {
                if !(0.0..=1.0).contains(prob) {
                    return Err(SnnError::InvalidParameter(
                        "Connection probability must lie in [0, 1]".to_string(),
                    ));
                }
                for j in 0..post.size() {
                    let post_loc = post.grid().location(j);
                    for i in 0..pre.size() {
                        if same_group && i == j {
                            continue;
                        }
                        let pre_loc = pre.grid().location(i);
                        let dist = match self.radius.distance(&pre_loc, &post_loc) {
                            Some(d) if d <= 1.0 => d,
                            _ => continue,
                        };
                        // exp(-2.3026 x) == 10^-x, so the scale drops one
                        // decade from center to the edge of the field
                        let gauss = (-2.3026 * dist).exp() as f32;
                        if gauss < 0.1 {
                            continue;
                        }
                        if rng.gen::<f64>() < *prob {
                            synapses.push(SynapseSpec {
                                pre: i,
                                post: j,
                                weight: gauss * self.weight.init,
                                max_weight: self.weight.max,
                                delay: self.delay.sample(rng),
                            });
                        }
                    }
                }
            }
            ConnectRule::Custom(generator) => {
                for (j, i) in iproduct!(0..post.size(), 0..pre.size()) {
                    if let Some(syn) = generator.connect(i, j) {
                        if syn.pre != i || syn.post != j {
                            return Err(SnnError::InvalidOperation(
                                "Connection generator returned a synapse for a different pair"
                                    .to_string(),
                            ));
                        }
                        if syn.delay < 1 || syn.delay > MAX_DELAY {
                            return Err(SnnError::InvalidParameter(format!(
                                "Generated delay {} outside [1, {}]",
                                syn.delay, MAX_DELAY
                            )));
                        }
                        if !(syn.weight >= 0.0 && syn.weight <= syn.max_weight) {
                            return Err(SnnError::InvalidParameter(format!(
                                "Generated weight {} outside [0, {}]",
                                syn.weight, syn.max_weight
                            )));
                        }
                        synapses.push(syn);
                    }
                }
            }
        }

        Ok(synapses)
    }
}
