//! Module implementing neuron groups.
//!
//! A group is a homogeneous population of neurons: it carries the grid layout,
//! the neuron model with its parameter distributions, and the group-level
//! plasticity and neuromodulator settings. Groups are created through the
//! network builder; this module only defines their configuration and state.

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::error::SnnError;
use super::grid::{Grid3D, Point3D};
use super::plasticity::{ExcStdp, HomeostasisConfig, InhStdp, StpConfig};

/// The sign of the neurotransmitter released by a group.
///
/// All outgoing synapses of an excitatory group carry positive weights, all
/// outgoing synapses of an inhibitory group negative ones.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum Polarity {
    Excitatory,
    Inhibitory,
}

impl Polarity {
    /// The sign applied to the magnitude of outgoing weights.
    pub(crate) fn sign(&self) -> f32 {
        match self {
            Polarity::Excitatory => 1.0,
            Polarity::Inhibitory => -1.0,
        }
    }
}

/// A neuron parameter given as a mean and a spread.
///
/// Per-neuron values are drawn as `mean + sd * U[0, 1)` when the group is
/// instantiated, introducing heterogeneity across an otherwise homogeneous
/// population.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub struct ParamDist {
    pub mean: f32,
    pub sd: f32,
}

impl ParamDist {
    pub fn new(mean: f32, sd: f32) -> Self {
        ParamDist { mean, sd }
    }

    /// A parameter identical for every neuron in the group.
    pub fn fixed(mean: f32) -> Self {
        ParamDist { mean, sd: 0.0 }
    }

    pub(crate) fn sample<R: Rng>(&self, rng: &mut R) -> f32 {
        self.mean + self.sd * rng.gen::<f32>()
    }
}

/// The Izhikevich neuron model of a group.
///
/// The four-parameter variant is the dimensionless 2003 model
///
/// dv/dt = 0.04 v^2 + 5 v + 140 - u + I
/// du/dt = a (b v - u)
///
/// with a spike emitted at v >= 30 mV, after which v <- c and u <- u + d.
///
/// The nine-parameter variant restores physical units (2007 book model):
///
/// C dv/dt = k (v - v_r)(v - v_t) - u + I
/// du/dt = a (b (v - v_r) - u)
///
/// with a spike at v >= v_peak.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub enum NeuronModel {
    FourParam {
        a: ParamDist,
        b: ParamDist,
        c: ParamDist,
        d: ParamDist,
    },
    NineParam {
        c_m: ParamDist,
        k: ParamDist,
        v_r: ParamDist,
        v_t: ParamDist,
        v_peak: ParamDist,
        a: ParamDist,
        b: ParamDist,
        c: ParamDist,
        d: ParamDist,
    },
}

impl NeuronModel {
    /// The four-parameter regular spiking cell (a=0.02, b=0.2, c=-65, d=8).
    pub fn regular_spiking() -> Self {
        NeuronModel::FourParam {
            a: ParamDist::fixed(0.02),
            b: ParamDist::fixed(0.2),
            c: ParamDist::fixed(-65.0),
            d: ParamDist::fixed(8.0),
        }
    }

    /// The four-parameter fast spiking cell (a=0.1, b=0.2, c=-65, d=2).
    pub fn fast_spiking() -> Self {
        NeuronModel::FourParam {
            a: ParamDist::fixed(0.1),
            b: ParamDist::fixed(0.2),
            c: ParamDist::fixed(-65.0),
            d: ParamDist::fixed(2.0),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), SnnError> {
        if let NeuronModel::NineParam { c_m, k, .. } = self {
            if c_m.mean <= 0.0 || k.mean <= 0.0 {
                return Err(SnnError::InvalidParameter(
                    "Nine-parameter model requires positive capacitance and rheobase slope"
                        .to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Draws the concrete parameters of one neuron.
    pub(crate) fn sample<R: Rng>(&self, rng: &mut R) -> NeuronParams {
        match self {
            NeuronModel::FourParam { a, b, c, d } => {
                let c = c.sample(rng);
                NeuronParams {
                    nine_param: false,
                    c_m: 0.0,
                    k: 0.0,
                    v_r: 0.0,
                    v_t: 0.0,
                    v_peak: 30.0,
                    a: a.sample(rng),
                    b: b.sample(rng),
                    c,
                    d: d.sample(rng),
                }
            }
            NeuronModel::NineParam {
                c_m,
                k,
                v_r,
                v_t,
                v_peak,
                a,
                b,
                c,
                d,
            } => NeuronParams {
                nine_param: true,
                c_m: c_m.sample(rng),
                k: k.sample(rng),
                v_r: v_r.sample(rng),
                v_t: v_t.sample(rng),
                v_peak: v_peak.sample(rng),
                a: a.sample(rng),
                b: b.sample(rng),
                c: c.sample(rng),
                d: d.sample(rng),
            },
        }
    }
}

/// Concrete, sampled parameters of a single neuron.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub(crate) struct NeuronParams {
    pub nine_param: bool,
    pub c_m: f32,
    pub k: f32,
    pub v_r: f32,
    pub v_t: f32,
    pub v_peak: f32,
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
}

impl NeuronParams {
    /// Resting membrane voltage of this neuron.
    pub(crate) fn rest_voltage(&self) -> f32 {
        if self.nine_param {
            self.v_r
        } else {
            self.c
        }
    }

    /// Recovery variable at rest.
    pub(crate) fn rest_recovery(&self) -> f32 {
        if self.nine_param {
            0.0
        } else {
            self.b * self.rest_voltage()
        }
    }
}

/// The neuromodulator state of a group.
///
/// The dopamine concentration decays exponentially toward its baseline with
/// time constant `tau` and is incremented by every spike delivered through a
/// dopaminergic synapse targeting the group.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub struct DopamineConfig {
    pub base: f32,
    pub tau: f32,
}

impl Default for DopamineConfig {
    fn default() -> Self {
        DopamineConfig {
            base: 1.0,
            tau: 100.0,
        }
    }
}

impl DopamineConfig {
    pub fn new(base: f32, tau: f32) -> Result<Self, SnnError> {
        // tau below 1 ms would make the decay factor negative
        if base < 0.0 || tau < 1.0 {
            return Err(SnnError::InvalidParameter(
                "Dopamine baseline must be non-negative and its time constant at least 1 ms"
                    .to_string(),
            ));
        }
        Ok(DopamineConfig { base, tau })
    }

    /// Per-ms decay factor toward the baseline. Lies in `[0, 1)` since `new`
    /// requires `tau >= 1`.
    pub(crate) fn decay(&self) -> f32 {
        1.0 - 1.0 / self.tau
    }
}

/// A population of neurons sharing a model and group-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    id: usize,
    name: String,
    grid: Grid3D,
    polarity: Polarity,
    /// Global id of the first neuron of the group.
    pub(crate) start: usize,
    /// `None` for spike generator groups, which have no membrane dynamics.
    pub(crate) model: Option<NeuronModel>,
    pub(crate) is_generator: bool,
    /// Whether outgoing spikes release dopamine onto their target groups.
    pub(crate) dopaminergic: bool,
    pub(crate) dopamine: DopamineConfig,
    pub(crate) stp: Option<StpConfig>,
    pub(crate) exc_stdp: Option<ExcStdp>,
    pub(crate) inh_stdp: Option<InhStdp>,
    pub(crate) homeostasis: Option<HomeostasisConfig>,
}

impl Group {
    pub(crate) fn new(
        id: usize,
        name: String,
        grid: Grid3D,
        polarity: Polarity,
        start: usize,
        model: Option<NeuronModel>,
    ) -> Self {
        Group {
            id,
            name,
            grid,
            polarity,
            start,
            model: model.clone(),
            is_generator: model.is_none(),
            dopaminergic: false,
            dopamine: DopamineConfig::default(),
            stp: None,
            exc_stdp: None,
            inh_stdp: None,
            homeostasis: None,
        }
    }

    /// Returns the group id.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Returns the group name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the grid the group's neurons are arranged on.
    pub fn grid(&self) -> &Grid3D {
        &self.grid
    }

    /// Returns the polarity of the group.
    pub fn polarity(&self) -> Polarity {
        self.polarity
    }

    /// Returns the number of neurons in the group.
    pub fn size(&self) -> usize {
        self.grid.num_neurons()
    }

    /// Returns the global id of the first neuron of the group.
    pub fn start(&self) -> usize {
        self.start
    }

    /// Returns the global id one past the last neuron of the group.
    pub fn end(&self) -> usize {
        self.start + self.size()
    }

    /// Checks whether the global neuron id belongs to this group.
    pub fn contains(&self, neuron_id: usize) -> bool {
        (self.start..self.end()).contains(&neuron_id)
    }

    /// Returns whether the group is a spike generator group.
    pub fn is_generator(&self) -> bool {
        self.is_generator
    }

    /// Returns the grid location of a neuron by its global id.
    pub fn location(&self, neuron_id: usize) -> Point3D {
        debug_assert!(self.contains(neuron_id));
        self.grid.location(neuron_id - self.start)
    }

    /// Returns whether STDP is enabled on any afferents of the group.
    pub fn has_stdp(&self) -> bool {
        self.exc_stdp.is_some() || self.inh_stdp.is_some()
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;

    #[test]
    fn test_param_dist_sampling() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let dist = ParamDist::new(-65.0, 5.0);
        for _ in 0..100 {
            let v = dist.sample(&mut rng);
            assert!((-65.0..-60.0).contains(&v));
        }
        assert_eq!(ParamDist::fixed(8.0).sample(&mut rng), 8.0);
    }

    #[test]
    fn test_neuron_params_rest_state() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let params = NeuronModel::regular_spiking().sample(&mut rng);
        assert_eq!(params.rest_voltage(), -65.0);
        assert_eq!(params.rest_recovery(), 0.2 * -65.0);
        assert_eq!(params.v_peak, 30.0);

        let nine = NeuronModel::NineParam {
            c_m: ParamDist::fixed(100.0),
            k: ParamDist::fixed(0.7),
            v_r: ParamDist::fixed(-60.0),
            v_t: ParamDist::fixed(-40.0),
            v_peak: ParamDist::fixed(35.0),
            a: ParamDist::fixed(0.03),
            b: ParamDist::fixed(-2.0),
            c: ParamDist::fixed(-50.0),
            d: ParamDist::fixed(100.0),
        };
        assert!(nine.validate().is_ok());
        let params = nine.sample(&mut rng);
        assert_eq!(params.rest_voltage(), -60.0);
        assert_eq!(params.rest_recovery(), 0.0);
    }

    #[test]
    fn test_nine_param_validation() {
        let bad = NeuronModel::NineParam {
            c_m: ParamDist::fixed(-1.0),
            k: ParamDist::fixed(0.7),
            v_r: ParamDist::fixed(-60.0),
            v_t: ParamDist::fixed(-40.0),
            v_peak: ParamDist::fixed(35.0),
            a: ParamDist::fixed(0.03),
            b: ParamDist::fixed(-2.0),
            c: ParamDist::fixed(-50.0),
            d: ParamDist::fixed(100.0),
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_group_ranges() {
        let group = Group::new(
            1,
            "exc".to_string(),
            Grid3D::new(4, 5, 1).unwrap(),
            Polarity::Excitatory,
            100,
            Some(NeuronModel::regular_spiking()),
        );
        assert_eq!(group.size(), 20);
        assert_eq!(group.end(), 120);
        assert!(group.contains(100) && group.contains(119));
        assert!(!group.contains(120));
        assert!(!group.is_generator());

        let generator = Group::new(
            2,
            "input".to_string(),
            Grid3D::line(10).unwrap(),
            Polarity::Excitatory,
            120,
            None,
        );
        assert!(generator.is_generator());
    }

    #[test]
    fn test_dopamine_decay() {
        let da = DopamineConfig::default();
        assert_eq!(da.decay(), 1.0 - 1.0 / 100.0);
        assert!(DopamineConfig::new(1.0, 0.0).is_err());
        // sub-ms time constants would flip the sign of the decay factor
        assert!(DopamineConfig::new(1.0, 0.5).is_err());
        assert!(DopamineConfig::new(1.0, 1.0).is_ok());
    }
}
