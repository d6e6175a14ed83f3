//! Module implementing the network description.
//!
//! A [`Network`] is the static description of a model: its groups, the
//! connections between them, and the network-wide settings (synapse
//! integration mode, numerical integration, weight update cadence). Building
//! it performs no simulation; the description is handed to
//! [`Simulator::build`](crate::simulator::Simulator::build), which expands it
//! into runtime state.

use log::warn;
use serde::{Deserialize, Serialize};

use super::connection::{
    ConnectRule, Connection, RangeDelay, RangeWeight, SynapseType,
};
use super::error::SnnError;
use super::grid::{Grid3D, RadiusRF};
use super::group::{DopamineConfig, Group, NeuronModel, Polarity};
use super::plasticity::{ExcStdp, HomeostasisConfig, InhStdp, StpConfig};

/// Conductance time constants (ms) for the four receptor types.
///
/// A zero rise time constant means an instantaneous rise; a positive one
/// turns the conductance into a difference of exponentials, normalized so
/// that its peak equals the delivered synaptic weight.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub struct ConductanceConfig {
    pub tau_decay_ampa: f32,
    pub tau_rise_nmda: f32,
    pub tau_decay_nmda: f32,
    pub tau_decay_gabaa: f32,
    pub tau_rise_gabab: f32,
    pub tau_decay_gabab: f32,
}

impl Default for ConductanceConfig {
    fn default() -> Self {
        ConductanceConfig {
            tau_decay_ampa: 5.0,
            tau_rise_nmda: 0.0,
            tau_decay_nmda: 150.0,
            tau_decay_gabaa: 6.0,
            tau_rise_gabab: 0.0,
            tau_decay_gabab: 150.0,
        }
    }
}

impl ConductanceConfig {
    pub fn new(
        tau_decay_ampa: f32,
        tau_rise_nmda: f32,
        tau_decay_nmda: f32,
        tau_decay_gabaa: f32,
        tau_rise_gabab: f32,
        tau_decay_gabab: f32,
    ) -> Result<Self, SnnError> {
        let config = ConductanceConfig {
            tau_decay_ampa,
            tau_rise_nmda,
            tau_decay_nmda,
            tau_decay_gabaa,
            tau_rise_gabab,
            tau_decay_gabab,
        };
        if tau_decay_ampa <= 0.0
            || tau_decay_nmda <= 0.0
            || tau_decay_gabaa <= 0.0
            || tau_decay_gabab <= 0.0
        {
            return Err(SnnError::InvalidParameter(
                "Conductance decay time constants must be positive".to_string(),
            ));
        }
        if tau_rise_nmda < 0.0 || tau_rise_gabab < 0.0 {
            return Err(SnnError::InvalidParameter(
                "Conductance rise time constants must be non-negative".to_string(),
            ));
        }
        if (tau_rise_nmda > 0.0 && tau_rise_nmda >= tau_decay_nmda)
            || (tau_rise_gabab > 0.0 && tau_rise_gabab >= tau_decay_gabab)
        {
            return Err(SnnError::InvalidParameter(
                "Conductance rise must be faster than decay".to_string(),
            ));
        }
        Ok(config)
    }

    pub(crate) fn with_nmda_rise(&self) -> bool {
        self.tau_rise_nmda > 0.0
    }

    pub(crate) fn with_gabab_rise(&self) -> bool {
        self.tau_rise_gabab > 0.0
    }

    /// Peak normalization of a dual-exponential conductance: scales the
    /// increment so that the conductance peaks at the delivered weight.
    fn dual_exp_scale(tau_rise: f32, tau_decay: f32) -> f32 {
        let t_max = -tau_decay * tau_rise * (tau_rise / tau_decay).ln() / (tau_decay - tau_rise);
        1.0 / ((-t_max / tau_decay).exp() - (-t_max / tau_rise).exp())
    }

    pub(crate) fn nmda_scale(&self) -> f32 {
        if self.with_nmda_rise() {
            Self::dual_exp_scale(self.tau_rise_nmda, self.tau_decay_nmda)
        } else {
            1.0
        }
    }

    pub(crate) fn gabab_scale(&self) -> f32 {
        if self.with_gabab_rise() {
            Self::dual_exp_scale(self.tau_rise_gabab, self.tau_decay_gabab)
        } else {
            1.0
        }
    }
}

/// Numerical integration scheme for the membrane equations.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum IntegrationMethod {
    ForwardEuler,
    RungeKutta4,
}

/// Numerical integration settings: the method and the number of substeps per
/// simulated millisecond.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub struct IntegrationConfig {
    pub method: IntegrationMethod,
    pub steps_per_ms: u32,
}

impl Default for IntegrationConfig {
    fn default() -> Self {
        IntegrationConfig {
            method: IntegrationMethod::ForwardEuler,
            steps_per_ms: 2,
        }
    }
}

impl IntegrationConfig {
    pub fn new(method: IntegrationMethod, steps_per_ms: u32) -> Result<Self, SnnError> {
        if !(1..=128).contains(&steps_per_ms) {
            return Err(SnnError::InvalidParameter(
                "Integration requires between 1 and 128 steps per ms".to_string(),
            ));
        }
        Ok(IntegrationConfig {
            method,
            steps_per_ms,
        })
    }
}

/// How often accumulated weight changes are applied to the weights.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum UpdateInterval {
    Ms10,
    Ms100,
    Ms1000,
}

impl UpdateInterval {
    pub(crate) fn ms(&self) -> u32 {
        match self {
            UpdateInterval::Ms10 => 10,
            UpdateInterval::Ms100 => 100,
            UpdateInterval::Ms1000 => 1000,
        }
    }

    /// Scale on the accumulated change when change decay is enabled, chosen so
    /// that the effective learning rate is independent of the interval.
    fn scale(&self) -> f32 {
        match self {
            UpdateInterval::Ms10 => 0.005,
            UpdateInterval::Ms100 => 0.05,
            UpdateInterval::Ms1000 => 0.5,
        }
    }
}

/// Cadence and damping of the weight update.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub struct WeightUpdateConfig {
    pub interval: UpdateInterval,
    /// When enabled, the accumulated change is scaled down before application
    /// and decays between updates instead of being consumed outright.
    pub decay_enabled: bool,
    pub change_decay: f32,
}

impl Default for WeightUpdateConfig {
    fn default() -> Self {
        WeightUpdateConfig {
            interval: UpdateInterval::Ms1000,
            decay_enabled: true,
            change_decay: 0.9,
        }
    }
}

impl WeightUpdateConfig {
    pub fn new(
        interval: UpdateInterval,
        decay_enabled: bool,
        change_decay: f32,
    ) -> Result<Self, SnnError> {
        if decay_enabled && !(0.0..1.0).contains(&change_decay) {
            return Err(SnnError::InvalidParameter(
                "Weight change decay must lie in [0, 1)".to_string(),
            ));
        }
        Ok(WeightUpdateConfig {
            interval,
            decay_enabled,
            change_decay,
        })
    }

    pub(crate) fn scale(&self) -> f32 {
        if self.decay_enabled {
            self.interval.scale()
        } else {
            1.0
        }
    }

    pub(crate) fn decay(&self) -> f32 {
        if self.decay_enabled {
            self.change_decay
        } else {
            0.0
        }
    }
}

/// The static description of a spiking network.
#[derive(Debug, Default)]
pub struct Network {
    pub(crate) groups: Vec<Group>,
    pub(crate) connections: Vec<Connection>,
    num_neurons: usize,
    /// `None` runs current-based (CUBA) synapses; `Some` conductance-based
    /// (COBA) ones.
    pub(crate) conductances: Option<ConductanceConfig>,
    pub(crate) integration: IntegrationConfig,
    pub(crate) weight_update: WeightUpdateConfig,
}

impl Network {
    /// An empty network with conductance-based synapses and default settings.
    pub fn new() -> Self {
        Network {
            groups: Vec::new(),
            connections: Vec::new(),
            num_neurons: 0,
            conductances: Some(ConductanceConfig::default()),
            integration: IntegrationConfig::default(),
            weight_update: WeightUpdateConfig::default(),
        }
    }

    /// Creates a group of neurons and returns its id. The neuron model must be
    /// set through [`Network::set_neuron_model`] before the network is built.
    pub fn create_group(
        &mut self,
        name: &str,
        grid: Grid3D,
        polarity: Polarity,
    ) -> Result<usize, SnnError> {
        self.push_group(name, grid, polarity, None)
    }

    /// Creates a spike generator group and returns its id. Generator neurons
    /// have no membrane dynamics and fire according to a Poisson rate or a
    /// user-supplied schedule.
    pub fn create_generator_group(
        &mut self,
        name: &str,
        grid: Grid3D,
        polarity: Polarity,
    ) -> Result<usize, SnnError> {
        let id = self.push_group(name, grid, polarity, None)?;
        self.groups[id].is_generator = true;
        Ok(id)
    }

    fn push_group(
        &mut self,
        name: &str,
        grid: Grid3D,
        polarity: Polarity,
        model: Option<NeuronModel>,
    ) -> Result<usize, SnnError> {
        if name.is_empty() {
            return Err(SnnError::InvalidParameter(
                "Group names must not be empty".to_string(),
            ));
        }
        if self.groups.iter().any(|g| g.name() == name) {
            return Err(SnnError::InvalidParameter(format!(
                "Group name '{}' already taken",
                name
            )));
        }
        let id = self.groups.len();
        let group = Group::new(id, name.to_string(), grid, polarity, self.num_neurons, model);
        self.num_neurons += group.size();
        self.groups.push(group);
        Ok(id)
    }

    /// Sets the Izhikevich model of a group.
    pub fn set_neuron_model(&mut self, group: usize, model: NeuronModel) -> Result<(), SnnError> {
        model.validate()?;
        let group = self.group_mut(group)?;
        if group.is_generator() {
            return Err(SnnError::InvalidOperation(
                "Spike generator groups have no membrane dynamics".to_string(),
            ));
        }
        group.model = Some(model);
        Ok(())
    }

    /// Connects two groups and returns the connection id.
    pub fn connect(
        &mut self,
        pre: usize,
        post: usize,
        rule: ConnectRule,
        weight: RangeWeight,
        delay: RangeDelay,
        syn_type: SynapseType,
    ) -> Result<usize, SnnError> {
        self.connect_topographic(pre, post, rule, weight, delay, RadiusRF::unbounded(), syn_type)
    }

    /// Connects two groups, restricting pairs to the given receptive field.
    #[allow(clippy::too_many_arguments)]
    pub fn connect_topographic(
        &mut self,
        pre: usize,
        post: usize,
        rule: ConnectRule,
        weight: RangeWeight,
        delay: RangeDelay,
        radius: RadiusRF,
        syn_type: SynapseType,
    ) -> Result<usize, SnnError> {
        self.group(pre)?;
        if self.group(post)?.is_generator() {
            return Err(SnnError::InvalidOperation(
                "Spike generator groups cannot receive synapses".to_string(),
            ));
        }
        if let ConnectRule::Random { prob } = rule {
            if !(0.0..=1.0).contains(&prob) {
                return Err(SnnError::InvalidParameter(
                    "Connection probability must lie in [0, 1]".to_string(),
                ));
            }
        }
        if syn_type == SynapseType::Fixed && weight.init != weight.max {
            return Err(SnnError::InvalidParameter(
                "Fixed connections need init == max weight".to_string(),
            ));
        }
        if syn_type == SynapseType::Plastic && self.group(pre)?.is_generator() {
            // allowed, but STDP on generator afferents only sees delivery times
            warn!(
                "plastic synapses from generator group {}: pre spike times come from the scheduler",
                pre
            );
        }
        let id = self.connections.len();
        self.connections.push(Connection::new(
            id, pre, post, rule, weight, delay, radius, syn_type,
        ));
        Ok(id)
    }

    /// Sets the receptor-specific gains of a connection: `mul_fast` scales the
    /// fast conductances (AMPA, GABAa), `mul_slow` the slow ones (NMDA,
    /// GABAb).
    pub fn set_receptor_gain(
        &mut self,
        connection: usize,
        mul_fast: f32,
        mul_slow: f32,
    ) -> Result<(), SnnError> {
        if mul_fast < 0.0 || mul_slow < 0.0 {
            return Err(SnnError::InvalidParameter(
                "Receptor gains must be non-negative".to_string(),
            ));
        }
        let conn = self
            .connections
            .get_mut(connection)
            .ok_or(SnnError::ConnectionNotFound(connection))?;
        conn.mul_fast = mul_fast;
        conn.mul_slow = mul_slow;
        Ok(())
    }

    /// Selects conductance-based synapses with the given time constants, or
    /// current-based synapses with `None`.
    pub fn set_conductances(&mut self, config: Option<ConductanceConfig>) {
        self.conductances = config;
    }

    pub fn set_integration(&mut self, config: IntegrationConfig) {
        self.integration = config;
    }

    pub fn set_weight_update(&mut self, config: WeightUpdateConfig) {
        self.weight_update = config;
    }

    /// Enables STDP on the excitatory afferents of a group.
    pub fn set_exc_stdp(&mut self, group: usize, stdp: ExcStdp) -> Result<(), SnnError> {
        stdp.curve.validate()?;
        self.require_regular(group)?;
        self.group_mut(group)?.exc_stdp = Some(stdp);
        Ok(())
    }

    /// Enables STDP on the inhibitory afferents of a group.
    pub fn set_inh_stdp(&mut self, group: usize, stdp: InhStdp) -> Result<(), SnnError> {
        stdp.curve.validate()?;
        self.require_regular(group)?;
        self.group_mut(group)?.inh_stdp = Some(stdp);
        Ok(())
    }

    /// Enables short-term plasticity on all synapses leaving a group.
    pub fn set_stp(&mut self, group: usize, stp: StpConfig) -> Result<(), SnnError> {
        self.group_mut(group)?.stp = Some(stp);
        Ok(())
    }

    /// Enables homeostatic scaling of the plastic afferents of a group.
    pub fn set_homeostasis(
        &mut self,
        group: usize,
        config: HomeostasisConfig,
    ) -> Result<(), SnnError> {
        self.require_regular(group)?;
        self.group_mut(group)?.homeostasis = Some(config);
        Ok(())
    }

    /// Sets the dopamine baseline and decay of a group.
    pub fn set_neuromodulator(
        &mut self,
        group: usize,
        config: DopamineConfig,
    ) -> Result<(), SnnError> {
        self.group_mut(group)?.dopamine = config;
        Ok(())
    }

    /// Marks a group as dopaminergic: its delivered spikes raise the dopamine
    /// concentration of their target groups.
    pub fn set_dopaminergic(&mut self, group: usize, dopaminergic: bool) -> Result<(), SnnError> {
        self.group_mut(group)?.dopaminergic = dopaminergic;
        Ok(())
    }

    fn require_regular(&self, group: usize) -> Result<(), SnnError> {
        if self.group(group)?.is_generator() {
            return Err(SnnError::InvalidOperation(
                "Plasticity settings do not apply to spike generator groups".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the total number of neurons across all groups.
    pub fn num_neurons(&self) -> usize {
        self.num_neurons
    }

    pub fn num_groups(&self) -> usize {
        self.groups.len()
    }

    pub fn num_connections(&self) -> usize {
        self.connections.len()
    }

    pub fn group(&self, id: usize) -> Result<&Group, SnnError> {
        self.groups.get(id).ok_or(SnnError::GroupNotFound(id))
    }

    pub(crate) fn group_mut(&mut self, id: usize) -> Result<&mut Group, SnnError> {
        self.groups.get_mut(id).ok_or(SnnError::GroupNotFound(id))
    }

    pub fn group_by_name(&self, name: &str) -> Result<&Group, SnnError> {
        self.groups
            .iter()
            .find(|g| g.name() == name)
            .ok_or_else(|| SnnError::InvalidParameter(format!("No group named '{}'", name)))
    }

    pub fn connection(&self, id: usize) -> Result<&Connection, SnnError> {
        self.connections
            .get(id)
            .ok_or(SnnError::ConnectionNotFound(id))
    }

    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.iter()
    }

    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.iter()
    }

    /// Returns the group a global neuron id belongs to.
    pub fn group_of(&self, neuron_id: usize) -> Result<&Group, SnnError> {
        self.groups
            .iter()
            .find(|g| g.contains(neuron_id))
            .ok_or_else(|| {
                SnnError::InvalidParameter(format!("Neuron id {} out of range", neuron_id))
            })
    }

    /// Checks that the description is complete and consistent, so that it can
    /// be expanded into runtime state.
    pub(crate) fn verify(&self) -> Result<(), SnnError> {
        if self.groups.iter().all(|g| g.is_generator()) {
            return Err(SnnError::VerificationFailed(
                "The network needs at least one group with membrane dynamics".to_string(),
            ));
        }
        for group in &self.groups {
            if !group.is_generator() && group.model.is_none() {
                return Err(SnnError::VerificationFailed(format!(
                    "Group '{}' has no neuron model",
                    group.name()
                )));
            }
            if group.has_stdp()
                && !self
                    .connections
                    .iter()
                    .any(|c| c.post_group == group.id() && c.is_plastic())
            {
                return Err(SnnError::VerificationFailed(format!(
                    "Group '{}' has STDP enabled but no plastic afferent connection",
                    group.name()
                )));
            }
            if group.homeostasis.is_some() && !group.has_stdp() {
                return Err(SnnError::VerificationFailed(format!(
                    "Group '{}' has homeostasis enabled but no STDP",
                    group.name()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::plasticity::{ExcCurve, StdpType};
    use super::*;

    fn two_groups() -> (Network, usize, usize) {
        let mut network = Network::new();
        let exc = network
            .create_group("exc", Grid3D::line(10).unwrap(), Polarity::Excitatory)
            .unwrap();
        let inh = network
            .create_group("inh", Grid3D::line(5).unwrap(), Polarity::Inhibitory)
            .unwrap();
        network
            .set_neuron_model(exc, NeuronModel::regular_spiking())
            .unwrap();
        network
            .set_neuron_model(inh, NeuronModel::fast_spiking())
            .unwrap();
        (network, exc, inh)
    }

    #[test]
    fn test_group_ids_and_neuron_ranges() {
        let (network, exc, inh) = two_groups();
        assert_eq!(network.num_neurons(), 15);
        assert_eq!(network.group(exc).unwrap().start(), 0);
        assert_eq!(network.group(inh).unwrap().start(), 10);
        assert_eq!(network.group_of(12).unwrap().id(), inh);
        assert!(network.group_of(15).is_err());
        assert_eq!(network.group_by_name("inh").unwrap().id(), inh);
    }

    #[test]
    fn test_duplicate_group_name_rejected() {
        let mut network = Network::new();
        network
            .create_group("a", Grid3D::line(1).unwrap(), Polarity::Excitatory)
            .unwrap();
        assert!(network
            .create_group("a", Grid3D::line(1).unwrap(), Polarity::Excitatory)
            .is_err());
    }

    #[test]
    fn test_generators_cannot_receive() {
        let (mut network, exc, _) = two_groups();
        let input = network
            .create_generator_group("input", Grid3D::line(10).unwrap(), Polarity::Excitatory)
            .unwrap();
        assert!(network
            .connect(
                input,
                exc,
                ConnectRule::OneToOne,
                RangeWeight::fixed(0.5).unwrap(),
                RangeDelay::fixed(1).unwrap(),
                SynapseType::Fixed,
            )
            .is_ok());
        assert_eq!(
            network.connect(
                exc,
                input,
                ConnectRule::OneToOne,
                RangeWeight::fixed(0.5).unwrap(),
                RangeDelay::fixed(1).unwrap(),
                SynapseType::Fixed,
            ),
            Err(SnnError::InvalidOperation(
                "Spike generator groups cannot receive synapses".to_string()
            ))
        );
        assert!(network
            .set_neuron_model(input, NeuronModel::regular_spiking())
            .is_err());
    }

    #[test]
    fn test_verify_requires_model_and_plastic_afferents() {
        let mut network = Network::new();
        let g = network
            .create_group("g", Grid3D::line(2).unwrap(), Polarity::Excitatory)
            .unwrap();
        assert!(matches!(
            network.verify(),
            Err(SnnError::VerificationFailed(_))
        ));

        network
            .set_neuron_model(g, NeuronModel::regular_spiking())
            .unwrap();
        assert!(network.verify().is_ok());

        let stdp = ExcStdp {
            kind: StdpType::Standard,
            curve: ExcCurve::Exponential {
                alpha_plus: 0.1,
                tau_plus: 20.0,
                alpha_minus: -0.12,
                tau_minus: 20.0,
            },
        };
        network.set_exc_stdp(g, stdp).unwrap();
        assert!(matches!(
            network.verify(),
            Err(SnnError::VerificationFailed(_))
        ));

        network
            .connect(
                g,
                g,
                ConnectRule::Random { prob: 0.5 },
                RangeWeight::new(0.0, 0.1, 0.2).unwrap(),
                RangeDelay::fixed(1).unwrap(),
                SynapseType::Plastic,
            )
            .unwrap();
        assert!(network.verify().is_ok());
    }

    #[test]
    fn test_conductance_validation() {
        assert!(ConductanceConfig::new(5.0, 0.0, 150.0, 6.0, 0.0, 150.0).is_ok());
        assert!(ConductanceConfig::new(5.0, 150.0, 10.0, 6.0, 0.0, 150.0).is_err());
        assert!(ConductanceConfig::new(0.0, 0.0, 150.0, 6.0, 0.0, 150.0).is_err());

        let config = ConductanceConfig::new(5.0, 10.0, 150.0, 6.0, 0.0, 150.0).unwrap();
        assert!(config.with_nmda_rise());
        assert!(!config.with_gabab_rise());
        // peak-normalization exceeds 1 for a dual exponential
        assert!(config.nmda_scale() > 1.0);
        assert_eq!(config.gabab_scale(), 1.0);
    }

    #[test]
    fn test_weight_update_scale() {
        let config = WeightUpdateConfig::default();
        assert_eq!(config.scale(), 0.5);
        assert_eq!(config.decay(), 0.9);

        let config = WeightUpdateConfig::new(UpdateInterval::Ms10, false, 0.0).unwrap();
        assert_eq!(config.scale(), 1.0);
        assert_eq!(config.decay(), 0.0);
        assert!(WeightUpdateConfig::new(UpdateInterval::Ms10, true, 1.5).is_err());
    }
}
