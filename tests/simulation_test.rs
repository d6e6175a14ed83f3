use spikesim::connection::{ConnectRule, RangeDelay, RangeWeight, SynapseType};
use spikesim::generator::PoissonRate;
use spikesim::grid::Grid3D;
use spikesim::group::{DopamineConfig, NeuronModel, Polarity};
use spikesim::io::NetworkSnapshot;
use spikesim::network::Network;
use spikesim::plasticity::{
    ExcCurve, ExcStdp, HomeostasisConfig, InhCurve, InhStdp, StdpType, StpConfig,
};
use spikesim::simulator::Simulator;

/// The classic 80/20 balanced network: 80 regular spiking and 20 fast spiking
/// cells, randomly wired, driven by Poisson input.
fn balanced_network() -> (Network, usize, usize, usize) {
    let mut network = Network::new();
    let input = network
        .create_generator_group("input", Grid3D::line(80).unwrap(), Polarity::Excitatory)
        .unwrap();
    let exc = network
        .create_group("exc", Grid3D::line(80).unwrap(), Polarity::Excitatory)
        .unwrap();
    let inh = network
        .create_group("inh", Grid3D::line(20).unwrap(), Polarity::Inhibitory)
        .unwrap();
    network
        .set_neuron_model(exc, NeuronModel::regular_spiking())
        .unwrap();
    network
        .set_neuron_model(inh, NeuronModel::fast_spiking())
        .unwrap();

    network
        .connect(
            input,
            exc,
            ConnectRule::OneToOne,
            RangeWeight::fixed(1.0).unwrap(),
            RangeDelay::fixed(1).unwrap(),
            SynapseType::Fixed,
        )
        .unwrap();
    network
        .connect(
            exc,
            exc,
            ConnectRule::Random { prob: 0.1 },
            RangeWeight::fixed(0.2).unwrap(),
            RangeDelay::new(1, 20).unwrap(),
            SynapseType::Fixed,
        )
        .unwrap();
    network
        .connect(
            exc,
            inh,
            ConnectRule::Random { prob: 0.1 },
            RangeWeight::fixed(0.3).unwrap(),
            RangeDelay::fixed(1).unwrap(),
            SynapseType::Fixed,
        )
        .unwrap();
    network
        .connect(
            inh,
            exc,
            ConnectRule::Random { prob: 0.1 },
            RangeWeight::fixed(0.5).unwrap(),
            RangeDelay::fixed(1).unwrap(),
            SynapseType::Fixed,
        )
        .unwrap();

    (network, input, exc, inh)
}

#[test]
fn test_balanced_network_sustains_activity() {
    let (network, input, exc, inh) = balanced_network();
    let mut sim = Simulator::build(network, 42).unwrap();
    sim.set_spike_rate(input, PoissonRate::uniform(80, 20.0).unwrap(), 1)
        .unwrap();
    sim.set_spike_monitor(exc).unwrap();
    sim.set_spike_monitor(inh).unwrap();

    sim.run(5000);

    let exc_rate = sim.spike_monitor(exc).unwrap().mean_rate(sim.time());
    let inh_rate = sim.spike_monitor(inh).unwrap().mean_rate(sim.time());
    assert!(exc_rate > 0.5, "excitatory rate {:.2} Hz", exc_rate);
    assert!(inh_rate > 0.5, "inhibitory rate {:.2} Hz", inh_rate);
    // physiological sanity: nothing saturates at the 1 kHz ceiling
    assert!(exc_rate < 200.0 && inh_rate < 300.0);
}

#[test]
fn test_short_term_depression_shrinks_epsps() {
    let mut network = Network::new();
    network.set_conductances(None);
    let input = network
        .create_generator_group("input", Grid3D::line(1).unwrap(), Polarity::Excitatory)
        .unwrap();
    let post = network
        .create_group("post", Grid3D::line(1).unwrap(), Polarity::Excitatory)
        .unwrap();
    network
        .set_neuron_model(post, NeuronModel::regular_spiking())
        .unwrap();
    network
        .connect(
            input,
            post,
            ConnectRule::OneToOne,
            RangeWeight::fixed(2.0).unwrap(),
            RangeDelay::fixed(1).unwrap(),
            SynapseType::Fixed,
        )
        .unwrap();
    // depressing synapse: resources recover much slower than utilization
    network
        .set_stp(input, StpConfig::new(0.45, 50.0, 750.0).unwrap())
        .unwrap();

    let mut sim = Simulator::build(network, 42).unwrap();
    // one input spike every 50 ms
    sim.set_spike_generator(
        input,
        Box::new(|_n: usize, _now: u32, last: u32| if last == u32::MAX { 50 } else { last + 50 }),
    )
    .unwrap();

    let mut bumps = Vec::new();
    for spike in 0..5u32 {
        let arrival = 50 + spike * 50;
        sim.run(arrival - sim.time());
        let before = sim.voltage(1).unwrap();
        sim.run(1);
        bumps.push(sim.voltage(1).unwrap() - before);
    }

    // the first spike is delivered at full weight, later ones depressed
    assert!(bumps[0] > 0.5, "first EPSP too small: {:?}", bumps);
    assert!(
        bumps[4] < 0.8 * bumps[0],
        "no depression across the train: {:?}",
        bumps
    );
}

#[test]
fn test_dopaminergic_spikes_raise_group_dopamine() {
    let mut network = Network::new();
    let da_source = network
        .create_generator_group("da", Grid3D::line(10).unwrap(), Polarity::Excitatory)
        .unwrap();
    let target = network
        .create_group("target", Grid3D::line(10).unwrap(), Polarity::Excitatory)
        .unwrap();
    network
        .set_neuron_model(target, NeuronModel::regular_spiking())
        .unwrap();
    network.set_dopaminergic(da_source, true).unwrap();
    network
        .set_neuromodulator(target, DopamineConfig::new(1.0, 50.0).unwrap())
        .unwrap();
    network
        .connect(
            da_source,
            target,
            ConnectRule::Full { allow_self: true },
            RangeWeight::fixed(0.01).unwrap(),
            RangeDelay::fixed(1).unwrap(),
            SynapseType::Fixed,
        )
        .unwrap();

    let mut sim = Simulator::build(network, 42).unwrap();
    sim.set_group_monitor(target).unwrap();
    assert_eq!(sim.dopamine(target).unwrap(), 1.0);

    sim.set_spike_rate(da_source, PoissonRate::uniform(10, 40.0).unwrap(), 1)
        .unwrap();
    sim.run(1000);
    assert!(sim.dopamine(target).unwrap() > 1.0);

    // with the source silenced the concentration decays back to baseline
    sim.set_spike_rate(da_source, PoissonRate::new(10), 1)
        .unwrap();
    sim.run(2000);
    assert!((sim.dopamine(target).unwrap() - 1.0).abs() < 0.01);

    let trace = sim.group_monitor(target).unwrap().dopamine_trace();
    assert_eq!(trace.len(), 3000);
    let peak = trace.iter().map(|&(_, da)| da).fold(0.0f32, f32::max);
    assert!(peak > 1.0);
}

/// Two copies of the same network, one with its dopaminergic source firing and
/// one with it silent. Under dopamine-modulated STDP the elevated concentration
/// multiplies every applied weight change, so the firing copy must drift much
/// further from the initial weights.
#[test]
fn test_dopamine_scales_modulated_stdp_changes() {
    let build = || {
        let mut network = Network::new();
        let input = network
            .create_generator_group("input", Grid3D::line(5).unwrap(), Polarity::Excitatory)
            .unwrap();
        let da_source = network
            .create_generator_group("da", Grid3D::line(5).unwrap(), Polarity::Excitatory)
            .unwrap();
        let exc = network
            .create_group("exc", Grid3D::line(5).unwrap(), Polarity::Excitatory)
            .unwrap();
        network
            .set_neuron_model(exc, NeuronModel::regular_spiking())
            .unwrap();
        network.set_dopaminergic(da_source, true).unwrap();
        network
            .set_neuromodulator(exc, DopamineConfig::new(1.0, 50.0).unwrap())
            .unwrap();
        let conn = network
            .connect(
                input,
                exc,
                ConnectRule::OneToOne,
                RangeWeight::new(0.0, 0.2, 0.4).unwrap(),
                RangeDelay::fixed(1).unwrap(),
                SynapseType::Plastic,
            )
            .unwrap();
        // the dopaminergic projection carries a vanishing conductance so both
        // copies see the same membrane dynamics
        network
            .connect(
                da_source,
                exc,
                ConnectRule::Full { allow_self: true },
                RangeWeight::fixed(0.0001).unwrap(),
                RangeDelay::fixed(1).unwrap(),
                SynapseType::Fixed,
            )
            .unwrap();
        network
            .set_exc_stdp(
                exc,
                ExcStdp {
                    kind: StdpType::DaModulated,
                    curve: ExcCurve::Exponential {
                        alpha_plus: 0.002,
                        tau_plus: 20.0,
                        alpha_minus: -0.002,
                        tau_minus: 20.0,
                    },
                },
            )
            .unwrap();

        let mut sim = Simulator::build(network, 42).unwrap();
        sim.set_uniform_external_current(exc, 10.0).unwrap();
        // deterministic drive: every input neuron spikes every 15 ms
        sim.set_spike_generator(
            input,
            Box::new(|_n: usize, _now: u32, last: u32| {
                if last == u32::MAX {
                    15
                } else {
                    last + 15
                }
            }),
        )
        .unwrap();
        (sim, conn, da_source, exc)
    };

    let (mut quiet, conn, da_source, exc) = build();
    quiet
        .set_spike_generator(da_source, Box::new(|_n: usize, _now: u32, _last: u32| u32::MAX))
        .unwrap();
    let (mut boosted, _, _, _) = build();
    boosted
        .set_spike_generator(
            da_source,
            Box::new(|_n: usize, _now: u32, last: u32| if last == u32::MAX { 1 } else { last + 1 }),
        )
        .unwrap();

    quiet.run(2000);
    boosted.run(2000);

    assert!((quiet.dopamine(exc).unwrap() - 1.0).abs() < 0.01);
    assert!(boosted.dopamine(exc).unwrap() > 5.0);

    let drift = |sim: &Simulator| {
        let weights = sim.weights(conn).unwrap();
        weights
            .iter()
            .map(|&(_, _, w)| f64::from((w - 0.2).abs()))
            .sum::<f64>()
            / weights.len() as f64
    };
    let quiet_drift = drift(&quiet);
    let boosted_drift = drift(&boosted);
    assert!(quiet_drift > 0.0, "baseline copy accrued no changes");
    assert!(
        boosted_drift > 3.0 * quiet_drift,
        "dopamine did not amplify the weight drift: {} vs {}",
        boosted_drift,
        quiet_drift
    );
}

/// Drives a plastic inhibitory projection through the full engine and checks
/// that anti-Hebbian updates move the weights without ever leaving the
/// admissible negative range.
#[test]
fn test_inhibitory_plasticity_keeps_weights_in_range() {
    let mut network = Network::new();
    let inh = network
        .create_group("inh", Grid3D::line(10).unwrap(), Polarity::Inhibitory)
        .unwrap();
    let exc = network
        .create_group("exc", Grid3D::line(10).unwrap(), Polarity::Excitatory)
        .unwrap();
    network
        .set_neuron_model(inh, NeuronModel::fast_spiking())
        .unwrap();
    network
        .set_neuron_model(exc, NeuronModel::regular_spiking())
        .unwrap();
    let conn = network
        .connect(
            inh,
            exc,
            ConnectRule::Full { allow_self: true },
            RangeWeight::new(0.0, 0.1, 0.2).unwrap(),
            RangeDelay::fixed(1).unwrap(),
            SynapseType::Plastic,
        )
        .unwrap();
    // large steps so the updates hit the bound within the run
    network
        .set_inh_stdp(
            exc,
            InhStdp {
                kind: StdpType::Standard,
                curve: InhCurve::Exponential {
                    alpha_plus: 0.1,
                    tau_plus: 20.0,
                    alpha_minus: 0.1,
                    tau_minus: 20.0,
                },
            },
        )
        .unwrap();

    let mut sim = Simulator::build(network, 42).unwrap();
    sim.set_uniform_external_current(inh, 10.0).unwrap();
    sim.set_uniform_external_current(exc, 15.0).unwrap();
    sim.run(5000);

    let weights = sim.weights(conn).unwrap();
    assert!(weights
        .iter()
        .all(|&(_, _, w)| (-0.2..=0.0).contains(&w)));
    // the projection actually learned: some weight left its initial value
    assert!(weights.iter().any(|&(_, _, w)| (w + 0.1).abs() > 1e-4));
}

#[test]
fn test_homeostasis_grows_weights_of_underactive_group() {
    let mut network = Network::new();
    let input = network
        .create_generator_group("input", Grid3D::line(20).unwrap(), Polarity::Excitatory)
        .unwrap();
    let exc = network
        .create_group("exc", Grid3D::line(20).unwrap(), Polarity::Excitatory)
        .unwrap();
    network
        .set_neuron_model(exc, NeuronModel::regular_spiking())
        .unwrap();
    let conn = network
        .connect(
            input,
            exc,
            ConnectRule::Full { allow_self: true },
            RangeWeight::new(0.0, 0.02, 0.5).unwrap(),
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
                    alpha_plus: 0.001,
                    tau_plus: 20.0,
                    alpha_minus: -0.001,
                    tau_minus: 20.0,
                },
            },
        )
        .unwrap();
    network
        .set_homeostasis(exc, HomeostasisConfig::new(0.1, 10.0, 10.0, 0.0).unwrap())
        .unwrap();

    let mut sim = Simulator::build(network, 42).unwrap();
    // weak drive keeps the group far below its 10 Hz set point
    sim.set_spike_rate(input, PoissonRate::uniform(20, 5.0).unwrap(), 1)
        .unwrap();

    let before = mean_weight(&sim, conn);
    sim.run(20_000);
    let after = mean_weight(&sim, conn);
    assert!(
        after > before,
        "homeostasis did not grow weights: {} -> {}",
        before,
        after
    );
}

fn mean_weight(sim: &Simulator, conn: usize) -> f64 {
    let weights = sim.weights(conn).unwrap();
    weights.iter().map(|&(_, _, w)| f64::from(w)).sum::<f64>() / weights.len() as f64
}

#[test]
fn test_snapshot_restores_trained_weights() {
    let build = || {
        let mut network = Network::new();
        let input = network
            .create_generator_group("input", Grid3D::line(10).unwrap(), Polarity::Excitatory)
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
                RangeDelay::new(1, 5).unwrap(),
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
        Simulator::build(network, 42).unwrap()
    };

    // train one copy
    let mut trained = build();
    trained
        .set_spike_rate(0, PoissonRate::uniform(10, 40.0).unwrap(), 1)
        .unwrap();
    trained.set_uniform_external_current(1, 6.0).unwrap();
    trained.run(5000);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trained.json");
    trained.snapshot().save(&path).unwrap();

    // restore into a fresh copy built from the same seed
    let mut fresh = build();
    assert_ne!(fresh.weights(0).unwrap(), trained.weights(0).unwrap());
    let snapshot = NetworkSnapshot::load(&path).unwrap();
    fresh.restore_weights(&snapshot).unwrap();
    assert_eq!(fresh.weights(0).unwrap(), trained.weights(0).unwrap());
}

#[test]
fn test_restore_rejects_mismatched_structure() {
    let mut network = Network::new();
    let g = network
        .create_group("exc", Grid3D::line(4).unwrap(), Polarity::Excitatory)
        .unwrap();
    network
        .set_neuron_model(g, NeuronModel::regular_spiking())
        .unwrap();
    network
        .connect(
            g,
            g,
            ConnectRule::Full { allow_self: false },
            RangeWeight::fixed(0.1).unwrap(),
            RangeDelay::fixed(1).unwrap(),
            SynapseType::Fixed,
        )
        .unwrap();
    let mut sim = Simulator::build(network, 42).unwrap();

    let mut snapshot = sim.snapshot();
    snapshot.groups[0].size = 5;
    assert!(sim.restore_weights(&snapshot).is_err());

    let mut snapshot = sim.snapshot();
    snapshot.synapses.pop();
    assert!(sim.restore_weights(&snapshot).is_err());
}

#[test]
fn test_spike_counter_tracks_generator_output() {
    let mut network = Network::new();
    let input = network
        .create_generator_group("input", Grid3D::line(4).unwrap(), Polarity::Excitatory)
        .unwrap();
    let exc = network
        .create_group("exc", Grid3D::line(4).unwrap(), Polarity::Excitatory)
        .unwrap();
    network
        .set_neuron_model(exc, NeuronModel::regular_spiking())
        .unwrap();
    network
        .connect(
            input,
            exc,
            ConnectRule::OneToOne,
            RangeWeight::fixed(0.01).unwrap(),
            RangeDelay::fixed(1).unwrap(),
            SynapseType::Fixed,
        )
        .unwrap();

    let mut sim = Simulator::build(network, 42).unwrap();
    sim.set_spike_counter(input, None).unwrap();
    sim.set_spike_generator(
        input,
        Box::new(|neuron: usize, _now: u32, last: u32| {
            // neuron 0 every 10 ms, the rest silent
            if neuron != 0 {
                return u32::MAX;
            }
            if last == u32::MAX {
                10
            } else {
                last + 10
            }
        }),
    )
    .unwrap();

    // ticks 0..=104 cover the spikes at 10, 20, ..., 100
    sim.run(105);
    let counter = sim.spike_counter(input).unwrap();
    assert_eq!(counter.count(0), 10);
    assert_eq!(counter.count(1), 0);

    sim.reset_spike_counter(input).unwrap();
    assert_eq!(sim.spike_counter(input).unwrap().count(0), 0);
}
