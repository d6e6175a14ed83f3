//! This crate provides a CPU simulator for spiking neural networks (SNNs)
//! with Izhikevich neurons, conductance-based synapses and spike-timing-
//! dependent plasticity.
//!
//! # Describing Networks
//!
//! ```rust
//! use spikesim::connection::{ConnectRule, RangeDelay, RangeWeight, SynapseType};
//! use spikesim::grid::Grid3D;
//! use spikesim::group::{NeuronModel, Polarity};
//! use spikesim::network::Network;
//!
//! let mut network = Network::new();
//!
//! // 80 regular spiking cells driven by 20 Poisson inputs
//! let input = network.create_generator_group("input", Grid3D::line(20).unwrap(), Polarity::Excitatory).unwrap();
//! let exc = network.create_group("exc", Grid3D::line(80).unwrap(), Polarity::Excitatory).unwrap();
//! network.set_neuron_model(exc, NeuronModel::regular_spiking()).unwrap();
//!
//! network.connect(
//!     input,
//!     exc,
//!     ConnectRule::Random { prob: 0.1 },
//!     RangeWeight::fixed(0.5).unwrap(),
//!     RangeDelay::new(1, 10).unwrap(),
//!     SynapseType::Fixed,
//! ).unwrap();
//!
//! assert_eq!(network.num_neurons(), 100);
//! assert_eq!(network.num_connections(), 1);
//! ```
//!
//! # Simulating Networks
//!
//! ```rust
//! # use spikesim::connection::{ConnectRule, RangeDelay, RangeWeight, SynapseType};
//! # use spikesim::grid::Grid3D;
//! # use spikesim::group::{NeuronModel, Polarity};
//! # use spikesim::network::Network;
//! use spikesim::generator::PoissonRate;
//! use spikesim::simulator::Simulator;
//!
//! # let mut network = Network::new();
//! # let input = network.create_generator_group("input", Grid3D::line(20).unwrap(), Polarity::Excitatory).unwrap();
//! # let exc = network.create_group("exc", Grid3D::line(80).unwrap(), Polarity::Excitatory).unwrap();
//! # network.set_neuron_model(exc, NeuronModel::regular_spiking()).unwrap();
//! # network.connect(input, exc, ConnectRule::Random { prob: 0.1 },
//! #     RangeWeight::fixed(0.5).unwrap(), RangeDelay::new(1, 10).unwrap(), SynapseType::Fixed).unwrap();
//! // Build with a fixed seed: the run is fully reproducible
//! let mut sim = Simulator::build(network, 42).unwrap();
//! sim.set_spike_rate(input, PoissonRate::uniform(20, 30.0).unwrap(), 1).unwrap();
//! sim.set_spike_monitor(exc).unwrap();
//!
//! sim.run(1000);
//! println!("mean rate: {:.2} Hz", sim.spike_monitor(exc).unwrap().mean_rate(sim.time()));
//! ```

pub mod connection;
pub mod error;
pub mod generator;
pub mod grid;
pub mod group;
pub mod io;
pub mod monitor;
pub mod network;
pub mod plasticity;
pub mod simulator;
mod synapse;
pub mod tuner;
