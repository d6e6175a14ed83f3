//! Plasticity configuration: spike-timing-dependent plasticity (STDP),
//! short-term plasticity (STP), and homeostatic synaptic scaling.
//!
//! STDP is configured post-synaptically: enabling it on a group makes the
//! plastic synapses *into* that group learn. STP is configured
//! pre-synaptically: enabling it on a group modulates all spikes *leaving*
//! that group.

use serde::{Deserialize, Serialize};

use super::error::SnnError;

/// When STDP weight changes exceed this many time constants, the exponential
/// contribution is negligible and skipped.
pub(crate) const STDP_CUTOFF: f32 = 25.0;

/// How STDP weight changes are applied at the update boundary.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum StdpType {
    /// Accumulated changes are applied as-is.
    Standard,
    /// Accumulated changes are gated by the dopamine concentration of the
    /// post-synaptic group at update time.
    DaModulated,
}

/// STDP curve for excitatory afferents.
///
/// `alpha_plus` is the magnitude of LTP for near-coincident pre-before-post
/// pairs; `alpha_minus` the magnitude of the post-before-pre change and is
/// usually negative (LTD).
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub enum ExcCurve {
    /// The classic asymmetric exponential curve.
    Exponential {
        alpha_plus: f32,
        tau_plus: f32,
        alpha_minus: f32,
        tau_minus: f32,
    },
    /// Exponential LTP within the `gamma` window, with an offset such that the
    /// curve is continuous at `gamma`, and depression beyond it.
    TimingBased {
        alpha_plus: f32,
        tau_plus: f32,
        alpha_minus: f32,
        tau_minus: f32,
        gamma: f32,
    },
}

impl ExcCurve {
    pub(crate) fn validate(&self) -> Result<(), SnnError> {
        let (tau_plus, tau_minus, gamma) = match *self {
            ExcCurve::Exponential {
                tau_plus,
                tau_minus,
                ..
            } => (tau_plus, tau_minus, f32::INFINITY),
            ExcCurve::TimingBased {
                tau_plus,
                tau_minus,
                gamma,
                ..
            } => (tau_plus, tau_minus, gamma),
        };
        if tau_plus <= 0.0 || tau_minus <= 0.0 || gamma <= 0.0 {
            return Err(SnnError::InvalidParameter(
                "STDP time constants must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// LTP-side change for a pre-arrival `dt` ms before the post spike.
    pub(crate) fn ltp(&self, dt: f32) -> f32 {
        match *self {
            ExcCurve::Exponential {
                alpha_plus,
                tau_plus,
                ..
            } => {
                if dt / tau_plus < STDP_CUTOFF {
                    alpha_plus * (-dt / tau_plus).exp()
                } else {
                    0.0
                }
            }
            ExcCurve::TimingBased {
                alpha_plus,
                tau_plus,
                gamma,
                ..
            } => {
                if dt / tau_plus >= STDP_CUTOFF {
                    return 0.0;
                }
                // kappa/omega shift the curve so it passes through zero at gamma
                let kappa = (1.0 + (-gamma / tau_plus).exp()) / (1.0 - (-gamma / tau_plus).exp());
                let omega = alpha_plus * (1.0 - kappa);
                if dt <= gamma {
                    omega + kappa * alpha_plus * (-dt / tau_plus).exp()
                } else {
                    -alpha_plus * (-dt / tau_plus).exp()
                }
            }
        }
    }

    /// LTD-side change for a pre-arrival `dt` ms after the post spike.
    pub(crate) fn ltd(&self, dt: f32) -> f32 {
        let (alpha_minus, tau_minus) = match *self {
            ExcCurve::Exponential {
                alpha_minus,
                tau_minus,
                ..
            }
            | ExcCurve::TimingBased {
                alpha_minus,
                tau_minus,
                ..
            } => (alpha_minus, tau_minus),
        };
        if dt / tau_minus < STDP_CUTOFF {
            alpha_minus * (-dt / tau_minus).exp()
        } else {
            0.0
        }
    }
}

/// STDP curve for inhibitory afferents.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub enum InhCurve {
    /// Anti-Hebbian exponential curve: near-coincident pairs weaken the
    /// inhibitory synapse (its magnitude), distant pairs strengthen it.
    Exponential {
        alpha_plus: f32,
        tau_plus: f32,
        alpha_minus: f32,
        tau_minus: f32,
    },
    /// Symmetric pulse curve: a constant `beta_ltp` change within the
    /// `lambda` window and a constant `beta_ltd` change within the `delta`
    /// window.
    Pulse {
        beta_ltp: f32,
        beta_ltd: f32,
        lambda: f32,
        delta: f32,
    },
}

impl InhCurve {
    pub(crate) fn validate(&self) -> Result<(), SnnError> {
        let ok = match *self {
            InhCurve::Exponential {
                tau_plus, tau_minus, ..
            } => tau_plus > 0.0 && tau_minus > 0.0,
            InhCurve::Pulse { lambda, delta, .. } => lambda > 0.0 && delta > 0.0,
        };
        if !ok {
            return Err(SnnError::InvalidParameter(
                "STDP time constants must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Change applied when the post-synaptic neuron fires `dt` ms after a
    /// pre-arrival. The weight change is accumulated on a synapse whose
    /// stored weight is negative, so a negative return value strengthens
    /// inhibition.
    pub(crate) fn on_post_after_pre(&self, dt: f32) -> f32 {
        match *self {
            InhCurve::Exponential {
                alpha_plus,
                tau_plus,
                ..
            } => {
                if dt / tau_plus < STDP_CUTOFF {
                    -alpha_plus * (-dt / tau_plus).exp()
                } else {
                    0.0
                }
            }
            InhCurve::Pulse {
                beta_ltp,
                beta_ltd,
                lambda,
                delta,
            } => {
                if dt <= lambda {
                    -beta_ltp
                } else if dt <= delta {
                    -beta_ltd
                } else {
                    0.0
                }
            }
        }
    }

    /// Change applied when a pre-spike arrives `dt` ms after the last
    /// post-synaptic firing.
    pub(crate) fn on_pre_after_post(&self, dt: f32) -> f32 {
        match *self {
            InhCurve::Exponential {
                alpha_minus,
                tau_minus,
                ..
            } => {
                if dt / tau_minus < STDP_CUTOFF {
                    -alpha_minus * (-dt / tau_minus).exp()
                } else {
                    0.0
                }
            }
            InhCurve::Pulse {
                beta_ltp,
                beta_ltd,
                lambda,
                delta,
            } => {
                if dt <= lambda {
                    -beta_ltp
                } else if dt <= delta {
                    -beta_ltd
                } else {
                    0.0
                }
            }
        }
    }
}

/// STDP configuration for the excitatory afferents of a group.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub struct ExcStdp {
    pub kind: StdpType,
    pub curve: ExcCurve,
}

/// STDP configuration for the inhibitory afferents of a group.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub struct InhStdp {
    pub kind: StdpType,
    pub curve: InhCurve,
}

/// Short-term plasticity following Tsodyks & Markram (1998).
///
/// `u` models the utilization of synaptic resources (facilitation), `x` the
/// fraction of available resources (depression):
///
/// du/dt = -u/tau_u + U (1 - u^-) delta(t - t_spk)
/// dx/dt = (1 - x)/tau_x - u^+ x^- delta(t - t_spk)
///
/// where `^-` denotes the value right before and `^+` right after the spike
/// update. A delivered spike's amplitude is `A u^+ x^- w` with `A = 1/U` so
/// that an isolated spike at rest has amplitude `w`.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub struct StpConfig {
    /// Increment of utilization at a spike (release probability), in (0, 1].
    pub u: f32,
    /// Recovery time constant of facilitation (ms).
    pub tau_u: f32,
    /// Recovery time constant of depression (ms).
    pub tau_x: f32,
}

impl StpConfig {
    pub fn new(u: f32, tau_u: f32, tau_x: f32) -> Result<Self, SnnError> {
        if !(u > 0.0 && u <= 1.0) || tau_u <= 0.0 || tau_x <= 0.0 {
            return Err(SnnError::InvalidParameter(
                "STP requires 0 < U <= 1 and positive time constants".to_string(),
            ));
        }
        Ok(StpConfig { u, tau_u, tau_x })
    }

    /// Amplitude normalization so that a spike at rest carries the raw weight.
    pub(crate) fn amplitude(&self) -> f32 {
        1.0 / self.u
    }
}

/// Homeostatic synaptic scaling configuration.
///
/// Each neuron tracks an exponential average of its firing rate; at every
/// weight update the deviation from the target base rate scales the plastic
/// input weights toward restoring the target.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub struct HomeostasisConfig {
    /// Strength of homeostasis relative to STDP (which is 1).
    pub scale: f32,
    /// Time frame over which the average firing rate is estimated (seconds).
    /// Should be larger than the STDP time scales.
    pub avg_time_scale: f32,
    /// Target firing rate (Hz), per-neuron values jittered by `base_firing_sd`.
    pub base_firing: f32,
    pub base_firing_sd: f32,
}

impl HomeostasisConfig {
    pub fn new(
        scale: f32,
        avg_time_scale: f32,
        base_firing: f32,
        base_firing_sd: f32,
    ) -> Result<Self, SnnError> {
        if avg_time_scale <= 0.0 || base_firing <= 0.0 || base_firing_sd < 0.0 {
            return Err(SnnError::InvalidParameter(
                "Homeostasis requires positive time scale and base firing rate".to_string(),
            ));
        }
        Ok(HomeostasisConfig {
            scale,
            avg_time_scale,
            base_firing,
            base_firing_sd,
        })
    }

    /// Per-ms decay factor of the average firing rate estimate.
    pub(crate) fn avg_decay(&self) -> f32 {
        let ms = self.avg_time_scale * 1000.0;
        (ms - 1.0) / ms
    }
}
