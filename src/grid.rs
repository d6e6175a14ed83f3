//! Module implementing the 3D layout of neuron populations.
//!
//! Every group arranges its neurons on a 3D grid. Neuron locations are used by
//! the topographic connection rules (random-with-receptive-field and Gaussian).

use serde::{Deserialize, Serialize};

use super::error::SnnError;

/// The 3D grid on which the neurons of a group are arranged.
///
/// The first dimension grows fastest: the neuron with index `i` within its
/// group sits at `(i % x, (i / x) % y, i / (x * y))`, shifted so that the grid
/// is centered on the origin.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub struct Grid3D {
    pub x: usize,
    pub y: usize,
    pub z: usize,
}

impl Grid3D {
    /// Create a new grid with the specified dimensions.
    /// Returns an error if any dimension is zero.
    pub fn new(x: usize, y: usize, z: usize) -> Result<Self, SnnError> {
        if x == 0 || y == 0 || z == 0 {
            return Err(SnnError::InvalidParameter(
                "Grid dimensions must be positive".to_string(),
            ));
        }
        Ok(Grid3D { x, y, z })
    }

    /// A degenerate grid holding `n` neurons on a line.
    pub fn line(n: usize) -> Result<Self, SnnError> {
        Grid3D::new(n, 1, 1)
    }

    /// Returns the number of neurons on the grid.
    pub fn num_neurons(&self) -> usize {
        self.x * self.y * self.z
    }

    /// Returns the location of the neuron with the given index within its
    /// group, centered on the grid origin.
    pub fn location(&self, rel_id: usize) -> Point3D {
        let cx = (rel_id % self.x) as f64;
        let cy = ((rel_id / self.x) % self.y) as f64;
        let cz = (rel_id / (self.x * self.y)) as f64;
        Point3D {
            x: cx - (self.x as f64 - 1.0) / 2.0,
            y: cy - (self.y as f64 - 1.0) / 2.0,
            z: cz - (self.z as f64 - 1.0) / 2.0,
        }
    }
}

/// The location of a single neuron on its group's grid.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub struct Point3D {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3D {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Point3D { x, y, z }
    }
}

/// An ellipsoidal receptive field centered on a post-synaptic neuron.
///
/// The radius is interpreted as the fan-in to the post-synaptic neuron: a
/// pre-synaptic neuron can connect if it codes for a location no further away
/// than the radius. Per dimension, a negative radius ignores the dimension
/// altogether, while a zero radius requires the pre and post coordinates to be
/// equal.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub struct RadiusRF {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl RadiusRF {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        RadiusRF { x, y, z }
    }

    /// The unbounded receptive field: every pre/post pair is eligible.
    pub fn unbounded() -> Self {
        RadiusRF {
            x: -1.0,
            y: -1.0,
            z: -1.0,
        }
    }

    /// A spherical receptive field with the given radius in all dimensions.
    pub fn spherical(rad: f64) -> Self {
        RadiusRF {
            x: rad,
            y: rad,
            z: rad,
        }
    }

    /// Returns the normalized ellipsoid distance between a pre- and a
    /// post-synaptic neuron, or `None` if a zero-radius dimension rules the
    /// pair out. The pair lies within the receptive field iff the returned
    /// distance is in [0, 1].
    pub fn distance(&self, pre: &Point3D, post: &Point3D) -> Option<f64> {
        if (self.x == 0.0 && pre.x != post.x)
            || (self.y == 0.0 && pre.y != post.y)
            || (self.z == 0.0 && pre.z != post.z)
        {
            return None;
        }

        let term = |rad: f64, d: f64| if rad <= 0.0 { 0.0 } else { (d / rad).powi(2) };
        Some(
            term(self.x, pre.x - post.x)
                + term(self.y, pre.y - post.y)
                + term(self.z, pre.z - post.z),
        )
    }

    /// Checks whether the pre-synaptic neuron lies in the receptive field of
    /// the post-synaptic neuron.
    pub fn contains(&self, pre: &Point3D, post: &Point3D) -> bool {
        matches!(self.distance(pre, post), Some(d) if (0.0..=1.0).contains(&d))
    }
}
