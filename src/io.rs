//! Module implementing persistence of built networks.
//!
//! A [`NetworkSnapshot`] captures the expanded structure of a simulator (group
//! layout plus every synapse with its learned weight) as JSON. Snapshots are
//! used to carry trained weights across processes: a simulator built from the
//! same description can restore them with
//! [`Simulator::restore_weights`](crate::simulator::Simulator::restore_weights).

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::error::SnnError;

/// Format version written into every snapshot.
pub const SNAPSHOT_VERSION: u32 = 1;

/// The group layout of a snapshot, used to check structural compatibility.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct GroupSummary {
    pub name: String,
    pub start: usize,
    pub size: usize,
}

/// One synapse of a snapshot, in afferent slot order.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub struct SavedSynapse {
    pub pre: u32,
    pub post: u32,
    pub conn: u16,
    pub delay: u8,
    pub wt: f32,
    pub max_wt: f32,
}

/// A serializable image of a built network.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct NetworkSnapshot {
    pub version: u32,
    /// Simulated time at which the snapshot was taken (ms).
    pub time: u32,
    pub groups: Vec<GroupSummary>,
    pub synapses: Vec<SavedSynapse>,
}

impl NetworkSnapshot {
    /// Writes the snapshot as JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), SnnError> {
        let file = File::create(path).map_err(|e| SnnError::IoError(e.to_string()))?;
        serde_json::to_writer(BufWriter::new(file), self)
            .map_err(|e| SnnError::IoError(e.to_string()))
    }

    /// Reads a snapshot back from JSON.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SnnError> {
        let file = File::open(path).map_err(|e| SnnError::IoError(e.to_string()))?;
        let snapshot: NetworkSnapshot = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| SnnError::IoError(e.to_string()))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(SnnError::IoError(format!(
                "Unsupported snapshot version {}",
                snapshot.version
            )));
        }
        Ok(snapshot)
    }
}
