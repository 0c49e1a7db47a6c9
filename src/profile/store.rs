//! store.rs
//! The persisted performance-profile store: per-node quality samples keyed
//! by quantized time strings, in the JSON layout written by the generator.

use crate::graph::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("Failed to read profile store: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed profile store: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Unrecognized record key \"{key}\"; expected \"node_<id>\"")]
    BadRecordKey { key: String },
    #[error("No profile record for node {node_id}")]
    MissingNode { node_id: NodeId },
    #[error("No samples for node {node_id} at time key \"{time_key}\"")]
    MissingTimeKey { node_id: NodeId, time_key: String },
    #[error("Failed to persist profile store: {0}")]
    Persist(#[from] tempfile::PersistError),
    #[error("Invalid velocity model: {reason}")]
    InvalidVelocity { reason: String },
}

/// One node's persisted record: pooled quality samples per time key, plus
/// the parent ids the simulation conditioned on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub qualities: BTreeMap<String, Vec<f64>>,
    pub parents: Vec<u32>,
}

/// In-memory form of the store. On disk this is a single JSON object keyed
/// by `"node_<id>"`; keys are parsed once on load so queries never touch
/// strings for node lookup.
#[derive(Debug, Clone, Default)]
pub struct ProfileStore {
    records: BTreeMap<u32, NodeRecord>,
}

impl ProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self, ProfileError> {
        let text = fs::read_to_string(path)?;
        let raw: BTreeMap<String, NodeRecord> = serde_json::from_str(&text)?;
        let mut records = BTreeMap::new();
        for (key, record) in raw {
            let id = key
                .strip_prefix("node_")
                .and_then(|rest| rest.parse::<u32>().ok())
                .ok_or_else(|| ProfileError::BadRecordKey { key: key.clone() })?;
            records.insert(id, record);
        }
        Ok(Self { records })
    }

    /// Atomic save: the serialized store lands in a sibling temp file first
    /// and is persisted over the target, so readers never observe a torn
    /// write.
    pub fn save(&self, path: &Path) -> Result<(), ProfileError> {
        let raw: BTreeMap<String, &NodeRecord> = self
            .records
            .iter()
            .map(|(id, record)| (format!("node_{id}"), record))
            .collect();
        let json = serde_json::to_string_pretty(&raw)?;
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
        let mut tmp = NamedTempFile::new_in(dir.unwrap_or_else(|| Path::new(".")))?;
        tmp.write_all(json.as_bytes())?;
        tmp.persist(path)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn insert(&mut self, id: NodeId, record: NodeRecord) {
        self.records.insert(id.0, record);
    }

    pub fn record(&self, id: NodeId) -> Result<&NodeRecord, ProfileError> {
        self.records
            .get(&id.0)
            .ok_or(ProfileError::MissingNode { node_id: id })
    }

    pub fn has_record(&self, id: NodeId) -> bool {
        self.records.contains_key(&id.0)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.records.keys().map(|&id| NodeId(id))
    }

    /// Samples at an exact grid key. Callers quantize first; a miss after
    /// quantization means the store and the grid config disagree.
    pub fn samples(&self, id: NodeId, time_key: &str) -> Result<&[f64], ProfileError> {
        let record = self.record(id)?;
        record
            .qualities
            .get(time_key)
            .map(|v| v.as_slice())
            .ok_or_else(|| ProfileError::MissingTimeKey {
                node_id: id,
                time_key: time_key.to_string(),
            })
    }
}

// --- Grid Arithmetic ---

/// Fractional digits needed to print multiples of `step` exactly, with a
/// floor of one so whole numbers keep a trailing ".0" like the generator
/// writes them.
pub fn step_decimals(step: f64) -> usize {
    let mut decimals = 1usize;
    loop {
        let scaled = step * 10f64.powi(decimals as i32);
        if (scaled - scaled.round()).abs() < 1e-6 || decimals >= 6 {
            return decimals;
        }
        decimals += 1;
    }
}

/// Rounds a grid time into its store key, e.g. 0.30000000000000004 -> "0.3".
pub fn time_key(time: f64, step: f64) -> String {
    format!("{:.*}", step_decimals(step), time)
}

/// Quantizes an arbitrary non-negative time down onto the grid. The small
/// epsilon keeps times that are one float ulp under a grid point from
/// falling a whole step short.
pub fn quantize(time: f64, step: f64) -> f64 {
    (time / step + 1e-9).floor() * step
}
