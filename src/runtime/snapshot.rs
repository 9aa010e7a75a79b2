//! Versioned, checksummed hierarchy snapshots.
//!
//! ## Blob layout (little-endian)
//!
//! ```text
//! [magic: 4 bytes "PHSN"][version: u16][payload length: u64][crc32: u32][payload]
//! ```
//!
//! The payload is the bincode encoding of the topology descriptor followed by
//! the step counter, the step phase, the pooled codes and every layer's
//! weights and state in layer order. Loading validates the whole blob and builds the replacement
//! layers before touching the live hierarchy, so a failed load leaves it
//! exactly as it was.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use ndarray::Array4;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::field::Field;
use crate::core::hierarchy::{Hierarchy, StepPhase, Topology};
use crate::core::layer_state::LayerState;
use crate::core::predictor::{PredictorLayer, PredictorState};
use crate::core::sparse_features::SparseFeatures;
use crate::error::{PersistenceError, Result};

/// Leading bytes of every snapshot.
pub const SNAPSHOT_MAGIC: [u8; 4] = *b"PHSN";

/// Current blob format version.
pub const SNAPSHOT_VERSION: u16 = 2;

/// magic + version + payload length + checksum
pub const HEADER_LEN: usize = 4 + 2 + 8 + 4;

#[derive(Serialize)]
struct SnapshotRef<'a> {
    topology: &'a Topology,
    steps: u64,
    phase: StepPhase,
    pools: &'a [Field],
    encoders: Vec<EncoderRef<'a>>,
    predictors: Vec<Vec<PredictorRef<'a>>>,
}

#[derive(Serialize)]
struct EncoderRef<'a> {
    weights: &'a [Array4<f32>],
    state: &'a LayerState,
}

#[derive(Serialize)]
struct PredictorRef<'a> {
    weights: &'a [Array4<f32>],
    state: &'a PredictorState,
}

#[derive(Deserialize)]
struct Snapshot {
    topology: Topology,
    steps: u64,
    phase: StepPhase,
    pools: Vec<Field>,
    encoders: Vec<EncoderSnapshot>,
    predictors: Vec<Vec<PredictorSnapshot>>,
}

#[derive(Deserialize)]
struct EncoderSnapshot {
    weights: Vec<Array4<f32>>,
    state: LayerState,
}

#[derive(Deserialize)]
struct PredictorSnapshot {
    weights: Vec<Array4<f32>>,
    state: PredictorState,
}

fn weights_match(live: &[Array4<f32>], restored: &[Array4<f32>]) -> bool {
    live.len() == restored.len() && live.iter().zip(restored).all(|(a, b)| a.dim() == b.dim())
}

/// Serialise a hierarchy into a snapshot blob.
pub fn encode(hierarchy: &Hierarchy) -> std::result::Result<Vec<u8>, PersistenceError> {
    let snapshot = SnapshotRef {
        topology: hierarchy.topology(),
        steps: hierarchy.steps(),
        phase: hierarchy.phase(),
        pools: hierarchy.pools(),
        encoders: hierarchy
            .encoders()
            .iter()
            .map(|e| EncoderRef {
                weights: e.weights(),
                state: e.state(),
            })
            .collect(),
        predictors: hierarchy
            .predictor_levels()
            .iter()
            .map(|level| {
                level
                    .iter()
                    .map(|p| PredictorRef {
                        weights: p.weights(),
                        state: p.state(),
                    })
                    .collect()
            })
            .collect(),
    };

    let payload =
        bincode::serialize(&snapshot).map_err(|e| PersistenceError::Encode(e.to_string()))?;

    let mut blob = Vec::with_capacity(HEADER_LEN + payload.len());
    blob.extend_from_slice(&SNAPSHOT_MAGIC);
    blob.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
    blob.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    blob.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    blob.extend_from_slice(&payload);
    Ok(blob)
}

/// Check the header and checksum, returning the payload.
fn open(bytes: &[u8]) -> std::result::Result<&[u8], PersistenceError> {
    if bytes.len() < HEADER_LEN {
        return Err(PersistenceError::CorruptState(format!(
            "blob of {} bytes is shorter than the {HEADER_LEN}-byte header",
            bytes.len()
        )));
    }
    if bytes[0..4] != SNAPSHOT_MAGIC {
        return Err(PersistenceError::CorruptState("bad magic".to_string()));
    }
    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version != SNAPSHOT_VERSION {
        return Err(PersistenceError::UnsupportedVersion {
            expected: SNAPSHOT_VERSION,
            found: version,
        });
    }
    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&bytes[6..14]);
    let len = u64::from_le_bytes(len_bytes);
    let mut crc_bytes = [0u8; 4];
    crc_bytes.copy_from_slice(&bytes[14..18]);
    let expected_crc = u32::from_le_bytes(crc_bytes);

    let payload = &bytes[HEADER_LEN..];
    if payload.len() as u64 != len {
        return Err(PersistenceError::CorruptState(format!(
            "payload is {} bytes, header says {len}",
            payload.len()
        )));
    }
    if crc32fast::hash(payload) != expected_crc {
        return Err(PersistenceError::CorruptState("checksum mismatch".to_string()));
    }
    Ok(payload)
}

/// Validate `bytes` against `hierarchy` and swap the restored state in.
pub fn decode_into(
    hierarchy: &mut Hierarchy,
    bytes: &[u8],
) -> std::result::Result<(), PersistenceError> {
    let payload = open(bytes)?;
    let snapshot: Snapshot = bincode::deserialize(payload)
        .map_err(|e| PersistenceError::CorruptState(e.to_string()))?;

    if snapshot.topology != *hierarchy.topology() {
        return Err(PersistenceError::TopologyMismatch);
    }
    if snapshot.encoders.len() != hierarchy.encoders().len()
        || snapshot.predictors.len() != hierarchy.predictor_levels().len()
    {
        return Err(PersistenceError::CorruptState(
            "layer count disagrees with topology".to_string(),
        ));
    }

    let live_pools = hierarchy.pools();
    if live_pools.len() != snapshot.pools.len()
        || live_pools
            .iter()
            .zip(&snapshot.pools)
            .any(|(live, restored)| !live.same_shape(restored))
    {
        return Err(PersistenceError::CorruptState(
            "pooled codes disagree with topology".to_string(),
        ));
    }

    let mut encoders = Vec::with_capacity(snapshot.encoders.len());
    for (i, (live, restored)) in hierarchy
        .encoders()
        .iter()
        .zip(snapshot.encoders)
        .enumerate()
    {
        if !weights_match(live.weights(), &restored.weights)
            || !live.state().same_shape(&restored.state)
        {
            return Err(PersistenceError::CorruptState(format!(
                "encoder {i} buffers disagree with topology"
            )));
        }
        encoders.push(SparseFeatures::from_parts(
            live.desc().clone(),
            live.alpha(),
            restored.weights,
            restored.state,
        ));
    }

    let mut predictors = Vec::with_capacity(snapshot.predictors.len());
    for (l, (live_level, restored_level)) in hierarchy
        .predictor_levels()
        .iter()
        .zip(snapshot.predictors)
        .enumerate()
    {
        if live_level.len() != restored_level.len() {
            return Err(PersistenceError::CorruptState(format!(
                "predictor level {l} size disagrees with topology"
            )));
        }
        let mut level = Vec::with_capacity(restored_level.len());
        for (live, restored) in live_level.iter().zip(restored_level) {
            if !weights_match(live.weights(), &restored.weights)
                || !live.state().same_shape(&restored.state)
            {
                return Err(PersistenceError::CorruptState(format!(
                    "predictor level {l} buffers disagree with topology"
                )));
            }
            level.push(PredictorLayer::from_parts(
                live.desc().clone(),
                live.rates().to_vec(),
                restored.weights,
                restored.state,
            ));
        }
        predictors.push(level);
    }

    hierarchy.restore(
        encoders,
        snapshot.pools,
        predictors,
        snapshot.steps,
        snapshot.phase,
    );
    Ok(())
}

/// Unique hidden sibling of `path` to stage a write in.
fn temp_path(parent: &Path, path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("snapshot");
    parent.join(format!(".{file_name}.tmp.{}", Uuid::new_v4()))
}

/// Make a completed rename durable.
#[cfg(unix)]
fn fsync_dir(path: &Path) -> std::io::Result<()> {
    File::open(path)?.sync_all()
}

#[cfg(not(unix))]
fn fsync_dir(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Write `data` to a temporary sibling of `path`, sync it and rename it over
/// `path`. The temporary file is removed if any step fails.
fn atomic_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let temp = temp_path(parent, path);
    let staged = (|| {
        let mut file = File::create(&temp)?;
        file.write_all(data)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&temp, path)
    })();
    if let Err(err) = staged {
        let _ = fs::remove_file(&temp);
        return Err(err);
    }

    fsync_dir(parent)
}

impl Hierarchy {
    /// Serialise the full hierarchy state.
    pub fn save_to_bytes(&self) -> Result<Vec<u8>> {
        Ok(encode(self)?)
    }

    /// Restore state saved from a hierarchy of identical topology.
    ///
    /// On error the hierarchy is left untouched.
    pub fn load_from_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        Ok(decode_into(self, bytes)?)
    }

    /// Save a snapshot file, replacing any existing file atomically.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let blob = encode(self)?;
        atomic_write(path, &blob)?;
        tracing::info!(
            "saved snapshot ({} bytes, step {}) to {}",
            blob.len(),
            self.steps(),
            path.display()
        );
        Ok(())
    }

    /// Load a snapshot file written by [`Hierarchy::save`].
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let blob = fs::read(path)?;
        decode_into(self, &blob)?;
        tracing::info!(
            "loaded snapshot ({} bytes, step {}) from {}",
            blob.len(),
            self.steps(),
            path.display()
        );
        Ok(())
    }
}
