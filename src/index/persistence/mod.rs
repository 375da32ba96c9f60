
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{MetadataEntry, normalize_dimension};

const VECTORS_FILE: &str = "vectors.bin";
const METADATA_FILE: &str = "metadata.json";
/// The replaced vectors artifact, kept until the new pair is in place
const PREVIOUS_VECTORS_FILE: &str = "vectors.bin.prev";

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O failure on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to encode {artifact}: {message}")]
    Encode {
        artifact: &'static str,
        message: String,
    },

    #[error("Failed to decode {artifact}: {message}")]
    Decode {
        artifact: &'static str,
        message: String,
    },

    #[error("Corrupt snapshot: {0}")]
    Corrupt(String),
}

impl PersistenceError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Borrowed view of the store arrays handed to [`Persistence::snapshot`]
#[derive(Debug, Clone, Copy)]
pub struct SnapshotView<'a> {
    pub dimension: usize,
    pub vectors: &'a [f32],
    pub entries: &'a [MetadataEntry],
    pub ids: &'a [String],
}

/// How a restore attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// No artifacts on disk yet
    Fresh,
    /// Both artifacts were read and agree with each other
    Loaded,
    /// Artifacts were missing, unreadable or misaligned; started empty
    Reset { reason: String },
}

/// Arrays recovered from disk, always aligned
#[derive(Debug)]
pub struct Restored {
    pub vectors: Vec<f32>,
    pub entries: Vec<MetadataEntry>,
    pub ids: Vec<String>,
    pub outcome: RestoreOutcome,
}

impl Restored {
    fn empty(outcome: RestoreOutcome) -> Self {
        Self {
            vectors: Vec::new(),
            entries: Vec::new(),
            ids: Vec::new(),
            outcome,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Serialize)]
struct VectorArtifactRef<'a> {
    snapshot_id: Uuid,
    dimension: u64,
    rows: u64,
    values: &'a [f32],
}

#[derive(Deserialize)]
struct VectorArtifact {
    snapshot_id: Uuid,
    dimension: u64,
    rows: u64,
    values: Vec<f32>,
}

#[derive(Serialize)]
struct MetadataArtifactRef<'a> {
    snapshot_id: Uuid,
    entries: &'a [MetadataEntry],
    record_ids: &'a [String],
}

#[derive(Deserialize)]
struct MetadataArtifact {
    snapshot_id: Uuid,
    entries: Vec<MetadataEntry>,
    record_ids: Vec<String>,
}

/// Writes and reads the two on-disk artifacts of a vector store.
///
/// Vectors go to a `bincode` file so floats come back bit-exact; metadata
/// goes to a JSON file. Both carry the same snapshot id, which is how a
/// restore detects a pair written at different times.
pub struct Persistence {
    data_dir: PathBuf,
    dimension: usize,
    write_lock: Mutex<()>,
}

impl Persistence {
    #[inline]
    pub fn new(data_dir: impl Into<PathBuf>, dimension: usize) -> Self {
        Self {
            data_dir: data_dir.into(),
            dimension,
            write_lock: Mutex::new(()),
        }
    }

    #[inline]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    #[inline]
    pub fn vectors_path(&self) -> PathBuf {
        self.data_dir.join(VECTORS_FILE)
    }

    #[inline]
    pub fn metadata_path(&self) -> PathBuf {
        self.data_dir.join(METADATA_FILE)
    }

    #[inline]
    pub fn previous_vectors_path(&self) -> PathBuf {
        self.data_dir.join(PREVIOUS_VECTORS_FILE)
    }

    /// Write both artifacts.
    ///
    /// Each artifact is written to a temporary sibling and flushed to disk.
    /// The live vectors file is then moved aside to `vectors.bin.prev` before
    /// the two renames, and removed once both are in place. The pair of
    /// renames is not atomic: a crash between them leaves new vectors next to
    /// old metadata. The kept previous vectors match that metadata, so a
    /// restore falls back to them and loads the last complete snapshot.
    #[inline]
    pub async fn snapshot(&self, view: SnapshotView<'_>) -> Result<(), PersistenceError> {
        let rows = view.entries.len();
        if view.ids.len() != rows || view.vectors.len() != rows * view.dimension {
            return Err(PersistenceError::Corrupt(format!(
                "refusing to write misaligned state: {} vector values, {} entries, {} ids",
                view.vectors.len(),
                rows,
                view.ids.len()
            )));
        }

        let snapshot_id = Uuid::new_v4();
        let vectors = bincode::serialize(&VectorArtifactRef {
            snapshot_id,
            dimension: view.dimension as u64,
            rows: rows as u64,
            values: view.vectors,
        })
        .map_err(|e| PersistenceError::Encode {
            artifact: VECTORS_FILE,
            message: e.to_string(),
        })?;
        let metadata = serde_json::to_vec(&MetadataArtifactRef {
            snapshot_id,
            entries: view.entries,
            record_ids: view.ids,
        })
        .map_err(|e| PersistenceError::Encode {
            artifact: METADATA_FILE,
            message: e.to_string(),
        })?;

        let _guard = self.write_lock.lock().await;

        fs::create_dir_all(&self.data_dir)
            .await
            .map_err(|e| PersistenceError::io(&self.data_dir, e))?;

        let vectors_path = self.vectors_path();
        let metadata_path = self.metadata_path();
        let vectors_tmp = temp_path(&vectors_path);
        let metadata_tmp = temp_path(&metadata_path);

        write_synced(&vectors_tmp, &vectors).await?;
        write_synced(&metadata_tmp, &metadata).await?;

        // A missing live file means the previous vectors already pair with
        // the live metadata, so they stay where they are
        let previous_path = self.previous_vectors_path();
        match fs::rename(&vectors_path, &previous_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(PersistenceError::io(&vectors_path, e)),
        }

        fs::rename(&vectors_tmp, &vectors_path)
            .await
            .map_err(|e| PersistenceError::io(&vectors_path, e))?;
        fs::rename(&metadata_tmp, &metadata_path)
            .await
            .map_err(|e| PersistenceError::io(&metadata_path, e))?;
        sync_dir(&self.data_dir).await;

        match fs::remove_file(&previous_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {}", previous_path.display(), e),
        }

        debug!(
            "Snapshot {} written: {} records, {} + {} bytes",
            snapshot_id,
            rows,
            vectors.len(),
            metadata.len()
        );
        Ok(())
    }

    /// Load the store arrays, falling back to an empty store on any problem.
    ///
    /// The application must be able to start even when the artifacts are
    /// damaged, so failures are logged rather than returned.
    #[inline]
    pub async fn restore(&self) -> Restored {
        match self.read_live().await {
            Ok(Some((restored, recovered))) => {
                if recovered {
                    self.promote_previous_vectors().await;
                }
                info!(
                    "Restored {} records from {}",
                    restored.len(),
                    self.data_dir.display()
                );
                restored
            }
            Ok(None) => {
                info!(
                    "No snapshot found in {}, starting with an empty store",
                    self.data_dir.display()
                );
                Restored::empty(RestoreOutcome::Fresh)
            }
            Err(e) => {
                warn!("Failed to restore vector store, starting empty: {}", e);
                Restored::empty(RestoreOutcome::Reset {
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Strict read of both artifacts.
    ///
    /// Returns `Ok(None)` when no artifact exists and an error for any
    /// missing, unreadable or misaligned pair. Vectors left behind by an
    /// interrupted snapshot are used when they match the live metadata.
    #[inline]
    pub async fn read_snapshot(&self) -> Result<Option<Restored>, PersistenceError> {
        Ok(self.read_live().await?.map(|(restored, _)| restored))
    }

    /// Read the live pair; the flag is set when the metadata was paired with
    /// `vectors.bin.prev` instead of `vectors.bin`
    async fn read_live(&self) -> Result<Option<(Restored, bool)>, PersistenceError> {
        let vectors_path = self.vectors_path();
        let metadata_path = self.metadata_path();
        let previous_path = self.previous_vectors_path();

        let vectors_bytes = read_optional(&vectors_path).await?;
        let Some(metadata_bytes) = read_optional(&metadata_path).await? else {
            if vectors_bytes.is_some() {
                return Err(PersistenceError::Corrupt(format!(
                    "{} exists but {} is missing",
                    VECTORS_FILE, METADATA_FILE
                )));
            }
            if fs::try_exists(&previous_path).await.unwrap_or(false) {
                return Err(PersistenceError::Corrupt(format!(
                    "{} exists but {} is missing",
                    PREVIOUS_VECTORS_FILE, METADATA_FILE
                )));
            }
            return Ok(None);
        };

        let metadata: MetadataArtifact =
            serde_json::from_slice(&metadata_bytes).map_err(|e| PersistenceError::Decode {
                artifact: METADATA_FILE,
                message: e.to_string(),
            })?;

        let current = match vectors_bytes {
            Some(bytes) => decode_vectors(&bytes, VECTORS_FILE),
            None => Err(PersistenceError::Corrupt(format!(
                "{} exists but {} is missing",
                METADATA_FILE, VECTORS_FILE
            ))),
        };
        let current = match current {
            Ok(vectors) if vectors.snapshot_id == metadata.snapshot_id => {
                return self
                    .reconcile(vectors, metadata)
                    .map(|restored| Some((restored, false)));
            }
            other => other,
        };

        if let Some(bytes) = read_optional(&previous_path).await? {
            match decode_vectors(&bytes, PREVIOUS_VECTORS_FILE) {
                Ok(previous) if previous.snapshot_id == metadata.snapshot_id => {
                    warn!(
                        "Recovering snapshot {} from {} after an interrupted write",
                        metadata.snapshot_id, PREVIOUS_VECTORS_FILE
                    );
                    return self
                        .reconcile(previous, metadata)
                        .map(|restored| Some((restored, true)));
                }
                Ok(previous) => debug!(
                    "Ignoring stale {} from snapshot {}",
                    PREVIOUS_VECTORS_FILE, previous.snapshot_id
                ),
                Err(e) => debug!("Ignoring unreadable {}: {}", PREVIOUS_VECTORS_FILE, e),
            }
        }

        self.reconcile(current?, metadata)
            .map(|restored| Some((restored, false)))
    }

    /// Put recovered vectors back under the live name so the next snapshot
    /// moves them aside again instead of the unmatched ones
    async fn promote_previous_vectors(&self) {
        let _guard = self.write_lock.lock().await;

        let previous_path = self.previous_vectors_path();
        let vectors_path = self.vectors_path();
        match fs::rename(&previous_path, &vectors_path).await {
            Ok(()) => {
                sync_dir(&self.data_dir).await;
                info!("Restored {} from {}", VECTORS_FILE, PREVIOUS_VECTORS_FILE);
            }
            Err(e) => warn!(
                "Failed to move {} back to {}: {}",
                previous_path.display(),
                vectors_path.display(),
                e
            ),
        }
    }

    /// Check that the two artifacts describe the same snapshot and bring the
    /// vectors to the configured dimension.
    fn reconcile(
        &self,
        vectors: VectorArtifact,
        metadata: MetadataArtifact,
    ) -> Result<Restored, PersistenceError> {
        if vectors.snapshot_id != metadata.snapshot_id {
            return Err(PersistenceError::Corrupt(format!(
                "artifacts belong to different snapshots ({} vs {})",
                vectors.snapshot_id, metadata.snapshot_id
            )));
        }

        let rows = usize::try_from(vectors.rows).map_err(|_| {
            PersistenceError::Corrupt(format!("row count {} too large", vectors.rows))
        })?;
        let stored_dimension = usize::try_from(vectors.dimension).map_err(|_| {
            PersistenceError::Corrupt(format!("dimension {} too large", vectors.dimension))
        })?;

        if rows != metadata.entries.len() || rows != metadata.record_ids.len() {
            return Err(PersistenceError::Corrupt(format!(
                "{} vectors but {} metadata entries and {} ids",
                rows,
                metadata.entries.len(),
                metadata.record_ids.len()
            )));
        }

        if rows > 0 && stored_dimension == 0 {
            return Err(PersistenceError::Corrupt(format!(
                "{} rows recorded with dimension 0",
                rows
            )));
        }

        if rows.checked_mul(stored_dimension) != Some(vectors.values.len()) {
            return Err(PersistenceError::Corrupt(format!(
                "{} values cannot hold {} rows of dimension {}",
                vectors.values.len(),
                rows,
                stored_dimension
            )));
        }

        let mut seen = HashSet::with_capacity(rows);
        for (entry, id) in metadata.entries.iter().zip(&metadata.record_ids) {
            if entry.id != *id {
                return Err(PersistenceError::Corrupt(format!(
                    "id list and metadata disagree: {} vs {}",
                    id, entry.id
                )));
            }
            if !seen.insert(id.as_str()) {
                return Err(PersistenceError::Corrupt(format!("duplicate id {}", id)));
            }
        }

        let values = if rows > 0 && stored_dimension != self.dimension {
            warn!(
                "Snapshot dimension {} differs from configured dimension {}, resizing vectors",
                stored_dimension, self.dimension
            );
            let mut resized = Vec::with_capacity(rows * self.dimension);
            for row in vectors.values.chunks_exact(stored_dimension) {
                resized.extend(normalize_dimension(row.to_vec(), self.dimension));
            }
            resized
        } else {
            vectors.values
        };

        Ok(Restored {
            vectors: values,
            entries: metadata.entries,
            ids: metadata.record_ids,
            outcome: RestoreOutcome::Loaded,
        })
    }

    /// Total bytes used by the live artifacts
    #[inline]
    pub async fn storage_size(&self) -> u64 {
        let mut total = 0;
        for path in [self.vectors_path(), self.metadata_path()] {
            if let Ok(meta) = fs::metadata(&path).await {
                total += meta.len();
            }
        }
        total
    }

    /// Delete both artifacts and any leftover temporary or previous files
    #[inline]
    pub async fn remove_artifacts(&self) -> Result<(), PersistenceError> {
        let _guard = self.write_lock.lock().await;

        let vectors_path = self.vectors_path();
        let metadata_path = self.metadata_path();
        for path in [
            temp_path(&vectors_path),
            temp_path(&metadata_path),
            self.previous_vectors_path(),
            vectors_path,
            metadata_path,
        ] {
            match fs::remove_file(&path).await {
                Ok(()) => debug!("Removed {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    error!("Failed to remove {}: {}", path.display(), e);
                    return Err(PersistenceError::io(&path, e));
                }
            }
        }
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn decode_vectors(bytes: &[u8], artifact: &'static str) -> Result<VectorArtifact, PersistenceError> {
    bincode::deserialize(bytes).map_err(|e| PersistenceError::Decode {
        artifact,
        message: e.to_string(),
    })
}

async fn write_synced(path: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
    let mut file = fs::File::create(path)
        .await
        .map_err(|e| PersistenceError::io(path, e))?;
    file.write_all(bytes)
        .await
        .map_err(|e| PersistenceError::io(path, e))?;
    file.sync_all()
        .await
        .map_err(|e| PersistenceError::io(path, e))?;
    Ok(())
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, PersistenceError> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(PersistenceError::io(path, e)),
    }
}

/// Make the renames durable. Best effort: not every platform can fsync a
/// directory handle.
async fn sync_dir(dir: &Path) {
    #[cfg(unix)]
    {
        match fs::File::open(dir).await {
            Ok(handle) => {
                if let Err(e) = handle.sync_all().await {
                    debug!("Could not sync directory {}: {}", dir.display(), e);
                }
            }
            Err(e) => debug!("Could not open directory {}: {}", dir.display(), e),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
}
