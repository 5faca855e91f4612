//! File-backed holder of the latest artifact per key.
//!
//! Every slot sits behind its own async mutex. A publish writes the bytes to a
//! temporary file in the output directory, renames it over the final name and
//! only then swaps the in-memory handle, all while holding the slot's lock.
//! Readers take the same lock and clone an `Arc<Artifact>`, so they observe
//! either the previous artifact or the new one, never a partial write.

use std::{
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Arc,
    time::{Instant, SystemTime},
};

use bytes::Bytes;
use dashmap::DashMap;
use metrics::counter;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::{
    fs,
    sync::{Mutex, OwnedMutexGuard},
};
use tracing::{debug, info, warn};

use crate::{
    config::{LockScope, OutputSettings},
    domain::{
        artifact::{Artifact, ArtifactFormat},
        slot::SlotKey,
    },
    infra::telemetry::SLOT_PUBLISH_TOTAL,
};

const SOURCE: &str = "infra::slots";

#[derive(Debug, Error)]
pub enum SlotError {
    #[error("failed to prepare output directory `{path}`: {source}")]
    Init {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to persist artifact `{path}`: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

type Slot = Arc<Mutex<Option<Arc<Artifact>>>>;

pub struct SlotStore {
    directory: PathBuf,
    base_name: String,
    format: ArtifactFormat,
    lock_scope: LockScope,
    slots: DashMap<SlotKey, Slot>,
    pipeline_lock: Arc<Mutex<()>>,
}

impl SlotStore {
    /// Open the store rooted at the configured output directory, creating it if
    /// necessary and loading artifacts persisted by a previous run.
    pub async fn open(
        output: &OutputSettings,
        format: ArtifactFormat,
        lock_scope: LockScope,
    ) -> Result<Self, SlotError> {
        let directory = absolute_directory(&output.directory).map_err(|source| SlotError::Init {
            path: output.directory.clone(),
            source,
        })?;
        fs::create_dir_all(&directory)
            .await
            .map_err(|source| SlotError::Init {
                path: directory.clone(),
                source,
            })?;

        let store = Self {
            directory,
            base_name: output.base_name.clone(),
            format,
            lock_scope,
            slots: DashMap::new(),
            pipeline_lock: Arc::new(Mutex::new(())),
        };
        store.hydrate().await?;
        Ok(store)
    }

    pub fn lock_scope(&self) -> LockScope {
        self.lock_scope
    }

    pub fn format(&self) -> ArtifactFormat {
        self.format
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// On-disk location of the slot's artifact.
    pub fn artifact_path(&self, key: &SlotKey) -> PathBuf {
        self.directory
            .join(key.file_name(&self.base_name, self.format))
    }

    /// Store-wide guard held across raster, encode and publish when the store
    /// runs with [`LockScope::Global`]; `None` for per-key locking.
    pub async fn pipeline_guard(&self) -> Option<OwnedMutexGuard<()>> {
        match self.lock_scope {
            LockScope::PerKey => None,
            LockScope::Global => Some(Arc::clone(&self.pipeline_lock).lock_owned().await),
        }
    }

    /// Atomically replace the slot's artifact. The last caller to acquire the
    /// slot lock determines what readers see.
    pub async fn publish(&self, key: &SlotKey, bytes: Bytes) -> Result<Arc<Artifact>, SlotError> {
        let started_at = Instant::now();
        let slot = self.slot(key);
        let mut current = slot.lock().await;

        let path = self.artifact_path(key);
        let directory = self.directory.clone();
        let target = path.clone();
        let payload = bytes.clone();
        tokio::task::spawn_blocking(move || persist_atomically(&directory, &target, &payload))
            .await
            .map_err(io::Error::other)
            .and_then(|result| result)
            .map_err(|source| {
                warn!(
                    target = SOURCE,
                    op = "slots::publish",
                    result = "error",
                    key = %key,
                    path = %path.display(),
                    error = %source,
                    "Failed to persist artifact; slot left unchanged"
                );
                SlotError::Persist {
                    path: path.clone(),
                    source,
                }
            })?;

        let artifact = Arc::new(Artifact::new(key.clone(), bytes, self.format));
        *current = Some(Arc::clone(&artifact));
        drop(current);

        counter!(SLOT_PUBLISH_TOTAL).increment(1);
        debug!(
            target = SOURCE,
            op = "slots::publish",
            result = "ok",
            key = %key,
            bytes = artifact.len(),
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            path = %path.display(),
            "Artifact published"
        );

        Ok(artifact)
    }

    /// Current artifact for the key, or `None` while the slot is absent.
    pub async fn read(&self, key: &SlotKey) -> Option<Arc<Artifact>> {
        let slot = self.slots.get(key).map(|entry| Arc::clone(entry.value()))?;
        let current = slot.lock().await;
        current.clone()
    }

    fn slot(&self, key: &SlotKey) -> Slot {
        Arc::clone(self.slots.entry(key.clone()).or_default().value())
    }

    async fn hydrate(&self) -> Result<(), SlotError> {
        let init_error = |source| SlotError::Init {
            path: self.directory.clone(),
            source,
        };

        let mut entries = fs::read_dir(&self.directory).await.map_err(init_error)?;
        let mut restored = 0usize;
        while let Some(entry) = entries.next_entry().await.map_err(init_error)? {
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let Some(key) = SlotKey::from_file_name(file_name, &self.base_name, self.format)
            else {
                continue;
            };

            let path = entry.path();
            let loaded = match fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(
                        target = SOURCE,
                        op = "slots::hydrate",
                        result = "skipped",
                        path = %path.display(),
                        error = %err,
                        "Failed to load persisted artifact"
                    );
                    continue;
                }
            };
            let produced_at = entry
                .metadata()
                .await
                .and_then(|meta| meta.modified())
                .map(OffsetDateTime::from)
                .unwrap_or_else(|_| OffsetDateTime::from(SystemTime::now()));

            let artifact = Artifact {
                key: key.clone(),
                bytes: Bytes::from(loaded),
                format: self.format,
                produced_at,
            };
            self.slots
                .insert(key, Arc::new(Mutex::new(Some(Arc::new(artifact)))));
            restored += 1;
        }

        info!(
            target = SOURCE,
            op = "slots::hydrate",
            restored,
            directory = %self.directory.display(),
            "Slot store ready"
        );
        Ok(())
    }
}

fn absolute_directory(directory: &Path) -> io::Result<PathBuf> {
    if directory.is_absolute() {
        Ok(directory.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(directory))
    }
}

fn persist_atomically(directory: &Path, target: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut staged = tempfile::Builder::new()
        .prefix(".slot-")
        .suffix(".tmp")
        .tempfile_in(directory)?;
    staged.write_all(bytes)?;
    staged.as_file().sync_all()?;
    staged.persist(target).map_err(|err| err.error)?;
    Ok(())
}
