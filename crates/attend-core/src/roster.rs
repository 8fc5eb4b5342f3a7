//! Employee roster, reference embeddings and the on-disk embedding cache.
//!
//! Reference embeddings are expensive: one photo fetch and one model call per
//! employee. The cache is keyed by a fingerprint of the upstream roster so a
//! restart with an unchanged roster skips all of that work.

use crate::config::EnhanceConfig;
use crate::enhance::enhance_photo;
use crate::model::{EmbeddingModel, ModelError};
use crate::quality::QualityGate;
use crate::types::{Embedding, EmployeeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RosterError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed cache file: {0}")]
    Malformed(String),
    #[error("cache serialization failed: {0}")]
    Serialize(String),
    #[error("cache task failed: {0}")]
    Task(String),
}

#[derive(Error, Debug)]
pub enum PhotoError {
    #[error("photo fetch failed: {0}")]
    Fetch(String),
    #[error("photo not found: {0}")]
    NotFound(String),
}

/// Why one employee produced no reference embedding.
#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("no photo reference")]
    NoPhoto,
    #[error(transparent)]
    Photo(#[from] PhotoError),
    #[error("photo decode failed: {0}")]
    Decode(String),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("no face found in photo")]
    NoFace,
    #[error("face failed quality gate")]
    Rejected,
}

/// Upstream roster row: identity plus an optional photo reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmployeeRef {
    pub id: EmployeeId,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "photoUrl", default)]
    pub photo: Option<String>,
}

/// Stable SHA-256 hex digest over `"{id}-{photo}"` for every row, in order.
pub fn fingerprint(employees: &[EmployeeRef]) -> String {
    let mut hasher = Sha256::new();
    for employee in employees {
        hasher.update(format!(
            "{}-{}",
            employee.id,
            employee.photo.as_deref().unwrap_or("")
        ));
    }
    format!("{:x}", hasher.finalize())
}

/// One known identity with its reference embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct RosterEntry {
    pub employee_id: EmployeeId,
    pub embedding: Embedding,
}

/// Immutable set of reference embeddings. Replaced wholesale on reload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Roster {
    entries: Vec<RosterEntry>,
    fingerprint: Option<String>,
}

impl Roster {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(entries: Vec<RosterEntry>, fingerprint: Option<String>) -> Self {
        Self {
            entries,
            fingerprint,
        }
    }

    pub fn entries(&self) -> &[RosterEntry] {
        &self.entries
    }

    pub fn employee_ids(&self) -> impl Iterator<Item = EmployeeId> + '_ {
        self.entries.iter().map(|e| e.employee_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn fingerprint(&self) -> Option<&str> {
        self.fingerprint.as_deref()
    }
}

/// Serialized cache contents. `employee_ids[i]` owns `embeddings[i]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedRoster {
    pub fingerprint: String,
    pub employee_ids: Vec<EmployeeId>,
    pub embeddings: Vec<Embedding>,
    pub created_at: DateTime<Utc>,
}

impl CachedRoster {
    pub fn from_roster(roster: &Roster, fingerprint: String) -> Self {
        Self {
            fingerprint,
            employee_ids: roster.employee_ids().collect(),
            embeddings: roster.entries().iter().map(|e| e.embedding.clone()).collect(),
            created_at: Utc::now(),
        }
    }

    pub fn into_roster(self) -> Roster {
        let entries = self
            .employee_ids
            .into_iter()
            .zip(self.embeddings)
            .map(|(employee_id, embedding)| RosterEntry {
                employee_id,
                embedding,
            })
            .collect();
        Roster::new(entries, Some(self.fingerprint))
    }
}

/// JSON file holding the last computed roster.
#[derive(Debug, Clone)]
pub struct EmbeddingCache {
    path: PathBuf,
}

impl EmbeddingCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the cache. `Ok(None)` when no file exists yet.
    pub fn load(&self) -> Result<Option<CachedRoster>, RosterError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let cached: CachedRoster =
            serde_json::from_str(&raw).map_err(|e| RosterError::Malformed(e.to_string()))?;
        if cached.employee_ids.len() != cached.embeddings.len() {
            return Err(RosterError::Malformed(format!(
                "{} ids but {} embeddings",
                cached.employee_ids.len(),
                cached.embeddings.len()
            )));
        }
        Ok(Some(cached))
    }

    /// Write the cache via a sibling temp file and rename.
    pub fn save(&self, cached: &CachedRoster) -> Result<(), RosterError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json =
            serde_json::to_vec(cached).map_err(|e| RosterError::Serialize(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Run blocking cache file I/O off the async runtime.
async fn on_blocking_pool<T, F>(
    cache: &EmbeddingCache,
    op: F,
) -> Result<T, RosterError>
where
    T: Send + 'static,
    F: FnOnce(&EmbeddingCache) -> Result<T, RosterError> + Send + 'static,
{
    let cache = cache.clone();
    tokio::task::spawn_blocking(move || op(&cache))
        .await
        .map_err(|e| RosterError::Task(e.to_string()))?
}

/// Resolves a photo reference to raw image bytes.
pub trait PhotoSource {
    fn fetch_photo(
        &self,
        reference: &str,
    ) -> impl Future<Output = Result<Vec<u8>, PhotoError>> + Send;
}

/// Builds a [`Roster`] from upstream rows, reusing the cache when the
/// fingerprint matches.
pub struct RosterLoader<P, M> {
    photos: P,
    model: M,
    gate: QualityGate,
    enhance: EnhanceConfig,
    cache: Option<EmbeddingCache>,
}

impl<P: PhotoSource, M: EmbeddingModel> RosterLoader<P, M> {
    pub fn new(photos: P, model: M, gate: QualityGate, enhance: EnhanceConfig) -> Self {
        Self {
            photos,
            model,
            gate,
            enhance,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: EmbeddingCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Produce the roster for `employees`. Never fails: per-employee problems
    /// are logged and skipped, cache problems fall back to recomputation.
    pub async fn load(&self, employees: &[EmployeeRef]) -> Roster {
        let fingerprint = fingerprint(employees);

        if let Some(roster) = self.cached(&fingerprint).await {
            return roster;
        }

        tracing::info!(
            employees = employees.len(),
            "computing reference embeddings"
        );
        let mut entries = Vec::with_capacity(employees.len());
        for employee in employees {
            match self.enroll(employee).await {
                Ok(embedding) => entries.push(RosterEntry {
                    employee_id: employee.id,
                    embedding,
                }),
                Err(EnrollError::NoPhoto) => {
                    tracing::debug!(employee = %employee.id, "no photo, skipping");
                }
                Err(e) => {
                    tracing::warn!(
                        employee = %employee.id,
                        name = %employee.name,
                        error = %e,
                        "skipping employee"
                    );
                }
            }
        }

        let roster = Roster::new(entries, Some(fingerprint.clone()));
        tracing::info!(
            enrolled = roster.len(),
            total = employees.len(),
            "roster embeddings ready"
        );

        if let Some(cache) = &self.cache {
            if roster.is_empty() {
                tracing::warn!("no reference embeddings, cache not written");
            } else {
                let cached = CachedRoster::from_roster(&roster, fingerprint);
                if let Err(e) = on_blocking_pool(cache, move |c| c.save(&cached)).await {
                    tracing::warn!(
                        path = %cache.path().display(),
                        error = %e,
                        "failed to write cache"
                    );
                }
            }
        }
        roster
    }

    async fn cached(&self, fingerprint: &str) -> Option<Roster> {
        let cache = self.cache.as_ref()?;
        match on_blocking_pool(cache, |c| c.load()).await {
            Ok(Some(cached))
                if cached.fingerprint == fingerprint && !cached.embeddings.is_empty() =>
            {
                tracing::info!(
                    entries = cached.embeddings.len(),
                    created_at = %cached.created_at,
                    "reusing cached embeddings"
                );
                Some(cached.into_roster())
            }
            Ok(Some(_)) => {
                tracing::info!("roster changed, cache is stale");
                None
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(
                    path = %cache.path().display(),
                    error = %e,
                    "ignoring unreadable cache"
                );
                None
            }
        }
    }

    async fn enroll(&self, employee: &EmployeeRef) -> Result<Embedding, EnrollError> {
        let reference = employee
            .photo
            .as_deref()
            .filter(|r| !r.is_empty())
            .ok_or(EnrollError::NoPhoto)?;

        let bytes = self.photos.fetch_photo(reference).await?;
        let photo = image::load_from_memory(&bytes)
            .map_err(|e| EnrollError::Decode(e.to_string()))?
            .to_rgb8();

        let enhanced = enhance_photo(&photo, &self.enhance);
        let face = self
            .model
            .detect(&enhanced)
            .await?
            .into_iter()
            .next()
            .ok_or(EnrollError::NoFace)?;

        // Gate against the unprocessed photo so sharpening cannot inflate the blur score.
        let verdict = self.gate.assess_in_frame(&photo, &face.bbox);
        if !verdict.accepted {
            return Err(EnrollError::Rejected);
        }
        Ok(face.embedding)
    }
}
