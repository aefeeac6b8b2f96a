//! Fingerprinted artifact cache.
//!
//! Each output directory carries a small JSON manifest recording, per artifact file,
//! the fingerprint of the input and parameters it was produced from.  An artifact is
//! reused only while its recorded fingerprint still matches; otherwise it is rebuilt.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::error::{LmPrepError, Result};

/// File name of the manifest stored in each output directory.
pub const MANIFEST_FILE: &str = ".lmprep-cache.json";

const MANIFEST_VERSION: u32 = 1;

/// SHA-256 digest identifying the input and parameters behind an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Starts a fingerprint over the identity of `input`: canonical path, size and mtime.
    pub fn for_input<P: AsRef<Path>>(input: P) -> Result<FingerprintBuilder> {
        let input = input.as_ref();
        let canonical = input
            .canonicalize()
            .map_err(|err| LmPrepError::io(err, Some(input.to_path_buf())))?;
        let metadata =
            fs::metadata(&canonical).map_err(|err| LmPrepError::io(err, Some(canonical.clone())))?;
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |elapsed| elapsed.as_nanos());

        Ok(FingerprintBuilder::new()
            .param("input", canonical.to_string_lossy())
            .param("size", metadata.len())
            .param("mtime", mtime))
    }

    /// Hex-encoded digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Incrementally hashes named parameters into a [`Fingerprint`].
#[derive(Clone)]
pub struct FingerprintBuilder {
    hasher: Sha256,
}

impl FingerprintBuilder {
    fn new() -> Self {
        let mut hasher = Sha256::new();
        hasher.update(MANIFEST_VERSION.to_le_bytes());
        Self { hasher }
    }

    /// Folds a named parameter into the digest.
    #[must_use]
    pub fn param(mut self, name: &str, value: impl ToString) -> Self {
        let value = value.to_string();
        for part in [name.as_bytes(), value.as_bytes()] {
            self.hasher.update((part.len() as u64).to_le_bytes());
            self.hasher.update(part);
        }
        self
    }

    /// Finalises the digest.
    #[must_use]
    pub fn finish(self) -> Fingerprint {
        Fingerprint(hex::encode(self.hasher.finalize()))
    }
}

/// Cache status of a single artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// The artifact does not exist yet.
    Absent,
    /// The artifact exists and was produced under the same fingerprint.
    Valid,
    /// The artifact exists but the manifest has no record of it.
    Untracked,
    /// The artifact exists but was produced under a different fingerprint.
    Stale,
}

impl CacheState {
    /// Returns true when the existing artifact should be reused as-is.
    #[must_use]
    pub fn is_reusable(self) -> bool {
        matches!(self, Self::Valid | Self::Untracked)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Manifest {
    version: u32,
    artifacts: BTreeMap<String, Fingerprint>,
}

/// Manifest-backed cache for the artifacts of one output directory.
#[derive(Debug)]
pub struct ArtifactCache {
    dir: PathBuf,
    manifest: Manifest,
}

impl ArtifactCache {
    /// Loads the manifest in `dir`, starting empty when none exists.
    ///
    /// A manifest written by an incompatible version is discarded, which makes every
    /// existing artifact untracked.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let path = dir.join(MANIFEST_FILE);
        let manifest = match fs::read_to_string(&path) {
            Ok(text) => {
                let manifest: Manifest = serde_json::from_str(&text)?;
                if manifest.version == MANIFEST_VERSION {
                    manifest
                } else {
                    warn!(
                        "ignoring cache manifest {} with unsupported version {}",
                        path.display(),
                        manifest.version
                    );
                    Manifest::default()
                }
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Manifest::default(),
            Err(err) => return Err(LmPrepError::io(err, Some(path))),
        };
        Ok(Self { dir, manifest })
    }

    /// Directory the cache manages.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Classifies `artifact` against the expected fingerprint.
    #[must_use]
    pub fn state(&self, artifact: &Path, expected: &Fingerprint) -> CacheState {
        if !artifact.exists() {
            return CacheState::Absent;
        }
        match self.manifest.artifacts.get(&Self::key(artifact)) {
            Some(recorded) if recorded == expected => CacheState::Valid,
            Some(_) => CacheState::Stale,
            None => CacheState::Untracked,
        }
    }

    /// Records the fingerprint of a freshly written artifact and persists the manifest.
    pub fn record(&mut self, artifact: &Path, fingerprint: Fingerprint) -> Result<()> {
        let key = Self::key(artifact);
        debug!("recording cache entry {key} -> {}", fingerprint.as_str());
        self.manifest.artifacts.insert(key, fingerprint);
        self.save()
    }

    fn save(&mut self) -> Result<()> {
        self.manifest.version = MANIFEST_VERSION;
        let path = self.dir.join(MANIFEST_FILE);
        let json = serde_json::to_vec_pretty(&self.manifest)?;
        write_atomic(&path, |writer| {
            writer
                .write_all(&json)
                .map_err(|err| LmPrepError::io(err, Some(path.clone())))
        })
    }

    fn key(artifact: &Path) -> String {
        artifact
            .file_name()
            .map_or_else(
                || artifact.to_string_lossy(),
                |name| name.to_string_lossy(),
            )
            .into_owned()
    }
}

/// Writes `path` through a temporary file in the same directory and renames it into place.
///
/// Readers never observe a partially written file; on error the temporary file is removed.
pub fn write_atomic<T, F>(path: &Path, write: F) -> Result<T>
where
    F: FnOnce(&mut BufWriter<&File>) -> Result<T>,
{
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let temp = NamedTempFile::new_in(parent)
        .map_err(|err| LmPrepError::io(err, Some(parent.to_path_buf())))?;
    let value = {
        let mut writer = BufWriter::new(temp.as_file());
        let value = write(&mut writer)?;
        writer
            .flush()
            .map_err(|err| LmPrepError::io(err, Some(path.to_path_buf())))?;
        value
    };
    temp.persist(path)
        .map_err(|err| LmPrepError::io(err.error, Some(path.to_path_buf())))?;
    Ok(value)
}
