//! Audio file bytes kept beside the snapshot. Every blob is written twice,
//! a primary and a backup copy, each with a sidecar holding its checksum.
//!
//! ```text
//! {dir}/
//! ├── <id>.bin
//! ├── <id>.json
//! └── backup/
//!     ├── <id>.bin
//!     └── <id>.json
//! ```

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use common::AudioData;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::write_atomic;

/// BLAKE3 of the bytes, truncated to 128 bits and hex encoded
pub fn checksum(data: &[u8]) -> String {
    let hash = blake3::hash(data);
    hex::encode(&hash.as_bytes()[..16])
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BlobMeta {
    pub id: String,
    pub checksum: String,
    pub size: u64,
    pub stored_at: DateTime<Utc>,
}

#[derive(Debug)]
pub enum BlobLoad {
    Primary(AudioData),
    /// The primary copy was bad and has been rewritten from the backup
    Recovered(AudioData),
    Missing,
}

impl BlobLoad {
    pub fn into_data(self) -> Option<AudioData> {
        match self {
            BlobLoad::Primary(data) | BlobLoad::Recovered(data) => Some(data),
            BlobLoad::Missing => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AudioBlobStore {
    dir: PathBuf,
}

impl AudioBlobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn backup_dir(&self) -> PathBuf {
        self.dir.join("backup")
    }

    /// Blob ids become file names, so only plain names are accepted
    fn check_id(id: &str) -> Result<()> {
        let plain = id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if id.is_empty() || !plain {
            bail!("invalid audio id {:?}", id);
        }
        Ok(())
    }

    fn paths(dir: &Path, id: &str) -> (PathBuf, PathBuf) {
        (dir.join(format!("{id}.bin")), dir.join(format!("{id}.json")))
    }

    pub fn save(&self, id: &str, data: &[u8]) -> Result<BlobMeta> {
        Self::check_id(id)?;
        let meta = BlobMeta {
            id: id.to_string(),
            checksum: checksum(data),
            size: data.len() as u64,
            stored_at: Utc::now(),
        };

        for dir in [self.dir.clone(), self.backup_dir()] {
            write_copy(&dir, &meta, data)
                .with_context(|| format!("saving audio {} to {}", id, dir.display()))?;
        }

        info!("Stored audio {} ({} bytes)", id, data.len());
        Ok(meta)
    }

    /// Load a blob, preferring the primary copy and repairing it from the
    /// backup when it fails its checksum
    pub fn load(&self, id: &str) -> Result<BlobLoad> {
        Self::check_id(id)?;
        match read_copy(&self.dir, id) {
            Ok(data) => return Ok(BlobLoad::Primary(data.into())),
            Err(e) => warn!("Primary copy of audio {} unusable: {:#}", id, e),
        }

        match read_copy(&self.backup_dir(), id) {
            Ok(data) => {
                self.save(id, &data)
                    .with_context(|| format!("repairing audio {id}"))?;
                info!("Recovered audio {} from backup", id);
                Ok(BlobLoad::Recovered(data.into()))
            }
            Err(e) => {
                warn!("Backup copy of audio {} unusable: {:#}", id, e);
                Ok(BlobLoad::Missing)
            }
        }
    }

    pub fn remove(&self, id: &str) -> Result<()> {
        Self::check_id(id)?;
        for dir in [self.dir.clone(), self.backup_dir()] {
            let (bin, meta) = Self::paths(&dir, id);
            for path in [bin, meta] {
                if path.exists() {
                    fs::remove_file(&path)
                        .with_context(|| format!("removing {}", path.display()))?;
                }
            }
        }
        Ok(())
    }
}

fn write_copy(dir: &Path, meta: &BlobMeta, data: &[u8]) -> Result<()> {
    let (bin, sidecar) = AudioBlobStore::paths(dir, &meta.id);
    write_atomic(&bin, data)?;
    write_atomic(&sidecar, serde_json::to_string_pretty(meta)?.as_bytes())
}

fn read_copy(dir: &Path, id: &str) -> Result<Vec<u8>> {
    let (bin, sidecar) = AudioBlobStore::paths(dir, id);

    let meta: BlobMeta = serde_json::from_str(
        &fs::read_to_string(&sidecar).with_context(|| format!("reading {}", sidecar.display()))?,
    )
    .with_context(|| format!("parsing {}", sidecar.display()))?;
    let data = fs::read(&bin).with_context(|| format!("reading {}", bin.display()))?;

    let actual = checksum(&data);
    if actual != meta.checksum {
        anyhow::bail!("checksum mismatch: expected {}, got {}", meta.checksum, actual);
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_is_128_bit_hex() {
        let sum = checksum(b"hello");
        assert_eq!(sum.len(), 32);
        assert!(sum.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(sum, checksum(b"hello"));
        assert_ne!(sum, checksum(b"hello!"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = AudioBlobStore::new(dir.path());

        let meta = store.save("song", b"RIFF....WAVE").unwrap();
        assert_eq!(meta.size, 12);

        let loaded = store.load("song").unwrap();
        assert!(matches!(loaded, BlobLoad::Primary(_)));
        assert_eq!(loaded.into_data().unwrap().as_bytes(), b"RIFF....WAVE");
    }

    #[test]
    fn test_recovers_from_backup() {
        let dir = tempfile::tempdir().unwrap();
        let store = AudioBlobStore::new(dir.path());
        store.save("song", b"original bytes").unwrap();

        fs::write(dir.path().join("song.bin"), b"corrupted").unwrap();

        let loaded = store.load("song").unwrap();
        assert!(matches!(loaded, BlobLoad::Recovered(_)));

        // The primary copy was repaired
        assert!(matches!(store.load("song").unwrap(), BlobLoad::Primary(_)));
        assert_eq!(fs::read(dir.path().join("song.bin")).unwrap(), b"original bytes");
    }

    #[test]
    fn test_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = AudioBlobStore::new(dir.path());
        store.save("song", b"bytes").unwrap();
        store.remove("song").unwrap();

        assert!(matches!(store.load("song").unwrap(), BlobLoad::Missing));
        assert!(matches!(store.load("other").unwrap(), BlobLoad::Missing));
    }

    #[test]
    fn test_ids_stay_inside_the_store() {
        let root = tempfile::tempdir().unwrap();
        let store = AudioBlobStore::new(root.path().join("data/audio"));

        for id in ["../../escaped", "a/b", "a\\b", "..", ""] {
            assert!(store.save(id, b"bytes").is_err(), "{id}");
            assert!(store.load(id).is_err(), "{id}");
            assert!(store.remove(id).is_err(), "{id}");
        }
        assert!(!root.path().join("escaped.bin").exists());
        assert!(!root.path().join("data/audio").exists());
    }
}
