//! Shared keyring storage: the get/put/delete seam under key custody
//!
//! A keypair is two entries: a public record carrying the source tag, and
//! the sealed private half, addressed by tag and fingerprint. Because the
//! private half carries its tag too, a secret whose public record was never
//! written (or already removed) can still be found and deleted. Backends
//! never see plaintext private keys.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tipdrop_core::config::KeyAlgorithm;
use tipdrop_core::{Fingerprint, SourceId, TipdropResult};

const PUBLIC_SUFFIX: &str = ".pub.json";
const SECRET_SUFFIX: &str = ".sec.age";

/// Public half of a keypair, tagged with the owning source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    pub tag: SourceId,
    pub fingerprint: Fingerprint,
    /// age recipient string (`age1...`)
    pub recipient: String,
    pub algorithm: KeyAlgorithm,
    /// Unix time of generation in milliseconds
    pub created_at_ms: u64,
}

/// Storage backend for the installation-wide keyring.
///
/// Implementations do no locking across calls; a single writer per source
/// tag is the caller's responsibility. Deletes of absent entries succeed.
pub trait KeyStore: Send + Sync {
    /// Every public record in the keyring.
    fn list(&self) -> TipdropResult<Vec<KeyRecord>>;

    /// Fingerprints of every sealed private half tagged `tag`, whether or
    /// not its public record exists.
    fn secret_fingerprints(&self, tag: &SourceId) -> TipdropResult<Vec<Fingerprint>>;

    /// The sealed private half, if present.
    fn get_secret(
        &self,
        tag: &SourceId,
        fingerprint: &Fingerprint,
    ) -> TipdropResult<Option<Vec<u8>>>;

    /// Store both halves. The private half is written first so a visible
    /// public record always has its private key behind it.
    fn put(&self, record: &KeyRecord, sealed_secret: &[u8]) -> TipdropResult<()>;

    fn delete_secret(&self, tag: &SourceId, fingerprint: &Fingerprint) -> TipdropResult<()>;

    fn delete_public(&self, fingerprint: &Fingerprint) -> TipdropResult<()>;
}

/// Keyring kept in one directory on disk:
/// `<FP>.pub.json` and `<TAG>.<FP>.sec.age` per keypair.
#[derive(Debug, Clone)]
pub struct DirKeyring {
    dir: PathBuf,
}

impl DirKeyring {
    pub fn open(dir: &Path) -> TipdropResult<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating keyring dir: {}", dir.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
                .with_context(|| format!("restricting keyring dir: {}", dir.display()))?;
        }
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn public_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.dir.join(format!("{fingerprint}{PUBLIC_SUFFIX}"))
    }

    fn secret_path(&self, tag: &SourceId, fingerprint: &Fingerprint) -> PathBuf {
        self.dir.join(format!("{tag}.{fingerprint}{SECRET_SUFFIX}"))
    }

    /// Write via a temp file in the keyring dir and rename into place, so a
    /// reader never sees a half-written entry. Temp files are created 0600.
    fn write_atomic(&self, path: &Path, content: &[u8]) -> TipdropResult<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)
            .with_context(|| format!("creating temp file in {}", self.dir.display()))?;
        tmp.write_all(content)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path)
            .map_err(|e| e.error)
            .with_context(|| format!("persisting {}", path.display()))?;
        Ok(())
    }
}

fn remove_if_exists(path: &Path) -> TipdropResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(anyhow::Error::new(e)
            .context(format!("removing {}", path.display()))
            .into()),
    }
}

impl KeyStore for DirKeyring {
    fn list(&self) -> TipdropResult<Vec<KeyRecord>> {
        let mut records = Vec::new();
        for entry in std::fs::read_dir(&self.dir)
            .with_context(|| format!("reading keyring dir: {}", self.dir.display()))?
        {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.ends_with(PUBLIC_SUFFIX) {
                continue;
            }
            let path = entry.path();
            let content = match std::fs::read_to_string(&path) {
                Ok(c) => c,
                // Deleted between read_dir and read
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            match serde_json::from_str::<KeyRecord>(&content) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(path = %path.display(), "skipping malformed key record: {e}"),
            }
        }
        Ok(records)
    }

    fn secret_fingerprints(&self, tag: &SourceId) -> TipdropResult<Vec<Fingerprint>> {
        let prefix = format!("{tag}.");
        let mut found = Vec::new();
        for entry in std::fs::read_dir(&self.dir)
            .with_context(|| format!("reading keyring dir: {}", self.dir.display()))?
        {
            let entry = entry?;
            let name = entry.file_name();
            let Some(fp) = name
                .to_str()
                .and_then(|n| n.strip_prefix(&prefix))
                .and_then(|n| n.strip_suffix(SECRET_SUFFIX))
            else {
                continue;
            };
            match Fingerprint::parse(fp) {
                Ok(fp) => found.push(fp),
                Err(e) => tracing::warn!(name = %name.to_string_lossy(), "skipping malformed secret entry: {e}"),
            }
        }
        Ok(found)
    }

    fn get_secret(
        &self,
        tag: &SourceId,
        fingerprint: &Fingerprint,
    ) -> TipdropResult<Option<Vec<u8>>> {
        match std::fs::read(self.secret_path(tag, fingerprint)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, record: &KeyRecord, sealed_secret: &[u8]) -> TipdropResult<()> {
        let json = serde_json::to_vec_pretty(record).context("serializing key record")?;
        self.write_atomic(&self.secret_path(&record.tag, &record.fingerprint), sealed_secret)?;
        self.write_atomic(&self.public_path(&record.fingerprint), &json)
    }

    fn delete_secret(&self, tag: &SourceId, fingerprint: &Fingerprint) -> TipdropResult<()> {
        remove_if_exists(&self.secret_path(tag, fingerprint))
    }

    fn delete_public(&self, fingerprint: &Fingerprint) -> TipdropResult<()> {
        remove_if_exists(&self.public_path(fingerprint))
    }
}

/// In-process keyring for tests and ephemeral deployments
#[derive(Debug, Default)]
pub struct MemoryKeyring {
    publics: RwLock<HashMap<Fingerprint, KeyRecord>>,
    secrets: RwLock<HashMap<(SourceId, Fingerprint), Vec<u8>>>,
}

impl MemoryKeyring {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> tipdrop_core::TipdropError {
    anyhow::anyhow!("keyring lock poisoned").into()
}

impl KeyStore for MemoryKeyring {
    fn list(&self) -> TipdropResult<Vec<KeyRecord>> {
        Ok(self.publics.read().map_err(poisoned)?.values().cloned().collect())
    }

    fn secret_fingerprints(&self, tag: &SourceId) -> TipdropResult<Vec<Fingerprint>> {
        Ok(self
            .secrets
            .read()
            .map_err(poisoned)?
            .keys()
            .filter(|(t, _)| t == tag)
            .map(|(_, fp)| fp.clone())
            .collect())
    }

    fn get_secret(
        &self,
        tag: &SourceId,
        fingerprint: &Fingerprint,
    ) -> TipdropResult<Option<Vec<u8>>> {
        let key = (tag.clone(), fingerprint.clone());
        Ok(self.secrets.read().map_err(poisoned)?.get(&key).cloned())
    }

    fn put(&self, record: &KeyRecord, sealed_secret: &[u8]) -> TipdropResult<()> {
        self.secrets
            .write()
            .map_err(poisoned)?
            .insert(
                (record.tag.clone(), record.fingerprint.clone()),
                sealed_secret.to_vec(),
            );
        self.publics
            .write()
            .map_err(poisoned)?
            .insert(record.fingerprint.clone(), record.clone());
        Ok(())
    }

    fn delete_secret(&self, tag: &SourceId, fingerprint: &Fingerprint) -> TipdropResult<()> {
        let key = (tag.clone(), fingerprint.clone());
        self.secrets.write().map_err(poisoned)?.remove(&key);
        Ok(())
    }

    fn delete_public(&self, fingerprint: &Fingerprint) -> TipdropResult<()> {
        self.publics.write().map_err(poisoned)?.remove(fingerprint);
        Ok(())
    }
}
