//! Blob store rooted at a single directory, one subdirectory per source

use anyhow::Context;
use std::path::{Component, Path, PathBuf};

use tipdrop_core::config::StorageConfig;
use tipdrop_core::{SourceId, TipdropError, TipdropResult};

use crate::names::BlobName;
use crate::shred;

#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
    shredder: PathBuf,
    overwrite_passes: u32,
}

impl BlobStore {
    /// Create (if needed) and canonicalize the store root and shredder.
    ///
    /// The shredder must not live inside the root: nothing under the root may
    /// escape [`BlobStore::verify`].
    pub fn open(root: &Path, shredder: &Path, overwrite_passes: u32) -> TipdropResult<Self> {
        std::fs::create_dir_all(root)
            .with_context(|| format!("creating store root: {}", root.display()))?;
        std::fs::create_dir_all(shredder)
            .with_context(|| format!("creating shredder: {}", shredder.display()))?;
        let root = root
            .canonicalize()
            .with_context(|| format!("resolving store root: {}", root.display()))?;
        let shredder = shredder
            .canonicalize()
            .with_context(|| format!("resolving shredder: {}", shredder.display()))?;

        if shredder.starts_with(&root) || root.starts_with(&shredder) {
            return Err(TipdropError::config(format!(
                "shredder {} and store root {} must not nest",
                shredder.display(),
                root.display()
            )));
        }

        tracing::debug!(root = %root.display(), shredder = %shredder.display(), "blob store opened");
        Ok(Self {
            root,
            shredder,
            overwrite_passes,
        })
    }

    pub fn from_config(cfg: &StorageConfig) -> TipdropResult<Self> {
        Self::open(&cfg.root, &cfg.shredder, cfg.overwrite_passes)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn shredder(&self) -> &Path {
        &self.shredder
    }

    /// Path of a source's directory, or of one blob inside it. Verified.
    pub fn path(&self, id: &SourceId, filename: Option<&str>) -> TipdropResult<PathBuf> {
        let mut path = self.root.join(id.as_str());
        if let Some(name) = filename {
            path.push(name);
        }
        self.verify(&path)
    }

    /// Check that `path` names a source directory or blob strictly inside the
    /// store root and return its normalized form.
    ///
    /// Purely lexical: no filesystem access happens here, so a rejected path
    /// is never touched.
    pub fn verify(&self, path: &Path) -> TipdropResult<PathBuf> {
        if !path.is_absolute() {
            return Err(TipdropError::path(format!(
                "blob path must be absolute: {}",
                path.display()
            )));
        }
        let normalized = normalize_lexically(path);
        let relative = normalized.strip_prefix(&self.root).map_err(|_| {
            TipdropError::path(format!("path escapes store root: {}", path.display()))
        })?;

        let parts: Vec<&str> = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<_>>()
            .ok_or_else(|| TipdropError::path(format!("non-UTF-8 path: {}", path.display())))?;

        match parts.as_slice() {
            [id] => {
                SourceId::parse(id)?;
            }
            [id, name] => {
                SourceId::parse(id)?;
                BlobName::parse(name)?;
            }
            _ => {
                return Err(TipdropError::path(format!(
                    "path is not a source directory or blob: {}",
                    path.display()
                )))
            }
        }
        Ok(normalized)
    }

    pub fn create_source_dir(&self, id: &SourceId) -> TipdropResult<PathBuf> {
        let dir = self.path(id, None)?;
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating source dir: {}", dir.display()))?;
        Ok(dir)
    }

    /// Blobs in a source's directory ordered by index. Unrecognized files are
    /// skipped.
    pub fn list_blobs(&self, id: &SourceId) -> TipdropResult<Vec<BlobName>> {
        let dir = self.path(id, None)?;
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut blobs = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            match name.to_str().map(BlobName::parse) {
                Some(Ok(blob)) => blobs.push(blob),
                _ => tracing::debug!(
                    source = id.short(),
                    name = %name.to_string_lossy(),
                    "skipping unrecognized file in source dir"
                ),
            }
        }
        blobs.sort_by_key(|b| b.index);
        Ok(blobs)
    }

    /// Next free index in a source's sequence (1 for an empty directory).
    pub fn next_index(&self, id: &SourceId) -> TipdropResult<u64> {
        let last = self.list_blobs(id)?.last().map(|b| b.index).unwrap_or(0);
        last.checked_add(1)
            .ok_or_else(|| TipdropError::path("blob index overflow"))
    }

    /// Overwrite-then-unlink a single blob. A blob that is already gone
    /// counts as deleted.
    pub fn secure_delete(&self, path: &Path) -> TipdropResult<()> {
        let path = self.verify(path)?;
        match shred::shred_file(&path, self.overwrite_passes) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "blob already deleted");
                return Ok(());
            }
            result => result.with_context(|| format!("secure delete: {}", path.display()))?,
        }
        tracing::info!(path = %path.display(), "blob securely deleted");
        Ok(())
    }

    /// Move a source's whole directory into the shredder.
    ///
    /// Returns `None` if the source has no directory, which makes repeated
    /// deletion of the same source a no-op.
    pub fn move_to_shredder(&self, id: &SourceId) -> TipdropResult<Option<PathBuf>> {
        let dir = self.path(id, None)?;
        let target = self.shredder.join(uuid::Uuid::new_v4().to_string());
        match std::fs::rename(&dir, &target) {
            Ok(()) => {
                tracing::info!(source = id.short(), "source dir moved to shredder");
                Ok(Some(target))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(anyhow::Error::new(e)
                .context(format!("moving {} to shredder", dir.display()))
                .into()),
        }
    }

    /// Securely delete everything waiting in the shredder. Returns the number
    /// of files shredded.
    pub fn clear_shredder(&self) -> TipdropResult<usize> {
        let mut shredded = 0;
        for entry in std::fs::read_dir(&self.shredder)
            .with_context(|| format!("reading shredder: {}", self.shredder.display()))?
        {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                shredded += shred::shred_tree(&path, self.overwrite_passes)
                    .with_context(|| format!("shredding {}", path.display()))?;
            } else if file_type.is_file() {
                shred::shred_file(&path, self.overwrite_passes)
                    .with_context(|| format!("shredding {}", path.display()))?;
                shredded += 1;
            } else {
                std::fs::remove_file(&path)?;
            }
        }
        if shredded > 0 {
            tracing::info!(files = shredded, "shredder cleared");
        }
        Ok(shredded)
    }
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tipdrop_core::BlobKind;

    fn open_store(dir: &tempfile::TempDir) -> BlobStore {
        BlobStore::open(&dir.path().join("store"), &dir.path().join("shredder"), 1).unwrap()
    }

    fn source() -> SourceId {
        SourceId::from_digest(&[0x5Au8; 32])
    }

    #[test]
    fn test_path_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        let id = source();

        let blob = store.path(&id, Some("1-lazy-oxygen-msg.age")).unwrap();
        assert!(blob.starts_with(store.root()));
        assert!(blob.ends_with(format!("{}/1-lazy-oxygen-msg.age", id)));
    }

    #[test]
    fn test_verify_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        let root = store.root().to_path_buf();

        let escapes = [
            root.join("../etc/passwd"),
            root.join(source().as_str()).join("../../etc/passwd"),
            PathBuf::from("/etc/passwd"),
            root.clone(),
            root.join("."),
        ];
        for p in &escapes {
            assert!(store.verify(p).unwrap_err().is_path(), "{} must be rejected", p.display());
        }
        assert!(store.verify(Path::new("relative/1-a-msg.age")).unwrap_err().is_path());
    }

    #[test]
    fn test_verify_rejects_bad_shapes() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        let id_dir = store.root().join(source().as_str());

        assert!(store.verify(&store.root().join("not-a-source-id")).is_err());
        assert!(store.verify(&id_dir.join("passwd")).is_err());
        assert!(store.verify(&id_dir.join("1-a-msg.age/deeper")).is_err());
        // `..` that stays inside the root normalizes cleanly
        let roundabout = id_dir.join("../").join(source().as_str()).join("2-a-reply.age");
        assert_eq!(store.verify(&roundabout).unwrap(), id_dir.join("2-a-reply.age"));
    }

    #[test]
    fn test_open_rejects_nested_shredder() {
        let dir = tempfile::tempdir().unwrap();
        let err = BlobStore::open(&dir.path().join("store"), &dir.path().join("store/shred"), 1)
            .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_next_index_and_listing() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        let id = source();

        assert_eq!(store.next_index(&id).unwrap(), 1);
        let src = store.create_source_dir(&id).unwrap();
        std::fs::write(src.join("1-a-msg.age"), b"x").unwrap();
        std::fs::write(src.join("4-a-doc.zst.age"), b"x").unwrap();
        std::fs::write(src.join("stray.txt"), b"x").unwrap();

        let blobs = store.list_blobs(&id).unwrap();
        assert_eq!(blobs.len(), 2);
        assert_eq!(blobs[1].kind, BlobKind::Document);
        assert_eq!(store.next_index(&id).unwrap(), 5);
    }

    #[test]
    fn test_secure_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        let id = source();
        store.create_source_dir(&id).unwrap();
        let blob = store.path(&id, Some("1-a-reply.age")).unwrap();
        std::fs::write(&blob, b"ciphertext").unwrap();

        store.secure_delete(&blob).unwrap();
        assert!(!blob.exists());
        store.secure_delete(&blob).unwrap();
        assert!(!blob.exists());
    }

    #[test]
    fn test_secure_delete_never_written_blob() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        let id = source();
        let blob = store.path(&id, Some("7-a-msg.age")).unwrap();
        store.secure_delete(&blob).unwrap();
        assert!(!store.path(&id, None).unwrap().exists());
    }

    #[test]
    fn test_secure_delete_rejects_outside_before_io() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        let victim = dir.path().join("victim.txt");
        std::fs::write(&victim, b"do not touch").unwrap();

        let err = store.secure_delete(&store.root().join("..").join("victim.txt")).unwrap_err();
        assert!(err.is_path());
        assert_eq!(std::fs::read(&victim).unwrap(), b"do not touch");
    }

    #[test]
    fn test_shredder_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        let id = source();
        let src = store.create_source_dir(&id).unwrap();
        std::fs::write(src.join("1-a-msg.age"), b"one").unwrap();
        std::fs::write(src.join("2-a-msg.age"), b"two").unwrap();

        let moved = store.move_to_shredder(&id).unwrap();
        assert!(moved.is_some());
        assert!(!src.exists());
        assert_eq!(store.move_to_shredder(&id).unwrap(), None, "second move is a no-op");

        assert_eq!(store.clear_shredder().unwrap(), 2);
        assert_eq!(std::fs::read_dir(store.shredder()).unwrap().count(), 0);
        assert_eq!(store.clear_shredder().unwrap(), 0);
    }
}
