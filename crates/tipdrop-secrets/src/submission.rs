//! Submissions and replies stored as numbered ciphertext blobs per source.

use secrecy::SecretString;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tipdrop_core::{BlobKind, SourceId, TipdropError, TipdropResult};
use tipdrop_storage::{BlobName, BlobStore};

use crate::source::SourceCrypto;

/// zstd level for uploaded documents
const DOCUMENT_ZSTD_LEVEL: i32 = zstd::DEFAULT_COMPRESSION_LEVEL;

/// What [`Submissions::delete_source`] removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceDeletion {
    pub keypairs: usize,
    pub files_shredded: usize,
}

#[derive(Debug)]
pub struct Submissions {
    crypto: Arc<SourceCrypto>,
    store: BlobStore,
}

impl Submissions {
    pub fn new(crypto: Arc<SourceCrypto>, store: BlobStore) -> Self {
        Self { crypto, store }
    }

    pub fn crypto(&self) -> &Arc<SourceCrypto> {
        &self.crypto
    }

    pub fn store(&self) -> &BlobStore {
        &self.store
    }

    /// A text message from the source, readable by the operator only.
    pub fn save_message(
        &self,
        id: &SourceId,
        designation: &str,
        text: &str,
    ) -> TipdropResult<PathBuf> {
        let operator = [self.crypto.operator_recipient().to_string()];
        let path = self.write_blob(id, designation, BlobKind::Message, text.as_bytes(), &operator)?;
        tracing::info!(source = id.short(), path = %path.display(), "message stored");
        Ok(path)
    }

    /// A document upload, zstd-compressed while streaming and readable by the
    /// operator only.
    pub fn save_file<R: Read>(
        &self,
        id: &SourceId,
        designation: &str,
        reader: R,
    ) -> TipdropResult<PathBuf> {
        let compressed = zstd::stream::read::Encoder::new(reader, DOCUMENT_ZSTD_LEVEL)?;
        let operator = [self.crypto.operator_recipient().to_string()];
        let path = self.write_blob(id, designation, BlobKind::Document, compressed, &operator)?;
        tracing::info!(source = id.short(), path = %path.display(), "document stored");
        Ok(path)
    }

    /// A journalist's reply, readable by both the source and the operator.
    ///
    /// Fails with a crypto error if the source has no keypair yet.
    pub fn save_reply(
        &self,
        id: &SourceId,
        designation: &str,
        text: &str,
    ) -> TipdropResult<PathBuf> {
        let source_key = self.crypto.lookup_public_key(id)?.ok_or_else(|| {
            TipdropError::crypto(format!("source {} has no public key", id.short()))
        })?;
        let recipients = [
            source_key.fingerprint.to_string(),
            self.crypto.operator_fingerprint().to_string(),
        ];
        let path = self.write_blob(id, designation, BlobKind::Reply, text.as_bytes(), &recipients)?;
        tracing::info!(
            source = id.short(),
            fingerprint = %source_key.fingerprint,
            path = %path.display(),
            "reply stored"
        );
        Ok(path)
    }

    /// Decrypt a reply with the source's passphrase.
    pub fn read_reply(&self, passphrase: &SecretString, path: &Path) -> TipdropResult<Vec<u8>> {
        let path = self.store.verify(path)?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(BlobName::parse)
            .transpose()?
            .ok_or_else(|| TipdropError::path(format!("not a blob path: {}", path.display())))?;
        if name.kind != BlobKind::Reply {
            return Err(TipdropError::path(format!("not a reply: {}", path.display())));
        }
        let file = std::fs::File::open(&path)?;
        self.crypto.decrypt(passphrase, file)
    }

    pub fn list(&self, id: &SourceId) -> TipdropResult<Vec<BlobName>> {
        self.store.list_blobs(id)
    }

    /// Securely delete one blob.
    pub fn delete_blob(&self, path: &Path) -> TipdropResult<()> {
        self.store.secure_delete(path)
    }

    /// Remove a source entirely: keypair first, then its blobs through the
    /// shredder. Deleting an unknown or already-deleted source succeeds.
    pub fn delete_source(&self, id: &SourceId) -> TipdropResult<SourceDeletion> {
        let keypairs = self.crypto.delete_keypair(id)?;
        self.store.move_to_shredder(id)?;
        let files_shredded = self.store.clear_shredder()?;
        tracing::info!(source = id.short(), keypairs, files_shredded, "source deleted");
        Ok(SourceDeletion {
            keypairs,
            files_shredded,
        })
    }

    fn write_blob<R: Read>(
        &self,
        id: &SourceId,
        designation: &str,
        kind: BlobKind,
        plaintext: R,
        recipients: &[String],
    ) -> TipdropResult<PathBuf> {
        let name = BlobName::new(self.store.next_index(id)?, designation, kind)?;
        let path = self.store.path(id, Some(&name.file_name()))?;
        self.crypto
            .encrypt_to_path(plaintext, recipients, &self.store, &path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::decrypt_from;
    use crate::keyring::MemoryKeyring;
    use crate::test_support::{fast_config, operator_identity};

    struct Fixture {
        _dir: tempfile::TempDir,
        subs: Submissions,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store =
            BlobStore::open(&dir.path().join("store"), &dir.path().join("shredder"), 1).unwrap();
        let crypto =
            Arc::new(SourceCrypto::new(&fast_config(), Arc::new(MemoryKeyring::new())).unwrap());
        Fixture {
            _dir: dir,
            subs: Submissions::new(crypto, store),
        }
    }

    fn operator_read(path: &Path) -> Vec<u8> {
        let file = std::fs::File::open(path).unwrap();
        decrypt_from(std::slice::from_ref(operator_identity()), file).unwrap()
    }

    #[test]
    fn test_message_sequence_and_operator_read() {
        let f = fixture();
        let id = SourceId::from_digest(&[1u8; 32]);

        let first = f.subs.save_message(&id, "lazy-oxygen", "first tip").unwrap();
        let second = f.subs.save_message(&id, "lazy-oxygen", "second tip").unwrap();
        assert!(first.ends_with("1-lazy-oxygen-msg.age"));
        assert!(second.ends_with("2-lazy-oxygen-msg.age"));
        assert_eq!(operator_read(&first), b"first tip");
        assert_eq!(f.subs.list(&id).unwrap().len(), 2);
    }

    #[test]
    fn test_document_is_compressed() {
        let f = fixture();
        let id = SourceId::from_digest(&[2u8; 32]);
        let doc = "the same paragraph again. ".repeat(4096);

        let path = f.subs.save_file(&id, "doc", doc.as_bytes()).unwrap();
        assert!(path.ends_with("1-doc-doc.zst.age"));
        assert!(std::fs::metadata(&path).unwrap().len() < doc.len() as u64 / 10);

        let compressed = operator_read(&path);
        assert_eq!(zstd::decode_all(&compressed[..]).unwrap(), doc.as_bytes());
    }

    #[test]
    fn test_reply_requires_source_key() {
        let f = fixture();
        let id = SourceId::from_digest(&[3u8; 32]);
        let err = f.subs.save_reply(&id, "j", "hello").unwrap_err();
        assert!(err.is_crypto());
        assert!(f.subs.list(&id).unwrap().is_empty());
    }

    #[test]
    fn test_reply_readable_by_source_and_operator() {
        let f = fixture();
        let passphrase = SecretString::from("maple quartz ribbon");
        let src = f.subs.crypto().derive(&passphrase).unwrap();
        f.subs.crypto().generate_keypair(&src.id, &src.secret).unwrap();

        let path = f.subs.save_reply(&src.id, "j", "we got it").unwrap();
        assert_eq!(f.subs.read_reply(&passphrase, &path).unwrap(), b"we got it");
        assert_eq!(operator_read(&path), b"we got it");

        let stranger = SecretString::from("not the source at all");
        assert!(f.subs.read_reply(&stranger, &path).unwrap_err().is_crypto());
    }

    #[test]
    fn test_read_reply_rejects_non_reply() {
        let f = fixture();
        let passphrase = SecretString::from("maple quartz ribbon");
        let src = f.subs.crypto().derive(&passphrase).unwrap();
        let msg = f.subs.save_message(&src.id, "x", "tip").unwrap();
        assert!(f.subs.read_reply(&passphrase, &msg).unwrap_err().is_path());
    }

    #[test]
    fn test_delete_source_is_idempotent() {
        let f = fixture();
        let passphrase = SecretString::from("maple quartz ribbon");
        let src = f.subs.crypto().derive(&passphrase).unwrap();
        f.subs.crypto().generate_keypair(&src.id, &src.secret).unwrap();
        f.subs.save_message(&src.id, "x", "tip").unwrap();
        f.subs.save_reply(&src.id, "x", "reply").unwrap();

        let deleted = f.subs.delete_source(&src.id).unwrap();
        assert_eq!(
            deleted,
            SourceDeletion {
                keypairs: 1,
                files_shredded: 2
            }
        );
        assert!(f.subs.crypto().lookup_public_key(&src.id).unwrap().is_none());
        assert!(f.subs.list(&src.id).unwrap().is_empty());

        assert_eq!(f.subs.delete_source(&src.id).unwrap(), SourceDeletion::default());
    }
}
