//! `SourceCrypto`: the per-source identity and encryption facade
//!
//! Everything a submission or reply path needs goes through here: deriving a
//! source's identifier and keypair secret from the passphrase, custody of the
//! source's keypair, encryption to fingerprints, and passphrase-gated
//! decryption.

use age::x25519;
use secrecy::SecretString;
use std::collections::HashSet;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tipdrop_core::config::TipdropConfig;
use tipdrop_core::{Fingerprint, SourceId, TipdropError, TipdropResult};
use tipdrop_crypto::{DerivedIdentity, IdentityDeriver, KeypairSecret};
use tipdrop_storage::BlobStore;

use crate::custody::{Custody, PublicKeyHandle};
use crate::envelope::{decrypt_from, encrypt_to};
use crate::keyring::KeyStore;

const RECIPIENT_PREFIX: &str = "age1";

pub struct SourceCrypto {
    deriver: IdentityDeriver,
    custody: Custody,
    operator: x25519::Recipient,
    operator_fingerprint: Fingerprint,
}

impl std::fmt::Debug for SourceCrypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceCrypto")
            .field("deriver", &self.deriver)
            .field("operator_fingerprint", &self.operator_fingerprint)
            .finish_non_exhaustive()
    }
}

impl SourceCrypto {
    /// Fails with a configuration error for missing, short or equal salts,
    /// bad KDF parameters, or an operator key that is not an age recipient.
    pub fn new(config: &TipdropConfig, store: Arc<dyn KeyStore>) -> TipdropResult<Self> {
        config.validate()?;
        let deriver = IdentityDeriver::new(&config.identity)?;

        let operator_key = strip_whitespace(&config.operator.public_key);
        let operator = operator_key.parse::<x25519::Recipient>().map_err(|e| {
            TipdropError::config(format!("operator.public_key is not an age recipient: {e}"))
        })?;
        let operator_fingerprint = Fingerprint::of_recipient(&operator_key);

        tracing::info!(
            operator = %operator_fingerprint,
            algorithm = %config.keyring.algorithm,
            "source crypto ready"
        );
        Ok(Self {
            deriver,
            custody: Custody::new(store, &config.keyring),
            operator,
            operator_fingerprint,
        })
    }

    pub fn derive(&self, passphrase: &SecretString) -> TipdropResult<DerivedIdentity> {
        self.deriver.derive(passphrase)
    }

    /// Only the identifier; the keypair secret is never computed.
    pub fn identifier(&self, passphrase: &SecretString) -> TipdropResult<SourceId> {
        self.deriver.identifier(passphrase)
    }

    pub fn custody(&self) -> &Custody {
        &self.custody
    }

    pub fn generate_keypair(
        &self,
        id: &SourceId,
        secret: &KeypairSecret,
    ) -> TipdropResult<PublicKeyHandle> {
        self.custody.generate_keypair(id, secret)
    }

    pub fn lookup_public_key(&self, id: &SourceId) -> TipdropResult<Option<PublicKeyHandle>> {
        self.custody.lookup_public_key(id)
    }

    pub fn delete_keypair(&self, id: &SourceId) -> TipdropResult<usize> {
        self.custody.delete_keypair(id)
    }

    pub fn operator_recipient(&self) -> &x25519::Recipient {
        &self.operator
    }

    pub fn operator_fingerprint(&self) -> &Fingerprint {
        &self.operator_fingerprint
    }

    /// Resolve recipient strings to age recipients.
    ///
    /// Each entry is either an age recipient (`age1...`) or a key fingerprint
    /// looked up in the keyring; all whitespace is stripped first. Duplicates
    /// collapse. An empty list or any entry that does not resolve fails the
    /// whole call.
    pub fn resolve_recipients<S: AsRef<str>>(
        &self,
        recipients: &[S],
    ) -> TipdropResult<Vec<x25519::Recipient>> {
        if recipients.is_empty() {
            return Err(TipdropError::crypto("no recipients for encryption"));
        }

        let mut seen = HashSet::new();
        let mut resolved = Vec::with_capacity(recipients.len());
        for raw in recipients {
            let recipient = self.resolve_one(raw.as_ref())?;
            if seen.insert(recipient.to_string()) {
                resolved.push(recipient);
            }
        }
        Ok(resolved)
    }

    fn resolve_one(&self, raw: &str) -> TipdropResult<x25519::Recipient> {
        let cleaned = strip_whitespace(raw);
        if cleaned.starts_with(RECIPIENT_PREFIX) {
            return cleaned
                .parse::<x25519::Recipient>()
                .map_err(|e| TipdropError::crypto(format!("invalid age recipient: {e}")));
        }

        let fingerprint = Fingerprint::parse(&cleaned)?;
        if fingerprint == self.operator_fingerprint {
            return Ok(self.operator.clone());
        }
        match self.custody.lookup_fingerprint(&fingerprint)? {
            Some(handle) => handle.to_recipient(),
            None => Err(TipdropError::crypto(format!(
                "no public key for fingerprint {fingerprint}"
            ))),
        }
    }

    /// Encrypt to every recipient; returns the binary age ciphertext.
    pub fn encrypt<R: Read, S: AsRef<str>>(
        &self,
        plaintext: R,
        recipients: &[S],
    ) -> TipdropResult<Vec<u8>> {
        let resolved = self.resolve_recipients(recipients)?;
        encrypt_to(&resolved, plaintext, Vec::new())
    }

    /// Encrypt to every recipient and write the ciphertext to a blob path.
    ///
    /// `path` is verified against `store` before any I/O. The ciphertext is
    /// staged in a temp file beside the destination and renamed into place,
    /// so an interrupted write never leaves a file under the final name.
    /// Existing blobs are never overwritten.
    pub fn encrypt_to_path<R: Read, S: AsRef<str>>(
        &self,
        plaintext: R,
        recipients: &[S],
        store: &BlobStore,
        path: &Path,
    ) -> TipdropResult<PathBuf> {
        let target = store.verify(path)?;
        let parent = match target.parent() {
            Some(parent) if parent != store.root() => parent.to_path_buf(),
            _ => {
                return Err(TipdropError::path(format!(
                    "not a blob path: {}",
                    target.display()
                )))
            }
        };
        let resolved = self.resolve_recipients(recipients)?;

        std::fs::create_dir_all(&parent)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
        let mut writer = encrypt_to(&resolved, plaintext, BufWriter::new(tmp.as_file_mut()))?;
        writer.flush()?;
        drop(writer);
        tmp.as_file().sync_all()?;
        tmp.persist_noclobber(&target).map_err(|e| {
            TipdropError::path(format!("cannot create blob {}: {}", target.display(), e.error))
        })?;

        tracing::debug!(
            path = %target.display(),
            recipients = resolved.len(),
            "ciphertext written"
        );
        Ok(target)
    }

    /// Decrypt with the private key belonging to `passphrase`.
    ///
    /// Fails with a crypto error if the passphrase has no keypair, the key
    /// is not among the ciphertext's recipients, or the ciphertext is
    /// damaged. Never returns partial plaintext.
    pub fn decrypt<R: Read>(&self, passphrase: &SecretString, ciphertext: R) -> TipdropResult<Vec<u8>> {
        let DerivedIdentity { id, secret } = self.derive(passphrase)?;
        let identities = self.custody.unlock(&id, &secret)?;
        if identities.is_empty() {
            tracing::debug!(source = id.short(), "no private key unlocked");
            return Err(TipdropError::crypto("no private key for this passphrase"));
        }
        decrypt_from(&identities, ciphertext)
    }
}

fn strip_whitespace(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}
