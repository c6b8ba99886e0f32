//! Source keypair custody: generate, look up, unlock and delete keypairs in
//! the shared keyring, addressed by source tag.

use age::x25519;
use std::collections::BTreeSet;
use std::sync::Arc;

use tipdrop_core::config::{KeyAlgorithm, KeyringConfig};
use tipdrop_core::{Fingerprint, SourceId, TipdropError, TipdropResult};
use tipdrop_crypto::KeypairSecret;

use crate::envelope::{seal_identity, unseal_identity};
use crate::keyring::{KeyRecord, KeyStore};

/// A source's public key as found in the keyring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyHandle {
    pub tag: SourceId,
    pub fingerprint: Fingerprint,
    /// age recipient string (`age1...`)
    pub recipient: String,
    /// Unix time of generation in milliseconds
    pub created_at_ms: u64,
}

impl PublicKeyHandle {
    pub fn to_recipient(&self) -> TipdropResult<x25519::Recipient> {
        self.recipient.parse::<x25519::Recipient>().map_err(|e| {
            TipdropError::crypto(format!("keyring entry {} is not an age recipient: {e}", self.fingerprint))
        })
    }
}

impl From<KeyRecord> for PublicKeyHandle {
    fn from(r: KeyRecord) -> Self {
        Self {
            tag: r.tag,
            fingerprint: r.fingerprint,
            recipient: r.recipient,
            created_at_ms: r.created_at_ms,
        }
    }
}

pub struct Custody {
    store: Arc<dyn KeyStore>,
    algorithm: KeyAlgorithm,
    work_factor: u8,
}

impl Custody {
    pub fn new(store: Arc<dyn KeyStore>, config: &KeyringConfig) -> Self {
        Self {
            store,
            algorithm: config.algorithm,
            work_factor: config.scrypt_work_factor,
        }
    }

    pub fn store(&self) -> &Arc<dyn KeyStore> {
        &self.store
    }

    /// Generate a fresh keypair tagged `id`, private half sealed by `secret`.
    ///
    /// Does not check for an existing key: calling this twice for one source
    /// leaves two keys under the same tag. Callers look up first.
    pub fn generate_keypair(
        &self,
        id: &SourceId,
        secret: &KeypairSecret,
    ) -> TipdropResult<PublicKeyHandle> {
        let identity = match self.algorithm {
            KeyAlgorithm::X25519 => x25519::Identity::generate(),
        };
        let recipient = identity.to_public().to_string();
        let fingerprint = Fingerprint::of_recipient(&recipient);
        let sealed = seal_identity(&identity, secret, self.work_factor)?;

        let record = KeyRecord {
            tag: id.clone(),
            fingerprint: fingerprint.clone(),
            recipient,
            algorithm: self.algorithm,
            created_at_ms: now_epoch_ms(),
        };
        self.store.put(&record, &sealed)?;

        tracing::info!(
            source = id.short(),
            fingerprint = %fingerprint,
            algorithm = %self.algorithm,
            "source keypair generated"
        );
        Ok(record.into())
    }

    /// The public key tagged `id`, or `None` if the source has none yet.
    ///
    /// If several keys share the tag the oldest by creation time wins, ties
    /// broken by fingerprint, and a warning is logged.
    pub fn lookup_public_key(&self, id: &SourceId) -> TipdropResult<Option<PublicKeyHandle>> {
        let mut matches = self.records_for(id)?;
        if matches.len() > 1 {
            tracing::warn!(
                source = id.short(),
                keys = matches.len(),
                "multiple keypairs share one source tag; using the oldest"
            );
        }
        Ok(if matches.is_empty() {
            None
        } else {
            Some(matches.swap_remove(0).into())
        })
    }

    pub fn lookup_fingerprint(
        &self,
        fingerprint: &Fingerprint,
    ) -> TipdropResult<Option<PublicKeyHandle>> {
        Ok(self
            .store
            .list()?
            .into_iter()
            .find(|r| &r.fingerprint == fingerprint)
            .map(Into::into))
    }

    /// Remove every keypair tagged `id`, private half first. Returns how many
    /// keypairs were removed; zero is not an error.
    ///
    /// A private half left without its public record, e.g. by a crash
    /// between the two writes in `put`, is removed too.
    pub fn delete_keypair(&self, id: &SourceId) -> TipdropResult<usize> {
        let mut fingerprints: BTreeSet<Fingerprint> = self
            .records_for(id)?
            .into_iter()
            .map(|r| r.fingerprint)
            .collect();
        fingerprints.extend(self.store.secret_fingerprints(id)?);

        for fingerprint in &fingerprints {
            self.store.delete_secret(id, fingerprint)?;
            self.store.delete_public(fingerprint)?;
            tracing::info!(
                source = id.short(),
                fingerprint = %fingerprint,
                "source keypair deleted"
            );
        }
        Ok(fingerprints.len())
    }

    /// Every private key tagged `id` that `secret` unseals.
    pub fn unlock(
        &self,
        id: &SourceId,
        secret: &KeypairSecret,
    ) -> TipdropResult<Vec<x25519::Identity>> {
        let mut identities = Vec::new();
        for record in self.records_for(id)? {
            let Some(sealed) = self.store.get_secret(id, &record.fingerprint)? else {
                tracing::warn!(
                    source = id.short(),
                    fingerprint = %record.fingerprint,
                    "public key has no private half"
                );
                continue;
            };
            if let Some(identity) = unseal_identity(&sealed, secret, self.work_factor)? {
                identities.push(identity);
            }
        }
        Ok(identities)
    }

    /// Records tagged `id`, oldest first.
    fn records_for(&self, id: &SourceId) -> TipdropResult<Vec<KeyRecord>> {
        let mut records: Vec<KeyRecord> = self
            .store
            .list()?
            .into_iter()
            .filter(|r| &r.tag == id)
            .collect();
        records.sort_by(|a, b| {
            a.created_at_ms
                .cmp(&b.created_at_ms)
                .then_with(|| a.fingerprint.cmp(&b.fingerprint))
        });
        Ok(records)
    }
}

fn now_epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyring::MemoryKeyring;
    use secrecy::SecretString;
    use std::sync::Mutex;
    use tipdrop_crypto::{DerivedIdentity, IdentityDeriver, KdfParams};

    fn custody() -> Custody {
        let config = KeyringConfig {
            scrypt_work_factor: 10,
            ..Default::default()
        };
        Custody::new(Arc::new(MemoryKeyring::new()), &config)
    }

    fn derive(passphrase: &str) -> DerivedIdentity {
        let params = KdfParams {
            mem_cost_kib: 1024,
            time_cost: 1,
            parallelism: 1,
        };
        IdentityDeriver::with_salts("identifier-salt-a", "keypair-salt-b", &params)
            .unwrap()
            .derive(&SecretString::from(passphrase))
            .unwrap()
    }

    #[test]
    fn test_lookup_before_generation_is_none() {
        let c = custody();
        let src = derive("quiet harbor lamp");
        assert!(c.lookup_public_key(&src.id).unwrap().is_none());
    }

    #[test]
    fn test_generate_then_lookup() {
        let c = custody();
        let src = derive("quiet harbor lamp");
        let generated = c.generate_keypair(&src.id, &src.secret).unwrap();

        let found = c.lookup_public_key(&src.id).unwrap().unwrap();
        assert_eq!(found, generated);
        assert!(found.recipient.starts_with("age1"));
        assert_eq!(found.fingerprint, Fingerprint::of_recipient(&found.recipient));
        assert_eq!(c.lookup_fingerprint(&found.fingerprint).unwrap(), Some(found));
    }

    #[test]
    fn test_unlock_with_right_and_wrong_secret() {
        let c = custody();
        let src = derive("quiet harbor lamp");
        let other = derive("loud desert torch");
        let handle = c.generate_keypair(&src.id, &src.secret).unwrap();

        let unlocked = c.unlock(&src.id, &src.secret).unwrap();
        assert_eq!(unlocked.len(), 1);
        assert_eq!(unlocked[0].to_public().to_string(), handle.recipient);

        assert!(c.unlock(&src.id, &other.secret).unwrap().is_empty());
        assert!(c.unlock(&other.id, &src.secret).unwrap().is_empty());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let c = custody();
        let src = derive("quiet harbor lamp");
        assert_eq!(c.delete_keypair(&src.id).unwrap(), 0, "no key yet is a silent no-op");

        c.generate_keypair(&src.id, &src.secret).unwrap();
        assert_eq!(c.delete_keypair(&src.id).unwrap(), 1);
        assert_eq!(c.delete_keypair(&src.id).unwrap(), 0);
        assert!(c.lookup_public_key(&src.id).unwrap().is_none());
    }

    #[test]
    fn test_delete_repairs_half_deleted_keypair() {
        let c = custody();
        let src = derive("quiet harbor lamp");
        let handle = c.generate_keypair(&src.id, &src.secret).unwrap();

        // Crash after the private half went but before the public half
        c.store().delete_secret(&src.id, &handle.fingerprint).unwrap();
        assert!(c.unlock(&src.id, &src.secret).unwrap().is_empty());

        assert_eq!(c.delete_keypair(&src.id).unwrap(), 1);
        assert!(c.store().list().unwrap().is_empty());
    }

    #[test]
    fn test_delete_removes_secret_without_public_record() {
        let c = custody();
        let src = derive("quiet harbor lamp");
        let handle = c.generate_keypair(&src.id, &src.secret).unwrap();

        // Crash after the private half was written but before the public half
        c.store().delete_public(&handle.fingerprint).unwrap();
        assert!(c.lookup_public_key(&src.id).unwrap().is_none());
        assert_eq!(c.store().secret_fingerprints(&src.id).unwrap(), vec![handle.fingerprint.clone()]);

        assert_eq!(c.delete_keypair(&src.id).unwrap(), 1);
        assert!(c.store().secret_fingerprints(&src.id).unwrap().is_empty());
        assert!(c.store().get_secret(&src.id, &handle.fingerprint).unwrap().is_none());
        assert_eq!(c.delete_keypair(&src.id).unwrap(), 0);
    }

    /// Records the order of delete calls reaching the backend.
    #[derive(Default)]
    struct RecordingKeyring {
        inner: MemoryKeyring,
        deletes: Mutex<Vec<(&'static str, Fingerprint)>>,
    }

    impl KeyStore for RecordingKeyring {
        fn list(&self) -> TipdropResult<Vec<KeyRecord>> {
            self.inner.list()
        }

        fn secret_fingerprints(&self, tag: &SourceId) -> TipdropResult<Vec<Fingerprint>> {
            self.inner.secret_fingerprints(tag)
        }

        fn get_secret(
            &self,
            tag: &SourceId,
            fingerprint: &Fingerprint,
        ) -> TipdropResult<Option<Vec<u8>>> {
            self.inner.get_secret(tag, fingerprint)
        }

        fn put(&self, record: &KeyRecord, sealed_secret: &[u8]) -> TipdropResult<()> {
            self.inner.put(record, sealed_secret)
        }

        fn delete_secret(&self, tag: &SourceId, fingerprint: &Fingerprint) -> TipdropResult<()> {
            self.deletes.lock().unwrap().push(("secret", fingerprint.clone()));
            self.inner.delete_secret(tag, fingerprint)
        }

        fn delete_public(&self, fingerprint: &Fingerprint) -> TipdropResult<()> {
            self.deletes.lock().unwrap().push(("public", fingerprint.clone()));
            self.inner.delete_public(fingerprint)
        }
    }

    #[test]
    fn test_delete_removes_private_half_before_public() {
        let store = Arc::new(RecordingKeyring::default());
        let config = KeyringConfig {
            scrypt_work_factor: 10,
            ..Default::default()
        };
        let c = Custody::new(store.clone(), &config);
        let src = derive("quiet harbor lamp");
        let first = c.generate_keypair(&src.id, &src.secret).unwrap();
        let second = c.generate_keypair(&src.id, &src.secret).unwrap();

        assert_eq!(c.delete_keypair(&src.id).unwrap(), 2);

        let deletes = store.deletes.lock().unwrap().clone();
        assert_eq!(deletes.len(), 4);
        for fp in [&first.fingerprint, &second.fingerprint] {
            let secret = deletes.iter().position(|d| d == &("secret", fp.clone())).unwrap();
            let public = deletes.iter().position(|d| d == &("public", fp.clone())).unwrap();
            assert!(secret < public, "private half of {fp} must go first");
        }
    }

    #[test]
    fn test_duplicate_tag_returns_oldest_and_deletes_all() {
        let c = custody();
        let src = derive("quiet harbor lamp");
        let first = c.generate_keypair(&src.id, &src.secret).unwrap();
        let second = c.generate_keypair(&src.id, &src.secret).unwrap();
        assert_ne!(first.fingerprint, second.fingerprint);

        let found = c.lookup_public_key(&src.id).unwrap().unwrap();
        let expected = if (first.created_at_ms, &first.fingerprint)
            <= (second.created_at_ms, &second.fingerprint)
        {
            first
        } else {
            second
        };
        assert_eq!(found, expected);
        assert_eq!(c.delete_keypair(&src.id).unwrap(), 2);
    }

    #[test]
    fn test_oldest_key_wins_over_smaller_fingerprint() {
        let c = custody();
        let src = derive("quiet harbor lamp");
        let mut records: Vec<KeyRecord> = ["age1older", "age1newer"]
            .iter()
            .map(|recipient| KeyRecord {
                tag: src.id.clone(),
                fingerprint: Fingerprint::of_recipient(recipient),
                recipient: recipient.to_string(),
                algorithm: KeyAlgorithm::X25519,
                created_at_ms: 0,
            })
            .collect();
        records.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
        // Larger fingerprint created one millisecond earlier
        records[0].created_at_ms = 1_700_000_000_001;
        records[1].created_at_ms = 1_700_000_000_000;
        for r in &records {
            c.store().put(r, b"sealed").unwrap();
        }

        let found = c.lookup_public_key(&src.id).unwrap().unwrap();
        assert_eq!(found.fingerprint, records[1].fingerprint);
        assert_eq!(found.created_at_ms, 1_700_000_000_000);
    }
}
