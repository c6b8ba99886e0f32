//! Identity derivation: passphrase → (SourceId, KeypairSecret) via Argon2id

use argon2::{Algorithm, Argon2, Params, Version};
use secrecy::{ExposeSecret, SecretString};
use zeroize::{Zeroize, Zeroizing};

use tipdrop_core::config::IdentityConfig;
use tipdrop_core::{SourceId, TipdropError, TipdropResult};

use crate::{DIGEST_SIZE, MAX_PASSPHRASE_LEN};

/// Argon2id parameters for identity derivation
#[derive(Debug, Clone)]
pub struct KdfParams {
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub mem_cost_kib: u32,
    /// Time cost / iterations (default: 3)
    pub time_cost: u32,
    /// Parallelism (default: 4)
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            mem_cost_kib: 65536,
            time_cost: 3,
            parallelism: 4,
        }
    }
}

impl From<&IdentityConfig> for KdfParams {
    fn from(cfg: &IdentityConfig) -> Self {
        Self {
            mem_cost_kib: cfg.argon2_mem_cost_kib,
            time_cost: cfg.argon2_time_cost,
            parallelism: cfg.argon2_parallelism,
        }
    }
}

/// Passphrase protecting a source's private key at rest.
///
/// Recomputed on every login, never stored. Zeroized on drop.
pub struct KeypairSecret {
    inner: SecretString,
}

impl KeypairSecret {
    fn from_digest(digest: &[u8; DIGEST_SIZE]) -> Self {
        Self {
            inner: SecretString::from(hex::encode_upper(digest)),
        }
    }

    /// A fresh copy of the secret in the form age's scrypt recipient expects.
    pub fn to_passphrase(&self) -> SecretString {
        SecretString::from(self.inner.expose_secret().to_owned())
    }
}

impl Clone for KeypairSecret {
    fn clone(&self) -> Self {
        Self {
            inner: self.to_passphrase(),
        }
    }
}

impl PartialEq for KeypairSecret {
    fn eq(&self, other: &Self) -> bool {
        self.inner.expose_secret() == other.inner.expose_secret()
    }
}

impl std::fmt::Debug for KeypairSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeypairSecret")
            .field("inner", &"[REDACTED]")
            .finish()
    }
}

/// Both values derived from one passphrase
#[derive(Debug, Clone)]
pub struct DerivedIdentity {
    pub id: SourceId,
    pub secret: KeypairSecret,
}

/// Derives a source's identifier and keypair secret from its passphrase.
///
/// Built once at startup with both salts; each output has its own method so a
/// caller cannot pair a salt with the wrong purpose.
pub struct IdentityDeriver {
    argon2: Argon2<'static>,
    id_salt: Zeroizing<Vec<u8>>,
    secret_salt: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for IdentityDeriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityDeriver")
            .field("params", self.argon2.params())
            .field("id_salt", &"[REDACTED]")
            .field("secret_salt", &"[REDACTED]")
            .finish()
    }
}

impl IdentityDeriver {
    /// Fails with a configuration error if the salts are equal or too short,
    /// or if the Argon2id parameters are invalid.
    pub fn new(config: &IdentityConfig) -> TipdropResult<Self> {
        config.validate()?;
        Self::with_salts(&config.id_salt, &config.secret_salt, &KdfParams::from(config))
    }

    pub fn with_salts(id_salt: &str, secret_salt: &str, params: &KdfParams) -> TipdropResult<Self> {
        IdentityConfig {
            id_salt: id_salt.to_owned(),
            secret_salt: secret_salt.to_owned(),
            argon2_mem_cost_kib: params.mem_cost_kib,
            argon2_time_cost: params.time_cost,
            argon2_parallelism: params.parallelism,
        }
        .validate()?;

        let argon2_params = Params::new(
            params.mem_cost_kib,
            params.time_cost,
            params.parallelism,
            Some(DIGEST_SIZE),
        )
        .map_err(|e| TipdropError::config(format!("invalid Argon2id params: {e}")))?;

        tracing::debug!(
            mem_cost_kib = params.mem_cost_kib,
            time_cost = params.time_cost,
            parallelism = params.parallelism,
            "identity deriver ready"
        );

        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params),
            id_salt: Zeroizing::new(id_salt.as_bytes().to_vec()),
            secret_salt: Zeroizing::new(secret_salt.as_bytes().to_vec()),
        })
    }

    /// The public, stable identifier for this passphrase.
    pub fn identifier(&self, passphrase: &SecretString) -> TipdropResult<SourceId> {
        let normalized = normalize_passphrase(passphrase.expose_secret())?;
        let mut digest = self.hash(&normalized, &self.id_salt)?;
        let id = SourceId::from_digest(&digest);
        digest.zeroize();
        Ok(id)
    }

    /// The secret unlocking this passphrase's private key.
    pub fn keypair_secret(&self, passphrase: &SecretString) -> TipdropResult<KeypairSecret> {
        let normalized = normalize_passphrase(passphrase.expose_secret())?;
        let mut digest = self.hash(&normalized, &self.secret_salt)?;
        let secret = KeypairSecret::from_digest(&digest);
        digest.zeroize();
        Ok(secret)
    }

    pub fn derive(&self, passphrase: &SecretString) -> TipdropResult<DerivedIdentity> {
        Ok(DerivedIdentity {
            id: self.identifier(passphrase)?,
            secret: self.keypair_secret(passphrase)?,
        })
    }

    fn hash(&self, passphrase: &str, salt: &[u8]) -> TipdropResult<[u8; DIGEST_SIZE]> {
        let mut out = [0u8; DIGEST_SIZE];
        self.argon2
            .hash_password_into(passphrase.as_bytes(), salt, &mut out)
            .map_err(|e| TipdropError::crypto(format!("Argon2id KDF failed: {e}")))?;
        Ok(out)
    }
}

/// Canonical form hashed for a passphrase: surrounding whitespace trimmed and
/// internal runs of whitespace collapsed to a single space.
pub fn normalize_passphrase(passphrase: &str) -> TipdropResult<Zeroizing<String>> {
    let normalized = Zeroizing::new(passphrase.split_whitespace().collect::<Vec<_>>().join(" "));
    if normalized.is_empty() {
        return Err(TipdropError::crypto("empty passphrase"));
    }
    if normalized.len() > MAX_PASSPHRASE_LEN {
        return Err(TipdropError::crypto(format!(
            "passphrase longer than {MAX_PASSPHRASE_LEN} bytes"
        )));
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn fast_params() -> KdfParams {
        KdfParams {
            mem_cost_kib: 1024,
            time_cost: 1,
            parallelism: 1,
        }
    }

    fn deriver() -> IdentityDeriver {
        IdentityDeriver::with_salts("identifier-salt-a", "keypair-salt-b", &fast_params()).unwrap()
    }

    #[test]
    fn test_derive_deterministic() {
        let d = deriver();
        let p = SecretString::from("correct horse battery staple");

        let a = d.derive(&p).unwrap();
        let b = d.derive(&p).unwrap();

        assert_eq!(a.id, b.id, "identifier must be deterministic");
        assert_eq!(a.secret, b.secret, "keypair secret must be deterministic");
    }

    #[test]
    fn test_identifier_and_secret_differ() {
        let d = deriver();
        let derived = d.derive(&SecretString::from("same input twice")).unwrap();
        assert_ne!(
            derived.id.as_str(),
            derived.secret.to_passphrase().expose_secret(),
            "different salts must produce different outputs"
        );
    }

    #[test]
    fn test_keypair_secret_is_uppercase_hex() {
        let secret = KeypairSecret::from_digest(&[0xAB; DIGEST_SIZE]);
        assert_eq!(secret.to_passphrase().expose_secret(), "AB".repeat(DIGEST_SIZE));

        let derived = deriver().derive(&SecretString::from("quiet harbor lamp")).unwrap();
        let encoded = derived.secret.to_passphrase();
        assert_eq!(encoded.expose_secret().len(), DIGEST_SIZE * 2);
        assert!(encoded
            .expose_secret()
            .chars()
            .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)));
    }

    #[test]
    fn test_different_passphrases() {
        let d = deriver();
        let a = d.identifier(&SecretString::from("passphrase-a words")).unwrap();
        let b = d.identifier(&SecretString::from("passphrase-b words")).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_equal_salts_is_config_error() {
        let err = IdentityDeriver::with_salts("shared-salt-value", "shared-salt-value", &fast_params())
            .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_invalid_params_is_config_error() {
        let params = KdfParams {
            mem_cost_kib: 1,
            time_cost: 0,
            parallelism: 1,
        };
        let err = IdentityDeriver::with_salts("identifier-salt-a", "keypair-salt-b", &params).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_whitespace_normalized() {
        let d = deriver();
        let a = d.identifier(&SecretString::from("alpha bravo charlie")).unwrap();
        let b = d.identifier(&SecretString::from("  alpha   bravo\tcharlie \n")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_and_oversized_rejected() {
        let d = deriver();
        assert!(d.identifier(&SecretString::from("   ")).unwrap_err().is_crypto());
        let long = "word ".repeat(MAX_PASSPHRASE_LEN);
        assert!(d.keypair_secret(&SecretString::from(long)).unwrap_err().is_crypto());
    }

    #[test]
    fn test_debug_redacts() {
        let d = deriver();
        let secret = d.keypair_secret(&SecretString::from("alpha bravo")).unwrap();
        let rendered = format!("{d:?} {secret:?}");
        assert!(!rendered.contains("identifier-salt-a"));
        assert!(!rendered.contains(secret.to_passphrase().expose_secret()));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_derivation_is_deterministic(words in proptest::collection::vec("[a-z]{3,8}", 1..8)) {
            let d = deriver();
            let p = SecretString::from(words.join(" "));
            let first = d.derive(&p).unwrap();
            let second = d.derive(&p).unwrap();
            prop_assert_eq!(first.id, second.id);
            prop_assert_eq!(first.secret, second.secret);
        }
    }
}
