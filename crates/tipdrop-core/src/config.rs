use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{TipdropError, TipdropResult};

/// Environment variable overriding `identity.id_salt`
pub const ID_SALT_ENV: &str = "TIPDROP_ID_SALT";
/// Environment variable overriding `identity.secret_salt`
pub const SECRET_SALT_ENV: &str = "TIPDROP_SECRET_SALT";

/// Minimum salt length accepted by Argon2
pub const MIN_SALT_LEN: usize = 8;

/// Top-level configuration (loaded from tipdrop.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TipdropConfig {
    pub identity: IdentityConfig,
    pub keyring: KeyringConfig,
    pub operator: OperatorConfig,
    pub storage: StorageConfig,
    pub passphrase: PassphraseConfig,
    pub logging: LoggingConfig,
}

/// Source identity derivation: the two installation-wide salts and the
/// Argon2id work factor.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Salt for the pseudonymous identifier
    pub id_salt: String,
    /// Salt for the keypair secret (must differ from `id_salt`)
    pub secret_salt: String,
    /// Argon2id memory cost in KiB (default: 65536 = 64 MiB)
    pub argon2_mem_cost_kib: u32,
    /// Argon2id time cost (iterations, default: 3)
    pub argon2_time_cost: u32,
    /// Argon2id parallelism (default: 4)
    pub argon2_parallelism: u32,
}

impl std::fmt::Debug for IdentityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityConfig")
            .field("id_salt", &"[REDACTED]")
            .field("secret_salt", &"[REDACTED]")
            .field("argon2_mem_cost_kib", &self.argon2_mem_cost_kib)
            .field("argon2_time_cost", &self.argon2_time_cost)
            .field("argon2_parallelism", &self.argon2_parallelism)
            .finish()
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            id_salt: String::new(),
            secret_salt: String::new(),
            argon2_mem_cost_kib: 65536,
            argon2_time_cost: 3,
            argon2_parallelism: 4,
        }
    }
}

/// Asymmetric key algorithm for source keypairs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyAlgorithm {
    #[default]
    X25519,
}

impl std::fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyAlgorithm::X25519 => f.write_str("x25519"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyringConfig {
    /// Directory holding every source keypair
    pub dir: PathBuf,
    /// Key algorithm for newly generated keypairs
    pub algorithm: KeyAlgorithm,
    /// scrypt log2(N) protecting private keys at rest (default: 18)
    pub scrypt_work_factor: u8,
}

impl Default for KeyringConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/var/lib/tipdrop/keys"),
            algorithm: KeyAlgorithm::X25519,
            scrypt_work_factor: 18,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorConfig {
    /// Standing age recipient (`age1...`) of the receiving organization
    pub public_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Blob store root; one directory per source identifier
    pub root: PathBuf,
    /// Staging area for secure deletion of whole source directories
    pub shredder: PathBuf,
    /// Random overwrite passes before unlink (default: 3)
    pub overwrite_passes: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/var/lib/tipdrop/store"),
            shredder: PathBuf::from("/var/lib/tipdrop/shredder"),
            overwrite_passes: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PassphraseConfig {
    /// Newline-separated wordlist used to generate source passphrases
    pub wordlist: PathBuf,
    /// Words per generated passphrase (default: 7)
    pub words: usize,
}

impl Default for PassphraseConfig {
    fn default() -> Self {
        Self {
            wordlist: PathBuf::from("/usr/share/tipdrop/wordlist.txt"),
            words: 7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl TipdropConfig {
    /// Load from a TOML file, falling back to defaults if it does not exist,
    /// then apply salt overrides from the environment.
    pub fn load(path: &Path) -> TipdropResult<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| {
                TipdropError::config(format!("reading config {}: {e}", path.display()))
            })?;
            Self::from_toml(&content).map_err(|e| match e {
                TipdropError::Config(msg) => {
                    TipdropError::config(format!("{}: {msg}", path.display()))
                }
                other => other,
            })?
        } else {
            tracing::warn!(
                "config file not found: {}  (using defaults)",
                path.display()
            );
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_toml(content: &str) -> TipdropResult<Self> {
        toml::from_str(content).map_err(|e| TipdropError::config(format!("parsing config: {e}")))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(salt) = std::env::var(ID_SALT_ENV) {
            if !salt.is_empty() {
                self.identity.id_salt = salt;
            }
        }
        if let Ok(salt) = std::env::var(SECRET_SALT_ENV) {
            if !salt.is_empty() {
                self.identity.secret_salt = salt;
            }
        }
    }

    /// Startup checks that must pass before any traffic is served.
    pub fn validate(&self) -> TipdropResult<()> {
        self.identity.validate()?;
        if self.keyring.scrypt_work_factor == 0 || self.keyring.scrypt_work_factor > 30 {
            return Err(TipdropError::config(format!(
                "keyring.scrypt_work_factor out of range: {}",
                self.keyring.scrypt_work_factor
            )));
        }
        if self.operator.public_key.trim().is_empty() {
            return Err(TipdropError::config("operator.public_key is not set"));
        }
        Ok(())
    }
}

impl IdentityConfig {
    pub fn validate(&self) -> TipdropResult<()> {
        for (name, salt) in [("id_salt", &self.id_salt), ("secret_salt", &self.secret_salt)] {
            if salt.len() < MIN_SALT_LEN {
                return Err(TipdropError::config(format!(
                    "identity.{name} must be at least {MIN_SALT_LEN} bytes"
                )));
            }
        }
        if self.id_salt == self.secret_salt {
            return Err(TipdropError::config(
                "identity.id_salt and identity.secret_salt must differ",
            ));
        }
        Ok(())
    }
}
