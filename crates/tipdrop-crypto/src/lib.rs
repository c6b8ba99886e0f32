//! tipdrop-crypto: deterministic source identity derivation
//!
//! A source remembers only a passphrase. Everything else is recomputed from it
//! on every visit:
//! ```text
//! passphrase ──normalize──┬── Argon2id(salt = id_salt)     → SourceId      (public, stable)
//!                         └── Argon2id(salt = secret_salt) → KeypairSecret (unlocks private key)
//! ```
//! The two salts are fixed per installation and must differ.

pub mod kdf;
pub mod passphrase;

pub use kdf::{normalize_passphrase, DerivedIdentity, IdentityDeriver, KdfParams, KeypairSecret};
pub use passphrase::Wordlist;

/// Size of each Argon2id output in bytes
pub const DIGEST_SIZE: usize = 32;

/// Longest passphrase accepted, in bytes after normalization
pub const MAX_PASSPHRASE_LEN: usize = 128;
