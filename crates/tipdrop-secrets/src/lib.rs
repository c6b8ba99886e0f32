//! tipdrop-secrets: per-source key custody and multi-recipient encryption
//!
//! ```text
//!   passphrase ──► IdentityDeriver ──► (SourceId, KeypairSecret)
//!                                          │            │
//!                                   tag ◄──┘            └──► seals private key
//!                                    │
//!   KeyStore (DirKeyring | MemoryKeyring) ◄── Custody ◄── SourceCrypto ──► age
//!                                                             │
//!                                    Submissions ─────────────┴──► BlobStore
//! ```
//!
//! Every blob is an age file with one X25519 stanza per recipient. The
//! operator's standing key is always among the recipients of anything a
//! source submits; replies additionally go to the source's own key.

pub mod custody;
pub mod envelope;
pub mod keygen;
pub mod keyring;
pub mod source;
pub mod submission;

pub use custody::{Custody, PublicKeyHandle};
pub use envelope::{decrypt_from, encrypt_to};
pub use keygen::{GenerateKeypair, KeygenQueue, KeygenStats};
pub use keyring::{DirKeyring, KeyRecord, KeyStore, MemoryKeyring};
pub use source::SourceCrypto;
pub use submission::{SourceDeletion, Submissions};
