//! tipdrop-storage: filesystem blob store for ciphertext
//!
//! Layout:
//! ```text
//! <root>/<SourceId>/<index>-<designation>-msg.age
//!                  /<index>-<designation>-doc.zst.age
//!                  /<index>-<designation>-reply.age
//! <shredder>/<uuid>/...        (source directories awaiting secure deletion)
//! ```
//! Every path is checked with [`BlobStore::verify`] before any I/O.

pub mod names;
pub mod shred;
pub mod store;

pub use names::BlobName;
pub use store::BlobStore;
