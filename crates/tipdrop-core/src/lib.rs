//! tipdrop-core: types, configuration and errors shared by every tipdrop crate.

pub mod config;
pub mod error;
pub mod types;

pub use error::{TipdropError, TipdropResult};
pub use types::{BlobKind, Fingerprint, SourceId};
