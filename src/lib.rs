//! Embroidery design catalog with removable media export.
//!
//! The catalog (SQLite) tracks designs, registered media and which design was
//! exported to which medium. Each registered device carries an identity
//! marker and a manifest of the designs on it; the media engine keeps those
//! three stores consistent without a transaction spanning them.

pub mod api;
pub mod config;
pub mod error;
pub mod media;
pub mod preview;
pub mod state;

pub use api::MediaService;
pub use config::Config;
pub use error::{CatalogError, MediaError, PreviewError};
pub use state::catalog::Catalog;
