/// Error types for the catalog and the media engine
///
/// `CatalogError` is raised by the SQLite persistence layer.
/// `MediaError` is what discovery, registration and export surface to callers.
/// `PreviewError` covers preview rendering and the preview image cache.
use std::io;
use std::path::PathBuf;

use rusqlite::ErrorCode;
use thiserror::Error;

use crate::state::data::{DesignId, MediumId};

pub type Result<T, E = MediaError> = std::result::Result<T, E>;

/// Errors from the catalog database
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("a medium named '{0}' is already registered")]
    NameConflict(String),

    #[error("identity token is already bound to another medium")]
    DuplicateToken,

    #[error("a design named '{0}' already exists")]
    DesignNameConflict(String),

    #[error("a category named '{0}' already exists")]
    CategoryNameConflict(String),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl CatalogError {
    /// Translate a UNIQUE violation on one of the catalog's unique columns.
    ///
    /// SQLite reports these as `UNIQUE constraint failed: <table>.<column>`.
    /// Anything that is not a constraint violation is passed through untouched.
    pub(crate) fn from_insert(err: rusqlite::Error, name: &str) -> Self {
        if let rusqlite::Error::SqliteFailure(ref failure, Some(ref message)) = err {
            if failure.code == ErrorCode::ConstraintViolation {
                if message.contains("media.token") {
                    return CatalogError::DuplicateToken;
                }
                if message.contains("media.name") {
                    return CatalogError::NameConflict(name.to_string());
                }
                if message.contains("designs.name") {
                    return CatalogError::DesignNameConflict(name.to_string());
                }
                if message.contains("categories.name") {
                    return CatalogError::CategoryNameConflict(name.to_string());
                }
            }
        }
        CatalogError::Sqlite(err)
    }
}

/// Which kind of catalog row a lookup failed to find
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Design,
    Medium,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Design => f.write_str("design"),
            EntityKind::Medium => f.write_str("medium"),
        }
    }
}

/// Errors from discovery, registration and export
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: i64 },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("a medium named '{0}' is already registered")]
    NameConflict(String),

    #[error("identity token is already bound to another medium")]
    DuplicateToken,

    #[error("device at {} is already registered", .0.display())]
    AlreadyRegistered(PathBuf),

    #[error("design {design_id} is already exported to medium {medium_id}")]
    AlreadyExported {
        design_id: DesignId,
        medium_id: MediumId,
    },

    #[error("no devices connected ({} does not exist)", .0.display())]
    DiscoveryRootMissing(PathBuf),

    #[error("device '{0}' is not connected")]
    DeviceNotConnected(String),

    #[error("medium is full ({capacity} designs)")]
    CapacityExceeded { capacity: usize },

    #[error("file {} does not exist on the device", .0.display())]
    FileNotOnDevice(PathBuf),

    #[error("{} is already on the device but not listed in its manifest", .0.display())]
    FileAlreadyOnDevice(PathBuf),

    #[error("design source file {} is missing", .0.display())]
    SourceFileMissing(PathBuf),

    #[error("manifest {} line {line} is not a design id: '{content}'", .path.display())]
    ManifestCorrupt {
        path: PathBuf,
        line: usize,
        content: String,
    },

    #[error("device I/O error on {}: {source}", .path.display())]
    DeviceIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("registration failed and the device was rolled back: {0}")]
    RegistrationFailed(#[source] CatalogError),

    #[error(transparent)]
    Preview(#[from] PreviewError),

    #[error("background task failed: {0}")]
    Background(String),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl MediaError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        MediaError::DeviceIo {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn design_not_found(id: DesignId) -> Self {
        MediaError::NotFound {
            kind: EntityKind::Design,
            id,
        }
    }

    pub(crate) fn medium_not_found(id: MediumId) -> Self {
        MediaError::NotFound {
            kind: EntityKind::Medium,
            id,
        }
    }

    /// HTTP-like status code for the API envelope
    pub fn status_code(&self) -> u16 {
        match self {
            MediaError::InvalidRequest(_) => 400,
            MediaError::NotFound { .. }
            | MediaError::DiscoveryRootMissing(_)
            | MediaError::DeviceNotConnected(_)
            | MediaError::FileNotOnDevice(_)
            | MediaError::SourceFileMissing(_) => 404,
            MediaError::NameConflict(_)
            | MediaError::DuplicateToken
            | MediaError::AlreadyRegistered(_)
            | MediaError::AlreadyExported { .. }
            | MediaError::FileAlreadyOnDevice(_) => 409,
            MediaError::CapacityExceeded { .. } => 507,
            MediaError::Preview(PreviewError::UnsupportedFormat(_)) => 415,
            MediaError::ManifestCorrupt { .. }
            | MediaError::DeviceIo { .. }
            | MediaError::RegistrationFailed(_)
            | MediaError::Preview(_)
            | MediaError::Background(_)
            | MediaError::Catalog(_) => 500,
        }
    }
}

/// Errors from preview rendering and caching
#[derive(Debug, Error)]
pub enum PreviewError {
    #[error("unsupported design format: {0}")]
    UnsupportedFormat(String),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn unique_violation(sql: &str) -> rusqlite::Error {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE media (id INTEGER PRIMARY KEY, name TEXT UNIQUE, token TEXT UNIQUE);
             INSERT INTO media (name, token) VALUES ('usb', 'abc');",
        )
        .unwrap();
        conn.execute(sql, []).unwrap_err()
    }

    #[test]
    fn test_unique_name_maps_to_name_conflict() {
        let err = unique_violation("INSERT INTO media (name, token) VALUES ('usb', 'xyz')");
        assert!(matches!(
            CatalogError::from_insert(err, "usb"),
            CatalogError::NameConflict(name) if name == "usb"
        ));
    }

    #[test]
    fn test_unique_token_maps_to_duplicate_token() {
        let err = unique_violation("INSERT INTO media (name, token) VALUES ('other', 'abc')");
        assert!(matches!(
            CatalogError::from_insert(err, "other"),
            CatalogError::DuplicateToken
        ));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(MediaError::design_not_found(3).status_code(), 404);
        assert_eq!(MediaError::CapacityExceeded { capacity: 8 }.status_code(), 507);
        assert_eq!(MediaError::NameConflict("a".into()).status_code(), 409);
        assert_eq!(MediaError::FileAlreadyOnDevice("rose.pes".into()).status_code(), 409);
        assert_eq!(MediaError::InvalidRequest("x".into()).status_code(), 400);
    }
}
