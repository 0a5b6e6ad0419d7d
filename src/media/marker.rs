/// Device identity marker
///
/// `<device-root>/.token` holds exactly the identity token of the medium the
/// device was registered as. It is written once and only read afterwards.
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::{MediaError, Result};

pub const MARKER_FILE: &str = ".token";

pub fn marker_path(device_root: &Path) -> PathBuf {
    device_root.join(MARKER_FILE)
}

pub fn exists(device_root: &Path) -> bool {
    marker_path(device_root).is_file()
}

/// Read the token on a device, `None` if it carries no marker.
/// Surrounding whitespace (a trailing newline from manual edits) is dropped.
pub fn read(device_root: &Path) -> Result<Option<String>> {
    let path = marker_path(device_root);
    match fs::read_to_string(&path) {
        Ok(token) => Ok(Some(token.trim().to_string())),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(MediaError::io(path, e)),
    }
}

/// Create the marker. Fails with `AlreadyRegistered` if one already exists.
pub fn create(device_root: &Path, token: &str) -> Result<()> {
    let path = marker_path(device_root);
    let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            return Err(MediaError::AlreadyRegistered(device_root.to_path_buf()))
        }
        Err(e) => return Err(MediaError::io(path, e)),
    };

    file.write_all(token.as_bytes())
        .and_then(|_| file.sync_all())
        .map_err(|e| MediaError::io(&path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_and_read() {
        let dir = TempDir::new().unwrap();
        assert_eq!(read(dir.path()).unwrap(), None);
        assert!(!exists(dir.path()));

        create(dir.path(), "abc123").unwrap();
        assert!(exists(dir.path()));
        assert_eq!(read(dir.path()).unwrap().as_deref(), Some("abc123"));
        assert_eq!(fs::read_to_string(marker_path(dir.path())).unwrap(), "abc123");
    }

    #[test]
    fn test_create_refuses_existing_marker() {
        let dir = TempDir::new().unwrap();
        create(dir.path(), "first").unwrap();

        let err = create(dir.path(), "second").unwrap_err();
        assert!(matches!(err, MediaError::AlreadyRegistered(_)));
        assert_eq!(read(dir.path()).unwrap().as_deref(), Some("first"));
    }

    #[test]
    fn test_trailing_newline_ignored() {
        let dir = TempDir::new().unwrap();
        fs::write(marker_path(dir.path()), "abc123\n").unwrap();
        assert_eq!(read(dir.path()).unwrap().as_deref(), Some("abc123"));
    }
}
