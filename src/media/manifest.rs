/// Per-device manifest of exported designs
///
/// The manifest lives at `<device-root>/.patterns` and holds one decimal
/// design id per line, in export order. Blank lines are ignored on read.
/// Full rewrites go through a temporary file and a rename so a crash
/// mid-write never leaves a truncated manifest behind.
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{MediaError, Result};
use crate::state::data::DesignId;

pub const MANIFEST_FILE: &str = ".patterns";

const MANIFEST_TMP_FILE: &str = ".patterns.tmp";

pub fn manifest_path(device_root: &Path) -> PathBuf {
    device_root.join(MANIFEST_FILE)
}

/// Read the manifest, or `None` if the device has no manifest file
pub fn load(device_root: &Path) -> Result<Option<Vec<DesignId>>> {
    let path = manifest_path(device_root);
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(MediaError::io(path, e)),
    };

    parse(&path, &content).map(Some)
}

/// Read the manifest. A missing manifest reads as empty.
pub fn read(device_root: &Path) -> Result<Vec<DesignId>> {
    Ok(load(device_root)?.unwrap_or_default())
}

fn parse(path: &Path, content: &str) -> Result<Vec<DesignId>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            line.trim()
                .parse::<DesignId>()
                .map_err(|_| MediaError::ManifestCorrupt {
                    path: path.to_path_buf(),
                    line: index + 1,
                    content: line.to_string(),
                })
        })
        .collect()
}

/// Replace the manifest with `ids`
pub fn write(device_root: &Path, ids: &[DesignId]) -> Result<()> {
    let tmp_path = device_root.join(MANIFEST_TMP_FILE);
    let path = manifest_path(device_root);

    let mut content = String::new();
    for id in ids {
        content.push_str(&id.to_string());
        content.push('\n');
    }

    let written = File::create(&tmp_path).and_then(|mut file| {
        file.write_all(content.as_bytes())?;
        file.sync_all()
    });
    if let Err(e) = written {
        fs::remove_file(&tmp_path).ok();
        return Err(MediaError::io(tmp_path, e));
    }

    fs::rename(&tmp_path, &path).map_err(|e| MediaError::io(&path, e))?;

    debug!("Wrote manifest {} ({} entries)", path.display(), ids.len());
    Ok(())
}

/// Add one id at the end of the manifest, creating the file if needed
pub fn append(device_root: &Path, id: DesignId) -> Result<()> {
    let path = manifest_path(device_root);

    // Hand-edited manifests may lack a trailing newline
    let needs_separator = match fs::read(&path) {
        Ok(bytes) => bytes.last().is_some_and(|&b| b != b'\n'),
        Err(e) if e.kind() == ErrorKind::NotFound => false,
        Err(e) => return Err(MediaError::io(path, e)),
    };

    let line = if needs_separator {
        format!("\n{id}\n")
    } else {
        format!("{id}\n")
    };

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .and_then(|mut file| {
            file.write_all(line.as_bytes())?;
            file.sync_all()
        })
        .map_err(|e| MediaError::io(&path, e))?;

    debug!("Appended design {} to {}", id, path.display());
    Ok(())
}

/// Rewrite the manifest without `id`.
/// Returns false, leaving the file untouched, if `id` wasn't listed.
pub fn remove(device_root: &Path, id: DesignId) -> Result<bool> {
    let ids = read(device_root)?;
    if !ids.contains(&id) {
        return Ok(false);
    }

    let remaining: Vec<DesignId> = ids.into_iter().filter(|&other| other != id).collect();
    write(device_root, &remaining)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_manifest() {
        let dir = TempDir::new().unwrap();
        assert_eq!(load(dir.path()).unwrap(), None);
        assert!(read(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_blank_lines_ignored() {
        let dir = TempDir::new().unwrap();
        fs::write(manifest_path(dir.path()), "\n3\n\n7\n  \n").unwrap();
        assert_eq!(read(dir.path()).unwrap(), vec![3, 7]);
    }

    #[test]
    fn test_append_keeps_order() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), &[]).unwrap();
        append(dir.path(), 5).unwrap();
        append(dir.path(), 2).unwrap();
        append(dir.path(), 9).unwrap();
        assert_eq!(read(dir.path()).unwrap(), vec![5, 2, 9]);
    }

    #[test]
    fn test_append_after_missing_trailing_newline() {
        let dir = TempDir::new().unwrap();
        fs::write(manifest_path(dir.path()), "4").unwrap();
        append(dir.path(), 6).unwrap();
        assert_eq!(read(dir.path()).unwrap(), vec![4, 6]);
    }

    #[test]
    fn test_write_replaces_and_cleans_tmp() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), &[1, 2, 3]).unwrap();
        write(dir.path(), &[8]).unwrap();

        assert_eq!(read(dir.path()).unwrap(), vec![8]);
        assert!(!dir.path().join(MANIFEST_TMP_FILE).exists());
    }

    #[test]
    fn test_remove() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), &[1, 2, 3]).unwrap();

        assert!(remove(dir.path(), 2).unwrap());
        assert_eq!(read(dir.path()).unwrap(), vec![1, 3]);
        assert!(!remove(dir.path(), 2).unwrap());
        assert_eq!(read(dir.path()).unwrap(), vec![1, 3]);
    }

    #[test]
    fn test_corrupt_line() {
        let dir = TempDir::new().unwrap();
        fs::write(manifest_path(dir.path()), "1\nrose.pes\n").unwrap();

        let err = read(dir.path()).unwrap_err();
        assert!(matches!(err, MediaError::ManifestCorrupt { line: 2, .. }));
    }
}
