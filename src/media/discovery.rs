use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};
use walkdir::WalkDir;

use super::marker;
use crate::error::{MediaError, Result};
use crate::state::catalog::Catalog;
use crate::state::data::{DiscoveredMedium, Medium};

/// Finds the removable devices mounted under the mount root and matches
/// their identity markers against the catalog.
#[derive(Debug, Clone)]
pub struct MediaDiscovery {
    catalog: Arc<Catalog>,
    mount_root: PathBuf,
}

impl MediaDiscovery {
    pub fn new(catalog: Arc<Catalog>, mount_root: impl Into<PathBuf>) -> Self {
        Self {
            catalog,
            mount_root: mount_root.into(),
        }
    }

    pub fn mount_root(&self) -> &Path {
        &self.mount_root
    }

    /// Path a device with directory name `name` would be mounted at
    pub fn device_path(&self, name: &str) -> PathBuf {
        self.mount_root.join(name)
    }

    /// Top-level directories of the mount root, in file name order
    fn device_dirs(&self) -> Result<Vec<PathBuf>> {
        if !self.mount_root.is_dir() {
            return Err(MediaError::DiscoveryRootMissing(self.mount_root.clone()));
        }

        let dirs = WalkDir::new(&self.mount_root)
            .min_depth(1)
            .max_depth(1)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping unreadable mount entry: {}", e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_dir())
            .map(|entry| entry.into_path())
            .collect();

        Ok(dirs)
    }

    /// List connected devices.
    ///
    /// A device is registered when its marker holds the token of a catalog
    /// medium. Devices without a marker, with an unreadable marker, or with a
    /// token the catalog doesn't know are listed as unregistered.
    pub fn list(&self, registered_only: bool) -> Result<Vec<DiscoveredMedium>> {
        let mut found = Vec::new();

        for dir in self.device_dirs()? {
            let dir_name = dir
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default();

            let medium = match marker::read(&dir) {
                Ok(Some(token)) => {
                    let medium = self.catalog.medium_by_token(&token)?;
                    if medium.is_none() {
                        warn!("Device '{}' carries a token unknown to the catalog", dir_name);
                    }
                    medium
                }
                Ok(None) => None,
                Err(e) => {
                    warn!("Could not read identity marker of '{}': {}", dir_name, e);
                    None
                }
            };

            let entry = match medium {
                Some(medium) => DiscoveredMedium {
                    medium_id: Some(medium.id),
                    name: medium.name,
                    is_registered: true,
                },
                None => DiscoveredMedium {
                    medium_id: None,
                    name: dir_name,
                    is_registered: false,
                },
            };

            if registered_only && !entry.is_registered {
                continue;
            }
            found.push(entry);
        }

        debug!("Discovered {} devices under {}", found.len(), self.mount_root.display());
        Ok(found)
    }

    /// Find where a registered medium is currently mounted.
    pub fn locate(&self, medium: &Medium) -> Result<PathBuf> {
        let dirs = match self.device_dirs() {
            Ok(dirs) => dirs,
            Err(MediaError::DiscoveryRootMissing(_)) => {
                return Err(MediaError::DeviceNotConnected(medium.name.clone()))
            }
            Err(e) => return Err(e),
        };

        for dir in dirs {
            match marker::read(&dir) {
                Ok(Some(token)) if token == medium.identity_token => return Ok(dir),
                Ok(_) => {}
                Err(e) => debug!("Skipping {}: {}", dir.display(), e),
            }
        }

        Err(MediaError::DeviceNotConnected(medium.name.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<Catalog>, MediaDiscovery) {
        let root = TempDir::new().unwrap();
        let catalog = Arc::new(Catalog::open_in_memory().unwrap());
        let discovery = MediaDiscovery::new(catalog.clone(), root.path());
        (root, catalog, discovery)
    }

    #[test]
    fn test_missing_root() {
        let catalog = Arc::new(Catalog::open_in_memory().unwrap());
        let discovery = MediaDiscovery::new(catalog, "/nonexistent/mount/root");
        assert!(matches!(
            discovery.list(false).unwrap_err(),
            MediaError::DiscoveryRootMissing(_)
        ));
    }

    #[test]
    fn test_orphaned_marker_is_unregistered() {
        let (root, _catalog, discovery) = setup();
        let device = root.path().join("KINGSTON");
        fs::create_dir(&device).unwrap();
        marker::create(&device, "stale-token").unwrap();

        let found = discovery.list(false).unwrap();
        assert_eq!(
            found,
            vec![DiscoveredMedium {
                medium_id: None,
                name: "KINGSTON".to_string(),
                is_registered: false,
            }]
        );
    }

    #[test]
    fn test_plain_files_are_not_devices() {
        let (root, _catalog, discovery) = setup();
        fs::write(root.path().join("notes.txt"), "hello").unwrap();
        assert!(discovery.list(false).unwrap().is_empty());
    }

    #[test]
    fn test_locate() {
        let (root, catalog, discovery) = setup();
        let medium = catalog.insert_medium("work", "tok-1").unwrap();

        assert!(matches!(
            discovery.locate(&medium).unwrap_err(),
            MediaError::DeviceNotConnected(name) if name == "work"
        ));

        fs::create_dir(root.path().join("other")).unwrap();
        let device = root.path().join("SANDISK");
        fs::create_dir(&device).unwrap();
        marker::create(&device, "tok-1").unwrap();

        assert_eq!(discovery.locate(&medium).unwrap(), device);
    }
}
