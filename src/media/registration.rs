use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use super::discovery::MediaDiscovery;
use super::token::{self, TokenGenerator};
use super::{manifest, marker};
use crate::error::{CatalogError, MediaError, Result};
use crate::state::catalog::Catalog;
use crate::state::data::MediumId;

/// Longest catalog name a medium can be registered under
pub const MAX_MEDIUM_NAME_LEN: usize = 20;

/// Outcome of a successful registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Registration {
    pub medium_id: MediumId,
    pub identity_token: String,
}

/// Binds a physical device to a new catalog medium.
///
/// Files are written before the catalog row so that a failed insert can be
/// undone by deleting them. Once the row is committed nothing is left to undo.
pub struct RegistrationService {
    catalog: Arc<Catalog>,
    discovery: MediaDiscovery,
    tokens: Arc<dyn TokenGenerator>,
}

impl RegistrationService {
    pub fn new(
        catalog: Arc<Catalog>,
        discovery: MediaDiscovery,
        tokens: Arc<dyn TokenGenerator>,
    ) -> Self {
        Self {
            catalog,
            discovery,
            tokens,
        }
    }

    /// Register the device mounted as `current_device_name` under
    /// `desired_catalog_name`.
    pub fn register(
        &self,
        current_device_name: &str,
        desired_catalog_name: &str,
    ) -> Result<Registration> {
        validate_device_name(current_device_name)?;
        validate_medium_name(desired_catalog_name)?;

        let device_root = self.discovery.device_path(current_device_name);
        if !device_root.is_dir() {
            return Err(MediaError::DeviceNotConnected(current_device_name.to_string()));
        }
        if marker::exists(&device_root) {
            return Err(MediaError::AlreadyRegistered(device_root));
        }
        if self.catalog.medium_by_name(desired_catalog_name)?.is_some() {
            return Err(MediaError::NameConflict(desired_catalog_name.to_string()));
        }

        let token = token::generate_unused(self.tokens.as_ref(), |candidate| {
            Ok(self.catalog.token_exists(candidate)?)
        })?;

        marker::create(&device_root, &token)?;
        if let Err(e) = manifest::write(&device_root, &[]) {
            remove_registration_files(&device_root);
            return Err(e);
        }

        let medium = match self.catalog.insert_medium(desired_catalog_name, &token) {
            Ok(medium) => medium,
            Err(e) => {
                warn!(
                    "Catalog insert for '{}' failed, removing device files: {}",
                    desired_catalog_name, e
                );
                remove_registration_files(&device_root);
                return Err(match e {
                    CatalogError::NameConflict(name) => MediaError::NameConflict(name),
                    CatalogError::DuplicateToken => MediaError::DuplicateToken,
                    other => MediaError::RegistrationFailed(other),
                });
            }
        };

        info!(
            "Registered device '{}' as medium {} ('{}')",
            current_device_name, medium.id, medium.name
        );

        Ok(Registration {
            medium_id: medium.id,
            identity_token: token,
        })
    }
}

/// Best-effort removal of the marker and manifest written by a failed registration
fn remove_registration_files(device_root: &Path) {
    for path in [
        marker::marker_path(device_root),
        manifest::manifest_path(device_root),
    ] {
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                error!("Failed to remove {}: {}", path.display(), e);
            }
        }
    }
}

/// A device name must be a single directory name under the mount root
pub fn validate_device_name(name: &str) -> Result<()> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed == "." || trimmed == ".." || name.contains(['/', '\\']) {
        return Err(MediaError::InvalidRequest(format!(
            "'{name}' is not a device directory name"
        )));
    }
    Ok(())
}

pub fn validate_medium_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(MediaError::InvalidRequest("medium name is empty".to_string()));
    }
    if name.chars().count() > MAX_MEDIUM_NAME_LEN {
        return Err(MediaError::InvalidRequest(format!(
            "medium name is longer than {MAX_MEDIUM_NAME_LEN} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::token::OsTokenGenerator;
    use tempfile::TempDir;

    struct FixedToken(&'static str);

    impl TokenGenerator for FixedToken {
        fn generate(&self) -> String {
            self.0.to_string()
        }
    }

    fn service(root: &TempDir, tokens: Arc<dyn TokenGenerator>) -> (Arc<Catalog>, RegistrationService) {
        let catalog = Arc::new(Catalog::open_in_memory().unwrap());
        let discovery = MediaDiscovery::new(catalog.clone(), root.path());
        let service = RegistrationService::new(catalog.clone(), discovery, tokens);
        (catalog, service)
    }

    #[test]
    fn test_register_writes_marker_and_empty_manifest() {
        let root = TempDir::new().unwrap();
        fs::create_dir(root.path().join("KINGSTON")).unwrap();
        let (catalog, service) = service(&root, Arc::new(OsTokenGenerator::default()));

        let registration = service.register("KINGSTON", "studio").unwrap();

        let device = root.path().join("KINGSTON");
        assert_eq!(marker::read(&device).unwrap(), Some(registration.identity_token.clone()));
        assert_eq!(manifest::load(&device).unwrap(), Some(vec![]));

        let medium = catalog.medium(registration.medium_id).unwrap().unwrap();
        assert_eq!(medium.name, "studio");
        assert_eq!(medium.identity_token, registration.identity_token);
    }

    #[test]
    fn test_missing_device() {
        let root = TempDir::new().unwrap();
        let (_, service) = service(&root, Arc::new(OsTokenGenerator::default()));
        assert!(matches!(
            service.register("GHOST", "studio").unwrap_err(),
            MediaError::DeviceNotConnected(_)
        ));
    }

    #[test]
    fn test_name_conflict_leaves_device_untouched() {
        let root = TempDir::new().unwrap();
        fs::create_dir(root.path().join("A")).unwrap();
        fs::create_dir(root.path().join("B")).unwrap();
        let (_, service) = service(&root, Arc::new(OsTokenGenerator::default()));

        service.register("A", "studio").unwrap();
        let err = service.register("B", "studio").unwrap_err();

        assert!(matches!(err, MediaError::NameConflict(name) if name == "studio"));
        assert!(!marker::exists(&root.path().join("B")));
        assert!(!manifest::manifest_path(&root.path().join("B")).exists());
    }

    #[test]
    fn test_duplicate_token_is_rejected_before_writing() {
        let root = TempDir::new().unwrap();
        fs::create_dir(root.path().join("B")).unwrap();
        let (catalog, service) = service(&root, Arc::new(FixedToken("same")));
        catalog.insert_medium("existing", "same").unwrap();

        let err = service.register("B", "new").unwrap_err();
        assert!(matches!(err, MediaError::DuplicateToken));
        assert!(!marker::exists(&root.path().join("B")));
    }

    #[test]
    fn test_invalid_names() {
        let root = TempDir::new().unwrap();
        let (_, service) = service(&root, Arc::new(OsTokenGenerator::default()));

        for (device, name) in [("../etc", "x"), ("", "x"), ("USB", ""), ("USB", "a-name-well-over-twenty")] {
            assert!(matches!(
                service.register(device, name).unwrap_err(),
                MediaError::InvalidRequest(_)
            ));
        }
    }
}
