/// Operations consumed by the service layer
///
/// Each operation takes a typed request, validates it before any side effect,
/// and answers with an [`ApiResponse`]: a status code, a human-readable
/// description and a payload. How the envelope travels (HTTP, JSON, CLI) is
/// up to the caller.
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Config;
use crate::error::{MediaError, Result};
use crate::media::registration::{validate_device_name, validate_medium_name};
use crate::media::{
    ExportCoordinator, ManifestInconsistency, MediaDiscovery, MediumContents, OsTokenGenerator,
    RegistrationService, TokenGenerator,
};
use crate::state::catalog::Catalog;
use crate::state::data::{DesignId, DiscoveredMedium, MediumId};

/// Response envelope shared by every operation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiResponse<T> {
    pub status: u16,
    pub description: String,
    pub payload: Option<T>,
}

impl<T> ApiResponse<T> {
    fn ok(status: u16, description: impl Into<String>, payload: T) -> Self {
        Self {
            status,
            description: description.into(),
            payload: Some(payload),
        }
    }

    fn from_result(result: Result<T>, status: u16, description: &str) -> Self {
        match result {
            Ok(payload) => Self::ok(status, description, payload),
            Err(e) => e.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl<T> From<MediaError> for ApiResponse<T> {
    fn from(err: MediaError) -> Self {
        debug!("Request failed: {}", err);
        Self {
            status: err.status_code(),
            description: err.to_string(),
            payload: None,
        }
    }
}

// ========== Requests ==========

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ListMediaRequest {
    #[serde(default)]
    pub registered_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RegisterMediumRequest {
    /// Directory name the device is mounted under
    pub current_name: String,
    /// Name to register the device as in the catalog
    pub new_name: String,
}

impl RegisterMediumRequest {
    pub fn validate(&self) -> Result<()> {
        validate_device_name(&self.current_name)?;
        validate_medium_name(&self.new_name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ExportDesignRequest {
    pub design_id: DesignId,
    pub medium_id: MediumId,
}

impl ExportDesignRequest {
    pub fn validate(&self) -> Result<()> {
        validate_ids(self.design_id, self.medium_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RemoveFromMediumRequest {
    pub medium_id: MediumId,
    pub design_id: DesignId,
}

impl RemoveFromMediumRequest {
    pub fn validate(&self) -> Result<()> {
        validate_ids(self.design_id, self.medium_id)
    }
}

fn validate_ids(design_id: DesignId, medium_id: MediumId) -> Result<()> {
    if design_id <= 0 {
        return Err(MediaError::InvalidRequest(format!("invalid design id {design_id}")));
    }
    if medium_id <= 0 {
        return Err(MediaError::InvalidRequest(format!("invalid medium id {medium_id}")));
    }
    Ok(())
}

// ========== Payloads ==========

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediumSummary {
    pub id: Option<MediumId>,
    pub name: String,
    pub registered: bool,
}

impl From<DiscoveredMedium> for MediumSummary {
    fn from(medium: DiscoveredMedium) -> Self {
        Self {
            id: medium.medium_id,
            name: medium.name,
            registered: medium.is_registered,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisteredMedium {
    pub id: MediumId,
    pub token: String,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportedDesign {
    pub export_id: i64,
    pub exported_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemovedDesign {
    pub warning: Option<String>,
    pub removed_at: DateTime<Utc>,
}

// ========== Service ==========

/// The media engine wired together over one shared catalog
pub struct MediaService {
    discovery: MediaDiscovery,
    registration: RegistrationService,
    exports: ExportCoordinator,
}

impl MediaService {
    pub fn new(catalog: Arc<Catalog>, config: &Config) -> Self {
        Self::with_token_generator(catalog, config, Arc::new(OsTokenGenerator::default()))
    }

    pub fn with_token_generator(
        catalog: Arc<Catalog>,
        config: &Config,
        tokens: Arc<dyn TokenGenerator>,
    ) -> Self {
        let discovery = MediaDiscovery::new(catalog.clone(), &config.mount_root);
        Self {
            registration: RegistrationService::new(catalog.clone(), discovery.clone(), tokens),
            exports: ExportCoordinator::new(
                catalog,
                discovery.clone(),
                &config.patterns_dir,
                config.capacity,
            ),
            discovery,
        }
    }

    pub fn discovery(&self) -> &MediaDiscovery {
        &self.discovery
    }

    pub fn registration(&self) -> &RegistrationService {
        &self.registration
    }

    pub fn exports(&self) -> &ExportCoordinator {
        &self.exports
    }

    /// `listMedia(registeredOnly?)`
    pub fn list_media(&self, request: &ListMediaRequest) -> ApiResponse<Vec<MediumSummary>> {
        match self.discovery.list(request.registered_only) {
            Ok(media) => ApiResponse::ok(200, "", media.into_iter().map(Into::into).collect()),
            // An absent mount root just means nothing is plugged in
            Err(MediaError::DiscoveryRootMissing(_)) => {
                ApiResponse::ok(404, "No devices connected.", Vec::new())
            }
            Err(e) => e.into(),
        }
    }

    /// `getMediumContents(mediumId)`
    pub fn medium_contents(&self, medium_id: MediumId) -> ApiResponse<MediumContents> {
        ApiResponse::from_result(self.exports.contents(medium_id), 200, "")
    }

    /// `registerMedium(currentName, newName)`
    pub fn register_medium(&self, request: &RegisterMediumRequest) -> ApiResponse<RegisteredMedium> {
        let result = request.validate().and_then(|_| {
            self.registration
                .register(&request.current_name, &request.new_name)
        });
        let result = result.map(|registration| RegisteredMedium {
            id: registration.medium_id,
            token: registration.identity_token,
            registered_at: Utc::now(),
        });
        ApiResponse::from_result(result, 201, "Medium registered.")
    }

    /// `exportDesign(designId, mediumId)`
    pub fn export_design(&self, request: &ExportDesignRequest) -> ApiResponse<ExportedDesign> {
        let result = request
            .validate()
            .and_then(|_| self.exports.export_design(request.design_id, request.medium_id))
            .map(|record| ExportedDesign {
                export_id: record.id,
                exported_at: record.exported_at,
            });
        ApiResponse::from_result(result, 201, "Design exported.")
    }

    /// `removeFromMedium(mediumId, designId)`
    pub fn remove_from_medium(&self, request: &RemoveFromMediumRequest) -> ApiResponse<RemovedDesign> {
        let result = request
            .validate()
            .and_then(|_| self.exports.remove_export(request.medium_id, request.design_id));

        match result {
            Ok(removal) => {
                let warning = removal.warning();
                let description = warning
                    .clone()
                    .unwrap_or_else(|| "Design removed from medium.".to_string());
                ApiResponse::ok(
                    200,
                    description,
                    RemovedDesign {
                        warning,
                        removed_at: removal.removed_at,
                    },
                )
            }
            Err(e) => e.into(),
        }
    }

    /// Consistency report for one medium
    pub fn verify_medium(&self, medium_id: MediumId) -> ApiResponse<Vec<ManifestInconsistency>> {
        match self.exports.verify(medium_id) {
            Ok(found) if found.is_empty() => ApiResponse::ok(200, "Medium is consistent.", found),
            Ok(found) => {
                let description = format!("{} inconsistencies found.", found.len());
                ApiResponse::ok(200, description, found)
            }
            Err(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_validation() {
        assert!(ExportDesignRequest { design_id: 1, medium_id: 1 }.validate().is_ok());
        assert!(ExportDesignRequest { design_id: 0, medium_id: 1 }.validate().is_err());
        assert!(RemoveFromMediumRequest { medium_id: -2, design_id: 1 }.validate().is_err());

        let register = RegisterMediumRequest {
            current_name: "KINGSTON".to_string(),
            new_name: "".to_string(),
        };
        assert!(matches!(register.validate(), Err(MediaError::InvalidRequest(_))));
    }

    #[test]
    fn test_requests_deserialize() {
        let list: ListMediaRequest = serde_json::from_str("{}").unwrap();
        assert!(!list.registered_only);

        let export: ExportDesignRequest =
            serde_json::from_str(r#"{ "design_id": 3, "medium_id": 1 }"#).unwrap();
        assert_eq!(export, ExportDesignRequest { design_id: 3, medium_id: 1 });
    }

    #[test]
    fn test_error_envelope() {
        let response: ApiResponse<()> = MediaError::CapacityExceeded { capacity: 8 }.into();
        assert_eq!(response.status, 507);
        assert!(!response.is_success());
        assert!(response.payload.is_none());
        assert_eq!(response.description, "medium is full (8 designs)");
    }

    #[test]
    fn test_missing_mount_root_lists_nothing() {
        let catalog = Arc::new(Catalog::open_in_memory().unwrap());
        let config = Config {
            mount_root: "/nonexistent/mount/root".into(),
            ..Config::default()
        };
        let service = MediaService::new(catalog, &config);

        let response = service.list_media(&ListMediaRequest::default());
        assert_eq!(response.status, 404);
        assert_eq!(response.description, "No devices connected.");
        assert_eq!(response.payload, Some(vec![]));
    }
}
