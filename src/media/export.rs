use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::discovery::MediaDiscovery;
use super::manifest;
use crate::error::{MediaError, Result};
use crate::state::catalog::{Catalog, CatalogTx};
use crate::state::data::{Design, DesignId, ExportRecord, Medium, MediumId};

/// Divergence between a device's manifest, its files and the catalog.
///
/// These are reported, never corrected automatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ManifestInconsistency {
    /// The device has no manifest file
    ManifestMissing,
    /// The manifest could not be read
    ManifestUnreadable(String),
    /// The manifest could not be rewritten after a file was removed
    ManifestWriteFailed(String),
    /// A removed design was not listed in the manifest
    NotInManifest(DesignId),
    /// The manifest lists the same design more than once
    DuplicateEntry(DesignId),
    /// The manifest lists an id the catalog doesn't know
    UnknownDesign(DesignId),
    /// The manifest lists a design whose file is not on the device
    FileMissing { design_id: DesignId, file_name: String },
    /// The manifest lists a design with no export record
    RecordMissing(DesignId),
    /// An export record exists for a design the manifest doesn't list
    UnlistedRecord(DesignId),
    /// The export record of a removed design could not be deleted
    RecordCleanupFailed(String),
    /// The manifest holds more entries than the medium's capacity
    OverCapacity { entries: usize, capacity: usize },
}

impl fmt::Display for ManifestInconsistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ManifestMissing => write!(f, "the device has no manifest"),
            Self::ManifestUnreadable(e) => write!(f, "the manifest could not be read: {e}"),
            Self::ManifestWriteFailed(e) => write!(f, "the manifest could not be updated: {e}"),
            Self::NotInManifest(id) => {
                write!(f, "design {id} was not in the manifest, but its file was deleted")
            }
            Self::DuplicateEntry(id) => write!(f, "design {id} is listed more than once"),
            Self::UnknownDesign(id) => write!(f, "design {id} is listed but not in the catalog"),
            Self::FileMissing { design_id, file_name } => {
                write!(f, "design {design_id} is listed but {file_name} is not on the device")
            }
            Self::RecordMissing(id) => write!(f, "design {id} is listed but has no export record"),
            Self::UnlistedRecord(id) => {
                write!(f, "design {id} has an export record but is not listed")
            }
            Self::RecordCleanupFailed(e) => write!(f, "the export record could not be deleted: {e}"),
            Self::OverCapacity { entries, capacity } => {
                write!(f, "{entries} designs listed, capacity is {capacity}")
            }
        }
    }
}

/// What a medium currently holds
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediumContents {
    pub design_ids: Vec<DesignId>,
    pub capacity: usize,
}

/// Result of removing a design from a medium
#[derive(Debug, Clone, PartialEq)]
pub struct Removal {
    pub inconsistencies: Vec<ManifestInconsistency>,
    pub removed_at: DateTime<Utc>,
}

impl Removal {
    /// Human-readable warning, `None` when everything stayed consistent
    pub fn warning(&self) -> Option<String> {
        if self.inconsistencies.is_empty() {
            return None;
        }
        let messages: Vec<String> = self.inconsistencies.iter().map(|i| i.to_string()).collect();
        Some(format!("Warning: {}", messages.join("; ")))
    }
}

/// Moves designs onto and off registered media, keeping the catalog, the
/// device manifest and the files on the device in step.
///
/// Nothing here serializes access to a device. Callers that may touch the
/// same device from several threads must hold their own per-device lock.
///
/// An export copies the design to a staging file first and only then takes
/// the catalog lock. The rename and the manifest append still run with the
/// lock held, so a device that stalls on those writes stalls every other
/// catalog call too.
pub struct ExportCoordinator {
    catalog: Arc<Catalog>,
    discovery: MediaDiscovery,
    patterns_dir: PathBuf,
    capacity: usize,
}

impl ExportCoordinator {
    pub fn new(
        catalog: Arc<Catalog>,
        discovery: MediaDiscovery,
        patterns_dir: impl Into<PathBuf>,
        capacity: usize,
    ) -> Self {
        Self {
            catalog,
            discovery,
            patterns_dir: patterns_dir.into(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn medium(&self, medium_id: MediumId) -> Result<Medium> {
        self.catalog
            .medium(medium_id)?
            .ok_or_else(|| MediaError::medium_not_found(medium_id))
    }

    fn design(&self, design_id: DesignId) -> Result<Design> {
        self.catalog
            .design(design_id)?
            .ok_or_else(|| MediaError::design_not_found(design_id))
    }

    /// Copy a design onto a medium.
    ///
    /// Every precondition (rows exist, device connected, not yet exported,
    /// room left) is checked before anything is written. The export record is
    /// inserted in a transaction that commits only after the copied file is in
    /// place and the manifest append succeeded; a failure at any step removes
    /// the copied file and rolls the transaction back. A file already on the
    /// device under the design's name is never overwritten.
    pub fn export_design(&self, design_id: DesignId, medium_id: MediumId) -> Result<ExportRecord> {
        let design = self.design(design_id)?;
        let medium = self.medium(medium_id)?;
        let device_root = self.discovery.locate(&medium)?;
        let file_name = device_file_name(&design)?;

        let listed = manifest::read(&device_root)?;
        if listed.contains(&design.id) || self.catalog.export_record(medium.id, design.id)?.is_some() {
            return Err(MediaError::AlreadyExported {
                design_id: design.id,
                medium_id: medium.id,
            });
        }
        // The manifest is the authoritative count; records are only cross-checked
        if listed.len() >= self.capacity {
            return Err(MediaError::CapacityExceeded {
                capacity: self.capacity,
            });
        }
        let recorded = self.catalog.export_records_for_medium(medium.id)?.len();
        if recorded != listed.len() {
            warn!(
                "Medium {} lists {} designs but the catalog has {} export records",
                medium.id,
                listed.len(),
                recorded
            );
        }

        let source = self.patterns_dir.join(file_name);
        if !source.is_file() {
            return Err(MediaError::SourceFileMissing(source));
        }
        let destination = device_root.join(file_name);
        if destination.exists() {
            return Err(MediaError::FileAlreadyOnDevice(destination));
        }

        // The slow copy goes to a staging name before the catalog lock is taken
        let staging = staging_path(&device_root, file_name);
        if let Err(e) = fs::copy(&source, &staging) {
            discard_copy(&staging);
            return Err(MediaError::io(staging, e));
        }

        let mut session = self.catalog.session();
        let tx = match session.transaction() {
            Ok(tx) => tx,
            Err(e) => {
                discard_copy(&staging);
                return Err(e.into());
            }
        };
        let record = match tx.insert_export_record(design.id, medium.id) {
            Ok(record) => record,
            Err(e) => {
                discard_copy(&staging);
                return Err(e.into());
            }
        };

        if let Err(e) = fs::rename(&staging, &destination) {
            discard_copy(&staging);
            abandon(tx);
            return Err(MediaError::io(destination, e));
        }

        if let Err(e) = manifest::append(&device_root, design.id) {
            discard_copy(&destination);
            abandon(tx);
            return Err(e);
        }

        if let Err(e) = tx.commit() {
            warn!("Export commit failed, undoing device changes: {}", e);
            discard_copy(&destination);
            if let Err(undo) = manifest::remove(&device_root, design.id) {
                error!("Could not remove design {} from the manifest: {}", design.id, undo);
            }
            return Err(e.into());
        }

        info!(
            "Exported design {} ('{}') to medium {} ('{}')",
            design.id, design.name, medium.id, medium.name
        );
        Ok(record)
    }

    /// Remove a design from a medium.
    ///
    /// The file on the device is deleted first and that cannot be undone, so
    /// the manifest rewrite and the record deletion that follow are best
    /// effort. Whatever doesn't line up is returned as inconsistencies rather
    /// than as an error.
    pub fn remove_export(&self, medium_id: MediumId, design_id: DesignId) -> Result<Removal> {
        let medium = self.medium(medium_id)?;
        let design = self.design(design_id)?;
        let device_root = self.discovery.locate(&medium)?;
        let file_name = device_file_name(&design)?;

        let file = device_root.join(file_name);
        if !file.is_file() {
            return Err(MediaError::FileNotOnDevice(file));
        }
        fs::remove_file(&file).map_err(|e| MediaError::io(&file, e))?;
        info!("Deleted {} from medium {}", file_name, medium.id);

        let mut inconsistencies = Vec::new();

        match manifest::load(&device_root) {
            Ok(None) => inconsistencies.push(ManifestInconsistency::ManifestMissing),
            Ok(Some(ids)) if !ids.contains(&design.id) => {
                inconsistencies.push(ManifestInconsistency::NotInManifest(design.id))
            }
            Ok(Some(ids)) => {
                let remaining: Vec<DesignId> =
                    ids.into_iter().filter(|&id| id != design.id).collect();
                if let Err(e) = manifest::write(&device_root, &remaining) {
                    inconsistencies.push(ManifestInconsistency::ManifestWriteFailed(e.to_string()));
                }
            }
            Err(e) => inconsistencies.push(ManifestInconsistency::ManifestUnreadable(e.to_string())),
        }

        match self.catalog.delete_export_record(medium.id, design.id) {
            Ok(true) => {}
            Ok(false) => debug!(
                "No export record for design {} on medium {}",
                design.id, medium.id
            ),
            Err(e) => inconsistencies.push(ManifestInconsistency::RecordCleanupFailed(e.to_string())),
        }

        for inconsistency in &inconsistencies {
            warn!("Medium {}: {}", medium.id, inconsistency);
        }

        Ok(Removal {
            inconsistencies,
            removed_at: Utc::now(),
        })
    }

    /// Design ids listed on a medium, with its capacity
    pub fn contents(&self, medium_id: MediumId) -> Result<MediumContents> {
        let medium = self.medium(medium_id)?;
        let device_root = self.discovery.locate(&medium)?;

        Ok(MediumContents {
            design_ids: manifest::read(&device_root)?,
            capacity: self.capacity,
        })
    }

    /// Compare a medium's manifest against its files and the export records.
    /// Read-only.
    pub fn verify(&self, medium_id: MediumId) -> Result<Vec<ManifestInconsistency>> {
        let medium = self.medium(medium_id)?;
        let device_root = self.discovery.locate(&medium)?;
        let mut found = Vec::new();

        let listed = match manifest::load(&device_root) {
            Ok(Some(ids)) => ids,
            Ok(None) => {
                found.push(ManifestInconsistency::ManifestMissing);
                Vec::new()
            }
            Err(e) => {
                found.push(ManifestInconsistency::ManifestUnreadable(e.to_string()));
                Vec::new()
            }
        };

        if listed.len() > self.capacity {
            found.push(ManifestInconsistency::OverCapacity {
                entries: listed.len(),
                capacity: self.capacity,
            });
        }

        let mut seen = HashSet::new();
        for &id in &listed {
            if !seen.insert(id) {
                found.push(ManifestInconsistency::DuplicateEntry(id));
                continue;
            }
            let Some(design) = self.catalog.design(id)? else {
                found.push(ManifestInconsistency::UnknownDesign(id));
                continue;
            };
            let on_device = device_file_name(&design)
                .map(|name| device_root.join(name).is_file())
                .unwrap_or(false);
            if !on_device {
                found.push(ManifestInconsistency::FileMissing {
                    design_id: id,
                    file_name: design.source_file_ref.clone(),
                });
            }
            if self.catalog.export_record(medium.id, id)?.is_none() {
                found.push(ManifestInconsistency::RecordMissing(id));
            }
        }

        for record in self.catalog.export_records_for_medium(medium.id)? {
            if !seen.contains(&record.design_id) {
                found.push(ManifestInconsistency::UnlistedRecord(record.design_id));
                // one entry per design even if it has several records
                seen.insert(record.design_id);
            }
        }

        if found.is_empty() {
            debug!("Medium {} is consistent", medium.id);
        } else {
            warn!("Medium {} has {} inconsistencies", medium.id, found.len());
        }
        Ok(found)
    }
}

/// The design's file name on a device. It must be a bare file name so the
/// copy cannot land outside the device root.
fn device_file_name(design: &Design) -> Result<&str> {
    let name = design.source_file_ref.as_str();
    let is_bare = Path::new(name).file_name().and_then(|n| n.to_str()) == Some(name);
    if name.is_empty() || !is_bare || name.starts_with('.') {
        return Err(MediaError::InvalidRequest(format!(
            "design {} has an unusable file name '{}'",
            design.id, name
        )));
    }
    Ok(name)
}

/// Where a design is copied before it is renamed into place. Design file
/// names never start with '.', so this cannot shadow another design.
fn staging_path(device_root: &Path, file_name: &str) -> PathBuf {
    device_root.join(format!(".{file_name}.part"))
}

fn abandon(tx: CatalogTx<'_>) {
    if let Err(e) = tx.rollback() {
        error!("Rollback of export record failed: {}", e);
    }
}

/// Remove a partially or fully copied design file during rollback
fn discard_copy(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            error!("Failed to remove {} during rollback: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn design_with_file(file: &str) -> Design {
        Design {
            id: 1,
            name: "rose".to_string(),
            category_id: None,
            is_favorite: false,
            source_file_ref: file.to_string(),
            preview_image_ref: "rose.png".to_string(),
            last_modified: Utc::now(),
        }
    }

    #[test]
    fn test_device_file_name() {
        assert_eq!(device_file_name(&design_with_file("rose.pes")).unwrap(), "rose.pes");
        for bad in ["", "../rose.pes", "sub/rose.pes", ".token", ".patterns"] {
            assert!(device_file_name(&design_with_file(bad)).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_staging_path_is_hidden() {
        let path = staging_path(Path::new("/media/u/USB"), "rose.pes");
        assert_eq!(path, Path::new("/media/u/USB/.rose.pes.part"));
    }

    #[test]
    fn test_removal_warning() {
        let clean = Removal {
            inconsistencies: vec![],
            removed_at: Utc::now(),
        };
        assert_eq!(clean.warning(), None);

        let diverged = Removal {
            inconsistencies: vec![ManifestInconsistency::NotInManifest(4)],
            removed_at: Utc::now(),
        };
        let warning = diverged.warning().unwrap();
        assert!(warning.contains("design 4 was not in the manifest"));
    }
}
