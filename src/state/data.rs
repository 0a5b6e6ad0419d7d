/// Shared data structures for the catalog
///
/// These structs represent the data model that flows between
/// the database layer and the media engine.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type DesignId = i64;
pub type MediumId = i64;
pub type CategoryId = i64;

/// A category used to group designs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    /// Unique, at most 20 characters
    pub name: String,
    pub description: Option<String>,
}

/// Represents a single embroidery design in the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Design {
    /// Unique database ID
    pub id: DesignId,
    /// Display name, unique across the catalog
    pub name: String,
    /// Cleared when the category is deleted
    pub category_id: Option<CategoryId>,
    pub is_favorite: bool,
    /// Filename of the design in the patterns directory (e.g., "rose.pes").
    /// The same filename is used when the design is copied onto a medium.
    pub source_file_ref: String,
    /// Filename of the rendered preview in the previews directory
    pub preview_image_ref: String,
    /// Updated on every mutation
    pub last_modified: DateTime<Utc>,
}

/// Fields needed to insert a new design
#[derive(Debug, Clone, PartialEq)]
pub struct NewDesign {
    pub name: String,
    pub category_id: Option<CategoryId>,
    pub source_file_ref: String,
    pub preview_image_ref: String,
}

/// A registered removable device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Medium {
    pub id: MediumId,
    /// Catalog name chosen at registration, unique
    pub name: String,
    /// Opaque token written to the device's identity marker. Never changes.
    pub identity_token: String,
}

/// Records that a design was copied onto a medium
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRecord {
    pub id: i64,
    pub design_id: DesignId,
    pub medium_id: MediumId,
    pub exported_at: DateTime<Utc>,
}

/// A device directory found under the mount root
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredMedium {
    /// `None` when the device is not registered
    pub medium_id: Option<MediumId>,
    /// Catalog name when registered, directory name otherwise
    pub name: String,
    pub is_registered: bool,
}
