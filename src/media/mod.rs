/// Removable media engine
///
/// This module keeps three stores in step: the catalog, the identity marker
/// on each device, and each device's manifest of exported designs.
/// - Identity tokens (token.rs)
/// - Identity marker file I/O (marker.rs)
/// - Manifest file I/O (manifest.rs)
/// - Finding connected devices (discovery.rs)
/// - Binding a device to the catalog (registration.rs)
/// - Exporting designs to and removing them from a device (export.rs)

pub mod discovery;
pub mod export;
pub mod manifest;
pub mod marker;
pub mod registration;
pub mod token;

pub use discovery::MediaDiscovery;
pub use export::{ExportCoordinator, ManifestInconsistency, MediumContents, Removal};
pub use registration::{Registration, RegistrationService};
pub use token::{OsTokenGenerator, TokenGenerator};
