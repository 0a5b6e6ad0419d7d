/// Design folder import
///
/// Scans the patterns directory for embroidery files, renders a preview for
/// each one and adds it to the catalog. Files whose name is already in the
/// catalog are skipped, so the import can be re-run safely.
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};
use walkdir::WalkDir;

use super::renderer::{preview_file_name, save_preview, PreviewRenderer};
use crate::error::{CatalogError, MediaError, Result};
use crate::state::catalog::Catalog;
use crate::state::data::NewDesign;

/// Supported design file extensions
pub const DESIGN_EXTENSIONS: &[&str] = &["pes"];

/// Longest design name the catalog accepts
pub const MAX_DESIGN_NAME_LEN: usize = 50;

/// Result of a folder import operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub fn is_design_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| DESIGN_EXTENSIONS.contains(&ext.as_str()))
}

/// Import every design file directly inside `patterns_dir`.
///
/// Unreadable or unrenderable files are counted as failed and logged; only
/// catalog errors abort the import.
pub fn import_designs(
    catalog: &Catalog,
    renderer: &dyn PreviewRenderer,
    patterns_dir: &Path,
    previews_dir: &Path,
) -> Result<ImportSummary> {
    let mut summary = ImportSummary::default();

    if !patterns_dir.is_dir() {
        return Err(MediaError::SourceFileMissing(patterns_dir.to_path_buf()));
    }

    info!("Scanning folder: {}", patterns_dir.display());

    // Only the top level: a design's file name is also its name on the device
    for entry in WalkDir::new(patterns_dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !entry.file_type().is_file() || !is_design_file(path) {
            continue;
        }

        let (Some(file_name), Some(stem)) = (
            path.file_name().and_then(|n| n.to_str()),
            path.file_stem().and_then(|s| s.to_str()),
        ) else {
            warn!("Skipping file with a non UTF-8 name: {}", path.display());
            summary.failed += 1;
            continue;
        };

        if stem.chars().count() > MAX_DESIGN_NAME_LEN {
            warn!("Design name '{}' is longer than {} characters", stem, MAX_DESIGN_NAME_LEN);
            summary.failed += 1;
            continue;
        }
        if catalog.design_by_name(stem)?.is_some() {
            summary.skipped += 1;
            continue;
        }

        let preview_name = preview_file_name(stem);
        let rendered = fs::read(path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| renderer.render(&bytes).map_err(|e| e.to_string()))
            .and_then(|png| save_preview(&png, previews_dir, &preview_name).map_err(|e| e.to_string()));
        if let Err(e) = rendered {
            warn!("Error importing {}: {}", file_name, e);
            summary.failed += 1;
            continue;
        }

        let design = NewDesign {
            name: stem.to_string(),
            category_id: None,
            source_file_ref: file_name.to_string(),
            preview_image_ref: preview_name,
        };
        match catalog.insert_design(&design) {
            Ok(_) => {
                summary.imported += 1;
                if summary.imported % 100 == 0 {
                    info!("Imported {} designs...", summary.imported);
                }
            }
            // Inserted by someone else since the name check
            Err(CatalogError::DesignNameConflict(_)) => summary.skipped += 1,
            Err(e) => return Err(e.into()),
        }
    }

    info!(
        "Import complete: {} new, {} skipped, {} failed",
        summary.imported, summary.skipped, summary.failed
    );
    Ok(summary)
}

/// Run [`import_designs`] on the blocking thread pool
pub async fn import_designs_async(
    catalog: Arc<Catalog>,
    renderer: Arc<dyn PreviewRenderer>,
    patterns_dir: PathBuf,
    previews_dir: PathBuf,
) -> Result<ImportSummary> {
    tokio::task::spawn_blocking(move || {
        import_designs(&catalog, renderer.as_ref(), &patterns_dir, &previews_dir)
    })
    .await
    .map_err(|e| MediaError::Background(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preview::renderer::tests::sample_pes;
    use crate::preview::renderer::PecIconRenderer;
    use tempfile::TempDir;

    fn patterns_fixture() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("rose.pes"), sample_pes()).unwrap();
        fs::write(dir.path().join("TULIP.PES"), sample_pes()).unwrap();
        fs::write(dir.path().join("broken.pes"), b"garbage").unwrap();
        fs::write(dir.path().join("notes.txt"), b"not a design").unwrap();
        dir
    }

    #[test]
    fn test_is_design_file() {
        assert!(is_design_file(Path::new("rose.pes")));
        assert!(is_design_file(Path::new("ROSE.PES")));
        assert!(!is_design_file(Path::new("rose.png")));
        assert!(!is_design_file(Path::new("rose")));
    }

    #[test]
    fn test_import_and_reimport() {
        let patterns = patterns_fixture();
        let previews = TempDir::new().unwrap();
        let catalog = Catalog::open_in_memory().unwrap();

        let first = import_designs(&catalog, &PecIconRenderer, patterns.path(), previews.path()).unwrap();
        assert_eq!(
            first,
            ImportSummary {
                imported: 2,
                skipped: 0,
                failed: 1
            }
        );

        let rose = catalog.design_by_name("rose").unwrap().unwrap();
        assert_eq!(rose.source_file_ref, "rose.pes");
        assert_eq!(rose.preview_image_ref, "rose.png");
        assert!(previews.path().join("rose.png").is_file());
        assert!(previews.path().join("TULIP.png").is_file());

        let second = import_designs(&catalog, &PecIconRenderer, patterns.path(), previews.path()).unwrap();
        assert_eq!(second.imported, 0);
        assert_eq!(second.skipped, 2);
        assert_eq!(catalog.design_count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_import_async() {
        let patterns = patterns_fixture();
        let previews = TempDir::new().unwrap();
        let catalog = Arc::new(Catalog::open_in_memory().unwrap());

        let summary = import_designs_async(
            catalog.clone(),
            Arc::new(PecIconRenderer),
            patterns.path().to_path_buf(),
            previews.path().to_path_buf(),
        )
        .await
        .unwrap();

        assert_eq!(summary.imported, 2);
        assert_eq!(catalog.designs().unwrap().len(), 2);
    }

    #[test]
    fn test_missing_patterns_dir() {
        let catalog = Catalog::open_in_memory().unwrap();
        let err = import_designs(
            &catalog,
            &PecIconRenderer,
            Path::new("/nonexistent/patterns"),
            Path::new("/tmp"),
        )
        .unwrap_err();
        assert!(matches!(err, MediaError::SourceFileMissing(_)));
    }
}
