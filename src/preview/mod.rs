/// Design previews
///
/// This module handles:
/// - Rendering a preview image from a design file (renderer.rs)
/// - Scaling and caching previews to disk (renderer.rs)
/// - Importing a folder of design files into the catalog (import.rs)

pub mod import;
pub mod renderer;

pub use import::{import_designs, import_designs_async, ImportSummary};
pub use renderer::{PecIconRenderer, PreviewRenderer};
