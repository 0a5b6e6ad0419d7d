use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::{imageops::FilterType, DynamicImage, GrayImage, ImageFormat, Luma};
use tracing::debug;

use crate::error::PreviewError;

/// Size of generated previews (longest side)
pub const PREVIEW_SIZE: u32 = 256;

/// Turns the bytes of a design file into an encoded preview image
pub trait PreviewRenderer: Send + Sync {
    /// Fails with `PreviewError::UnsupportedFormat` on input it can't decode
    fn render(&self, design: &[u8]) -> Result<Vec<u8>, PreviewError>;
}

/// Renders the monochrome icon every PES file carries in its PEC section.
///
/// Layout, offsets relative to the start of the PEC section:
/// - 34: icon row stride in bytes, 35: icon height in rows
/// - 514: 24-bit little-endian offset of the icon block, counted from 512
/// - the first icon in the block is the whole design, LSB-first bit rows
#[derive(Debug, Default, Clone, Copy)]
pub struct PecIconRenderer;

const PES_MAGIC: &[u8] = b"#PES";
const PEC_STRIDE_OFFSET: usize = 34;
const PEC_HEIGHT_OFFSET: usize = 35;
const PEC_GRAPHIC_POINTER: usize = 514;
const PEC_GRAPHIC_BASE: usize = 512;

impl PecIconRenderer {
    /// Extract the design icon as a grayscale image (black stitches on white)
    pub fn extract_icon(data: &[u8]) -> Result<GrayImage, PreviewError> {
        if data.len() < 12 || &data[..4] != PES_MAGIC {
            return Err(PreviewError::UnsupportedFormat("missing #PES header".to_string()));
        }

        let pec = u32::from_le_bytes([data[8], data[9], data[10], data[11]]) as usize;
        let header = data
            .get(pec..pec + PEC_GRAPHIC_POINTER + 3)
            .ok_or_else(|| truncated("PEC header"))?;

        let stride = header[PEC_STRIDE_OFFSET] as usize;
        let height = header[PEC_HEIGHT_OFFSET] as usize;
        if stride == 0 || height == 0 {
            return Err(PreviewError::UnsupportedFormat("empty PEC icon".to_string()));
        }

        let pointer = &header[PEC_GRAPHIC_POINTER..PEC_GRAPHIC_POINTER + 3];
        let graphic_offset = u32::from_le_bytes([pointer[0], pointer[1], pointer[2], 0]) as usize;
        let start = pec + PEC_GRAPHIC_BASE + graphic_offset;
        let bitmap = data
            .get(start..start + stride * height)
            .ok_or_else(|| truncated("PEC icon"))?;

        let width = (stride * 8) as u32;
        Ok(GrayImage::from_fn(width, height as u32, |x, y| {
            let byte = bitmap[y as usize * stride + x as usize / 8];
            if byte & (1 << (x % 8)) != 0 {
                Luma([0u8])
            } else {
                Luma([255u8])
            }
        }))
    }
}

fn truncated(what: &str) -> PreviewError {
    PreviewError::UnsupportedFormat(format!("file ends before the {what}"))
}

impl PreviewRenderer for PecIconRenderer {
    fn render(&self, design: &[u8]) -> Result<Vec<u8>, PreviewError> {
        let icon = DynamicImage::ImageLuma8(Self::extract_icon(design)?);
        let mut png = Vec::new();
        icon.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
        Ok(png)
    }
}

/// File name of the preview for a design file stem
pub fn preview_file_name(stem: &str) -> String {
    format!("{stem}.png")
}

/// Decode a rendered preview, scale it to `PREVIEW_SIZE` and save it as PNG.
/// Returns the path of the saved preview.
pub fn save_preview(
    image_bytes: &[u8],
    previews_dir: &Path,
    file_name: &str,
) -> Result<PathBuf, PreviewError> {
    let img = image::load_from_memory(image_bytes)?;

    // PEC icons are 1-bit; smoothing would only blur them
    let preview = img.resize(PREVIEW_SIZE, PREVIEW_SIZE, FilterType::Nearest);

    fs::create_dir_all(previews_dir).map_err(|source| PreviewError::Io {
        path: previews_dir.to_path_buf(),
        source,
    })?;
    let path = previews_dir.join(file_name);
    preview.save_with_format(&path, ImageFormat::Png)?;

    debug!("Generated preview: {}", path.display());
    Ok(path)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Minimal PES file: header, a 512-byte PEC header, a short stitch block
    /// and one 48x38 icon with the top-left pixel and the bottom row set.
    pub(crate) fn sample_pes() -> Vec<u8> {
        let pec = 12usize;
        let mut data = Vec::new();
        data.extend_from_slice(b"#PES0001");
        data.extend_from_slice(&(pec as u32).to_le_bytes());

        let mut header = vec![0u8; PEC_GRAPHIC_BASE + 20];
        header[..3].copy_from_slice(b"LA:");
        header[PEC_STRIDE_OFFSET] = 6;
        header[PEC_HEIGHT_OFFSET] = 38;
        header[PEC_GRAPHIC_POINTER] = 20;
        data.extend_from_slice(&header);

        let mut icon = vec![0u8; 6 * 38];
        icon[0] = 0b0000_0001;
        for byte in &mut icon[6 * 37..] {
            *byte = 0xFF;
        }
        data.extend_from_slice(&icon);
        data
    }

    #[test]
    fn test_extract_icon() {
        let icon = PecIconRenderer::extract_icon(&sample_pes()).unwrap();
        assert_eq!(icon.dimensions(), (48, 38));
        assert_eq!(icon.get_pixel(0, 0), &Luma([0]));
        assert_eq!(icon.get_pixel(1, 0), &Luma([255]));
        assert_eq!(icon.get_pixel(47, 37), &Luma([0]));
    }

    #[test]
    fn test_rejects_non_pes() {
        let err = PecIconRenderer.render(b"not an embroidery file").unwrap_err();
        assert!(matches!(err, PreviewError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_rejects_truncated() {
        let mut data = sample_pes();
        data.truncate(300);
        let err = PecIconRenderer.render(&data).unwrap_err();
        assert!(matches!(err, PreviewError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_save_preview_scales() {
        let dir = tempfile::tempdir().unwrap();
        let png = PecIconRenderer.render(&sample_pes()).unwrap();

        let path = save_preview(&png, &dir.path().join("images"), "rose.png").unwrap();

        let saved = image::open(&path).unwrap();
        assert_eq!(saved.width(), PREVIEW_SIZE);
        assert!(saved.height() < PREVIEW_SIZE);
    }
}
