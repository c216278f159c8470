//! PDF rasterisation: render every page to `N.jpg` via pdfium.
//!
//! pdfium is a C++ library with thread-local state and is not safe to drive
//! from async code, so the whole document is rendered inside
//! `tokio::task::spawn_blocking`. Pages are rendered one at a time in
//! document order; the page images are e-mail previews, so the scale comes
//! straight from the configured DPI (`dpi / 72` pixels per PDF point).

use crate::error::DashMailError;
use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use pdfium_render::prelude::*;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// PDF points per inch.
const POINTS_PER_INCH: f32 = 72.0;

/// Turns a local PDF into one image file per page.
#[async_trait]
pub trait PageRasterizer: Send + Sync {
    /// Render every page of `pdf` into `out_dir`. Returns the image paths in
    /// page order, named `1.jpg`, `2.jpg`, ….
    async fn rasterize(&self, pdf: &Path, out_dir: &Path) -> Result<Vec<PathBuf>, DashMailError>;
}

/// [`PageRasterizer`] backed by pdfium-render, writing JPEG files.
#[derive(Debug, Clone)]
pub struct PdfiumRasterizer {
    dpi: u32,
    jpeg_quality: u8,
    library_dir: Option<PathBuf>,
}

impl PdfiumRasterizer {
    pub fn new(dpi: u32, jpeg_quality: u8, library_dir: Option<PathBuf>) -> Self {
        Self {
            dpi,
            jpeg_quality,
            library_dir,
        }
    }
}

#[async_trait]
impl PageRasterizer for PdfiumRasterizer {
    async fn rasterize(&self, pdf: &Path, out_dir: &Path) -> Result<Vec<PathBuf>, DashMailError> {
        let pdf = pdf.to_path_buf();
        let out_dir = out_dir.to_path_buf();
        let this = self.clone();

        tokio::task::spawn_blocking(move || this.rasterize_blocking(&pdf, &out_dir))
            .await
            .map_err(|e| DashMailError::Internal(format!("Render task panicked: {}", e)))?
    }
}

impl PdfiumRasterizer {
    fn rasterize_blocking(&self, pdf: &Path, out_dir: &Path) -> Result<Vec<PathBuf>, DashMailError> {
        let pdfium = bind_pdfium(self.library_dir.as_deref())?;

        let document = pdfium
            .load_pdf_from_file(pdf, None)
            .map_err(|e| DashMailError::CorruptPdf {
                path: pdf.to_path_buf(),
                detail: format!("{:?}", e),
            })?;

        let pages = document.pages();
        let total_pages = pages.len() as usize;
        if total_pages == 0 {
            return Err(DashMailError::EmptyDocument {
                path: pdf.to_path_buf(),
            });
        }
        info!("PDF loaded: {} pages, rendering at {} DPI", total_pages, self.dpi);

        let render_config =
            PdfRenderConfig::new().scale_page_by_factor(self.dpi as f32 / POINTS_PER_INCH);

        let mut written = Vec::with_capacity(total_pages);
        for (idx, page) in pages.iter().enumerate() {
            let page_num = idx + 1;
            let bitmap = page.render_with_config(&render_config).map_err(|e| {
                DashMailError::RasterisationFailed {
                    page: page_num,
                    detail: format!("{:?}", e),
                }
            })?;

            let path = out_dir.join(page_image_name(page_num));
            let image = bitmap.as_image();
            write_jpeg(&image, &path, self.jpeg_quality)?;
            debug!(
                "Rendered page {} → {}x{} px at {}",
                page_num,
                image.width(),
                image.height(),
                path.display()
            );
            written.push(path);
        }

        Ok(written)
    }
}

/// File name of the 1-based page `page_num`.
pub fn page_image_name(page_num: usize) -> String {
    format!("{page_num}.jpg")
}

/// Environment variable naming libpdfium, or the directory holding it.
pub const PDFIUM_LIB_PATH_ENV: &str = "PDFIUM_LIB_PATH";

/// Where to load libpdfium from: the configured directory first, then
/// `env_path` (a library file or a directory). `None` means the system
/// search path.
pub fn pdfium_library_path(
    library_dir: Option<&Path>,
    env_path: Option<PathBuf>,
) -> Option<PathBuf> {
    let location = library_dir.map(Path::to_path_buf).or(env_path)?;
    if location.is_dir() {
        Some(Pdfium::pdfium_platform_library_name_at_path(&location))
    } else {
        Some(location)
    }
}

/// Bind to libpdfium in `library_dir`, at [`PDFIUM_LIB_PATH_ENV`], or on the
/// system search path.
pub fn bind_pdfium(library_dir: Option<&Path>) -> Result<Pdfium, DashMailError> {
    let env_path = std::env::var_os(PDFIUM_LIB_PATH_ENV)
        .filter(|p| !p.is_empty())
        .map(PathBuf::from);
    let bindings = match pdfium_library_path(library_dir, env_path) {
        Some(path) => {
            debug!("Binding pdfium from {}", path.display());
            Pdfium::bind_to_library(path)
        }
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| DashMailError::PdfiumBindingFailed(format!("{:?}", e)))?;
    Ok(Pdfium::new(bindings))
}

/// JPEG has no alpha channel, so pages are flattened to RGB first.
fn write_jpeg(image: &image::DynamicImage, path: &Path, quality: u8) -> Result<(), DashMailError> {
    let write_err = |detail: String| DashMailError::ImageWriteFailed {
        path: path.to_path_buf(),
        detail,
    };

    let file = File::create(path).map_err(|e| write_err(e.to_string()))?;
    let mut writer = BufWriter::new(file);
    let rgb = image.to_rgb8();
    JpegEncoder::new_with_quality(&mut writer, quality)
        .encode_image(&rgb)
        .map_err(|e| write_err(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgba, RgbaImage};

    #[test]
    fn page_images_are_one_based() {
        assert_eq!(page_image_name(1), "1.jpg");
        assert_eq!(page_image_name(12), "12.jpg");
    }

    #[test]
    fn write_jpeg_flattens_alpha() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1.jpg");
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(16, 8, Rgba([0, 128, 255, 128])));

        write_jpeg(&img, &path, 85).unwrap();

        assert_eq!(image::image_dimensions(&path).unwrap(), (16, 8));
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8], "JPEG SOI marker");
    }

    #[test]
    fn write_jpeg_reports_unwritable_path() {
        let img = DynamicImage::ImageRgba8(RgbaImage::new(2, 2));
        let err = write_jpeg(&img, Path::new("/nonexistent/dir/1.jpg"), 85).unwrap_err();
        assert!(matches!(err, DashMailError::ImageWriteFailed { .. }));
    }

    #[test]
    fn configured_directory_wins_over_environment() {
        let dir = tempfile::tempdir().unwrap();
        let env = Some(PathBuf::from("/opt/env/libpdfium.so"));
        assert_eq!(
            pdfium_library_path(Some(dir.path()), env),
            Some(Pdfium::pdfium_platform_library_name_at_path(dir.path()))
        );
    }

    #[test]
    fn environment_path_used_when_nothing_configured() {
        let file = PathBuf::from("/opt/pdfium/lib/libpdfium.so");
        assert_eq!(pdfium_library_path(None, Some(file.clone())), Some(file));

        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            pdfium_library_path(None, Some(dir.path().to_path_buf())),
            Some(Pdfium::pdfium_platform_library_name_at_path(dir.path()))
        );
        assert_eq!(pdfium_library_path(None, None), None);
    }

    #[test]
    fn binding_to_missing_directory_fails() {
        let err = bind_pdfium(Some(Path::new("/nonexistent/pdfium"))).unwrap_err();
        assert!(matches!(err, DashMailError::PdfiumBindingFailed(_)));
    }
}
