use std::env;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use inkpdf_core::{
    DocumentBackend, DocumentInfo, DocumentMetadata, DocumentProvider, DocumentWriter,
    OutputDocument, PageSize,
};
use pdfium_render::prelude::*;
use tracing::{debug, instrument, warn};

pub const LIBRARY_ENV: &str = "INKPDF_PDFIUM_LIBRARY";

/// Opens source documents and creates output documents through one pdfium binding.
///
/// The binding lives for the whole process so documents can borrow it for `'static`.
pub struct PdfiumProvider {
    pdfium: &'static Pdfium,
}

impl PdfiumProvider {
    pub fn new() -> Result<Self> {
        let pdfium = match bind_pdfium_from_env() {
            Some(pdfium) => pdfium,
            None => bind_pdfium_default()?,
        };
        Ok(Self {
            pdfium: Box::leak(Box::new(pdfium)),
        })
    }

    pub fn writer(&self) -> PdfiumWriter {
        PdfiumWriter {
            pdfium: self.pdfium,
        }
    }
}

impl DocumentProvider for PdfiumProvider {
    fn open(&self, path: &Path) -> Result<Box<dyn DocumentBackend>> {
        let absolute = path
            .canonicalize()
            .with_context(|| format!("failed to resolve path for {:?}", path))?;
        let document = self
            .pdfium
            .load_pdf_from_file(&absolute, None)
            .with_context(|| format!("failed to open {:?}", absolute))?;
        let info = build_document_info(&document, &absolute)?;
        debug!(path = %absolute.display(), pages = info.page_count(), "loaded pdf");
        Ok(Box::new(PdfiumDocument { document, info }))
    }
}

pub struct PdfiumDocument {
    document: PdfDocument<'static>,
    info: DocumentInfo,
}

impl DocumentBackend for PdfiumDocument {
    fn info(&self) -> &DocumentInfo {
        &self.info
    }

    #[instrument(skip(self))]
    fn rasterize(&self, page_index: usize, scale: f32) -> Result<RgbImage> {
        let index: PdfPageIndex = page_index
            .try_into()
            .map_err(|_| anyhow!("page {} is out of supported range", page_index))?;
        let page = self
            .document
            .pages()
            .get(index)
            .with_context(|| format!("page {} out of range", page_index))?;

        let config = PdfRenderConfig::new().scale_page_by_factor(scale);
        let bitmap = page
            .render_with_config(&config)
            .with_context(|| format!("failed to render page {}", page_index))?;
        Ok(bitmap.as_image().to_rgb8())
    }
}

fn build_document_info(document: &PdfDocument<'_>, path: &Path) -> Result<DocumentInfo> {
    let page_sizes = document
        .pages()
        .iter()
        .map(|page| PageSize {
            width: page.width().value,
            height: page.height().value,
        })
        .collect();

    let metadata = document.metadata();
    let title = metadata
        .get(PdfDocumentMetadataTagType::Title)
        .map(|t| t.value().to_owned());
    let author = metadata
        .get(PdfDocumentMetadataTagType::Author)
        .map(|t| t.value().to_owned());

    Ok(DocumentInfo {
        path: path.to_path_buf(),
        page_sizes,
        metadata: DocumentMetadata { title, author },
    })
}

/// Writes image-only PDFs: one page per image, sized to the image in points.
pub struct PdfiumWriter {
    pdfium: &'static Pdfium,
}

impl DocumentWriter for PdfiumWriter {
    fn create(&self) -> Result<Box<dyn OutputDocument>> {
        let document = self
            .pdfium
            .create_new_pdf()
            .context("failed to create a new pdf document")?;
        Ok(Box::new(PdfiumOutput { document }))
    }
}

struct PdfiumOutput {
    document: PdfDocument<'static>,
}

impl OutputDocument for PdfiumOutput {
    fn add_page(&mut self, width: u32, height: u32, image_bytes: &[u8]) -> Result<()> {
        let image = image::load_from_memory(image_bytes).context("failed to decode page image")?;
        let width = PdfPoints::new(width as f32);
        let height = PdfPoints::new(height as f32);

        let object = PdfPageImageObject::new_with_width(&self.document, &image, width)
            .context("failed to create image object")?;
        let mut page = self
            .document
            .pages_mut()
            .create_page_at_end(PdfPagePaperSize::from_points(width, height))
            .context("failed to append page")?;
        page.objects_mut()
            .add_image_object(object)
            .context("failed to place page image")?;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<Vec<u8>> {
        self.document
            .save_to_bytes()
            .context("failed to serialize pdf")
    }
}

fn bind_pdfium_from_env() -> Option<Pdfium> {
    let path = env::var_os(LIBRARY_ENV).filter(|path| !path.is_empty())?;
    let path = PathBuf::from(path);
    match Pdfium::bind_to_library(&path) {
        Ok(bindings) => Some(Pdfium::new(bindings)),
        Err(err) => {
            warn!(
                "failed to load Pdfium from {} ({}): {}",
                path.display(),
                LIBRARY_ENV,
                err
            );
            None
        }
    }
}

fn bind_pdfium_default() -> Result<Pdfium> {
    let mut errors = Vec::new();

    let cwd_path = Pdfium::pdfium_platform_library_name_at_path("./");

    match Pdfium::bind_to_library(&cwd_path) {
        Ok(bindings) => return Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("{}: {}", cwd_path.display(), err));
        }
    }

    match Pdfium::bind_to_system_library() {
        Ok(bindings) => Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("system: {err}"));
            Err(anyhow!(
                "failed to bind to a pdfium library; ensure it is installed or set {} ({})",
                LIBRARY_ENV,
                errors.join(", ")
            ))
        }
    }
}
