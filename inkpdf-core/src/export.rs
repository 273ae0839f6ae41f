use anyhow::{Context, Result};
use tracing::{debug, info, instrument};

use crate::{DocumentWriter, GlyphRasterizer, PageCanvas};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExportOptions {
    /// Label size for the `Page N` stamp, or `None` to export without labels.
    pub label_size: Option<f32>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            label_size: Some(16.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportedDocument {
    pub bytes: Vec<u8>,
    /// Source page indices that made it into the output, in output order.
    pub pages: Vec<usize>,
    pub skipped: Vec<usize>,
}

/// Builds an image-only document from composed pages. Pages that were never
/// rendered have nothing to compose and are left out of the output.
pub struct ExportAssembler<'a> {
    writer: &'a dyn DocumentWriter,
    glyphs: &'a dyn GlyphRasterizer,
    options: ExportOptions,
}

impl<'a> ExportAssembler<'a> {
    pub fn new(
        writer: &'a dyn DocumentWriter,
        glyphs: &'a dyn GlyphRasterizer,
        options: ExportOptions,
    ) -> Self {
        Self {
            writer,
            glyphs,
            options,
        }
    }

    #[instrument(skip_all, fields(pages = pages.len()))]
    pub fn export_document(&self, pages: &[PageCanvas]) -> Result<ExportedDocument> {
        let mut output = self.writer.create().context("failed to create output document")?;
        let mut written = Vec::new();
        let mut skipped = Vec::new();

        for page in pages {
            match page.export_png(self.glyphs, self.options.label_size)? {
                Some((width, height, png)) => {
                    output
                        .add_page(width, height, &png)
                        .with_context(|| format!("failed to add page {}", page.index()))?;
                    written.push(page.index());
                }
                None => {
                    debug!(page = page.index(), "skipping page that was never rendered");
                    skipped.push(page.index());
                }
            }
        }

        let bytes = output.finish().context("failed to serialize output document")?;
        info!(
            written = written.len(),
            skipped = skipped.len(),
            bytes = bytes.len(),
            "assembled document"
        );
        Ok(ExportedDocument {
            bytes,
            pages: written,
            skipped,
        })
    }
}
