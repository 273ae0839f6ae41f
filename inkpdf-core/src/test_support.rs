use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};

use crate::{
    Color, DocumentBackend, DocumentInfo, DocumentMetadata, DocumentProvider, DocumentWriter,
    EditingContext, FontWeight, GlyphRasterizer, OutputDocument, PageSize, TextMask, Tool,
};

pub fn solid_page(width: u32, height: u32) -> RgbImage {
    RgbImage::from_pixel(width, height, Rgb([255, 255, 255]))
}

pub fn context(tool: Tool) -> EditingContext {
    EditingContext {
        tool,
        pen_color: Color::BLACK,
        pen_width: 4.0,
        eraser_multiplier: 3.0,
        text_size: 18.0,
        scale: 1.0,
    }
}

/// Every character is a fully covered 6px-wide block sitting on the baseline.
pub struct BlockGlyphs;

impl GlyphRasterizer for BlockGlyphs {
    fn rasterize(&self, text: &str, size_px: f32, _weight: FontWeight) -> Option<TextMask> {
        let height = size_px.round().max(1.0) as u32;
        let width = 6 * text.chars().count() as u32;
        if width == 0 {
            return None;
        }
        let mut mask = TextMask::new(width, height, height);
        mask.coverage.fill(255);
        Some(mask)
    }
}

/// Pages are `width x height` points; rasterizing scales both and records the call.
pub struct FakeBackend {
    pub info: DocumentInfo,
    pub calls: Rc<RefCell<Vec<(usize, f32)>>>,
    pub failing_pages: Vec<usize>,
}

impl DocumentBackend for FakeBackend {
    fn info(&self) -> &DocumentInfo {
        &self.info
    }

    fn rasterize(&self, page_index: usize, scale: f32) -> Result<RgbImage> {
        self.calls.borrow_mut().push((page_index, scale));
        if self.failing_pages.contains(&page_index) {
            return Err(anyhow!("page {} is damaged", page_index));
        }
        let size = self
            .info
            .page_sizes
            .get(page_index)
            .ok_or_else(|| anyhow!("page {} out of range", page_index))?;
        let width = (size.width * scale).round().max(1.0) as u32;
        let height = (size.height * scale).round().max(1.0) as u32;
        Ok(RgbImage::from_pixel(
            width,
            height,
            Rgb([255, 255, page_index as u8]),
        ))
    }
}

pub struct FakeProvider {
    pub pages: usize,
    pub page_size: PageSize,
    pub calls: Rc<RefCell<Vec<(usize, f32)>>>,
    pub failing_pages: Vec<usize>,
}

impl FakeProvider {
    pub fn new(pages: usize) -> Self {
        Self {
            pages,
            page_size: PageSize {
                width: 100.0,
                height: 150.0,
            },
            calls: Rc::new(RefCell::new(Vec::new())),
            failing_pages: Vec::new(),
        }
    }

    pub fn backend(&self, path: &Path) -> FakeBackend {
        FakeBackend {
            info: DocumentInfo {
                path: path.to_path_buf(),
                page_sizes: vec![self.page_size; self.pages],
                metadata: DocumentMetadata::default(),
            },
            calls: Rc::clone(&self.calls),
            failing_pages: self.failing_pages.clone(),
        }
    }

    pub fn rendered_calls(&self) -> Vec<(usize, f32)> {
        self.calls.borrow().clone()
    }
}

impl DocumentProvider for FakeProvider {
    fn open(&self, path: &Path) -> Result<Box<dyn DocumentBackend>> {
        if path.to_string_lossy().contains("corrupt") {
            return Err(anyhow!("{:?} is not a PDF", path));
        }
        Ok(Box::new(self.backend(path)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedPage {
    pub width: u32,
    pub height: u32,
    pub image: RgbImage,
}

/// Output writer that keeps decoded pages so tests can inspect them.
#[derive(Default, Clone)]
pub struct RecordingWriter {
    pub pages: Rc<RefCell<Vec<RecordedPage>>>,
    pub fail_on_finish: bool,
}

impl RecordingWriter {
    pub fn recorded(&self) -> Vec<RecordedPage> {
        self.pages.borrow().clone()
    }
}

struct RecordingDocument {
    pages: Rc<RefCell<Vec<RecordedPage>>>,
    fail_on_finish: bool,
    count: usize,
}

impl DocumentWriter for RecordingWriter {
    fn create(&self) -> Result<Box<dyn OutputDocument>> {
        self.pages.borrow_mut().clear();
        Ok(Box::new(RecordingDocument {
            pages: Rc::clone(&self.pages),
            fail_on_finish: self.fail_on_finish,
            count: 0,
        }))
    }
}

impl OutputDocument for RecordingDocument {
    fn add_page(&mut self, width: u32, height: u32, image_bytes: &[u8]) -> Result<()> {
        let image = image::load_from_memory(image_bytes)?.to_rgb8();
        self.pages.borrow_mut().push(RecordedPage {
            width,
            height,
            image,
        });
        self.count += 1;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<Vec<u8>> {
        if self.fail_on_finish {
            return Err(anyhow!("writer refused to serialize"));
        }
        Ok(format!("%PDF-fake pages={}", self.count).into_bytes())
    }
}

pub fn sample_path() -> PathBuf {
    PathBuf::from("/tmp/inkpdf/sample.pdf")
}
