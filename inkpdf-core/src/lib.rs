use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{anyhow, Result};
use image::RgbImage;
use serde::{Deserialize, Deserializer};

pub mod canvas;
pub mod config;
pub mod export;
pub mod raster;
pub mod render_cache;
pub mod scheduler;
pub mod session;
pub mod zoom;

#[cfg(test)]
pub(crate) mod test_support;

pub use canvas::{EditingContext, PageCanvas, Repaint, StrokeState, Tool};
pub use config::Config;
pub use export::{ExportAssembler, ExportOptions, ExportedDocument};
pub use render_cache::PageRenderer;
pub use scheduler::{PageExtent, PageLayout, Viewport, VisibilityScheduler};
pub use session::{Command, HitTarget, Session, SessionError, SessionEvent};
pub use zoom::ZoomController;

/// A position in page-local pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color::rgb(0, 0, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn to_array(self) -> [u8; 3] {
        [self.r, self.g, self.b]
    }
}

impl Default for Color {
    fn default() -> Self {
        Color::BLACK
    }
}

impl FromStr for Color {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        let hex = value.trim().trim_start_matches('#');
        if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(anyhow!("invalid colour {:?}, expected #rrggbb", value));
        }
        let channel = |range: std::ops::Range<usize>| u8::from_str_radix(&hex[range], 16);
        Ok(Color::rgb(channel(0..2)?, channel(2..4)?, channel(4..6)?))
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl<'de> Deserialize<'de> for Color {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Page dimensions in PDF points, as reported by the document backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, Default)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DocumentInfo {
    pub path: PathBuf,
    pub page_sizes: Vec<PageSize>,
    pub metadata: DocumentMetadata,
}

impl DocumentInfo {
    pub fn page_count(&self) -> usize {
        self.page_sizes.len()
    }
}

/// An opened source document able to rasterize its pages.
pub trait DocumentBackend {
    fn info(&self) -> &DocumentInfo;
    fn rasterize(&self, page_index: usize, scale: f32) -> Result<RgbImage>;
}

pub trait DocumentProvider {
    fn open(&self, path: &Path) -> Result<Box<dyn DocumentBackend>>;
}

/// Factory for the image-only output documents produced on save.
pub trait DocumentWriter {
    fn create(&self) -> Result<Box<dyn OutputDocument>>;
}

pub trait OutputDocument {
    /// Appends a page of exactly `width` x `height` holding the encoded image.
    fn add_page(&mut self, width: u32, height: u32, image_bytes: &[u8]) -> Result<()>;
    fn finish(self: Box<Self>) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontWeight {
    Regular,
    Bold,
}

/// Single-line coverage mask. `baseline` is measured from the top row.
#[derive(Debug, Clone, PartialEq)]
pub struct TextMask {
    pub width: u32,
    pub height: u32,
    pub baseline: u32,
    pub coverage: Vec<u8>,
}

impl TextMask {
    pub fn new(width: u32, height: u32, baseline: u32) -> Self {
        Self {
            width,
            height,
            baseline,
            coverage: vec![0; width as usize * height as usize],
        }
    }

    pub fn get(&self, x: u32, y: u32) -> u8 {
        if x >= self.width || y >= self.height {
            return 0;
        }
        self.coverage[y as usize * self.width as usize + x as usize]
    }

    /// Widens strokes by one pixel to the right; used when no bold face is available.
    pub fn embolden(&self) -> TextMask {
        let mut out = TextMask::new(self.width + 1, self.height, self.baseline);
        for y in 0..self.height {
            for x in 0..out.width {
                let left = if x > 0 { self.get(x - 1, y) } else { 0 };
                let value = self.get(x, y).max(left);
                out.coverage[y as usize * out.width as usize + x as usize] = value;
            }
        }
        out
    }
}

pub trait GlyphRasterizer {
    fn rasterize(&self, text: &str, size_px: f32, weight: FontWeight) -> Option<TextMask>;
}

/// Used when no font could be loaded; text stamps and labels are skipped.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoGlyphs;

impl GlyphRasterizer for NoGlyphs {
    fn rasterize(&self, _text: &str, _size_px: f32, _weight: FontWeight) -> Option<TextMask> {
        None
    }
}
