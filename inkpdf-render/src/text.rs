//! Text rasterization for stamps and page labels via fontdue.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use fontdue::{Font, FontSettings};
use inkpdf_core::{FontWeight, GlyphRasterizer, TextMask};
use tracing::{debug, info};

/// Overrides the regular font path, ahead of config and system locations.
pub const FONT_ENV: &str = "INKPDF_FONT";

const REGULAR_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu-sans-fonts/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/liberation-sans/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

const BOLD_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/TTF/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/dejavu-sans-fonts/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Bold.ttf",
    "/usr/share/fonts/liberation-sans/LiberationSans-Bold.ttf",
    "/System/Library/Fonts/Supplemental/Arial Bold.ttf",
    "/Library/Fonts/Arial Bold.ttf",
    "C:\\Windows\\Fonts\\arialbd.ttf",
];

pub struct FontdueRasterizer {
    regular: Font,
    bold: Option<Font>,
}

impl FontdueRasterizer {
    pub fn from_bytes(regular: &[u8], bold: Option<&[u8]>) -> Result<Self> {
        let regular = parse_font(regular)?;
        let bold = bold.map(parse_font).transpose()?;
        Ok(Self { regular, bold })
    }

    pub fn from_paths(regular: &Path, bold: Option<&Path>) -> Result<Self> {
        let regular_bytes =
            fs::read(regular).with_context(|| format!("failed to read font {:?}", regular))?;
        let bold_bytes = match bold {
            Some(path) => {
                Some(fs::read(path).with_context(|| format!("failed to read font {:?}", path))?)
            }
            None => None,
        };
        Self::from_bytes(&regular_bytes, bold_bytes.as_deref())
            .with_context(|| format!("failed to parse font {:?}", regular))
    }

    /// Resolves fonts from explicit paths, then `INKPDF_FONT`, then well-known
    /// system locations.
    pub fn discover(regular: Option<&Path>, bold: Option<&Path>) -> Result<Self> {
        let env_font = env::var_os(FONT_ENV).map(PathBuf::from);
        let regular = regular
            .map(Path::to_path_buf)
            .or(env_font)
            .or_else(|| first_existing(REGULAR_CANDIDATES))
            .ok_or_else(|| anyhow!("no usable font found; set font_path or {}", FONT_ENV))?;
        let bold = bold
            .map(Path::to_path_buf)
            .or_else(|| first_existing(BOLD_CANDIDATES));
        info!(
            regular = %regular.display(),
            bold = ?bold.as_ref().map(|path| path.display().to_string()),
            "loading fonts"
        );
        Self::from_paths(&regular, bold.as_deref())
    }

    fn font(&self, weight: FontWeight) -> (&Font, bool) {
        match (weight, &self.bold) {
            (FontWeight::Bold, Some(bold)) => (bold, false),
            (FontWeight::Bold, None) => (&self.regular, true),
            (FontWeight::Regular, _) => (&self.regular, false),
        }
    }
}

impl GlyphRasterizer for FontdueRasterizer {
    fn rasterize(&self, text: &str, size_px: f32, weight: FontWeight) -> Option<TextMask> {
        let (font, faux_bold) = self.font(weight);
        let mask = layout_line(font, text, size_px)?;
        Some(if faux_bold { mask.embolden() } else { mask })
    }
}

fn parse_font(bytes: &[u8]) -> Result<Font> {
    Font::from_bytes(bytes, FontSettings::default()).map_err(|err| anyhow!(err))
}

fn first_existing(candidates: &[&str]) -> Option<PathBuf> {
    candidates
        .iter()
        .map(PathBuf::from)
        .find(|path| path.is_file())
}

struct PlacedGlyph {
    x: i32,
    top: i32,
    width: usize,
    height: usize,
    coverage: Vec<u8>,
}

/// Lays `text` out on one line; control characters are dropped.
fn layout_line(font: &Font, text: &str, size_px: f32) -> Option<TextMask> {
    if !size_px.is_finite() || size_px <= 0.0 {
        return None;
    }
    let line = font.horizontal_line_metrics(size_px)?;
    let ascent = line.ascent.ceil().max(1.0) as i32;
    let descent = line.descent.floor().min(0.0) as i32;
    let height = (ascent - descent).max(1) as u32;

    let mut pen = 0.0f32;
    let mut right = 0i32;
    let mut glyphs = Vec::new();
    for ch in text.chars().filter(|ch| !ch.is_control()) {
        let (metrics, coverage) = font.rasterize(ch, size_px);
        let x = (pen + metrics.xmin as f32).round() as i32;
        let top = ascent - (metrics.ymin + metrics.height as i32);
        right = right.max(x + metrics.width as i32);
        pen += metrics.advance_width;
        glyphs.push(PlacedGlyph {
            x,
            top,
            width: metrics.width,
            height: metrics.height,
            coverage,
        });
    }

    let width = right.max(pen.ceil() as i32);
    if width <= 0 {
        return None;
    }
    let mut mask = TextMask::new(width as u32, height, ascent as u32);
    for glyph in &glyphs {
        for gy in 0..glyph.height {
            let y = glyph.top + gy as i32;
            if y < 0 || y >= height as i32 {
                continue;
            }
            for gx in 0..glyph.width {
                let x = glyph.x + gx as i32;
                if x < 0 || x >= width {
                    continue;
                }
                let value = glyph.coverage[gy * glyph.width + gx];
                let slot = &mut mask.coverage[y as usize * width as usize + x as usize];
                *slot = (*slot).max(value);
            }
        }
    }
    debug!(text, size_px, width, height, "laid out text");
    Some(mask)
}
