//! Vertical page layout and the viewport-driven decision of what to rasterize.

use tracing::{debug, warn};

use crate::render_cache::PageRenderer;
use crate::{PageCanvas, PageSize, Point};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Viewport {
    pub offset: f32,
    pub height: f32,
}

impl Viewport {
    pub fn new(offset: f32, height: f32) -> Self {
        Self { offset, height }
    }
}

/// Placement of one page in scroll-container coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageExtent {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

impl PageExtent {
    pub fn bottom(&self) -> f32 {
        self.top + self.height
    }

    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.left && x < self.left + self.width && y >= self.top && y < self.bottom()
    }

    pub fn to_local(&self, x: f32, y: f32) -> Point {
        Point::new(x - self.left, y - self.top)
    }
}

/// Pages stacked top to bottom, left aligned, with a margin around the column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageLayout {
    pub content_margin: f32,
    pub page_spacing: f32,
}

impl Default for PageLayout {
    fn default() -> Self {
        Self {
            content_margin: 10.0,
            page_spacing: 20.0,
        }
    }
}

impl PageLayout {
    /// Rendered pages use their bitmap size; the rest are estimated from the
    /// page size in points at the current scale.
    pub fn extents(&self, pages: &[PageCanvas], sizes: &[PageSize], scale: f32) -> Vec<PageExtent> {
        let mut top = self.content_margin;
        let mut out = Vec::with_capacity(pages.len());
        for (page, size) in pages.iter().zip(sizes) {
            let (width, height) = match page.base() {
                Some(base) => (base.width() as f32, base.height() as f32),
                None => (size.width * scale, size.height * scale),
            };
            out.push(PageExtent {
                left: self.content_margin,
                top,
                width,
                height,
            });
            top += height + self.page_spacing;
        }
        out
    }

    pub fn content_height(&self, extents: &[PageExtent]) -> f32 {
        match extents.last() {
            Some(last) => last.bottom() + self.content_margin,
            None => 0.0,
        }
    }

    /// Index of the page at content-space `(x, y)`, with the page-local point.
    pub fn hit_test(&self, extents: &[PageExtent], x: f32, y: f32) -> Option<(usize, Point)> {
        extents
            .iter()
            .position(|extent| extent.contains(x, y))
            .map(|index| (index, extents[index].to_local(x, y)))
    }

    /// First page whose extent reaches below `y`.
    pub fn page_at_offset(&self, extents: &[PageExtent], y: f32) -> Option<usize> {
        extents
            .iter()
            .position(|extent| extent.bottom() + self.page_spacing > y)
            .or_else(|| extents.len().checked_sub(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisibilityScheduler {
    margin: f32,
}

impl Default for VisibilityScheduler {
    fn default() -> Self {
        Self::new(200.0)
    }
}

impl VisibilityScheduler {
    pub fn new(margin: f32) -> Self {
        Self {
            margin: margin.max(0.0),
        }
    }

    pub fn near_visible(&self, extents: &[PageExtent], viewport: Viewport) -> Vec<usize> {
        let low = viewport.offset - self.margin;
        let high = viewport.offset + viewport.height + self.margin;
        extents
            .iter()
            .enumerate()
            .filter(|(_, extent)| extent.bottom() >= low && extent.top <= high)
            .map(|(index, _)| index)
            .collect()
    }

    /// Renders every near-visible page that has no base bitmap and returns the
    /// indices that received one. Pages that fail to rasterize stay unrendered.
    pub fn on_scroll_or_resize(
        &self,
        pages: &mut [PageCanvas],
        sizes: &[PageSize],
        renderer: &PageRenderer<'_>,
        layout: &PageLayout,
        viewport: Viewport,
        scale: f32,
    ) -> Vec<usize> {
        let extents = layout.extents(pages, sizes, scale);
        let mut rendered = Vec::new();
        for index in self.near_visible(&extents, viewport) {
            let Some(page) = pages.get_mut(index) else {
                continue;
            };
            if page.is_rendered() {
                continue;
            }
            match renderer.render(index, scale) {
                Ok(bitmap) => {
                    let _ = page.set_base(bitmap);
                    rendered.push(index);
                }
                Err(err) => warn!(page = index, ?err, "page render failed"),
            }
        }
        if !rendered.is_empty() {
            debug!(?rendered, offset = viewport.offset, scale, "rendered pages");
        }
        rendered
    }
}
