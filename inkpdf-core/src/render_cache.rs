use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use tracing::instrument;

use crate::{DocumentBackend, PageCanvas};

/// Rasterizes document pages into base bitmaps. Holds no bitmaps itself: a
/// page's `base` slot is the cache and `None` there is the miss signal.
pub struct PageRenderer<'a> {
    backend: &'a dyn DocumentBackend,
}

impl<'a> PageRenderer<'a> {
    pub fn new(backend: &'a dyn DocumentBackend) -> Self {
        Self { backend }
    }

    pub fn page_count(&self) -> usize {
        self.backend.info().page_count()
    }

    #[instrument(skip(self))]
    pub fn render(&self, page_index: usize, scale: f32) -> Result<RgbImage> {
        if page_index >= self.page_count() {
            return Err(anyhow!("page {} out of range", page_index));
        }
        if !scale.is_finite() || scale <= 0.0 {
            return Err(anyhow!("invalid render scale {}", scale));
        }
        self.backend
            .rasterize(page_index, scale)
            .with_context(|| format!("failed to render page {} at {:.3}x", page_index, scale))
    }
}

pub fn rendered_pages(pages: &[PageCanvas]) -> Vec<usize> {
    pages
        .iter()
        .filter(|page| page.is_rendered())
        .map(PageCanvas::index)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{sample_path, solid_page, FakeProvider};

    #[test]
    fn render_scales_page_size() {
        let provider = FakeProvider::new(3);
        let backend = provider.backend(&sample_path());
        let renderer = PageRenderer::new(&backend);
        let image = renderer.render(1, 2.0).unwrap();
        assert_eq!(image.dimensions(), (200, 300));
        assert_eq!(provider.rendered_calls(), vec![(1, 2.0)]);
    }

    #[test]
    fn render_is_not_memoized() {
        let provider = FakeProvider::new(1);
        let backend = provider.backend(&sample_path());
        let renderer = PageRenderer::new(&backend);
        renderer.render(0, 1.0).unwrap();
        renderer.render(0, 1.0).unwrap();
        assert_eq!(provider.rendered_calls().len(), 2);
    }

    #[test]
    fn render_rejects_out_of_range_and_bad_scale() {
        let provider = FakeProvider::new(2);
        let backend = provider.backend(&sample_path());
        let renderer = PageRenderer::new(&backend);
        assert!(renderer.render(2, 1.0).is_err());
        assert!(renderer.render(0, 0.0).is_err());
        assert!(renderer.render(0, f32::NAN).is_err());
        assert!(provider.rendered_calls().is_empty());
    }

    #[test]
    fn rendered_pages_lists_pages_with_base() {
        let mut pages: Vec<PageCanvas> = (0..4).map(PageCanvas::new).collect();
        let _ = pages[1].set_base(solid_page(2, 2));
        let _ = pages[3].set_base(solid_page(2, 2));
        assert_eq!(rendered_pages(&pages), vec![1, 3]);
    }
}
