//! Pixel-level painting on page bitmaps: anti-aliased round strokes, text masks
//! and overlay compositing. Overlays use straight (non-premultiplied) alpha.

use image::{Rgb, RgbImage, Rgba, RgbaImage};

use crate::{Color, Point, TextMask};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Paint {
    Color(Color),
    /// Removes coverage, leaving the overlay transparent.
    Clear,
}

/// Draws a line from `from` to `to` with round caps. Consecutive segments sharing
/// endpoints therefore also join round.
pub fn stroke_segment(target: &mut RgbaImage, from: Point, to: Point, width: f32, paint: Paint) {
    let (img_w, img_h) = target.dimensions();
    if img_w == 0 || img_h == 0 || !width.is_finite() || width <= 0.0 {
        return;
    }
    let radius = width / 2.0;
    let reach = radius + 1.0;

    let min_x = (from.x.min(to.x) - reach).floor().max(0.0);
    let min_y = (from.y.min(to.y) - reach).floor().max(0.0);
    let max_x = (from.x.max(to.x) + reach).ceil().min(img_w as f32);
    let max_y = (from.y.max(to.y) + reach).ceil().min(img_h as f32);
    if min_x >= max_x || min_y >= max_y {
        return;
    }

    for y in min_y as u32..max_y as u32 {
        for x in min_x as u32..max_x as u32 {
            let center = Point::new(x as f32 + 0.5, y as f32 + 0.5);
            let distance = distance_to_segment(center, from, to);
            let coverage = (radius + 0.5 - distance).clamp(0.0, 1.0);
            if coverage > 0.0 {
                apply_paint(target.get_pixel_mut(x, y), paint, coverage);
            }
        }
    }
}

fn distance_to_segment(p: Point, a: Point, b: Point) -> f32 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let len_sq = dx * dx + dy * dy;
    let t = if len_sq <= f32::EPSILON {
        0.0
    } else {
        (((p.x - a.x) * dx + (p.y - a.y) * dy) / len_sq).clamp(0.0, 1.0)
    };
    let cx = a.x + t * dx;
    let cy = a.y + t * dy;
    ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt()
}

fn apply_paint(pixel: &mut Rgba<u8>, paint: Paint, coverage: f32) {
    match paint {
        Paint::Clear => {
            let alpha = (pixel[3] as f32 * (1.0 - coverage)).round() as u8;
            *pixel = if alpha == 0 {
                Rgba([0, 0, 0, 0])
            } else {
                Rgba([pixel[0], pixel[1], pixel[2], alpha])
            };
        }
        Paint::Color(color) => source_over(pixel, color, coverage),
    }
}

fn source_over(pixel: &mut Rgba<u8>, color: Color, coverage: f32) {
    let src_a = coverage.clamp(0.0, 1.0);
    let dst_a = pixel[3] as f32 / 255.0;
    let out_a = src_a + dst_a * (1.0 - src_a);
    if out_a <= 0.0 {
        *pixel = Rgba([0, 0, 0, 0]);
        return;
    }
    let src = color.to_array();
    let mut out = [0u8; 4];
    for channel in 0..3 {
        let value =
            (src[channel] as f32 * src_a + pixel[channel] as f32 * dst_a * (1.0 - src_a)) / out_a;
        out[channel] = value.round().clamp(0.0, 255.0) as u8;
    }
    out[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
    *pixel = Rgba(out);
}

/// Paints `mask` into an overlay with its baseline-left corner at `origin`.
pub fn stamp_mask(target: &mut RgbaImage, mask: &TextMask, origin: Point, color: Color) {
    let left = origin.x.round() as i64;
    let top = origin.y.round() as i64 - i64::from(mask.baseline);
    for_each_covered(target.dimensions(), mask, left, top, |x, y, coverage| {
        source_over(target.get_pixel_mut(x, y), color, coverage);
    });
}

/// Blends `mask` onto an opaque bitmap; used for the page label.
pub fn blend_mask(target: &mut RgbImage, mask: &TextMask, origin: Point, color: Color) {
    let left = origin.x.round() as i64;
    let top = origin.y.round() as i64 - i64::from(mask.baseline);
    for_each_covered(target.dimensions(), mask, left, top, |x, y, coverage| {
        blend_pixel(target.get_pixel_mut(x, y), color.to_array(), coverage);
    });
}

fn for_each_covered(
    (width, height): (u32, u32),
    mask: &TextMask,
    left: i64,
    top: i64,
    mut f: impl FnMut(u32, u32, f32),
) {
    for my in 0..mask.height {
        let y = top + i64::from(my);
        if y < 0 || y >= i64::from(height) {
            continue;
        }
        for mx in 0..mask.width {
            let x = left + i64::from(mx);
            if x < 0 || x >= i64::from(width) {
                continue;
            }
            let value = mask.get(mx, my);
            if value > 0 {
                f(x as u32, y as u32, value as f32 / 255.0);
            }
        }
    }
}

fn blend_pixel(pixel: &mut Rgb<u8>, color: [u8; 3], alpha: f32) {
    let alpha = alpha.clamp(0.0, 1.0);
    let inv = 1.0 - alpha;
    for channel in 0..3 {
        pixel[channel] = ((pixel[channel] as f32 * inv) + (color[channel] as f32 * alpha))
            .round()
            .clamp(0.0, 255.0) as u8;
    }
}

/// Blends `overlay` over `base`. The result has the base's dimensions; overlay
/// pixels outside it are ignored and base pixels outside the overlay pass through.
pub fn composite(base: &RgbImage, overlay: &RgbaImage) -> RgbImage {
    let mut out = base.clone();
    let (ov_w, ov_h) = overlay.dimensions();
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        if x >= ov_w || y >= ov_h {
            continue;
        }
        let Rgba([r, g, b, a]) = *overlay.get_pixel(x, y);
        if a == 0 {
            continue;
        }
        blend_pixel(pixel, [r, g, b], a as f32 / 255.0);
    }
    out
}

pub fn clear(target: &mut RgbaImage) {
    for pixel in target.pixels_mut() {
        *pixel = Rgba([0, 0, 0, 0]);
    }
}

pub fn is_transparent(target: &RgbaImage) -> bool {
    target.pixels().all(|pixel| pixel[3] == 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 0]))
    }

    #[test]
    fn stroke_paints_opaque_core_along_segment() {
        let mut overlay = blank(40, 20);
        stroke_segment(
            &mut overlay,
            Point::new(5.0, 10.0),
            Point::new(35.0, 10.0),
            4.0,
            Paint::Color(Color::rgb(255, 0, 0)),
        );
        assert_eq!(*overlay.get_pixel(20, 9), Rgba([255, 0, 0, 255]));
        assert_eq!(*overlay.get_pixel(20, 10), Rgba([255, 0, 0, 255]));
        assert_eq!(overlay.get_pixel(20, 0)[3], 0);
        assert_eq!(overlay.get_pixel(20, 19)[3], 0);
    }

    #[test]
    fn stroke_has_round_caps_past_endpoints() {
        let mut overlay = blank(40, 20);
        stroke_segment(
            &mut overlay,
            Point::new(10.0, 10.0),
            Point::new(20.0, 10.0),
            6.0,
            Paint::Color(Color::BLACK),
        );
        // within the cap radius beyond the end point
        assert_eq!(overlay.get_pixel(21, 9)[3], 255);
        // diagonal corner of a square cap would be covered, a round cap is not
        assert_eq!(overlay.get_pixel(22, 12)[3], 0);
    }

    #[test]
    fn clearing_stroke_erases_to_transparent() {
        let mut overlay = blank(30, 30);
        let from = Point::new(5.0, 15.0);
        let to = Point::new(25.0, 15.0);
        stroke_segment(&mut overlay, from, to, 4.0, Paint::Color(Color::BLACK));
        assert!(!is_transparent(&overlay));
        stroke_segment(&mut overlay, from, to, 12.0, Paint::Clear);
        assert!(is_transparent(&overlay));
    }

    #[test]
    fn stroke_outside_bounds_is_ignored() {
        let mut overlay = blank(10, 10);
        stroke_segment(
            &mut overlay,
            Point::new(-50.0, -50.0),
            Point::new(-40.0, -40.0),
            4.0,
            Paint::Color(Color::BLACK),
        );
        assert!(is_transparent(&overlay));
    }

    #[test]
    fn composite_blends_overlay_over_base() {
        let base = RgbImage::from_pixel(2, 1, Rgb([255, 255, 255]));
        let mut overlay = blank(2, 1);
        overlay.put_pixel(0, 0, Rgba([0, 0, 0, 255]));
        overlay.put_pixel(1, 0, Rgba([0, 0, 0, 0]));
        let out = composite(&base, &overlay);
        assert_eq!(*out.get_pixel(0, 0), Rgb([0, 0, 0]));
        assert_eq!(*out.get_pixel(1, 0), Rgb([255, 255, 255]));
    }

    #[test]
    fn composite_tolerates_mismatched_overlay_size() {
        let base = RgbImage::from_pixel(4, 4, Rgb([10, 10, 10]));
        let overlay = RgbaImage::from_pixel(2, 2, Rgba([200, 200, 200, 255]));
        let out = composite(&base, &overlay);
        assert_eq!(*out.get_pixel(1, 1), Rgb([200, 200, 200]));
        assert_eq!(*out.get_pixel(3, 3), Rgb([10, 10, 10]));
    }

    #[test]
    fn stamp_mask_places_baseline_at_origin() {
        let mut overlay = blank(20, 20);
        let mut mask = TextMask::new(2, 3, 3);
        mask.coverage = vec![255; 6];
        stamp_mask(&mut overlay, &mask, Point::new(5.0, 10.0), Color::rgb(0, 0, 255));
        assert_eq!(*overlay.get_pixel(5, 7), Rgba([0, 0, 255, 255]));
        assert_eq!(*overlay.get_pixel(6, 9), Rgba([0, 0, 255, 255]));
        assert_eq!(overlay.get_pixel(5, 10)[3], 0);
        assert_eq!(overlay.get_pixel(5, 6)[3], 0);
    }
}
