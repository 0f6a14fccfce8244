//! Overlay of match results on the display frame.
//!
//! Each face gets a box and a filled name band along its bottom edge, green
//! for known identities and red for unknown ones. Labels use a built-in 5×7
//! bitmap font so no font file has to ship with the daemon.

use crate::types::{BoundingBox, Identification, MatchResult};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

pub const KNOWN_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const UNKNOWN_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
pub const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

const GLYPH_WIDTH: u32 = 5;
const GLYPH_HEIGHT: u32 = 7;

/// One face to draw, in display-frame coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub identification: Identification,
    pub bbox: BoundingBox,
}

impl Annotation {
    /// Build from a match result whose box was already scaled to the display frame.
    pub fn from_match(result: &MatchResult, display_box: BoundingBox) -> Self {
        Self {
            identification: result.identification.clone(),
            bbox: display_box,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Annotator {
    /// Border thickness in pixels.
    pub thickness: u32,
    /// Integer upscale of the bitmap font.
    pub text_scale: u32,
    /// Gap between band edges and text.
    pub padding: u32,
}

impl Default for Annotator {
    fn default() -> Self {
        Self {
            thickness: 2,
            text_scale: 2,
            padding: 4,
        }
    }
}

impl Annotator {
    pub fn annotate(&self, frame: &mut RgbImage, annotations: &[Annotation]) {
        for annotation in annotations {
            self.draw_one(frame, annotation);
        }
    }

    fn band_height(&self) -> u32 {
        GLYPH_HEIGHT * self.text_scale + 2 * self.padding
    }

    fn draw_one(&self, frame: &mut RgbImage, annotation: &Annotation) {
        let Some(rect) = clip(&annotation.bbox, frame.width(), frame.height()) else {
            tracing::debug!(bbox = ?annotation.bbox, "annotation outside frame");
            return;
        };

        let color = if annotation.identification.is_known() {
            KNOWN_COLOR
        } else {
            UNKNOWN_COLOR
        };

        for inset in 0..self.thickness {
            let (w, h) = (rect.width().saturating_sub(2 * inset), rect.height().saturating_sub(2 * inset));
            if w == 0 || h == 0 {
                break;
            }
            draw_hollow_rect_mut(frame, Rect::at(rect.left() + inset as i32, rect.top() + inset as i32).of_size(w, h), color);
        }

        let band_h = self.band_height().min(rect.height());
        let band_top = rect.bottom() + 1 - band_h as i32;
        draw_filled_rect_mut(frame, Rect::at(rect.left(), band_top).of_size(rect.width(), band_h), color);

        let text_x = rect.left() + self.padding as i32 + 2;
        let text_y = band_top + self.padding as i32;
        draw_text(frame, annotation.identification.label(), text_x, text_y, self.text_scale, TEXT_COLOR);
    }
}

/// Integer rectangle of `bbox` clipped to the frame; `None` if nothing is visible.
fn clip(bbox: &BoundingBox, width: u32, height: u32) -> Option<Rect> {
    if !(bbox.x.is_finite() && bbox.y.is_finite() && bbox.width.is_finite() && bbox.height.is_finite()) {
        return None;
    }
    let left = bbox.x.round().max(0.0) as i64;
    let top = bbox.y.round().max(0.0) as i64;
    let right = ((bbox.x + bbox.width).round() as i64).min(width as i64);
    let bottom = ((bbox.y + bbox.height).round() as i64).min(height as i64);
    if right <= left || bottom <= top {
        return None;
    }
    Some(Rect::at(left as i32, top as i32).of_size((right - left) as u32, (bottom - top) as u32))
}

/// Draw `text` with its top-left corner at (`x`, `y`). Clipped to the frame.
fn draw_text(frame: &mut RgbImage, text: &str, x: i32, y: i32, scale: u32, color: Rgb<u8>) {
    let advance = ((GLYPH_WIDTH + 1) * scale) as i32;
    for (i, ch) in text.chars().enumerate() {
        let origin_x = x + i as i32 * advance;
        if origin_x >= frame.width() as i32 {
            break;
        }
        for (row, bits) in glyph(ch).iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if bits & (1 << (GLYPH_WIDTH - 1 - col)) == 0 {
                    continue;
                }
                let px = origin_x + (col * scale) as i32;
                let py = y + (row as u32 * scale) as i32;
                fill_block(frame, px, py, scale, color);
            }
        }
    }
}

fn fill_block(frame: &mut RgbImage, x: i32, y: i32, size: u32, color: Rgb<u8>) {
    for dy in 0..size as i32 {
        for dx in 0..size as i32 {
            let (px, py) = (x + dx, y + dy);
            if px >= 0 && py >= 0 && (px as u32) < frame.width() && (py as u32) < frame.height() {
                frame.put_pixel(px as u32, py as u32, color);
            }
        }
    }
}

/// 5×7 glyph rows, MSB is the leftmost column. Lowercase renders as uppercase.
fn glyph(ch: char) -> [u8; 7] {
    match ch.to_ascii_uppercase() {
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x19, 0x15, 0x13, 0x11, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x0A, 0x04, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        '_' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1F],
        '\'' => [0x04, 0x04, 0x08, 0x00, 0x00, 0x00, 0x00],
        ' ' => [0x00; 7],
        _ => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x00, 0x04], // '?'
    }
}
