//! Face alignment via 4-DOF similarity transform.
//!
//! Warps a detected face onto the canonical 112×112 ArcFace crop using the
//! five InsightFace reference landmarks.

use image::{Rgb, RgbImage};

/// ArcFace reference landmarks for a 112×112 output.
const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: u32 = 112;

/// Similarity transform `dst = [a -b; b a] * src + [tx, ty]`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    /// Least-squares fit from `src` to `dst` (closed form on centred points).
    fn estimate(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Self {
        let n = src.len() as f32;
        let mean = |pts: &[(f32, f32); 5]| {
            let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
            (sx / n, sy / n)
        };
        let (msx, msy) = mean(src);
        let (mdx, mdy) = mean(dst);

        let mut dot = 0.0f32;
        let mut cross = 0.0f32;
        let mut norm = 0.0f32;
        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
            let (sx, sy) = (sx - msx, sy - msy);
            let (dx, dy) = (dx - mdx, dy - mdy);
            dot += sx * dx + sy * dy;
            cross += sx * dy - sy * dx;
            norm += sx * sx + sy * sy;
        }

        if norm < 1e-12 {
            // Degenerate landmarks: fall back to a pure translation.
            return Self {
                a: 1.0,
                b: 0.0,
                tx: mdx - msx,
                ty: mdy - msy,
            };
        }

        let a = dot / norm;
        let b = cross / norm;
        Self {
            a,
            b,
            tx: mdx - (a * msx - b * msy),
            ty: mdy - (b * msx + a * msy),
        }
    }

    /// Map an output pixel back into source coordinates.
    fn invert_point(&self, x: f32, y: f32) -> Option<(f32, f32)> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let dx = x - self.tx;
        let dy = y - self.ty;
        Some((
            (self.a * dx + self.b * dy) / det,
            (-self.b * dx + self.a * dy) / det,
        ))
    }
}

/// Bilinear sample of one pixel; out-of-bounds neighbours count as black.
fn sample_bilinear(src: &RgbImage, sx: f32, sy: f32) -> Rgb<u8> {
    let x0 = sx.floor() as i64;
    let y0 = sy.floor() as i64;
    let fx = sx - x0 as f32;
    let fy = sy - y0 as f32;

    let at = |x: i64, y: i64| -> [f32; 3] {
        if x >= 0 && y >= 0 && (x as u32) < src.width() && (y as u32) < src.height() {
            let p = src.get_pixel(x as u32, y as u32);
            [p[0] as f32, p[1] as f32, p[2] as f32]
        } else {
            [0.0; 3]
        }
    };

    let (tl, tr, bl, br) = (at(x0, y0), at(x0 + 1, y0), at(x0, y0 + 1), at(x0 + 1, y0 + 1));
    let mut out = [0u8; 3];
    for c in 0..3 {
        let v = tl[c] * (1.0 - fx) * (1.0 - fy)
            + tr[c] * fx * (1.0 - fy)
            + bl[c] * (1.0 - fx) * fy
            + br[c] * fx * fy;
        out[c] = v.round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

/// Align a detected face to a canonical 112×112 RGB crop.
pub fn align_face(frame: &RgbImage, landmarks: &[(f32, f32); 5]) -> RgbImage {
    let transform = Similarity::estimate(landmarks, &REFERENCE_LANDMARKS_112);
    RgbImage::from_fn(ALIGNED_SIZE, ALIGNED_SIZE, |ox, oy| {
        match transform.invert_point(ox as f32, oy as f32) {
            Some((sx, sy)) => sample_bilinear(frame, sx, sy),
            None => Rgb([0, 0, 0]),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_transform() {
        let t = Similarity::estimate(&REFERENCE_LANDMARKS_112, &REFERENCE_LANDMARKS_112);
        assert!((t.a - 1.0).abs() < 1e-4, "a = {}", t.a);
        assert!(t.b.abs() < 1e-4, "b = {}", t.b);
        assert!(t.tx.abs() < 1e-3 && t.ty.abs() < 1e-3);
    }

    #[test]
    fn test_scaled_transform() {
        // Source landmarks at 2x scale → a ≈ 0.5
        let src = REFERENCE_LANDMARKS_112.map(|(x, y)| (x * 2.0, y * 2.0));
        let t = Similarity::estimate(&src, &REFERENCE_LANDMARKS_112);
        assert!((t.a - 0.5).abs() < 1e-3, "a = {}", t.a);
        assert!(t.b.abs() < 1e-3);
    }

    #[test]
    fn test_rotation_recovered() {
        // Rotate reference points by 90°: (x, y) → (-y, x). Inverse has b = -1.
        let src = REFERENCE_LANDMARKS_112.map(|(x, y)| (-y, x));
        let t = Similarity::estimate(&src, &REFERENCE_LANDMARKS_112);
        assert!(t.a.abs() < 1e-3, "a = {}", t.a);
        assert!((t.b + 1.0).abs() < 1e-3, "b = {}", t.b);
    }

    #[test]
    fn test_align_face_output_size() {
        let frame = RgbImage::from_pixel(640, 480, Rgb([128, 64, 32]));
        let aligned = align_face(&frame, &REFERENCE_LANDMARKS_112);
        assert_eq!(aligned.dimensions(), (ALIGNED_SIZE, ALIGNED_SIZE));
        assert_eq!(*aligned.get_pixel(56, 56), Rgb([128, 64, 32]));
    }

    #[test]
    fn test_landmark_lands_on_reference() {
        let mut frame = RgbImage::new(200, 200);
        let src: [(f32, f32); 5] = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];
        // 5x5 bright patch on the left eye
        for dy in 0..5 {
            for dx in 0..5 {
                frame.put_pixel(78 + dx, 58 + dy, Rgb([255, 255, 255]));
            }
        }

        let aligned = align_face(&frame, &src);
        let rx = REFERENCE_LANDMARKS_112[0].0.round() as u32;
        let ry = REFERENCE_LANDMARKS_112[0].1.round() as u32;
        let mut max_val = 0u8;
        for y in ry - 1..=ry + 1 {
            for x in rx - 1..=rx + 1 {
                max_val = max_val.max(aligned.get_pixel(x, y)[0]);
            }
        }
        assert!(max_val > 100, "expected bright patch near ({rx}, {ry}), max={max_val}");
    }
}
