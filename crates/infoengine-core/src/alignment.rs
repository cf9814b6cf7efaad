//! Warping a detected face onto the 112×112 crop ArcFace expects.
//!
//! A similarity transform (uniform scale, rotation, translation) is fitted
//! by least squares from the five detected landmarks onto fixed reference
//! positions, then the crop is resampled bilinearly.

use image::{Rgb, RgbImage};

pub const ALIGNED_SIZE: u32 = 112;

/// Eyes, nose tip and mouth corners of the canonical 112×112 face.
pub(crate) const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

/// `x' = a·x - b·y + tx`, `y' = b·x + a·y + ty`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    const IDENTITY: Self = Self { a: 1.0, b: 0.0, tx: 0.0, ty: 0.0 };

    /// Least-squares fit mapping each `from` point onto the matching `to`.
    fn fit(from: &[(f32, f32); 5], to: &[(f32, f32); 5]) -> Self {
        // Accumulate the normal equations AᵀA·p = Aᵀb for p = [a, b, tx, ty].
        let mut lhs = [[0.0f32; 4]; 4];
        let mut rhs = [0.0f32; 4];
        for (&(x, y), &(u, v)) in from.iter().zip(to) {
            for (row, target) in [([x, -y, 1.0, 0.0], u), ([y, x, 0.0, 1.0], v)] {
                for i in 0..4 {
                    for j in 0..4 {
                        lhs[i][j] += row[i] * row[j];
                    }
                    rhs[i] += row[i] * target;
                }
            }
        }

        match solve(lhs, rhs) {
            Some([a, b, tx, ty]) => Self { a, b, tx, ty },
            None => Self::IDENTITY,
        }
    }

    /// The point that maps onto `(u, v)`.
    fn invert(&self, u: f32, v: f32) -> Option<(f32, f32)> {
        let norm = self.a * self.a + self.b * self.b;
        if norm < 1e-12 {
            return None;
        }
        let (du, dv) = (u - self.tx, v - self.ty);
        Some(((self.a * du + self.b * dv) / norm, (self.a * dv - self.b * du) / norm))
    }
}

/// Gaussian elimination with partial pivoting. `None` when singular.
#[allow(clippy::needless_range_loop)]
fn solve(mut lhs: [[f32; 4]; 4], mut rhs: [f32; 4]) -> Option<[f32; 4]> {
    for col in 0..4 {
        let pivot_row = (col..4).max_by(|&i, &j| lhs[i][col].abs().total_cmp(&lhs[j][col].abs()))?;
        lhs.swap(col, pivot_row);
        rhs.swap(col, pivot_row);

        let pivot = lhs[col][col];
        if pivot.abs() < 1e-12 {
            return None;
        }
        for row in col + 1..4 {
            let factor = lhs[row][col] / pivot;
            for k in col..4 {
                lhs[row][k] -= factor * lhs[col][k];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut p = [0.0f32; 4];
    for i in (0..4).rev() {
        let known: f32 = (i + 1..4).map(|k| lhs[i][k] * p[k]).sum();
        p[i] = (rhs[i] - known) / lhs[i][i];
    }
    Some(p)
}

/// Bilinear sample at a fractional position; outside the image is black.
fn sample(image: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (x0, y0) = (x.floor(), y.floor());
    let (fx, fy) = (x - x0, y - y0);
    let (w, h) = (image.width() as i64, image.height() as i64);

    let texel = |dx: i64, dy: i64| -> [f32; 3] {
        let (px, py) = (x0 as i64 + dx, y0 as i64 + dy);
        if (0..w).contains(&px) && (0..h).contains(&py) {
            image.get_pixel(px as u32, py as u32).0.map(f32::from)
        } else {
            [0.0; 3]
        }
    };
    let corners = [
        (texel(0, 0), (1.0 - fx) * (1.0 - fy)),
        (texel(1, 0), fx * (1.0 - fy)),
        (texel(0, 1), (1.0 - fx) * fy),
        (texel(1, 1), fx * fy),
    ];

    Rgb(std::array::from_fn(|c| {
        let value: f32 = corners.iter().map(|(t, weight)| t[c] * weight).sum();
        value.round().clamp(0.0, 255.0) as u8
    }))
}

/// Crop `image` so that `landmarks` land on the canonical positions.
pub fn align_face(image: &RgbImage, landmarks: &[(f32, f32); 5]) -> RgbImage {
    let transform = Similarity::fit(landmarks, &REFERENCE_LANDMARKS_112);
    RgbImage::from_fn(ALIGNED_SIZE, ALIGNED_SIZE, |u, v| match transform.invert(u as f32, v as f32) {
        Some((x, y)) => sample(image, x, y),
        None => Rgb([0, 0, 0]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32, tol: f32) -> bool {
        (a - b).abs() < tol
    }

    #[test]
    fn test_fit_recovers_known_transform() {
        // Rotate by 90° and double, then shift.
        let truth = Similarity { a: 0.0, b: 2.0, tx: 15.0, ty: -4.0 };
        let from = REFERENCE_LANDMARKS_112;
        let to = from.map(|(x, y)| (truth.a * x - truth.b * y + truth.tx, truth.b * x + truth.a * y + truth.ty));

        let fitted = Similarity::fit(&from, &to);
        assert!(close(fitted.a, 0.0, 1e-3), "{fitted:?}");
        assert!(close(fitted.b, 2.0, 1e-3), "{fitted:?}");
        assert!(close(fitted.tx, 15.0, 0.05), "{fitted:?}");
        assert!(close(fitted.ty, -4.0, 0.05), "{fitted:?}");

        let (x, y) = fitted.invert(to[2].0, to[2].1).unwrap();
        assert!(close(x, from[2].0, 0.05) && close(y, from[2].1, 0.05));
    }

    #[test]
    fn test_degenerate_landmarks_fall_back_to_identity() {
        let same = [(10.0, 10.0); 5];
        let zeros = [(0.0, 0.0); 5];
        assert_eq!(Similarity::fit(&zeros, &same), Similarity::IDENTITY);
        assert!(Similarity { a: 0.0, b: 0.0, tx: 1.0, ty: 1.0 }.invert(3.0, 3.0).is_none());
    }

    #[test]
    fn test_sample_interpolates_and_blacks_out() {
        let mut image = RgbImage::new(2, 1);
        image.put_pixel(1, 0, Rgb([200, 100, 0]));

        assert_eq!(sample(&image, 0.5, 0.0), Rgb([100, 50, 0]));
        assert_eq!(sample(&image, 1.0, 0.0), Rgb([200, 100, 0]));
        assert_eq!(sample(&image, -5.0, 3.0), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_align_moves_marked_mouth_corner() {
        // Landmarks at half the reference scale, offset into a larger photo.
        let landmarks = REFERENCE_LANDMARKS_112.map(|(x, y)| (x / 2.0 + 60.0, y / 2.0 + 30.0));
        let (mx, my) = landmarks[4];
        let mut image = RgbImage::new(160, 120);
        for y in my as u32 - 2..=my as u32 + 2 {
            for x in mx as u32 - 2..=mx as u32 + 2 {
                image.put_pixel(x, y, Rgb([0, 0, 255]));
            }
        }

        let aligned = align_face(&image, &landmarks);
        assert_eq!(aligned.dimensions(), (ALIGNED_SIZE, ALIGNED_SIZE));

        let (rx, ry) = REFERENCE_LANDMARKS_112[4];
        let px = aligned.get_pixel(rx.round() as u32, ry.round() as u32);
        assert!(px.0[2] > 150, "mouth corner pixel {px:?}");
        assert_eq!(px.0[0], 0);
        assert_eq!(*aligned.get_pixel(rx.round() as u32, 10), Rgb([0, 0, 0]));
    }
}
