use anyhow::{anyhow, Result};

use crate::mat::Mat;

/// Limits a value to stay within `[lo, hi]`.
pub fn clamp<T: PartialOrd>(value: T, lo: T, hi: T) -> T {
    if value < lo {
        lo
    } else if value > hi {
        hi
    } else {
        value
    }
}

/// Maps a value from range `[a, b]` to range `[c, d]`.
///
/// Precondition: `a != b`. Callers guarantee a non-degenerate source range.
pub fn remap(x: f64, a: f64, b: f64, c: f64, d: f64) -> f64 {
    (x - a) * (d - c) / (b - a) + c
}

type Homography = [[f64; 3]; 3];

/// Fixed projective transform between the raw camera view and the bird's-eye
/// view, defined by four point correspondences. The inverse transform is
/// solved from the swapped correspondences, so `unwarp` reverses `warp` up to
/// floating-point tolerance.
#[derive(Debug, Clone)]
pub struct PerspectiveMap {
    forward: Homography,
    inverse: Homography,
    raw_size: (u32, u32),
    warped_size: (u32, u32),
}

impl PerspectiveMap {
    pub fn new(
        raw_points: [[f64; 2]; 4],
        warped_points: [[f64; 2]; 4],
        raw_size: (u32, u32),
        warped_size: (u32, u32),
    ) -> Result<Self> {
        let forward = homography_from_points(&raw_points, &warped_points)
            .ok_or_else(|| anyhow!("degenerate perspective correspondence points"))?;
        let inverse = homography_from_points(&warped_points, &raw_points)
            .ok_or_else(|| anyhow!("degenerate perspective correspondence points"))?;
        Ok(Self {
            forward,
            inverse,
            raw_size,
            warped_size,
        })
    }

    #[allow(dead_code)]
    pub fn warped_size(&self) -> (u32, u32) {
        self.warped_size
    }

    /// Projects a raw-view point into the warped view.
    #[allow(dead_code)]
    pub fn project(&self, x: f64, y: f64) -> (f64, f64) {
        apply_homography(&self.forward, x, y)
    }

    /// Projects a warped-view point back into the raw view.
    #[allow(dead_code)]
    pub fn project_inverse(&self, x: f64, y: f64) -> (f64, f64) {
        apply_homography(&self.inverse, x, y)
    }

    /// Resamples a raw-view frame into the fixed warped dimensions. Pixels
    /// falling outside the source frame take `fill`. Works for both RGB
    /// frames and single-channel masks (masks use `fill[0]`).
    pub fn warp(&self, frame: &Mat, fill: [u8; 3]) -> Mat {
        let (width, height) = self.warped_size;
        self.resample(frame, width, height, &self.inverse, fill)
    }

    /// Inverse transform back to raw dimensions. Debug visualization only;
    /// the control core never consumes the result.
    #[allow(dead_code)]
    pub fn unwarp(&self, frame: &Mat) -> Mat {
        let (width, height) = self.raw_size;
        self.resample(frame, width, height, &self.forward, [0, 0, 0])
    }

    fn resample(
        &self,
        source: &Mat,
        out_width: u32,
        out_height: u32,
        to_source: &Homography,
        fill: [u8; 3],
    ) -> Mat {
        let mut out = Mat::new(out_width, out_height, source.channels);
        for y in 0..out_height {
            for x in 0..out_width {
                let (sx, sy) = apply_homography(to_source, x as f64, y as f64);
                let sx = sx.round() as i64;
                let sy = sy.round() as i64;
                let inside =
                    sx >= 0 && sy >= 0 && sx < source.width as i64 && sy < source.height as i64;
                if source.channels == 1 {
                    let value = if inside {
                        source.at(sx as u32, sy as u32)
                    } else {
                        fill[0]
                    };
                    out.set(x, y, value);
                } else {
                    let color = if inside {
                        source.pixel(sx as u32, sy as u32)
                    } else {
                        fill
                    };
                    out.set_pixel(x as i32, y as i32, color);
                }
            }
        }
        out
    }
}

fn apply_homography(h: &Homography, x: f64, y: f64) -> (f64, f64) {
    let w = h[2][0] * x + h[2][1] * y + h[2][2];
    let u = (h[0][0] * x + h[0][1] * y + h[0][2]) / w;
    let v = (h[1][0] * x + h[1][1] * y + h[1][2]) / w;
    (u, v)
}

/// Solves the eight projective-transform coefficients from four point
/// correspondences via Gaussian elimination with partial pivoting.
fn homography_from_points(src: &[[f64; 2]; 4], dst: &[[f64; 2]; 4]) -> Option<Homography> {
    let mut system = [[0.0f64; 9]; 8];
    for (i, (s, d)) in src.iter().zip(dst.iter()).enumerate() {
        let (x, y) = (s[0], s[1]);
        let (u, v) = (d[0], d[1]);
        system[2 * i] = [x, y, 1.0, 0.0, 0.0, 0.0, -u * x, -u * y, u];
        system[2 * i + 1] = [0.0, 0.0, 0.0, x, y, 1.0, -v * x, -v * y, v];
    }

    for col in 0..8 {
        let pivot = (col..8).max_by(|&a, &b| {
            system[a][col]
                .abs()
                .partial_cmp(&system[b][col].abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;
        if system[pivot][col].abs() < 1e-12 {
            return None;
        }
        system.swap(col, pivot);
        for row in 0..8 {
            if row == col {
                continue;
            }
            let factor = system[row][col] / system[col][col];
            for k in col..9 {
                system[row][k] -= factor * system[col][k];
            }
        }
    }

    let mut coeffs = [0.0f64; 8];
    for i in 0..8 {
        coeffs[i] = system[i][8] / system[i][i];
    }
    Some([
        [coeffs[0], coeffs[1], coeffs[2]],
        [coeffs[3], coeffs[4], coeffs[5]],
        [coeffs[6], coeffs[7], 1.0],
    ])
}
