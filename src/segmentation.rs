use tracing::debug;

use crate::config::LaneConfig;
use crate::mat::Mat;

/// A connected region of active mask pixels, standing in for an external
/// contour. Per-frame lifetime: extracted, classified, discarded.
#[derive(Debug, Clone)]
pub struct Contour {
    pub points: Vec<(i32, i32)>,
}

impl Contour {
    /// Pixel-count area of the region.
    pub fn area(&self) -> f64 {
        self.points.len() as f64
    }

    /// The bottommost point of the region (largest y).
    pub fn bottom_point(&self) -> (i32, i32) {
        self.points
            .iter()
            .copied()
            .max_by_key(|&(_, y)| y)
            .unwrap_or((0, 0))
    }

    /// Area-weighted geometric center.
    pub fn centroid(&self) -> (i32, i32) {
        if self.points.is_empty() {
            return (0, 0);
        }
        let sum_x: i64 = self.points.iter().map(|&(x, _)| x as i64).sum();
        let sum_y: i64 = self.points.iter().map(|&(_, y)| y as i64).sum();
        let n = self.points.len() as i64;
        ((sum_x / n) as i32, (sum_y / n) as i32)
    }

    /// Axis-aligned bounding rectangle as (x, y, width, height).
    pub fn bounding_rect(&self) -> (i32, i32, i32, i32) {
        let mut min_x = i32::MAX;
        let mut min_y = i32::MAX;
        let mut max_x = i32::MIN;
        let mut max_y = i32::MIN;
        for &(x, y) in &self.points {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
        if min_x > max_x {
            return (0, 0, 0, 0);
        }
        (min_x, min_y, max_x - min_x + 1, max_y - min_y + 1)
    }
}

/// Lane-line contour sets after position/area classification.
#[derive(Debug, Clone, Default)]
pub struct LaneContours {
    pub left_solid: Vec<Contour>,
    pub right_solid: Vec<Contour>,
    pub dashed: Vec<Contour>,
}

/// Converts an RGB sample to HSV with OpenCV conventions: H in 0..180,
/// S and V in 0..255. The configured lane color ranges use these units.
pub fn rgb_to_hsv(r: u8, g: u8, b: u8) -> [u8; 3] {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let v = max;
    let delta = (max - min) as f32;

    let s = if max == 0 {
        0.0
    } else {
        delta * 255.0 / max as f32
    };

    let h = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * (g as f32 - b as f32) / delta
    } else if max == g {
        120.0 + 60.0 * (b as f32 - r as f32) / delta
    } else {
        240.0 + 60.0 * (r as f32 - g as f32) / delta
    };
    let h = if h < 0.0 { h + 360.0 } else { h };

    [(h / 2.0).round() as u8, s.round() as u8, v]
}

fn hsv_in_range(hsv: [u8; 3], low: [u8; 3], high: [u8; 3]) -> bool {
    (0..3).all(|i| hsv[i] >= low[i] && hsv[i] <= high[i])
}

/// Masks a frame against every configured lane-line HSV range and
/// OR-combines the results into one binary mask. Pure function of the input.
pub fn mask_color_ranges(frame: &Mat, config: &LaneConfig) -> Mat {
    let mut mask = Mat::new(frame.width, frame.height, 1);
    for y in 0..frame.height {
        for x in 0..frame.width {
            let [r, g, b] = frame.pixel(x, y);
            let hsv = rgb_to_hsv(r, g, b);
            let hit = config
                .lines
                .iter()
                .any(|line| hsv_in_range(hsv, line.hsv_low, line.hsv_high));
            if hit {
                mask.set(x, y, 255);
            }
        }
    }
    mask
}

/// One erosion pass with a 3x3 structuring kernel, suppressing single-pixel
/// noise before contour extraction. Kernel samples outside the frame count
/// as active, so a line touching the frame border keeps its border row;
/// the sliding-window search relies on the bottom row surviving.
pub fn erode3x3(mask: &Mat) -> Mat {
    let mut out = Mat::new(mask.width, mask.height, 1);
    let w = mask.width as i32;
    let h = mask.height as i32;
    for y in 0..h {
        for x in 0..w {
            let mut keep = true;
            'kernel: for dy in -1..=1 {
                for dx in -1..=1 {
                    let nx = x + dx;
                    let ny = y + dy;
                    if nx < 0 || ny < 0 || nx >= w || ny >= h {
                        continue;
                    }
                    if mask.at(nx as u32, ny as u32) == 0 {
                        keep = false;
                        break 'kernel;
                    }
                }
            }
            if keep {
                out.set(x as u32, y as u32, 255);
            }
        }
    }
    out
}

/// Extracts the external contours of a binary mask as 8-connected regions,
/// in raster-scan discovery order.
pub fn extract_contours(mask: &Mat) -> Vec<Contour> {
    let w = mask.width as i32;
    let h = mask.height as i32;
    let mut visited = vec![false; (mask.width * mask.height) as usize];
    let mut contours = Vec::new();

    for y in 0..h {
        for x in 0..w {
            let idx = (y * w + x) as usize;
            if visited[idx] || mask.at(x as u32, y as u32) == 0 {
                continue;
            }

            let mut points = Vec::new();
            let mut stack = vec![(x, y)];
            visited[idx] = true;
            while let Some((cx, cy)) = stack.pop() {
                points.push((cx, cy));
                for dy in -1..=1 {
                    for dx in -1..=1 {
                        if dx == 0 && dy == 0 {
                            continue;
                        }
                        let nx = cx + dx;
                        let ny = cy + dy;
                        if nx < 0 || ny < 0 || nx >= w || ny >= h {
                            continue;
                        }
                        let nidx = (ny * w + nx) as usize;
                        if !visited[nidx] && mask.at(nx as u32, ny as u32) != 0 {
                            visited[nidx] = true;
                            stack.push((nx, ny));
                        }
                    }
                }
            }
            contours.push(Contour { points });
        }
    }

    contours
}

/// Fills a contour set into a fresh binary mask of the given dimensions.
pub fn fill_contours(contours: &[Contour], width: u32, height: u32) -> Mat {
    let mut mask = Mat::new(width, height, 1);
    for contour in contours {
        for &(x, y) in &contour.points {
            if x >= 0 && y >= 0 && (x as u32) < width && (y as u32) < height {
                mask.set(x as u32, y as u32, 255);
            }
        }
    }
    mask
}

/// Erodes the combined lane mask, extracts contours, and buckets them into
/// left-solid, right-solid, and dashed candidates.
///
/// Area separates a continuous solid line from short dashed segments. Solid
/// contours whose bottommost point sits in the upper half of the warped frame
/// cannot be reliably assigned to a side near the horizon and are dropped.
pub fn classify_contours(mask: &Mat, config: &LaneConfig) -> LaneContours {
    let eroded = erode3x3(mask);
    let contours = extract_contours(&eroded);

    let mut result = LaneContours::default();
    let half_height = (mask.height / 2) as i32;
    let mid_x = (mask.width / 2) as i32;

    for contour in contours {
        let area = contour.area();
        if area < config.noise_area_threshold {
            // Small contours are likely noise
            continue;
        }
        if area < config.solid_area_threshold {
            // Medium contours are likely dashed center-line segments
            result.dashed.push(contour);
            continue;
        }

        let (bottom_x, bottom_y) = contour.bottom_point();
        if bottom_y < half_height {
            continue;
        }
        if bottom_x < mid_x {
            result.left_solid.push(contour);
        } else {
            result.right_solid.push(contour);
        }
    }

    debug!(
        "Classified contours: {} left solid, {} right solid, {} dashed",
        result.left_solid.len(),
        result.right_solid.len(),
        result.dashed.len()
    );

    result
}
