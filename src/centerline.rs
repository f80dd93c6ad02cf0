use tracing::debug;

use crate::config::{LaneConfig, LaneSide, PerspectiveConfig, VisionConfig};
use crate::geometry::{clamp, remap, PerspectiveMap};
use crate::mat::Mat;
use crate::segmentation::{classify_contours, fill_contours, mask_color_ranges, LaneContours};

/// Quadratic fit of lane-center x as a function of warped y, coefficients
/// highest degree first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CenterLineFit {
    pub coeffs: [f64; 3],
}

impl CenterLineFit {
    pub fn eval(&self, y: f64) -> f64 {
        self.coeffs[0] * y * y + self.coeffs[1] * y + self.coeffs[2]
    }
}

/// Terminal per-frame outcome of lane estimation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LaneEstimate {
    Fit { curve: CenterLineFit, offset: i32 },
    NoFit,
}

impl LaneEstimate {
    #[allow(dead_code)]
    pub fn is_fit(&self) -> bool {
        matches!(self, LaneEstimate::Fit { .. })
    }
}

/// Per-frame lane estimator. Holds only immutable configuration plus the
/// process-lifetime perspective map, so one instance is shared across the
/// concurrent perception tasks.
#[derive(Debug, Clone)]
pub struct LaneDetector {
    lane: LaneConfig,
    fill_color: [u8; 3],
    warped_width: u32,
    warped_height: u32,
    map: PerspectiveMap,
}

impl LaneDetector {
    pub fn new(
        vision: &VisionConfig,
        perspective: &PerspectiveConfig,
        lane: LaneConfig,
        map: PerspectiveMap,
    ) -> Self {
        Self {
            lane,
            fill_color: perspective.fill_color,
            warped_width: vision.warped_width,
            warped_height: vision.warped_height,
            map,
        }
    }

    /// Runs the full per-frame estimation: rectify, mask, classify, locate
    /// center points, fit, derive the bounded lane offset.
    pub fn detect(&self, frame: &Mat) -> LaneEstimate {
        let warped = self.map.warp(frame, self.fill_color);
        let mask = mask_color_ranges(&warped, &self.lane);
        let classified = classify_contours(&mask, &self.lane);
        self.estimate(&classified)
    }

    /// Locates center-line points from classified contours and fits them.
    ///
    /// Solid lines give denser evidence than dashed segments, so the search
    /// prefers the solid right line (the vehicle drives in the right-hand
    /// lane), then the solid left line, then falls back to dashed centroids.
    pub fn estimate(&self, contours: &LaneContours) -> LaneEstimate {
        let lane_width = self.lane.lane_width;
        let (w, h) = (self.warped_width, self.warped_height);

        let center_points: Vec<(i32, i32)> = if !contours.right_solid.is_empty() {
            debug!("Right line visible, tracing it for center estimation");
            let mask = fill_contours(&contours.right_solid, w, h);
            self.sliding_window(&mask, self.lane.line(LaneSide::Right).initial_x, 0)
                .into_iter()
                .map(|(x, y)| (x - lane_width, y))
                .collect()
        } else if !contours.left_solid.is_empty() {
            debug!("Left line visible, tracing it for center estimation");
            let mask = fill_contours(&contours.left_solid, w, h);
            self.sliding_window(
                &mask,
                self.lane.line(LaneSide::Left).initial_x,
                self.lane.left_search_y_offset,
            )
            .into_iter()
            .map(|(x, y)| (x + lane_width, y))
            .collect()
        } else if !contours.dashed.is_empty() {
            debug!("Only dashed segments visible, using their centroids");
            contours.dashed.iter().map(|c| c.centroid()).collect()
        } else {
            Vec::new()
        };

        if center_points.is_empty() {
            return LaneEstimate::NoFit;
        }

        let curve = polyfit(&center_points);
        let offset = self.lane_offset(&curve);
        LaneEstimate::Fit { curve, offset }
    }

    /// Traces a line through a binary mask from the bottom up, one
    /// fixed-height band at a time, picking the column with the largest
    /// summed intensity inside a window centered at the running x estimate.
    ///
    /// Band policies:
    /// - a window starting left of the mask is empty: shift the estimate
    ///   right by a half-width and move on;
    /// - a final partial band whose top is above the frame sums zero rows,
    ///   so the peak falls to the window's left column, which may still
    ///   record a point if its bottom-row pixel is active;
    /// - a peak column whose bottom-row pixel is inactive records no point
    ///   (the summed peak can come entirely from neighboring rows);
    /// - out-of-bounds coordinates skip the band rather than aborting.
    pub fn sliding_window(&self, mask: &Mat, base_x: i32, base_y: i32) -> Vec<(i32, i32)> {
        let w = mask.width as i32;
        let h = mask.height as i32;
        let half_width = self.lane.window_half_width;
        let window_height = self.lane.window_height;

        let mut eval_y = h - base_y;
        let mut base_x = base_x;
        let mut points = Vec::new();

        while eval_y > 0 {
            let left = base_x - half_width;
            let right = base_x + half_width;
            let top = eval_y - window_height;

            if left < 0 || left >= w {
                // Empty window at the frame edge: shift right and continue
                base_x += half_width;
                eval_y -= window_height;
                continue;
            }

            let mut peak_x = left;
            let mut peak_sum = 0u32;
            if top >= 0 {
                for col in left..right.min(w) {
                    let mut sum = 0u32;
                    for row in top..eval_y {
                        sum += mask.at(col as u32, row as u32) as u32;
                    }
                    if sum > peak_sum {
                        peak_sum = sum;
                        peak_x = col;
                    }
                }
            }

            let probe_y = eval_y - 1;
            if peak_x < 0 || peak_x >= w || probe_y < 0 || probe_y >= h {
                eval_y -= window_height;
                continue;
            }
            if mask.at(peak_x as u32, probe_y as u32) == 0 {
                // Peak column carries no active pixel on the band's bottom row
                eval_y -= window_height;
                continue;
            }

            points.push((peak_x, eval_y));
            base_x = peak_x;
            eval_y -= window_height;
        }

        points
    }

    /// Derives the bounded lane offset from a fitted center line: evaluate at
    /// the warped bottom edge, shift by half a lane (the vehicle travels in
    /// the lane right of the center line), clamp, remap into the control
    /// range.
    fn lane_offset(&self, curve: &CenterLineFit) -> i32 {
        let lane_half_width = self.lane.lane_width / 2;
        let lane_center = curve.eval(self.warped_height as f64) as i32 + lane_half_width;

        let raw = clamp(
            self.lane.vehicle_x - lane_center,
            -lane_half_width,
            lane_half_width,
        );
        let range = self.lane.offset_control_range as f64;
        remap(
            raw as f64,
            -lane_half_width as f64,
            lane_half_width as f64,
            -range,
            range,
        )
        .round() as i32
    }
}

/// Least-squares fit of x over y, degree 2 first, degrading to linear and
/// then constant when the system is singular (single dashed centroid, or all
/// points in one band), so any non-empty point list yields a usable curve.
pub fn polyfit(points: &[(i32, i32)]) -> CenterLineFit {
    if let Some(coeffs) = polyfit_quadratic(points) {
        return CenterLineFit { coeffs };
    }
    if let Some([a, b]) = polyfit_linear(points) {
        return CenterLineFit {
            coeffs: [0.0, a, b],
        };
    }
    let mean_x =
        points.iter().map(|&(x, _)| x as f64).sum::<f64>() / points.len().max(1) as f64;
    CenterLineFit {
        coeffs: [0.0, 0.0, mean_x],
    }
}

fn polyfit_quadratic(points: &[(i32, i32)]) -> Option<[f64; 3]> {
    if points.len() < 3 {
        return None;
    }

    // Center and scale y before solving. Raw warped coordinates push the
    // fourth-power sums past 1e12, and Cramer's rule on that system loses
    // enough low bits to shift the rounded offset by a pixel.
    let n = points.len() as f64;
    let mean = points.iter().map(|&(_, y)| y as f64).sum::<f64>() / n;
    let scale = points
        .iter()
        .map(|&(_, y)| (y as f64 - mean).abs())
        .fold(0.0f64, f64::max)
        .max(1.0);

    let mut t_sum = 0.0;
    let mut t2_sum = 0.0;
    let mut t3_sum = 0.0;
    let mut t4_sum = 0.0;
    let mut v_sum = 0.0;
    let mut tv_sum = 0.0;
    let mut t2v_sum = 0.0;

    for &(x, y) in points {
        let t = (y as f64 - mean) / scale;
        let v = x as f64;
        t_sum += t;
        t2_sum += t * t;
        t3_sum += t * t * t;
        t4_sum += t * t * t * t;
        v_sum += v;
        tv_sum += t * v;
        t2v_sum += t * t * v;
    }

    // Normal equations, solved with Cramer's rule
    let det3 = |m: [[f64; 3]; 3]| {
        m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
            - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
            + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
    };

    let a = [
        [t4_sum, t3_sum, t2_sum],
        [t3_sum, t2_sum, t_sum],
        [t2_sum, t_sum, n],
    ];
    let det = det3(a);
    if det.abs() < 1e-9 {
        return None;
    }

    let b = [t2v_sum, tv_sum, v_sum];
    let replace = |col: usize| {
        let mut m = a;
        for row in 0..3 {
            m[row][col] = b[row];
        }
        m
    };

    let a = det3(replace(0)) / det;
    let b = det3(replace(1)) / det;
    let c = det3(replace(2)) / det;

    // Map the scaled-basis coefficients back to raw y:
    // x = a*t^2 + b*t + c with t = (y - mean) / scale.
    let s2 = scale * scale;
    Some([
        a / s2,
        b / scale - 2.0 * a * mean / s2,
        a * mean * mean / s2 - b * mean / scale + c,
    ])
}

fn polyfit_linear(points: &[(i32, i32)]) -> Option<[f64; 2]> {
    if points.len() < 2 {
        return None;
    }
    let n = points.len() as f64;
    let t_sum: f64 = points.iter().map(|&(_, y)| y as f64).sum();
    let v_sum: f64 = points.iter().map(|&(x, _)| x as f64).sum();
    let t2_sum: f64 = points.iter().map(|&(_, y)| (y as f64) * (y as f64)).sum();
    let tv_sum: f64 = points.iter().map(|&(x, y)| (x as f64) * (y as f64)).sum();

    let denom = n * t2_sum - t_sum * t_sum;
    if denom.abs() < 1e-9 {
        return None;
    }
    let a = (n * tv_sum - t_sum * v_sum) / denom;
    let b = (v_sum - a * t_sum) / n;
    Some([a, b])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LanePilotConfig;
    use crate::segmentation::Contour;

    fn detector() -> LaneDetector {
        let config = LanePilotConfig::default();
        let map = config.perspective_map().unwrap();
        LaneDetector::new(&config.vision, &config.perspective, config.lane.clone(), map)
    }

    fn stripe_mask(x0: i32, width: i32, height: u32) -> Mat {
        let mut mask = Mat::new(480, height, 1);
        for y in 0..height {
            for x in x0..(x0 + width) {
                mask.set(x as u32, y, 255);
            }
        }
        mask
    }

    fn stripe_contour(x0: i32, width: i32, y0: i32, y1: i32) -> Contour {
        let mut points = Vec::new();
        for y in y0..y1 {
            for x in x0..(x0 + width) {
                points.push((x, y));
            }
        }
        Contour { points }
    }

    #[test]
    fn sliding_window_on_empty_mask_finds_nothing() {
        let det = detector();
        let mask = Mat::new(480, 720, 1);
        assert!(det.sliding_window(&mask, 460, 0).is_empty());
    }

    #[test]
    fn sliding_window_traces_a_vertical_stripe() {
        let det = detector();
        let mask = stripe_mask(460, 10, 720);
        let points = det.sliding_window(&mask, 460, 0);
        assert!(!points.is_empty());
        // Bottom-to-top order, peak at the stripe's leftmost column.
        assert_eq!(points[0], (460, 720));
        assert!(points.windows(2).all(|p| p[1].1 < p[0].1));
        assert!(points.iter().all(|&(x, _)| x == 460));
    }

    #[test]
    fn window_beyond_left_edge_shifts_right() {
        let det = detector();
        // Stripe near the left edge; starting estimate makes the first
        // window begin at a negative x, which must not panic and must still
        // find the stripe after the lateral shift.
        let mask = stripe_mask(30, 10, 720);
        let points = det.sliding_window(&mask, 20, 0);
        assert!(points.iter().all(|&(x, _)| x == 30));
    }

    #[test]
    fn final_partial_band_probes_the_left_column() {
        let det = detector();
        let mut mask = Mat::new(480, 720, 1);
        // Band top above the frame: the column sums cover zero rows, so the
        // peak stays at the window's left column; an active bottom-row pixel
        // there still records a point.
        mask.set(40, 39, 255);
        let points = det.sliding_window(&mask, 100, 680);
        assert_eq!(points, vec![(40, 40)]);
    }

    #[test]
    fn peak_without_bottom_row_pixel_is_skipped() {
        let det = detector();
        let mut mask = stripe_mask(460, 10, 720);
        // Blank the bottom row of the lowest band; the column sums stay
        // non-zero but the probe pixel is inactive, so no point is recorded
        // for that band.
        for x in 0..480u32 {
            mask.set(x, 719, 0);
        }
        let points = det.sliding_window(&mask, 460, 0);
        assert!(points.iter().all(|&(_, y)| y != 720));
        assert!(points.iter().any(|&(_, y)| y == 670));
    }

    #[test]
    fn bottom_edge_evidence_keeps_its_nearest_point() {
        let det = detector();
        let config = LanePilotConfig::default();
        let mut mask = Mat::new(480, 720, 1);
        for y in 0..720u32 {
            for x in 459..=470u32 {
                mask.set(x, y, 255);
            }
        }
        // Erosion inside classification must not eat the bottom row; the
        // first band's point at the frame edge is the nearest and most
        // influential evidence for the fit.
        let classified = classify_contours(&mask, &config.lane);
        let filled = fill_contours(&classified.right_solid, 480, 720);
        let points = det.sliding_window(&filled, 460, 0);
        assert!(points.contains(&(460, 720)));
    }

    #[test]
    fn right_line_evidence_is_shifted_left_by_lane_width() {
        let det = detector();
        let contours = LaneContours {
            right_solid: vec![stripe_contour(460, 10, 0, 720)],
            ..Default::default()
        };
        match det.estimate(&contours) {
            LaneEstimate::Fit { curve, offset } => {
                assert!((curve.eval(720.0) - 250.0).abs() < 1.0);
                // lane_center = 250 + 105 = 355; raw = 315 - 355 = -40;
                // remap(-40, -105, 105, -63, 63) = -24
                assert_eq!(offset, -24);
            }
            LaneEstimate::NoFit => panic!("expected a fit from right-line evidence"),
        }
    }

    #[test]
    fn left_line_evidence_is_shifted_right_by_lane_width() {
        let det = detector();
        let contours = LaneContours {
            left_solid: vec![stripe_contour(20, 10, 0, 720)],
            ..Default::default()
        };
        match det.estimate(&contours) {
            LaneEstimate::Fit { curve, .. } => {
                assert!((curve.eval(720.0) - 230.0).abs() < 1.0);
            }
            LaneEstimate::NoFit => panic!("expected a fit from left-line evidence"),
        }
    }

    #[test]
    fn dashed_fallback_uses_centroids() {
        let det = detector();
        let contours = LaneContours {
            dashed: vec![
                stripe_contour(245, 10, 600, 640),
                stripe_contour(245, 10, 500, 540),
                stripe_contour(245, 10, 400, 440),
            ],
            ..Default::default()
        };
        match det.estimate(&contours) {
            LaneEstimate::Fit { curve, .. } => {
                // Centroid x of a 10-wide stripe starting at 245 is 249.
                assert!((curve.eval(620.0) - 249.0).abs() < 1.5);
            }
            LaneEstimate::NoFit => panic!("expected a fit from dashed centroids"),
        }
    }

    #[test]
    fn no_evidence_is_no_fit() {
        let det = detector();
        assert_eq!(det.estimate(&LaneContours::default()), LaneEstimate::NoFit);
    }

    #[test]
    fn offset_is_clamped_for_extreme_deviations() {
        let det = detector();
        // Arbitrarily large rightward fit collapses to the same clamped
        // output as a fit exactly half a lane width out.
        let offset = det.lane_offset(&CenterLineFit {
            coeffs: [0.0, 0.0, 2000.0],
        });
        let offset_at_bound = det.lane_offset(&CenterLineFit {
            coeffs: [0.0, 0.0, 315.0],
        });
        assert_eq!(offset, -63);
        assert_eq!(offset, offset_at_bound);
    }

    #[test]
    fn offset_is_monotonic_in_line_position() {
        let det = detector();
        // The further right the fitted line, the further left of lane center
        // the vehicle sits, so the offset decreases monotonically.
        let mut previous = i32::MAX;
        for center_x in [200.0, 230.0, 260.0, 290.0, 320.0] {
            let offset = det.lane_offset(&CenterLineFit {
                coeffs: [0.0, 0.0, center_x],
            });
            assert!(offset <= previous);
            previous = offset;
        }
    }

    #[test]
    fn quadratic_fit_recovers_known_coefficients() {
        let points: Vec<(i32, i32)> = (0..20)
            .map(|i| {
                let y = i * 36;
                let x = (0.0001 * (y as f64) * (y as f64) + 0.05 * y as f64 + 240.0) as i32;
                (x, y)
            })
            .collect();
        let fit = polyfit(&points);
        assert!((fit.eval(720.0) - (0.0001 * 720.0 * 720.0 + 0.05 * 720.0 + 240.0)).abs() < 2.0);
    }

    #[test]
    fn constant_evidence_evaluates_exactly_at_the_far_edge() {
        // A perfectly vertical line must not drift below its x-value at the
        // evaluation edge; a fraction of a pixel here moves the rounded
        // offset by one.
        let points: Vec<(i32, i32)> = (1..=14).map(|i| (250, i * 50)).collect();
        let fit = polyfit(&points);
        assert!((fit.eval(720.0) - 250.0).abs() < 1e-6);
    }

    #[test]
    fn degenerate_point_sets_still_fit() {
        let one = polyfit(&[(250, 600)]);
        assert!((one.eval(720.0) - 250.0).abs() < 1e-9);
        let two = polyfit(&[(250, 600), (260, 500)]);
        assert!((two.eval(600.0) - 250.0).abs() < 1e-6);
    }
}
