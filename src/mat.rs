use anyhow::Result;
use image::{DynamicImage, GrayImage, ImageBuffer, Luma, Rgb, RgbImage};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MatError {
    #[error("unsupported channel count: {0}")]
    UnsupportedChannels(u32),
    #[error("pixel buffer size {actual} does not match {width}x{height}x{channels}")]
    BufferSizeMismatch {
        width: u32,
        height: u32,
        channels: u32,
        actual: usize,
    },
}

/// Simple matrix type for basic image operations. Three channels for RGB
/// frames, one channel for binary {0, 255} masks.
#[derive(Debug, Clone)]
pub struct Mat {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
}

impl Mat {
    pub fn new(width: u32, height: u32, channels: u32) -> Self {
        let size = (width * height * channels) as usize;
        Self {
            data: vec![0u8; size],
            width,
            height,
            channels,
        }
    }

    /// Wraps an existing raw pixel buffer.
    #[allow(dead_code)]
    pub fn from_raw(width: u32, height: u32, channels: u32, data: Vec<u8>) -> Result<Self, MatError> {
        let expected = (width * height * channels) as usize;
        if data.len() != expected {
            return Err(MatError::BufferSizeMismatch {
                width,
                height,
                channels,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            channels,
        })
    }

    #[allow(dead_code)]
    pub fn rows(&self) -> u32 {
        self.height
    }

    #[allow(dead_code)]
    pub fn cols(&self) -> u32 {
        self.width
    }

    #[inline]
    fn index(&self, x: u32, y: u32) -> usize {
        ((y * self.width + x) * self.channels) as usize
    }

    /// Reads a single-channel value. Callers guarantee in-bounds coordinates
    /// and a one-channel mat; the mask search code checks bounds itself.
    #[inline]
    pub fn at(&self, x: u32, y: u32) -> u8 {
        self.data[self.index(x, y)]
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, value: u8) {
        let i = self.index(x, y);
        self.data[i] = value;
    }

    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let i = self.index(x, y);
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }

    pub fn set_pixel(&mut self, x: i32, y: i32, color: [u8; 3]) {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return;
        }
        let i = self.index(x as u32, y as u32);
        if i + 2 < self.data.len() {
            self.data[i] = color[0];
            self.data[i + 1] = color[1];
            self.data[i + 2] = color[2];
        }
    }

    pub fn fill(&mut self, value: u8) {
        self.data.fill(value);
    }

    /// Draws a horizontal segment of the given pixel thickness, clipped to the
    /// mat bounds. Used to render an object's ground-contact edge on a mask.
    pub fn draw_hline(&mut self, x0: i32, x1: i32, y: i32, thickness: i32, value: u8) {
        let (lo, hi) = if x0 <= x1 { (x0, x1) } else { (x1, x0) };
        let half = thickness / 2;
        for row in (y - half)..=(y + half) {
            if row < 0 || row >= self.height as i32 {
                continue;
            }
            for col in lo..=hi {
                if col < 0 || col >= self.width as i32 {
                    continue;
                }
                if self.channels == 1 {
                    self.set(col as u32, row as u32, value);
                } else {
                    self.set_pixel(col, row, [value, value, value]);
                }
            }
        }
    }

    pub fn to_image(&self) -> Result<DynamicImage> {
        match self.channels {
            3 => {
                let buffer = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_raw(
                    self.width,
                    self.height,
                    self.data.clone(),
                )
                .ok_or_else(|| MatError::BufferSizeMismatch {
                    width: self.width,
                    height: self.height,
                    channels: self.channels,
                    actual: self.data.len(),
                })?;
                Ok(DynamicImage::ImageRgb8(buffer))
            }
            1 => {
                let buffer = ImageBuffer::<Luma<u8>, Vec<u8>>::from_raw(
                    self.width,
                    self.height,
                    self.data.clone(),
                )
                .ok_or_else(|| MatError::BufferSizeMismatch {
                    width: self.width,
                    height: self.height,
                    channels: self.channels,
                    actual: self.data.len(),
                })?;
                Ok(DynamicImage::ImageLuma8(buffer))
            }
            other => Err(MatError::UnsupportedChannels(other).into()),
        }
    }

    pub fn from_rgb_image(image: &RgbImage) -> Self {
        Self {
            data: image.as_raw().clone(),
            width: image.width(),
            height: image.height(),
            channels: 3,
        }
    }

    #[allow(dead_code)]
    pub fn from_gray_image(image: &GrayImage) -> Self {
        Self {
            data: image.as_raw().clone(),
            width: image.width(),
            height: image.height(),
            channels: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_mat_is_zeroed() {
        let mat = Mat::new(4, 3, 1);
        assert_eq!(mat.data.len(), 12);
        assert!(mat.data.iter().all(|&v| v == 0));
    }

    #[test]
    fn from_raw_rejects_wrong_buffer_size() {
        let result = Mat::from_raw(4, 4, 3, vec![0u8; 10]);
        assert!(result.is_err());
    }

    #[test]
    fn set_and_read_back_mask_value() {
        let mut mask = Mat::new(8, 8, 1);
        mask.set(3, 5, 255);
        assert_eq!(mask.at(3, 5), 255);
        assert_eq!(mask.at(3, 4), 0);
    }

    #[test]
    fn hline_is_clipped_to_bounds() {
        let mut mask = Mat::new(10, 10, 1);
        mask.draw_hline(-5, 20, 9, 3, 255);
        // Rows 8 and 9 in-bounds, row 10 clipped.
        assert_eq!(mask.at(0, 8), 255);
        assert_eq!(mask.at(9, 9), 255);
        assert_eq!(mask.at(0, 7), 0);
    }

    #[test]
    fn rgb_roundtrip_through_image_crate() {
        let mut mat = Mat::new(2, 2, 3);
        mat.set_pixel(1, 1, [10, 20, 30]);
        let image = mat.to_image().unwrap().to_rgb8();
        let back = Mat::from_rgb_image(&image);
        assert_eq!(back.pixel(1, 1), [10, 20, 30]);
    }
}
