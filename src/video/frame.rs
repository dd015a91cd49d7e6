//! Decoded video frame representation
//!
//! A [`Frame`] is one decoded picture converted to packed RGB24. The pixel
//! buffer is owned by the frame and never mutated after construction, so
//! frames can be shared across threads behind an `Arc` without locking.

use thiserror::Error;

/// Bytes per pixel of packed RGB24
pub const RGB_BYTES_PER_PIXEL: usize = 3;

/// Pixel buffer length did not match the frame dimensions
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("frame buffer is {actual} bytes, expected {expected} for {width}x{height} RGB24")]
pub struct FrameSizeError {
    pub width: u32,
    pub height: u32,
    pub expected: usize,
    pub actual: usize,
}

/// A decoded RGB24 video frame
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    pts: f64,
}

impl Frame {
    /// Create a frame from a tightly packed RGB24 buffer
    pub fn new(data: Vec<u8>, width: u32, height: u32, pts: f64) -> Result<Self, FrameSizeError> {
        let expected = Self::expected_size(width, height);
        if data.len() != expected {
            return Err(FrameSizeError {
                width,
                height,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            pts,
        })
    }

    /// Copy a row-padded RGB24 picture into a new tightly packed frame
    ///
    /// Decoders hand out planes whose rows are aligned to a stride wider than
    /// `width * 3`; only the visible bytes of each row are copied.
    pub fn from_strided(
        plane: &[u8],
        stride: usize,
        width: u32,
        height: u32,
        pts: f64,
    ) -> Result<Self, FrameSizeError> {
        let row_len = (width as usize) * RGB_BYTES_PER_PIXEL;
        let expected = Self::expected_size(width, height);

        let size_error = || FrameSizeError {
            width,
            height,
            expected,
            actual: plane.len(),
        };

        if stride < row_len {
            return Err(size_error());
        }

        if stride == row_len {
            let packed = plane.get(..expected).ok_or_else(size_error)?;
            return Self::new(packed.to_vec(), width, height, pts);
        }

        let mut data = Vec::with_capacity(expected);
        for y in 0..height as usize {
            let row_start = y * stride;
            let row = plane
                .get(row_start..row_start + row_len)
                .ok_or_else(size_error)?;
            data.extend_from_slice(row);
        }
        Self::new(data, width, height, pts)
    }

    /// Expected buffer size for the given dimensions (width * height * 3)
    pub fn expected_size(width: u32, height: u32) -> usize {
        (width as usize) * (height as usize) * RGB_BYTES_PER_PIXEL
    }

    /// Packed RGB24 pixel data
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Presentation timestamp in seconds
    pub fn pts(&self) -> f64 {
        self.pts
    }

    /// Bytes per row
    pub fn stride(&self) -> usize {
        (self.width as usize) * RGB_BYTES_PER_PIXEL
    }

    /// RGB triple at (x, y), or None outside the picture
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize) * self.stride() + (x as usize) * RGB_BYTES_PER_PIXEL;
        let px = self.data.get(offset..offset + RGB_BYTES_PER_PIXEL)?;
        Some([px[0], px[1], px[2]])
    }

    /// Check the buffer still matches the dimensions
    pub fn is_valid(&self) -> bool {
        self.data.len() == Self::expected_size(self.width, self.height)
    }

    /// Give up the frame, returning its pixel buffer
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}
