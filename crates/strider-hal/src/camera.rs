//! Raw camera frames and the near-black check used to skip warm-up frames.

/// An uncompressed RGB24 frame as read back from the renderer.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraFrame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Row-major RGB24 pixel data.
    pub data: Vec<u8>,
}

/// Mean luma below which a frame counts as black (0–255 scale).
pub const DARK_LUMA_THRESHOLD: f64 = 6.0;

impl CameraFrame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self { width, height, data }
    }

    /// Mean Rec. 601 luma over all complete pixels; 0 for an empty frame.
    pub fn average_luma(&self) -> f64 {
        let pixels = self.data.chunks_exact(3);
        let n = pixels.len();
        if n == 0 {
            return 0.0;
        }
        let sum: f64 = pixels
            .map(|px| 0.299 * f64::from(px[0]) + 0.587 * f64::from(px[1]) + 0.114 * f64::from(px[2]))
            .sum();
        sum / n as f64
    }

    pub fn is_near_black(&self, threshold: f64) -> bool {
        self.average_luma() < threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn black_frame_has_zero_luma() {
        let frame = CameraFrame::new(2, 2, vec![0u8; 12]);
        assert_eq!(frame.average_luma(), 0.0);
        assert!(frame.is_near_black(DARK_LUMA_THRESHOLD));
    }

    #[test]
    fn white_frame_is_bright() {
        let frame = CameraFrame::new(2, 2, vec![255u8; 12]);
        assert!((frame.average_luma() - 255.0).abs() < 1e-9);
        assert!(!frame.is_near_black(DARK_LUMA_THRESHOLD));
    }

    #[test]
    fn green_weighs_most() {
        let green = CameraFrame::new(1, 1, vec![0, 100, 0]);
        let blue = CameraFrame::new(1, 1, vec![0, 0, 100]);
        assert!(green.average_luma() > blue.average_luma());
    }

    #[test]
    fn empty_frame_is_black() {
        assert!(CameraFrame::new(0, 0, Vec::new()).is_near_black(1.0));
    }
}
