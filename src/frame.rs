//! Decoded video frames handed from acquisition to inference.

use anyhow::{anyhow, Result};

/// One decoded RGB frame.
///
/// Frames are transient: a camera worker acquires a frame, runs inference on
/// it, and drops it. Nothing in the engine stores frames.
#[derive(Clone, Debug)]
pub struct Frame {
    /// Tightly packed RGB bytes, row-major, 3 bytes per pixel.
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                pixels.len()
            ));
        }
        Ok(Self {
            pixels,
            width,
            height,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_size_is_checked() {
        assert!(Frame::new(vec![0u8; 4 * 4 * 3], 4, 4).is_ok());
        assert!(Frame::new(vec![0u8; 7], 4, 4).is_err());
    }
}
