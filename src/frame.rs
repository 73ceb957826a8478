//! Frame payloads handed from the camera to the video sink.

use anyhow::{anyhow, Result};
use std::borrow::Cow;

/// Pixel layout of a delivered frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    /// 8-bit single-channel luminance.
    Mono8,
    /// 8-bit interleaved RGB.
    Rgb24,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Mono8 => 1,
            PixelFormat::Rgb24 => 3,
        }
    }
}

/// One delivered frame: dimensions, pixel format and the raw bytes.
///
/// Owned by the acquisition loop until handed to the sink, which only borrows it.
#[derive(Clone, Debug)]
pub struct Frame {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Vec<u8>,
}

impl Frame {
    pub fn new(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(format.bytes_per_pixel()))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "frame length mismatch for {}x{} {:?}: expected {}, got {}",
                width,
                height,
                format,
                expected,
                data.len()
            ));
        }
        Ok(Self {
            width,
            height,
            format,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Single luminance plane for container formats that store raw luma.
    /// Mono frames are borrowed as-is; RGB collapses via integer BT.601 weights.
    pub fn luma_plane(&self) -> Cow<'_, [u8]> {
        match self.format {
            PixelFormat::Mono8 => Cow::Borrowed(&self.data),
            PixelFormat::Rgb24 => {
                let luma = self
                    .data
                    .chunks_exact(3)
                    .map(|px| {
                        let weighted =
                            299 * px[0] as u32 + 587 * px[1] as u32 + 114 * px[2] as u32;
                        (weighted / 1000) as u8
                    })
                    .collect();
                Cow::Owned(luma)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_buffer_length() {
        let result = Frame::new(4, 4, PixelFormat::Mono8, vec![0u8; 15]);
        assert!(result.is_err());
    }

    #[test]
    fn mono_luma_is_borrowed() -> Result<()> {
        let frame = Frame::new(2, 2, PixelFormat::Mono8, vec![10, 20, 30, 40])?;
        assert!(matches!(frame.luma_plane(), Cow::Borrowed(_)));
        assert_eq!(frame.luma_plane().as_ref(), &[10, 20, 30, 40]);
        Ok(())
    }

    #[test]
    fn rgb_luma_collapses_channels() -> Result<()> {
        // Pure white and pure black stay at the extremes.
        let frame = Frame::new(2, 1, PixelFormat::Rgb24, vec![255, 255, 255, 0, 0, 0])?;
        assert_eq!(frame.luma_plane().as_ref(), &[255, 0]);
        Ok(())
    }
}
