//! The immutable screenshot value object and its pixel projections.

use crate::error::{Error, Result};
use crate::monitor::Monitor;

/// Raw capture result: a BGRA pixel buffer plus the geometry it was taken
/// from.
///
/// The buffer is row-major with no padding between rows and always holds
/// exactly `width * height * 4` bytes. Projections (`rgb`, `pixel`,
/// `pixels`) are computed on demand; nothing but the raw buffer is cached.
#[derive(Debug, Clone)]
pub struct Screenshot {
    raw: Vec<u8>,
    pos: (i32, i32),
    size: (u32, u32),
}

/// Zero-copy interop descriptor compatible with the de-facto standard
/// array-interface protocol of the scientific-computing ecosystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayInterface {
    /// `(height, width, 4)`.
    pub shape: (usize, usize, usize),
    /// Always `"|u1"`: unsigned bytes, byte-order irrelevant.
    pub typestr: &'static str,
    /// `(buffer address, read_only)`.
    pub data: (usize, bool),
    /// Protocol version, always 3.
    pub version: u32,
}

impl Screenshot {
    /// Wraps a BGRA buffer captured at `region`.
    ///
    /// Fails with `InvalidArgument` when the buffer length does not match
    /// the region geometry.
    pub fn from_bgra(raw: Vec<u8>, region: Monitor) -> Result<Self> {
        let expected = region.width as usize * region.height as usize * 4;
        if raw.len() != expected {
            return Err(Error::InvalidArgument(format!(
                "pixel buffer is {} bytes, expected {} for {}x{}",
                raw.len(),
                expected,
                region.width,
                region.height
            )));
        }
        Ok(Self {
            raw,
            pos: (region.left, region.top),
            size: (region.width, region.height),
        })
    }

    /// Raw pixels in BGRA order, 4 bytes per pixel.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Alias of [`Screenshot::raw`].
    pub fn bgra(&self) -> &[u8] {
        &self.raw
    }

    /// `(left, top)` of the captured area in global coordinates.
    pub fn pos(&self) -> (i32, i32) {
        self.pos
    }

    /// `(width, height)` of the captured area.
    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    pub fn left(&self) -> i32 {
        self.pos.0
    }

    pub fn top(&self) -> i32 {
        self.pos.1
    }

    pub fn width(&self) -> u32 {
        self.size.0
    }

    pub fn height(&self) -> u32 {
        self.size.1
    }

    /// The same pixels re-ordered to `R,G,B,R,G,B,...`, 3 bytes per pixel.
    pub fn rgb(&self) -> Vec<u8> {
        let pixels = self.raw.len() / 4;
        let mut rgb = Vec::with_capacity(pixels * 3);
        for px in self.raw.chunks_exact(4) {
            rgb.push(px[2]);
            rgb.push(px[1]);
            rgb.push(px[0]);
        }
        rgb
    }

    /// The `(r, g, b)` value of the pixel at `(x, y)`, relative to the
    /// capture origin.
    ///
    /// # Panics
    ///
    /// Panics when `(x, y)` lies outside the captured area.
    pub fn pixel(&self, x: u32, y: u32) -> (u8, u8, u8) {
        let (w, h) = self.size;
        assert!(x < w && y < h, "pixel ({x}, {y}) outside {w}x{h} capture");
        let idx = (y as usize * w as usize + x as usize) * 4;
        (self.raw[idx + 2], self.raw[idx + 1], self.raw[idx])
    }

    /// Row-grouped pixels: one `Vec<(r, g, b)>` per scanline, top to bottom.
    pub fn pixels(&self) -> Vec<Vec<(u8, u8, u8)>> {
        let (w, h) = self.size;
        let row_bytes = w as usize * 4;
        (0..h as usize)
            .map(|y| {
                self.raw[y * row_bytes..(y + 1) * row_bytes]
                    .chunks_exact(4)
                    .map(|px| (px[2], px[1], px[0]))
                    .collect()
            })
            .collect()
    }

    /// Encodes this screenshot as an in-memory PNG at `level` (0..=9).
    pub fn to_png(&self, level: u32) -> Result<Vec<u8>> {
        crate::png::encode(&self.raw, self.size, level)
    }

    /// Descriptor for zero-copy interop with numeric-array libraries.
    ///
    /// The pointer stays valid for as long as this screenshot is alive and
    /// must be treated as read-only by the consumer.
    pub fn array_interface(&self) -> ArrayInterface {
        ArrayInterface {
            shape: (self.size.1 as usize, self.size.0 as usize, 4),
            typestr: "|u1",
            data: (self.raw.as_ptr() as usize, true),
            version: 3,
        }
    }
}
