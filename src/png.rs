//! Pure in-process PNG encoder: BGRA pixels to a PNG byte stream.
//!
//! Output layout: 8-byte signature, IHDR (bit depth 8, colour type 2 /
//! RGB truecolour, no interlace), a single IDAT holding the zlib-compressed
//! scanlines (one leading filter byte of 0 per row, then the row in RGB
//! order), and IEND. The deflate stream comes from `flate2`; everything
//! else is produced in-module.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::{Error, Result};

const SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Encodes a BGRA buffer into an in-memory PNG.
///
/// `level` is the deflate compression strength, 0..=9; anything else fails
/// with `InvalidArgument`, as does a buffer whose length does not match
/// `width * height * 4`.
pub fn encode(bgra: &[u8], size: (u32, u32), level: u32) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    write_to(&mut out, bgra, size, level)?;
    Ok(out)
}

/// Streams the PNG for a BGRA buffer into `writer`.
pub fn write_to<W: Write>(writer: &mut W, bgra: &[u8], size: (u32, u32), level: u32) -> Result<()> {
    if level > 9 {
        return Err(Error::InvalidArgument(format!(
            "compression level {level} not in 0..=9"
        )));
    }
    let (width, height) = size;
    if width == 0 || height == 0 {
        return Err(Error::InvalidArgument(format!(
            "cannot encode a {width}x{height} image"
        )));
    }
    let expected = width as usize * height as usize * 4;
    if bgra.len() != expected {
        return Err(Error::InvalidArgument(format!(
            "pixel buffer is {} bytes, expected {expected} for {width}x{height}",
            bgra.len()
        )));
    }

    writer.write_all(&SIGNATURE)?;

    let mut ihdr = Vec::with_capacity(13);
    ihdr.extend_from_slice(&width.to_be_bytes());
    ihdr.extend_from_slice(&height.to_be_bytes());
    // bit depth, colour type (2 = RGB), compression, filter, interlace
    ihdr.extend_from_slice(&[8, 2, 0, 0, 0]);
    write_chunk(writer, b"IHDR", &ihdr)?;

    write_chunk(writer, b"IDAT", &deflate_scanlines(bgra, width, height, level)?)?;
    write_chunk(writer, b"IEND", &[])?;
    Ok(())
}

/// Encodes and writes the PNG to `path` through a buffered writer.
pub fn save<P: AsRef<Path>>(path: P, bgra: &[u8], size: (u32, u32), level: u32) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_to(&mut writer, bgra, size, level)?;
    writer.flush()?;
    Ok(())
}

/// Filters and compresses the scanlines in a single sequential pass over
/// the BGRA source: per row, one filter byte (0 = None) followed by the
/// row converted to RGB.
fn deflate_scanlines(bgra: &[u8], width: u32, height: u32, level: u32) -> Result<Vec<u8>> {
    let src_row = width as usize * 4;
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level));
    let mut row = vec![0u8; 1 + width as usize * 3];
    for y in 0..height as usize {
        let src = &bgra[y * src_row..(y + 1) * src_row];
        row[0] = 0;
        for (dst, px) in row[1..].chunks_exact_mut(3).zip(src.chunks_exact(4)) {
            dst[0] = px[2];
            dst[1] = px[1];
            dst[2] = px[0];
        }
        encoder.write_all(&row)?;
    }
    Ok(encoder.finish()?)
}

fn write_chunk<W: Write>(writer: &mut W, kind: &[u8; 4], data: &[u8]) -> Result<()> {
    writer.write_all(&(data.len() as u32).to_be_bytes())?;
    writer.write_all(kind)?;
    writer.write_all(data)?;
    let mut crc = Crc32::new();
    crc.update(kind);
    crc.update(data);
    writer.write_all(&crc.finish().to_be_bytes())?;
    Ok(())
}

/// CRC-32 (ISO 3309) over the chunk type and data, as PNG requires.
struct Crc32 {
    value: u32,
}

impl Crc32 {
    fn new() -> Self {
        Self { value: 0xFFFF_FFFF }
    }

    fn update(&mut self, data: &[u8]) {
        for &byte in data {
            let idx = ((self.value ^ byte as u32) & 0xFF) as usize;
            self.value = CRC_TABLE[idx] ^ (self.value >> 8);
        }
    }

    fn finish(self) -> u32 {
        self.value ^ 0xFFFF_FFFF
    }
}

const CRC_TABLE: [u32; 256] = build_crc_table();

const fn build_crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut n = 0;
    while n < 256 {
        let mut c = n as u32;
        let mut k = 0;
        while k < 8 {
            c = if c & 1 != 0 {
                0xEDB8_8320 ^ (c >> 1)
            } else {
                c >> 1
            };
            k += 1;
        }
        table[n] = c;
        n += 1;
    }
    table
}
