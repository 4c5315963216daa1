// Copyright (c) The spoon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::RawImageError;
use camino::Utf8Path;
use std::{fs::File, io::BufWriter};

/// The pixel layout of a raw framebuffer capture.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PixelFormat {
    /// 32 bits per pixel, red first.
    Rgba8888,
    /// 32 bits per pixel, red first, alpha ignored.
    Rgbx8888,
    /// 24 bits per pixel.
    Rgb888,
    /// 16 bits per pixel, little-endian 5-6-5.
    Rgb565,
    /// 32 bits per pixel, blue first.
    Bgra8888,
}

impl PixelFormat {
    /// Maps the numeric format reported in a framebuffer header.
    pub fn from_code(code: u32) -> Result<Self, RawImageError> {
        match code {
            1 => Ok(Self::Rgba8888),
            2 => Ok(Self::Rgbx8888),
            3 => Ok(Self::Rgb888),
            4 => Ok(Self::Rgb565),
            5 => Ok(Self::Bgra8888),
            other => Err(RawImageError::UnsupportedFormat(other)),
        }
    }

    /// Returns the number of bytes used by a single pixel.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgba8888 | Self::Rgbx8888 | Self::Bgra8888 => 4,
            Self::Rgb888 => 3,
            Self::Rgb565 => 2,
        }
    }
}

/// An uncompressed screen capture.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RawImage {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Layout of `data`.
    pub format: PixelFormat,
    /// Pixel data, row-major with no padding.
    pub data: Vec<u8>,
}

impl RawImage {
    /// Parses the output of `screencap` without `-p`: a little-endian header of width, height and
    /// pixel format (optionally followed by a color space word) and then the pixel data.
    pub fn from_screencap(bytes: &[u8]) -> Result<Self, RawImageError> {
        let word = |index: usize| -> Result<u32, RawImageError> {
            let start = index * 4;
            bytes
                .get(start..start + 4)
                .and_then(|slice| slice.try_into().ok())
                .map(u32::from_le_bytes)
                .ok_or_else(|| {
                    RawImageError::InvalidHeader(format!("only {} bytes available", bytes.len()))
                })
        };

        let width = word(0)?;
        let height = word(1)?;
        let format = PixelFormat::from_code(word(2)?)?;
        let expected = width as usize * height as usize * format.bytes_per_pixel();

        // Newer devices append a color space word to the header.
        let header_len = [12usize, 16]
            .into_iter()
            .find(|header_len| bytes.len().checked_sub(*header_len) == Some(expected))
            .ok_or(RawImageError::Truncated {
                expected: expected + 12,
                actual: bytes.len(),
            })?;

        Ok(Self {
            width,
            height,
            format,
            data: bytes[header_len..].to_vec(),
        })
    }

    /// Converts the pixel data to 8-bit RGBA. Alpha is always opaque.
    pub fn to_rgba8(&self) -> Vec<u8> {
        let pixel_count = self.width as usize * self.height as usize;
        let mut out = Vec::with_capacity(pixel_count * 4);
        let bpp = self.format.bytes_per_pixel();
        for pixel in self.data.chunks_exact(bpp) {
            let [r, g, b] = match self.format {
                PixelFormat::Rgba8888 | PixelFormat::Rgbx8888 | PixelFormat::Rgb888 => {
                    [pixel[0], pixel[1], pixel[2]]
                }
                PixelFormat::Bgra8888 => [pixel[2], pixel[1], pixel[0]],
                PixelFormat::Rgb565 => {
                    let value = u16::from_le_bytes([pixel[0], pixel[1]]);
                    let r = ((value >> 11) & 0x1f) as u8;
                    let g = ((value >> 5) & 0x3f) as u8;
                    let b = (value & 0x1f) as u8;
                    [(r << 3) | (r >> 2), (g << 2) | (g >> 4), (b << 3) | (b >> 2)]
                }
            };
            out.extend_from_slice(&[r, g, b, 0xff]);
        }
        out
    }

    /// Encodes the image as a PNG file.
    pub fn write_png(&self, path: &Utf8Path) -> Result<(), RawImageError> {
        let file = File::create(path).map_err(RawImageError::Io)?;
        let mut encoder = png::Encoder::new(BufWriter::new(file), self.width, self.height);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header().map_err(RawImageError::Encode)?;
        writer
            .write_image_data(&self.to_rgba8())
            .map_err(RawImageError::Encode)?;
        writer.finish().map_err(RawImageError::Encode)
    }
}
