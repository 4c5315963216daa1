// Copyright (c) The spoon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Synthesizes looping animated GIFs out of a test's screenshots.

use crate::errors::GifError;
use camino::{Utf8Path, Utf8PathBuf};
use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    time::Duration,
};

/// A decoded frame in 8-bit RGBA.
struct RgbaFrame {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

/// Writes an animated GIF to `output`, with one frame per input image in the order given.
///
/// The logical screen is sized to the largest frame; smaller frames are anchored at the top-left
/// corner. The animation loops forever.
pub(crate) fn write_animated_gif(
    frames: &[Utf8PathBuf],
    output: &Utf8Path,
    frame_delay: Duration,
) -> Result<(), GifError> {
    let decoded = frames
        .iter()
        .map(|path| decode_png(path))
        .collect::<Result<Vec<_>, _>>()?;

    let mut screen_width = 0u16;
    let mut screen_height = 0u16;
    for (frame, path) in decoded.iter().zip(frames) {
        let (Ok(width), Ok(height)) = (u16::try_from(frame.width), u16::try_from(frame.height))
        else {
            return Err(GifError::TooLarge {
                path: path.clone(),
                width: frame.width,
                height: frame.height,
            });
        };
        screen_width = screen_width.max(width);
        screen_height = screen_height.max(height);
    }

    let file = File::create(output).map_err(|error| GifError::Io {
        path: output.to_owned(),
        error,
    })?;
    let encode_err = |error| GifError::Encode {
        path: output.to_owned(),
        error,
    };

    let mut encoder = gif::Encoder::new(BufWriter::new(file), screen_width, screen_height, &[])
        .map_err(encode_err)?;
    encoder.set_repeat(gif::Repeat::Infinite).map_err(encode_err)?;

    let delay = centiseconds(frame_delay);
    for mut frame in decoded {
        // Both dimensions were checked against u16 above.
        let mut gif_frame = gif::Frame::from_rgba_speed(
            frame.width as u16,
            frame.height as u16,
            &mut frame.pixels,
            10,
        );
        gif_frame.delay = delay;
        gif_frame.dispose = gif::DisposalMethod::Background;
        encoder.write_frame(&gif_frame).map_err(encode_err)?;
    }

    let mut writer = encoder.into_inner().map_err(|error| GifError::Io {
        path: output.to_owned(),
        error,
    })?;
    writer.flush().map_err(|error| GifError::Io {
        path: output.to_owned(),
        error,
    })
}

fn centiseconds(delay: Duration) -> u16 {
    u16::try_from(delay.as_millis() / 10).unwrap_or(u16::MAX)
}

fn decode_png(path: &Utf8Path) -> Result<RgbaFrame, GifError> {
    let file = File::open(path).map_err(|error| GifError::Io {
        path: path.to_owned(),
        error,
    })?;
    let decode_err = |error| GifError::Decode {
        path: path.to_owned(),
        error,
    };

    let mut decoder = png::Decoder::new(BufReader::new(file));
    decoder.set_transformations(png::Transformations::normalize_to_color8());
    let mut reader = decoder.read_info().map_err(decode_err)?;
    let mut buf = vec![0; reader.output_buffer_size()];
    let info = reader.next_frame(&mut buf).map_err(decode_err)?;
    buf.truncate(info.buffer_size());

    let pixels = match info.color_type {
        png::ColorType::Rgba => buf,
        png::ColorType::Rgb => buf
            .chunks_exact(3)
            .flat_map(|px| [px[0], px[1], px[2], 0xff])
            .collect(),
        png::ColorType::GrayscaleAlpha => buf
            .chunks_exact(2)
            .flat_map(|px| [px[0], px[0], px[0], px[1]])
            .collect(),
        png::ColorType::Grayscale => buf.iter().flat_map(|&v| [v, v, v, 0xff]).collect(),
        color_type @ png::ColorType::Indexed => {
            return Err(GifError::UnsupportedColor {
                path: path.to_owned(),
                color_type,
            });
        }
    };

    Ok(RgbaFrame {
        width: info.width,
        height: info.height,
        pixels,
    })
}
