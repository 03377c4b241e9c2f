//! Synthetic still frames.

use image::codecs::jpeg::JpegEncoder;
use image::{imageops, ColorType, RgbImage};

use picroscopy_core::settings::Mirror;

/// Orientation applied by the sensor to the still it produces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Orientation {
    pub(crate) rotation: i32,
    pub(crate) mirror: Mirror,
}

/// Renders a gradient test card and encodes it as JPEG.
pub(crate) fn test_card(
    (width, height): (u32, u32),
    orientation: Orientation,
    quality: u8,
) -> image::ImageResult<Vec<u8>> {
    let mut frame = RgbImage::from_fn(width, height, |x, y| {
        let r = (x * 255 / width.max(1)) as u8;
        let g = (y * 255 / height.max(1)) as u8;
        image::Rgb([r, g, 128])
    });

    if orientation.mirror.hflip {
        imageops::flip_horizontal_in_place(&mut frame);
    }
    if orientation.mirror.vflip {
        imageops::flip_vertical_in_place(&mut frame);
    }
    let frame = match orientation.rotation.rem_euclid(360) {
        90 => imageops::rotate90(&frame),
        180 => imageops::rotate180(&frame),
        270 => imageops::rotate270(&frame),
        _ => frame,
    };

    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100)).encode(
        frame.as_raw(),
        frame.width(),
        frame.height(),
        ColorType::Rgb8,
    )?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_swaps_dimensions() {
        let jpeg = test_card(
            (64, 32),
            Orientation {
                rotation: 90,
                ..Default::default()
            },
            90,
        )
        .unwrap();
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 64));
    }

    #[test]
    fn produces_a_jpeg_stream() {
        let jpeg = test_card((16, 16), Orientation::default(), 95).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);
    }
}
