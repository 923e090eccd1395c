//! In-memory encoders.
//!
//! Every backend encodes the full output into a buffer before anything is
//! written, so a failed encode never leaves a partial file behind.
//!
//! | Format | Quality | Alpha |
//! |--------|---------|-------|
//! | JPEG | configured value, else encoder default | flattened onto background |
//! | PNG | ignored, best compression | kept when keep-transparency is on |
//! | GIF | none | kept when keep-transparency is on |
//! | WebP | none (lossless) | kept when keep-transparency is on |

use std::io::Cursor;

use image::codecs::gif::GifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::codecs::webp::WebPEncoder;
use image::{DynamicImage, ExtendedColorType, ImageEncoder, RgbaImage};

use super::adapter::AdapterError;
use super::params::{FileType, Quality};
use super::transform::flatten;

/// Encoding settings for one save.
#[derive(Debug, Clone, Copy)]
pub struct EncodeOptions {
    pub quality: Quality,
    pub background: [u8; 3],
    pub keep_transparency: bool,
}

/// Encode `img` as `file_type`.
pub fn encode(img: &RgbaImage, file_type: FileType, opts: EncodeOptions) -> Result<Vec<u8>, AdapterError> {
    let (w, h) = img.dimensions();
    let keep_alpha = opts.keep_transparency && file_type.supports_alpha();
    let mut out = Vec::new();

    let result = match file_type {
        FileType::Jpeg => {
            let rgb = flatten(img, opts.background);
            let writer = Cursor::new(&mut out);
            let encoder = match opts.quality.value() {
                Some(q) => JpegEncoder::new_with_quality(writer, q),
                None => JpegEncoder::new(writer),
            };
            encoder.write_image(rgb.as_raw(), w, h, ExtendedColorType::Rgb8)
        }
        FileType::Png => {
            let encoder = PngEncoder::new_with_quality(
                Cursor::new(&mut out),
                CompressionType::Best,
                FilterType::Adaptive,
            );
            if keep_alpha {
                encoder.write_image(img.as_raw(), w, h, ExtendedColorType::Rgba8)
            } else {
                let rgb = flatten(img, opts.background);
                encoder.write_image(rgb.as_raw(), w, h, ExtendedColorType::Rgb8)
            }
        }
        FileType::Gif => {
            let rgba = opaque_unless(keep_alpha, img, opts.background);
            GifEncoder::new(Cursor::new(&mut out)).encode(rgba.as_raw(), w, h, ExtendedColorType::Rgba8)
        }
        FileType::WebP => {
            let rgba = opaque_unless(keep_alpha, img, opts.background);
            WebPEncoder::new_lossless(Cursor::new(&mut out)).encode(
                rgba.as_raw(),
                w,
                h,
                ExtendedColorType::Rgba8,
            )
        }
    };

    result.map_err(|e| AdapterError::UnsupportedFormat(format!("encoding {file_type:?}: {e}")))?;
    Ok(out)
}

fn opaque_unless(keep_alpha: bool, img: &RgbaImage, background: [u8; 3]) -> RgbaImage {
    if keep_alpha {
        img.clone()
    } else {
        DynamicImage::ImageRgb8(flatten(img, background)).to_rgba8()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn opts(quality: u32, keep_transparency: bool) -> EncodeOptions {
        EncodeOptions {
            quality: Quality::new(quality),
            background: [255, 255, 255],
            keep_transparency,
        }
    }

    fn sample() -> RgbaImage {
        RgbaImage::from_fn(32, 16, |x, y| Rgba([(x * 8) as u8, (y * 16) as u8, 90, 255]))
    }

    #[test]
    fn jpeg_starts_with_soi() {
        let bytes = encode(&sample(), FileType::Jpeg, opts(80, true)).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        let back = image::load_from_memory(&bytes).unwrap();
        assert_eq!((back.width(), back.height()), (32, 16));
    }

    #[test]
    fn jpeg_quality_changes_size() {
        let img = sample();
        let low = encode(&img, FileType::Jpeg, opts(10, true)).unwrap();
        let high = encode(&img, FileType::Jpeg, opts(100, true)).unwrap();
        assert!(low.len() < high.len());
    }

    #[test]
    fn png_ignores_quality() {
        let img = sample();
        let a = encode(&img, FileType::Png, opts(10, true)).unwrap();
        let b = encode(&img, FileType::Png, opts(95, true)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn png_keeps_alpha_when_asked() {
        let img = RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 0]));
        let bytes = encode(&img, FileType::Png, opts(0, true)).unwrap();
        let back = image::load_from_memory(&bytes).unwrap().to_rgba8();
        assert_eq!(back.get_pixel(0, 0)[3], 0);
    }

    #[test]
    fn png_flattens_without_transparency() {
        let img = RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 0]));
        let bytes = encode(&img, FileType::Png, opts(0, false)).unwrap();
        let back = image::load_from_memory(&bytes).unwrap().to_rgba8();
        assert_eq!(back.get_pixel(0, 0).0, [255, 255, 255, 255]);
    }

    #[test]
    fn gif_and_webp_decode_back() {
        for ft in [FileType::Gif, FileType::WebP] {
            let bytes = encode(&sample(), ft, opts(0, true)).unwrap();
            let back = image::load_from_memory(&bytes).unwrap();
            assert_eq!((back.width(), back.height()), (32, 16), "{ft:?}");
        }
    }
}
