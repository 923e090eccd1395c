//! Pixel transforms shared by the backends: rotation, framing, cropping,
//! flattening.
//!
//! Everything works on owned [`RgbaImage`] buffers. A transform consumes or
//! borrows the current buffer and returns a new one; backends swap it in.

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage, Rgba, RgbaImage};
use imageproc::geometric_transformations::{Interpolation, rotate_about_center};

use super::calculations::{ResizePlan, rotated_bounds};

/// Lanczos3 resample with the `image` crate.
pub fn resize_lanczos(img: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    if img.dimensions() == (width, height) {
        return img.clone();
    }
    imageops::resize(img, width, height, FilterType::Lanczos3)
}

/// Put a resized image into its frame, padding with `fill`.
pub fn place_in_frame(img: RgbaImage, plan: &ResizePlan, fill: Rgba<u8>) -> RgbaImage {
    if !plan.needs_padding() {
        return img;
    }
    let mut frame = RgbaImage::from_pixel(plan.frame_width, plan.frame_height, fill);
    imageops::replace(&mut frame, &img, plan.dst_x as i64, plan.dst_y as i64);
    frame
}

/// Rotate clockwise by `degrees`, growing the canvas to fit and filling
/// exposed corners with `fill`.
pub fn rotate_clockwise(img: &RgbaImage, degrees: f64, fill: Rgba<u8>) -> RgbaImage {
    let degrees = degrees.rem_euclid(360.0);
    match degrees {
        d if d == 0.0 => img.clone(),
        d if d == 90.0 => imageops::rotate90(img),
        d if d == 180.0 => imageops::rotate180(img),
        d if d == 270.0 => imageops::rotate270(img),
        d => {
            let (w, h) = img.dimensions();
            let (bw, bh) = rotated_bounds(w, h, d);
            let mut canvas = RgbaImage::from_pixel(bw, bh, fill);
            let x = (bw as i64 - w as i64) / 2;
            let y = (bh as i64 - h as i64) / 2;
            imageops::replace(&mut canvas, img, x, y);
            rotate_about_center(&canvas, d.to_radians() as f32, Interpolation::Bilinear, fill)
        }
    }
}

/// Rotate counter-clockwise by `degrees`.
pub fn rotate_counter_clockwise(img: &RgbaImage, degrees: f64, fill: Rgba<u8>) -> RgbaImage {
    rotate_clockwise(img, 360.0 - degrees.rem_euclid(360.0), fill)
}

/// Cut a `width` x `height` window whose top-left corner is `(left, top)`.
pub fn crop_window(img: &RgbaImage, left: u32, top: u32, width: u32, height: u32) -> RgbaImage {
    imageops::crop_imm(img, left, top, width, height).to_image()
}

/// Composite onto an opaque `background`, dropping alpha.
pub fn flatten(img: &RgbaImage, background: [u8; 3]) -> RgbImage {
    let [br, bg, bb] = background;
    RgbImage::from_fn(img.width(), img.height(), |x, y| {
        let [r, g, b, a] = img.get_pixel(x, y).0;
        let a = a as u32;
        let mix = |fg: u8, bgc: u8| ((fg as u32 * a + bgc as u32 * (255 - a) + 127) / 255) as u8;
        Rgb([mix(r, br), mix(g, bg), mix(b, bb)])
    })
}
