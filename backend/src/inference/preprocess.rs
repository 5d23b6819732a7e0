use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, Rgb, RgbImage};
use ndarray::Array4;

pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Gray used to pad letterboxed detector inputs.
const PAD_VALUE: u8 = 114;

/// How a source image was fitted into the square detector input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub source_width: u32,
    pub source_height: u32,
}

impl Letterbox {
    /// Maps a point from model-input space back onto the source image, clamped to its bounds.
    pub fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        let sx = ((x - self.pad_x) / self.scale).clamp(0.0, self.source_width as f32);
        let sy = ((y - self.pad_y) / self.scale).clamp(0.0, self.source_height as f32);
        (sx, sy)
    }
}

/// Resizes with preserved aspect ratio onto a `size`x`size` canvas and returns
/// a `[1, 3, size, size]` tensor scaled to 0..1.
pub fn letterbox(image: &DynamicImage, size: u32) -> (Array4<f32>, Letterbox) {
    let (w, h) = image.dimensions();
    let scale = (size as f32 / w.max(1) as f32).min(size as f32 / h.max(1) as f32);
    let new_w = ((w as f32 * scale).round() as u32).clamp(1, size);
    let new_h = ((h as f32 * scale).round() as u32).clamp(1, size);
    let pad_x = (size - new_w) / 2;
    let pad_y = (size - new_h) / 2;

    let resized = image.resize_exact(new_w, new_h, FilterType::Triangle).to_rgb8();
    let mut canvas = RgbImage::from_pixel(size, size, Rgb([PAD_VALUE; 3]));
    image::imageops::replace(&mut canvas, &resized, pad_x as i64, pad_y as i64);

    let tensor = Array4::from_shape_fn((1, 3, size as usize, size as usize), |(_, c, y, x)| {
        canvas.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
    });
    let meta = Letterbox {
        scale,
        pad_x: pad_x as f32,
        pad_y: pad_y as f32,
        source_width: w,
        source_height: h,
    };
    (tensor, meta)
}

/// Stretches to `size`x`size` and applies ImageNet mean/std normalisation.
pub fn imagenet_tensor(image: &DynamicImage, size: u32) -> Array4<f32> {
    let resized = image.resize_exact(size, size, FilterType::Triangle).to_rgb8();
    Array4::from_shape_fn((1, 3, size as usize, size as usize), |(_, c, y, x)| {
        let v = resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0;
        (v - IMAGENET_MEAN[c]) / IMAGENET_STD[c]
    })
}
