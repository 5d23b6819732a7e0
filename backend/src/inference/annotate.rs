use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use super::Detection;

const PALETTE: [Rgb<u8>; 8] = [
    Rgb([255, 56, 56]),
    Rgb([255, 157, 151]),
    Rgb([255, 112, 31]),
    Rgb([255, 178, 29]),
    Rgb([72, 249, 10]),
    Rgb([26, 147, 52]),
    Rgb([0, 194, 255]),
    Rgb([132, 56, 255]),
];

const LINE_WIDTH: i32 = 3;

pub fn class_color(class_id: usize) -> Rgb<u8> {
    PALETTE[class_id % PALETTE.len()]
}

/// Returns an RGB copy of `image` with a box drawn around every detection.
pub fn draw_detections(image: &DynamicImage, detections: &[Detection]) -> RgbImage {
    let mut canvas = image.to_rgb8();
    let (w, h) = (canvas.width() as i32, canvas.height() as i32);

    for detection in detections {
        let x1 = (detection.bbox.x1.round() as i32).clamp(0, w - 1);
        let y1 = (detection.bbox.y1.round() as i32).clamp(0, h - 1);
        let x2 = (detection.bbox.x2.round() as i32).clamp(0, w - 1);
        let y2 = (detection.bbox.y2.round() as i32).clamp(0, h - 1);
        if x2 <= x1 || y2 <= y1 {
            continue;
        }

        let color = class_color(detection.class_id);
        for offset in 0..LINE_WIDTH {
            let (bw, bh) = (x2 - x1 - 2 * offset, y2 - y1 - 2 * offset);
            if bw <= 0 || bh <= 0 {
                break;
            }
            let rect = Rect::at(x1 + offset, y1 + offset).of_size(bw as u32, bh as u32);
            draw_hollow_rect_mut(&mut canvas, rect, color);
        }
    }
    canvas
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::BoundingBox;

    fn detection(class_id: usize, bbox: BoundingBox) -> Detection {
        Detection {
            class_id,
            label: format!("c{class_id}"),
            confidence: 0.9,
            bbox,
        }
    }

    #[test]
    fn draws_outline_and_leaves_interior() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 40, Rgb([0, 0, 0])));
        let bbox = BoundingBox { x1: 10.0, y1: 10.0, x2: 30.0, y2: 30.0 };

        let annotated = draw_detections(&image, &[detection(2, bbox)]);

        assert_eq!(*annotated.get_pixel(10, 20), class_color(2));
        assert_eq!(*annotated.get_pixel(20, 10), class_color(2));
        assert_eq!(*annotated.get_pixel(20, 20), Rgb([0, 0, 0]));
        assert_eq!(*annotated.get_pixel(2, 2), Rgb([0, 0, 0]));
    }

    #[test]
    fn boxes_outside_the_image_are_clamped() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(20, 20, Rgb([0, 0, 0])));
        let bbox = BoundingBox { x1: -50.0, y1: -50.0, x2: 500.0, y2: 500.0 };

        let annotated = draw_detections(&image, &[detection(0, bbox)]);

        assert_eq!(annotated.dimensions(), (20, 20));
        assert_eq!(*annotated.get_pixel(0, 0), class_color(0));
    }
}
