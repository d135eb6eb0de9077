//! Detection overlay drawing on the cloned display frame

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use crate::detect::Detection;

/// Box colors cycled by class id
const COLORS: [[u8; 3]; 19] = [
    [244, 67, 54],
    [233, 30, 99],
    [156, 39, 176],
    [103, 58, 183],
    [63, 81, 181],
    [33, 150, 243],
    [3, 169, 244],
    [0, 188, 212],
    [0, 150, 136],
    [76, 175, 80],
    [139, 195, 74],
    [205, 220, 57],
    [255, 235, 59],
    [255, 193, 7],
    [255, 152, 0],
    [255, 87, 34],
    [121, 85, 72],
    [158, 158, 158],
    [96, 125, 139],
];

const BORDER_THICKNESS: i32 = 2;
const TAG_HEIGHT: u32 = 6;

/// Draw bounding boxes and a small class-colored tag bar onto the frame
pub fn draw_detections(img: &mut RgbImage, detections: &[Detection]) {
    let (w, h) = (img.width() as i32, img.height() as i32);

    for det in detections {
        let color = Rgb(COLORS[det.class_id % COLORS.len()]);

        let x = det.bbox.x as i32;
        let y = det.bbox.y as i32;
        let bw = det.bbox.width as u32;
        let bh = det.bbox.height as u32;
        if bw == 0 || bh == 0 {
            continue;
        }

        // Inset borders so the outline stays at the same visual weight
        for inset in 0..BORDER_THICKNESS {
            let rw = bw.saturating_sub(2 * inset as u32);
            let rh = bh.saturating_sub(2 * inset as u32);
            if rw == 0 || rh == 0 {
                break;
            }
            draw_hollow_rect_mut(img, Rect::at(x + inset, y + inset).of_size(rw, rh), color);
        }

        // Tag bar sits above the box, pushed inside the frame when clipped
        let tag_w = bw.min(w as u32 / 4).max(1);
        let tag_y = (y - TAG_HEIGHT as i32).max(0);
        let tag_x = x.clamp(0, (w - tag_w as i32).max(0));
        if tag_y < h {
            draw_filled_rect_mut(img, Rect::at(tag_x, tag_y).of_size(tag_w, TAG_HEIGHT), color);
        }
    }
}
