//! Frame annotation and JPEG encoding

use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};

use super::detection::{BackendKind, Detection};
use crate::constants::camera as cam;
use crate::error::{Result, SmartHomeError};

const MODEL_BOX: Rgb<u8> = Rgb([50, 205, 50]);
const CASCADE_BOX: Rgb<u8> = Rgb([255, 0, 0]);

pub fn box_color(kind: BackendKind) -> Rgb<u8> {
    match kind {
        BackendKind::Cascade => CASCADE_BOX,
        _ => MODEL_BOX,
    }
}

/// Outline `det` on `frame`, clipped to the frame bounds
pub fn draw_box(frame: &mut RgbImage, det: &Detection, color: Rgb<u8>, thickness: u32) {
    let (w, h) = frame.dimensions();
    if w == 0 || h == 0 || det.x >= w || det.y >= h {
        return;
    }

    let x0 = det.x;
    let y0 = det.y;
    let x1 = det.x.saturating_add(det.width).min(w - 1);
    let y1 = det.y.saturating_add(det.height).min(h - 1);

    for t in 0..thickness {
        for x in x0..=x1 {
            if let Some(y) = y0.checked_add(t).filter(|y| *y <= y1) {
                frame.put_pixel(x, y, color);
            }
            if let Some(y) = y1.checked_sub(t).filter(|y| *y >= y0) {
                frame.put_pixel(x, y, color);
            }
        }
        for y in y0..=y1 {
            if let Some(x) = x0.checked_add(t).filter(|x| *x <= x1) {
                frame.put_pixel(x, y, color);
            }
            if let Some(x) = x1.checked_sub(t).filter(|x| *x >= x0) {
                frame.put_pixel(x, y, color);
            }
        }
    }
}

/// Caption drawn above a box: model confidence as a percentage, or the
/// cascade name. Nothing for a disabled backend.
pub fn label(kind: BackendKind, det: &Detection) -> Option<String> {
    match kind {
        BackendKind::Accelerated(_) => Some(format!("DNN: {:.0}%", det.confidence * 100.0)),
        BackendKind::Cascade => Some("Haar".to_string()),
        BackendKind::None => None,
    }
}

const GLYPH_WIDTH: u32 = 5;
const GLYPH_HEIGHT: u32 = 7;
const GLYPH_ADVANCE: u32 = GLYPH_WIDTH + 1;
const LABEL_GAP: u32 = 2;

/// 5x7 rows, bit 4 is the leftmost column. Covers the caption alphabet only.
fn glyph(c: char) -> Option<[u8; 7]> {
    let rows = match c {
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        'N' => [0x11, 0x19, 0x15, 0x13, 0x11, 0x11, 0x11],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'a' => [0x00, 0x00, 0x0E, 0x01, 0x0F, 0x11, 0x0F],
        'r' => [0x00, 0x00, 0x16, 0x19, 0x10, 0x10, 0x10],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        '%' => [0x18, 0x19, 0x02, 0x04, 0x08, 0x13, 0x03],
        ' ' => [0x00; 7],
        _ => return None,
    };
    Some(rows)
}

/// Render `text` with its top-left corner at (`x`, `y`), clipped to the frame.
/// Characters outside the caption alphabet leave a blank cell.
pub fn draw_text(frame: &mut RgbImage, x: u32, y: u32, text: &str, color: Rgb<u8>) {
    let (w, h) = frame.dimensions();
    for (i, c) in text.chars().enumerate() {
        let Some(rows) = glyph(c) else { continue };
        let Some(left) = (i as u32).checked_mul(GLYPH_ADVANCE).and_then(|dx| x.checked_add(dx)) else {
            return;
        };
        for (dy, bits) in rows.iter().enumerate() {
            let py = y.saturating_add(dy as u32);
            if py >= h {
                break;
            }
            for dx in 0..GLYPH_WIDTH {
                let px = left + dx;
                if px < w && bits & (0x10 >> dx) != 0 {
                    frame.put_pixel(px, py, color);
                }
            }
        }
    }
}

/// Where the caption goes: above the box, or just inside it at the top edge
fn label_origin(det: &Detection) -> (u32, u32) {
    let y = det
        .y
        .checked_sub(GLYPH_HEIGHT + LABEL_GAP)
        .unwrap_or(det.y + cam::BOX_THICKNESS + LABEL_GAP);
    (det.x, y)
}

pub fn annotate(frame: &mut RgbImage, kind: BackendKind, detections: &[Detection]) {
    let color = box_color(kind);
    for det in detections {
        draw_box(frame, det, color, cam::BOX_THICKNESS);
        if let Some(text) = label(kind, det) {
            let (x, y) = label_origin(det);
            draw_text(frame, x, y, &text, color);
        }
    }
}

pub fn encode_jpeg(frame: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut out, quality);
    frame
        .write_with_encoder(encoder)
        .map_err(|e| SmartHomeError::Encode(e.to_string()))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_box_outline_only() {
        let mut frame = RgbImage::new(20, 20);
        let det = Detection { x: 2, y: 2, width: 10, height: 10, confidence: 1.0 };
        draw_box(&mut frame, &det, CASCADE_BOX, 1);

        assert_eq!(*frame.get_pixel(2, 2), CASCADE_BOX);
        assert_eq!(*frame.get_pixel(12, 12), CASCADE_BOX);
        assert_eq!(*frame.get_pixel(7, 2), CASCADE_BOX);
        assert_eq!(*frame.get_pixel(7, 7), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_box_clipped_to_frame() {
        let mut frame = RgbImage::new(8, 8);
        let det = Detection { x: 4, y: 4, width: 100, height: 100, confidence: 0.9 };
        draw_box(&mut frame, &det, MODEL_BOX, 2);
        assert_eq!(*frame.get_pixel(7, 7), MODEL_BOX);

        let outside = Detection { x: 50, y: 50, width: 5, height: 5, confidence: 0.9 };
        draw_box(&mut frame, &outside, MODEL_BOX, 2);
    }

    #[test]
    fn test_labels_per_backend() {
        let det = Detection { x: 0, y: 0, width: 10, height: 10, confidence: 0.87 };
        let model = BackendKind::Accelerated(crate::camera::detection::AccelTarget::Cpu);
        assert_eq!(label(model, &det).as_deref(), Some("DNN: 87%"));
        assert_eq!(label(BackendKind::Cascade, &det).as_deref(), Some("Haar"));
        assert_eq!(label(BackendKind::None, &det), None);
    }

    #[test]
    fn test_draw_text_renders_glyph_pixels() {
        let mut frame = RgbImage::new(12, 8);
        draw_text(&mut frame, 0, 0, "H", CASCADE_BOX);

        // left stem, crossbar, right stem
        assert_eq!(*frame.get_pixel(0, 0), CASCADE_BOX);
        assert_eq!(*frame.get_pixel(2, 3), CASCADE_BOX);
        assert_eq!(*frame.get_pixel(4, 6), CASCADE_BOX);
        assert_eq!(*frame.get_pixel(2, 0), Rgb([0, 0, 0]));
        // nothing past the glyph cell
        assert_eq!(*frame.get_pixel(6, 3), Rgb([0, 0, 0]));

        // clipped at the frame edge
        draw_text(&mut frame, 10, 4, "DNN: 99%", MODEL_BOX);
    }

    #[test]
    fn test_annotate_puts_caption_above_box() {
        let mut frame = RgbImage::new(64, 48);
        let det = Detection { x: 10, y: 20, width: 30, height: 20, confidence: 1.0 };
        annotate(&mut frame, BackendKind::Cascade, &[det]);

        // "H" of "Haar" starts at (10, 20 - 7 - 2); its top-left pixel is set
        assert_eq!(*frame.get_pixel(10, 11), CASCADE_BOX);
        // box outline still present
        assert_eq!(*frame.get_pixel(25, 20), CASCADE_BOX);
    }

    #[test]
    fn test_caption_moves_inside_at_top_edge() {
        let det = Detection { x: 3, y: 2, width: 10, height: 10, confidence: 1.0 };
        assert_eq!(label_origin(&det), (3, 2 + cam::BOX_THICKNESS + LABEL_GAP));
        let lower = Detection { y: 30, ..det };
        assert_eq!(label_origin(&lower), (3, 21));
    }

    #[test]
    fn test_encode_produces_jpeg() {
        let frame = RgbImage::from_pixel(64, 48, Rgb([120, 60, 30]));
        let jpeg = encode_jpeg(&frame, 70).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);
    }
}
