use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::collections::HashSet;
use std::io::Cursor;

use crate::models::label::{BoundingBox, DetectedLabel, DetectorLabel};
use crate::services::glyphs::{self, GLYPH_HEIGHT, GLYPH_WIDTH};

const BOX_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const BOX_STROKE: i64 = 3;
const CAPTION_OFFSET: f64 = 15.0;
const CAPTION_SCALE: u32 = 2;

/// Content type of rendered artifacts.
pub const ANNOTATED_CONTENT_TYPE: &str = "image/jpeg";

/// A bounding box mapped onto pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelRect {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

pub fn pixel_rect(bbox: &BoundingBox, width: u32, height: u32) -> PixelRect {
    let w = f64::from(width);
    let h = f64::from(height);
    PixelRect {
        left: bbox.left * w,
        top: bbox.top * h,
        right: (bbox.left + bbox.width) * w,
        bottom: (bbox.top + bbox.height) * h,
    }
}

/// Turn raw detector output into drawable labels: one entry per located
/// instance, instances without a box dropped, repeated boxes collapsed to
/// their first occurrence.
pub fn extract_labels(raw: &[DetectorLabel]) -> Vec<DetectedLabel> {
    let flattened = raw.iter().flat_map(|label| {
        label.instances.iter().filter_map(move |instance| {
            instance.bounding_box.map(|bounding_box| DetectedLabel {
                name: label.name.clone(),
                confidence: label.confidence,
                bounding_box,
            })
        })
    });

    let mut seen = HashSet::new();
    flattened
        .filter(|label| seen.insert(label.bounding_box.rounded_key()))
        .collect()
}

/// Decode `image_bytes`, draw every label, and return the result as JPEG.
pub fn render_annotated(image_bytes: &[u8], labels: &[DetectedLabel]) -> Result<Vec<u8>, AnnotateError> {
    let mut canvas = image::load_from_memory(image_bytes)
        .map_err(AnnotateError::Decode)?
        .to_rgb8();

    draw_labels(&mut canvas, labels);

    let mut out = Vec::new();
    DynamicImage::ImageRgb8(canvas)
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Jpeg)
        .map_err(AnnotateError::Encode)?;
    Ok(out)
}

/// Draw box outlines and captions in place.
pub fn draw_labels(canvas: &mut RgbImage, labels: &[DetectedLabel]) {
    let (width, height) = canvas.dimensions();
    for label in labels {
        let rect = pixel_rect(&label.bounding_box, width, height);
        draw_outline(canvas, &rect);

        let text_top = (rect.top - CAPTION_OFFSET).max(0.0);
        draw_text(canvas, rect.left.round() as i64, text_top.round() as i64, &label.caption());
    }
}

fn draw_outline(canvas: &mut RgbImage, rect: &PixelRect) {
    let max_x = i64::from(canvas.width()) - 1;
    let max_y = i64::from(canvas.height()) - 1;
    let x0 = rect.left.round() as i64;
    let y0 = rect.top.round() as i64;
    let x1 = rect.right.round() as i64;
    let y1 = rect.bottom.round() as i64;

    for inset in 0..BOX_STROKE {
        let (l, t, r, b) = (
            x0.saturating_add(inset),
            y0.saturating_add(inset),
            x1.saturating_sub(inset),
            y1.saturating_sub(inset),
        );
        if l > r || t > b {
            break;
        }
        // Only the visible span is walked; edges off the canvas are skipped by `put`.
        for x in l.max(0)..=r.min(max_x) {
            put(canvas, x, t, BOX_COLOR);
            put(canvas, x, b, BOX_COLOR);
        }
        for y in t.max(0)..=b.min(max_y) {
            put(canvas, l, y, BOX_COLOR);
            put(canvas, r, y, BOX_COLOR);
        }
    }
}

fn draw_text(canvas: &mut RgbImage, x: i64, y: i64, text: &str) {
    let scale = i64::from(CAPTION_SCALE);
    let advance = i64::from(GLYPH_WIDTH + 1) * scale;

    for (i, c) in text.chars().enumerate() {
        let origin_x = x.saturating_add(i as i64 * advance);
        if origin_x >= i64::from(canvas.width()) || y >= i64::from(canvas.height()) {
            break;
        }
        for (row, bits) in glyphs::glyph(c).iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if bits & (1 << (GLYPH_WIDTH - 1 - col)) == 0 {
                    continue;
                }
                for dy in 0..scale {
                    for dx in 0..scale {
                        put(
                            canvas,
                            origin_x + i64::from(col) * scale + dx,
                            y + row as i64 * scale + dy,
                            TEXT_COLOR,
                        );
                    }
                }
            }
        }
    }
}

/// Height in pixels of a rendered caption line.
pub fn caption_height() -> u32 {
    GLYPH_HEIGHT * CAPTION_SCALE
}

fn put(canvas: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
    if x < 0 || y < 0 || x >= i64::from(canvas.width()) || y >= i64::from(canvas.height()) {
        return;
    }
    canvas.put_pixel(x as u32, y as u32, color);
}

#[derive(Debug, thiserror::Error)]
pub enum AnnotateError {
    #[error("Source image could not be decoded: {0}")]
    Decode(image::ImageError),

    #[error("Annotated image could not be encoded: {0}")]
    Encode(image::ImageError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::label::DetectorInstance;

    fn raw(name: &str, confidence: f64, boxes: &[Option<BoundingBox>]) -> DetectorLabel {
        DetectorLabel {
            name: name.to_string(),
            confidence,
            instances: boxes
                .iter()
                .map(|b| DetectorInstance { bounding_box: *b })
                .collect(),
        }
    }

    fn label(name: &str, bbox: BoundingBox) -> DetectedLabel {
        DetectedLabel {
            name: name.to_string(),
            confidence: 95.0,
            bounding_box: bbox,
        }
    }

    #[test]
    fn test_pixel_rect_mapping() {
        let rect = pixel_rect(&BoundingBox::new(0.1, 0.2, 0.3, 0.4), 200, 100);
        assert!((rect.left - 20.0).abs() < 1e-9);
        assert!((rect.top - 20.0).abs() < 1e-9);
        assert!((rect.right - 80.0).abs() < 1e-9);
        assert!((rect.bottom - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_extract_drops_labels_without_boxes() {
        let labels = extract_labels(&[
            raw("Outdoors", 99.0, &[]),
            raw("Person", 97.5, &[None, Some(BoundingBox::new(0.5, 0.5, 0.2, 0.2))]),
        ]);
        assert_eq!(labels.len(), 1);
        assert_eq!(labels[0].name, "Person");
        assert_eq!(labels[0].confidence, 97.5);
    }

    #[test]
    fn test_extract_keeps_every_instance_in_order() {
        let labels = extract_labels(&[
            raw(
                "Car",
                90.0,
                &[
                    Some(BoundingBox::new(0.0, 0.0, 0.1, 0.1)),
                    Some(BoundingBox::new(0.5, 0.5, 0.1, 0.1)),
                ],
            ),
            raw("Tree", 80.0, &[Some(BoundingBox::new(0.7, 0.1, 0.2, 0.6))]),
        ]);
        let names: Vec<_> = labels.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, ["Car", "Car", "Tree"]);
    }

    #[test]
    fn test_extract_dedups_rounded_boxes_keeping_first() {
        let labels = extract_labels(&[
            raw("Dog", 95.0, &[Some(BoundingBox::new(0.101, 0.2, 0.3, 0.4))]),
            raw("Pet", 94.0, &[Some(BoundingBox::new(0.099, 0.2, 0.3, 0.4))]),
            raw("Animal", 93.0, &[Some(BoundingBox::new(0.2, 0.2, 0.3, 0.4))]),
        ]);
        let names: Vec<_> = labels.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, ["Dog", "Animal"]);
    }

    #[test]
    fn test_draw_outline_on_box_edges() {
        let mut canvas = RgbImage::new(100, 100);
        draw_labels(&mut canvas, &[label("Dog", BoundingBox::new(0.1, 0.2, 0.3, 0.4))]);

        // Box spans x 10..=40, y 20..=60 with a 3px inward stroke.
        assert_eq!(*canvas.get_pixel(10, 40), BOX_COLOR);
        assert_eq!(*canvas.get_pixel(12, 40), BOX_COLOR);
        assert_eq!(*canvas.get_pixel(40, 40), BOX_COLOR);
        assert_eq!(*canvas.get_pixel(25, 60), BOX_COLOR);
        assert_eq!(*canvas.get_pixel(25, 40), Rgb([0, 0, 0]));
        assert_eq!(*canvas.get_pixel(13, 40), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_caption_sits_above_box() {
        let mut canvas = RgbImage::new(200, 100);
        draw_labels(&mut canvas, &[label("Dog", BoundingBox::new(0.1, 0.4, 0.3, 0.4))]);

        // Box top at y=40, caption starts at y=25; 'D' sets its top-left pixel.
        assert_eq!(*canvas.get_pixel(20, 25), TEXT_COLOR);
        let caption_rows = 25..25 + caption_height();
        let white_outside = (0..100)
            .filter(|y| !caption_rows.contains(y))
            .any(|y| (0..200).any(|x| *canvas.get_pixel(x, y) == TEXT_COLOR));
        assert!(!white_outside);
    }

    #[test]
    fn test_caption_clamped_to_image_top() {
        let mut canvas = RgbImage::new(100, 100);
        draw_labels(&mut canvas, &[label("Dog", BoundingBox::new(0.1, 0.05, 0.3, 0.4))]);
        assert_eq!(*canvas.get_pixel(10, 0), TEXT_COLOR);
    }

    #[test]
    fn test_boxes_past_the_edge_are_clipped() {
        let mut canvas = RgbImage::new(50, 50);
        draw_labels(&mut canvas, &[label("Wide", BoundingBox::new(0.8, 0.8, 0.5, 0.5))]);
        assert_eq!(*canvas.get_pixel(40, 45), BOX_COLOR);
    }

    #[test]
    fn test_huge_box_is_drawn_within_canvas_only() {
        let mut canvas = RgbImage::new(40, 40);
        draw_labels(&mut canvas, &[label("Huge", BoundingBox::new(0.5, 0.9, 1e9, 1e9))]);

        // Left and top edges start at (20, 36); right and bottom are far off-canvas.
        assert_eq!(*canvas.get_pixel(20, 39), BOX_COLOR);
        assert_eq!(*canvas.get_pixel(39, 38), BOX_COLOR);
        assert_eq!(*canvas.get_pixel(39, 39), Rgb([0, 0, 0]));
        assert_eq!(*canvas.get_pixel(19, 38), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_box_entirely_off_canvas_draws_nothing() {
        let mut canvas = RgbImage::new(20, 20);
        draw_outline(
            &mut canvas,
            &pixel_rect(&BoundingBox::new(-1e9, -1e9, 2.0, 2.0), 20, 20),
        );
        assert!(canvas.pixels().all(|p| *p != BOX_COLOR));
    }

    #[test]
    fn test_render_annotated_outputs_jpeg_of_same_size() {
        let mut source = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::new(64, 48))
            .write_to(&mut Cursor::new(&mut source), ImageFormat::Png)
            .unwrap();

        let out = render_annotated(&source, &[label("Dog", BoundingBox::new(0.1, 0.2, 0.3, 0.4))]).unwrap();

        assert_eq!(image::guess_format(&out).unwrap(), ImageFormat::Jpeg);
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 48));
    }

    #[test]
    fn test_render_annotated_rejects_non_image() {
        let err = render_annotated(b"definitely not an image", &[]).unwrap_err();
        assert!(matches!(err, AnnotateError::Decode(_)));
    }
}
