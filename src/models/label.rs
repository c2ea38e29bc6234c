use serde::{Deserialize, Serialize};

/// Axis-aligned box expressed as fractions of the image dimensions,
/// origin at the top-left corner.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BoundingBox {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// Coordinates rounded to two decimals, scaled to integers so the key
    /// can be hashed. Two boxes with the same key are the same detection.
    /// Exact halves round to even (0.125 -> 12, 0.375 -> 38).
    pub fn rounded_key(&self) -> (i64, i64, i64, i64) {
        let r = |v: f64| (v * 100.0).round_ties_even() as i64;
        (r(self.left), r(self.top), r(self.width), r(self.height))
    }
}

/// One detected object kept on a completed job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectedLabel {
    pub name: String,
    /// Percentage in 0..=100.
    pub confidence: f64,
    pub bounding_box: BoundingBox,
}

impl DetectedLabel {
    /// Caption drawn above the box on the annotated image.
    pub fn caption(&self) -> String {
        format!("{} ({:.1}%)", self.name, self.confidence)
    }
}

/// A label category as returned by the detection service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectorLabel {
    pub name: String,
    pub confidence: f64,
    #[serde(default)]
    pub instances: Vec<DetectorInstance>,
}

/// A located occurrence of a label. Some services emit instances without
/// a box; those are not drawable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectorInstance {
    #[serde(default)]
    pub bounding_box: Option<BoundingBox>,
}
