//! Local mode: detect objects in an image file and write an annotated copy.
//!
//! Usage:
//!   annotate-local <image_path> [max_labels] [min_confidence]
//!
//! Reads DETECTOR_URL and optionally DETECTOR_API_TOKEN from the environment
//! (or .env). Output goes to `detected_<file name>` next to the input.

use label_detect_jobs::services::annotate;
use label_detect_jobs::services::detector::{HttpLabelDetector, ImageSource, LabelDetector};
use label_detect_jobs::services::intake::{DEFAULT_MAX_LABELS, DEFAULT_MIN_CONFIDENCE};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let image_path = PathBuf::from(args.next().ok_or("usage: annotate-local <image_path> [max_labels] [min_confidence]")?);
    let max_labels = match args.next() {
        Some(v) => v.parse::<i32>()?,
        None => DEFAULT_MAX_LABELS,
    };
    let min_confidence = match args.next() {
        Some(v) => v.parse::<f64>()?,
        None => DEFAULT_MIN_CONFIDENCE,
    };

    let endpoint = std::env::var("DETECTOR_URL")?;
    let token = std::env::var("DETECTOR_API_TOKEN").ok();
    let detector = HttpLabelDetector::new(endpoint, token, Duration::from_secs(30))?;

    let image_bytes = tokio::fs::read(&image_path).await?;
    let raw = detector
        .detect(ImageSource::Bytes(&image_bytes), max_labels, min_confidence)
        .await?;

    let labels = annotate::extract_labels(&raw);
    if labels.is_empty() {
        tracing::warn!(path = %image_path.display(), "No objects with bounding boxes detected");
        return Ok(());
    }

    for label in &labels {
        tracing::info!(
            name = %label.name,
            confidence = label.confidence,
            left = label.bounding_box.left,
            top = label.bounding_box.top,
            width = label.bounding_box.width,
            height = label.bounding_box.height,
            "Detected"
        );
    }

    let rendered = annotate::render_annotated(&image_bytes, &labels)?;
    let output = output_path(&image_path);
    tokio::fs::write(&output, rendered).await?;

    tracing::info!(output = %output.display(), labels = labels.len(), "Annotated image written");
    Ok(())
}

/// `dir/photo.png` -> `dir/detected_photo.jpg` (output is always JPEG).
fn output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    input.with_file_name(format!("detected_{stem}.jpg"))
}
