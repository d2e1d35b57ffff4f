use chrono::{DateTime, Utc};
use fooocus_rs::TextToImageParams;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// A generation request as received from a tool call, before normalization.
///
/// Every field except `prompt` is optional; `normalize` fills in defaults
/// and resolves aliases.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub styles: Vec<String>,
    /// Raw count; may be fractional, zero or negative on input.
    pub num_images: Option<f64>,
    /// `-1` asks the backend for a random seed.
    pub seed: Option<i64>,
    pub aspect_ratio: Option<String>,
    pub performance: Option<String>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_negative_prompt(mut self, negative: impl Into<String>) -> Self {
        self.negative_prompt = Some(negative.into());
        self
    }

    pub fn with_styles(mut self, styles: Vec<String>) -> Self {
        self.styles = styles;
        self
    }

    pub fn with_num_images(mut self, n: f64) -> Self {
        self.num_images = Some(n);
        self
    }

    pub fn with_seed(mut self, seed: i64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_aspect_ratio(mut self, aspect: impl Into<String>) -> Self {
        self.aspect_ratio = Some(aspect.into());
        self
    }

    pub fn with_performance(mut self, performance: impl Into<String>) -> Self {
        self.performance = Some(performance.into());
        self
    }
}

/// A validated request. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRequest {
    pub prompt: String,
    pub negative_prompt: String,
    pub styles: Vec<String>,
    pub performance: String,
    /// Literal `W*H` dimensions.
    pub aspect_ratio: String,
    pub image_number: u32,
    pub seed: i64,
}

impl NormalizedRequest {
    /// Backend body for this request.
    pub fn to_params(&self) -> TextToImageParams {
        TextToImageParams::new(self.prompt.clone())
            .negative(self.negative_prompt.clone())
            .styles(self.styles.clone())
            .performance(self.performance.clone())
            .aspect_ratio(self.aspect_ratio.clone())
            .image_number(self.image_number)
            .seed(self.seed)
    }
}

/// Sidecar record written next to every generated image as `<base>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: String,
    /// Seed the backend reported for this image.
    #[serde(default)]
    pub seed: Option<i64>,
    #[serde(default)]
    pub styles: Vec<String>,
    #[serde(default)]
    pub aspect_ratio: String,
    #[serde(default)]
    pub performance: String,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
    #[serde(default)]
    pub job_id: String,
    /// Image the variation was derived from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Local file name, absent when the download failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_file: Option<String>,
}

impl ImageMetadata {
    pub fn new(request: &NormalizedRequest, job_id: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            prompt: request.prompt.clone(),
            negative_prompt: request.negative_prompt.clone(),
            seed: None,
            styles: request.styles.clone(),
            aspect_ratio: request.aspect_ratio.clone(),
            performance: request.performance.clone(),
            created_at: created_at.to_rfc3339(),
            job_id: job_id.to_string(),
            source_image: None,
            image_url: None,
            image_file: None,
        }
    }
}

/// One persisted result image.
#[derive(Debug, Clone, PartialEq)]
pub struct SavedImage {
    /// Where the image was (or would have been) written.
    pub path: PathBuf,
    pub metadata_path: PathBuf,
    pub url: Option<String>,
    pub seed: Option<i64>,
    /// False when only the sidecar could be written.
    pub downloaded: bool,
}

/// Outcome of a completed job.
#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub job_id: String,
    pub images: Vec<SavedImage>,
    pub output_dir: PathBuf,
    pub request: NormalizedRequest,
    pub elapsed: Duration,
}

/// Listing order for stored images.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Newest,
    Oldest,
}

impl SortOrder {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "newest" | "desc" | "recent" => Some(SortOrder::Newest),
            "oldest" | "asc" => Some(SortOrder::Oldest),
            _ => None,
        }
    }
}

/// An image file found in the output directory.
#[derive(Debug, Clone)]
pub struct ImageEntry {
    pub path: PathBuf,
    pub file_name: String,
    pub size_bytes: u64,
    pub modified: DateTime<Utc>,
    pub metadata: Option<ImageMetadata>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalized() -> NormalizedRequest {
        NormalizedRequest {
            prompt: "a red fox".into(),
            negative_prompt: "blurry".into(),
            styles: vec!["Fooocus V2".into()],
            performance: "Speed".into(),
            aspect_ratio: "896*1152".into(),
            image_number: 2,
            seed: -1,
        }
    }

    #[test]
    fn test_to_params_passes_seed_through() {
        let params = normalized().to_params();
        assert_eq!(params.image_seed, -1);
        assert_eq!(params.image_number, 2);
        assert_eq!(params.aspect_ratios_selection, "896*1152");
        assert_eq!(params.negative_prompt, "blurry");
        assert!(params.async_process);
    }

    #[test]
    fn test_metadata_tolerates_missing_fields() {
        let meta: ImageMetadata =
            serde_json::from_str(r#"{"prompt":"x","created_at":"2024-01-01T00:00:00Z"}"#)
                .unwrap();
        assert_eq!(meta.prompt, "x");
        assert!(meta.seed.is_none());
        assert!(meta.styles.is_empty());
    }

    #[test]
    fn test_metadata_skips_empty_optionals() {
        let meta = ImageMetadata::new(&normalized(), "job-1", Utc::now());
        let json = serde_json::to_value(&meta).unwrap();
        assert!(json.get("source_image").is_none());
        assert_eq!(json["job_id"], "job-1");
    }

    #[test]
    fn test_sort_order_parse() {
        assert_eq!(SortOrder::parse("Newest"), Some(SortOrder::Newest));
        assert_eq!(SortOrder::parse("oldest"), Some(SortOrder::Oldest));
        assert_eq!(SortOrder::parse("random"), None);
    }
}
