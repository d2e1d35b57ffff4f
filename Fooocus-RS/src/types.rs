use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle stage of an asynchronous Fooocus-API job.
///
/// `Pending` and `Running` are live; `Completed` and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStage {
    Pending,
    Running,
    Completed,
    Error,
}

impl JobStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStage::Pending => "PENDING",
            JobStage::Running => "RUNNING",
            JobStage::Completed => "COMPLETED",
            JobStage::Error => "ERROR",
        }
    }

    /// Parse a backend stage string. Accepts both the `PENDING`/`COMPLETED`
    /// and the `WAITING`/`SUCCESS` spellings.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" | "WAITING" | "QUEUED" => Some(JobStage::Pending),
            "RUNNING" => Some(JobStage::Running),
            "COMPLETED" | "SUCCESS" => Some(JobStage::Completed),
            "ERROR" | "FAILED" => Some(JobStage::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One image produced by a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedImage {
    /// Download URL (absolute, or relative to the backend endpoint).
    pub url: Option<String>,
    /// Seed the backend actually used.
    pub seed: Option<i64>,
    /// Inline base64 image data, when the backend was asked to return it.
    pub base64: Option<String>,
}

impl GeneratedImage {
    fn from_json(value: &Value) -> Option<Self> {
        let url = value
            .get("url")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(String::from);
        let base64 = value
            .get("base64")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(String::from);
        if url.is_none() && base64.is_none() {
            return None;
        }
        let seed = value.get("seed").and_then(|v| match v {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        });
        Some(Self { url, seed, base64 })
    }

    /// File extension implied by the URL, defaulting to `png`.
    pub fn extension(&self) -> &str {
        self.url
            .as_deref()
            .and_then(|u| u.split(['?', '#']).next())
            .and_then(|path| path.rsplit_once('.'))
            .map(|(_, ext)| ext)
            .filter(|ext| {
                matches!(
                    ext.to_ascii_lowercase().as_str(),
                    "png" | "jpg" | "jpeg" | "webp"
                )
            })
            .unwrap_or("png")
    }
}

/// Point-in-time view of a job as reported by `query-job`.
///
/// When the status call itself fails (network error, timeout, bad body),
/// the client returns a synthetic snapshot with `stage = Error` and
/// `transient = true` instead of an `Err`, so the caller decides whether
/// to keep polling.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSnapshot {
    pub job_id: String,
    pub stage: JobStage,
    /// Fraction complete, 0.0..=1.0.
    pub progress: f64,
    pub images: Vec<GeneratedImage>,
    pub error: Option<String>,
    /// Set when this snapshot describes a failed status call rather than
    /// a job the backend reported as failed.
    pub transient: bool,
}

impl JobSnapshot {
    /// Build the synthetic snapshot for a failed status call.
    pub fn transient_failure(job_id: &str, description: impl Into<String>) -> Self {
        Self {
            job_id: job_id.to_string(),
            stage: JobStage::Error,
            progress: 0.0,
            images: Vec::new(),
            error: Some(description.into()),
            transient: true,
        }
    }

    /// Parse a `query-job` response body.
    pub fn from_json(job_id: &str, json: &Value) -> Self {
        let raw_stage = json
            .get("job_stage")
            .and_then(|v| v.as_str())
            .unwrap_or("");

        let (stage, mut error) = match JobStage::parse(raw_stage) {
            Some(stage) => (stage, None),
            None => (
                JobStage::Error,
                Some(format!("Unexpected job stage '{}'", raw_stage)),
            ),
        };

        if let Some(msg) = json
            .get("job_error")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
        {
            error = Some(msg.to_string());
        }

        let progress = json
            .get("job_progress")
            .map(normalize_progress)
            .unwrap_or(0.0);

        let images = json
            .get("job_result")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(GeneratedImage::from_json).collect())
            .unwrap_or_default();

        Self {
            job_id: json
                .get("job_id")
                .and_then(|v| v.as_str())
                .unwrap_or(job_id)
                .to_string(),
            stage,
            progress,
            images,
            error,
            transient: false,
        }
    }
}

/// Integers are percentages (Fooocus-API sends 0..100); floats up to 1.0
/// are fractions.
fn normalize_progress(raw: &Value) -> f64 {
    let fraction = if let Some(percent) = raw.as_i64() {
        percent as f64 / 100.0
    } else {
        match raw.as_f64() {
            Some(f) if f > 1.0 => f / 100.0,
            Some(f) => f,
            None => 0.0,
        }
    };
    if fraction.is_finite() {
        fraction.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Response to a successful async submission.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedJob {
    pub job_id: String,
    pub stage: JobStage,
}

/// Request body for `/v1/generation/text-to-image`.
///
/// Field names match the backend's JSON schema exactly.
///
/// # Example
/// ```
/// use fooocus_rs::TextToImageParams;
///
/// let params = TextToImageParams::new("a red fox in snow")
///     .negative("blurry")
///     .aspect_ratio("896*1152")
///     .image_number(2);
///
/// assert_eq!(params.image_seed, -1);
/// assert!(params.async_process);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextToImageParams {
    pub prompt: String,
    pub negative_prompt: String,
    pub style_selections: Vec<String>,
    pub performance_selection: String,
    pub aspect_ratios_selection: String,
    pub image_number: u32,
    /// `-1` lets the backend pick a random seed.
    pub image_seed: i64,
    pub sharpness: f64,
    pub guidance_scale: f64,
    pub async_process: bool,
    pub save_extension: String,
}

impl TextToImageParams {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            negative_prompt: String::new(),
            style_selections: vec!["Fooocus V2".to_string()],
            performance_selection: "Speed".to_string(),
            aspect_ratios_selection: "1152*896".to_string(),
            image_number: 1,
            image_seed: -1,
            sharpness: 2.0,
            guidance_scale: 4.0,
            async_process: true,
            save_extension: "png".to_string(),
        }
    }

    pub fn negative(mut self, prompt: impl Into<String>) -> Self {
        self.negative_prompt = prompt.into();
        self
    }

    pub fn styles(mut self, styles: Vec<String>) -> Self {
        self.style_selections = styles;
        self
    }

    /// Set the performance preset ("Speed", "Quality", "Extreme Speed", ...).
    pub fn performance(mut self, performance: impl Into<String>) -> Self {
        self.performance_selection = performance.into();
        self
    }

    /// Set the output size as a literal `W*H` string.
    pub fn aspect_ratio(mut self, dims: impl Into<String>) -> Self {
        self.aspect_ratios_selection = dims.into();
        self
    }

    pub fn image_number(mut self, n: u32) -> Self {
        self.image_number = n;
        self
    }

    pub fn seed(mut self, seed: i64) -> Self {
        self.image_seed = seed;
        self
    }
}

/// How far a variation may drift from its source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VaryStrength {
    Subtle,
    Strong,
}

impl VaryStrength {
    /// The backend's `uov_method` value.
    pub fn uov_method(&self) -> &'static str {
        match self {
            VaryStrength::Subtle => "Vary (Subtle)",
            VaryStrength::Strong => "Vary (Strong)",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "subtle" | "vary (subtle)" => Some(VaryStrength::Subtle),
            "strong" | "vary (strong)" => Some(VaryStrength::Strong),
            _ => None,
        }
    }
}

/// Request body for `/v2/generation/image-upscale-vary`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariationParams {
    #[serde(flatten)]
    pub base: TextToImageParams,
    pub uov_method: String,
    /// Base64-encoded source image.
    pub input_image: String,
}

impl VariationParams {
    pub fn new(base: TextToImageParams, strength: VaryStrength, input_image: String) -> Self {
        Self {
            base,
            uov_method: strength.uov_method().to_string(),
            input_image,
        }
    }
}

/// A generation job ready to hand to the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum JobPayload {
    TextToImage(TextToImageParams),
    Variation(VariationParams),
}

impl JobPayload {
    /// The shared generation parameters.
    pub fn params(&self) -> &TextToImageParams {
        match self {
            JobPayload::TextToImage(p) => p,
            JobPayload::Variation(v) => &v.base,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            JobPayload::TextToImage(_) => "text-to-image",
            JobPayload::Variation(_) => "variation",
        }
    }
}
