use tracing::warn;

use crate::error::{GenerationError, Result};
use crate::styles::{self, DEFAULT_ASPECT_RATIO, DEFAULT_STYLE, PERFORMANCE_OPTIONS};
use crate::types::{GenerationRequest, NormalizedRequest};

/// Bounds applied while normalizing requests.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestLimits {
    /// Upper bound on images per request. `None` = uncapped.
    pub max_images: Option<u32>,
    /// Performance preset used when the request names none.
    pub default_performance: String,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            max_images: Some(4),
            default_performance: "Speed".to_string(),
        }
    }
}

/// Map an aspect-ratio argument to literal `W*H` dimensions.
///
/// Known aliases resolve case-insensitively. Anything containing `*` is
/// taken as literal dimensions; everything else gets the default.
pub fn resolve_aspect_ratio(input: Option<&str>) -> String {
    let Some(raw) = input.map(str::trim).filter(|s| !s.is_empty()) else {
        return DEFAULT_ASPECT_RATIO.to_string();
    };
    if let Some(dims) = styles::aspect_alias(raw) {
        return dims.to_string();
    }
    if raw.contains('*') {
        return raw.to_string();
    }
    warn!(aspect_ratio = raw, "Unknown aspect ratio, using default {}", DEFAULT_ASPECT_RATIO);
    DEFAULT_ASPECT_RATIO.to_string()
}

/// Floor, lower-bound to 1, then apply the cap.
pub fn clamp_image_count(requested: Option<f64>, max: Option<u32>) -> u32 {
    let raw = requested.unwrap_or(1.0);
    let floored = if raw.is_nan() { 1.0 } else { raw.floor() };
    let mut count = if floored < 1.0 {
        1
    } else if floored >= u32::MAX as f64 {
        u32::MAX
    } else {
        floored as u32
    };
    if let Some(cap) = max {
        count = count.min(cap.max(1));
    }
    count
}

pub fn resolve_performance(input: Option<&str>, default: &str) -> Result<String> {
    match input.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(styles::canonical_performance(default)
            .unwrap_or(default)
            .to_string()),
        Some(raw) => styles::canonical_performance(raw)
            .map(String::from)
            .ok_or_else(|| {
                GenerationError::Validation(format!(
                    "Unknown performance '{}'. Choose one of: {}",
                    raw,
                    PERFORMANCE_OPTIONS.join(", ")
                ))
            }),
    }
}

/// Split comma-separated entries, canonicalize known names, drop duplicates.
fn resolve_styles(input: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for name in input.iter().flat_map(|s| s.split(',')).map(str::trim) {
        if name.is_empty() {
            continue;
        }
        let resolved = match styles::canonical_style(name) {
            Some(canonical) => canonical.to_string(),
            None => {
                warn!(style = name, "Unknown style, passing through to backend");
                name.to_string()
            }
        };
        if !out.iter().any(|s| s.eq_ignore_ascii_case(&resolved)) {
            out.push(resolved);
        }
    }
    if out.is_empty() {
        out.push(DEFAULT_STYLE.to_string());
    }
    out
}

impl GenerationRequest {
    /// Validate and fill defaults. The seed is passed through untouched.
    pub fn normalize(&self, limits: &RequestLimits) -> Result<NormalizedRequest> {
        let prompt = self.prompt.trim();
        if prompt.is_empty() {
            return Err(GenerationError::Validation("prompt must not be empty".into()));
        }

        Ok(NormalizedRequest {
            prompt: prompt.to_string(),
            negative_prompt: self
                .negative_prompt
                .as_deref()
                .map(str::trim)
                .unwrap_or_default()
                .to_string(),
            styles: resolve_styles(&self.styles),
            performance: resolve_performance(
                self.performance.as_deref(),
                &limits.default_performance,
            )?,
            aspect_ratio: resolve_aspect_ratio(self.aspect_ratio.as_deref()),
            image_number: clamp_image_count(self.num_images, limits.max_images),
            seed: self.seed.unwrap_or(-1),
        })
    }
}
