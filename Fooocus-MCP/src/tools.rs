use fooocus_rs::{StartOutcome, StopOutcome, VaryStrength};
use schemars::JsonSchema;
use serde::Deserialize;
use std::fmt::Write;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::GenerationError;
use crate::orchestrator::JobOrchestrator;
use crate::styles;
use crate::types::{GenerationRequest, GenerationResult, ImageEntry, SortOrder};
use crate::GenerationBackend;

const DEFAULT_BROWSE_LIMIT: usize = 10;
const MAX_BROWSE_LIMIT: usize = 100;

/// Text returned to the host, with the error flag the protocol carries.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResponse {
    pub text: String,
    pub is_error: bool,
}

impl ToolResponse {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
        }
    }
}

impl From<GenerationError> for ToolResponse {
    fn from(err: GenerationError) -> Self {
        let mut text = format!("Error ({}): {}\n\nHint: {}", err.kind(), err, err.hint());
        if err.is_retryable() {
            text.push_str("\nThe same request can be retried later.");
        }
        ToolResponse::error(text)
    }
}

// ── Arguments ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct GenerateImageArgs {
    /// What to draw.
    pub prompt: String,
    /// Things to keep out of the image.
    pub negative_prompt: Option<String>,
    /// Comma-separated style names (see list_styles). Defaults to "Fooocus V2".
    pub style: Option<String>,
    /// Number of images, 1 up to the configured cap.
    pub num_images: Option<f64>,
    /// Seed, or -1 for random.
    pub seed: Option<i64>,
    /// Preset (square, portrait, landscape, wide, tall, ultrawide, 16:9, ...) or literal "W*H".
    pub aspect_ratio: Option<String>,
    /// Speed, Quality, Extreme Speed, Lightning or Hyper-SD.
    pub performance: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct GenerateVariationArgs {
    /// 1-based index into browse_images' newest-first listing.
    pub image_index: usize,
    /// Defaults to the source image's prompt.
    pub prompt: Option<String>,
    pub negative_prompt: Option<String>,
    pub style: Option<String>,
    pub num_images: Option<f64>,
    pub seed: Option<i64>,
    pub aspect_ratio: Option<String>,
    pub performance: Option<String>,
    /// "subtle" (default) or "strong".
    pub strength: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct BrowseImagesArgs {
    /// How many images to list (default 10).
    pub limit: Option<usize>,
    /// "newest" (default) or "oldest".
    pub sort_by: Option<String>,
    /// Also open the output folder in the system file browser.
    pub open_folder: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct ManageBackendArgs {
    /// start, stop, restart or status.
    pub action: String,
}

fn split_styles(style: Option<&str>) -> Vec<String> {
    style
        .map(|s| {
            s.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

impl From<GenerateImageArgs> for GenerationRequest {
    fn from(args: GenerateImageArgs) -> Self {
        GenerationRequest {
            prompt: args.prompt,
            negative_prompt: args.negative_prompt,
            styles: split_styles(args.style.as_deref()),
            num_images: args.num_images,
            seed: args.seed,
            aspect_ratio: args.aspect_ratio,
            performance: args.performance,
        }
    }
}

// ── Tool surface ────────────────────────────────────────────────────

/// The operations exposed to the assistant host.
///
/// Every method returns a [`ToolResponse`]; failures carry `is_error` and a
/// hint instead of propagating.
pub struct ToolSurface<B: GenerationBackend> {
    orchestrator: Arc<JobOrchestrator<B>>,
}

impl<B: GenerationBackend> ToolSurface<B> {
    pub fn new(orchestrator: Arc<JobOrchestrator<B>>) -> Self {
        Self { orchestrator }
    }

    pub fn orchestrator(&self) -> &Arc<JobOrchestrator<B>> {
        &self.orchestrator
    }

    pub async fn generate_image(&self, args: GenerateImageArgs) -> ToolResponse {
        match self.orchestrator.generate(args.into()).await {
            Ok(result) => ToolResponse::ok(render_result(&result, None)),
            Err(e) => e.into(),
        }
    }

    pub async fn generate_variation(&self, args: GenerateVariationArgs) -> ToolResponse {
        let strength = match args.strength.as_deref() {
            None => VaryStrength::Subtle,
            Some(raw) => match VaryStrength::parse(raw) {
                Some(s) => s,
                None => {
                    return GenerationError::Validation(format!(
                        "Unknown strength '{}', use \"subtle\" or \"strong\"",
                        raw
                    ))
                    .into()
                }
            },
        };

        let source = match self.source_image(args.image_index).await {
            Ok(entry) => entry,
            Err(e) => return e.into(),
        };
        let inherited = source.metadata.clone();

        let prompt = args
            .prompt
            .filter(|p| !p.trim().is_empty())
            .or_else(|| inherited.as_ref().map(|m| m.prompt.clone()))
            .unwrap_or_default();
        let mut styles = split_styles(args.style.as_deref());
        if styles.is_empty() {
            styles = inherited.as_ref().map(|m| m.styles.clone()).unwrap_or_default();
        }

        let request = GenerationRequest {
            prompt,
            negative_prompt: args.negative_prompt.or_else(|| {
                inherited
                    .as_ref()
                    .map(|m| m.negative_prompt.clone())
                    .filter(|n| !n.is_empty())
            }),
            styles,
            num_images: args.num_images,
            seed: args.seed,
            aspect_ratio: args.aspect_ratio.or_else(|| {
                inherited
                    .as_ref()
                    .map(|m| m.aspect_ratio.clone())
                    .filter(|a| !a.is_empty())
            }),
            performance: args.performance.or_else(|| {
                inherited
                    .as_ref()
                    .map(|m| m.performance.clone())
                    .filter(|p| !p.is_empty())
            }),
        };

        info!(source = %source.path.display(), ?strength, "Generating variation");
        match self
            .orchestrator
            .generate_variation(request, &source.path, strength)
            .await
        {
            Ok(result) => ToolResponse::ok(render_result(&result, Some(&source.path))),
            Err(e) => e.into(),
        }
    }

    async fn source_image(&self, index: usize) -> Result<ImageEntry, GenerationError> {
        if index == 0 {
            return Err(GenerationError::Validation(
                "image_index is 1-based; use browse_images to see the numbering".into(),
            ));
        }
        let listing = self
            .orchestrator
            .store()
            .list_recent(index, SortOrder::Newest)
            .await?;
        let available = listing.len();
        listing.into_iter().nth(index - 1).ok_or_else(|| {
            GenerationError::Validation(format!(
                "image_index {} is out of range, {} image(s) available",
                index, available
            ))
        })
    }

    pub async fn browse_images(&self, args: BrowseImagesArgs) -> ToolResponse {
        let limit = args
            .limit
            .unwrap_or(DEFAULT_BROWSE_LIMIT)
            .clamp(1, MAX_BROWSE_LIMIT);
        let order = match args.sort_by.as_deref() {
            None => SortOrder::Newest,
            Some(raw) => match SortOrder::parse(raw) {
                Some(order) => order,
                None => {
                    return GenerationError::Validation(format!(
                        "Unknown sort_by '{}', use \"newest\" or \"oldest\"",
                        raw
                    ))
                    .into()
                }
            },
        };

        let store = self.orchestrator.store();
        let (entries, total) = match tokio::try_join!(
            store.list_recent(limit, order),
            store.count_images()
        ) {
            Ok(found) => found,
            Err(e) => return e.into(),
        };
        let mut out = String::new();

        if entries.is_empty() {
            let _ = write!(out, "No images found in {}.", store.root().display());
        } else {
            let _ = writeln!(
                out,
                "Showing {} of {} image(s) in {} ({} first):\n",
                entries.len(),
                total,
                store.root().display(),
                match order {
                    SortOrder::Newest => "newest",
                    SortOrder::Oldest => "oldest",
                }
            );
            for (i, entry) in entries.iter().enumerate() {
                let _ = writeln!(
                    out,
                    "{}. {}  ({}, {})",
                    i + 1,
                    entry.file_name,
                    human_size(entry.size_bytes),
                    entry.modified.format("%Y-%m-%d %H:%M:%S UTC")
                );
                if let Some(meta) = &entry.metadata {
                    let _ = writeln!(out, "   Prompt: {}", meta.prompt);
                    if let Some(seed) = meta.seed {
                        let _ = writeln!(out, "   Seed: {}", seed);
                    }
                }
            }
            if order == SortOrder::Newest {
                let _ = write!(
                    out,
                    "\nUse generate_variation with image_index to vary one of these."
                );
            }
        }

        if args.open_folder.unwrap_or(false) {
            match open_folder(store.root()) {
                Ok(()) => {
                    let _ = write!(
                        out,
                        "\n\nOpened {} in the file browser.",
                        store.root().display()
                    );
                }
                Err(e) => {
                    warn!("Failed to open output folder: {}", e);
                    let _ = write!(out, "\n\nCould not open the output folder: {}", e);
                }
            }
        }

        ToolResponse::ok(out.trim_end().to_string())
    }

    pub fn list_styles(&self) -> ToolResponse {
        ToolResponse::ok(styles::render_catalogue())
    }

    pub async fn manage_backend(&self, args: ManageBackendArgs) -> ToolResponse {
        match args.action.trim().to_ascii_lowercase().as_str() {
            "status" => ToolResponse::ok(self.backend_summary().await),
            "start" => self.start_backend().await,
            "stop" => self.stop_backend().await,
            "restart" => {
                let stopped = self.stop_backend().await;
                if stopped.is_error {
                    return stopped;
                }
                let started = self.start_backend().await;
                ToolResponse {
                    text: format!("{}\n{}", stopped.text, started.text),
                    is_error: started.is_error,
                }
            }
            other => GenerationError::Validation(format!(
                "Unknown action '{}', use start, stop, restart or status",
                other
            ))
            .into(),
        }
    }

    async fn start_backend(&self) -> ToolResponse {
        let backend = self.orchestrator.backend();
        let endpoint = backend.status().await.endpoint;
        match backend.start().await {
            Ok(StartOutcome::AlreadyRunning) => {
                ToolResponse::ok(format!("Fooocus-API is already running at {}.", endpoint))
            }
            Ok(StartOutcome::Started { pid }) => {
                let pid = pid.map(|p| format!(" (pid {})", p)).unwrap_or_default();
                ToolResponse::ok(format!("Started Fooocus-API{} at {}.", pid, endpoint))
            }
            Err(e) => GenerationError::BackendUnavailable(e.to_string()).into(),
        }
    }

    async fn stop_backend(&self) -> ToolResponse {
        let active = self.orchestrator.registry().len();
        if active > 0 {
            return ToolResponse::error(format!(
                "Refusing to stop Fooocus-API while {} job(s) are running. Try again when they finish.",
                active
            ));
        }
        let backend = self.orchestrator.backend();
        match backend.stop().await {
            Ok(StopOutcome::Stopped) => ToolResponse::ok("Fooocus-API stopped."),
            Ok(StopOutcome::NotRunning) => ToolResponse::ok("Fooocus-API is not running."),
            Ok(StopOutcome::ExternallyManaged) => ToolResponse::ok(format!(
                "Fooocus-API at {} was not started by this server; leaving it running.",
                backend.status().await.endpoint
            )),
            Err(e) => ToolResponse::error(format!("Failed to stop Fooocus-API: {}", e)),
        }
    }

    async fn backend_summary(&self) -> String {
        let status = self.orchestrator.backend().status().await;
        let auto = self.orchestrator.settings().auto_manage;
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Backend: {} ({})",
            status.endpoint,
            if status.reachable { "reachable" } else { "not reachable" }
        );
        let _ = writeln!(
            out,
            "Managed process: {}",
            status
                .managed_pid
                .map(|p| format!("pid {}", p))
                .unwrap_or_else(|| "none".into())
        );
        let _ = write!(
            out,
            "Auto-start: {}",
            match (auto, status.can_launch) {
                (true, true) => "enabled",
                (true, false) => "enabled, but FOOOCUS_PATH is not set",
                (false, _) => "disabled",
            }
        );
        out
    }

    pub async fn server_status(&self) -> ToolResponse {
        let orchestrator = &self.orchestrator;
        let store = orchestrator.store();
        let jobs = orchestrator.active_jobs();

        let mut out = String::from("Fooocus MCP server status\n\n");
        out.push_str(&self.backend_summary().await);
        let _ = writeln!(
            out,
            "\nActive jobs: {}/{}",
            jobs.len(),
            orchestrator.registry().capacity()
        );
        for job in &jobs {
            let _ = writeln!(
                out,
                "  - {} [{} {:.0}%] {}s {} \"{}\"",
                job.job_id.as_deref().unwrap_or("(submitting)"),
                job.stage,
                job.progress * 100.0,
                job.elapsed.as_secs(),
                job.kind,
                job.prompt
            );
        }
        match store.count_images().await {
            Ok(count) => {
                let _ = writeln!(
                    out,
                    "Output directory: {} ({} image(s))",
                    store.root().display(),
                    count
                );
            }
            Err(e) => {
                let _ = writeln!(out, "Output directory: {} ({})", store.root().display(), e);
            }
        }
        let _ = write!(
            out,
            "Accepting jobs: {}",
            if orchestrator.is_accepting() { "yes" } else { "no (shutting down)" }
        );
        ToolResponse::ok(out)
    }
}

fn render_result(result: &GenerationResult, source: Option<&Path>) -> String {
    let req = &result.request;
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Generated {} image(s) for job {} in {:.1}s",
        result.images.len(),
        result.job_id,
        result.elapsed.as_secs_f64()
    );
    if let Some(source) = source {
        let _ = writeln!(out, "Variation of: {}", source.display());
    }
    let _ = writeln!(out, "Prompt: {}", req.prompt);
    if !req.negative_prompt.is_empty() {
        let _ = writeln!(out, "Negative prompt: {}", req.negative_prompt);
    }
    let _ = writeln!(
        out,
        "Styles: {} | Performance: {} | Aspect ratio: {}\n",
        req.styles.join(", "),
        req.performance,
        req.aspect_ratio
    );
    for (i, image) in result.images.iter().enumerate() {
        let seed = image
            .seed
            .map(|s| format!("seed {}", s))
            .unwrap_or_else(|| "seed unknown".into());
        if image.downloaded {
            let _ = writeln!(out, "{}. {} ({})", i + 1, image.path.display(), seed);
        } else {
            let _ = writeln!(
                out,
                "{}. download failed, remote copy: {} ({})",
                i + 1,
                image.url.as_deref().unwrap_or("unavailable"),
                seed
            );
        }
    }
    let _ = write!(out, "\nOutput directory: {}", result.output_dir.display());
    out
}

fn human_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    let b = bytes as f64;
    if b >= KB * KB {
        format!("{:.1} MB", b / (KB * KB))
    } else if b >= KB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{} B", bytes)
    }
}

fn open_folder(path: &Path) -> std::io::Result<()> {
    let program = if cfg!(target_os = "macos") {
        "open"
    } else if cfg!(windows) {
        "explorer"
    } else {
        "xdg-open"
    };
    std::process::Command::new(program)
        .arg(path)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .map(|_| ())
}
