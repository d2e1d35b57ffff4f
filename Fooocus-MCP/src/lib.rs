//! # fooocus-mcp
//!
//! MCP tool server that drives a local [Fooocus-API] backend on behalf of an
//! AI assistant.
//!
//! ## Features
//!
//! - Text-to-image and image-variation jobs through one orchestrator
//! - Reject-at-capacity admission control over in-flight jobs
//! - On-demand backend start (single-flight) and idle shutdown
//! - Result images and JSON sidecar metadata written to an output directory
//! - Style catalogue, output browsing and backend management tools
//!
//! ## Quick Start
//!
//! 1. Build a [`ServerConfig`] (usually [`ServerConfig::from_env()`])
//! 2. Wrap a [`FooocusBackend`] and an [`OutputStore`] in a [`JobOrchestrator`]
//! 3. Call [`JobOrchestrator::generate()`], or serve the [`ToolSurface`] over
//!    stdio with the `fooocus-mcp` binary
//!
//! ```no_run
//! use fooocus_mcp::{FooocusBackend, GenerationRequest, JobOrchestrator, OutputStore,
//!     ServerConfig};
//! use std::sync::Arc;
//!
//! # async fn example() -> fooocus_mcp::Result<()> {
//! let config = ServerConfig::from_env();
//! let backend = FooocusBackend::from_config(&config);
//! let store = OutputStore::new(&config.output_dir, config.subdir_per_job);
//! let orchestrator = Arc::new(JobOrchestrator::from_config(backend, store, &config));
//!
//! let request = GenerationRequest::new("a red fox in snow")
//!     .with_num_images(2.0)
//!     .with_aspect_ratio("portrait");
//! let result = orchestrator.generate(request).await?;
//! for image in &result.images {
//!     println!("{} (seed {:?})", image.path.display(), image.seed);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! [Fooocus-API]: https://github.com/mrhan1993/Fooocus-API

pub mod backend;
pub mod config;
pub mod error;
pub mod logging;
pub mod mcp;
pub mod orchestrator;
pub mod registry;
pub mod request;
pub mod store;
pub mod styles;
pub mod tools;
pub mod types;

pub use backend::FooocusBackend;
pub use config::{ServerConfig, ServerConfigBuilder};
pub use error::{GenerationError, Result};
pub use orchestrator::{JobOrchestrator, OrchestratorSettings};
pub use registry::{ActiveJob, ActiveJobRegistry, JobSlot};
pub use request::RequestLimits;
pub use store::OutputStore;
pub use tools::{ToolResponse, ToolSurface};
pub use types::{
    GenerationRequest, GenerationResult, ImageEntry, ImageMetadata, NormalizedRequest,
    SavedImage, SortOrder,
};

use fooocus_rs::{GeneratedImage, JobPayload, JobSnapshot, StartOutcome, StopOutcome};
use std::future::Future;

/// Reachability and process state reported by `server_status`.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendStatus {
    pub endpoint: String,
    pub reachable: bool,
    /// Pid of the child this server launched, if any.
    pub managed_pid: Option<u32>,
    /// Whether an install path is configured for auto-start.
    pub can_launch: bool,
}

/// The image-generation backend as seen by the orchestrator.
///
/// [`FooocusBackend`] is the production implementation; tests plug in an
/// in-memory fake.
pub trait GenerationBackend: Send + Sync + 'static {
    /// Bounded health probe. Never fails.
    fn is_up(&self) -> impl Future<Output = bool> + Send;

    /// Idempotent, single-flight start.
    fn start(&self) -> impl Future<Output = fooocus_rs::Result<StartOutcome>> + Send;

    /// Graceful then forced stop. Already stopped is success.
    fn stop(&self) -> impl Future<Output = fooocus_rs::Result<StopOutcome>> + Send;

    fn status(&self) -> impl Future<Output = BackendStatus> + Send;

    /// Submit a job and return the backend's job id.
    fn submit(&self, payload: &JobPayload)
        -> impl Future<Output = fooocus_rs::Result<String>> + Send;

    /// One status poll. Transport failures come back as transient snapshots.
    fn poll(&self, job_id: &str) -> impl Future<Output = JobSnapshot> + Send;

    /// Fetch or decode the bytes of one result image.
    fn image_bytes(
        &self,
        image: &GeneratedImage,
    ) -> impl Future<Output = fooocus_rs::Result<Vec<u8>>> + Send;
}
