//! # fooocus-rs
//!
//! Async Rust client for [Fooocus-API](https://github.com/mrhan1993/Fooocus-API),
//! the REST wrapper around the Fooocus image generator.
//!
//! Provides a typed client for async job submission and status polling,
//! image download, and a process manager that launches the backend on
//! demand and shuts it down cleanly.
//!
//! ## Quick Start
//!
//! ```no_run
//! use fooocus_rs::{BackendManager, FooocusClient, JobPayload, JobStage, LaunchConfig,
//!     TextToImageParams};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = FooocusClient::new("http://127.0.0.1:8888");
//! let manager = BackendManager::new(
//!     client.clone(),
//!     Some(LaunchConfig::fooocus_api("/opt/Fooocus-API", "python3", 8888)),
//! );
//! manager.start().await?;
//!
//! let params = TextToImageParams::new("a lighthouse at dusk").aspect_ratio("896*1152");
//! let job = client.submit(&JobPayload::TextToImage(params)).await?;
//!
//! loop {
//!     tokio::time::sleep(Duration::from_secs(2)).await;
//!     let snapshot = client.query_job(&job.job_id).await;
//!     if snapshot.stage == JobStage::Completed {
//!         for img in &snapshot.images {
//!             let bytes = client.image_bytes(img).await?;
//!             std::fs::write(format!("seed_{}.png", img.seed.unwrap_or(0)), &bytes)?;
//!         }
//!         break;
//!     }
//!     if snapshot.stage == JobStage::Error && !snapshot.transient {
//!         break;
//!     }
//! }
//!
//! manager.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod process;
pub mod types;

pub use client::FooocusClient;
pub use error::{FooocusError, Result};
pub use process::{BackendManager, LaunchConfig, StartOutcome, StopOutcome};
pub use types::{
    GeneratedImage, JobPayload, JobSnapshot, JobStage, SubmittedJob, TextToImageParams,
    VariationParams, VaryStrength,
};
