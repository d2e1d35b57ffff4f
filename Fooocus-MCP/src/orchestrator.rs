use base64::Engine;
use chrono::{Local, Utc};
use fooocus_rs::{
    GeneratedImage, JobPayload, JobSnapshot, JobStage, VariationParams, VaryStrength,
};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::{GenerationError, Result};
use crate::registry::{ActiveJob, ActiveJobRegistry, JobSlot};
use crate::request::RequestLimits;
use crate::store::{image_base_name, OutputStore};
use crate::types::{
    GenerationRequest, GenerationResult, ImageMetadata, NormalizedRequest, SavedImage,
};
use crate::GenerationBackend;

/// Progress is logged each time it crosses another multiple of this.
const PROGRESS_LOG_STEP: f64 = 0.10;

/// Tunables for [`JobOrchestrator`].
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub limits: RequestLimits,
    pub max_concurrent_jobs: usize,
    pub poll_interval: Duration,
    /// Wall-clock limit measured from submission. `None` = no limit.
    pub job_timeout: Option<Duration>,
    /// Consecutive failed polls before the job is abandoned.
    pub max_poll_failures: u32,
    /// Start the backend when a job finds it down.
    pub auto_manage: bool,
    /// Stop a managed backend after this long with no active jobs.
    pub idle_shutdown: Option<Duration>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&ServerConfig::default())
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            limits: RequestLimits {
                max_images: config.max_images,
                default_performance: config.default_performance.clone(),
            },
            max_concurrent_jobs: config.max_concurrent_jobs,
            poll_interval: config.poll_interval,
            job_timeout: config.job_timeout,
            max_poll_failures: config.max_poll_failures.max(1),
            auto_manage: config.auto_manage,
            idle_shutdown: config.idle_shutdown,
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Runs generation jobs end to end.
///
/// Text-to-image and variation jobs share one pipeline: validate, admit,
/// make sure the backend is up, submit, poll until a terminal stage, then
/// persist images and sidecars. The job's registry slot is released on
/// every exit path.
pub struct JobOrchestrator<B: GenerationBackend> {
    backend: Arc<B>,
    store: OutputStore,
    registry: ActiveJobRegistry,
    settings: OrchestratorSettings,
    accepting: AtomicBool,
    idle_timer: Mutex<Option<JoinHandle<()>>>,
    /// Held while the backend is being started or stopped on our behalf.
    backend_gate: Arc<tokio::sync::Mutex<()>>,
}

impl<B: GenerationBackend> JobOrchestrator<B> {
    pub fn new(backend: B, store: OutputStore, settings: OrchestratorSettings) -> Self {
        Self {
            backend: Arc::new(backend),
            store,
            registry: ActiveJobRegistry::new(settings.max_concurrent_jobs),
            settings,
            accepting: AtomicBool::new(true),
            idle_timer: Mutex::new(None),
            backend_gate: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn from_config(backend: B, store: OutputStore, config: &ServerConfig) -> Self {
        Self::new(backend, store, OrchestratorSettings::from_config(config))
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn store(&self) -> &OutputStore {
        &self.store
    }

    pub fn registry(&self) -> &ActiveJobRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn active_jobs(&self) -> Vec<ActiveJob> {
        self.registry.snapshot()
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Run a text-to-image job.
    pub async fn generate(&self, request: GenerationRequest) -> Result<GenerationResult> {
        let normalized = request.normalize(&self.settings.limits)?;
        let payload = JobPayload::TextToImage(normalized.to_params());
        self.run(normalized, payload, None).await
    }

    /// Run a variation of an existing image.
    pub async fn generate_variation(
        &self,
        request: GenerationRequest,
        source: &Path,
        strength: VaryStrength,
    ) -> Result<GenerationResult> {
        let normalized = request.normalize(&self.settings.limits)?;
        let bytes = tokio::fs::read(source).await.map_err(|e| {
            GenerationError::Validation(format!(
                "Cannot read source image {}: {}",
                source.display(),
                e
            ))
        })?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        let payload = JobPayload::Variation(VariationParams::new(
            normalized.to_params(),
            strength,
            encoded,
        ));
        self.run(normalized, payload, Some(source.display().to_string()))
            .await
    }

    async fn run(
        &self,
        request: NormalizedRequest,
        payload: JobPayload,
        source_image: Option<String>,
    ) -> Result<GenerationResult> {
        if !self.is_accepting() {
            return Err(GenerationError::ShuttingDown);
        }
        let slot = self.registry.try_admit(payload.kind(), &request.prompt)?;
        self.cancel_idle_shutdown();

        let started = Instant::now();
        let outcome = self
            .drive(&slot, request, &payload, source_image, started)
            .await;
        drop(slot);

        match &outcome {
            Ok(result) => info!(
                job_id = %result.job_id,
                images = result.images.len(),
                elapsed_secs = result.elapsed.as_secs_f64(),
                "Job completed"
            ),
            Err(e) => warn!(kind = payload.kind(), error_kind = e.kind(), "Job failed: {}", e),
        }

        self.schedule_idle_shutdown();
        outcome
    }

    async fn drive(
        &self,
        slot: &JobSlot,
        request: NormalizedRequest,
        payload: &JobPayload,
        source_image: Option<String>,
        started: Instant,
    ) -> Result<GenerationResult> {
        self.ensure_backend().await?;

        let job_id = self.backend.submit(payload).await?;
        slot.bind(&job_id);
        info!(
            job_id = %job_id,
            kind = payload.kind(),
            images = request.image_number,
            seed = request.seed,
            aspect_ratio = %request.aspect_ratio,
            "Submitted job"
        );

        let snapshot = self.poll_until_terminal(slot, &job_id).await?;
        let images = self
            .persist(&job_id, &request, &snapshot.images, source_image)
            .await?;

        Ok(GenerationResult {
            output_dir: self.store.job_dir(&job_id),
            job_id,
            images,
            request,
            elapsed: started.elapsed(),
        })
    }

    /// Waits out an in-progress idle stop, so a job admitted during one
    /// restarts the backend instead of submitting to a dying one.
    async fn ensure_backend(&self) -> Result<()> {
        let _gate = self.backend_gate.lock().await;
        if self.backend.is_up().await {
            return Ok(());
        }
        if !self.settings.auto_manage {
            return Err(GenerationError::BackendUnavailable(
                "backend is not reachable and auto-start is disabled".into(),
            ));
        }
        info!("Backend not reachable, starting it");
        match self.backend.start().await {
            Ok(outcome) => {
                debug!(?outcome, "Backend start finished");
                Ok(())
            }
            Err(e) => Err(GenerationError::BackendUnavailable(e.to_string())),
        }
    }

    async fn poll_until_terminal(&self, slot: &JobSlot, job_id: &str) -> Result<JobSnapshot> {
        let submitted = Instant::now();
        let max_failures = self.settings.max_poll_failures;
        let mut failures = 0u32;
        let mut progress = 0.0f64;
        let mut logged_step = 0u32;

        loop {
            tokio::time::sleep(self.settings.poll_interval).await;

            if let Some(limit) = self.settings.job_timeout {
                let elapsed = submitted.elapsed();
                if elapsed >= limit {
                    return Err(GenerationError::Timeout {
                        job_id: job_id.to_string(),
                        elapsed,
                    });
                }
            }

            let snapshot = self.backend.poll(job_id).await;

            if snapshot.transient {
                failures += 1;
                let description = snapshot.error.unwrap_or_default();
                warn!(
                    job_id,
                    failures,
                    max_failures,
                    "{}",
                    GenerationError::PollFailure(description.clone())
                );
                if failures >= max_failures {
                    return Err(GenerationError::BackendUnavailable(format!(
                        "{} consecutive status polls failed, last error: {}",
                        failures, description
                    )));
                }
                continue;
            }
            failures = 0;

            match snapshot.stage {
                JobStage::Pending | JobStage::Running => {
                    progress = progress.max(snapshot.progress);
                    slot.update(snapshot.stage, progress);
                    let step = (progress / PROGRESS_LOG_STEP).floor() as u32;
                    if step > logged_step {
                        logged_step = step;
                        let percent = (progress * 100.0).round() as u32;
                        info!(job_id, percent, "Job progress");
                    }
                }
                JobStage::Completed => {
                    slot.update(JobStage::Completed, 1.0);
                    if snapshot.images.is_empty() {
                        return Err(GenerationError::JobError(snapshot.error.unwrap_or_else(
                            || "backend reported success but returned no images".into(),
                        )));
                    }
                    return Ok(snapshot);
                }
                JobStage::Error => {
                    slot.update(JobStage::Error, progress);
                    return Err(GenerationError::JobError(
                        snapshot
                            .error
                            .unwrap_or_else(|| "backend reported an error without details".into()),
                    ));
                }
            }
        }
    }

    /// Save each image and write its sidecar. A failed download still
    /// gets a sidecar that records the remote URL.
    async fn persist(
        &self,
        job_id: &str,
        request: &NormalizedRequest,
        images: &[GeneratedImage],
        source_image: Option<String>,
    ) -> Result<Vec<SavedImage>> {
        let dir = self.store.prepare_job_dir(job_id).await?;
        let stamp = Local::now();
        let mut saved = Vec::with_capacity(images.len());

        for (idx, image) in images.iter().enumerate() {
            let base = image_base_name(stamp, job_id, idx + 1);
            let file_name = format!("{}.{}", base, image.extension().to_ascii_lowercase());

            let downloaded = match self.backend.image_bytes(image).await {
                Ok(bytes) => match self.store.save_image(&dir, &file_name, &bytes).await {
                    Ok(_) => true,
                    Err(e) => {
                        warn!(job_id, index = idx + 1, "{}", e);
                        false
                    }
                },
                Err(e) => {
                    warn!(job_id, index = idx + 1, "Failed to fetch image: {}", e);
                    false
                }
            };

            let mut metadata = ImageMetadata::new(request, job_id, stamp.with_timezone(&Utc));
            metadata.seed = image.seed;
            metadata.source_image = source_image.clone();
            metadata.image_url = image.url.clone();
            metadata.image_file = downloaded.then(|| file_name.clone());
            let metadata_path = self.store.save_metadata(&dir, &base, &metadata).await?;

            saved.push(SavedImage {
                path: dir.join(&file_name),
                metadata_path,
                url: image.url.clone(),
                seed: image.seed,
                downloaded,
            });
        }
        Ok(saved)
    }

    // ── Idle shutdown ───────────────────────────────────────────────

    /// Arm the idle timer if enabled and nothing is running. Re-arming
    /// replaces any pending timer.
    pub fn schedule_idle_shutdown(&self) {
        let Some(idle) = self.settings.idle_shutdown else {
            return;
        };
        if !self.registry.is_empty() || !self.is_accepting() {
            return;
        }

        let backend = Arc::clone(&self.backend);
        let registry = self.registry.clone();
        let gate = Arc::clone(&self.backend_gate);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(idle).await;
            let guard = gate.lock_owned().await;
            if !registry.is_empty() {
                return;
            }
            // Outlives an abort of the timer; a started stop always completes.
            let stop = tokio::spawn(async move {
                let _guard = guard;
                stop_if_managed(backend.as_ref(), "idle timeout").await;
            });
            let _ = stop.await;
        });

        if let Some(previous) = lock(&self.idle_timer).replace(handle) {
            previous.abort();
        }
        debug!(idle_secs = idle.as_secs(), "Idle shutdown scheduled");
    }

    pub fn cancel_idle_shutdown(&self) {
        if let Some(handle) = lock(&self.idle_timer).take() {
            if !handle.is_finished() {
                debug!("Idle shutdown cancelled");
            }
            handle.abort();
        }
    }

    /// Whether an idle timer is armed and has not fired yet.
    pub fn idle_shutdown_pending(&self) -> bool {
        lock(&self.idle_timer)
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    // ── Host shutdown ───────────────────────────────────────────────

    /// Stop admitting jobs, wait up to `grace` for active ones, then stop
    /// a backend this process launched.
    pub async fn shutdown(&self, grace: Duration) {
        self.accepting.store(false, Ordering::SeqCst);
        self.cancel_idle_shutdown();

        let active = self.registry.len();
        if active > 0 {
            info!(active, grace_secs = grace.as_secs(), "Waiting for active jobs");
            if tokio::time::timeout(grace, self.registry.wait_idle())
                .await
                .is_err()
            {
                warn!(
                    remaining = self.registry.len(),
                    "Shutdown grace period elapsed, abandoning active jobs"
                );
            }
        }

        let _gate = self.backend_gate.lock().await;
        stop_if_managed(self.backend.as_ref(), "host shutdown").await;
    }
}

async fn stop_if_managed<B: GenerationBackend>(backend: &B, reason: &str) {
    let status = backend.status().await;
    let Some(pid) = status.managed_pid else {
        debug!(reason, "No managed backend process to stop");
        return;
    };
    info!(pid, reason, "Stopping managed backend");
    match backend.stop().await {
        Ok(outcome) => info!(?outcome, "Backend stopped"),
        Err(e) => warn!("Failed to stop backend: {}", e),
    }
}
