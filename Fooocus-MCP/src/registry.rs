use fooocus_rs::JobStage;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::{GenerationError, Result};

/// Live view of one admitted job.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveJob {
    /// Local slot id, assigned at admission.
    pub slot_id: String,
    /// Backend job id, once submitted.
    pub job_id: Option<String>,
    pub kind: &'static str,
    pub prompt: String,
    pub stage: JobStage,
    pub progress: f64,
    pub elapsed: Duration,
}

#[derive(Debug)]
struct Entry {
    slot_id: String,
    job_id: Option<String>,
    kind: &'static str,
    prompt: String,
    stage: JobStage,
    progress: f64,
    admitted_at: Instant,
}

#[derive(Debug)]
struct Inner {
    entries: Mutex<Vec<Entry>>,
    idle: Notify,
    capacity: usize,
}

/// In-flight jobs, bounded by the admission ceiling.
///
/// Admission checks and inserts under one lock, so concurrent callers can
/// never both pass the check. Entries are removed when the returned
/// [`JobSlot`] drops, on every exit path of the job.
#[derive(Debug, Clone)]
pub struct ActiveJobRegistry {
    inner: Arc<Inner>,
}

impl ActiveJobRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(Vec::new()),
                idle: Notify::new(),
                capacity: capacity.max(1),
            }),
        }
    }

    fn entries(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reserve a slot, or fail with `Capacity` when the ceiling is reached.
    pub fn try_admit(&self, kind: &'static str, prompt: &str) -> Result<JobSlot> {
        let mut entries = self.entries();
        if entries.len() >= self.inner.capacity {
            return Err(GenerationError::Capacity {
                active: entries.len(),
                limit: self.inner.capacity,
            });
        }
        let slot_id = uuid::Uuid::new_v4().to_string();
        entries.push(Entry {
            slot_id: slot_id.clone(),
            job_id: None,
            kind,
            prompt: preview(prompt),
            stage: JobStage::Pending,
            progress: 0.0,
            admitted_at: Instant::now(),
        });
        Ok(JobSlot {
            registry: self.clone(),
            slot_id,
        })
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn snapshot(&self) -> Vec<ActiveJob> {
        self.entries()
            .iter()
            .map(|e| ActiveJob {
                slot_id: e.slot_id.clone(),
                job_id: e.job_id.clone(),
                kind: e.kind,
                prompt: e.prompt.clone(),
                stage: e.stage,
                progress: e.progress,
                elapsed: e.admitted_at.elapsed(),
            })
            .collect()
    }

    /// Resolve once no jobs are registered.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_empty() {
                return;
            }
            notified.await;
        }
    }

    fn with_entry(&self, slot_id: &str, f: impl FnOnce(&mut Entry)) {
        if let Some(entry) = self.entries().iter_mut().find(|e| e.slot_id == slot_id) {
            f(entry);
        }
    }

    fn release(&self, slot_id: &str) {
        let now_empty = {
            let mut entries = self.entries();
            entries.retain(|e| e.slot_id != slot_id);
            entries.is_empty()
        };
        if now_empty {
            self.inner.idle.notify_waiters();
        }
    }
}

/// Admission ticket for one job. Dropping it deregisters the job.
#[derive(Debug)]
pub struct JobSlot {
    registry: ActiveJobRegistry,
    slot_id: String,
}

impl JobSlot {
    pub fn id(&self) -> &str {
        &self.slot_id
    }

    /// Record the backend-assigned job id.
    pub fn bind(&self, job_id: &str) {
        self.registry
            .with_entry(&self.slot_id, |e| e.job_id = Some(job_id.to_string()));
    }

    pub fn update(&self, stage: JobStage, progress: f64) {
        self.registry.with_entry(&self.slot_id, |e| {
            e.stage = stage;
            e.progress = progress;
        });
    }
}

impl Drop for JobSlot {
    fn drop(&mut self) {
        self.registry.release(&self.slot_id);
    }
}

fn preview(prompt: &str) -> String {
    const MAX: usize = 60;
    let prompt = prompt.trim();
    if prompt.chars().count() <= MAX {
        prompt.to_string()
    } else {
        let cut: String = prompt.chars().take(MAX).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admit_until_capacity() {
        let registry = ActiveJobRegistry::new(2);
        let a = registry.try_admit("text-to-image", "a").unwrap();
        let _b = registry.try_admit("text-to-image", "b").unwrap();
        let err = registry.try_admit("text-to-image", "c").unwrap_err();
        assert_eq!(err, GenerationError::Capacity { active: 2, limit: 2 });
        assert_eq!(registry.len(), 2);

        drop(a);
        assert_eq!(registry.len(), 1);
        assert!(registry.try_admit("variation", "d").is_ok());
    }

    #[test]
    fn test_bind_and_update_visible_in_snapshot() {
        let registry = ActiveJobRegistry::new(1);
        let slot = registry.try_admit("text-to-image", "a red fox").unwrap();
        slot.bind("job-9");
        slot.update(JobStage::Running, 0.5);

        let jobs = registry.snapshot();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].job_id.as_deref(), Some("job-9"));
        assert_eq!(jobs[0].stage, JobStage::Running);
        assert_eq!(jobs[0].progress, 0.5);
        assert_eq!(jobs[0].prompt, "a red fox");
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let registry = ActiveJobRegistry::new(0);
        assert_eq!(registry.capacity(), 1);
        assert!(registry.try_admit("text-to-image", "x").is_ok());
    }

    #[test]
    fn test_long_prompt_truncated() {
        let long = "x".repeat(200);
        assert_eq!(preview(&long).chars().count(), 63);
    }

    #[tokio::test]
    async fn test_wait_idle_resolves_on_last_release() {
        let registry = ActiveJobRegistry::new(2);
        let slot = registry.try_admit("text-to-image", "x").unwrap();
        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.wait_idle().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        drop(slot);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
