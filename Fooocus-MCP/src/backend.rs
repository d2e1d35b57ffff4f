use fooocus_rs::{
    BackendManager, FooocusClient, GeneratedImage, JobPayload, JobSnapshot, StartOutcome,
    StopOutcome,
};

use crate::config::ServerConfig;
use crate::{BackendStatus, GenerationBackend};

/// [`GenerationBackend`] backed by a real Fooocus-API instance.
#[derive(Clone)]
pub struct FooocusBackend {
    manager: BackendManager,
}

impl FooocusBackend {
    pub fn new(manager: BackendManager) -> Self {
        Self { manager }
    }

    /// Client and optional launcher from config.
    pub fn from_config(config: &ServerConfig) -> Self {
        let client =
            FooocusClient::new(config.api_url.clone()).with_timeout(config.request_timeout);
        Self::new(BackendManager::new(client, config.launch_config()))
    }

    pub fn manager(&self) -> &BackendManager {
        &self.manager
    }
}

impl GenerationBackend for FooocusBackend {
    async fn is_up(&self) -> bool {
        self.manager.is_up().await
    }

    async fn start(&self) -> fooocus_rs::Result<StartOutcome> {
        self.manager.start().await
    }

    async fn stop(&self) -> fooocus_rs::Result<StopOutcome> {
        self.manager.stop().await
    }

    async fn status(&self) -> BackendStatus {
        BackendStatus {
            endpoint: self.manager.client().endpoint().to_string(),
            reachable: self.manager.is_up().await,
            managed_pid: self.manager.managed_pid().await,
            can_launch: self.manager.can_launch(),
        }
    }

    async fn submit(&self, payload: &JobPayload) -> fooocus_rs::Result<String> {
        let job = self.manager.client().submit(payload).await?;
        Ok(job.job_id)
    }

    async fn poll(&self, job_id: &str) -> JobSnapshot {
        self.manager.client().query_job(job_id).await
    }

    async fn image_bytes(&self, image: &GeneratedImage) -> fooocus_rs::Result<Vec<u8>> {
        self.manager.client().image_bytes(image).await
    }
}
