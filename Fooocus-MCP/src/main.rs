use fooocus_mcp::mcp::FooocusMcp;
use fooocus_mcp::{
    logging, FooocusBackend, JobOrchestrator, OutputStore, ServerConfig, ToolSurface,
};
use rmcp::ServiceExt;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let config = ServerConfig::from_env();
    logging::init(&config)?;

    info!(
        api_url = %config.api_url,
        output_dir = %config.output_dir.display(),
        max_concurrent_jobs = config.max_concurrent_jobs,
        auto_manage = config.auto_manage,
        can_launch = config.install_path.is_some(),
        "Starting fooocus-mcp"
    );

    let store = OutputStore::new(&config.output_dir, config.subdir_per_job);
    store.ensure_output_dir()?;

    let backend = FooocusBackend::from_config(&config);
    let orchestrator = Arc::new(JobOrchestrator::from_config(backend, store, &config));
    let tools = Arc::new(ToolSurface::new(Arc::clone(&orchestrator)));

    let service = FooocusMcp::new(tools)
        .serve(rmcp::transport::stdio())
        .await?;

    tokio::select! {
        result = service.waiting() => {
            if let Err(e) = result {
                warn!("MCP service ended with error: {}", e);
            } else {
                info!("Host closed the connection");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
        }
    }

    orchestrator.shutdown(config.shutdown_grace).await;
    info!("Shut down cleanly");
    Ok(())
}
