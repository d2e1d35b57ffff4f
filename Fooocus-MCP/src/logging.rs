use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::config::ServerConfig;

/// Filter from `RUST_LOG` when set, otherwise from the configured level.
pub fn env_filter(config: &ServerConfig) -> EnvFilter {
    let directives = std::env::var(EnvFilter::DEFAULT_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| config.log_level.clone());
    EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .parse_lossy(directives)
}

/// Install the global subscriber. Logs go to stderr, or are appended to
/// `log_file` without colours; stdout is reserved for the MCP transport.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init(config: &ServerConfig) -> std::io::Result<()> {
    let filter = env_filter(config);

    match &config.log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init();
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_creates_log_file_and_parent() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("logs").join("server.log");
        let config = ServerConfig {
            log_file: Some(path.clone()),
            ..Default::default()
        };

        init(&config).unwrap();
        assert!(path.exists());
        // A second install is ignored rather than failing.
        init(&config).unwrap();
    }
}
