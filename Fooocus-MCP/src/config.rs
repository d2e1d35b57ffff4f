use fooocus_rs::LaunchConfig;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::styles;

/// Configuration for the tool server.
///
/// Use [`ServerConfig::from_env()`] in the binary, [`ServerConfig::builder()`]
/// in code and tests, or [`ServerConfig::default()`] for a local backend on
/// port 8888 writing to `./outputs`.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Fooocus-API base URL.
    pub api_url: String,

    /// Fooocus-API install directory. Required for auto-start.
    pub install_path: Option<PathBuf>,

    /// Interpreter used to run `main.py`.
    pub python: PathBuf,

    /// Timeout applied to every backend HTTP call.
    pub request_timeout: Duration,

    /// Delay between job status polls.
    pub poll_interval: Duration,

    /// Where images and sidecars are written.
    pub output_dir: PathBuf,

    /// Write each job into its own `<output_dir>/<job_id>/` folder.
    pub subdir_per_job: bool,

    /// Admission ceiling for in-flight jobs.
    pub max_concurrent_jobs: usize,

    /// Upper bound on images per request. `None` = uncapped.
    pub max_images: Option<u32>,

    /// Performance preset used when a request does not name one.
    pub default_performance: String,

    /// Start the backend on demand when it is not reachable.
    pub auto_manage: bool,

    /// Stop the managed backend after this long without jobs.
    pub idle_shutdown: Option<Duration>,

    /// Hard wall-clock limit per job, measured from submission.
    pub job_timeout: Option<Duration>,

    /// Consecutive failed status polls tolerated before giving up.
    pub max_poll_failures: u32,

    /// Health probes after launching the backend.
    pub start_retries: u32,

    /// Delay between those probes.
    pub start_interval: Duration,

    /// Graceful-stop window before the backend is killed.
    pub stop_grace: Duration,

    /// How long host shutdown waits for active jobs.
    pub shutdown_grace: Duration,

    /// Default log filter directive.
    pub log_level: String,

    /// Append logs to this file instead of stderr.
    pub log_file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8888".to_string(),
            install_path: None,
            python: PathBuf::from(default_python()),
            request_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(2),
            output_dir: PathBuf::from("outputs"),
            subdir_per_job: false,
            max_concurrent_jobs: 3,
            max_images: Some(4),
            default_performance: "Speed".to_string(),
            auto_manage: true,
            idle_shutdown: None,
            job_timeout: None,
            max_poll_failures: 5,
            start_retries: 60,
            start_interval: Duration::from_secs(2),
            stop_grace: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(30),
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

fn default_python() -> &'static str {
    if cfg!(unix) {
        "python3"
    } else {
        "python"
    }
}

impl ServerConfig {
    /// Start building a config with the builder pattern.
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Read `FOOOCUS_*` variables from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Missing keys keep their
    /// defaults; unparseable values are logged and ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut config = Self::default();

        if let Some(url) = get("FOOOCUS_API_URL") {
            config.api_url = url.trim_end_matches('/').to_string();
        }
        config.install_path = get("FOOOCUS_PATH").map(PathBuf::from);
        if let Some(python) = get("FOOOCUS_PYTHON") {
            config.python = PathBuf::from(python);
        }
        if let Some(secs) = parse_num::<u64>(&get, "FOOOCUS_REQUEST_TIMEOUT_SECS") {
            config.request_timeout = Duration::from_secs(secs.max(1));
        }
        if let Some(ms) = parse_num::<u64>(&get, "FOOOCUS_POLL_INTERVAL_MS") {
            config.poll_interval = Duration::from_millis(ms.max(50));
        }
        if let Some(dir) = get("FOOOCUS_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(dir);
        }
        if let Some(flag) = parse_bool(&get, "FOOOCUS_SUBDIR_PER_JOB") {
            config.subdir_per_job = flag;
        }
        if let Some(n) = parse_num::<usize>(&get, "FOOOCUS_MAX_CONCURRENT_JOBS") {
            config.max_concurrent_jobs = n.max(1);
        }
        if let Some(n) = parse_num::<u32>(&get, "FOOOCUS_MAX_IMAGES") {
            config.max_images = (n > 0).then_some(n);
        }
        if let Some(perf) = get("FOOOCUS_PERFORMANCE") {
            match styles::canonical_performance(&perf) {
                Some(canonical) => config.default_performance = canonical.to_string(),
                None => warn!(
                    key = "FOOOCUS_PERFORMANCE",
                    value = %perf,
                    "Unknown performance preset, keeping {}",
                    config.default_performance
                ),
            }
        }
        if let Some(flag) = parse_bool(&get, "FOOOCUS_AUTO_MANAGE") {
            config.auto_manage = flag;
        }
        if let Some(secs) = parse_num::<u64>(&get, "FOOOCUS_IDLE_SHUTDOWN_SECS") {
            config.idle_shutdown = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(secs) = parse_num::<u64>(&get, "FOOOCUS_JOB_TIMEOUT_SECS") {
            config.job_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(n) = parse_num::<u32>(&get, "FOOOCUS_MAX_POLL_FAILURES") {
            config.max_poll_failures = n.max(1);
        }
        if let Some(n) = parse_num::<u32>(&get, "FOOOCUS_START_RETRIES") {
            config.start_retries = n.max(1);
        }
        if let Some(ms) = parse_num::<u64>(&get, "FOOOCUS_START_INTERVAL_MS") {
            config.start_interval = Duration::from_millis(ms.max(50));
        }
        if let Some(secs) = parse_num::<u64>(&get, "FOOOCUS_STOP_GRACE_SECS") {
            config.stop_grace = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_num::<u64>(&get, "FOOOCUS_SHUTDOWN_GRACE_SECS") {
            config.shutdown_grace = Duration::from_secs(secs);
        }
        if let Some(level) = get("FOOOCUS_LOG_LEVEL") {
            config.log_level = level;
        }
        config.log_file = get("FOOOCUS_LOG_FILE").map(PathBuf::from);

        config
    }

    /// Port the backend listens on, derived from `api_url`.
    pub fn api_port(&self) -> u16 {
        url_port(&self.api_url).unwrap_or(8888)
    }

    /// Launch settings for the backend process, if an install path is known.
    pub fn launch_config(&self) -> Option<LaunchConfig> {
        let install = self.install_path.as_ref()?;
        Some(
            LaunchConfig::fooocus_api(install.clone(), self.python.clone(), self.api_port())
                .start_retries(self.start_retries)
                .start_interval(self.start_interval)
                .stop_grace(self.stop_grace),
        )
    }
}

/// Extract the explicit port from `scheme://host:port[/...]`.
fn url_port(url: &str) -> Option<u16> {
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    let authority = rest.split('/').next()?;
    let (_, port) = authority.rsplit_once(':')?;
    port.parse().ok()
}

fn parse_num<T: FromStr>(get: impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = get(key)?;
    match raw.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparseable number");
            None
        }
    }
}

fn parse_bool(get: impl Fn(&str) -> Option<String>, key: &str) -> Option<bool> {
    let raw = get(key)?;
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            warn!(key, value = %raw, "Ignoring unparseable flag");
            None
        }
    }
}

/// Builder for [`ServerConfig`].
#[derive(Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.config.api_url = url.into();
        self
    }

    pub fn with_install_path(mut self, path: PathBuf) -> Self {
        self.config.install_path = Some(path);
        self
    }

    pub fn with_output_dir(mut self, dir: PathBuf) -> Self {
        self.config.output_dir = dir;
        self
    }

    pub fn with_subdir_per_job(mut self, enabled: bool) -> Self {
        self.config.subdir_per_job = enabled;
        self
    }

    pub fn with_max_concurrent_jobs(mut self, max: usize) -> Self {
        self.config.max_concurrent_jobs = max.max(1);
        self
    }

    /// Cap images per request. `None` removes the cap.
    pub fn with_max_images(mut self, max: Option<u32>) -> Self {
        self.config.max_images = max;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.job_timeout = timeout;
        self
    }

    pub fn with_idle_shutdown(mut self, idle: Option<Duration>) -> Self {
        self.config.idle_shutdown = idle;
        self
    }

    pub fn with_auto_manage(mut self, enabled: bool) -> Self {
        self.config.auto_manage = enabled;
        self
    }

    pub fn with_max_poll_failures(mut self, n: u32) -> Self {
        self.config.max_poll_failures = n.max(1);
        self
    }

    pub fn with_default_performance(mut self, performance: impl Into<String>) -> Self {
        self.config.default_performance = performance.into();
        self
    }

    /// Build the final [`ServerConfig`].
    pub fn build(self) -> ServerConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_lookup(|_| None);
        assert_eq!(config.api_url, "http://127.0.0.1:8888");
        assert_eq!(config.max_concurrent_jobs, 3);
        assert_eq!(config.max_images, Some(4));
        assert!(config.auto_manage);
        assert!(config.idle_shutdown.is_none());
        assert!(config.job_timeout.is_none());
        assert!(config.launch_config().is_none());
    }

    #[test]
    fn test_env_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("FOOOCUS_API_URL", "http://localhost:7777/"),
            ("FOOOCUS_PATH", "/opt/Fooocus-API"),
            ("FOOOCUS_MAX_CONCURRENT_JOBS", "5"),
            ("FOOOCUS_MAX_IMAGES", "0"),
            ("FOOOCUS_SUBDIR_PER_JOB", "yes"),
            ("FOOOCUS_AUTO_MANAGE", "false"),
            ("FOOOCUS_IDLE_SHUTDOWN_SECS", "300"),
            ("FOOOCUS_JOB_TIMEOUT_SECS", "0"),
            ("FOOOCUS_POLL_INTERVAL_MS", "500"),
            ("FOOOCUS_LOG_FILE", "/tmp/fooocus.log"),
            ("FOOOCUS_PERFORMANCE", "quality"),
        ]));
        assert_eq!(config.api_url, "http://localhost:7777");
        assert_eq!(config.api_port(), 7777);
        assert_eq!(config.max_concurrent_jobs, 5);
        assert_eq!(config.max_images, None);
        assert!(config.subdir_per_job);
        assert!(!config.auto_manage);
        assert_eq!(config.idle_shutdown, Some(Duration::from_secs(300)));
        assert_eq!(config.job_timeout, None);
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.log_file, Some(PathBuf::from("/tmp/fooocus.log")));
        assert_eq!(config.default_performance, "Quality");

        let launch = config.launch_config().unwrap();
        assert_eq!(launch.working_dir, Some(PathBuf::from("/opt/Fooocus-API")));
        assert!(launch.args.contains(&"7777".to_string()));
    }

    #[test]
    fn test_bad_values_keep_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("FOOOCUS_MAX_CONCURRENT_JOBS", "lots"),
            ("FOOOCUS_AUTO_MANAGE", "maybe"),
            ("FOOOCUS_OUTPUT_DIR", "   "),
            ("FOOOCUS_PERFORMANCE", "turbo"),
        ]));
        assert_eq!(config.max_concurrent_jobs, 3);
        assert!(config.auto_manage);
        assert_eq!(config.output_dir, PathBuf::from("outputs"));
        assert_eq!(config.default_performance, "Speed");
    }

    #[test]
    fn test_port_parsing() {
        assert_eq!(url_port("http://127.0.0.1:8888"), Some(8888));
        assert_eq!(url_port("http://host:9000/api"), Some(9000));
        assert_eq!(url_port("http://host"), None);
    }

    #[test]
    fn test_builder() {
        let config = ServerConfig::builder()
            .with_max_concurrent_jobs(0)
            .with_max_images(Some(8))
            .with_job_timeout(Some(Duration::from_secs(60)))
            .build();
        assert_eq!(config.max_concurrent_jobs, 1);
        assert_eq!(config.max_images, Some(8));
        assert_eq!(config.job_timeout, Some(Duration::from_secs(60)));
    }
}
