use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::client::FooocusClient;
use crate::error::{FooocusError, Result};

/// How to launch a Fooocus-API backend process.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    /// Executable to run (usually a Python interpreter).
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// Health probes after launch before giving up.
    pub start_retries: u32,
    pub start_interval: Duration,
    /// Time allowed for a graceful exit before the process is killed.
    pub stop_grace: Duration,
    /// `pkill -f` pattern matching leftover backend instances.
    pub stray_pattern: Option<String>,
}

impl LaunchConfig {
    /// Launch an arbitrary program with default timings.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
            start_retries: 60,
            start_interval: Duration::from_secs(2),
            stop_grace: Duration::from_secs(10),
            stray_pattern: None,
        }
    }

    /// `python main.py --host 127.0.0.1 --port <port>` inside `install_dir`.
    pub fn fooocus_api(
        install_dir: impl Into<PathBuf>,
        python: impl Into<PathBuf>,
        port: u16,
    ) -> Self {
        let install_dir = install_dir.into();
        Self {
            args: vec![
                "main.py".to_string(),
                "--host".to_string(),
                "127.0.0.1".to_string(),
                "--port".to_string(),
                port.to_string(),
            ],
            working_dir: Some(install_dir),
            env: vec![("PYTHONUNBUFFERED".to_string(), "1".to_string())],
            stray_pattern: Some(format!("main.py.*--port {}", port)),
            ..Self::new(python)
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn start_retries(mut self, retries: u32) -> Self {
        self.start_retries = retries;
        self
    }

    pub fn start_interval(mut self, interval: Duration) -> Self {
        self.start_interval = interval;
        self
    }

    pub fn stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn stray_pattern(mut self, pattern: Option<String>) -> Self {
        self.stray_pattern = pattern;
        self
    }
}

/// Result of [`BackendManager::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// The backend was already answering health probes; nothing was spawned.
    AlreadyRunning,
    /// A process was launched (or an earlier launch finished warming up).
    Started { pid: Option<u32> },
}

/// Result of [`BackendManager::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    NotRunning,
    /// The backend is up but was not launched by us and no stray pattern
    /// is configured, so it was left alone.
    ExternallyManaged,
}

type StartAttempt = Shared<BoxFuture<'static, std::result::Result<StartOutcome, String>>>;

struct Inner {
    client: FooocusClient,
    launch: Option<LaunchConfig>,
    child: tokio::sync::Mutex<Option<Child>>,
    starting: Mutex<Option<StartAttempt>>,
    spawns: AtomicU32,
}

/// Owns the optional Fooocus-API child process.
///
/// `start` is idempotent and single-flight: concurrent callers share one
/// launch attempt. `stop` tries a cooperative interrupt and SIGTERM before
/// force-killing, and treats "already stopped" as success.
#[derive(Clone)]
pub struct BackendManager {
    inner: Arc<Inner>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl BackendManager {
    /// `launch = None` means the backend is managed externally and can only
    /// be probed, never started.
    pub fn new(client: FooocusClient, launch: Option<LaunchConfig>) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                launch,
                child: tokio::sync::Mutex::new(None),
                starting: Mutex::new(None),
                spawns: AtomicU32::new(0),
            }),
        }
    }

    pub fn client(&self) -> &FooocusClient {
        &self.inner.client
    }

    /// Whether a launch configuration is available.
    pub fn can_launch(&self) -> bool {
        self.inner.launch.is_some()
    }

    /// Number of processes spawned over this manager's lifetime.
    pub fn spawn_count(&self) -> u32 {
        self.inner.spawns.load(Ordering::SeqCst)
    }

    /// Bounded health probe; never errors.
    pub async fn is_up(&self) -> bool {
        self.inner.client.is_up().await
    }

    /// Pid of the child we launched, if it is still alive.
    pub async fn managed_pid(&self) -> Option<u32> {
        let mut slot = self.inner.child.lock().await;
        match slot.as_mut() {
            Some(child) => match child.try_wait() {
                Ok(None) => child.id(),
                _ => None,
            },
            None => None,
        }
    }

    /// Make sure the backend answers health probes, launching it if needed.
    pub async fn start(&self) -> Result<StartOutcome> {
        if self.is_up().await {
            return Ok(StartOutcome::AlreadyRunning);
        }

        let attempt = {
            let mut slot = lock(&self.inner.starting);
            match slot.as_ref() {
                Some(existing) => {
                    debug!("Joining in-flight Fooocus-API start");
                    existing.clone()
                }
                None => {
                    let this = self.clone();
                    let fresh: StartAttempt = async move {
                        let result = this.launch_and_wait().await.map_err(|e| e.to_string());
                        *lock(&this.inner.starting) = None;
                        result
                    }
                    .boxed()
                    .shared();
                    *slot = Some(fresh.clone());
                    fresh
                }
            }
        };

        attempt.await.map_err(FooocusError::StartFailed)
    }

    async fn launch_and_wait(&self) -> Result<StartOutcome> {
        if self.is_up().await {
            return Ok(StartOutcome::AlreadyRunning);
        }

        let launch = self.inner.launch.as_ref().ok_or_else(|| {
            FooocusError::Spawn("no install path configured, cannot launch the backend".into())
        })?;

        let pid = {
            let mut slot = self.inner.child.lock().await;
            let alive = match slot.as_mut() {
                Some(child) => matches!(child.try_wait(), Ok(None)),
                None => false,
            };
            if alive {
                debug!("Fooocus-API process already launched, waiting for readiness");
                slot.as_ref().and_then(|c| c.id())
            } else {
                if let Some(pattern) = launch.stray_pattern.as_deref() {
                    terminate_stray(pattern).await;
                }
                let child = spawn_child(launch)?;
                let pid = child.id();
                *slot = Some(child);
                self.inner.spawns.fetch_add(1, Ordering::SeqCst);
                info!(pid, program = %launch.program.display(), "Launched Fooocus-API");
                pid
            }
        };

        for attempt in 1..=launch.start_retries {
            tokio::time::sleep(launch.start_interval).await;
            if self.is_up().await {
                info!(pid, attempt, "Fooocus-API is ready");
                return Ok(StartOutcome::Started { pid });
            }
            if let Some(status) = self.exited_child().await {
                return Err(FooocusError::StartFailed(format!(
                    "process exited with {} before becoming ready",
                    status
                )));
            }
            debug!(attempt, max = launch.start_retries, "Fooocus-API not ready yet");
        }

        Err(FooocusError::StartFailed(format!(
            "{} not reachable after {} health probes",
            self.inner.client.endpoint(),
            launch.start_retries
        )))
    }

    /// Reap the child if it has exited, returning its status.
    async fn exited_child(&self) -> Option<std::process::ExitStatus> {
        let mut slot = self.inner.child.lock().await;
        let status = match slot.as_mut() {
            Some(child) => child.try_wait().ok().flatten(),
            None => None,
        };
        if status.is_some() {
            *slot = None;
        }
        status
    }

    /// Stop the backend: cooperative interrupt, then SIGTERM, then kill
    /// after the grace window.
    pub async fn stop(&self) -> Result<StopOutcome> {
        let grace = self
            .inner
            .launch
            .as_ref()
            .map(|l| l.stop_grace)
            .unwrap_or(Duration::from_secs(10));

        let owned = self.inner.child.lock().await.take();
        if let Some(mut child) = owned {
            if let Ok(Some(status)) = child.try_wait() {
                debug!(%status, "Managed Fooocus-API process had already exited");
            } else {
                if let Err(e) = self.inner.client.stop_generation().await {
                    debug!("Cooperative stop failed: {}", e);
                }
                terminate(&mut child, grace).await;
                return Ok(StopOutcome::Stopped);
            }
        }

        if !self.is_up().await {
            return Ok(StopOutcome::NotRunning);
        }

        match self.inner.launch.as_ref().and_then(|l| l.stray_pattern.as_deref()) {
            Some(pattern) => {
                terminate_stray(pattern).await;
                Ok(StopOutcome::Stopped)
            }
            None => Ok(StopOutcome::ExternallyManaged),
        }
    }
}

fn spawn_child(launch: &LaunchConfig) -> Result<Child> {
    let mut cmd = Command::new(&launch.program);
    cmd.args(&launch.args)
        .envs(launch.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(false);
    if let Some(dir) = &launch.working_dir {
        cmd.current_dir(dir);
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| FooocusError::Spawn(format!("{}: {}", launch.program.display(), e)))?;

    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_output(stdout, "stdout"));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_output(stderr, "stderr"));
    }
    Ok(child)
}

async fn forward_output<R>(reader: R, stream: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        info!(target: "fooocus_backend", stream, "{}", line);
    }
}

async fn terminate(child: &mut Child, grace: Duration) {
    if let Some(pid) = child.id() {
        send_terminate(pid).await;
    }
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => info!(%status, "Fooocus-API exited"),
        Ok(Err(e)) => warn!("Failed waiting for Fooocus-API to exit: {}", e),
        Err(_) => {
            warn!("Fooocus-API did not exit within {:?}, killing", grace);
            if let Err(e) = child.kill().await {
                warn!("Failed to kill Fooocus-API: {}", e);
            }
        }
    }
}

#[cfg(unix)]
async fn send_terminate(pid: u32) {
    let _ = Command::new("kill")
        .arg("-TERM")
        .arg(pid.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
}

#[cfg(not(unix))]
async fn send_terminate(pid: u32) {
    let _ = Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
}

#[cfg(unix)]
async fn terminate_stray(pattern: &str) {
    match Command::new("pkill")
        .arg("-f")
        .arg(pattern)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
    {
        // pkill exits 0 when something matched
        Ok(status) if status.success() => {
            info!(pattern, "Terminated stray Fooocus-API instances");
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        Ok(_) => {}
        Err(e) => debug!("pkill unavailable: {}", e),
    }
}

#[cfg(not(unix))]
async fn terminate_stray(pattern: &str) {
    debug!(pattern, "Stray-process cleanup is only supported on unix");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fooocus_api_launch_config() {
        let cfg = LaunchConfig::fooocus_api("/opt/Fooocus-API", "python3", 8888);
        assert_eq!(cfg.program, PathBuf::from("python3"));
        assert_eq!(cfg.args, vec!["main.py", "--host", "127.0.0.1", "--port", "8888"]);
        assert_eq!(cfg.working_dir, Some(PathBuf::from("/opt/Fooocus-API")));
        assert_eq!(cfg.stray_pattern.as_deref(), Some("main.py.*--port 8888"));
        assert!(cfg.env.iter().any(|(k, _)| k == "PYTHONUNBUFFERED"));
    }

    #[test]
    fn test_launch_config_builder() {
        let cfg = LaunchConfig::new("sleep")
            .args(["30"])
            .start_retries(5)
            .start_interval(Duration::from_millis(10))
            .stop_grace(Duration::from_secs(1))
            .stray_pattern(None);
        assert_eq!(cfg.args, vec!["30"]);
        assert_eq!(cfg.start_retries, 5);
        assert!(cfg.stray_pattern.is_none());
    }

    #[test]
    fn test_manager_without_launch_config() {
        let manager = BackendManager::new(FooocusClient::new("http://127.0.0.1:1"), None);
        assert!(!manager.can_launch());
        assert_eq!(manager.spawn_count(), 0);
    }
}
