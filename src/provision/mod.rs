//! Repository provisioning and lifecycle of the cloned project's server.
//!
//! [`RepoProvisioner`] clones a submission, writes its `.env`, installs its
//! dependencies and starts `npm run <script>`. The running server is owned
//! by a [`ServerHandle`]. On unix the server leads its own process group, so
//! stopping or dropping the handle also reaches the processes `npm` spawned.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};

use crate::error::{ReviewError, ReviewResult};

/// Interval between readiness probes.
pub const READY_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Grace period between SIGTERM and SIGKILL.
const STOP_WAIT: Duration = Duration::from_secs(5);

/// Prepares a submission on disk and runs its server.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Fresh shallow clone into `work_dir`, then `.env` and dependency install.
    async fn provision(
        &self,
        repo_url: &str,
        work_dir: &Path,
        env: &BTreeMap<String, String>,
    ) -> ReviewResult<()>;

    /// Start the project's server on `port`.
    async fn start_server(&self, work_dir: &Path, port: u16) -> ReviewResult<ServerHandle>;

    /// Wait until `base_url` answers HTTP requests.
    async fn wait_until_ready(&self, base_url: &str, timeout: Duration) -> ReviewResult<()> {
        wait_until_ready(base_url, timeout).await
    }
}

/// Script run by `npm run`: `dev`, else `start`, else `dev`.
pub fn select_start_script(package_json: &str) -> &'static str {
    let scripts = serde_json::from_str::<serde_json::Value>(package_json)
        .ok()
        .and_then(|v| v.get("scripts").cloned());

    let has = |name: &str| {
        scripts
            .as_ref()
            .and_then(|s| s.get(name))
            .map_or(false, |v| v.is_string())
    };

    if has("dev") {
        "dev"
    } else if has("start") {
        "start"
    } else {
        "dev"
    }
}

/// `KEY=VALUE` lines in key order.
pub fn render_env_file(env: &BTreeMap<String, String>) -> String {
    env.iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Poll `base_url` every [`READY_POLL_INTERVAL`] until any HTTP response
/// arrives. Connection failures mean "not yet".
pub async fn wait_until_ready(base_url: &str, timeout: Duration) -> ReviewResult<()> {
    let client = reqwest::Client::builder()
        .timeout(READY_POLL_INTERVAL.max(Duration::from_secs(2)))
        .build()
        .map_err(|e| ReviewError::Transport(format!("failed to build HTTP client: {}", e)))?;
    let started = Instant::now();
    let deadline = started + timeout;

    loop {
        match client.get(base_url).send().await {
            Ok(response) => {
                tracing::info!(
                    url = base_url,
                    status = response.status().as_u16(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Server is ready"
                );
                return Ok(());
            }
            Err(e) => {
                tracing::trace!(url = base_url, error = %e, "Server not ready yet");
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(ReviewError::ReadinessTimeout {
                url: base_url.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        tokio::time::sleep(READY_POLL_INTERVAL.min(deadline - now)).await;
    }
}

/// A server process owned by the review. Its process group is killed on drop.
#[derive(Debug)]
pub struct ServerHandle {
    npm_path: String,
    work_dir: PathBuf,
    port: u16,
    child: Option<Child>,
    /// Process group led by `child`; `None` when not spawned or not on unix.
    group: Option<u32>,
}

impl ServerHandle {
    pub fn new(npm_path: impl Into<String>, work_dir: impl Into<PathBuf>, port: u16) -> Self {
        Self {
            npm_path: npm_path.into(),
            work_dir: work_dir.into(),
            port,
            child: None,
            group: None,
        }
    }

    /// Handle for a server managed elsewhere; start and stop do nothing.
    pub fn external(port: u16) -> Self {
        Self::new(String::new(), PathBuf::new(), port)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether the tracked process is still running.
    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Spawn the server unless the tracked process is alive.
    pub async fn start(&mut self) -> ReviewResult<()> {
        if self.npm_path.is_empty() || self.is_running() {
            return Ok(());
        }
        // The npm process exited; its children may not have.
        self.stop().await;

        let manifest = tokio::fs::read_to_string(self.work_dir.join("package.json"))
            .await
            .unwrap_or_default();
        let script = select_start_script(&manifest);

        let mut command = Command::new(&self.npm_path);
        command
            .args(["run", script])
            .current_dir(&self.work_dir)
            .env("PORT", self.port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn().map_err(|e| {
            ReviewError::Provisioning(format!("failed to spawn {} run {}: {}", self.npm_path, script, e))
        })?;

        tracing::info!(
            work_dir = %self.work_dir.display(),
            port = self.port,
            script,
            pid = child.id(),
            "Project server started"
        );
        self.group = if cfg!(unix) { child.id() } else { None };
        self.child = Some(child);
        Ok(())
    }

    /// Best-effort termination: SIGTERM to the process group, then SIGKILL
    /// after [`STOP_WAIT`]. Failures are logged and swallowed.
    pub async fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        let group = self.group.take();

        let terminated = match group {
            Some(pgid) => signal_group(pgid, GroupSignal::Terminate),
            None => child.start_kill(),
        };
        if let Err(e) = terminated {
            tracing::debug!(port = self.port, error = %e, "Server terminate signal failed");
        }

        let exited = match tokio::time::timeout(STOP_WAIT, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(port = self.port, %status, "Project server stopped");
                true
            }
            Ok(Err(e)) => {
                tracing::debug!(port = self.port, error = %e, "Waiting for server exit failed");
                false
            }
            Err(_) => {
                tracing::debug!(port = self.port, "Server did not exit within grace period, killing");
                false
            }
        };

        // Whatever is left of the group, including a server that ignored SIGTERM.
        if let Some(pgid) = group {
            if let Err(e) = signal_group(pgid, GroupSignal::Kill) {
                tracing::trace!(port = self.port, error = %e, "Process group already gone");
            }
        }
        if !exited {
            if let Err(e) = child.start_kill() {
                tracing::debug!(port = self.port, error = %e, "Server kill failed");
            }
            let _ = tokio::time::timeout(STOP_WAIT, child.wait()).await;
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        // `kill_on_drop` only reaches the npm process itself.
        if let (Some(_), Some(pgid)) = (self.child.as_ref(), self.group) {
            let _ = signal_group(pgid, GroupSignal::Kill);
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum GroupSignal {
    Terminate,
    Kill,
}

#[cfg(unix)]
fn signal_group(pgid: u32, signal: GroupSignal) -> std::io::Result<()> {
    let signal = match signal {
        GroupSignal::Terminate => libc::SIGTERM,
        GroupSignal::Kill => libc::SIGKILL,
    };
    // SAFETY: killpg takes plain integers and touches no memory of ours.
    let rc = unsafe { libc::killpg(pgid as libc::pid_t, signal) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn signal_group(_pgid: u32, _signal: GroupSignal) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "process groups are unix-only",
    ))
}

/// Provisioner driving `git` and `npm` on the host.
#[derive(Debug, Clone)]
pub struct RepoProvisioner {
    npm_path: String,
    install_timeout: Option<Duration>,
}

impl RepoProvisioner {
    pub fn new(npm_path: impl Into<String>) -> Self {
        Self {
            npm_path: npm_path.into(),
            install_timeout: None,
        }
    }

    pub fn with_install_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.install_timeout = timeout;
        self
    }

    async fn clone_repo(&self, repo_url: &str, work_dir: &Path) -> ReviewResult<()> {
        if tokio::fs::try_exists(work_dir).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(work_dir).await.map_err(|e| {
                ReviewError::Provisioning(format!("failed to clear {}: {}", work_dir.display(), e))
            })?;
        }
        if let Some(parent) = work_dir.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let output = Command::new("git")
            .args(["clone", "--depth", "1", repo_url])
            .arg(work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ReviewError::Provisioning(format!("failed to run git: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ReviewError::Provisioning(format!(
                "git clone {} failed ({}): {}",
                repo_url,
                output.status,
                stderr.trim()
            )));
        }
        tracing::info!(repo_url, work_dir = %work_dir.display(), "Repository cloned");
        Ok(())
    }

    async fn write_env(&self, work_dir: &Path, env: &BTreeMap<String, String>) -> ReviewResult<()> {
        tokio::fs::write(work_dir.join(".env"), render_env_file(env))
            .await
            .map_err(|e| ReviewError::Provisioning(format!("failed to write .env: {}", e)))?;
        tracing::debug!(keys = env.len(), "Environment file written");
        Ok(())
    }

    async fn install(&self, work_dir: &Path) -> ReviewResult<()> {
        let mut child = Command::new(&self.npm_path)
            .arg("install")
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ReviewError::Provisioning(format!("failed to spawn {} install: {}", self.npm_path, e))
            })?;

        let status = match self.install_timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait())
                .await
                .map_err(|_| {
                    ReviewError::Provisioning(format!(
                        "{} install exceeded {}s",
                        self.npm_path,
                        limit.as_secs()
                    ))
                })?,
            None => child.wait().await,
        }
        .map_err(|e| ReviewError::Provisioning(format!("{} install failed: {}", self.npm_path, e)))?;

        if !status.success() {
            return Err(ReviewError::Provisioning(format!(
                "{} install exited with {}",
                self.npm_path, status
            )));
        }
        tracing::info!(work_dir = %work_dir.display(), "Dependencies installed");
        Ok(())
    }
}

#[async_trait]
impl Provisioner for RepoProvisioner {
    async fn provision(
        &self,
        repo_url: &str,
        work_dir: &Path,
        env: &BTreeMap<String, String>,
    ) -> ReviewResult<()> {
        self.clone_repo(repo_url, work_dir).await?;
        tokio::try_join!(self.write_env(work_dir, env), self.install(work_dir))?;
        Ok(())
    }

    async fn start_server(&self, work_dir: &Path, port: u16) -> ReviewResult<ServerHandle> {
        let mut handle = ServerHandle::new(self.npm_path.clone(), work_dir, port);
        handle.start().await?;
        Ok(handle)
    }
}
