//! Storybook dev server supervision
//!
//! The server is started through the shell in its own process group so the
//! whole tree (npm, node, watchers) can be signalled at once on stop.

use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{VisageError, VisageResult};

/// How long the server gets to exit after SIGTERM
const STOP_GRACE: Duration = Duration::from_secs(2);

/// How to start and probe the dev server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Shell command, run with `sh -c`
    pub command: String,

    /// Directory the command runs in
    pub working_dir: PathBuf,

    /// URL polled until it answers
    pub base_url: String,

    pub startup_timeout: Duration,

    /// Pause between health probes
    pub poll_interval: Duration,
}

impl ServerConfig {
    /// Server settings from the configuration, if it names a start command
    pub fn from_config(config: &Config, project_root: &Path) -> Option<Self> {
        let command = config.start_command.as_deref()?.trim();
        if command.is_empty() {
            return None;
        }

        Some(Self {
            command: command.to_string(),
            working_dir: project_root.to_path_buf(),
            base_url: config.base_url.clone(),
            startup_timeout: config.startup_timeout(),
            poll_interval: Duration::from_millis(250),
        })
    }
}

/// Handle to a running dev server. Await [`StorybookServer::stop`] for a
/// graceful shutdown; dropping the handle kills the server outright.
pub struct StorybookServer {
    child: Option<Child>,
    base_url: String,
}

impl StorybookServer {
    /// Start the server and wait until `base_url` answers
    pub async fn start(config: ServerConfig) -> VisageResult<Self> {
        let mut server = Self::spawn(&config)?;
        server.wait_for_healthy(&config).await?;
        info!("Dev server is up at {}", server.base_url);
        Ok(server)
    }

    fn spawn(config: &ServerConfig) -> VisageResult<Self> {
        info!("Starting dev server: {}", config.command);

        let child = Command::new("sh")
            .arg("-c")
            .arg(&config.command)
            .current_dir(&config.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0)
            .spawn()
            .map_err(|e| VisageError::ServerStartup(format!("failed to spawn '{}': {}", config.command, e)))?;

        Ok(Self {
            child: Some(child),
            base_url: config.base_url.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Poll the base URL until it answers or the startup window closes
    async fn wait_for_healthy(&mut self, config: &ServerConfig) -> VisageResult<()> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()?;

        let start = Instant::now();
        let mut attempts = 0;

        while start.elapsed() < config.startup_timeout {
            attempts += 1;

            if let Some(status) = self.child.as_mut().and_then(|c| c.try_wait().ok().flatten()) {
                return Err(VisageError::ServerStartup(format!(
                    "'{}' exited with {}",
                    config.command, status
                )));
            }

            match client.get(&config.base_url).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) => debug!("Health check returned {}", resp.status()),
                Err(e) => {
                    if attempts == 1 {
                        info!("Waiting for dev server to start...");
                    }
                    if !e.is_connect() {
                        warn!("Health check error: {}", e);
                    }
                }
            }

            sleep(config.poll_interval).await;
        }

        Err(VisageError::ServerHealthCheck(attempts))
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// Stop the server: SIGTERM to the process group, SIGKILL after the
    /// grace period
    pub async fn stop(&mut self) -> VisageResult<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        info!("Stopping dev server (pid: {})", child.id());

        let pgid = Pid::from_raw(child.id() as i32);
        if killpg(pgid, Signal::SIGTERM).is_ok() {
            let deadline = Instant::now() + STOP_GRACE;
            while Instant::now() < deadline {
                if child.try_wait()?.is_some() {
                    debug!("Dev server exited");
                    let _ = killpg(pgid, Signal::SIGKILL);
                    return Ok(());
                }
                sleep(Duration::from_millis(50)).await;
            }
            warn!("Dev server ignored SIGTERM, killing it");
        }

        Self::kill(pgid, &mut child)
    }

    fn kill(pgid: Pid, child: &mut Child) -> VisageResult<()> {
        let _ = killpg(pgid, Signal::SIGKILL);
        let _ = child.kill();
        child.wait()?;
        Ok(())
    }
}

impl Drop for StorybookServer {
    /// Last resort when [`StorybookServer::stop`] was not awaited; never blocks
    /// on a graceful shutdown.
    fn drop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        let pgid = Pid::from_raw(child.id() as i32);
        if let Err(e) = Self::kill(pgid, &mut child) {
            warn!("Failed to stop dev server: {}", e);
        }
    }
}
