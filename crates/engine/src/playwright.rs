//! Playwright browser automation
//!
//! Every launched context is a separate `node` process running a small
//! bridge script. The bridge owns one browser and one page and answers
//! newline-delimited JSON requests on stdin/stdout.

use async_trait::async_trait;
use base64::Engine;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command as TokioCommand};
use tracing::{debug, info, warn};

use crate::browser::{BrowserContext, BrowserLauncher};
use crate::config::Config;
use crate::error::{VisageError, VisageResult};

/// How long a bridge gets to close its browser before it is killed
const BRIDGE_EXIT_GRACE: Duration = Duration::from_secs(5);

const BRIDGE_SCRIPT: &str = r#"
const readline = require('readline');

const send = (message) => process.stdout.write(JSON.stringify(message) + '\n');

(async () => {
  const [browserName, headless, width, height] = process.argv.slice(2);
  const playwright = require(require.resolve('playwright', { paths: [process.cwd()] }));
  const browser = await playwright[browserName].launch({ headless: headless === 'true' });
  process.on('SIGTERM', () => {
    browser.close().catch(() => {}).finally(() => process.exit(0));
  });
  const context = await browser.newContext({
    viewport: { width: Number(width), height: Number(height) }
  });
  const page = await context.newPage();

  const ops = {
    navigate: async (req) => { await page.goto(req.url, { waitUntil: 'load', timeout: req.timeout_ms }); return null; },
    wait_present: async (req) => { await page.waitForSelector(req.selector, { state: 'attached', timeout: req.timeout_ms }); return null; },
    wait_ready: async (req) => { await page.waitForSelector(req.selector, { state: 'visible', timeout: req.timeout_ms }); return null; },
    screenshot: async (req) => (await page.locator(req.selector).first().screenshot()).toString('base64'),
    evaluate: async (req) => { const value = await page.evaluate(req.expression); return value == null ? '' : String(value); },
    close: async () => { await browser.close(); return null; },
  };

  send({ ready: true });

  const input = readline.createInterface({ input: process.stdin });
  for await (const line of input) {
    const req = JSON.parse(line);
    try {
      const op = ops[req.op];
      if (!op) throw new Error('unknown op ' + req.op);
      send({ id: req.id, ok: true, value: await op(req) });
    } catch (error) {
      send({ id: req.id, ok: false, error: error.message });
    }
    if (req.op === 'close') break;
  }
  await browser.close().catch(() => {});
})().catch((error) => {
  send({ ready: false, error: String((error && error.stack) || error) });
  process.exit(1);
});
"#;

/// Browser engine driven by Playwright
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

/// Configuration for Playwright
#[derive(Debug, Clone)]
pub struct PlaywrightConfig {
    /// Node.js executable
    pub node_binary: PathBuf,

    /// Directory Playwright is resolved from (the project root)
    pub working_dir: PathBuf,

    pub browser: Browser,
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,

    /// Upper bound for a single navigation or wait inside the browser
    pub step_timeout: Duration,
}

impl PlaywrightConfig {
    pub fn from_config(config: &Config, project_root: &Path) -> Self {
        Self {
            working_dir: project_root.to_path_buf(),
            browser: config.browser,
            step_timeout: config.timeout(),
            ..Default::default()
        }
    }
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            node_binary: PathBuf::from("node"),
            working_dir: PathBuf::from("."),
            browser: Browser::Chromium,
            headless: true,
            viewport_width: 1280,
            viewport_height: 720,
            step_timeout: Duration::from_secs(30),
        }
    }
}

/// Launches one bridge process per context
pub struct PlaywrightLauncher {
    config: PlaywrightConfig,
    script_path: PathBuf,
    // Holds the bridge script for the launcher's lifetime.
    _script_dir: TempDir,
}

impl PlaywrightLauncher {
    pub fn new(config: PlaywrightConfig) -> VisageResult<Self> {
        Self::check_playwright_installed(&config.working_dir)?;

        let script_dir = tempfile::tempdir()?;
        let script_path = script_dir.path().join("visage-bridge.js");
        std::fs::write(&script_path, BRIDGE_SCRIPT)?;

        info!(
            "Using Playwright {} ({}x{}, headless: {})",
            config.browser.as_str(),
            config.viewport_width,
            config.viewport_height,
            config.headless
        );

        Ok(Self {
            config,
            script_path,
            _script_dir: script_dir,
        })
    }

    fn check_playwright_installed(working_dir: &Path) -> VisageResult<()> {
        let status = Command::new("npx")
            .args(["playwright", "--version"])
            .current_dir(working_dir)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match status {
            Ok(status) if status.success() => Ok(()),
            _ => Err(VisageError::PlaywrightNotFound),
        }
    }
}

#[async_trait]
impl BrowserLauncher for PlaywrightLauncher {
    async fn launch(&self) -> VisageResult<Box<dyn BrowserContext>> {
        let child = TokioCommand::new(&self.config.node_binary)
            .arg(&self.script_path)
            .arg(self.config.browser.as_str())
            .arg(self.config.headless.to_string())
            .arg(self.config.viewport_width.to_string())
            .arg(self.config.viewport_height.to_string())
            .current_dir(&self.config.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                VisageError::Browser(format!(
                    "Failed to spawn {}: {}",
                    self.config.node_binary.display(),
                    e
                ))
            })?;

        let mut context = PlaywrightContext::new(child, self.config.step_timeout)?;
        context.wait_for_bridge().await?;

        debug!("Browser context ready (pid: {:?})", context.pid());
        Ok(Box::new(context))
    }
}

#[derive(Debug, Serialize)]
struct BridgeRequest<'a> {
    id: u64,
    #[serde(flatten)]
    op: BridgeOp<'a>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum BridgeOp<'a> {
    Navigate { url: &'a str, timeout_ms: u64 },
    WaitPresent { selector: &'a str, timeout_ms: u64 },
    WaitReady { selector: &'a str, timeout_ms: u64 },
    Screenshot { selector: &'a str },
    Evaluate { expression: &'a str },
    Close,
}

#[derive(Debug, Deserialize)]
struct BridgeResponse {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    ready: Option<bool>,
    #[serde(default)]
    value: serde_json::Value,
    #[serde(default)]
    error: Option<String>,
}

/// A running bridge process.
///
/// Dropping a context without closing it sends the bridge SIGTERM so it can
/// shut its browser down, and kills it if it is still alive after
/// [`BRIDGE_EXIT_GRACE`].
pub struct PlaywrightContext {
    child: Option<Child>,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    next_id: u64,
    step_timeout_ms: u64,
}

impl PlaywrightContext {
    fn new(mut child: Child, step_timeout: Duration) -> VisageResult<Self> {
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| VisageError::Browser("bridge stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| VisageError::Browser("bridge stdout unavailable".into()))?;

        Ok(Self {
            child: Some(child),
            stdin,
            stdout: BufReader::new(stdout).lines(),
            next_id: 0,
            step_timeout_ms: step_timeout.as_millis() as u64,
        })
    }

    fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Next protocol message from the bridge; other output is logged and skipped
    async fn next_response(&mut self) -> VisageResult<BridgeResponse> {
        loop {
            let line = self
                .stdout
                .next_line()
                .await?
                .ok_or_else(|| VisageError::Browser("browser bridge exited".into()))?;

            match serde_json::from_str::<BridgeResponse>(&line) {
                Ok(response) => return Ok(response),
                Err(_) => debug!("[bridge] {}", line),
            }
        }
    }

    async fn wait_for_bridge(&mut self) -> VisageResult<()> {
        loop {
            let response = self.next_response().await?;
            match response.ready {
                Some(true) => return Ok(()),
                Some(false) => {
                    return Err(VisageError::Browser(format!(
                        "Browser failed to start: {}",
                        response.error.unwrap_or_default()
                    )))
                }
                None => continue,
            }
        }
    }

    async fn call(&mut self, op: BridgeOp<'_>) -> VisageResult<serde_json::Value> {
        self.next_id += 1;
        let id = self.next_id;

        let mut line = serde_json::to_string(&BridgeRequest { id, op })?;
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;

        loop {
            let response = self.next_response().await?;
            if response.id != Some(id) {
                continue;
            }
            return if response.ok {
                Ok(response.value)
            } else {
                Err(VisageError::Browser(
                    response.error.unwrap_or_else(|| "unknown bridge error".into()),
                ))
            };
        }
    }

    async fn call_for_text(&mut self, op: BridgeOp<'_>) -> VisageResult<String> {
        match self.call(op).await? {
            serde_json::Value::String(text) => Ok(text),
            serde_json::Value::Null => Ok(String::new()),
            other => Ok(other.to_string()),
        }
    }
}

#[async_trait]
impl BrowserContext for PlaywrightContext {
    async fn navigate(&mut self, url: &str) -> VisageResult<()> {
        let timeout_ms = self.step_timeout_ms;
        self.call(BridgeOp::Navigate { url, timeout_ms }).await?;
        Ok(())
    }

    async fn wait_present(&mut self, selector: &str) -> VisageResult<()> {
        let timeout_ms = self.step_timeout_ms;
        self.call(BridgeOp::WaitPresent { selector, timeout_ms }).await?;
        Ok(())
    }

    async fn wait_ready(&mut self, selector: &str) -> VisageResult<()> {
        let timeout_ms = self.step_timeout_ms;
        self.call(BridgeOp::WaitReady { selector, timeout_ms }).await?;
        Ok(())
    }

    async fn screenshot_element(&mut self, selector: &str) -> VisageResult<Vec<u8>> {
        let encoded = self.call_for_text(BridgeOp::Screenshot { selector }).await?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| VisageError::Browser(format!("Invalid screenshot encoding: {}", e)))
    }

    async fn evaluate(&mut self, expression: &str) -> VisageResult<String> {
        self.call_for_text(BridgeOp::Evaluate { expression }).await
    }

    async fn close(mut self: Box<Self>) -> VisageResult<()> {
        if let Err(e) = self.call(BridgeOp::Close).await {
            warn!("Browser bridge did not close cleanly: {}", e);
        }

        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        match tokio::time::timeout(BRIDGE_EXIT_GRACE, child.wait()).await {
            Ok(status) => {
                debug!("Browser context exited: {:?}", status?);
            }
            Err(_) => {
                warn!("Browser context did not exit, killing it");
                child.kill().await?;
            }
        }
        Ok(())
    }
}

impl Drop for PlaywrightContext {
    fn drop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        let Some(pid) = child.id() else {
            return;
        };

        debug!("Browser context dropped, terminating bridge (pid: {})", pid);
        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);

        // Without a runtime the child is dropped here and kill_on_drop applies.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if tokio::time::timeout(BRIDGE_EXIT_GRACE, child.wait()).await.is_err() {
                    warn!("Browser bridge {} ignored SIGTERM, killing it", pid);
                    let _ = child.kill().await;
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_request_shape() {
        let request = BridgeRequest {
            id: 7,
            op: BridgeOp::WaitReady {
                selector: "#root",
                timeout_ms: 500,
            },
        };
        let json: serde_json::Value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "id": 7, "op": "wait_ready", "selector": "#root", "timeout_ms": 500 })
        );

        let close = serde_json::to_value(BridgeRequest { id: 8, op: BridgeOp::Close }).unwrap();
        assert_eq!(close, serde_json::json!({ "id": 8, "op": "close" }));
    }

    #[test]
    fn test_bridge_response_parsing() {
        let ok: BridgeResponse = serde_json::from_str(r#"{"id":1,"ok":true,"value":"<div></div>"}"#).unwrap();
        assert_eq!(ok.id, Some(1));
        assert!(ok.ok);
        assert_eq!(ok.value, serde_json::json!("<div></div>"));

        let ready: BridgeResponse = serde_json::from_str(r#"{"ready":true}"#).unwrap();
        assert_eq!(ready.ready, Some(true));
        assert!(ready.id.is_none());
    }

    #[test]
    fn test_browser_from_config() {
        let config: Config =
            serde_json::from_str(r#"{ "base_url": "http://localhost:6006", "browser": "webkit" }"#).unwrap();
        let pw = PlaywrightConfig::from_config(&config, Path::new("/project"));
        assert_eq!(pw.browser, Browser::Webkit);
        assert_eq!(pw.working_dir, PathBuf::from("/project"));
        assert_eq!(pw.step_timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_dropped_context_terminates_bridge() {
        let tmp = tempfile::tempdir().unwrap();
        let marker = tmp.path().join("terminated");
        let script = format!(
            "trap 'touch {}; exit 0' TERM; while true; do sleep 0.05; done",
            marker.display()
        );
        let child = TokioCommand::new("sh")
            .arg("-c")
            .arg(&script)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .unwrap();

        let context = PlaywrightContext::new(child, Duration::from_secs(1)).unwrap();
        assert!(context.pid().is_some());
        // Give the shell time to install its trap.
        tokio::time::sleep(Duration::from_millis(200)).await;
        drop(context);

        let deadline = std::time::Instant::now() + Duration::from_secs(3);
        while !marker.exists() && std::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        assert!(marker.exists(), "bridge was killed without a chance to clean up");
    }
}
