//! Scripted browser and project fixtures shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use url::Url;

use visage_engine::{
    BaselineKey, BaselineStore, BrowserContext, BrowserLauncher, CaptureSettings, Config, Fingerprint,
    MemoryBaselineStore, VisageError, VisageResult,
};

/// How the scripted browser renders one story
#[derive(Debug, Clone, Default)]
pub struct Behavior {
    /// Extra time spent loading the page
    pub delay: Duration,
    /// Never finish loading
    pub hang: bool,
    /// Fail navigation outright
    pub fail_navigate: bool,
    /// Stylesheet text reported for the story
    pub style: Option<String>,
}

#[derive(Default)]
struct Counters {
    active: AtomicUsize,
    max_active: AtomicUsize,
    launches: AtomicUsize,
    closed: AtomicUsize,
}

/// Launcher for scripted contexts. Tracks how many contexts are alive.
#[derive(Clone, Default)]
pub struct FakeLauncher {
    behaviors: Arc<Mutex<HashMap<String, Behavior>>>,
    default_behavior: Arc<Mutex<Behavior>>,
    counters: Arc<Counters>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Behavior for every story without its own entry
    pub fn set_default(&self, behavior: Behavior) {
        *self.default_behavior.lock().unwrap() = behavior;
    }

    pub fn set(&self, story_id: &str, behavior: Behavior) {
        self.behaviors.lock().unwrap().insert(story_id.to_string(), behavior);
    }

    pub fn active(&self) -> usize {
        self.counters.active.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.counters.max_active.load(Ordering::SeqCst)
    }

    pub fn launches(&self) -> usize {
        self.counters.launches.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.counters.closed.load(Ordering::SeqCst)
    }

    fn behavior_for(&self, story_id: &str) -> Behavior {
        self.behaviors
            .lock()
            .unwrap()
            .get(story_id)
            .cloned()
            .unwrap_or_else(|| self.default_behavior.lock().unwrap().clone())
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self) -> VisageResult<Box<dyn BrowserContext>> {
        self.counters.launches.fetch_add(1, Ordering::SeqCst);
        let active = self.counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_active.fetch_max(active, Ordering::SeqCst);

        Ok(Box::new(FakeContext {
            launcher: self.clone(),
            story_id: None,
            behavior: Behavior::default(),
        }))
    }
}

struct FakeContext {
    launcher: FakeLauncher,
    story_id: Option<String>,
    behavior: Behavior,
}

impl Drop for FakeContext {
    fn drop(&mut self) {
        self.launcher.counters.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl BrowserContext for FakeContext {
    async fn navigate(&mut self, url: &str) -> VisageResult<()> {
        let url = Url::parse(url)?;
        let story_id = url
            .query_pairs()
            .find(|(key, _)| key == "id")
            .map(|(_, value)| value.into_owned())
            .ok_or_else(|| VisageError::Browser(format!("no story id in {}", url)))?;

        self.behavior = self.launcher.behavior_for(&story_id);
        self.story_id = Some(story_id);

        if self.behavior.fail_navigate {
            return Err(VisageError::Browser("net::ERR_CONNECTION_REFUSED".into()));
        }
        if self.behavior.hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        tokio::time::sleep(self.behavior.delay).await;
        Ok(())
    }

    async fn wait_present(&mut self, _selector: &str) -> VisageResult<()> {
        Ok(())
    }

    async fn wait_ready(&mut self, _selector: &str) -> VisageResult<()> {
        Ok(())
    }

    async fn screenshot_element(&mut self, _selector: &str) -> VisageResult<Vec<u8>> {
        Ok(split_png(32, 32))
    }

    async fn evaluate(&mut self, expression: &str) -> VisageResult<String> {
        if expression.contains("outerHTML") {
            let id = self.story_id.as_deref().unwrap_or_default();
            Ok(format!("<div id=\"storybook-root\"><span>{}</span></div>", id))
        } else {
            Ok(self
                .behavior
                .style
                .clone()
                .unwrap_or_else(|| "body { margin: 0px; }".to_string()))
        }
    }

    async fn close(self: Box<Self>) -> VisageResult<()> {
        self.launcher.counters.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// PNG whose left half is dark and right half light
pub fn split_png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbaImage::from_fn(width, height, |x, _| {
        if x < width / 2 {
            Rgba([20, 20, 20, 255])
        } else {
            Rgba([235, 235, 235, 255])
        }
    });

    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

/// Project directory with a manifest and the given files
pub fn project(files: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("package.json"), r#"{ "name": "design-system" }"#).unwrap();
    for (path, content) in files {
        write_file(dir.path(), path, content);
    }
    dir
}

pub fn write_file(root: &Path, path: &str, content: &str) {
    let path = root.join(path);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

/// Capture settings without the settle pause
pub fn settings() -> CaptureSettings {
    let mut config = Config::new("http://localhost:6006");
    config.settle_ms = 0;
    CaptureSettings::from_config(&config).unwrap()
}

/// Memory store whose `nth` write (1-based) fails
pub struct FailingStore {
    pub inner: MemoryBaselineStore,
    writes: usize,
    fail_on: usize,
}

impl FailingStore {
    pub fn failing_on(fail_on: usize) -> Self {
        Self {
            inner: MemoryBaselineStore::new(),
            writes: 0,
            fail_on,
        }
    }
}

impl BaselineStore for FailingStore {
    fn load(&self, key: &BaselineKey) -> VisageResult<Option<Fingerprint>> {
        self.inner.load(key)
    }

    fn store(&mut self, key: &BaselineKey, fingerprint: &Fingerprint) -> VisageResult<()> {
        self.writes += 1;
        if self.writes == self.fail_on {
            return Err(VisageError::Baseline(format!("disk full writing {}", key)));
        }
        self.inner.store(key, fingerprint)
    }
}
