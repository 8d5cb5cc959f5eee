//! Capture session: render one story in an isolated browser context and
//! extract its screenshot, markup and stylesheet text

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::browser::BrowserContext;
use crate::config::Config;
use crate::error::{VisageError, VisageResult};
use crate::story::Story;

/// Expression returning the text of the first rule of the first stylesheet
pub const STYLE_QUERY: &str = "document.styleSheets[0].cssRules[0].cssText";

/// Ordered steps of a capture; each one gates the next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureStep {
    Navigate,
    WaitPresent,
    WaitReady,
    Screenshot,
    ExtractMarkup,
    ExtractStyle,
}

impl CaptureStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureStep::Navigate => "navigate",
            CaptureStep::WaitPresent => "wait-present",
            CaptureStep::WaitReady => "wait-ready",
            CaptureStep::Screenshot => "screenshot",
            CaptureStep::ExtractMarkup => "extract-markup",
            CaptureStep::ExtractStyle => "extract-style",
        }
    }
}

impl fmt::Display for CaptureStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw output of rendering one story. Only constructed when all three parts
/// were extracted.
#[derive(Debug, Clone)]
pub struct CaptureResult {
    screenshot: Vec<u8>,
    markup: String,
    style: String,
}

impl CaptureResult {
    pub fn new(screenshot: Vec<u8>, markup: String, style: String) -> VisageResult<Self> {
        if screenshot.is_empty() {
            return Err(empty(CaptureStep::Screenshot, "screenshot is empty"));
        }
        if markup.is_empty() {
            return Err(empty(CaptureStep::ExtractMarkup, "root element markup is empty"));
        }
        if style.is_empty() {
            return Err(empty(CaptureStep::ExtractStyle, "no stylesheet rules found"));
        }
        Ok(Self {
            screenshot,
            markup,
            style,
        })
    }

    pub fn screenshot(&self) -> &[u8] {
        &self.screenshot
    }

    pub fn markup(&self) -> &str {
        &self.markup
    }

    pub fn style(&self) -> &str {
        &self.style
    }
}

fn empty(step: CaptureStep, reason: &str) -> VisageError {
    VisageError::CaptureStep {
        step,
        reason: reason.to_string(),
    }
}

/// Rendering settings shared by every capture of a run
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub base_url: Url,
    pub root_element: String,
    pub viewport: String,
    pub settle: Duration,
}

impl CaptureSettings {
    pub fn from_config(config: &Config) -> VisageResult<Self> {
        Ok(Self {
            base_url: Url::parse(&config.base_url)?,
            root_element: config.root_element_id().to_string(),
            viewport: config.viewport.clone(),
            settle: config.settle(),
        })
    }

    /// CSS selector of the root element
    pub fn root_selector(&self) -> String {
        format!("#{}", self.root_element)
    }

    /// Expression returning the root element's serialized markup
    pub fn markup_query(&self) -> String {
        format!("document.querySelector(\"#{}\").outerHTML", self.root_element)
    }

    /// Storybook iframe URL rendering `story` alone
    pub fn story_url(&self, story: &Story) -> VisageResult<Url> {
        let mut base = self.base_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let mut url = base.join("iframe.html")?;
        url.set_query(Some(&format!(
            "globals=viewport:{}&args=&id={}&viewMode=story",
            self.viewport,
            story.id()
        )));
        Ok(url)
    }
}

/// Drives one browser context through the capture steps for a single story
pub struct CaptureSession<'a> {
    settings: &'a CaptureSettings,
    context: &'a mut dyn BrowserContext,
}

impl<'a> CaptureSession<'a> {
    pub fn new(settings: &'a CaptureSettings, context: &'a mut dyn BrowserContext) -> Self {
        Self { settings, context }
    }

    /// Run every step in order; the first failure aborts the session
    pub async fn run(&mut self, story: &Story) -> VisageResult<CaptureResult> {
        let url = self.settings.story_url(story)?;
        let selector = self.settings.root_selector();

        debug!("Checking {} {} {}", story.component_name, story.name, url);

        self.context
            .navigate(url.as_str())
            .await
            .map_err(|e| e.at_step(CaptureStep::Navigate))?;

        self.context
            .wait_present(&selector)
            .await
            .map_err(|e| e.at_step(CaptureStep::WaitPresent))?;

        self.context
            .wait_ready(&selector)
            .await
            .map_err(|e| e.at_step(CaptureStep::WaitReady))?;

        tokio::time::sleep(self.settings.settle).await;

        let screenshot = self
            .context
            .screenshot_element(&selector)
            .await
            .map_err(|e| e.at_step(CaptureStep::Screenshot))?;

        let markup = self
            .context
            .evaluate(&self.settings.markup_query())
            .await
            .map_err(|e| e.at_step(CaptureStep::ExtractMarkup))?;

        let style = self
            .context
            .evaluate(STYLE_QUERY)
            .await
            .map_err(|e| e.at_step(CaptureStep::ExtractStyle))?;

        debug!(
            "Captured {} ({} byte screenshot, {} byte markup)",
            story,
            screenshot.len(),
            markup.len()
        );

        CaptureResult::new(screenshot, markup, style)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::story::Category;
    use std::path::PathBuf;

    fn story() -> Story {
        Story {
            path: PathBuf::from("src/10-atoms/Button.stories.tsx"),
            name: "PrimaryLarge".into(),
            component_name: "Button".into(),
            category: Category::Atom,
        }
    }

    fn settings(base_url: &str) -> CaptureSettings {
        let mut config = Config::new(base_url);
        config.root_element = "#root".into();
        CaptureSettings::from_config(&config).unwrap()
    }

    #[test]
    fn test_story_url() {
        let url = settings("http://localhost:6006").story_url(&story()).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:6006/iframe.html?globals=viewport:full&args=&id=atoms-button--primary-large&viewMode=story"
        );
    }

    #[test]
    fn test_story_url_keeps_base_path() {
        let url = settings("https://ci.example.com/storybook").story_url(&story()).unwrap();
        assert_eq!(url.path(), "/storybook/iframe.html");
    }

    #[test]
    fn test_queries_use_stripped_root() {
        let settings = settings("http://localhost:6006");
        assert_eq!(settings.root_selector(), "#root");
        assert_eq!(settings.markup_query(), "document.querySelector(\"#root\").outerHTML");
    }

    /// Records every call and fails at a chosen step
    struct RecordingContext {
        calls: Vec<String>,
        fail_at: Option<&'static str>,
    }

    impl RecordingContext {
        fn record(&mut self, call: &'static str, arg: &str) -> VisageResult<()> {
            self.calls.push(format!("{} {}", call, arg));
            if self.fail_at == Some(call) {
                return Err(VisageError::Browser("Timeout 30000ms exceeded".into()));
            }
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl BrowserContext for RecordingContext {
        async fn navigate(&mut self, url: &str) -> VisageResult<()> {
            self.record("navigate", url)
        }

        async fn wait_present(&mut self, selector: &str) -> VisageResult<()> {
            self.record("wait_present", selector)
        }

        async fn wait_ready(&mut self, selector: &str) -> VisageResult<()> {
            self.record("wait_ready", selector)
        }

        async fn screenshot_element(&mut self, selector: &str) -> VisageResult<Vec<u8>> {
            self.record("screenshot", selector)?;
            Ok(vec![0x89, b'P', b'N', b'G'])
        }

        async fn evaluate(&mut self, expression: &str) -> VisageResult<String> {
            self.record("evaluate", expression)?;
            Ok("body { margin: 0px; }".into())
        }

        async fn close(self: Box<Self>) -> VisageResult<()> {
            Ok(())
        }
    }

    fn quick_settings() -> CaptureSettings {
        let mut settings = settings("http://localhost:6006");
        settings.settle = Duration::ZERO;
        settings
    }

    #[tokio::test]
    async fn test_steps_run_in_order() {
        let settings = quick_settings();
        let mut context = RecordingContext {
            calls: Vec::new(),
            fail_at: None,
        };

        let result = CaptureSession::new(&settings, &mut context).run(&story()).await.unwrap();
        assert_eq!(result.style(), "body { margin: 0px; }");

        let calls: Vec<&str> = context
            .calls
            .iter()
            .map(|c| c.split(' ').next().unwrap())
            .collect();
        assert_eq!(
            calls,
            vec!["navigate", "wait_present", "wait_ready", "screenshot", "evaluate", "evaluate"]
        );
        assert_eq!(context.calls[4], format!("evaluate {}", settings.markup_query()));
        assert_eq!(context.calls[5], format!("evaluate {}", STYLE_QUERY));
    }

    #[tokio::test]
    async fn test_first_failure_aborts_and_names_step() {
        let settings = quick_settings();
        let mut context = RecordingContext {
            calls: Vec::new(),
            fail_at: Some("wait_ready"),
        };

        let err = CaptureSession::new(&settings, &mut context).run(&story()).await.unwrap_err();
        assert!(matches!(err, VisageError::CaptureStep { step: CaptureStep::WaitReady, .. }));
        assert_eq!(context.calls.len(), 3);
    }

    #[tokio::test]
    async fn test_every_failing_call_maps_to_a_step() {
        let settings = quick_settings();
        let cases = [
            ("navigate", CaptureStep::Navigate, "navigate"),
            ("wait_present", CaptureStep::WaitPresent, "wait-present"),
            ("wait_ready", CaptureStep::WaitReady, "wait-ready"),
            ("screenshot", CaptureStep::Screenshot, "screenshot"),
            ("evaluate", CaptureStep::ExtractMarkup, "extract-markup"),
        ];

        for (call, expected, name) in cases {
            let mut context = RecordingContext {
                calls: Vec::new(),
                fail_at: Some(call),
            };
            match CaptureSession::new(&settings, &mut context).run(&story()).await {
                Err(VisageError::CaptureStep { step, .. }) => {
                    assert_eq!(step, expected);
                    assert_eq!(step.to_string(), name);
                }
                other => panic!("{}: expected a step failure, got {:?}", call, other.map(|_| ())),
            }
        }
    }

    #[test]
    fn test_capture_result_requires_all_parts() {
        assert!(CaptureResult::new(vec![1], "<div/>".into(), ".a{}".into()).is_ok());
        assert!(CaptureResult::new(vec![], "<div/>".into(), ".a{}".into()).is_err());
        assert!(CaptureResult::new(vec![1], String::new(), ".a{}".into()).is_err());
        assert!(matches!(
            CaptureResult::new(vec![1], "<div/>".into(), String::new()),
            Err(VisageError::CaptureStep { step: CaptureStep::ExtractStyle, .. })
        ));
    }
}
