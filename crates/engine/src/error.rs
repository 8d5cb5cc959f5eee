//! Error types for Visage

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::capture::CaptureStep;

#[derive(Error, Debug)]
pub enum VisageError {
    #[error("No configuration file found (looked in {local} and {global})")]
    ConfigNotFound { local: PathBuf, global: PathBuf },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Home directory not found")]
    HomeNotFound,

    #[error("Project manifest not found: {0}")]
    ManifestNotFound(PathBuf),

    #[error("Failed to read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid story path: {0}")]
    InvalidStoryPath(PathBuf),

    #[error("Duplicate story id {id}: declared in {first} and {second}")]
    DuplicateStory {
        id: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("Directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Playwright not found. Install with: npx playwright install")]
    PlaywrightNotFound,

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Capture step '{step}' failed: {reason}")]
    CaptureStep { step: CaptureStep, reason: String },

    #[error("Capture of {story} timed out after {timeout:?}")]
    Timeout { story: String, timeout: Duration },

    #[error("Run cancelled")]
    Cancelled,

    #[error("Invalid screenshot: {0}")]
    InvalidScreenshot(String),

    #[error("{failed} of {total} stories failed: {summary}")]
    RunFailed {
        failed: usize,
        total: usize,
        summary: String,
    },

    #[error("Server failed to start: {0}")]
    ServerStartup(String),

    #[error("Server health check failed after {0} attempts")]
    ServerHealthCheck(usize),

    #[error("Baseline store error: {0}")]
    Baseline(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl VisageError {
    /// Attach the failing capture step to an error raised by the browser layer.
    pub fn at_step(self, step: CaptureStep) -> Self {
        match self {
            // Already attributed, or not a step failure at all.
            e @ (VisageError::CaptureStep { .. } | VisageError::Timeout { .. } | VisageError::Cancelled) => e,
            e => VisageError::CaptureStep {
                step,
                reason: e.to_string(),
            },
        }
    }
}

pub type VisageResult<T> = Result<T, VisageError>;
