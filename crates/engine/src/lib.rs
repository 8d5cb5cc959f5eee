//! Visage engine
//!
//! Visual regression checks for Storybook component libraries:
//! - Discovers stories in a project's source tree
//! - Renders each story alone in a headless browser driven over Playwright
//! - Fingerprints the rendering (perceptual image hash, markup hash, style hash)
//! - Compares fingerprints against stored baselines
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Orchestrator                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  StoryCatalog::discover() -> [Story]                        │
//! │  capture_all([Story])        (≤ max_threads in flight)      │
//! │    ├── BrowserLauncher::launch() -> BrowserContext          │
//! │    ├── CaptureSession::run(story) -> CaptureResult          │
//! │    │     navigate, wait, settle, screenshot, markup, style  │
//! │    └── Fingerprint::from_capture(..)                        │
//! │  compare(current, baseline) -> RegressionResult             │
//! │  BaselineStore::store(..)    (created / updated baselines)  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod baseline;
pub mod browser;
pub mod capture;
pub mod compare;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod orchestrator;
pub mod playwright;
pub mod server;
pub mod story;

pub use baseline::{BaselineKey, BaselineStore, FileBaselineStore, MemoryBaselineStore};
pub use browser::{BrowserContext, BrowserLauncher};
pub use capture::{CaptureResult, CaptureSettings, CaptureStep};
pub use compare::{RegressionResult, RegressionStatus};
pub use config::{Config, Environment};
pub use error::{VisageError, VisageResult};
pub use fingerprint::Fingerprint;
pub use orchestrator::{Orchestrator, RunOptions, RunReport, RunSummary, StoryError};
pub use playwright::{PlaywrightConfig, PlaywrightLauncher};
pub use server::{ServerConfig, StorybookServer};
pub use story::{discover_stories, Category, Story, StoryCatalog};
