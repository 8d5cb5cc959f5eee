//! Configuration and environment discovery
//!
//! The environment (working directory, home directory, selected config file)
//! is resolved once at startup and passed into the engine by reference.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::{VisageError, VisageResult};
use crate::playwright::Browser;

/// Name of the configuration file, both project-local and user-global.
pub const CONFIG_FILE_NAME: &str = "visage.json";

/// Manifest that marks a directory as a component project.
pub const MANIFEST_FILE_NAME: &str = "package.json";

/// Visage configuration, loaded from `visage.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Storybook base URL (required)
    #[serde(default)]
    pub base_url: String,

    /// Id of the element every story renders into
    #[serde(default = "default_root_element")]
    pub root_element: String,

    /// Maximum number of stories captured at once
    #[serde(default = "default_max_threads")]
    pub max_threads: usize,

    /// Wall-clock budget for one story's capture
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Pause between readiness and screenshot, for transitions to finish
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    /// Viewport label requested from Storybook and recorded in fingerprints
    #[serde(default = "default_viewport")]
    pub viewport: String,

    /// Story ids or component names excluded from comparison
    #[serde(default)]
    pub skip: Vec<String>,

    /// Baseline directory, relative to the project root unless absolute
    #[serde(default = "default_baseline_dir")]
    pub baseline_dir: PathBuf,

    /// Command that starts the Storybook dev server (e.g. `npm start`)
    #[serde(default)]
    pub start_command: Option<String>,

    /// How long to wait for the dev server to answer
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,

    /// Browser engine used for captures
    #[serde(default)]
    pub browser: Browser,
}

fn default_root_element() -> String {
    "storybook-root".to_string()
}

fn default_max_threads() -> usize {
    4
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_settle_ms() -> u64 {
    1000
}

fn default_viewport() -> String {
    "full".to_string()
}

fn default_baseline_dir() -> PathBuf {
    PathBuf::from(".visage/baselines")
}

fn default_startup_timeout_secs() -> u64 {
    60
}

impl Config {
    /// Create a configuration with defaults for everything but the base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            root_element: default_root_element(),
            max_threads: default_max_threads(),
            timeout_secs: default_timeout_secs(),
            settle_ms: default_settle_ms(),
            viewport: default_viewport(),
            skip: Vec::new(),
            baseline_dir: default_baseline_dir(),
            start_command: None,
            startup_timeout_secs: default_startup_timeout_secs(),
            browser: Browser::default(),
        }
    }

    /// Parse and validate a configuration document
    pub fn from_json(json: &str) -> VisageResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration file
    pub fn load(path: &Path) -> VisageResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| VisageError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Loaded configuration from {}", path.display());
        Self::from_json(&content)
    }

    pub fn validate(&self) -> VisageResult<()> {
        if self.base_url.trim().is_empty() {
            return Err(VisageError::InvalidConfig("base_url is required".into()));
        }
        Url::parse(&self.base_url).map_err(|e| {
            VisageError::InvalidConfig(format!("base_url '{}' is not a valid URL: {}", self.base_url, e))
        })?;
        if self.root_element_id().is_empty() {
            return Err(VisageError::InvalidConfig("root_element must not be empty".into()));
        }
        if self.max_threads == 0 {
            return Err(VisageError::InvalidConfig("max_threads must be at least 1".into()));
        }
        if self.timeout_secs == 0 {
            return Err(VisageError::InvalidConfig("timeout_secs must be at least 1".into()));
        }
        Ok(())
    }

    /// Root element id with any leading `#` removed
    pub fn root_element_id(&self) -> &str {
        let trimmed = self.root_element.trim();
        trimmed.strip_prefix('#').unwrap_or(trimmed)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    /// Resolve the baseline directory against a project root
    pub fn baseline_dir_in(&self, project_root: &Path) -> PathBuf {
        if self.baseline_dir.is_absolute() {
            self.baseline_dir.clone()
        } else {
            project_root.join(&self.baseline_dir)
        }
    }
}

/// Process environment, resolved once at startup
#[derive(Debug, Clone)]
pub struct Environment {
    pub cwd: PathBuf,
    pub home: PathBuf,
    pub config_path: PathBuf,
}

impl Environment {
    /// Resolve the environment from the running process
    pub fn discover() -> VisageResult<Self> {
        Self::discover_in(std::env::current_dir()?)
    }

    /// Resolve the environment for a project directory other than the
    /// working directory
    pub fn discover_in(cwd: PathBuf) -> VisageResult<Self> {
        let home = dirs::home_dir().ok_or(VisageError::HomeNotFound)?;
        Self::resolve(cwd, home)
    }

    /// Resolve the environment from explicit directories.
    ///
    /// The project-local `visage.json` wins over `~/.config/visage.json`.
    pub fn resolve(cwd: PathBuf, home: PathBuf) -> VisageResult<Self> {
        let local = cwd.join(CONFIG_FILE_NAME);
        let global = home.join(".config").join(CONFIG_FILE_NAME);

        let config_path = if local.is_file() {
            local
        } else if global.is_file() {
            global
        } else {
            return Err(VisageError::ConfigNotFound { local, global });
        };

        debug!("Using configuration {}", config_path.display());

        Ok(Self {
            cwd,
            home,
            config_path,
        })
    }

    pub fn load_config(&self) -> VisageResult<Config> {
        Config::load(&self.config_path)
    }
}
