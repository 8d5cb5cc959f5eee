//! Run orchestration: bounded parallel capture, comparison and baseline upkeep

use futures::FutureExt;
use serde::Serialize;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::baseline::{BaselineKey, BaselineStore};
use crate::browser::BrowserLauncher;
use crate::capture::{CaptureSession, CaptureSettings};
use crate::compare::{self, RegressionResult, RegressionStatus};
use crate::config::{Config, MANIFEST_FILE_NAME};
use crate::error::{VisageError, VisageResult};
use crate::fingerprint::Fingerprint;
use crate::story::{discover_stories, Story};

/// Knobs for one run
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Upper bound on captures in flight
    pub max_concurrency: usize,
    /// Wall-clock budget per story, covering launch through fingerprinting
    pub timeout: Duration,
    /// Story ids or component names that are reported as skipped
    pub skip: Vec<String>,
    /// Replace the baseline of failed stories with their current fingerprint
    pub update_baselines: bool,
}

impl RunOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_concurrency: config.max_threads,
            timeout: config.timeout(),
            skip: config.skip.clone(),
            update_baselines: false,
        }
    }

    pub fn with_update_baselines(mut self, update: bool) -> Self {
        self.update_baselines = update;
        self
    }

    /// Whether a story is excluded, by story id or by component name
    pub fn is_skipped(&self, story: &Story) -> bool {
        let id = story.id();
        self.skip
            .iter()
            .any(|entry| *entry == id || entry.eq_ignore_ascii_case(&story.component_name))
    }
}

/// A story whose capture could not produce a fingerprint
#[derive(Debug)]
pub struct StoryError {
    pub story_id: String,
    pub error: VisageError,
}

/// Outcome of capturing one story
#[derive(Debug)]
pub struct StoryCapture {
    pub story: Story,
    pub outcome: VisageResult<Fingerprint>,
    pub duration: Duration,
}

/// Everything a run produced. Results and errors are sorted by story id.
#[derive(Debug, Default)]
pub struct RunReport {
    pub results: Vec<RegressionResult>,
    pub errors: Vec<StoryError>,
}

/// Per-status tallies of a report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub created: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl RunReport {
    pub fn total(&self) -> usize {
        self.results.len() + self.errors.len()
    }

    pub fn count(&self, status: RegressionStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            total: self.total(),
            created: self.count(RegressionStatus::Created),
            passed: self.count(RegressionStatus::Passed),
            failed: self.count(RegressionStatus::Failed),
            skipped: self.count(RegressionStatus::Skipped),
            errors: self.errors.len(),
        }
    }

    pub fn has_failures(&self) -> bool {
        !self.errors.is_empty() || self.count(RegressionStatus::Failed) > 0
    }

    /// All-or-nothing view: the results, or one error naming every story
    /// that could not be captured.
    pub fn into_results(self) -> VisageResult<Vec<RegressionResult>> {
        if self.errors.is_empty() {
            return Ok(self.results);
        }

        let total = self.total();
        let summary = self
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.story_id, e.error))
            .collect::<Vec<_>>()
            .join("; ");

        Err(VisageError::RunFailed {
            failed: self.errors.len(),
            total,
            summary,
        })
    }

    fn sort(&mut self) {
        self.results.sort_by(|a, b| a.story_id.cmp(&b.story_id));
        self.errors.sort_by(|a, b| a.story_id.cmp(&b.story_id));
    }
}

/// Fail unless `project_root` holds a package manifest
pub fn ensure_manifest(project_root: &Path) -> VisageResult<()> {
    let manifest = project_root.join(MANIFEST_FILE_NAME);
    if manifest.is_file() {
        Ok(())
    } else {
        Err(VisageError::ManifestNotFound(manifest))
    }
}

/// Drives one regression run
pub struct Orchestrator {
    launcher: Arc<dyn BrowserLauncher>,
    settings: Arc<CaptureSettings>,
    options: RunOptions,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(launcher: Arc<dyn BrowserLauncher>, settings: CaptureSettings, options: RunOptions) -> Self {
        Self {
            launcher,
            settings: Arc::new(settings),
            options,
            cancel: CancellationToken::new(),
        }
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Token that aborts the run when cancelled. Captures in flight are torn
    /// down and pending stories are reported as cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Check every story of the project at `project_root`
    pub async fn run(&self, project_root: &Path, store: &mut dyn BaselineStore) -> VisageResult<RunReport> {
        ensure_manifest(project_root)?;
        let stories = discover_stories(project_root)?;
        self.run_stories(stories, store).await
    }

    /// Check an explicit list of stories
    pub async fn run_stories(&self, stories: Vec<Story>, store: &mut dyn BaselineStore) -> VisageResult<RunReport> {
        let start = Instant::now();
        let mut report = RunReport::default();
        let mut baselines = HashMap::new();
        let mut first_paths: HashMap<String, PathBuf> = HashMap::new();
        let mut pending = Vec::with_capacity(stories.len());

        // Baselines are read before any capture starts and written after
        // every capture has finished. An id owns a single baseline, so only
        // its first story is captured.
        for story in stories {
            if let Some(first) = first_paths.get(&story.id()) {
                let error = VisageError::DuplicateStory {
                    id: story.id(),
                    first: first.clone(),
                    second: story.path.clone(),
                };
                warn!("✗ {} - {}", story.id(), error);
                report.errors.push(StoryError {
                    story_id: story.id(),
                    error,
                });
                continue;
            }
            first_paths.insert(story.id(), story.path.clone());

            if self.options.is_skipped(&story) {
                debug!("Skipping {}", story.id());
                report.results.push(compare::skipped(&story));
                continue;
            }

            let key = BaselineKey::new(story.id(), &self.settings.viewport);
            match store.load(&key) {
                Ok(baseline) => {
                    baselines.insert(story.id(), baseline);
                    pending.push(story);
                }
                Err(error) => {
                    warn!("✗ {} - {}", story.id(), error);
                    report.errors.push(StoryError {
                        story_id: story.id(),
                        error,
                    });
                }
            }
        }

        info!("Capturing {} stories ({} at a time)", pending.len(), self.options.max_concurrency.max(1));

        for capture in self.capture_all(pending).await {
            let story_id = capture.story.id();
            match capture.outcome {
                Ok(current) => {
                    let baseline = baselines.get(&story_id).cloned().flatten();
                    let result = compare::compare(&capture.story, current, baseline);
                    match result.status {
                        RegressionStatus::Failed => {
                            warn!("✗ {} changed: {:?}", story_id, result.changed_fields())
                        }
                        status => info!("✓ {} {} ({} ms)", story_id, status, capture.duration.as_millis()),
                    }
                    match self.update_baseline(store, &result) {
                        Ok(()) => report.results.push(result),
                        Err(error) => {
                            error!("✗ {} - {}", story_id, error);
                            report.errors.push(StoryError { story_id, error });
                        }
                    }
                }
                Err(error) => {
                    error!("✗ {} - {}", story_id, error);
                    report.errors.push(StoryError { story_id, error });
                }
            }
        }

        report.sort();
        let summary = report.summary();
        info!(
            "Results: {} passed, {} created, {} failed, {} skipped, {} errors ({} ms)",
            summary.passed,
            summary.created,
            summary.failed,
            summary.skipped,
            summary.errors,
            start.elapsed().as_millis()
        );

        Ok(report)
    }

    /// Capture and fingerprint `stories` with at most `max_concurrency`
    /// browser contexts alive at once. Captures come back in completion order.
    pub async fn capture_all(&self, stories: Vec<Story>) -> Vec<StoryCapture> {
        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrency.max(1)));
        let mut tasks = JoinSet::new();
        let total = stories.len();

        for story in stories {
            let job = CaptureJob {
                launcher: self.launcher.clone(),
                settings: self.settings.clone(),
                semaphore: semaphore.clone(),
                cancel: self.cancel.child_token(),
                timeout: self.options.timeout,
            };

            tasks.spawn(async move {
                let start = Instant::now();
                let outcome = match AssertUnwindSafe(job.run(&story)).catch_unwind().await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(VisageError::Internal(format!("capture of {} panicked", story.id()))),
                };
                StoryCapture {
                    story,
                    outcome,
                    duration: start.elapsed(),
                }
            });
        }

        let mut captures = Vec::with_capacity(total);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(capture) => captures.push(capture),
                Err(e) => error!("Capture task failed: {}", e),
            }
        }
        captures
    }

    fn update_baseline(&self, store: &mut dyn BaselineStore, result: &RegressionResult) -> VisageResult<()> {
        let Some(current) = &result.current else {
            return Ok(());
        };
        let key = BaselineKey::of(current);

        match result.status {
            RegressionStatus::Created => {
                store.store(&key, current)?;
                info!("Created baseline for {}", key);
            }
            RegressionStatus::Failed if self.options.update_baselines => {
                store.store(&key, current)?;
                info!("Updated baseline for {}", key);
            }
            _ => {}
        }
        Ok(())
    }
}

/// Everything one capture task needs, owned so the task is `'static`
struct CaptureJob {
    launcher: Arc<dyn BrowserLauncher>,
    settings: Arc<CaptureSettings>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    timeout: Duration,
}

impl CaptureJob {
    async fn run(self, story: &Story) -> VisageResult<Fingerprint> {
        // The permit outlives the capture future, so a context is always
        // dropped before its slot is handed to the next story.
        let _permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(VisageError::Cancelled),
            permit = self.semaphore.clone().acquire_owned() => {
                permit.map_err(|_| VisageError::Cancelled)?
            }
        };

        debug!("Capturing {}", story);
        let work = capture_story(self.launcher.as_ref(), &self.settings, story);

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(VisageError::Cancelled),
            outcome = tokio::time::timeout(self.timeout, work) => match outcome {
                Ok(result) => result,
                Err(_) => Err(VisageError::Timeout {
                    story: story.id(),
                    timeout: self.timeout,
                }),
            },
        }
    }
}

async fn capture_story(
    launcher: &dyn BrowserLauncher,
    settings: &CaptureSettings,
    story: &Story,
) -> VisageResult<Fingerprint> {
    let mut context = launcher.launch().await?;
    let captured = CaptureSession::new(settings, &mut *context).run(story).await;
    if let Err(e) = context.close().await {
        warn!("Failed to close browser for {}: {}", story, e);
    }
    let capture = captured?;

    let component = story.id();
    let viewport = settings.viewport.clone();
    tokio::task::spawn_blocking(move || Fingerprint::from_capture(component, viewport, &capture))
        .await
        .map_err(|e| VisageError::Internal(format!("fingerprint task failed: {}", e)))?
}
