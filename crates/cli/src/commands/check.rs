//! Regression check

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};

use visage_engine::orchestrator::ensure_manifest;
use visage_engine::{
    CaptureSettings, Config, Environment, FileBaselineStore, Orchestrator, PlaywrightConfig, PlaywrightLauncher,
    RegressionResult, RegressionStatus, RunOptions, RunReport, RunSummary, ServerConfig, StorybookServer,
};

use crate::output::{print_error, print_json, print_list, print_success, print_warning, OutputFormat, TableDisplay};

#[derive(Args)]
pub struct CheckArgs {
    /// Project root (defaults to the current directory)
    #[arg(short, long)]
    pub project: Option<PathBuf>,

    /// Accept the current rendering of failed stories as their new baseline
    #[arg(long)]
    pub update_baselines: bool,

    /// Treat any capture error as a failure of the whole run
    #[arg(long)]
    pub strict: bool,
}

/// One row of the results table
#[derive(Serialize)]
pub struct ResultDisplay {
    pub id: String,
    pub component: String,
    pub story: String,
    pub status: RegressionStatus,
    pub changed: Vec<String>,
    pub current: Option<String>,
    pub baseline: Option<String>,
}

impl From<&RegressionResult> for ResultDisplay {
    fn from(result: &RegressionResult) -> Self {
        Self {
            id: result.story_id.clone(),
            component: result.component.clone(),
            story: result.story.clone(),
            status: result.status,
            changed: result
                .changed_fields()
                .iter()
                .map(|f| f.as_str().to_string())
                .collect(),
            current: result.current_visual_hash().map(str::to_string),
            baseline: result.baseline_visual_hash().map(str::to_string),
        }
    }
}

impl TableDisplay for ResultDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Component", "Story", "Status", "Changed", "Current", "Baseline"]
    }

    fn row(&self) -> Vec<String> {
        let status = match self.status {
            RegressionStatus::Passed => "✓ passed".green().to_string(),
            RegressionStatus::Created => "+ created".cyan().to_string(),
            RegressionStatus::Failed => "✗ failed".red().to_string(),
            RegressionStatus::Skipped => "- skipped".dimmed().to_string(),
        };

        vec![
            self.component.clone(),
            self.story.clone(),
            status,
            self.changed.join(", "),
            short_hash(self.current.as_deref()),
            short_hash(self.baseline.as_deref()),
        ]
    }
}

fn short_hash(hash: Option<&str>) -> String {
    match hash {
        Some(hash) if hash.len() > 16 => format!("{}…", &hash[..16]),
        Some(hash) => hash.to_string(),
        None => "-".to_string(),
    }
}

#[derive(Serialize)]
struct ErrorDisplay {
    id: String,
    error: String,
}

#[derive(Serialize)]
struct CheckOutput {
    summary: RunSummary,
    results: Vec<ResultDisplay>,
    errors: Vec<ErrorDisplay>,
}

pub async fn execute(args: CheckArgs, format: OutputFormat) -> Result<ExitCode> {
    let env = match args.project.clone() {
        Some(project) => Environment::discover_in(project)?,
        None => Environment::discover()?,
    };
    let config = env
        .load_config()
        .with_context(|| format!("failed to load {}", env.config_path.display()))?;
    let project_root = env.cwd.clone();
    ensure_manifest(&project_root)?;

    let mut server = match ServerConfig::from_config(&config, &project_root) {
        Some(server_config) => Some(StorybookServer::start(server_config).await?),
        None => None,
    };

    let outcome = run_check(&args, &config, &project_root, format).await;

    if let Some(server) = server.as_mut() {
        if let Err(e) = server.stop().await {
            warn!("Failed to stop dev server: {}", e);
        }
    }

    outcome
}

async fn run_check(args: &CheckArgs, config: &Config, project_root: &Path, format: OutputFormat) -> Result<ExitCode> {
    let launcher = PlaywrightLauncher::new(PlaywrightConfig::from_config(config, project_root))?;
    let settings = CaptureSettings::from_config(config)?;
    let options = RunOptions::from_config(config).with_update_baselines(args.update_baselines);
    let orchestrator = Orchestrator::new(Arc::new(launcher), settings, options);

    let token = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling run");
            token.cancel();
        }
    });

    let baseline_dir = config.baseline_dir_in(project_root);
    info!("Using baselines in {}", baseline_dir.display());
    let mut store = FileBaselineStore::new(baseline_dir);

    let report = orchestrator.run(project_root, &mut store).await?;
    print_report(&report, format);

    let success = !report.has_failures();
    if args.strict {
        report.into_results()?;
    }

    Ok(exit_code(success))
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn print_report(report: &RunReport, format: OutputFormat) {
    let results: Vec<ResultDisplay> = report.results.iter().map(ResultDisplay::from).collect();
    let summary = report.summary();

    if let OutputFormat::Json = format {
        print_json(&CheckOutput {
            summary,
            results,
            errors: report
                .errors
                .iter()
                .map(|e| ErrorDisplay {
                    id: e.story_id.clone(),
                    error: e.error.to_string(),
                })
                .collect(),
        });
        return;
    }

    print_list(&results, format);
    for error in &report.errors {
        print_error(&format!("{} - {}", error.story_id, error.error));
    }

    let line = format!(
        "{} stories: {} passed, {} created, {} failed, {} skipped, {} errors",
        summary.total, summary.passed, summary.created, summary.failed, summary.skipped, summary.errors
    );
    if report.has_failures() {
        print_warning(&line);
    } else {
        print_success(&line);
    }
}
