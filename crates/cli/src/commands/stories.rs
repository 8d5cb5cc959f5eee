//! Story listing

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;

use visage_engine::{Story, StoryCatalog};

use crate::output::{print_list, OutputFormat, TableDisplay};

#[derive(Args)]
pub struct StoriesArgs {
    /// Project root (defaults to the current directory)
    #[arg(short, long)]
    pub project: Option<PathBuf>,
}

#[derive(Serialize)]
pub struct StoryDisplay {
    pub id: String,
    pub component: String,
    pub story: String,
    pub category: String,
    pub path: String,
}

impl StoryDisplay {
    fn new(story: &Story, root: &std::path::Path) -> Self {
        Self {
            id: story.id(),
            component: story.component_name.clone(),
            story: story.name.clone(),
            category: story.category.to_string(),
            path: story
                .path
                .strip_prefix(root)
                .unwrap_or(&story.path)
                .display()
                .to_string(),
        }
    }
}

impl TableDisplay for StoryDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "Component", "Story", "Category", "Path"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.component.clone(),
            self.story.clone(),
            self.category.clone(),
            self.path.clone(),
        ]
    }
}

pub fn execute(args: StoriesArgs, format: OutputFormat) -> Result<ExitCode> {
    let root = match args.project {
        Some(project) => project,
        None => std::env::current_dir().context("cannot determine working directory")?,
    };

    let catalog = StoryCatalog::new(&root)?;
    let stories = catalog.discover()?;

    let displays: Vec<StoryDisplay> = stories.iter().map(|s| StoryDisplay::new(s, &root)).collect();
    print_list(&displays, format);
    Ok(ExitCode::SUCCESS)
}
