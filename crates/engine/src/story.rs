//! Story discovery
//!
//! Walks a component project, skips ignored paths, and extracts every
//! exported story declaration (`export const Primary: Story = ...`).

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use once_cell::sync::Lazy;
use regex::bytes::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::error::{VisageError, VisageResult};

/// Position of a component in the design-system hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    #[default]
    Draft,
    Foundation,
    Atom,
    Molecule,
    Organism,
    Template,
    Page,
}

/// Directory markers, tested in order; the first one found in a path wins.
const CATEGORY_MARKERS: &[(&str, Category)] = &[
    ("99-drafts", Category::Draft),
    ("00-foundations", Category::Foundation),
    ("10-atoms", Category::Atom),
    ("20-molecules", Category::Molecule),
    ("30-organisms", Category::Organism),
    ("40-templates", Category::Template),
    ("50-pages", Category::Page),
];

impl Category {
    /// Infer a category from a path; unmarked paths are drafts
    pub fn from_path(path: &Path) -> Self {
        let path = path.to_string_lossy();
        CATEGORY_MARKERS
            .iter()
            .find(|(marker, _)| path.contains(marker))
            .map(|(_, category)| *category)
            .unwrap_or_default()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Draft => "draft",
            Category::Foundation => "foundation",
            Category::Atom => "atom",
            Category::Molecule => "molecule",
            Category::Organism => "organism",
            Category::Template => "template",
            Category::Page => "page",
        }
    }

    /// Plural form used as the first segment of Storybook ids
    pub fn plural(&self) -> &'static str {
        match self {
            Category::Draft => "drafts",
            Category::Foundation => "foundations",
            Category::Atom => "atoms",
            Category::Molecule => "molecules",
            Category::Organism => "organisms",
            Category::Template => "templates",
            Category::Page => "pages",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single renderable variant of a component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Story {
    pub path: PathBuf,
    pub name: String,
    pub component_name: String,
    pub category: Category,
}

impl Story {
    /// Storybook id, e.g. `atoms-button--primary-large`
    pub fn id(&self) -> String {
        format!(
            "{}-{}--{}",
            self.category.plural(),
            self.component_name.to_lowercase(),
            split_camel_case(&self.name)
                .iter()
                .map(|word| word.to_lowercase())
                .collect::<Vec<_>>()
                .join("-"),
        )
    }
}

impl fmt::Display for Story {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.component_name, self.name)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum CharClass {
    Lower,
    Upper,
    Digit,
    Other,
}

impl CharClass {
    fn of(c: char) -> Self {
        if c.is_lowercase() {
            CharClass::Lower
        } else if c.is_uppercase() {
            CharClass::Upper
        } else if c.is_numeric() {
            CharClass::Digit
        } else {
            CharClass::Other
        }
    }
}

/// Split an identifier into words: `PrimaryLarge` -> `Primary`, `Large`;
/// `HTMLButton` -> `HTML`, `Button`; `Size2x` -> `Size`, `2`, `x`.
/// Separator runs (`_`, `$`) are dropped.
pub fn split_camel_case(identifier: &str) -> Vec<String> {
    let mut runs: Vec<(CharClass, Vec<char>)> = Vec::new();
    for c in identifier.chars() {
        let class = CharClass::of(c);
        match runs.last_mut() {
            Some((last, chars)) if *last == class => chars.push(c),
            _ => runs.push((class, vec![c])),
        }
    }

    // An upper run followed by a lower run donates its last letter:
    // "HTMLButton" is ["HTMLB", "utton"] before this pass.
    for i in 0..runs.len().saturating_sub(1) {
        if runs[i].0 == CharClass::Upper && runs[i + 1].0 == CharClass::Lower {
            if let Some(c) = runs[i].1.pop() {
                runs[i + 1].1.insert(0, c);
            }
        }
    }

    runs.into_iter()
        .filter(|(class, chars)| *class != CharClass::Other && !chars.is_empty())
        .map(|(_, chars)| chars.into_iter().collect())
        .collect()
}

/// Path tokens that are never scanned for stories
pub const BUILTIN_IGNORES: &[&str] = &[
    "patches",
    "node_modules",
    ".DS_Store",
    ".idea",
    ".vscode",
    "dist",
    "build",
    "coverage",
    "out",
    "tmp",
    "temp",
    "*.log",
    "*.tmp",
];

/// De-duplicated set of ignore tokens, compiled to glob matchers.
///
/// Tokens without a `/` match any single path component (`*.log`,
/// `node_modules`); tokens with one match a root-relative prefix
/// (`src/generated`).
#[derive(Debug, Clone)]
pub struct IgnoreSet {
    tokens: BTreeSet<String>,
    names: GlobSet,
    prefixes: GlobSet,
}

impl Default for IgnoreSet {
    fn default() -> Self {
        Self {
            tokens: BTreeSet::new(),
            names: GlobSet::empty(),
            prefixes: GlobSet::empty(),
        }
    }
}

impl PartialEq for IgnoreSet {
    fn eq(&self, other: &Self) -> bool {
        self.tokens == other.tokens
    }
}

impl Eq for IgnoreSet {}

impl IgnoreSet {
    /// Built-in tokens plus the nearest `.gitignore` (project root, then its parent)
    pub fn load(root: &Path) -> VisageResult<Self> {
        let mut set = Self::builtin();

        let candidates = [root.join(".gitignore"), root.join("..").join(".gitignore")];
        if let Some(path) = candidates.iter().find(|p| p.is_file()) {
            let content = std::fs::read_to_string(path).map_err(|source| VisageError::ReadFile {
                path: path.clone(),
                source,
            })?;
            debug!("Merging ignore rules from {}", path.display());
            set.extend_from_gitignore(&content);
        }

        Ok(set)
    }

    pub fn builtin() -> Self {
        let mut set = Self::default();
        set.tokens = BUILTIN_IGNORES.iter().map(|s| s.to_string()).collect();
        set.compile();
        set
    }

    /// Add the usable lines of a `.gitignore` document
    pub fn extend_from_gitignore(&mut self, content: &str) {
        for line in content.lines() {
            let line = line.trim();
            // Negations cannot un-ignore anything in a token set.
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let token = line.trim_matches('/');
            if !token.is_empty() {
                self.tokens.insert(token.to_string());
            }
        }
        self.compile();
    }

    fn compile(&mut self) {
        let mut names = GlobSetBuilder::new();
        let mut prefixes = GlobSetBuilder::new();

        for token in &self.tokens {
            let glob = match GlobBuilder::new(token).literal_separator(true).build() {
                Ok(glob) => glob,
                Err(e) => {
                    warn!("Skipping invalid ignore pattern '{}': {}", token, e);
                    continue;
                }
            };
            if token.contains('/') {
                prefixes.add(glob);
            } else {
                names.add(glob);
            }
        }

        self.names = names.build().unwrap_or_else(|e| {
            warn!("Failed to compile ignore patterns: {}", e);
            GlobSet::empty()
        });
        self.prefixes = prefixes.build().unwrap_or_else(|e| {
            warn!("Failed to compile ignore patterns: {}", e);
            GlobSet::empty()
        });
    }

    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Whether a root-relative path is ignored
    pub fn is_ignored(&self, relative: &Path) -> bool {
        let mut prefix = PathBuf::new();
        for component in relative.components() {
            let Component::Normal(part) = component else {
                continue;
            };
            if self.names.is_match(part) {
                return true;
            }
            prefix.push(part);
            if self.prefixes.is_match(&prefix) {
                return true;
            }
        }
        false
    }
}

static STORY_PATTERN: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"export\s+const\s+(\w+)\s*:\s*Story"));

fn story_pattern() -> VisageResult<&'static Regex> {
    STORY_PATTERN
        .as_ref()
        .map_err(|e| VisageError::Internal(format!("story pattern: {}", e)))
}

/// Extract every story declared in a source document.
///
/// Documents without a story declaration yield nothing, whatever their name.
pub fn parse_stories(path: &Path, content: &[u8]) -> VisageResult<Vec<Story>> {
    let names: Vec<String> = story_pattern()?
        .captures_iter(content)
        .filter_map(|caps| caps.get(1))
        .map(|name| String::from_utf8_lossy(name.as_bytes()).into_owned())
        .collect();
    if names.is_empty() {
        return Ok(Vec::new());
    }

    let file_name = path
        .file_name()
        .ok_or_else(|| VisageError::InvalidStoryPath(path.to_path_buf()))?
        .to_string_lossy();
    let component_name = file_name.split('.').next().unwrap_or_default().to_string();
    if component_name.is_empty() {
        return Err(VisageError::InvalidStoryPath(path.to_path_buf()));
    }

    let category = Category::from_path(path);

    Ok(names
        .into_iter()
        .map(|name| Story {
            path: path.to_path_buf(),
            name,
            component_name: component_name.clone(),
            category,
        })
        .collect())
}

/// Discovers stories under a project root
pub struct StoryCatalog {
    root: PathBuf,
    ignores: IgnoreSet,
}

impl StoryCatalog {
    /// Build a catalog with the root's ignore rules
    pub fn new(root: impl AsRef<Path>) -> VisageResult<Self> {
        let root = root.as_ref().to_path_buf();
        let ignores = IgnoreSet::load(&root)?;
        Ok(Self { root, ignores })
    }

    pub fn with_ignores(root: impl AsRef<Path>, ignores: IgnoreSet) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            ignores,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ignores(&self) -> &IgnoreSet {
        &self.ignores
    }

    fn is_ignored(&self, entry: &DirEntry) -> bool {
        entry
            .path()
            .strip_prefix(&self.root)
            .map(|relative| self.ignores.is_ignored(relative))
            .unwrap_or(false)
    }

    /// Walk the tree and collect stories. Any read error or duplicate
    /// story id aborts discovery.
    pub fn discover(&self) -> VisageResult<Vec<Story>> {
        let mut stories = Vec::new();
        let mut seen: HashMap<String, PathBuf> = HashMap::new();

        let walker = WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !self.is_ignored(entry));

        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let content = std::fs::read(path).map_err(|source| VisageError::ReadFile {
                path: path.to_path_buf(),
                source,
            })?;

            for story in parse_stories(path, &content)? {
                if let Some(first) = seen.insert(story.id(), story.path.clone()) {
                    return Err(VisageError::DuplicateStory {
                        id: story.id(),
                        first,
                        second: story.path,
                    });
                }
                debug!(
                    "Found story: {} {} {} {}",
                    story.component_name,
                    story.name,
                    path.display(),
                    story.category
                );
                stories.push(story);
            }
        }

        info!("Found {} stories under {}", stories.len(), self.root.display());
        Ok(stories)
    }
}

/// Discover all stories under `root` using its ignore rules
pub fn discover_stories(root: impl AsRef<Path>) -> VisageResult<Vec<Story>> {
    StoryCatalog::new(root)?.discover()
}
