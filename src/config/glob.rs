//! Multi-file source driven by a glob pattern.

use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobMatcher};
use walkdir::WalkDir;

use super::error::SourceError;
use super::file::{DecoderRegistry, FileSource};
use super::flat::deep_merge;
use super::source::{ConfigSource, DEFAULT_GLOB_PRIORITY};
use super::value::Map;

/// Loads every file matching a pattern, merging them in sorted path order.
///
/// `*` and `?` do not cross directory separators; `**` does. Later files in
/// the enumeration win on key collisions.
#[derive(Debug, Clone)]
pub struct GlobSource {
    pattern: String,
    priority: i32,
    decoders: DecoderRegistry,
}

impl GlobSource {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self::with_priority(pattern, DEFAULT_GLOB_PRIORITY)
    }

    pub fn with_priority(pattern: impl Into<String>, priority: i32) -> Self {
        Self {
            pattern: pattern.into(),
            priority,
            decoders: DecoderRegistry::new(),
        }
    }

    pub fn with_decoders(mut self, decoders: DecoderRegistry) -> Self {
        self.decoders = decoders;
        self
    }

    /// Files currently matching the pattern, sorted.
    pub fn resolve(&self) -> Result<Vec<PathBuf>, SourceError> {
        resolve_pattern(&self.pattern)
    }
}

impl ConfigSource for GlobSource {
    fn name(&self) -> String {
        format!("glob:{}", self.pattern)
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn load(&self) -> Result<Map, SourceError> {
        let mut merged = Map::new();
        for path in self.resolve()? {
            let data = FileSource::with_priority(&path, self.priority)
                .with_decoders(self.decoders.clone())
                .load()
                .map_err(|e| SourceError::GlobFile {
                    path: path.clone(),
                    source: Box::new(e),
                })?;
            deep_merge(&mut merged, data);
        }
        Ok(merged)
    }

    fn watch_paths(&self) -> Vec<PathBuf> {
        self.resolve().unwrap_or_default()
    }
}

pub(crate) fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '[', '{'])
}

fn resolve_pattern(pattern: &str) -> Result<Vec<PathBuf>, SourceError> {
    let matcher = compile(pattern)?;
    let (base, rest) = split_literal_prefix(pattern);

    let walk_root = if base.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        base.clone()
    };
    if !walk_root.exists() {
        return Ok(Vec::new());
    }

    let mut walker = WalkDir::new(&walk_root).follow_links(true);
    if !rest.contains("**") {
        walker = walker.max_depth(rest.split('/').filter(|c| !c.is_empty()).count());
    }

    let mut matches: Vec<PathBuf> = walker
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| relative_to_pattern(entry.path(), &base))
        .filter(|path| matcher.is_match(path))
        .collect();
    matches.sort();
    Ok(matches)
}

fn compile(pattern: &str) -> Result<GlobMatcher, SourceError> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map(|glob| glob.compile_matcher())
        .map_err(|e| SourceError::Pattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })
}

/// Splits `conf/*.yaml` into (`conf`, `*.yaml`).
fn split_literal_prefix(pattern: &str) -> (PathBuf, &str) {
    let mut base_len = 0;
    for (i, component) in pattern.split_inclusive('/').scan(0, |pos, c| {
        let start = *pos;
        *pos += c.len();
        Some((start, c))
    }) {
        if is_glob(component) {
            break;
        }
        base_len = i + component.len();
    }
    if base_len == pattern.len() {
        // No wildcard at all: the pattern names a single file.
        let path = Path::new(pattern);
        let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let parent_len = pattern.len() - path.file_name().map(|f| f.len()).unwrap_or(0);
        return (parent, &pattern[parent_len..]);
    }
    let base = pattern[..base_len].trim_end_matches('/');
    let base = if base.is_empty() && pattern.starts_with('/') {
        "/"
    } else {
        base
    };
    (PathBuf::from(base), &pattern[base_len..])
}

/// Walk results under `.` come back as `./x`; the pattern says `x`.
fn relative_to_pattern(path: &Path, base: &Path) -> PathBuf {
    if base.as_os_str().is_empty() {
        path.strip_prefix(".").unwrap_or(path).to_path_buf()
    } else {
        path.to_path_buf()
    }
}
