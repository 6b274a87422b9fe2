// src/exec/probe.rs

//! Filesystem probes that turn a unit's side effects into metadata.
//!
//! A probe runs after the unit's command succeeded, relative to the project
//! root: `count_files` counts files matching a glob, `file_exists` records
//! whether a path exists.

use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use globset::{Glob, GlobMatcher};

use crate::types::{Metadata, MetadataValue};

/// One metadata probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    CountFiles { key: String, pattern: String },
    FileExists { key: String, path: PathBuf },
}

impl Probe {
    pub fn key(&self) -> &str {
        match self {
            Probe::CountFiles { key, .. } | Probe::FileExists { key, .. } => key,
        }
    }
}

/// Compile a `count_files` glob, e.g. `data/raw/images/**/*.jpg`.
pub fn compile_glob(pattern: &str) -> Result<GlobMatcher> {
    let glob = Glob::new(pattern).with_context(|| format!("invalid glob pattern '{pattern}'"))?;
    Ok(glob.compile_matcher())
}

/// Evaluate probes off the async runtime.
pub async fn evaluate(root: PathBuf, probes: Vec<Probe>) -> Result<Metadata> {
    if probes.is_empty() {
        return Ok(Metadata::new());
    }
    tokio::task::spawn_blocking(move || evaluate_blocking(&root, &probes))
        .await
        .context("probe evaluation task failed")?
}

/// Evaluate probes synchronously.
pub fn evaluate_blocking(root: &Path, probes: &[Probe]) -> Result<Metadata> {
    let mut metadata = Metadata::new();

    for probe in probes {
        let value = match probe {
            Probe::CountFiles { pattern, .. } => {
                MetadataValue::from(count_matching_files(root, pattern)?)
            }
            Probe::FileExists { path, .. } => MetadataValue::from(root.join(path).exists()),
        };
        metadata.insert(probe.key().to_string(), value);
    }

    Ok(metadata)
}

/// Count files under `root` whose root-relative path matches `pattern`.
///
/// Only the directory named by the glob's literal prefix is walked. A
/// missing directory counts as zero matches.
pub fn count_matching_files(root: &Path, pattern: &str) -> Result<usize> {
    let matcher = compile_glob(pattern)?;
    let base = root.join(literal_prefix(pattern));

    if !base.is_dir() {
        return Ok(0);
    }

    let mut count = 0;
    let mut stack = vec![base];

    while let Some(dir) = stack.pop() {
        let entries =
            fs::read_dir(&dir).with_context(|| format!("reading directory {}", dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.is_dir() {
                stack.push(path);
            } else if let Ok(rel) = path.strip_prefix(root) {
                if matcher.is_match(rel) {
                    count += 1;
                }
            }
        }
    }

    Ok(count)
}

/// Leading path components of a glob that contain no glob syntax.
///
/// The final component is never included because it may name a file.
fn literal_prefix(pattern: &str) -> PathBuf {
    let components: Vec<Component<'_>> = Path::new(pattern).components().collect();
    let mut prefix = PathBuf::new();

    for component in components.iter().take(components.len().saturating_sub(1)) {
        let text = component.as_os_str().to_string_lossy();
        if text.contains(['*', '?', '[', '{']) {
            break;
        }
        prefix.push(component.as_os_str());
    }

    prefix
}
