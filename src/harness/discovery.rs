//! Test discovery: walk the suite root and collect test files.
//!
//! A test is any regular file whose name ends in one of the configured suffixes. Hidden directories, excluded
//! directories and the exec root are never entered. Tests are ordered by id, the root-relative path joined with `/`,
//! so the order does not depend on the platform or on directory iteration order.
//!
//! Only an unreadable root fails discovery. Anything below it that cannot be read (a permission error, a symlink
//! loop) is logged and skipped.

use std::path::{Path, PathBuf};

use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

use crate::config::SuiteConfig;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("cannot scan `{path}`: {message}")]
    Walk { path: PathBuf, message: String },
}

/// A test file found under the suite root.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DiscoveredTest {
    /// Root-relative path with `/` separators, e.g. `codegen/add.mua`.
    pub id: String,
    /// Absolute path of the file.
    pub path: PathBuf,
}

/// Find every test under `config.root`, sorted by id and narrowed by `config.filter`.
#[tracing::instrument(skip_all, fields(root = %config.root.display()))]
pub fn discover(config: &SuiteConfig) -> Result<Vec<DiscoveredTest>, DiscoveryError> {
    let root = config.root.as_path();
    let mut tests = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !skip_entry(entry, config));
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if err.depth() == 0 => {
                return Err(DiscoveryError::Walk {
                    path: err.path().unwrap_or(root).to_path_buf(),
                    message: err.to_string(),
                });
            }
            Err(err) => {
                tracing::warn!("skipping `{}`: {err}", err.path().unwrap_or(root).display());
                continue;
            }
        };
        if !entry.file_type().is_file() || !has_test_suffix(entry.file_name().to_string_lossy().as_ref(), config) {
            continue;
        }
        let Some(id) = test_id(root, entry.path()) else {
            continue;
        };
        if let Some(filter) = &config.filter {
            if !id.contains(filter.as_str()) {
                continue;
            }
        }
        tests.push(DiscoveredTest {
            id,
            path: entry.into_path(),
        });
    }

    tests.sort();
    tracing::debug!(count = tests.len(), "discovered tests");
    Ok(tests)
}

fn skip_entry(entry: &DirEntry, config: &SuiteConfig) -> bool {
    if !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    if name.starts_with('.') || entry.path() == config.exec_root {
        return true;
    }
    let relative = test_id(&config.root, entry.path()).unwrap_or_default();
    config
        .excludes
        .iter()
        .any(|exclude| exclude.as_str() == name || exclude.trim_matches('/') == relative)
}

fn has_test_suffix(file_name: &str, config: &SuiteConfig) -> bool {
    config
        .suffixes
        .iter()
        .any(|suffix| file_name.len() > suffix.len() && file_name.ends_with(suffix.as_str()))
}

/// Root-relative id of `path`, with `/` separators.
pub fn test_id(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|part| part.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}
