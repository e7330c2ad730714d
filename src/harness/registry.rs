//! Tool Registry: maps tool placeholders (`%muac`) to executables.
//!
//! Resolution order for a tool:
//!
//! 1. An explicit `--tool NAME=PATH` override, which must name an executable file.
//! 2. Each directory of the run search path, in order: `--search-path` and config `search_path` entries, then
//!    `tools_dir`, then the harness's inherited `PATH` (unless `inherit_path = false`).
//!
//! Every answer, found or not, is memoized for the lifetime of the registry. The same directory list, joined with
//! the platform separator, is the `PATH` handed to every child process.

use std::collections::{BTreeMap, HashMap};
use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use thiserror::Error;

use crate::config::{SuiteConfig, ToolSpec, UnresolvedPolicy};

/// A tool could not be located.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("unresolved tool `%{name}`: {reason}")]
    UnresolvedTool { name: String, reason: String },
}

/// Where a tool placeholder points for this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolBinding {
    Resolved(PathBuf),
    /// The tool is missing and its policy let the run continue.
    Unresolved { reason: String },
}

/// Immutable placeholder-name to binding table, computed once per run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolBindings {
    bindings: BTreeMap<String, ToolBinding>,
}

impl ToolBindings {
    pub fn get(&self, name: &str) -> Option<&ToolBinding> {
        self.bindings.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ToolBinding)> {
        self.bindings.iter().map(|(name, binding)| (name.as_str(), binding))
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl FromIterator<(String, ToolBinding)> for ToolBindings {
    fn from_iter<I: IntoIterator<Item = (String, ToolBinding)>>(iter: I) -> Self {
        Self {
            bindings: iter.into_iter().collect(),
        }
    }
}

/// Memoizing tool resolver.
#[derive(Debug)]
pub struct ToolRegistry {
    tools: Vec<ToolSpec>,
    overrides: BTreeMap<String, PathBuf>,
    search_dirs: Vec<PathBuf>,
    cache: RwLock<HashMap<String, Result<PathBuf, ResolveError>>>,
}

impl ToolRegistry {
    /// Build a registry from the suite configuration and the harness's own `PATH`.
    pub fn new(config: &SuiteConfig) -> Self {
        let mut search_dirs = config.search_path.clone();
        search_dirs.extend(config.tools_dir.iter().cloned());
        if config.inherit_path {
            if let Some(path) = env::var_os("PATH") {
                search_dirs.extend(env::split_paths(&path).filter(|dir| !dir.as_os_str().is_empty()));
            }
        }
        Self::from_parts(config.tools.clone(), config.overrides.clone(), search_dirs)
    }

    pub fn from_parts(tools: Vec<ToolSpec>, overrides: BTreeMap<String, PathBuf>, search_dirs: Vec<PathBuf>) -> Self {
        Self {
            tools,
            overrides,
            search_dirs,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Ordered directories searched for tools.
    pub fn search_dirs(&self) -> &[PathBuf] {
        &self.search_dirs
    }

    /// `PATH` value for child processes, or `None` when the search path is empty or cannot be joined.
    pub fn child_path(&self) -> Option<OsString> {
        if self.search_dirs.is_empty() {
            return None;
        }
        match env::join_paths(&self.search_dirs) {
            Ok(joined) => Some(joined),
            Err(err) => {
                tracing::warn!("search path cannot be passed to children: {err}");
                None
            }
        }
    }

    /// Resolve a tool placeholder name to an absolute executable path.
    ///
    /// Names that are not declared tools are searched for as an executable of the same name.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, ResolveError> {
        if let Some(hit) = self.cache.read().unwrap_or_else(PoisonError::into_inner).get(name) {
            return hit.clone();
        }

        let result = self.lookup(name);
        match &result {
            Ok(path) => tracing::debug!(tool = name, path = %path.display(), "resolved tool"),
            Err(err) => tracing::debug!(tool = name, "{err}"),
        }
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.to_string())
            .or_insert(result)
            .clone()
    }

    /// Resolve every declared tool, applying its unresolved policy.
    ///
    /// Fails on the first `fatal` tool that cannot be found, before any test has run.
    #[tracing::instrument(skip_all, fields(tools = self.tools.len()))]
    pub fn bind(&self) -> Result<ToolBindings, ResolveError> {
        let mut bindings = BTreeMap::new();
        for tool in &self.tools {
            let binding = match self.resolve(&tool.name) {
                Ok(path) => ToolBinding::Resolved(path),
                Err(err) => {
                    let ResolveError::UnresolvedTool { reason, .. } = &err;
                    match tool.policy {
                        UnresolvedPolicy::Fatal => return Err(err),
                        UnresolvedPolicy::Warn => tracing::warn!("{err}; tests using it will be UNRESOLVED_TOOL"),
                        UnresolvedPolicy::Ignore => {}
                    }
                    ToolBinding::Unresolved { reason: reason.clone() }
                }
            };
            bindings.insert(tool.name.clone(), binding);
        }
        Ok(ToolBindings { bindings })
    }

    fn lookup(&self, name: &str) -> Result<PathBuf, ResolveError> {
        if let Some(path) = self.overrides.get(name) {
            return executable_override(path).ok_or_else(|| ResolveError::UnresolvedTool {
                name: name.to_string(),
                reason: format!("override `{}` is not an executable file", path.display()),
            });
        }

        let command = self
            .tools
            .iter()
            .find(|tool| tool.name == name)
            .map_or(name, |tool| tool.command.as_str());
        find_in_dirs(command, &self.search_dirs).ok_or_else(|| ResolveError::UnresolvedTool {
            name: name.to_string(),
            reason: if self.search_dirs.is_empty() {
                format!("`{command}` not found; the search path is empty")
            } else {
                let searched: Vec<String> = self.search_dirs.iter().map(|d| d.display().to_string()).collect();
                format!("`{command}` not found in {}", searched.join(", "))
            },
        })
    }
}

/// First executable named `command` in `dirs`.
pub fn find_in_dirs(command: &str, dirs: &[PathBuf]) -> Option<PathBuf> {
    if dirs.is_empty() {
        return None;
    }
    let joined = env::join_paths(dirs).ok()?;
    let found = which::which_in(command, Some(joined), current_dir()).ok()?;
    std::path::absolute(found).ok()
}

/// `path` itself, if it names an executable file.
fn executable_override(path: &Path) -> Option<PathBuf> {
    if !path.is_file() {
        return None;
    }
    let found = which::which_in(path, None::<&str>, current_dir()).ok()?;
    std::path::absolute(found).ok()
}

fn current_dir() -> PathBuf {
    env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}
