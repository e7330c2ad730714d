//! Suite configuration.
//!
//! A [`SuiteConfig`] is built once per run from three layers, later layers winning:
//!
//! 1. Built-in defaults describing the `mua` suite (suffix `.mua`, tool `%muac` searched as `muac`, unresolved is
//!    fatal).
//! 2. An optional `lit.toml` in the suite root, or the file named by `--config`.
//! 3. Command-line flags ([`ConfigOverrides`]).
//!
//! The result is immutable and shared by reference with the tool registry, the substitution context and the runner.
//!
//! ## Example `lit.toml`
//!
//! ```toml
//! name = "mua"
//! suffixes = [".mua"]
//! excludes = ["Inputs"]
//! tools_dir = "../build/bin"
//! env = ["HOME", "LANG"]
//! timeout = 30
//!
//! [[tools]]
//! name = "muac"
//! command = "muac"
//! unresolved = "fatal"
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use mualit_core::vocab::placeholders;
use mualit_syntax::ParseOptions;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Semaphore;

/// Suite name used in report lines when none is configured.
pub const DEFAULT_SUITE_NAME: &str = "mua";
/// Test file suffix used when none is configured.
pub const DEFAULT_SUFFIX: &str = ".mua";
/// Config file looked up in the suite root.
pub const CONFIG_FILE_NAME: &str = "lit.toml";
/// Exec root (scratch space) relative to the suite root.
pub const DEFAULT_EXEC_DIR: &str = "Output";
/// Wall-clock limit for a single `RUN:` directive.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
/// Time between SIGTERM and SIGKILL when a run is interrupted.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(5);

/// Errors building a [`SuiteConfig`]. All of them abort the run with exit code 2.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// What to do when a declared tool cannot be found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnresolvedPolicy {
    /// Abort the whole run before any test executes.
    #[default]
    Fatal,
    /// Log a warning; tests that use the placeholder are reported as UNRESOLVED_TOOL.
    Warn,
    /// Like `Warn`, without the warning.
    Ignore,
}

/// A tool placeholder declared by the suite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSpec {
    /// Placeholder name without the sigil (`muac` for `%muac`).
    pub name: String,
    /// Executable name searched for on the run search path.
    pub command: String,
    pub policy: UnresolvedPolicy,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, command: impl Into<String>, policy: UnresolvedPolicy) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            policy,
        }
    }
}

/// Fully resolved, immutable suite configuration.
#[derive(Debug, Clone)]
pub struct SuiteConfig {
    /// Suite name shown in report lines (`PASS: mua :: parse/add.mua (1 of 3)`).
    pub name: String,
    /// Absolute suite root.
    pub root: PathBuf,
    /// Absolute directory holding per-test scratch paths; never scanned for tests.
    pub exec_root: PathBuf,
    /// File-name suffixes that mark a test, each with a leading `.`.
    pub suffixes: Vec<String>,
    /// Directory names or root-relative paths skipped during discovery.
    pub excludes: Vec<String>,
    pub tools: Vec<ToolSpec>,
    /// `--tool NAME=PATH` overrides, keyed by placeholder name, with absolute paths.
    pub overrides: BTreeMap<String, PathBuf>,
    /// Directories searched for tools before `tools_dir` and the inherited `PATH`.
    pub search_path: Vec<PathBuf>,
    pub tools_dir: Option<PathBuf>,
    /// Append the harness's own `PATH` to the search path.
    pub inherit_path: bool,
    /// Environment variables copied from the harness into every child, in addition to `PATH`.
    pub env_passthrough: Vec<String>,
    pub jobs: usize,
    /// Per-directive wall-clock limit.
    pub timeout: Duration,
    /// Whole-run deadline; when it passes, in-flight tests are interrupted.
    pub max_time: Option<Duration>,
    pub kill_grace: Duration,
    /// Stop a test's remaining `RUN:` lines after the first one that exits unexpectedly.
    pub fail_fast: bool,
    /// Substring an id must contain to be run.
    pub filter: Option<String>,
    pub parse: ParseOptions,
}

/// Command-line layer applied on top of the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub root: PathBuf,
    pub config_file: Option<PathBuf>,
    pub tools: Vec<(String, PathBuf)>,
    pub search_path: Vec<PathBuf>,
    pub tools_dir: Option<PathBuf>,
    pub suffixes: Vec<String>,
    pub exec_root: Option<PathBuf>,
    pub jobs: Option<usize>,
    pub timeout: Option<f64>,
    pub max_time: Option<f64>,
    pub env: Vec<String>,
    pub no_fail_fast: bool,
    pub filter: Option<String>,
}

/// On-disk `lit.toml` shape. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    name: Option<String>,
    suffixes: Option<Vec<String>>,
    excludes: Vec<String>,
    exec_root: Option<PathBuf>,
    comment_leaders: Option<Vec<String>>,
    search_path: Vec<PathBuf>,
    tools_dir: Option<PathBuf>,
    inherit_path: Option<bool>,
    env: Vec<String>,
    jobs: Option<usize>,
    timeout: Option<f64>,
    max_time: Option<f64>,
    kill_grace: Option<f64>,
    fail_fast: Option<bool>,
    tools: Option<Vec<FileTool>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileTool {
    name: String,
    command: Option<String>,
    #[serde(default)]
    unresolved: UnresolvedPolicy,
}

impl SuiteConfig {
    /// Defaults for a suite rooted at `root`, without reading any config file.
    pub fn with_defaults(root: &Path) -> Result<Self, ConfigError> {
        let root = absolute_dir(root)?;
        Ok(Self {
            name: DEFAULT_SUITE_NAME.to_string(),
            exec_root: root.join(DEFAULT_EXEC_DIR),
            root,
            suffixes: vec![DEFAULT_SUFFIX.to_string()],
            excludes: Vec::new(),
            tools: vec![ToolSpec::new("muac", "muac", UnresolvedPolicy::Fatal)],
            overrides: BTreeMap::new(),
            search_path: Vec::new(),
            tools_dir: None,
            inherit_path: true,
            env_passthrough: Vec::new(),
            jobs: default_jobs(),
            timeout: DEFAULT_TIMEOUT,
            max_time: None,
            kill_grace: DEFAULT_KILL_GRACE,
            fail_fast: true,
            filter: None,
            parse: ParseOptions::default(),
        })
    }

    /// Build the configuration from defaults, the config file and command-line overrides.
    #[tracing::instrument(skip_all, fields(root = %overrides.root.display()))]
    pub fn load(overrides: ConfigOverrides) -> Result<Self, ConfigError> {
        let mut config = Self::with_defaults(&overrides.root)?;

        let file = match &overrides.config_file {
            Some(path) => Some(absolute(path)?),
            None => Some(config.root.join(CONFIG_FILE_NAME)).filter(|p| p.is_file()),
        };
        if let Some(path) = file {
            tracing::debug!(config = %path.display(), "loading suite config file");
            let content = fs::read_to_string(&path)
                .map_err(|err| ConfigError::Io(format!("failed to read `{}`: {err}", path.display())))?;
            let parsed: FileConfig = toml::from_str(&content)
                .map_err(|err| ConfigError::Parse(format!("`{}`: {err}", path.display())))?;
            let base = path.parent().map_or_else(|| config.root.clone(), Path::to_path_buf);
            config.apply_file(parsed, &base)?;
        }

        config.apply_overrides(overrides)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_file(&mut self, file: FileConfig, base: &Path) -> Result<(), ConfigError> {
        if let Some(name) = file.name {
            self.name = name;
        }
        if let Some(suffixes) = file.suffixes {
            self.suffixes = suffixes;
        }
        self.excludes.extend(file.excludes);
        if let Some(exec_root) = file.exec_root {
            self.exec_root = base.join(exec_root);
        }
        if let Some(leaders) = file.comment_leaders {
            self.parse.comment_leaders = leaders;
        }
        self.search_path.extend(file.search_path.into_iter().map(|dir| base.join(dir)));
        if let Some(dir) = file.tools_dir {
            self.tools_dir = Some(base.join(dir));
        }
        if let Some(inherit) = file.inherit_path {
            self.inherit_path = inherit;
        }
        self.env_passthrough.extend(file.env);
        if let Some(jobs) = file.jobs {
            self.jobs = jobs;
        }
        if let Some(secs) = file.timeout {
            self.timeout = seconds("timeout", secs)?;
        }
        if let Some(secs) = file.max_time {
            self.max_time = Some(seconds("max_time", secs)?);
        }
        if let Some(secs) = file.kill_grace {
            self.kill_grace = seconds("kill_grace", secs)?;
        }
        if let Some(fail_fast) = file.fail_fast {
            self.fail_fast = fail_fast;
        }
        if let Some(tools) = file.tools {
            self.tools = tools
                .into_iter()
                .map(|tool| {
                    let command = tool.command.unwrap_or_else(|| tool.name.clone());
                    ToolSpec::new(tool.name, command, tool.unresolved)
                })
                .collect();
        }
        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) -> Result<(), ConfigError> {
        for (name, path) in overrides.tools {
            if !self.tools.iter().any(|tool| tool.name == name) {
                self.tools.push(ToolSpec::new(name.clone(), name.clone(), UnresolvedPolicy::Fatal));
            }
            self.overrides.insert(name, absolute(&path)?);
        }
        if !overrides.search_path.is_empty() {
            let mut dirs = overrides
                .search_path
                .iter()
                .map(|dir| absolute(dir))
                .collect::<Result<Vec<_>, _>>()?;
            dirs.append(&mut self.search_path);
            self.search_path = dirs;
        }
        if let Some(dir) = overrides.tools_dir {
            self.tools_dir = Some(absolute(&dir)?);
        }
        if !overrides.suffixes.is_empty() {
            self.suffixes = overrides.suffixes;
        }
        if let Some(dir) = overrides.exec_root {
            self.exec_root = absolute(&dir)?;
        }
        if let Some(jobs) = overrides.jobs {
            self.jobs = jobs;
        }
        if let Some(secs) = overrides.timeout {
            self.timeout = seconds("--timeout", secs)?;
        }
        if let Some(secs) = overrides.max_time {
            self.max_time = Some(seconds("--max-time", secs)?);
        }
        self.env_passthrough.extend(overrides.env);
        if overrides.no_fail_fast {
            self.fail_fast = false;
        }
        if overrides.filter.is_some() {
            self.filter = overrides.filter;
        }
        Ok(())
    }

    /// Validate cross-field invariants and normalize suffixes to start with `.`.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.suffixes.is_empty() {
            return Err(ConfigError::Invalid("at least one test suffix is required".to_string()));
        }
        for suffix in &mut self.suffixes {
            if suffix.trim_start_matches('.').is_empty() {
                return Err(ConfigError::Invalid(format!("empty test suffix `{suffix}`")));
            }
            if !suffix.starts_with('.') {
                suffix.insert(0, '.');
            }
        }
        if self.jobs == 0 {
            return Err(ConfigError::Invalid("jobs must be at least 1".to_string()));
        }
        if self.jobs > Semaphore::MAX_PERMITS {
            return Err(ConfigError::Invalid(format!(
                "jobs must be at most {}, got {}",
                Semaphore::MAX_PERMITS,
                self.jobs
            )));
        }

        let mut seen = BTreeSet::new();
        for tool in &self.tools {
            if tool.name.is_empty() || !tool.name.chars().all(placeholders::is_name_char) {
                return Err(ConfigError::Invalid(format!(
                    "tool name `{}` is not a valid placeholder name",
                    tool.name
                )));
            }
            if placeholders::is_builtin(&tool.name) {
                return Err(ConfigError::Invalid(format!(
                    "tool name `{}` collides with the builtin placeholder `%{}`",
                    tool.name, tool.name
                )));
            }
            if !seen.insert(tool.name.as_str()) {
                return Err(ConfigError::Invalid(format!("tool `{}` is declared twice", tool.name)));
            }
        }
        Ok(())
    }
}

/// Parse a `--tool NAME=PATH` argument.
pub fn parse_tool_override(arg: &str) -> Result<(String, PathBuf), String> {
    let (name, path) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=PATH, got `{arg}`"))?;
    let name = name.trim().trim_start_matches(placeholders::SIGIL);
    if name.is_empty() || path.is_empty() {
        return Err(format!("expected NAME=PATH, got `{arg}`"));
    }
    Ok((name.to_string(), PathBuf::from(path)))
}

fn default_jobs() -> usize {
    std::thread::available_parallelism().map_or(1, usize::from)
}

fn seconds(field: &str, secs: f64) -> Result<Duration, ConfigError> {
    if secs.is_nan() || secs <= 0.0 {
        return Err(ConfigError::Invalid(format!("{field} must be a positive number of seconds, got {secs}")));
    }
    Duration::try_from_secs_f64(secs)
        .map_err(|err| ConfigError::Invalid(format!("{field} is out of range: {err}")))
}

fn absolute(path: &Path) -> Result<PathBuf, ConfigError> {
    std::path::absolute(path)
        .map_err(|err| ConfigError::Io(format!("cannot make `{}` absolute: {err}", path.display())))
}

fn absolute_dir(path: &Path) -> Result<PathBuf, ConfigError> {
    let abs = absolute(path)?;
    if !abs.is_dir() {
        return Err(ConfigError::Invalid(format!("suite root `{}` is not a directory", abs.display())));
    }
    Ok(abs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overrides(root: &Path) -> ConfigOverrides {
        ConfigOverrides {
            root: root.to_path_buf(),
            ..ConfigOverrides::default()
        }
    }

    #[test]
    fn test_defaults_describe_the_mua_suite() {
        let dir = tempfile::tempdir().unwrap();
        let config = SuiteConfig::load(overrides(dir.path())).unwrap();
        assert_eq!(config.name, "mua");
        assert_eq!(config.suffixes, [".mua"]);
        assert_eq!(config.tools, [ToolSpec::new("muac", "muac", UnresolvedPolicy::Fatal)]);
        assert_eq!(config.exec_root, config.root.join("Output"));
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert!(config.fail_fast);
        assert!(config.inherit_path);
        assert!(config.jobs >= 1);
    }

    #[test]
    fn test_root_must_be_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = SuiteConfig::load(overrides(&dir.path().join("missing"))).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(ref msg) if msg.contains("not a directory")), "{err}");
    }

    #[test]
    fn test_file_layer_then_cli_layer() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            r#"
name = "mua-llvm"
suffixes = ["mua", ".ll"]
excludes = ["Inputs"]
tools_dir = "bin"
env = ["HOME"]
timeout = 2.5
fail_fast = false

[[tools]]
name = "muac"

[[tools]]
name = "filecheck"
command = "FileCheck"
unresolved = "warn"
"#,
        )
        .unwrap();

        let mut cli = overrides(dir.path());
        cli.timeout = Some(7.0);
        cli.tools = vec![("opt".to_string(), PathBuf::from("tools/opt"))];
        cli.env = vec!["LANG".to_string()];
        let config = SuiteConfig::load(cli).unwrap();

        assert_eq!(config.name, "mua-llvm");
        assert_eq!(config.suffixes, [".mua", ".ll"]);
        assert_eq!(config.excludes, ["Inputs"]);
        assert_eq!(config.tools_dir, Some(config.root.join("bin")));
        assert_eq!(config.timeout, Duration::from_secs(7));
        assert!(!config.fail_fast);
        assert_eq!(config.env_passthrough, ["HOME", "LANG"]);
        assert_eq!(
            config.tools,
            [
                ToolSpec::new("muac", "muac", UnresolvedPolicy::Fatal),
                ToolSpec::new("filecheck", "FileCheck", UnresolvedPolicy::Warn),
                ToolSpec::new("opt", "opt", UnresolvedPolicy::Fatal),
            ]
        );
        assert!(config.overrides["opt"].is_absolute());
    }

    #[test]
    fn test_unknown_file_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE_NAME), "suffix = \".mua\"\n").unwrap();
        let err = SuiteConfig::load(overrides(dir.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)), "{err}");
    }

    #[test]
    fn test_tool_names_cannot_shadow_builtins() {
        let dir = tempfile::tempdir().unwrap();
        let mut cli = overrides(dir.path());
        cli.tools = vec![("s".to_string(), PathBuf::from("/bin/true"))];
        let err = SuiteConfig::load(cli).unwrap_err();
        assert!(err.to_string().contains("collides with the builtin"), "{err}");
    }

    #[test]
    fn test_invalid_numbers() {
        let dir = tempfile::tempdir().unwrap();
        let mut cli = overrides(dir.path());
        cli.jobs = Some(0);
        assert!(SuiteConfig::load(cli).is_err());

        let mut cli = overrides(dir.path());
        cli.jobs = Some(usize::MAX);
        let err = SuiteConfig::load(cli).unwrap_err();
        assert!(err.to_string().contains("jobs must be at most"), "{err}");

        let mut cli = overrides(dir.path());
        cli.jobs = Some(Semaphore::MAX_PERMITS);
        assert_eq!(SuiteConfig::load(cli).unwrap().jobs, Semaphore::MAX_PERMITS);

        let mut cli = overrides(dir.path());
        cli.timeout = Some(-1.0);
        assert!(SuiteConfig::load(cli).is_err());

        let mut cli = overrides(dir.path());
        cli.max_time = Some(f64::NAN);
        assert!(SuiteConfig::load(cli).is_err());
    }

    #[test]
    fn test_parse_tool_override() {
        assert_eq!(
            parse_tool_override("muac=/opt/mua/bin/muac"),
            Ok(("muac".to_string(), PathBuf::from("/opt/mua/bin/muac")))
        );
        assert_eq!(
            parse_tool_override("%muac=./muac"),
            Ok(("muac".to_string(), PathBuf::from("./muac")))
        );
        assert!(parse_tool_override("muac").is_err());
        assert!(parse_tool_override("=x").is_err());
        assert!(parse_tool_override("muac=").is_err());
    }
}
