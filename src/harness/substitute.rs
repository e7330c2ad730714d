//! Substitution Engine: expands `%` placeholders in a parsed `RUN:` command.
//!
//! Expansion happens per word after the command has been split, in a single left-to-right pass. Substituted text is
//! never re-scanned and never re-split, so a path containing spaces or `%` stays one argument.
//!
//! ## Placeholder forms
//!
//! - `%name`: the longest run of name characters (`[A-Za-z0-9_-]`) after the sigil.
//! - `%{name}`: an explicit name, for text that continues with name characters (`%{t}-out`).
//! - `%%`: a literal `%`.

use std::fmt;
use std::path::{Path, PathBuf};

use mualit_core::vocab::placeholders::{self, BRACE_CLOSE, BRACE_OPEN, PlaceholderId, SIGIL};
use mualit_syntax::CommandTemplate;
use thiserror::Error;

use super::registry::{ToolBinding, ToolBindings};

/// Extension of the per-test scratch file (`%t`).
pub const SCRATCH_FILE_EXT: &str = "tmp";
/// Extension of the per-test scratch directory (`%T`).
pub const SCRATCH_DIR_EXT: &str = "dir";

/// Why a `RUN:` command could not be expanded. Nothing is spawned for the test.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubstitutionError {
    /// The placeholder names a declared tool that could not be found.
    #[error("tool placeholder `%{name}` is unresolved: {reason}")]
    UnresolvedTool { name: String, reason: String },

    /// The placeholder is neither a builtin nor a declared tool.
    #[error("unknown substitution `%{name}` in `{word}`")]
    UnknownSubstitution { name: String, word: String },

    #[error("unterminated `%{{` in `{word}`")]
    UnterminatedBrace { word: String },
}

/// Per-test values for the builtin placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubstitutionContext {
    /// `%s`: absolute path of the test file.
    pub source: PathBuf,
    /// `%S` / `%p`: directory of the test file, also the working directory of every command.
    pub source_dir: PathBuf,
    /// `%t`
    pub scratch_file: PathBuf,
    /// `%T`
    pub scratch_dir: PathBuf,
}

impl SubstitutionContext {
    /// Context for the test `id` whose file is at `source`, with scratch paths under `exec_root`.
    pub fn for_test(source: &Path, id: &str, exec_root: &Path) -> Self {
        let source_dir = source.parent().map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        let (scratch_file, scratch_dir) = scratch_paths(exec_root, id);
        Self {
            source: source.to_path_buf(),
            source_dir,
            scratch_file,
            scratch_dir,
        }
    }
}

/// Scratch file and directory for a test id.
///
/// Both sit directly in `exec_root` under a flattened form of the id (`%` becomes `%25`, `/` becomes `%2F`). The
/// flattening is injective and the scratch paths of one test never contain another's, so they are the same for every
/// use within a test and disjoint between tests.
pub fn scratch_paths(exec_root: &Path, id: &str) -> (PathBuf, PathBuf) {
    let flat = flatten_id(id);
    (
        exec_root.join(format!("{flat}.{SCRATCH_FILE_EXT}")),
        exec_root.join(format!("{flat}.{SCRATCH_DIR_EXT}")),
    )
}

fn flatten_id(id: &str) -> String {
    let mut flat = String::with_capacity(id.len());
    for c in id.chars() {
        match c {
            '%' => flat.push_str("%25"),
            '/' => flat.push_str("%2F"),
            c => flat.push(c),
        }
    }
    flat
}

/// Stdout redirection target after expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTarget {
    pub path: PathBuf,
    pub append: bool,
}

/// A fully expanded command, ready to spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandedCommand {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<PathBuf>,
    pub stdout: Option<OutputTarget>,
    pub stderr: Option<PathBuf>,
    pub merge_stderr: bool,
    pub expect_failure: bool,
}

impl fmt::Display for ExpandedCommand {
    /// Shell-quoted rendering for failure reports.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.expect_failure {
            f.write_str("not ")?;
        }
        f.write_str(&shell_quote(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", shell_quote(arg))?;
        }
        if let Some(path) = &self.stdin {
            write!(f, " < {}", shell_quote(&path.to_string_lossy()))?;
        }
        if let Some(target) = &self.stdout {
            let op = if target.append { ">>" } else { ">" };
            write!(f, " {op} {}", shell_quote(&target.path.to_string_lossy()))?;
        }
        if let Some(path) = &self.stderr {
            write!(f, " 2> {}", shell_quote(&path.to_string_lossy()))?;
        }
        if self.merge_stderr {
            f.write_str(" 2>&1")?;
        }
        Ok(())
    }
}

/// Quote `word` for display if it contains anything a shell would treat specially.
pub fn shell_quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word.chars().all(|c| {
            c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | '=' | ':' | ',' | '+' | '@' | '%')
        });
    if plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// Expand every placeholder in `template`.
///
/// Relative redirect targets are resolved against the working directory (`ctx.source_dir`).
pub fn expand(
    template: &CommandTemplate,
    bindings: &ToolBindings,
    ctx: &SubstitutionContext,
) -> Result<ExpandedCommand, SubstitutionError> {
    let mut words = template
        .words
        .iter()
        .map(|word| expand_word(word, bindings, ctx))
        .collect::<Result<Vec<_>, _>>()?
        .into_iter();
    let program = words.next().unwrap_or_default();
    let args = words.collect();

    let path = |word: &str| -> Result<PathBuf, SubstitutionError> {
        Ok(ctx.source_dir.join(expand_word(word, bindings, ctx)?))
    };
    let stdin = template.stdin.as_deref().map(path).transpose()?;
    let stdout = template
        .stdout
        .as_ref()
        .map(|redirect| {
            path(&redirect.target).map(|path| OutputTarget {
                path,
                append: redirect.append,
            })
        })
        .transpose()?;
    let stderr = template.stderr.as_deref().map(path).transpose()?;

    Ok(ExpandedCommand {
        program,
        args,
        stdin,
        stdout,
        stderr,
        merge_stderr: template.merge_stderr,
        expect_failure: template.expect_failure,
    })
}

/// Expand the placeholders of a single word.
pub fn expand_word(
    word: &str,
    bindings: &ToolBindings,
    ctx: &SubstitutionContext,
) -> Result<String, SubstitutionError> {
    let mut out = String::with_capacity(word.len());
    let mut rest = word;
    while let Some(pos) = rest.find(SIGIL) {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + SIGIL.len_utf8()..];
        let (name, consumed) = if let Some(braced) = after.strip_prefix(BRACE_OPEN) {
            let end = braced.find(BRACE_CLOSE).ok_or_else(|| SubstitutionError::UnterminatedBrace {
                word: word.to_string(),
            })?;
            (&braced[..end], BRACE_OPEN.len_utf8() + end + BRACE_CLOSE.len_utf8())
        } else if after.starts_with(SIGIL) {
            (&after[..SIGIL.len_utf8()], SIGIL.len_utf8())
        } else {
            let end = after
                .find(|c: char| !placeholders::is_name_char(c))
                .unwrap_or(after.len());
            (&after[..end], end)
        };
        out.push_str(&lookup(name, word, bindings, ctx)?);
        rest = &after[consumed..];
    }
    out.push_str(rest);
    Ok(out)
}

fn lookup(
    name: &str,
    word: &str,
    bindings: &ToolBindings,
    ctx: &SubstitutionContext,
) -> Result<String, SubstitutionError> {
    let text = match placeholders::from_str(name) {
        Some(PlaceholderId::Percent) => SIGIL.to_string(),
        Some(PlaceholderId::Source) => ctx.source.to_string_lossy().into_owned(),
        Some(PlaceholderId::SourceDir) => ctx.source_dir.to_string_lossy().into_owned(),
        Some(PlaceholderId::Scratch) => ctx.scratch_file.to_string_lossy().into_owned(),
        Some(PlaceholderId::ScratchDir) => ctx.scratch_dir.to_string_lossy().into_owned(),
        Some(PlaceholderId::PathSep) => path_list_separator().to_string(),
        None => match bindings.get(name) {
            Some(ToolBinding::Resolved(path)) => path.to_string_lossy().into_owned(),
            Some(ToolBinding::Unresolved { reason }) => {
                return Err(SubstitutionError::UnresolvedTool {
                    name: name.to_string(),
                    reason: reason.clone(),
                });
            }
            None => {
                return Err(SubstitutionError::UnknownSubstitution {
                    name: name.to_string(),
                    word: word.to_string(),
                });
            }
        },
    };
    Ok(text)
}

fn path_list_separator() -> char {
    if cfg!(windows) { ';' } else { ':' }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mualit_syntax::command::parse_command;

    fn bindings() -> ToolBindings {
        [
            ("muac".to_string(), ToolBinding::Resolved(PathBuf::from("/opt/mua/bin/muac"))),
            (
                "filecheck".to_string(),
                ToolBinding::Unresolved {
                    reason: "`FileCheck` not found".to_string(),
                },
            ),
        ]
        .into_iter()
        .collect()
    }

    fn ctx() -> SubstitutionContext {
        SubstitutionContext::for_test(
            Path::new("/suite/codegen/add.mua"),
            "codegen/add.mua",
            Path::new("/suite/Output"),
        )
    }

    fn expand_str(text: &str) -> Result<ExpandedCommand, SubstitutionError> {
        expand(&parse_command(text).unwrap(), &bindings(), &ctx())
    }

    #[test]
    fn test_builtins_and_tools() {
        let cmd = expand_str("%muac %s --emit=llvm -o %t -I %S -I %p -L %T").unwrap();
        assert_eq!(cmd.program, "/opt/mua/bin/muac");
        assert_eq!(
            cmd.args,
            [
                "/suite/codegen/add.mua",
                "--emit=llvm",
                "-o",
                "/suite/Output/codegen%2Fadd.mua.tmp",
                "-I",
                "/suite/codegen",
                "-I",
                "/suite/codegen",
                "-L",
                "/suite/Output/codegen%2Fadd.mua.dir",
            ]
        );
    }

    #[test]
    fn test_scratch_paths_never_nest() {
        let exec_root = Path::new("/suite/Output");
        let (_, dir_a) = scratch_paths(exec_root, "a.mua");
        let (file_b, dir_b) = scratch_paths(exec_root, "a.mua.dir/b.mua");
        assert_eq!(file_b, PathBuf::from("/suite/Output/a.mua.dir%2Fb.mua.tmp"));
        assert!(!file_b.starts_with(&dir_a));
        assert!(!dir_b.starts_with(&dir_a));
        assert_ne!(scratch_paths(exec_root, "a/b.mua"), scratch_paths(exec_root, "a%2Fb.mua"));
    }

    #[test]
    fn test_braced_and_percent_forms() {
        let cmd = expand_str("echo %{t}-out 100%% %%s x%{pathsep}y").unwrap();
        let sep = path_list_separator();
        assert_eq!(
            cmd.args,
            [
                "/suite/Output/codegen%2Fadd.mua.tmp-out".to_string(),
                "100%".to_string(),
                "%s".to_string(),
                format!("x{sep}y"),
            ]
        );
    }

    #[test]
    fn test_longest_name_wins() {
        // `%s-out` names a placeholder `s-out`, which does not exist.
        assert_eq!(
            expand_str("echo %s-out"),
            Err(SubstitutionError::UnknownSubstitution {
                name: "s-out".to_string(),
                word: "%s-out".to_string()
            })
        );
        assert_eq!(expand_str("echo %s.ll").unwrap().args, ["/suite/codegen/add.mua.ll"]);
    }

    #[test]
    fn test_unknown_and_unresolved() {
        assert!(matches!(
            expand_str("%llc %s"),
            Err(SubstitutionError::UnknownSubstitution { name, .. }) if name == "llc"
        ));
        assert!(matches!(
            expand_str("%filecheck %s"),
            Err(SubstitutionError::UnresolvedTool { name, .. }) if name == "filecheck"
        ));
        assert!(matches!(
            expand_str("echo 5%"),
            Err(SubstitutionError::UnknownSubstitution { name, .. }) if name.is_empty()
        ));
        assert!(matches!(expand_str("echo %{t"), Err(SubstitutionError::UnterminatedBrace { .. })));
    }

    #[test]
    fn test_redirects_resolve_against_source_dir() {
        let cmd = expand_str("not %muac %s < input.txt >> %t 2> logs/err.txt").unwrap();
        assert!(cmd.expect_failure);
        assert_eq!(cmd.stdin, Some(PathBuf::from("/suite/codegen/input.txt")));
        assert_eq!(
            cmd.stdout,
            Some(OutputTarget {
                path: PathBuf::from("/suite/Output/codegen%2Fadd.mua.tmp"),
                append: true
            })
        );
        assert_eq!(cmd.stderr, Some(PathBuf::from("/suite/codegen/logs/err.txt")));
    }

    #[test]
    fn test_substituted_text_is_not_rescanned() {
        let bindings: ToolBindings = [("weird".to_string(), ToolBinding::Resolved(PathBuf::from("/a b/%s")))]
            .into_iter()
            .collect();
        let cmd = expand(&parse_command("%weird %s").unwrap(), &bindings, &ctx()).unwrap();
        assert_eq!(cmd.program, "/a b/%s");
        assert_eq!(cmd.args, ["/suite/codegen/add.mua"]);
    }

    #[test]
    fn test_display_quotes_special_words() {
        let cmd = expand_str("not %muac 'a b' \"it's\" > %t 2>&1").unwrap();
        insta::assert_snapshot!(
            cmd.to_string(),
            @r"not /opt/mua/bin/muac 'a b' 'it'\''s' > /suite/Output/codegen%2Fadd.mua.tmp 2>&1"
        );
    }
}
