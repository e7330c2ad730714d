//! Shell-like `RUN:` command templates.
//!
//! The grammar is deliberately small: words, quoting, and single-command redirections. There are no pipelines, no
//! command lists and no variable expansion; each `RUN:` line spawns exactly one process.
//!
//! Placeholders (`%muac`, `%s`, ...) are left untouched here and expanded per word later, so substituted paths are
//! never re-split.

use thiserror::Error;

/// Errors from splitting a `RUN:` payload into a [`CommandTemplate`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("unterminated {0} quote")]
    UnterminatedQuote(&'static str),

    #[error("dangling `\\` at end of command")]
    DanglingEscape,

    #[error("unsupported shell operator `{0}`; only `<`, `>`, `>>`, `2>` and `2>&1` are understood")]
    UnsupportedOperator(String),

    #[error("redirection `{0}` is missing a target")]
    MissingRedirectTarget(&'static str),

    #[error("empty command")]
    EmptyCommand,
}

/// Target of a stdout redirection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRedirect {
    /// Unexpanded path template.
    pub target: String,
    /// `>>` rather than `>`.
    pub append: bool,
}

/// One parsed `RUN:` command, with placeholders still unexpanded.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandTemplate {
    /// The command is expected to exit non-zero (one or more leading `not` words, toggling).
    pub expect_failure: bool,
    /// Program followed by its arguments.
    pub words: Vec<String>,
    pub stdin: Option<String>,
    pub stdout: Option<OutputRedirect>,
    pub stderr: Option<String>,
    /// `2>&1`: stderr joins the checked stdout stream.
    pub merge_stderr: bool,
}

impl CommandTemplate {
    /// The program word (first word after any `not` prefix).
    pub fn program(&self) -> &str {
        self.words.first().map_or("", String::as_str)
    }

    /// Every template string that needs placeholder expansion, words first then redirect targets.
    pub fn templates(&self) -> impl Iterator<Item = &str> {
        self.words
            .iter()
            .map(String::as_str)
            .chain(self.stdin.as_deref())
            .chain(self.stdout.as_ref().map(|r| r.target.as_str()))
            .chain(self.stderr.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word { text: String, quoted: bool },
    Op(&'static str),
}

/// Parse a `RUN:` payload.
pub fn parse_command(text: &str) -> Result<CommandTemplate, CommandError> {
    let tokens = tokenize(text)?;
    let mut template = CommandTemplate::default();
    let mut tokens = tokens.into_iter().peekable();

    while let Some(Token::Word { text, quoted: false }) = tokens.peek() {
        if text != "not" {
            break;
        }
        template.expect_failure = !template.expect_failure;
        tokens.next();
    }

    while let Some(token) = tokens.next() {
        match token {
            Token::Word { text, .. } => template.words.push(text),
            Token::Op("2>&1") => {
                template.merge_stderr = true;
                template.stderr = None;
            }
            Token::Op(op) => {
                let Some(Token::Word { text: target, .. }) = tokens.next() else {
                    return Err(CommandError::MissingRedirectTarget(op));
                };
                match op {
                    "<" => template.stdin = Some(target),
                    ">" | ">>" => {
                        template.stdout = Some(OutputRedirect {
                            target,
                            append: op == ">>",
                        })
                    }
                    _ => {
                        template.stderr = Some(target);
                        template.merge_stderr = false;
                    }
                }
            }
        }
    }

    if template.words.is_empty() {
        return Err(CommandError::EmptyCommand);
    }
    Ok(template)
}

fn tokenize(text: &str) -> Result<Vec<Token>, CommandError> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    let mut word = String::new();
    let mut in_word = false;
    let mut quoted = false;

    fn flush(tokens: &mut Vec<Token>, word: &mut String, in_word: &mut bool, quoted: &mut bool) {
        if *in_word {
            tokens.push(Token::Word {
                text: std::mem::take(word),
                quoted: *quoted,
            });
        }
        *in_word = false;
        *quoted = false;
    }

    while let Some(c) = chars.next() {
        match c {
            ' ' | '\t' => flush(&mut tokens, &mut word, &mut in_word, &mut quoted),
            '\'' => {
                in_word = true;
                quoted = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(ch) => word.push(ch),
                        None => return Err(CommandError::UnterminatedQuote("single")),
                    }
                }
            }
            '"' => {
                in_word = true;
                quoted = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(ch @ ('"' | '\\')) => word.push(ch),
                            Some(ch) => {
                                word.push('\\');
                                word.push(ch);
                            }
                            None => return Err(CommandError::UnterminatedQuote("double")),
                        },
                        Some(ch) => word.push(ch),
                        None => return Err(CommandError::UnterminatedQuote("double")),
                    }
                }
            }
            '\\' => match chars.next() {
                Some(ch) => {
                    word.push(ch);
                    in_word = true;
                    quoted = true;
                }
                None => return Err(CommandError::DanglingEscape),
            },
            '>' => {
                // `2>` only when the pending word is exactly an unquoted `2`.
                let stderr = in_word && !quoted && word == "2";
                if stderr {
                    word.clear();
                    in_word = false;
                } else {
                    flush(&mut tokens, &mut word, &mut in_word, &mut quoted);
                }
                let op = match (stderr, chars.peek()) {
                    (true, Some('&')) => {
                        chars.next();
                        if chars.next_if_eq(&'1').is_none() {
                            return Err(CommandError::UnsupportedOperator("2>&".to_string()));
                        }
                        "2>&1"
                    }
                    (true, _) => "2>",
                    (false, Some('>')) => {
                        chars.next();
                        ">>"
                    }
                    (false, Some('&')) => return Err(CommandError::UnsupportedOperator(">&".to_string())),
                    (false, _) => ">",
                };
                tokens.push(Token::Op(op));
            }
            '<' => {
                flush(&mut tokens, &mut word, &mut in_word, &mut quoted);
                tokens.push(Token::Op("<"));
            }
            '|' | '&' | ';' => {
                let mut op = c.to_string();
                if c != ';' {
                    if let Some(next) = chars.next_if_eq(&c) {
                        op.push(next);
                    }
                }
                return Err(CommandError::UnsupportedOperator(op));
            }
            _ => {
                word.push(c);
                in_word = true;
            }
        }
    }
    flush(&mut tokens, &mut word, &mut in_word, &mut quoted);
    Ok(tokens)
}
