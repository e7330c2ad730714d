//! Parse errors for test-file directives.
//!
//! Every error is a "malformed directive": the test that contains it is reported as ERROR without running anything.
//! [`ParseError`] implements [`miette::Diagnostic`] so the runner can render the offending line in context.

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

use crate::command::CommandError;

/// What is wrong with a directive.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectiveErrorKind {
    #[error("line continuation `\\` on the last line of the file")]
    ContinuationAtEof,

    #[error("unknown CHECK tag `{0}`")]
    UnknownTag(String),

    #[error("CHECK tags `{first}` and `{second}` both set the {category}")]
    ConflictingTags {
        first: String,
        second: String,
        category: &'static str,
    },

    #[error("`{marker}:` has an empty pattern")]
    EmptyPattern { marker: String },

    #[error("`{marker}:` takes no pattern, found `{found}`")]
    UnexpectedPattern { marker: String, found: String },

    #[error("invalid regular expression: {0}")]
    InvalidRegex(String),

    #[error("`{marker}:` has no earlier positive CHECK on {stream} to anchor to")]
    MissingAnchor { marker: String, stream: &'static str },

    #[error("bad RUN command: {0}")]
    Command(#[from] CommandError),
}

/// A malformed directive, located in its source file.
#[derive(Debug, Error, Diagnostic)]
#[error("{file}:{line}: {kind}")]
#[diagnostic(code(mualit::malformed_directive))]
pub struct ParseError {
    pub kind: DirectiveErrorKind,
    /// File name as given to [`crate::parse_script`].
    pub file: String,
    /// 1-based line of the directive (the first physical line for continued directives).
    pub line: usize,
    #[source_code]
    pub src: NamedSource<String>,
    #[label("malformed directive")]
    pub span: SourceSpan,
}

impl ParseError {
    pub(crate) fn new(kind: DirectiveErrorKind, file: &str, source: &str, line: usize, span: (usize, usize)) -> Self {
        Self {
            kind,
            file: file.to_string(),
            line,
            src: NamedSource::new(file, source.to_string()),
            span: span.into(),
        }
    }

    /// Render the error with the offending line excerpted, without ANSI colours.
    pub fn render(&self) -> String {
        let handler = miette::GraphicalReportHandler::new_themed(miette::GraphicalTheme::unicode_nocolor());
        let mut out = String::new();
        if handler.render_report(&mut out, self).is_err() {
            return self.to_string();
        }
        out
    }
}
