//! Extract `RUN:`, `CHECK...:` and `XFAIL:` directives from a test file.
//!
//! Parsing is line oriented. Each physical line is trimmed, one comment leader is stripped, and the remainder is
//! checked for a marker token (`[A-Z0-9-]+` immediately followed by `:`). Lines without a recognized marker are
//! ordinary test source.

use mualit_core::vocab::check_tags::{self, CheckTagId, TagCategory};
use mualit_core::vocab::directives::{
    self, CONTINUATION, DEFAULT_COMMENT_LEADERS, DirectiveId, MARKER_TERMINATOR, TAG_SEPARATOR,
};
use regex::{Regex, RegexBuilder};

use crate::command::{self, CommandTemplate};
use crate::errors::{DirectiveErrorKind, ParseError};

/// Knobs for [`parse_script`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOptions {
    /// Comment leaders tried in order; the first that prefixes the trimmed line is stripped.
    pub comment_leaders: Vec<String>,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            comment_leaders: DEFAULT_COMMENT_LEADERS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Which captured stream an expectation searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    pub fn as_str(self) -> &'static str {
        match self {
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
        }
    }
}

impl std::fmt::Display for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Positional relationship or polarity of an expectation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckKind {
    /// Plain `CHECK:`: anywhere at or after the cursor.
    Match,
    Next,
    Same,
    Not,
    Empty,
}

impl CheckKind {
    /// Whether a successful match moves the stream cursor.
    pub fn is_positive(self) -> bool {
        !matches!(self, CheckKind::Not)
    }
}

/// How the pattern text is matched.
#[derive(Debug, Clone)]
pub enum Matcher {
    Literal(String),
    /// Compiled with multi-line mode so `^` and `$` anchor at line boundaries.
    Regex(Regex),
}

impl Matcher {
    /// Pattern text as written in the test file.
    pub fn pattern(&self) -> &str {
        match self {
            Matcher::Literal(s) => s,
            Matcher::Regex(re) => re.as_str(),
        }
    }

    /// Find the first match in `haystack[from..to]`, returning absolute byte offsets.
    ///
    /// `from` and `to` must lie on char boundaries. Regex anchors still see the text before `from`, so `^` only
    /// matches at real line starts.
    pub fn find(&self, haystack: &str, from: usize, to: usize) -> Option<(usize, usize)> {
        if from > to || to > haystack.len() {
            return None;
        }
        match self {
            Matcher::Literal(needle) => haystack[from..to]
                .find(needle.as_str())
                .map(|start| (from + start, from + start + needle.len())),
            Matcher::Regex(re) => re.find_at(&haystack[..to], from).map(|m| (m.start(), m.end())),
        }
    }
}

impl PartialEq for Matcher {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Matcher::Literal(a), Matcher::Literal(b)) => a == b,
            (Matcher::Regex(a), Matcher::Regex(b)) => a.as_str() == b.as_str(),
            _ => false,
        }
    }
}

/// A `RUN:` directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDirective {
    /// Ordinal among the file's `RUN:` directives.
    pub index: usize,
    /// 1-based line of the marker.
    pub line: usize,
    /// Payload with continuations joined.
    pub text: String,
    pub command: CommandTemplate,
}

/// A `CHECK...:` directive.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpectDirective {
    /// Ordinal among the file's expectations.
    pub index: usize,
    pub line: usize,
    /// Marker as written, e.g. `CHECK-STDERR-NOT`.
    pub marker: String,
    pub kind: CheckKind,
    /// `None` only for [`CheckKind::Empty`].
    pub matcher: Option<Matcher>,
    pub stream: Stream,
}

/// An `XFAIL:` marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XfailDirective {
    pub line: usize,
    /// Free text after the marker; may be empty.
    pub reason: String,
}

/// Ordered directives of one test file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TestScript {
    pub run: Vec<RunDirective>,
    pub expect: Vec<ExpectDirective>,
    pub xfail: Option<XfailDirective>,
}

/// Parse every directive in `source`.
///
/// `name` is only used for diagnostics.
#[tracing::instrument(skip_all, fields(file = name))]
pub fn parse_script(name: &str, source: &str, options: &ParseOptions) -> Result<TestScript, ParseError> {
    let lines = line_spans(source);
    let mut builder = ScriptBuilder::default();
    let fail = |kind: DirectiveErrorKind, line_idx: usize| {
        let (offset, raw) = lines[line_idx];
        ParseError::new(kind, name, source, line_idx + 1, (offset, raw.len()))
    };

    let mut idx = 0;
    while idx < lines.len() {
        let Some((marker, payload)) = split_marker(lines[idx].1, options) else {
            idx += 1;
            continue;
        };
        let Some(directive) = classify(marker) else {
            idx += 1;
            continue;
        };

        let mut payload = payload.trim().to_string();
        let mut last = idx;
        while let Some(head) = payload.strip_suffix(CONTINUATION) {
            let head = head.trim_end().to_string();
            if last + 1 >= lines.len() {
                return Err(fail(DirectiveErrorKind::ContinuationAtEof, last));
            }
            last += 1;
            let tail = continuation_payload(lines[last].1, marker, options);
            payload = if head.is_empty() {
                tail.to_string()
            } else if tail.is_empty() {
                head
            } else {
                format!("{head} {tail}")
            };
        }

        builder.push(directive, marker, payload, idx + 1).map_err(|kind| fail(kind, idx))?;
        idx = last + 1;
    }

    tracing::debug!(
        run = builder.script.run.len(),
        expect = builder.script.expect.len(),
        xfail = builder.script.xfail.is_some(),
        "parsed directives"
    );
    Ok(builder.script)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    Directive(DirectiveId),
    /// `CHECK-...` with tags still to be validated.
    TaggedCheck,
}

fn classify(marker: &str) -> Option<Marker> {
    if let Some(id) = directives::from_str(marker) {
        return Some(Marker::Directive(id));
    }
    let check = directives::as_str(DirectiveId::Check);
    marker
        .strip_prefix(check)
        .filter(|rest| rest.starts_with(TAG_SEPARATOR))
        .map(|_| Marker::TaggedCheck)
}

/// Byte offset and text of every physical line, without the line terminator.
fn line_spans(source: &str) -> Vec<(usize, &str)> {
    let mut spans = Vec::new();
    let mut offset = 0;
    for raw in source.split_inclusive('\n') {
        let text = raw.strip_suffix('\n').unwrap_or(raw);
        let text = text.strip_suffix('\r').unwrap_or(text);
        spans.push((offset, text));
        offset += raw.len();
    }
    spans
}

fn strip_leader<'a>(line: &'a str, options: &ParseOptions) -> &'a str {
    let text = line.trim();
    for leader in &options.comment_leaders {
        if leader.is_empty() {
            continue;
        }
        if let Some(rest) = text.strip_prefix(leader.as_str()) {
            return rest.trim_start();
        }
    }
    text
}

/// Split a line into `(marker, payload)` if it starts with a marker token.
fn split_marker<'a>(line: &'a str, options: &ParseOptions) -> Option<(&'a str, &'a str)> {
    let text = strip_leader(line, options);
    let len = text
        .find(|c: char| !(c.is_ascii_uppercase() || c.is_ascii_digit() || c == TAG_SEPARATOR))
        .unwrap_or(text.len());
    if len == 0 {
        return None;
    }
    let (token, rest) = text.split_at(len);
    let payload = rest.strip_prefix(MARKER_TERMINATOR)?;
    Some((token, payload))
}

fn continuation_payload<'a>(line: &'a str, marker: &str, options: &ParseOptions) -> &'a str {
    let text = strip_leader(line, options);
    match split_marker(line, options) {
        Some((token, payload)) if token == marker => payload.trim(),
        _ => text.trim(),
    }
}

#[derive(Default)]
struct ScriptBuilder {
    script: TestScript,
    /// Whether a positive expectation has been seen on stdout / stderr.
    anchored: [bool; 2],
}

impl ScriptBuilder {
    fn push(&mut self, marker: Marker, spelling: &str, payload: String, line: usize) -> Result<(), DirectiveErrorKind> {
        match marker {
            Marker::Directive(DirectiveId::Run) => {
                let command = command::parse_command(&payload)?;
                self.script.run.push(RunDirective {
                    index: self.script.run.len(),
                    line,
                    text: payload,
                    command,
                });
            }
            Marker::Directive(DirectiveId::Xfail) => {
                if self.script.xfail.is_none() {
                    self.script.xfail = Some(XfailDirective { line, reason: payload });
                }
            }
            Marker::Directive(DirectiveId::Check) | Marker::TaggedCheck => {
                let expect = self.expectation(spelling, payload, line)?;
                self.script.expect.push(expect);
            }
        }
        Ok(())
    }

    fn expectation(
        &mut self,
        spelling: &str,
        payload: String,
        line: usize,
    ) -> Result<ExpectDirective, DirectiveErrorKind> {
        let mut kind = (CheckKind::Match, None::<&str>);
        let mut regex = None::<&str>;
        let mut stream = (Stream::Stdout, None::<&str>);

        for tag in spelling.split(TAG_SEPARATOR).skip(1) {
            let id = check_tags::from_str(tag).ok_or_else(|| DirectiveErrorKind::UnknownTag(tag.to_string()))?;
            let previous = match check_tags::category(id) {
                TagCategory::Kind => kind.1.replace(tag),
                TagCategory::Matcher => regex.replace(tag),
                TagCategory::Stream => stream.1.replace(tag),
            };
            if let Some(first) = previous {
                return Err(DirectiveErrorKind::ConflictingTags {
                    first: first.to_string(),
                    second: tag.to_string(),
                    category: category_name(check_tags::category(id)),
                });
            }
            match id {
                CheckTagId::Next => kind.0 = CheckKind::Next,
                CheckTagId::Same => kind.0 = CheckKind::Same,
                CheckTagId::Not => kind.0 = CheckKind::Not,
                CheckTagId::Empty => kind.0 = CheckKind::Empty,
                CheckTagId::Stdout => stream.0 = Stream::Stdout,
                CheckTagId::Stderr => stream.0 = Stream::Stderr,
                CheckTagId::Re => {}
            }
        }
        let (kind, kind_tag) = kind;
        let stream = stream.0;

        let matcher = if kind == CheckKind::Empty {
            if let Some(re_tag) = regex {
                return Err(DirectiveErrorKind::ConflictingTags {
                    first: kind_tag.unwrap_or_default().to_string(),
                    second: re_tag.to_string(),
                    category: "pattern",
                });
            }
            if !payload.is_empty() {
                return Err(DirectiveErrorKind::UnexpectedPattern {
                    marker: spelling.to_string(),
                    found: payload,
                });
            }
            None
        } else if payload.is_empty() {
            return Err(DirectiveErrorKind::EmptyPattern {
                marker: spelling.to_string(),
            });
        } else if regex.is_some() {
            let re = RegexBuilder::new(&payload)
                .multi_line(true)
                .build()
                .map_err(|e| DirectiveErrorKind::InvalidRegex(e.to_string()))?;
            Some(Matcher::Regex(re))
        } else {
            Some(Matcher::Literal(payload))
        };

        let slot = stream as usize;
        if matches!(kind, CheckKind::Next | CheckKind::Same) && !self.anchored[slot] {
            return Err(DirectiveErrorKind::MissingAnchor {
                marker: spelling.to_string(),
                stream: stream.as_str(),
            });
        }
        if kind.is_positive() {
            self.anchored[slot] = true;
        }

        Ok(ExpectDirective {
            index: self.script.expect.len(),
            line,
            marker: spelling.to_string(),
            kind,
            matcher,
            stream,
        })
    }
}

fn category_name(category: TagCategory) -> &'static str {
    match category {
        TagCategory::Kind => "check kind",
        TagCategory::Matcher => "matcher",
        TagCategory::Stream => "stream",
    }
}
