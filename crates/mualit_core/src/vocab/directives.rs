//! Directive marker vocabulary.
//!
//! A directive is a test-file line whose payload (after an optional comment leader) starts with a marker token
//! followed by [`MARKER_TERMINATOR`]. `CHECK` markers may carry `-TAG` suffixes, see [`super::check_tags`].

use super::registry::{self, Example, VocabItemInfo};

/// Stable identifier for directive markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectiveId {
    Run,
    Check,
    Xfail,
}

/// Character that ends a marker token (`RUN:`).
pub const MARKER_TERMINATOR: char = ':';

/// Separator between a `CHECK` marker and its tags (`CHECK-NEXT:`).
pub const TAG_SEPARATOR: char = '-';

/// Trailing character that joins a directive with the next physical line.
pub const CONTINUATION: char = '\\';

/// Comment leaders stripped before looking for a marker, unless a suite overrides them.
///
/// `--` is the `mua` line comment; the others let the harness drive fixtures written in other languages.
pub const DEFAULT_COMMENT_LEADERS: &[&str] = &["--", "//", "#", ";"];

/// Metadata entry for a directive marker.
pub type DirectiveInfo = VocabItemInfo<DirectiveId>;

/// Registry of directive markers.
pub const DIRECTIVES: &[DirectiveInfo] = &[
    DirectiveInfo {
        id: DirectiveId::Run,
        canonical: "RUN",
        aliases: &[],
        description: "Shell-like command template executed in order; placeholders are expanded first.",
        examples: &[Example {
            code: "-- RUN: %muac %s -o %t",
            note: None,
        }],
    },
    DirectiveInfo {
        id: DirectiveId::Check,
        canonical: "CHECK",
        aliases: &[],
        description: "Pattern that must appear, in order, in the captured output.",
        examples: &[
            Example {
                code: "-- CHECK: define i32 @main",
                note: None,
            },
            Example {
                code: "-- CHECK-STDERR-EMPTY:",
                note: Some("Nothing but whitespace may appear on stderr."),
            },
        ],
    },
    DirectiveInfo {
        id: DirectiveId::Xfail,
        canonical: "XFAIL",
        aliases: &[],
        description: "Mark the whole test as expected to fail; a pass is reported as XPASS.",
        examples: &[Example {
            code: "-- XFAIL: lowering of closures is not implemented",
            note: None,
        }],
    },
];

/// Resolve a marker spelling (without the terminator) to its stable id.
pub fn from_str(marker: &str) -> Option<DirectiveId> {
    registry::lookup(DIRECTIVES, marker)
}

/// Return the canonical spelling for a directive marker.
pub fn as_str(id: DirectiveId) -> &'static str {
    registry::entry(DIRECTIVES, id).map_or("", |info| info.canonical)
}
