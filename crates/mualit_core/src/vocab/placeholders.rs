//! Builtin `%` placeholder vocabulary.
//!
//! Builtins are always available and take precedence over tool placeholders; a suite may not declare a tool whose
//! name collides with a builtin spelling.

use super::registry::{self, Example, VocabItemInfo};

/// Introduces a placeholder in a `RUN:` template.
pub const SIGIL: char = '%';

/// Opens the braced placeholder form (`%{name}`).
pub const BRACE_OPEN: char = '{';

/// Closes the braced placeholder form.
pub const BRACE_CLOSE: char = '}';

/// Stable identifier for builtin placeholders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaceholderId {
    /// `%%`: a literal percent sign.
    Percent,
    /// `%s`: absolute path of the test file.
    Source,
    /// `%S`: directory holding the test file.
    SourceDir,
    /// `%t`: scratch file path unique to the test.
    Scratch,
    /// `%T`: scratch directory unique to the test.
    ScratchDir,
    /// `%{pathsep}`: platform separator for path lists.
    PathSep,
}

/// Metadata entry for a builtin placeholder.
pub type PlaceholderInfo = VocabItemInfo<PlaceholderId>;

/// Registry of builtin placeholders, keyed by the name after the sigil.
pub const PLACEHOLDERS: &[PlaceholderInfo] = &[
    PlaceholderInfo {
        id: PlaceholderId::Percent,
        canonical: "%",
        aliases: &[],
        description: "A literal `%`.",
        examples: &[],
    },
    PlaceholderInfo {
        id: PlaceholderId::Source,
        canonical: "s",
        aliases: &[],
        description: "Absolute path of the test file.",
        examples: &[Example {
            code: "%muac %s",
            note: None,
        }],
    },
    PlaceholderInfo {
        id: PlaceholderId::SourceDir,
        canonical: "S",
        aliases: &["p"],
        description: "Directory containing the test file.",
        examples: &[],
    },
    PlaceholderInfo {
        id: PlaceholderId::Scratch,
        canonical: "t",
        aliases: &[],
        description: "Scratch file path derived from the test identity; stable within one test.",
        examples: &[Example {
            code: "%muac %s -o %t",
            note: None,
        }],
    },
    PlaceholderInfo {
        id: PlaceholderId::ScratchDir,
        canonical: "T",
        aliases: &[],
        description: "Scratch directory derived from the test identity; created empty before the first directive.",
        examples: &[],
    },
    PlaceholderInfo {
        id: PlaceholderId::PathSep,
        canonical: "pathsep",
        aliases: &[],
        description: "Separator used in PATH-like lists (`:` on Unix, `;` on Windows).",
        examples: &[],
    },
];

/// Resolve a placeholder name (without the sigil) to a builtin id.
pub fn from_str(name: &str) -> Option<PlaceholderId> {
    registry::lookup(PLACEHOLDERS, name)
}

/// Return the canonical name for a builtin placeholder.
pub fn as_str(id: PlaceholderId) -> &'static str {
    registry::entry(PLACEHOLDERS, id).map_or("", |info| info.canonical)
}

/// Whether `name` is reserved by a builtin placeholder.
pub fn is_builtin(name: &str) -> bool {
    from_str(name).is_some()
}

/// Whether `c` may appear in an unbraced placeholder name (`%muac`, `%s`).
pub fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}
