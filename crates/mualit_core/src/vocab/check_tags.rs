//! `CHECK` tag vocabulary.
//!
//! Tags follow the `CHECK` marker separated by `-` and may appear in any order, e.g. `CHECK-STDERR-NOT:`. Each tag
//! belongs to one [`TagCategory`]; a directive may carry at most one tag per category.

use super::registry::VocabItemInfo;

/// Stable identifier for every check tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckTagId {
    Next,
    Same,
    Not,
    Empty,
    Re,
    Stdout,
    Stderr,
}

/// Which aspect of an expectation a tag controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagCategory {
    /// Positional relationship or polarity (`NEXT`, `SAME`, `NOT`, `EMPTY`).
    Kind,
    /// How the pattern text is interpreted (`RE`).
    Matcher,
    /// Which captured stream is searched (`STDOUT`, `STDERR`).
    Stream,
}

/// Metadata entry for a check tag, extended with its category.
#[derive(Debug, Clone, Copy)]
pub struct CheckTagInfo {
    pub info: VocabItemInfo<CheckTagId>,
    pub category: TagCategory,
}

/// Registry of check tags.
pub const CHECK_TAGS: &[CheckTagInfo] = &[
    tag(
        CheckTagId::Next,
        "NEXT",
        &[],
        "Match on the next non-blank line after the previous match.",
        TagCategory::Kind,
    ),
    tag(
        CheckTagId::Same,
        "SAME",
        &[],
        "Match on the same line as the previous match.",
        TagCategory::Kind,
    ),
    tag(
        CheckTagId::Not,
        "NOT",
        &[],
        "Fail if the pattern appears before the next positive match.",
        TagCategory::Kind,
    ),
    tag(
        CheckTagId::Empty,
        "EMPTY",
        &[],
        "The rest of the stream holds nothing but whitespace.",
        TagCategory::Kind,
    ),
    tag(
        CheckTagId::Re,
        "RE",
        &["REGEX"],
        "Interpret the pattern as a regular expression; `^` and `$` anchor at line boundaries.",
        TagCategory::Matcher,
    ),
    tag(
        CheckTagId::Stdout,
        "STDOUT",
        &["OUT"],
        "Search the captured stdout stream (the default).",
        TagCategory::Stream,
    ),
    tag(
        CheckTagId::Stderr,
        "STDERR",
        &["ERR"],
        "Search the captured stderr stream.",
        TagCategory::Stream,
    ),
];

/// Resolve a tag spelling to its stable id.
pub fn from_str(spelling: &str) -> Option<CheckTagId> {
    CHECK_TAGS
        .iter()
        .find(|t| t.info.canonical == spelling)
        .or_else(|| CHECK_TAGS.iter().find(|t| t.info.accepts(spelling)))
        .map(|t| t.info.id)
}

/// Return the canonical spelling for a tag.
pub fn as_str(id: CheckTagId) -> &'static str {
    info_for(id).map_or("", |t| t.info.canonical)
}

/// Return the category a tag belongs to.
pub fn category(id: CheckTagId) -> TagCategory {
    info_for(id).map_or(TagCategory::Kind, |t| t.category)
}

/// Return the registry entry for a tag.
pub fn info_for(id: CheckTagId) -> Option<&'static CheckTagInfo> {
    CHECK_TAGS.iter().find(|t| t.info.id == id)
}

/// Return the plain metadata entries, for callers that only need spellings.
pub fn infos() -> impl Iterator<Item = &'static VocabItemInfo<CheckTagId>> {
    CHECK_TAGS.iter().map(|t| &t.info)
}

const fn tag(
    id: CheckTagId,
    canonical: &'static str,
    aliases: &'static [&'static str],
    description: &'static str,
    category: TagCategory,
) -> CheckTagInfo {
    CheckTagInfo {
        info: VocabItemInfo {
            id,
            canonical,
            aliases,
            description,
            examples: &[],
        },
        category,
    }
}
