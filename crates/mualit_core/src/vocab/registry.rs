//! Shareable metadata for `mualit_core::vocab` registries.
//!
//! Every vocabulary (directive markers, check tags, builtin placeholders) is a `const` table of items that share
//! the same core fields: a stable id, accepted spellings, and documentation. This module provides that shape.
//!
//! ## Notes
//! - These types are `Copy` so registries can live in `const` tables.
//! - Metadata feeds diagnostics and `--help` style listings; syntax enforcement lives in `mualit_syntax`.

/// Represent a small example snippet for documentation.
///
/// ## Examples
/// ```rust
/// use mualit_core::vocab::registry::Example;
///
/// let ex = Example {
///     code: "-- RUN: %muac %s -o %t",
///     note: Some("Compile the test file into a scratch path."),
/// };
/// assert!(ex.code.contains("RUN:"));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Example {
    pub code: &'static str,
    pub note: Option<&'static str>,
}

/// Shared metadata shape for registry-first vocabulary items.
///
/// ## Notes
/// - `canonical` is the spelling used when rendering diagnostics.
/// - `aliases` are accepted on input only.
/// - `description` is mandatory to keep listings consistent.
#[derive(Debug, Clone, Copy)]
pub struct VocabItemInfo<Id> {
    pub id: Id,
    pub canonical: &'static str,
    pub aliases: &'static [&'static str],
    pub description: &'static str,
    pub examples: &'static [Example],
}

impl<Id: Copy + PartialEq> VocabItemInfo<Id> {
    /// Whether `spelling` is the canonical spelling or one of the aliases.
    pub fn accepts(&self, spelling: &str) -> bool {
        self.canonical == spelling || self.aliases.contains(&spelling)
    }
}

/// Find the id accepting `spelling` in a registry table (canonical spellings win over aliases).
pub fn lookup<Id: Copy + PartialEq>(table: &[VocabItemInfo<Id>], spelling: &str) -> Option<Id> {
    table
        .iter()
        .find(|item| item.canonical == spelling)
        .or_else(|| table.iter().find(|item| item.accepts(spelling)))
        .map(|item| item.id)
}

/// Find the metadata entry for `id` in a registry table.
pub fn entry<Id: Copy + PartialEq>(table: &[VocabItemInfo<Id>], id: Id) -> Option<&VocabItemInfo<Id>> {
    table.iter().find(|item| item.id == id)
}
