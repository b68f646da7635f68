use warden_types::NavEntry;

use crate::Ability;

/// Returns whether `entry` should be shown to a user with `ability`.
///
/// Entries without a complete `(action, subject)` requirement are always shown.
pub fn is_visible(entry: &NavEntry, ability: &Ability) -> bool {
    match entry.requirement() {
        Some(required) => ability.allows(&required),
        None => true,
    }
}

/// Filters `entries` down to the pages `ability` may access, preserving their order.
pub fn accessible_pages<'a>(entries: &'a [NavEntry], ability: &Ability) -> Vec<&'a NavEntry> {
    entries
        .iter()
        .filter(|entry| is_visible(entry, ability))
        .collect()
}
