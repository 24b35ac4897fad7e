//! Character-level change statistics between two full-text snapshots.
//!
//! Uses a Myers sequence diff over Unicode scalar values. The counts form a
//! minimal edit script, so swapping the inputs swaps the counts.

use similar::{ChangeTag, TextDiff};

use crate::model::ChangeStats;

/// Count characters added and deleted going from `old` to `new`.
pub fn change_stats(old: &str, new: &str) -> ChangeStats {
    if old == new {
        return ChangeStats::default();
    }
    if old.is_empty() {
        return all_added(new);
    }

    let diff = TextDiff::from_chars(old, new);
    let mut stats = ChangeStats::default();
    for change in diff.iter_all_changes() {
        let n = change.value().chars().count() as u64;
        match change.tag() {
            ChangeTag::Insert => stats.chars_added += n,
            ChangeTag::Delete => stats.chars_deleted += n,
            ChangeTag::Equal => {}
        }
    }
    stats
}

/// Stats for a snapshot with no predecessor.
pub fn all_added(content: &str) -> ChangeStats {
    ChangeStats {
        chars_added: content.chars().count() as u64,
        chars_deleted: 0,
    }
}
