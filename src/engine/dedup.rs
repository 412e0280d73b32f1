//! Novelty decision for one feed's fetch.
//!
//! Pure functions: no I/O, no clock. The caller persists `next_state`.

use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::feed::Entry;
use crate::storage::{DedupState, IdentitySet};

/// Entries to deliver, oldest first, and the state to persist afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupOutcome {
    pub new_entries: Vec<Entry>,
    pub next_state: DedupState,
}

/// Split a fetch into new entries and the advanced dedup state.
///
/// Watermark feeds: an entry is new iff it is strictly newer than the
/// watermark; the next watermark is the newest timestamp across the *whole*
/// fetch, so backdated entries never resurface. Undated entries are never new.
///
/// Identity feeds: an entry is new iff its identity is not remembered (first
/// occurrence wins within one fetch); every new identity is remembered.
///
/// New entries come back stably sorted by publication time, undated first,
/// so equal timestamps keep fetch order.
pub fn select_new(entries: Vec<Entry>, state: &DedupState) -> DedupOutcome {
    match state {
        DedupState::Watermark(mark) => {
            let (mut new_entries, next) = by_watermark(entries, *mark);
            new_entries.sort_by_key(|e| e.published_at);
            DedupOutcome {
                new_entries,
                next_state: DedupState::Watermark(next),
            }
        }
        DedupState::Identities(seen) => {
            let mut new_entries = by_identity(entries, seen);
            new_entries.sort_by_key(|e| e.published_at);

            let mut next = seen.clone();
            for entry in &new_entries {
                next.insert(entry.identity.clone());
            }
            DedupOutcome {
                new_entries,
                next_state: DedupState::Identities(next),
            }
        }
    }
}

fn by_watermark(
    entries: Vec<Entry>,
    mark: Option<DateTime<Utc>>,
) -> (Vec<Entry>, Option<DateTime<Utc>>) {
    let newest = entries.iter().filter_map(|e| e.published_at).max();
    let next = match (mark, newest) {
        (Some(m), Some(n)) => Some(m.max(n)),
        (m, n) => m.or(n),
    };

    let new = entries
        .into_iter()
        .filter(|e| match (e.published_at, mark) {
            (Some(published), Some(m)) => published > m,
            (Some(_), None) => true,
            (None, _) => false,
        })
        .collect();

    (new, next)
}

fn by_identity(entries: Vec<Entry>, seen: &IdentitySet) -> Vec<Entry> {
    let mut in_fetch = HashSet::new();
    entries
        .into_iter()
        .filter(|e| !seen.contains(&e.identity) && in_fetch.insert(e.identity.clone()))
        .collect()
}
