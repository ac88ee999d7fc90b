//! Voice stealing.
//!
//! When the pool is full a new note takes over an existing voice. Voices
//! already releasing go first since they are on their way out anyway; only
//! when none are releasing does the policy pick among held notes. Killed and
//! finished voices are never candidates. Ties go to the oldest voice.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::voice::Voice;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StealPolicy {
    /// Steal the voice that started first.
    #[default]
    Oldest,
    /// Steal the voice with the lowest envelope level.
    Quietest,
    HighestNote,
    LowestNote,
    /// Never steal; new notes are dropped when the pool is full.
    NoSteal,
}

/// Index of the voice a new note should replace, or `None` if nothing may be
/// stolen.
pub fn choose_victim(voices: &[Voice], policy: StealPolicy) -> Option<usize> {
    if policy == StealPolicy::NoSteal {
        return None;
    }

    let candidates = || {
        voices
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.is_killed() && !v.is_finished())
    };

    let releasing = candidates()
        .filter(|(_, v)| v.is_releasing())
        .min_by(|(_, a), (_, b)| match policy {
            StealPolicy::Quietest => by_level(a, b),
            _ => a.id().cmp(&b.id()),
        });
    if let Some((index, _)) = releasing {
        return Some(index);
    }

    candidates()
        .min_by(|(_, a), (_, b)| match policy {
            StealPolicy::Oldest | StealPolicy::NoSteal => a.id().cmp(&b.id()),
            StealPolicy::Quietest => by_level(a, b),
            StealPolicy::HighestNote => b.note().cmp(&a.note()).then(a.id().cmp(&b.id())),
            StealPolicy::LowestNote => a.note().cmp(&b.note()).then(a.id().cmp(&b.id())),
        })
        .map(|(index, _)| index)
}

fn by_level(a: &Voice, b: &Voice) -> Ordering {
    a.level()
        .partial_cmp(&b.level())
        .unwrap_or(Ordering::Equal)
        .then(a.id().cmp(&b.id()))
}
