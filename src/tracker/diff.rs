//! Field-by-field comparison of two status snapshots.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use crate::portal::models::{ProgramStatus, RecommendationLetter, StatusRecord};
use crate::portal::ApplicationIdentifier;

/// Differences found between the previous and the current snapshot of one application.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEvent {
    pub id: ApplicationIdentifier,
    pub changes: Vec<Change>,
}

impl ChangeEvent {
    /// An empty event means nothing to notify.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// One differing field within a program.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Change {
    pub program: String,
    pub kind: ChangeKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeKind {
    ProgramAdded {
        status: String,
    },
    ProgramRemoved {
        status: String,
    },
    Status {
        old: String,
        new: String,
    },
    /// `None` means the item is absent from that snapshot.
    ChecklistItem {
        item: String,
        old: Option<bool>,
        new: Option<bool>,
    },
    LetterAdded {
        letter: RecommendationLetter,
    },
    LetterRemoved {
        letter: RecommendationLetter,
    },
    LetterSigned {
        name: String,
        date: String,
        old: bool,
        new: bool,
    },
}

impl ChangeKind {
    /// True for a checklist item that is now complete and was not before.
    pub fn is_newly_completed(&self) -> bool {
        matches!(
            self,
            Self::ChecklistItem {
                old,
                new: Some(true),
                ..
            } if *old != Some(true)
        )
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let program = &self.program;
        match &self.kind {
            ChangeKind::ProgramAdded { status } => {
                write!(f, "{program}: new program listed ({status})")
            }
            ChangeKind::ProgramRemoved { status } => {
                write!(f, "{program}: program no longer listed (was {status})")
            }
            ChangeKind::Status { old, new } => {
                write!(f, "{program}: status {old} -> {new}")
            }
            ChangeKind::ChecklistItem { item, old, new } => match (old, new) {
                (_, None) => write!(f, "{program}: checklist item removed: {item}"),
                (None, Some(done)) => write!(
                    f,
                    "{program}: checklist item added: {item} ({})",
                    completion(*done)
                ),
                (Some(old), Some(new)) => write!(
                    f,
                    "{program}: {item} {} -> {}",
                    completion(*old),
                    completion(*new)
                ),
            },
            ChangeKind::LetterAdded { letter } => write!(
                f,
                "{program}: recommendation received from {} ({})",
                letter.name, letter.date
            ),
            ChangeKind::LetterRemoved { letter } => write!(
                f,
                "{program}: recommendation from {} ({}) no longer listed",
                letter.name, letter.date
            ),
            ChangeKind::LetterSigned { name, old, new, .. } => write!(
                f,
                "{program}: recommendation from {name} signed: {} -> {}",
                yes_no(*old),
                yes_no(*new)
            ),
        }
    }
}

fn completion(done: bool) -> &'static str {
    if done {
        "complete"
    } else {
        "incomplete"
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

/// Compare the last known snapshot with a fresh one.
///
/// A first sighting (`old == None`) is a baseline and yields no changes.
pub fn diff(old: Option<&StatusRecord>, new: &StatusRecord, id: &ApplicationIdentifier) -> ChangeEvent {
    let mut changes = Vec::new();

    if let Some(old) = old {
        let old_programs: BTreeMap<&str, &ProgramStatus> =
            old.programs.iter().map(|p| (p.title.as_str(), p)).collect();
        let new_programs: BTreeMap<&str, &ProgramStatus> =
            new.programs.iter().map(|p| (p.title.as_str(), p)).collect();

        let titles: BTreeSet<&str> = old_programs
            .keys()
            .chain(new_programs.keys())
            .copied()
            .collect();

        for title in titles {
            match (old_programs.get(title), new_programs.get(title)) {
                (Some(old_p), Some(new_p)) => diff_program(old_p, new_p, &mut changes),
                (None, Some(new_p)) => changes.push(Change {
                    program: title.to_string(),
                    kind: ChangeKind::ProgramAdded {
                        status: new_p.status.clone(),
                    },
                }),
                (Some(old_p), None) => changes.push(Change {
                    program: title.to_string(),
                    kind: ChangeKind::ProgramRemoved {
                        status: old_p.status.clone(),
                    },
                }),
                (None, None) => {}
            }
        }
    }

    ChangeEvent {
        id: id.clone(),
        changes,
    }
}

fn diff_program(old: &ProgramStatus, new: &ProgramStatus, changes: &mut Vec<Change>) {
    let mut push = |kind: ChangeKind| {
        changes.push(Change {
            program: new.title.clone(),
            kind,
        })
    };

    if old.status != new.status {
        push(ChangeKind::Status {
            old: old.status.clone(),
            new: new.status.clone(),
        });
    }

    let items: BTreeSet<&String> = old.checklist.keys().chain(new.checklist.keys()).collect();
    for item in items {
        let before = old.checklist.get(item).copied();
        let after = new.checklist.get(item).copied();
        if before != after {
            push(ChangeKind::ChecklistItem {
                item: item.clone(),
                old: before,
                new: after,
            });
        }
    }

    let old_letters = letters_by_identity(&old.letters);
    let new_letters = letters_by_identity(&new.letters);
    let keys: BTreeSet<&(String, String)> = old_letters.keys().chain(new_letters.keys()).collect();
    for key in keys {
        match (old_letters.get(key), new_letters.get(key)) {
            (Some(before), Some(after)) if before.signed != after.signed => {
                push(ChangeKind::LetterSigned {
                    name: after.name.clone(),
                    date: after.date.clone(),
                    old: before.signed,
                    new: after.signed,
                })
            }
            (None, Some(after)) => push(ChangeKind::LetterAdded {
                letter: (*after).clone(),
            }),
            (Some(before), None) => push(ChangeKind::LetterRemoved {
                letter: (*before).clone(),
            }),
            _ => {}
        }
    }
}

/// Letters keyed by (name, date). Repeats of the same key are numbered so counts are compared.
///
/// Repeats are numbered after sorting, unsigned first, so list order never matters.
fn letters_by_identity(
    letters: &[RecommendationLetter],
) -> BTreeMap<(String, String), &RecommendationLetter> {
    let mut sorted: Vec<&RecommendationLetter> = letters.iter().collect();
    sorted.sort();

    let mut map = BTreeMap::new();
    for letter in sorted {
        let mut date = letter.date.clone();
        let mut n = 2;
        while map.contains_key(&(letter.name.clone(), date.clone())) {
            date = format!("{}#{}", letter.date, n);
            n += 1;
        }
        map.insert((letter.name.clone(), date), letter);
    }
    map
}
