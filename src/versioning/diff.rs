//! Line-level similarity and diffs between content values.

use serde::Serialize;
use serde_json::Value;
use similar::{DiffTag, TextDiff};
use unified_search::canonical::canonical_pretty;

use super::ChangeType;

/// One line replaced by another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModifiedLine {
    pub before: String,
    pub after: String,
}

/// Classified line changes from `old` to `new`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LineChanges {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub modified: Vec<ModifiedLine>,
}

/// Text the diff runs over: strings as-is, everything else as sorted,
/// pretty-printed JSON so each field sits on its own line.
pub fn diff_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        other => canonical_pretty(other),
    }
}

/// Line similarity ratio in `[0, 1]`.
pub fn similarity(old: &Value, new: &Value) -> f64 {
    let (a, b) = (diff_text(old), diff_text(new));
    if a == b {
        return 1.0;
    }
    f64::from(TextDiff::from_lines(a.as_str(), b.as_str()).ratio())
}

/// Change classification for an update with the given similarity.
pub fn classify(similarity: Option<f64>) -> ChangeType {
    match similarity {
        None => ChangeType::Creation,
        Some(s) if s >= 0.6 => ChangeType::MinorUpdate,
        Some(s) if s >= 0.3 => ChangeType::ModerateUpdate,
        Some(_) => ChangeType::MajorUpdate,
    }
}

fn settle(pending: &mut Vec<String>, inserted: Vec<String>, changes: &mut LineChanges) {
    let mut inserted = inserted.into_iter();
    for before in pending.drain(..) {
        match inserted.next() {
            Some(after) => changes.modified.push(ModifiedLine { before, after }),
            None => changes.removed.push(before),
        }
    }
    changes.added.extend(inserted);
}

fn line(s: &str) -> String {
    s.trim_end_matches(['\n', '\r']).to_owned()
}

/// Added, removed and modified lines. A run of deletions followed by
/// insertions is paired up as modifications; any surplus on either side is
/// reported as plain additions or removals.
pub fn line_changes(old: &Value, new: &Value) -> LineChanges {
    let (a, b) = (diff_text(old), diff_text(new));
    let diff = TextDiff::from_lines(a.as_str(), b.as_str());
    let old_lines = diff.old_slices();
    let new_lines = diff.new_slices();

    let mut changes = LineChanges::default();
    let mut pending_removed: Vec<String> = Vec::new();

    for op in diff.ops() {
        let (tag, old_range, new_range) = op.as_tag_tuple();
        match tag {
            DiffTag::Equal => settle(&mut pending_removed, Vec::new(), &mut changes),
            DiffTag::Delete => {
                pending_removed.extend(old_lines[old_range].iter().map(|s| line(s)));
            }
            DiffTag::Insert => {
                let inserted = new_lines[new_range].iter().map(|s| line(s)).collect();
                settle(&mut pending_removed, inserted, &mut changes);
            }
            DiffTag::Replace => {
                pending_removed.extend(old_lines[old_range].iter().map(|s| line(s)));
                let inserted = new_lines[new_range].iter().map(|s| line(s)).collect();
                settle(&mut pending_removed, inserted, &mut changes);
            }
        }
    }
    settle(&mut pending_removed, Vec::new(), &mut changes);
    changes
}
