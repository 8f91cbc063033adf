//! Cross-photo consolidation of detected items.
//!
//! Several photos of one tote usually show the same things more than once.
//! [`consolidate`] merges candidates that share a case-insensitive
//! `(name, category)` pair into one entry, keeping first-seen order.

use std::collections::HashMap;

use crate::detection::types::DetectedItem;

/// Separator placed between merged descriptions.
pub const DESCRIPTION_SEPARATOR: &str = "; ";

/// Merge candidates with the same `(name, category)`, case-insensitively.
///
/// For a repeated key: quantities are summed, a description is appended
/// only when it is not already contained in the merged text, and
/// confidence is raised only when the newcomer ranks strictly higher.
/// Everything else (condition, source photo, original casing) comes from
/// the first occurrence.
///
/// Pure and idempotent: consolidating the output again returns it
/// unchanged.
pub fn consolidate(candidates: Vec<DetectedItem>) -> Vec<DetectedItem> {
    let mut merged: Vec<DetectedItem> = Vec::with_capacity(candidates.len());
    let mut index_by_key: HashMap<String, usize> = HashMap::new();

    for candidate in candidates {
        let key = merge_key(&candidate);
        match index_by_key.get(&key) {
            Some(&index) => merge_into(&mut merged[index], candidate),
            None => {
                index_by_key.insert(key, merged.len());
                merged.push(candidate);
            }
        }
    }

    merged
}

/// Lowercased name and category joined by a unit separator, so that
/// `("ab", "c")` and `("a", "bc")` stay distinct.
fn merge_key(item: &DetectedItem) -> String {
    format!(
        "{}\u{1f}{}",
        item.name.trim().to_lowercase(),
        item.category.trim().to_lowercase()
    )
}

fn merge_into(existing: &mut DetectedItem, incoming: DetectedItem) {
    existing.quantity = existing.quantity.saturating_add(incoming.quantity);

    let description = incoming.description.trim();
    if !description.is_empty() && !existing.description.contains(description) {
        if existing.description.is_empty() {
            existing.description = description.to_string();
        } else {
            existing.description.push_str(DESCRIPTION_SEPARATOR);
            existing.description.push_str(description);
        }
    }

    if incoming.confidence > existing.confidence {
        existing.confidence = incoming.confidence;
    }
}
