//! Normalization of raw detections into [`DetectedItem`]s.
//!
//! Detection backends answer in different shapes: the local model service
//! sends finished item records, a bare detector sends `{class, confidence}`
//! pairs with numeric scores, and a language model may omit or garble any
//! field.  Everything goes through [`normalize_detection`], which never
//! fails and applies one default rule per field:
//!
//! | field         | accepted input                               | default                   |
//! |---------------|----------------------------------------------|---------------------------|
//! | `name`        | non-empty string, else title-cased `class`   | `Item {n}` (1-based)      |
//! | `category`    | non-empty string, else category of `class`   | `uncategorized`           |
//! | `quantity`    | integer, float or numeric string `>= 1`      | `1`                       |
//! | `condition`   | one of the condition names                   | `good`                    |
//! | `confidence`  | `high`/`medium`/`low` or a score in `[0, 1]` | `medium`                  |
//! | `description` | string, else a sentence built from the score | empty                     |
//! | `sourcePhoto` | non-empty string                             | URL of the analyzed photo |

use serde_json::Value;

use super::categories::{category_for_class, display_name, UNCATEGORIZED};
use super::types::{Condition, Confidence, DetectedItem};

/// Normalize every raw detection returned for `photo_url`.
pub fn normalize_detections(raw: &[Value], photo_url: &str) -> Vec<DetectedItem> {
    raw.iter()
        .enumerate()
        .map(|(index, value)| normalize_detection(value, index, photo_url))
        .collect()
}

/// Normalize one raw detection.  `index` is its position in the response
/// and only feeds the placeholder name.
pub fn normalize_detection(raw: &Value, index: usize, photo_url: &str) -> DetectedItem {
    // A bare string is taken as the item name.
    if let Value::String(name) = raw {
        let mut item = normalize_detection(&Value::Null, index, photo_url);
        if !name.trim().is_empty() {
            item.name = name.trim().to_string();
        }
        return item;
    }

    let class_label = non_empty_str(raw, "class").or_else(|| non_empty_str(raw, "label"));
    let score = raw.get("confidence").and_then(score_value);

    let name = non_empty_str(raw, "name")
        .map(str::to_string)
        .or_else(|| class_label.map(display_name))
        .unwrap_or_else(|| format!("Item {}", index + 1));

    let category = non_empty_str(raw, "category")
        .map(str::to_lowercase)
        .or_else(|| class_label.map(|label| category_for_class(label).to_string()))
        .unwrap_or_else(|| UNCATEGORIZED.to_string());

    let description = match raw.get("description").and_then(Value::as_str) {
        Some(text) => text.trim().to_string(),
        None => score
            .map(|s| format!("Detected with {:.0}% confidence", s * 100.0))
            .unwrap_or_default(),
    };

    let quantity = raw.get("quantity").and_then(quantity_value).unwrap_or(1);

    let condition = raw
        .get("condition")
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
        .unwrap_or(Condition::Good);

    let confidence = match raw.get("confidence") {
        Some(Value::String(s)) => s.parse().unwrap_or(Confidence::Medium),
        _ => score.map(Confidence::from_score).unwrap_or(Confidence::Medium),
    };

    let source_photo = non_empty_str(raw, "sourcePhoto")
        .unwrap_or(photo_url)
        .to_string();

    DetectedItem {
        name,
        description,
        category,
        quantity,
        condition,
        confidence,
        source_photo,
        ai_generated: true,
    }
}

fn non_empty_str<'a>(raw: &'a Value, field: &str) -> Option<&'a str> {
    raw.get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Numeric confidence score, only when it lies in `[0, 1]`.
fn score_value(value: &Value) -> Option<f64> {
    value
        .as_f64()
        .filter(|score| score.is_finite() && (0.0..=1.0).contains(score))
}

fn quantity_value(value: &Value) -> Option<u32> {
    let number = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !number.is_finite() || number < 1.0 {
        return None;
    }
    Some(number.floor().min(u32::MAX as f64) as u32)
}

// ── Tests ───────────────────────────────────────────────────────────
