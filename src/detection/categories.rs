//! Mapping from detector class labels to inventory categories.

/// Category used when a label has no mapping.
pub const UNCATEGORIZED: &str = "uncategorized";

const CATEGORY_TABLE: &[(&str, &str)] = &[
    // Electronics
    ("laptop", "electronics"),
    ("cell phone", "electronics"),
    ("tv", "electronics"),
    ("keyboard", "electronics"),
    ("mouse", "electronics"),
    ("remote", "electronics"),
    ("clock", "electronics"),
    // Kitchen
    ("bottle", "kitchen"),
    ("wine glass", "kitchen"),
    ("cup", "kitchen"),
    ("fork", "kitchen"),
    ("knife", "kitchen"),
    ("spoon", "kitchen"),
    ("bowl", "kitchen"),
    ("banana", "kitchen"),
    ("apple", "kitchen"),
    ("orange", "kitchen"),
    ("broccoli", "kitchen"),
    ("carrot", "kitchen"),
    ("pizza", "kitchen"),
    ("donut", "kitchen"),
    ("cake", "kitchen"),
    ("refrigerator", "kitchen"),
    ("microwave", "kitchen"),
    ("oven", "kitchen"),
    ("toaster", "kitchen"),
    // Clothing and bags
    ("handbag", "clothing"),
    ("tie", "clothing"),
    ("suitcase", "clothing"),
    ("umbrella", "clothing"),
    ("backpack", "clothing"),
    // Sports
    ("frisbee", "sports"),
    ("skis", "sports"),
    ("snowboard", "sports"),
    ("sports ball", "sports"),
    ("kite", "sports"),
    ("baseball bat", "sports"),
    ("baseball glove", "sports"),
    ("skateboard", "sports"),
    ("surfboard", "sports"),
    ("tennis racket", "sports"),
    // Books and toys
    ("book", "books"),
    ("teddy bear", "toys"),
    // Tools
    ("scissors", "tools"),
    ("hair drier", "tools"),
    ("toothbrush", "tools"),
    // Furniture and decorations
    ("chair", "decorations"),
    ("couch", "decorations"),
    ("potted plant", "decorations"),
    ("bed", "decorations"),
    ("dining table", "decorations"),
    ("toilet", "decorations"),
    ("sink", "decorations"),
    ("vase", "decorations"),
];

/// Inventory category for a detector class label (case-insensitive).
pub fn category_for_class(label: &str) -> &'static str {
    let label = label.trim().to_lowercase();
    CATEGORY_TABLE
        .iter()
        .find(|(class, _)| *class == label)
        .map(|(_, category)| *category)
        .unwrap_or(UNCATEGORIZED)
}

/// "cell phone" -> "Cell Phone".
pub fn display_name(label: &str) -> String {
    label
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
