//! Order code extraction from free-form message text.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

/// Uppercase letters and digits, at least six long, bounded by word boundaries.
static ORDER_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Z0-9]{6,})\b").expect("order code regex is valid"));

/// Canonical order identifier, used as the folder name and upload-grouping key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderCode(String);

impl OrderCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Text searched for a code: caption first, then plain text, else empty.
/// An empty caption counts as absent.
pub fn searchable_text<'a>(caption: Option<&'a str>, text: Option<&'a str>) -> &'a str {
    caption.filter(|c| !c.is_empty()).or(text).unwrap_or("")
}

/// First qualifying code in `text`, if any.
pub fn extract_order_code(text: &str) -> Option<OrderCode> {
    ORDER_CODE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| OrderCode(m.as_str().to_string()))
}
