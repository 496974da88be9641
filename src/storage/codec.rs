//! Text encoding of list-valued columns (`authors`, `categories`).
//!
//! Encoding trims every item, drops blanks and joins with `", "`. An empty
//! list is stored as NULL. Decoding splits on commas, trims and drops blank
//! fragments, so `"cs.AI, cs.LG"` and `"cs.AI,cs.LG ,"` decode alike.

pub const SEPARATOR: &str = ", ";

pub fn encode_list(items: &[String]) -> Option<String> {
    let parts: Vec<&str> = items
        .iter()
        .map(|item| item.trim())
        .filter(|item| !item.is_empty())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(SEPARATOR))
    }
}

pub fn decode_list(value: Option<&str>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
