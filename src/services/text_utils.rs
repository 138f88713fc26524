//! Shared text normalization utilities
//!
//! Title comparison across the two upstream services has to survive
//! punctuation and casing differences ("NOVA scienceNOW!" vs "nova
//! sciencenow"), so both sides are normalized before any comparison.

/// Normalize a program or episode title for matching.
/// Lowercases, strips everything that is not alphanumeric or whitespace,
/// and trims the result.
pub fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .trim()
        .to_string()
}

/// Whether two already-normalized titles match by substring in either
/// direction. Empty strings never match anything.
pub fn titles_overlap(a: &str, b: &str) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a.contains(b) || b.contains(a)
}
