//! Fuzzy scoring of encoded event-sequence keys.
//!
//! A recorded binding rarely replays byte for byte: the remote may emit
//! an extra motion event, drop a key repeat, or deliver a double press.
//! Instead of demanding equality, similarity is graded in fixed
//! 20-point bands, each refined by a sub-score that rewards shared
//! tokens first and string-length closeness second.

/// Sub-score in `(0, 20)` shared by all partial-match bands.
///
/// `min(19, token count of the shorter key) + len(shorter)/len(longer)`.
/// The token count dominates: the ratio is always below 1, so within a
/// band a key sharing more tokens always outranks one that merely has
/// a closer length.
pub fn length_ratio20(a: &str, b: &str) -> f64 {
    let (longer, shorter) = if a.len() >= b.len() { (a, b) } else { (b, a) };
    let words = shorter.split(',').count().min(19);
    let ratio = shorter.len() as f64 / longer.len() as f64;
    words as f64 + ratio
}

/// Score two encoded keys for similarity, in `[0, 100]`.
///
/// - `100`: exact match
/// - `80..=99`: one key is a token-aligned suffix of the other
/// - `60..=79`: one key is a token-aligned prefix of the other
/// - `40..=59`: one key appears as a token-aligned interior run of the other
/// - `0`: none of the above
///
/// Comparison is case insensitive (config stores may lowercase keys)
/// and symmetric. A `20..=39` "common overlap" band is reserved but not
/// implemented; such pairs score 0.
///
/// Token boundaries are `,` only. Keep in sync with
/// [`crate::sequence::encode_key`].
pub fn match_score(a: &str, b: &str) -> f64 {
    let a = a.to_lowercase();
    let b = b.to_lowercase();

    if a == b {
        100.0
    } else if a.ends_with(&format!(",{b}")) || b.ends_with(&format!(",{a}")) {
        80.0 + length_ratio20(&a, &b)
    } else if a.starts_with(&format!("{b},")) || b.starts_with(&format!("{a},")) {
        60.0 + length_ratio20(&a, &b)
    } else if a.contains(&format!(",{b},")) || b.contains(&format!(",{a},")) {
        40.0 + length_ratio20(&a, &b)
    } else {
        0.0
    }
}
