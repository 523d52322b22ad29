//! Semantic version parsing for selection strategies
//!
//! Versions are `MAJOR.MINOR.PATCH`; a segment must parse as a whole
//! integer or it collapses to 0, so `"1.2.x"` and `"1.2.10rc1"` both
//! order as `(1, 2, 0)`.

/// Parsed version triple, ordered lexicographically.
pub type ParsedVersion = (u32, u32, u32);

/// Parse up to three leading integer components of a version string.
/// Missing segments are 0; a segment with any non-digit character
/// (e.g. `"10rc1"`) contributes 0.
pub fn parse_version(v: &str) -> ParsedVersion {
    let mut parts = [0u32; 3];
    for (i, seg) in v.split('.').take(3).enumerate() {
        parts[i] = seg.parse().unwrap_or(0);
    }
    (parts[0], parts[1], parts[2])
}
