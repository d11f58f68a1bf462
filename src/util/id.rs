//! Segment names, generations and the file names derived from them.
//!
//! Generations and segment counters are rendered in base 36 so file names stay
//! short: segment `_a3`, commit descriptor `segments_1z`, deletions `_a3_4.del`.

/// Prefix of every commit descriptor file.
pub const SEGMENTS: &str = "segments";

/// Two-copy generation pointer file.
pub const SEGMENTS_GEN: &str = "segments.gen";

/// Advisory lock serializing index mutation.
pub const WRITE_LOCK_NAME: &str = "write.lock";

const BASE36_DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Render `value` in base 36.
pub fn to_base36(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(BASE36_DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();
    String::from_utf8(digits).unwrap_or_default()
}

/// Parse a base 36 string produced by [`to_base36`].
pub fn from_base36(s: &str) -> Option<u64> {
    if s.is_empty() {
        return None;
    }
    let mut value: u64 = 0;
    for c in s.chars() {
        let digit = c.to_digit(36)? as u64;
        value = value.checked_mul(36)?.checked_add(digit)?;
    }
    Some(value)
}

/// Name of the segment created from counter value `counter`.
pub fn segment_name(counter: u64) -> String {
    format!("_{}", to_base36(counter))
}

/// Name of the commit descriptor for `generation`.
pub fn segments_file_name(generation: u64) -> String {
    format!("{SEGMENTS}_{}", to_base36(generation))
}

/// Generation encoded in a commit descriptor name, if `file` is one.
pub fn parse_segments_generation(file: &str) -> Option<u64> {
    let suffix = file.strip_prefix(SEGMENTS)?.strip_prefix('_')?;
    from_base36(suffix)
}

/// Name of a generation-suffixed per-segment file, e.g. `_3_2.del`.
pub fn generation_file_name(segment: &str, generation: u64, ext: &str) -> String {
    format!("{segment}_{}.{ext}", to_base36(generation))
}

/// Name of a plain per-segment file, e.g. `_3.tis`.
pub fn segment_file_name(segment: &str, ext: &str) -> String {
    format!("{segment}.{ext}")
}

/// Split a per-segment file name into (segment, generation, extension).
///
/// Returns `None` for names that do not belong to a segment.
pub fn parse_segment_file(file: &str) -> Option<(&str, Option<u64>, &str)> {
    if !file.starts_with('_') {
        return None;
    }
    let (stem, ext) = file.split_once('.')?;
    match stem[1..].split_once('_') {
        Some((_, r#gen)) => {
            let segment = &stem[..stem.len() - r#gen.len() - 1];
            Some((segment, Some(from_base36(r#gen)?), ext))
        }
        None => Some((stem, None, ext)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base36_roundtrip() {
        for value in [0u64, 1, 35, 36, 1295, 1296, 123_456_789, u64::MAX] {
            assert_eq!(from_base36(&to_base36(value)), Some(value));
        }
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
        assert_eq!(from_base36(""), None);
        assert_eq!(from_base36("_"), None);
    }

    #[test]
    fn test_segments_file_names() {
        assert_eq!(segments_file_name(1), "segments_1");
        assert_eq!(segments_file_name(36), "segments_10");
        assert_eq!(parse_segments_generation("segments_10"), Some(36));
        assert_eq!(parse_segments_generation("segments.gen"), None);
        assert_eq!(parse_segments_generation("_1.tis"), None);
    }

    #[test]
    fn test_segment_file_parsing() {
        assert_eq!(segment_name(37), "_11");
        assert_eq!(parse_segment_file("_11.tis"), Some(("_11", None, "tis")));
        assert_eq!(
            parse_segment_file("_11_3.del"),
            Some(("_11", Some(3), "del"))
        );
        assert_eq!(
            generation_file_name("_a", 12, "s0"),
            "_a_c.s0".to_string()
        );
        assert_eq!(parse_segment_file("segments_2"), None);
        assert_eq!(parse_segment_file("write.lock"), None);
    }
}
