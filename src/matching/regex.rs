use regex::Regex;

use crate::logger::Logger;

/// Translate a degenerate IUPAC primer into a concrete character-class
/// pattern, e.g. `W` becomes `[ATU]`. `N` matches any base. Letters outside
/// the IUPAC alphabet fall back to `.` with a warning. An empty primer
/// yields an empty pattern.
pub fn regex_builder(primer: &str, logger: &Logger) -> String {
    let mut pattern = String::with_capacity(primer.len() * 4);
    for letter in primer.chars() {
        match letter.to_ascii_uppercase() {
            'A' => pattern.push('A'),
            'C' => pattern.push('C'),
            'G' => pattern.push('G'),
            'T' | 'U' => pattern.push_str("[TU]"),
            'W' => pattern.push_str("[ATU]"),
            'S' => pattern.push_str("[CG]"),
            'M' => pattern.push_str("[AC]"),
            'K' => pattern.push_str("[GTU]"),
            'R' => pattern.push_str("[AG]"),
            'Y' => pattern.push_str("[CTU]"),
            'B' => pattern.push_str("[CGTSKYU]"),
            'D' => pattern.push_str("[AGTWKRU]"),
            'H' => pattern.push_str("[ACTWMYU]"),
            'V' => pattern.push_str("[ACGSMR]"),
            'N' => pattern.push('.'),
            other => {
                logger.warn(&format!(
                    "unable to encode primer letter '{}', matching any base",
                    other
                ));
                pattern.push('.');
            }
        }
    }
    pattern
}

/// Wrapper around `Regex::find` returning `(-1, -1)` instead of `None`.
pub fn find_exact_match(regex: &Regex, read: &str) -> (i64, i64) {
    match regex.find(read) {
        Some(found) => (found.start() as i64, found.end() as i64),
        None => (-1, -1),
    }
}
