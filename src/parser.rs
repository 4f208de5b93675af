//! Field extraction from a single program line.
//!
//! A line is a run of space separated words such as `G1 X12.5 Y-3 F800`,
//! optionally followed by a `;` comment. Lookup walks the line word by word:
//! it only ever looks at the first byte of a word, then jumps one byte past
//! the next space. Lines with irregular spacing can therefore hide or expose
//! fields in surprising ways; programs are expected to use single spaces.

/// Starts a trailing comment.
pub const COMMENT: u8 = b';';

const SEPARATOR: u8 = b' ';

/// Returns the value of the word starting with `field`, or `default` when the
/// word is absent or only appears after a comment.
///
/// The value is the leading numeral right after the letter, converted the
/// way C's `atof` does: trailing garbage is ignored and a word with no numeral
/// at all (`"X"`, `"Xabc"`) reads as `0.0`.
pub fn parse_field(line: &str, field: char, default: f64) -> f64 {
    if !field.is_ascii() {
        return default;
    }
    let field = field as u8;
    let bytes = line.as_bytes();
    let mut pos = 0usize;

    while pos < bytes.len() {
        let head = bytes[pos];
        if head == field {
            return leading_numeral(&bytes[pos + 1..]);
        }
        if head == COMMENT {
            return default;
        }

        // Next word starts one past the next space. A comment opening inside
        // the current word ends the line just the same.
        match bytes[pos..].iter().position(|&b| b == SEPARATOR || b == COMMENT) {
            Some(off) if bytes[pos + off] == SEPARATOR => pos += off + 1,
            _ => return default,
        }
    }

    default
}

/// Reads a `G`/`M` style command number. Absent codes come back as `None`,
/// fractional codes are truncated (`G1.7` is `G1`).
pub fn command_code(line: &str, field: char) -> Option<i32> {
    let code = parse_field(line, field, -1.0) as i32;
    (code >= 0).then_some(code)
}

/// C `atof` on a byte slice: optional leading whitespace, sign, digits with
/// an optional fraction, optional exponent. Anything unparsable is `0.0`.
fn leading_numeral(bytes: &[u8]) -> f64 {
    let mut start = 0usize;
    while start < bytes.len() && bytes[start].is_ascii_whitespace() {
        start += 1;
    }

    let mut end = start;
    if end < bytes.len() && (bytes[end] == b'+' || bytes[end] == b'-') {
        end += 1;
    }

    let int_digits = count_digits(&bytes[end..]);
    end += int_digits;

    let mut frac_digits = 0;
    if end < bytes.len() && bytes[end] == b'.' {
        frac_digits = count_digits(&bytes[end + 1..]);
        if int_digits > 0 || frac_digits > 0 {
            end += 1 + frac_digits;
        }
    }

    if int_digits == 0 && frac_digits == 0 {
        return 0.0;
    }

    // Exponent only counts when at least one digit follows it.
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp_end = end + 1;
        if exp_end < bytes.len() && (bytes[exp_end] == b'+' || bytes[exp_end] == b'-') {
            exp_end += 1;
        }
        let exp_digits = count_digits(&bytes[exp_end..]);
        if exp_digits > 0 {
            end = exp_end + exp_digits;
        }
    }

    std::str::from_utf8(&bytes[start..end])
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0)
}

fn count_digits(bytes: &[u8]) -> usize {
    bytes.iter().take_while(|b| b.is_ascii_digit()).count()
}
