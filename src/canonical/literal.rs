use super::scan::Scan;

pub(crate) fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Index of the next digit at or after `offset` that starts a token: not
/// glued to an identifier and not inside an ignore range.
pub fn find_digit(scan: &Scan, offset: usize) -> Option<usize> {
    let bytes = scan.buffer.as_bytes();
    let mut i = offset;

    while let Some(skip) = bytes.get(i..)?.iter().position(u8::is_ascii_digit) {
        let digit = i + skip;
        let jumped = scan.jump_ignore(digit);
        if jumped != digit {
            i = jumped;
            continue;
        }
        if digit == 0 || !is_word_byte(bytes[digit - 1]) {
            return Some(digit);
        }
        i = digit + 1;
    }

    None
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum NumState {
    Integer,
    HexPrefix,
    HexDigits,
    Fraction,
    Exponent,
    ExponentSign,
    ExponentDigits,
}

enum Step {
    Next(NumState),
    Accept,
    Reject,
}

impl NumState {
    fn step(self, b: u8, at_second: bool, leading_zero: bool) -> Step {
        use NumState::*;

        match (self, b) {
            (Integer, b'x' | b'X') if at_second && leading_zero => Step::Next(HexPrefix),
            (Integer, b'0'..=b'9') => Step::Next(Integer),
            (Integer, b'.') => Step::Next(Fraction),
            (Integer | Fraction, b'e' | b'E') => Step::Next(Exponent),

            (HexPrefix | HexDigits, b) if b.is_ascii_hexdigit() => Step::Next(HexDigits),
            (HexPrefix, _) => Step::Reject,

            (Fraction, b'0'..=b'9') => Step::Next(Fraction),

            (Exponent, b'-' | b'+') => Step::Next(ExponentSign),
            (Exponent | ExponentSign | ExponentDigits, b'0'..=b'9') => Step::Next(ExponentDigits),
            (Exponent | ExponentSign, _) => Step::Reject,

            (_, b) if is_word_byte(b) => Step::Reject,
            _ => Step::Accept,
        }
    }

    fn accepts_at_end(self) -> bool {
        matches!(
            self,
            NumState::Integer | NumState::HexDigits | NumState::Fraction | NumState::ExponentDigits
        )
    }
}

/// Consume the numeric token starting at digit `start`.
///
/// Returns whether the token is a number and the inclusive index where the
/// scan stopped: the last byte of an accepted number, or the byte that
/// disqualified it.
pub fn is_numeric_value(buffer: &str, start: usize) -> (bool, usize) {
    let bytes = buffer.as_bytes();
    let leading_zero = bytes.get(start) == Some(&b'0');
    let mut state = NumState::Integer;
    let mut i = start + 1;

    while i < bytes.len() {
        match state.step(bytes[i], i == start + 1, leading_zero) {
            Step::Next(next) => state = next,
            Step::Accept => return (true, i - 1),
            Step::Reject => return (false, i),
        }
        i += 1;
    }

    let end = bytes.len().saturating_sub(1).max(start);
    (state.accepts_at_end(), end)
}

/// Index of the `-` sign belonging to the number starting at `digit`, if
/// any. A `-` that follows a masked literal (`?`) is a subtraction.
pub fn negative_sign(buffer: &str, digit: usize) -> Option<usize> {
    let bytes = buffer.as_bytes();

    let mut i = digit;
    while i > 0 && bytes[i - 1].is_ascii_whitespace() {
        i -= 1;
    }
    if i == 0 || bytes[i - 1] != b'-' {
        return None;
    }
    let sign = i - 1;

    let mut j = sign;
    while j > 0 && bytes[j - 1].is_ascii_whitespace() {
        j -= 1;
    }
    if j > 0 && bytes[j - 1] == b'?' {
        None
    } else {
        Some(sign)
    }
}

pub fn is_negative_number(buffer: &str, digit: usize) -> bool {
    negative_sign(buffer, digit).is_some()
}

/// Replace whole-word, case-insensitive occurrences of `constant` outside
/// ignore ranges, leaving `IS <constant>` and `IS NOT <constant>` alone.
pub fn replace_constant(scan: &mut Scan, constant: &str, replacement: &str) {
    let needle = constant.to_ascii_uppercase();
    let mut hits = Vec::new();

    {
        // ASCII uppercasing keeps byte offsets identical
        let upper = scan.buffer.to_ascii_uppercase();
        let bytes = upper.as_bytes();
        let mut cursor = 0;

        while let Some(found) = upper.get(cursor..).and_then(|s| s.find(&needle)) {
            let start = cursor + found;
            let end = start + needle.len();
            cursor = end;

            if scan.is_ignored(start) {
                cursor = scan.jump_ignore(start);
                continue;
            }
            let bounded_left = start == 0 || !is_word_byte(bytes[start - 1]);
            let bounded_right = end == bytes.len() || !is_word_byte(bytes[end]);
            if bounded_left && bounded_right && !follows_is(&upper[..start]) {
                hits.push(start..end);
            }
        }
    }

    let edits: Vec<_> = hits.into_iter().map(|range| (range, replacement)).collect();
    scan.replace_all(&edits);
}

/// Whether `before` ends with `IS` or `IS NOT` (uppercased input).
fn follows_is(before: &str) -> bool {
    let before = before.strip_suffix(' ').unwrap_or(before);
    if ends_with_word(before, "IS") {
        return true;
    }
    if ends_with_word(before, "NOT") {
        let rest = &before[..before.len() - 3];
        let rest = rest.strip_suffix(' ').unwrap_or(rest);
        return ends_with_word(rest, "IS");
    }
    false
}

fn ends_with_word(text: &str, word: &str) -> bool {
    text.ends_with(word)
        && text.as_bytes()[..text.len() - word.len()]
            .last()
            .is_none_or(|&b| !is_word_byte(b))
}
