//! Phone number helpers: classification, normalization and caller-ID style
//! loose comparison.

/// Minimum number of trailing digits two numbers must share to be considered
/// the same party
const MIN_MATCH: usize = 7;

/// True if the identifier consists only of dialable digits once separators
/// and dial modifiers are removed.
pub fn is_phone_number(identifier: &str) -> bool {
    let mut digits = identifier
        .chars()
        .filter(|c| !c.is_whitespace() && !"p+*#(),;-".contains(*c))
        .peekable();

    if digits.peek().is_none() {
        return false;
    }

    digits.all(|c| c.is_ascii_digit())
}

/// Strip whitespace and `()-` from phone numbers. Other identifiers are
/// returned untouched.
pub fn normalize(identifier: &str) -> String {
    if !is_phone_number(identifier) {
        return identifier.to_string();
    }

    identifier
        .chars()
        .filter(|c| !c.is_whitespace() && !"()-".contains(*c))
        .collect()
}

/// Compare two phone numbers the way caller ID does.
///
/// Digits are matched right to left, ignoring separators and anything after
/// a pause or wait character. At least seven digits must match unless both
/// numbers are shorter and identical in their dialable characters. A leftover
/// international prefix (`+`, `00`, `011`) on both sides, or a trunk prefix
/// (`0`) on one side against an international prefix plus country code on the
/// other, still counts as a match.
pub fn compare_loosely(a: &str, b: &str) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }

    if a == b {
        return true;
    }

    let (a, b) = (a.as_bytes(), b.as_bytes());
    let mut rest_a = network_portion(a).len();
    let mut rest_b = network_portion(b).len();
    let mut matched = 0;
    let mut skipped_a = 0;
    let mut skipped_b = 0;

    while rest_a > 0 && rest_b > 0 {
        let ca = a[rest_a - 1];
        let cb = b[rest_b - 1];
        let mut skip = false;

        if !is_dialable(ca) {
            rest_a -= 1;
            skipped_a += 1;
            skip = true;
        }

        if !is_dialable(cb) {
            rest_b -= 1;
            skipped_b += 1;
            skip = true;
        }

        if !skip {
            if ca != cb && ca != b'N' && cb != b'N' {
                break;
            }
            rest_a -= 1;
            rest_b -= 1;
            matched += 1;
        }
    }

    if matched < MIN_MATCH {
        // 404-04 and 40404 are the same short code
        let effective_a = a.len() - skipped_a;
        let effective_b = b.len() - skipped_b;
        return effective_a == effective_b && effective_a == matched;
    }

    if rest_a == 0 || rest_b == 0 {
        return true;
    }

    let (prefix_a, prefix_b) = (&a[..rest_a], &b[..rest_b]);

    (match_intl_prefix(prefix_a) && match_intl_prefix(prefix_b))
        || (match_trunk_prefix(prefix_a) && match_intl_prefix_and_cc(prefix_b))
        || (match_trunk_prefix(prefix_b) && match_intl_prefix_and_cc(prefix_a))
}

/// Digits, `*`, `#`, `+`, the `N` wildcard and the pause/wait markers
fn is_non_separator(c: u8) -> bool {
    c.is_ascii_digit() || matches!(c, b'*' | b'#' | b'+' | b'N' | b';' | b',')
}

fn is_dialable(c: u8) -> bool {
    c.is_ascii_digit() || matches!(c, b'*' | b'#' | b'+' | b'N')
}

/// Everything before the first pause (`,`) or wait (`;`)
fn network_portion(number: &[u8]) -> &[u8] {
    match number.iter().position(|&c| c == b',' || c == b';') {
        Some(end) => &number[..end],
        None => number,
    }
}

/// The whole prefix is `+`, `00` or `011`, possibly padded with separators
fn match_intl_prefix(prefix: &[u8]) -> bool {
    #[derive(PartialEq)]
    enum Seen {
        Start,
        Plus,
        Zero,
        DoubleZero,
        ZeroOne,
        ZeroOneOne,
    }

    let mut seen = Seen::Start;
    for &c in prefix {
        seen = match (seen, c) {
            (Seen::Start, b'+') => Seen::Plus,
            (Seen::Start, b'0') => Seen::Zero,
            (Seen::Zero, b'0') => Seen::DoubleZero,
            (Seen::Zero, b'1') => Seen::ZeroOne,
            (Seen::ZeroOne, b'1') => Seen::ZeroOneOne,
            (_, c) if is_non_separator(c) => return false,
            (seen, _) => seen,
        };
    }

    matches!(seen, Seen::Plus | Seen::DoubleZero | Seen::ZeroOneOne)
}

/// The whole prefix is a single `0` trunk prefix, possibly padded with
/// separators
fn match_trunk_prefix(prefix: &[u8]) -> bool {
    let mut found = false;
    for &c in prefix {
        if c == b'0' && !found {
            found = true;
        } else if is_non_separator(c) {
            return false;
        }
    }
    found
}

/// The whole prefix is an international prefix followed by a one to three
/// digit country code
fn match_intl_prefix_and_cc(prefix: &[u8]) -> bool {
    #[derive(PartialEq)]
    enum Seen {
        Start,
        Zero,
        ZeroOne,
        Prefix,
        Country(u8),
    }

    let mut seen = Seen::Start;
    for &c in prefix {
        seen = match (seen, c) {
            (Seen::Start, b'+') => Seen::Prefix,
            (Seen::Start, b'0') => Seen::Zero,
            (Seen::Zero, b'0') => Seen::Prefix,
            (Seen::Zero, b'1') => Seen::ZeroOne,
            (Seen::ZeroOne, b'1') => Seen::Prefix,
            (Seen::Prefix, c) if c.is_ascii_digit() => Seen::Country(1),
            (Seen::Country(n), c) if n < 3 && c.is_ascii_digit() => Seen::Country(n + 1),
            (_, c) if is_non_separator(c) => return false,
            (seen, _) => seen,
        };
    }

    matches!(seen, Seen::Country(_))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_phone_number() {
        assert!(is_phone_number("12345678"));
        assert!(is_phone_number("+1 (555) 123-4567"));
        assert!(is_phone_number("*31#"));
        assert!(!is_phone_number("abcdefg"));
        assert!(!is_phone_number("555-CALL"));
        assert!(!is_phone_number("()-"));
        assert!(!is_phone_number(""));
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("1234-5678"), "12345678");
        assert_eq!(normalize("+1 (555) 123-4567"), "+15551234567");
        assert_eq!(normalize("abc def"), "abc def");
    }

    #[test]
    fn test_compare_loosely_formatting() {
        assert!(compare_loosely("+1 (555) 123-4567", "555-123-4567"));
        assert!(compare_loosely("5551234567", "555 123 4567"));
        assert!(!compare_loosely("5551234567", "5551234568"));
    }

    #[test]
    fn test_compare_loosely_international_prefixes() {
        assert!(compare_loosely("+15551234567", "0015551234567"));
        assert!(compare_loosely("+15551234567", "01115551234567"));
        assert!(compare_loosely("0301234567", "+49301234567"));
    }

    #[test]
    fn test_compare_loosely_short_numbers() {
        assert!(compare_loosely("404-04", "40404"));
        assert!(!compare_loosely("12345", "2345"));
    }

    #[test]
    fn test_compare_loosely_ignores_post_dial() {
        assert!(compare_loosely("5551234567,1234", "5551234567"));
        assert!(compare_loosely("5551234567;99", "(555) 123-4567"));
    }

    #[test]
    fn test_compare_loosely_empty() {
        assert!(!compare_loosely("", "12345678"));
        assert!(!compare_loosely("12345678", ""));
    }
}
