//! Numeric literal whitelist: guards values that get substituted directly
//! into rendered orchestra text (template placeholders, formula-free
//! parameter values) against anything but an arithmetic expression shape.
//! An explicit character-class pass rather than a regex, matching the
//! conservative style the rest of the compiler uses for user-controlled text.

const ALLOWED_EXTRA: &[char] = &['+', '-', '.', '(', ')', '*', '/', ' ', '\t'];

/// True if every character in `s` is a digit, a recognised arithmetic
/// symbol, or whitespace. Rejects identifiers, quotes, and anything that
/// could break out of a numeric position in a rendered orchestra line.
pub fn is_safe_numeric_literal(s: &str) -> bool {
    if s.trim().is_empty() {
        return false;
    }
    s.chars().all(|c| c.is_ascii_digit() || ALLOWED_EXTRA.contains(&c) || c == 'e' || c == 'E')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_numbers() {
        assert!(is_safe_numeric_literal("440"));
        assert!(is_safe_numeric_literal("0.5"));
        assert!(is_safe_numeric_literal("-3.14"));
    }

    #[test]
    fn accepts_scientific_notation() {
        assert!(is_safe_numeric_literal("1.5e-3"));
    }

    #[test]
    fn accepts_simple_arithmetic_shape() {
        assert!(is_safe_numeric_literal("(440 * 2)"));
    }

    #[test]
    fn rejects_identifiers_and_quotes() {
        assert!(!is_safe_numeric_literal("440; system(\"rm -rf\")"));
        assert!(!is_safe_numeric_literal("freq"));
        assert!(!is_safe_numeric_literal("\"hello\""));
    }

    #[test]
    fn rejects_empty_and_whitespace_only() {
        assert!(!is_safe_numeric_literal(""));
        assert!(!is_safe_numeric_literal("   "));
    }
}
