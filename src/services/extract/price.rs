//! Price text normalization.

use regex::Regex;
use std::sync::LazyLock;

/// A number possibly broken up by spaces, NBSP, dots or commas.
static NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d(?:[\d.,]|[ \u{00a0}\u{202f}]\d)*").expect("valid regex")
});
static THOUSANDS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{1,3}(?:[.,]\d{3})+$").expect("valid regex"));

const RANGE_DASHES: [char; 3] = ['-', '–', '—'];

fn parse_number(token: &str) -> Option<f64> {
    let compact: String = token
        .chars()
        .filter(|c| !matches!(c, ' ' | '\u{00a0}' | '\u{202f}'))
        .collect();
    let compact = compact.trim_end_matches(['.', ',']);
    if compact.is_empty() {
        return None;
    }
    if THOUSANDS.is_match(compact) {
        return compact.replace(['.', ','], "").parse().ok();
    }
    compact.replace(',', ".").parse().ok()
}

/// Parse card price text into `(price_from, price_to)`.
///
/// `"1000-1500 ₽"` is a range, `"от 1 500 ₽"` a single value on both ends,
/// and text without digits yields `(None, None)`. Both ends are always set
/// together.
pub fn normalize_price(text: &str) -> (Option<f64>, Option<f64>) {
    let matches: Vec<_> = NUMBER.find_iter(text).collect();
    let Some(first) = matches.first() else {
        return (None, None);
    };
    let Some(from) = parse_number(first.as_str()) else {
        return (None, None);
    };

    if let Some(second) = matches.get(1) {
        let between = &text[first.end()..second.start()];
        if between.contains(RANGE_DASHES) {
            if let Some(to) = parse_number(second.as_str()) {
                return if to >= from {
                    (Some(from), Some(to))
                } else {
                    (Some(to), Some(from))
                };
            }
        }
    }

    (Some(from), Some(from))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range() {
        assert_eq!(normalize_price("1000-1500 ₽"), (Some(1000.0), Some(1500.0)));
        assert_eq!(normalize_price("1 000 – 2 500 ₽"), (Some(1000.0), Some(2500.0)));
    }

    #[test]
    fn test_thousands_separator_heuristic() {
        assert_eq!(normalize_price("1.650 ₽"), (Some(1650.0), Some(1650.0)));
        assert_eq!(normalize_price("12,000 ₽"), (Some(12000.0), Some(12000.0)));
        assert_eq!(normalize_price("1.234.567"), (Some(1234567.0), Some(1234567.0)));
    }

    #[test]
    fn test_decimal_values() {
        assert_eq!(normalize_price("99,5 ₽"), (Some(99.5), Some(99.5)));
        assert_eq!(normalize_price("1500.50"), (Some(1500.5), Some(1500.5)));
    }

    #[test]
    fn test_single_values_with_prefixes() {
        assert_eq!(normalize_price("от 1 500 ₽"), (Some(1500.0), Some(1500.0)));
        assert_eq!(normalize_price("до 2000"), (Some(2000.0), Some(2000.0)));
        assert_eq!(normalize_price("2\u{a0}300 ₽"), (Some(2300.0), Some(2300.0)));
    }

    #[test]
    fn test_non_range_second_number_ignored() {
        assert_eq!(normalize_price("от 1500 ₽ за 2 часа"), (Some(1500.0), Some(1500.0)));
    }

    #[test]
    fn test_empty_and_textual() {
        assert_eq!(normalize_price(""), (None, None));
        assert_eq!(normalize_price("по запросу"), (None, None));
    }

    #[test]
    fn test_reversed_range_is_ordered() {
        assert_eq!(normalize_price("1500-1000"), (Some(1000.0), Some(1500.0)));
    }
}
