//! Lenient parsing of extracted amounts and dates.

use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;

const CURRENCY_MARKERS: [&str; 8] = ["USD", "EUR", "GBP", "CHF", "$", "€", "£", "'"];

const DATE_FORMATS: [&str; 6] = [
    "%Y-%m-%d",
    "%d.%m.%Y",
    "%d/%m/%Y",
    "%m/%d/%Y",
    "%B %d, %Y",
    "%d %B %Y",
];

/// Parses an amount such as `$1,234.56`, `1.234,56 EUR` or `CHF 1'200`.
///
/// When both `,` and `.` appear the later one is the decimal separator. A
/// lone `,` is a thousands separator only when followed by exactly three
/// digits in every group.
pub fn parse_amount(raw: &str) -> Option<Decimal> {
    let mut cleaned = raw.trim().to_string();
    for marker in CURRENCY_MARKERS {
        cleaned = cleaned.replace(marker, "");
    }
    let cleaned: String = cleaned.chars().filter(|c| !c.is_whitespace()).collect();
    if cleaned.is_empty() {
        return None;
    }

    let last_comma = cleaned.rfind(',');
    let last_dot = cleaned.rfind('.');

    let normalized = match (last_comma, last_dot) {
        (Some(comma), Some(dot)) if comma > dot => cleaned.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => cleaned.replace(',', ""),
        (Some(_), None) => {
            if is_grouped(&cleaned, ',') {
                cleaned.replace(',', "")
            } else {
                cleaned.replace(',', ".")
            }
        }
        (None, Some(_)) => {
            if cleaned.matches('.').count() > 1 && is_grouped(&cleaned, '.') {
                cleaned.replace('.', "")
            } else {
                cleaned
            }
        }
        (None, None) => cleaned,
    };

    Decimal::from_str(&normalized).ok()
}

/// True for `1,234,567` style grouping.
fn is_grouped(s: &str, separator: char) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    let mut groups = digits.split(separator);
    let head_ok = groups
        .next()
        .is_some_and(|g| (1..=3).contains(&g.len()) && g.chars().all(|c| c.is_ascii_digit()));
    head_ok && groups.all(|g| g.len() == 3 && g.chars().all(|c| c.is_ascii_digit()))
}

/// Parses a date in one of the accepted formats. Day-first wins over
/// month-first for ambiguous slash dates.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(trimmed, format).ok())
}
