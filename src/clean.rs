use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Result, VaxError};

// Digit group separators seen in source payloads: space, NBSP, comma.
static SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s\u{a0},]").unwrap());

/// Parse a cumulative count from a raw source cell.
///
/// Accepts digit-separator noise ("1 234 567", "12,345") and the float
/// rendering some feeds use for integers ("12345.0"). Anything else is an
/// error; the core never guesses a corrected value.
pub fn clean_count(raw: &str) -> Result<u64> {
    let stripped = SEPARATORS.replace_all(raw.trim(), "");
    let digits = stripped.strip_suffix(".0").unwrap_or(&stripped);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(VaxError::InvalidCount(raw.to_string()));
    }
    digits
        .parse()
        .map_err(|_| VaxError::InvalidCount(raw.to_string()))
}

/// Strict date parse; the collaborator resolves source-local time to a
/// calendar date before handing data in.
pub fn clean_date(raw: &str, format: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), format).map_err(|_| VaxError::InvalidDate {
        value: raw.to_string(),
        format: format.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_count_strips_separators() {
        assert_eq!(clean_count("1 234 567").unwrap(), 1_234_567);
        assert_eq!(clean_count("12,345").unwrap(), 12_345);
        assert_eq!(clean_count("  42 ").unwrap(), 42);
    }

    #[test]
    fn clean_count_accepts_integer_float_rendering() {
        assert_eq!(clean_count("12345.0").unwrap(), 12_345);
    }

    #[test]
    fn clean_count_rejects_garbage() {
        assert!(clean_count("").is_err());
        assert!(clean_count("n/a").is_err());
        assert!(clean_count("12.5").is_err());
        assert!(clean_count("-3").is_err());
    }

    #[test]
    fn clean_date_parses_and_rejects() {
        assert_eq!(
            clean_date("2021-06-01", "%Y-%m-%d").unwrap(),
            NaiveDate::from_ymd_opt(2021, 6, 1).unwrap()
        );
        assert_eq!(
            clean_date("20210601", "%Y%m%d").unwrap(),
            NaiveDate::from_ymd_opt(2021, 6, 1).unwrap()
        );
        assert!(clean_date("06/01/2021", "%Y-%m-%d").is_err());
    }
}
