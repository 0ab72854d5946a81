//! Field coercion rules for the typed layer.
//!
//! Every function here is total: any input yields a usable value plus a
//! flag recording whether a fallback was taken. A row whose fields raised
//! any flag is stored as [`QualityStatus::Coerced`].

use std::str::FromStr;
use std::sync::LazyLock;

use bigdecimal::{BigDecimal, RoundingMode, ToPrimitive};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use medallion_types::{Amount, QualityStatus, RawRecord, TypedRecord};
use regex::Regex;

/// `YYYY-MM-DD`, then optionally a `T` or space and a time of `HH`,
/// `HH:MM` or `HH:MM:SS[.ffffff]`, then an optional `Z` or `±HH[:MM]` offset.
static ISO_DATETIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(\d{4})-(\d{2})-(\d{2})(?:[T ](\d{2})(?::(\d{2})(?::(\d{2})(?:[.,]\d{1,9})?)?)?(Z|[+-]\d{2}(?::?\d{2}(?::?\d{2})?)?)?)?$",
    )
    .expect("valid ISO date-time regex")
});

/// Integer digits an amount may carry, matching `NUMERIC(18,2)`.
const MAX_AMOUNT_INTEGER_DIGITS: i64 = 16;

/// A coerced field value and whether it required a fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coerced<T> {
    pub value: T,
    pub coerced: bool,
}

impl<T> Coerced<T> {
    fn clean(value: T) -> Self {
        Self {
            value,
            coerced: false,
        }
    }

    fn fallback(value: T) -> Self {
        Self {
            value,
            coerced: true,
        }
    }
}

/// Default date for empty or unparsable timestamps.
#[must_use]
pub fn epoch_date() -> NaiveDate {
    DateTime::<Utc>::UNIX_EPOCH.date_naive()
}

fn parse_iso(text: &str) -> Option<NaiveDate> {
    let caps = ISO_DATETIME_RE.captures(text)?;
    let field = |i: usize| caps.get(i).map_or(Some(0), |m| m.as_str().parse::<u32>().ok());

    let year = caps[1].parse::<i32>().ok()?;
    let date = NaiveDate::from_ymd_opt(year, field(2)?, field(3)?)?;
    NaiveTime::from_hms_opt(field(4)?, field(5)?, field(6)?)?;
    if let Some(offset) = caps.get(7).map(|m| m.as_str()).filter(|o| *o != "Z") {
        let digits: String = offset[1..].chars().filter(char::is_ascii_digit).collect();
        let hours = digits.get(..2)?.parse::<u32>().ok()?;
        let minutes = digits.get(2..4).map_or(Some(0), |m| m.parse::<u32>().ok())?;
        if hours > 23 || minutes > 59 {
            return None;
        }
    }
    Some(date)
}

/// Coerce a raw timestamp into the event date.
///
/// Any ISO-8601 date or date-time is clean, whatever its separator or time
/// precision. Only the wall date in the input's own offset is kept. Only
/// the epoch default is flagged.
#[must_use]
pub fn coerce_date(raw: &str) -> Coerced<NaiveDate> {
    match parse_iso(raw.trim()) {
        Some(date) => Coerced::clean(date),
        None => Coerced::fallback(epoch_date()),
    }
}

/// Coerce a raw price. Rounding to two places is not a fallback.
///
/// Values with more integer digits than the typed column holds fall back
/// to zero. Magnitudes below `0.001` round to zero without expanding
/// their exponent.
#[must_use]
pub fn coerce_amount(raw: &str) -> Coerced<Amount> {
    let Ok(value) = BigDecimal::from_str(raw.trim()) else {
        return Coerced::fallback(Amount::zero());
    };
    let (_, scale) = value.as_bigint_and_exponent();
    let integer_digits = i64::try_from(value.digits()).unwrap_or(i64::MAX).saturating_sub(scale);
    if integer_digits > MAX_AMOUNT_INTEGER_DIGITS {
        return Coerced::fallback(Amount::zero());
    }
    if integer_digits < -Amount::SCALE {
        return Coerced::clean(Amount::zero());
    }
    Coerced::clean(Amount::round_half_up(&value))
}

/// Coerce a raw identifier, truncating toward zero.
///
/// Losing a fractional part counts as coercion, so `"7.0"` is clean but
/// `"7.5"` is not.
#[must_use]
pub fn coerce_identifier(raw: &str) -> Coerced<i64> {
    let Ok(value) = BigDecimal::from_str(raw.trim()) else {
        return Coerced::fallback(0);
    };
    let integral = value.with_scale_round(0, RoundingMode::Down);
    match integral.to_i64() {
        Some(id) if integral == value => Coerced::clean(id),
        Some(id) => Coerced::fallback(id),
        None => Coerced::fallback(0),
    }
}

/// Apply every field rule to a raw record.
#[must_use]
pub fn coerce_record(raw: &RawRecord, loaded_at: DateTime<Utc>) -> TypedRecord {
    let date = coerce_date(&raw.timestamp_raw);
    let price = coerce_amount(&raw.price_raw);
    let user = coerce_identifier(&raw.user_id_raw);

    TypedRecord {
        raw_id: raw.id,
        event_date: date.value,
        price: price.value,
        user_id: user.value,
        dq_status: QualityStatus::from_flags(&[date.coerced, price.coerced, user.coerced]),
        source: raw.source.clone(),
        loaded_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medallion_types::{RawId, SourceLabel};
    use rstest::rstest;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[rstest]
    #[case("2024-03-01T10:15:00Z", ymd(2024, 3, 1))]
    #[case("2024-03-01T10:15:00+00:00", ymd(2024, 3, 1))]
    #[case("2024-03-01T23:30:00-05:00", ymd(2024, 3, 1))]
    #[case("2024-03-01T00:30:00+0900", ymd(2024, 3, 1))]
    #[case("2024-03-01T10:15:00.123456", ymd(2024, 3, 1))]
    #[case("2024-03-01T10:15", ymd(2024, 3, 1))]
    #[case("  2024-12-31T08:00:00Z  ", ymd(2024, 12, 31))]
    #[case("2024-03-01T10", ymd(2024, 3, 1))]
    #[case("2024-03-01T10+02:00", ymd(2024, 3, 1))]
    fn iso_timestamps_are_clean(#[case] raw: &str, #[case] expected: NaiveDate) {
        assert_eq!(coerce_date(raw), Coerced::clean(expected));
    }

    #[rstest]
    #[case("2024-03-01 10:15:00", ymd(2024, 3, 1))]
    #[case("2024-03-01 10:15:00.5", ymd(2024, 3, 1))]
    #[case("2024-03-01 10:15:00Z", ymd(2024, 3, 1))]
    #[case("2024-03-01 10:15", ymd(2024, 3, 1))]
    #[case("2024-03-01", ymd(2024, 3, 1))]
    #[case("2024-02-29", ymd(2024, 2, 29))]
    fn space_separated_and_date_only_forms_are_clean(
        #[case] raw: &str,
        #[case] expected: NaiveDate,
    ) {
        assert_eq!(coerce_date(raw), Coerced::clean(expected));
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case("yesterday")]
    #[case("2024-13-01")]
    #[case("01/03/2024")]
    #[case("2023-02-29")]
    #[case("2024-03-01T25:00:00")]
    #[case("2024-03-01T10:61")]
    #[case("2024-03-01T10:15:00+25:00")]
    #[case("2024-03-01X10:15:00")]
    #[case("2024-03-01+02:00")]
    fn unparsable_dates_default_to_epoch(#[case] raw: &str) {
        assert_eq!(coerce_date(raw), Coerced::fallback(ymd(1970, 1, 1)));
    }

    #[rstest]
    #[case("10.005", "10.01")]
    #[case("-10.005", "-10.01")]
    #[case("19.99", "19.99")]
    #[case("7", "7.00")]
    #[case(" 3.14159 ", "3.14")]
    #[case("1e2", "100.00")]
    #[case("9999999999999999.99", "9999999999999999.99")]
    #[case("0.005", "0.01")]
    #[case("0.0049", "0.00")]
    #[case("1e-2000000", "0.00")]
    fn amounts_round_half_up_without_flag(#[case] raw: &str, #[case] expected: &str) {
        let result = coerce_amount(raw);
        assert_eq!(result.value.to_string(), expected);
        assert!(!result.coerced);
    }

    #[rstest]
    #[case("")]
    #[case("abc")]
    #[case("12,50")]
    #[case("$5")]
    #[case("1e2000000")]
    #[case("12345678901234567")]
    #[case("-1e17")]
    fn bad_amounts_become_zero(#[case] raw: &str) {
        let result = coerce_amount(raw);
        assert_eq!(result.value, Amount::zero());
        assert_eq!(result.value.to_string(), "0.00");
        assert!(result.coerced);
    }

    #[rstest]
    #[case("42", 42, false)]
    #[case(" 42 ", 42, false)]
    #[case("7.0", 7, false)]
    #[case("7.5", 7, true)]
    #[case("-7.9", -7, true)]
    #[case("abc", 0, true)]
    #[case("", 0, true)]
    #[case("99999999999999999999", 0, true)]
    fn identifiers_truncate_toward_zero(
        #[case] raw: &str,
        #[case] expected: i64,
        #[case] coerced: bool,
    ) {
        assert_eq!(
            coerce_identifier(raw),
            Coerced {
                value: expected,
                coerced
            }
        );
    }

    fn raw_record(ts: &str, price: &str, user: &str) -> RawRecord {
        RawRecord {
            id: RawId::new(9),
            source: SourceLabel::new("a.csv"),
            row_number: 3,
            timestamp_raw: ts.into(),
            price_raw: price.into(),
            user_id_raw: user.into(),
            loaded_at: Utc::now(),
        }
    }

    #[test]
    fn clean_record_is_ok() {
        let typed = coerce_record(&raw_record("2024-03-01T10:00:00Z", "1.5", "3"), Utc::now());
        assert_eq!(typed.raw_id, RawId::new(9));
        assert_eq!(typed.dq_status, QualityStatus::Ok);
        assert_eq!(typed.price.to_string(), "1.50");
        assert_eq!(typed.source.as_str(), "a.csv");
    }

    #[test]
    fn any_flagged_field_marks_record_coerced() {
        let typed = coerce_record(&raw_record("2024-03-01T10:00:00Z", "1.5", "abc"), Utc::now());
        assert_eq!(typed.user_id, 0);
        assert_eq!(typed.dq_status, QualityStatus::Coerced);

        let typed = coerce_record(&raw_record("not a date", "1.5", "3"), Utc::now());
        assert_eq!(typed.event_date, epoch_date());
        assert_eq!(typed.dq_status, QualityStatus::Coerced);
    }

    #[test]
    fn date_only_timestamp_keeps_record_ok() {
        let typed = coerce_record(&raw_record("2024-03-01", "1.5", "3"), Utc::now());
        assert_eq!(typed.event_date, ymd(2024, 3, 1));
        assert_eq!(typed.dq_status, QualityStatus::Ok);
    }
}
