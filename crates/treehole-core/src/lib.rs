use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{OffsetDateTime, UtcOffset};

/// Minimum number of characters a letter must keep after trimming.
pub const MIN_CONTENT_CHARS: usize = 10;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum TreeholeError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("daily limit must be at most {max}")]
    LimitTooLarge { max: u32 },
    #[error("unauthorized")]
    Unauthorized,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SettingKey {
    DailyLimit,
}

impl SettingKey {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DailyLimit => "daily_limit",
        }
    }

    /// Value materialized into the settings table the first time the key is read.
    #[must_use]
    pub fn default_value(self) -> String {
        match self {
            Self::DailyLimit => DailyLimit::DEFAULT.to_string(),
        }
    }
}

/// Maximum number of letters accepted per origin per UTC calendar day.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct DailyLimit(u32);

impl DailyLimit {
    pub const DEFAULT: Self = Self(1);

    /// Builds a limit from an operator-supplied number.
    ///
    /// # Errors
    /// Returns [`TreeholeError::Validation`] for zero.
    pub fn new(value: u32) -> Result<Self, TreeholeError> {
        if value == 0 {
            return Err(TreeholeError::Validation(
                "daily limit MUST be a positive whole number".to_string(),
            ));
        }
        Ok(Self(value))
    }

    /// Decodes a stored setting value. `None` means the row is malformed and the
    /// caller should fall back to [`DailyLimit::DEFAULT`].
    #[must_use]
    pub fn parse_setting(value: &str) -> Option<Self> {
        value.trim().parse::<u32>().ok().and_then(|parsed| Self::new(parsed).ok())
    }

    /// Decodes the `dailyLimit` field of an admin request. Accepts a JSON integer
    /// (or an integral float such as `3.0`) and a string holding an integer.
    ///
    /// # Errors
    /// Returns [`TreeholeError::LimitTooLarge`] for a positive whole number that
    /// does not fit in `u32`, and [`TreeholeError::Validation`] when the value
    /// is absent, not an integer, or not positive.
    #[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
    pub fn from_json(value: Option<&Value>) -> Result<Self, TreeholeError> {
        let invalid =
            || TreeholeError::Validation("daily limit MUST be a positive whole number".to_string());
        let too_large = || TreeholeError::LimitTooLarge { max: u32::MAX };

        let candidate: i128 = match value {
            Some(Value::Number(number)) => {
                if let Some(int) = number.as_i64() {
                    i128::from(int)
                } else if let Some(int) = number.as_u64() {
                    i128::from(int)
                } else {
                    match number.as_f64() {
                        Some(float) if float.is_finite() && float.fract() == 0.0 => {
                            if float > f64::from(u32::MAX) {
                                return Err(too_large());
                            }
                            float as i128
                        }
                        _ => return Err(invalid()),
                    }
                }
            }
            Some(Value::String(text)) => text.trim().parse::<i128>().map_err(|_| invalid())?,
            _ => return Err(invalid()),
        };

        if candidate <= 0 {
            return Err(invalid());
        }
        let narrowed = u32::try_from(candidate).map_err(|_| too_large())?;
        Self::new(narrowed)
    }

    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }
}

impl Default for DailyLimit {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl Display for DailyLimit {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct LetterId(pub i64);

impl LetterId {
    /// Parses a letter id taken from a request path.
    ///
    /// # Errors
    /// Returns [`TreeholeError::Validation`] unless the input is a positive integer.
    pub fn parse(value: &str) -> Result<Self, TreeholeError> {
        match value.parse::<i64>() {
            Ok(id) if id > 0 => Ok(Self(id)),
            _ => Err(TreeholeError::Validation(format!("invalid letter id: {value:?}"))),
        }
    }
}

impl Display for LetterId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stored letter. `reply_text` and `reply_created_at` are either both set or
/// both null.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Letter {
    pub id: LetterId,
    pub content: String,
    #[serde(rename = "ip_address")]
    pub origin: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub reply_text: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub reply_created_at: Option<OffsetDateTime>,
}

/// Accepted submission, already validated and trimmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLetter {
    pub content: String,
    pub origin: String,
}

impl NewLetter {
    /// Validates raw submission content and binds it to the submitting origin.
    ///
    /// # Errors
    /// Returns [`TreeholeError::Validation`] when the content is missing or
    /// shorter than [`MIN_CONTENT_CHARS`] after trimming.
    pub fn new(content: Option<&str>, origin: impl Into<String>) -> Result<Self, TreeholeError> {
        let content = validate_content(content)?;
        Ok(Self {
            content,
            origin: origin.into(),
        })
    }
}

/// Trims submission content and enforces the minimum length. Length is
/// counted in Unicode scalar values, not bytes.
///
/// # Errors
/// Returns [`TreeholeError::Validation`] for missing or too-short content.
pub fn validate_content(content: Option<&str>) -> Result<String, TreeholeError> {
    let Some(raw) = content else {
        return Err(TreeholeError::Validation("content MUST be provided".to_string()));
    };

    let trimmed = raw.trim();
    if trimmed.chars().count() < MIN_CONTENT_CHARS {
        return Err(TreeholeError::Validation(format!(
            "content MUST contain at least {MIN_CONTENT_CHARS} characters"
        )));
    }

    Ok(trimmed.to_string())
}

/// Normalized effect of a reply request on a letter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyUpdate {
    Set(String),
    Clear,
}

impl ReplyUpdate {
    /// Blank or missing text clears the reply; anything else is stored trimmed.
    #[must_use]
    pub fn normalize(reply_text: Option<&str>) -> Self {
        match reply_text.map(str::trim) {
            Some(text) if !text.is_empty() => Self::Set(text.to_string()),
            _ => Self::Clear,
        }
    }

    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Set(text) => Some(text),
            Self::Clear => None,
        }
    }
}

/// Parses an RFC3339 timestamp and requires UTC (`Z`) offset.
///
/// # Errors
/// Returns [`TreeholeError::Validation`] when parsing fails or the timestamp
/// is not UTC.
pub fn parse_rfc3339_utc(value: &str) -> Result<OffsetDateTime, TreeholeError> {
    let parsed = OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .map_err(|err| TreeholeError::Validation(format!("invalid RFC3339 timestamp: {err}")))?;

    if parsed.offset() != UtcOffset::UTC {
        return Err(TreeholeError::Validation(
            "timestamp MUST use UTC offset Z".to_string(),
        ));
    }

    Ok(parsed)
}

/// Formats a timestamp as RFC3339 after normalizing to UTC.
///
/// # Errors
/// Returns [`TreeholeError::Validation`] when formatting fails.
pub fn format_rfc3339(value: OffsetDateTime) -> Result<String, TreeholeError> {
    value
        .to_offset(UtcOffset::UTC)
        .format(&time::format_description::well_known::Rfc3339)
        .map_err(|err| {
            TreeholeError::Validation(format!("failed to format RFC3339 timestamp: {err}"))
        })
}

/// UTC calendar day (`YYYY-MM-DD`) used to bucket the daily quota.
#[must_use]
pub fn utc_day(value: OffsetDateTime) -> String {
    let utc = value.to_offset(UtcOffset::UTC);
    format!("{:04}-{:02}-{:02}", utc.year(), u8::from(utc.month()), utc.day())
}

/// Drops sub-second precision so stored timestamps have a fixed width and sort
/// lexically.
#[must_use]
pub fn truncate_to_seconds(value: OffsetDateTime) -> OffsetDateTime {
    value - time::Duration::nanoseconds(i64::from(value.nanosecond()))
}

#[must_use]
pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc().to_offset(UtcOffset::UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn must_ok<T, E: std::fmt::Display>(result: Result<T, E>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("expected Ok(..), got error: {err}"),
        }
    }

    fn must_utc(value: &str) -> OffsetDateTime {
        must_ok(parse_rfc3339_utc(value))
    }

    #[test]
    fn content_shorter_than_ten_chars_after_trim_is_rejected() {
        let result = validate_content(Some("   123456789   "));
        assert!(matches!(result, Err(TreeholeError::Validation(_))));
    }

    #[test]
    fn content_of_exactly_ten_chars_is_accepted_trimmed() {
        let content = must_ok(validate_content(Some("\n 1234567890 \t")));
        assert_eq!(content, "1234567890");
    }

    #[test]
    fn content_length_counts_characters_not_bytes() {
        // Nine multi-byte characters: 27 bytes, still too short.
        assert!(validate_content(Some("树洞树洞树洞树洞树")).is_err());
        assert!(validate_content(Some("树洞树洞树洞树洞树洞")).is_ok());
    }

    #[test]
    fn missing_content_is_rejected() {
        assert!(matches!(validate_content(None), Err(TreeholeError::Validation(_))));
        assert!(matches!(NewLetter::new(None, "1.2.3.4"), Err(TreeholeError::Validation(_))));
    }

    #[test]
    fn letter_id_requires_positive_integer() {
        assert_eq!(must_ok(LetterId::parse("42")), LetterId(42));
        for bad in ["0", "-3", "abc", "", "1.5", " 7"] {
            assert!(LetterId::parse(bad).is_err(), "expected {bad:?} to be rejected");
        }
    }

    #[test]
    fn daily_limit_setting_parse_falls_back_on_malformed_values() {
        assert_eq!(DailyLimit::parse_setting("3").map(DailyLimit::get), Some(3));
        assert_eq!(DailyLimit::parse_setting(" 5 ").map(DailyLimit::get), Some(5));
        assert_eq!(DailyLimit::parse_setting("0"), None);
        assert_eq!(DailyLimit::parse_setting("-1"), None);
        assert_eq!(DailyLimit::parse_setting("lots"), None);
    }

    #[test]
    fn daily_limit_from_json_accepts_integers_and_integer_strings() {
        assert_eq!(must_ok(DailyLimit::from_json(Some(&json!(3)))).get(), 3);
        assert_eq!(must_ok(DailyLimit::from_json(Some(&json!("4")))).get(), 4);
        assert_eq!(must_ok(DailyLimit::from_json(Some(&json!(2.0)))).get(), 2);

        for bad in [json!(0), json!(-2), json!(1.5), json!("x"), json!(null), json!([1])] {
            assert!(
                matches!(DailyLimit::from_json(Some(&bad)), Err(TreeholeError::Validation(_))),
                "expected {bad} to be rejected"
            );
        }
        assert!(DailyLimit::from_json(None).is_err());
    }

    #[test]
    fn daily_limit_beyond_u32_is_reported_as_too_large() {
        let max = must_ok(DailyLimit::from_json(Some(&json!(u32::MAX))));
        assert_eq!(max.get(), u32::MAX);

        for big in [json!(5_000_000_000_u64), json!("5000000000"), json!(u64::MAX), json!(1e20)] {
            assert_eq!(
                DailyLimit::from_json(Some(&big)),
                Err(TreeholeError::LimitTooLarge { max: u32::MAX }),
                "expected {big} to be out of range"
            );
        }
        assert!(matches!(
            DailyLimit::from_json(Some(&json!(-5_000_000_000_i64))),
            Err(TreeholeError::Validation(_))
        ));
    }

    #[test]
    fn reply_normalization_clears_blank_text() {
        assert_eq!(ReplyUpdate::normalize(Some("  thanks  ")), ReplyUpdate::Set("thanks".into()));
        assert_eq!(ReplyUpdate::normalize(Some(" \n\t ")), ReplyUpdate::Clear);
        assert_eq!(ReplyUpdate::normalize(Some("")), ReplyUpdate::Clear);
        assert_eq!(ReplyUpdate::normalize(None), ReplyUpdate::Clear);
    }

    #[test]
    fn utc_day_uses_utc_calendar() {
        let late = must_utc("2026-02-07T23:59:59Z");
        assert_eq!(utc_day(late), "2026-02-07");

        let offset = must_ok(OffsetDateTime::parse(
            "2026-02-08T01:30:00+02:00",
            &time::format_description::well_known::Rfc3339,
        ));
        assert_eq!(utc_day(offset), "2026-02-07");
    }

    #[test]
    fn truncate_to_seconds_drops_fraction_only() {
        let precise = must_utc("2026-02-07T12:00:05.987654Z");
        let truncated = truncate_to_seconds(precise);
        assert_eq!(truncated, must_utc("2026-02-07T12:00:05Z"));
        assert_eq!(must_ok(format_rfc3339(truncated)), "2026-02-07T12:00:05Z");
    }

    #[test]
    fn letter_serializes_timestamps_as_rfc3339_or_null() {
        let letter = Letter {
            id: LetterId(7),
            content: "a quiet evening letter".to_string(),
            origin: "10.0.0.1".to_string(),
            created_at: must_utc("2026-02-07T12:00:00Z"),
            reply_text: None,
            reply_created_at: None,
        };
        let value = must_ok(serde_json::to_value(&letter));
        assert_eq!(value["id"], json!(7));
        assert_eq!(value["ip_address"], json!("10.0.0.1"));
        assert!(value.get("origin").is_none());
        assert_eq!(value["created_at"], json!("2026-02-07T12:00:00Z"));
        assert_eq!(value["reply_text"], Value::Null);
        assert_eq!(value["reply_created_at"], Value::Null);
    }

    #[test]
    fn setting_key_storage_name_and_default() {
        assert_eq!(SettingKey::DailyLimit.as_str(), "daily_limit");
        assert_eq!(SettingKey::DailyLimit.default_value(), "1");
    }
}
