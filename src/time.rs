use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};

/// Source of "now" for the engine, so scoring stays deterministic in tests.
#[derive(Debug, Clone, Copy, Default)]
pub enum Clock {
    #[default]
    System,
    Fixed(DateTime<Utc>),
}

impl Clock {
    #[must_use]
    pub fn fixed(at: DateTime<Utc>) -> Self {
        Self::Fixed(at)
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Clock::System => Utc::now(),
            Clock::Fixed(at) => *at,
        }
    }
}

/// Start of a trailing window of `days` ending at `now`. Windows are at
/// least one day wide.
pub fn window_start(now: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    now - Duration::days(days.max(1))
}

/// Parses the loosely formatted timestamps found in exam and login records.
///
/// Accepts RFC 3339, `YYYY-MM-DDTHH:MM:SS[.f]`, `YYYY-MM-DD HH:MM:SS`, the
/// slash form `YYYY/MM/DD[ HH:MM:SS]` and bare dates (`YYYY-MM-DD`,
/// `YYYY/MM/DD`, `YYYYMMDD`, all midnight UTC). Anything else yields `None`.
/// Every accepted format orders the same way its text does.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y/%m/%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }

    ["%Y-%m-%d", "%Y/%m/%d", "%Y%m%d"]
        .into_iter()
        .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// 2026-03-02T12:00:00Z, a Monday. Shared by tests that need a fixed "now".
#[cfg(test)]
pub(crate) fn fixed_now() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-03-02T12:00:00Z")
        .expect("fixed timestamp should parse")
        .with_timezone(&Utc)
}
