//! Business-timezone clock and time-of-day helpers.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Timelike, Utc};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Source of "now" in the business timezone.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<FixedOffset>;

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

/// Wall clock shifted to a fixed UTC offset (the shop does not observe DST).
pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.offset)
    }
}

/// Settable clock for tests.
#[cfg(test)]
pub struct FixedClock {
    now: std::sync::Mutex<DateTime<FixedOffset>>,
}

#[cfg(test)]
impl FixedClock {
    /// `at` is an RFC 3339 timestamp, e.g. `2030-06-03T10:00:00-03:00`.
    pub fn at(at: &str) -> Self {
        Self {
            now: std::sync::Mutex::new(DateTime::parse_from_rfc3339(at).unwrap()),
        }
    }

    pub fn set(&self, at: &str) {
        *self.now.lock().unwrap() = DateTime::parse_from_rfc3339(at).unwrap();
    }
}

#[cfg(test)]
impl Clock for FixedClock {
    fn now(&self) -> DateTime<FixedOffset> {
        *self.now.lock().unwrap()
    }
}

// ── Time-of-day parsing ──

/// Parses a stored time-of-day. Accepts `HH:MM`, `HH:MM:SS` and anything
/// longer that starts with `HH:MM:SS` (fractional seconds are dropped).
pub fn parse_time_of_day(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    if raw.len() == 5 {
        return NaiveTime::parse_from_str(raw, "%H:%M").ok();
    }
    if let Some(head) = raw.get(..8) {
        return NaiveTime::parse_from_str(head, "%H:%M:%S").ok();
    }
    None
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT).ok()
}

pub fn format_hhmm(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

/// `now` with seconds and below dropped, as a time of day.
pub fn minute_floor(now: &DateTime<FixedOffset>) -> NaiveTime {
    NaiveTime::from_hms_opt(now.hour(), now.minute(), 0).unwrap_or(NaiveTime::MIN)
}
