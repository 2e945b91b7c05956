//! Conversion between the ERP's naive UTC datetimes and the employee's local time.
//!
//! The ERP stores datetimes as `YYYY-MM-DD HH:MM:SS` in UTC. Day and week boundaries are
//! meaningful only in local time, so every such calculation goes through [`LocalTime`].

use chrono::{
  DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc,
};

pub const ERP_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const ERP_DATE_FORMAT: &str = "%Y-%m-%d";

/// Format a UTC instant the way the ERP expects it.
pub fn format_erp(dt: DateTime<Utc>) -> String {
  dt.format(ERP_DATETIME_FORMAT).to_string()
}

/// Parse an ERP datetime (UTC, space or `T` separated, optional fractional seconds).
pub fn parse_erp(s: &str) -> Option<DateTime<Utc>> {
  let normalized = s.trim().replace('T', " ");
  let normalized = normalized.trim_end_matches('Z');
  let without_fraction = normalized.split('.').next().unwrap_or(normalized);

  NaiveDateTime::parse_from_str(without_fraction, ERP_DATETIME_FORMAT)
    .ok()
    .map(|dt| dt.and_utc())
}

/// The employee's fixed UTC offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalTime {
  offset: FixedOffset,
}

impl LocalTime {
  pub fn from_offset_hours(hours: i32) -> Option<Self> {
    FixedOffset::east_opt(hours.checked_mul(3600)?).map(|offset| Self { offset })
  }

  pub fn to_local(&self, utc: DateTime<Utc>) -> DateTime<FixedOffset> {
    utc.with_timezone(&self.offset)
  }

  pub fn local_date(&self, utc: DateTime<Utc>) -> NaiveDate {
    self.to_local(utc).date_naive()
  }

  /// Monday = 0 ... Sunday = 6, in local time.
  pub fn local_weekday_index(&self, utc: DateTime<Utc>) -> usize {
    self.local_date(utc).weekday().num_days_from_monday() as usize
  }

  /// The UTC instant of a local wall-clock time.
  pub fn local_to_utc(&self, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    let shift = Duration::seconds(i64::from(self.offset.local_minus_utc()));
    (date.and_time(time) - shift).and_utc()
  }

  /// ERP datetime string for a local wall-clock time.
  pub fn local_to_erp(&self, date: NaiveDate, time: NaiveTime) -> String {
    format_erp(self.local_to_utc(date, time))
  }

  /// First and last second of the local day containing `now`, as ERP strings.
  pub fn today_bounds(&self, now: DateTime<Utc>) -> (String, String) {
    let today = self.local_date(now);
    (self.start_of(today), self.end_of(today))
  }

  /// Local Monday 00:00:00 through Friday 23:59:59 of the week containing `now`.
  pub fn work_week_bounds(&self, now: DateTime<Utc>) -> (String, String) {
    let monday = self.work_week_start(now);
    (self.start_of(monday), self.end_of(monday + Duration::days(4)))
  }

  pub fn work_week_start(&self, now: DateTime<Utc>) -> NaiveDate {
    let today = self.local_date(now);
    today - Duration::days(i64::from(today.weekday().num_days_from_monday()))
  }

  fn start_of(&self, date: NaiveDate) -> String {
    format_erp(self.local_to_utc(date, NaiveTime::MIN))
  }

  fn end_of(&self, date: NaiveDate) -> String {
    let next_midnight = self.local_to_utc(date + Duration::days(1), NaiveTime::MIN);
    format_erp(next_midnight - Duration::seconds(1))
  }
}
