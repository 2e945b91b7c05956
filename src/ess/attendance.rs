//! Check-in/check-out state, history and the weekly hours summary.

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::info;

use super::records::{decode_records, optional, round2};
use super::EssService;
use crate::cache::{query_key, IntervalRefetch};
use crate::erp::{ErpError, ErpResult, SearchRead};
use crate::tz::{format_erp, parse_erp, LocalTime};

const ATTENDANCE_MODEL: &str = "hr.attendance";
const HISTORY_STALE: Duration = Duration::from_secs(60);
const STANDARD_WEEK_HOURS: f64 = 40.0;
const WORK_DAYS: [(&str, &str); 5] = [
  ("Mon", "Monday"),
  ("Tue", "Tuesday"),
  ("Wed", "Wednesday"),
  ("Thu", "Thursday"),
  ("Fri", "Friday"),
];

/// How often the current attendance is refreshed while watched.
pub const WATCH_PERIOD: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
  #[serde(default)]
  pub id: i64,
  pub check_in: String,
  #[serde(default, deserialize_with = "optional")]
  pub check_out: Option<String>,
  #[serde(default)]
  pub worked_hours: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceState {
  /// Checked in, not yet out
  Active,
  /// Checked out earlier today
  Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentAttendance {
  pub status: AttendanceState,
  pub record: AttendanceRecord,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyHours {
  pub day: String,
  pub full_day: String,
  pub hours: f64,
  /// Share of the busiest day this week
  pub percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyAttendance {
  pub start_date: NaiveDate,
  pub end_date: NaiveDate,
  pub daily_hours: Vec<DailyHours>,
  pub total_worked_hours: f64,
  pub standard_hours: f64,
}

/// Decide what "right now" looks like from the open record and today's records (newest first).
///
/// The latest record of today only counts as completed while its check-out is still on the
/// local calendar day of `now`; otherwise the employee may check in again.
pub fn current_status(
  open: Option<AttendanceRecord>,
  today: &[AttendanceRecord],
  tz: &LocalTime,
  now: DateTime<Utc>,
) -> Option<CurrentAttendance> {
  if let Some(record) = open {
    return Some(CurrentAttendance {
      status: AttendanceState::Active,
      record,
    });
  }

  let latest = today.first()?;
  let checked_out = latest.check_out.as_deref().and_then(parse_erp)?;
  (tz.local_date(checked_out) == tz.local_date(now)).then(|| CurrentAttendance {
    status: AttendanceState::Completed,
    record: latest.clone(),
  })
}

/// Sum worked hours per local weekday, Monday to Friday of the week containing `now`.
pub fn summarize_week(
  records: &[AttendanceRecord],
  tz: &LocalTime,
  now: DateTime<Utc>,
) -> WeeklyAttendance {
  let start_date = tz.work_week_start(now);
  let end_date = start_date + Days::new(4);

  let mut hours = [0.0_f64; 5];
  for record in records {
    let Some(check_in) = parse_erp(&record.check_in) else {
      continue;
    };
    if tz.local_date(check_in) < start_date {
      continue;
    }
    if let Some(slot) = hours.get_mut(tz.local_weekday_index(check_in)) {
      *slot += record.worked_hours;
    }
  }

  let total: f64 = hours.iter().sum();
  let busiest = hours.iter().copied().fold(0.0, f64::max);
  let daily_hours = WORK_DAYS
    .iter()
    .zip(hours)
    .map(|(&(day, full_day), worked)| DailyHours {
      day: day.to_string(),
      full_day: full_day.to_string(),
      hours: round2(worked),
      percent: if busiest > 0.0 {
        worked / busiest * 100.0
      } else {
        0.0
      },
    })
    .collect();

  WeeklyAttendance {
    start_date,
    end_date,
    daily_hours,
    total_worked_hours: round2(total),
    standard_hours: STANDARD_WEEK_HOURS,
  }
}

/// Live view of the current attendance, refreshed on a timer until dropped.
pub struct AttendanceWatch {
  inner: IntervalRefetch<Value>,
}

impl AttendanceWatch {
  pub async fn next(&mut self) -> Option<Result<Option<CurrentAttendance>, String>> {
    let outcome = self.inner.next().await?;
    Some(outcome.and_then(|value| serde_json::from_value(value).map_err(|e| e.to_string())))
  }
}

impl EssService {
  /// Whether the employee is checked in, done for today, or neither (`None`).
  pub async fn current_attendance(&self) -> ErpResult<Option<CurrentAttendance>> {
    let stale_time = self.cache.default_stale_time();
    self
      .cached(query_key!("attendance", "current"), stale_time, || {
        self.fetch_current_attendance()
      })
      .await
  }

  /// Refetch the current attendance every `period` so worked hours keep moving.
  pub fn watch_attendance(&self, period: Duration) -> AttendanceWatch {
    let service = self.clone();
    let inner = self.cache.refetch_on_interval(
      query_key!("attendance", "current"),
      period,
      move || {
        let service = service.clone();
        async move {
          let current = service.fetch_current_attendance().await?;
          Ok::<_, ErpError>(serde_json::to_value(current)?)
        }
      },
    );

    AttendanceWatch { inner }
  }

  async fn fetch_current_attendance(&self) -> ErpResult<Option<CurrentAttendance>> {
    let Some(employee_id) = self.employee_id().await? else {
      return Ok(None);
    };
    let now = self.now();

    let open = self
      .client
      .search_read(
        SearchRead::new(ATTENDANCE_MODEL)
          .filter(json!(["employee_id", "=", employee_id]))
          .filter(json!(["check_out", "=", false]))
          .fields(&["id", "check_in", "worked_hours"])
          .limit(1),
      )
      .await?;
    let open = decode_records::<AttendanceRecord>(ATTENDANCE_MODEL, open)
      .into_iter()
      .next();
    if open.is_some() {
      return Ok(current_status(open, &[], &self.tz, now));
    }

    let (day_start, day_end) = self.tz.today_bounds(now);
    let today = self
      .client
      .search_read(
        SearchRead::new(ATTENDANCE_MODEL)
          .filter(json!(["employee_id", "=", employee_id]))
          .filter(json!(["check_in", ">=", day_start]))
          .filter(json!(["check_in", "<=", day_end]))
          .fields(&["id", "check_in", "check_out", "worked_hours"])
          .limit(10)
          .order("check_in desc"),
      )
      .await?;
    let today = decode_records::<AttendanceRecord>(ATTENDANCE_MODEL, today);

    Ok(current_status(None, &today, &self.tz, now))
  }

  /// Closed attendance records, newest first.
  pub async fn attendance_history(&self, limit: u32) -> ErpResult<Vec<AttendanceRecord>> {
    self
      .cached(
        query_key!("attendance", "history", limit),
        HISTORY_STALE,
        || async move {
          let Some(employee_id) = self.employee_id().await? else {
            return Ok(Vec::new());
          };

          let records = self
            .client
            .search_read(
              SearchRead::new(ATTENDANCE_MODEL)
                .filter(json!(["employee_id", "=", employee_id]))
                .filter(json!(["check_out", "!=", false]))
                .fields(&["check_in", "check_out", "worked_hours"])
                .limit(limit)
                .order("check_in desc"),
            )
            .await?;
          Ok(decode_records(ATTENDANCE_MODEL, records))
        },
      )
      .await
  }

  /// Hours worked this week, Monday to Friday in local time.
  pub async fn weekly_attendance(&self) -> ErpResult<Option<WeeklyAttendance>> {
    let stale_time = self.cache.default_stale_time();
    self
      .cached(query_key!("attendance", "weekly"), stale_time, || async move {
        let Some(employee_id) = self.employee_id().await? else {
          return Ok(None);
        };
        let now = self.now();
        let (week_start, week_end) = self.tz.work_week_bounds(now);

        let records = self
          .client
          .search_read(
            SearchRead::new(ATTENDANCE_MODEL)
              .filter(json!(["employee_id", "=", employee_id]))
              .filter(json!("|"))
              .filter(json!("&"))
              .filter(json!(["check_in", ">=", week_start]))
              .filter(json!(["check_in", "<=", week_end]))
              .filter(json!("&"))
              .filter(json!(["check_out", ">=", week_start]))
              .filter(json!(["check_out", "<=", week_end]))
              .fields(&["check_in", "check_out", "worked_hours"])
              .order("check_in desc"),
          )
          .await?;
        let records = decode_records::<AttendanceRecord>(ATTENDANCE_MODEL, records);

        Ok(Some(summarize_week(&records, &self.tz, now)))
      })
      .await
  }

  /// Open an attendance record stamped now. Refused while another one is still open.
  pub async fn check_in(&self) -> ErpResult<i64> {
    if self.open_attendance_id().await?.is_some() {
      return Err(ErpError::Validation(
        "You already have an active attendance record. Please check out first.".to_string(),
      ));
    }
    let employee_id = self.require_employee().await?;

    let mut values = Map::new();
    values.insert("employee_id".to_string(), json!(employee_id));
    values.insert("check_in".to_string(), json!(format_erp(self.now())));

    let id = self.client.create(ATTENDANCE_MODEL, values).await?;
    self.invalidate(&[query_key!("attendance")]);
    info!(attendance_id = id, employee_id, "Checked in");
    Ok(id)
  }

  /// Close `attendance_id` with a check-out stamped now.
  pub async fn check_out(&self, attendance_id: i64) -> ErpResult<bool> {
    let mut values = Map::new();
    values.insert("check_out".to_string(), json!(format_erp(self.now())));

    let written = self
      .client
      .write(ATTENDANCE_MODEL, &[attendance_id], values)
      .await
      .map_err(explain_check_out_failure)?;
    self.invalidate(&[query_key!("attendance")]);
    info!(attendance_id, "Checked out");
    Ok(written)
  }

  /// Close whichever record is currently open.
  pub async fn check_out_active(&self) -> ErpResult<bool> {
    match self.open_attendance_id().await? {
      Some(id) => self.check_out(id).await,
      None => Err(ErpError::Validation(
        "No active attendance record to check out".to_string(),
      )),
    }
  }

  /// Looked up fresh rather than from the cache, since it gates mutations.
  async fn open_attendance_id(&self) -> ErpResult<Option<i64>> {
    let session = self.session()?;
    let open = self
      .client
      .search_read(
        SearchRead::new(ATTENDANCE_MODEL)
          .filter(json!(["employee_id.user_id", "=", session.user_id]))
          .filter(json!(["check_out", "=", false]))
          .fields(&["id", "check_in"])
          .limit(1),
      )
      .await?;

    Ok(
      decode_records::<AttendanceRecord>(ATTENDANCE_MODEL, open)
        .first()
        .map(|record| record.id),
    )
  }
}

fn explain_check_out_failure(error: ErpError) -> ErpError {
  let is_validation = match &error {
    ErpError::Rpc { message, name, .. } => {
      message.contains("ValidationError")
        || name
          .as_deref()
          .is_some_and(|name| name.contains("ValidationError"))
    }
    _ => false,
  };

  if is_validation {
    ErpError::Validation("Cannot check out: Check out time must be after check in time".to_string())
  } else {
    error
  }
}
