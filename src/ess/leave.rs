//! Leave balances, requests and new leave submissions.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::info;

use super::records::{decode_records, optional, Many2One};
use super::EssService;
use crate::cache::query_key;
use crate::erp::{CallParams, ErpError, ErpResult, SearchRead};
use crate::tz::{LocalTime, ERP_DATE_FORMAT};

const LEAVE_MODEL: &str = "hr.leave";
const LEAVE_TYPE_MODEL: &str = "hr.leave.type";

/// Which half of the working day a half-day leave covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum HalfDay {
  Am,
  Pm,
}

impl HalfDay {
  fn period(self) -> &'static str {
    match self {
      HalfDay::Am => "am",
      HalfDay::Pm => "pm",
    }
  }

  /// Local working hours covered.
  fn window(self) -> (NaiveTime, NaiveTime) {
    match self {
      HalfDay::Am => (hour(8), hour(12)),
      HalfDay::Pm => (hour(13), hour(17)),
    }
  }
}

fn hour(h: u32) -> NaiveTime {
  NaiveTime::from_hms_opt(h, 0, 0).unwrap_or(NaiveTime::MIN)
}

/// A full working day, in local time.
fn full_day_window() -> (NaiveTime, NaiveTime) {
  (hour(8), hour(17))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaveBalance {
  pub name: String,
  pub leave_type_id: Option<i64>,
  pub remaining_leaves: f64,
  /// Remaining once pending requests are approved
  pub virtual_remaining_leaves: f64,
  pub max_leaves: f64,
  pub leaves_taken: f64,
  /// Taken including pending requests
  pub virtual_leaves_taken: f64,
  pub request_unit: Option<String>,
}

/// Days left across all leave types, counting pending requests as taken.
pub fn total_remaining(balances: &[LeaveBalance]) -> f64 {
  balances.iter().map(|b| b.virtual_remaining_leaves).sum()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaveRequest {
  #[serde(default)]
  pub id: i64,
  #[serde(default, deserialize_with = "optional")]
  pub name: Option<String>,
  #[serde(default, deserialize_with = "optional")]
  pub holiday_status_id: Option<Many2One>,
  #[serde(default, deserialize_with = "optional")]
  pub date_from: Option<String>,
  #[serde(default, deserialize_with = "optional")]
  pub date_to: Option<String>,
  #[serde(default)]
  pub number_of_days: f64,
  #[serde(default, deserialize_with = "optional")]
  pub state: Option<String>,
  #[serde(default, deserialize_with = "optional")]
  pub holiday_type: Option<String>,
}

/// A leave to submit for the logged-in employee.
#[derive(Debug, Clone)]
pub struct NewLeaveRequest {
  pub leave_type_id: i64,
  pub description: String,
  pub date_from: NaiveDate,
  pub date_to: NaiveDate,
  /// Half-day leaves cover `date_from` only
  pub half_day: Option<HalfDay>,
}

impl NewLeaveRequest {
  fn values(&self, employee_id: i64, tz: &LocalTime) -> ErpResult<Map<String, Value>> {
    if self.date_to < self.date_from {
      return Err(ErpError::Validation(
        "Leave end date must not be before its start date".to_string(),
      ));
    }

    let last_day = match self.half_day {
      Some(_) => self.date_from,
      None => self.date_to,
    };
    let (start, end) = self.half_day.map_or_else(full_day_window, HalfDay::window);

    let mut values = Map::new();
    values.insert("holiday_allocation_id".to_string(), json!(false));
    values.insert("state".to_string(), json!("confirm"));
    values.insert("holiday_type".to_string(), json!("employee"));
    values.insert("holiday_status_id".to_string(), json!(self.leave_type_id));
    values.insert("employee_id".to_string(), json!(employee_id));
    values.insert("name".to_string(), json!(self.description));
    values.insert(
      "request_date_from".to_string(),
      json!(self.date_from.format(ERP_DATE_FORMAT).to_string()),
    );
    values.insert(
      "request_date_to".to_string(),
      json!(last_day.format(ERP_DATE_FORMAT).to_string()),
    );
    values.insert(
      "date_from".to_string(),
      json!(tz.local_to_erp(self.date_from, start)),
    );
    values.insert("date_to".to_string(), json!(tz.local_to_erp(last_day, end)));

    if let Some(half) = self.half_day {
      values.insert("request_unit_half".to_string(), json!(true));
      values.insert("request_date_from_period".to_string(), json!(half.period()));
      values.insert("request_unit_hours".to_string(), json!(false));
      values.insert("request_hour_from".to_string(), json!(false));
      values.insert("request_hour_to".to_string(), json!(false));
    }

    Ok(values)
  }
}

/// Entries look like `[name, {remaining_leaves, max_leaves, ...}, ..., type_id]`.
fn parse_balances(value: &Value) -> Vec<LeaveBalance> {
  value
    .as_array()
    .map(|entries| entries.iter().filter_map(parse_balance).collect())
    .unwrap_or_default()
}

fn parse_balance(entry: &Value) -> Option<LeaveBalance> {
  let parts = entry.as_array()?;
  let name = parts.first()?.as_str()?.to_string();
  let details = parts.get(1)?.as_object()?;
  let number = |field: &str| match details.get(field) {
    Some(Value::Number(n)) => n.as_f64().unwrap_or_default(),
    Some(Value::String(s)) => s.trim().parse().unwrap_or_default(),
    _ => 0.0,
  };

  Some(LeaveBalance {
    name,
    leave_type_id: parts.iter().skip(2).last().and_then(Value::as_i64),
    remaining_leaves: number("remaining_leaves"),
    virtual_remaining_leaves: number("virtual_remaining_leaves"),
    max_leaves: number("max_leaves"),
    leaves_taken: number("leaves_taken"),
    virtual_leaves_taken: number("virtual_leaves_taken"),
    request_unit: details
      .get("request_unit")
      .and_then(Value::as_str)
      .map(String::from),
  })
}

impl EssService {
  /// Remaining, allocated and taken days per leave type.
  pub async fn leave_balance(&self) -> ErpResult<Vec<LeaveBalance>> {
    let stale_time = self.cache.default_stale_time();
    self
      .cached(query_key!("leaves", "balance"), stale_time, || async move {
        let result = self
          .client
          .call(CallParams::model(LEAVE_TYPE_MODEL, "get_days_all_request"))
          .await?;
        Ok(parse_balances(&result))
      })
      .await
  }

  /// The employee's leave requests, optionally narrowed to one state (`"all"` means any).
  pub async fn leave_requests(
    &self,
    status: Option<&str>,
    limit: u32,
  ) -> ErpResult<Vec<LeaveRequest>> {
    let session = self.session()?;
    let status = status.filter(|s| *s != "all");
    let stale_time = self.cache.default_stale_time();

    self
      .cached(
        query_key!("leaves", "requests", status.unwrap_or("all"), limit),
        stale_time,
        || async move {
          let mut query = SearchRead::new(LEAVE_MODEL)
            .filter(json!(["employee_id.user_id", "=", session.user_id]))
            .fields(&[
              "name",
              "holiday_status_id",
              "date_from",
              "date_to",
              "number_of_days",
              "state",
              "holiday_type",
            ])
            .limit(limit)
            .order("date_from desc");
          if let Some(state) = status {
            query = query.filter(json!(["state", "=", state]));
          }

          let records = self.client.search_read(query).await?;
          Ok(decode_records(LEAVE_MODEL, records))
        },
      )
      .await
  }

  /// Submit a leave request and return its id.
  pub async fn request_leave(&self, request: &NewLeaveRequest) -> ErpResult<i64> {
    let employee_id = self.require_employee().await?;
    let values = request.values(employee_id, &self.tz)?;

    let id = self.client.create(LEAVE_MODEL, values).await?;
    self.invalidate(&[query_key!("leaves")]);
    info!(leave_id = id, leave_type = request.leave_type_id, "Leave requested");
    Ok(id)
  }
}
