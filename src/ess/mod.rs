//! Employee self-service: attendance, leave, payslips, expenses and the company directory.
//!
//! Every read goes through the query cache under a stable key; every mutation invalidates
//! the key families it affects once the ERP accepts it.

mod attendance;
mod directory;
mod expense;
mod leave;
mod payslip;
mod planning;
mod records;

pub use attendance::{
  AttendanceRecord, AttendanceState, AttendanceWatch, CurrentAttendance, DailyHours,
  WeeklyAttendance, WATCH_PERIOD,
};
pub use directory::{Announcement, CalendarEvent, Company, Profile};
pub use expense::{Expense, ExpenseProduct, ExpenseType, NewExpense};
pub use leave::{total_remaining, HalfDay, LeaveBalance, LeaveRequest, NewLeaveRequest};
pub use payslip::{Payslip, PayslipLine};
pub use planning::{
  PlanningPeriod, PlanningProgress, PlanningTrendPoint, ProgressBand, ProjectUpdates, SlotLine,
  UpdateLine,
};
pub use records::Many2One;

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::cache::{query_key, QueryCache, QueryKey};
use crate::erp::session::Session;
use crate::erp::{ErpClient, ErpError, ErpResult, SearchRead};
use crate::tz::LocalTime;
use records::decode_records;

const EMPLOYEE_MODEL: &str = "hr.employee";
const EMPLOYEE_STALE: Duration = Duration::from_secs(5 * 60);

#[derive(Deserialize)]
struct EmployeeRef {
  id: i64,
}

/// Self-service operations for the logged-in employee.
#[derive(Clone)]
pub struct EssService {
  client: ErpClient,
  cache: QueryCache<Value>,
  tz: LocalTime,
  currency_id: i64,
  clock: fn() -> DateTime<Utc>,
}

impl EssService {
  pub fn new(client: ErpClient, cache: QueryCache<Value>, tz: LocalTime, currency_id: i64) -> Self {
    Self {
      client,
      cache,
      tz,
      currency_id,
      clock: Utc::now,
    }
  }

  #[cfg(test)]
  pub(crate) fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
    self.clock = clock;
    self
  }

  pub fn cache(&self) -> &QueryCache<Value> {
    &self.cache
  }

  fn now(&self) -> DateTime<Utc> {
    (self.clock)()
  }

  /// Today's date in the employee's time zone.
  pub fn today(&self) -> NaiveDate {
    self.tz.local_date(self.now())
  }

  fn session(&self) -> ErpResult<Arc<Session>> {
    self.client.session().require()
  }

  /// Log in and start from an empty cache.
  pub async fn login(
    &self,
    username: &str,
    password: &str,
    database: Option<&str>,
  ) -> ErpResult<Arc<Session>> {
    let session = self
      .client
      .session()
      .login(username, password, database)
      .await?;
    self.cache.clear();
    debug!(uid = session.user_id, "Query cache cleared after login");
    Ok(session)
  }

  /// Forget the session and everything cached on its behalf.
  pub fn logout(&self) {
    self.client.session().logout();
    self.cache.clear();
    debug!("Query cache cleared after logout");
  }

  pub fn whoami(&self) -> Option<Arc<Session>> {
    self.client.session().current()
  }

  /// Serve `key` from the cache or run `fetch`, converting through the cache's JSON values.
  async fn cached<T, F, Fut>(&self, key: QueryKey, stale_time: Duration, fetch: F) -> ErpResult<T>
  where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = ErpResult<T>>,
  {
    let result = self
      .cache
      .get(&key, stale_time, || async move {
        let data = fetch().await?;
        Ok::<_, ErpError>(serde_json::to_value(data)?)
      })
      .await?;

    debug!(
      key = %key,
      cached = result.is_cached(),
      age_ms = result.age.as_millis() as u64,
      "Query served"
    );
    Ok(serde_json::from_value(result.data)?)
  }

  fn invalidate(&self, prefixes: &[QueryKey]) {
    for prefix in prefixes {
      self.cache.invalidate(prefix);
    }
  }

  /// The `hr.employee` id linked to the logged-in user, if any.
  pub async fn employee_id(&self) -> ErpResult<Option<i64>> {
    let session = self.session()?;
    let uid = session.user_id;

    self
      .cached(query_key!("employee", uid), EMPLOYEE_STALE, || async move {
        let records = self
          .client
          .search_read(
            SearchRead::new(EMPLOYEE_MODEL)
              .filter(json!(["user_id", "=", uid]))
              .fields(&["id"])
              .limit(1),
          )
          .await?;

        Ok(
          decode_records::<EmployeeRef>(EMPLOYEE_MODEL, records)
            .first()
            .map(|employee| employee.id),
        )
      })
      .await
  }

  async fn require_employee(&self) -> ErpResult<i64> {
    self
      .employee_id()
      .await?
      .ok_or(ErpError::NotFound("employee"))
  }
}
