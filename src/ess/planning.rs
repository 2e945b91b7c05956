//! Operational planning: points targeted, planned and achieved per period, and the project
//! update lines behind them.

use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use super::records::{decode_records, optional, Many2One};
use super::EssService;
use crate::cache::query_key;
use crate::erp::{ErpError, ErpResult, SearchRead};
use crate::tz::ERP_DATE_FORMAT;

const PLANNING_MODEL: &str = "operational.planning.table";
const SLOT_LINE_MODEL: &str = "planning.slot.line";
const UPDATE_LINE_MODEL: &str = "project.update.line";

const PLANNING_STALE: Duration = Duration::from_secs(5 * 60);

/// Months covered by the trend, the selected one included.
const TREND_MONTHS: u32 = 6;

/// How far along a percentage is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressBand {
  /// 90% and up
  Excellent,
  /// 75% and up
  Good,
  /// 50% and up
  Fair,
  #[default]
  Behind,
}

impl ProgressBand {
  pub fn from_percent(percent: f64) -> Self {
    if percent >= 90.0 {
      Self::Excellent
    } else if percent >= 75.0 {
      Self::Good
    } else if percent >= 50.0 {
      Self::Fair
    } else {
      Self::Behind
    }
  }
}

/// Achieved points as a whole percentage of the target; 0 without a target.
pub fn percent_achieved(achieved: f64, target: f64) -> i64 {
  if target == 0.0 {
    return 0;
  }
  (achieved / target * 100.0).round() as i64
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanningProgress {
  #[serde(default)]
  pub id: i64,
  #[serde(default)]
  pub name: String,
  #[serde(default, deserialize_with = "optional")]
  pub employee_id: Option<Many2One>,
  #[serde(default, deserialize_with = "optional")]
  pub department_id: Option<Many2One>,
  #[serde(default, deserialize_with = "optional")]
  pub start_date: Option<String>,
  #[serde(default, deserialize_with = "optional")]
  pub end_date: Option<String>,
  #[serde(default)]
  pub target_points: f64,
  #[serde(default)]
  pub planned_points: f64,
  #[serde(default)]
  pub achieve_points: f64,
  #[serde(default)]
  pub percent_achieved: i64,
  #[serde(default)]
  pub band: ProgressBand,
}

impl PlanningProgress {
  fn with_progress(mut self) -> Self {
    self.percent_achieved = percent_achieved(self.achieve_points, self.target_points);
    self.band = ProgressBand::from_percent(self.percent_achieved as f64);
    self
  }
}

/// One planning period of the selected month, with the ERP's own percentages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanningPeriod {
  #[serde(default)]
  pub id: i64,
  #[serde(default)]
  pub name: String,
  #[serde(default, deserialize_with = "optional")]
  pub department_id: Option<Many2One>,
  #[serde(default, deserialize_with = "optional")]
  pub start_date: Option<String>,
  #[serde(default, deserialize_with = "optional")]
  pub end_date: Option<String>,
  #[serde(default)]
  pub target_points: f64,
  #[serde(default)]
  pub planned_points: f64,
  #[serde(default)]
  pub achieve_points: f64,
  #[serde(default)]
  pub achieve_percentage: f64,
  #[serde(default)]
  pub planned_percentage: f64,
  #[serde(default)]
  pub line_ids: Vec<i64>,
  #[serde(default)]
  pub slot_line_ids: Vec<i64>,
  #[serde(default)]
  pub achieve_band: ProgressBand,
  #[serde(default)]
  pub planned_band: ProgressBand,
}

impl PlanningPeriod {
  fn with_bands(mut self) -> Self {
    self.achieve_band = ProgressBand::from_percent(self.achieve_percentage);
    self.planned_band = ProgressBand::from_percent(self.planned_percentage);
    self
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanningTrendPoint {
  #[serde(default)]
  pub id: i64,
  #[serde(default)]
  pub name: String,
  #[serde(default, deserialize_with = "optional")]
  pub start_date: Option<String>,
  #[serde(default, deserialize_with = "optional")]
  pub end_date: Option<String>,
  #[serde(default)]
  pub target_points: f64,
  #[serde(default)]
  pub achieve_points: f64,
  #[serde(default)]
  pub achieve_percentage: f64,
}

/// Points planned against a project within a period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotLine {
  #[serde(default)]
  pub id: i64,
  #[serde(default, deserialize_with = "optional")]
  pub project_id: Option<Many2One>,
  #[serde(default, deserialize_with = "optional")]
  pub name: Option<String>,
  #[serde(default, deserialize_with = "optional")]
  pub period: Option<Value>,
  #[serde(default)]
  pub planned_points: f64,
}

/// Progress reported on a project within a period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateLine {
  #[serde(default)]
  pub id: i64,
  #[serde(default, deserialize_with = "optional")]
  pub project_id: Option<Many2One>,
  #[serde(default, deserialize_with = "optional")]
  pub name: Option<String>,
  #[serde(default)]
  pub previous_progress: f64,
  #[serde(default)]
  pub update_progress: f64,
  #[serde(default)]
  pub progress_point: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectUpdates {
  pub plans: Vec<PlanningPeriod>,
  /// Oldest first, ending with the selected month
  pub trend: Vec<PlanningTrendPoint>,
  pub slot_lines: Vec<SlotLine>,
  pub update_lines: Vec<UpdateLine>,
}

/// First and last day of `month` (1-12) in `year`.
fn month_bounds(month: u32, year: i32) -> ErpResult<(NaiveDate, NaiveDate)> {
  let invalid = || ErpError::Validation(format!("Invalid month: {}-{:02}", year, month));

  let first = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;
  let last = first
    .checked_add_months(Months::new(1))
    .and_then(|next| next.pred_opt())
    .ok_or_else(invalid)?;
  Ok((first, last))
}

fn erp_date(date: NaiveDate) -> String {
  date.format(ERP_DATE_FORMAT).to_string()
}

impl EssService {
  /// This year's planning periods, newest first, with the share of target points achieved.
  pub async fn planning_progress(&self, limit: u32) -> ErpResult<Vec<PlanningProgress>> {
    let year = self.today().year();

    self
      .cached(query_key!("planning-progress", limit), PLANNING_STALE, || async move {
        let Some(employee_id) = self.employee_id().await? else {
          return Ok(Vec::new());
        };

        let records = self
          .client
          .search_read(
            SearchRead::new(PLANNING_MODEL)
              .filter(json!(["employee_id", "=", employee_id]))
              .filter(json!(["start_date", ">=", format!("{}-01-01", year)]))
              .filter(json!(["start_date", "<=", format!("{}-12-31", year)]))
              .fields(&[
                "name",
                "employee_id",
                "department_id",
                "start_date",
                "end_date",
                "target_points",
                "planned_points",
                "achieve_points",
              ])
              .limit(limit)
              .order("start_date desc"),
          )
          .await?;

        Ok(
          decode_records::<PlanningProgress>(PLANNING_MODEL, records)
            .into_iter()
            .map(PlanningProgress::with_progress)
            .collect::<Vec<_>>(),
        )
      })
      .await
  }

  /// Planning periods starting in `month` (1-12) of `year`, the trend over the months
  /// leading up to it, and the slot and update lines of those periods.
  pub async fn project_updates(&self, month: u32, year: i32) -> ErpResult<ProjectUpdates> {
    let (first, last) = month_bounds(month, year)?;
    let trend_start = first
      .checked_sub_months(Months::new(TREND_MONTHS - 1))
      .unwrap_or(first);

    self
      .cached(
        query_key!("project-updates", month, year),
        PLANNING_STALE,
        || async move {
          let Some(employee_id) = self.employee_id().await? else {
            return Ok(ProjectUpdates::default());
          };

          let plans = self
            .client
            .search_read(
              SearchRead::new(PLANNING_MODEL)
                .filter(json!(["employee_id", "=", employee_id]))
                .filter(json!(["start_date", ">=", erp_date(first)]))
                .filter(json!(["start_date", "<=", erp_date(last)]))
                .fields(&[
                  "name",
                  "department_id",
                  "start_date",
                  "end_date",
                  "target_points",
                  "planned_points",
                  "achieve_points",
                  "achieve_percentage",
                  "planned_percentage",
                  "line_ids",
                  "slot_line_ids",
                ]),
            )
            .await?;
          let plans: Vec<PlanningPeriod> = decode_records::<PlanningPeriod>(PLANNING_MODEL, plans)
            .into_iter()
            .map(PlanningPeriod::with_bands)
            .collect();

          let trend = self
            .client
            .search_read(
              SearchRead::new(PLANNING_MODEL)
                .filter(json!(["employee_id", "=", employee_id]))
                .filter(json!(["start_date", ">=", erp_date(trend_start)]))
                .filter(json!(["start_date", "<=", erp_date(last)]))
                .fields(&[
                  "name",
                  "start_date",
                  "end_date",
                  "target_points",
                  "achieve_points",
                  "achieve_percentage",
                ])
                .order("start_date asc"),
            )
            .await?;

          let slot_line_ids: Vec<i64> = plans
            .iter()
            .flat_map(|plan| plan.slot_line_ids.iter().copied())
            .collect();
          let slot_lines = if slot_line_ids.is_empty() {
            Vec::new()
          } else {
            let records = self
              .client
              .search_read(
                SearchRead::new(SLOT_LINE_MODEL)
                  .filter(json!(["id", "in", slot_line_ids]))
                  .fields(&["project_id", "name", "period", "planned_points"]),
              )
              .await?;
            decode_records(SLOT_LINE_MODEL, records)
          };

          let update_line_ids: Vec<i64> = plans
            .iter()
            .flat_map(|plan| plan.line_ids.iter().copied())
            .collect();
          let update_lines = if update_line_ids.is_empty() {
            Vec::new()
          } else {
            let records = self
              .client
              .search_read(
                SearchRead::new(UPDATE_LINE_MODEL)
                  .filter(json!(["id", "in", update_line_ids]))
                  .fields(&[
                    "project_id",
                    "name",
                    "previous_progress",
                    "update_progress",
                    "progress_point",
                  ]),
              )
              .await?;
            decode_records(UPDATE_LINE_MODEL, records)
          };

          Ok(ProjectUpdates {
            plans,
            trend: decode_records(PLANNING_MODEL, trend),
            slot_lines,
            update_lines,
          })
        },
      )
      .await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ess::testing::*;

  #[test]
  fn percent_rounds_and_tolerates_missing_targets() {
    assert_eq!(percent_achieved(30.0, 40.0), 75);
    assert_eq!(percent_achieved(2.0, 3.0), 67);
    assert_eq!(percent_achieved(5.0, 0.0), 0);
    assert_eq!(percent_achieved(0.0, 10.0), 0);
  }

  #[test]
  fn bands_follow_thresholds() {
    assert_eq!(ProgressBand::from_percent(95.0), ProgressBand::Excellent);
    assert_eq!(ProgressBand::from_percent(90.0), ProgressBand::Excellent);
    assert_eq!(ProgressBand::from_percent(75.0), ProgressBand::Good);
    assert_eq!(ProgressBand::from_percent(50.0), ProgressBand::Fair);
    assert_eq!(ProgressBand::from_percent(49.9), ProgressBand::Behind);
  }

  #[test]
  fn month_bounds_cover_the_whole_month() {
    let day = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).unwrap();
    assert_eq!(month_bounds(2, 2024).unwrap(), (day(2024, 2, 1), day(2024, 2, 29)));
    assert_eq!(month_bounds(12, 2023).unwrap(), (day(2023, 12, 1), day(2023, 12, 31)));
    assert!(matches!(month_bounds(13, 2024), Err(ErpError::Validation(_))));
    assert!(matches!(month_bounds(0, 2024), Err(ErpError::Validation(_))));
  }

  #[tokio::test]
  async fn planning_progress_computes_percent_for_this_year() {
    let (service, transport) = logged_in_service().await;
    transport.push_result(json!([{"id": 42}]));
    transport.push_result(json!([
      {
        "id": 1,
        "name": "Q2",
        "employee_id": [42, "Alice"],
        "department_id": false,
        "start_date": "2024-04-01",
        "end_date": "2024-06-30",
        "target_points": 40,
        "planned_points": 38,
        "achieve_points": 30
      },
      {
        "id": 2,
        "name": "Q1",
        "employee_id": [42, "Alice"],
        "department_id": [3, "Engineering"],
        "start_date": "2024-01-01",
        "end_date": "2024-03-31",
        "target_points": 0,
        "planned_points": 0,
        "achieve_points": 5
      }
    ]));

    let progress = service.planning_progress(5).await.unwrap();
    assert_eq!(progress.len(), 2);
    assert_eq!(progress[0].percent_achieved, 75);
    assert_eq!(progress[0].band, ProgressBand::Good);
    assert_eq!(progress[0].department_id, None);
    assert_eq!(progress[1].percent_achieved, 0);
    assert_eq!(progress[1].band, ProgressBand::Behind);

    assert_eq!(
      domain_of(&transport, 2),
      json!([
        ["employee_id", "=", 42],
        ["start_date", ">=", "2024-01-01"],
        ["start_date", "<=", "2024-12-31"]
      ])
    );
    let kwargs = kwargs_of(&transport, 2);
    assert_eq!(kwargs["limit"], 5);
    assert_eq!(kwargs["order"], "start_date desc");

    // Served from the cache the second time
    service.planning_progress(5).await.unwrap();
    assert_eq!(transport.call_count(), 3);
  }

  #[tokio::test]
  async fn planning_progress_without_employee_is_empty() {
    let (service, transport) = logged_in_service().await;
    transport.push_result(json!([]));

    assert!(service.planning_progress(5).await.unwrap().is_empty());
    assert_eq!(transport.call_count(), 2);
  }

  #[tokio::test]
  async fn project_updates_fetch_trend_and_lines() {
    let (service, transport) = logged_in_service().await;
    transport.push_result(json!([{"id": 42}]));
    transport.push_result(json!([{
      "id": 5,
      "name": "May",
      "department_id": [3, "Engineering"],
      "start_date": "2024-05-01",
      "end_date": "2024-05-31",
      "target_points": 20,
      "planned_points": 18,
      "achieve_points": 19,
      "achieve_percentage": 95,
      "planned_percentage": 60,
      "line_ids": [7],
      "slot_line_ids": []
    }]));
    transport.push_result(json!([
      {"id": 4, "name": "April", "start_date": "2024-04-01", "end_date": "2024-04-30",
       "target_points": 20, "achieve_points": 10, "achieve_percentage": 50},
      {"id": 5, "name": "May", "start_date": "2024-05-01", "end_date": "2024-05-31",
       "target_points": 20, "achieve_points": 19, "achieve_percentage": 95}
    ]));
    transport.push_result(json!([{
      "id": 7,
      "project_id": [3, "Site A"],
      "name": "Foundation",
      "previous_progress": 20,
      "update_progress": 45,
      "progress_point": 2.5
    }]));

    let updates = service.project_updates(5, 2024).await.unwrap();
    assert_eq!(updates.plans.len(), 1);
    assert_eq!(updates.plans[0].achieve_band, ProgressBand::Excellent);
    assert_eq!(updates.plans[0].planned_band, ProgressBand::Fair);
    assert_eq!(updates.trend.len(), 2);
    assert!(updates.slot_lines.is_empty());
    assert_eq!(updates.update_lines[0].update_progress, 45.0);
    assert_eq!(
      updates.update_lines[0].project_id.as_ref().map(Many2One::name),
      Some("Site A")
    );

    assert_eq!(
      transport.model_calls(),
      vec![
        ("hr.employee".to_string(), "search_read".to_string()),
        (PLANNING_MODEL.to_string(), "search_read".to_string()),
        (PLANNING_MODEL.to_string(), "search_read".to_string()),
        (UPDATE_LINE_MODEL.to_string(), "search_read".to_string()),
      ]
    );
    assert_eq!(
      domain_of(&transport, 2),
      json!([
        ["employee_id", "=", 42],
        ["start_date", ">=", "2024-05-01"],
        ["start_date", "<=", "2024-05-31"]
      ])
    );
    assert_eq!(
      domain_of(&transport, 3),
      json!([
        ["employee_id", "=", 42],
        ["start_date", ">=", "2023-12-01"],
        ["start_date", "<=", "2024-05-31"]
      ])
    );
    assert_eq!(kwargs_of(&transport, 3)["order"], "start_date asc");
    assert_eq!(domain_of(&transport, 4), json!([["id", "in", [7]]]));
  }

  #[tokio::test]
  async fn project_updates_reject_bad_months_before_any_request() {
    let (service, transport) = logged_in_service().await;

    let err = service.project_updates(13, 2024).await.unwrap_err();
    assert!(matches!(err, ErpError::Validation(_)));
    assert_eq!(transport.call_count(), 1);
  }
}
