//! Who the employee is, where they work, and what the company is announcing.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

use super::records::{decode_records, optional, Many2One};
use super::{EssService, EMPLOYEE_MODEL};
use crate::cache::query_key;
use crate::erp::{ErpResult, SearchRead};
use crate::tz::{parse_erp, LocalTime, ERP_DATE_FORMAT};

const PUBLIC_EMPLOYEE_MODEL: &str = "hr.employee.public";
const COMPANY_MODEL: &str = "res.company";
const USER_MODEL: &str = "res.users";
const CHANNEL_MODEL: &str = "mail.channel";
const MESSAGE_MODEL: &str = "mail.message";
const CALENDAR_MODEL: &str = "calendar.event";

/// Channel whose messages are company announcements.
const ANNOUNCEMENT_CHANNEL: &str = "Pengumuman";

const PROFILE_STALE: Duration = Duration::from_secs(5 * 60);
const COMPANY_STALE: Duration = Duration::from_secs(60 * 60);
const CALENDAR_STALE: Duration = Duration::from_secs(5 * 60);

const PROFILE_FIELDS: [&str; 8] = [
  "name",
  "job_title",
  "department_id",
  "work_email",
  "mobile_phone",
  "work_phone",
  "registration_number",
  "image_128",
];
const COMPANY_FIELDS: [&str; 10] = [
  "name", "street", "street2", "city", "zip", "country_id", "state_id", "email", "phone", "logo",
];
const MESSAGE_FIELDS: [&str; 5] = ["body", "date", "author_id", "tracking_value_ids", "subtype_id"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
  #[serde(default)]
  pub id: i64,
  #[serde(default)]
  pub name: String,
  #[serde(default, deserialize_with = "optional")]
  pub job_title: Option<String>,
  #[serde(default, deserialize_with = "optional")]
  pub department_id: Option<Many2One>,
  #[serde(default, deserialize_with = "optional")]
  pub work_email: Option<String>,
  #[serde(default, deserialize_with = "optional")]
  pub mobile_phone: Option<String>,
  #[serde(default, deserialize_with = "optional")]
  pub work_phone: Option<String>,
  #[serde(default, deserialize_with = "optional")]
  pub registration_number: Option<String>,
  /// Base64 avatar
  #[serde(default, deserialize_with = "optional")]
  pub image_128: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
  #[serde(default)]
  pub id: i64,
  #[serde(default)]
  pub name: String,
  #[serde(default, deserialize_with = "optional")]
  pub street: Option<String>,
  #[serde(default, deserialize_with = "optional")]
  pub street2: Option<String>,
  #[serde(default, deserialize_with = "optional")]
  pub city: Option<String>,
  #[serde(default, deserialize_with = "optional")]
  pub zip: Option<String>,
  #[serde(default, deserialize_with = "optional")]
  pub country_id: Option<Many2One>,
  #[serde(default, deserialize_with = "optional")]
  pub state_id: Option<Many2One>,
  #[serde(default, deserialize_with = "optional")]
  pub email: Option<String>,
  #[serde(default, deserialize_with = "optional")]
  pub phone: Option<String>,
  #[serde(default, deserialize_with = "optional")]
  pub logo: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Announcement {
  #[serde(default)]
  pub id: i64,
  /// HTML
  #[serde(default, deserialize_with = "optional")]
  pub body: Option<String>,
  #[serde(default)]
  pub date: String,
  #[serde(default, deserialize_with = "optional")]
  pub author_id: Option<Many2One>,
  #[serde(default, deserialize_with = "optional")]
  pub subtype_id: Option<Many2One>,
  #[serde(default)]
  pub tracking_value_ids: Vec<i64>,
  /// `"<author> - <local date>"`; messages carry no subject of their own
  #[serde(default)]
  pub subject: String,
}

impl Announcement {
  fn with_subject(mut self, tz: &LocalTime) -> Self {
    let author = self
      .author_id
      .as_ref()
      .map(Many2One::name)
      .unwrap_or("System");
    let date = parse_erp(&self.date)
      .map(|posted| tz.local_date(posted).format(ERP_DATE_FORMAT).to_string())
      .unwrap_or_else(|| self.date.clone());
    self.subject = format!("{} - {}", author, date);
    self
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
  #[serde(default)]
  pub id: i64,
  #[serde(default)]
  pub name: String,
  #[serde(default, deserialize_with = "optional")]
  pub start: Option<String>,
  #[serde(default, deserialize_with = "optional")]
  pub stop: Option<String>,
  #[serde(default)]
  pub allday: bool,
  #[serde(default, deserialize_with = "optional")]
  pub location: Option<String>,
  #[serde(default, deserialize_with = "optional")]
  pub description: Option<String>,
}

#[derive(Deserialize)]
struct EmployeeCompany {
  #[serde(default, deserialize_with = "optional")]
  company_id: Option<Many2One>,
}

#[derive(Deserialize)]
struct UserPartner {
  #[serde(default, deserialize_with = "optional")]
  partner_id: Option<Many2One>,
}

#[derive(Deserialize)]
struct ChannelRef {
  id: i64,
}

impl EssService {
  /// The employee card, from the public employee directory when it is readable.
  pub async fn profile(&self) -> ErpResult<Option<Profile>> {
    let session = self.session()?;

    self
      .cached(query_key!("user", "profile"), PROFILE_STALE, || async move {
        for model in [PUBLIC_EMPLOYEE_MODEL, EMPLOYEE_MODEL] {
          let records = self
            .client
            .search_read(
              SearchRead::new(model)
                .filter(json!(["user_id", "=", session.user_id]))
                .fields(&PROFILE_FIELDS),
            )
            .await?;
          if let Some(profile) = decode_records::<Profile>(model, records).into_iter().next() {
            return Ok(Some(profile));
          }
        }
        Ok(None)
      })
      .await
  }

  /// The employee's company, or the first company when the employee has none.
  pub async fn company(&self) -> ErpResult<Option<Company>> {
    let session = self.session()?;

    self
      .cached(query_key!("company", "details"), COMPANY_STALE, || async move {
        let employees = self
          .client
          .search_read(
            SearchRead::new(EMPLOYEE_MODEL)
              .filter(json!(["user_id", "=", session.user_id]))
              .fields(&["company_id"])
              .limit(1),
          )
          .await?;
        let company_id = decode_records::<EmployeeCompany>(EMPLOYEE_MODEL, employees)
          .into_iter()
          .next()
          .and_then(|employee| employee.company_id);

        let query = match company_id {
          Some(company) => SearchRead::new(COMPANY_MODEL)
            .filter(json!(["id", "=", company.id()]))
            .fields(&COMPANY_FIELDS),
          None => SearchRead::new(COMPANY_MODEL)
            .fields(&COMPANY_FIELDS)
            .limit(1),
        };
        let companies = self.client.search_read(query).await?;
        Ok(decode_records(COMPANY_MODEL, companies).into_iter().next())
      })
      .await
  }

  /// Latest messages of the announcement channel, or company-wide notifications without one.
  pub async fn announcements(&self, limit: u32) -> ErpResult<Vec<Announcement>> {
    let stale_time = self.cache.default_stale_time();

    self
      .cached(query_key!("announcements", limit), stale_time, || async move {
        let channels = self
          .client
          .search_read(
            SearchRead::new(CHANNEL_MODEL)
              .filter(json!(["name", "like", ANNOUNCEMENT_CHANNEL]))
              .fields(&["id", "name"])
              .limit(1),
          )
          .await?;
        let channel = decode_records::<ChannelRef>(CHANNEL_MODEL, channels)
          .into_iter()
          .next();

        let query = SearchRead::new(MESSAGE_MODEL).filter(json!(["model", "=", CHANNEL_MODEL]));
        let query = match channel {
          Some(channel) => query
            .filter(json!(["res_id", "=", channel.id]))
            .filter(json!(["message_type", "in", ["notification", "comment"]])),
          None => query.filter(json!(["message_type", "=", "notification"])),
        };

        let messages = self
          .client
          .search_read(query.fields(&MESSAGE_FIELDS).limit(limit).order("date desc"))
          .await?;
        Ok(
          decode_records::<Announcement>(MESSAGE_MODEL, messages)
            .into_iter()
            .map(|message| message.with_subject(&self.tz))
            .collect::<Vec<_>>(),
        )
      })
      .await
  }

  /// Upcoming events the user attends, starting from local midnight today.
  pub async fn calendar_events(&self, limit: u32) -> ErpResult<Vec<CalendarEvent>> {
    let session = self.session()?;

    self
      .cached(query_key!("calendar-events", limit), CALENDAR_STALE, || async move {
        let users = self
          .client
          .read(USER_MODEL, &[session.user_id], &["partner_id"])
          .await?;
        let Some(partner) = decode_records::<UserPartner>(USER_MODEL, users)
          .into_iter()
          .next()
          .and_then(|user| user.partner_id)
        else {
          return Ok(Vec::new());
        };
        let (day_start, _) = self.tz.today_bounds(self.now());

        let events = self
          .client
          .search_read(
            SearchRead::new(CALENDAR_MODEL)
              .filter(json!(["attendee_ids.partner_id", "=", partner.id()]))
              .filter(json!(["start", ">=", day_start]))
              .fields(&["name", "start", "stop", "allday", "location", "description"])
              .limit(limit)
              .order("start asc"),
          )
          .await?;
        Ok(decode_records(CALENDAR_MODEL, events))
      })
      .await
  }
}
