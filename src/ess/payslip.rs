use serde::{Deserialize, Serialize};
use serde_json::json;

use super::records::{decode_records, optional, Many2One};
use super::EssService;
use crate::cache::query_key;
use crate::erp::{ErpResult, SearchRead};

const PAYSLIP_MODEL: &str = "hr.payslip";
const PAYSLIP_LINE_MODEL: &str = "hr.payslip.line";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payslip {
  #[serde(default)]
  pub id: i64,
  #[serde(default, deserialize_with = "optional")]
  pub name: Option<String>,
  #[serde(default, deserialize_with = "optional")]
  pub number: Option<String>,
  #[serde(default, deserialize_with = "optional")]
  pub employee_id: Option<Many2One>,
  #[serde(default, deserialize_with = "optional")]
  pub date_from: Option<String>,
  #[serde(default, deserialize_with = "optional")]
  pub date_to: Option<String>,
  #[serde(default, deserialize_with = "optional")]
  pub state: Option<String>,
  #[serde(default)]
  pub net_wage: f64,
  #[serde(default)]
  pub line_ids: Vec<i64>,
  #[serde(default, deserialize_with = "optional")]
  pub company_id: Option<Many2One>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayslipLine {
  #[serde(default)]
  pub id: i64,
  #[serde(default, deserialize_with = "optional")]
  pub name: Option<String>,
  #[serde(default, deserialize_with = "optional")]
  pub code: Option<String>,
  #[serde(default, deserialize_with = "optional")]
  pub category_id: Option<Many2One>,
  #[serde(default)]
  pub quantity: f64,
  #[serde(default)]
  pub rate: f64,
  #[serde(default)]
  pub amount: f64,
  #[serde(default)]
  pub total: f64,
}

impl EssService {
  /// Most recent payslips first.
  pub async fn payslips(&self, limit: u32) -> ErpResult<Vec<Payslip>> {
    let session = self.session()?;
    let stale_time = self.cache.default_stale_time();

    self
      .cached(query_key!("payslips", limit), stale_time, || async move {
        let records = self
          .client
          .search_read(
            SearchRead::new(PAYSLIP_MODEL)
              .filter(json!(["employee_id.user_id", "=", session.user_id]))
              .fields(&[
                "name",
                "date_from",
                "date_to",
                "state",
                "number",
                "net_wage",
                "line_ids",
                "company_id",
              ])
              .limit(limit)
              .order("date_from desc"),
          )
          .await?;
        Ok(decode_records(PAYSLIP_MODEL, records))
      })
      .await
  }

  /// Salary rule lines of one payslip.
  pub async fn payslip_lines(&self, payslip_id: i64) -> ErpResult<Vec<PayslipLine>> {
    let stale_time = self.cache.default_stale_time();

    self
      .cached(
        query_key!("payslips", "details", payslip_id),
        stale_time,
        || async move {
          let records = self
            .client
            .search_read(
              SearchRead::new(PAYSLIP_LINE_MODEL)
                .filter(json!(["slip_id", "=", payslip_id]))
                .fields(&["name", "code", "category_id", "quantity", "rate", "amount", "total"]),
            )
            .await?;
          Ok(decode_records(PAYSLIP_LINE_MODEL, records))
        },
      )
      .await
  }

  pub async fn payslip(&self, payslip_id: i64) -> ErpResult<Option<Payslip>> {
    let stale_time = self.cache.default_stale_time();

    self
      .cached(query_key!("payslip", payslip_id), stale_time, || async move {
        let records = self
          .client
          .search_read(
            SearchRead::new(PAYSLIP_MODEL)
              .filter(json!(["id", "=", payslip_id]))
              .fields(&[
                "name",
                "employee_id",
                "date_from",
                "date_to",
                "state",
                "number",
                "net_wage",
                "company_id",
              ]),
          )
          .await?;
        Ok(decode_records(PAYSLIP_MODEL, records).into_iter().next())
      })
      .await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::erp::testing::rpc_error;
  use crate::ess::testing::*;

  #[tokio::test]
  async fn payslips_are_scoped_to_the_user() {
    let (service, transport) = logged_in_service().await;
    transport.push_result(json!([{
      "id": 4,
      "name": "Salary Slip - May 2024",
      "number": "SLIP/2024/005",
      "date_from": "2024-05-01",
      "date_to": "2024-05-31",
      "state": "done",
      "net_wage": 8500000,
      "line_ids": [10, 11],
      "company_id": [1, "ACME"]
    }]));

    let slips = service.payslips(5).await.unwrap();
    assert_eq!(slips[0].net_wage, 8_500_000.0);
    assert_eq!(slips[0].line_ids, vec![10, 11]);
    assert_eq!(slips[0].employee_id, None);
    assert_eq!(
      domain_of(&transport, 1),
      json!([["employee_id.user_id", "=", 9]])
    );
    assert_eq!(kwargs_of(&transport, 1)["order"], "date_from desc");

    service.payslips(5).await.unwrap();
    assert_eq!(transport.call_count(), 2);
  }

  #[tokio::test]
  async fn missing_payroll_module_means_no_payslips() {
    let (service, transport) = logged_in_service().await;
    transport.push_error(rpc_error(
      "Odoo Server Error",
      Some("Object hr.payslip doesn't exist"),
    ));
    transport.push_error(rpc_error(
      "Odoo Server Error",
      Some("Object hr.payslip.line does not exist"),
    ));

    assert!(service.payslips(5).await.unwrap().is_empty());
    assert!(service.payslip_lines(4).await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn single_payslip_and_its_lines() {
    let (service, transport) = logged_in_service().await;
    transport.push_result(json!([{
      "id": 4,
      "name": "Salary Slip - May 2024",
      "employee_id": [42, "Alice"],
      "number": false,
      "state": "draft",
      "net_wage": 100.5
    }]));
    transport.push_result(json!([
      {"id": 10, "name": "Basic", "code": "BASIC", "category_id": [1, "Basic"], "quantity": 1, "rate": 100, "amount": 100, "total": 100},
      {"id": 11, "name": "Net", "code": "NET", "category_id": false, "quantity": 1, "rate": 100, "amount": 100.5, "total": 100.5}
    ]));
    transport.push_result(json!([]));

    let slip = service.payslip(4).await.unwrap().unwrap();
    assert_eq!(slip.number, None);
    assert_eq!(slip.employee_id.as_ref().map(Many2One::id), Some(42));

    let lines = service.payslip_lines(4).await.unwrap();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[1].category_id, None);
    assert_eq!(domain_of(&transport, 2), json!([["slip_id", "=", 4]]));

    assert!(service.payslip(99).await.unwrap().is_none());
  }
}
