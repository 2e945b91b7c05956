//! Expense claims: listing, drafting, deleting and attaching receipts.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::info;

use super::records::{decode_records, optional, Many2One};
use super::EssService;
use crate::cache::query_key;
use crate::erp::{ErpError, ErpResult, SearchRead};
use crate::tz::ERP_DATE_FORMAT;

const EXPENSE_MODEL: &str = "hr.expense";
const PRODUCT_MODEL: &str = "product.product";
const EXPENSE_TYPE_SCAN_LIMIT: u32 = 100;

const EXPENSE_FIELDS: [&str; 13] = [
  "name",
  "employee_id",
  "total_amount",
  "date",
  "state",
  "activity_state",
  "currency_id",
  "description",
  "product_id",
  "unit_amount",
  "quantity",
  "payment_mode",
  "reference",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expense {
  #[serde(default)]
  pub id: i64,
  #[serde(default, deserialize_with = "optional")]
  pub name: Option<String>,
  #[serde(default, deserialize_with = "optional")]
  pub employee_id: Option<Many2One>,
  #[serde(default)]
  pub total_amount: f64,
  #[serde(default, deserialize_with = "optional")]
  pub date: Option<String>,
  #[serde(default, deserialize_with = "optional")]
  pub state: Option<String>,
  #[serde(default, deserialize_with = "optional")]
  pub activity_state: Option<String>,
  #[serde(default, deserialize_with = "optional")]
  pub currency_id: Option<Many2One>,
  #[serde(default, deserialize_with = "optional")]
  pub description: Option<String>,
  #[serde(default, deserialize_with = "optional")]
  pub product_id: Option<Many2One>,
  #[serde(default)]
  pub unit_amount: f64,
  #[serde(default)]
  pub quantity: f64,
  #[serde(default, deserialize_with = "optional")]
  pub payment_mode: Option<String>,
  #[serde(default, deserialize_with = "optional")]
  pub reference: Option<String>,
  #[serde(default, deserialize_with = "optional")]
  pub analytic_distribution: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpenseProduct {
  pub id: i64,
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub lst_price: f64,
  #[serde(default, deserialize_with = "optional")]
  pub default_code: Option<String>,
}

/// A product already used on some expense.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpenseType {
  pub id: i64,
  pub name: String,
}

#[derive(Deserialize)]
struct ProductRef {
  #[serde(default, deserialize_with = "optional")]
  product_id: Option<Many2One>,
}

/// A draft expense to file for the logged-in employee.
#[derive(Debug, Clone, Default)]
pub struct NewExpense {
  pub name: String,
  pub product_id: Option<i64>,
  pub total_amount: f64,
  /// Defaults to `total_amount`
  pub unit_amount: Option<f64>,
  /// Defaults to 1
  pub quantity: Option<f64>,
  /// Defaults to today (local)
  pub date: Option<NaiveDate>,
  pub description: Option<String>,
  pub reference: Option<String>,
  /// Defaults to `own_account`
  pub payment_mode: Option<String>,
}

impl NewExpense {
  fn values(
    &self,
    employee_id: i64,
    currency_id: i64,
    today: NaiveDate,
  ) -> ErpResult<Map<String, Value>> {
    if self.name.trim().is_empty() {
      return Err(ErpError::Validation("Expense needs a description".to_string()));
    }
    if !self.total_amount.is_finite() || self.total_amount < 0.0 {
      return Err(ErpError::Validation(format!(
        "Invalid expense amount: {}",
        self.total_amount
      )));
    }

    let date = self.date.unwrap_or(today);
    let mut values = Map::new();
    values.insert("name".to_string(), json!(self.name));
    values.insert("employee_id".to_string(), json!(employee_id));
    values.insert("state".to_string(), json!("draft"));
    values.insert("activity_state".to_string(), json!("draft"));
    values.insert("currency_id".to_string(), json!(currency_id));
    values.insert(
      "date".to_string(),
      json!(date.format(ERP_DATE_FORMAT).to_string()),
    );
    values.insert("total_amount".to_string(), json!(self.total_amount));
    values.insert(
      "unit_amount".to_string(),
      json!(self.unit_amount.unwrap_or(self.total_amount)),
    );
    values.insert("quantity".to_string(), json!(self.quantity.unwrap_or(1.0)));
    values.insert(
      "payment_mode".to_string(),
      json!(self.payment_mode.as_deref().unwrap_or("own_account")),
    );
    if let Some(product_id) = self.product_id {
      values.insert("product_id".to_string(), json!(product_id));
    }
    if let Some(description) = &self.description {
      values.insert("description".to_string(), json!(description));
    }
    if let Some(reference) = &self.reference {
      values.insert("reference".to_string(), json!(reference));
    }

    Ok(values)
  }
}

/// Distinct products in first-seen order.
fn distinct_products(records: Vec<ProductRef>) -> Vec<ExpenseType> {
  let mut types: Vec<ExpenseType> = Vec::new();
  for product in records.into_iter().filter_map(|r| r.product_id) {
    if !types.iter().any(|t| t.id == product.id()) {
      types.push(ExpenseType {
        id: product.0,
        name: product.1,
      });
    }
  }
  types
}

impl EssService {
  /// The employee's expenses, newest first.
  pub async fn expenses(&self, limit: u32) -> ErpResult<Vec<Expense>> {
    let session = self.session()?;
    let stale_time = self.cache.default_stale_time();

    self
      .cached(query_key!("expenses", limit), stale_time, || async move {
        let records = self
          .client
          .search_read(
            SearchRead::new(EXPENSE_MODEL)
              .filter(json!(["employee_id.user_id", "=", session.user_id]))
              .fields(&EXPENSE_FIELDS)
              .limit(limit)
              .offset(0)
              .order("date desc"),
          )
          .await?;
        Ok(decode_records(EXPENSE_MODEL, records))
      })
      .await
  }

  pub async fn expense(&self, expense_id: i64) -> ErpResult<Option<Expense>> {
    let stale_time = self.cache.default_stale_time();

    self
      .cached(
        query_key!("expense", "details", expense_id),
        stale_time,
        || async move {
          let mut fields = EXPENSE_FIELDS.to_vec();
          fields.push("analytic_distribution");

          let records = self
            .client
            .search_read(
              SearchRead::new(EXPENSE_MODEL)
                .filter(json!(["id", "=", expense_id]))
                .fields(&fields),
            )
            .await?;
          Ok(decode_records(EXPENSE_MODEL, records).into_iter().next())
        },
      )
      .await
  }

  /// Products that may be claimed as expenses.
  pub async fn expense_products(&self) -> ErpResult<Vec<ExpenseProduct>> {
    let stale_time = self.cache.default_stale_time();

    self
      .cached(query_key!("expenseProducts"), stale_time, || async move {
        let records = self
          .client
          .search_read(
            SearchRead::new(PRODUCT_MODEL)
              .filter(json!(["can_be_expensed", "=", true]))
              .fields(&["id", "name", "lst_price", "default_code"]),
          )
          .await?;
        Ok(decode_records(PRODUCT_MODEL, records))
      })
      .await
  }

  /// Products already used on expenses, one entry each.
  pub async fn expense_types(&self) -> ErpResult<Vec<ExpenseType>> {
    let stale_time = self.cache.default_stale_time();

    self
      .cached(query_key!("expenseTypes"), stale_time, || async move {
        let records = self
          .client
          .search_read(
            SearchRead::new(EXPENSE_MODEL)
              .fields(&["product_id", "name"])
              .limit(EXPENSE_TYPE_SCAN_LIMIT)
              .order("name asc"),
          )
          .await?;
        Ok(distinct_products(decode_records(EXPENSE_MODEL, records)))
      })
      .await
  }

  /// File a draft expense and return its id.
  pub async fn create_expense(&self, expense: &NewExpense) -> ErpResult<i64> {
    let employee_id = self.require_employee().await?;
    let today = self.today();
    let values = expense.values(employee_id, self.currency_id, today)?;

    let id = self.client.create(EXPENSE_MODEL, values).await?;
    self.invalidate(&[query_key!("expenses")]);
    info!(expense_id = id, amount = expense.total_amount, "Expense created");
    Ok(id)
  }

  pub async fn delete_expense(&self, expense_id: i64) -> ErpResult<bool> {
    let deleted = self.client.unlink(EXPENSE_MODEL, &[expense_id]).await?;
    self.invalidate(&[query_key!("expenses"), query_key!("expense")]);
    info!(expense_id, "Expense deleted");
    Ok(deleted)
  }

  /// Upload a receipt and link it to the expense. Returns the attachment id.
  pub async fn attach_receipt(
    &self,
    expense_id: i64,
    content: &[u8],
    file_name: &str,
    mime_type: &str,
  ) -> ErpResult<i64> {
    let attachment_id = self
      .client
      .upload_attachment(content, file_name, mime_type, EXPENSE_MODEL, expense_id)
      .await?;
    self.invalidate(&[query_key!("expense")]);
    info!(expense_id, attachment_id, file_name, "Receipt attached");
    Ok(attachment_id)
  }
}
