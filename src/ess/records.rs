//! Helpers for decoding ERP records into typed structs.

use serde::de::{self, DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// A many2one reference as the ERP returns it: `[id, display name]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Many2One(pub i64, pub String);

impl Many2One {
  pub fn id(&self) -> i64 {
    self.0
  }

  pub fn name(&self) -> &str {
    &self.1
  }
}

/// Unset ERP fields come back as `false` rather than null.
pub(crate) fn optional<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
  D: Deserializer<'de>,
  T: DeserializeOwned,
{
  match Value::deserialize(deserializer)? {
    Value::Null | Value::Bool(false) => Ok(None),
    value => serde_json::from_value(value)
      .map(Some)
      .map_err(de::Error::custom),
  }
}

/// Decode a record list, skipping rows that don't fit `T`.
pub(crate) fn decode_records<T: DeserializeOwned>(model: &str, records: Vec<Value>) -> Vec<T> {
  records
    .into_iter()
    .filter_map(|record| match serde_json::from_value(record) {
      Ok(decoded) => Some(decoded),
      Err(e) => {
        warn!(target: "ess::suppressed", model, error = %e, "Skipping undecodable record");
        None
      }
    })
    .collect()
}

pub(crate) fn round2(value: f64) -> f64 {
  (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[derive(Debug, Deserialize, Serialize, PartialEq)]
  struct Row {
    id: i64,
    #[serde(default, deserialize_with = "optional")]
    department_id: Option<Many2One>,
    #[serde(default, deserialize_with = "optional")]
    job_title: Option<String>,
  }

  #[test]
  fn false_and_null_mean_unset() {
    let rows: Vec<Row> = decode_records(
      "hr.employee",
      vec![
        json!({"id": 1, "department_id": [4, "R&D"], "job_title": "Engineer"}),
        json!({"id": 2, "department_id": false, "job_title": false}),
        json!({"id": 3}),
      ],
    );

    assert_eq!(rows[0].department_id, Some(Many2One(4, "R&D".to_string())));
    assert_eq!(rows[0].job_title.as_deref(), Some("Engineer"));
    assert_eq!(rows[1].department_id, None);
    assert_eq!(rows[2].job_title, None);
  }

  #[test]
  fn typed_rows_survive_a_trip_through_the_cache_representation() {
    let row = Row {
      id: 1,
      department_id: Some(Many2One(4, "R&D".to_string())),
      job_title: None,
    };
    let value = serde_json::to_value(&row).unwrap();
    assert_eq!(value["department_id"], json!([4, "R&D"]));
    assert_eq!(serde_json::from_value::<Row>(value).unwrap(), row);
  }

  #[test]
  fn bad_rows_are_skipped() {
    let rows: Vec<Row> = decode_records(
      "hr.employee",
      vec![json!({"id": "x"}), json!({"id": 5, "department_id": false})],
    );
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, 5);
  }

  #[test]
  fn rounds_to_two_places() {
    assert_eq!(round2(7.456), 7.46);
    assert_eq!(round2(0.0), 0.0);
  }
}
