//! Typed operations over the generic RPC transport.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use super::error::{ErpError, ErpResult};
use super::rpc::{RpcClient, ServiceCall, COMMON_SERVICE, OBJECT_SERVICE};
use super::session::{Session, SessionStore};

/// Model that stores uploaded files.
pub const ATTACHMENT_MODEL: &str = "ir.attachment";

/// Arguments for the general-purpose [`ErpClient::call`].
#[derive(Debug, Clone)]
pub struct CallParams {
  pub service: String,
  pub model: Option<String>,
  pub method: String,
  pub args: Vec<Value>,
  pub kwargs: Map<String, Value>,
}

impl CallParams {
  /// A model method call on the `object` service.
  pub fn model(model: &str, method: &str) -> Self {
    Self {
      service: OBJECT_SERVICE.to_string(),
      model: Some(model.to_string()),
      method: method.to_string(),
      args: Vec::new(),
      kwargs: Map::new(),
    }
  }

  /// An unauthenticated call on the `common` service.
  pub fn common(method: &str) -> Self {
    Self {
      service: COMMON_SERVICE.to_string(),
      model: None,
      method: method.to_string(),
      args: Vec::new(),
      kwargs: Map::new(),
    }
  }

  pub fn args(mut self, args: Vec<Value>) -> Self {
    self.args = args;
    self
  }

  pub fn kwargs(mut self, kwargs: Map<String, Value>) -> Self {
    self.kwargs = kwargs;
    self
  }
}

/// A `search_read` query.
#[derive(Debug, Clone, Default)]
pub struct SearchRead {
  pub model: String,
  pub domain: Vec<Value>,
  pub fields: Vec<String>,
  pub limit: Option<u32>,
  pub offset: Option<u32>,
  pub order: Option<String>,
  pub context: Map<String, Value>,
}

impl SearchRead {
  pub fn new(model: &str) -> Self {
    Self {
      model: model.to_string(),
      ..Self::default()
    }
  }

  /// Append one domain term, e.g. `json!(["user_id", "=", 7])` or an operator like `json!("|")`.
  pub fn filter(mut self, term: Value) -> Self {
    self.domain.push(term);
    self
  }

  pub fn fields(mut self, fields: &[&str]) -> Self {
    self.fields = fields.iter().map(|f| f.to_string()).collect();
    self
  }

  pub fn limit(mut self, limit: u32) -> Self {
    self.limit = Some(limit);
    self
  }

  pub fn offset(mut self, offset: u32) -> Self {
    self.offset = Some(offset);
    self
  }

  pub fn order(mut self, order: &str) -> Self {
    self.order = Some(order.to_string());
    self
  }
}

/// ERP client facade. Every operation is exactly one RPC round trip.
#[derive(Clone)]
pub struct ErpClient {
  rpc: RpcClient,
  session: Arc<SessionStore>,
}

impl ErpClient {
  pub fn new(rpc: RpcClient, session: Arc<SessionStore>) -> Self {
    Self { rpc, session }
  }

  pub fn session(&self) -> &Arc<SessionStore> {
    &self.session
  }

  /// General-purpose entry point.
  ///
  /// `common` calls need no session; everything else fails with `NotAuthenticated`
  /// before touching the network when nobody is logged in.
  pub async fn call(&self, params: CallParams) -> ErpResult<Value> {
    let call = self.service_call(params)?;
    self.rpc.send(call).await
  }

  /// [`call`](Self::call) for writes: access-rights and missing-model errors propagate.
  async fn mutate(&self, params: CallParams) -> ErpResult<Value> {
    let call = self.service_call(params)?;
    self.rpc.send_strict(call).await
  }

  fn service_call(&self, params: CallParams) -> ErpResult<ServiceCall> {
    let CallParams {
      service,
      model,
      method,
      args,
      kwargs,
    } = params;

    if service == COMMON_SERVICE {
      return Ok(ServiceCall::common(&method, args));
    }

    let session = self.session.require()?;
    Ok(match model {
      Some(model) => {
        debug!(model = %model, method = %method, args = args.len(), "ERP model call");
        ServiceCall::execute_kw(&session, &model, &method, args, kwargs)
      }
      None => ServiceCall::direct(&service, &method, args),
    })
  }

  /// `search_read`. Returns an empty list on any failure other than a missing session.
  pub async fn search_read(&self, query: SearchRead) -> ErpResult<Vec<Value>> {
    let session = self.session.require()?;
    let mut kwargs = base_kwargs(&session, &query.context);
    if !query.fields.is_empty() {
      kwargs.insert("fields".to_string(), json!(query.fields));
    }
    insert_paging(&mut kwargs, query.limit, query.offset, query.order.as_deref());

    let result = self
      .call(
        CallParams::model(&query.model, "search_read")
          .args(vec![Value::Array(query.domain)])
          .kwargs(kwargs),
      )
      .await
      .map(into_records);

    swallow(&query.model, "search_read", result)
  }

  /// `read` records by id. Same empty-on-failure policy as `search_read`.
  pub async fn read(&self, model: &str, ids: &[i64], fields: &[&str]) -> ErpResult<Vec<Value>> {
    let session = self.session.require()?;
    let mut kwargs = base_kwargs(&session, &Map::new());
    if !fields.is_empty() {
      kwargs.insert("fields".to_string(), json!(fields));
    }

    let result = self
      .call(
        CallParams::model(model, "read")
          .args(vec![json!(ids)])
          .kwargs(kwargs),
      )
      .await
      .map(into_records);

    swallow(model, "read", result)
  }

  /// `search` for ids. Same empty-on-failure policy as `search_read`.
  pub async fn search(
    &self,
    model: &str,
    domain: Vec<Value>,
    limit: Option<u32>,
    offset: Option<u32>,
    order: Option<&str>,
  ) -> ErpResult<Vec<i64>> {
    let session = self.session.require()?;
    let mut kwargs = base_kwargs(&session, &Map::new());
    insert_paging(&mut kwargs, limit, offset, order);

    let result = self
      .call(
        CallParams::model(model, "search")
          .args(vec![Value::Array(domain)])
          .kwargs(kwargs),
      )
      .await
      .and_then(decode_list);

    swallow(model, "search", result)
  }

  /// `name_get`: `(id, display name)` pairs.
  pub async fn name_get(&self, model: &str, ids: &[i64]) -> ErpResult<Vec<(i64, String)>> {
    let session = self.session.require()?;
    let kwargs = base_kwargs(&session, &Map::new());

    let result = self
      .call(
        CallParams::model(model, "name_get")
          .args(vec![json!(ids)])
          .kwargs(kwargs),
      )
      .await
      .and_then(decode_list);

    swallow(model, "name_get", result)
  }

  /// `name_search` with args `[name, domain, operator]`; operator defaults to `ilike`.
  pub async fn name_search(
    &self,
    model: &str,
    name: &str,
    domain: Vec<Value>,
    operator: Option<&str>,
    limit: Option<u32>,
  ) -> ErpResult<Vec<(i64, String)>> {
    let session = self.session.require()?;
    let mut kwargs = base_kwargs(&session, &Map::new());
    if let Some(limit) = limit {
      kwargs.insert("limit".to_string(), json!(limit));
    }

    let result = self
      .call(
        CallParams::model(model, "name_search")
          .args(vec![
            json!(name),
            Value::Array(domain),
            json!(operator.unwrap_or("ilike")),
          ])
          .kwargs(kwargs),
      )
      .await
      .and_then(decode_list);

    swallow(model, "name_search", result)
  }

  /// `create` one record and return its id.
  pub async fn create(&self, model: &str, values: Map<String, Value>) -> ErpResult<i64> {
    let session = self.session.require()?;
    let kwargs = base_kwargs(&session, &Map::new());

    let result = self
      .mutate(
        CallParams::model(model, "create")
          .args(vec![Value::Object(values)])
          .kwargs(kwargs),
      )
      .await
      .and_then(decode);

    if let Err(e) = &result {
      warn!(model, error = %e, "create failed");
    }
    result
  }

  /// `write` values onto records.
  pub async fn write(
    &self,
    model: &str,
    ids: &[i64],
    values: Map<String, Value>,
  ) -> ErpResult<bool> {
    let session = self.session.require()?;
    let kwargs = base_kwargs(&session, &Map::new());

    let result = self
      .mutate(
        CallParams::model(model, "write")
          .args(vec![json!(ids), Value::Object(values)])
          .kwargs(kwargs),
      )
      .await
      .and_then(decode);

    if let Err(e) = &result {
      warn!(model, error = %e, "write failed");
    }
    result
  }

  /// `unlink` (delete) records.
  pub async fn unlink(&self, model: &str, ids: &[i64]) -> ErpResult<bool> {
    let session = self.session.require()?;
    let kwargs = base_kwargs(&session, &Map::new());

    let result = self
      .mutate(
        CallParams::model(model, "unlink")
          .args(vec![json!(ids)])
          .kwargs(kwargs),
      )
      .await
      .and_then(decode);

    if let Err(e) = &result {
      warn!(model, error = %e, "unlink failed");
    }
    result
  }

  /// Upload a file as an attachment linked to `res_model`/`res_id`.
  pub async fn upload_attachment(
    &self,
    content: &[u8],
    file_name: &str,
    mime_type: &str,
    res_model: &str,
    res_id: i64,
  ) -> ErpResult<i64> {
    self.session.require()?;

    let mut values = Map::new();
    values.insert("name".to_string(), json!(file_name));
    values.insert("datas".to_string(), json!(BASE64_STANDARD.encode(content)));
    values.insert("res_model".to_string(), json!(res_model));
    values.insert("res_id".to_string(), json!(res_id));
    values.insert("mimetype".to_string(), json!(mime_type));

    debug!(file_name, bytes = content.len(), res_model, res_id, "Uploading attachment");

    self
      .create(ATTACHMENT_MODEL, values)
      .await
      .map_err(|e| match e {
        ErpError::NotAuthenticated => ErpError::NotAuthenticated,
        other => ErpError::Upload(other.to_string()),
      })
  }
}

/// Keyword args every model call starts from: the session context, then per-call overrides.
fn base_kwargs(session: &Session, context: &Map<String, Value>) -> Map<String, Value> {
  let mut merged = session.context.clone();
  merged.extend(context.iter().map(|(k, v)| (k.clone(), v.clone())));

  let mut kwargs = Map::new();
  kwargs.insert("context".to_string(), Value::Object(merged));
  kwargs
}

fn insert_paging(
  kwargs: &mut Map<String, Value>,
  limit: Option<u32>,
  offset: Option<u32>,
  order: Option<&str>,
) {
  if let Some(limit) = limit {
    kwargs.insert("limit".to_string(), json!(limit));
  }
  if let Some(offset) = offset {
    kwargs.insert("offset".to_string(), json!(offset));
  }
  if let Some(order) = order.filter(|o| !o.is_empty()) {
    kwargs.insert("order".to_string(), json!(order));
  }
}

/// Null or non-list results are treated as "no records".
fn into_records(value: Value) -> Vec<Value> {
  match value {
    Value::Array(records) => records,
    _ => Vec::new(),
  }
}

fn decode<T: DeserializeOwned>(value: Value) -> ErpResult<T> {
  Ok(serde_json::from_value(value)?)
}

fn decode_list<T: DeserializeOwned>(value: Value) -> ErpResult<Vec<T>> {
  if value.is_null() {
    return Ok(Vec::new());
  }
  decode(value)
}

/// Convert failures into an empty result, keeping `NotAuthenticated` visible.
fn swallow<T: Default>(model: &str, operation: &str, result: ErpResult<T>) -> ErpResult<T> {
  match result {
    Err(ErpError::NotAuthenticated) => Err(ErpError::NotAuthenticated),
    Err(e) => {
      warn!(
        target: "ess::suppressed",
        model,
        operation,
        error = %e,
        "ERP call failed, returning empty result"
      );
      Ok(T::default())
    }
    ok => ok,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::erp::rpc::RpcClient;
  use crate::erp::testing::{rpc_error, ScriptedTransport};
  use crate::storage::MemoryStore;

  async fn logged_in() -> (ErpClient, Arc<ScriptedTransport>) {
    let transport = Arc::new(ScriptedTransport::new());
    let rpc = RpcClient::new(transport.clone());
    let session = Arc::new(SessionStore::new(
      rpc.clone(),
      Arc::new(MemoryStore::new()),
      "erp_prod",
      Map::new(),
    ));
    transport.push_result(json!(9));
    session.login("alice", "pw", None).await.unwrap();
    (ErpClient::new(rpc, session), transport)
  }

  fn logged_out() -> (ErpClient, Arc<ScriptedTransport>) {
    let transport = Arc::new(ScriptedTransport::new());
    let rpc = RpcClient::new(transport.clone());
    let session = Arc::new(SessionStore::new(
      rpc.clone(),
      Arc::new(MemoryStore::new()),
      "erp_prod",
      Map::new(),
    ));
    (ErpClient::new(rpc, session), transport)
  }

  #[tokio::test]
  async fn model_call_without_session_makes_no_request() {
    let (client, transport) = logged_out();

    let err = client
      .call(CallParams::model("hr.employee", "search_read"))
      .await
      .unwrap_err();
    assert!(matches!(err, ErpError::NotAuthenticated));

    let err = client
      .search_read(SearchRead::new("hr.employee"))
      .await
      .unwrap_err();
    assert!(matches!(err, ErpError::NotAuthenticated));

    let err = client
      .upload_attachment(b"x", "a.txt", "text/plain", "hr.expense", 1)
      .await
      .unwrap_err();
    assert!(matches!(err, ErpError::NotAuthenticated));

    assert_eq!(transport.call_count(), 0);
  }

  #[tokio::test]
  async fn common_call_needs_no_session() {
    let (client, transport) = logged_out();
    transport.push_result(json!({"server_version": "16.0"}));

    let value = client.call(CallParams::common("version")).await.unwrap();
    assert_eq!(value["server_version"], "16.0");
  }

  #[tokio::test]
  async fn search_read_builds_execute_kw_envelope() {
    let (client, transport) = logged_in().await;
    transport.push_result(json!([{"id": 1, "name": "Alice"}]));

    let records = client
      .search_read(
        SearchRead::new("hr.employee")
          .filter(json!(["user_id", "=", 9]))
          .fields(&["id", "name"])
          .limit(1)
          .order("id desc"),
      )
      .await
      .unwrap();

    assert_eq!(records.len(), 1);
    let args = &transport.requests()[1]["params"]["args"];
    assert_eq!(transport.requests()[1]["params"]["method"], "execute_kw");
    assert_eq!(args[0], "erp_prod");
    assert_eq!(args[1], 9);
    assert_eq!(args[2], "pw");
    assert_eq!(args[3], "hr.employee");
    assert_eq!(args[4], "search_read");
    assert_eq!(args[5], json!([[["user_id", "=", 9]]]));
    assert_eq!(
      args[6],
      json!({"context": {}, "fields": ["id", "name"], "limit": 1, "order": "id desc"})
    );
  }

  #[tokio::test]
  async fn search_read_swallows_missing_model_and_other_failures() {
    let (client, transport) = logged_in().await;
    transport.push_error(rpc_error(
      "Odoo Server Error",
      Some("Object hr.employee.public does not exist"),
    ));
    transport.push_error(rpc_error(
      "You do not have access rights on hr.payslip",
      None,
    ));
    transport.push_error(rpc_error("Odoo Server Error", Some("Invalid domain")));
    transport.push_http_error(502, "Bad Gateway");
    transport.push_result(Value::Null);

    for _ in 0..5 {
      let records = client
        .search_read(SearchRead::new("hr.employee.public"))
        .await
        .unwrap();
      assert!(records.is_empty());
    }
  }

  #[tokio::test]
  async fn list_wrappers_decode_results() {
    let (client, transport) = logged_in().await;
    transport.push_result(json!([3, 5]));
    transport.push_result(json!([[3, "Alice"], [5, "Bob"]]));
    transport.push_result(json!([[5, "Bob"]]));
    transport.push_result(json!("garbage"));

    let ids = client
      .search("hr.employee", vec![], Some(2), None, None)
      .await
      .unwrap();
    assert_eq!(ids, vec![3, 5]);

    let names = client.name_get("hr.employee", &ids).await.unwrap();
    assert_eq!(names, vec![(3, "Alice".to_string()), (5, "Bob".to_string())]);

    let found = client
      .name_search("hr.employee", "bo", vec![], None, Some(5))
      .await
      .unwrap();
    assert_eq!(found, vec![(5, "Bob".to_string())]);
    let args = &transport.requests()[3]["params"]["args"];
    assert_eq!(args[5], json!(["bo", [], "ilike"]));
    assert_eq!(args[6]["limit"], 5);

    // Undecodable result degrades to empty
    let ids = client
      .search("hr.employee", vec![], None, None, None)
      .await
      .unwrap();
    assert!(ids.is_empty());
  }

  #[tokio::test]
  async fn mutations_propagate_errors() {
    let (client, transport) = logged_in().await;
    transport.push_error(rpc_error("Odoo Server Error", Some("Check out before check in")));
    transport.push_http_error(500, "Internal Server Error");
    transport.push_error(rpc_error("Record is used elsewhere", None));

    let err = client
      .write("hr.attendance", &[1], Map::new())
      .await
      .unwrap_err();
    assert!(matches!(err, ErpError::Rpc { .. }));

    let err = client.create("hr.leave", Map::new()).await.unwrap_err();
    assert!(matches!(err, ErpError::Transport { status: Some(500), .. }));

    let err = client.unlink("hr.expense", &[4]).await.unwrap_err();
    assert!(matches!(err, ErpError::Rpc { .. }));
  }

  #[tokio::test]
  async fn mutations_keep_access_rights_errors() {
    let (client, transport) = logged_in().await;
    transport.push_error(rpc_error("You do not have access rights to create hr.leave", None));
    transport.push_error(rpc_error(
      "Odoo Server Error",
      Some("Record hr.expense(4,) does not exist or has been deleted"),
    ));
    transport.push_error(rpc_error("You do not have access rights to create ir.attachment", None));

    match client.create("hr.leave", Map::new()).await {
      Err(ErpError::Rpc { message, .. }) => {
        assert_eq!(message, "You do not have access rights to create hr.leave");
      }
      other => panic!("expected rpc error, got {:?}", other),
    }

    let err = client.unlink("hr.expense", &[4]).await.unwrap_err();
    assert!(matches!(err, ErpError::Rpc { .. }));

    match client
      .upload_attachment(b"x", "x.pdf", "application/pdf", "hr.expense", 4)
      .await
    {
      Err(ErpError::Upload(cause)) => assert!(cause.contains("access rights")),
      other => panic!("expected upload error, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn create_write_unlink_shape_args() {
    let (client, transport) = logged_in().await;
    transport.push_result(json!(11));
    transport.push_result(json!(true));
    transport.push_result(json!(true));

    let mut values = Map::new();
    values.insert("name".to_string(), json!("Taxi"));
    assert_eq!(client.create("hr.expense", values.clone()).await.unwrap(), 11);
    assert!(client.write("hr.expense", &[11], values).await.unwrap());
    assert!(client.unlink("hr.expense", &[11]).await.unwrap());

    let requests = transport.requests();
    assert_eq!(requests[1]["params"]["args"][5], json!([{"name": "Taxi"}]));
    assert_eq!(requests[2]["params"]["args"][5], json!([[11], {"name": "Taxi"}]));
    assert_eq!(requests[3]["params"]["args"][5], json!([[11]]));
  }

  #[tokio::test]
  async fn upload_of_empty_file_issues_one_create() {
    let (client, transport) = logged_in().await;
    transport.push_result(json!(77));

    let id = client
      .upload_attachment(&[], "empty.pdf", "application/pdf", "hr.expense", 5)
      .await
      .unwrap();

    assert_eq!(id, 77);
    assert_eq!(
      transport.model_calls(),
      vec![("ir.attachment".to_string(), "create".to_string())]
    );
    let values = &transport.requests()[1]["params"]["args"][5][0];
    assert_eq!(values["datas"], "");
    assert_eq!(values["name"], "empty.pdf");
    assert_eq!(values["res_model"], "hr.expense");
    assert_eq!(values["res_id"], 5);
    assert_eq!(values["mimetype"], "application/pdf");
  }

  #[tokio::test]
  async fn upload_encodes_base64_and_maps_failures() {
    let (client, transport) = logged_in().await;
    transport.push_http_error(413, "Payload Too Large");

    let err = client
      .upload_attachment(b"hello", "h.txt", "text/plain", "hr.expense", 5)
      .await
      .unwrap_err();
    assert!(matches!(err, ErpError::Upload(_)));
    assert_eq!(
      transport.requests()[1]["params"]["args"][5][0]["datas"],
      "aGVsbG8="
    );
  }
}
