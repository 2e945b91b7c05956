//! JSON-RPC 2.0 envelopes and the transport that carries them to the ERP.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::error::{ErpError, ErpResult};
use super::session::Session;

pub const JSONRPC_VERSION: &str = "2.0";

/// Service that needs no authentication (login, version).
pub const COMMON_SERVICE: &str = "common";
/// Service that executes model methods on behalf of a session.
pub const OBJECT_SERVICE: &str = "object";

/// The `params` member of an envelope: which service and method to run, with positional args.
#[derive(Clone, Serialize, PartialEq)]
pub struct ServiceCall {
  pub service: String,
  pub method: String,
  pub args: Vec<Value>,
}

impl ServiceCall {
  /// Call on the unauthenticated `common` service.
  pub fn common(method: &str, args: Vec<Value>) -> Self {
    Self {
      service: COMMON_SERVICE.to_string(),
      method: method.to_string(),
      args,
    }
  }

  /// Model method call signed with the session's credentials.
  ///
  /// Args are `[database, uid, password, model, method, positional, keyword]`.
  pub fn execute_kw(
    session: &Session,
    model: &str,
    method: &str,
    args: Vec<Value>,
    kwargs: Map<String, Value>,
  ) -> Self {
    Self {
      service: OBJECT_SERVICE.to_string(),
      method: "execute_kw".to_string(),
      args: vec![
        Value::from(session.database.as_str()),
        Value::from(session.user_id),
        Value::from(session.password().expose()),
        Value::from(model),
        Value::from(method),
        Value::Array(args),
        Value::Object(kwargs),
      ],
    }
  }

  /// Any other service call, forwarded as-is.
  pub fn direct(service: &str, method: &str, args: Vec<Value>) -> Self {
    Self {
      service: service.to_string(),
      method: method.to_string(),
      args,
    }
  }

  /// Human-readable target for logs: `model.method` for model calls, `service.method` otherwise.
  pub fn target(&self) -> String {
    if self.service == OBJECT_SERVICE && self.method == "execute_kw" {
      let model = self.args.get(3).and_then(Value::as_str).unwrap_or("?");
      let method = self.args.get(4).and_then(Value::as_str).unwrap_or("?");
      format!("{}.{}", model, method)
    } else {
      format!("{}.{}", self.service, self.method)
    }
  }
}

// Args carry the password for login and execute_kw, so they never reach Debug output.
impl fmt::Debug for ServiceCall {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ServiceCall")
      .field("service", &self.service)
      .field("method", &self.method)
      .field("target", &self.target())
      .field("args", &format_args!("[{} redacted]", self.args.len()))
      .finish()
  }
}

/// A JSON-RPC request envelope.
#[derive(Debug, Serialize)]
pub struct RpcRequest {
  pub jsonrpc: &'static str,
  pub method: &'static str,
  pub params: ServiceCall,
  pub id: i64,
}

impl RpcRequest {
  pub fn new(params: ServiceCall) -> Self {
    Self {
      jsonrpc: JSONRPC_VERSION,
      method: "call",
      params,
      id: Utc::now().timestamp_millis(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RpcErrorData {
  #[serde(default)]
  pub name: Option<String>,
  #[serde(default)]
  pub debug: Option<String>,
  #[serde(default)]
  pub message: Option<String>,
  #[serde(default)]
  pub arguments: Vec<Value>,
  #[serde(default)]
  pub exception_type: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RpcErrorObject {
  #[serde(default)]
  pub code: i64,
  #[serde(default)]
  pub message: String,
  #[serde(default)]
  pub data: Option<RpcErrorData>,
}

/// A JSON-RPC response envelope.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RpcResponse {
  #[serde(default)]
  pub jsonrpc: Option<String>,
  #[serde(default)]
  pub id: Option<Value>,
  #[serde(default)]
  pub result: Option<Value>,
  #[serde(default)]
  pub error: Option<RpcErrorObject>,
}

impl RpcResponse {
  pub fn success(result: Value) -> Self {
    Self {
      jsonrpc: Some(JSONRPC_VERSION.to_string()),
      result: Some(result),
      ..Self::default()
    }
  }

  pub fn failure(error: RpcErrorObject) -> Self {
    Self {
      jsonrpc: Some(JSONRPC_VERSION.to_string()),
      error: Some(error),
      ..Self::default()
    }
  }
}

/// Carries one envelope to the ERP and brings back its response.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn post(&self, request: &RpcRequest) -> ErpResult<RpcResponse>;
}

/// HTTPS transport to a fixed JSON-RPC endpoint.
pub struct HttpTransport {
  client: reqwest::Client,
  endpoint: Url,
}

impl HttpTransport {
  pub fn new(endpoint: Url, timeout: Option<Duration>) -> ErpResult<Self> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
      builder = builder.timeout(timeout);
    }

    let client = builder.build().map_err(|e| ErpError::Transport {
      status: None,
      body: format!("Failed to create HTTP client: {}", e),
    })?;

    Ok(Self { client, endpoint })
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn post(&self, request: &RpcRequest) -> ErpResult<RpcResponse> {
    let body = serde_json::to_vec(request)?;

    let response = self
      .client
      .post(self.endpoint.clone())
      .header(CONTENT_TYPE, "application/json")
      .body(body)
      .send()
      .await
      .map_err(|e| ErpError::Transport {
        status: e.status().map(|s| s.as_u16()),
        body: e.to_string(),
      })?;

    let status = response.status();
    let text = response.text().await.map_err(|e| ErpError::Transport {
      status: Some(status.as_u16()),
      body: format!("Failed to read response body: {}", e),
    })?;

    if !status.is_success() {
      return Err(ErpError::Transport {
        status: Some(status.as_u16()),
        body: text,
      });
    }

    Ok(serde_json::from_str(&text)?)
  }
}

/// Sends service calls through a [`Transport`] and classifies the outcome.
#[derive(Clone)]
pub struct RpcClient {
  transport: Arc<dyn Transport>,
}

impl RpcClient {
  pub fn new(transport: Arc<dyn Transport>) -> Self {
    Self { transport }
  }

  /// Send one call. Exactly one transport request per invocation, no retries.
  ///
  /// Unknown-model and access-rights errors come back as an empty list.
  pub async fn send(&self, call: ServiceCall) -> ErpResult<Value> {
    self.dispatch(call, Suppression::MissingOrForbidden).await
  }

  /// Like [`send`](Self::send), but every RPC error propagates.
  ///
  /// For login and mutations, where an empty list would hide what the server said.
  pub async fn send_strict(&self, call: ServiceCall) -> ErpResult<Value> {
    self.dispatch(call, Suppression::Never).await
  }

  async fn dispatch(&self, call: ServiceCall, suppression: Suppression) -> ErpResult<Value> {
    let target = call.target();
    let request = RpcRequest::new(call);
    debug!(target_call = %target, id = request.id, "Sending ERP request");

    let response = self.transport.post(&request).await?;
    classify(response, &target, suppression)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Suppression {
  MissingOrForbidden,
  Never,
}

/// Turn a response envelope into a result.
///
/// With [`Suppression::MissingOrForbidden`], unknown-model and access-rights errors become an
/// empty list so list views keep working; the error still goes out on the `ess::suppressed`
/// target.
fn classify(response: RpcResponse, target: &str, suppression: Suppression) -> ErpResult<Value> {
  let Some(error) = response.error else {
    return Ok(response.result.unwrap_or(Value::Null));
  };

  let data = error.data.unwrap_or_default();
  let data_message = data.message.unwrap_or_default();

  if suppression == Suppression::MissingOrForbidden
    && (ErpError::is_missing_model_or_access(&error.message)
      || ErpError::is_missing_model_or_access(&data_message))
  {
    warn!(
      target: "ess::suppressed",
      call = %target,
      code = error.code,
      message = %data_message,
      "Model does not exist or no access rights, returning empty result"
    );
    return Ok(Value::Array(Vec::new()));
  }

  let message = if !error.message.is_empty() {
    error.message
  } else if !data_message.is_empty() {
    data_message
  } else {
    "Unknown error occurred".to_string()
  };

  Err(ErpError::Rpc {
    code: error.code,
    message,
    name: data.name,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::erp::testing::{rpc_error, ScriptedTransport};
  use serde_json::json;
  use tokio::io::{AsyncReadExt, AsyncWriteExt};
  use tokio::net::TcpListener;

  #[test]
  fn envelope_shape_for_common_call() {
    let request = RpcRequest::new(ServiceCall::common(
      "login",
      vec![json!("db"), json!("alice"), json!("secret")],
    ));
    let value = serde_json::to_value(&request).unwrap();

    assert_eq!(value["jsonrpc"], "2.0");
    assert_eq!(value["method"], "call");
    assert!(value["id"].is_i64());
    assert_eq!(
      value["params"],
      json!({"service": "common", "method": "login", "args": ["db", "alice", "secret"]})
    );
  }

  #[test]
  fn service_call_debug_hides_args() {
    let call = ServiceCall::common("login", vec![json!("db"), json!("alice"), json!("hunter2")]);
    let rendered = format!("{:?}", call);
    assert!(!rendered.contains("hunter2"));
    assert!(rendered.contains("common.login"));
  }

  #[test]
  fn classify_success_and_null_result() {
    let value = classify(RpcResponse::success(json!([1, 2])), "x", Suppression::Never).unwrap();
    assert_eq!(value, json!([1, 2]));

    let value = classify(RpcResponse::default(), "x", Suppression::Never).unwrap();
    assert_eq!(value, Value::Null);
  }

  #[test]
  fn classify_missing_model_returns_empty_list() {
    let response = RpcResponse::failure(rpc_error(
      "Odoo Server Error",
      Some("Object hr.leave.foo does not exist"),
    ));
    assert_eq!(classify(response, "x", Suppression::MissingOrForbidden).unwrap(), json!([]));

    let response = RpcResponse::failure(rpc_error(
      "You do not have access rights to this document",
      None,
    ));
    assert_eq!(classify(response, "x", Suppression::MissingOrForbidden).unwrap(), json!([]));
  }

  #[test]
  fn classify_other_errors_as_rpc_error() {
    let response = RpcResponse::failure(rpc_error(
      "Odoo Server Error",
      Some("Invalid field 'foo' on model 'hr.leave'"),
    ));
    match classify(response, "x", Suppression::MissingOrForbidden) {
      Err(ErpError::Rpc { code, message, name }) => {
        assert_eq!(code, 200);
        assert_eq!(message, "Odoo Server Error");
        assert_eq!(name.as_deref(), Some("odoo.exceptions.ValidationError"));
      }
      other => panic!("expected rpc error, got {:?}", other),
    }

    let response = RpcResponse::failure(RpcErrorObject::default());
    match classify(response, "x", Suppression::MissingOrForbidden) {
      Err(ErpError::Rpc { message, .. }) => assert_eq!(message, "Unknown error occurred"),
      other => panic!("expected rpc error, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn strict_send_keeps_missing_and_forbidden_errors() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.push_error(rpc_error(
      "You do not have access rights to create hr.leave",
      None,
    ));
    transport.push_error(rpc_error(
      "You do not have access rights to create hr.leave",
      None,
    ));
    let client = RpcClient::new(transport.clone());
    let call = || ServiceCall::direct("object", "execute_kw", vec![]);

    assert_eq!(client.send(call()).await.unwrap(), json!([]));
    match client.send_strict(call()).await {
      Err(ErpError::Rpc { message, .. }) => {
        assert_eq!(message, "You do not have access rights to create hr.leave");
      }
      other => panic!("expected rpc error, got {:?}", other),
    }
    assert_eq!(transport.call_count(), 2);
  }

  #[tokio::test]
  async fn rpc_client_sends_one_request_per_call() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.push_result(json!("16.0"));
    let client = RpcClient::new(transport.clone());

    let value = client
      .send(ServiceCall::common("version", vec![]))
      .await
      .unwrap();

    assert_eq!(value, json!("16.0"));
    assert_eq!(transport.call_count(), 1);
    assert_eq!(transport.requests()[0]["params"]["method"], "version");
  }

  /// Serve a single HTTP response on a local port and return the endpoint URL.
  async fn serve_once(status_line: &'static str, body: &'static str) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
      let (mut socket, _) = listener.accept().await.unwrap();
      let mut received = Vec::new();
      let mut chunk = [0u8; 4096];
      loop {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
          break;
        }
        received.extend_from_slice(&chunk[..n]);
        if request_complete(&received) {
          break;
        }
      }

      let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status_line,
        body.len(),
        body
      );
      socket.write_all(response.as_bytes()).await.unwrap();
      let _ = socket.shutdown().await;
    });

    Url::parse(&format!("http://{}/jsonrpc", addr)).unwrap()
  }

  fn request_complete(buf: &[u8]) -> bool {
    let text = String::from_utf8_lossy(buf);
    let Some(header_end) = text.find("\r\n\r\n") else {
      return false;
    };
    let content_length = text[..header_end]
      .lines()
      .find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name
          .trim()
          .eq_ignore_ascii_case("content-length")
          .then(|| value.trim().parse::<usize>().ok())
          .flatten()
      })
      .unwrap_or(0);
    buf.len() >= header_end + 4 + content_length
  }

  #[tokio::test]
  async fn http_transport_reports_non_2xx_as_transport_error() {
    let endpoint = serve_once("500 Internal Server Error", "boom").await;
    let transport = HttpTransport::new(endpoint, Some(Duration::from_secs(5))).unwrap();
    let client = RpcClient::new(Arc::new(transport));

    match client.send(ServiceCall::common("version", vec![])).await {
      Err(ErpError::Transport { status, body }) => {
        assert_eq!(status, Some(500));
        assert_eq!(body, "boom");
      }
      other => panic!("expected transport error, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn http_transport_parses_success_body() {
    let endpoint = serve_once("200 OK", r#"{"jsonrpc":"2.0","id":1,"result":7}"#).await;
    let transport = HttpTransport::new(endpoint, None).unwrap();
    let client = RpcClient::new(Arc::new(transport));

    let value = client
      .send(ServiceCall::common("login", vec![json!("db"), json!("u"), json!("p")]))
      .await
      .unwrap();
    assert_eq!(value, json!(7));
  }
}
