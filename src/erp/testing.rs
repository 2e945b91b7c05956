//! Scripted transport for exercising the client without a network.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Mutex;

use super::error::{ErpError, ErpResult};
use super::rpc::{RpcErrorData, RpcErrorObject, RpcRequest, RpcResponse, Transport};

/// Replays queued responses in order and records every request it receives.
#[derive(Default)]
pub struct ScriptedTransport {
  responses: Mutex<VecDeque<ErpResult<RpcResponse>>>,
  requests: Mutex<Vec<Value>>,
}

impl ScriptedTransport {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push_result(&self, result: Value) {
    self.push(Ok(RpcResponse::success(result)));
  }

  pub fn push_error(&self, error: RpcErrorObject) {
    self.push(Ok(RpcResponse::failure(error)));
  }

  pub fn push_http_error(&self, status: u16, body: &str) {
    self.push(Err(ErpError::Transport {
      status: Some(status),
      body: body.to_string(),
    }));
  }

  fn push(&self, response: ErpResult<RpcResponse>) {
    self.responses.lock().unwrap().push_back(response);
  }

  /// Every request received so far, serialized as it would go on the wire.
  pub fn requests(&self) -> Vec<Value> {
    self.requests.lock().unwrap().clone()
  }

  pub fn call_count(&self) -> usize {
    self.requests.lock().unwrap().len()
  }

  /// The `(model, method)` pairs of all `execute_kw` requests, in order.
  pub fn model_calls(&self) -> Vec<(String, String)> {
    self
      .requests()
      .iter()
      .filter(|r| r["params"]["method"] == "execute_kw")
      .map(|r| {
        let args = &r["params"]["args"];
        (
          args[3].as_str().unwrap_or_default().to_string(),
          args[4].as_str().unwrap_or_default().to_string(),
        )
      })
      .collect()
  }
}

#[async_trait]
impl Transport for ScriptedTransport {
  async fn post(&self, request: &RpcRequest) -> ErpResult<RpcResponse> {
    self
      .requests
      .lock()
      .unwrap()
      .push(serde_json::to_value(request).unwrap());

    self
      .responses
      .lock()
      .unwrap()
      .pop_front()
      .unwrap_or_else(|| {
        Err(ErpError::Transport {
          status: None,
          body: "no scripted response".to_string(),
        })
      })
  }
}

/// An Odoo-style server error with an optional detailed message.
pub fn rpc_error(message: &str, data_message: Option<&str>) -> RpcErrorObject {
  RpcErrorObject {
    code: 200,
    message: message.to_string(),
    data: Some(RpcErrorData {
      name: Some("odoo.exceptions.ValidationError".to_string()),
      debug: Some("Traceback (most recent call last): ...".to_string()),
      message: data_message.map(String::from),
      arguments: vec![json!(data_message.unwrap_or(message))],
      exception_type: Some("validation_error".to_string()),
    }),
  }
}
