//! Error taxonomy for the ERP client.

use thiserror::Error;

/// Errors produced by the RPC transport, the session store and the client facade.
#[derive(Error, Debug)]
pub enum ErpError {
  /// HTTP-level failure: non-2xx status, or the request never completed
  #[error("HTTP Error: {} - {body}", status_label(.status))]
  Transport { status: Option<u16>, body: String },

  /// The ERP answered with a JSON-RPC error object
  #[error("{message}")]
  Rpc {
    code: i64,
    message: String,
    name: Option<String>,
  },

  /// Login rejected by the ERP
  #[error("Authentication failed: {0}")]
  Authentication(String),

  /// A model call was attempted without a live session
  #[error("Not authenticated")]
  NotAuthenticated,

  /// Attachment encoding or creation failed
  #[error("Failed to upload attachment: {0}")]
  Upload(String),

  /// Response body was not the JSON we expected
  #[error("Failed to decode ERP response: {0}")]
  Decode(#[from] serde_json::Error),

  /// Local durable storage failure
  #[error("Storage error: {0}")]
  Storage(String),

  /// A record the operation depends on is missing (e.g. no employee for the user)
  #[error("{0} not found")]
  NotFound(&'static str),

  /// The ERP rejected a value or the request could not be carried out as asked
  #[error("{0}")]
  Validation(String),
}

impl ErpError {
  /// True for errors the ERP raises when a model is unknown or the user lacks access.
  pub fn is_missing_model_or_access(message: &str) -> bool {
    message.contains("does not exist") || message.contains("access rights")
  }
}

fn status_label(status: &Option<u16>) -> String {
  match status {
    Some(code) => code.to_string(),
    None => "network".to_string(),
  }
}

pub type ErpResult<T> = Result<T, ErpError>;
