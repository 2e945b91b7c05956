//! The single authenticated identity and its durable copy.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

use super::error::{ErpError, ErpResult};
use super::rpc::{RpcClient, ServiceCall};
use crate::storage::KeyValueStore;

/// Storage key the session blob lives under.
pub const SESSION_STORAGE_KEY: &str = "erp_session";

/// The ERP re-authenticates every model call, so the password is kept for signing.
///
/// `Debug` never shows it; callers must go through [`Password::expose`].
#[derive(Clone, PartialEq, Eq)]
pub struct Password(String);

impl Password {
  pub fn new(value: impl Into<String>) -> Self {
    Self(value.into())
  }

  pub fn expose(&self) -> &str {
    &self.0
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

impl fmt::Debug for Password {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("Password(***)")
  }
}

/// An authenticated identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
  pub user_id: i64,
  pub database: String,
  pub username: String,
  password: Password,
  pub context: Map<String, Value>,
}

impl Session {
  pub fn new(
    user_id: i64,
    database: impl Into<String>,
    username: impl Into<String>,
    password: Password,
    context: Map<String, Value>,
  ) -> Self {
    Self {
      user_id,
      database: database.into(),
      username: username.into(),
      password,
      context,
    }
  }

  pub fn password(&self) -> &Password {
    &self.password
  }

  /// A usable session has a positive uid and every credential populated.
  fn is_complete(&self) -> bool {
    self.user_id > 0
      && !self.database.is_empty()
      && !self.username.is_empty()
      && !self.password.is_empty()
  }
}

/// On-disk shape of a session.
#[derive(Serialize, Deserialize)]
struct StoredSession {
  uid: i64,
  db: String,
  username: String,
  password: String,
  #[serde(default)]
  context: Map<String, Value>,
}

impl From<&Session> for StoredSession {
  fn from(session: &Session) -> Self {
    Self {
      uid: session.user_id,
      db: session.database.clone(),
      username: session.username.clone(),
      password: session.password.expose().to_string(),
      context: session.context.clone(),
    }
  }
}

impl From<StoredSession> for Session {
  fn from(stored: StoredSession) -> Self {
    Session::new(
      stored.uid,
      stored.db,
      stored.username,
      Password::new(stored.password),
      stored.context,
    )
  }
}

/// Owns the live session and mirrors it into durable storage.
pub struct SessionStore {
  rpc: RpcClient,
  storage: Arc<dyn KeyValueStore>,
  current: RwLock<Option<Arc<Session>>>,
  default_database: String,
  default_context: Map<String, Value>,
}

impl SessionStore {
  /// Create the store and restore any persisted session.
  pub fn new(
    rpc: RpcClient,
    storage: Arc<dyn KeyValueStore>,
    default_database: impl Into<String>,
    default_context: Map<String, Value>,
  ) -> Self {
    let store = Self {
      rpc,
      storage,
      current: RwLock::new(None),
      default_database: default_database.into(),
      default_context,
    };
    store.restore();
    store
  }

  /// Load the persisted session. Anything unreadable or partial means logged out.
  pub fn restore(&self) -> bool {
    let restored = match self.storage.get(SESSION_STORAGE_KEY) {
      Ok(Some(raw)) => match serde_json::from_str::<StoredSession>(&raw) {
        Ok(stored) => {
          let session = Session::from(stored);
          if session.is_complete() {
            Some(Arc::new(session))
          } else {
            warn!("Stored session is incomplete, ignoring it");
            None
          }
        }
        Err(e) => {
          warn!(error = %e, "Failed to parse stored session");
          None
        }
      },
      Ok(None) => None,
      Err(e) => {
        warn!(error = %e, "Failed to load session from storage");
        None
      }
    };

    let authenticated = restored.is_some();
    if let Some(session) = &restored {
      debug!(uid = session.user_id, db = %session.database, "Session loaded from storage");
    }
    *self.current.write().unwrap_or_else(PoisonError::into_inner) = restored;
    authenticated
  }

  /// Authenticate against the `common` service and make the result the live session.
  ///
  /// Only a positive integer uid counts as success.
  pub async fn login(
    &self,
    username: &str,
    password: &str,
    database: Option<&str>,
  ) -> ErpResult<Arc<Session>> {
    let database = database.unwrap_or(&self.default_database);
    info!(username, db = database, "Logging in");

    let result = self
      .rpc
      .send_strict(ServiceCall::common(
        "login",
        vec![
          Value::from(database),
          Value::from(username),
          Value::from(password),
        ],
      ))
      .await?;

    let user_id = result
      .as_i64()
      .filter(|uid| *uid > 0)
      .ok_or_else(|| ErpError::Authentication("Invalid username or password".to_string()))?;

    let session = Arc::new(Session::new(
      user_id,
      database,
      username,
      Password::new(password),
      self.default_context.clone(),
    ));
    if !session.is_complete() {
      return Err(ErpError::Authentication(
        "Username, password and database are required".to_string(),
      ));
    }

    *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(session.clone());
    self.persist(Some(&session));
    info!(uid = user_id, "Login successful");

    Ok(session)
  }

  /// Forget the session locally. The ERP is not told.
  pub fn logout(&self) {
    *self.current.write().unwrap_or_else(PoisonError::into_inner) = None;
    self.persist(None);
    info!("Logged out");
  }

  pub fn is_authenticated(&self) -> bool {
    self
      .current
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .is_some()
  }

  pub fn current(&self) -> Option<Arc<Session>> {
    self
      .current
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  /// The live session, or `NotAuthenticated`.
  pub fn require(&self) -> ErpResult<Arc<Session>> {
    self.current().ok_or(ErpError::NotAuthenticated)
  }

  // Storage failures are logged, never surfaced: the in-memory session stays authoritative.
  fn persist(&self, session: Option<&Session>) {
    let outcome = match session {
      Some(session) => serde_json::to_string(&StoredSession::from(session))
        .map_err(ErpError::from)
        .and_then(|blob| self.storage.set(SESSION_STORAGE_KEY, &blob)),
      None => self.storage.remove(SESSION_STORAGE_KEY),
    };

    match outcome {
      Ok(()) if session.is_some() => debug!("Session saved to storage"),
      Ok(()) => debug!("Session cleared from storage"),
      Err(e) => warn!(error = %e, "Failed to save session to storage"),
    }
  }
}
