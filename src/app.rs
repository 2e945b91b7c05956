use color_eyre::Result;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

use crate::cache::QueryCache;
use crate::config::Config;
use crate::erp::{ErpClient, HttpTransport, RpcClient, SessionStore, Transport};
use crate::ess::EssService;
use crate::storage::{KeyValueStore, MemoryStore, SqliteStore};

/// Everything a command needs, wired once per run.
pub struct App {
  service: EssService,
}

impl App {
  /// Build the transport, restore the session and set up an empty cache.
  ///
  /// `state_path` overrides `storage.path` from the config.
  pub fn new(config: &Config, state_path: Option<&Path>) -> Result<Self> {
    let transport = HttpTransport::new(config.endpoint()?, config.timeout())?;
    Self::with_transport(config, Arc::new(transport), open_storage(config, state_path))
  }

  fn with_transport(
    config: &Config,
    transport: Arc<dyn Transport>,
    storage: Arc<dyn KeyValueStore>,
  ) -> Result<Self> {
    let rpc = RpcClient::new(transport);
    let session = Arc::new(SessionStore::new(
      rpc.clone(),
      storage,
      config.erp.database.clone(),
      config.erp.context.clone(),
    ));

    let service = EssService::new(
      ErpClient::new(rpc, session),
      QueryCache::new(config.default_stale_time()),
      config.local_time()?,
      config.expenses.currency_id,
    );

    Ok(Self { service })
  }

  pub fn service(&self) -> &EssService {
    &self.service
  }
}

/// The session database, or an in-memory store when it cannot be opened.
fn open_storage(config: &Config, state_path: Option<&Path>) -> Arc<dyn KeyValueStore> {
  let path = state_path.or(config.storage.path.as_deref());
  let opened = match path {
    Some(path) => SqliteStore::open_at(path),
    None => SqliteStore::open(),
  };

  match opened {
    Ok(store) => Arc::new(store),
    Err(e) => {
      warn!(error = %e, "State database unavailable, session will not be remembered");
      Arc::new(MemoryStore::new())
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::erp::session::SESSION_STORAGE_KEY;
  use crate::erp::testing::ScriptedTransport;
  use serde_json::json;

  fn config(state: &Path) -> Config {
    serde_yaml::from_str(&format!(
      r#"
erp:
  url: https://erp.example.com/jsonrpc
  database: erp_prod
  context:
    lang: en_US
storage:
  path: {}
"#,
      state.display()
    ))
    .unwrap()
  }

  #[tokio::test]
  async fn session_survives_a_restart_through_the_state_database() {
    let dir = tempfile::tempdir().unwrap();
    let state = dir.path().join("state.db");
    let config = config(&state);

    let transport = Arc::new(ScriptedTransport::new());
    transport.push_result(json!(9));
    let first =
      App::with_transport(&config, transport.clone(), open_storage(&config, None)).unwrap();
    first.service().login("alice", "pw", None).await.unwrap();
    drop(first);

    let second = App::new(&config, None).unwrap();
    let session = second.service().whoami().unwrap();
    assert_eq!(session.user_id, 9);
    assert_eq!(session.database, "erp_prod");
    assert_eq!(session.context["lang"], "en_US");
  }

  #[test]
  fn explicit_state_path_wins_over_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir.path().join("configured.db"));
    let explicit = dir.path().join("explicit.db");

    let storage = open_storage(&config, Some(&explicit));
    storage.set(SESSION_STORAGE_KEY, "{}").unwrap();

    assert!(explicit.exists());
    assert!(!dir.path().join("configured.db").exists());
  }

  #[test]
  fn unusable_state_path_falls_back_to_memory() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"file").unwrap();
    let config = config(&blocker.join("state.db"));

    let storage = open_storage(&config, None);
    storage.set("k", "v").unwrap();
    assert_eq!(storage.get("k").unwrap().as_deref(), Some("v"));
  }
}
