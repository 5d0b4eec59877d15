//! Session store (component D): `load`/`save` of [`SessionState`], with
//! in-memory and file-backed variants.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use ace_x402_core::types::SessionState;
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{LedgerError, LedgerResult};

/// A two-method persistence capability for [`SessionState`].
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, session_id: &str) -> LedgerResult<Option<SessionState>>;
    async fn save(&self, session_id: &str, state: &SessionState) -> LedgerResult<()>;
}

/// An in-memory store keyed by session id. `load`/`save` clone the state so
/// that mutations by the caller can't reach back into stored state without
/// going through `save`.
#[derive(Clone, Default)]
pub struct InMemorySessionStore {
    inner: Arc<Mutex<HashMap<String, SessionState>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, session_id: &str) -> LedgerResult<Option<SessionState>> {
        let map = self.inner.lock().await;
        Ok(map.get(session_id).cloned())
    }

    async fn save(&self, session_id: &str, state: &SessionState) -> LedgerResult<()> {
        let mut map = self.inner.lock().await;
        map.insert(session_id.to_string(), state.clone());
        Ok(())
    }
}

/// A file-backed store: one JSON file per session at
/// `<base_dir>/<session_id>.json`, atomically rewritten on every `save`.
#[derive(Clone)]
pub struct FileSessionStore {
    base_dir: PathBuf,
}

impl FileSessionStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.base_dir.join(format!("{session_id}.json"))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self, session_id: &str) -> LedgerResult<Option<SessionState>> {
        let path = self.path_for(session_id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let state = serde_json::from_slice(&bytes)
                    .map_err(|e| LedgerError::Store(format!("corrupt session file: {e}")))?;
                Ok(Some(state))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(LedgerError::Store(e.to_string())),
        }
    }

    async fn save(&self, session_id: &str, state: &SessionState) -> LedgerResult<()> {
        tokio::fs::create_dir_all(&self.base_dir)
            .await
            .map_err(|e| LedgerError::Store(e.to_string()))?;
        let path = self.path_for(session_id);
        let tmp_path = path.with_extension("json.tmp");
        let mut json = serde_json::to_string_pretty(state)
            .map_err(|e| LedgerError::Store(e.to_string()))?;
        json.push('\n');

        let mut file = tokio::fs::File::create(&tmp_path)
            .await
            .map_err(|e| LedgerError::Store(e.to_string()))?;
        file.write_all(json.as_bytes())
            .await
            .map_err(|e| LedgerError::Store(e.to_string()))?;
        file.sync_all()
            .await
            .map_err(|e| LedgerError::Store(e.to_string()))?;
        drop(file);

        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| LedgerError::Store(e.to_string()))?;
        Ok(())
    }
}
