//! Per-conversation checkpoints and the in-flight guard.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::Result;
use crate::state::ConversationState;

/// Thread-scoped memory keyed by conversation id
#[async_trait]
pub trait Checkpointer: Send + Sync {
    async fn get(&self, thread_id: &str) -> Result<Option<ConversationState>>;
    async fn put(&self, thread_id: &str, state: &ConversationState) -> Result<()>;
}

/// Process-local checkpoints
#[derive(Default)]
pub struct MemoryCheckpointer {
    states: RwLock<HashMap<String, ConversationState>>,
}

impl MemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Checkpointer for MemoryCheckpointer {
    async fn get(&self, thread_id: &str) -> Result<Option<ConversationState>> {
        Ok(self.states.read().get(thread_id).cloned())
    }

    async fn put(&self, thread_id: &str, state: &ConversationState) -> Result<()> {
        self.states
            .write()
            .insert(thread_id.to_string(), state.clone());
        Ok(())
    }
}

/// One JSON file per conversation under a directory
pub struct FileCheckpointer {
    dir: PathBuf,
}

impl FileCheckpointer {
    /// Use `dir`, creating it if needed
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, thread_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(thread_id)))
    }
}

/// Filesystem-safe, collision-free encoding of a conversation id
fn file_stem(thread_id: &str) -> String {
    let mut out = String::with_capacity(thread_id.len());
    for b in thread_id.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' {
            out.push(b as char);
        } else {
            out.push_str(&format!("_{:02x}", b));
        }
    }
    out
}

#[async_trait]
impl Checkpointer for FileCheckpointer {
    async fn get(&self, thread_id: &str) -> Result<Option<ConversationState>> {
        let path = self.path_for(thread_id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, thread_id: &str, state: &ConversationState) -> Result<()> {
        let path = self.path_for(thread_id);
        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", file_stem(thread_id), uuid::Uuid::new_v4()));
        let bytes = serde_json::to_vec(state)?;
        tokio::fs::write(&tmp, bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        tracing::debug!(thread_id, path = %path.display(), "checkpoint written");
        Ok(())
    }
}

/// Conversation ids with an invocation currently running
#[derive(Clone, Default)]
pub struct InFlight {
    active: Arc<Mutex<HashSet<String>>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `thread_id`; `None` if it is already claimed
    pub fn try_acquire(&self, thread_id: &str) -> Option<InFlightGuard> {
        let mut active = self.active.lock();
        if !active.insert(thread_id.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            active: Arc::clone(&self.active),
            thread_id: thread_id.to_string(),
        })
    }

    pub fn is_active(&self, thread_id: &str) -> bool {
        self.active.lock().contains(thread_id)
    }
}

/// Releases the claim on drop
pub struct InFlightGuard {
    active: Arc<Mutex<HashSet<String>>>,
    thread_id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.active.lock().remove(&self.thread_id);
    }
}
