//! 文件持久化
//!
//! 每个线程一个 JSON 文件（threads/<id>.json），每个命名空间一个长期摘要文件
//! （long_term/<namespace>.json）。写入先落临时文件再 rename，保证整体替换。
//! 线程文件按修改时间做空闲清理，长期摘要不清理。

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::fs;

use crate::agents::AgentId;
use crate::memory::{LongTermSummary, StateStore, StoreError, ThreadState};

#[derive(Debug)]
pub struct JsonFileStore {
    root: PathBuf,
    default_agent: AgentId,
    idle_ttl: Duration,
}

impl JsonFileStore {
    pub fn new(root: impl AsRef<Path>, default_agent: AgentId, idle_ttl: Duration) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            default_agent,
            idle_ttl,
        }
    }

    fn thread_path(&self, thread_id: &str) -> PathBuf {
        self.root
            .join("threads")
            .join(format!("{}.json", file_stem(thread_id)))
    }

    fn long_term_path(&self, namespace: &str) -> PathBuf {
        self.root
            .join("long_term")
            .join(format!("{}.json", file_stem(namespace)))
    }
}

/// 将任意 id 转为安全的文件名（非 [A-Za-z0-9_-] 字符替换为 _）
fn file_stem(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    match fs::read_to_string(path).await {
        Ok(data) => Ok(Some(serde_json::from_str(&data)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// 文件最后修改距今是否超过 ttl；读不到修改时间的文件保留
async fn is_idle(path: &Path, ttl: Duration) -> bool {
    let modified = match fs::metadata(path).await.and_then(|m| m.modified()) {
        Ok(modified) => modified,
        Err(_) => return false,
    };
    SystemTime::now()
        .duration_since(modified)
        .is_ok_and(|elapsed| elapsed > ttl)
}

async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_string_pretty(value)?).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl StateStore for JsonFileStore {
    async fn load(&self, thread_id: &str) -> Result<ThreadState, StoreError> {
        Ok(read_json(&self.thread_path(thread_id))
            .await?
            .unwrap_or_else(|| ThreadState::new(thread_id, self.default_agent)))
    }

    async fn save(&self, thread_id: &str, state: &ThreadState) -> Result<(), StoreError> {
        write_json(&self.thread_path(thread_id), state).await
    }

    async fn load_long_term(&self, namespace: &str) -> Result<Option<LongTermSummary>, StoreError> {
        read_json(&self.long_term_path(namespace)).await
    }

    async fn save_long_term(&self, namespace: &str, summary: &LongTermSummary) -> Result<(), StoreError> {
        write_json(&self.long_term_path(namespace), summary).await
    }

    async fn evict_idle(&self) -> usize {
        let dir = self.root.join("threads");
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "Failed to scan thread files");
                return 0;
            }
        };

        let mut evicted = 0;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(dir = %dir.display(), error = %e, "Failed to scan thread files");
                    break;
                }
            };
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") || !is_idle(&path, self.idle_ttl).await {
                continue;
            }
            match fs::remove_file(&path).await {
                Ok(()) => evicted += 1,
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to evict thread file"),
            }
        }
        if evicted > 0 {
            tracing::debug!(evicted, "Evicted idle thread files");
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Message;

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn test_file_stem_sanitizes() {
        assert_eq!(file_stem("user/../x y"), "user____x_y");
        assert_eq!(file_stem("thread-1_a"), "thread-1_a");
    }

    #[tokio::test]
    async fn test_thread_state_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path(), AgentId::Search, HOUR);

        let mut state = store.load("t1").await.unwrap();
        assert!(state.is_fresh());
        state.append_message(Message::user("2 bedrooms in miami"));
        state.switch_agent(AgentId::Property, "test", true, 10);
        store.save("t1", &state).await.unwrap();

        let reopened = JsonFileStore::new(dir.path(), AgentId::Search, HOUR);
        let loaded = reopened.load("t1").await.unwrap();
        assert_eq!(loaded, state);
        assert_eq!(loaded.current_agent(), AgentId::Property);
    }

    #[tokio::test]
    async fn test_long_term_missing_then_saved() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path(), AgentId::Search, HOUR);
        assert!(store.load_long_term("alice").await.unwrap().is_none());

        let summary = LongTermSummary::new("alice");
        store.save_long_term("alice", &summary).await.unwrap();
        assert_eq!(store.load_long_term("alice").await.unwrap(), Some(summary));
    }

    #[tokio::test]
    async fn test_evict_idle_removes_stale_thread_files() {
        let dir = tempfile::tempdir().unwrap();
        let fresh_store = JsonFileStore::new(dir.path(), AgentId::Search, HOUR);
        assert_eq!(fresh_store.evict_idle().await, 0);

        let mut state = ThreadState::new("t1", AgentId::Search);
        state.append_message(Message::user("2 bedrooms in miami"));
        fresh_store.save("t1", &state).await.unwrap();
        fresh_store.save("t2", &state).await.unwrap();
        fresh_store
            .save_long_term("alice", &LongTermSummary::new("alice"))
            .await
            .unwrap();
        assert_eq!(fresh_store.evict_idle().await, 0);

        tokio::time::sleep(Duration::from_millis(30)).await;
        let strict = JsonFileStore::new(dir.path(), AgentId::Search, Duration::from_millis(1));
        assert_eq!(strict.evict_idle().await, 2);
        assert!(strict.load("t1").await.unwrap().is_fresh());
        assert!(strict.load_long_term("alice").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path(), AgentId::Search, HOUR);
        std::fs::create_dir_all(dir.path().join("threads")).unwrap();
        std::fs::write(dir.path().join("threads").join("bad.json"), "{not json").unwrap();
        assert!(matches!(store.load("bad").await, Err(StoreError::Serialization(_))));
    }
}
