// ABOUTME: Attachment metadata cache backed by the on-disk storage tree
// ABOUTME: Rehydrates from JSON sidecars on startup; removal deletes files too

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::config::AttachmentConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedAttachment {
    pub attachment_id: String,
    /// Type directory on disk ("image", "video", "document", ...)
    pub attachment_type: String,
    pub file_extension: Option<String>,
    pub size: u64,
    /// Whether the file was within the size limit and downloaded
    pub processable: bool,
    pub created_at: DateTime<Utc>,
    /// Conversations this attachment has appeared in; not persisted
    #[serde(skip)]
    pub conversations: HashSet<String>,
}

impl CachedAttachment {
    pub fn dir_path(&self) -> PathBuf {
        PathBuf::from(&self.attachment_type).join(&self.attachment_id)
    }

    pub fn file_path(&self) -> PathBuf {
        let filename = match &self.file_extension {
            Some(ext) => format!("{}.{}", self.attachment_id, ext),
            None => self.attachment_id.clone(),
        };
        self.dir_path().join(filename)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.dir_path().join(format!("{}.json", self.attachment_id))
    }
}

/// Tracks attachment metadata; the storage directory is owned exclusively
/// by this cache.
pub struct AttachmentCache {
    attachments: RwLock<HashMap<String, CachedAttachment>>,
    storage_dir: PathBuf,
    max_age: chrono::Duration,
    max_total: usize,
    cleanup_interval: Duration,
}

impl AttachmentCache {
    pub fn new(config: &AttachmentConfig) -> Self {
        Self {
            attachments: RwLock::new(HashMap::new()),
            storage_dir: config.storage_dir.clone(),
            max_age: chrono::Duration::days(config.max_age_days as i64),
            max_total: config.max_total_attachments,
            cleanup_interval: Duration::from_secs(config.cleanup_interval_hours * 3600),
        }
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// Scan the storage tree and reload metadata sidecars. Malformed or
    /// orphaned entries are logged and skipped. Returns how many loaded.
    pub fn rehydrate(&self) -> usize {
        if !self.storage_dir.exists() {
            return 0;
        }
        let mut loaded = 0;

        let type_dirs = match std::fs::read_dir(&self.storage_dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!(dir = %self.storage_dir.display(), error = %e, "Error scanning attachment storage");
                return 0;
            }
        };

        for type_dir in type_dirs.flatten() {
            if !type_dir.path().is_dir() {
                continue;
            }
            let Ok(entries) = std::fs::read_dir(type_dir.path()) else {
                continue;
            };
            for entry in entries.flatten() {
                let id = entry.file_name().to_string_lossy().to_string();
                let metadata_path = entry.path().join(format!("{}.json", id));
                match std::fs::read_to_string(&metadata_path)
                    .map_err(anyhow::Error::from)
                    .and_then(|raw| serde_json::from_str::<CachedAttachment>(&raw).map_err(Into::into))
                {
                    Ok(mut attachment) => {
                        attachment.conversations = HashSet::new();
                        self.attachments
                            .write()
                            .unwrap()
                            .insert(attachment.attachment_id.clone(), attachment);
                        loaded += 1;
                    }
                    Err(e) => {
                        tracing::warn!(
                            path = %metadata_path.display(),
                            error = %e,
                            "Skipping attachment with unreadable metadata"
                        );
                    }
                }
            }
        }

        tracing::info!(count = loaded, "Rehydrated attachment cache from disk");
        loaded
    }

    pub fn get(&self, attachment_id: &str) -> Option<CachedAttachment> {
        self.attachments.read().unwrap().get(attachment_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.attachments.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.attachments.read().unwrap().is_empty()
    }

    /// Register an attachment and link it to a conversation. Existing
    /// entries keep their metadata and only gain the conversation link.
    pub fn insert(&self, attachment: CachedAttachment, conversation_id: &str) -> CachedAttachment {
        let mut attachments = self.attachments.write().unwrap();
        let entry = attachments
            .entry(attachment.attachment_id.clone())
            .or_insert(attachment);
        entry.conversations.insert(conversation_id.to_string());
        entry.clone()
    }

    /// Remove an attachment from the cache and delete its files.
    pub async fn remove(&self, attachment_id: &str) {
        let Some(attachment) = self
            .attachments
            .write()
            .unwrap()
            .remove(attachment_id)
        else {
            return;
        };

        let file = self.storage_dir.join(attachment.file_path());
        let metadata = self.storage_dir.join(attachment.metadata_path());
        let dir = self.storage_dir.join(attachment.dir_path());

        for path in [&file, &metadata] {
            if let Err(e) = tokio::fs::remove_file(path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::error!(path = %path.display(), error = %e, "Error deleting attachment file");
                }
            }
        }
        let _ = tokio::fs::remove_dir(&dir).await;

        tracing::info!(attachment_id, "Removed attachment from cache");
    }

    /// One maintenance pass: age limit, then total-count cap, oldest first.
    pub async fn enforce_limits(&self, now: DateTime<Utc>) {
        let cutoff = now - self.max_age;
        let expired: Vec<String> = {
            let attachments = self.attachments.read().unwrap();
            attachments
                .values()
                .filter(|a| a.created_at < cutoff)
                .map(|a| a.attachment_id.clone())
                .collect()
        };
        for id in &expired {
            self.remove(id).await;
        }
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "Removed attachments past age limit");
        }

        let over_cap: Vec<String> = {
            let attachments = self.attachments.read().unwrap();
            if attachments.len() <= self.max_total {
                Vec::new()
            } else {
                let mut ordered: Vec<(DateTime<Utc>, String)> = attachments
                    .values()
                    .map(|a| (a.created_at, a.attachment_id.clone()))
                    .collect();
                ordered.sort();
                ordered
                    .into_iter()
                    .take(attachments.len() - self.max_total)
                    .map(|(_, id)| id)
                    .collect()
            }
        };
        for id in &over_cap {
            self.remove(id).await;
        }
        if !over_cap.is_empty() {
            tracing::info!(count = over_cap.len(), "Removed attachments past total limit");
        }
    }

    pub fn spawn_maintenance(self: &Arc<Self>) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        let period = self.cleanup_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                cache.enforce_limits(Utc::now()).await;
                tracing::debug!(count = cache.len(), "Attachment cache maintenance completed");
            }
        })
    }
}
