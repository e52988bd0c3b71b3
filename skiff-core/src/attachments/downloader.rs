// ABOUTME: Downloads incoming attachments through the platform client into the storage tree
// ABOUTME: Size-gates before transfer; concurrent requests for one id share a single flight

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use tokio::sync::Mutex;

use crate::attachments::{
    encode_base64, extension_of, kind_for_extension, load_attachment, store_attachment,
};
use crate::cache::attachment::{AttachmentCache, CachedAttachment};
use crate::config::Config;
use crate::events::incoming::AttachmentPayload;
use crate::ids;
use crate::rate_limiter::{RateLimiter, RequestKind};
use crate::traits::{PlatformClient, RawAttachment, RawMessage};

pub struct Downloader {
    client: Arc<dyn PlatformClient>,
    cache: Arc<AttachmentCache>,
    rate_limiter: Arc<RateLimiter>,
    max_file_size_bytes: u64,
    inflight: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Downloader {
    pub fn new(
        config: &Config,
        client: Arc<dyn PlatformClient>,
        cache: Arc<AttachmentCache>,
        rate_limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            client,
            cache,
            rate_limiter,
            max_file_size_bytes: config.max_file_size_bytes(),
            inflight: StdMutex::new(HashMap::new()),
        }
    }

    /// Download every attachment referenced by a message. Oversize and
    /// failed downloads yield descriptors with `processable = false`
    /// rather than errors.
    pub async fn process_attachments(
        &self,
        conversation_id: &str,
        message: &RawMessage,
    ) -> Vec<AttachmentPayload> {
        let mut payloads = Vec::with_capacity(message.attachments.len());
        for attachment in &message.attachments {
            payloads.push(self.process_attachment(conversation_id, attachment).await);
        }
        payloads
    }

    async fn process_attachment(
        &self,
        conversation_id: &str,
        raw: &RawAttachment,
    ) -> AttachmentPayload {
        let attachment_id = ids::attachment_id(&raw.source_id);
        let flight = self.flight_for(&attachment_id);
        let payload = {
            let _guard = flight.lock().await;
            self.download_locked(conversation_id, raw, &attachment_id).await
        };
        self.release_flight(&attachment_id, &flight);
        payload
    }

    /// The transfer itself, run under the per-id flight lock.
    async fn download_locked(
        &self,
        conversation_id: &str,
        raw: &RawAttachment,
        attachment_id: &str,
    ) -> AttachmentPayload {
        let extension = raw.filename.as_deref().and_then(extension_of).or_else(|| {
            raw.content_type
                .as_deref()
                .and_then(extension_from_content_type)
        });
        let kind = kind_for_extension(extension.as_deref()).to_string();

        // Already downloaded (possibly rehydrated from a previous run)
        if let Some(existing) = self.cache.get(attachment_id) {
            let existing = self.cache.insert(existing, conversation_id);
            let content = if existing.processable {
                match load_attachment(self.cache.storage_dir(), &existing).await {
                    Ok(bytes) => Some(encode_base64(&bytes)),
                    Err(e) => {
                        tracing::warn!(attachment_id = %attachment_id, error = %e, "Cached attachment unreadable");
                        None
                    }
                }
            } else {
                None
            };
            return payload_from(&existing, content);
        }

        let declared_size = raw.size.unwrap_or(0);
        if declared_size > self.max_file_size_bytes {
            tracing::info!(
                attachment_id = %attachment_id,
                size = declared_size,
                "Attachment exceeds size limit, skipping download"
            );
            let meta = self.metadata(attachment_id, &kind, extension, declared_size, false);
            let meta = self.cache.insert(meta, conversation_id);
            return payload_from(&meta, None);
        }

        self.rate_limiter.limit_request(RequestKind::Media, None).await;
        let bytes = match self.client.download_attachment(raw).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(attachment_id = %attachment_id, error = %e, "Attachment download failed");
                let meta = self.metadata(attachment_id, &kind, extension, declared_size, false);
                return payload_from(&meta, None);
            }
        };
        if bytes.len() as u64 > self.max_file_size_bytes {
            let meta = self.metadata(attachment_id, &kind, extension, bytes.len() as u64, false);
            let meta = self.cache.insert(meta, conversation_id);
            return payload_from(&meta, None);
        }

        let meta = self.metadata(attachment_id, &kind, extension, bytes.len() as u64, true);
        if let Err(e) = store_attachment(self.cache.storage_dir(), &meta, &bytes).await {
            tracing::error!(attachment_id = %attachment_id, error = %e, "Failed to store attachment");
            let meta = self.metadata(attachment_id, &kind, meta.file_extension, bytes.len() as u64, false);
            return payload_from(&meta, None);
        }
        let meta = self.cache.insert(meta, conversation_id);
        payload_from(&meta, Some(encode_base64(&bytes)))
    }

    fn metadata(
        &self,
        attachment_id: &str,
        kind: &str,
        extension: Option<String>,
        size: u64,
        processable: bool,
    ) -> CachedAttachment {
        CachedAttachment {
            attachment_id: attachment_id.to_string(),
            attachment_type: kind.to_string(),
            file_extension: extension,
            size,
            processable,
            created_at: chrono::Utc::now(),
            conversations: Default::default(),
        }
    }

    fn flight_for(&self, attachment_id: &str) -> Arc<Mutex<()>> {
        let mut inflight = self.inflight.lock().unwrap();
        inflight
            .entry(attachment_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the flight entry once its download resolves. Late waiters still
    /// hold their own handle; only the exact slot we took is removed, so a
    /// newer flight for a re-requested id is left alone.
    fn release_flight(&self, attachment_id: &str, flight: &Arc<Mutex<()>>) {
        let mut inflight = self.inflight.lock().unwrap();
        if inflight
            .get(attachment_id)
            .is_some_and(|slot| Arc::ptr_eq(slot, flight))
        {
            inflight.remove(attachment_id);
        }
    }
}

fn extension_from_content_type(content_type: &str) -> Option<String> {
    mime_guess::get_mime_extensions_str(content_type)
        .and_then(|list| list.first())
        .map(|e| e.to_string())
}

fn payload_from(meta: &CachedAttachment, content: Option<String>) -> AttachmentPayload {
    AttachmentPayload {
        attachment_id: meta.attachment_id.clone(),
        attachment_type: meta.attachment_type.clone(),
        file_extension: meta.file_extension.clone(),
        size: meta.size,
        processable: meta.processable,
        content,
    }
}
