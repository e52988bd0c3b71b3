// ABOUTME: Decodes framework-provided attachment payloads and uploads them to the platform
// ABOUTME: Each upload consumes a media-class rate limit token

use std::sync::Arc;

use crate::attachments::{decode_base64, sanitize_filename};
use crate::error::Result;
use crate::events::outgoing::OutgoingAttachment;
use crate::rate_limiter::{RateLimiter, RequestKind};
use crate::traits::PlatformClient;

pub struct Uploader {
    client: Arc<dyn PlatformClient>,
    rate_limiter: Arc<RateLimiter>,
}

impl Uploader {
    pub fn new(client: Arc<dyn PlatformClient>, rate_limiter: Arc<RateLimiter>) -> Self {
        Self {
            client,
            rate_limiter,
        }
    }

    /// Upload base64-framed attachments; returns the platform refs in order.
    pub async fn upload_all(
        &self,
        platform_conversation_id: &str,
        attachments: &[OutgoingAttachment],
    ) -> Result<Vec<String>> {
        let mut refs = Vec::with_capacity(attachments.len());
        for attachment in attachments {
            let bytes = decode_base64(&attachment.content)?;
            let mut filename = sanitize_filename(&attachment.filename);
            if filename.is_empty() {
                filename = "attachment".to_string();
            }

            self.rate_limiter
                .limit_request(RequestKind::Media, Some(platform_conversation_id))
                .await;
            let reference = self
                .client
                .upload_attachment(platform_conversation_id, &filename, &bytes)
                .await?;
            tracing::info!(
                filename = %filename,
                size = bytes.len(),
                "Uploaded attachment"
            );
            refs.push(reference);
        }
        Ok(refs)
    }
}
