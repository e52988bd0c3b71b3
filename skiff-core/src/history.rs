// ABOUTME: Two-tier history fetching: message cache first, platform API second
// ABOUTME: API results are paginated and optionally written back into the cache

use std::sync::Arc;

use crate::config::Config;
use crate::conversation::manager::{ConversationManager, NewMessageCtx};
use crate::error::{AdapterError, Result};
use crate::events::incoming::MessagePayload;
use crate::traits::PlatformClient;

#[derive(Debug, Clone, Default)]
pub struct HistoryRequest {
    /// Canonical conversation id
    pub conversation_id: String,
    /// ms since epoch; framework-initiated fetches need one of before/after
    pub before: Option<i64>,
    pub after: Option<i64>,
    pub limit: Option<usize>,
    /// Message excluded from the result (the one that triggered the fetch)
    pub exclude_message_id: Option<String>,
}

/// Serves history from the message cache when the window is fully covered,
/// otherwise pages through the platform API.
pub struct HistoryFetcher {
    client: Arc<dyn PlatformClient>,
    manager: Arc<ConversationManager>,
    default_limit: usize,
    max_pagination_iterations: usize,
    cache_fetched_history: bool,
}

impl HistoryFetcher {
    pub fn new(
        config: &Config,
        client: Arc<dyn PlatformClient>,
        manager: Arc<ConversationManager>,
    ) -> Self {
        Self {
            client,
            manager,
            default_limit: config.adapter.max_history_limit,
            max_pagination_iterations: config.adapter.max_pagination_iterations,
            cache_fetched_history: config.caching.cache_fetched_history,
        }
    }

    /// Framework-initiated fetch: rejects requests with neither bound.
    pub async fn fetch_validated(&self, request: HistoryRequest) -> Result<Vec<MessagePayload>> {
        if request.before.is_none() && request.after.is_none() {
            return Err(AdapterError::Validation(
                "fetch_history requires a before or after timestamp".to_string(),
            ));
        }
        Ok(self.fetch(request).await)
    }

    /// Fetch history, cache tier first. API failures degrade to whatever
    /// the cache had.
    pub async fn fetch(&self, request: HistoryRequest) -> Vec<MessagePayload> {
        let Some(conversation) = self.manager.get_conversation(&request.conversation_id) else {
            return Vec::new();
        };
        let limit = request.limit.unwrap_or(self.default_limit).max(1);

        tracing::info!(
            conversation_id = %request.conversation_id,
            before = ?request.before,
            after = ?request.after,
            limit,
            "Fetching conversation history"
        );

        let cached = self.from_cache(&request, limit);
        if cached.len() >= limit {
            return cached;
        }

        match self
            .from_api(&conversation.platform_conversation_id, &request, limit)
            .await
        {
            Ok(transient) if !self.cache_fetched_history => {
                // API results were not written back; merge them in directly
                let mut merged = self.manager.conversation_payloads(&request.conversation_id);
                merged.extend(transient);
                self.apply_window(merged, &request, limit)
            }
            Ok(_) => self.from_cache(&request, limit),
            Err(e) => {
                tracing::warn!(error = %e, "History API fetch failed, serving cache tier");
                cached
            }
        }
    }

    fn from_cache(&self, request: &HistoryRequest, limit: usize) -> Vec<MessagePayload> {
        let history = self.manager.conversation_payloads(&request.conversation_id);
        self.apply_window(history, request, limit)
    }

    /// Filter to the requested window, oldest first, bounded by `limit`
    /// anchored at the before/after edge.
    fn apply_window(
        &self,
        mut history: Vec<MessagePayload>,
        request: &HistoryRequest,
        limit: usize,
    ) -> Vec<MessagePayload> {
        if let Some(exclude) = &request.exclude_message_id {
            history.retain(|m| &m.message_id != exclude);
        }
        if let Some(before) = request.before {
            history.retain(|m| m.timestamp < before);
        }
        if let Some(after) = request.after {
            history.retain(|m| m.timestamp > after);
        }
        history.sort_by(|a, b| {
            (a.timestamp, &a.message_id).cmp(&(b.timestamp, &b.message_id))
        });
        history.dedup_by(|a, b| a.message_id == b.message_id);

        if request.before.is_some() && history.len() > limit {
            history.split_off(history.len() - limit)
        } else if request.after.is_some() && history.len() > limit {
            history.truncate(limit);
            history
        } else {
            history
        }
    }

    /// Page through the platform API. With `cache_fetched_history` on the
    /// results land in the caches; otherwise they are returned transiently.
    async fn from_api(
        &self,
        platform_conversation_id: &str,
        request: &HistoryRequest,
        limit: usize,
    ) -> Result<Vec<MessagePayload>> {
        let mut before = request.before;
        let mut fetched = 0usize;
        let mut transient = Vec::new();

        for iteration in 0..self.max_pagination_iterations {
            let page = self
                .client
                .fetch_history(platform_conversation_id, limit, before, request.after)
                .await?;
            if page.is_empty() {
                break;
            }
            fetched += page.len();
            let oldest = page.iter().map(|m| m.timestamp_ms).min();

            for raw in page {
                if self.cache_fetched_history {
                    self.manager
                        .add_to_conversation(NewMessageCtx {
                            message: raw,
                            attachments: Vec::new(),
                            history_backfill: true,
                        })
                        .await;
                } else {
                    transient.push(self.manager.payload_from_raw(&raw));
                }
            }

            if fetched >= limit {
                break;
            }
            // Older pages are addressed by moving the upper bound down
            match oldest {
                Some(ts) if request.before.is_some() || request.after.is_none() => {
                    before = Some(ts);
                }
                _ => break,
            }
            tracing::debug!(iteration, fetched, "History pagination continuing");
        }
        Ok(transient)
    }
}
