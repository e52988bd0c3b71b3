// ABOUTME: Top-level adapter owning component lifecycle and the connection monitor
// ABOUTME: start() wires everything in dependency order; stop() tears down in reverse

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use skiff_core::attachments::Downloader;
use skiff_core::cache::{AttachmentCache, MessageCache, UserCache};
use skiff_core::config::Config;
use skiff_core::conversation::manager::ConversationManager;
use skiff_core::emoji::EmojiConverter;
use skiff_core::events::incoming::IncomingEventBuilder;
use skiff_core::events::outgoing::{OutgoingEvent, ResponseData};
use skiff_core::history::HistoryFetcher;
use skiff_core::rate_limiter::RateLimiter;
use skiff_core::traits::PlatformClient;

use crate::bus::{BusTransport, EventBus, OutgoingDispatcher};
use crate::processors::{IncomingEventProcessor, OutgoingEventProcessor};

/// The bridge process: one platform session on one side, the framework
/// event socket on the other.
pub struct Adapter {
    config: Arc<Config>,
    client: Arc<dyn PlatformClient>,
    manager: Arc<ConversationManager>,
    message_cache: Arc<MessageCache>,
    attachment_cache: Arc<AttachmentCache>,
    user_cache: Arc<UserCache>,
    incoming: Arc<IncomingEventProcessor>,
    outgoing: Arc<OutgoingEventProcessor>,
    bus: Arc<EventBus>,
    builder: IncomingEventBuilder,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
    fatal_tx: watch::Sender<bool>,
}

impl Adapter {
    /// Construct every component in dependency order. Nothing runs until
    /// `start()`.
    pub fn new(
        config: Arc<Config>,
        client: Arc<dyn PlatformClient>,
        transport: Arc<dyn BusTransport>,
    ) -> Arc<Self> {
        let message_cache = Arc::new(MessageCache::new(&config.caching));
        let attachment_cache = Arc::new(AttachmentCache::new(&config.attachments));
        let user_cache = Arc::new(UserCache::new(&config.caching));
        let rate_limiter = Arc::new(RateLimiter::new(&config.rate_limit));
        let emoji = Arc::new(EmojiConverter::new(
            config.adapter.emoji_mappings.as_deref(),
        ));

        let manager = Arc::new(ConversationManager::new(
            &config,
            message_cache.clone(),
            attachment_cache.clone(),
            user_cache.clone(),
        ));
        let downloader = Arc::new(Downloader::new(
            &config,
            client.clone(),
            attachment_cache.clone(),
            rate_limiter.clone(),
        ));
        let history = Arc::new(HistoryFetcher::new(&config, client.clone(), manager.clone()));

        let incoming = Arc::new(IncomingEventProcessor::new(
            &config,
            manager.clone(),
            downloader,
            history.clone(),
            user_cache.clone(),
            emoji.clone(),
            client.capabilities(),
        ));
        let outgoing = Arc::new(OutgoingEventProcessor::new(
            &config,
            client.clone(),
            manager.clone(),
            history,
            rate_limiter,
            emoji,
        ));
        let bus = EventBus::new(&config, transport);
        let builder = IncomingEventBuilder::new(
            config.adapter.adapter_type.as_str(),
            config.adapter.adapter_name.as_str(),
            config.adapter.adapter_id.as_str(),
        );

        let (fatal_tx, _) = watch::channel(false);
        Arc::new(Self {
            config,
            client,
            manager,
            message_cache,
            attachment_cache,
            user_cache,
            incoming,
            outgoing,
            bus,
            builder,
            tasks: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            fatal_tx,
        })
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn manager(&self) -> &Arc<ConversationManager> {
        &self.manager
    }

    /// Signalled when the connection is lost beyond max_reconnect_attempts.
    pub fn fatal_signal(&self) -> watch::Receiver<bool> {
        self.fatal_tx.subscribe()
    }

    pub async fn start(self: &Arc<Self>) -> Result<()> {
        tracing::info!("Starting adapter...");
        self.running.store(true, Ordering::SeqCst);

        self.client
            .connect()
            .await
            .context("Failed to connect to platform")?;
        self.manager.set_bot_user_id(self.client.bot_user_id());

        let rehydrated = self.attachment_cache.rehydrate();
        if rehydrated > 0 {
            tracing::info!(count = rehydrated, "Restored attachments from previous run");
        }

        let mut tasks = self.tasks.lock().await;
        tasks.push(self.message_cache.spawn_maintenance());
        tasks.push(self.attachment_cache.spawn_maintenance());
        tasks.push(self.user_cache.spawn_maintenance());

        // Platform event consumer
        let mut events = self
            .client
            .stream_events()
            .await
            .context("Failed to open platform event stream")?;
        let incoming = self.incoming.clone();
        let bus = self.bus.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                for request in incoming.process_event(event).await {
                    bus.emit_bot_request(&request).await;
                }
            }
            tracing::info!("Platform event stream ended");
        }));

        self.bus
            .start(Arc::new(DispatchHandle {
                outgoing: self.outgoing.clone(),
                bus: self.bus.clone(),
                builder: self.builder.clone(),
            }))
            .await;

        let adapter = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            adapter.monitor_connection().await;
        }));
        drop(tasks);

        self.bus.emit_bot_request(&self.builder.connect()).await;
        tracing::info!("Adapter started successfully");
        Ok(())
    }

    /// Periodically gate on `is_alive`; reconnect with bounded attempts,
    /// then give up fatally.
    async fn monitor_connection(self: Arc<Self>) {
        let check_interval = Duration::from_secs(self.config.adapter.connection_check_interval_secs);
        let retry_delay = Duration::from_secs(self.config.adapter.retry_delay_secs);
        let max_attempts = self.config.adapter.max_reconnect_attempts;
        let mut attempts: u32 = 0;

        loop {
            tokio::time::sleep(check_interval).await;
            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            if self.client.is_alive().await {
                attempts = 0;
                self.bus.emit_bot_request(&self.builder.connect()).await;
                continue;
            }

            if attempts >= max_attempts {
                tracing::error!(
                    attempts,
                    "Connection lost beyond max_reconnect_attempts, giving up"
                );
                self.bus.emit_bot_request(&self.builder.disconnect()).await;
                let _ = self.fatal_tx.send(true);
                break;
            }

            attempts += 1;
            tracing::warn!(attempt = attempts, "Connection check failed, reconnecting");
            if let Err(e) = self.client.connect().await {
                tracing::error!(error = %e, "Reconnect attempt failed");
                tokio::time::sleep(retry_delay).await;
            }
        }
    }

    /// Reverse-order teardown. The attachment directory is left intact for
    /// the next run.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Stopping adapter...");

        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        self.bus.stop().await;

        if let Err(e) = self.client.disconnect().await {
            tracing::error!(error = %e, "Error disconnecting platform client");
        }
        self.bus.emit_bot_request(&self.builder.disconnect()).await;
        tracing::info!("Adapter stopped");
    }
}

/// Worker-side hook: runs the outgoing processor and mirrors successful
/// history fetches as history_fetched bot_requests.
struct DispatchHandle {
    outgoing: Arc<OutgoingEventProcessor>,
    bus: Arc<EventBus>,
    builder: IncomingEventBuilder,
}

#[async_trait]
impl OutgoingDispatcher for DispatchHandle {
    async fn dispatch(&self, event: OutgoingEvent) -> skiff_core::Result<ResponseData> {
        let history_conversation = match &event {
            OutgoingEvent::FetchHistory(data) => Some(data.conversation_id.clone()),
            _ => None,
        };
        let result = self.outgoing.process_event(event).await;
        if let (Ok(ResponseData::History(history)), Some(conversation_id)) =
            (&result, history_conversation)
        {
            self.bus
                .emit_bot_request(&self.builder.history_fetched(&conversation_id, history))
                .await;
        }
        result
    }
}
