// ABOUTME: Three-scope rate limiter: global, per-conversation, and message-class
// ABOUTME: Enforces minimum spacing between grants; waiters are served FIFO per scope

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::RateLimitConfig;

/// Which bucket class an outbound call belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// send/edit operations, additionally throttled by `message_rpm`
    Message,
    /// attachment transfer
    Media,
    /// everything else
    General,
}

#[derive(Debug, Default)]
struct GlobalState {
    last_global: Option<Instant>,
    last_message: Option<Instant>,
}

/// Process-scoped limiter constructed once by the adapter and shared as `Arc`.
///
/// `limit_request` blocks cooperatively until every applicable scope has
/// capacity, then stamps all of them. Nothing is consumed if the caller is
/// cancelled mid-wait, and tokio mutex fairness keeps waiters on the same
/// conversation in arrival order.
pub struct RateLimiter {
    global_interval: Duration,
    conversation_interval: Duration,
    message_interval: Duration,
    global: Mutex<GlobalState>,
    conversations: Mutex<HashMap<String, Arc<Mutex<Option<Instant>>>>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            global_interval: interval_for(config.global_rpm),
            conversation_interval: interval_for(config.per_conversation_rpm),
            message_interval: interval_for(config.message_rpm),
            global: Mutex::new(GlobalState::default()),
            conversations: Mutex::new(HashMap::new()),
        }
    }

    /// Wait until the applicable buckets allow another request, then consume.
    pub async fn limit_request(&self, kind: RequestKind, conversation_id: Option<&str>) {
        let conversation_slot = match conversation_id {
            Some(id) => Some(self.conversation_slot(id).await),
            None => None,
        };

        // Per-conversation lock is held across the wait so sends to the same
        // conversation never interleave; the global lock is taken second.
        let mut conversation_guard = match &conversation_slot {
            Some(slot) => Some(slot.lock().await),
            None => None,
        };
        let mut global = self.global.lock().await;

        let now = Instant::now();
        let mut wait = remaining(global.last_global, self.global_interval, now);

        if let Some(guard) = conversation_guard.as_deref() {
            wait = wait.max(remaining(*guard, self.conversation_interval, now));
        }
        if kind == RequestKind::Message {
            wait = wait.max(remaining(global.last_message, self.message_interval, now));
        }

        if !wait.is_zero() {
            tracing::debug!(wait_ms = wait.as_millis() as u64, "Rate limiting request");
            tokio::time::sleep(wait).await;
        }

        let granted_at = Instant::now();
        global.last_global = Some(granted_at);
        if kind == RequestKind::Message {
            global.last_message = Some(granted_at);
        }
        if let Some(guard) = conversation_guard.as_deref_mut() {
            *guard = Some(granted_at);
        }
    }

    /// Wait that would currently be imposed, without consuming anything.
    pub async fn current_wait(
        &self,
        kind: RequestKind,
        conversation_id: Option<&str>,
    ) -> Duration {
        let now = Instant::now();
        let global = self.global.lock().await;
        let mut wait = remaining(global.last_global, self.global_interval, now);
        if kind == RequestKind::Message {
            wait = wait.max(remaining(global.last_message, self.message_interval, now));
        }
        drop(global);

        if let Some(id) = conversation_id {
            let slot = self.conversation_slot(id).await;
            let guard = slot.lock().await;
            wait = wait.max(remaining(*guard, self.conversation_interval, now));
        }
        wait
    }

    async fn conversation_slot(&self, id: &str) -> Arc<Mutex<Option<Instant>>> {
        let mut map = self.conversations.lock().await;
        map.entry(id.to_string()).or_default().clone()
    }
}

fn interval_for(rpm: u32) -> Duration {
    Duration::from_secs_f64(60.0 / rpm.max(1) as f64)
}

fn remaining(last: Option<Instant>, interval: Duration, now: Instant) -> Duration {
    match last {
        Some(last) => interval.saturating_sub(now.duration_since(last)),
        None => Duration::ZERO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(global: u32, per_conversation: u32, message: u32) -> RateLimitConfig {
        RateLimitConfig {
            global_rpm: global,
            per_conversation_rpm: per_conversation,
            message_rpm: message,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_request_is_immediate() {
        let limiter = RateLimiter::new(&config(60, 60, 60));
        let start = Instant::now();
        limiter.limit_request(RequestKind::General, Some("c1")).await;
        assert_eq!(Instant::now(), start);
    }

    #[tokio::test(start_paused = true)]
    async fn test_global_spacing_enforced() {
        // 60 rpm -> one second between grants
        let limiter = RateLimiter::new(&config(60, 600, 600));
        let start = Instant::now();
        limiter.limit_request(RequestKind::General, None).await;
        limiter.limit_request(RequestKind::General, None).await;
        assert!(Instant::now().duration_since(start) >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_bucket_only_for_messages() {
        // Message bucket is far slower than the others
        let limiter = RateLimiter::new(&config(600, 600, 6));
        limiter.limit_request(RequestKind::Message, Some("c1")).await;

        let wait_general = limiter.current_wait(RequestKind::General, None).await;
        let wait_message = limiter.current_wait(RequestKind::Message, None).await;
        assert!(wait_general < Duration::from_secs(1));
        assert!(wait_message >= Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_conversation_buckets_are_independent() {
        let limiter = RateLimiter::new(&config(600, 6, 600));
        limiter.limit_request(RequestKind::General, Some("c1")).await;

        let other = limiter.current_wait(RequestKind::General, Some("c2")).await;
        let same = limiter.current_wait(RequestKind::General, Some("c1")).await;
        assert!(other < Duration::from_secs(1));
        assert!(same >= Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sliding_window_obeys_rpm() {
        // 6 rpm global: 10 requests must span at least ~90 seconds
        let limiter = RateLimiter::new(&config(6, 600, 600));
        let start = Instant::now();
        for _ in 0..10 {
            limiter.limit_request(RequestKind::General, None).await;
        }
        let elapsed = Instant::now().duration_since(start);
        assert!(elapsed >= Duration::from_secs(89), "elapsed {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_consumes_nothing() {
        let limiter = Arc::new(RateLimiter::new(&config(6, 600, 600)));
        limiter.limit_request(RequestKind::General, None).await;

        // Start a second request and drop it mid-wait
        let fut = {
            let limiter = limiter.clone();
            tokio::spawn(async move {
                limiter.limit_request(RequestKind::General, None).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        fut.abort();
        let _ = fut.await;

        // The cancelled waiter must not have stamped the bucket
        let wait = limiter.current_wait(RequestKind::General, None).await;
        assert!(wait <= Duration::from_secs(10));
        assert!(wait >= Duration::from_secs(9));
    }
}
