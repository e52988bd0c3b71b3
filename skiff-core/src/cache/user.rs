// ABOUTME: User identity cache with LRU + TTL eviction
// ABOUTME: Populated on first authorship or mention, refreshed on every sighting

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::config::CachingConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub user_id: String,
    pub display_name: Option<String>,
    pub username: Option<String>,
    pub is_bot: bool,
    pub last_seen: DateTime<Utc>,
}

impl UserInfo {
    /// The name used when rendering mentions.
    pub fn mention_name(&self) -> &str {
        self.display_name
            .as_deref()
            .or(self.username.as_deref())
            .unwrap_or(&self.user_id)
    }
}

pub struct UserCache {
    users: RwLock<HashMap<String, UserInfo>>,
    max_users: usize,
    max_age: Duration,
    maintenance_interval: Duration,
}

impl UserCache {
    pub fn new(config: &CachingConfig) -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            max_users: config.max_users,
            max_age: Duration::from_secs(config.user_max_age_hours * 3600),
            maintenance_interval: Duration::from_secs(config.cache_maintenance_interval_secs),
        }
    }

    /// Insert or refresh a user; existing fields win over absent new ones.
    pub fn upsert(&self, user: UserInfo) {
        let mut users = self.users.write().unwrap();
        match users.get_mut(&user.user_id) {
            Some(existing) => {
                if user.display_name.is_some() {
                    existing.display_name = user.display_name;
                }
                if user.username.is_some() {
                    existing.username = user.username;
                }
                existing.is_bot = user.is_bot;
                existing.last_seen = user.last_seen;
            }
            None => {
                users.insert(user.user_id.clone(), user);
            }
        }
    }

    pub fn get(&self, user_id: &str) -> Option<UserInfo> {
        self.users.read().unwrap().get(user_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.users.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.read().unwrap().is_empty()
    }

    /// One maintenance pass: drop expired entries, then trim to capacity
    /// least-recently-seen first.
    pub fn enforce_limits(&self, now: DateTime<Utc>) {
        let mut users = self.users.write().unwrap();
        let cutoff = now - chrono::Duration::from_std(self.max_age).unwrap_or_default();
        users.retain(|_, user| user.last_seen >= cutoff);

        if users.len() > self.max_users {
            let mut ordered: Vec<(DateTime<Utc>, String)> = users
                .values()
                .map(|u| (u.last_seen, u.user_id.clone()))
                .collect();
            ordered.sort();
            let excess = ordered.len() - self.max_users;
            for (_, id) in ordered.into_iter().take(excess) {
                users.remove(&id);
            }
        }
    }

    pub fn spawn_maintenance(self: &Arc<Self>) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        let period = self.maintenance_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                cache.enforce_limits(Utc::now());
                tracing::debug!(users = cache.len(), "User cache maintenance completed");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_users: usize) -> CachingConfig {
        CachingConfig {
            max_messages_per_conversation: 100,
            max_total_messages: 1000,
            max_age_hours: 24,
            cache_maintenance_interval_secs: 300,
            cache_fetched_history: true,
            max_users,
            user_max_age_hours: 24,
        }
    }

    fn user(id: &str, seen: DateTime<Utc>) -> UserInfo {
        UserInfo {
            user_id: id.to_string(),
            display_name: Some(format!("User {}", id)),
            username: None,
            is_bot: false,
            last_seen: seen,
        }
    }

    #[test]
    fn test_upsert_and_get() {
        let cache = UserCache::new(&config(10));
        cache.upsert(user("u1", Utc::now()));
        assert_eq!(cache.get("u1").unwrap().display_name.as_deref(), Some("User u1"));
        assert!(cache.get("u2").is_none());
    }

    #[test]
    fn test_upsert_keeps_known_fields() {
        let cache = UserCache::new(&config(10));
        cache.upsert(user("u1", Utc::now()));
        cache.upsert(UserInfo {
            user_id: "u1".to_string(),
            display_name: None,
            username: Some("u1name".to_string()),
            is_bot: false,
            last_seen: Utc::now(),
        });
        let stored = cache.get("u1").unwrap();
        assert_eq!(stored.display_name.as_deref(), Some("User u1"));
        assert_eq!(stored.username.as_deref(), Some("u1name"));
    }

    #[test]
    fn test_lru_cap_evicts_least_recently_seen() {
        let cache = UserCache::new(&config(2));
        let now = Utc::now();
        cache.upsert(user("old", now - chrono::Duration::minutes(30)));
        cache.upsert(user("mid", now - chrono::Duration::minutes(20)));
        cache.upsert(user("new", now));
        cache.enforce_limits(now);
        assert_eq!(cache.len(), 2);
        assert!(cache.get("old").is_none());
        assert!(cache.get("new").is_some());
    }

    #[test]
    fn test_ttl_eviction() {
        let cache = UserCache::new(&config(10));
        let now = Utc::now();
        cache.upsert(user("stale", now - chrono::Duration::hours(48)));
        cache.upsert(user("fresh", now));
        cache.enforce_limits(now);
        assert!(cache.get("stale").is_none());
        assert!(cache.get("fresh").is_some());
    }

    #[test]
    fn test_mention_name_fallbacks() {
        let mut info = user("u1", Utc::now());
        assert_eq!(info.mention_name(), "User u1");
        info.display_name = None;
        info.username = Some("handle".to_string());
        assert_eq!(info.mention_name(), "handle");
        info.username = None;
        assert_eq!(info.mention_name(), "u1");
    }
}
