use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, Utc};
use tracing::debug;

/// Cache key: a room is reusable only for the exact same course, date and
/// time window.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomKey {
    pub course_id: String,
    pub local_date: NaiveDate,
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CachedRoom {
    pub room_id: String,
    pub join_link: String,
    cached_at: Instant,
}

/// Process-wide TTL cache of freshly provisioned rooms. Entries are
/// advisory: an expired entry is treated as absent and purged on read, and
/// the background sweep removes whatever reads did not touch.
pub struct RoomCache {
    ttl: Duration,
    entries: Mutex<HashMap<RoomKey, CachedRoom>>,
}

impl RoomCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, key: &RoomKey) -> Option<CachedRoom> {
        let mut entries = self.entries.lock().expect("room cache poisoned");
        match entries.get(key) {
            Some(entry) if entry.cached_at.elapsed() < self.ttl => Some(entry.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: RoomKey, room_id: String, join_link: String) {
        let mut entries = self.entries.lock().expect("room cache poisoned");
        entries.insert(
            key,
            CachedRoom {
                room_id,
                join_link,
                cached_at: Instant::now(),
            },
        );
    }

    /// Removes expired entries, returning how many were dropped.
    pub fn sweep(&self) -> usize {
        let mut entries = self.entries.lock().expect("room cache poisoned");
        let before = entries.len();
        entries.retain(|_, entry| entry.cached_at.elapsed() < self.ttl);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("room cache poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Background sweep on the TTL interval, spawned once at startup.
pub async fn run_sweeper(cache: Arc<RoomCache>) {
    let interval = cache.ttl();
    loop {
        tokio::time::sleep(interval).await;
        let removed = cache.sweep();
        if removed > 0 {
            debug!("room cache sweep removed {} expired entries", removed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn key(course: &str) -> RoomKey {
        RoomKey {
            course_id: course.to_string(),
            local_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            start_utc: Utc.with_ymd_and_hms(2024, 3, 1, 14, 0, 0).unwrap(),
            end_utc: Utc.with_ymd_and_hms(2024, 3, 1, 15, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_hit_within_ttl() {
        let cache = RoomCache::new(Duration::from_secs(60));
        cache.insert(key("c1"), "R1".to_string(), "https://v/1".to_string());

        let hit = cache.get(&key("c1")).expect("entry should be fresh");
        assert_eq!(hit.room_id, "R1");
        assert!(cache.get(&key("c2")).is_none());
    }

    #[test]
    fn test_expired_entry_is_absent_and_purged() {
        let cache = RoomCache::new(Duration::from_millis(10));
        cache.insert(key("c1"), "R1".to_string(), "https://v/1".to_string());

        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.get(&key("c1")).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let cache = RoomCache::new(Duration::from_millis(50));
        cache.insert(key("old"), "R1".to_string(), "https://v/1".to_string());

        std::thread::sleep(Duration::from_millis(60));
        cache.insert(key("new"), "R2".to_string(), "https://v/2".to_string());

        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&key("new")).is_some());
    }
}
