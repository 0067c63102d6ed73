//! Per-user daily quota
//!
//! Admission is charge-then-check: every attempt increments the counter for
//! (user, day) and is allowed only if the new count is within the limit.
//! Denied attempts stay counted. Day buckets are UTC calendar days
//! (`epoch_secs / 86400`); buckets older than the current day are evicted
//! when the day advances.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::job::UserId;

const SECS_PER_DAY: u64 = 86_400;

/// UTC day bucket for a point in time. Times before the epoch map to day 0.
pub fn day_bucket(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() / SECS_PER_DAY)
        .unwrap_or(0)
}

/// Quota view for one user and day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageSnapshot {
    pub used: u32,
    pub limit: u32,
    pub remaining: u32,
    pub day: u64,
}

#[derive(Default)]
struct UsageTable {
    counts: HashMap<(UserId, u64), u32>,
    current_day: u64,
}

impl UsageTable {
    fn evict_before(&mut self, day: u64) {
        if day <= self.current_day {
            return;
        }
        let before = self.counts.len();
        self.counts.retain(|&(_, bucket), _| bucket >= day);
        self.current_day = day;
        let evicted = before - self.counts.len();
        if evicted > 0 {
            debug!(evicted, day, "evicted stale usage buckets");
        }
    }
}

/// Daily admission counter shared by all submitters.
pub struct RateLimiter {
    daily_limit: u32,
    table: Mutex<UsageTable>,
}

impl RateLimiter {
    pub fn new(daily_limit: u32) -> Self {
        Self {
            daily_limit,
            table: Mutex::new(UsageTable::default()),
        }
    }

    pub fn daily_limit(&self) -> u32 {
        self.daily_limit
    }

    /// Charge one attempt for `user_id` today and report whether it is allowed.
    pub async fn admit(&self, user_id: UserId) -> bool {
        self.admit_at(user_id, SystemTime::now()).await
    }

    /// `admit` at an explicit time.
    pub async fn admit_at(&self, user_id: UserId, now: SystemTime) -> bool {
        let day = day_bucket(now);
        let mut table = self.table.lock().await;
        table.evict_before(day);
        let count = table.counts.entry((user_id, day)).or_insert(0);
        *count = count.saturating_add(1);
        let used = *count;
        drop(table);

        let allowed = used <= self.daily_limit;
        if !allowed {
            warn!(user_id, used, limit = self.daily_limit, "daily limit exceeded");
        }
        allowed
    }

    /// Today's usage for `user_id`. Does not charge.
    pub async fn usage(&self, user_id: UserId) -> UsageSnapshot {
        self.usage_at(user_id, SystemTime::now()).await
    }

    /// `usage` at an explicit time.
    pub async fn usage_at(&self, user_id: UserId, now: SystemTime) -> UsageSnapshot {
        let day = day_bucket(now);
        let used = self
            .table
            .lock()
            .await
            .counts
            .get(&(user_id, day))
            .copied()
            .unwrap_or(0);
        UsageSnapshot {
            used,
            limit: self.daily_limit,
            remaining: self.daily_limit.saturating_sub(used),
            day,
        }
    }

    #[cfg(test)]
    async fn tracked_buckets(&self) -> usize {
        self.table.lock().await.counts.len()
    }
}
