//! Recency check that keeps an ad group from being re-optimized right after a
//! budget change.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use uuid::Uuid;

pub struct CooldownTracker {
    /// ad_group_id -> time of the last applied budget change
    last_changes: DashMap<Uuid, DateTime<Utc>>,
    window: Duration,
}

impl CooldownTracker {
    pub fn new(window_hours: i64) -> Self {
        Self {
            last_changes: DashMap::new(),
            window: Duration::hours(window_hours),
        }
    }

    pub fn record_change(&self, ad_group_id: Uuid, at: DateTime<Utc>) {
        self.last_changes
            .entry(ad_group_id)
            .and_modify(|last| {
                if at > *last {
                    *last = at;
                }
            })
            .or_insert(at);
    }

    pub fn last_change(&self, ad_group_id: &Uuid) -> Option<DateTime<Utc>> {
        self.last_changes.get(ad_group_id).map(|t| *t)
    }

    pub fn is_cooling_down(&self, ad_group_id: &Uuid, now: DateTime<Utc>) -> bool {
        self.last_change(ad_group_id)
            .map(|last| now - last < self.window)
            .unwrap_or(false)
    }
}
