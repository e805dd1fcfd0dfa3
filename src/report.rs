//! Dashboard report aggregation
//!
//! Turns a day bucket into hit counts grouped by a configured path segment.
//! Today's numbers come from the live store; any other day is reloaded from
//! its day file, optionally through a short-lived cache.

use cached::{Cached, TimedSizedCache};
use chrono::NaiveDate;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::store::codec::DayFiles;
use crate::store::{self, AggregationStore, DayBucket};

/// Most past days kept in the reload cache
const HISTORY_CACHE_DAYS: usize = 32;

/// Group key used when a page has no segment at the group index
pub const ROOT_GROUP: &str = "";

/// Hit counts by group, then by entry label
pub type UrlHits = HashMap<String, HashMap<String, u64>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub date: NaiveDate,
    pub session_count: usize,
    pub url_hits: UrlHits,
}

impl Report {
    pub fn total_hits(&self) -> u64 {
        self.url_hits.values().flat_map(|e| e.values()).sum()
    }
}

/// Split `page` into its group key and entry label.
///
/// `"/blog/2024/post-1"` splits into `["", "blog", "2024", "post-1"]`; with
/// `group_by = 1` and `entries_by = 2` that yields `("blog", "2024/post-1")`.
/// A page too short for `group_by` lands in [`ROOT_GROUP`]; a page too short
/// for `entries_by` gets an empty entry label.
pub fn split_page(page: &str, group_by: usize, entries_by: usize) -> (&str, String) {
    let parts: Vec<&str> = page.split('/').collect();
    let group = parts.get(group_by).copied().unwrap_or(ROOT_GROUP);
    let entry = parts
        .get(entries_by..)
        .map(|rest| rest.join("/"))
        .unwrap_or_default();
    (group, entry)
}

/// Count every action of `bucket` by `(group, entry)`
pub fn group_hits(bucket: &DayBucket, group_by: usize, entries_by: usize) -> UrlHits {
    let mut hits = UrlHits::new();
    for action in bucket.all_actions() {
        let (group, entry) = split_page(&action.page, group_by, entries_by);
        *hits
            .entry(group.to_string())
            .or_default()
            .entry(entry)
            .or_insert(0) += 1;
    }
    hits
}

struct HistoryCache {
    days: Mutex<TimedSizedCache<NaiveDate, Arc<DayBucket>>>,
}

impl HistoryCache {
    fn new(ttl: Duration) -> Self {
        Self {
            days: Mutex::new(TimedSizedCache::with_size_and_lifespan(
                HISTORY_CACHE_DAYS,
                ttl.as_secs(),
            )),
        }
    }

    fn get(&self, day: NaiveDate) -> Option<Arc<DayBucket>> {
        self.days.lock().cache_get(&day).cloned()
    }

    fn put(&self, day: NaiveDate, bucket: Arc<DayBucket>) {
        self.days.lock().cache_set(day, bucket);
    }
}

/// Builds [`Report`]s from the live store or from day files
pub struct ReportEngine {
    store: Arc<AggregationStore>,
    files: DayFiles,
    group_by: usize,
    entries_by: usize,
    cache: Option<HistoryCache>,
}

impl ReportEngine {
    pub fn new(
        store: Arc<AggregationStore>,
        files: DayFiles,
        group_by: usize,
        entries_by: usize,
        history_cache_ttl: Duration,
    ) -> Self {
        let cache = (!history_cache_ttl.is_zero()).then(|| HistoryCache::new(history_cache_ttl));
        Self {
            store,
            files,
            group_by,
            entries_by,
            cache,
        }
    }

    /// Report for `date`
    pub async fn report(&self, date: NaiveDate) -> Report {
        self.report_as_of(date, store::today()).await
    }

    async fn report_as_of(&self, date: NaiveDate, today: NaiveDate) -> Report {
        let bucket = if date == today {
            Arc::new(self.store.day_snapshot(date))
        } else {
            self.load_past_day(date).await
        };

        Report {
            date,
            session_count: bucket.session_count(),
            url_hits: group_hits(&bucket, self.group_by, self.entries_by),
        }
    }

    async fn load_past_day(&self, date: NaiveDate) -> Arc<DayBucket> {
        if let Some(bucket) = self.cache.as_ref().and_then(|c| c.get(date)) {
            debug!("History cache hit for {}", date);
            return bucket;
        }

        let files = self.files.clone();
        let bucket = match tokio::task::spawn_blocking(move || files.read(date)).await {
            Ok(bucket) => Arc::new(bucket),
            Err(e) => {
                warn!("Failed to reload {}: {}", date, e);
                return Arc::new(DayBucket::default());
            }
        };

        // Missing days may still be written by the next flush
        if let Some(cache) = &self.cache {
            if !bucket.is_empty() {
                cache.put(date, bucket.clone());
            }
        }
        bucket
    }
}
