//! In-memory aggregation store
//!
//! Page views are grouped by calendar day, then by visitor. A single
//! readers-writer lock guards the whole map; every critical section is a
//! bounded in-memory operation and never touches the disk.

pub mod codec;

use chrono::{Local, NaiveDate};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// Format used for day keys, both in memory and in file names
pub const DAY_FORMAT: &str = "%Y-%m-%d";

/// Render a day the way it appears in file names and hash input
pub fn day_string(day: NaiveDate) -> String {
    day.format(DAY_FORMAT).to_string()
}

/// Current calendar day in local time
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// A single observed page view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub page: String,
    pub query: String,
}

impl Action {
    pub fn new(page: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            page: page.into(),
            query: query.into(),
        }
    }
}

/// Identifies one visitor within one day
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VisitorKey {
    /// Raw client address, stored when no hashing secret is configured
    Address(String),
    /// SHA-256 of `day + address + secret`
    Hashed([u8; 32]),
}

impl VisitorKey {
    /// Derive the key for `address` on `day`.
    ///
    /// With a non-empty secret the day string is part of the digest input,
    /// so the same address yields an unrelated key on every other day.
    pub fn derive(day: NaiveDate, address: &str, secret: Option<&str>) -> Self {
        match secret {
            Some(secret) if !secret.is_empty() => {
                let mut hasher = Sha256::new();
                hasher.update(day_string(day).as_bytes());
                hasher.update(address.as_bytes());
                hasher.update(secret.as_bytes());
                Self::Hashed(hasher.finalize().into())
            }
            _ => Self::Address(address.to_string()),
        }
    }
}

const ADDRESS_TAG: &str = "addr";
const HASHED_TAG: &str = "sha256";

impl fmt::Display for VisitorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Address(address) => write!(f, "{}:{}", ADDRESS_TAG, address),
            Self::Hashed(digest) => write!(f, "{}:{}", HASHED_TAG, hex::encode(digest)),
        }
    }
}

/// Error returned when a stored visitor key cannot be parsed
#[derive(Debug, thiserror::Error)]
#[error("invalid visitor key '{0}'")]
pub struct InvalidVisitorKey(String);

impl std::str::FromStr for VisitorKey {
    type Err = InvalidVisitorKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((ADDRESS_TAG, address)) => Ok(Self::Address(address.to_string())),
            Some((HASHED_TAG, digest)) => {
                let mut bytes = [0u8; 32];
                hex::decode_to_slice(digest, &mut bytes)
                    .map_err(|_| InvalidVisitorKey(s.to_string()))?;
                Ok(Self::Hashed(bytes))
            }
            _ => Err(InvalidVisitorKey(s.to_string())),
        }
    }
}

impl Serialize for VisitorKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VisitorKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// All actions recorded on one day, grouped by visitor in arrival order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DayBucket {
    visitors: HashMap<VisitorKey, Vec<Action>>,
}

impl DayBucket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: VisitorKey, action: Action) {
        self.visitors.entry(key).or_default().push(action);
    }

    /// Number of distinct visitor keys
    pub fn session_count(&self) -> usize {
        self.visitors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visitors.is_empty()
    }

    pub fn actions(&self, key: &VisitorKey) -> Option<&[Action]> {
        self.visitors.get(key).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&VisitorKey, &[Action])> {
        self.visitors.iter().map(|(k, v)| (k, v.as_slice()))
    }

    /// Iterate every action regardless of visitor
    pub fn all_actions(&self) -> impl Iterator<Item = &Action> {
        self.visitors.values().flatten()
    }

    /// Total number of recorded actions
    pub fn hit_count(&self) -> usize {
        self.visitors.values().map(Vec::len).sum()
    }

    /// Append every action of `other` after this bucket's own
    pub fn merge(&mut self, other: &DayBucket) {
        for (key, actions) in &other.visitors {
            self.visitors
                .entry(key.clone())
                .or_default()
                .extend(actions.iter().cloned());
        }
    }

    /// Remove the actions `written` holds for each visitor. Actions are
    /// append-only, so those are the leading ones; anything recorded after
    /// `written` was taken is kept.
    fn drain_written(&mut self, written: &DayBucket) {
        for (key, actions) in &written.visitors {
            if let Some(resident) = self.visitors.get_mut(key) {
                let n = actions.len().min(resident.len());
                resident.drain(..n);
            }
        }
        self.visitors.retain(|_, actions| !actions.is_empty());
    }
}

impl FromIterator<(VisitorKey, Vec<Action>)> for DayBucket {
    fn from_iter<I: IntoIterator<Item = (VisitorKey, Vec<Action>)>>(iter: I) -> Self {
        Self {
            visitors: iter.into_iter().collect(),
        }
    }
}

/// Day-partitioned page view store shared by the recording path,
/// the flush scheduler and the report engine
pub struct AggregationStore {
    days: RwLock<BTreeMap<NaiveDate, DayBucket>>,
    /// Past days whose resident bucket only holds actions not yet on disk
    drained: Mutex<BTreeSet<NaiveDate>>,
    hash_secret: Option<String>,
}

impl AggregationStore {
    pub fn new(hash_secret: Option<String>) -> Self {
        Self {
            days: RwLock::new(BTreeMap::new()),
            drained: Mutex::new(BTreeSet::new()),
            hash_secret: hash_secret.filter(|s| !s.is_empty()),
        }
    }

    /// Build a store seeded with a bucket reloaded from disk
    pub fn with_bucket(hash_secret: Option<String>, day: NaiveDate, bucket: DayBucket) -> Self {
        let store = Self::new(hash_secret);
        store.days.write().insert(day, bucket);
        store
    }

    /// Record a page view for `address` today
    pub fn insert(&self, address: &str, action: Action) {
        self.insert_on(today(), address, action);
    }

    /// Record a page view for `address` on `day`
    pub fn insert_on(&self, day: NaiveDate, address: &str, action: Action) {
        // Key derivation happens outside the lock
        let key = VisitorKey::derive(day, address, self.hash_secret.as_deref());
        self.days.write().entry(day).or_default().push(key, action);
    }

    /// Copy of every resident bucket
    pub fn snapshot_all(&self) -> BTreeMap<NaiveDate, DayBucket> {
        self.days.read().clone()
    }

    /// Copy of one day's bucket, empty when the day is not resident
    pub fn day_snapshot(&self, day: NaiveDate) -> DayBucket {
        self.days.read().get(&day).cloned().unwrap_or_default()
    }

    /// Remove from each resident day older than `day` the actions its
    /// `flushed` snapshot wrote to disk. A day left empty is dropped; a day
    /// that received actions after its snapshot stays resident with only
    /// those, and is reported by [`Self::drained_days`] so the next write
    /// merges it with the existing file.
    /// Returns the number of days dropped.
    pub fn evict_before(&self, day: NaiveDate, flushed: &BTreeMap<NaiveDate, DayBucket>) -> usize {
        let mut days = self.days.write();
        let mut drained = self.drained.lock();
        let mut removed = 0;
        for (d, written) in flushed.range(..day) {
            let Some(bucket) = days.get_mut(d) else {
                continue;
            };
            bucket.drain_written(written);
            drained.insert(*d);
            if bucket.is_empty() {
                days.remove(d);
                removed += 1;
            }
        }
        removed
    }

    /// Past days partially written by an earlier eviction
    pub fn drained_days(&self) -> BTreeSet<NaiveDate> {
        self.drained.lock().clone()
    }

    /// Days currently held in memory, oldest first
    pub fn resident_days(&self) -> Vec<NaiveDate> {
        self.days.read().keys().copied().collect()
    }
}
