//! pageviews - embeddable request analytics
//!
//! Records page views per day and visitor in memory, snapshots them to
//! compressed day files on a timer and serves a dashboard that groups hits
//! by a configurable URL segment.
//!
//! - [`store`]: the locked in-memory aggregation store and the day file codec
//! - [`scheduler`]: background flush with an explicit stop
//! - [`report`]: grouped hit counts for today or any past day
//! - [`web`]: axum layer that records requests, plus the dashboard routes

pub mod blacklist;
pub mod config;
pub mod dashboard;
pub mod report;
pub mod scheduler;
pub mod store;
pub mod web;

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::blacklist::UserAgentBlacklist;
use crate::config::AnalyticsConfig;
use crate::dashboard::DashboardError;
use crate::report::{Report, ReportEngine};
use crate::scheduler::FlushScheduler;
use crate::store::codec::DayFiles;
use crate::store::{Action, AggregationStore};

/// Fields of an inbound request the recorder cares about
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    pub address: String,
    pub user_agent: String,
    pub path: String,
    pub query: String,
}

/// A configured recorder: store, day files, report engine and blacklist
pub struct Analytics {
    config: AnalyticsConfig,
    store: Arc<AggregationStore>,
    files: DayFiles,
    reports: ReportEngine,
    blacklist: UserAgentBlacklist,
}

impl Analytics {
    /// Build a recorder, reloading anything already persisted for today
    pub fn new(config: AnalyticsConfig) -> anyhow::Result<Self> {
        config.validate()?;

        let files = DayFiles::new(&config.directory, &config.name);
        let today = store::today();
        let reloaded = files.read(today);
        if !reloaded.is_empty() {
            info!(
                "Reloaded {} session(s) for {} from {}",
                reloaded.session_count(),
                today,
                files.path(today).display()
            );
        }

        let store = Arc::new(AggregationStore::with_bucket(
            config.hash_secret().map(str::to_string),
            today,
            reloaded,
        ));
        let reports = ReportEngine::new(
            store.clone(),
            files.clone(),
            config.group_by_segment,
            config.entries_by_segment,
            Duration::from_secs(config.history_cache_seconds),
        );
        let blacklist = UserAgentBlacklist::new(&config.user_agent_blacklist);

        Ok(Self {
            config,
            store,
            files,
            reports,
            blacklist,
        })
    }

    /// Spawn the periodic flush; stop it with [`FlushScheduler::stop`]
    pub fn start_scheduler(&self) -> FlushScheduler {
        FlushScheduler::start(
            self.store.clone(),
            self.files.clone(),
            self.config.flush_interval(),
        )
    }

    /// Record a request unless its user agent is blacklisted.
    /// Returns whether the request was recorded.
    pub fn insert_request(&self, request: &RequestInfo) -> bool {
        if self.blacklist.is_blocked(&request.user_agent) {
            debug!("Ignoring blacklisted user agent: {}", request.user_agent);
            return false;
        }
        self.store.insert(
            &request.address,
            Action::new(request.path.as_str(), request.query.as_str()),
        );
        true
    }

    /// Check access and build the report for the requested day
    pub async fn dashboard(&self, key: Option<&str>, date: Option<&str>) -> Result<Report, DashboardError> {
        dashboard::authorize(self.config.password(), key)?;
        let day = dashboard::requested_day(date, store::today())?;
        Ok(self.reports.report(day).await)
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<AggregationStore> {
        &self.store
    }

    pub fn files(&self) -> &DayFiles {
        &self.files
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &std::path::Path) -> AnalyticsConfig {
        AnalyticsConfig {
            directory: dir.to_path_buf(),
            name: "site-".to_string(),
            ..AnalyticsConfig::default()
        }
    }

    fn request(address: &str, user_agent: &str, path: &str) -> RequestInfo {
        RequestInfo {
            address: address.to_string(),
            user_agent: user_agent.to_string(),
            path: path.to_string(),
            query: String::new(),
        }
    }

    #[tokio::test]
    async fn test_blacklisted_agents_are_not_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let analytics = Analytics::new(config_in(dir.path())).unwrap();

        assert!(!analytics.insert_request(&request("1.1.1.1", "Googlebot/2.1", "/a/b")));
        assert!(analytics.insert_request(&request("2.2.2.2", "Mozilla/5.0", "/a/b")));

        let report = analytics.dashboard(None, None).await.unwrap();
        assert_eq!(report.session_count, 1);
        assert_eq!(report.url_hits["a"]["b"], 1);
    }

    #[tokio::test]
    async fn test_dashboard_enforces_password_and_date() {
        let dir = tempfile::tempdir().unwrap();
        let config = AnalyticsConfig {
            password: Some("secret123".to_string()),
            ..config_in(dir.path())
        };
        let analytics = Analytics::new(config).unwrap();

        assert!(analytics.dashboard(Some("secret123"), None).await.is_ok());
        assert_eq!(
            analytics.dashboard(Some("wrong"), None).await,
            Err(DashboardError::Unauthorized)
        );
        assert_eq!(analytics.dashboard(None, None).await, Err(DashboardError::Unauthorized));
        assert!(matches!(
            analytics.dashboard(Some("secret123"), Some("yesterday")).await,
            Err(DashboardError::BadDate(_))
        ));
    }

    #[tokio::test]
    async fn test_restart_reloads_today() {
        let dir = tempfile::tempdir().unwrap();
        {
            let analytics = Analytics::new(config_in(dir.path())).unwrap();
            analytics.insert_request(&request("1.1.1.1", "", "/blog/2024/post-1"));
            let summary = scheduler::flush_now(analytics.store(), analytics.files()).await;
            assert_eq!(summary.written, 1);
        }

        let analytics = Analytics::new(config_in(dir.path())).unwrap();
        analytics.insert_request(&request("1.1.1.1", "", "/blog/2024/post-1"));

        let report = analytics.dashboard(None, None).await.unwrap();
        assert_eq!(report.session_count, 1);
        assert_eq!(report.url_hits["blog"]["2024/post-1"], 2);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = AnalyticsConfig {
            flush_interval_seconds: 0,
            ..config_in(dir.path())
        };
        assert!(Analytics::new(config).is_err());
    }
}
