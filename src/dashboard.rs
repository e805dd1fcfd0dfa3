//! Dashboard access checks

use chrono::NaiveDate;
use serde::Deserialize;

use crate::store::DAY_FORMAT;

/// Query parameters recognized by the dashboard
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DashboardQuery {
    /// Access key
    pub k: Option<String>,
    /// Day to report on, `YYYY-MM-DD`
    pub date: Option<String>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DashboardError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("invalid date '{0}', expected YYYY-MM-DD")]
    BadDate(String),
}

/// Compare the supplied key against the configured password.
/// No password configured means every request is allowed.
pub fn authorize(password: Option<&str>, key: Option<&str>) -> Result<(), DashboardError> {
    match password {
        None => Ok(()),
        Some(expected) => match key {
            Some(key) if !key.is_empty() && key == expected => Ok(()),
            _ => Err(DashboardError::Unauthorized),
        },
    }
}

/// Exactly `YYYY-MM-DD`: ten ASCII bytes with dashes at 4 and 7
fn is_day_shaped(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    bytes.len() == 10
        && bytes.iter().enumerate().all(|(i, b)| match i {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        })
}

/// Parse the requested day, defaulting to `today` when absent
pub fn requested_day(date: Option<&str>, today: NaiveDate) -> Result<NaiveDate, DashboardError> {
    match date {
        None => Ok(today),
        Some(raw) if is_day_shaped(raw) => NaiveDate::parse_from_str(raw, DAY_FORMAT)
            .map_err(|_| DashboardError::BadDate(raw.to_string())),
        Some(raw) => Err(DashboardError::BadDate(raw.to_string())),
    }
}
