//! Message selection predicates.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::mail::{Message, MessageSummary};

/// Literal format of the `before` cutoff: day.month.year.
pub const CUTOFF_DATE_FORMAT: &str = "%d.%m.%Y";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("Invalid cutoff date '{value}', expected day.month.year (e.g. 31.12.2024)")]
    InvalidDate { value: String },
}

/// Optional predicates a message must satisfy to be exported.
///
/// Every predicate that is set must hold; an empty spec admits everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSpec {
    /// Required read state.
    #[serde(default, alias = "is_read", skip_serializing_if = "Option::is_none")]
    pub is_read: Option<bool>,

    /// Maximum age in whole UTC calendar days. `0` admits only today's mail.
    #[serde(default, alias = "max_age_days", skip_serializing_if = "Option::is_none")]
    pub max_age_days: Option<u32>,

    /// Only messages received strictly before this date (`d.m.Y`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
}

impl FilterSpec {
    pub fn is_empty(&self) -> bool {
        self.is_read.is_none() && self.max_age_days.is_none() && self.before.is_none()
    }

    /// Checks that every predicate is well formed.
    pub fn validate(&self) -> Result<(), FilterError> {
        self.cutoff().map(|_| ())
    }

    /// Parsed `before` date, if set.
    pub fn cutoff(&self) -> Result<Option<NaiveDate>, FilterError> {
        self.before.as_deref().map(parse_cutoff_date).transpose()
    }

    /// Decides whether `message` qualifies at time `now`.
    pub fn qualifies(&self, message: &Message, now: DateTime<Utc>) -> Result<bool, FilterError> {
        self.admits(Some(message.received_at), message.is_read, now)
    }

    /// Decides from a summary alone whether the message could qualify.
    ///
    /// Without an arrival time only the read state is checked, so `true` is
    /// not final; the fetched message must still pass [`qualifies`](Self::qualifies).
    pub fn may_qualify(
        &self,
        summary: &MessageSummary,
        now: DateTime<Utc>,
    ) -> Result<bool, FilterError> {
        self.admits(summary.received_at, summary.is_read, now)
    }

    /// The cutoff is parsed before anything else so a malformed value is
    /// reported for every message, not just the ones other predicates admit.
    fn admits(
        &self,
        received_at: Option<DateTime<Utc>>,
        is_read: bool,
        now: DateTime<Utc>,
    ) -> Result<bool, FilterError> {
        let cutoff = self.cutoff()?;

        if let Some(required) = self.is_read {
            if is_read != required {
                return Ok(false);
            }
        }

        let Some(received) = received_at.map(|r| r.date_naive()) else {
            return Ok(true);
        };

        if let Some(max_age) = self.max_age_days {
            let age = now.date_naive().signed_duration_since(received).num_days();
            if age > i64::from(max_age) {
                return Ok(false);
            }
        }

        if let Some(cutoff) = cutoff {
            if received >= cutoff {
                return Ok(false);
            }
        }

        Ok(true)
    }
}

/// Parses a `d.m.Y` date such as `31.12.2024` or `1.2.2024`.
pub fn parse_cutoff_date(value: &str) -> Result<NaiveDate, FilterError> {
    NaiveDate::parse_from_str(value.trim(), CUTOFF_DATE_FORMAT).map_err(|_| {
        FilterError::InvalidDate {
            value: value.to_string(),
        }
    })
}
