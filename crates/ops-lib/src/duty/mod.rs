//! Duty/alert bridge
//!
//! Periodically fetches active alerts, resolves on-call users by matching
//! alert labels (`key=value`) against user labels, and hands one notification
//! per resolved user to a sink.
//!
//! - [`Alerter`]: one check-and-notify cycle
//! - [`AlertPoller`]: runs cycles on a fixed ticker until stopped
//! - [`StaticDutyRoster`]: file-backed [`DutyFinder`]
//! - [`LogSink`] / [`WebhookSink`]: [`NotificationSink`] implementations

mod alerter;
mod poller;
mod roster;
mod sink;

pub use alerter::{format_notification, summarize_alerts, Alerter, CycleReport};
pub use poller::{AlertPoller, PollerConfig, PollerHandle};
pub use roster::{RosterEntry, StaticDutyRoster};
pub use sink::{LogSink, WebhookSink};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::DutyUser;

/// Looks up on-call users responsible for a label
#[async_trait]
pub trait DutyFinder: Send + Sync {
    /// On-duty users carrying `label`, formatted `key=value`
    async fn duty_users_by_label(&self, label: &str) -> Result<Vec<DutyUser>>;
}

/// A message addressed to one duty user about one alert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient_id: u64,
    pub recipient_login: String,
    pub alert_name: String,
    /// Label that resolved the recipient
    pub matched_label: String,
    pub text: String,
}

/// Delivers notifications
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> Result<()>;
}
