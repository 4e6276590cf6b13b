//! File-backed duty roster

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::DutyFinder;
use crate::error::{Error, Result};
use crate::models::DutyUser;

/// One user in the roster file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub id: u64,
    pub login: String,
    #[serde(default)]
    pub on_duty: bool,
    /// `key=value` labels this user is responsible for
    #[serde(default)]
    pub labels: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RosterFile {
    Wrapped { users: Vec<RosterEntry> },
    Bare(Vec<RosterEntry>),
}

/// [`DutyFinder`] over a static list of users.
///
/// Accepts either `{"users": [...]}` or a bare JSON array.
#[derive(Debug, Clone, Default)]
pub struct StaticDutyRoster {
    entries: Vec<RosterEntry>,
}

impl StaticDutyRoster {
    pub fn new(entries: Vec<RosterEntry>) -> Self {
        Self { entries }
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let file: RosterFile = serde_json::from_str(raw)
            .map_err(|e| Error::config(format!("invalid duty roster: {e}")))?;
        let entries = match file {
            RosterFile::Wrapped { users } => users,
            RosterFile::Bare(users) => users,
        };

        for entry in &entries {
            if let Some(bad) = entry.labels.iter().find(|l| !l.contains('=')) {
                return Err(Error::config(format!(
                    "user {} has label '{bad}', expected key=value",
                    entry.login
                )));
            }
        }
        Ok(Self { entries })
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::config(format!("failed to read roster {}: {e}", path.display())))?;
        let roster = Self::from_json(&raw)?;
        info!(
            path = %path.display(),
            users = roster.entries.len(),
            on_duty = roster.entries.iter().filter(|e| e.on_duty).count(),
            "Loaded duty roster"
        );
        Ok(roster)
    }

    pub fn entries(&self) -> &[RosterEntry] {
        &self.entries
    }

    /// On-duty users carrying `label`
    pub fn users_for(&self, label: &str) -> Vec<DutyUser> {
        self.entries
            .iter()
            .filter(|e| e.on_duty && e.labels.iter().any(|l| l == label))
            .map(|e| DutyUser {
                id: e.id,
                login: e.login.clone(),
            })
            .collect()
    }
}

#[async_trait]
impl DutyFinder for StaticDutyRoster {
    async fn duty_users_by_label(&self, label: &str) -> Result<Vec<DutyUser>> {
        Ok(self.users_for(label))
    }
}
