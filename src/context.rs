//! Transaction context: the unit of dispatch and durability.
//!
//! A context travels with the business activity from the first Try until its
//! outcome is durably recorded. The activity log snapshots it by value; the
//! Try reply is decoded into a fresh one.

use std::fmt;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::util::now_millis;

/// Two-part activity identifier. Formatted as `<group_id>_<branch_id>`,
/// which also names the activity's log shard.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActivityId {
    pub group_id: String,
    pub branch_id: String,
}

fn valid_component(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

impl ActivityId {
    /// Build an id; both parts must be `[A-Za-z0-9-]+`.
    pub fn new(group_id: impl Into<String>, branch_id: impl Into<String>) -> Result<Self> {
        let group_id = group_id.into();
        let branch_id = branch_id.into();
        if !valid_component(&group_id) {
            bail!("invalid activity group id `{group_id}`");
        }
        if !valid_component(&branch_id) {
            bail!("invalid activity branch id `{branch_id}`");
        }
        Ok(Self {
            group_id,
            branch_id,
        })
    }

    /// New branch in `group_id` with a random 64-bit hex branch id.
    pub fn generate(group_id: impl Into<String>) -> Result<Self> {
        use rand::RngCore;
        let branch = rand::rngs::OsRng.next_u64();
        Self::new(group_id, format!("{branch:016x}"))
    }

    /// `<group_id>_<branch_id>`
    pub fn format_string(&self) -> String {
        format!("{}_{}", self.group_id, self.branch_id)
    }

    /// Inverse of `format_string`.
    pub fn parse(s: &str) -> Result<Self> {
        let mut parts = s.split('_');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(g), Some(b), None) => Self::new(g, b),
            _ => bail!("activity id `{s}` is not <group>_<branch>"),
        }
    }
}

impl fmt::Display for ActivityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.group_id, self.branch_id)
    }
}

/// TCC phase the activity is in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    Trying,
    Confirming,
    Cancelling,
    Confirmed,
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BusinessActivity {
    pub id: ActivityId,
    pub status: ActivityStatus,
    pub started_at_ms: u64,
}

/// Runtime part of the context: activity descriptor and last recorded error.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuntimeState {
    pub activity: BusinessActivity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransactionContext {
    pub runtime: RuntimeState,
    /// Opaque business payload.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl TransactionContext {
    pub fn new(id: ActivityId, payload: serde_json::Value) -> Self {
        Self {
            runtime: RuntimeState {
                activity: BusinessActivity {
                    id,
                    status: ActivityStatus::Trying,
                    started_at_ms: now_millis(),
                },
                last_error: None,
            },
            payload,
        }
    }

    pub fn activity_id(&self) -> &ActivityId {
        &self.runtime.activity.id
    }

    pub fn status(&self) -> ActivityStatus {
        self.runtime.activity.status
    }

    pub fn set_status(&mut self, status: ActivityStatus) {
        self.runtime.activity.status = status;
    }

    pub fn record_error(&mut self, err: impl fmt::Display) {
        self.runtime.last_error = Some(err.to_string());
    }

    pub fn last_error(&self) -> Option<&str> {
        self.runtime.last_error.as_deref()
    }
}
