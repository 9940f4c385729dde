//! Core domain types: item identifiers, the run checkpoint, leases, and paper
//! metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PaperDiscError, Result};

/// Current schema version for the persisted checkpoint record.
pub const CURRENT_STATE_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// ItemId
// ---------------------------------------------------------------------------

/// Totally ordered identifier of a discussion item.
///
/// Persisted as a decimal string so the record stays opaque to readers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ItemId(pub u64);

impl ItemId {
    /// Precedes every real item; the lower bound of a first run.
    pub const ZERO: ItemId = ItemId(0);
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ItemId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.trim().parse()?))
    }
}

impl TryFrom<String> for ItemId {
    type Error = std::num::ParseIntError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ItemId> for String {
    fn from(id: ItemId) -> Self {
        id.to_string()
    }
}

// ---------------------------------------------------------------------------
// RunState
// ---------------------------------------------------------------------------

/// Checkpoint of the last successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunState {
    /// Schema version for forward compatibility.
    #[serde(default = "default_state_version")]
    pub schema_version: u32,
    /// Most recent processed item.
    pub last_processed_id: ItemId,
    /// When the checkpoint was written.
    pub last_run_timestamp: DateTime<Utc>,
}

fn default_state_version() -> u32 {
    CURRENT_STATE_VERSION
}

impl RunState {
    /// Build a checkpoint at the current schema version.
    pub fn new(last_processed_id: ItemId, last_run_timestamp: DateTime<Utc>) -> Self {
        Self {
            schema_version: CURRENT_STATE_VERSION,
            last_processed_id,
            last_run_timestamp,
        }
    }

    /// Reject records written by a newer release.
    pub fn ensure_supported(&self) -> Result<()> {
        if self.schema_version > CURRENT_STATE_VERSION {
            return Err(PaperDiscError::Storage(format!(
                "checkpoint schemaVersion {} not supported (newest known is {CURRENT_STATE_VERSION})",
                self.schema_version
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Lease
// ---------------------------------------------------------------------------

/// Time-bounded marker held by the run that may mutate shared state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lease {
    /// Identifier of the owning run.
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    /// Whether the lease no longer excludes other runs at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

// ---------------------------------------------------------------------------
// PaperMeta
// ---------------------------------------------------------------------------

/// arXiv metadata for one paper.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperMeta {
    pub title: String,
    /// Authors, truncated to the configured limit.
    pub authors: Vec<String>,
    /// Set when `authors` was truncated.
    #[serde(default)]
    pub has_more_authors: bool,
    #[serde(rename = "abstract")]
    pub summary: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_id_orders_numerically() {
        let ids: Vec<ItemId> = ["9", "101", "10"].iter().map(|s| s.parse().unwrap()).collect();
        assert_eq!(ids.iter().max(), Some(&ItemId(101)));
        assert!(ItemId::ZERO < ItemId(1));
    }

    #[test]
    fn newer_schema_version_is_rejected() {
        let mut state = RunState::new(ItemId(7), Utc::now());
        state.ensure_supported().unwrap();

        state.schema_version = 99;
        let err = state.ensure_supported().unwrap_err();
        assert!(matches!(err, PaperDiscError::Storage(_)));
        assert!(err.to_string().contains("schemaVersion 99"));
    }

    #[test]
    fn item_id_rejects_garbage() {
        assert!("abc".parse::<ItemId>().is_err());
        assert!("-3".parse::<ItemId>().is_err());
    }

    #[test]
    fn run_state_layout() {
        let ts = DateTime::parse_from_rfc3339("2026-10-16T06:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let state = RunState::new(ItemId(105), ts);
        let json = serde_json::to_value(&state).expect("serialize");
        assert_eq!(json["lastProcessedId"], "105");
        assert_eq!(json["lastRunTimestamp"], "2026-10-16T06:00:00Z");
        assert_eq!(json["schemaVersion"], 1);
    }

    #[test]
    fn run_state_without_version_defaults() {
        let json = r#"{"lastProcessedId":"7","lastRunTimestamp":"2026-01-01T00:00:00Z"}"#;
        let state: RunState = serde_json::from_str(json).expect("deserialize");
        assert_eq!(state.schema_version, CURRENT_STATE_VERSION);
        assert_eq!(state.last_processed_id, ItemId(7));
    }

    #[test]
    fn lease_expiry() {
        let now = Utc::now();
        let lease = Lease {
            holder: "run-a".into(),
            acquired_at: now,
            expires_at: now + chrono::Duration::seconds(60),
        };
        assert!(!lease.is_expired(now));
        assert!(lease.is_expired(now + chrono::Duration::seconds(60)));
    }

    #[test]
    fn state_fixture_validates() {
        let fixture = std::fs::read_to_string("../../../fixtures/json/checkpoint.fixture.json")
            .expect("read fixture");
        let parsed: RunState = serde_json::from_str(&fixture).expect("deserialize fixture");
        assert_eq!(parsed.last_processed_id, ItemId(105));
    }
}
