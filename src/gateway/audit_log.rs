//! Append-only audit trail for review tooling.
//!
//! Every supersede, below-threshold match decision, alias resolution and
//! identity merge is recorded here, keyed by identity and timestamp. Entries
//! are never edited or removed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use uuid::Uuid;

use crate::domain::{ItemId, Period};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearMiss {
    pub identity_id: ItemId,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditEvent {
    Supersede {
        period: Period,
        superseded_version: u32,
        new_version: u32,
        reason: String,
    },
    BelowThresholdMatch {
        period: Period,
        /// Match key of the label that failed to reach the threshold.
        label: String,
        candidates: Vec<NearMiss>,
        /// What the matcher did instead (`alias`, `new_identity_unreviewed`).
        resolution: String,
    },
    AliasResolved {
        period: Period,
        alias: String,
        target: String,
    },
    Merge {
        into: ItemId,
        reason: String,
    },
}

impl AuditEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            AuditEvent::Supersede { .. } => "supersede",
            AuditEvent::BelowThresholdMatch { .. } => "below_threshold_match",
            AuditEvent::AliasResolved { .. } => "alias_resolved",
            AuditEvent::Merge { .. } => "merge",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub entry_id: Uuid,
    pub sequence: u64,
    pub identity_id: ItemId,
    pub recorded_at: DateTime<Utc>,
    pub event: AuditEvent,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditLog {
    entries: Vec<AuditEntry>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a log from persisted entries, in sequence order.
    pub fn from_entries(mut entries: Vec<AuditEntry>) -> Self {
        entries.sort_by_key(|e| e.sequence);
        Self { entries }
    }

    /// Append an entry. The entry id is derived from its sequence number and
    /// content, so replaying the same run yields the same ids.
    pub fn record(&mut self, identity_id: ItemId, recorded_at: DateTime<Utc>, event: AuditEvent) -> &AuditEntry {
        let sequence = self.entries.last().map(|e| e.sequence + 1).unwrap_or(0);
        let content = serde_json::to_string(&event).unwrap_or_default();
        let name = format!("{}:{}:{}", sequence, identity_id, content);
        let entry_id = Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes());

        tracing::debug!(
            "Audit: seq={} identity={} kind={}",
            sequence,
            identity_id,
            event.kind()
        );
        self.entries.push(AuditEntry { entry_id, sequence, identity_id, recorded_at, event });
        &self.entries[self.entries.len() - 1]
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn for_identity(&self, identity_id: ItemId) -> impl Iterator<Item = &AuditEntry> + '_ {
        self.entries.iter().filter(move |e| e.identity_id == identity_id)
    }
}

/// Append one entry as a JSON line.
pub fn append(path: &Path, entry: &AuditEntry) -> anyhow::Result<()> {
    append_all(path, std::slice::from_ref(entry))
}

/// Append entries as JSON lines, creating the file and its directory as needed.
pub fn append_all(path: &Path, entries: &[AuditEntry]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    for entry in entries {
        let line = serde_json::to_string(entry)?;
        writeln!(file, "{}", line)?;
    }
    Ok(())
}

pub fn read_all(path: &Path) -> anyhow::Result<Vec<AuditEntry>> {
    let file = fs::File::open(path)?;
    let mut out = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        out.push(serde_json::from_str(&line)?);
    }
    Ok(out)
}
