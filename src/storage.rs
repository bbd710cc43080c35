//! SQLite persistence for the panel, identity registry, audit trail and
//! ingestion keys. Panel rows are append-only: every version of every cell is
//! stored and none is ever updated in place.

use rusqlite::{params, Connection};
use std::collections::BTreeSet;
use std::path::Path;

use crate::domain::PricePanelCell;
use crate::gateway::audit_log::{AuditEntry, AuditLog};
use crate::pipeline::orchestrator::{IngestionRecord, PipelineState, RunOutput};
use crate::pipeline::processing::matcher::IdentityRegistry;
use crate::pipeline::processing::panel::{PanelTable, PricePanel};

pub struct PanelStore {
    conn: Connection,
}

impl PanelStore {
    /// Open (or create) `panel.db` under `data_root`.
    pub fn open_at_root<P: AsRef<Path>>(data_root: P) -> anyhow::Result<Self> {
        let root = data_root.as_ref();
        std::fs::create_dir_all(root)?;
        Self::open(root.join("panel.db"))
    }

    pub fn open<P: AsRef<Path>>(db_path: P) -> anyhow::Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            CREATE TABLE IF NOT EXISTS panel_cells (
                identity_id  INTEGER NOT NULL,
                period       TEXT NOT NULL,
                version      INTEGER NOT NULL,
                cell_json    TEXT NOT NULL,
                PRIMARY KEY (identity_id, period, version)
            );
            CREATE TABLE IF NOT EXISTS audit_entries (
                sequence     INTEGER PRIMARY KEY,
                entry_id     TEXT NOT NULL UNIQUE,
                identity_id  INTEGER NOT NULL,
                entry_json   TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS ingestions (
                ingestion_key       TEXT PRIMARY KEY,
                document_id         TEXT NOT NULL,
                period              TEXT NOT NULL,
                rules_version       TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS registry_snapshot (
                id             INTEGER PRIMARY KEY CHECK (id = 1),
                registry_json  TEXT NOT NULL
            );
            "#,
        )?;
        Ok(Self { conn })
    }

    // Panel cells
    /// Insert any cell versions not already stored. Existing rows are left
    /// untouched; returns the number of rows written.
    pub fn save_panel(&self, panel: &PricePanel) -> anyhow::Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO panel_cells (identity_id, period, version, cell_json) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for cell in panel.all_versions() {
                let json = serde_json::to_string(cell)?;
                written += stmt.execute(params![
                    cell.identity_id.0 as i64,
                    cell.period.to_string(),
                    cell.version as i64,
                    json
                ])?;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    pub fn load_panel(&self) -> anyhow::Result<PricePanel> {
        let mut stmt = self
            .conn
            .prepare("SELECT cell_json FROM panel_cells ORDER BY identity_id, period, version")?;
        let mut rows = stmt.query([])?;
        let mut cells = Vec::new();
        while let Some(row) = rows.next()? {
            let json: String = row.get(0)?;
            let cell: PricePanelCell = serde_json::from_str(&json)?;
            cells.push(cell);
        }
        let table = PanelTable { rules_version: String::new(), rows: cells };
        Ok(table.into_panel()?)
    }

    // Audit trail
    pub fn append_audit(&self, entries: &[AuditEntry]) -> anyhow::Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO audit_entries (sequence, entry_id, identity_id, entry_json) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for entry in entries {
                let json = serde_json::to_string(entry)?;
                written += stmt.execute(params![
                    entry.sequence as i64,
                    entry.entry_id.to_string(),
                    entry.identity_id.0 as i64,
                    json
                ])?;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    pub fn load_audit(&self) -> anyhow::Result<AuditLog> {
        let mut stmt = self.conn.prepare("SELECT entry_json FROM audit_entries ORDER BY sequence")?;
        let mut rows = stmt.query([])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            let json: String = row.get(0)?;
            entries.push(serde_json::from_str::<AuditEntry>(&json)?);
        }
        Ok(AuditLog::from_entries(entries))
    }

    // Registry
    pub fn save_registry(&self, registry: &IdentityRegistry) -> anyhow::Result<()> {
        let json = serde_json::to_string(registry)?;
        self.conn.execute(
            "INSERT INTO registry_snapshot (id, registry_json) VALUES (1, ?1)
             ON CONFLICT(id) DO UPDATE SET registry_json=excluded.registry_json",
            params![json],
        )?;
        Ok(())
    }

    pub fn load_registry(&self) -> anyhow::Result<IdentityRegistry> {
        let mut stmt = self.conn.prepare("SELECT registry_json FROM registry_snapshot WHERE id = 1")?;
        let mut rows = stmt.query([])?;
        if let Some(row) = rows.next()? {
            let json: String = row.get(0)?;
            Ok(serde_json::from_str(&json)?)
        } else {
            Ok(IdentityRegistry::new())
        }
    }

    // Ingestion keys
    pub fn has_ingestion(&self, ingestion_key: &str) -> anyhow::Result<bool> {
        let mut stmt = self.conn.prepare("SELECT 1 FROM ingestions WHERE ingestion_key = ?1")?;
        let mut rows = stmt.query(params![ingestion_key])?;
        Ok(rows.next()?.is_some())
    }

    pub fn ingestion_keys(&self) -> anyhow::Result<BTreeSet<String>> {
        let mut stmt = self.conn.prepare("SELECT ingestion_key FROM ingestions")?;
        let mut rows = stmt.query([])?;
        let mut keys = BTreeSet::new();
        while let Some(row) = rows.next()? {
            keys.insert(row.get::<_, String>(0)?);
        }
        Ok(keys)
    }

    pub fn record_ingestion(&self, record: &IngestionRecord) -> anyhow::Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO ingestions (ingestion_key, document_id, period, rules_version) VALUES (?1, ?2, ?3, ?4)",
            params![
                record.ingestion_key,
                record.document_id,
                record.period.to_string(),
                record.rules_version
            ],
        )?;
        Ok(())
    }

    /// Persist everything a run produced.
    pub fn save_run(&self, output: &RunOutput) -> anyhow::Result<()> {
        let cells = self.save_panel(&output.panel)?;
        let entries = self.append_audit(output.audit.entries())?;
        self.save_registry(&output.registry)?;
        for record in &output.ingestions {
            self.record_ingestion(record)?;
        }
        tracing::info!(
            "PanelStore: saved cells={} audit_entries={} ingestions={}",
            cells,
            entries,
            output.ingestions.len()
        );
        Ok(())
    }

    /// State to resume an incremental run from.
    pub fn load_state(&self) -> anyhow::Result<PipelineState> {
        Ok(PipelineState {
            panel: self.load_panel()?,
            registry: self.load_registry()?,
            audit: self.load_audit()?,
            ingested: self.ingestion_keys()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MatchConfidence, UnitBasis};
    use crate::gateway::audit_log::AuditEvent;
    use crate::pipeline::processing::panel::{CellRef, Correction};
    use chrono::Utc;
    use rust_decimal::Decimal;
    use std::str::FromStr;
    use tempfile::tempdir;

    #[test]
    fn test_panel_and_audit_survive_reopen() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let period = "2019".parse()?;
        let id = crate::domain::ItemId(0);

        let mut panel = PricePanel::new();
        let mut audit = AuditLog::new();
        panel.insert(id, period, Decimal::from_str("0.79")?, UnitBasis::each(), "doc-a", MatchConfidence::Exact)?;
        panel.supersede(
            CellRef { identity_id: id, period, version: 1 },
            Correction {
                price: Decimal::from_str("0.81")?,
                unit: UnitBasis::each(),
                source_document_id: "doc-b".to_string(),
                confidence: MatchConfidence::ManualOverride,
            },
            "reprinted list",
            &mut audit,
            Utc::now(),
        )?;
        audit.record(id, Utc::now(), AuditEvent::Merge { into: id, reason: "test".to_string() });

        {
            let store = PanelStore::open_at_root(dir.path())?;
            assert_eq!(store.save_panel(&panel)?, 2);
            assert_eq!(store.save_panel(&panel)?, 0);
            store.append_audit(audit.entries())?;
        }

        let store = PanelStore::open_at_root(dir.path())?;
        let loaded = store.load_panel()?;
        assert_eq!(loaded, panel);
        assert_eq!(loaded.current(id, period).map(|c| c.version), Some(2));
        assert_eq!(store.load_audit()?, audit);
        assert!(store.load_registry()?.is_empty());
        Ok(())
    }

    #[test]
    fn test_ingestion_keys() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = PanelStore::open_at_root(dir.path())?;
        let record = IngestionRecord {
            ingestion_key: "k1".to_string(),
            document_id: "d1".to_string(),
            period: "2020".parse()?,
            rules_version: "rules-v1".to_string(),
        };
        assert!(!store.has_ingestion("k1")?);
        store.record_ingestion(&record)?;
        store.record_ingestion(&record)?;
        assert!(store.has_ingestion("k1")?);
        assert_eq!(store.ingestion_keys()?.into_iter().collect::<Vec<_>>(), vec!["k1".to_string()]);
        Ok(())
    }
}
