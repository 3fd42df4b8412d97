//! SQLite implementation of the StateStore trait

use super::{PersistenceError, StateStore};
use crate::engine::AssetBaseline;
use crate::models::{CloudProvider, Incident, IncidentCategory, IncidentStatus};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

/// SQLite-based state storage
///
/// Stores baseline snapshots and incidents in a SQLite database,
/// providing persistence across daemon restarts.
pub struct SqliteStateStore {
    conn: Mutex<Connection>,
}

impl SqliteStateStore {
    /// Create a new SQLite state store at the specified path
    ///
    /// Creates the database file and initializes the schema if it doesn't exist.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, PersistenceError> {
        let conn = Connection::open(db_path)?;
        let store = SqliteStateStore {
            conn: Mutex::new(conn),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Create an in-memory SQLite database (useful for testing)
    pub fn in_memory() -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory()?;
        let store = SqliteStateStore {
            conn: Mutex::new(conn),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Initialize the database schema
    fn initialize_schema(&self) -> Result<(), PersistenceError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(include_str!("schema.sql"))?;
        Ok(())
    }

    fn parse_provider(s: &str) -> Result<CloudProvider, PersistenceError> {
        CloudProvider::from_str_opt(s)
            .ok_or_else(|| PersistenceError::InvalidData(format!("Unknown provider: {}", s)))
    }

    fn parse_category(s: &str) -> Result<IncidentCategory, PersistenceError> {
        IncidentCategory::from_str_opt(s)
            .ok_or_else(|| PersistenceError::InvalidData(format!("Unknown category: {}", s)))
    }

    fn parse_status(s: &str) -> Result<IncidentStatus, PersistenceError> {
        IncidentStatus::from_str_opt(s)
            .ok_or_else(|| PersistenceError::InvalidData(format!("Unknown status: {}", s)))
    }

    fn row_to_incident(
        row: (String, String, String, f64, String, String, String, i64, i64),
    ) -> Result<Incident, PersistenceError> {
        let (id, category, status, score, key, summary, event_ids_json, opened_at, last_reinforced) =
            row;
        let event_ids: Vec<String> = serde_json::from_str(&event_ids_json)
            .map_err(|e| PersistenceError::InvalidData(format!("Bad event id list: {}", e)))?;
        Ok(Incident {
            id,
            category: Self::parse_category(&category)?,
            status: Self::parse_status(&status)?,
            score,
            key,
            summary,
            event_ids,
            opened_at,
            last_reinforced,
        })
    }
}

const INCIDENT_COLUMNS: &str =
    "id, category, status, score, corr_key, summary, event_ids, opened_at, last_reinforced";

impl StateStore for SqliteStateStore {
    fn put_baseline(
        &self,
        provider: CloudProvider,
        resource: &str,
        baseline: &AssetBaseline,
        updated_at: i64,
    ) -> Result<(), PersistenceError> {
        let snapshot = serde_json::to_string(baseline)
            .map_err(|e| PersistenceError::InvalidData(format!("Unencodable baseline: {}", e)))?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO baselines (provider, resource, snapshot, updated_at)
             VALUES (?, ?, ?, ?)",
            params![provider.to_string(), resource, snapshot, updated_at],
        )?;
        Ok(())
    }

    fn get_baseline(
        &self,
        provider: CloudProvider,
        resource: &str,
    ) -> Result<Option<AssetBaseline>, PersistenceError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT snapshot FROM baselines WHERE provider = ? AND resource = ?")?;

        let result = stmt.query_row(params![provider.to_string(), resource], |row| {
            let snapshot: String = row.get(0)?;
            Ok(snapshot)
        });

        match result {
            Ok(snapshot) => {
                let baseline = serde_json::from_str(&snapshot).map_err(|e| {
                    PersistenceError::InvalidData(format!("Undecodable baseline: {}", e))
                })?;
                Ok(Some(baseline))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn load_all_baselines(
        &self,
    ) -> Result<Vec<((CloudProvider, String), AssetBaseline)>, PersistenceError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT provider, resource, snapshot FROM baselines")?;

        let rows = stmt
            .query_map([], |row| {
                let provider: String = row.get(0)?;
                let resource: String = row.get(1)?;
                let snapshot: String = row.get(2)?;
                Ok((provider, resource, snapshot))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut baselines = Vec::with_capacity(rows.len());
        for (provider, resource, snapshot) in rows {
            let provider = Self::parse_provider(&provider)?;
            let baseline = serde_json::from_str(&snapshot).map_err(|e| {
                PersistenceError::InvalidData(format!("Undecodable baseline: {}", e))
            })?;
            baselines.push(((provider, resource), baseline));
        }
        Ok(baselines)
    }

    fn store_incident(&self, incident: &Incident) -> Result<(), PersistenceError> {
        let event_ids = serde_json::to_string(&incident.event_ids)
            .map_err(|e| PersistenceError::InvalidData(format!("Unencodable id list: {}", e)))?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO incidents
             (id, category, status, score, corr_key, summary, event_ids, opened_at, last_reinforced)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                incident.id,
                incident.category.to_string(),
                incident.status.to_string(),
                incident.score,
                incident.key,
                incident.summary,
                event_ids,
                incident.opened_at,
                incident.last_reinforced
            ],
        )?;
        Ok(())
    }

    fn update_incident_status(
        &self,
        incident_id: &str,
        status: IncidentStatus,
    ) -> Result<(), PersistenceError> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE incidents SET status = ? WHERE id = ?",
            params![status.to_string(), incident_id],
        )?;
        if updated == 0 {
            return Err(PersistenceError::UnknownIncident(incident_id.to_string()));
        }
        Ok(())
    }

    fn get_recent_incidents(&self, limit: usize) -> Result<Vec<Incident>, PersistenceError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM incidents ORDER BY last_reinforced DESC LIMIT ?",
            INCIDENT_COLUMNS
        ))?;

        let rows = stmt
            .query_map(params![limit], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                    row.get(8)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(Self::row_to_incident).collect()
    }

    fn get_active_incidents(&self) -> Result<Vec<Incident>, PersistenceError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM incidents
             WHERE status IN ('open', 'investigating')
             ORDER BY score DESC",
            INCIDENT_COLUMNS
        ))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                    row.get(8)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(Self::row_to_incident).collect()
    }

    fn count_by_category(&self) -> Result<Vec<(IncidentCategory, usize)>, PersistenceError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT category, COUNT(*) FROM incidents GROUP BY category ORDER BY COUNT(*) DESC",
        )?;

        let rows = stmt
            .query_map([], |row| {
                let category: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                Ok((category, count))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(category, count)| Ok((Self::parse_category(&category)?, count as usize)))
            .collect()
    }

    fn count_by_status(&self) -> Result<Vec<(IncidentStatus, usize)>, PersistenceError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*) FROM incidents GROUP BY status ORDER BY COUNT(*) DESC",
        )?;

        let rows = stmt
            .query_map([], |row| {
                let status: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                Ok((status, count))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(status, count)| Ok((Self::parse_status(&status)?, count as usize)))
            .collect()
    }

    fn prune_old_incidents(&self, before_timestamp: i64) -> Result<usize, PersistenceError> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM incidents
             WHERE opened_at < ? AND status IN ('resolved', 'dismissed')",
            params![before_timestamp],
        )?;
        Ok(deleted)
    }

    fn clear_all(&self) -> Result<(), PersistenceError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "DELETE FROM baselines;
             DELETE FROM incidents;",
        )?;
        Ok(())
    }
}
