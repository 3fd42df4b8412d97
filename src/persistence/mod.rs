//! Persistence module for engine state
//!
//! Stores baseline snapshots and emitted incidents so the daemon keeps
//! its learned context across restarts.

pub mod sqlite_store;

pub use sqlite_store::SqliteStateStore;

use crate::engine::AssetBaseline;
use crate::models::{CloudProvider, Incident, IncidentCategory, IncidentStatus};
use thiserror::Error;

/// Errors that can occur during persistence operations
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid data in database: {0}")]
    InvalidData(String),

    #[error("Unknown incident: {0}")]
    UnknownIncident(String),
}

/// Trait for state persistence backends
///
/// Implementations can use different storage backends (SQLite, Redis,
/// etc.). Baselines are stored as opaque snapshots; the engine owns
/// their internal shape.
pub trait StateStore: Send + Sync {
    // =====================
    // Baseline Snapshots
    // =====================

    /// Store or replace the baseline snapshot for one asset
    fn put_baseline(
        &self,
        provider: CloudProvider,
        resource: &str,
        baseline: &AssetBaseline,
        updated_at: i64,
    ) -> Result<(), PersistenceError>;

    /// Load the baseline snapshot for one asset
    fn get_baseline(
        &self,
        provider: CloudProvider,
        resource: &str,
    ) -> Result<Option<AssetBaseline>, PersistenceError>;

    /// Load every stored baseline, for restoring the engine at startup
    fn load_all_baselines(
        &self,
    ) -> Result<Vec<((CloudProvider, String), AssetBaseline)>, PersistenceError>;

    // =====================
    // Incident Storage
    // =====================

    /// Store an incident, replacing any previous row with the same id
    ///
    /// Reinforcements and decay updates reuse the incident id, so upsert
    /// keeps one row per incident.
    fn store_incident(&self, incident: &Incident) -> Result<(), PersistenceError>;

    /// Update the status of a stored incident
    fn update_incident_status(
        &self,
        incident_id: &str,
        status: IncidentStatus,
    ) -> Result<(), PersistenceError>;

    /// Get recent incidents, newest first
    fn get_recent_incidents(&self, limit: usize) -> Result<Vec<Incident>, PersistenceError>;

    /// Get incidents that are still open or under investigation
    fn get_active_incidents(&self) -> Result<Vec<Incident>, PersistenceError>;

    /// Incident counts per category
    fn count_by_category(&self) -> Result<Vec<(IncidentCategory, usize)>, PersistenceError>;

    /// Incident counts per lifecycle status
    fn count_by_status(&self) -> Result<Vec<(IncidentStatus, usize)>, PersistenceError>;

    // =====================
    // Maintenance
    // =====================

    /// Remove terminal incidents opened before the given timestamp
    ///
    /// Active incidents are never pruned regardless of age.
    fn prune_old_incidents(&self, before_timestamp: i64) -> Result<usize, PersistenceError>;

    /// Clear all data (useful for testing)
    fn clear_all(&self) -> Result<(), PersistenceError>;
}
