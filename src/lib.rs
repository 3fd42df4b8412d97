pub mod config;
pub mod engine;
pub mod geolocation;
pub mod incident;
pub mod input;
pub mod models;
pub mod orchestrator;
pub mod output;
pub mod persistence;

// Re-export commonly used types
pub use engine::{CorrelationEngine, EngineConfig, EngineError, ShardedEngine};
pub use geolocation::{GeoIpService, GeoResolver};
pub use incident::IncidentLedger;
pub use models::{Incident, IncidentStatus, SecurityEvent};
pub use persistence::{SqliteStateStore, StateStore};
