pub mod event;
pub mod incident;

pub use event::{CloudProvider, EventClass, SecurityEvent};
pub use incident::{Incident, IncidentCategory, IncidentStatus};
