use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Cloud provider that produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudProvider {
    Aws,
    Azure,
    Gcp,
}

impl fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloudProvider::Aws => write!(f, "aws"),
            CloudProvider::Azure => write!(f, "azure"),
            CloudProvider::Gcp => write!(f, "gcp"),
        }
    }
}

impl CloudProvider {
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "aws" => Some(CloudProvider::Aws),
            "azure" => Some(CloudProvider::Azure),
            "gcp" => Some(CloudProvider::Gcp),
            _ => None,
        }
    }
}

/// Broad class of a security event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventClass {
    Network,
    Identity,
    DataAccess,
    ConfigChange,
}

impl fmt::Display for EventClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventClass::Network => write!(f, "network"),
            EventClass::Identity => write!(f, "identity"),
            EventClass::DataAccess => write!(f, "data-access"),
            EventClass::ConfigChange => write!(f, "config-change"),
        }
    }
}

/// A normalized security event from the data lake feed
///
/// Events are immutable once ingested. The engine shares them between
/// correlation windows via `Arc`, so the struct itself is never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    /// Unique event id assigned by the data lake
    pub id: String,
    /// Unix timestamp in seconds
    pub timestamp: i64,
    pub provider: CloudProvider,
    pub class: EventClass,
    /// Free-form event type, e.g. "FAILED_AUTH", "OBJECT_READ"
    pub event_type: String,
    /// Acting principal (user, role, service account)
    pub identity: String,
    /// Target resource identifier, scoped to the provider
    pub resource: String,
    /// Source address if the provider reported one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ip: Option<IpAddr>,
    /// Raw provider attributes, kept ordered for deterministic output
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl SecurityEvent {
    /// True for identity-class events that represent a failed authentication
    pub fn is_failed_auth(&self) -> bool {
        self.class == EventClass::Identity && self.event_type.to_uppercase().contains("FAIL")
    }
}
