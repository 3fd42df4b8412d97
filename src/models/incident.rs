use std::fmt;

use serde::{Deserialize, Serialize};

/// Category assigned by the rule (or anomaly check) that opened an incident
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IncidentCategory {
    BehavioralAnomaly,
    CrossCloudAuthChain,
    PrivilegeEscalation,
    ImpossibleSourceTravel,
    CrossCloudRecon,
    DataAccessFanIn,
    DegradedEvaluation,
}

impl fmt::Display for IncidentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IncidentCategory::BehavioralAnomaly => "behavioral-anomaly",
            IncidentCategory::CrossCloudAuthChain => "cross-cloud-auth-chain",
            IncidentCategory::PrivilegeEscalation => "privilege-escalation",
            IncidentCategory::ImpossibleSourceTravel => "impossible-source-travel",
            IncidentCategory::CrossCloudRecon => "cross-cloud-recon",
            IncidentCategory::DataAccessFanIn => "data-access-fan-in",
            IncidentCategory::DegradedEvaluation => "degraded-evaluation",
        };
        write!(f, "{}", s)
    }
}

impl IncidentCategory {
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "behavioral-anomaly" => Some(IncidentCategory::BehavioralAnomaly),
            "cross-cloud-auth-chain" => Some(IncidentCategory::CrossCloudAuthChain),
            "privilege-escalation" => Some(IncidentCategory::PrivilegeEscalation),
            "impossible-source-travel" => Some(IncidentCategory::ImpossibleSourceTravel),
            "cross-cloud-recon" => Some(IncidentCategory::CrossCloudRecon),
            "data-access-fan-in" => Some(IncidentCategory::DataAccessFanIn),
            "degraded-evaluation" => Some(IncidentCategory::DegradedEvaluation),
            _ => None,
        }
    }
}

/// Incident lifecycle state
///
/// Forward transitions only: open -> investigating -> resolved/dismissed.
/// An open incident may also be dismissed directly when its score decays
/// below the floor. Regressions require an explicit override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IncidentStatus {
    Open,
    Investigating,
    Resolved,
    Dismissed,
}

impl fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IncidentStatus::Open => "open",
            IncidentStatus::Investigating => "investigating",
            IncidentStatus::Resolved => "resolved",
            IncidentStatus::Dismissed => "dismissed",
        };
        write!(f, "{}", s)
    }
}

impl IncidentStatus {
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "open" => Some(IncidentStatus::Open),
            "investigating" => Some(IncidentStatus::Investigating),
            "resolved" => Some(IncidentStatus::Resolved),
            "dismissed" => Some(IncidentStatus::Dismissed),
            _ => None,
        }
    }

    /// Whether moving from `self` to `next` is a legal forward transition
    pub fn can_transition(self, next: IncidentStatus) -> bool {
        use IncidentStatus::*;
        matches!(
            (self, next),
            (Open, Investigating)
                | (Open, Dismissed)
                | (Investigating, Resolved)
                | (Investigating, Dismissed)
        )
    }

    /// Terminal states accept no further transitions without override
    pub fn is_terminal(self) -> bool {
        matches!(self, IncidentStatus::Resolved | IncidentStatus::Dismissed)
    }
}

/// A scored, stateful record of a suspected attack pattern
///
/// Incidents reference their triggering events by id rather than embedding
/// copies; the events themselves stay in the correlation windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    /// Deterministic id derived from category, correlation key and open time
    pub id: String,
    pub category: IncidentCategory,
    pub status: IncidentStatus,
    /// Risk score, always within [0, 100]
    pub score: f64,
    /// Label of the correlation key the incident fired on
    pub key: String,
    pub summary: String,
    /// Ids of the events that triggered or reinforced the incident
    pub event_ids: Vec<String>,
    pub opened_at: i64,
    pub last_reinforced: i64,
}

impl Incident {
    pub fn new(
        category: IncidentCategory,
        key: &str,
        score: f64,
        summary: String,
        event_ids: Vec<String>,
        opened_at: i64,
    ) -> Self {
        Incident {
            id: format!("{}:{}:{}", category, key, opened_at),
            category,
            status: IncidentStatus::Open,
            score: score.clamp(0.0, 100.0),
            key: key.to_string(),
            summary,
            event_ids,
            opened_at,
            last_reinforced: opened_at,
        }
    }
}
