//! Incident lifecycle bookkeeping
//!
//! The ledger owns every incident an engine shard has opened, deduplicates
//! repeated matches into reinforcements, applies score decay, and enforces
//! the forward-only status machine.

use std::collections::HashMap;

use thiserror::Error;

use crate::engine::scoring::{self, ScoringParams};
use crate::models::{Incident, IncidentCategory, IncidentStatus};

/// Errors from ledger operations
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Unknown incident: {0}")]
    UnknownIncident(String),

    #[error("Invalid status transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: IncidentStatus,
        to: IncidentStatus,
    },
}

/// Tracks incidents keyed by (category, correlation key)
///
/// A second match for the same pair while the incident is still active
/// reinforces it instead of opening a duplicate.
#[derive(Debug, Default)]
pub struct IncidentLedger {
    incidents: HashMap<(IncidentCategory, String), Incident>,
}

impl IncidentLedger {
    pub fn new() -> Self {
        IncidentLedger {
            incidents: HashMap::new(),
        }
    }

    /// Record a match: open a new incident or reinforce the active one
    ///
    /// Returns a snapshot of the incident as it should be emitted downstream.
    pub fn record_match(
        &mut self,
        category: IncidentCategory,
        key: &str,
        score: f64,
        summary: String,
        event_ids: Vec<String>,
        now: i64,
        params: &ScoringParams,
    ) -> Incident {
        let slot = (category, key.to_string());
        match self.incidents.get_mut(&slot) {
            Some(existing) if !existing.status.is_terminal() => {
                existing.score =
                    (existing.score.max(score) + params.reinforce_bonus).clamp(0.0, 100.0);
                existing.last_reinforced = now;
                existing.summary = summary;
                for id in event_ids {
                    if !existing.event_ids.contains(&id) {
                        existing.event_ids.push(id);
                    }
                }
                existing.clone()
            }
            _ => {
                let incident = Incident::new(category, key, score, summary, event_ids, now);
                self.incidents.insert(slot, incident.clone());
                incident
            }
        }
    }

    /// Apply score decay to active incidents
    ///
    /// Open incidents that decay below the dismiss floor before anyone moved
    /// them to `investigating` are dismissed. Terminal incidents are evicted
    /// from the ledger once their final snapshot has been emitted, so a
    /// long-running shard only tracks active work. Returns snapshots of every
    /// incident that changed.
    pub fn decay_tick(&mut self, now: i64, params: &ScoringParams) -> Vec<Incident> {
        let mut changed = Vec::new();
        for incident in self.incidents.values_mut() {
            if incident.status.is_terminal() {
                continue;
            }
            let decayed =
                scoring::decay(incident.score, now - incident.last_reinforced, params);
            let score_moved = (decayed - incident.score).abs() > 1e-9;
            incident.score = decayed;

            if incident.status == IncidentStatus::Open && decayed < params.dismiss_floor {
                incident.status = IncidentStatus::Dismissed;
                changed.push(incident.clone());
            } else if score_moved {
                changed.push(incident.clone());
            }
        }
        self.incidents.retain(|_, i| !i.status.is_terminal());
        changed
    }

    /// Move an incident to a new status
    ///
    /// Only forward transitions are allowed unless `force` is set (the
    /// explicit operator override).
    pub fn transition(
        &mut self,
        incident_id: &str,
        next: IncidentStatus,
        force: bool,
    ) -> Result<Incident, LedgerError> {
        let incident = self
            .incidents
            .values_mut()
            .find(|i| i.id == incident_id)
            .ok_or_else(|| LedgerError::UnknownIncident(incident_id.to_string()))?;

        if !force && !incident.status.can_transition(next) {
            return Err(LedgerError::InvalidTransition {
                id: incident_id.to_string(),
                from: incident.status,
                to: next,
            });
        }
        incident.status = next;
        Ok(incident.clone())
    }

    pub fn get(&self, incident_id: &str) -> Option<&Incident> {
        self.incidents.values().find(|i| i.id == incident_id)
    }

    /// All incidents that are not yet resolved or dismissed
    pub fn active(&self) -> Vec<&Incident> {
        let mut active: Vec<&Incident> = self
            .incidents
            .values()
            .filter(|i| !i.status.is_terminal())
            .collect();
        active.sort_by(|a, b| a.id.cmp(&b.id));
        active
    }

    pub fn len(&self) -> usize {
        self.incidents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.incidents.is_empty()
    }
}
