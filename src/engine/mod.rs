//! Correlation and risk-scoring engine
//!
//! The engine consumes normalized security events, maintains per-asset
//! baselines and per-key correlation windows, evaluates the ordered rule
//! list, and emits risk-scored incidents.

pub mod baseline;
pub mod rules;
pub mod scoring;
pub mod shard;
pub mod window;

pub use baseline::{AssetBaseline, BaselineParams};
pub use rules::{RuleSet, RulesConfig};
pub use scoring::ScoringParams;
pub use shard::ShardedEngine;
pub use window::{CorrelationKey, CorrelationWindow, WindowConfig, WindowStore};

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geolocation::GeoResolver;
use crate::incident::{IncidentLedger, LedgerError};
use crate::models::{CloudProvider, Incident, IncidentCategory, IncidentStatus, SecurityEvent};

/// Errors surfaced by the engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// The event failed schema validation; it is rejected, never dropped
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    /// Rule evaluation exceeded its wall-clock budget
    #[error("Rule evaluation timed out in '{rule}' after {elapsed_ms}ms")]
    EvaluationTimeout { rule: &'static str, elapsed_ms: u64 },

    /// Internal state for this key is corrupted; the key is quarantined and
    /// further events touching it are rejected, other keys keep flowing
    #[error("State corruption on {key}: ingestion halted for this key")]
    StateCorruption { key: String },
}

/// Allowed characters in a resource id, compiled once per process
fn resource_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9@:/._-]+$").expect("resource id pattern is a valid regex")
    })
}

/// Static engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Worker shards for parallel ingestion
    pub shards: usize,
    pub window: WindowConfig,
    pub baseline: BaselineParams,
    pub scoring: ScoringParams,
    pub rules: RulesConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            shards: 4,
            window: WindowConfig::default(),
            baseline: BaselineParams::default(),
            scoring: ScoringParams::default(),
            rules: RulesConfig::default(),
        }
    }
}

/// Runtime-tunable parameters, swapped atomically between events
///
/// The retraining hook replaces the whole block at once so no evaluation
/// ever observes a half-applied update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineTuning {
    pub baseline: BaselineParams,
    pub scoring: ScoringParams,
    /// Per-rule score multipliers; unnamed rules default to 1.0
    #[serde(default)]
    pub rule_weights: HashMap<String, f64>,
}

impl EngineTuning {
    pub fn from_config(config: &EngineConfig) -> Self {
        EngineTuning {
            baseline: config.baseline.clone(),
            scoring: config.scoring.clone(),
            rule_weights: HashMap::new(),
        }
    }
}

/// Which correlation axes an ingest call should touch
///
/// Single-threaded callers use `Both`. The sharded engine routes each event
/// to the shard owning its identity key and the shard owning its resource
/// key, so per-key mutation stays serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAxis {
    Identity,
    Resource,
    Both,
}

impl KeyAxis {
    fn covers_identity(self) -> bool {
        matches!(self, KeyAxis::Identity | KeyAxis::Both)
    }

    fn covers_resource(self) -> bool {
        matches!(self, KeyAxis::Resource | KeyAxis::Both)
    }
}

/// Single-threaded correlation engine owning baselines, windows and ledger
///
/// One instance per shard; the sharded wrapper guarantees each key is only
/// ever touched by one instance.
pub struct CorrelationEngine {
    tuning: Arc<EngineTuning>,
    window_config: WindowConfig,
    rules: RuleSet,
    eval_budget: Duration,
    baselines: HashMap<(CloudProvider, String), AssetBaseline>,
    windows: WindowStore,
    ledger: IncidentLedger,
    quarantined: HashSet<CorrelationKey>,
}

impl CorrelationEngine {
    pub fn new(config: &EngineConfig, geo: Option<Arc<dyn GeoResolver>>) -> Self {
        CorrelationEngine {
            tuning: Arc::new(EngineTuning::from_config(config)),
            window_config: config.window.clone(),
            rules: RuleSet::builtin(&config.rules, geo),
            eval_budget: Duration::from_millis(config.rules.eval_budget_ms),
            baselines: HashMap::new(),
            windows: WindowStore::new(),
            ledger: IncidentLedger::new(),
            quarantined: HashSet::new(),
        }
    }

    /// Ingest one event across both correlation axes
    ///
    /// Returns the incidents the event triggered, possibly none. Malformed
    /// events and events touching a quarantined key are rejected.
    pub fn ingest(&mut self, event: SecurityEvent) -> Result<Vec<Incident>, EngineError> {
        self.ingest_arc(Arc::new(event), KeyAxis::Both)
    }

    /// Axis-scoped ingest used by the sharded engine
    pub fn ingest_arc(
        &mut self,
        event: Arc<SecurityEvent>,
        axis: KeyAxis,
    ) -> Result<Vec<Incident>, EngineError> {
        Self::validate(&event)?;

        // Reject before mutating anything if a touched key is quarantined
        let resource_key = CorrelationKey::resource_of(&event);
        let identity_key = CorrelationKey::identity_of(&event);
        if axis.covers_resource() && self.quarantined.contains(&resource_key) {
            return Err(EngineError::StateCorruption {
                key: resource_key.to_string(),
            });
        }
        if axis.covers_identity() && self.quarantined.contains(&identity_key) {
            return Err(EngineError::StateCorruption {
                key: identity_key.to_string(),
            });
        }

        let tuning = Arc::clone(&self.tuning);
        let started = Instant::now();
        let mut incidents = Vec::new();

        if axis.covers_resource() {
            let deviation = {
                let baseline = self
                    .baselines
                    .entry((event.provider, event.resource.clone()))
                    .or_insert_with(AssetBaseline::new);
                let deviation = baseline.deviation(&event, &tuning.baseline);
                baseline.observe(&event, &tuning.baseline);
                deviation
            };

            self.append_window(resource_key.clone(), Arc::clone(&event))?;

            if deviation > tuning.baseline.anomaly_z_threshold {
                let score = scoring::anomaly_score(deviation, &tuning.scoring);
                incidents.push(self.ledger.record_match(
                    IncidentCategory::BehavioralAnomaly,
                    &resource_key.to_string(),
                    score,
                    format!(
                        "access by {} deviates {:.1} sigma from the {} baseline",
                        event.identity, deviation, resource_key
                    ),
                    vec![event.id.clone()],
                    event.timestamp,
                    &tuning.scoring,
                ));
            }

            self.evaluate_window(&resource_key, started, &tuning, event.timestamp, &mut incidents);
        }

        if axis.covers_identity() {
            self.append_window(identity_key.clone(), Arc::clone(&event))?;
            self.evaluate_window(&identity_key, started, &tuning, event.timestamp, &mut incidents);
        }

        Ok(incidents)
    }

    fn append_window(
        &mut self,
        key: CorrelationKey,
        event: Arc<SecurityEvent>,
    ) -> Result<(), EngineError> {
        if let Err(violation) = self.windows.append(key.clone(), event, &self.window_config) {
            log::error!("window ordering violated on {}; quarantining key", violation.key);
            self.quarantined.insert(key);
            return Err(EngineError::StateCorruption {
                key: violation.key,
            });
        }
        Ok(())
    }

    /// Run the rule list over one window; a timeout becomes a
    /// degraded-evaluation incident rather than blocking the stream
    fn evaluate_window(
        &mut self,
        key: &CorrelationKey,
        started: Instant,
        tuning: &EngineTuning,
        now: i64,
        incidents: &mut Vec<Incident>,
    ) {
        let window = match self.windows.get(key) {
            Some(w) => w,
            None => return,
        };

        match self.rules.evaluate(window, started, self.eval_budget) {
            Ok(Some((rule_name, hit))) => {
                let weight = scoring::rule_weight(&tuning.rule_weights, rule_name);
                let score = scoring::combine(0.0, hit.base_severity, weight, &tuning.scoring);
                incidents.push(self.ledger.record_match(
                    hit.category,
                    &key.to_string(),
                    score,
                    hit.summary,
                    hit.event_ids,
                    now,
                    &tuning.scoring,
                ));
            }
            Ok(None) => {}
            Err(timeout) => {
                let err = EngineError::EvaluationTimeout {
                    rule: timeout.rule,
                    elapsed_ms: timeout.elapsed_ms,
                };
                log::warn!("{} on {}", err, key);
                let score = scoring::combine(0.0, 2, 1.0, &tuning.scoring);
                incidents.push(self.ledger.record_match(
                    IncidentCategory::DegradedEvaluation,
                    &key.to_string(),
                    score,
                    format!("rule evaluation exceeded budget in '{}'", timeout.rule),
                    Vec::new(),
                    now,
                    &tuning.scoring,
                ));
            }
        }
    }

    /// Schema validation for incoming events
    pub fn validate(event: &SecurityEvent) -> Result<(), EngineError> {
        if event.id.trim().is_empty() {
            return Err(EngineError::MalformedEvent("missing event id".to_string()));
        }
        if event.timestamp <= 0 {
            return Err(EngineError::MalformedEvent(format!(
                "invalid timestamp {}",
                event.timestamp
            )));
        }
        if event.identity.trim().is_empty() {
            return Err(EngineError::MalformedEvent("missing identity".to_string()));
        }
        if event.resource.trim().is_empty() {
            return Err(EngineError::MalformedEvent("missing resource".to_string()));
        }

        if !resource_pattern().is_match(&event.resource) {
            return Err(EngineError::MalformedEvent(format!(
                "resource id contains invalid characters: {}",
                event.resource
            )));
        }
        Ok(())
    }

    /// Apply score decay and prune windows that went fully stale
    pub fn decay_tick(&mut self, now: i64) -> Vec<Incident> {
        let tuning = Arc::clone(&self.tuning);
        self.windows.prune_stale(now, &self.window_config);
        self.ledger.decay_tick(now, &tuning.scoring)
    }

    /// Swap-on-commit update of tunable parameters
    pub fn apply_tuning(&mut self, tuning: EngineTuning) {
        self.tuning = Arc::new(tuning);
    }

    /// Move an incident to a new lifecycle state
    pub fn transition(
        &mut self,
        incident_id: &str,
        next: IncidentStatus,
        force: bool,
    ) -> Result<Incident, LedgerError> {
        self.ledger.transition(incident_id, next, force)
    }

    pub fn active_incidents(&self) -> Vec<Incident> {
        self.ledger.active().into_iter().cloned().collect()
    }

    pub fn quarantined_count(&self) -> usize {
        self.quarantined.len()
    }

    /// Snapshot baselines for persistence
    pub fn export_baselines(&self) -> Vec<((CloudProvider, String), AssetBaseline)> {
        self.baselines
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Restore baselines from persisted snapshots
    pub fn restore_baselines(
        &mut self,
        snapshots: impl IntoIterator<Item = ((CloudProvider, String), AssetBaseline)>,
    ) {
        for (key, baseline) in snapshots {
            self.baselines.insert(key, baseline);
        }
    }

    #[cfg(test)]
    pub(crate) fn corrupt_window_for_test(&mut self, key: &CorrelationKey) {
        if let Some(window) = self.windows.get_mut(key) {
            window.corrupt_for_test();
        }
        // Mirror what append_window does when it detects the violation
        if self
            .windows
            .get(key)
            .map(|w| w.verify_ordering().is_err())
            .unwrap_or(false)
        {
            self.quarantined.insert(key.clone());
        }
    }
}
