//! Per-asset behavioral baselines
//!
//! Each (provider, resource) pair carries a rolling statistical profile of
//! how the asset is normally accessed: how often, by whom, and at what time
//! of day. Statistics decay exponentially so that old behavior fades instead
//! of pinning the profile forever.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::SecurityEvent;

/// Tunable parameters for baseline maintenance and deviation scoring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineParams {
    /// Half-life of the decayed statistics, in seconds
    pub half_life_secs: f64,
    /// Deviation score above which a low-confidence anomaly incident opens
    pub anomaly_z_threshold: f64,
    /// Observations required before deviation scoring kicks in
    pub min_observations: u64,
    /// Deviation added when the acting identity is new for the asset
    pub novel_actor_weight: f64,
    /// Deviation added when the access falls in a historically quiet hour
    pub off_hours_weight: f64,
}

impl Default for BaselineParams {
    fn default() -> Self {
        BaselineParams {
            half_life_secs: 6.0 * 3600.0,
            anomaly_z_threshold: 3.5,
            min_observations: 20,
            novel_actor_weight: 1.5,
            off_hours_weight: 1.0,
        }
    }
}

/// Rolling statistical profile for one (provider, resource) pair
///
/// All statistics use exponential decay keyed off the gap since the previous
/// observation. The profile is never deleted while the resource exists; it
/// only fades.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetBaseline {
    /// Timestamp of the most recent observation
    last_seen: i64,
    /// Total observations, undecayed
    observations: u64,
    /// Decayed mean of the gap between consecutive accesses, seconds
    mean_gap: f64,
    /// Decayed variance of the access gap
    var_gap: f64,
    /// Decayed access frequency per acting identity
    actors: HashMap<String, f64>,
    /// Decayed hour-of-day access histogram (UTC)
    hours: [f64; 24],
}

impl AssetBaseline {
    pub fn new() -> Self {
        AssetBaseline {
            last_seen: 0,
            observations: 0,
            mean_gap: 0.0,
            var_gap: 0.0,
            actors: HashMap::new(),
            hours: [0.0; 24],
        }
    }

    pub fn observations(&self) -> u64 {
        self.observations
    }

    pub fn last_seen(&self) -> i64 {
        self.last_seen
    }

    /// Decay factor applied to the existing statistics for a gap of
    /// `elapsed_secs`. Monotonically non-increasing in elapsed time, so a
    /// later timestamp never weights history more heavily than an earlier
    /// one would.
    pub fn decay_factor(elapsed_secs: f64, params: &BaselineParams) -> f64 {
        if elapsed_secs <= 0.0 {
            return 1.0;
        }
        0.5_f64.powf(elapsed_secs / params.half_life_secs)
    }

    /// Deviation of `event` against the current profile
    ///
    /// Returns a z-scale score combining access-gap deviation, actor novelty
    /// and off-hours access. Always 0.0 during warmup.
    pub fn deviation(&self, event: &SecurityEvent, params: &BaselineParams) -> f64 {
        if self.observations < params.min_observations {
            return 0.0;
        }

        let gap = (event.timestamp - self.last_seen).max(0) as f64;
        let sigma = self.var_gap.sqrt().max(1.0);
        let gap_z = (gap - self.mean_gap).abs() / sigma;

        let total_actor_weight: f64 = self.actors.values().sum();
        let actor_share = self
            .actors
            .get(&event.identity)
            .copied()
            .unwrap_or(0.0)
            / total_actor_weight.max(f64::EPSILON);
        let novelty = if actor_share < 0.01 {
            params.novel_actor_weight
        } else {
            0.0
        };

        let hour = hour_of_day(event.timestamp);
        let total_hours: f64 = self.hours.iter().sum();
        let hour_share = self.hours[hour] / total_hours.max(f64::EPSILON);
        // Uniform traffic would put ~4.2% in each hour; under a quarter of
        // that counts as a quiet hour.
        let off_hours = if hour_share < 0.01 {
            params.off_hours_weight
        } else {
            0.0
        };

        gap_z + novelty + off_hours
    }

    /// Fold an event into the profile
    ///
    /// Existing statistics are decayed by the elapsed gap before the new
    /// observation is blended in. Out-of-order events (timestamp before
    /// `last_seen`) contribute with zero elapsed time rather than reviving
    /// decayed history.
    pub fn observe(&mut self, event: &SecurityEvent, params: &BaselineParams) {
        let elapsed = if self.observations == 0 {
            0.0
        } else {
            (event.timestamp - self.last_seen).max(0) as f64
        };
        let decay = Self::decay_factor(elapsed, params);
        let blend = 1.0 - decay * 0.9; // new-sample weight, floor of 0.1

        if self.observations > 0 {
            let gap = elapsed;
            let delta = gap - self.mean_gap;
            self.mean_gap += blend * delta;
            self.var_gap = (1.0 - blend) * (self.var_gap + blend * delta * delta);
        }

        for weight in self.actors.values_mut() {
            *weight *= decay;
        }
        *self.actors.entry(event.identity.clone()).or_insert(0.0) += 1.0;
        self.actors.retain(|_, w| *w > 1e-6);

        for bucket in self.hours.iter_mut() {
            *bucket *= decay;
        }
        self.hours[hour_of_day(event.timestamp)] += 1.0;

        self.last_seen = self.last_seen.max(event.timestamp);
        self.observations += 1;
    }
}

impl Default for AssetBaseline {
    fn default() -> Self {
        Self::new()
    }
}

fn hour_of_day(timestamp: i64) -> usize {
    ((timestamp.rem_euclid(86_400)) / 3600) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CloudProvider, EventClass};
    use std::collections::BTreeMap;

    fn create_event(identity: &str, timestamp: i64) -> SecurityEvent {
        SecurityEvent {
            id: format!("evt-{}", timestamp),
            timestamp,
            provider: CloudProvider::Aws,
            class: EventClass::DataAccess,
            event_type: "OBJECT_READ".to_string(),
            identity: identity.to_string(),
            resource: "s3://prod-archive".to_string(),
            source_ip: None,
            attributes: BTreeMap::new(),
        }
    }

    #[test]
    fn test_decay_factor_monotonic_in_recency() {
        let params = BaselineParams::default();
        let mut previous = AssetBaseline::decay_factor(0.0, &params);
        for elapsed in [60.0, 600.0, 3600.0, 86_400.0, 864_000.0] {
            let factor = AssetBaseline::decay_factor(elapsed, &params);
            assert!(
                factor <= previous,
                "decay factor must not grow with elapsed time: {} > {}",
                factor,
                previous
            );
            previous = factor;
        }
    }

    #[test]
    fn test_decay_factor_half_life() {
        let params = BaselineParams {
            half_life_secs: 3600.0,
            ..BaselineParams::default()
        };
        let factor = AssetBaseline::decay_factor(3600.0, &params);
        assert!((factor - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_warmup_produces_zero_deviation() {
        let params = BaselineParams::default();
        let mut baseline = AssetBaseline::new();

        for i in 0..10 {
            let event = create_event("svc-a", 1_700_000_000 + i * 600);
            assert_eq!(baseline.deviation(&event, &params), 0.0);
            baseline.observe(&event, &params);
        }
        assert_eq!(baseline.observations(), 10);
    }

    #[test]
    fn test_novel_actor_raises_deviation() {
        let params = BaselineParams {
            min_observations: 5,
            ..BaselineParams::default()
        };
        let mut baseline = AssetBaseline::new();

        // Establish a steady rhythm for one actor
        for i in 0..50 {
            baseline.observe(&create_event("svc-a", 1_700_000_000 + i * 600), &params);
        }

        let familiar = create_event("svc-a", 1_700_000_000 + 50 * 600);
        let stranger = create_event("intruder", 1_700_000_000 + 50 * 600);

        let familiar_dev = baseline.deviation(&familiar, &params);
        let stranger_dev = baseline.deviation(&stranger, &params);
        assert!(
            stranger_dev >= familiar_dev + params.novel_actor_weight - 1e-9,
            "novel actor should add weight: {} vs {}",
            stranger_dev,
            familiar_dev
        );
    }

    #[test]
    fn test_gap_deviation_for_burst() {
        let params = BaselineParams {
            min_observations: 5,
            ..BaselineParams::default()
        };
        let mut baseline = AssetBaseline::new();

        // Hourly cadence
        for i in 0..60 {
            baseline.observe(&create_event("svc-a", 1_700_000_000 + i * 3600), &params);
        }

        // A same-second follow-up access is far off the learned gap
        let burst = create_event("svc-a", 1_700_000_000 + 59 * 3600 + 1);
        let on_time = create_event("svc-a", 1_700_000_000 + 60 * 3600);
        assert!(baseline.deviation(&burst, &params) > baseline.deviation(&on_time, &params));
    }

    #[test]
    fn test_out_of_order_event_does_not_rewind() {
        let params = BaselineParams::default();
        let mut baseline = AssetBaseline::new();

        baseline.observe(&create_event("svc-a", 1_700_000_000), &params);
        baseline.observe(&create_event("svc-a", 1_700_003_600), &params);
        // Late-arriving older event
        baseline.observe(&create_event("svc-a", 1_700_000_100), &params);

        assert_eq!(baseline.last_seen(), 1_700_003_600);
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let params = BaselineParams::default();
        let mut baseline = AssetBaseline::new();
        for i in 0..30 {
            baseline.observe(&create_event("svc-a", 1_700_000_000 + i * 900), &params);
        }

        let json = serde_json::to_string(&baseline).unwrap();
        let restored: AssetBaseline = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.observations(), baseline.observations());
        assert_eq!(restored.last_seen(), baseline.last_seen());

        let probe = create_event("svc-a", 1_700_000_000 + 30 * 900);
        assert!(
            (restored.deviation(&probe, &params) - baseline.deviation(&probe, &params)).abs()
                < 1e-9
        );
    }
}
