//! Risk scoring and decay
//!
//! A score blends the baseline deviation with the matched rule's severity,
//! clamped to [0, 100]. Open incidents lose score exponentially once the
//! grace period passes without reinforcement; decaying under the floor
//! dismisses an incident that nobody picked up.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Tunable scoring parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringParams {
    /// Weight of the normalized anomaly deviation, in score points
    pub anomaly_weight: f64,
    /// Weight of the normalized rule severity, in score points
    pub severity_weight: f64,
    /// Seconds without reinforcement before decay starts
    pub grace_secs: i64,
    /// Half-life of the decaying score once past the grace period, seconds
    pub decay_half_life_secs: f64,
    /// Open incidents decaying below this score are dismissed
    pub dismiss_floor: f64,
    /// Score points added when an open incident is reinforced
    pub reinforce_bonus: f64,
}

impl Default for ScoringParams {
    fn default() -> Self {
        ScoringParams {
            anomaly_weight: 40.0,
            severity_weight: 60.0,
            grace_secs: 600,
            decay_half_life_secs: 1800.0,
            dismiss_floor: 15.0,
            reinforce_bonus: 10.0,
        }
    }
}

/// Deviation beyond this z-scale value saturates the anomaly component
const DEVIATION_SATURATION: f64 = 6.0;

/// Combine anomaly deviation and rule severity into a risk score
///
/// `rule_weight` is the per-rule multiplier from the tuning table (1.0 when
/// unset). The result is always within [0, 100].
pub fn combine(
    deviation: f64,
    base_severity: u8,
    rule_weight: f64,
    params: &ScoringParams,
) -> f64 {
    let deviation_norm = (deviation / DEVIATION_SATURATION).clamp(0.0, 1.0);
    let severity_norm = (f64::from(base_severity) / 10.0).clamp(0.0, 1.0);
    let raw = params.anomaly_weight * deviation_norm
        + params.severity_weight * severity_norm * rule_weight;
    raw.clamp(0.0, 100.0)
}

/// Score for an anomaly-only incident (no rule matched)
pub fn anomaly_score(deviation: f64, params: &ScoringParams) -> f64 {
    combine(deviation, 3, 1.0, params)
}

/// Apply time decay to a score
///
/// Inside the grace period the score holds; afterwards it halves every
/// `decay_half_life_secs`.
pub fn decay(score: f64, secs_since_reinforced: i64, params: &ScoringParams) -> f64 {
    if secs_since_reinforced <= params.grace_secs {
        return score;
    }
    let overdue = (secs_since_reinforced - params.grace_secs) as f64;
    (score * 0.5_f64.powf(overdue / params.decay_half_life_secs)).clamp(0.0, 100.0)
}

/// Look up the weight for a rule, defaulting to 1.0
pub fn rule_weight(weights: &HashMap<String, f64>, rule: &str) -> f64 {
    weights.get(rule).copied().unwrap_or(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine_clamped_to_range() {
        let params = ScoringParams::default();
        for deviation in [0.0, 2.5, 10.0, 1000.0] {
            for severity in [0u8, 5, 10] {
                for weight in [0.0, 1.0, 5.0] {
                    let score = combine(deviation, severity, weight, &params);
                    assert!((0.0..=100.0).contains(&score), "score {} out of range", score);
                }
            }
        }
    }

    #[test]
    fn test_combine_monotonic_in_severity() {
        let params = ScoringParams::default();
        let low = combine(1.0, 3, 1.0, &params);
        let high = combine(1.0, 9, 1.0, &params);
        assert!(high > low);
    }

    #[test]
    fn test_rule_weight_scales_severity_component() {
        let params = ScoringParams::default();
        let neutral = combine(0.0, 8, 1.0, &params);
        let boosted = combine(0.0, 8, 1.25, &params);
        assert!(boosted > neutral);
        assert!((boosted - neutral * 1.25).abs() < 1e-9);
    }

    #[test]
    fn test_decay_holds_during_grace() {
        let params = ScoringParams::default();
        assert_eq!(decay(80.0, 0, &params), 80.0);
        assert_eq!(decay(80.0, params.grace_secs, &params), 80.0);
    }

    #[test]
    fn test_decay_half_life() {
        let params = ScoringParams::default();
        let elapsed = params.grace_secs + params.decay_half_life_secs as i64;
        let decayed = decay(80.0, elapsed, &params);
        assert!((decayed - 40.0).abs() < 0.01);
    }

    #[test]
    fn test_decay_is_monotonic_in_elapsed_time() {
        let params = ScoringParams::default();
        let mut previous = 100.0;
        for elapsed in (0..10_000).step_by(500) {
            let score = decay(100.0, elapsed, &params);
            assert!(score <= previous);
            previous = score;
        }
    }

    #[test]
    fn test_anomaly_score_is_low_confidence() {
        let params = ScoringParams::default();
        // A bare-threshold anomaly stays well under rule-matched scores
        let anomaly = anomaly_score(3.5, &params);
        let rule_hit = combine(3.5, 8, 1.0, &params);
        assert!(anomaly < rule_hit);
    }

    #[test]
    fn test_default_rule_weight() {
        let weights: HashMap<String, f64> =
            [("cross-cloud-recon".to_string(), 1.5)].into_iter().collect();
        assert_eq!(rule_weight(&weights, "cross-cloud-recon"), 1.5);
        assert_eq!(rule_weight(&weights, "unknown-rule"), 1.0);
    }
}
