//! Correlation rule evaluation
//!
//! Rules inspect a single correlation window and report the first pattern
//! they recognize. The rule set is a fixed ordered list; the first matching
//! rule wins and determines the incident category and base severity, with
//! declaration order breaking ties.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::geolocation::{haversine_distance, GeoResolver};
use crate::models::{EventClass, IncidentCategory, SecurityEvent};

use super::window::CorrelationWindow;

/// Thresholds for the built-in rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesConfig {
    /// Failed auths required before the auth-chain rule arms
    pub auth_burst_threshold: usize,
    /// Max gap between the auth burst and the follow-up data access, seconds
    pub chain_gap_secs: i64,
    /// Max plausible travel speed between source locations, km/h
    pub max_velocity_kmh: f64,
    /// Network probes required for the recon rule
    pub recon_min_probes: usize,
    /// Distinct actors required for the fan-in rule
    pub fan_in_min_actors: usize,
    /// Per-event rule evaluation budget, milliseconds
    pub eval_budget_ms: u64,
}

impl Default for RulesConfig {
    fn default() -> Self {
        RulesConfig {
            auth_burst_threshold: 5,
            chain_gap_secs: 300,
            max_velocity_kmh: 900.0,
            recon_min_probes: 6,
            fan_in_min_actors: 4,
            eval_budget_ms: 50,
        }
    }
}

/// What a rule reports when its predicate holds
#[derive(Debug, Clone)]
pub struct RuleMatch {
    pub category: IncidentCategory,
    /// Base severity on a 1-10 scale, scaled into the risk score later
    pub base_severity: u8,
    pub summary: String,
    /// Ids of the events that satisfied the predicate
    pub event_ids: Vec<String>,
}

/// A single correlation rule
///
/// Implementations must be pure with respect to the window contents so that
/// identical event sequences always produce identical matches.
pub trait CorrelationRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn evaluate(&self, window: &CorrelationWindow) -> Option<RuleMatch>;
}

/// Rule evaluation exceeded its wall-clock budget
#[derive(Debug, Clone)]
pub struct RuleTimeout {
    pub rule: &'static str,
    pub elapsed_ms: u64,
}

/// Ordered rule list; first match wins
pub struct RuleSet {
    rules: Vec<Box<dyn CorrelationRule>>,
}

impl RuleSet {
    /// Build the built-in rule list in declaration order
    ///
    /// The travel rule is only registered when a geo resolver is available.
    pub fn builtin(config: &RulesConfig, geo: Option<Arc<dyn GeoResolver>>) -> Self {
        let mut rules: Vec<Box<dyn CorrelationRule>> = vec![
            Box::new(CrossCloudAuthChain {
                burst_threshold: config.auth_burst_threshold,
                chain_gap_secs: config.chain_gap_secs,
            }),
            Box::new(PrivilegeEscalationChain),
        ];
        if let Some(resolver) = geo {
            rules.push(Box::new(ImpossibleSourceTravel {
                resolver,
                max_velocity_kmh: config.max_velocity_kmh,
            }));
        }
        rules.push(Box::new(CrossCloudRecon {
            min_probes: config.recon_min_probes,
        }));
        rules.push(Box::new(DataAccessFanIn {
            min_actors: config.fan_in_min_actors,
        }));
        RuleSet { rules }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluate rules in order against one window
    ///
    /// Returns the first match, or a timeout error if the budget runs out
    /// between rules. The budget is checked before each rule so a slow rule
    /// never delays the one after it past the deadline unnoticed.
    pub fn evaluate(
        &self,
        window: &CorrelationWindow,
        started: Instant,
        budget: Duration,
    ) -> Result<Option<(&'static str, RuleMatch)>, RuleTimeout> {
        for rule in &self.rules {
            let elapsed = started.elapsed();
            if elapsed > budget {
                return Err(RuleTimeout {
                    rule: rule.name(),
                    elapsed_ms: elapsed.as_millis() as u64,
                });
            }
            if let Some(hit) = rule.evaluate(window) {
                return Ok(Some((rule.name(), hit)));
            }
        }
        Ok(None)
    }
}

// ============================================
// Built-in rules
// ============================================

/// Failed-auth burst followed by a data access, spanning two providers
///
/// The canonical cross-cloud credential-stuffing chain: an identity fails
/// authentication repeatedly in one cloud and shortly afterwards reads data
/// in another.
struct CrossCloudAuthChain {
    burst_threshold: usize,
    chain_gap_secs: i64,
}

impl CorrelationRule for CrossCloudAuthChain {
    fn name(&self) -> &'static str {
        "cross-cloud-auth-chain"
    }

    fn evaluate(&self, window: &CorrelationWindow) -> Option<RuleMatch> {
        if !window.key().is_identity() {
            return None;
        }

        let fails: Vec<&Arc<SecurityEvent>> =
            window.iter().filter(|e| e.is_failed_auth()).collect();
        if fails.len() < self.burst_threshold {
            return None;
        }

        let burst_end = fails[fails.len() - 1].timestamp;
        let access = window.iter().find(|e| {
            e.class == EventClass::DataAccess
                && e.timestamp >= burst_end
                && e.timestamp - burst_end <= self.chain_gap_secs
        })?;

        let providers: HashSet<_> = fails
            .iter()
            .map(|e| e.provider)
            .chain(std::iter::once(access.provider))
            .collect();
        if providers.len() < 2 {
            return None;
        }

        let mut event_ids: Vec<String> = fails.iter().map(|e| e.id.clone()).collect();
        event_ids.push(access.id.clone());

        Some(RuleMatch {
            category: IncidentCategory::CrossCloudAuthChain,
            base_severity: 8,
            summary: format!(
                "{} failed auths on {} followed by data access to {}/{} within {}s",
                fails.len(),
                window.key(),
                access.provider,
                access.resource,
                access.timestamp - burst_end
            ),
            event_ids,
        })
    }
}

/// Identity grant, then a config change, then a data access, in order
struct PrivilegeEscalationChain;

impl CorrelationRule for PrivilegeEscalationChain {
    fn name(&self) -> &'static str {
        "privilege-escalation-chain"
    }

    fn evaluate(&self, window: &CorrelationWindow) -> Option<RuleMatch> {
        if !window.key().is_identity() {
            return None;
        }

        let grant = window
            .iter()
            .find(|e| e.class == EventClass::Identity && !e.is_failed_auth())?;
        let change = window
            .iter()
            .find(|e| e.class == EventClass::ConfigChange && e.timestamp > grant.timestamp)?;
        let access = window
            .iter()
            .find(|e| e.class == EventClass::DataAccess && e.timestamp > change.timestamp)?;

        Some(RuleMatch {
            category: IncidentCategory::PrivilegeEscalation,
            base_severity: 9,
            summary: format!(
                "{}: {} then {} then {} across {}s",
                window.key(),
                grant.event_type,
                change.event_type,
                access.event_type,
                access.timestamp - grant.timestamp
            ),
            event_ids: vec![grant.id.clone(), change.id.clone(), access.id.clone()],
        })
    }
}

/// Same identity active from source locations further apart than travel allows
struct ImpossibleSourceTravel {
    resolver: Arc<dyn GeoResolver>,
    max_velocity_kmh: f64,
}

impl ImpossibleSourceTravel {
    fn severity_for(velocity_ratio: f64) -> u8 {
        if velocity_ratio > 10.0 {
            10
        } else if velocity_ratio > 5.0 {
            9
        } else if velocity_ratio > 2.0 {
            8
        } else {
            7
        }
    }
}

impl CorrelationRule for ImpossibleSourceTravel {
    fn name(&self) -> &'static str {
        "impossible-source-travel"
    }

    fn evaluate(&self, window: &CorrelationWindow) -> Option<RuleMatch> {
        if !window.key().is_identity() {
            return None;
        }

        let located: Vec<(&Arc<SecurityEvent>, _)> = window
            .iter()
            .filter_map(|e| {
                let ip = e.source_ip?;
                self.resolver.resolve(&ip).map(|loc| (e, loc))
            })
            .collect();

        for pair in located.windows(2) {
            let (prev, prev_loc) = &pair[0];
            let (next, next_loc) = &pair[1];
            if prev.source_ip == next.source_ip {
                continue;
            }

            let distance_km = haversine_distance(*prev_loc, *next_loc);
            let gap_secs = (next.timestamp - prev.timestamp).max(0);

            // Near-simultaneous sightings far apart: credential sharing or theft
            if gap_secs < 2 && distance_km > 50.0 {
                return Some(RuleMatch {
                    category: IncidentCategory::ImpossibleSourceTravel,
                    base_severity: 10,
                    summary: format!(
                        "{} active from two locations {:.0} km apart within seconds",
                        window.key(),
                        distance_km
                    ),
                    event_ids: vec![prev.id.clone(), next.id.clone()],
                });
            }

            let hours = gap_secs as f64 / 3600.0;
            if hours <= 0.0 {
                continue;
            }
            let velocity = distance_km / hours;
            if velocity > self.max_velocity_kmh {
                return Some(RuleMatch {
                    category: IncidentCategory::ImpossibleSourceTravel,
                    base_severity: Self::severity_for(velocity / self.max_velocity_kmh),
                    summary: format!(
                        "{} moved {:.0} km in {:.2}h ({:.0} km/h, max {:.0})",
                        window.key(),
                        distance_km,
                        hours,
                        velocity,
                        self.max_velocity_kmh
                    ),
                    event_ids: vec![prev.id.clone(), next.id.clone()],
                });
            }
        }
        None
    }
}

/// Network probes against resources in two or more providers
struct CrossCloudRecon {
    min_probes: usize,
}

impl CorrelationRule for CrossCloudRecon {
    fn name(&self) -> &'static str {
        "cross-cloud-recon"
    }

    fn evaluate(&self, window: &CorrelationWindow) -> Option<RuleMatch> {
        if !window.key().is_identity() {
            return None;
        }

        let probes: Vec<&Arc<SecurityEvent>> = window
            .iter()
            .filter(|e| e.class == EventClass::Network)
            .collect();
        if probes.len() < self.min_probes {
            return None;
        }

        let providers: HashSet<_> = probes.iter().map(|e| e.provider).collect();
        if providers.len() < 2 {
            return None;
        }

        let resources: HashSet<&str> = probes.iter().map(|e| e.resource.as_str()).collect();
        Some(RuleMatch {
            category: IncidentCategory::CrossCloudRecon,
            base_severity: 6,
            summary: format!(
                "{} probed {} resources across {} providers ({} events)",
                window.key(),
                resources.len(),
                providers.len(),
                probes.len()
            ),
            event_ids: probes.iter().map(|e| e.id.clone()).collect(),
        })
    }
}

/// Many distinct identities reading one resource inside the window
struct DataAccessFanIn {
    min_actors: usize,
}

impl CorrelationRule for DataAccessFanIn {
    fn name(&self) -> &'static str {
        "data-access-fan-in"
    }

    fn evaluate(&self, window: &CorrelationWindow) -> Option<RuleMatch> {
        if window.key().is_identity() {
            return None;
        }

        let accesses: Vec<&Arc<SecurityEvent>> = window
            .iter()
            .filter(|e| e.class == EventClass::DataAccess)
            .collect();
        let actors: HashSet<&str> = accesses.iter().map(|e| e.identity.as_str()).collect();
        if actors.len() < self.min_actors {
            return None;
        }

        Some(RuleMatch {
            category: IncidentCategory::DataAccessFanIn,
            base_severity: 7,
            summary: format!(
                "{} read by {} distinct identities within the window",
                window.key(),
                actors.len()
            ),
            event_ids: accesses.iter().map(|e| e.id.clone()).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::window::{CorrelationKey, WindowConfig};
    use crate::geolocation::GeoLocation;
    use crate::models::CloudProvider;
    use std::collections::{BTreeMap, HashMap};
    use std::net::IpAddr;
    use std::str::FromStr;

    fn create_event(
        id: &str,
        timestamp: i64,
        provider: CloudProvider,
        class: EventClass,
        event_type: &str,
    ) -> Arc<SecurityEvent> {
        Arc::new(SecurityEvent {
            id: id.to_string(),
            timestamp,
            provider,
            class,
            event_type: event_type.to_string(),
            identity: "mallory".to_string(),
            resource: "db-prod".to_string(),
            source_ip: None,
            attributes: BTreeMap::new(),
        })
    }

    fn identity_window(events: Vec<Arc<SecurityEvent>>) -> CorrelationWindow {
        let config = WindowConfig {
            horizon_secs: 3600,
            max_events: 256,
        };
        let mut window = CorrelationWindow::new(CorrelationKey::Identity("mallory".into()));
        for event in events {
            window.push(event, &config).unwrap();
        }
        window
    }

    fn resource_window(events: Vec<Arc<SecurityEvent>>) -> CorrelationWindow {
        let config = WindowConfig {
            horizon_secs: 3600,
            max_events: 256,
        };
        let mut window = CorrelationWindow::new(CorrelationKey::Resource {
            provider: CloudProvider::Aws,
            id: "db-prod".into(),
        });
        for event in events {
            window.push(event, &config).unwrap();
        }
        window
    }

    struct StubResolver {
        table: HashMap<IpAddr, GeoLocation>,
    }

    impl StubResolver {
        fn new(entries: &[(&str, f64, f64)]) -> Arc<dyn GeoResolver> {
            let table = entries
                .iter()
                .map(|(ip, lat, lon)| {
                    (
                        IpAddr::from_str(ip).unwrap(),
                        GeoLocation { latitude: *lat, longitude: *lon },
                    )
                })
                .collect();
            Arc::new(StubResolver { table })
        }
    }

    impl GeoResolver for StubResolver {
        fn resolve(&self, ip: &IpAddr) -> Option<GeoLocation> {
            self.table.get(ip).copied()
        }
    }

    fn auth_chain_events() -> Vec<Arc<SecurityEvent>> {
        let mut events = Vec::new();
        for i in 0..5 {
            events.push(create_event(
                &format!("fail{}", i),
                1000 + i,
                CloudProvider::Aws,
                EventClass::Identity,
                "FAILED_AUTH",
            ));
        }
        events.push(create_event(
            "access",
            1120,
            CloudProvider::Gcp,
            EventClass::DataAccess,
            "OBJECT_READ",
        ));
        events
    }

    #[test]
    fn test_auth_chain_fires_across_providers() {
        let rule = CrossCloudAuthChain {
            burst_threshold: 5,
            chain_gap_secs: 300,
        };
        let window = identity_window(auth_chain_events());

        let hit = rule.evaluate(&window).expect("chain should fire");
        assert_eq!(hit.category, IncidentCategory::CrossCloudAuthChain);
        assert_eq!(hit.base_severity, 8);
        assert_eq!(hit.event_ids.len(), 6);
    }

    #[test]
    fn test_auth_chain_needs_two_providers() {
        let rule = CrossCloudAuthChain {
            burst_threshold: 5,
            chain_gap_secs: 300,
        };
        let mut events = Vec::new();
        for i in 0..5 {
            events.push(create_event(
                &format!("fail{}", i),
                1000 + i,
                CloudProvider::Aws,
                EventClass::Identity,
                "FAILED_AUTH",
            ));
        }
        // Same-provider data access does not complete the chain
        events.push(create_event(
            "access",
            1120,
            CloudProvider::Aws,
            EventClass::DataAccess,
            "OBJECT_READ",
        ));

        assert!(rule.evaluate(&identity_window(events)).is_none());
    }

    #[test]
    fn test_auth_chain_gap_expired() {
        let rule = CrossCloudAuthChain {
            burst_threshold: 5,
            chain_gap_secs: 60,
        };
        let mut events = auth_chain_events();
        events.pop();
        events.push(create_event(
            "access",
            2000,
            CloudProvider::Gcp,
            EventClass::DataAccess,
            "OBJECT_READ",
        ));

        assert!(rule.evaluate(&identity_window(events)).is_none());
    }

    #[test]
    fn test_privilege_escalation_requires_order() {
        let rule = PrivilegeEscalationChain;

        let ordered = identity_window(vec![
            create_event("grant", 1000, CloudProvider::Aws, EventClass::Identity, "ASSUME_ROLE"),
            create_event("change", 1060, CloudProvider::Aws, EventClass::ConfigChange, "POLICY_PUT"),
            create_event("read", 1120, CloudProvider::Aws, EventClass::DataAccess, "OBJECT_READ"),
        ]);
        let hit = rule.evaluate(&ordered).expect("ordered chain should fire");
        assert_eq!(hit.category, IncidentCategory::PrivilegeEscalation);
        assert_eq!(hit.event_ids, vec!["grant", "change", "read"]);

        let reversed = identity_window(vec![
            create_event("read", 1000, CloudProvider::Aws, EventClass::DataAccess, "OBJECT_READ"),
            create_event("change", 1060, CloudProvider::Aws, EventClass::ConfigChange, "POLICY_PUT"),
            create_event("grant", 1120, CloudProvider::Aws, EventClass::Identity, "ASSUME_ROLE"),
        ]);
        assert!(rule.evaluate(&reversed).is_none());
    }

    #[test]
    fn test_impossible_travel() {
        let resolver = StubResolver::new(&[
            ("1.1.1.1", 40.7128, -74.0060),  // NYC
            ("2.2.2.2", 35.6762, 139.6503),  // Tokyo
        ]);
        let rule = ImpossibleSourceTravel {
            resolver,
            max_velocity_kmh: 900.0,
        };

        let mut first = (*create_event("e0", 1000, CloudProvider::Aws, EventClass::Identity, "LOGIN")).clone();
        first.source_ip = Some(IpAddr::from_str("1.1.1.1").unwrap());
        let mut second = (*create_event("e1", 1000 + 3600, CloudProvider::Azure, EventClass::Identity, "LOGIN")).clone();
        second.source_ip = Some(IpAddr::from_str("2.2.2.2").unwrap());

        let window = identity_window(vec![Arc::new(first), Arc::new(second)]);
        let hit = rule.evaluate(&window).expect("NYC to Tokyo in an hour");
        assert_eq!(hit.category, IncidentCategory::ImpossibleSourceTravel);
        assert!(hit.base_severity >= 9);
    }

    #[test]
    fn test_plausible_travel_ignored() {
        let resolver = StubResolver::new(&[
            ("1.1.1.1", 40.7128, -74.0060),   // NYC
            ("3.3.3.3", 34.0522, -118.2437),  // LA
        ]);
        let rule = ImpossibleSourceTravel {
            resolver,
            max_velocity_kmh: 900.0,
        };

        let mut first = (*create_event("e0", 1000, CloudProvider::Aws, EventClass::Identity, "LOGIN")).clone();
        first.source_ip = Some(IpAddr::from_str("1.1.1.1").unwrap());
        let mut second = (*create_event("e1", 1000 + 6 * 3600, CloudProvider::Aws, EventClass::Identity, "LOGIN")).clone();
        second.source_ip = Some(IpAddr::from_str("3.3.3.3").unwrap());

        let window = identity_window(vec![Arc::new(first), Arc::new(second)]);
        assert!(rule.evaluate(&window).is_none());
    }

    #[test]
    fn test_cross_cloud_recon() {
        let rule = CrossCloudRecon { min_probes: 4 };

        let mut events = Vec::new();
        for i in 0..4 {
            let provider = if i % 2 == 0 { CloudProvider::Aws } else { CloudProvider::Azure };
            let mut event = (*create_event(
                &format!("p{}", i),
                1000 + i as i64,
                provider,
                EventClass::Network,
                "PORT_PROBE",
            ))
            .clone();
            event.resource = format!("vpc-{}", i);
            events.push(Arc::new(event));
        }

        let hit = rule.evaluate(&identity_window(events)).expect("recon should fire");
        assert_eq!(hit.category, IncidentCategory::CrossCloudRecon);
        assert_eq!(hit.event_ids.len(), 4);
    }

    #[test]
    fn test_recon_single_provider_ignored() {
        let rule = CrossCloudRecon { min_probes: 4 };
        let events = (0..6)
            .map(|i| {
                create_event(
                    &format!("p{}", i),
                    1000 + i,
                    CloudProvider::Aws,
                    EventClass::Network,
                    "PORT_PROBE",
                )
            })
            .collect();
        assert!(rule.evaluate(&identity_window(events)).is_none());
    }

    #[test]
    fn test_fan_in_on_resource_window() {
        let rule = DataAccessFanIn { min_actors: 3 };

        let mut events = Vec::new();
        for (i, actor) in ["a", "b", "c"].iter().enumerate() {
            let mut event = (*create_event(
                &format!("r{}", i),
                1000 + i as i64,
                CloudProvider::Aws,
                EventClass::DataAccess,
                "OBJECT_READ",
            ))
            .clone();
            event.identity = actor.to_string();
            events.push(Arc::new(event));
        }

        let hit = rule.evaluate(&resource_window(events)).expect("fan-in should fire");
        assert_eq!(hit.category, IncidentCategory::DataAccessFanIn);

        // Identity windows are out of scope for this rule
        let identity = identity_window(vec![create_event(
            "x",
            1000,
            CloudProvider::Aws,
            EventClass::DataAccess,
            "OBJECT_READ",
        )]);
        assert!(rule.evaluate(&identity).is_none());
    }

    #[test]
    fn test_ruleset_declaration_order_wins() {
        let config = RulesConfig {
            auth_burst_threshold: 5,
            recon_min_probes: 2,
            ..RulesConfig::default()
        };
        let rules = RuleSet::builtin(&config, None);

        // Events satisfying both the auth chain and recon; the auth chain is
        // declared first and must win.
        let mut events = auth_chain_events();
        events.push(create_event("n0", 1001, CloudProvider::Aws, EventClass::Network, "PORT_PROBE"));
        events.push(create_event("n1", 1002, CloudProvider::Gcp, EventClass::Network, "PORT_PROBE"));
        let window = identity_window(events);

        let (name, hit) = rules
            .evaluate(&window, Instant::now(), Duration::from_secs(5))
            .unwrap()
            .expect("a rule should fire");
        assert_eq!(name, "cross-cloud-auth-chain");
        assert_eq!(hit.category, IncidentCategory::CrossCloudAuthChain);
    }

    #[test]
    fn test_ruleset_timeout() {
        let rules = RuleSet::builtin(&RulesConfig::default(), None);
        let window = identity_window(vec![create_event(
            "e0",
            1000,
            CloudProvider::Aws,
            EventClass::Network,
            "PORT_PROBE",
        )]);

        // A budget that was exhausted before evaluation began
        let started = Instant::now() - Duration::from_secs(1);
        let result = rules.evaluate(&window, started, Duration::from_millis(10));
        assert!(result.is_err());
        assert!(result.unwrap_err().elapsed_ms >= 1000);
    }

    #[test]
    fn test_travel_rule_skipped_without_resolver() {
        let rules = RuleSet::builtin(&RulesConfig::default(), None);
        assert_eq!(rules.len(), 4);

        let resolver = StubResolver::new(&[]);
        let with_geo = RuleSet::builtin(&RulesConfig::default(), Some(resolver));
        assert_eq!(with_geo.len(), 5);
    }
}
