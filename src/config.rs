use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::engine::EngineConfig;

/// Configuration for the guardian daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Input source configuration
    pub input: InputConfig,
    /// Correlation engine configuration
    #[serde(default)]
    pub engine: EngineConfig,
    /// GeoIP database configuration
    pub geoip: Option<GeoIpConfig>,
    /// Output configuration
    pub output: OutputConfig,
    /// Response orchestrator forwarding
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    /// Baseline and incident persistence
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

/// Input source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// Type of input source: "file" or "udp"
    pub source_type: String,
    /// Path to the JSONL event feed (if source_type is "file")
    pub file_path: Option<PathBuf>,
    /// UDP bind address for JSON datagrams (if source_type is "udp")
    pub udp_address: Option<String>,
}

/// GeoIP database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoIpConfig {
    /// Path to a MaxMind City database
    pub db_path: PathBuf,
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output format: "json", "jsonl", or "console"
    pub format: String,
    /// Output file path (if format is not "console")
    pub file_path: Option<PathBuf>,
}

/// Response orchestrator forwarding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Enable forwarding incidents to orchestrator endpoints
    pub enabled: bool,
    /// Only incidents at or above this score are forwarded
    pub min_score: f64,
    /// Endpoints to deliver incidents to
    pub endpoints: Vec<EndpointConfig>,
}

/// A single orchestrator endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Endpoint name used in logs
    pub name: String,
    /// URL to deliver the incident payload to
    pub url: String,
    /// HTTP method: "POST" or "PUT"
    #[serde(default = "default_method")]
    pub method: String,
    /// Extra headers, e.g. auth tokens
    #[serde(default)]
    pub headers: Vec<(String, String)>,
}

fn default_method() -> String {
    "POST".to_string()
}

/// Persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Persist baselines and incidents across restarts
    pub enabled: bool,
    /// Path to the SQLite database file
    pub db_path: PathBuf,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig {
            enabled: false,
            min_score: 50.0,
            endpoints: Vec::new(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        PersistenceConfig {
            enabled: false,
            db_path: PathBuf::from("guardian.db"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            input: InputConfig {
                source_type: "file".to_string(),
                file_path: Some(PathBuf::from("events.jsonl")),
                udp_address: None,
            },
            engine: EngineConfig::default(),
            geoip: None,
            output: OutputConfig {
                format: "jsonl".to_string(),
                file_path: Some(PathBuf::from("incidents.jsonl")),
            },
            orchestrator: OrchestratorConfig::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn to_file(&self, path: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_roundtrips_through_toml() {
        let config = Config::default();
        let serialized = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.input.source_type, "file");
        assert_eq!(parsed.engine.shards, config.engine.shards);
        assert!(!parsed.orchestrator.enabled);
    }

    #[test]
    fn test_minimal_file_uses_section_defaults() {
        let raw = r#"
            [input]
            source_type = "udp"
            udp_address = "0.0.0.0:6514"

            [output]
            format = "console"
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.input.udp_address.as_deref(), Some("0.0.0.0:6514"));
        assert_eq!(config.engine.shards, EngineConfig::default().shards);
        assert!(!config.persistence.enabled);
    }

    #[test]
    fn test_from_file_missing_path() {
        let missing = PathBuf::from("/nonexistent/guardian.toml");
        assert!(Config::from_file(&missing).is_err());
    }
}
