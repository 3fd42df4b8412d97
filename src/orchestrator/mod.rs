//! Response orchestrator forwarding
//!
//! Incidents crossing the configured score threshold are delivered to the
//! downstream response orchestrator over HTTP. Delivery runs as an async
//! task fed by a bounded channel so a slow orchestrator never stalls the
//! engine shards.

use crate::config::{EndpointConfig, OrchestratorConfig};
use crate::models::Incident;
use reqwest::Client;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors that can occur during incident dispatch
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Dispatch channel closed")]
    ChannelClosed,

    #[error("Dispatch queue full")]
    QueueFull,
}

/// Async incident dispatcher
///
/// Runs as a tokio task, receiving incidents from the channel and
/// forwarding them to every configured orchestrator endpoint.
pub struct IncidentDispatcher {
    config: OrchestratorConfig,
    client: Client,
}

impl IncidentDispatcher {
    /// Create a new dispatcher with the given configuration
    pub fn new(config: OrchestratorConfig) -> Self {
        IncidentDispatcher {
            config,
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Create a channel for queueing incidents
    pub fn create_channel() -> (mpsc::Sender<Incident>, mpsc::Receiver<Incident>) {
        mpsc::channel(100)
    }

    /// Run the dispatch loop
    ///
    /// Receives incidents until the channel closes. Delivery failures are
    /// logged per endpoint; one failing endpoint does not stop the others.
    pub async fn run(self, mut rx: mpsc::Receiver<Incident>) {
        log::info!("Incident dispatcher started");

        while let Some(incident) = rx.recv().await {
            if !self.config.enabled {
                continue;
            }

            if incident.score < self.config.min_score {
                log::debug!(
                    "Skipping dispatch for {} (score {:.1} < min {:.1})",
                    incident.id,
                    incident.score,
                    self.config.min_score
                );
                continue;
            }

            log::info!(
                "Dispatching incident {} ({}, score {:.1})",
                incident.id,
                incident.category,
                incident.score
            );

            for endpoint in &self.config.endpoints {
                if let Err(e) = self.send_to_endpoint(endpoint, &incident).await {
                    log::error!("Endpoint {} failed: {}", endpoint.name, e);
                }
            }
        }

        log::info!("Incident dispatcher stopped");
    }

    /// Deliver one incident to one endpoint
    async fn send_to_endpoint(
        &self,
        endpoint: &EndpointConfig,
        incident: &Incident,
    ) -> Result<(), DispatchError> {
        let opened_at = chrono::DateTime::from_timestamp(incident.opened_at, 0)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_default();

        let payload = serde_json::json!({
            "incident": incident,
            "opened_at_rfc3339": opened_at,
            "source": "cloudguard",
        });

        let mut request = match endpoint.method.to_uppercase().as_str() {
            "PUT" => self.client.put(&endpoint.url),
            _ => self.client.post(&endpoint.url),
        };

        for (key, value) in &endpoint.headers {
            request = request.header(key, value);
        }

        let response = request.json(&payload).send().await?;

        if !response.status().is_success() {
            log::warn!(
                "Endpoint {} returned non-success status: {}",
                endpoint.name,
                response.status()
            );
        }

        Ok(())
    }
}

/// Synchronous incident queue for use in sync code
///
/// Sync-friendly wrapper around the dispatch channel.
#[derive(Clone)]
pub struct IncidentQueue {
    tx: mpsc::Sender<Incident>,
}

impl IncidentQueue {
    /// Create a new queue with the given sender
    pub fn new(tx: mpsc::Sender<Incident>) -> Self {
        IncidentQueue { tx }
    }

    /// Queue an incident for dispatch (non-blocking)
    ///
    /// Uses try_send to avoid blocking. If the queue is full the incident
    /// is dropped from dispatch with a warning; it is still persisted and
    /// written to the output sink upstream of this queue.
    pub fn queue_incident(&self, incident: Incident) {
        if let Err(e) = self.tx.try_send(incident) {
            match e {
                mpsc::error::TrySendError::Full(_) => {
                    log::warn!("Dispatch queue full, dropping incident from dispatch");
                }
                mpsc::error::TrySendError::Closed(_) => {
                    log::warn!("Dispatch queue closed");
                }
            }
        }
    }

    /// Queue an incident (async version)
    pub async fn queue_incident_async(&self, incident: Incident) -> Result<(), DispatchError> {
        self.tx
            .send(incident)
            .await
            .map_err(|_| DispatchError::ChannelClosed)
    }

    /// Check if the queue is closed
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
