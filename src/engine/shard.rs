//! Sharded ingestion
//!
//! Events arrive concurrently from multiple connector feeds, but baseline
//! and window mutation is only safe under one writer per key. The sharded
//! engine routes every event to the shard owning its identity key and the
//! shard owning its resource key, so per-key processing is serialized while
//! distinct keys proceed in parallel. Shard queues are bounded; a full queue
//! applies backpressure to the feed instead of growing without limit.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::geolocation::GeoResolver;
use crate::models::{CloudProvider, Incident, SecurityEvent};

use super::baseline::AssetBaseline;
use super::window::CorrelationKey;
use super::{CorrelationEngine, EngineConfig, EngineError, EngineTuning, KeyAxis};

/// Control and data messages delivered to a shard worker
enum ShardMessage {
    Event {
        event: Arc<SecurityEvent>,
        axis: KeyAxis,
    },
    /// Swap-on-commit tuning update; applied between events, never during one
    Tuning(EngineTuning),
    DecayTick(i64),
    ExportBaselines(oneshot::Sender<Vec<((CloudProvider, String), AssetBaseline)>>),
}

fn shard_index(key: &CorrelationKey, shards: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() as usize) % shards
}

/// Pool of shard workers, each owning one `CorrelationEngine`
pub struct ShardedEngine {
    senders: Vec<mpsc::Sender<ShardMessage>>,
    handles: Vec<JoinHandle<()>>,
}

impl ShardedEngine {
    /// Spawn the shard workers
    ///
    /// Persisted baselines are routed to the shard that owns each resource
    /// key. Emitted incidents flow out on `incident_tx`; the channel is
    /// bounded, so a lagging consumer backpressures the shards.
    pub fn spawn(
        config: &EngineConfig,
        geo: Option<Arc<dyn GeoResolver>>,
        baselines: Vec<((CloudProvider, String), AssetBaseline)>,
        incident_tx: mpsc::Sender<Incident>,
        queue_depth: usize,
    ) -> Self {
        let shards = config.shards.max(1);

        let mut restored: Vec<Vec<((CloudProvider, String), AssetBaseline)>> =
            (0..shards).map(|_| Vec::new()).collect();
        for ((provider, resource), baseline) in baselines {
            let key = CorrelationKey::Resource {
                provider,
                id: resource.clone(),
            };
            restored[shard_index(&key, shards)].push(((provider, resource), baseline));
        }

        let mut senders = Vec::with_capacity(shards);
        let mut handles = Vec::with_capacity(shards);
        for (index, snapshots) in restored.into_iter().enumerate() {
            let (tx, rx) = mpsc::channel(queue_depth);
            let mut engine = CorrelationEngine::new(config, geo.clone());
            engine.restore_baselines(snapshots);
            handles.push(tokio::spawn(run_shard(
                index,
                engine,
                rx,
                incident_tx.clone(),
            )));
            senders.push(tx);
        }

        ShardedEngine { senders, handles }
    }

    /// Validate and route one event
    ///
    /// Malformed events are rejected here, before any shard state is
    /// touched. Routing delivers the event to the identity-key shard and
    /// the resource-key shard; when both keys land on the same shard a
    /// single message covers both axes.
    pub async fn ingest(&self, event: SecurityEvent) -> Result<(), EngineError> {
        CorrelationEngine::validate(&event)?;

        let shards = self.senders.len();
        let identity_shard = shard_index(&CorrelationKey::identity_of(&event), shards);
        let resource_shard = shard_index(&CorrelationKey::resource_of(&event), shards);
        let event = Arc::new(event);

        if identity_shard == resource_shard {
            self.send(identity_shard, ShardMessage::Event {
                event,
                axis: KeyAxis::Both,
            })
            .await;
        } else {
            self.send(resource_shard, ShardMessage::Event {
                event: Arc::clone(&event),
                axis: KeyAxis::Resource,
            })
            .await;
            self.send(identity_shard, ShardMessage::Event {
                event,
                axis: KeyAxis::Identity,
            })
            .await;
        }
        Ok(())
    }

    /// Broadcast a tuning update to every shard
    pub async fn apply_tuning(&self, tuning: EngineTuning) {
        for index in 0..self.senders.len() {
            self.send(index, ShardMessage::Tuning(tuning.clone())).await;
        }
    }

    /// Broadcast a decay tick; resulting dismissals flow out as incidents
    pub async fn decay_tick(&self, now: i64) {
        for index in 0..self.senders.len() {
            self.send(index, ShardMessage::DecayTick(now)).await;
        }
    }

    /// Collect baseline snapshots from every shard
    pub async fn export_baselines(&self) -> Vec<((CloudProvider, String), AssetBaseline)> {
        let mut all = Vec::new();
        for index in 0..self.senders.len() {
            let (tx, rx) = oneshot::channel();
            self.send(index, ShardMessage::ExportBaselines(tx)).await;
            if let Ok(mut snapshots) = rx.await {
                all.append(&mut snapshots);
            }
        }
        all
    }

    /// Close the shard queues and wait for the workers to drain
    pub async fn shutdown(self) {
        drop(self.senders);
        for handle in self.handles {
            if let Err(e) = handle.await {
                log::error!("shard worker panicked: {}", e);
            }
        }
    }

    async fn send(&self, shard: usize, message: ShardMessage) {
        if self.senders[shard].send(message).await.is_err() {
            log::error!("shard {} queue closed, message dropped", shard);
        }
    }
}

async fn run_shard(
    index: usize,
    mut engine: CorrelationEngine,
    mut rx: mpsc::Receiver<ShardMessage>,
    incident_tx: mpsc::Sender<Incident>,
) {
    log::debug!("shard {} started", index);

    while let Some(message) = rx.recv().await {
        match message {
            ShardMessage::Event { event, axis } => {
                let event_id = event.id.clone();
                match engine.ingest_arc(event, axis) {
                    Ok(incidents) => {
                        for incident in incidents {
                            if incident_tx.send(incident).await.is_err() {
                                log::warn!("incident channel closed, stopping shard {}", index);
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        // Rejected, never silently dropped
                        log::warn!("shard {}: event {} rejected: {}", index, event_id, e);
                    }
                }
            }
            ShardMessage::Tuning(tuning) => {
                engine.apply_tuning(tuning);
                log::info!("shard {}: tuning update applied", index);
            }
            ShardMessage::DecayTick(now) => {
                for incident in engine.decay_tick(now) {
                    if incident_tx.send(incident).await.is_err() {
                        log::warn!("incident channel closed, stopping shard {}", index);
                        return;
                    }
                }
            }
            ShardMessage::ExportBaselines(reply) => {
                let _ = reply.send(engine.export_baselines());
            }
        }
    }

    log::debug!("shard {} stopped", index);
}
