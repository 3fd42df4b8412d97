use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Duration};

use cloudguard::config::Config;
use cloudguard::engine::ShardedEngine;
use cloudguard::geolocation::{GeoIpService, GeoResolver};
use cloudguard::input::{AsyncEventTailer, AsyncUdpListener};
use cloudguard::models::SecurityEvent;
use cloudguard::orchestrator::{IncidentDispatcher, IncidentQueue};
use cloudguard::output::{OutputFormat, OutputHandler};
use cloudguard::persistence::{SqliteStateStore, StateStore};

/// Main daemon entry point for the correlation engine
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    log::info!("Starting Guardian Daemon...");

    // Load configuration
    let config_path = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = if config_path.exists() {
        Config::from_file(&config_path)?
    } else {
        log::warn!("Config file not found, using defaults");
        Config::default()
    };

    // Setup graceful shutdown signal handling
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal, gracefully stopping...");
        let _ = shutdown_tx.send(true);
    })?;

    // GeoIP is optional; the impossible-travel rule is skipped without it
    let geo: Option<Arc<dyn GeoResolver>> = match &config.geoip {
        Some(geoip) => match GeoIpService::new(&geoip.db_path) {
            Ok(service) => {
                log::info!("GeoIP database loaded from {:?}", geoip.db_path);
                Some(Arc::new(service))
            }
            Err(e) => {
                log::warn!("GeoIP unavailable, travel correlation disabled: {}", e);
                None
            }
        },
        None => None,
    };

    // Persistence is optional; without it the engine starts cold
    let store: Option<Arc<dyn StateStore>> = if config.persistence.enabled {
        let store = SqliteStateStore::new(&config.persistence.db_path)?;
        log::info!("State store opened at {:?}", config.persistence.db_path);
        Some(Arc::new(store))
    } else {
        None
    };

    let restored_baselines = match &store {
        Some(store) => {
            let baselines = store.load_all_baselines()?;
            log::info!("Restored {} baseline(s)", baselines.len());
            baselines
        }
        None => Vec::new(),
    };

    // Spawn the engine shards
    let (incident_tx, mut incident_rx) = mpsc::channel(256);
    let engine = ShardedEngine::spawn(
        &config.engine,
        geo,
        restored_baselines,
        incident_tx,
        128,
    );
    log::info!("Correlation engine started with {} shard(s)", config.engine.shards);

    // Orchestrator dispatch runs on its own task behind a bounded queue
    let dispatch_queue: Option<IncidentQueue> = if config.orchestrator.enabled {
        let (tx, rx) = IncidentDispatcher::create_channel();
        let dispatcher = IncidentDispatcher::new(config.orchestrator.clone());
        tokio::spawn(dispatcher.run(rx));
        Some(IncidentQueue::new(tx))
    } else {
        None
    };

    // Incident consumer: output sink, persistence, orchestrator
    let output_format = OutputFormat::from_str(&config.output.format);
    let mut output_handler = OutputHandler::new(output_format, config.output.file_path.clone())?;
    let consumer_store = store.clone();
    let consumer = tokio::spawn(async move {
        while let Some(incident) = incident_rx.recv().await {
            if let Err(e) = output_handler.write_incident(&incident) {
                log::error!("Failed to write incident {}: {}", incident.id, e);
            }
            if let Some(ref store) = consumer_store {
                if let Err(e) = store.store_incident(&incident) {
                    log::error!("Failed to persist incident {}: {}", incident.id, e);
                }
            }
            if let Some(ref queue) = dispatch_queue {
                queue.queue_incident(incident);
            }
        }
        if let Err(e) = output_handler.flush() {
            log::error!("Failed to flush output: {}", e);
        }
    });

    // Input source feeds the event channel
    let (event_tx, mut event_rx) = mpsc::channel::<SecurityEvent>(256);
    match config.input.source_type.as_str() {
        "file" => {
            if let Some(path) = config.input.file_path.clone() {
                log::info!("Tailing event feed: {:?}", path);
                let mut tailer = AsyncEventTailer::new(path);
                tokio::spawn(async move {
                    if let Err(e) = tailer.run(event_tx).await {
                        log::error!("Event tailer stopped: {}", e);
                    }
                });
            } else {
                log::error!("Input source 'file' requires input.file_path");
            }
        }
        "udp" => {
            if let Some(address) = config.input.udp_address.clone() {
                log::info!("Listening for events on {}", address);
                let mut listener = AsyncUdpListener::new(&address)
                    .await
                    .map_err(|e| e as Box<dyn std::error::Error>)?;
                tokio::spawn(async move {
                    if let Err(e) = listener.run(event_tx).await {
                        log::error!("UDP listener stopped: {}", e);
                    }
                });
            } else {
                log::error!("Input source 'udp' requires input.udp_address");
            }
        }
        other => {
            log::error!("Unknown input source type: {}", other);
        }
    }

    log::info!("Daemon running. Press Ctrl+C to stop.");

    // Main loop: route events, fire decay ticks, watch for shutdown
    let mut decay_timer = interval(Duration::from_secs(60));
    decay_timer.tick().await; // first tick fires immediately
    loop {
        tokio::select! {
            event = event_rx.recv() => {
                match event {
                    Some(event) => {
                        if let Err(e) = engine.ingest(event).await {
                            log::warn!("Event rejected: {}", e);
                        }
                    }
                    None => {
                        log::warn!("Input channel closed, shutting down");
                        break;
                    }
                }
            }
            _ = decay_timer.tick() => {
                engine.decay_tick(chrono::Utc::now().timestamp()).await;
            }
            _ = shutdown_rx.changed() => {
                break;
            }
        }
    }

    // Snapshot baselines before the shards stop
    if let Some(ref store) = store {
        let now = chrono::Utc::now().timestamp();
        let snapshots = engine.export_baselines().await;
        log::info!("Persisting {} baseline(s)", snapshots.len());
        for ((provider, resource), baseline) in snapshots {
            if let Err(e) = store.put_baseline(provider, &resource, &baseline, now) {
                log::error!("Failed to persist baseline for {}/{}: {}", provider, resource, e);
            }
        }
    }

    engine.shutdown().await;
    consumer.await?;
    log::info!("Guardian Daemon stopped");
    Ok(())
}
