use crate::models::SecurityEvent;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

/// Reader for a recorded JSONL event feed
///
/// Connectors normalize provider logs into one JSON object per line. The
/// sync reader decodes a whole file for replay; live tailing is the async
/// tailer's job.
pub struct EventTailer {
    file_path: PathBuf,
}

impl EventTailer {
    /// Create a new event reader
    pub fn new(file_path: PathBuf) -> Self {
        EventTailer { file_path }
    }

    /// Read the whole file from the start, for replay
    pub fn read_all(&mut self) -> Result<Vec<SecurityEvent>, Box<dyn std::error::Error>> {
        let file = File::open(&self.file_path)?;
        let reader = BufReader::new(file);
        let mut events = Vec::new();

        for line in reader.lines() {
            let line = line?;
            match parse_event_line(&line) {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(e) => log::warn!("Skipping undecodable event line: {}", e),
            }
        }

        Ok(events)
    }
}

/// Decode one feed line; blank lines yield nothing
fn parse_event_line(line: &str) -> Result<Option<SecurityEvent>, serde_json::Error> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(trimmed).map(Some)
}

// ============================================
// Async Event Tailer
// ============================================

use tokio::fs::File as AsyncFile;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader as AsyncBufReader};
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration as TokioDuration};

/// Follows a live JSONL feed for the daemon
pub struct AsyncEventTailer {
    file_path: PathBuf,
}

impl AsyncEventTailer {
    /// Create a new async event tailer
    pub fn new(file_path: PathBuf) -> Self {
        AsyncEventTailer { file_path }
    }

    /// Run the tailer, sending events through the channel
    ///
    /// This method runs indefinitely until the channel is closed or
    /// an unrecoverable error occurs.
    pub async fn run(
        &mut self,
        tx: mpsc::Sender<SecurityEvent>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let file = AsyncFile::open(&self.file_path).await?;
        let mut reader = AsyncBufReader::new(file);

        // Seek to end of file to start tailing
        reader.seek(std::io::SeekFrom::End(0)).await?;

        log::info!("Async event tailer started for {:?}", self.file_path);

        loop {
            let mut line = String::new();

            match reader.read_line(&mut line).await {
                Ok(0) => {
                    // EOF - wait for more data
                    sleep(TokioDuration::from_millis(100)).await;
                }
                Ok(_) => match parse_event_line(&line) {
                    Ok(Some(event)) => {
                        if tx.send(event).await.is_err() {
                            log::info!("Channel closed, stopping event tailer");
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => log::warn!("Skipping undecodable event line: {}", e),
                },
                Err(e) => {
                    log::error!("Error reading event feed: {}", e);
                    sleep(TokioDuration::from_secs(1)).await;
                }
            }
        }

        Ok(())
    }
}
