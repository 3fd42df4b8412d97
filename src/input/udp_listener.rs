use crate::models::SecurityEvent;

use tokio::net::UdpSocket as AsyncUdpSocket;
use tokio::sync::mpsc;

/// Decode a datagram payload into a SecurityEvent
pub fn parse_datagram(payload: &str) -> Result<SecurityEvent, serde_json::Error> {
    serde_json::from_str(payload.trim())
}

/// UDP listener for receiving events as JSON datagrams
///
/// Lightweight connectors that cannot write to the shared feed file push
/// one JSON-encoded event per datagram instead.
pub struct AsyncUdpListener {
    socket: AsyncUdpSocket,
}

impl AsyncUdpListener {
    /// Create a new listener bound to the given address
    pub async fn new(address: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let socket = AsyncUdpSocket::bind(address).await?;
        Ok(AsyncUdpListener { socket })
    }

    /// Run the listener, sending events through the channel
    ///
    /// This method runs indefinitely until the channel is closed or
    /// an unrecoverable error occurs.
    pub async fn run(
        &mut self,
        tx: mpsc::Sender<SecurityEvent>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut buf = [0u8; 8192];

        log::info!("Async UDP event listener started");

        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((size, _addr)) => {
                    let payload = String::from_utf8_lossy(&buf[..size]);

                    match parse_datagram(&payload) {
                        Ok(event) => {
                            if tx.send(event).await.is_err() {
                                log::info!("Channel closed, stopping UDP listener");
                                break;
                            }
                        }
                        Err(e) => log::warn!("Skipping undecodable datagram: {}", e),
                    }
                }
                Err(e) => {
                    log::error!("UDP recv error: {}", e);
                }
            }
        }

        Ok(())
    }
}
