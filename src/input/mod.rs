pub mod file_tailer;
pub mod udp_listener;

pub use file_tailer::{AsyncEventTailer, EventTailer};
pub use udp_listener::AsyncUdpListener;
