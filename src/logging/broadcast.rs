use super::state::LOG_BROADCAST_TX;
use std::io::{self, Write};
use tokio::sync::broadcast;
use tracing_subscriber::fmt::writer::MakeWriter;

/// Buffered capacity of the log line channel; slow SSE clients lag, they do not block logging
const LOG_CHANNEL_CAPACITY: usize = 1024;

#[derive(Clone)]
pub(super) struct BroadcastMakeWriter {
    pub(super) tx: broadcast::Sender<String>,
}

/// Collects one formatted event and publishes it as a single line on drop
pub(super) struct BroadcastWriter {
    tx: broadcast::Sender<String>,
    buffer: Vec<u8>,
}

impl<'a> MakeWriter<'a> for BroadcastMakeWriter {
    type Writer = BroadcastWriter;
    fn make_writer(&'a self) -> Self::Writer {
        BroadcastWriter {
            tx: self.tx.clone(),
            buffer: Vec::with_capacity(256),
        }
    }
}

impl Write for BroadcastWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for BroadcastWriter {
    fn drop(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let line = String::from_utf8_lossy(&self.buffer);
        let line = line.trim_end_matches(['\n', '\r']).to_string();
        // No subscribers is the normal case
        let _ = self.tx.send(line);
    }
}

pub(super) fn get_or_init_log_tx() -> broadcast::Sender<String> {
    LOG_BROADCAST_TX
        .get_or_init(|| {
            let (tx, _rx) = broadcast::channel::<String>(LOG_CHANNEL_CAPACITY);
            tx
        })
        .clone()
}

/// Subscribe to a stream of formatted log lines
pub fn subscribe_log_lines() -> broadcast::Receiver<String> {
    get_or_init_log_tx().subscribe()
}
