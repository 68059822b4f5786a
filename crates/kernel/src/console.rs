//! Output path for the console-write syscall.

use alloc::{sync::Arc, vec::Vec};

use spin::Mutex;

/// Receives bytes an environment asked the kernel to display.
pub trait ConsoleSink: Send {
    fn write_bytes(&mut self, bytes: &[u8]);
}

/// Forwards console output to the kernel log.
#[derive(Debug, Default)]
pub struct LogSink;

impl ConsoleSink for LogSink {
    fn write_bytes(&mut self, bytes: &[u8]) {
        match core::str::from_utf8(bytes) {
            Ok(text) => log::info!("{}", text),
            Err(_) => log::info!("{:02x?}", bytes),
        }
    }
}

/// Collects console output in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct BufferSink {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns everything written so far.
    pub fn contents(&self) -> Vec<u8> {
        self.buffer.lock().clone()
    }
}

impl ConsoleSink for BufferSink {
    fn write_bytes(&mut self, bytes: &[u8]) {
        self.buffer.lock().extend_from_slice(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_clones_share_output() {
        let sink = BufferSink::new();
        let mut writer = sink.clone();
        writer.write_bytes(b"hello ");
        writer.write_bytes(b"world");
        assert_eq!(sink.contents(), b"hello world");
    }
}
