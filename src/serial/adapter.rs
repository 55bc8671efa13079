//! # Stream Adapter
//!
//! Turns the raw byte streams of an open port into a text reader and a text
//! writer. A port's streams can be attached once per session.

use super::encoding::{Utf8StreamDecoder, encode_text};
use super::line_log::LogHandle;
use super::port::{BoxedReader, BoxedWriter, PortHandle};
use crate::error::{Result, SessionError};
use log::debug;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;

/// read buffer size
const READ_BUFFER_SIZE: usize = 1024;

/// Decoding side of a [`StreamPair`].
pub struct TextReader {
    inner: BoxedReader,
    decoder: Utf8StreamDecoder,
    buffer: Box<[u8]>,
}

impl TextReader {
    pub fn new(inner: BoxedReader) -> Self {
        TextReader {
            inner,
            decoder: Utf8StreamDecoder::new(),
            buffer: vec![0; READ_BUFFER_SIZE].into_boxed_slice(),
        }
    }

    /// Reads the next decoded chunk; `None` at end of stream.
    ///
    /// The chunk may be empty when only part of a character arrived.
    /// Cancel safe: dropping the future loses no data.
    pub async fn read_chunk(&mut self) -> io::Result<Option<String>> {
        let n = self.inner.read(&mut self.buffer).await?;
        if n == 0 {
            let tail = self.decoder.finish();
            return Ok((!tail.is_empty()).then_some(tail));
        }
        Ok(Some(self.decoder.decode(&self.buffer[..n])))
    }
}

/// Encoding side of a [`StreamPair`].
pub struct TextWriter {
    inner: BoxedWriter,
}

impl TextWriter {
    pub fn new(inner: BoxedWriter) -> Self {
        TextWriter { inner }
    }

    /// Writes all of `text` and flushes.
    pub async fn write(&mut self, text: &str) -> io::Result<()> {
        self.inner.write_all(&encode_text(text)).await?;
        self.inner.flush().await
    }

    pub async fn close(&mut self) -> io::Result<()> {
        self.inner.shutdown().await
    }
}

/// A [`TextWriter`] shared by the session and its in-flight writes.
pub type SharedWriter = Arc<Mutex<TextWriter>>;

/// Text reader and writer bound to one open port.
///
/// The reader is lent to the read loop while the session runs and handed back
/// on teardown. The writer has its own lock so a write stalled by the device
/// does not hold up the rest of the session.
pub struct StreamPair {
    reader: Option<TextReader>,
    writer: Option<SharedWriter>,
}

impl StreamPair {
    pub fn take_reader(&mut self) -> Option<TextReader> {
        self.reader.take()
    }

    pub fn restore_reader(&mut self, reader: TextReader) {
        self.reader = Some(reader);
    }

    pub fn writer(&self) -> Option<SharedWriter> {
        self.writer.clone()
    }

    /// Releases both ends.
    ///
    /// Best effort: a writer that fails to close (port already gone, device
    /// unplugged) is logged as a warning and dropped anyway. Pending writes
    /// must have been cancelled first, or this waits for them.
    pub async fn detach(mut self, log: &LogHandle) {
        if let Some(reader) = self.reader.take() {
            drop(reader);
            debug!("Released reader");
        }
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.lock().await.close().await {
                log.warning(format!("Error closing writer: {e}"));
            }
            drop(writer);
            debug!("Released writer");
        }
    }
}

/// Claims the streams of `port` and wraps them as text.
pub fn attach(port: &mut dyn PortHandle) -> Result<StreamPair> {
    let (reader, writer) = port
        .take_streams()
        .ok_or_else(|| SessionError::adapter(port.name()))?;
    debug!("Attached text streams to {}", port.name());
    Ok(StreamPair {
        reader: Some(TextReader::new(reader)),
        writer: Some(Arc::new(Mutex::new(TextWriter::new(writer)))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::line_log::{LOG_CAPACITY, LogKind};
    use crate::serial::testing::memory_port;

    #[tokio::test]
    async fn test_attach_twice_fails() {
        let (mut port, _device) = memory_port("/dev/ttyMEM0", false);
        let first = attach(&mut port);
        assert!(first.is_ok());
        let second = attach(&mut port);
        assert!(matches!(second, Err(SessionError::Adapter(name)) if name == "/dev/ttyMEM0"));
    }

    #[tokio::test]
    async fn test_round_trip_text() {
        let (mut port, mut device) = memory_port("/dev/ttyMEM0", false);
        let mut pair = attach(&mut port).unwrap();

        let writer = pair.writer().unwrap();
        writer.lock().await.write("STATUS\r\n").await.unwrap();
        let mut sent = [0u8; 8];
        device.stream.read_exact(&mut sent).await.unwrap();
        assert_eq!(&sent, b"STATUS\r\n");

        device.stream.write_all("Válvula ABIERTA".as_bytes()).await.unwrap();
        let mut reader = pair.take_reader().unwrap();
        let text = reader.read_chunk().await.unwrap().unwrap();
        assert_eq!(text, "Válvula ABIERTA");
    }

    #[tokio::test]
    async fn test_read_chunk_end_of_stream() {
        let (mut port, device) = memory_port("/dev/ttyMEM0", false);
        let mut pair = attach(&mut port).unwrap();
        drop(device);
        let mut reader = pair.take_reader().unwrap();
        assert_eq!(reader.read_chunk().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_detach_shuts_writer() {
        let (mut port, mut device) = memory_port("/dev/ttyMEM0", false);
        let pair = attach(&mut port).unwrap();
        let log = LogHandle::new(LOG_CAPACITY);
        pair.detach(&log).await;

        let mut rest = Vec::new();
        device.stream.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        assert_eq!(log.count(LogKind::Warning), 0);
    }

    #[tokio::test]
    async fn test_detach_tolerates_missing_reader() {
        let (mut port, _device) = memory_port("/dev/ttyMEM0", false);
        let mut pair = attach(&mut port).unwrap();
        let reader = pair.take_reader();
        assert!(reader.is_some());
        let log = LogHandle::new(LOG_CAPACITY);
        pair.detach(&log).await;
    }

    #[tokio::test]
    async fn test_detach_logs_failed_writer_close() {
        let (port, _device) = memory_port("/dev/ttyMEM0", false);
        let mut port = port.failing_teardown();
        let pair = attach(&mut port).unwrap();
        let log = LogHandle::new(LOG_CAPACITY);
        pair.detach(&log).await;

        let entries = log.snapshot();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, LogKind::Warning);
        assert!(entries[0].message.starts_with("Error closing writer"));
    }
}
