//! In-memory ports for unit tests.

use super::port::{BoxedReader, BoxedWriter, MockSerialHost, PortHandle, Signals};
use crate::error::{Result, SessionError};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::{AsyncWrite, DuplexStream};

pub struct MemoryPort {
    name: String,
    streams: Option<(BoxedReader, BoxedWriter)>,
    signals: Option<Arc<Mutex<Vec<Signals>>>>,
    closed: Arc<AtomicBool>,
    fail_close: bool,
}

/// Writer whose shutdown always fails, like a port that vanished.
struct FailingShutdown(BoxedWriter);

impl AsyncWrite for FailingShutdown {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.0).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::other("device disappeared")))
    }
}

/// The device side of a [`MemoryPort`].
pub struct DeviceEnd {
    pub stream: DuplexStream,
    signals: Arc<Mutex<Vec<Signals>>>,
    closed: Arc<AtomicBool>,
}

impl DeviceEnd {
    /// Signal states applied so far, in order.
    pub fn signals(&self) -> Vec<Signals> {
        self.signals.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub fn memory_port(name: &str, with_signals: bool) -> (MemoryPort, DeviceEnd) {
    let (host, device) = tokio::io::duplex(4096);
    let (reader, writer) = tokio::io::split(host);
    let signals = Arc::new(Mutex::new(Vec::new()));
    let closed = Arc::new(AtomicBool::new(false));
    let port = MemoryPort {
        name: name.to_string(),
        streams: Some((Box::new(reader), Box::new(writer))),
        signals: with_signals.then(|| signals.clone()),
        closed: closed.clone(),
        fail_close: false,
    };
    let device = DeviceEnd {
        stream: device,
        signals,
        closed,
    };
    (port, device)
}

impl MemoryPort {
    /// Makes both the writer shutdown and the port close fail.
    pub fn failing_teardown(mut self) -> Self {
        self.fail_close = true;
        if let Some((reader, writer)) = self.streams.take() {
            let writer: BoxedWriter = Box::new(FailingShutdown(writer));
            self.streams = Some((reader, writer));
        }
        self
    }
}

impl PortHandle for MemoryPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn take_streams(&mut self) -> Option<(BoxedReader, BoxedWriter)> {
        self.streams.take()
    }

    fn supports_signals(&self) -> bool {
        self.signals.is_some()
    }

    fn set_signals(&mut self, signals: Signals) -> Result<()> {
        match &self.signals {
            Some(applied) => {
                applied.lock().unwrap().push(signals);
                Ok(())
            }
            None => Err(SessionError::SignalsUnsupported(self.name.clone())),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        if self.fail_close {
            return Err(SessionError::FileIo(io::Error::other("device disappeared")));
        }
        Ok(())
    }
}

/// Host that hands out `port` once; a second open fails as busy.
pub fn host_with(port: MemoryPort) -> MockSerialHost {
    let name = port.name.clone();
    let mut port = Some(port);
    let mut host = MockSerialHost::new();
    host.expect_is_supported().return_const(true);
    host.expect_request_port().returning(move || Ok(name.clone()));
    host.expect_open().returning(move |port_name, _| {
        port.take()
            .map(|p| Box::new(p) as Box<dyn PortHandle>)
            .ok_or_else(|| SessionError::port_open(port_name, "device busy"))
    });
    host
}
