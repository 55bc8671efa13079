use crate::error::{Result, SessionError};
use log::{error, info};
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::Duration;
use tokio_serial::SerialPortBuilderExt;
pub use tokio_serial::{
    available_ports, DataBits, FlowControl, Parity, SerialPort, SerialPortInfo, SerialStream,
    StopBits,
};

/// serial port baud rate
pub const COMMON_BAUD_RATES: &[u32] = &[
    4800, 9600, 19200, 38400, 57600, 115200, 230400, 460800, 500000, 576000, 921600, 1000000,
    1500000, 2000000,
];

/// baud rate the tank firmware runs at
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// byte stream read from a port
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
/// byte stream written to a port
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// serial port settings
#[derive(Clone, Debug, PartialEq)]
pub struct PortSettings {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub parity: Parity,
    pub flow_control: FlowControl,
    pub timeout: Duration,
}

impl PortSettings {
    /// serial port settings initialization
    pub fn new() -> Self {
        PortSettings {
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
            flow_control: FlowControl::None,
            timeout: Duration::from_millis(500),
        }
    }

    /// settings with a different baud rate
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }
}

impl Default for PortSettings {
    fn default() -> Self {
        Self::new()
    }
}

/// DTR/RTS line levels
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Signals {
    pub data_terminal_ready: bool,
    pub request_to_send: bool,
}

impl Signals {
    pub const fn new(data_terminal_ready: bool, request_to_send: bool) -> Self {
        Signals {
            data_terminal_ready,
            request_to_send,
        }
    }
}

/// The environment that hands out serial ports.
#[cfg_attr(test, mockall::automock)]
pub trait SerialHost: Send + Sync {
    /// Whether serial ports can be used at all.
    fn is_supported(&self) -> bool;

    /// Chooses the port to open and returns its name.
    fn request_port(&self) -> Result<String>;

    /// Opens `port_name` with `settings`.
    fn open(&self, port_name: &str, settings: &PortSettings) -> Result<Box<dyn PortHandle>>;
}

/// An open serial port, exclusively owned by one session.
pub trait PortHandle: Send {
    fn name(&self) -> &str;

    /// Hands out the byte streams. Returns `None` once they are claimed.
    fn take_streams(&mut self) -> Option<(BoxedReader, BoxedWriter)>;

    fn supports_signals(&self) -> bool;

    fn set_signals(&mut self, signals: Signals) -> Result<()>;

    /// Releases the port. Calling it twice is harmless.
    fn close(&mut self) -> Result<()>;
}

/// open serial port
pub fn open_port(port_name: &str, settings: &PortSettings) -> Result<SerialStream> {
    match tokio_serial::new(port_name, settings.baud_rate)
        .data_bits(settings.data_bits)
        .parity(settings.parity)
        .stop_bits(settings.stop_bits)
        .flow_control(settings.flow_control)
        .timeout(settings.timeout)
        .open_native_async()
    {
        Ok(stream) => {
            info!("Opened serial port {port_name} @ {} baud", settings.baud_rate);
            Ok(stream)
        }
        Err(e) => {
            error!("Could not open serial port {port_name}: {e}");
            Err(SessionError::port_open(port_name, e.to_string()))
        }
    }
}

/// names of all serial ports currently present
pub fn list_ports() -> Result<Vec<String>> {
    let ports = available_ports().map_err(|e| SessionError::port_open("*", e.to_string()))?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

/// Host backed by the operating system's serial ports.
#[derive(Clone, Debug, Default)]
pub struct NativeHost {
    preferred: Option<String>,
}

impl NativeHost {
    /// `preferred` is opened when set; otherwise the first available port.
    pub fn new(preferred: Option<String>) -> Self {
        NativeHost { preferred }
    }
}

impl SerialHost for NativeHost {
    fn is_supported(&self) -> bool {
        available_ports().is_ok()
    }

    fn request_port(&self) -> Result<String> {
        if let Some(name) = &self.preferred {
            return Ok(name.clone());
        }
        list_ports()?
            .into_iter()
            .next()
            .ok_or_else(|| SessionError::port_open("*", "no serial ports found"))
    }

    fn open(&self, port_name: &str, settings: &PortSettings) -> Result<Box<dyn PortHandle>> {
        let stream = open_port(port_name, settings)?;
        Ok(Box::new(NativePort::new(port_name, stream)))
    }
}

/// [`PortHandle`] over a `tokio_serial` stream.
///
/// The stream sits behind a mutex so the read half, the write half and the
/// signal lines can be driven independently; the lock is only held for a
/// single poll or ioctl.
pub struct NativePort {
    name: String,
    stream: Option<Arc<Mutex<SerialStream>>>,
    claimed: bool,
}

impl NativePort {
    pub fn new(name: impl Into<String>, stream: SerialStream) -> Self {
        NativePort {
            name: name.into(),
            stream: Some(Arc::new(Mutex::new(stream))),
            claimed: false,
        }
    }
}

impl PortHandle for NativePort {
    fn name(&self) -> &str {
        &self.name
    }

    fn take_streams(&mut self) -> Option<(BoxedReader, BoxedWriter)> {
        if self.claimed {
            return None;
        }
        let stream = self.stream.as_ref()?;
        self.claimed = true;
        Some((
            Box::new(SharedStream(stream.clone())),
            Box::new(SharedStream(stream.clone())),
        ))
    }

    fn supports_signals(&self) -> bool {
        self.stream.is_some()
    }

    fn set_signals(&mut self, signals: Signals) -> Result<()> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| SessionError::SignalsUnsupported(self.name.clone()))?;
        let mut stream = stream
            .lock()
            .map_err(|_| SessionError::signal("serial port lock poisoned"))?;
        stream
            .write_data_terminal_ready(signals.data_terminal_ready)
            .map_err(SessionError::signal)?;
        stream
            .write_request_to_send(signals.request_to_send)
            .map_err(SessionError::signal)?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        // the device closes once the last stream half is dropped too
        if self.stream.take().is_some() {
            info!("Closed serial port {}", self.name);
        }
        Ok(())
    }
}

/// One half of a [`NativePort`] stream.
struct SharedStream(Arc<Mutex<SerialStream>>);

fn poisoned() -> io::Error {
    io::Error::other("serial port lock poisoned")
}

impl AsyncRead for SharedStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.0.lock() {
            Ok(mut stream) => Pin::new(&mut *stream).poll_read(cx, buf),
            Err(_) => Poll::Ready(Err(poisoned())),
        }
    }
}

impl AsyncWrite for SharedStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.0.lock() {
            Ok(mut stream) => Pin::new(&mut *stream).poll_write(cx, buf),
            Err(_) => Poll::Ready(Err(poisoned())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.0.lock() {
            Ok(mut stream) => Pin::new(&mut *stream).poll_flush(cx),
            Err(_) => Poll::Ready(Err(poisoned())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.0.lock() {
            Ok(mut stream) => Pin::new(&mut *stream).poll_shutdown(cx),
            Err(_) => Poll::Ready(Err(poisoned())),
        }
    }
}
