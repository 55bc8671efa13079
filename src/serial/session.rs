//! # Serial Session
//!
//! [`SerialSession`] owns at most one open port at a time and drives its
//! lifecycle:
//!
//! - `connect` asks the host for a port, opens it, attaches the text streams
//!   and starts the read loop.
//! - `disconnect` tears down in a fixed order (cancel flag, read loop, reader,
//!   writer, port), attempting every step even when an earlier one fails.
//! - `write`/`send_line` send text, `enter_bootloader` pulses DTR/RTS.
//!
//! Every failure is recorded in the session log and also returned, so callers
//! can either watch the log or react to the `Result`.

use super::adapter::{self, StreamPair};
use super::command::TankCommand;
use super::line_log::{LOG_CAPACITY, LogHandle, LogKind};
use super::port::{PortHandle, PortSettings, SerialHost, Signals};
use super::read_loop::{CancelFlag, ReadLoop};
use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use log::{debug, warn};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::time::{Duration, sleep};

/// Pause between bootloader signal steps.
pub const BOOTLOADER_STEP_DELAY: Duration = Duration::from_millis(100);

/// DTR/RTS states applied by [`SerialSession::enter_bootloader`].
///
/// On most ESP32 USB adapters DTR drives IO0 and RTS drives EN.
pub const BOOTLOADER_SEQUENCE: [Signals; 3] = [
    Signals::new(false, true),
    Signals::new(true, false),
    Signals::new(false, false),
];

/// Resources owned while a port is open.
struct ActiveSession {
    port: Box<dyn PortHandle>,
    streams: StreamPair,
    read_loop: Option<ReadLoop>,
    cancel: CancelFlag,
}

/// Snapshot of the observable session state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionStatus {
    pub supported: bool,
    pub connected: bool,
    pub baud_rate: u32,
    pub busy: bool,
    pub reading: bool,
    pub log_len: usize,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let yes_no = |b: bool| if b { "yes" } else { "no" };
        write!(
            f,
            "supported: {}, connected: {}, baud: {}, busy: {}, reading: {}, log: {} entries",
            yes_no(self.supported),
            yes_no(self.connected),
            self.baud_rate,
            yes_no(self.busy),
            yes_no(self.reading),
            self.log_len
        )
    }
}

/// Clears the busy flag when the bootloader sequence ends or is dropped.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Serial session controller.
pub struct SerialSession {
    host: Box<dyn SerialHost>,
    settings: Mutex<PortSettings>,
    active: tokio::sync::Mutex<Option<ActiveSession>>,
    connected: AtomicBool,
    busy: AtomicBool,
    log: LogHandle,
    step_delay: Duration,
}

impl SerialSession {
    pub fn new(host: Box<dyn SerialHost>, settings: PortSettings) -> Self {
        SerialSession {
            host,
            settings: Mutex::new(settings),
            active: tokio::sync::Mutex::new(None),
            connected: AtomicBool::new(false),
            busy: AtomicBool::new(false),
            log: LogHandle::new(LOG_CAPACITY),
            step_delay: BOOTLOADER_STEP_DELAY,
        }
    }

    /// Builds a session from a loaded configuration.
    pub fn from_config(host: Box<dyn SerialHost>, config: &SessionConfig) -> Self {
        Self::new(host, config.port_settings())
            .with_log_capacity(config.log_capacity)
            .with_step_delay(config.step_delay())
    }

    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log = LogHandle::new(capacity);
        self
    }

    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    fn lock_settings(&self) -> MutexGuard<'_, PortSettings> {
        self.settings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn log(&self) -> &LogHandle {
        &self.log
    }

    pub fn is_supported(&self) -> bool {
        self.host.is_supported()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// `true` while a bootloader sequence runs.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn baud_rate(&self) -> u32 {
        self.lock_settings().baud_rate
    }

    pub fn settings(&self) -> PortSettings {
        self.lock_settings().clone()
    }

    /// Whether the read loop of the open session is still draining input.
    pub async fn is_reading(&self) -> bool {
        let active = self.active.lock().await;
        active
            .as_ref()
            .and_then(|session| session.read_loop.as_ref())
            .is_some_and(ReadLoop::is_running)
    }

    /// Name of the open port.
    pub async fn port_name(&self) -> Option<String> {
        let active = self.active.lock().await;
        active.as_ref().map(|session| session.port.name().to_string())
    }

    pub async fn status(&self) -> SessionStatus {
        SessionStatus {
            supported: self.is_supported(),
            connected: self.is_connected(),
            baud_rate: self.baud_rate(),
            busy: self.is_busy(),
            reading: self.is_reading().await,
            log_len: self.log.len(),
        }
    }

    /// Changes the baud rate used by the next `connect`.
    ///
    /// Rejected while a session is open. A call racing `connect` or
    /// `disconnect` waits for it and then decides.
    pub async fn set_baud_rate(&self, baud_rate: u32) -> Result<()> {
        if baud_rate == 0 {
            self.log.warning("Baud rate must be positive");
            return Err(SessionError::InvalidBaudRate(baud_rate));
        }
        // held until the new rate is stored so a connect cannot slip in between
        let active = self.active.lock().await;
        if active.is_some() || self.is_connected() {
            let current = self.baud_rate();
            self.log.warning(format!("Baud rate stays at {current} while connected"));
            return Err(SessionError::BaudRateLocked { current });
        }
        self.lock_settings().baud_rate = baud_rate;
        drop(active);
        debug!("Baud rate set to {baud_rate}");
        Ok(())
    }

    /// Opens a port and starts reading from it.
    pub async fn connect(&self) -> Result<()> {
        let result = self.open_session().await;
        if let Err(e) = &result {
            self.log.error(e.to_string());
        }
        result
    }

    async fn open_session(&self) -> Result<()> {
        if !self.host.is_supported() {
            return Err(SessionError::UnsupportedEnvironment);
        }
        let mut active = self.active.lock().await;
        if let Some(session) = active.as_ref() {
            return Err(SessionError::AlreadyConnected(session.port.name().to_string()));
        }

        let settings = self.settings();
        let port_name = self.host.request_port()?;
        let mut port = self.host.open(&port_name, &settings)?;
        let mut streams = match adapter::attach(port.as_mut()) {
            Ok(streams) => streams,
            Err(e) => {
                if let Err(close_err) = port.close() {
                    self.log.warning(format!("Error closing port: {close_err}"));
                }
                return Err(e);
            }
        };

        let cancel = CancelFlag::new();
        self.connected.store(true, Ordering::SeqCst);
        self.log.info(format!(
            "Connected to {} @ {} baud",
            port.name(),
            settings.baud_rate
        ));
        let read_loop = streams
            .take_reader()
            .map(|reader| ReadLoop::spawn(reader, self.log.clone(), cancel.clone()));
        *active = Some(ActiveSession {
            port,
            streams,
            read_loop,
            cancel,
        });
        Ok(())
    }

    /// Closes the open session. Does nothing when already closed.
    pub async fn disconnect(&self) {
        let mut active = self.active.lock().await;
        let Some(session) = active.take() else {
            self.connected.store(false, Ordering::SeqCst);
            debug!("Disconnect requested without an open session");
            return;
        };
        let ActiveSession {
            mut port,
            mut streams,
            read_loop,
            cancel,
        } = session;

        // the read loop must see the flag before its stream goes away
        cancel.cancel();
        if let Some(read_loop) = read_loop {
            match read_loop.stop().await {
                Ok((reader, reason)) => {
                    debug!("Read loop finished: {reason:?}");
                    streams.restore_reader(reader);
                }
                Err(e) => self.log.warning(format!("Error cancelling reader: {e}")),
            }
        }
        streams.detach(&self.log).await;
        if let Err(e) = port.close() {
            self.log.warning(format!("Error closing port: {e}"));
        }
        let name = port.name().to_string();
        drop(port);

        self.connected.store(false, Ordering::SeqCst);
        self.log.info(format!("Disconnected from {name}"));
    }

    /// Sends `text` as is.
    pub async fn write(&self, text: &str) -> Result<()> {
        let result = self.write_text(text).await;
        match &result {
            Ok(()) => self.log.append(LogKind::Outbound, text),
            Err(e) => self.log.error(e.to_string()),
        }
        result
    }

    async fn write_text(&self, text: &str) -> Result<()> {
        let (writer, cancel) = {
            let active = self.active.lock().await;
            let session = active.as_ref().ok_or(SessionError::NotConnected)?;
            let writer = session.streams.writer().ok_or(SessionError::NotConnected)?;
            (writer, session.cancel.clone())
        };
        // a device that stops reading must not keep disconnect waiting
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SessionError::port_write("interrupted by disconnect")),
            result = async { writer.lock().await.write(text).await } => {
                result.map_err(SessionError::port_write)
            }
        }
    }

    /// Sends `line` terminated with CRLF.
    pub async fn send_line(&self, line: &str) -> Result<()> {
        self.write(&format!("{line}\r\n")).await
    }

    pub async fn send_command(&self, command: TankCommand) -> Result<()> {
        self.send_line(command.as_str()).await
    }

    /// Pulses DTR/RTS to reset the board into its bootloader.
    ///
    /// Only one sequence runs at a time; an overlapping call fails with
    /// [`SessionError::Busy`] without touching the signals.
    pub async fn enter_bootloader(&self) -> Result<()> {
        let Some(_guard) = BusyGuard::acquire(&self.busy) else {
            self.log.warning("Bootloader sequence already in progress");
            return Err(SessionError::Busy);
        };
        let result = self.pulse_signals().await;
        match &result {
            Ok(()) => self.log.info("Bootloader sequence sent (DTR/RTS)"),
            Err(e @ (SessionError::SignalsUnsupported(_) | SessionError::NotConnected)) => {
                self.log.warning(e.to_string())
            }
            Err(e) => self.log.error(e.to_string()),
        }
        result
    }

    async fn pulse_signals(&self) -> Result<()> {
        for (step, signals) in BOOTLOADER_SEQUENCE.iter().enumerate() {
            if step > 0 {
                sleep(self.step_delay).await;
            }
            self.apply_signals(*signals).await?;
        }
        Ok(())
    }

    async fn apply_signals(&self, signals: Signals) -> Result<()> {
        let mut active = self.active.lock().await;
        let session = active.as_mut().ok_or(SessionError::NotConnected)?;
        if !session.port.supports_signals() {
            return Err(SessionError::SignalsUnsupported(
                session.port.name().to_string(),
            ));
        }
        debug!(
            "DTR={} RTS={}",
            signals.data_terminal_ready, signals.request_to_send
        );
        session.port.set_signals(signals)
    }
}

impl Drop for SerialSession {
    fn drop(&mut self) {
        if let Some(session) = self.active.get_mut().take() {
            session.cancel.cancel();
            if let Some(read_loop) = &session.read_loop {
                read_loop.abort();
            }
            warn!(
                "Serial session on {} dropped while connected",
                session.port.name()
            );
        }
    }
}
