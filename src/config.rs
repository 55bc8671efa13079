//! # Configuration
//!
//! Session settings persisted as RON, by default in
//! `config/serial_session.ron`. A missing file yields the defaults; a file
//! that does not parse is an error.

use crate::error::{Result, SessionError};
use crate::serial::line_log::{LOG_CAPACITY, MAX_LOG_CAPACITY};
use crate::serial::port::{
    DEFAULT_BAUD_RATE, DataBits, FlowControl, Parity, PortSettings, StopBits,
};
use crate::serial::session::BOOTLOADER_STEP_DELAY;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default configuration file path.
pub const CONFIG_FILE: &str = "config/serial_session.ron";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataBitsCfg {
    Five,
    Six,
    Seven,
    Eight,
}

impl From<DataBitsCfg> for DataBits {
    fn from(value: DataBitsCfg) -> Self {
        match value {
            DataBitsCfg::Five => DataBits::Five,
            DataBitsCfg::Six => DataBits::Six,
            DataBitsCfg::Seven => DataBits::Seven,
            DataBitsCfg::Eight => DataBits::Eight,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParityCfg {
    None,
    Odd,
    Even,
}

impl From<ParityCfg> for Parity {
    fn from(value: ParityCfg) -> Self {
        match value {
            ParityCfg::None => Parity::None,
            ParityCfg::Odd => Parity::Odd,
            ParityCfg::Even => Parity::Even,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopBitsCfg {
    One,
    Two,
}

impl From<StopBitsCfg> for StopBits {
    fn from(value: StopBitsCfg) -> Self {
        match value {
            StopBitsCfg::One => StopBits::One,
            StopBitsCfg::Two => StopBits::Two,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowControlCfg {
    None,
    Software,
    Hardware,
}

impl From<FlowControlCfg> for FlowControl {
    fn from(value: FlowControlCfg) -> Self {
        match value {
            FlowControlCfg::None => FlowControl::None,
            FlowControlCfg::Software => FlowControl::Software,
            FlowControlCfg::Hardware => FlowControl::Hardware,
        }
    }
}

/// Persisted session configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// port to open; the first available port when `None`
    pub port_name: Option<String>,
    pub baud_rate: u32,
    pub data_bits: DataBitsCfg,
    pub parity: ParityCfg,
    pub stop_bits: StopBitsCfg,
    pub flow_control: FlowControlCfg,
    pub timeout_ms: u64,
    /// entries kept in the session log
    pub log_capacity: usize,
    /// pause between bootloader signal steps
    pub bootloader_step_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            port_name: None,
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DataBitsCfg::Eight,
            parity: ParityCfg::None,
            stop_bits: StopBitsCfg::One,
            flow_control: FlowControlCfg::None,
            timeout_ms: 500,
            log_capacity: LOG_CAPACITY,
            bootloader_step_ms: BOOTLOADER_STEP_DELAY.as_millis() as u64,
        }
    }
}

impl SessionConfig {
    /// Loads the configuration at `path`, falling back to defaults when the
    /// file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        let config: SessionConfig = ron::from_str(&data).map_err(|e| {
            SessionError::invalid_config(format!("{}: {e}", path.display()))
        })?;
        config.validate()?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Writes the configuration to `path`, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let data = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| SessionError::invalid_config(e.to_string()))?;
        std::fs::write(path, data)?;
        log::info!("Saved config to {}", path.display());
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.baud_rate == 0 {
            return Err(SessionError::invalid_config("baud_rate must be positive"));
        }
        if self.log_capacity == 0 || self.log_capacity > MAX_LOG_CAPACITY {
            return Err(SessionError::invalid_config(format!(
                "log_capacity must be between 1 and {MAX_LOG_CAPACITY}"
            )));
        }
        if matches!(&self.port_name, Some(name) if name.trim().is_empty()) {
            return Err(SessionError::invalid_config("port_name must not be empty"));
        }
        Ok(())
    }

    pub fn port_settings(&self) -> PortSettings {
        PortSettings {
            baud_rate: self.baud_rate,
            data_bits: self.data_bits.into(),
            stop_bits: self.stop_bits.into(),
            parity: self.parity.into(),
            flow_control: self.flow_control.into(),
            timeout: Duration::from_millis(self.timeout_ms),
        }
    }

    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.bootloader_step_ms)
    }
}
