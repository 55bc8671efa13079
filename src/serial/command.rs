//! Line commands understood by the water-tank firmware.

use crate::error::SessionError;
use std::fmt;
use std::str::FromStr;

/// firmware command
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TankCommand {
    /// open the valve
    Open,
    /// close the valve
    Close,
    /// print level, valve state and WiFi signal
    Status,
    /// restart the board
    Reset,
}

impl TankCommand {
    pub const ALL: [TankCommand; 4] = [
        TankCommand::Open,
        TankCommand::Close,
        TankCommand::Status,
        TankCommand::Reset,
    ];

    /// Text sent on the wire (without line terminator).
    pub fn as_str(&self) -> &'static str {
        match self {
            TankCommand::Open => "OPEN",
            TankCommand::Close => "CLOSE",
            TankCommand::Status => "STATUS",
            TankCommand::Reset => "RESET",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            TankCommand::Open => "Open the valve",
            TankCommand::Close => "Close the valve",
            TankCommand::Status => "Report water level, valve state and WiFi RSSI",
            TankCommand::Reset => "Restart the controller",
        }
    }
}

impl fmt::Display for TankCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TankCommand {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        TankCommand::ALL
            .into_iter()
            .find(|cmd| cmd.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| SessionError::UnknownCommand(s.to_string()))
    }
}
