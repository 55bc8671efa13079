pub mod adapter;
pub mod command;
pub mod encoding;
pub mod line_log;
pub mod port;
pub mod read_loop;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use command::TankCommand;
pub use line_log::{LogEntry, LogHandle, LogKind};
pub use port::{NativeHost, PortHandle, PortSettings, SerialHost, Signals};
pub use session::{SerialSession, SessionStatus};
