use clap::Parser;
use log::{error, warn};
use serial_session::config::{CONFIG_FILE, SessionConfig};
use serial_session::error::{Result, SessionError};
use serial_session::serial::port::{COMMON_BAUD_RATES, list_ports};
use serial_session::serial::{NativeHost, SerialSession, TankCommand};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

/// Serial console for ESP32 water-tank controllers
#[derive(Parser, Debug)]
#[command(name = "serial-session", version, about)]
struct Cli {
    /// Serial port to open (first available port when omitted)
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate
    #[arg(short, long)]
    baud: Option<u32>,

    /// Configuration file
    #[arg(short, long, default_value = CONFIG_FILE)]
    config: PathBuf,

    /// List available serial ports and exit
    #[arg(long)]
    list: bool,

    /// Pulse DTR/RTS into the bootloader right after connecting
    #[arg(long)]
    bootloader: bool,

    /// Send this file raw right after connecting
    #[arg(long)]
    send_file: Option<PathBuf>,

    /// Write the effective configuration back to the config file
    #[arg(long)]
    save_config: bool,
}

/// One line typed into the console.
#[derive(Debug, PartialEq)]
enum ConsoleInput {
    Line(String),
    Command(TankCommand),
    Bootloader,
    Baud(u32),
    Connect,
    Disconnect,
    Status,
    SendFile(PathBuf),
    SaveLog(PathBuf),
    Clear,
    Help,
    Quit,
    Empty,
    Invalid(String),
}

fn parse_input(line: &str) -> ConsoleInput {
    let line = line.trim_end_matches(['\r', '\n']);
    let Some(rest) = line.strip_prefix(':') else {
        if line.is_empty() {
            return ConsoleInput::Empty;
        }
        return match line.parse::<TankCommand>() {
            Ok(command) => ConsoleInput::Command(command),
            Err(_) => ConsoleInput::Line(line.to_string()),
        };
    };
    let mut parts = rest.trim().splitn(2, char::is_whitespace);
    let name = parts.next().unwrap_or_default();
    let arg = parts.next().map(str::trim).unwrap_or_default();
    match name {
        "boot" | "bootloader" => ConsoleInput::Bootloader,
        "baud" => match arg.parse() {
            Ok(rate) => ConsoleInput::Baud(rate),
            Err(_) => ConsoleInput::Invalid(format!("bad baud rate '{arg}'")),
        },
        "connect" => ConsoleInput::Connect,
        "disconnect" => ConsoleInput::Disconnect,
        "status" => ConsoleInput::Status,
        "send" if !arg.is_empty() => ConsoleInput::SendFile(PathBuf::from(arg)),
        "send" => ConsoleInput::Invalid("':send' needs a file path".to_string()),
        "save" if !arg.is_empty() => ConsoleInput::SaveLog(PathBuf::from(arg)),
        "save" => ConsoleInput::Invalid("':save' needs a file path".to_string()),
        "clear" => ConsoleInput::Clear,
        "help" | "h" => ConsoleInput::Help,
        "quit" | "q" | "exit" => ConsoleInput::Quit,
        other => ConsoleInput::Invalid(format!("unknown console command ':{other}'")),
    }
}

fn print_help() {
    println!("Type text and press Enter to send it with CRLF.");
    for command in TankCommand::ALL {
        println!("  {:<12} {}", command.as_str(), command.description());
    }
    println!("  :boot        Pulse DTR/RTS into the bootloader");
    println!("  :baud <n>    Change baud rate (while disconnected)");
    println!("  :connect     Open the port");
    println!("  :disconnect  Close the port");
    println!("  :status      Show session state");
    println!("  :send <file> Send a file raw");
    println!("  :save <file> Write the log to a file");
    println!("  :clear       Clear the log");
    println!("  :quit        Leave");
    println!(
        "Common baud rates: {}",
        COMMON_BAUD_RATES
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    );
}

async fn send_file(session: &SerialSession, path: &Path) -> Result<()> {
    let text = tokio::fs::read_to_string(path).await?;
    session.write(&text).await
}

fn save_log(session: &SerialSession, path: &Path) -> Result<()> {
    let file = std::fs::File::create(path)?;
    session.log().lock().export(std::io::BufWriter::new(file))?;
    println!("Log written to {}", path.display());
    Ok(())
}

/// Runs one console input. Returns `false` when the console should exit.
async fn handle_input(session: &SerialSession, input: ConsoleInput) -> bool {
    // failures are already in the session log
    let result = match input {
        ConsoleInput::Line(line) => session.send_line(&line).await,
        ConsoleInput::Command(command) => session.send_command(command).await,
        ConsoleInput::Bootloader => session.enter_bootloader().await,
        ConsoleInput::Baud(rate) => session.set_baud_rate(rate).await,
        ConsoleInput::Connect => session.connect().await,
        ConsoleInput::Disconnect => {
            session.disconnect().await;
            Ok(())
        }
        ConsoleInput::Status => {
            println!("{}", session.status().await);
            Ok(())
        }
        ConsoleInput::SendFile(path) => send_file(session, &path).await,
        ConsoleInput::SaveLog(path) => save_log(session, &path),
        ConsoleInput::Clear => {
            session.log().clear();
            Ok(())
        }
        ConsoleInput::Help => {
            print_help();
            Ok(())
        }
        ConsoleInput::Quit => return false,
        ConsoleInput::Empty => Ok(()),
        ConsoleInput::Invalid(reason) => {
            warn!("{reason}");
            Ok(())
        }
    };
    if let Err(SessionError::FileIo(e)) = result {
        error!("{e}");
    }
    true
}

async fn run(cli: Cli) -> Result<()> {
    if cli.list {
        for name in list_ports()? {
            println!("{name}");
        }
        return Ok(());
    }

    let mut config = SessionConfig::load(&cli.config)?;
    if cli.port.is_some() {
        config.port_name = cli.port.clone();
    }
    if let Some(baud) = cli.baud {
        config.baud_rate = baud;
    }
    config.validate()?;
    if cli.save_config {
        config.save(&cli.config)?;
    }

    let host = NativeHost::new(config.port_name.clone());
    let session = SerialSession::from_config(Box::new(host), &config);

    let mut entries = session.log().subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match entries.recv().await {
                Ok(entry) => println!("{entry}"),
                Err(RecvError::Lagged(skipped)) => warn!("Console skipped {skipped} log entries"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    session.connect().await?;
    if cli.bootloader {
        let _ = session.enter_bootloader().await;
    }
    if let Some(path) = &cli.send_file {
        send_file(&session, path).await?;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !handle_input(&session, parse_input(&line)).await {
                    break;
                }
            }
        }
    }

    session.disconnect().await;
    drop(session);
    let _ = printer.await;
    Ok(())
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(e) = run(Cli::parse()).await {
        error!("{e}");
        std::process::exit(1);
    }
}
