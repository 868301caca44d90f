//! Bioamp command-line front end
//!
//! Drives acquisition sessions from captured byte streams or live boards and
//! prints the events they produce.
//!
//! # Usage
//!
//! ```bash
//! # Replay a capture recorded from the serial port
//! bioamp replay capture.bin --chunk 20
//!
//! # Replay a capture that starts mid-stream, as JSON lines
//! bioamp replay capture.bin --skip-banner --json
//!
//! # Live board over USB: reset, sync clocks, stream for 10 s
//! bioamp stream --port /dev/ttyUSB0 --sync --seconds 10
//!
//! # Low-power board over BLE
//! bioamp low-power --name Ganglion --seconds 10
//!
//! # List serial ports
//! bioamp ports
//! ```

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use bioamp_core::{BoardInfo, BoardKind, Firmware};
use bioamp_host::events::EventReceiver;
use bioamp_host::{
    LowPowerSession, RecordingTransport, Session, SessionConfig, SessionEvent, SystemClock,
};

/// Size of one low-power radio notification in a capture file.
const NOTIFICATION_SIZE: usize = 20;

/// Bioamp acquisition tool
#[derive(Parser, Debug)]
#[command(name = "bioamp")]
#[command(author, version, about = "Biosignal amplifier acquisition tool", long_about = None)]
struct Cli {
    /// Logging verbosity level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Session configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Feed a captured byte stream through a session
    Replay {
        /// Capture file
        file: PathBuf,

        /// Bytes per chunk fed to the session
        #[arg(long, default_value = "64")]
        chunk: usize,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,

        /// Capture holds low-power radio notifications (20 bytes each)
        #[arg(long)]
        low_power: bool,

        /// Capture has no boot banner; start framing packets at once
        #[arg(long)]
        skip_banner: bool,

        /// With --skip-banner, assume a 16-channel daisy board
        #[arg(long)]
        daisy: bool,
    },

    /// Stream from a board on a serial port
    Stream {
        /// Serial port path (e.g., /dev/ttyUSB0 or COM3)
        #[arg(short, long)]
        port: String,

        /// Baud rate
        #[arg(long, default_value = "115200")]
        baud: u32,

        /// Synchronize clocks after the stream starts
        #[arg(long)]
        sync: bool,

        /// Run an impedance sweep before streaming
        #[arg(long)]
        impedance: bool,

        /// How long to stream
        #[arg(long, default_value = "10")]
        seconds: u64,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Stream from a low-power board over BLE
    LowPower {
        /// Advertised name prefix of the board
        #[arg(short, long, default_value = "Ganglion")]
        name: String,

        /// Scan duration in seconds
        #[arg(long, default_value = "5")]
        scan: u64,

        /// How long to stream
        #[arg(long, default_value = "10")]
        seconds: u64,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// List available serial ports
    Ports,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Bioamp v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Replay { file, chunk, json, low_power, skip_banner, daisy } => {
            if low_power {
                replay_low_power(&file, json)
            } else {
                replay(&file, config, chunk, json, skip_banner.then_some(daisy))
            }
        }
        Commands::Stream { port, baud, sync, impedance, seconds, json } => {
            run_stream(&port, baud, config, StreamOptions { sync, impedance, seconds, json })
        }
        Commands::LowPower { name, scan, seconds, json } => run_low_power(&name, scan, seconds, json),
        Commands::Ports => list_ports(),
    }
}

/// Load and check the session configuration.
fn load_config(path: Option<&Path>) -> anyhow::Result<SessionConfig> {
    let config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            serde_json::from_str(&text)?
        }
        None => SessionConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

// ============================================================================
// Event Output
// ============================================================================

fn print_events(events: &mut EventReceiver, json: bool) -> anyhow::Result<usize> {
    let mut count = 0;
    while let Ok(event) = events.try_recv() {
        if json {
            println!("{}", serde_json::to_string(&event)?);
        } else {
            println!("{}", describe(&event));
        }
        count += 1;
    }
    Ok(count)
}

fn describe(event: &SessionEvent) -> String {
    match event {
        SessionEvent::Sample(sample) => {
            let channels: Vec<String> = sample.channel_data.iter().map(|v| format!("{v:9.2}")).collect();
            match sample.timestamp_ms {
                Some(ts) => format!("{:3} {} @ {ts:.1}", sample.sample_number, channels.join(" ")),
                None => format!("{:3} {}", sample.sample_number, channels.join(" ")),
            }
        }
        SessionEvent::LowPowerSample(sample) => {
            let channels: Vec<String> = sample.channel_data.iter().map(|v| format!("{v:9.2}")).collect();
            format!("{:3} {}", sample.sample_number, channels.join(" "))
        }
        SessionEvent::ImpedanceResult(result) => format!(
            "impedance ch{}: P {:.0} ({}) N {:.0} ({})",
            result.channel,
            result.p.raw,
            result.p.text.as_str(),
            result.n.raw,
            result.n.text.as_str()
        ),
        SessionEvent::Message(message) => format!("message: {}", String::from_utf8_lossy(message)),
        other => format!("{other:?}"),
    }
}

// ============================================================================
// Replay
// ============================================================================

/// Replay a standard-board capture. `assumed` is `Some(daisy)` when the
/// banner handshake is skipped.
fn replay(
    file: &Path,
    config: SessionConfig,
    chunk: usize,
    json: bool,
    assumed: Option<bool>,
) -> anyhow::Result<()> {
    let bytes = std::fs::read(file)?;
    info!("Replaying {} bytes from {}", bytes.len(), file.display());

    let (mut session, mut events) = Session::new(RecordingTransport::new(), SystemClock, config);
    let mut ready = match assumed {
        Some(daisy) => {
            let kind = if daisy { BoardKind::Daisy } else { BoardKind::Default };
            session.assume_board(BoardInfo::new(Firmware::V1, kind));
            None
        }
        None => Some(session.on_connected()),
    };

    let mut printed = 0;
    for piece in bytes.chunks(chunk.max(1)) {
        session.process_bytes(piece);
        printed += print_events(&mut events, json)?;
    }

    if let Some(ready) = ready.as_mut() {
        match ready.try_result() {
            Some(Ok(board)) => info!("Board: {:?}", board),
            Some(Err(e)) => warn!("Soft reset failed: {e}"),
            None => warn!("No boot banner in capture; try --skip-banner"),
        }
    }
    if !session.buffered().is_empty() {
        warn!("{} trailing bytes left unframed", session.buffered().len());
    }
    info!("{printed} events");
    Ok(())
}

fn replay_low_power(file: &Path, json: bool) -> anyhow::Result<()> {
    let bytes = std::fs::read(file)?;
    info!("Replaying {} notifications from {}", bytes.len() / NOTIFICATION_SIZE, file.display());

    let (mut session, mut events) = LowPowerSession::new(RecordingTransport::new());
    let mut printed = 0;
    for notification in bytes.chunks(NOTIFICATION_SIZE) {
        session.process_notification(notification);
        printed += print_events(&mut events, json)?;
    }
    info!("{printed} events");
    Ok(())
}

// ============================================================================
// Live Serial Stream
// ============================================================================

struct StreamOptions {
    sync: bool,
    impedance: bool,
    seconds: u64,
    json: bool,
}

#[cfg(feature = "usb")]
fn run_stream(port: &str, baud: u32, config: SessionConfig, options: StreamOptions) -> anyhow::Result<()> {
    use std::time::{Duration, Instant};

    use bioamp_host::{Deferred, SerialTransport};

    type SerialSession = Session<SerialTransport, SystemClock>;

    /// Pump bytes until `pending` resolves.
    fn wait_for<T>(
        session: &mut SerialSession,
        events: &mut EventReceiver,
        json: bool,
        mut pending: Deferred<T>,
    ) -> anyhow::Result<T> {
        let mut buf = [0u8; 1024];
        loop {
            if let Some(result) = pending.try_result() {
                return Ok(result?);
            }
            let n = session.transport_mut().read_chunk(&mut buf)?;
            session.process_bytes(&buf[..n]);
            session.tick();
            print_events(events, json)?;
        }
    }

    let transport = SerialTransport::open(port, baud)?;
    let (mut session, mut events) = Session::new(transport, SystemClock, config);

    let ready = session.on_connected();
    let board = wait_for(&mut session, &mut events, options.json, ready)?;
    info!("Connected to {:?} board ({} channels)", board.board_kind, board.channel_count);

    let started = session.stream_start();
    wait_for(&mut session, &mut events, options.json, started)?;

    if options.impedance {
        let sweep = session.test_all_channels();
        let results = wait_for(&mut session, &mut events, options.json, sweep)?;
        info!("Impedance sweep done: {} channels", results.len());
    }

    if options.sync {
        let synced = session.sync_clocks();
        match wait_for(&mut session, &mut events, options.json, synced) {
            Ok(report) => info!("Offset {:.3}ms", report.offset_ms),
            Err(e) => warn!("Clock sync failed: {e}"),
        }
    }

    let deadline = Instant::now() + Duration::from_secs(options.seconds);
    let mut buf = [0u8; 1024];
    while Instant::now() < deadline {
        let n = session.transport_mut().read_chunk(&mut buf)?;
        session.process_bytes(&buf[..n]);
        session.tick();
        print_events(&mut events, options.json)?;
    }

    let stopped = session.stream_stop();
    wait_for(&mut session, &mut events, options.json, stopped)?;
    Ok(())
}

#[cfg(not(feature = "usb"))]
fn run_stream(port: &str, baud: u32, config: SessionConfig, options: StreamOptions) -> anyhow::Result<()> {
    let _ = (port, baud, config, options);
    anyhow::bail!(
        "USB support not enabled. Rebuild with --features usb:\n\
         cargo run -p bioamp-app --features usb"
    );
}

// ============================================================================
// Live BLE Stream
// ============================================================================

#[cfg(feature = "ble")]
fn run_low_power(name: &str, scan: u64, seconds: u64, json: bool) -> anyhow::Result<()> {
    use std::time::Duration;

    use bioamp_host::BleTransport;
    use tokio::runtime::Runtime;
    use tokio::time::{timeout_at, Instant};

    let rt = Runtime::new()?;
    rt.block_on(async {
        let (transport, mut notifications) =
            BleTransport::connect(name, Duration::from_secs(scan)).await?;
        let (mut session, mut events) = LowPowerSession::new(transport);
        session.stream_start()?;

        let deadline = Instant::now() + Duration::from_secs(seconds);
        while let Ok(Some(notification)) = timeout_at(deadline, notifications.recv()).await {
            session.process_notification(&notification);
            print_events(&mut events, json)?;
        }

        session.stream_stop()?;
        session.transport().disconnect().await?;
        Ok::<(), anyhow::Error>(())
    })
}

#[cfg(not(feature = "ble"))]
fn run_low_power(name: &str, scan: u64, seconds: u64, json: bool) -> anyhow::Result<()> {
    let _ = (name, scan, seconds, json);
    anyhow::bail!(
        "BLE support not enabled. Rebuild with --features ble:\n\
         cargo run -p bioamp-app --features ble"
    );
}

// ============================================================================
// Ports
// ============================================================================

#[cfg(feature = "usb")]
fn list_ports() -> anyhow::Result<()> {
    let ports = bioamp_host::SerialTransport::list_ports();
    if ports.is_empty() {
        info!("(no serial ports found)");
    }
    for port in ports {
        println!("{port}");
    }
    Ok(())
}

#[cfg(not(feature = "usb"))]
fn list_ports() -> anyhow::Result<()> {
    warn!("USB support not enabled. Rebuild with --features usb");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bioamp_core::protocol::{Packet, PacketType};

    #[test]
    fn test_cli_parses_replay() {
        let cli = Cli::parse_from(["bioamp", "--log-level", "debug", "replay", "cap.bin", "--chunk", "7", "--json"]);
        assert_eq!(cli.log_level, "debug");
        assert!(matches!(cli.command, Commands::Replay { chunk: 7, json: true, low_power: false, .. }));
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(load_config(None).is_ok());
    }

    #[test]
    fn test_describe_sample() {
        let packet = Packet::encode(5, &[0; 8], [0; 6], PacketType::StandardAccel);
        let sample = bioamp_core::SampleDecoder::default().decode(&packet, None).unwrap().unwrap();
        let line = describe(&SessionEvent::Sample(sample));
        assert!(line.starts_with("  5"));
    }
}
