//! mqlink - MQTT bridge on the command line
//!
//! Usage:
//!   mqlink [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>        Configuration file path
//!       --host <HOST>          Broker host
//!       --port <PORT>          Broker port
//!       --keepalive <SECS>     Keepalive interval (minimum 3)
//!       --bind-address <ADDR>  Local bind address
//!   -s, --subscribe <TOPIC>    Topic filter to subscribe (repeatable)
//!   -v, --verbose              Verbose bridge logging
//!   -l, --log-level            Log level (error, warn, info, debug, trace)
//!   -h, --help                 Print help
//!
//! Received messages are printed as `topic<TAB>payload`. Each line read
//! from stdin is split on whitespace and sent as a command, for example
//! `PUBLISH sensors/a 1 false 21.5`. The payload of a PUBLISH line is the
//! rest of the line after the retain field, so it may contain spaces. End
//! of input terminates the bridge.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::thread;

use bytes::Bytes;
use clap::{Parser, ValueEnum};
use crossbeam_channel::{select, unbounded, Receiver};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use mqlink::bridge::{BridgeEvent, BridgeHandle};
use mqlink::config::Config;
use mqlink::engine::{library, RumqttEngine};
use mqlink::protocol::{Command, Frames, MessageEnvelope};

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    #[default]
    Warn,
    /// Informational messages
    Info,
    /// Debug messages
    Debug,
    /// Trace messages (very verbose)
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }

    fn from_config(level: &str) -> Self {
        match level.to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "info" => LogLevel::Info,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Warn,
        }
    }
}

/// mqlink - bridge an MQTT broker to stdin/stdout
#[derive(Parser, Debug)]
#[command(name = "mqlink")]
#[command(version)]
#[command(about = "Bridge an MQTT broker connection to a local command channel")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Broker host
    #[arg(long)]
    host: Option<String>,

    /// Broker port
    #[arg(long)]
    port: Option<u16>,

    /// Keepalive interval in seconds
    #[arg(long)]
    keepalive: Option<u16>,

    /// Local address to bind
    #[arg(long)]
    bind_address: Option<String>,

    /// Topic filter to subscribe; may be repeated
    #[arg(short, long = "subscribe")]
    subscribe: Vec<String>,

    /// Verbose bridge logging
    #[arg(short, long)]
    verbose: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,
}

/// Fields before the payload of a PUBLISH line
const PUBLISH_FIELDS: usize = 4;

/// Split a stdin line into command frames
fn split_line(line: &str) -> Frames {
    let mut frames = Frames::new();
    let mut rest = line.trim();
    while !rest.is_empty() {
        if frames.len() == PUBLISH_FIELDS && &frames[0][..] == b"PUBLISH" {
            frames.push(Bytes::copy_from_slice(rest.as_bytes()));
            break;
        }
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        frames.push(Bytes::copy_from_slice(rest[..end].as_bytes()));
        rest = rest[end..].trim_start();
    }
    frames
}

fn print_message(out: &mut impl Write, message: &MessageEnvelope) -> io::Result<()> {
    let payload = message.payload().map(|p| &p[..]).unwrap_or_default();
    writeln!(
        out,
        "{}\t{}",
        message.topic(),
        String::from_utf8_lossy(payload)
    )?;
    out.flush()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path),
        None => Config::from_env(),
    }
    .unwrap_or_else(|e| {
        eprintln!("Error loading configuration: {}", e);
        std::process::exit(1);
    });

    // CLI overrides config, config overrides default (warn)
    let log_level = args
        .log_level
        .unwrap_or_else(|| LogLevel::from_config(&config.log.level));

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level.to_tracing_level())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false)
        .with_writer(io::stderr)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    if let Some(path) = &args.config {
        info!("Loaded configuration from {:?}", path);
    }

    if let Some(host) = args.host {
        config.broker.host = host;
    }
    if let Some(port) = args.port {
        config.broker.port = port;
    }
    if let Some(keepalive) = args.keepalive {
        config.broker.keepalive = keepalive;
    }
    if args.bind_address.is_some() {
        config.broker.bind_address = args.bind_address;
    }
    config.bridge.subscriptions.extend(args.subscribe);
    config.bridge.verbose |= args.verbose;

    let engine = RumqttEngine::with_options(
        &config.bridge.client_id_prefix,
        config.bridge.engine_capacity,
    );
    info!("Client id {}", engine.client_id());

    let bridge = BridgeHandle::spawn(engine)?;
    bridge.send(config.broker.connect_command())?;
    if !config.bridge.subscriptions.is_empty() {
        bridge.send(Command::Subscribe(config.bridge.subscriptions.clone()))?;
    }
    if config.bridge.verbose {
        bridge.send(Command::Verbose)?;
    }
    bridge.send(Command::Start)?;

    // Stdin is read on its own thread; the channel closes at end of input
    let (lines_tx, lines_rx) = unbounded::<Frames>();
    thread::Builder::new()
        .name("mqlink-stdin".into())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                let frames = split_line(&line);
                if frames.is_empty() {
                    continue;
                }
                if lines_tx.send(frames).is_err() {
                    break;
                }
            }
        })?;

    let outcome = run_session(&bridge, &lines_rx, &mut io::stdout().lock());

    bridge.terminate();
    library::shutdown()?;
    outcome?;
    Ok(())
}

/// Forward stdin commands to the bridge and print its messages until input
/// ends or the bridge exits
fn run_session(
    bridge: &BridgeHandle,
    lines: &Receiver<Frames>,
    out: &mut impl Write,
) -> io::Result<()> {
    loop {
        select! {
            recv(lines) -> frames => match frames {
                Ok(frames) => {
                    if let Err(e) = bridge.send_frames(frames) {
                        warn!("Command not delivered: {}", e);
                        break;
                    }
                }
                Err(_) => {
                    info!("End of input, terminating");
                    break;
                }
            },
            recv(bridge.events()) -> event => match event {
                Ok(BridgeEvent::Message(message)) => print_message(out, &message)?,
                Ok(BridgeEvent::Error(e)) => warn!("{}", e),
                Err(_) => {
                    warn!("Bridge exited");
                    break;
                }
            },
        }
    }
    Ok(())
}
