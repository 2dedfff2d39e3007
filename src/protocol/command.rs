//! Control command parsing and encoding

use std::fmt;

use bytes::Bytes;

use super::{BridgeError, QoS};

/// A multi-frame control channel message
pub type Frames = Vec<Bytes>;

/// A command sent by the owning process to the bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Store broker connection settings
    Connect {
        host: String,
        port: i64,
        keepalive: i64,
        bind_address: Option<String>,
    },
    /// Register topic filters, replayed on every successful connect
    Subscribe(Vec<String>),
    /// Publish a message through the engine
    Publish {
        topic: String,
        qos: QoS,
        retain: bool,
        payload: Bytes,
    },
    /// Start the engine and initiate the connection
    Start,
    /// Stop the engine and disconnect
    Stop,
    /// Turn on verbose logging
    Verbose,
    /// Stop everything and exit the bridge loop
    Terminate,
}

impl Command {
    /// Parse a command from its frames.
    ///
    /// Numeric CONNECT fields are parsed leniently (see
    /// [`parse_lenient_int`]). A missing payload frame on PUBLISH means an
    /// empty payload; any other missing field is a protocol violation, as is
    /// an unknown command name. Trailing frames are ignored.
    pub fn parse(frames: Frames) -> Result<Self, BridgeError> {
        let mut frames = frames.into_iter();
        let name = frames
            .next()
            .ok_or_else(|| BridgeError::ProtocolViolation("empty command message".into()))?;

        match name.as_ref() {
            b"CONNECT" => {
                let host = required_str(&mut frames, "CONNECT", "host")?;
                let port = parse_lenient_int(&required_str(&mut frames, "CONNECT", "port")?);
                let keepalive =
                    parse_lenient_int(&required_str(&mut frames, "CONNECT", "keepalive")?);
                let bind_address = frames.next().map(|f| frame_to_string(&f));
                Ok(Command::Connect {
                    host,
                    port,
                    keepalive,
                    bind_address,
                })
            }
            b"SUBSCRIBE" => Ok(Command::Subscribe(
                frames.map(|f| frame_to_string(&f)).collect(),
            )),
            b"PUBLISH" => {
                let topic = required_str(&mut frames, "PUBLISH", "topic")?;
                let qos = frames
                    .next()
                    .map(|f| QoS::from_field(&f))
                    .ok_or_else(|| missing("PUBLISH", "qos"))?;
                let retain = frames
                    .next()
                    .map(|f| f.as_ref() == b"true")
                    .ok_or_else(|| missing("PUBLISH", "retain"))?;
                let payload = frames.next().unwrap_or_default();
                Ok(Command::Publish {
                    topic,
                    qos,
                    retain,
                    payload,
                })
            }
            b"START" => Ok(Command::Start),
            b"STOP" => Ok(Command::Stop),
            b"VERBOSE" => Ok(Command::Verbose),
            b"TERMINATE" | b"$TERM" => Ok(Command::Terminate),
            other => Err(BridgeError::ProtocolViolation(format!(
                "invalid command '{}'",
                String::from_utf8_lossy(other)
            ))),
        }
    }

    /// Encode the command into the frames [`Command::parse`] accepts
    pub fn into_frames(self) -> Frames {
        match self {
            Command::Connect {
                host,
                port,
                keepalive,
                bind_address,
            } => {
                let mut frames = vec![
                    Bytes::from_static(b"CONNECT"),
                    Bytes::from(host),
                    Bytes::from(port.to_string()),
                    Bytes::from(keepalive.to_string()),
                ];
                if let Some(bind) = bind_address {
                    frames.push(Bytes::from(bind));
                }
                frames
            }
            Command::Subscribe(topics) => std::iter::once(Bytes::from_static(b"SUBSCRIBE"))
                .chain(topics.into_iter().map(Bytes::from))
                .collect(),
            Command::Publish {
                topic,
                qos,
                retain,
                payload,
            } => vec![
                Bytes::from_static(b"PUBLISH"),
                Bytes::from(topic),
                Bytes::from(qos.as_u8().to_string()),
                Bytes::from_static(if retain { b"true" } else { b"false" }),
                payload,
            ],
            Command::Start => vec![Bytes::from_static(b"START")],
            Command::Stop => vec![Bytes::from_static(b"STOP")],
            Command::Verbose => vec![Bytes::from_static(b"VERBOSE")],
            Command::Terminate => vec![Bytes::from_static(b"TERMINATE")],
        }
    }

    /// Command name as it appears on the wire
    pub fn name(&self) -> &'static str {
        match self {
            Command::Connect { .. } => "CONNECT",
            Command::Subscribe(_) => "SUBSCRIBE",
            Command::Publish { .. } => "PUBLISH",
            Command::Start => "START",
            Command::Stop => "STOP",
            Command::Verbose => "VERBOSE",
            Command::Terminate => "TERMINATE",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Connect { host, port, .. } => write!(f, "CONNECT {}:{}", host, port),
            Command::Subscribe(topics) => write!(f, "SUBSCRIBE {}", topics.join(" ")),
            Command::Publish {
                topic,
                qos,
                payload,
                ..
            } => write!(
                f,
                "PUBLISH {} (qos={}, {} bytes)",
                topic,
                qos.as_u8(),
                payload.len()
            ),
            other => f.write_str(other.name()),
        }
    }
}

/// Parse an integer the way C `atoi` does.
///
/// Leading whitespace and one optional sign are accepted, then as many
/// decimal digits as follow. Input without leading digits yields 0 and
/// values beyond the `i64` range saturate.
pub fn parse_lenient_int(s: &str) -> i64 {
    let s = s.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let mut value: i64 = 0;
    for b in digits.bytes().take_while(u8::is_ascii_digit) {
        let digit = (b - b'0') as i64;
        value = if negative {
            value.saturating_mul(10).saturating_sub(digit)
        } else {
            value.saturating_mul(10).saturating_add(digit)
        };
    }
    value
}

fn frame_to_string(frame: &Bytes) -> String {
    String::from_utf8_lossy(frame).into_owned()
}

fn required_str(
    frames: &mut impl Iterator<Item = Bytes>,
    command: &str,
    field: &str,
) -> Result<String, BridgeError> {
    frames
        .next()
        .map(|f| frame_to_string(&f))
        .ok_or_else(|| missing(command, field))
}

fn missing(command: &str, field: &str) -> BridgeError {
    BridgeError::ProtocolViolation(format!("{} is missing the {} field", command, field))
}
