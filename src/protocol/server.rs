//! Broker connection settings

/// Lowest keepalive interval accepted, in seconds
pub const MIN_KEEPALIVE: u16 = 3;

/// Where and how the engine connects.
///
/// Populated by CONNECT and read by the engine when START initiates the
/// connection. A port of `None` means no usable port has been configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: Option<u16>,
    pub keepalive: u16,
    pub bind_address: String,
}

impl ServerConfig {
    /// Apply the fields of a CONNECT command.
    ///
    /// Values come from lenient integer parsing: a port outside 1..=65535
    /// leaves the port unset and a keepalive at or below [`MIN_KEEPALIVE`]
    /// is raised to it. A missing bind address falls back to the host.
    pub fn update(&mut self, host: String, port: i64, keepalive: i64, bind_address: Option<String>) {
        self.port = u16::try_from(port).ok().filter(|p| *p != 0);
        self.keepalive = if keepalive <= MIN_KEEPALIVE as i64 {
            MIN_KEEPALIVE
        } else {
            u16::try_from(keepalive).unwrap_or(u16::MAX)
        };
        self.bind_address = bind_address.unwrap_or_else(|| host.clone());
        self.host = host;
    }

    /// `host:port` for log lines
    pub fn endpoint(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.host, port),
            None => format!("{}:<unset>", self.host),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: None,
            keepalive: MIN_KEEPALIVE,
            bind_address: String::new(),
        }
    }
}
