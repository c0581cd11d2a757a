//! Server configuration.

use std::time::Duration;

use kiln_net::{TlsConfig, join_host_port};
use kiln_runtime::DEFAULT_TICK;

/// Settings applied when a [`Server`](crate::Server) is built.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host or IP to bind to. IPv6 literals are given without brackets.
    pub address: String,
    /// Port to bind to; 0 picks an ephemeral port.
    pub port: u16,
    /// Time budget of one scheduler tick.
    pub tick_interval: Duration,
    /// Transport chunk size. `None` keeps the socket default.
    pub chunk_size: Option<usize>,
    /// Kernel send buffer size; 0 disables write buffering (`TCP_NODELAY`).
    pub write_buffer: Option<usize>,
    /// Read/write timeout inherited by accepted connections.
    pub timeout: Option<Duration>,
    /// Maximum number of concurrently served connections. Further peers
    /// wait in the listen backlog.
    pub max_connections: usize,
    /// Connections with no traffic for this long are closed. `None`
    /// disables the check.
    pub idle_timeout: Option<Duration>,
    /// TLS material. Set to None to disable TLS.
    pub tls: Option<TlsConfig>,
    /// A trimmed payload equal to this closes the connection and shuts the
    /// server down. Compared after trimming; blank means disabled.
    pub exit_sentinel: Option<String>,
}

impl ServerConfig {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            tick_interval: DEFAULT_TICK,
            chunk_size: None,
            write_buffer: None,
            timeout: None,
            max_connections: 1024,
            idle_timeout: None,
            tls: None,
            exit_sentinel: None,
        }
    }

    /// The `host:port` string the listener binds to.
    pub fn bind_address(&self) -> String {
        join_host_port(&self.address, self.port)
    }

    pub fn with_tick_interval(mut self, tick: Duration) -> Self {
        self.tick_interval = tick;
        self
    }

    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = Some(size);
        self
    }

    pub fn with_write_buffer(mut self, size: usize) -> Self {
        self.write_buffer = Some(size);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the idle connection timeout.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Enables TLS with the given configuration.
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_exit_sentinel(mut self, sentinel: impl Into<String>) -> Self {
        self.exit_sentinel = Some(sentinel.into());
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new("127.0.0.1", 0)
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case("127.0.0.1", 8080, "127.0.0.1:8080")]
    #[test_case("::1", 9000, "[::1]:9000")]
    #[test_case("localhost", 0, "localhost:0")]
    fn bind_address_formats_host(host: &str, port: u16, expected: &str) {
        assert_eq!(ServerConfig::new(host, port).bind_address(), expected);
    }

    #[test]
    fn builder_overrides_defaults() {
        let config = ServerConfig::default()
            .with_tick_interval(Duration::from_millis(10))
            .with_chunk_size(512)
            .with_max_connections(4)
            .with_exit_sentinel("quit");

        assert_eq!(config.tick_interval, Duration::from_millis(10));
        assert_eq!(config.chunk_size, Some(512));
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.exit_sentinel.as_deref(), Some("quit"));
        assert!(config.tls.is_none());
    }

    #[test]
    fn defaults_match_scheduler() {
        let config = ServerConfig::default();
        assert_eq!(config.tick_interval, DEFAULT_TICK);
        assert!(config.exit_sentinel.is_none());
    }
}
