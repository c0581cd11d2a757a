//! Serve command - runs the Kiln server.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use kiln_config::KilnConfig;
use kiln_server::{Server, ServerConfig, ShutdownHandle, TlsConfig};
use tracing::{debug, info, warn};

#[derive(Args)]
pub struct ServeArgs {
    /// Host or IP to bind to.
    #[arg(short, long)]
    address: Option<String>,

    /// Port to listen on.
    #[arg(short, long)]
    port: Option<u16>,

    /// Scheduler tick in milliseconds.
    #[arg(long)]
    tick_ms: Option<u64>,

    /// Echo every chunk back to its sender.
    #[arg(long)]
    echo: bool,

    /// Payload that closes the connection and stops the server.
    #[arg(long, conflicts_with = "no_exit_sentinel")]
    exit_sentinel: Option<String>,

    /// Treat every payload as plain data.
    #[arg(long)]
    no_exit_sentinel: bool,

    /// Close connections idle for this many milliseconds.
    #[arg(long)]
    idle_timeout_ms: Option<u64>,

    /// Maximum number of connections served at once.
    #[arg(long)]
    max_connections: Option<usize>,

    /// PEM certificate chain; enables TLS together with --tls-key.
    #[arg(long, requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    /// PEM private key.
    #[arg(long, requires = "tls_cert")]
    tls_key: Option<PathBuf>,
}

impl ServeArgs {
    /// Applies command line overrides on top of the loaded configuration.
    fn apply(&self, config: &mut KilnConfig) {
        let server = &mut config.server;
        if let Some(address) = &self.address {
            server.address.clone_from(address);
        }
        if let Some(port) = self.port {
            server.port = port;
        }
        if let Some(tick) = self.tick_ms {
            server.tick_interval_ms = tick;
        }
        if self.echo {
            server.echo = true;
        }
        if let Some(sentinel) = &self.exit_sentinel {
            server.exit_sentinel.clone_from(sentinel);
        }
        if self.no_exit_sentinel {
            server.exit_sentinel.clear();
        }
        if let Some(idle) = self.idle_timeout_ms {
            server.idle_timeout_ms = Some(idle);
        }
        if let Some(max) = self.max_connections {
            server.max_connections = max;
        }
        if let (Some(cert), Some(key)) = (&self.tls_cert, &self.tls_key) {
            config.tls.enabled = true;
            config.tls.cert_path = Some(cert.clone());
            config.tls.key_path = Some(key.clone());
        }
    }
}

pub fn run(mut config: KilnConfig, args: &ServeArgs) -> Result<()> {
    args.apply(&mut config);
    config.validate().context("Invalid server options")?;

    let server_config = server_config(&config)?;
    let bind_address = server_config.bind_address();

    println!();
    println!("Kiln - cooperative socket server");
    println!();
    println!("  Bind address:  {bind_address}");
    println!("  Tick:          {} ms", config.server.tick_interval_ms);
    println!(
        "  Exit sentinel: {}",
        config.server.exit_sentinel().unwrap_or("(disabled)")
    );
    println!("  TLS:           {}", if config.tls.enabled { "on" } else { "off" });

    let mut server = Server::with_config(server_config).context("Failed to create server")?;
    wire_events(&mut server, config.server.echo);
    install_signal_handler(server.shutdown_handle())?;

    println!();
    println!("Server is ready. Press Ctrl+C to stop.");
    println!();

    server.run().context("Server error during operation")?;

    let metrics = server.metrics();
    match metrics.render() {
        Ok(text) => debug!(metrics = %text, "final metrics"),
        Err(e) => warn!(error = %e, "failed to render metrics"),
    }
    println!();
    println!(
        "Server stopped gracefully after {} connection(s).",
        metrics.connections_accepted.get()
    );

    Ok(())
}

fn server_config(config: &KilnConfig) -> Result<ServerConfig> {
    let section = &config.server;
    let mut server_config = ServerConfig::new(&section.address, section.port)
        .with_tick_interval(section.tick_interval())
        .with_chunk_size(section.chunk_size)
        .with_max_connections(section.max_connections);

    if let Some(size) = section.write_buffer {
        server_config = server_config.with_write_buffer(size);
    }
    if let Some(timeout) = section.timeout() {
        server_config = server_config.with_timeout(timeout);
    }
    if let Some(idle) = section.idle_timeout() {
        server_config = server_config.with_idle_timeout(idle);
    }
    if let Some(sentinel) = section.exit_sentinel() {
        server_config = server_config.with_exit_sentinel(sentinel);
    }
    if config.tls.enabled {
        let (Some(cert), Some(key)) = (&config.tls.cert_path, &config.tls.key_path) else {
            anyhow::bail!("TLS enabled without certificate and key paths");
        };
        let mut tls = TlsConfig::new(cert, key);
        if config.tls.allow_tls13 {
            tls = tls.with_tls13();
        }
        server_config = server_config.with_tls(tls);
    }
    Ok(server_config)
}

/// Logs the connection lifecycle and optionally echoes data back.
fn wire_events(server: &mut Server, echo: bool) {
    server.on_connection(move |conn| {
        let peer = conn.peer().to_string();
        info!(peer = %peer, "client connected");

        let events = conn.events_mut();
        let data_peer = peer.clone();
        events.on_data(move |chunk, reply| {
            if chunk.is_empty() {
                return;
            }
            info!(
                peer = %data_peer,
                bytes = chunk.len(),
                data = %String::from_utf8_lossy(chunk).trim_end(),
                "received"
            );
            if echo {
                reply.extend_from_slice(chunk);
            }
        });
        let error_peer = peer.clone();
        events.on_error(move |err| warn!(peer = %error_peer, error = %err, "connection error"));
        events.on_close(move || info!(peer = %peer, "client disconnected"));
    });
    server.on_error(|err| warn!(error = %err, "listener error"));
    server.on_close(|| info!("listener closed"));
}

#[cfg(unix)]
fn install_signal_handler(handle: ShutdownHandle) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM]).context("Failed to install signal handler")?;
    std::thread::Builder::new()
        .name("kiln-signals".to_string())
        .spawn(move || {
            if let Some(signal) = signals.forever().next() {
                info!(signal, "shutdown signal received");
                handle.shutdown();
            }
        })
        .context("Failed to spawn signal thread")?;
    Ok(())
}

#[cfg(not(unix))]
fn install_signal_handler(_handle: ShutdownHandle) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::time::Duration;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: ServeArgs,
    }

    fn parse(argv: &[&str]) -> ServeArgs {
        Harness::parse_from(std::iter::once("serve").chain(argv.iter().copied())).args
    }

    #[test]
    fn overrides_apply_on_top_of_config() {
        let mut config = KilnConfig::default();
        parse(&["--port", "9001", "--tick-ms", "20", "--echo"]).apply(&mut config);

        assert_eq!(config.server.port, 9001);
        assert_eq!(config.server.tick_interval_ms, 20);
        assert!(config.server.echo);
        assert_eq!(config.server.exit_sentinel(), Some("exit"));
    }

    #[test]
    fn no_exit_sentinel_disables_it() {
        let mut config = KilnConfig::default();
        parse(&["--no-exit-sentinel"]).apply(&mut config);

        let server_config = server_config(&config).unwrap();
        assert!(server_config.exit_sentinel.is_none());
    }

    #[test]
    fn custom_sentinel_reaches_server_config() {
        let mut config = KilnConfig::default();
        parse(&["--exit-sentinel", "quit"]).apply(&mut config);

        let server_config = server_config(&config).unwrap();
        assert_eq!(server_config.exit_sentinel.as_deref(), Some("quit"));
    }

    #[test]
    fn tls_flags_enable_tls() {
        let mut config = KilnConfig::default();
        parse(&["--tls-cert", "cert.pem", "--tls-key", "key.pem"]).apply(&mut config);

        assert!(config.tls.enabled);
        let server_config = server_config(&config).unwrap();
        assert!(server_config.tls.is_some());
    }

    #[test]
    fn durations_convert_from_milliseconds() {
        let mut config = KilnConfig::default();
        parse(&["--idle-timeout-ms", "1500"]).apply(&mut config);

        let server_config = server_config(&config).unwrap();
        assert_eq!(server_config.idle_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(server_config.tick_interval, Duration::from_millis(200));
    }
}
