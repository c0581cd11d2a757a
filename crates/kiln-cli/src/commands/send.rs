//! Send command - a one-shot client.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Args;
use kiln_net::StreamSocket;
use tracing::debug;

#[derive(Args)]
pub struct SendArgs {
    /// Payload to send, as is.
    message: String,

    /// Server address (host:port).
    #[arg(short, long, default_value = "127.0.0.1:7000")]
    address: String,

    /// Wait for one reply chunk and print it.
    #[arg(short, long)]
    wait_reply: bool,

    /// Connect and reply timeout in milliseconds.
    #[arg(long, default_value = "2000")]
    timeout_ms: u64,
}

pub fn run(args: &SendArgs) -> Result<()> {
    let timeout = Duration::from_millis(args.timeout_ms);
    let mut socket = StreamSocket::client_with_timeout(&args.address, timeout)
        .with_context(|| format!("Failed to connect to {}", args.address))?;
    socket.set_timeout(timeout)?;

    let written = socket
        .write(args.message.as_bytes())
        .context("Failed to send message")?;
    debug!(bytes = written, address = %args.address, "message sent");

    if args.wait_reply {
        match socket.read(usize::MAX).context("Failed to read reply")? {
            Some(reply) if !reply.is_empty() => println!("{}", String::from_utf8_lossy(&reply)),
            Some(_) => bail!("No reply within {} ms", args.timeout_ms),
            None => bail!("Server closed the connection without replying"),
        }
    }

    socket.close();
    Ok(())
}
