//! TLS contexts and session I/O using rustls.
//!
//! A [`TlsContext`] holds the configuration a socket needs to start an
//! encrypted session on an already-open descriptor. The session helpers below
//! drive rustls over a [`RawSocket`] and never block a non-blocking socket:
//! when the transport would block they surface `WouldBlock` and resume on the
//! next call.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::{
    CertificateDer, PrivateKeyDer, PrivatePkcs1KeyDer, PrivatePkcs8KeyDer, PrivateSec1KeyDer,
    ServerName,
};
use rustls::{ClientConfig, ClientConnection, Connection, ServerConfig, ServerConnection};

use crate::error::{NetError, NetResult};
use crate::pem::{self, PemKind};
use crate::raw::RawSocket;

/// Configuration a socket uses when encryption is enabled on it.
#[derive(Debug, Clone)]
pub enum TlsContext {
    /// Accept TLS sessions (listening and accepted sockets).
    Server(Arc<ServerConfig>),
    /// Initiate TLS sessions to `server_name`.
    Client {
        config: Arc<ClientConfig>,
        server_name: ServerName<'static>,
    },
}

impl TlsContext {
    /// Creates a client context for the given server name.
    pub fn client(config: Arc<ClientConfig>, server_name: &str) -> NetResult<Self> {
        let server_name = ServerName::try_from(server_name.to_string())
            .map_err(|e| NetError::Tls(format!("invalid server name '{server_name}': {e}")))?;
        Ok(Self::Client {
            config,
            server_name,
        })
    }

    pub fn is_server(&self) -> bool {
        matches!(self, Self::Server(_))
    }

    pub(crate) fn new_session(&self) -> NetResult<Connection> {
        match self {
            Self::Server(config) => ServerConnection::new(Arc::clone(config))
                .map(Connection::Server)
                .map_err(|e| NetError::Tls(format!("failed to create TLS session: {e}"))),
            Self::Client {
                config,
                server_name,
            } => ClientConnection::new(Arc::clone(config), server_name.clone())
                .map(Connection::Client)
                .map_err(|e| NetError::Tls(format!("failed to create TLS session: {e}"))),
        }
    }
}

/// Certificate and key locations for a TLS server context.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Path to the certificate chain (PEM).
    pub cert_path: PathBuf,
    /// Path to the private key (PEM).
    pub key_path: PathBuf,
    /// Also offer TLS 1.3. Sessions are TLS 1.2 only otherwise.
    pub allow_tls13: bool,
}

impl TlsConfig {
    pub fn new(cert_path: impl AsRef<Path>, key_path: impl AsRef<Path>) -> Self {
        Self {
            cert_path: cert_path.as_ref().to_path_buf(),
            key_path: key_path.as_ref().to_path_buf(),
            allow_tls13: false,
        }
    }

    #[must_use]
    pub fn with_tls13(mut self) -> Self {
        self.allow_tls13 = true;
        self
    }

    /// Loads the PEM material and builds a rustls server configuration.
    pub fn build_server_config(&self) -> NetResult<Arc<ServerConfig>> {
        let certs = load_certs(&self.cert_path)?;
        let key = load_private_key(&self.key_path)?;

        let versions: &[&'static rustls::SupportedProtocolVersion] = if self.allow_tls13 {
            &[&rustls::version::TLS12, &rustls::version::TLS13]
        } else {
            &[&rustls::version::TLS12]
        };

        let config = ServerConfig::builder_with_protocol_versions(versions)
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| NetError::Tls(e.to_string()))?;
        Ok(Arc::new(config))
    }

    /// Builds a server [`TlsContext`].
    pub fn build_context(&self) -> NetResult<TlsContext> {
        Ok(TlsContext::Server(self.build_server_config()?))
    }
}

fn read_pem_file(path: &Path, what: &str) -> NetResult<Vec<pem::PemBlock>> {
    let data = std::fs::read(path).map_err(|e| {
        NetError::Tls(format!("failed to read {what} file {}: {e}", path.display()))
    })?;
    Ok(pem::decode_blocks(&data)?)
}

fn load_certs(path: &Path) -> NetResult<Vec<CertificateDer<'static>>> {
    let certs: Vec<CertificateDer<'static>> = read_pem_file(path, "certificate")?
        .into_iter()
        .filter(|block| block.kind == PemKind::Certificate)
        .map(|block| CertificateDer::from(block.der))
        .collect();

    if certs.is_empty() {
        return Err(NetError::Tls(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> NetResult<PrivateKeyDer<'static>> {
    let block = read_pem_file(path, "key")?
        .into_iter()
        .find(|block| block.kind.is_private_key())
        .ok_or_else(|| NetError::Tls(format!("no private key found in {}", path.display())))?;

    Ok(match block.kind {
        PemKind::Pkcs1Key => PrivateKeyDer::Pkcs1(PrivatePkcs1KeyDer::from(block.der)),
        PemKind::Sec1Key => PrivateKeyDer::Sec1(PrivateSec1KeyDer::from(block.der)),
        _ => PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(block.der)),
    })
}

/// Writes queued TLS records to the socket until it would block.
pub(crate) fn flush_records(session: &mut Connection, io: &mut RawSocket) -> io::Result<()> {
    while session.wants_write() {
        match session.write_tls(io) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Reads decrypted bytes, pulling and processing TLS records as needed.
///
/// `Ok(0)` means the peer ended the session or closed the transport.
pub(crate) fn read_plaintext(
    session: &mut Connection,
    io: &mut RawSocket,
    buf: &mut [u8],
) -> io::Result<usize> {
    loop {
        match session.reader().read(buf) {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(e),
        }

        // Handshake replies must go out before more input can arrive.
        flush_records(session, io)?;

        if !session.wants_read() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        match session.read_tls(io) {
            Ok(0) => return Ok(0),
            Ok(_) => {
                if let Err(e) = session.process_new_packets() {
                    // Best effort: tell the peer why before failing.
                    let _ = flush_records(session, io);
                    return Err(io::Error::new(io::ErrorKind::InvalidData, e));
                }
            }
            Err(e) => return Err(e),
        }
    }
}

/// Encrypts `data` and pushes as many records as the socket accepts.
pub(crate) fn write_plaintext(
    session: &mut Connection,
    io: &mut RawSocket,
    data: &[u8],
) -> io::Result<usize> {
    let written = session.writer().write(data)?;
    flush_records(session, io)?;
    Ok(written)
}

/// Sends `close_notify` without waiting for the peer's reply.
pub(crate) fn close_session(session: &mut Connection, io: &mut RawSocket) {
    session.send_close_notify();
    if let Err(e) = flush_records(session, io) {
        tracing::debug!(error = %e, "failed to flush TLS close_notify");
    }
}
