//! Thin wrapper over an OS socket descriptor.
//!
//! [`RawSocket`] exposes the system calls one-to-one for callers that need
//! low-level control (blocking mode, socket options, datagram sends).
//! Every call on a closed handle fails with [`NetError::Closed`].

use std::io::{self, Read, Write};
use std::net::{Shutdown, UdpSocket};
use std::time::Duration;

use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::error::{NetError, NetResult};

/// Owned socket descriptor.
#[derive(Debug)]
pub struct RawSocket {
    socket: Option<Socket>,
    blocking: bool,
}

impl RawSocket {
    /// Creates a new socket. Sockets start in blocking mode.
    pub fn create(domain: Domain, ty: Type, protocol: Option<Protocol>) -> NetResult<Self> {
        let socket = Socket::new(domain, ty, protocol)?;
        Ok(Self::from_socket(socket))
    }

    /// Creates a pair of connected sockets.
    #[cfg(unix)]
    pub fn pair(domain: Domain, ty: Type) -> NetResult<(Self, Self)> {
        let (a, b) = Socket::pair(domain, ty, None)?;
        Ok((Self::from_socket(a), Self::from_socket(b)))
    }

    pub(crate) fn from_socket(socket: Socket) -> Self {
        Self {
            socket: Some(socket),
            blocking: true,
        }
    }

    fn socket(&self) -> NetResult<&Socket> {
        self.socket.as_ref().ok_or(NetError::Closed)
    }

    /// Returns true while the descriptor is open.
    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    /// Returns the blocking mode last applied through [`Self::set_blocking`].
    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    pub fn bind(&self, addr: &SockAddr) -> NetResult<()> {
        self.socket()?.bind(addr)?;
        Ok(())
    }

    pub fn listen(&self, backlog: i32) -> NetResult<()> {
        self.socket()?.listen(backlog)?;
        Ok(())
    }

    pub fn connect(&self, addr: &SockAddr) -> NetResult<()> {
        self.socket()?.connect(addr)?;
        Ok(())
    }

    pub fn connect_timeout(&self, addr: &SockAddr, timeout: Duration) -> NetResult<()> {
        self.socket()?.connect_timeout(addr, timeout)?;
        Ok(())
    }

    /// Accepts a pending connection.
    ///
    /// Returns `Ok(None)` when the socket is non-blocking and nothing is
    /// pending. The accepted handle is always put in blocking mode, whatever
    /// the platform inherits from the listener.
    pub fn accept(&self) -> NetResult<Option<(RawSocket, SockAddr)>> {
        let socket = self.socket()?;
        loop {
            match socket.accept() {
                Ok((accepted, addr)) => {
                    accepted.set_nonblocking(false)?;
                    return Ok(Some((Self::from_socket(accepted), addr)));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Reads into `buf`. `Ok(0)` means the peer closed the stream.
    pub fn read(&self, buf: &mut [u8]) -> NetResult<usize> {
        let mut socket = self.socket()?;
        Ok(socket.read(buf)?)
    }

    pub fn write(&self, buf: &[u8]) -> NetResult<usize> {
        let mut socket = self.socket()?;
        Ok(socket.write(buf)?)
    }

    pub fn send(&self, buf: &[u8]) -> NetResult<usize> {
        Ok(self.socket()?.send(buf)?)
    }

    pub fn send_to(&self, buf: &[u8], addr: &SockAddr) -> NetResult<usize> {
        Ok(self.socket()?.send_to(buf, addr)?)
    }

    /// Receives into `buf` and reports where the bytes came from.
    ///
    /// Stream sockets report their peer; datagram sockets report the sender
    /// of the datagram.
    pub fn receive_from(&self, buf: &mut [u8]) -> NetResult<(usize, Option<SockAddr>)> {
        let socket = self.socket()?;
        if socket.r#type()? == Type::DGRAM {
            let datagram: UdpSocket = socket.try_clone()?.into();
            let (n, from) = datagram.recv_from(buf)?;
            return Ok((n, Some(SockAddr::from(from))));
        }
        let mut reader = socket;
        let n = reader.read(buf)?;
        Ok((n, socket.peer_addr().ok()))
    }

    pub fn set_blocking(&mut self, blocking: bool) -> NetResult<()> {
        self.socket()?.set_nonblocking(!blocking)?;
        self.blocking = blocking;
        Ok(())
    }

    pub fn set_reuse_address(&self, reuse: bool) -> NetResult<()> {
        self.socket()?.set_reuse_address(reuse)?;
        Ok(())
    }

    pub fn set_nodelay(&self, nodelay: bool) -> NetResult<()> {
        self.socket()?.set_nodelay(nodelay)?;
        Ok(())
    }

    pub fn set_send_buffer_size(&self, size: usize) -> NetResult<()> {
        self.socket()?.set_send_buffer_size(size)?;
        Ok(())
    }

    /// Applies the same timeout to reads and writes. `None` disables it.
    pub fn set_timeouts(&self, timeout: Option<Duration>) -> NetResult<()> {
        let socket = self.socket()?;
        socket.set_read_timeout(timeout)?;
        socket.set_write_timeout(timeout)?;
        Ok(())
    }

    pub fn local_addr(&self) -> NetResult<SockAddr> {
        Ok(self.socket()?.local_addr()?)
    }

    pub fn peer_addr(&self) -> NetResult<SockAddr> {
        Ok(self.socket()?.peer_addr()?)
    }

    pub fn shutdown(&self, how: Shutdown) -> NetResult<()> {
        self.socket()?.shutdown(how)?;
        Ok(())
    }

    /// Releases the descriptor. Returns false if it was already closed.
    pub fn close(&mut self) -> bool {
        self.socket.take().is_some()
    }
}

impl Read for RawSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &self.socket {
            Some(socket) => {
                let mut socket = socket;
                socket.read(buf)
            }
            None => Err(io::ErrorKind::NotConnected.into()),
        }
    }
}

impl Write for RawSocket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &self.socket {
            Some(socket) => {
                let mut socket = socket;
                socket.write(buf)
            }
            None => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback_listener() -> (RawSocket, SockAddr) {
        let listener = RawSocket::create(Domain::IPV4, Type::STREAM, None).unwrap();
        listener
            .bind(&SockAddr::from(std::net::SocketAddr::from(([127, 0, 0, 1], 0))))
            .unwrap();
        listener.listen(16).unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    }

    #[test]
    fn test_nonblocking_accept_without_peer() {
        let (mut listener, _) = loopback_listener();
        listener.set_blocking(false).unwrap();
        assert!(!listener.is_blocking());
        assert!(listener.accept().unwrap().is_none());
    }

    #[test]
    fn test_connect_accept_exchange() {
        let (listener, addr) = loopback_listener();
        let client = RawSocket::create(Domain::IPV4, Type::STREAM, None).unwrap();
        client.connect(&addr).unwrap();

        let (server_side, peer) = listener.accept().unwrap().unwrap();
        assert!(server_side.is_blocking());
        assert_eq!(
            peer.as_socket(),
            client.local_addr().unwrap().as_socket()
        );

        assert_eq!(client.send(b"ping").unwrap(), 4);
        let mut buf = [0u8; 16];
        let (n, from) = server_side.receive_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");
        assert_eq!(from.and_then(|a| a.as_socket()), peer.as_socket());
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut socket = RawSocket::create(Domain::IPV4, Type::STREAM, None).unwrap();
        assert!(socket.close());
        assert!(!socket.close());
        assert!(!socket.is_open());
        assert!(matches!(socket.local_addr(), Err(NetError::Closed)));
        assert!(matches!(socket.send(b"x"), Err(NetError::Closed)));
    }

    #[test]
    fn test_datagram_receive_reports_sender() {
        let any = SockAddr::from(std::net::SocketAddr::from(([127, 0, 0, 1], 0)));
        let a = RawSocket::create(Domain::IPV4, Type::DGRAM, None).unwrap();
        let b = RawSocket::create(Domain::IPV4, Type::DGRAM, None).unwrap();
        a.bind(&any).unwrap();
        b.bind(&any).unwrap();

        b.send_to(b"hello", &a.local_addr().unwrap()).unwrap();
        let mut buf = [0u8; 32];
        let (n, from) = a.receive_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
        assert_eq!(
            from.and_then(|f| f.as_socket()),
            b.local_addr().unwrap().as_socket()
        );
    }
}
