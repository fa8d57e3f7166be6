//! Byte-stream transport seam and the TLS transport.
//!
//! The protocol layer only needs a blocking, reliable, ordered byte stream.
//! [`Transport`] is that seam: production traffic flows over
//! [`TlsTransport`] (rustls over TCP), while tests script an in-memory
//! implementation.

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore, StreamOwned};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;

/// Blocking byte-stream transport.
///
/// `read_exact` (from [`Read`]) blocks until the requested bytes arrive or
/// the stream ends; there is no timeout at this layer. Cancellation is
/// achieved by calling [`Transport::disconnect`] from another thread's
/// handle to the underlying socket, which fails the blocked read with an
/// I/O error.
pub trait Transport: Read + Write {
    /// Whether the transport is still usable.
    fn is_open(&self) -> bool;

    /// Tear down the transport. Safe to call repeatedly.
    fn disconnect(&mut self);
}

/// TLS client transport: rustls over a blocking [`TcpStream`].
///
/// The TLS handshake completes lazily on first read or write, so
/// [`TlsTransport::connect`] itself performs only the TCP connect.
pub struct TlsTransport {
    stream: StreamOwned<ClientConnection, TcpStream>,
    open: bool,
}

impl TlsTransport {
    /// Connect a TCP socket to `host:port` and prepare a TLS session
    /// validated against the webpki (Mozilla) roots.
    pub fn connect(host: &str, port: u16) -> io::Result<Self> {
        let roots = RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.iter().cloned().collect(),
        };
        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();

        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let conn =
            ClientConnection::new(Arc::new(config), server_name).map_err(io::Error::other)?;

        let tcp = TcpStream::connect((host, port))?;
        tracing::debug!(host, port, "TCP connected, TLS session prepared");

        Ok(Self {
            stream: StreamOwned::new(conn, tcp),
            open: true,
        })
    }
}

impl Read for TlsTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for TlsTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl Transport for TlsTransport {
    fn is_open(&self) -> bool {
        self.open
    }

    fn disconnect(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        self.stream.conn.send_close_notify();
        let _ = self.stream.flush();
        let _ = self.stream.sock.shutdown(Shutdown::Both);
        tracing::debug!("transport disconnected");
    }
}
