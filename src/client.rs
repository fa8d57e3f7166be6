//! Stateful WebSocket client connection.
//!
//! [`WebSocketClient`] ties the handshake, frame codec, and close handling
//! together over any [`Transport`]. The connection moves through
//! `Closed → Handshaking → Open → Closed`; callers only ever observe closed
//! or open, since the handshake call blocks until it resolves one way or the
//! other.
//!
//! # Example
//!
//! ```no_run
//! use challonge_ws::{WebSocketClient, WebSocketConfig};
//!
//! let mut ws = WebSocketClient::new(WebSocketConfig::default());
//! ws.set_path("/v1/stream");
//! ws.connect("tournaments.example.com", 443)?;
//! ws.send("hello")?;
//! let reply = ws.receive_message()?;
//! ws.disconnect();
//! # Ok::<(), challonge_ws::WsError>(())
//! ```

use bytes::{Bytes, BytesMut};
use std::io::Write;

use crate::close::{CloseReason, NORMAL_CLOSURE};
use crate::frame::{Frame, FrameCodec, Opcode, WsError};
use crate::handshake::{self, ClientHandshake, HandshakeError, HttpResponse};
use crate::transport::{TlsTransport, Transport};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Maximum accepted frame payload size.
    pub max_payload_size: usize,
    /// Subprotocols offered in the handshake.
    pub protocols: Vec<String>,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_payload_size: FrameCodec::DEFAULT_MAX_PAYLOAD_SIZE,
            // The subprotocols the tournament service expects.
            protocols: vec!["chat".to_string(), "superchat".to_string()],
        }
    }
}

impl WebSocketConfig {
    /// Create a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum accepted frame payload size.
    #[must_use]
    pub fn max_payload_size(mut self, size: usize) -> Self {
        self.max_payload_size = size;
        self
    }

    /// Replace the offered subprotocols.
    #[must_use]
    pub fn protocols(mut self, protocols: Vec<String>) -> Self {
        self.protocols = protocols;
        self
    }
}

/// Connection lifecycle. `Handshaking` is never observable from outside:
/// the handshake call only returns once the state is `Open` or `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Closed,
    Handshaking,
    Open,
}

/// Blocking WebSocket client over a [`Transport`].
///
/// One thread may loop on [`receive_message`](Self::receive_message) while
/// others call [`send`](Self::send) through their own synchronization; the
/// fragmented-message accumulator is local to the receiving call, so decode
/// is inherently single-reader.
pub struct WebSocketClient<T: Transport> {
    config: WebSocketConfig,
    path: String,
    codec: FrameCodec,
    transport: Option<T>,
    state: ConnectionState,
    key_override: Option<String>,
}

impl<T: Transport> WebSocketClient<T> {
    /// Create a disconnected client.
    #[must_use]
    pub fn new(config: WebSocketConfig) -> Self {
        let codec = FrameCodec::new().max_payload_size(config.max_payload_size);
        Self::with_codec(config, codec)
    }

    /// Create a disconnected client with an explicit codec.
    ///
    /// Lets tests supply a deterministic mask source for golden-frame
    /// comparisons.
    #[must_use]
    pub fn with_codec(config: WebSocketConfig, codec: FrameCodec) -> Self {
        Self {
            config,
            path: "/".to_string(),
            codec,
            transport: None,
            state: ConnectionState::Closed,
            key_override: None,
        }
    }

    /// Override the generated handshake key (deterministic tests).
    #[must_use]
    pub fn handshake_key(mut self, key: impl Into<String>) -> Self {
        self.key_override = Some(key.into());
        self
    }

    /// Set the request path used by the next handshake.
    pub fn set_path(&mut self, path: impl Into<String>) {
        self.path = path.into();
    }

    /// The configured request path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether the connection is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Run the HTTP upgrade handshake over an already-connected transport.
    ///
    /// `host` is the literal `Host` header value. On success the connection
    /// is `Open`; on any failure the transport is disconnected before the
    /// error is returned and the connection stays `Closed`.
    pub fn establish_handshake(&mut self, mut transport: T, host: &str) -> Result<(), WsError> {
        self.state = ConnectionState::Handshaking;

        let mut hs = ClientHandshake::new(host, self.path.clone());
        if let Some(key) = &self.key_override {
            hs = hs.with_key(key.clone());
        }
        for protocol in &self.config.protocols {
            hs = hs.protocol(protocol.clone());
        }

        match Self::run_handshake(&mut transport, &hs) {
            Ok(()) => {
                self.transport = Some(transport);
                self.state = ConnectionState::Open;
                tracing::debug!(host, path = %self.path, "WebSocket handshake complete");
                Ok(())
            }
            Err(err) => {
                transport.disconnect();
                self.state = ConnectionState::Closed;
                tracing::debug!(host, error = %err, "WebSocket handshake failed");
                Err(WsError::Handshake(err))
            }
        }
    }

    fn run_handshake(transport: &mut T, hs: &ClientHandshake) -> Result<(), HandshakeError> {
        transport.write_all(&hs.request_bytes())?;
        transport.flush()?;
        let head = handshake::read_response_bytes(transport)?;
        let response = HttpResponse::parse(&head)?;
        hs.validate_response(&response)
    }

    /// Send one masked text frame.
    ///
    /// Fails with [`WsError::NotConnected`] without touching the transport
    /// if the connection is not open.
    pub fn send(&mut self, text: &str) -> Result<(), WsError> {
        if self.state != ConnectionState::Open {
            return Err(WsError::NotConnected);
        }
        let frame = Frame::text(Bytes::copy_from_slice(text.as_bytes()));
        self.write_frame(&frame)?;
        tracing::trace!(len = text.len(), "sent text frame");
        Ok(())
    }

    /// Receive the next complete message.
    ///
    /// Blocks until a data message is fully reassembled. Control frames are
    /// handled transparently: a Ping is answered with a masked Pong echoing
    /// its payload, a Pong is absorbed as keep-alive confirmation, and a
    /// Close frame tears the transport down and fails with
    /// [`WsError::ConnectionTerminated`] carrying the peer's status code and
    /// its registry description.
    pub fn receive_message(&mut self) -> Result<Bytes, WsError> {
        if self.state != ConnectionState::Open {
            return Err(WsError::NotConnected);
        }

        // Explicit loop with an accumulator rather than recursion: a peer
        // sending many consecutive pings must not grow the stack.
        let mut partial: Option<BytesMut> = None;
        loop {
            let frame = {
                let transport = self.transport.as_mut().ok_or(WsError::NotConnected)?;
                self.codec.read_frame(transport)?
            };

            match frame.opcode {
                Opcode::Ping => {
                    tracing::trace!(len = frame.payload.len(), "ping received, echoing pong");
                    self.write_frame(&Frame::pong(frame.payload))?;
                }
                Opcode::Pong => {
                    tracing::trace!("pong received");
                }
                Opcode::Close => {
                    let reason = CloseReason::parse(&frame.payload);
                    tracing::debug!(
                        code = reason.code,
                        description = reason.description,
                        "close frame received"
                    );
                    self.teardown();
                    return Err(WsError::ConnectionTerminated {
                        code: reason.code,
                        description: reason.description,
                    });
                }
                Opcode::Text | Opcode::Binary => {
                    if partial.is_some() {
                        return Err(WsError::ProtocolViolation(
                            "data frame while continuation expected",
                        ));
                    }
                    if frame.fin {
                        return Ok(frame.payload);
                    }
                    partial = Some(BytesMut::from(frame.payload.as_ref()));
                }
                Opcode::Continuation => {
                    let Some(buf) = partial.as_mut() else {
                        return Err(WsError::ProtocolViolation(
                            "continuation without a message in progress",
                        ));
                    };
                    buf.extend_from_slice(&frame.payload);
                    if frame.fin {
                        return Ok(std::mem::take(buf).freeze());
                    }
                }
            }
        }
    }

    /// Close the connection.
    ///
    /// Sends a masked Close frame with status 1000 when the transport is
    /// still open, then tears it down. Never fails: transport errors while
    /// sending the close frame are swallowed, and the transport is never
    /// left open. Calling this twice is a no-op the second time.
    pub fn disconnect(&mut self) {
        self.state = ConnectionState::Closed;
        let Some(mut transport) = self.transport.take() else {
            return;
        };
        if transport.is_open() {
            let mut buf = BytesMut::new();
            if self.codec.encode(&Frame::close(NORMAL_CLOSURE), &mut buf).is_ok() {
                let _ = transport.write_all(&buf);
                let _ = transport.flush();
            }
        }
        transport.disconnect();
        tracing::debug!("connection closed");
    }

    /// Tear down after a peer-initiated close: the transport goes away, no
    /// close frame is echoed.
    fn teardown(&mut self) {
        self.state = ConnectionState::Closed;
        if let Some(mut transport) = self.transport.take() {
            transport.disconnect();
        }
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<(), WsError> {
        let mut buf = BytesMut::new();
        self.codec.encode(frame, &mut buf)?;
        let transport = self.transport.as_mut().ok_or(WsError::NotConnected)?;
        // One buffered write per frame: the peer never sees a partial frame.
        transport.write_all(&buf)?;
        transport.flush()?;
        Ok(())
    }
}

impl WebSocketClient<TlsTransport> {
    /// Connect over TLS and run the handshake.
    ///
    /// The `Host` header is `host`, with `:port` appended when the port is
    /// not 443.
    pub fn connect(&mut self, host: &str, port: u16) -> Result<(), WsError> {
        let transport = TlsTransport::connect(host, port)?;
        let host_header = if port == 443 {
            host.to_string()
        } else {
            format!("{host}:{port}")
        };
        self.establish_handshake(transport, &host_header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::compute_accept_key;
    use std::io::{self, Read};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    const TEST_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
    const FIXED_MASK: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];

    /// Transport fed from a fixed server script, capturing writes.
    struct ScriptedTransport {
        input: io::Cursor<Vec<u8>>,
        written: Arc<Mutex<Vec<u8>>>,
        open: Arc<AtomicBool>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<u8>) -> (Self, Arc<Mutex<Vec<u8>>>, Arc<AtomicBool>) {
            let written = Arc::new(Mutex::new(Vec::new()));
            let open = Arc::new(AtomicBool::new(true));
            let transport = Self {
                input: io::Cursor::new(script),
                written: Arc::clone(&written),
                open: Arc::clone(&open),
            };
            (transport, written, open)
        }
    }

    impl Read for ScriptedTransport {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for ScriptedTransport {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Transport for ScriptedTransport {
        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }

        fn disconnect(&mut self) {
            self.open.store(false, Ordering::SeqCst);
        }
    }

    fn switching_protocols() -> Vec<u8> {
        format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {}\r\n\
             \r\n",
            compute_accept_key(TEST_KEY)
        )
        .into_bytes()
    }

    /// Build an unmasked server-to-client frame (payload <= 125).
    fn server_frame(fin: bool, opcode: u8, payload: &[u8]) -> Vec<u8> {
        assert!(payload.len() <= 125);
        let mut raw = vec![
            if fin { 0x80 | opcode } else { opcode },
            payload.len() as u8,
        ];
        raw.extend_from_slice(payload);
        raw
    }

    fn fixed_codec() -> FrameCodec {
        FrameCodec::new().with_mask_source(Box::new(|| FIXED_MASK))
    }

    /// Client with the handshake already replayed, plus the server's
    /// remaining script.
    fn open_client(
        server_frames: Vec<u8>,
    ) -> (
        WebSocketClient<ScriptedTransport>,
        Arc<Mutex<Vec<u8>>>,
        Arc<AtomicBool>,
    ) {
        let mut script = switching_protocols();
        script.extend_from_slice(&server_frames);
        let (transport, written, open) = ScriptedTransport::new(script);

        let mut client = WebSocketClient::with_codec(WebSocketConfig::default(), fixed_codec())
            .handshake_key(TEST_KEY);
        client.establish_handshake(transport, "example.com").unwrap();
        written.lock().unwrap().clear(); // discard the handshake request
        (client, written, open)
    }

    #[test]
    fn send_while_closed_is_not_connected() {
        let mut client: WebSocketClient<ScriptedTransport> =
            WebSocketClient::new(WebSocketConfig::default());
        assert!(matches!(client.send("x"), Err(WsError::NotConnected)));
        assert!(matches!(
            client.receive_message(),
            Err(WsError::NotConnected)
        ));
    }

    #[test]
    fn handshake_success_opens_connection() {
        let (transport, written, _open) = ScriptedTransport::new(switching_protocols());
        let mut client = WebSocketClient::with_codec(WebSocketConfig::default(), fixed_codec())
            .handshake_key(TEST_KEY);
        client.set_path("/v1/stream");
        client.establish_handshake(transport, "example.com").unwrap();

        assert!(client.is_open());
        let request = String::from_utf8(written.lock().unwrap().clone()).unwrap();
        assert!(request.starts_with("GET /v1/stream HTTP/1.1\r\n"));
        assert!(request.contains("Host: example.com\r\n"));
        assert!(request.contains("Sec-WebSocket-Protocol: chat, superchat\r\n"));
    }

    #[test]
    fn handshake_rejection_closes_transport() {
        let (transport, _written, open) =
            ScriptedTransport::new(b"HTTP/1.1 200 OK\r\n\r\n".to_vec());
        let mut client: WebSocketClient<ScriptedTransport> =
            WebSocketClient::new(WebSocketConfig::default());

        let err = client
            .establish_handshake(transport, "example.com")
            .unwrap_err();
        assert!(matches!(
            err,
            WsError::Handshake(HandshakeError::Rejected(200))
        ));
        assert!(!client.is_open());
        assert!(!open.load(Ordering::SeqCst));
        assert!(matches!(client.send("x"), Err(WsError::NotConnected)));
    }

    #[test]
    fn receive_single_text_message() {
        let (mut client, _written, _open) = open_client(server_frame(true, 0x1, b"hello"));
        assert_eq!(client.receive_message().unwrap().as_ref(), b"hello");
    }

    #[test]
    fn receive_reassembles_fragments() {
        let mut script = server_frame(false, 0x1, b"foo");
        script.extend(server_frame(false, 0x0, b", "));
        script.extend(server_frame(true, 0x0, b"bar"));
        let (mut client, _written, _open) = open_client(script);
        assert_eq!(client.receive_message().unwrap().as_ref(), b"foo, bar");
    }

    #[test]
    fn ping_is_answered_and_not_surfaced() {
        let mut script = server_frame(true, 0x9, b"hi");
        script.extend(server_frame(true, 0x1, b"real message"));
        let (mut client, written, _open) = open_client(script);

        assert_eq!(client.receive_message().unwrap().as_ref(), b"real message");

        // Masked pong echoing the ping payload, under the fixed mask key.
        assert_eq!(
            written.lock().unwrap().as_slice(),
            &[0x8A, 0x82, 0x37, 0xfa, 0x21, 0x3d, 0x68 ^ 0x37, 0x69 ^ 0xfa]
        );
    }

    #[test]
    fn pong_is_absorbed() {
        let mut script = server_frame(true, 0xA, b"keepalive");
        script.extend(server_frame(true, 0x1, b"data"));
        let (mut client, _written, _open) = open_client(script);
        assert_eq!(client.receive_message().unwrap().as_ref(), b"data");
    }

    #[test]
    fn close_frame_terminates_with_registry_description() {
        let (mut client, _written, open) =
            open_client(server_frame(true, 0x8, &1008u16.to_be_bytes()));

        let err = client.receive_message().unwrap_err();
        assert!(matches!(
            err,
            WsError::ConnectionTerminated {
                code: 1008,
                description: "Policy Violation"
            }
        ));
        assert!(!open.load(Ordering::SeqCst));
        assert!(matches!(client.send("x"), Err(WsError::NotConnected)));
    }

    #[test]
    fn out_of_range_close_code_describes_as_unknown() {
        let (mut client, _written, _open) =
            open_client(server_frame(true, 0x8, &1u16.to_be_bytes()));
        let err = client.receive_message().unwrap_err();
        assert!(matches!(
            err,
            WsError::ConnectionTerminated {
                code: 1,
                description: "???"
            }
        ));
    }

    #[test]
    fn close_without_payload_reports_no_status() {
        let (mut client, _written, _open) = open_client(server_frame(true, 0x8, &[]));
        let err = client.receive_message().unwrap_err();
        assert!(matches!(
            err,
            WsError::ConnectionTerminated {
                code: 1005,
                description: "No Status Rcvd"
            }
        ));
    }

    #[test]
    fn unexpected_continuation_is_a_protocol_violation() {
        let (mut client, _written, _open) = open_client(server_frame(true, 0x0, b"oops"));
        assert!(matches!(
            client.receive_message(),
            Err(WsError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn new_data_frame_during_fragmentation_is_a_protocol_violation() {
        let mut script = server_frame(false, 0x1, b"start");
        script.extend(server_frame(true, 0x1, b"wrong"));
        let (mut client, _written, _open) = open_client(script);
        assert!(matches!(
            client.receive_message(),
            Err(WsError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn eof_mid_stream_is_io_not_termination() {
        // Header promises more payload than the script holds.
        let (mut client, _written, _open) = open_client(vec![0x81, 0x05, b'h', b'i']);
        match client.receive_message() {
            Err(WsError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("expected Io error, got {other:?}"),
        }
    }

    #[test]
    fn sent_text_frame_is_masked() {
        let (mut client, written, _open) = open_client(Vec::new());
        client.send("Hello").unwrap();
        assert_eq!(
            written.lock().unwrap().as_slice(),
            &[0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58]
        );
    }

    #[test]
    fn disconnect_sends_masked_close_and_is_idempotent() {
        let (mut client, written, open) = open_client(Vec::new());
        client.disconnect();
        client.disconnect();

        // Exactly one close frame: 1000 (0x03 0xE8) masked with the fixed key.
        assert_eq!(
            written.lock().unwrap().as_slice(),
            &[0x88, 0x82, 0x37, 0xfa, 0x21, 0x3d, 0x03 ^ 0x37, 0xE8 ^ 0xfa]
        );
        assert!(!open.load(Ordering::SeqCst));
        assert!(!client.is_open());
    }

    #[test]
    fn disconnect_before_connect_is_a_no_op() {
        let mut client: WebSocketClient<ScriptedTransport> =
            WebSocketClient::new(WebSocketConfig::default());
        client.disconnect();
        client.disconnect();
        assert!(!client.is_open());
    }

    #[test]
    fn config_builder() {
        let config = WebSocketConfig::new()
            .max_payload_size(1024)
            .protocols(vec!["soku".to_string()]);
        assert_eq!(config.max_payload_size, 1024);
        assert_eq!(config.protocols, vec!["soku".to_string()]);
    }
}
