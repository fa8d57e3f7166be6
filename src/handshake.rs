//! WebSocket handshake (RFC 6455 Section 4), client side.
//!
//! The handshake is one HTTP exchange over the already-connected transport:
//!
//! ```http
//! GET /chat HTTP/1.1
//! Host: server.example.com
//! Upgrade: websocket
//! Connection: Upgrade
//! Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==
//! Sec-WebSocket-Version: 13
//! ```
//!
//! The server must answer `101 Switching Protocols` with a
//! `Sec-WebSocket-Accept` derived from the key; anything else is fatal.

use base64::Engine;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::io::{self, Read};
use thiserror::Error;

/// RFC 6455 GUID for Sec-WebSocket-Accept calculation.
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Upper bound on HTTP response headers.
const MAX_RESPONSE_BYTES: usize = 16 * 1024;

/// Compute the Sec-WebSocket-Accept value from a client key.
///
/// Per RFC 6455 Section 4.2.2: SHA-1 of the key concatenated with the GUID,
/// base64 encoded.
///
/// # Example
///
/// ```
/// use challonge_ws::compute_accept_key;
///
/// let accept = compute_accept_key("dGhlIHNhbXBsZSBub25jZQ==");
/// assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
#[must_use]
pub fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Generate a random 16-byte key for the client handshake.
fn generate_client_key() -> String {
    let mut key = [0u8; 16];
    getrandom::fill(&mut key).expect("OS RNG unavailable");
    base64::engine::general_purpose::STANDARD.encode(key)
}

/// WebSocket handshake errors.
///
/// On every variant the caller has already closed the transport before the
/// error propagates; no open socket is left dangling.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// Malformed HTTP response.
    #[error("invalid HTTP response: {0}")]
    InvalidResponse(String),
    /// The server answered with a status other than 101.
    #[error("server answered with code {0} but 101 was expected")]
    Rejected(u16),
    /// A required response header was absent.
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),
    /// The echoed Sec-WebSocket-Accept did not match the key derivation.
    #[error("invalid Sec-WebSocket-Accept: expected {expected}, got {actual}")]
    InvalidAccept {
        /// Value derived from our key.
        expected: String,
        /// Value the server sent.
        actual: String,
    },
    /// Response headers exceeded the size cap.
    #[error("HTTP response headers exceed {0} bytes")]
    ResponseTooLarge(usize),
    /// I/O failure during the exchange.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Client-side handshake: builds the upgrade request and checks the response.
#[derive(Debug, Clone)]
pub struct ClientHandshake {
    host: String,
    path: String,
    key: String,
    protocols: Vec<String>,
}

impl ClientHandshake {
    /// Create a handshake for the given `Host` header value and request path
    /// with a freshly generated random key.
    #[must_use]
    pub fn new(host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            path: path.into(),
            key: generate_client_key(),
            protocols: Vec::new(),
        }
    }

    /// Override the generated key (deterministic tests).
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Add a subprotocol to request.
    #[must_use]
    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocols.push(protocol.into());
        self
    }

    /// The key sent in `Sec-WebSocket-Key`.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Render the HTTP upgrade request.
    #[must_use]
    pub fn request_bytes(&self) -> Vec<u8> {
        let mut request = format!(
            "GET {} HTTP/1.1\r\n\
             Host: {}\r\n\
             Connection: Upgrade\r\n\
             Upgrade: websocket\r\n\
             Sec-WebSocket-Version: 13\r\n\
             Sec-WebSocket-Key: {}\r\n",
            self.path, self.host, self.key
        );
        if !self.protocols.is_empty() {
            request.push_str("Sec-WebSocket-Protocol: ");
            request.push_str(&self.protocols.join(", "));
            request.push_str("\r\n");
        }
        request.push_str("\r\n");
        request.into_bytes()
    }

    /// Validate the server's response.
    ///
    /// Requires status 101, `Upgrade: websocket`, a `Connection` header
    /// containing `Upgrade`, and a matching `Sec-WebSocket-Accept`.
    pub fn validate_response(&self, response: &HttpResponse) -> Result<(), HandshakeError> {
        if response.status != 101 {
            return Err(HandshakeError::Rejected(response.status));
        }

        let upgrade = response
            .header("upgrade")
            .ok_or(HandshakeError::MissingHeader("Upgrade"))?;
        if !upgrade.eq_ignore_ascii_case("websocket") {
            return Err(HandshakeError::InvalidResponse(format!(
                "Upgrade header must be 'websocket', got '{upgrade}'"
            )));
        }

        let connection = response
            .header("connection")
            .ok_or(HandshakeError::MissingHeader("Connection"))?;
        if !connection.to_ascii_lowercase().contains("upgrade") {
            return Err(HandshakeError::InvalidResponse(format!(
                "Connection header must contain 'Upgrade', got '{connection}'"
            )));
        }

        let accept = response
            .header("sec-websocket-accept")
            .ok_or(HandshakeError::MissingHeader("Sec-WebSocket-Accept"))?;
        let expected = compute_accept_key(&self.key);
        if accept != expected {
            return Err(HandshakeError::InvalidAccept {
                expected,
                actual: accept.to_string(),
            });
        }

        Ok(())
    }
}

/// Read HTTP response headers from a blocking stream, up to and including the
/// `\r\n\r\n` terminator.
///
/// Reads one byte at a time so nothing past the terminator is consumed: any
/// following bytes belong to the first WebSocket frame and stay in the
/// transport for the frame decoder.
pub fn read_response_bytes<R: Read>(reader: &mut R) -> Result<Vec<u8>, HandshakeError> {
    let mut buf = Vec::with_capacity(512);
    let mut byte = [0u8; 1];
    loop {
        reader.read_exact(&mut byte)?;
        buf.push(byte[0]);
        if buf.ends_with(b"\r\n\r\n") {
            return Ok(buf);
        }
        if buf.len() > MAX_RESPONSE_BYTES {
            return Err(HandshakeError::ResponseTooLarge(MAX_RESPONSE_BYTES));
        }
    }
}

/// Minimal HTTP response representation for the handshake.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Status reason phrase.
    pub reason: String,
    /// Headers, keyed by lowercase name.
    headers: HashMap<String, String>,
}

impl HttpResponse {
    /// Parse an HTTP response head from bytes.
    pub fn parse(data: &[u8]) -> Result<Self, HandshakeError> {
        let text = std::str::from_utf8(data)
            .map_err(|_| HandshakeError::InvalidResponse("invalid UTF-8".into()))?;

        let mut lines = text.lines();
        let status_line = lines
            .next()
            .ok_or_else(|| HandshakeError::InvalidResponse("empty response".into()))?;

        let mut parts = status_line.splitn(3, ' ');
        let _version = parts
            .next()
            .ok_or_else(|| HandshakeError::InvalidResponse("missing HTTP version".into()))?;
        let status: u16 = parts
            .next()
            .ok_or_else(|| HandshakeError::InvalidResponse("missing status code".into()))?
            .parse()
            .map_err(|_| HandshakeError::InvalidResponse("invalid status code".into()))?;
        let reason = parts.next().unwrap_or("").to_string();

        let mut headers = HashMap::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
            }
        }

        Ok(Self {
            status,
            reason,
            headers,
        })
    }

    /// Get a header value by name (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}
