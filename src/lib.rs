//! Blocking client-side WebSocket protocol layer (RFC 6455 subset).
//!
//! This crate implements the wire-level half of a WebSocket client on top of
//! a reliable, ordered byte stream: the HTTP upgrade handshake, masked frame
//! encoding, frame decoding with fragmentation reassembly, transparent
//! ping/pong handling, and the close handshake with a human-readable
//! close-code registry.
//!
//! # Module Structure
//!
//! - [`frame`]: Wire format encoding/decoding (RFC 6455 Section 5)
//! - [`handshake`]: HTTP upgrade negotiation (RFC 6455 Section 4)
//! - [`close`]: Close codes and close frame payloads (RFC 6455 Section 7)
//! - [`transport`]: Byte-stream seam and the TLS transport
//! - [`client`]: Stateful connection object tying the pieces together
//!
//! # Example
//!
//! ```no_run
//! use challonge_ws::{WebSocketClient, WebSocketConfig};
//!
//! let mut ws = WebSocketClient::new(WebSocketConfig::default());
//! ws.set_path("/v1/stream");
//! ws.connect("tournaments.example.com", 443)?;
//!
//! ws.send("{\"subscribe\":\"matches\"}")?;
//! let message = ws.receive_message()?;
//! println!("{}", String::from_utf8_lossy(&message));
//!
//! ws.disconnect();
//! # Ok::<(), challonge_ws::WsError>(())
//! ```
//!
//! # Concurrency
//!
//! All calls block. One thread may drive [`WebSocketClient::receive_message`]
//! in a loop while other threads send; the crate never interleaves partial
//! frames because every frame is assembled in one buffer and written with a
//! single `write_all`. Only one thread may decode at a time: the fragmented
//! message accumulator lives on the receiving call's stack.
//!
//! Cancellation is achieved by closing the transport out-of-band; the blocked
//! read then fails with [`WsError::Io`], which is distinct from a clean
//! [`WsError::ConnectionTerminated`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod close;
pub mod frame;
pub mod handshake;
pub mod transport;

pub use client::{WebSocketClient, WebSocketConfig};
pub use close::{describe, CloseReason, NORMAL_CLOSURE};
pub use frame::{apply_mask, Frame, FrameCodec, MaskSource, Opcode, WsError};
pub use handshake::{compute_accept_key, ClientHandshake, HandshakeError, HttpResponse};
pub use transport::{TlsTransport, Transport};
