//! obs-websocket protocol layer.
//!
//! Split the way the rest of the bridge consumes it:
//! - [`transport`] owns the socket (connect, send, recv, close)
//! - [`messages`] is the wire schema (envelopes, events, auth string)
//! - [`client`] is the session (handshake, correlation ids, event demux)

pub mod client;
pub mod messages;
pub mod transport;

pub use client::ProtocolClient;
pub use messages::{Event, OutputState};
pub use transport::Transport;
