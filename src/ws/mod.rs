//! Hub connection engine: wire protocol, handshake, socket and liveness

pub mod connection;
pub mod handshake;
pub mod hub;
pub mod ping;
pub mod protocol;

pub use connection::{SocketHandle, WebSocketConnection, WebSocketError};
pub use handshake::{ErrorOrigin, HandshakeContext, HandshakeError, HandshakeStep};
pub use hub::{CallError, ConnectionEvent, ConnectionState, HubConnection, PendingCall};
pub use ping::{ConnectionHealth, LivenessTracker};
pub use protocol::{HubMessage, InboundFrame, MessageId};
