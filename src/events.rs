//! Structured events emitted by the server as a session progresses through
//! the handshake and Normal phase.
//!
//! This is the typed counterpart to the free-text `log` records emitted
//! inline by [`crate::session`]: a host application that wants to react to
//! connects/disconnects programmatically subscribes to this sink instead of
//! scraping log lines.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Events emitted by the server over a session's lifetime.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A TCP connection was accepted, before any protocol bytes are
    /// exchanged.
    Accept {
        /// The session that was assigned to this connection.
        session_id: Uuid,
        /// The peer's socket address.
        address: SocketAddr,
    },

    /// The handshake (protocol version through `ClientInit`) has begun.
    HandshakeBegin {
        /// The session performing the handshake.
        session_id: Uuid,
    },

    /// The handshake completed and the session has entered the Normal
    /// phase.
    HandshakeEnd {
        /// The session that completed its handshake.
        session_id: Uuid,
        /// The negotiated protocol minor version (3, 7, or 8).
        minor_version: u32,
    },

    /// VNC Authentication succeeded.
    AuthOk {
        /// The authenticated session.
        session_id: Uuid,
    },

    /// VNC Authentication failed.
    AuthFail {
        /// The session whose authentication attempt failed.
        session_id: Uuid,
    },

    /// A Normal-phase client message was dispatched.
    Message {
        /// The session that sent the message.
        session_id: Uuid,
        /// The client message type tag, e.g. `protocol::CLIENT_MSG_KEY_EVENT`.
        message_type: u8,
    },

    /// A session's connection closed, gracefully or otherwise.
    SessionClose {
        /// The session that closed.
        session_id: Uuid,
        /// A short, human-readable reason (`"eof"`, `"protocol error"`,
        /// `"evicted"`, `"shutdown"`, ...).
        reason: String,
    },

    /// A session's task panicked; the supervisor caught it and the
    /// connection was torn down.
    Panic {
        /// The session whose task panicked.
        session_id: Uuid,
        /// The panic payload, downcast to a string where possible.
        message: String,
    },
}

impl ServerEvent {
    /// The session ID this event concerns, present on every variant.
    #[must_use]
    pub fn session_id(&self) -> Uuid {
        match self {
            ServerEvent::Accept { session_id, .. }
            | ServerEvent::HandshakeBegin { session_id }
            | ServerEvent::HandshakeEnd { session_id, .. }
            | ServerEvent::AuthOk { session_id }
            | ServerEvent::AuthFail { session_id }
            | ServerEvent::Message { session_id, .. }
            | ServerEvent::SessionClose { session_id, .. }
            | ServerEvent::Panic { session_id, .. } => *session_id,
        }
    }
}

/// A sink that receives every [`ServerEvent`] a server emits.
///
/// This is the typed counterpart to the free-text `log` records emitted
/// inline by the session state machine: a host application that wants to
/// react to connects/disconnects/auth outcomes programmatically implements
/// this instead of scraping log lines.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Handles one event. Implementations must not block for long; the
    /// session that produced the event awaits this call before continuing.
    async fn emit(&self, event: ServerEvent);
}

/// An [`EventSink`] that discards every event. The default when a server is
/// not configured with one.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

#[async_trait]
impl EventSink for NullEventSink {
    async fn emit(&self, _event: ServerEvent) {}
}

/// An [`EventSink`] that forwards every event onto an unbounded channel, for
/// a host application to drain on its own task (or for tests to assert
/// against).
#[derive(Clone)]
pub struct ChannelEventSink {
    sender: mpsc::UnboundedSender<ServerEvent>,
}

impl ChannelEventSink {
    /// Creates a sink/receiver pair.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl EventSink for ChannelEventSink {
    async fn emit(&self, event: ServerEvent) {
        // A closed receiver just means nobody is listening anymore; dropping
        // the event is the correct behaviour, not a session-fatal error.
        let _ = self.sender.send(event);
    }
}
