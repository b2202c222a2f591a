//! Process-wide registry of live sessions.
//!
//! The registry is the only piece of shared mutable state between sessions
//! (§3, Data Model). It holds just enough of each session to evict it —
//! the write half of its transport — so eviction never reaches into a
//! peer's own task state and races against that peer's shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{Result, VncError};

/// A session's write half, shared between the session's own task (which
/// writes server-to-client messages) and the registry (which may shut it
/// down to evict the session).
pub type SharedWriter = Arc<Mutex<OwnedWriteHalf>>;

#[derive(Default)]
struct RegistryState {
    sessions: HashMap<Uuid, SharedWriter>,
}

/// The live set of sessions under a server, plus the operations that may
/// mutate it. Cheap to clone; clones share the same underlying state.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<Mutex<RegistryState>>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a newly accepted session. `id` MUST NOT already be
    /// registered (session ids are fresh [`Uuid::new_v4`] values).
    pub async fn register(&self, id: Uuid, writer: SharedWriter) {
        let mut state = self.inner.lock().await;
        state.sessions.insert(id, writer);
    }

    /// Removes a session from the registry. A no-op if `id` is not present,
    /// so callers (including the panic-cleanup path) may call this more
    /// than once for the same session.
    pub async fn unregister(&self, id: Uuid) {
        let mut state = self.inner.lock().await;
        state.sessions.remove(&id);
    }

    /// The number of currently registered sessions.
    pub async fn session_count(&self) -> usize {
        self.inner.lock().await.sessions.len()
    }

    /// Shuts down the transport of every session except `except`, per the
    /// `shared == 0` `ClientInit` policy (§4.4).
    ///
    /// Each peer's transport is closed from an independent task so this
    /// never blocks the caller and never deadlocks when invoked from within
    /// a session's own task (§4.5): the peer's own read loop observes the
    /// resulting EOF/error and progresses to `Closed` on its own schedule.
    pub async fn evict_others(&self, except: Uuid) {
        let targets: Vec<SharedWriter> = {
            let state = self.inner.lock().await;
            state
                .sessions
                .iter()
                .filter(|(id, _)| **id != except)
                .map(|(_, writer)| writer.clone())
                .collect()
        };
        for writer in targets {
            tokio::spawn(async move {
                use tokio::io::AsyncWriteExt;
                let mut w = writer.lock().await;
                let _ = w.shutdown().await;
            });
        }
    }

    /// Closes every registered session's transport and waits until the
    /// registry is empty (each session's task unregisters itself as it
    /// closes) or `deadline` elapses, whichever comes first.
    pub async fn shutdown(&self, deadline: Duration) -> Result<()> {
        let targets: Vec<SharedWriter> = {
            let state = self.inner.lock().await;
            state.sessions.values().cloned().collect()
        };
        for writer in targets {
            use tokio::io::AsyncWriteExt;
            let mut w = writer.lock().await;
            let _ = w.shutdown().await;
        }

        let poll_interval = Duration::from_millis(20);
        let mut waited = Duration::ZERO;
        while self.session_count().await > 0 {
            if waited >= deadline {
                return Err(VncError::internal(format!(
                    "shutdown timed out after {deadline:?} with {} session(s) still open",
                    self.session_count().await
                )));
            }
            tokio::time::sleep(poll_interval).await;
            waited += poll_interval;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    async fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let accept = listener.accept();
        let (client, (server, _)) = tokio::join!(connect, accept);
        (client.unwrap(), server)
    }

    #[tokio::test]
    async fn register_and_unregister_track_session_count() {
        let registry = SessionRegistry::new();
        let (_client, server) = loopback_pair().await;
        let (_r, w) = server.into_split();
        let id = Uuid::new_v4();

        assert_eq!(registry.session_count().await, 0);
        registry.register(id, Arc::new(Mutex::new(w))).await;
        assert_eq!(registry.session_count().await, 1);
        registry.unregister(id).await;
        assert_eq!(registry.session_count().await, 0);
    }

    #[tokio::test]
    async fn unregister_of_unknown_id_is_a_no_op() {
        let registry = SessionRegistry::new();
        registry.unregister(Uuid::new_v4()).await;
        assert_eq!(registry.session_count().await, 0);
    }

    #[tokio::test]
    async fn evict_others_closes_every_peer_but_not_the_caller() {
        use tokio::io::AsyncReadExt;

        let registry = SessionRegistry::new();

        let (_client_a, server_a) = loopback_pair().await;
        let (mut reader_a, writer_a) = server_a.into_split();
        let id_a = Uuid::new_v4();
        registry.register(id_a, Arc::new(Mutex::new(writer_a))).await;

        let (_client_b, server_b) = loopback_pair().await;
        let (_reader_b, writer_b) = server_b.into_split();
        let id_b = Uuid::new_v4();
        registry.register(id_b, Arc::new(Mutex::new(writer_b))).await;

        registry.evict_others(id_b).await;

        // A's transport is shut down from the server side; A's own read
        // half observes EOF shortly after.
        let mut buf = [0u8; 1];
        let result = tokio::time::timeout(Duration::from_secs(1), reader_a.read(&mut buf)).await;
        assert_eq!(result.unwrap().unwrap(), 0, "expected EOF on evicted peer");

        // B was excluded and remains registered.
        assert_eq!(registry.session_count().await, 2);
    }

    #[tokio::test]
    async fn shutdown_returns_once_sessions_unregister_themselves() {
        let registry = SessionRegistry::new();
        let (_client, server) = loopback_pair().await;
        let (_r, w) = server.into_split();
        let id = Uuid::new_v4();
        registry.register(id, Arc::new(Mutex::new(w))).await;

        let registry_clone = registry.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            registry_clone.unregister(id).await;
        });

        registry.shutdown(Duration::from_secs(2)).await.unwrap();
        assert_eq!(registry.session_count().await, 0);
    }

    #[tokio::test]
    async fn shutdown_times_out_if_sessions_never_unregister() {
        let registry = SessionRegistry::new();
        let (_client, server) = loopback_pair().await;
        let (_r, w) = server.into_split();
        registry.register(Uuid::new_v4(), Arc::new(Mutex::new(w))).await;

        let err = registry
            .shutdown(Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, VncError::Internal(_)));
    }
}
