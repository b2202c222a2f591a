//! The public entry point: binds a listener, accepts connections, and
//! supervises one session task per connection (§4.5, §4.6).

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::error::{Result, VncError};
use crate::events::ServerEvent;
use crate::registry::SessionRegistry;
use crate::session;

/// Owns the listener and the live set of sessions for one RFB server
/// instance. Cheap to clone; clones share the same listener-shutdown signal
/// and session registry, so any clone may call [`VncServer::shutdown`].
#[derive(Clone)]
pub struct VncServer {
    config: Arc<ServerConfig>,
    registry: SessionRegistry,
    shutdown_signal: Arc<Notify>,
}

impl VncServer {
    /// Builds a server from a validated configuration.
    pub fn new(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            registry: SessionRegistry::new(),
            shutdown_signal: Arc::new(Notify::new()),
        })
    }

    /// The number of currently connected sessions.
    pub async fn session_count(&self) -> usize {
        self.registry.session_count().await
    }

    /// Binds `config.listen_address` and accepts connections until
    /// [`VncServer::shutdown`] is called. Each accepted connection is
    /// handed to its own supervised session task (§5: "parallel execution
    /// contexts, one per accepted connection").
    pub async fn serve(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.listen_address)
            .await
            .map_err(|e| {
                VncError::config(format!(
                    "binding {}: {e}",
                    self.config.listen_address
                ))
            })?;
        log::info!("listening on {}", self.config.listen_address);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer_addr)) => self.spawn_session(stream, peer_addr),
                        Err(e) => {
                            log::error!("accept error: {e}");
                            continue;
                        }
                    }
                }
                _ = self.shutdown_signal.notified() => {
                    log::info!("listener closing");
                    return Ok(());
                }
            }
        }
    }

    fn spawn_session(&self, stream: tokio::net::TcpStream, peer_addr: std::net::SocketAddr) {
        let id = Uuid::new_v4();
        let config = self.config.clone();
        let registry = self.registry.clone();
        let events = config.event_sink.clone();

        let join_handle =
            tokio::spawn(async move { session::run(id, stream, peer_addr, config, registry).await });

        let registry = self.registry.clone();
        tokio::spawn(async move {
            match join_handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    log::warn!("[{id}] session ended with error: {e}");
                }
                Err(join_error) => {
                    let message = if join_error.is_panic() {
                        panic_message(join_error)
                    } else {
                        "session task was cancelled".to_string()
                    };
                    log::error!("[{id}] session task panicked: {message}");
                    events
                        .emit(ServerEvent::Panic {
                            session_id: id,
                            message,
                        })
                        .await;
                    // The session's own `SessionGuard::drop` already closes
                    // the transport and unregisters it; this is a
                    // belt-and-suspenders call for the case where the panic
                    // unwound past that construction entirely.
                    registry.unregister(id).await;
                }
            }
        });
    }

    /// Gracefully closes the listener (stopping the accept loop), then
    /// closes every session's transport and waits up to `deadline` for
    /// their tasks to finish unregistering (§5: "Cancellation").
    pub async fn shutdown(&self, deadline: Duration) -> Result<()> {
        self.shutdown_signal.notify_waiters();
        self.registry.shutdown(deadline).await
    }
}

fn panic_message(join_error: tokio::task::JoinError) -> String {
    match join_error.try_into_panic() {
        Ok(payload) => {
            if let Some(s) = payload.downcast_ref::<&str>() {
                (*s).to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "non-string panic payload".to_string()
            }
        }
        Err(_) => "unknown panic".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::FramebufferSource;
    use crate::protocol::Rectangle;
    use async_trait::async_trait;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    struct EmptyFramebuffer;

    #[async_trait]
    impl FramebufferSource for EmptyFramebuffer {
        async fn poll_update(
            &self,
            _x: u16,
            _y: u16,
            _w: u16,
            _h: u16,
            _incremental: bool,
        ) -> Option<Vec<Rectangle>> {
            None
        }
    }

    fn test_config(listen: &str) -> ServerConfig {
        ServerConfig::new(16, 16, Arc::new(EmptyFramebuffer)).with_listen_address(listen)
    }

    #[tokio::test]
    async fn rejects_invalid_configuration_at_construction() {
        let cfg = test_config("127.0.0.1:0").with_security_types(vec![]);
        assert!(VncServer::new(cfg).is_err());
    }

    #[tokio::test]
    async fn full_3_8_none_auth_handshake_completes() {
        // Reserve an ephemeral port by binding once, then hand that address
        // to the server so the test knows where to connect.
        let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = probe.local_addr().unwrap();
        drop(probe);

        let server = VncServer::new(test_config(&addr.to_string())).unwrap();
        let serve_task = tokio::spawn(async move { server.serve().await });

        // Give the listener a moment to bind.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut version = [0u8; 12];
        client.read_exact(&mut version).await.unwrap();
        assert_eq!(&version, b"RFB 003.008\n");
        client.write_all(b"RFB 003.008\n").await.unwrap();

        let mut sec_count = [0u8; 1];
        client.read_exact(&mut sec_count).await.unwrap();
        assert_eq!(sec_count[0], 1);
        let mut sec_types = [0u8; 1];
        client.read_exact(&mut sec_types).await.unwrap();
        client.write_all(&sec_types).await.unwrap();

        let mut sec_result = [0u8; 4];
        client.read_exact(&mut sec_result).await.unwrap();
        assert_eq!(u32::from_be_bytes(sec_result), 0);

        client.write_all(&[1]).await.unwrap(); // ClientInit shared=1

        let mut server_init_head = [0u8; 2 + 2 + 16 + 4];
        client.read_exact(&mut server_init_head).await.unwrap();
        let width = u16::from_be_bytes([server_init_head[0], server_init_head[1]]);
        assert_eq!(width, 16);

        drop(client);
        serve_task.abort();
    }
}
