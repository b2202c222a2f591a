//! Per-connection handshake and Normal-phase message loop (§4.4).
//!
//! States progress `Init -> ProtocolVersion -> SecurityType -> SecurityResult
//! -> ClientInit -> ServerInit -> Normal -> Closed` strictly in order; any
//! transport error or protocol violation ends the session by propagating a
//! [`VncError`] up to [`run`], which the server's supervisor (`server.rs`)
//! catches and turns into a transport close. Nothing here recovers locally —
//! that is the session supervisor's job, not the state machine's (§7).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use uuid::Uuid;

use crate::capabilities;
use crate::config::ServerConfig;
use crate::error::{Result, VncError};
use crate::events::{EventSink, ServerEvent};
use crate::protocol::{
    self, ClientMessage, PixelFormat, SetColorMapEntries, SECURITY_RESULT_FAILED,
    SECURITY_RESULT_OK, SECURITY_TYPE_NONE, SECURITY_TYPE_VNC_AUTH,
};
use crate::registry::{SessionRegistry, SharedWriter};
use crate::wire;

/// Session-local state that the client may mutate during the Normal phase
/// (§3, Data Model: "current `pixel_format`... current `encodings`").
struct SessionRuntimeState {
    pixel_format: PixelFormat,
    encodings: Vec<i32>,
    pending_request: Option<PendingUpdate>,
}

#[derive(Clone, Copy)]
struct PendingUpdate {
    incremental: bool,
    x: u16,
    y: u16,
    width: u16,
    height: u16,
}

/// Runs one session to completion: the full handshake, then the Normal
/// message loop, returning when the transport ends or a protocol violation
/// occurs. Callers (the server's accept loop) are responsible for spawning
/// this in its own task and reacting to the result.
pub async fn run(
    id: Uuid,
    stream: TcpStream,
    peer_addr: SocketAddr,
    config: Arc<ServerConfig>,
    registry: SessionRegistry,
) -> Result<()> {
    let events = config.event_sink.clone();
    events
        .emit(ServerEvent::Accept {
            session_id: id,
            address: peer_addr,
        })
        .await;
    log::info!("[{id}] accepted connection from {peer_addr}");

    let _ = stream.set_nodelay(true);
    let (mut reader, write_half) = stream.into_split();
    let writer: SharedWriter = Arc::new(Mutex::new(write_half));
    registry.register(id, writer.clone()).await;

    let mut guard = SessionGuard {
        id,
        registry: registry.clone(),
        writer: writer.clone(),
        events: events.clone(),
        closed: false,
    };

    let result = handshake_and_serve(id, &mut reader, &writer, &config, &registry).await;

    let reason = match &result {
        Ok(()) => "eof",
        Err(VncError::Transport(_)) => "transport error",
        Err(VncError::Protocol(_)) => "protocol error",
        Err(VncError::Auth(_)) => "authentication error",
        Err(VncError::Config(_)) => "configuration error",
        Err(VncError::Internal(_)) => "internal error",
        Err(VncError::ConnectionClosed) => "closed",
    };
    if result.is_err() {
        log::warn!("[{id}] session ending: {reason}: {:?}", result.as_ref().err());
    } else {
        log::info!("[{id}] session ending: {reason}");
    }
    guard.close(reason).await;
    result
}

/// RAII cleanup: guarantees the transport is closed and the session
/// unregistered exactly once, even if `run` returns early. The `Drop` impl
/// is a safety net for the case where the session task is dropped without
/// ever reaching `close` explicitly (e.g. a panic unwinds past the call
/// site) — per §4.6 the supervisor must guarantee the transport closes
/// exactly once regardless of how the task ends.
struct SessionGuard {
    id: Uuid,
    registry: SessionRegistry,
    writer: SharedWriter,
    events: Arc<dyn EventSink>,
    closed: bool,
}

impl SessionGuard {
    async fn close(&mut self, reason: &str) {
        if self.closed {
            return;
        }
        self.closed = true;
        {
            let mut w = self.writer.lock().await;
            let _ = w.shutdown().await;
        }
        self.registry.unregister(self.id).await;
        self.events
            .emit(ServerEvent::SessionClose {
                session_id: self.id,
                reason: reason.to_string(),
            })
            .await;
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let id = self.id;
        let registry = self.registry.clone();
        let writer = self.writer.clone();
        let events = self.events.clone();
        // `shutdown`/`unregister` are async; Drop cannot await, so this
        // best-effort cleanup runs on its own task. Reached only when `run`
        // was dropped (e.g. aborted, or unwound past the explicit `close`
        // call) without ever closing normally.
        tokio::spawn(async move {
            {
                let mut w = writer.lock().await;
                let _ = w.shutdown().await;
            }
            registry.unregister(id).await;
            events
                .emit(ServerEvent::SessionClose {
                    session_id: id,
                    reason: "dropped".to_string(),
                })
                .await;
        });
    }
}

async fn handshake_and_serve(
    id: Uuid,
    reader: &mut OwnedReadHalf,
    writer: &SharedWriter,
    config: &Arc<ServerConfig>,
    registry: &SessionRegistry,
) -> Result<()> {
    let events = &config.event_sink;
    events
        .emit(ServerEvent::HandshakeBegin { session_id: id })
        .await;

    let (_major, minor) = with_timeout(
        config.handshake_timeout,
        negotiate_version(reader, writer, config),
    )
    .await?;
    log::debug!("[{id}] negotiated protocol version 3.{minor}");

    let security_type = with_timeout(
        config.handshake_timeout,
        negotiate_security(reader, writer, config, minor),
    )
    .await?;

    with_timeout(
        config.handshake_timeout,
        authenticate(id, reader, writer, config, security_type, minor),
    )
    .await?;

    let shared = with_timeout(
        config.handshake_timeout,
        client_init(reader, registry, id),
    )
    .await?;
    log::debug!("[{id}] ClientInit: shared={shared}");

    server_init(writer, config).await?;
    events
        .emit(ServerEvent::HandshakeEnd {
            session_id: id,
            minor_version: minor as u32,
        })
        .await;
    log::info!("[{id}] handshake complete, entering Normal phase");

    let mut state = SessionRuntimeState {
        pixel_format: config.default_pixel_format,
        encodings: Vec::new(),
        pending_request: None,
    };
    normal_loop(id, reader, writer, config, &mut state).await
}

async fn with_timeout<T>(duration: Duration, fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
    match timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(VncError::protocol("handshake phase timed out")),
    }
}

/// **ProtocolVersion** (§4.4). Writes the server's offered version, reads
/// the client's, and coerces anything outside `{3.3, 3.7, 3.8}` down to 3.3
/// (§9's recorded decision: coerce, not close).
async fn negotiate_version(
    reader: &mut OwnedReadHalf,
    writer: &SharedWriter,
    config: &ServerConfig,
) -> Result<(u8, u8)> {
    {
        let mut w = writer.lock().await;
        w.write_all(protocol::format_version(config.major, config.minor).as_bytes())
            .await?;
        w.flush().await?;
    }

    let mut buf = [0u8; 12];
    reader.read_exact(&mut buf).await?;
    let minor = match protocol::parse_version(&buf) {
        Ok((major, minor)) if major == 3 && matches!(minor, 3 | 7 | 8) => minor as u8,
        _ => 3,
    };
    Ok((3, minor))
}

/// **SecurityType** (§4.4).
async fn negotiate_security(
    reader: &mut OwnedReadHalf,
    writer: &SharedWriter,
    config: &ServerConfig,
    minor: u8,
) -> Result<u8> {
    if minor == 3 {
        let chosen = config
            .offered_security_types
            .iter()
            .copied()
            .find(|t| *t == SECURITY_TYPE_NONE || *t == SECURITY_TYPE_VNC_AUTH)
            .ok_or_else(|| VncError::config("no None/VNCAuthentication security type offered"))?;
        let mut w = writer.lock().await;
        wire::write_u32(&mut *w, chosen as u32).await?;
        w.flush().await?;
        return Ok(chosen);
    }

    let types = &config.offered_security_types;
    {
        let mut w = writer.lock().await;
        if types.is_empty() {
            wire::write_u8(&mut *w, 0).await?;
            wire::write_string(&mut *w, "no security types available").await?;
            w.flush().await?;
            return Err(VncError::config("no security types offered"));
        }
        wire::write_u8(&mut *w, types.len() as u8).await?;
        for t in types {
            wire::write_u8(&mut *w, *t).await?;
        }
        w.flush().await?;
    }

    let chosen = wire::read_u8(reader).await?;
    if !types.contains(&chosen) {
        return Err(VncError::protocol(format!(
            "client chose unoffered security type {chosen}"
        )));
    }
    Ok(chosen)
}

/// **Authentication** and, where required, **SecurityResult** (§4.4): for
/// 3.8 the result is always sent; for 3.7/3.3 only after VNCAuthentication
/// (§9's recorded decision to follow RFC 6143 here, not the original
/// source's unconditional send).
async fn authenticate(
    id: Uuid,
    reader: &mut OwnedReadHalf,
    writer: &SharedWriter,
    config: &ServerConfig,
    security_type: u8,
    minor: u8,
) -> Result<()> {
    let events = &config.event_sink;
    match security_type {
        SECURITY_TYPE_NONE => {
            if minor == 8 {
                send_security_result(writer, true, None).await?;
            }
            Ok(())
        }
        SECURITY_TYPE_VNC_AUTH => {
            let challenge = crate::auth::generate_challenge();
            {
                let mut w = writer.lock().await;
                w.write_all(&challenge).await?;
                w.flush().await?;
            }
            let mut response = [0u8; 16];
            reader.read_exact(&mut response).await?;

            let provider = config.password_provider.as_ref().ok_or_else(|| {
                VncError::internal("VNCAuthentication selected with no password provider configured")
            })?;
            if provider.verify(&challenge, &response).await {
                events.emit(ServerEvent::AuthOk { session_id: id }).await;
                log::info!("[{id}] VNC authentication succeeded");
                send_security_result(writer, true, None).await?;
                Ok(())
            } else {
                events.emit(ServerEvent::AuthFail { session_id: id }).await;
                log::warn!("[{id}] VNC authentication failed");
                let reason = if minor == 8 { Some("authentication failed") } else { None };
                send_security_result(writer, false, reason).await?;
                Err(VncError::auth("VNC authentication failed"))
            }
        }
        other => Err(VncError::protocol(format!(
            "unsupported security type {other}"
        ))),
    }
}

async fn send_security_result(writer: &SharedWriter, ok: bool, reason: Option<&str>) -> Result<()> {
    let mut w = writer.lock().await;
    wire::write_u32(
        &mut *w,
        if ok { SECURITY_RESULT_OK } else { SECURITY_RESULT_FAILED },
    )
    .await?;
    if !ok {
        if let Some(reason) = reason {
            wire::write_string(&mut *w, reason).await?;
        }
    }
    w.flush().await?;
    Ok(())
}

/// **ClientInit** (§4.4): reads the `shared` byte and, if exclusive access
/// was requested, asks the registry to evict every other session.
async fn client_init(reader: &mut OwnedReadHalf, registry: &SessionRegistry, id: Uuid) -> Result<u8> {
    let shared = wire::read_u8(reader).await?;
    if shared == 0 {
        registry.evict_others(id).await;
    }
    Ok(shared)
}

/// **ServerInit** (§4.4).
async fn server_init(writer: &SharedWriter, config: &ServerConfig) -> Result<()> {
    let init = protocol::ServerInit {
        width: config.desktop_width,
        height: config.desktop_height,
        pixel_format: config.default_pixel_format,
        name: config.desktop_name.clone(),
    };
    let mut w = writer.lock().await;
    init.write_to(&mut *w).await?;
    w.flush().await?;
    Ok(())
}

/// **Normal** phase (§4.4): dispatches each client message as it arrives and,
/// concurrently, polls the framebuffer source for any outstanding
/// `FramebufferUpdateRequest` and pushes updates as they become available
/// (teacher precedent: a `tokio::select!` between socket reads and a
/// periodic update check). The loop — and the session — ends the moment any
/// read or decode fails.
async fn normal_loop(
    id: Uuid,
    reader: &mut OwnedReadHalf,
    writer: &SharedWriter,
    config: &Arc<ServerConfig>,
    state: &mut SessionRuntimeState,
) -> Result<()> {
    let mut poll_interval = tokio::time::interval(Duration::from_millis(50));
    poll_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            tag = wire::read_u8(reader) => {
                let tag = tag?;
                let msg = ClientMessage::read_from(reader, tag).await?;
                config.event_sink.emit(ServerEvent::Message { session_id: id, message_type: tag }).await;
                dispatch_normal_message(msg, writer, config, state).await?;
            }
            _ = poll_interval.tick() => {
                deliver_pending_update(writer, config, state).await?;
            }
        }
    }
}

async fn dispatch_normal_message(
    msg: ClientMessage,
    writer: &SharedWriter,
    config: &Arc<ServerConfig>,
    state: &mut SessionRuntimeState,
) -> Result<()> {
    match &msg {
        ClientMessage::SetPixelFormat(pf) => {
            let needs_colour_map = pf.true_colour_flag == 0;
            state.pixel_format = *pf;
            if needs_colour_map {
                // §4.4: "the server is required to send a SetColorMapEntries
                // before any further FramebufferUpdate". The core has no
                // colour-map path of its own (§1 Non-goals), so it sends an
                // empty map — enough to satisfy the ordering requirement
                // without inventing colours the embedder never supplied.
                let entries = SetColorMapEntries {
                    first_colour: 0,
                    colours: Vec::new(),
                };
                let mut w = writer.lock().await;
                entries.write_to(&mut *w).await?;
                w.flush().await?;
            }
        }
        ClientMessage::SetEncodings(encodings) => {
            state.encodings = encodings.clone();
            log::debug!("encodings set: {:?}", state.encodings);
        }
        ClientMessage::FramebufferUpdateRequest {
            incremental,
            x,
            y,
            width,
            height,
        } => {
            state.pending_request = Some(PendingUpdate {
                incremental: *incremental,
                x: *x,
                y: *y,
                width: *width,
                height: *height,
            });
        }
        ClientMessage::KeyEvent { .. }
        | ClientMessage::PointerEvent { .. }
        | ClientMessage::ClientCutText(_) => {}
    }

    // Input/clipboard forwarding is session-agnostic; reuse the shared
    // dispatch table rather than duplicating it here.
    capabilities::dispatch_message(
        &msg,
        config.input_sink.as_ref(),
        config.clipboard_sink.as_ref(),
    )
    .await;
    Ok(())
}

async fn deliver_pending_update(
    writer: &SharedWriter,
    config: &Arc<ServerConfig>,
    state: &mut SessionRuntimeState,
) -> Result<()> {
    let Some(pending) = state.pending_request else {
        return Ok(());
    };
    let rectangles = config
        .framebuffer_source
        .poll_update(pending.x, pending.y, pending.width, pending.height, pending.incremental)
        .await;

    match rectangles {
        Some(rectangles) => {
            state.pending_request = None;
            let update = protocol::FramebufferUpdate { rectangles };
            let mut w = writer.lock().await;
            update.write_to(&mut *w).await?;
            w.flush().await?;
        }
        None => {
            // Nothing changed yet; the request stays outstanding and is
            // retried on the next tick.
        }
    }
    Ok(())
}
