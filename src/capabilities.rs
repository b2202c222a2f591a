//! Collaborator traits through which a session reaches the surrounding
//! application: framebuffer content, password verification, and input/
//! clipboard sinks. An embedder implements these and hands an `Arc<dyn ..>`
//! to the server; the session core never assumes a concrete transport or
//! display backend.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::{Result, VncError};
use crate::protocol::{ClientMessage, Rectangle};

/// Supplies framebuffer content for outgoing `FramebufferUpdate` messages.
///
/// Implementations decide what "changed" means; the session only calls
/// [`FramebufferSource::poll_update`] when a client has an outstanding
/// `FramebufferUpdateRequest` to satisfy. Desktop dimensions and the default
/// pixel format are not sourced here: per the data model (§3) they live on
/// `ServerConfig`, which is the one place a client's `ServerInit` is built
/// from, so a `FramebufferSource` can't silently disagree with it.
#[async_trait]
pub trait FramebufferSource: Send + Sync {
    /// Produces the rectangles to send for a pending update request within
    /// the given region. Returns `None` if nothing has changed and
    /// `incremental` was requested; a non-incremental request should always
    /// produce at least one rectangle covering the requested region.
    async fn poll_update(
        &self,
        x: u16,
        y: u16,
        width: u16,
        height: u16,
        incremental: bool,
    ) -> Option<Vec<Rectangle>>;
}

/// Verifies a VNC Authentication response against the server's configured
/// password(s).
///
/// A session calls [`PasswordProvider::verify`] with the 16-byte challenge
/// it generated and the response the client sent; the default
/// implementation in this crate reads a single password from a file, but an
/// embedder may check against multiple accounts or a remote store instead.
#[async_trait]
pub trait PasswordProvider: Send + Sync {
    /// Returns true if `response` is the correct DES encryption of
    /// `challenge` under this provider's password.
    async fn verify(&self, challenge: &[u8; 16], response: &[u8; 16]) -> bool;
}

/// Default [`PasswordProvider`]: reads a single password from a file on
/// every verification attempt, per §6's "stored password file is read at
/// most once per authentication attempt and not cached across attempts".
///
/// Grounded in `original_source/rfb/utils.go`'s `readServerPasswd`, which
/// reads `$HOME/.rfbpasswd` and trims surrounding whitespace on each call
/// rather than caching the password at startup.
pub struct FilePasswordProvider {
    path: PathBuf,
}

impl FilePasswordProvider {
    /// Reads the password from an explicit path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Reads the password from `$HOME/.rfbpasswd`, the default location per
    /// §6's "Password source".
    pub fn from_home_directory() -> Result<Self> {
        let home = std::env::var("HOME")
            .map_err(|_| VncError::config("HOME environment variable is not set"))?;
        Ok(Self::new(Path::new(&home).join(".rfbpasswd")))
    }
}

#[async_trait]
impl PasswordProvider for FilePasswordProvider {
    async fn verify(&self, challenge: &[u8; 16], response: &[u8; 16]) -> bool {
        match crate::auth::read_password_file(&self.path) {
            Ok(password) => crate::auth::verify(challenge, response, &password),
            Err(err) => {
                log::error!("reading VNC password file {:?}: {err}", self.path);
                false
            }
        }
    }
}

/// Receives keyboard and pointer events forwarded from the Normal phase.
///
/// Default method bodies are no-ops, matching the pattern of optional
/// collaborator hooks: an embedder overrides only the events it cares
/// about.
#[async_trait]
pub trait InputSink: Send + Sync {
    /// A key was pressed or released.
    async fn key_event(&self, _down: bool, _key: u32) {}

    /// The pointer moved or a button's state changed.
    async fn pointer_event(&self, _button_mask: u8, _x: u16, _y: u16) {}
}

/// Receives and supplies clipboard text.
#[async_trait]
pub trait ClipboardSink: Send + Sync {
    /// The client pushed clipboard text to the server.
    async fn client_cut_text(&self, _text: &str) {}
}

/// Convenience no-op input sink for servers that don't forward input.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullInputSink;

#[async_trait]
impl InputSink for NullInputSink {}

/// Convenience no-op clipboard sink for servers that don't forward
/// clipboard text.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullClipboardSink;

#[async_trait]
impl ClipboardSink for NullClipboardSink {}

/// Dispatches a decoded [`ClientMessage`] to the appropriate sink. Kept
/// separate from `session.rs`'s read loop so the dispatch table can be unit
/// tested without a live socket.
pub async fn dispatch_message(
    msg: &ClientMessage,
    input: &dyn InputSink,
    clipboard: &dyn ClipboardSink,
) {
    match msg {
        ClientMessage::KeyEvent { down, key } => input.key_event(*down, *key).await,
        ClientMessage::PointerEvent { button_mask, x, y } => {
            input.pointer_event(*button_mask, *x, *y).await
        }
        ClientMessage::ClientCutText(text) => clipboard.client_cut_text(text).await,
        // SetPixelFormat, SetEncodings, and FramebufferUpdateRequest mutate
        // session-local state and are handled directly by the session's
        // dispatch loop, not forwarded here.
        ClientMessage::SetPixelFormat(_)
        | ClientMessage::SetEncodings(_)
        | ClientMessage::FramebufferUpdateRequest { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    #[derive(Default)]
    struct RecordingSink {
        key_down: AtomicBool,
        key: AtomicU32,
        pointer_x: AtomicU32,
    }

    #[async_trait]
    impl InputSink for RecordingSink {
        async fn key_event(&self, down: bool, key: u32) {
            self.key_down.store(down, Ordering::SeqCst);
            self.key.store(key, Ordering::SeqCst);
        }

        async fn pointer_event(&self, _button_mask: u8, x: u16, _y: u16) {
            self.pointer_x.store(x as u32, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn dispatch_routes_key_event_to_input_sink() {
        let sink = RecordingSink::default();
        let clipboard = NullClipboardSink;
        dispatch_message(
            &ClientMessage::KeyEvent { down: true, key: 42 },
            &sink,
            &clipboard,
        )
        .await;
        assert!(sink.key_down.load(Ordering::SeqCst));
        assert_eq!(sink.key.load(Ordering::SeqCst), 42);
    }

    #[tokio::test]
    async fn dispatch_routes_pointer_event_to_input_sink() {
        let sink = RecordingSink::default();
        let clipboard = NullClipboardSink;
        dispatch_message(
            &ClientMessage::PointerEvent {
                button_mask: 1,
                x: 99,
                y: 1,
            },
            &sink,
            &clipboard,
        )
        .await;
        assert_eq!(sink.pointer_x.load(Ordering::SeqCst), 99);
    }

    #[tokio::test]
    async fn dispatch_ignores_session_local_messages() {
        let sink = NullInputSink;
        let clipboard = NullClipboardSink;
        // Should simply not panic or forward anywhere.
        dispatch_message(
            &ClientMessage::SetEncodings(vec![0]),
            &sink,
            &clipboard,
        )
        .await;
    }

    #[tokio::test]
    async fn file_password_provider_verifies_against_file_contents() {
        let dir = std::env::temp_dir().join(format!(
            "rfb-core-test-passwd-{:?}",
            std::thread::current().id()
        ));
        std::fs::write(&dir, b"  abc  \n").unwrap();
        let provider = FilePasswordProvider::new(&dir);

        let challenge = [0u8; 16];
        let response = crate::auth::encrypt_challenge(&challenge, b"abc");
        assert!(provider.verify(&challenge, &response).await);
        assert!(!provider.verify(&challenge, &[0u8; 16]).await);

        std::fs::remove_file(&dir).unwrap();
    }

    #[tokio::test]
    async fn file_password_provider_fails_closed_on_missing_file() {
        let provider = FilePasswordProvider::new("/nonexistent/path/.rfbpasswd");
        assert!(!provider.verify(&[0u8; 16], &[0u8; 16]).await);
    }
}
