//! Server configuration surface.
//!
//! A plain struct with a constructor and builder-style setters, matching the
//! teacher crate's `VncServer::new(width, height)` + `set_password` pattern
//! rather than a file-driven config crate: the teacher has no `serde`/
//! `config` dependency, and this surface is populated programmatically by
//! the embedding application.

use std::sync::Arc;
use std::time::Duration;

use crate::capabilities::{
    ClipboardSink, FramebufferSource, InputSink, NullClipboardSink, NullInputSink,
    PasswordProvider,
};
use crate::error::{Result, VncError};
use crate::events::{EventSink, NullEventSink};
use crate::protocol::{PixelFormat, SECURITY_TYPE_NONE, SECURITY_TYPE_VNC_AUTH};
use crate::DEFAULT_PORT;

/// Idle timeout applied to each handshake phase (§5: "recommended: 30s per
/// phase"). Normal phase runs indefinitely once reached.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// A security type the server is willing to offer, in priority order.
pub type SecurityType = u8;

/// Process-wide, immutable-after-start server configuration.
///
/// Construct with [`ServerConfig::new`], then wire in collaborators with the
/// builder setters before handing the config to a server registry.
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to listen on, e.g. `"0.0.0.0:5900"`.
    pub listen_address: String,
    /// Protocol major version offered (always 3).
    pub major: u8,
    /// Protocol minor version offered (3, 7, or 8).
    pub minor: u8,
    /// Human-readable desktop name sent in `ServerInit`.
    pub desktop_name: String,
    /// Framebuffer width in pixels.
    pub desktop_width: u16,
    /// Framebuffer height in pixels.
    pub desktop_height: u16,
    /// Default pixel format sent in `ServerInit`.
    pub default_pixel_format: PixelFormat,
    /// Security types offered, in priority order. MUST NOT be empty and
    /// MUST NOT contain `SECURITY_TYPE_INVALID`.
    pub offered_security_types: Vec<SecurityType>,
    /// Idle timeout applied to each handshake phase.
    pub handshake_timeout: Duration,
    /// Supplies framebuffer content for `FramebufferUpdate` messages.
    pub framebuffer_source: Arc<dyn FramebufferSource>,
    /// Verifies VNC Authentication responses. `None` if only
    /// `SECURITY_TYPE_NONE` is offered.
    pub password_provider: Option<Arc<dyn PasswordProvider>>,
    /// Receives forwarded keyboard/pointer events.
    pub input_sink: Arc<dyn InputSink>,
    /// Receives forwarded clipboard text.
    pub clipboard_sink: Arc<dyn ClipboardSink>,
    /// Receives structured [`crate::events::ServerEvent`]s as sessions
    /// progress through the handshake and Normal phase.
    pub event_sink: Arc<dyn EventSink>,
}

impl ServerConfig {
    /// Builds a configuration offering only `SECURITY_TYPE_NONE`, listening
    /// on the default port, with no-op input/clipboard sinks. Use the
    /// builder setters to add authentication or wire real sinks.
    pub fn new(
        desktop_width: u16,
        desktop_height: u16,
        framebuffer_source: Arc<dyn FramebufferSource>,
    ) -> Self {
        Self {
            listen_address: format!("0.0.0.0:{DEFAULT_PORT}"),
            major: 3,
            minor: 8,
            desktop_name: "RFB Server".to_string(),
            desktop_width,
            desktop_height,
            default_pixel_format: PixelFormat::rgba32(),
            offered_security_types: vec![SECURITY_TYPE_NONE],
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            framebuffer_source,
            password_provider: None,
            input_sink: Arc::new(NullInputSink),
            clipboard_sink: Arc::new(NullClipboardSink),
            event_sink: Arc::new(NullEventSink),
        }
    }

    /// Sets the listen address.
    #[must_use]
    pub fn with_listen_address(mut self, addr: impl Into<String>) -> Self {
        self.listen_address = addr.into();
        self
    }

    /// Sets the desktop name reported in `ServerInit`.
    #[must_use]
    pub fn with_desktop_name(mut self, name: impl Into<String>) -> Self {
        self.desktop_name = name.into();
        self
    }

    /// Enables VNC Authentication with the given provider, offering it
    /// ahead of `None` in the security-type list.
    #[must_use]
    pub fn with_password_provider(mut self, provider: Arc<dyn PasswordProvider>) -> Self {
        self.password_provider = Some(provider);
        if !self
            .offered_security_types
            .contains(&SECURITY_TYPE_VNC_AUTH)
        {
            self.offered_security_types
                .insert(0, SECURITY_TYPE_VNC_AUTH);
        }
        self
    }

    /// Restricts negotiation to exactly these security types, in priority
    /// order.
    #[must_use]
    pub fn with_security_types(mut self, types: Vec<SecurityType>) -> Self {
        self.offered_security_types = types;
        self
    }

    /// Sets the input sink that receives forwarded keyboard/pointer events.
    #[must_use]
    pub fn with_input_sink(mut self, sink: Arc<dyn InputSink>) -> Self {
        self.input_sink = sink;
        self
    }

    /// Sets the clipboard sink that receives forwarded clipboard text.
    #[must_use]
    pub fn with_clipboard_sink(mut self, sink: Arc<dyn ClipboardSink>) -> Self {
        self.clipboard_sink = sink;
        self
    }

    /// Sets the per-phase handshake idle timeout.
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Sets the sink that receives structured [`crate::events::ServerEvent`]s.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Validates the configuration invariants from the Data Model: the
    /// security type list is non-empty, excludes `Invalid`, and the default
    /// pixel format is well-formed.
    pub fn validate(&self) -> Result<()> {
        if self.offered_security_types.is_empty() {
            return Err(VncError::config("offered_security_types must not be empty"));
        }
        if self
            .offered_security_types
            .contains(&crate::protocol::SECURITY_TYPE_INVALID)
        {
            return Err(VncError::config(
                "offered_security_types must not contain SECURITY_TYPE_INVALID",
            ));
        }
        if !self.default_pixel_format.is_valid() {
            return Err(VncError::config("default_pixel_format is not valid"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Rectangle;
    use async_trait::async_trait;

    struct DummyFramebuffer;

    #[async_trait]
    impl FramebufferSource for DummyFramebuffer {
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

    fn base_config() -> ServerConfig {
        ServerConfig::new(800, 600, Arc::new(DummyFramebuffer))
    }

    #[test]
    fn default_offers_only_none_security_type() {
        let cfg = base_config();
        assert_eq!(cfg.offered_security_types, vec![SECURITY_TYPE_NONE]);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn with_password_provider_prepends_vnc_auth() {
        struct AlwaysOk;
        #[async_trait]
        impl PasswordProvider for AlwaysOk {
            async fn verify(&self, _c: &[u8; 16], _r: &[u8; 16]) -> bool {
                true
            }
        }
        let cfg = base_config().with_password_provider(Arc::new(AlwaysOk));
        assert_eq!(
            cfg.offered_security_types,
            vec![SECURITY_TYPE_VNC_AUTH, SECURITY_TYPE_NONE]
        );
    }

    #[test]
    fn empty_security_types_fails_validation() {
        let cfg = base_config().with_security_types(vec![]);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn invalid_security_type_fails_validation() {
        let cfg = base_config().with_security_types(vec![crate::protocol::SECURITY_TYPE_INVALID]);
        assert!(cfg.validate().is_err());
    }
}
