// Copyright 2025 Dustin McAfee
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # rfb-core
//!
//! The server side of the Remote Framebuffer (RFB/VNC) wire protocol,
//! versions 3.3 / 3.7 / 3.8 (RFC 6143). For each accepted TCP connection
//! this crate negotiates a protocol version, performs security-type
//! negotiation and authentication (including the VNC DES challenge/
//! response), completes the init exchange, and then runs the steady-state
//! message loop, dispatching every client-to-server message RFB defines and
//! emitting server-to-client messages as the surrounding framebuffer source
//! demands.
//!
//! This is a protocol *core*, not a complete VNC server binary. It consumes
//! four collaborator capabilities ([`capabilities::FramebufferSource`],
//! [`capabilities::PasswordProvider`], [`capabilities::InputSink`],
//! [`capabilities::ClipboardSink`]) that an embedding application supplies;
//! rendering, screen capture, and password storage are out of scope.
//! Likewise, the core records which encodings a client advertises but does
//! not implement any pixel compression scheme beyond identifying Raw.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use async_trait::async_trait;
//! use rfb_core::capabilities::FramebufferSource;
//! use rfb_core::protocol::{Rectangle, ENCODING_RAW};
//! use rfb_core::{ServerConfig, VncServer};
//!
//! struct StaticFramebuffer {
//!     pixels: Vec<u8>,
//! }
//!
//! #[async_trait]
//! impl FramebufferSource for StaticFramebuffer {
//!     async fn poll_update(
//!         &self,
//!         x: u16,
//!         y: u16,
//!         width: u16,
//!         height: u16,
//!         incremental: bool,
//!     ) -> Option<Vec<Rectangle>> {
//!         if incremental {
//!             return None;
//!         }
//!         Some(vec![Rectangle { x, y, width, height, encoding: ENCODING_RAW, data: self.pixels.clone() }])
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let framebuffer = Arc::new(StaticFramebuffer {
//!     pixels: vec![0u8; 800 * 600 * 4],
//! });
//! let config = ServerConfig::new(800, 600, framebuffer).with_listen_address("127.0.0.1:5900");
//! let server = VncServer::new(config)?;
//!
//! let server_for_shutdown = server.clone();
//! tokio::spawn(async move {
//!     tokio::time::sleep(Duration::from_secs(5)).await;
//!     let _ = server_for_shutdown.shutdown(Duration::from_secs(1)).await;
//! });
//! server.serve().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod capabilities;
pub mod config;
pub mod error;
pub mod events;
pub mod protocol;
mod registry;
mod server;
mod session;

// Internal helpers not part of the public API surface.
mod auth;
mod wire;

pub use config::ServerConfig;
pub use error::{Result, VncError};
pub use events::ServerEvent;
pub use server::VncServer;

/// VNC protocol version this crate offers by default.
pub const PROTOCOL_VERSION: &str = "RFB 003.008\n";

/// Default VNC port (RFC 6143 §3.1 reserves 5900 + display number; display
/// `0` maps to 5900).
pub const DEFAULT_PORT: u16 = 5900;
