//! Headless VNC server example with animated content and VNC Authentication.
//!
//! Demonstrates a `FramebufferSource` whose content changes over time, and
//! wiring up password-based authentication via a `PasswordProvider`.
//!
//! Usage:
//!   RFB_PASSWORD=test123 cargo run --example headless_server

use std::error::Error;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rfb_core::capabilities::{FilePasswordProvider, FramebufferSource, PasswordProvider};
use rfb_core::protocol::{Rectangle, ENCODING_RAW};
use rfb_core::{ServerConfig, VncServer};
use tokio::time;

const WIDTH: u16 = 640;
const HEIGHT: u16 = 480;

/// Regenerates an animated gradient on every non-incremental poll and on
/// every incremental poll once `frame` has advanced since the last one
/// delivered to that particular client. A production source would instead
/// track per-client dirty regions; this demo keeps it simple by always
/// repainting the whole frame.
struct AnimatedFramebuffer {
    frame: AtomicU32,
}

impl AnimatedFramebuffer {
    fn new() -> Self {
        Self {
            frame: AtomicU32::new(0),
        }
    }

    fn tick(&self) {
        self.frame.fetch_add(1, Ordering::Relaxed);
    }

    fn render(&self) -> Vec<u8> {
        let frame = self.frame.load(Ordering::Relaxed);
        let mut pixels = vec![0u8; WIDTH as usize * HEIGHT as usize * 4];
        for y in 0..HEIGHT as u32 {
            for x in 0..WIDTH as u32 {
                let offset = ((y * WIDTH as u32 + x) * 4) as usize;
                pixels[offset] = ((x + frame) % 256) as u8;
                pixels[offset + 1] = ((y + frame) % 256) as u8;
                pixels[offset + 2] = ((frame / 2) % 256) as u8;
                pixels[offset + 3] = 255;
            }
        }
        pixels
    }
}

#[async_trait]
impl FramebufferSource for AnimatedFramebuffer {
    async fn poll_update(
        &self,
        x: u16,
        y: u16,
        width: u16,
        height: u16,
        _incremental: bool,
    ) -> Option<Vec<Rectangle>> {
        Some(vec![Rectangle {
            x,
            y,
            width,
            height,
            encoding: ENCODING_RAW,
            data: self.render(),
        }])
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    println!("Starting headless VNC server on port 5900...");
    println!("Connect with: vncviewer localhost:5900");
    println!("Password: set via RFB_PASSWORD, defaults to \"test123\"");

    // Write the demo password to a scratch file so `FilePasswordProvider`
    // (the default collaborator, reading `$HOME/.rfbpasswd` in production)
    // can be pointed at it without touching the real home directory.
    let password = std::env::var("RFB_PASSWORD").unwrap_or_else(|_| "test123".to_string());
    let password_path = std::env::temp_dir().join("rfb-core-headless-demo.rfbpasswd");
    std::fs::write(&password_path, &password)?;
    let password_provider: Arc<dyn PasswordProvider> =
        Arc::new(FilePasswordProvider::new(password_path));

    let framebuffer = Arc::new(AnimatedFramebuffer::new());
    let config = ServerConfig::new(WIDTH, HEIGHT, framebuffer.clone())
        .with_desktop_name("rfb-core headless server")
        .with_password_provider(password_provider);

    let server = VncServer::new(config)?;
    let server_for_serve = server.clone();
    tokio::spawn(async move {
        if let Err(e) = server_for_serve.serve().await {
            eprintln!("server error: {e}");
        }
    });

    println!("Server started, animating framebuffer. Press Ctrl+C to stop.");
    let mut ticker = time::interval(Duration::from_millis(33));
    loop {
        ticker.tick().await;
        framebuffer.tick();
    }
}
