//! Simple VNC server example.
//!
//! Serves a static gradient test pattern and accepts unauthenticated
//! connections.
//!
//! Usage:
//!   cargo run --example simple_server
//!
//! Then connect with a VNC viewer to localhost:5900.

use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use rfb_core::capabilities::FramebufferSource;
use rfb_core::protocol::{Rectangle, ENCODING_RAW};
use rfb_core::{ServerConfig, VncServer};

const WIDTH: u16 = 800;
const HEIGHT: u16 = 600;

/// A framebuffer that never changes after construction: every
/// non-incremental request gets the whole gradient; every incremental
/// request gets nothing, since nothing ever changes.
struct GradientFramebuffer {
    pixels: Vec<u8>,
}

impl GradientFramebuffer {
    fn new() -> Self {
        let mut pixels = vec![0u8; WIDTH as usize * HEIGHT as usize * 4];
        for y in 0..HEIGHT as usize {
            for x in 0..WIDTH as usize {
                let offset = (y * WIDTH as usize + x) * 4;
                pixels[offset] = (x * 255 / WIDTH as usize) as u8; // R
                pixels[offset + 1] = (y * 255 / HEIGHT as usize) as u8; // G
                pixels[offset + 2] = 128; // B
                pixels[offset + 3] = 255; // A
            }
        }
        Self { pixels }
    }
}

#[async_trait]
impl FramebufferSource for GradientFramebuffer {
    async fn poll_update(
        &self,
        x: u16,
        y: u16,
        width: u16,
        height: u16,
        incremental: bool,
    ) -> Option<Vec<Rectangle>> {
        if incremental {
            return None;
        }
        Some(vec![Rectangle {
            x,
            y,
            width,
            height,
            encoding: ENCODING_RAW,
            data: self.pixels.clone(),
        }])
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    println!("Starting VNC server on port 5900...");
    println!("Connect with: vncviewer localhost:5900");

    let framebuffer = Arc::new(GradientFramebuffer::new());
    let config = ServerConfig::new(WIDTH, HEIGHT, framebuffer)
        .with_desktop_name("rfb-core simple server");

    let server = VncServer::new(config)?;
    println!("Server ready for connections");
    server.serve().await?;

    Ok(())
}
