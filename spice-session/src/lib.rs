//! # spice-session
//!
//! An embeddable client for the SPICE remote-desktop protocol, written
//! for applications that own their window system, audio stack and input
//! capture. The crate speaks the multi-channel protocol engine only:
//! channel lifecycle and link handshake, the framed message loop with
//! per-channel flow control, the guest-agent sub-protocol used for the
//! clipboard, and the shared back-pressure machinery. Rendering,
//! compressed image decoding and video codecs are intentionally out of
//! scope; uncompressed bitmaps, solid fills, cursor shapes, audio and
//! clipboard data are delivered to the application through callbacks.
//!
//! Connections are local by design (TCP to a LAN/localhost address or a
//! Unix domain socket); there is no transport encryption and a dropped
//! connection ends the session.
//!
//! ## Example
//!
//! ```no_run
//! use spice_session::{SpiceConfig, SpiceSession, Status};
//! use std::time::Duration;
//!
//! # async fn example() -> spice_session::Result<()> {
//! let config = SpiceConfig {
//!     host: "127.0.0.1".into(),
//!     port: 5900,
//!     password: "".into(),
//!     ..Default::default()
//! };
//!
//! let session = SpiceSession::connect(config).await?;
//! loop {
//!     match session.process(Duration::from_millis(10)).await {
//!         Status::Run => continue,
//!         Status::Shutdown => break,
//!         status => {
//!             session.disconnect().await;
//!             eprintln!("session failed: {status:?}");
//!             break;
//!         }
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod agent;
pub mod channels;
pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod transport;
mod wire_format;

pub use channels::MouseButton;
pub use client::{ServerInfo, SpiceSession, Status};
pub use config::{BitmapDraw, SpiceConfig};
pub use error::{Result, SpiceError};
pub use protocol::{AudioFormat, BitmapFormat, ChannelKind, DataType, SurfaceFormat};

use std::sync::Once;

/// Install a default `tracing` subscriber that prints file and line
/// information, for applications that do not bring their own.
/// Idempotent; repeated calls are no-ops.
pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_file(true)
            .with_line_number(true)
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .try_init();
    });
}
