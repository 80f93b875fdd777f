//! Per-channel state and the polymorphic channel table.
//!
//! Every SPICE channel is an independent socket with its own link
//! handshake, ordering rules and ack window, yet all of them share one
//! poller, one credential and the same 6-byte framing. The shared
//! runtime lives in [`connection`]; the kind-specific connect packets
//! and message handlers live in the sibling modules and are selected by
//! matching on [`ChannelKind`].

pub mod connection;
pub mod cursor;
pub mod display;
pub mod inputs;
pub mod main;
pub mod playback;
pub mod record;

#[cfg(test)]
mod tests;

use crate::error::SpiceError;
use crate::protocol::*;
use crate::transport::{TransportReader, TransportWriter};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::sync::Mutex;

/// Mouse buttons understood by the inputs channel. Wheel events are
/// press/release pairs like any other button but carry no bit in the
/// shared button mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Middle,
    Right,
    WheelUp,
    WheelDown,
    Side,
    Extra,
}

impl MouseButton {
    pub(crate) fn code(self) -> u8 {
        match self {
            MouseButton::Left => SPICE_MOUSE_BUTTON_LEFT,
            MouseButton::Middle => SPICE_MOUSE_BUTTON_MIDDLE,
            MouseButton::Right => SPICE_MOUSE_BUTTON_RIGHT,
            MouseButton::WheelUp => SPICE_MOUSE_BUTTON_UP,
            MouseButton::WheelDown => SPICE_MOUSE_BUTTON_DOWN,
            MouseButton::Side => SPICE_MOUSE_BUTTON_SIDE,
            MouseButton::Extra => SPICE_MOUSE_BUTTON_EXTRA,
        }
    }

    pub(crate) fn mask(self) -> u16 {
        match self {
            MouseButton::Left => SPICE_MOUSE_BUTTON_MASK_LEFT,
            MouseButton::Middle => SPICE_MOUSE_BUTTON_MASK_MIDDLE,
            MouseButton::Right => SPICE_MOUSE_BUTTON_MASK_RIGHT,
            MouseButton::Side => SPICE_MOUSE_BUTTON_MASK_SIDE,
            MouseButton::Extra => SPICE_MOUSE_BUTTON_MASK_EXTRA,
            MouseButton::WheelUp | MouseButton::WheelDown => 0,
        }
    }
}

/// Shared, lock-free view of one channel's lifecycle. The write half of
/// the socket sits behind an async mutex that doubles as the send lock:
/// holding it for the duration of one packet (or one burst) keeps
/// outbound packets atomic relative to each other.
pub(crate) struct ChannelSlot {
    pub kind: ChannelKind,
    /// Server advertised the channel in the channels-list message.
    pub available: AtomicBool,
    pub connected: AtomicBool,
    /// True only between a successful link handshake and shutdown;
    /// packet sends check this.
    pub ready: AtomicBool,
    pub init_done: AtomicBool,
    /// Teardown requested from a callback or the application; honored at
    /// the start of the next `process` tick to avoid re-entering a
    /// handler that is still executing.
    pub pending_disconnect: AtomicBool,
    /// Server-requested ack window; zero suppresses acks.
    pub ack_window: AtomicU32,
    pub ack_count: AtomicU32,
    pub writer: Mutex<Option<Box<dyn TransportWriter>>>,
}

impl ChannelSlot {
    pub fn new(kind: ChannelKind) -> Self {
        Self {
            kind,
            available: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            ready: AtomicBool::new(false),
            init_done: AtomicBool::new(false),
            pending_disconnect: AtomicBool::new(false),
            ack_window: AtomicU32::new(0),
            ack_count: AtomicU32::new(0),
            writer: Mutex::new(None),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Reset per-connection state before a fresh handshake.
    pub fn reset(&self) {
        self.init_done.store(false, Ordering::Release);
        self.pending_disconnect.store(false, Ordering::Release);
        self.ack_window.store(0, Ordering::Release);
        self.ack_count.store(0, Ordering::Release);
    }
}

/// Read half of a connected channel plus its reusable payload buffer.
pub(crate) struct ChannelReader {
    pub transport: Box<dyn TransportReader>,
    pub payload: Vec<u8>,
}

impl ChannelReader {
    pub fn new(transport: Box<dyn TransportReader>) -> Self {
        Self {
            transport,
            payload: Vec::new(),
        }
    }
}

/// All receive-side state. Owned by `process` behind a single async
/// mutex; handlers get `&mut` access so the main channel can install
/// readers for newly connected channels and the cursor channel can keep
/// its image cache here.
pub(crate) struct RecvState {
    pub readers: [Option<ChannelReader>; CHANNEL_COUNT],
    pub cursor: cursor::CursorState,
}

impl RecvState {
    pub fn new() -> Self {
        Self {
            readers: std::array::from_fn(|_| None),
            cursor: cursor::CursorState::new(),
        }
    }
}

/// How a per-message handler failed.
pub(crate) enum ChannelError {
    /// Orderly EOF: close this channel without tearing down the session.
    NoData,
    Fatal(SpiceError),
}

pub(crate) type ChannelResult<T> = std::result::Result<T, ChannelError>;

impl From<SpiceError> for ChannelError {
    fn from(err: SpiceError) -> Self {
        ChannelError::Fatal(err)
    }
}

impl From<io::Error> for ChannelError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            ChannelError::NoData
        } else {
            ChannelError::Fatal(SpiceError::Io(err))
        }
    }
}
