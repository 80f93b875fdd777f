//! Session configuration.
//!
//! The host application owns its window system, audio sinks and input
//! capture; this crate only calls back into it. Each optional channel
//! has its own option group with an `enable` switch, an `auto_connect`
//! switch (the channel is brought up as soon as the server advertises
//! it) and the callbacks that channel requires.
//!
//! All callbacks are invoked synchronously from [`process`]; they must
//! not re-enter `connect`, `disconnect` or `process`, but they may call
//! the outbound APIs (keyboard, mouse, clipboard, audio write).
//!
//! [`process`]: crate::SpiceSession::process

use crate::error::{Result, SpiceError};
use crate::protocol::{AudioFormat, BitmapFormat, DataType, SurfaceFormat};

pub type ReadyFn = Box<dyn Fn() + Send + Sync>;

pub type ClipboardNoticeFn = Box<dyn Fn(DataType) + Send + Sync>;
pub type ClipboardDataFn = Box<dyn Fn(DataType, &[u8]) + Send + Sync>;
pub type ClipboardReleaseFn = Box<dyn Fn() + Send + Sync>;
pub type ClipboardRequestFn = Box<dyn Fn(DataType) + Send + Sync>;

pub type PlaybackStartFn = Box<dyn Fn(u32, u32, AudioFormat, u32) + Send + Sync>;
pub type PlaybackDataFn = Box<dyn Fn(&[u8]) + Send + Sync>;
pub type RecordStartFn = Box<dyn Fn(u32, u32, AudioFormat) + Send + Sync>;
pub type VolumeFn = Box<dyn Fn(&[u16]) + Send + Sync>;
pub type MuteFn = Box<dyn Fn(bool) + Send + Sync>;
pub type StopFn = Box<dyn Fn() + Send + Sync>;

pub type SurfaceCreateFn = Box<dyn Fn(u32, SurfaceFormat, u32, u32) + Send + Sync>;
pub type SurfaceDestroyFn = Box<dyn Fn(u32) + Send + Sync>;
pub type DrawFillFn = Box<dyn Fn(u32, i32, i32, i32, i32, u32) + Send + Sync>;
pub type DrawBitmapFn = Box<dyn Fn(BitmapDraw<'_>) + Send + Sync>;

pub type CursorRgbaFn = Box<dyn Fn(u16, u16, u16, u16, &[u8]) + Send + Sync>;
pub type CursorMonoFn = Box<dyn Fn(u16, u16, u16, u16, &[u8], &[u8]) + Send + Sync>;
pub type CursorStateFn = Box<dyn Fn(bool, i16, i16) + Send + Sync>;
pub type CursorTrailFn = Box<dyn Fn(u16, u16) + Send + Sync>;

/// One decoded bitmap draw operation, delivered to the display
/// `draw_bitmap` callback. Pixel data is valid for the duration of the
/// callback only.
pub struct BitmapDraw<'a> {
    pub surface_id: u32,
    pub format: BitmapFormat,
    pub top_down: bool,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub data: &'a [u8],
}

#[derive(Default)]
pub struct InputsConfig {
    pub enable: bool,
    pub auto_connect: bool,
}

#[derive(Default)]
pub struct ClipboardConfig {
    pub enable: bool,
    /// The agent advertised clipboard data of the given type.
    pub notice: Option<ClipboardNoticeFn>,
    /// A previously requested clipboard payload arrived in full.
    pub data: Option<ClipboardDataFn>,
    /// The agent no longer has clipboard data.
    pub release: Option<ClipboardReleaseFn>,
    /// The agent asks for our clipboard data of the given type.
    pub request: Option<ClipboardRequestFn>,
}

#[derive(Default)]
pub struct PlaybackConfig {
    pub enable: bool,
    pub auto_connect: bool,
    /// Stream opened: (channels, sample rate, format, media time).
    pub start: Option<PlaybackStartFn>,
    pub volume: Option<VolumeFn>,
    pub mute: Option<MuteFn>,
    pub stop: Option<StopFn>,
    pub data: Option<PlaybackDataFn>,
}

#[derive(Default)]
pub struct RecordConfig {
    pub enable: bool,
    pub auto_connect: bool,
    /// Stream opened: (channels, sample rate, format).
    pub start: Option<RecordStartFn>,
    pub volume: Option<VolumeFn>,
    pub mute: Option<MuteFn>,
    pub stop: Option<StopFn>,
}

#[derive(Default)]
pub struct DisplayConfig {
    pub enable: bool,
    pub auto_connect: bool,
    pub surface_create: Option<SurfaceCreateFn>,
    pub surface_destroy: Option<SurfaceDestroyFn>,
    pub draw_bitmap: Option<DrawBitmapFn>,
    pub draw_fill: Option<DrawFillFn>,
}

#[derive(Default)]
pub struct CursorConfig {
    pub enable: bool,
    pub auto_connect: bool,
    /// Cursor image changed to an RGBA bitmap: (w, h, hot x, hot y, data).
    pub set_rgba_image: Option<CursorRgbaFn>,
    /// Cursor image changed to a monochrome bitmap:
    /// (w, h, hot x, hot y, and mask, xor mask).
    pub set_mono_image: Option<CursorMonoFn>,
    /// Cursor visibility or position changed.
    pub set_state: Option<CursorStateFn>,
    pub set_trail: Option<CursorTrailFn>,
}

/// Everything a session needs to connect: address, credential, the
/// `ready` callback and the per-channel option groups.
#[derive(Default)]
pub struct SpiceConfig {
    /// IPv4 literal, or a Unix socket path when `port` is zero.
    pub host: String,
    pub port: u16,
    pub password: String,
    /// Fired once when the session is fully up: the channels list is in
    /// and, if the server advertises them, its name and UUID arrived.
    pub ready: Option<ReadyFn>,
    pub inputs: InputsConfig,
    pub clipboard: ClipboardConfig,
    pub playback: PlaybackConfig,
    pub record: RecordConfig,
    pub display: DisplayConfig,
    pub cursor: CursorConfig,
}

impl SpiceConfig {
    /// Reject configurations that enable a channel but omit one of its
    /// mandatory callbacks, before any socket is opened.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(SpiceError::Config("host must not be empty".into()));
        }

        if self.clipboard.enable {
            let c = &self.clipboard;
            if c.notice.is_none() || c.data.is_none() || c.release.is_none() || c.request.is_none()
            {
                return Err(SpiceError::Config(
                    "clipboard requires notice, data, release and request callbacks".into(),
                ));
            }
        }

        if self.playback.enable {
            let p = &self.playback;
            if p.start.is_none() || p.stop.is_none() || p.data.is_none() {
                return Err(SpiceError::Config(
                    "playback requires start, stop and data callbacks".into(),
                ));
            }
        }

        if self.record.enable {
            let r = &self.record;
            if r.start.is_none() || r.stop.is_none() {
                return Err(SpiceError::Config(
                    "record requires start and stop callbacks".into(),
                ));
            }
        }

        if self.display.enable {
            let d = &self.display;
            if d.surface_create.is_none()
                || d.surface_destroy.is_none()
                || d.draw_bitmap.is_none()
                || d.draw_fill.is_none()
            {
                return Err(SpiceError::Config(
                    "display requires surface_create, surface_destroy, draw_bitmap and draw_fill callbacks"
                        .into(),
                ));
            }
        }

        if self.cursor.enable {
            let c = &self.cursor;
            if c.set_rgba_image.is_none() || c.set_state.is_none() {
                return Err(SpiceError::Config(
                    "cursor requires set_rgba_image and set_state callbacks".into(),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_host_is_rejected() {
        let config = SpiceConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn enabled_display_without_callbacks_is_rejected() {
        let config = SpiceConfig {
            host: "127.0.0.1".into(),
            port: 5900,
            display: DisplayConfig {
                enable: true,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn disabled_channels_need_no_callbacks() {
        let config = SpiceConfig {
            host: "127.0.0.1".into(),
            port: 5900,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }
}
