//! SPICE wire protocol definitions.
//!
//! Constants and fixed-layout message structures for the subset of the
//! SPICE 2.2 protocol this crate speaks: the link handshake, the 6-byte
//! mini header framing, the common message set and the per-channel
//! messages for main, inputs, playback, record, display and cursor.
//!
//! All structures are little-endian on the wire and serialized with
//! [`binrw`] so the byte layout is explicit and free of Rust struct
//! padding.

use binrw::{BinRead, BinWrite};

pub const SPICE_MAGIC: u32 = 0x51444552; // "REDQ"
pub const SPICE_VERSION_MAJOR: u32 = 2;
pub const SPICE_VERSION_MINOR: u32 = 2;

// Link stage error codes.
pub const SPICE_LINK_ERR_OK: u32 = 0;

/// Human readable name for a link error code, for log output.
pub fn link_err_name(code: u32) -> &'static str {
    match code {
        0 => "SPICE_LINK_ERR_OK",
        1 => "SPICE_LINK_ERR_ERROR",
        2 => "SPICE_LINK_ERR_INVALID_MAGIC",
        3 => "SPICE_LINK_ERR_INVALID_DATA",
        4 => "SPICE_LINK_ERR_VERSION_MISMATCH",
        5 => "SPICE_LINK_ERR_NEED_SECURED",
        6 => "SPICE_LINK_ERR_NEED_UNSECURED",
        7 => "SPICE_LINK_ERR_PERMISSION_DENIED",
        8 => "SPICE_LINK_ERR_BAD_CONNECTION_ID",
        9 => "SPICE_LINK_ERR_CHANNEL_NOT_AVAILABLE",
        _ => "UNKNOWN_ERROR",
    }
}

// Messages shared by every channel. Anything below `SPICE_MSG_BASE_LAST`
// is owned by the common handler.
pub const SPICE_MSG_MIGRATE: u16 = 1;
pub const SPICE_MSG_MIGRATE_DATA: u16 = 2;
pub const SPICE_MSG_SET_ACK: u16 = 3;
pub const SPICE_MSG_PING: u16 = 4;
pub const SPICE_MSG_WAIT_FOR_CHANNELS: u16 = 5;
pub const SPICE_MSG_DISCONNECTING: u16 = 6;
pub const SPICE_MSG_NOTIFY: u16 = 7;
pub const SPICE_MSG_BASE_LAST: u16 = 101;

pub const SPICE_MSGC_ACK_SYNC: u16 = 1;
pub const SPICE_MSGC_ACK: u16 = 2;
pub const SPICE_MSGC_PONG: u16 = 3;
pub const SPICE_MSGC_DISCONNECTING: u16 = 6;

// Main channel, server to client.
pub const SPICE_MSG_MAIN_INIT: u16 = 103;
pub const SPICE_MSG_MAIN_CHANNELS_LIST: u16 = 104;
pub const SPICE_MSG_MAIN_MOUSE_MODE: u16 = 105;
pub const SPICE_MSG_MAIN_MULTI_MEDIA_TIME: u16 = 106;
pub const SPICE_MSG_MAIN_AGENT_CONNECTED: u16 = 107;
pub const SPICE_MSG_MAIN_AGENT_DISCONNECTED: u16 = 108;
pub const SPICE_MSG_MAIN_AGENT_DATA: u16 = 109;
pub const SPICE_MSG_MAIN_AGENT_TOKEN: u16 = 110;
pub const SPICE_MSG_MAIN_NAME: u16 = 113;
pub const SPICE_MSG_MAIN_UUID: u16 = 114;
pub const SPICE_MSG_MAIN_AGENT_CONNECTED_TOKENS: u16 = 115;

// Main channel, client to server.
pub const SPICE_MSGC_MAIN_ATTACH_CHANNELS: u16 = 104;
pub const SPICE_MSGC_MAIN_MOUSE_MODE_REQUEST: u16 = 105;
pub const SPICE_MSGC_MAIN_AGENT_START: u16 = 106;
pub const SPICE_MSGC_MAIN_AGENT_DATA: u16 = 107;
pub const SPICE_MSGC_MAIN_AGENT_TOKEN: u16 = 108;

// Inputs channel.
pub const SPICE_MSG_INPUTS_INIT: u16 = 101;
pub const SPICE_MSG_INPUTS_KEY_MODIFIERS: u16 = 102;
pub const SPICE_MSG_INPUTS_MOUSE_MOTION_ACK: u16 = 111;

pub const SPICE_MSGC_INPUTS_KEY_DOWN: u16 = 101;
pub const SPICE_MSGC_INPUTS_KEY_UP: u16 = 102;
pub const SPICE_MSGC_INPUTS_KEY_MODIFIERS: u16 = 103;
pub const SPICE_MSGC_INPUTS_MOUSE_MOTION: u16 = 111;
pub const SPICE_MSGC_INPUTS_MOUSE_POSITION: u16 = 112;
pub const SPICE_MSGC_INPUTS_MOUSE_PRESS: u16 = 113;
pub const SPICE_MSGC_INPUTS_MOUSE_RELEASE: u16 = 114;

/// The server acknowledges mouse motion in fixed bunches of this size.
pub const SPICE_INPUT_MOTION_ACK_BUNCH: i32 = 16;

pub const SPICE_MOUSE_MODE_SERVER: u32 = 1;
pub const SPICE_MOUSE_MODE_CLIENT: u32 = 2;

pub const SPICE_MOUSE_BUTTON_LEFT: u8 = 1;
pub const SPICE_MOUSE_BUTTON_MIDDLE: u8 = 2;
pub const SPICE_MOUSE_BUTTON_RIGHT: u8 = 3;
pub const SPICE_MOUSE_BUTTON_UP: u8 = 4;
pub const SPICE_MOUSE_BUTTON_DOWN: u8 = 5;
pub const SPICE_MOUSE_BUTTON_SIDE: u8 = 6;
pub const SPICE_MOUSE_BUTTON_EXTRA: u8 = 7;

pub const SPICE_MOUSE_BUTTON_MASK_LEFT: u16 = 1 << 0;
pub const SPICE_MOUSE_BUTTON_MASK_MIDDLE: u16 = 1 << 1;
pub const SPICE_MOUSE_BUTTON_MASK_RIGHT: u16 = 1 << 2;
pub const SPICE_MOUSE_BUTTON_MASK_SIDE: u16 = 1 << 5;
pub const SPICE_MOUSE_BUTTON_MASK_EXTRA: u16 = 1 << 6;

// Playback channel.
pub const SPICE_MSG_PLAYBACK_DATA: u16 = 101;
pub const SPICE_MSG_PLAYBACK_MODE: u16 = 102;
pub const SPICE_MSG_PLAYBACK_START: u16 = 103;
pub const SPICE_MSG_PLAYBACK_STOP: u16 = 104;
pub const SPICE_MSG_PLAYBACK_VOLUME: u16 = 105;
pub const SPICE_MSG_PLAYBACK_MUTE: u16 = 106;

// Record channel.
pub const SPICE_MSG_RECORD_START: u16 = 101;
pub const SPICE_MSG_RECORD_STOP: u16 = 102;
pub const SPICE_MSG_RECORD_VOLUME: u16 = 103;
pub const SPICE_MSG_RECORD_MUTE: u16 = 104;

pub const SPICE_MSGC_RECORD_DATA: u16 = 101;

pub const SPICE_AUDIO_FMT_S16: u16 = 1;

// Display channel.
pub const SPICE_MSG_DISPLAY_DRAW_FILL: u16 = 302;
pub const SPICE_MSG_DISPLAY_DRAW_COPY: u16 = 304;
pub const SPICE_MSG_DISPLAY_SURFACE_CREATE: u16 = 314;
pub const SPICE_MSG_DISPLAY_SURFACE_DESTROY: u16 = 315;

pub const SPICE_MSGC_DISPLAY_INIT: u16 = 101;
pub const SPICE_MSGC_DISPLAY_PREFERRED_COMPRESSION: u16 = 103;

pub const SPICE_IMAGE_COMPRESSION_OFF: u8 = 1;

pub const SPICE_CLIP_TYPE_NONE: u8 = 0;
pub const SPICE_CLIP_TYPE_RECTS: u8 = 1;

pub const SPICE_BRUSH_TYPE_NONE: u8 = 0;
pub const SPICE_BRUSH_TYPE_SOLID: u8 = 1;
pub const SPICE_BRUSH_TYPE_PATTERN: u8 = 2;

pub const SPICE_IMAGE_TYPE_BITMAP: u8 = 0;

pub const SPICE_BITMAP_FLAGS_PAL_CACHE_ME: u8 = 1 << 0;
pub const SPICE_BITMAP_FLAGS_PAL_FROM_CACHE: u8 = 1 << 1;
pub const SPICE_BITMAP_FLAGS_TOP_DOWN: u8 = 1 << 2;

pub const SPICE_SURFACE_FMT_1_A: u32 = 1;
pub const SPICE_SURFACE_FMT_8_A: u32 = 8;
pub const SPICE_SURFACE_FMT_16_555: u32 = 16;
pub const SPICE_SURFACE_FMT_32_XRGB: u32 = 32;
pub const SPICE_SURFACE_FMT_16_565: u32 = 80;
pub const SPICE_SURFACE_FMT_32_ARGB: u32 = 96;

// Cursor channel.
pub const SPICE_MSG_CURSOR_INIT: u16 = 101;
pub const SPICE_MSG_CURSOR_RESET: u16 = 102;
pub const SPICE_MSG_CURSOR_SET: u16 = 103;
pub const SPICE_MSG_CURSOR_MOVE: u16 = 104;
pub const SPICE_MSG_CURSOR_HIDE: u16 = 105;
pub const SPICE_MSG_CURSOR_TRAIL: u16 = 106;
pub const SPICE_MSG_CURSOR_INVAL_ONE: u16 = 107;
pub const SPICE_MSG_CURSOR_INVAL_ALL: u16 = 108;

pub const SPICE_CURSOR_FLAGS_NONE: u16 = 1 << 0;
pub const SPICE_CURSOR_FLAGS_CACHE_ME: u16 = 1 << 1;
pub const SPICE_CURSOR_FLAGS_FROM_CACHE: u16 = 1 << 2;

pub const SPICE_CURSOR_TYPE_ALPHA: u8 = 0;
pub const SPICE_CURSOR_TYPE_MONO: u8 = 1;
pub const SPICE_CURSOR_TYPE_COLOR4: u8 = 2;
pub const SPICE_CURSOR_TYPE_COLOR8: u8 = 3;
pub const SPICE_CURSOR_TYPE_COLOR16: u8 = 4;
pub const SPICE_CURSOR_TYPE_COLOR24: u8 = 5;
pub const SPICE_CURSOR_TYPE_COLOR32: u8 = 6;

// Capability bit indices.
pub const SPICE_COMMON_CAP_PROTOCOL_AUTH_SELECTION: u32 = 0;
pub const SPICE_COMMON_CAP_AUTH_SPICE: u32 = 1;
pub const SPICE_COMMON_CAP_MINI_HEADER: u32 = 3;

pub const SPICE_MAIN_CAP_NAME_AND_UUID: u32 = 1;
pub const SPICE_MAIN_CAP_AGENT_CONNECTED_TOKENS: u32 = 2;
pub const SPICE_MAIN_CAP_MAX: u32 = 3;

pub const SPICE_DISPLAY_CAP_PREF_COMPRESSION: u32 = 6;
pub const SPICE_DISPLAY_CAP_MAX: u32 = 14;

pub const SPICE_PLAYBACK_CAP_VOLUME: u32 = 1;
pub const SPICE_PLAYBACK_CAP_MAX: u32 = 3;

pub const SPICE_RECORD_CAP_VOLUME: u32 = 1;
pub const SPICE_RECORD_CAP_MAX: u32 = 2;

// Guest agent (VDAgent) sub-protocol, tunneled over the main channel.
pub const VD_AGENT_PROTOCOL: u32 = 1;
pub const VD_AGENT_MAX_DATA_SIZE: usize = 2048;

pub const VD_AGENT_CLIPBOARD: u32 = 4;
pub const VD_AGENT_ANNOUNCE_CAPABILITIES: u32 = 6;
pub const VD_AGENT_CLIPBOARD_GRAB: u32 = 7;
pub const VD_AGENT_CLIPBOARD_REQUEST: u32 = 8;
pub const VD_AGENT_CLIPBOARD_RELEASE: u32 = 9;

pub const VD_AGENT_CAP_CLIPBOARD_BY_DEMAND: u32 = 5;
pub const VD_AGENT_CAP_CLIPBOARD_SELECTION: u32 = 6;
pub const VD_AGENT_CAPS_WORDS: usize = 1;

pub const VD_AGENT_CLIPBOARD_NONE: u32 = 0;
pub const VD_AGENT_CLIPBOARD_UTF8_TEXT: u32 = 1;
pub const VD_AGENT_CLIPBOARD_IMAGE_PNG: u32 = 2;
pub const VD_AGENT_CLIPBOARD_IMAGE_BMP: u32 = 3;
pub const VD_AGENT_CLIPBOARD_IMAGE_TIFF: u32 = 4;
pub const VD_AGENT_CLIPBOARD_IMAGE_JPG: u32 = 5;

pub const VD_AGENT_CLIPBOARD_SELECTION_CLIPBOARD: u8 = 0;

/// The six logical channels a session can hold, indexed in connect
/// order. `Main` is the bootstrap; the others are advertised by the
/// server in the channels-list message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Main,
    Inputs,
    Playback,
    Record,
    Display,
    Cursor,
}

pub const CHANNEL_COUNT: usize = 6;

impl ChannelKind {
    pub const ALL: [ChannelKind; CHANNEL_COUNT] = [
        ChannelKind::Main,
        ChannelKind::Inputs,
        ChannelKind::Playback,
        ChannelKind::Record,
        ChannelKind::Display,
        ChannelKind::Cursor,
    ];

    pub fn index(self) -> usize {
        match self {
            ChannelKind::Main => 0,
            ChannelKind::Inputs => 1,
            ChannelKind::Playback => 2,
            ChannelKind::Record => 3,
            ChannelKind::Display => 4,
            ChannelKind::Cursor => 5,
        }
    }

    /// The channel type code used on the wire.
    pub fn spice_type(self) -> u8 {
        match self {
            ChannelKind::Main => 1,
            ChannelKind::Display => 2,
            ChannelKind::Inputs => 3,
            ChannelKind::Cursor => 4,
            ChannelKind::Playback => 5,
            ChannelKind::Record => 6,
        }
    }

    pub fn from_spice_type(value: u8) -> Option<ChannelKind> {
        match value {
            1 => Some(ChannelKind::Main),
            2 => Some(ChannelKind::Display),
            3 => Some(ChannelKind::Inputs),
            4 => Some(ChannelKind::Cursor),
            5 => Some(ChannelKind::Playback),
            6 => Some(ChannelKind::Record),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ChannelKind::Main => "main",
            ChannelKind::Inputs => "inputs",
            ChannelKind::Playback => "playback",
            ChannelKind::Record => "record",
            ChannelKind::Display => "display",
            ChannelKind::Cursor => "cursor",
        }
    }
}

/// Clipboard payload types exchanged with the guest agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataType {
    Text,
    Png,
    Bmp,
    Tiff,
    Jpeg,
    #[default]
    None,
}

/// Audio sample format reported by the playback and record channels.
/// Only signed 16-bit is translated; everything else maps to `Invalid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Invalid,
    S16,
}

impl AudioFormat {
    pub fn from_spice(format: u16) -> AudioFormat {
        if format == SPICE_AUDIO_FMT_S16 {
            AudioFormat::S16
        } else {
            AudioFormat::Invalid
        }
    }
}

/// Surface pixel formats supported by the display channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceFormat {
    A1,
    A8,
    Rgb555,
    Xrgb32,
    Rgb565,
    Argb32,
}

impl SurfaceFormat {
    pub fn from_spice(format: u32) -> Option<SurfaceFormat> {
        match format {
            SPICE_SURFACE_FMT_1_A => Some(SurfaceFormat::A1),
            SPICE_SURFACE_FMT_8_A => Some(SurfaceFormat::A8),
            SPICE_SURFACE_FMT_16_555 => Some(SurfaceFormat::Rgb555),
            SPICE_SURFACE_FMT_32_XRGB => Some(SurfaceFormat::Xrgb32),
            SPICE_SURFACE_FMT_16_565 => Some(SurfaceFormat::Rgb565),
            SPICE_SURFACE_FMT_32_ARGB => Some(SurfaceFormat::Argb32),
            _ => None,
        }
    }
}

/// Bitmap format delivered to the draw-bitmap callback. This core only
/// produces uncompressed `Rgba` data; compressed server images are
/// logged and dropped before reaching the callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitmapFormat {
    Rgba,
}

/// Capability bitset: an array of 32-bit little-endian words sized from
/// the highest capability index a channel can advertise.
#[derive(Debug, Clone)]
pub struct Caps(Vec<u32>);

impl Caps {
    /// A bitset wide enough to hold `max_index`, using the protocol's
    /// word-count rule.
    pub fn for_max_index(max_index: u32) -> Caps {
        let bytes = ((max_index + 32) / 8) & !3;
        Caps(vec![0; (bytes / 4) as usize])
    }

    /// An empty bitset (zero words), for channels with no capabilities.
    pub fn empty() -> Caps {
        Caps(Vec::new())
    }

    pub fn set(&mut self, index: u32) {
        let word = (index / 32) as usize;
        if word < self.0.len() {
            self.0[word] |= 1 << (index % 32);
        }
    }

    pub fn words(&self) -> &[u32] {
        &self.0
    }

    pub fn num_words(&self) -> u32 {
        self.0.len() as u32
    }

    /// Test a capability bit in a server-provided word list.
    pub fn has(words: &[u32], index: u32) -> bool {
        let word = (index / 32) as usize;
        word < words.len() && words[word] & (1 << (index % 32)) != 0
    }
}

#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceLinkHeader {
    pub magic: u32,
    pub major_version: u32,
    pub minor_version: u32,
    pub size: u32,
}

pub const SPICE_LINK_HEADER_SIZE: usize = 16;

#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceLinkMess {
    pub connection_id: u32,
    pub channel_type: u8,
    pub channel_id: u8,
    pub num_common_caps: u32,
    pub num_channel_caps: u32,
    pub caps_offset: u32,
}

pub const SPICE_LINK_MESS_SIZE: usize = 18;

#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceLinkReply {
    pub error: u32,
    pub pub_key: [u8; 162],
    pub num_common_caps: u32,
    pub num_channel_caps: u32,
    pub caps_offset: u32,
}

pub const SPICE_LINK_REPLY_SIZE: usize = 178;

#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceLinkAuthMechanism {
    pub auth_mechanism: u32,
}

/// The 6-byte framing used once both ends advertise the mini-header
/// capability: message type followed by payload size.
#[derive(Debug, Clone, Copy, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceMiniDataHeader {
    pub msg_type: u16,
    pub size: u32,
}

pub const SPICE_MINI_HEADER_SIZE: usize = 6;

#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceMsgMainInit {
    pub session_id: u32,
    pub display_channels_hint: u32,
    pub supported_mouse_modes: u32,
    pub current_mouse_mode: u32,
    pub agent_connected: u32,
    pub agent_tokens: u32,
    pub multi_media_time: u32,
    pub ram_hint: u32,
}

#[derive(Debug, Clone, Copy, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceChannelId {
    pub channel_type: u8,
    pub channel_id: u8,
}

#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceMsgSetAck {
    pub generation: u32,
    pub window: u32,
}

#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceMsgcAckSync {
    pub generation: u32,
}

#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceMsgPing {
    pub id: u32,
    pub timestamp: u64,
}

pub use self::SpiceMsgPing as SpiceMsgcPong;

#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceMsgNotify {
    pub time_stamp: u64,
    pub severity: u32,
    pub visibility: u32,
    pub what: u32,
    pub message_len: u32,
}

pub const SPICE_MSG_NOTIFY_FIXED_SIZE: usize = 24;

#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceMsgcDisconnecting {
    pub time_stamp: u64,
    pub reason: u32,
}

#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceMsgcMainMouseModeRequest {
    pub mouse_mode: u16,
}

#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceMsgInputsInit {
    pub modifiers: u16,
}

#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceMsgcKeyDown {
    pub code: u32,
}

pub use self::SpiceMsgcKeyDown as SpiceMsgcKeyUp;

#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceMsgcInputsKeyModifiers {
    pub modifiers: u16,
}

#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceMsgcMousePosition {
    pub x: u32,
    pub y: u32,
    pub button_state: u16,
    pub display_id: u8,
}

#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceMsgcMouseMotion {
    pub x: i32,
    pub y: i32,
    pub button_state: u16,
}

pub const SPICE_MSGC_MOUSE_MOTION_SIZE: usize = 10;

#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceMsgcMousePress {
    pub button: u8,
    pub button_state: u16,
}

pub use self::SpiceMsgcMousePress as SpiceMsgcMouseRelease;

#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceMsgPlaybackStart {
    pub channels: u32,
    pub format: u16,
    pub frequency: u32,
    pub time: u32,
}

#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceMsgRecordStart {
    pub channels: u32,
    pub format: u16,
    pub frequency: u32,
}

#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceMsgAudioMute {
    pub mute: u8,
}

#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceMsgcDisplayInit {
    pub pixmap_cache_id: u8,
    pub pixmap_cache_size: i64,
    pub glz_dictionary_id: u8,
    pub glz_dictionary_window_size: u32,
}

#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceMsgcPreferredCompression {
    pub image_compression: u8,
}

#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceMsgSurfaceCreate {
    pub surface_id: u32,
    pub width: u32,
    pub height: u32,
    pub format: u32,
    pub flags: u32,
}

#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceMsgSurfaceDestroy {
    pub surface_id: u32,
}

/// Rectangle in the display protocol's wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceRect {
    pub top: i32,
    pub left: i32,
    pub bottom: i32,
    pub right: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct SpicePoint {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct SpicePoint16 {
    pub x: i16,
    pub y: i16,
}

#[derive(Debug, Clone, Copy, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceCursorHeader {
    pub unique: u64,
    pub cursor_type: u8,
    pub width: u16,
    pub height: u16,
    pub hot_spot_x: u16,
    pub hot_spot_y: u16,
}

pub const SPICE_CURSOR_HEADER_SIZE: usize = 17;

#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceMsgCursorMove {
    pub position: SpicePoint16,
}

#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceMsgCursorTrail {
    pub length: u16,
    pub frequency: u16,
}

#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceMsgCursorInvalOne {
    pub cursor_id: u64,
}

/// Header of a guest agent message; a message may span several
/// `SPICE_MSGC_MAIN_AGENT_DATA` carrier packets.
#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little)]
pub struct VDAgentMessage {
    pub protocol: u32,
    pub msg_type: u32,
    pub opaque: u64,
    pub size: u32,
}

pub const VD_AGENT_MESSAGE_SIZE: usize = 20;

#[cfg(test)]
#[path = "protocol/tests.rs"]
mod tests;
