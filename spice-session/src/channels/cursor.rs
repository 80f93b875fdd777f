//! Cursor channel: hardware cursor shapes, visibility and the
//! server-driven shape cache keyed by 64-bit unique ids.

use crate::channels::connection::{discard, read_payload};
use crate::channels::{ChannelReader, ChannelResult};
use crate::client::SessionInner;
use crate::error::SpiceError;
use crate::protocol::*;
use crate::wire_format::ByteReader;
use std::sync::Arc;
use tracing::{debug, warn};

/// One cursor shape, either inline from the wire or replayed from the
/// cache.
#[derive(Debug, Clone)]
pub(crate) struct CursorImage {
    pub header: SpiceCursorHeader,
    pub data: Vec<u8>,
}

/// Cursor-channel state, owned by the receive side.
pub(crate) struct CursorState {
    cache: Vec<CursorImage>,
    pub visible: bool,
    pub x: i16,
    pub y: i16,
    pub trail_length: u16,
    pub trail_frequency: u16,
}

impl CursorState {
    pub fn new() -> Self {
        Self {
            cache: Vec::new(),
            visible: false,
            x: 0,
            y: 0,
            trail_length: 0,
            trail_frequency: 0,
        }
    }

    fn lookup(&self, unique: u64) -> Option<&CursorImage> {
        self.cache.iter().find(|img| img.header.unique == unique)
    }

    fn remove(&mut self, unique: u64) {
        self.cache.retain(|img| img.header.unique != unique);
    }

    fn clear(&mut self) {
        self.cache.clear();
    }
}

/// Payload bytes a cursor of the given type and geometry occupies.
pub(crate) fn cursor_data_size(cursor_type: u8, width: u16, height: u16) -> Option<usize> {
    let w = width as usize;
    let h = height as usize;
    let mask = w.div_ceil(8) * h;
    match cursor_type {
        SPICE_CURSOR_TYPE_ALPHA => Some(4 * w * h),
        SPICE_CURSOR_TYPE_MONO => Some(2 * mask),
        SPICE_CURSOR_TYPE_COLOR4 => Some(w.div_ceil(2) * h + 16 * 4 + mask),
        SPICE_CURSOR_TYPE_COLOR8 => Some(w * h + 256 * 4 + mask),
        SPICE_CURSOR_TYPE_COLOR16 => Some(2 * w * h + mask),
        SPICE_CURSOR_TYPE_COLOR24 => Some(3 * w * h + mask),
        SPICE_CURSOR_TYPE_COLOR32 => Some(4 * w * h + mask),
        _ => None,
    }
}

fn read_cursor_header(r: &mut ByteReader<'_>) -> crate::Result<SpiceCursorHeader> {
    Ok(SpiceCursorHeader {
        unique: r.read_u64()?,
        cursor_type: r.read_u8()?,
        width: r.read_u16()?,
        height: r.read_u16()?,
        hot_spot_x: r.read_u16()?,
        hot_spot_y: r.read_u16()?,
    })
}

/// Resolve the inline cursor that follows the flags word: taken from
/// cache, absent, or built from the payload (and optionally added to
/// the cache). Returns the shape to show, if any.
fn resolve_shape(
    state: &mut CursorState,
    r: &mut ByteReader<'_>,
) -> crate::Result<Option<CursorImage>> {
    let flags = r.read_u16()?;

    if flags & SPICE_CURSOR_FLAGS_NONE != 0 {
        return Ok(None);
    }

    let header = read_cursor_header(r)?;

    if flags & SPICE_CURSOR_FLAGS_FROM_CACHE != 0 {
        let found = state.lookup(header.unique).cloned();
        if found.is_none() {
            warn!("cursor {:#x} missing from the cache", header.unique);
        }
        return Ok(found);
    }

    let size = cursor_data_size(header.cursor_type, header.width, header.height)
        .ok_or_else(|| {
            SpiceError::Protocol(format!("unknown cursor type {}", header.cursor_type))
        })?;
    let data = r.read_bytes(size)?.to_vec();
    let image = CursorImage { header, data };

    if flags & SPICE_CURSOR_FLAGS_CACHE_ME != 0 {
        state.cache.push(image.clone());
    }

    Ok(Some(image))
}

/// Hand a resolved shape to the application. Only alpha and mono
/// cursors have callback representations; palette cursors stay cached
/// but are not converted.
fn emit_shape(inner: &SessionInner, image: &CursorImage) {
    let config = &inner.config.cursor;
    let header = &image.header;
    match header.cursor_type {
        SPICE_CURSOR_TYPE_ALPHA => {
            if let Some(cb) = &config.set_rgba_image {
                cb(
                    header.width,
                    header.height,
                    header.hot_spot_x,
                    header.hot_spot_y,
                    &image.data,
                );
            }
        }
        SPICE_CURSOR_TYPE_MONO => {
            if let Some(cb) = &config.set_mono_image {
                let plane = (header.width as usize).div_ceil(8) * header.height as usize;
                if image.data.len() >= 2 * plane {
                    cb(
                        header.width,
                        header.height,
                        header.hot_spot_x,
                        header.hot_spot_y,
                        &image.data[..plane],
                        &image.data[plane..2 * plane],
                    );
                }
            }
        }
        other => {
            debug!("no conversion for palette cursor type {other}");
        }
    }
}

fn emit_state(inner: &SessionInner, state: &CursorState) {
    if let Some(cb) = &inner.config.cursor.set_state {
        cb(state.visible, state.x, state.y);
    }
}

pub(crate) async fn handle_message(
    inner: &Arc<SessionInner>,
    state: &mut CursorState,
    reader: &mut ChannelReader,
    header: &SpiceMiniDataHeader,
) -> ChannelResult<()> {
    let size = header.size as usize;

    match header.msg_type {
        SPICE_MSG_CURSOR_INIT => {
            let payload = read_payload(reader, size).await?;
            let mut r = ByteReader::new(payload);
            state.x = r.read_u16()? as i16;
            state.y = r.read_u16()? as i16;
            state.trail_length = r.read_u16()?;
            state.trail_frequency = r.read_u16()?;
            state.visible = r.read_u8()? != 0;

            if let Some(image) = resolve_shape(state, &mut r)? {
                emit_shape(inner, &image);
            }
            emit_state(inner, state);
            Ok(())
        }

        SPICE_MSG_CURSOR_SET => {
            let payload = read_payload(reader, size).await?;
            let mut r = ByteReader::new(payload);
            state.x = r.read_u16()? as i16;
            state.y = r.read_u16()? as i16;
            state.visible = r.read_u8()? != 0;

            match resolve_shape(state, &mut r)? {
                Some(image) => emit_shape(inner, &image),
                // No usable shape, so do not claim to be showing one.
                None => state.visible = false,
            }
            emit_state(inner, state);
            Ok(())
        }

        SPICE_MSG_CURSOR_MOVE => {
            let payload = read_payload(reader, size).await?;
            let mut r = ByteReader::new(payload);
            state.x = r.read_u16()? as i16;
            state.y = r.read_u16()? as i16;
            emit_state(inner, state);
            Ok(())
        }

        SPICE_MSG_CURSOR_HIDE => {
            discard(reader, size).await?;
            state.visible = false;
            emit_state(inner, state);
            Ok(())
        }

        SPICE_MSG_CURSOR_TRAIL => {
            let payload = read_payload(reader, size).await?;
            let mut r = ByteReader::new(payload);
            state.trail_length = r.read_u16()?;
            state.trail_frequency = r.read_u16()?;
            if let Some(cb) = &inner.config.cursor.set_trail {
                cb(state.trail_length, state.trail_frequency);
            }
            Ok(())
        }

        SPICE_MSG_CURSOR_INVAL_ONE => {
            let payload = read_payload(reader, size).await?;
            let unique = ByteReader::new(payload).read_u64()?;
            state.remove(unique);
            Ok(())
        }

        SPICE_MSG_CURSOR_RESET | SPICE_MSG_CURSOR_INVAL_ALL => {
            discard(reader, size).await?;
            state.clear();
            Ok(())
        }

        _ => {
            debug!("discarding cursor message type {}", header.msg_type);
            discard(reader, size).await?;
            Ok(())
        }
    }
}
