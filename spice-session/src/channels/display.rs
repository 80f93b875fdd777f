//! Display channel: surfaces, solid fills and uncompressed bitmap
//! draws. Compressed image formats, video streams and exotic brushes are
//! out of scope for this core; they are logged and dropped without
//! failing the session.
//!
//! Display payloads embed offset-based references (images, palettes).
//! Rather than patching pointers into the raw buffer the way a C client
//! would, the payload is parsed into small owned structures holding
//! slice views; an offset of zero means the reference is absent.

use crate::channels::connection::{discard, read_payload, send_packet};
use crate::channels::{ChannelReader, ChannelResult};
use crate::client::SessionInner;
use crate::config::BitmapDraw;
use crate::error::{Result, SpiceError};
use crate::protocol::*;
use crate::wire_format::ByteReader;
use binrw::io::Cursor;
use binrw::{BinRead, BinWrite};
use std::sync::Arc;
use tracing::{debug, warn};

/// `SpiceMsgDisplayBase`: target surface, bounding box and clip.
/// Clip rectangles are skipped, not honored; this client draws the full
/// box and leaves clipping to the host application.
#[derive(Debug)]
pub(crate) struct DisplayBase {
    pub surface_id: u32,
    pub rect: SpiceRect,
}

pub(crate) fn parse_display_base(r: &mut ByteReader<'_>) -> Result<DisplayBase> {
    let surface_id = r.read_u32()?;
    let rect = SpiceRect {
        top: r.read_i32()?,
        left: r.read_i32()?,
        bottom: r.read_i32()?,
        right: r.read_i32()?,
    };
    let clip_type = r.read_u8()?;
    if clip_type == SPICE_CLIP_TYPE_RECTS {
        let num_rects = r.read_u32()? as usize;
        r.skip(num_rects * 16)?;
    }
    Ok(DisplayBase { surface_id, rect })
}

#[derive(Debug)]
pub(crate) enum Brush {
    None,
    Solid(u32),
    Pattern,
}

pub(crate) fn parse_brush(r: &mut ByteReader<'_>) -> Result<Brush> {
    match r.read_u8()? {
        SPICE_BRUSH_TYPE_NONE => Ok(Brush::None),
        SPICE_BRUSH_TYPE_SOLID => Ok(Brush::Solid(r.read_u32()?)),
        SPICE_BRUSH_TYPE_PATTERN => {
            // image offset + pattern origin
            r.skip(4)?;
            r.skip(8)?;
            Ok(Brush::Pattern)
        }
        other => Err(SpiceError::Protocol(format!("unknown brush type {other}"))),
    }
}

fn skip_qmask(r: &mut ByteReader<'_>) -> Result<()> {
    // flags, position, bitmap image offset
    r.skip(1)?;
    r.skip(8)?;
    r.skip(4)?;
    Ok(())
}

/// An uncompressed bitmap resolved out of a draw-copy payload. The
/// bitmap's `x`/`y` fields are its width and height; pixel data follows
/// the palette reference.
#[derive(Debug)]
pub(crate) struct Bitmap<'a> {
    pub flags: u8,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub data: &'a [u8],
}

/// Resolve the image a draw-copy references at `offset` into the
/// payload. Only `SPICE_IMAGE_TYPE_BITMAP` resolves; compressed types
/// return `None`.
pub(crate) fn parse_image_at(payload: &[u8], offset: usize) -> Result<Option<Bitmap<'_>>> {
    if offset >= payload.len() {
        return Err(SpiceError::Protocol(format!(
            "image offset {offset} beyond payload of {} bytes",
            payload.len()
        )));
    }

    let mut r = ByteReader::new(&payload[offset..]);
    let _id = r.read_u64()?;
    let image_type = r.read_u8()?;
    let _flags = r.read_u8()?;
    let _width = r.read_u32()?;
    let _height = r.read_u32()?;

    if image_type != SPICE_IMAGE_TYPE_BITMAP {
        return Ok(None);
    }

    let format = r.read_u8()?;
    let flags = r.read_u8()?;
    let width = r.read_u32()?;
    let height = r.read_u32()?;
    let stride = r.read_u32()?;
    let _palette_offset = r.read_u32()?;
    debug!("bitmap: format {format}, {width}x{height}, stride {stride}");

    Ok(Some(Bitmap {
        flags,
        width,
        height,
        stride,
        data: r.rest(),
    }))
}

/// On connect the client introduces itself with an (empty) display-init
/// and, when the server supports it, asks for uncompressed images since
/// this core decodes nothing else.
pub(crate) async fn on_connect(inner: &SessionInner) -> Result<()> {
    let slot = inner.slot(ChannelKind::Display);

    let init = SpiceMsgcDisplayInit {
        pixmap_cache_id: 0,
        pixmap_cache_size: 0,
        glz_dictionary_id: 0,
        glz_dictionary_window_size: 0,
    };
    let mut cur = Cursor::new(Vec::new());
    init.write(&mut cur)?;
    send_packet(slot, SPICE_MSGC_DISPLAY_INIT, &cur.into_inner()).await?;

    if inner
        .pref_compression_cap
        .load(std::sync::atomic::Ordering::Acquire)
    {
        let msg = SpiceMsgcPreferredCompression {
            image_compression: SPICE_IMAGE_COMPRESSION_OFF,
        };
        let mut cur = Cursor::new(Vec::new());
        msg.write(&mut cur)?;
        send_packet(slot, SPICE_MSGC_DISPLAY_PREFERRED_COMPRESSION, &cur.into_inner()).await?;
    }

    Ok(())
}

pub(crate) async fn handle_message(
    inner: &Arc<SessionInner>,
    reader: &mut ChannelReader,
    header: &SpiceMiniDataHeader,
) -> ChannelResult<()> {
    let size = header.size as usize;
    let config = &inner.config.display;

    match header.msg_type {
        SPICE_MSG_DISPLAY_SURFACE_CREATE => {
            let payload = read_payload(reader, size).await?;
            let msg = SpiceMsgSurfaceCreate::read(&mut Cursor::new(payload))
                .map_err(SpiceError::from)?;
            let format = SurfaceFormat::from_spice(msg.format).ok_or_else(|| {
                SpiceError::Protocol(format!("unknown surface format {}", msg.format))
            })?;
            if let Some(cb) = &config.surface_create {
                cb(msg.surface_id, format, msg.width, msg.height);
            }
            Ok(())
        }

        SPICE_MSG_DISPLAY_SURFACE_DESTROY => {
            let payload = read_payload(reader, size).await?;
            let msg = SpiceMsgSurfaceDestroy::read(&mut Cursor::new(payload))
                .map_err(SpiceError::from)?;
            if let Some(cb) = &config.surface_destroy {
                cb(msg.surface_id);
            }
            Ok(())
        }

        SPICE_MSG_DISPLAY_DRAW_FILL => {
            let payload = read_payload(reader, size).await?;
            let mut r = ByteReader::new(payload);
            let base = parse_display_base(&mut r)?;
            let brush = parse_brush(&mut r)?;

            let color = match brush {
                Brush::Solid(color) => color,
                other => {
                    warn!("only solid brushes are supported, dropping {:?} fill", other);
                    return Ok(());
                }
            };

            if let Some(cb) = &config.draw_fill {
                cb(
                    base.surface_id,
                    base.rect.left,
                    base.rect.top,
                    base.rect.right - base.rect.left,
                    base.rect.bottom - base.rect.top,
                    color,
                );
            }
            Ok(())
        }

        SPICE_MSG_DISPLAY_DRAW_COPY => {
            let payload = read_payload(reader, size).await?;
            let mut r = ByteReader::new(payload);
            let base = parse_display_base(&mut r)?;

            let src_offset = r.read_u32()? as usize;
            // src_area rect, rop descriptor and scale mode
            r.skip(16 + 2 + 1)?;
            skip_qmask(&mut r)?;

            if src_offset == 0 {
                warn!("draw copy without a source bitmap, dropping");
                return Ok(());
            }

            match parse_image_at(payload, src_offset)? {
                Some(bitmap) => {
                    if let Some(cb) = &config.draw_bitmap {
                        cb(BitmapDraw {
                            surface_id: base.surface_id,
                            format: BitmapFormat::Rgba,
                            top_down: bitmap.flags & SPICE_BITMAP_FLAGS_TOP_DOWN != 0,
                            x: base.rect.left,
                            y: base.rect.top,
                            width: bitmap.width,
                            height: bitmap.height,
                            stride: bitmap.stride,
                            data: bitmap.data,
                        });
                    }
                }
                None => {
                    warn!("compressed image formats are not supported, dropping draw copy");
                }
            }
            Ok(())
        }

        _ => {
            debug!("discarding display message type {}", header.msg_type);
            discard(reader, size).await?;
            Ok(())
        }
    }
}
