//! Inputs channel: keyboard and mouse traffic, plus the motion-ack
//! discipline that stops the client flooding the server with relative
//! motion.

use crate::channels::connection::{discard, read_payload};
use crate::channels::{ChannelReader, ChannelResult};
use crate::client::SessionInner;
use crate::error::SpiceError;
use crate::protocol::*;
use binrw::io::Cursor;
use binrw::BinRead;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::debug;

/// Translate a key code to the PS/2 set-1 make code the wire expects:
/// extended codes (above 0x100) gain the 0xe0 prefix byte.
pub(crate) fn key_down_code(code: u32) -> u32 {
    if code > 0x100 {
        0xe0 | ((code - 0x100) << 8)
    } else {
        code
    }
}

/// Translate a key code to its break code: bit 7 set for single-byte
/// codes, the 0x80e0 prefix for extended ones.
pub(crate) fn key_up_code(code: u32) -> u32 {
    if code < 0x100 {
        code | 0x80
    } else {
        0x80e0 | ((code - 0x100) << 8)
    }
}

/// Split a relative motion into per-packet deltas. The protocol allows
/// larger movements but the QEMU virtio-mouse device clamps to +-127
/// per message, so a big delta becomes several clamped sub-packets whose
/// components sum to the original.
pub(crate) fn motion_deltas(mut x: i32, mut y: i32) -> Vec<(i32, i32)> {
    let mut deltas = Vec::new();
    while x != 0 || y != 0 {
        let dx = x.clamp(-127, 127);
        let dy = y.clamp(-127, 127);
        deltas.push((dx, dy));
        x -= dx;
        y -= dy;
    }
    deltas
}

pub(crate) async fn handle_message(
    inner: &Arc<SessionInner>,
    reader: &mut ChannelReader,
    header: &SpiceMiniDataHeader,
) -> ChannelResult<()> {
    let slot = inner.slot(ChannelKind::Inputs);
    let size = header.size as usize;

    match header.msg_type {
        SPICE_MSG_INPUTS_INIT => {
            if slot.init_done.swap(true, Ordering::AcqRel) {
                return Err(SpiceError::Protocol("duplicate INPUTS_INIT".into()).into());
            }
            let payload = read_payload(reader, size).await?;
            let msg =
                SpiceMsgInputsInit::read(&mut Cursor::new(payload)).map_err(SpiceError::from)?;
            inner
                .kb_modifiers
                .store(msg.modifiers as u32, Ordering::Release);
            Ok(())
        }

        SPICE_MSG_INPUTS_KEY_MODIFIERS => {
            let payload = read_payload(reader, size).await?;
            let msg =
                SpiceMsgInputsInit::read(&mut Cursor::new(payload)).map_err(SpiceError::from)?;
            inner
                .kb_modifiers
                .store(msg.modifiers as u32, Ordering::Release);
            Ok(())
        }

        SPICE_MSG_INPUTS_MOUSE_MOTION_ACK => {
            discard(reader, size).await?;
            let previous = inner
                .mouse
                .sent_count
                .fetch_sub(SPICE_INPUT_MOTION_ACK_BUNCH, Ordering::AcqRel);
            if previous < SPICE_INPUT_MOTION_ACK_BUNCH {
                return Err(SpiceError::Protocol(format!(
                    "mouse motion ack underflow: {previous} outstanding, bunch is {SPICE_INPUT_MOTION_ACK_BUNCH}"
                ))
                .into());
            }
            Ok(())
        }

        _ => {
            debug!("discarding inputs message type {}", header.msg_type);
            discard(reader, size).await?;
            Ok(())
        }
    }
}
