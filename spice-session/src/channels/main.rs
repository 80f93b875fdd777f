//! Main channel: session bootstrap, channel advertisement and the
//! carrier for the guest agent sub-protocol.

use crate::agent;
use crate::channels::connection::{discard, read_payload, send_packet};
use crate::channels::{ChannelReader, ChannelResult, RecvState};
use crate::client::SessionInner;
use crate::error::SpiceError;
use crate::protocol::*;
use crate::wire_format::ByteReader;
use binrw::io::Cursor;
use binrw::{BinRead, BinWrite};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Ask the server for the given pointer mode. Sent on the main channel,
/// not inputs.
pub(crate) async fn send_mouse_mode(inner: &SessionInner, server: bool) -> crate::Result<()> {
    let msg = SpiceMsgcMainMouseModeRequest {
        mouse_mode: if server {
            SPICE_MOUSE_MODE_SERVER as u16
        } else {
            SPICE_MOUSE_MODE_CLIENT as u16
        },
    };
    let mut cur = Cursor::new(Vec::new());
    msg.write(&mut cur)?;
    send_packet(
        inner.slot(ChannelKind::Main),
        SPICE_MSGC_MAIN_MOUSE_MODE_REQUEST,
        &cur.into_inner(),
    )
    .await
}

pub(crate) async fn handle_message(
    inner: &Arc<SessionInner>,
    recv: &mut RecvState,
    reader: &mut ChannelReader,
    header: &SpiceMiniDataHeader,
) -> ChannelResult<()> {
    let slot = inner.slot(ChannelKind::Main);
    let size = header.size as usize;

    if !slot.init_done.load(Ordering::Acquire) {
        if header.msg_type != SPICE_MSG_MAIN_INIT {
            return Err(SpiceError::Protocol(format!(
                "expected MAIN_INIT as the first main channel message, got type {}",
                header.msg_type
            ))
            .into());
        }

        slot.init_done.store(true, Ordering::Release);
        let payload = read_payload(reader, size).await?;
        let msg = SpiceMsgMainInit::read(&mut Cursor::new(payload)).map_err(SpiceError::from)?;

        info!(
            "main init: session {:#010x}, agent connected: {}, mouse mode: {}",
            msg.session_id,
            msg.agent_connected != 0,
            msg.current_mouse_mode
        );

        inner.session_id.store(msg.session_id, Ordering::Release);
        inner.agent.set_tokens(msg.agent_tokens);

        if msg.agent_connected != 0 {
            agent::connect(inner).await?;
        }

        if msg.current_mouse_mode != SPICE_MOUSE_MODE_CLIENT {
            send_mouse_mode(inner, false).await?;
        }

        send_packet(slot, SPICE_MSGC_MAIN_ATTACH_CHANNELS, &[]).await?;
        return Ok(());
    }

    match header.msg_type {
        SPICE_MSG_MAIN_CHANNELS_LIST => {
            let payload = read_payload(reader, size).await?;
            let mut r = ByteReader::new(payload);
            let count = r.read_u32()?;

            for _ in 0..count {
                let channel_type = r.read_u8()?;
                let _channel_id = r.read_u8()?;
                match ChannelKind::from_spice_type(channel_type) {
                    Some(kind) if kind != ChannelKind::Main => {
                        debug!("server advertises {} channel", kind.name());
                        inner.slot(kind).available.store(true, Ordering::Release);
                    }
                    Some(_) => {}
                    None => debug!("server advertises unknown channel type {channel_type}"),
                }
            }

            for kind in ChannelKind::ALL {
                if kind == ChannelKind::Main {
                    continue;
                }
                let (enable, auto_connect) = inner.channel_opts(kind);
                let slot = inner.slot(kind);
                if enable
                    && auto_connect
                    && slot.available.load(Ordering::Acquire)
                    && !slot.is_connected()
                {
                    super::connection::connect_channel(inner, recv, kind).await?;
                }
            }

            inner.channels_listed.store(true, Ordering::Release);
            inner.maybe_fire_ready();
            Ok(())
        }

        SPICE_MSG_MAIN_NAME => {
            let payload = read_payload(reader, size).await?;
            let mut r = ByteReader::new(payload);
            let len = r.read_u32()? as usize;
            let bytes = r.read_bytes(len.min(r.remaining()))?;
            let name = String::from_utf8_lossy(bytes)
                .trim_end_matches('\0')
                .to_string();
            debug!("server name: {name}");
            *inner.server_name.lock().unwrap() = Some(name);
            inner.maybe_fire_ready();
            Ok(())
        }

        SPICE_MSG_MAIN_UUID => {
            let payload = read_payload(reader, size).await?;
            if payload.len() < 16 {
                return Err(SpiceError::Protocol("short MAIN_UUID message".into()).into());
            }
            let mut uuid = [0u8; 16];
            uuid.copy_from_slice(&payload[..16]);
            *inner.server_uuid.lock().unwrap() = Some(uuid);
            inner.maybe_fire_ready();
            Ok(())
        }

        SPICE_MSG_MAIN_AGENT_CONNECTED => {
            discard(reader, size).await?;
            agent::connect(inner).await?;
            Ok(())
        }

        SPICE_MSG_MAIN_AGENT_CONNECTED_TOKENS => {
            let payload = read_payload(reader, size).await?;
            let tokens = ByteReader::new(payload).read_u32()?;
            inner.agent.set_tokens(tokens);
            agent::connect(inner).await?;
            Ok(())
        }

        SPICE_MSG_MAIN_AGENT_DISCONNECTED => {
            let payload = read_payload(reader, size).await?;
            let error = ByteReader::new(payload).read_u32()?;
            warn!("agent disconnected (error {error})");
            inner.agent.disconnect();
            Ok(())
        }

        SPICE_MSG_MAIN_AGENT_DATA => {
            if !inner.agent.is_present() {
                discard(reader, size).await?;
                return Ok(());
            }
            let payload = read_payload(reader, size).await?;
            agent::process_data(inner, payload).await?;
            Ok(())
        }

        SPICE_MSG_MAIN_AGENT_TOKEN => {
            let payload = read_payload(reader, size).await?;
            let tokens = ByteReader::new(payload).read_u32()?;
            inner.agent.add_tokens(tokens);
            agent::process_queue(inner).await?;
            Ok(())
        }

        SPICE_MSG_MAIN_MOUSE_MODE | SPICE_MSG_MAIN_MULTI_MEDIA_TIME => {
            discard(reader, size).await?;
            Ok(())
        }

        _ => {
            debug!("discarding main channel message type {}", header.msg_type);
            discard(reader, size).await?;
            Ok(())
        }
    }
}
