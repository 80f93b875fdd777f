//! Record channel: microphone audio from the host application to the
//! guest.

use crate::channels::connection::{discard, read_payload, send_raw};
use crate::channels::{ChannelReader, ChannelResult};
use crate::client::SessionInner;
use crate::error::{Result, SpiceError};
use crate::protocol::*;
use crate::wire_format::{packet_with_extra, ByteReader};
use binrw::io::Cursor;
use binrw::BinRead;
use std::sync::Arc;
use tracing::debug;

pub(crate) async fn handle_message(
    inner: &Arc<SessionInner>,
    reader: &mut ChannelReader,
    header: &SpiceMiniDataHeader,
) -> ChannelResult<()> {
    let size = header.size as usize;
    let config = &inner.config.record;

    match header.msg_type {
        SPICE_MSG_RECORD_START => {
            let payload = read_payload(reader, size).await?;
            let msg =
                SpiceMsgRecordStart::read(&mut Cursor::new(payload)).map_err(SpiceError::from)?;
            if let Some(start) = &config.start {
                start(
                    msg.channels,
                    msg.frequency,
                    AudioFormat::from_spice(msg.format),
                );
            }
            Ok(())
        }

        SPICE_MSG_RECORD_STOP => {
            discard(reader, size).await?;
            if let Some(stop) = &config.stop {
                stop();
            }
            Ok(())
        }

        SPICE_MSG_RECORD_VOLUME => {
            let payload = read_payload(reader, size).await?;
            let mut r = ByteReader::new(payload);
            let nchannels = r.read_u8()? as usize;
            let mut volume = Vec::with_capacity(nchannels);
            for _ in 0..nchannels {
                volume.push(r.read_u16()?);
            }
            if let Some(cb) = &config.volume {
                cb(&volume);
            }
            Ok(())
        }

        SPICE_MSG_RECORD_MUTE => {
            let payload = read_payload(reader, size).await?;
            let msg =
                SpiceMsgAudioMute::read(&mut Cursor::new(payload)).map_err(SpiceError::from)?;
            if let Some(mute) = &config.mute {
                mute(msg.mute != 0);
            }
            Ok(())
        }

        _ => {
            debug!("discarding record message type {}", header.msg_type);
            discard(reader, size).await?;
            Ok(())
        }
    }
}

/// Send captured audio to the guest: a record-data header carrying the
/// media time, then the sample bytes, all in one write so the packet
/// stays contiguous on the wire.
pub(crate) async fn write_audio(inner: &SessionInner, data: &[u8], time: u32) -> Result<()> {
    let slot = inner.slot(ChannelKind::Record);
    if !slot.is_connected() {
        return Err(SpiceError::Protocol("record channel is not connected".into()));
    }

    let mut buf = packet_with_extra(SPICE_MSGC_RECORD_DATA, &time.to_le_bytes(), data.len());
    buf.extend_from_slice(data);
    send_raw(slot, &buf).await
}
