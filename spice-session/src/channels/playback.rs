//! Playback channel: audio from the guest to the host application.

use crate::channels::connection::{discard, read_payload};
use crate::channels::{ChannelReader, ChannelResult};
use crate::client::SessionInner;
use crate::error::SpiceError;
use crate::protocol::*;
use crate::wire_format::ByteReader;
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
    let config = &inner.config.playback;

    match header.msg_type {
        SPICE_MSG_PLAYBACK_START => {
            let payload = read_payload(reader, size).await?;
            let msg = SpiceMsgPlaybackStart::read(&mut Cursor::new(payload))
                .map_err(SpiceError::from)?;
            if let Some(start) = &config.start {
                start(
                    msg.channels,
                    msg.frequency,
                    AudioFormat::from_spice(msg.format),
                    msg.time,
                );
            }
            Ok(())
        }

        SPICE_MSG_PLAYBACK_DATA => {
            let payload = read_payload(reader, size).await?;
            // A small media-time prefix precedes the samples.
            let mut r = ByteReader::new(payload);
            let _time = r.read_u32()?;
            if let Some(data) = &config.data {
                data(r.rest());
            }
            Ok(())
        }

        SPICE_MSG_PLAYBACK_STOP => {
            discard(reader, size).await?;
            if let Some(stop) = &config.stop {
                stop();
            }
            Ok(())
        }

        SPICE_MSG_PLAYBACK_VOLUME => {
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

        SPICE_MSG_PLAYBACK_MUTE => {
            let payload = read_payload(reader, size).await?;
            let msg =
                SpiceMsgAudioMute::read(&mut Cursor::new(payload)).map_err(SpiceError::from)?;
            if let Some(mute) = &config.mute {
                mute(msg.mute != 0);
            }
            Ok(())
        }

        SPICE_MSG_PLAYBACK_MODE => {
            discard(reader, size).await?;
            Ok(())
        }

        _ => {
            debug!("discarding playback message type {}", header.msg_type);
            discard(reader, size).await?;
            Ok(())
        }
    }
}
