//! Shared channel runtime: link handshake, framing reads, the serialized
//! send path, ack credits and the common message set.

use crate::channels::{ChannelReader, ChannelResult, ChannelSlot, RecvState};
use crate::client::SessionInner;
use crate::error::{Result, SpiceError};
use crate::protocol::*;
use crate::transport::create_transport;
use crate::wire_format::{monotonic_ms, packet};
use binrw::io::Cursor;
use binrw::{BinRead, BinWrite};
use rsa::pkcs8::DecodePublicKey;
use rsa::rand_core::OsRng;
use rsa::{Oaep, RsaPublicKey};
use sha1::Sha1;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Encrypt the NUL-terminated password with RSA-OAEP (SHA-1, MGF1-SHA1)
/// against the server's SubjectPublicKeyInfo key.
fn encrypt_password(password: &str, pub_key_der: &[u8]) -> Result<Vec<u8>> {
    let public_key = RsaPublicKey::from_public_key_der(pub_key_der)
        .map_err(|e| SpiceError::Crypto(format!("failed to parse RSA public key: {e}")))?;

    let mut plaintext = Vec::with_capacity(password.len() + 1);
    plaintext.extend_from_slice(password.as_bytes());
    plaintext.push(0);

    let padding = Oaep::new::<Sha1>();
    public_key
        .encrypt(&mut OsRng, padding, &plaintext)
        .map_err(|e| SpiceError::Crypto(format!("failed to encrypt password: {e}")))
}

fn common_caps() -> Caps {
    let mut caps = Caps::for_max_index(SPICE_COMMON_CAP_MINI_HEADER);
    caps.set(SPICE_COMMON_CAP_PROTOCOL_AUTH_SELECTION);
    caps.set(SPICE_COMMON_CAP_AUTH_SPICE);
    caps.set(SPICE_COMMON_CAP_MINI_HEADER);
    caps
}

fn channel_caps(inner: &SessionInner, kind: ChannelKind) -> Caps {
    match kind {
        ChannelKind::Main => {
            let mut caps = Caps::for_max_index(SPICE_MAIN_CAP_MAX);
            caps.set(SPICE_MAIN_CAP_NAME_AND_UUID);
            caps.set(SPICE_MAIN_CAP_AGENT_CONNECTED_TOKENS);
            caps
        }
        ChannelKind::Display => {
            let mut caps = Caps::for_max_index(SPICE_DISPLAY_CAP_MAX);
            caps.set(SPICE_DISPLAY_CAP_PREF_COMPRESSION);
            caps
        }
        ChannelKind::Playback => {
            let mut caps = Caps::for_max_index(SPICE_PLAYBACK_CAP_MAX);
            let pb = &inner.config.playback;
            if pb.volume.is_some() || pb.mute.is_some() {
                caps.set(SPICE_PLAYBACK_CAP_VOLUME);
            }
            caps
        }
        ChannelKind::Record => {
            let mut caps = Caps::for_max_index(SPICE_RECORD_CAP_MAX);
            let rec = &inner.config.record;
            if rec.volume.is_some() || rec.mute.is_some() {
                caps.set(SPICE_RECORD_CAP_VOLUME);
            }
            caps
        }
        ChannelKind::Inputs | ChannelKind::Cursor => Caps::empty(),
    }
}

fn build_connect_packet(inner: &SessionInner, kind: ChannelKind) -> Result<Vec<u8>> {
    let common = common_caps();
    let channel = channel_caps(inner, kind);

    let mess = SpiceLinkMess {
        connection_id: inner.session_id.load(Ordering::Acquire),
        channel_type: kind.spice_type(),
        channel_id: 0,
        num_common_caps: common.num_words(),
        num_channel_caps: channel.num_words(),
        caps_offset: SPICE_LINK_MESS_SIZE as u32,
    };

    let body_size =
        SPICE_LINK_MESS_SIZE + 4 * (common.num_words() + channel.num_words()) as usize;
    let header = SpiceLinkHeader {
        magic: SPICE_MAGIC,
        major_version: SPICE_VERSION_MAJOR,
        minor_version: SPICE_VERSION_MINOR,
        size: body_size as u32,
    };

    let mut cur = Cursor::new(Vec::with_capacity(SPICE_LINK_HEADER_SIZE + body_size));
    header.write(&mut cur)?;
    mess.write(&mut cur)?;
    let mut buf = cur.into_inner();
    for word in common.words().iter().chain(channel.words()) {
        buf.extend_from_slice(&word.to_le_bytes());
    }
    Ok(buf)
}

fn parse_server_caps(body: &[u8], reply: &SpiceLinkReply) -> Result<(Vec<u32>, Vec<u32>)> {
    let start = reply.caps_offset as usize;
    let total = (reply.num_common_caps + reply.num_channel_caps) as usize * 4;
    if start + total > body.len() {
        return Err(SpiceError::Handshake(
            "link reply capability lists exceed the reply size".into(),
        ));
    }

    let mut words = body[start..start + total]
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]));
    let common: Vec<u32> = words.by_ref().take(reply.num_common_caps as usize).collect();
    let channel: Vec<u32> = words.collect();
    Ok((common, channel))
}

/// The optional `setCaps` hook: record the server capability bits that
/// change later behavior.
fn apply_server_caps(inner: &SessionInner, kind: ChannelKind, common: &[u32], channel: &[u32]) {
    debug!(
        "{} channel server caps: common {:08x?}, channel {:08x?}",
        kind.name(),
        common,
        channel
    );
    match kind {
        ChannelKind::Main => {
            inner.name_and_uuid_cap.store(
                Caps::has(channel, SPICE_MAIN_CAP_NAME_AND_UUID),
                Ordering::Release,
            );
        }
        ChannelKind::Display => {
            inner.pref_compression_cap.store(
                Caps::has(channel, SPICE_DISPLAY_CAP_PREF_COMPRESSION),
                Ordering::Release,
            );
        }
        _ => {}
    }
}

/// Run the full link handshake for `kind` and install the channel into
/// the session. The connect packet, magic/version check, capability
/// exchange, auth mechanism selection and RSA ticket all happen here; on
/// any deviation the socket is dropped and the channel stays down.
pub(crate) async fn connect_channel(
    inner: &Arc<SessionInner>,
    recv: &mut RecvState,
    kind: ChannelKind,
) -> Result<()> {
    let slot = inner.slot(kind);
    if slot.is_connected() {
        return Err(SpiceError::Protocol(format!(
            "{} channel is already connected",
            kind.name()
        )));
    }
    slot.reset();

    let mut transport = create_transport(&inner.address).await?;

    let connect_packet = build_connect_packet(inner, kind)?;
    transport.write_all(&connect_packet).await?;

    let mut header_buf = [0u8; SPICE_LINK_HEADER_SIZE];
    transport.read_exact(&mut header_buf).await?;
    let header = SpiceLinkHeader::read(&mut Cursor::new(&header_buf[..]))?;

    if header.magic != SPICE_MAGIC {
        return Err(SpiceError::Handshake(format!(
            "invalid magic in link reply: {:#010x}",
            header.magic
        )));
    }
    if header.major_version != SPICE_VERSION_MAJOR {
        return Err(SpiceError::Handshake(format!(
            "unsupported major version {}",
            header.major_version
        )));
    }
    if (header.size as usize) < SPICE_LINK_REPLY_SIZE {
        return Err(SpiceError::Handshake(format!(
            "link reply too short: {} bytes",
            header.size
        )));
    }

    let mut body = vec![0u8; header.size as usize];
    transport.read_exact(&mut body).await?;
    let reply = SpiceLinkReply::read(&mut Cursor::new(&body[..]))?;

    if reply.error != SPICE_LINK_ERR_OK {
        return Err(SpiceError::Handshake(format!(
            "server reported link error {} ({})",
            reply.error,
            link_err_name(reply.error)
        )));
    }

    let (server_common, server_channel) = parse_server_caps(&body, &reply)?;
    apply_server_caps(inner, kind, &server_common, &server_channel);

    let auth = SpiceLinkAuthMechanism {
        auth_mechanism: SPICE_COMMON_CAP_AUTH_SPICE,
    };
    let mut cur = Cursor::new(Vec::new());
    auth.write(&mut cur)?;
    transport.write_all(&cur.into_inner()).await?;

    let encrypted = encrypt_password(&inner.config.password, &reply.pub_key)?;
    transport.write_all(&encrypted).await?;

    let mut result_buf = [0u8; 4];
    transport.read_exact(&mut result_buf).await?;
    let link_result = u32::from_le_bytes(result_buf);
    if link_result != SPICE_LINK_ERR_OK {
        warn!(
            "{} channel authentication failed: {} ({})",
            kind.name(),
            link_result,
            link_err_name(link_result)
        );
        return Err(SpiceError::AuthenticationFailed);
    }

    let (reader, writer) = transport.split();
    *slot.writer.lock().await = Some(writer);
    recv.readers[kind.index()] = Some(ChannelReader::new(reader));
    slot.connected.store(true, Ordering::Release);
    slot.ready.store(true, Ordering::Release);
    info!("{} channel connected", kind.name());

    if kind == ChannelKind::Display {
        super::display::on_connect(inner).await?;
    }

    Ok(())
}

/// Graceful channel teardown: notify the server if the link ever came
/// up, half-close the socket and drop both halves.
pub(crate) async fn disconnect_channel(
    inner: &Arc<SessionInner>,
    recv: &mut RecvState,
    kind: ChannelKind,
) {
    let slot = inner.slot(kind);
    let was_connected = slot.connected.swap(false, Ordering::AcqRel);
    let was_ready = slot.ready.swap(false, Ordering::AcqRel);

    if was_connected {
        let mut guard = slot.writer.lock().await;
        if let Some(writer) = guard.as_mut() {
            if was_ready {
                let msg = SpiceMsgcDisconnecting {
                    time_stamp: monotonic_ms(),
                    reason: SPICE_LINK_ERR_OK,
                };
                let mut cur = Cursor::new(Vec::new());
                if msg.write(&mut cur).is_ok() {
                    let _ = writer
                        .write_all(&packet(SPICE_MSGC_DISCONNECTING, &cur.into_inner()))
                        .await;
                }
            }
            let _ = writer.shutdown().await;
        }
        *guard = None;
        info!("{} channel disconnected", kind.name());
    }

    recv.readers[kind.index()] = None;
    slot.reset();
}

/// Emit one packet, header and payload in a single write, under the
/// channel's send lock.
pub(crate) async fn send_packet(slot: &ChannelSlot, msg_type: u16, payload: &[u8]) -> Result<()> {
    send_raw(slot, &packet(msg_type, payload)).await
}

/// Emit pre-framed bytes under the channel's send lock. The caller is
/// responsible for `buf` holding complete packets.
pub(crate) async fn send_raw(slot: &ChannelSlot, buf: &[u8]) -> Result<()> {
    if !slot.is_ready() {
        return Err(SpiceError::Protocol(format!(
            "{} channel is not ready",
            slot.kind.name()
        )));
    }
    let mut guard = slot.writer.lock().await;
    let writer = guard.as_mut().ok_or(SpiceError::ConnectionClosed)?;
    writer.write_all(buf).await?;
    Ok(())
}

/// Read the 6-byte mini header for the next message.
pub(crate) async fn read_header(reader: &mut ChannelReader) -> ChannelResult<SpiceMiniDataHeader> {
    let mut buf = [0u8; SPICE_MINI_HEADER_SIZE];
    reader.transport.read_exact(&mut buf).await?;
    let header =
        SpiceMiniDataHeader::read(&mut Cursor::new(&buf[..])).map_err(SpiceError::from)?;
    Ok(header)
}

/// Fill the channel's payload buffer with exactly `size` bytes.
pub(crate) async fn read_payload(reader: &mut ChannelReader, size: usize) -> ChannelResult<&[u8]> {
    let ChannelReader { transport, payload } = reader;
    payload.resize(size, 0);
    transport.read_exact(&mut payload[..size]).await?;
    Ok(&payload[..size])
}

/// Throw away exactly `size` bytes without materializing them.
pub(crate) async fn discard(reader: &mut ChannelReader, size: usize) -> ChannelResult<()> {
    let mut chunk = [0u8; 1024];
    let mut left = size;
    while left > 0 {
        let n = left.min(chunk.len());
        reader.transport.read_exact(&mut chunk[..n]).await?;
        left -= n;
    }
    Ok(())
}

/// Count one received message header against the server's ack window,
/// emitting a one-byte ack when the window fills. A window of zero
/// (unset) suppresses acks entirely.
pub(crate) async fn ack_credit(slot: &ChannelSlot) -> Result<()> {
    let window = slot.ack_window.load(Ordering::Acquire);
    if window == 0 {
        return Ok(());
    }
    let count = slot.ack_count.load(Ordering::Relaxed) + 1;
    if count >= window {
        slot.ack_count.store(0, Ordering::Relaxed);
        send_packet(slot, SPICE_MSGC_ACK, &[0]).await
    } else {
        slot.ack_count.store(count, Ordering::Relaxed);
        Ok(())
    }
}

/// Handle the message types shared by every channel. Returns `true`
/// when the message was consumed here.
pub(crate) async fn handle_common_message(
    inner: &Arc<SessionInner>,
    kind: ChannelKind,
    reader: &mut ChannelReader,
    header: &SpiceMiniDataHeader,
) -> ChannelResult<bool> {
    let slot = inner.slot(kind);
    let size = header.size as usize;

    match header.msg_type {
        SPICE_MSG_MIGRATE | SPICE_MSG_MIGRATE_DATA | SPICE_MSG_WAIT_FOR_CHANNELS => {
            discard(reader, size).await?;
            Ok(true)
        }

        SPICE_MSG_SET_ACK => {
            let payload = read_payload(reader, size).await?;
            let msg = SpiceMsgSetAck::read(&mut Cursor::new(payload)).map_err(SpiceError::from)?;
            slot.ack_window.store(msg.window, Ordering::Release);
            slot.ack_count.store(0, Ordering::Relaxed);
            debug!(
                "{} channel ack window set to {} (generation {})",
                kind.name(),
                msg.window,
                msg.generation
            );

            let reply = SpiceMsgcAckSync {
                generation: msg.generation,
            };
            let mut cur = Cursor::new(Vec::new());
            reply.write(&mut cur).map_err(SpiceError::from)?;
            send_packet(slot, SPICE_MSGC_ACK_SYNC, &cur.into_inner()).await?;
            Ok(true)
        }

        SPICE_MSG_PING => {
            let payload = read_payload(reader, size).await?;
            let ping = SpiceMsgPing::read(&mut Cursor::new(payload)).map_err(SpiceError::from)?;

            let pong = SpiceMsgcPong {
                id: ping.id,
                timestamp: ping.timestamp,
            };
            let mut cur = Cursor::new(Vec::new());
            pong.write(&mut cur).map_err(SpiceError::from)?;
            send_packet(slot, SPICE_MSGC_PONG, &cur.into_inner()).await?;
            Ok(true)
        }

        SPICE_MSG_DISCONNECTING => {
            discard(reader, size).await?;
            info!("server is disconnecting the {} channel", kind.name());
            let mut guard = slot.writer.lock().await;
            if let Some(writer) = guard.as_mut() {
                let _ = writer.shutdown().await;
            }
            *guard = None;
            slot.ready.store(false, Ordering::Release);
            slot.connected.store(false, Ordering::Release);
            Ok(true)
        }

        SPICE_MSG_NOTIFY => {
            let payload = read_payload(reader, size).await?;
            let msg = SpiceMsgNotify::read(&mut Cursor::new(payload)).map_err(SpiceError::from)?;
            let text_start = SPICE_MSG_NOTIFY_FIXED_SIZE;
            let text_end = (text_start + msg.message_len as usize).min(payload.len());
            let text = String::from_utf8_lossy(&payload[text_start..text_end]);
            info!("[notify] {}", text);
            Ok(true)
        }

        _ => Ok(false),
    }
}
