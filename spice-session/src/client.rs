//! Top-level session: owns the channel table, drives all channels
//! through one poller and exposes the public API.
//!
//! The session is a cheap-to-clone handle over shared state. All
//! receive-side work (framing, dispatch, callbacks) happens on whatever
//! task calls [`SpiceSession::process`]; the outbound APIs only touch
//! the per-channel send locks and a few atomics, so application threads
//! may call them concurrently with `process` through their own clones of
//! the handle. `process`, `connect` and `disconnect` must not be called
//! concurrently with themselves.

use crate::agent::{self, Agent};
use crate::channels::{
    connection, cursor, display, inputs, main, playback, record, ChannelError, ChannelReader,
    ChannelSlot, MouseButton, RecvState,
};
use crate::config::SpiceConfig;
use crate::error::{Result, SpiceError};
use crate::protocol::*;
use crate::transport::TransportAddress;
use crate::wire_format::append_packet;
use binrw::io::Cursor;
use binrw::BinWrite;
use futures::future::select_all;
use futures::FutureExt;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// What one `process` tick observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Keep calling `process`; the session is healthy (data handled, or
    /// the poll timed out).
    Run,
    /// Every channel has closed; the session is finished.
    Shutdown,
    /// Polling for readiness failed while the session was connected.
    ErrPoll,
    /// A handler failed to read or decode a message.
    ErrRead,
    /// An ack packet could not be sent.
    ErrAck,
}

/// Name and UUID the server reported for itself.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub name: String,
    pub uuid: [u8; 16],
}

/// Shared pointer state: the button mask every mouse packet carries and
/// the count of motion packets the server has not acked yet.
pub(crate) struct MouseState {
    pub buttons: StdMutex<u16>,
    pub sent_count: AtomicI32,
}

pub(crate) struct SessionInner {
    pub config: SpiceConfig,
    pub address: TransportAddress,
    pub connected: AtomicBool,
    pub session_id: AtomicU32,
    pub server_name: StdMutex<Option<String>>,
    pub server_uuid: StdMutex<Option<[u8; 16]>>,
    /// Server's main channel advertises name-and-UUID messages.
    pub name_and_uuid_cap: AtomicBool,
    /// Server's display channel accepts a preferred-compression request.
    pub pref_compression_cap: AtomicBool,
    pub channels_listed: AtomicBool,
    ready_fired: AtomicBool,
    pub channels: [ChannelSlot; CHANNEL_COUNT],
    pub agent: Agent,
    pub mouse: MouseState,
    pub kb_modifiers: AtomicU32,
    /// Scratch for mouse motion bursts, grown on demand.
    pub motion_buffer: Mutex<Vec<u8>>,
    /// All receive-side state; held for the duration of a `process`
    /// tick.
    pub recv: Mutex<RecvState>,
}

impl SessionInner {
    pub fn slot(&self, kind: ChannelKind) -> &ChannelSlot {
        &self.channels[kind.index()]
    }

    /// The configuration's enable/auto-connect switches for a channel.
    pub fn channel_opts(&self, kind: ChannelKind) -> (bool, bool) {
        match kind {
            ChannelKind::Main => (true, true),
            ChannelKind::Inputs => (self.config.inputs.enable, self.config.inputs.auto_connect),
            ChannelKind::Playback => (
                self.config.playback.enable,
                self.config.playback.auto_connect,
            ),
            ChannelKind::Record => (self.config.record.enable, self.config.record.auto_connect),
            ChannelKind::Display => (self.config.display.enable, self.config.display.auto_connect),
            ChannelKind::Cursor => (self.config.cursor.enable, self.config.cursor.auto_connect),
        }
    }

    /// Fire the application's `ready` callback on the edge where the
    /// session becomes fully usable: the channels list is in and, when
    /// the server advertises them, its name and UUID have both arrived.
    pub fn maybe_fire_ready(&self) {
        if !self.channels_listed.load(Ordering::Acquire) {
            return;
        }
        if self.name_and_uuid_cap.load(Ordering::Acquire) {
            let have_name = self.server_name.lock().unwrap().is_some();
            let have_uuid = self.server_uuid.lock().unwrap().is_some();
            if !have_name || !have_uuid {
                return;
            }
        }
        if !self.ready_fired.swap(true, Ordering::AcqRel) {
            if let Some(ready) = &self.config.ready {
                ready();
            }
        }
    }
}

enum ServiceError {
    NoData,
    Read(SpiceError),
    Ack(SpiceError),
}

/// A connected SPICE session. Clone the handle freely; all clones refer
/// to the same session.
#[derive(Clone)]
pub struct SpiceSession {
    inner: Arc<SessionInner>,
}

impl SpiceSession {
    /// Validate the configuration, resolve the address and bring up the
    /// main channel. On success the session is connected and must be
    /// driven with [`process`](Self::process).
    pub async fn connect(config: SpiceConfig) -> Result<SpiceSession> {
        config.validate()?;
        let address = TransportAddress::resolve(&config.host, config.port)?;
        match &address {
            TransportAddress::Unix(path) => {
                info!("connecting to unix socket {}", path.display())
            }
            TransportAddress::Tcp(addr) => info!("connecting to {}", addr),
        }

        let inner = Arc::new(SessionInner {
            config,
            address,
            connected: AtomicBool::new(false),
            session_id: AtomicU32::new(0),
            server_name: StdMutex::new(None),
            server_uuid: StdMutex::new(None),
            name_and_uuid_cap: AtomicBool::new(false),
            pref_compression_cap: AtomicBool::new(false),
            channels_listed: AtomicBool::new(false),
            ready_fired: AtomicBool::new(false),
            channels: std::array::from_fn(|i| ChannelSlot::new(ChannelKind::ALL[i])),
            agent: Agent::new(),
            mouse: MouseState {
                buttons: StdMutex::new(0),
                sent_count: AtomicI32::new(0),
            },
            kb_modifiers: AtomicU32::new(0),
            motion_buffer: Mutex::new(Vec::new()),
            recv: Mutex::new(RecvState::new()),
        });

        {
            let mut recv = inner.recv.lock().await;
            connection::connect_channel(&inner, &mut recv, ChannelKind::Main).await?;
        }
        inner.connected.store(true, Ordering::Release);

        Ok(SpiceSession { inner })
    }

    /// One cooperative tick: honor deferred disconnects, wait up to
    /// `timeout` for any channel to become readable, then handle at most
    /// one message per ready channel so a noisy channel cannot starve
    /// the others.
    pub async fn process(&self, timeout: Duration) -> Status {
        let inner = &self.inner;
        let mut recv = inner.recv.lock().await;

        for kind in ChannelKind::ALL {
            if inner
                .slot(kind)
                .pending_disconnect
                .swap(false, Ordering::AcqRel)
            {
                connection::disconnect_channel(inner, &mut recv, kind).await;
            }
        }

        if !self.any_channel_connected() {
            return self.finish_shutdown(&mut recv).await;
        }

        enum Wake {
            Ready,
            TimedOut,
            PollError,
        }

        let wake = {
            let mut futs = Vec::new();
            for reader in recv.readers.iter().flatten() {
                futs.push(reader.transport.readable());
            }
            if futs.is_empty() {
                Wake::PollError
            } else {
                match tokio::time::timeout(timeout, select_all(futs)).await {
                    Err(_) => Wake::TimedOut,
                    Ok((Ok(()), _, _)) => Wake::Ready,
                    Ok((Err(_), _, _)) => Wake::PollError,
                }
            }
        };

        match wake {
            Wake::TimedOut => return Status::Run,
            Wake::PollError => {
                return if inner.connected.load(Ordering::Acquire) {
                    Status::ErrPoll
                } else {
                    self.finish_shutdown(&mut recv).await
                };
            }
            Wake::Ready => {}
        }

        for kind in ChannelKind::ALL {
            let idx = kind.index();
            let ready_now = match recv.readers[idx].as_ref() {
                Some(reader) => matches!(
                    reader.transport.readable().now_or_never(),
                    Some(Ok(()))
                ),
                None => false,
            };
            if !ready_now {
                continue;
            }

            let mut reader = match recv.readers[idx].take() {
                Some(reader) => reader,
                None => continue,
            };

            match handle_one_message(inner, &mut recv, kind, &mut reader).await {
                Ok(()) => {
                    if inner.slot(kind).is_connected() {
                        recv.readers[idx] = Some(reader);
                    }
                }
                Err(ServiceError::NoData) => {
                    info!("{} channel closed by the server", kind.name());
                    self.close_channel(&mut recv, kind).await;
                }
                Err(ServiceError::Read(err)) => {
                    warn!("{} channel read failed: {err}", kind.name());
                    return Status::ErrRead;
                }
                Err(ServiceError::Ack(err)) => {
                    warn!("{} channel ack failed: {err}", kind.name());
                    return Status::ErrAck;
                }
            }
        }

        if !self.any_channel_connected() {
            return self.finish_shutdown(&mut recv).await;
        }
        Status::Run
    }

    /// Tear the whole session down: every channel in reverse order, then
    /// the agent and the scratch state. `process` afterwards reports
    /// `Shutdown`.
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        inner.connected.store(false, Ordering::Release);

        let mut recv = inner.recv.lock().await;
        for kind in ChannelKind::ALL.iter().rev() {
            connection::disconnect_channel(inner, &mut recv, *kind).await;
        }

        inner.agent.disconnect();
        *inner.motion_buffer.lock().await = Vec::new();
        inner.session_id.store(0, Ordering::Release);
        for slot in &inner.channels {
            slot.available.store(false, Ordering::Release);
        }
        info!("disconnected");
    }

    /// The server advertised this channel.
    pub fn has_channel(&self, kind: ChannelKind) -> bool {
        self.inner.slot(kind).available.load(Ordering::Acquire)
    }

    pub fn channel_connected(&self, kind: ChannelKind) -> bool {
        self.inner.slot(kind).is_connected()
    }

    /// Bring up an advertised channel on demand (the full handshake plus
    /// the channel's connect-time traffic).
    pub async fn connect_channel(&self, kind: ChannelKind) -> Result<()> {
        if kind == ChannelKind::Main {
            return Err(SpiceError::Config(
                "the main channel is managed by the session".into(),
            ));
        }
        let (enable, _) = self.inner.channel_opts(kind);
        if !enable {
            return Err(SpiceError::Config(format!(
                "{} channel is not enabled",
                kind.name()
            )));
        }
        if !self.has_channel(kind) {
            return Err(SpiceError::Protocol(format!(
                "server does not advertise a {} channel",
                kind.name()
            )));
        }
        if self.channel_connected(kind) {
            return Ok(());
        }

        let mut recv = self.inner.recv.lock().await;
        connection::connect_channel(&self.inner, &mut recv, kind).await
    }

    /// Ask for a channel to be torn down. The teardown happens at the
    /// start of the next `process` tick, never from inside a handler.
    pub fn disconnect_channel(&self, kind: ChannelKind) -> Result<()> {
        if kind == ChannelKind::Main {
            return Err(SpiceError::Config(
                "the main channel is managed by the session".into(),
            ));
        }
        let slot = self.inner.slot(kind);
        if slot.is_connected() {
            slot.pending_disconnect.store(true, Ordering::Release);
        }
        Ok(())
    }

    /// Name and UUID of the server, once both have arrived.
    pub fn server_info(&self) -> Option<ServerInfo> {
        let name = self.inner.server_name.lock().unwrap().clone()?;
        let uuid = (*self.inner.server_uuid.lock().unwrap())?;
        Some(ServerInfo { name, uuid })
    }

    pub async fn key_down(&self, code: u32) -> Result<()> {
        let slot = self.connected_slot(ChannelKind::Inputs)?;
        let msg = SpiceMsgcKeyDown {
            code: inputs::key_down_code(code),
        };
        let mut cur = Cursor::new(Vec::new());
        msg.write(&mut cur)?;
        connection::send_packet(slot, SPICE_MSGC_INPUTS_KEY_DOWN, &cur.into_inner()).await
    }

    pub async fn key_up(&self, code: u32) -> Result<()> {
        let slot = self.connected_slot(ChannelKind::Inputs)?;
        let msg = SpiceMsgcKeyUp {
            code: inputs::key_up_code(code),
        };
        let mut cur = Cursor::new(Vec::new());
        msg.write(&mut cur)?;
        connection::send_packet(slot, SPICE_MSGC_INPUTS_KEY_UP, &cur.into_inner()).await
    }

    pub async fn key_modifiers(&self, modifiers: u32) -> Result<()> {
        let slot = self.connected_slot(ChannelKind::Inputs)?;
        let msg = SpiceMsgcInputsKeyModifiers {
            modifiers: modifiers as u16,
        };
        let mut cur = Cursor::new(Vec::new());
        msg.write(&mut cur)?;
        connection::send_packet(slot, SPICE_MSGC_INPUTS_KEY_MODIFIERS, &cur.into_inner()).await
    }

    /// Request server or client pointer mode.
    pub async fn mouse_mode(&self, server: bool) -> Result<()> {
        self.connected_slot(ChannelKind::Main)?;
        main::send_mouse_mode(&self.inner, server).await
    }

    /// Absolute pointer position; only meaningful while the server is in
    /// client mode.
    pub async fn mouse_position(&self, x: u32, y: u32) -> Result<()> {
        let slot = self.connected_slot(ChannelKind::Inputs)?;
        let button_state = *self.inner.mouse.buttons.lock().unwrap();
        let msg = SpiceMsgcMousePosition {
            x,
            y,
            button_state,
            display_id: 0,
        };
        let mut cur = Cursor::new(Vec::new());
        msg.write(&mut cur)?;

        self.inner.mouse.sent_count.fetch_add(1, Ordering::AcqRel);
        connection::send_packet(slot, SPICE_MSGC_INPUTS_MOUSE_POSITION, &cur.into_inner()).await
    }

    /// Relative pointer motion. Large deltas are split into +-127
    /// sub-packets, packed into one scratch buffer and emitted in a
    /// single socket write so the burst is atomic on the wire.
    pub async fn mouse_motion(&self, dx: i32, dy: i32) -> Result<()> {
        let slot = self.connected_slot(ChannelKind::Inputs)?;

        let deltas = inputs::motion_deltas(dx, dy);
        if deltas.is_empty() {
            return Ok(());
        }
        let button_state = *self.inner.mouse.buttons.lock().unwrap();

        let mut buf = self.inner.motion_buffer.lock().await;
        buf.clear();
        for (x, y) in &deltas {
            let mut payload = [0u8; SPICE_MSGC_MOUSE_MOTION_SIZE];
            payload[0..4].copy_from_slice(&x.to_le_bytes());
            payload[4..8].copy_from_slice(&y.to_le_bytes());
            payload[8..10].copy_from_slice(&button_state.to_le_bytes());
            append_packet(&mut buf, SPICE_MSGC_INPUTS_MOUSE_MOTION, &payload);
        }

        self.inner
            .mouse
            .sent_count
            .fetch_add(deltas.len() as i32, Ordering::AcqRel);
        connection::send_raw(slot, &buf).await
    }

    pub async fn mouse_press(&self, button: MouseButton) -> Result<()> {
        self.mouse_button(button, true).await
    }

    pub async fn mouse_release(&self, button: MouseButton) -> Result<()> {
        self.mouse_button(button, false).await
    }

    async fn mouse_button(&self, button: MouseButton, pressed: bool) -> Result<()> {
        let slot = self.connected_slot(ChannelKind::Inputs)?;

        let button_state = {
            let mut buttons = self.inner.mouse.buttons.lock().unwrap();
            if pressed {
                *buttons |= button.mask();
            } else {
                *buttons &= !button.mask();
            }
            *buttons
        };

        let msg = SpiceMsgcMousePress {
            button: button.code(),
            button_state,
        };
        let mut cur = Cursor::new(Vec::new());
        msg.write(&mut cur)?;

        let msg_type = if pressed {
            SPICE_MSGC_INPUTS_MOUSE_PRESS
        } else {
            SPICE_MSGC_INPUTS_MOUSE_RELEASE
        };
        connection::send_packet(slot, msg_type, &cur.into_inner()).await
    }

    /// Ask the agent for the clipboard data it advertised.
    pub async fn clipboard_request(&self, dtype: DataType) -> Result<()> {
        agent::clipboard_request(&self.inner, dtype).await
    }

    /// Claim the clipboard for the local side, advertising `types`.
    pub async fn clipboard_grab(&self, types: &[DataType]) -> Result<()> {
        agent::clipboard_grab(&self.inner, types).await
    }

    /// Release a local clipboard claim; a no-op without one.
    pub async fn clipboard_release(&self) -> Result<()> {
        agent::clipboard_release(&self.inner).await
    }

    /// Open an outbound clipboard transfer of `size` bytes.
    pub async fn clipboard_data_start(&self, dtype: DataType, size: usize) -> Result<()> {
        agent::clipboard_data_start(&self.inner, dtype, size).await
    }

    /// Append data to the transfer opened by `clipboard_data_start`.
    pub async fn clipboard_data(&self, data: &[u8]) -> Result<()> {
        agent::clipboard_data(&self.inner, data).await
    }

    /// Send captured audio samples to the guest.
    pub async fn write_audio(&self, data: &[u8], time: u32) -> Result<()> {
        record::write_audio(&self.inner, data, time).await
    }

    fn connected_slot(&self, kind: ChannelKind) -> Result<&ChannelSlot> {
        let slot = self.inner.slot(kind);
        if !slot.is_connected() {
            return Err(SpiceError::Protocol(format!(
                "{} channel is not connected",
                kind.name()
            )));
        }
        Ok(slot)
    }

    fn any_channel_connected(&self) -> bool {
        self.inner.channels.iter().any(|slot| slot.is_connected())
    }

    /// Quietly drop a channel whose socket hit EOF; the rest of the
    /// session keeps running.
    async fn close_channel(&self, recv: &mut RecvState, kind: ChannelKind) {
        let slot = self.inner.slot(kind);
        slot.connected.store(false, Ordering::Release);
        slot.ready.store(false, Ordering::Release);
        *slot.writer.lock().await = None;
        recv.readers[kind.index()] = None;
        slot.reset();
    }

    /// Close everything in reverse order and report `Shutdown`.
    async fn finish_shutdown(&self, recv: &mut RecvState) -> Status {
        for kind in ChannelKind::ALL.iter().rev() {
            self.close_channel(recv, *kind).await;
        }
        self.inner.session_id.store(0, Ordering::Release);
        self.inner.agent.disconnect();
        if self.inner.connected.swap(false, Ordering::AcqRel) {
            info!("session shut down");
        }
        Status::Shutdown
    }
}

async fn handle_one_message(
    inner: &Arc<SessionInner>,
    recv: &mut RecvState,
    kind: ChannelKind,
    reader: &mut ChannelReader,
) -> std::result::Result<(), ServiceError> {
    let header = connection::read_header(reader).await.map_err(|err| match err {
        ChannelError::NoData => ServiceError::NoData,
        ChannelError::Fatal(err) => ServiceError::Read(err),
    })?;

    debug!(
        "{} channel message type {}, {} bytes",
        kind.name(),
        header.msg_type,
        header.size
    );

    connection::ack_credit(inner.slot(kind))
        .await
        .map_err(ServiceError::Ack)?;

    let map_err = |err: ChannelError| match err {
        ChannelError::NoData => ServiceError::NoData,
        ChannelError::Fatal(err) => ServiceError::Read(err),
    };

    if header.msg_type < SPICE_MSG_BASE_LAST {
        let consumed = connection::handle_common_message(inner, kind, reader, &header)
            .await
            .map_err(map_err)?;
        if consumed {
            return Ok(());
        }
    }

    match kind {
        ChannelKind::Main => main::handle_message(inner, recv, reader, &header).await,
        ChannelKind::Inputs => inputs::handle_message(inner, reader, &header).await,
        ChannelKind::Playback => playback::handle_message(inner, reader, &header).await,
        ChannelKind::Record => record::handle_message(inner, reader, &header).await,
        ChannelKind::Display => display::handle_message(inner, reader, &header).await,
        ChannelKind::Cursor => {
            cursor::handle_message(inner, &mut recv.cursor, reader, &header).await
        }
    }
    .map_err(map_err)
}
