//! Guest agent sub-protocol.
//!
//! The agent is a logical byte stream tunneled inside
//! `SPICE_MSGC_MAIN_AGENT_DATA` / `SPICE_MSG_MAIN_AGENT_DATA` carrier
//! packets of at most [`VD_AGENT_MAX_DATA_SIZE`] payload bytes. Outbound
//! traffic is queued and drained under the main channel's send lock, one
//! server token per carrier packet. Inbound clipboard payloads may span
//! several carriers and are reassembled here before the `data` callback
//! fires exactly once with the complete buffer.

use crate::channels::connection::send_packet;
use crate::client::SessionInner;
use crate::error::{Result, SpiceError};
use crate::protocol::*;
use crate::wire_format::{packet, ByteReader};
use binrw::io::Cursor;
use binrw::BinWrite;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use tracing::{debug, info, warn};

// No real need for flow control on a local connection; do what the
// reference clients do and report the largest possible token count.
const AGENT_TOKENS_MAX: u32 = u32::MAX;

pub(crate) fn data_type_to_agent(dtype: DataType) -> u32 {
    match dtype {
        DataType::Text => VD_AGENT_CLIPBOARD_UTF8_TEXT,
        DataType::Png => VD_AGENT_CLIPBOARD_IMAGE_PNG,
        DataType::Bmp => VD_AGENT_CLIPBOARD_IMAGE_BMP,
        DataType::Tiff => VD_AGENT_CLIPBOARD_IMAGE_TIFF,
        DataType::Jpeg => VD_AGENT_CLIPBOARD_IMAGE_JPG,
        DataType::None => VD_AGENT_CLIPBOARD_NONE,
    }
}

pub(crate) fn agent_type_to_data(atype: u32) -> DataType {
    match atype {
        VD_AGENT_CLIPBOARD_UTF8_TEXT => DataType::Text,
        VD_AGENT_CLIPBOARD_IMAGE_PNG => DataType::Png,
        VD_AGENT_CLIPBOARD_IMAGE_BMP => DataType::Bmp,
        VD_AGENT_CLIPBOARD_IMAGE_TIFF => DataType::Tiff,
        VD_AGENT_CLIPBOARD_IMAGE_JPG => DataType::Jpeg,
        _ => DataType::None,
    }
}

/// Clipboard ownership and inbound reassembly state.
#[derive(Default)]
pub(crate) struct ClipboardState {
    /// Agent supports clipboard-by-demand (or selections).
    pub supported: bool,
    /// Agent speaks the selection-aware variant: clipboard messages
    /// carry a 4-byte selection header.
    pub selection: bool,
    /// The guest side currently owns the clipboard.
    pub agent_grabbed: bool,
    /// The local side currently owns the clipboard.
    pub client_grabbed: bool,
    /// Data type advertised by the most recent grab.
    pub data_type: DataType,
    buffer: Option<Vec<u8>>,
    remain: usize,
}

impl ClipboardState {
    /// Start reassembling an inbound clipboard payload of `total` bytes,
    /// of which `first` arrived in the same carrier. Returns the
    /// completed payload if nothing remains outstanding.
    pub fn begin_incoming(
        &mut self,
        total: usize,
        first: &[u8],
    ) -> Result<Option<(DataType, Vec<u8>)>> {
        if self.buffer.is_some() {
            return Err(SpiceError::Protocol(
                "agent started a new clipboard transfer mid reassembly".into(),
            ));
        }
        let take = first.len().min(total);
        let mut buffer = Vec::with_capacity(total);
        buffer.extend_from_slice(&first[..take]);
        self.remain = total - take;
        self.buffer = Some(buffer);
        Ok(self.finish_if_complete())
    }

    /// Feed a continuation carrier into the reassembly buffer.
    pub fn continue_incoming(&mut self, chunk: &[u8]) -> Option<(DataType, Vec<u8>)> {
        let buffer = self.buffer.as_mut()?;
        let take = chunk.len().min(self.remain);
        buffer.extend_from_slice(&chunk[..take]);
        self.remain -= take;
        self.finish_if_complete()
    }

    pub fn reassembling(&self) -> bool {
        self.buffer.is_some() && self.remain > 0
    }

    fn finish_if_complete(&mut self) -> Option<(DataType, Vec<u8>)> {
        if self.remain == 0 {
            self.buffer.take().map(|buf| (self.data_type, buf))
        } else {
            None
        }
    }

    fn drop_incoming(&mut self) {
        self.buffer = None;
        self.remain = 0;
    }
}

/// Agent state: liveness, the token-metered outbound queue and the
/// clipboard sub-state. Re-created (logically) every time the server
/// reports the agent connected.
pub(crate) struct Agent {
    present: AtomicBool,
    tokens: AtomicU32,
    queue: Mutex<VecDeque<Vec<u8>>>,
    /// Bytes the current outbound message may still append; guards the
    /// caller against overrunning the declared total.
    msg_size: Mutex<usize>,
    pub clipboard: Mutex<ClipboardState>,
}

impl Agent {
    pub fn new() -> Self {
        Self {
            present: AtomicBool::new(false),
            tokens: AtomicU32::new(0),
            queue: Mutex::new(VecDeque::new()),
            msg_size: Mutex::new(0),
            clipboard: Mutex::new(ClipboardState::default()),
        }
    }

    pub fn is_present(&self) -> bool {
        self.present.load(Ordering::Acquire)
    }

    pub fn set_tokens(&self, tokens: u32) {
        self.tokens.store(tokens, Ordering::Release);
    }

    pub fn add_tokens(&self, tokens: u32) {
        self.tokens.fetch_add(tokens, Ordering::AcqRel);
    }

    /// Take one send credit, or report that none are left.
    fn take_token(&self) -> bool {
        let mut current = self.tokens.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return false;
            }
            match self.tokens.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    fn clear_queue(&self) {
        self.queue.lock().unwrap().clear();
    }

    /// Tear down agent state; the session may later restart the agent.
    pub fn disconnect(&self) {
        self.clear_queue();
        let mut cb = self.clipboard.lock().unwrap();
        cb.drop_incoming();
        cb.agent_grabbed = false;
        cb.client_grabbed = false;
        self.present.store(false, Ordering::Release);
    }
}

/// Start (or restart) the agent: flush any stale queue, send the
/// agent-start packet with our token budget and announce capabilities.
pub(crate) async fn connect(inner: &SessionInner) -> Result<()> {
    inner.agent.clear_queue();

    let slot = inner.slot(ChannelKind::Main);
    send_packet(
        slot,
        SPICE_MSGC_MAIN_AGENT_START,
        &AGENT_TOKENS_MAX.to_le_bytes(),
    )
    .await?;

    inner.agent.present.store(true, Ordering::Release);
    if let Err(err) = send_caps(inner, true).await {
        inner.agent.present.store(false, Ordering::Release);
        warn!("failed to announce agent capabilities: {err}");
        return Err(err);
    }

    info!("connected to the guest agent");
    Ok(())
}

/// Queue the header packet of a new agent message declaring `size`
/// payload bytes, then try to drain the queue.
async fn start_msg(inner: &SessionInner, msg_type: u32, size: usize) -> Result<()> {
    let header = VDAgentMessage {
        protocol: VD_AGENT_PROTOCOL,
        msg_type,
        opaque: 0,
        size: size as u32,
    };
    let mut cur = Cursor::new(Vec::with_capacity(VD_AGENT_MESSAGE_SIZE));
    header.write(&mut cur)?;

    {
        let mut queue = inner.agent.queue.lock().unwrap();
        queue.push_back(packet(SPICE_MSGC_MAIN_AGENT_DATA, &cur.into_inner()));
    }
    *inner.agent.msg_size.lock().unwrap() = size;

    process_queue(inner).await
}

/// Queue message body bytes, fragmented into carrier-sized packets, then
/// try to drain the queue.
async fn write_msg(inner: &SessionInner, mut data: &[u8]) -> Result<()> {
    {
        let mut msg_size = inner.agent.msg_size.lock().unwrap();
        if data.len() > *msg_size {
            return Err(SpiceError::Protocol(format!(
                "agent write of {} bytes overruns the declared message size ({} left)",
                data.len(),
                *msg_size
            )));
        }
        *msg_size -= data.len();
    }

    {
        let mut queue = inner.agent.queue.lock().unwrap();
        while !data.is_empty() {
            let take = data.len().min(VD_AGENT_MAX_DATA_SIZE);
            queue.push_back(packet(SPICE_MSGC_MAIN_AGENT_DATA, &data[..take]));
            data = &data[take..];
        }
    }

    process_queue(inner).await
}

/// Drain the outbound queue under the main channel's send lock, spending
/// one token per carrier packet. Stops when the queue empties or tokens
/// run out; the remainder waits for the next `AGENT_TOKEN` grant.
pub(crate) async fn process_queue(inner: &SessionInner) -> Result<()> {
    let slot = inner.slot(ChannelKind::Main);
    let mut guard = slot.writer.lock().await;

    loop {
        if inner.agent.queue.lock().unwrap().is_empty() {
            break;
        }
        if !inner.agent.take_token() {
            debug!("agent queue stalled waiting for server tokens");
            break;
        }
        let next = inner.agent.queue.lock().unwrap().pop_front();
        let Some(pkt) = next else {
            inner.agent.add_tokens(1);
            break;
        };
        let writer = guard.as_mut().ok_or(SpiceError::ConnectionClosed)?;
        writer.write_all(&pkt).await?;
    }

    Ok(())
}

/// Announce our capabilities; with `request` set the agent is asked to
/// reply with its own.
async fn send_caps(inner: &SessionInner, request: bool) -> Result<()> {
    if !inner.agent.is_present() {
        return Err(SpiceError::Protocol("agent is not connected".into()));
    }

    let clipboard = inner.config.clipboard.enable;
    let mut body = Vec::with_capacity(4 + VD_AGENT_CAPS_WORDS * 4);
    body.extend_from_slice(&u32::from(clipboard && request).to_le_bytes());
    let mut caps = [0u32; VD_AGENT_CAPS_WORDS];
    if clipboard {
        caps[(VD_AGENT_CAP_CLIPBOARD_BY_DEMAND / 32) as usize] |=
            1 << (VD_AGENT_CAP_CLIPBOARD_BY_DEMAND % 32);
        caps[(VD_AGENT_CAP_CLIPBOARD_SELECTION / 32) as usize] |=
            1 << (VD_AGENT_CAP_CLIPBOARD_SELECTION % 32);
    }
    for word in caps {
        body.extend_from_slice(&word.to_le_bytes());
    }

    start_msg(inner, VD_AGENT_ANNOUNCE_CAPABILITIES, body.len()).await?;
    write_msg(inner, &body).await
}

/// Route one inbound `MAIN_AGENT_DATA` carrier payload.
pub(crate) async fn process_data(inner: &SessionInner, payload: &[u8]) -> Result<()> {
    // A reassembly in progress swallows whole carriers until done.
    let completed = {
        let mut cb = inner.agent.clipboard.lock().unwrap();
        if cb.reassembling() {
            Some(cb.continue_incoming(payload))
        } else {
            None
        }
    };
    if let Some(done) = completed {
        if let Some((dtype, buffer)) = done {
            deliver_clipboard(inner, dtype, &buffer);
        }
        return Ok(());
    }

    let mut r = ByteReader::new(payload);
    let protocol = r.read_u32()?;
    let msg_type = r.read_u32()?;
    let _opaque = r.read_u64()?;
    let msg_size = r.read_u32()? as usize;

    if protocol != VD_AGENT_PROTOCOL {
        return Err(SpiceError::Protocol(format!(
            "agent protocol {VD_AGENT_PROTOCOL} expected, got {protocol}"
        )));
    }

    match msg_type {
        VD_AGENT_ANNOUNCE_CAPABILITIES => {
            let request = r.read_u32()?;
            let words = (msg_size.saturating_sub(4)) / 4;
            let mut caps = Vec::with_capacity(words);
            for _ in 0..words {
                caps.push(r.read_u32()?);
            }

            {
                let mut cb = inner.agent.clipboard.lock().unwrap();
                cb.supported = Caps::has(&caps, VD_AGENT_CAP_CLIPBOARD_BY_DEMAND)
                    || Caps::has(&caps, VD_AGENT_CAP_CLIPBOARD_SELECTION);
                cb.selection = Caps::has(&caps, VD_AGENT_CAP_CLIPBOARD_SELECTION);
                debug!(
                    "agent capabilities: clipboard by demand {}, selection {}",
                    cb.supported, cb.selection
                );
            }

            if request != 0 {
                send_caps(inner, false).await?;
            }
            Ok(())
        }

        VD_AGENT_CLIPBOARD
        | VD_AGENT_CLIPBOARD_REQUEST
        | VD_AGENT_CLIPBOARD_GRAB
        | VD_AGENT_CLIPBOARD_RELEASE => {
            let mut remaining = msg_size;
            let selection = inner.agent.clipboard.lock().unwrap().selection;
            if selection {
                r.skip(4)?;
                remaining = remaining.saturating_sub(4);
            }

            match msg_type {
                VD_AGENT_CLIPBOARD_RELEASE => {
                    inner.agent.clipboard.lock().unwrap().agent_grabbed = false;
                    if let Some(release) = &inner.config.clipboard.release {
                        release();
                    }
                    Ok(())
                }

                VD_AGENT_CLIPBOARD => {
                    let dtype = agent_type_to_data(r.read_u32()?);
                    remaining = remaining.saturating_sub(4);

                    let completed = {
                        let mut cb = inner.agent.clipboard.lock().unwrap();
                        cb.data_type = dtype;
                        cb.begin_incoming(remaining, r.rest())?
                    };
                    if let Some((dtype, buffer)) = completed {
                        deliver_clipboard(inner, dtype, &buffer);
                    }
                    Ok(())
                }

                VD_AGENT_CLIPBOARD_REQUEST => {
                    let dtype = agent_type_to_data(r.read_u32()?);
                    if let Some(request) = &inner.config.clipboard.request {
                        request(dtype);
                    }
                    Ok(())
                }

                _ => {
                    // VD_AGENT_CLIPBOARD_GRAB
                    if remaining == 0 {
                        return Ok(());
                    }
                    let mut types = Vec::with_capacity(remaining / 4);
                    for _ in 0..remaining / 4 {
                        types.push(r.read_u32()?);
                    }

                    // The types field is undocumented; retain only the
                    // first entry.
                    let dtype = agent_type_to_data(types[0]);
                    let skip_notice = {
                        let mut cb = inner.agent.clipboard.lock().unwrap();
                        cb.data_type = dtype;
                        cb.agent_grabbed = true;
                        cb.client_grabbed = false;
                        // Windows guests have no selection support, so
                        // the selection-aware grab path stops here.
                        cb.selection
                    };
                    if !skip_notice {
                        if let Some(notice) = &inner.config.clipboard.notice {
                            notice(dtype);
                        }
                    }
                    Ok(())
                }
            }
        }

        _ => {
            debug!("ignoring agent message type {msg_type}");
            Ok(())
        }
    }
}

fn deliver_clipboard(inner: &SessionInner, dtype: DataType, buffer: &[u8]) {
    if let Some(data) = &inner.config.clipboard.data {
        data(dtype, buffer);
    }
}

/// Ask the agent for the clipboard data it advertised. The type must
/// match the advertised one.
pub(crate) async fn clipboard_request(inner: &SessionInner, dtype: DataType) -> Result<()> {
    if !inner.agent.is_present() {
        return Err(SpiceError::Protocol("agent is not connected".into()));
    }
    {
        let cb = inner.agent.clipboard.lock().unwrap();
        if !cb.agent_grabbed {
            return Err(SpiceError::Protocol(
                "agent does not own the clipboard".into(),
            ));
        }
        if dtype != cb.data_type {
            return Err(SpiceError::Protocol(
                "requested type does not match the advertised clipboard type".into(),
            ));
        }
    }

    let body = data_type_to_agent(dtype).to_le_bytes();
    start_msg(inner, VD_AGENT_CLIPBOARD_REQUEST, body.len()).await?;
    write_msg(inner, &body).await
}

/// Claim the clipboard for the local side, advertising the given types.
pub(crate) async fn clipboard_grab(inner: &SessionInner, types: &[DataType]) -> Result<()> {
    if !inner.agent.is_present() {
        return Err(SpiceError::Protocol("agent is not connected".into()));
    }
    if types.is_empty() {
        return Err(SpiceError::Config("clipboard grab needs at least one type".into()));
    }

    let selection = inner.agent.clipboard.lock().unwrap().selection;
    let mut body = Vec::with_capacity(4 + types.len() * 4);
    if selection {
        body.extend_from_slice(&[VD_AGENT_CLIPBOARD_SELECTION_CLIPBOARD, 0, 0, 0]);
    }
    for dtype in types {
        body.extend_from_slice(&data_type_to_agent(*dtype).to_le_bytes());
    }

    start_msg(inner, VD_AGENT_CLIPBOARD_GRAB, body.len()).await?;
    write_msg(inner, &body).await?;

    inner.agent.clipboard.lock().unwrap().client_grabbed = true;
    Ok(())
}

/// Give up a clipboard claim. A no-op unless the local side holds one.
pub(crate) async fn clipboard_release(inner: &SessionInner) -> Result<()> {
    if !inner.agent.is_present() {
        return Err(SpiceError::Protocol("agent is not connected".into()));
    }

    let selection = {
        let cb = inner.agent.clipboard.lock().unwrap();
        if !cb.client_grabbed {
            return Ok(());
        }
        cb.selection
    };

    if selection {
        let body = [VD_AGENT_CLIPBOARD_SELECTION_CLIPBOARD, 0, 0, 0];
        start_msg(inner, VD_AGENT_CLIPBOARD_RELEASE, body.len()).await?;
        write_msg(inner, &body).await?;
    } else {
        start_msg(inner, VD_AGENT_CLIPBOARD_RELEASE, 0).await?;
    }

    inner.agent.clipboard.lock().unwrap().client_grabbed = false;
    Ok(())
}

/// Open an outbound clipboard transfer of `size` payload bytes; the data
/// itself follows through [`clipboard_data`].
pub(crate) async fn clipboard_data_start(
    inner: &SessionInner,
    dtype: DataType,
    size: usize,
) -> Result<()> {
    if !inner.agent.is_present() {
        return Err(SpiceError::Protocol("agent is not connected".into()));
    }

    let selection = inner.agent.clipboard.lock().unwrap().selection;
    let mut prefix = Vec::with_capacity(8);
    if selection {
        prefix.extend_from_slice(&[VD_AGENT_CLIPBOARD_SELECTION_CLIPBOARD, 0, 0, 0]);
    }
    prefix.extend_from_slice(&data_type_to_agent(dtype).to_le_bytes());

    start_msg(inner, VD_AGENT_CLIPBOARD, prefix.len() + size).await?;
    write_msg(inner, &prefix).await
}

/// Append data to the transfer opened by [`clipboard_data_start`].
pub(crate) async fn clipboard_data(inner: &SessionInner, data: &[u8]) -> Result<()> {
    if !inner.agent.is_present() {
        return Err(SpiceError::Protocol("agent is not connected".into()));
    }
    write_msg(inner, data).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_type_mapping_round_trips() {
        for dtype in [
            DataType::Text,
            DataType::Png,
            DataType::Bmp,
            DataType::Tiff,
            DataType::Jpeg,
        ] {
            assert_eq!(agent_type_to_data(data_type_to_agent(dtype)), dtype);
        }
        assert_eq!(agent_type_to_data(0xDEAD), DataType::None);
    }

    #[test]
    fn single_carrier_clipboard_completes_immediately() {
        let mut cb = ClipboardState {
            data_type: DataType::Text,
            ..Default::default()
        };
        let done = cb.begin_incoming(5, b"hello").unwrap();
        let (dtype, buffer) = done.expect("payload should be complete");
        assert_eq!(dtype, DataType::Text);
        assert_eq!(buffer, b"hello");
        assert!(!cb.reassembling());
    }

    #[test]
    fn chunked_clipboard_reassembles_in_order() {
        // 2500-byte message split across two carriers; the four type
        // prefix bytes were already consumed, leaving 2496 of data.
        let total = 2496usize;
        let first = vec![0xA5u8; 2024];
        let second = vec![0x5Au8; total - first.len()];

        let mut cb = ClipboardState {
            data_type: DataType::Text,
            ..Default::default()
        };
        assert!(cb.begin_incoming(total, &first).unwrap().is_none());
        assert!(cb.reassembling());

        let (dtype, buffer) = cb.continue_incoming(&second).expect("second carrier completes");
        assert_eq!(dtype, DataType::Text);
        assert_eq!(buffer.len(), total);
        assert_eq!(&buffer[..2024], &first[..]);
        assert_eq!(&buffer[2024..], &second[..]);
    }

    #[test]
    fn new_transfer_during_reassembly_is_an_error() {
        let mut cb = ClipboardState::default();
        assert!(cb.begin_incoming(10, b"1234").unwrap().is_none());
        assert!(cb.begin_incoming(4, b"wxyz").is_err());
    }

    #[test]
    fn token_cas_never_goes_below_zero() {
        let agent = Agent::new();
        agent.set_tokens(2);
        assert!(agent.take_token());
        assert!(agent.take_token());
        assert!(!agent.take_token());
        agent.add_tokens(1);
        assert!(agent.take_token());
    }
}
