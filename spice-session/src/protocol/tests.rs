use crate::protocol::*;
use binrw::io::Cursor;
use binrw::{BinRead, BinWrite};

#[test]
fn spice_magic_is_redq() {
    assert_eq!(SPICE_MAGIC, 0x51444552);
    assert_eq!(&SPICE_MAGIC.to_le_bytes(), b"REDQ");
}

#[test]
fn protocol_version() {
    assert_eq!(SPICE_VERSION_MAJOR, 2);
    assert_eq!(SPICE_VERSION_MINOR, 2);
}

#[test]
fn channel_type_codes() {
    assert_eq!(ChannelKind::Main.spice_type(), 1);
    assert_eq!(ChannelKind::Display.spice_type(), 2);
    assert_eq!(ChannelKind::Inputs.spice_type(), 3);
    assert_eq!(ChannelKind::Cursor.spice_type(), 4);
    assert_eq!(ChannelKind::Playback.spice_type(), 5);
    assert_eq!(ChannelKind::Record.spice_type(), 6);

    for kind in ChannelKind::ALL {
        assert_eq!(ChannelKind::from_spice_type(kind.spice_type()), Some(kind));
    }
    assert_eq!(ChannelKind::from_spice_type(42), None);
}

#[test]
fn mini_header_is_six_bytes_le() {
    let header = SpiceMiniDataHeader {
        msg_type: 0x1234,
        size: 0x56789ABC,
    };

    let mut cursor = Cursor::new(Vec::new());
    header.write(&mut cursor).unwrap();
    let bytes = cursor.into_inner();

    assert_eq!(bytes.len(), SPICE_MINI_HEADER_SIZE);
    assert_eq!(&bytes[0..2], &0x1234u16.to_le_bytes());
    assert_eq!(&bytes[2..6], &0x56789ABCu32.to_le_bytes());
}

#[test]
fn link_header_is_sixteen_bytes() {
    let header = SpiceLinkHeader {
        magic: SPICE_MAGIC,
        major_version: SPICE_VERSION_MAJOR,
        minor_version: SPICE_VERSION_MINOR,
        size: 178,
    };

    let mut cursor = Cursor::new(Vec::new());
    header.write(&mut cursor).unwrap();
    let bytes = cursor.into_inner();
    assert_eq!(bytes.len(), SPICE_LINK_HEADER_SIZE);

    let parsed = SpiceLinkHeader::read(&mut Cursor::new(&bytes)).unwrap();
    assert_eq!(parsed.magic, SPICE_MAGIC);
    assert_eq!(parsed.size, 178);
}

#[test]
fn link_mess_is_packed_to_eighteen_bytes() {
    let mess = SpiceLinkMess {
        connection_id: 0xCAFEBABE,
        channel_type: 3,
        channel_id: 0,
        num_common_caps: 1,
        num_channel_caps: 1,
        caps_offset: SPICE_LINK_MESS_SIZE as u32,
    };

    let mut cursor = Cursor::new(Vec::new());
    mess.write(&mut cursor).unwrap();
    let bytes = cursor.into_inner();

    assert_eq!(bytes.len(), SPICE_LINK_MESS_SIZE);
    assert_eq!(&bytes[0..4], &0xCAFEBABEu32.to_le_bytes());
    assert_eq!(bytes[4], 3);
    assert_eq!(bytes[5], 0);
    assert_eq!(&bytes[14..18], &18u32.to_le_bytes());
}

#[test]
fn link_reply_round_trips() {
    let reply = SpiceLinkReply {
        error: 0,
        pub_key: [0x42; 162],
        num_common_caps: 1,
        num_channel_caps: 2,
        caps_offset: SPICE_LINK_REPLY_SIZE as u32,
    };

    let mut cursor = Cursor::new(Vec::new());
    reply.write(&mut cursor).unwrap();
    let bytes = cursor.into_inner();
    assert_eq!(bytes.len(), SPICE_LINK_REPLY_SIZE);

    let parsed = SpiceLinkReply::read(&mut Cursor::new(&bytes)).unwrap();
    assert_eq!(parsed.error, 0);
    assert_eq!(parsed.pub_key[0], 0x42);
    assert_eq!(parsed.num_channel_caps, 2);
    assert_eq!(parsed.caps_offset, 178);
}

#[test]
fn caps_set_then_has() {
    let mut caps = Caps::for_max_index(SPICE_COMMON_CAP_MINI_HEADER);
    assert_eq!(caps.num_words(), 1);

    assert!(!Caps::has(caps.words(), SPICE_COMMON_CAP_AUTH_SPICE));
    caps.set(SPICE_COMMON_CAP_PROTOCOL_AUTH_SELECTION);
    caps.set(SPICE_COMMON_CAP_AUTH_SPICE);
    caps.set(SPICE_COMMON_CAP_MINI_HEADER);

    assert!(Caps::has(caps.words(), SPICE_COMMON_CAP_PROTOCOL_AUTH_SELECTION));
    assert!(Caps::has(caps.words(), SPICE_COMMON_CAP_AUTH_SPICE));
    assert!(Caps::has(caps.words(), SPICE_COMMON_CAP_MINI_HEADER));
    assert_eq!(caps.words(), &[0x0B]);
}

#[test]
fn caps_out_of_range_is_absent() {
    let caps = Caps::for_max_index(SPICE_MAIN_CAP_MAX);
    assert!(!Caps::has(caps.words(), 63));
    assert!(Caps::has(&[0, 0x1], 32));
}

#[test]
fn empty_caps_have_no_words() {
    assert_eq!(Caps::empty().num_words(), 0);
}

#[test]
fn mouse_messages_are_packed() {
    let position = SpiceMsgcMousePosition {
        x: 640,
        y: 480,
        button_state: 0x21,
        display_id: 0,
    };
    let mut cursor = Cursor::new(Vec::new());
    position.write(&mut cursor).unwrap();
    assert_eq!(cursor.into_inner().len(), 11);

    let motion = SpiceMsgcMouseMotion {
        x: -5,
        y: 127,
        button_state: 0,
    };
    let mut cursor = Cursor::new(Vec::new());
    motion.write(&mut cursor).unwrap();
    assert_eq!(cursor.into_inner().len(), SPICE_MSGC_MOUSE_MOTION_SIZE);

    let press = SpiceMsgcMousePress {
        button: SPICE_MOUSE_BUTTON_LEFT,
        button_state: SPICE_MOUSE_BUTTON_MASK_LEFT,
    };
    let mut cursor = Cursor::new(Vec::new());
    press.write(&mut cursor).unwrap();
    assert_eq!(cursor.into_inner().len(), 3);
}

#[test]
fn main_init_parses_from_wire_bytes() {
    let mut bytes = Vec::new();
    for value in [0x11223344u32, 1, 3, 2, 1, 10, 0, 0] {
        bytes.extend_from_slice(&value.to_le_bytes());
    }

    let msg = SpiceMsgMainInit::read(&mut Cursor::new(&bytes)).unwrap();
    assert_eq!(msg.session_id, 0x11223344);
    assert_eq!(msg.current_mouse_mode, SPICE_MOUSE_MODE_CLIENT);
    assert_eq!(msg.agent_connected, 1);
    assert_eq!(msg.agent_tokens, 10);
}

#[test]
fn ping_round_trips() {
    let ping = SpiceMsgPing {
        id: 7,
        timestamp: 0x1122334455667788,
    };
    let mut cursor = Cursor::new(Vec::new());
    ping.write(&mut cursor).unwrap();
    let bytes = cursor.into_inner();
    assert_eq!(bytes.len(), 12);

    let parsed = SpiceMsgPing::read(&mut Cursor::new(&bytes)).unwrap();
    assert_eq!(parsed.id, 7);
    assert_eq!(parsed.timestamp, 0x1122334455667788);
}

#[test]
fn surface_format_mapping() {
    assert_eq!(
        SurfaceFormat::from_spice(SPICE_SURFACE_FMT_32_XRGB),
        Some(SurfaceFormat::Xrgb32)
    );
    assert_eq!(
        SurfaceFormat::from_spice(SPICE_SURFACE_FMT_16_565),
        Some(SurfaceFormat::Rgb565)
    );
    assert_eq!(SurfaceFormat::from_spice(7), None);
}

#[test]
fn audio_format_mapping() {
    assert_eq!(AudioFormat::from_spice(SPICE_AUDIO_FMT_S16), AudioFormat::S16);
    assert_eq!(AudioFormat::from_spice(0), AudioFormat::Invalid);
    assert_eq!(AudioFormat::from_spice(2), AudioFormat::Invalid);
}

#[test]
fn cursor_header_is_seventeen_bytes() {
    let header = SpiceCursorHeader {
        unique: 0xDEADBEEF,
        cursor_type: SPICE_CURSOR_TYPE_ALPHA,
        width: 32,
        height: 32,
        hot_spot_x: 4,
        hot_spot_y: 4,
    };
    let mut cursor = Cursor::new(Vec::new());
    header.write(&mut cursor).unwrap();
    assert_eq!(cursor.into_inner().len(), SPICE_CURSOR_HEADER_SIZE);
}

#[test]
fn agent_message_header_is_twenty_bytes() {
    let msg = VDAgentMessage {
        protocol: VD_AGENT_PROTOCOL,
        msg_type: VD_AGENT_CLIPBOARD,
        opaque: 0,
        size: 2500,
    };
    let mut cursor = Cursor::new(Vec::new());
    msg.write(&mut cursor).unwrap();
    assert_eq!(cursor.into_inner().len(), VD_AGENT_MESSAGE_SIZE);
}
