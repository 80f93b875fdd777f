//! End-to-end tests against an in-process mock SPICE server.
//!
//! The mock speaks just enough of the protocol to exercise the real
//! code paths: the link handshake with a live RSA key, the main channel
//! bootstrap, ack windows, ping/pong, channel advertisement with
//! auto-connect, input traffic and graceful teardown. Because each
//! channel is an ordered byte stream, the server script doubles as the
//! synchronization: a later message is only ever read after every reply
//! to an earlier one arrived.

use rsa::pkcs8::EncodePublicKey;
use rsa::rand_core::OsRng;
use rsa::RsaPrivateKey;
use spice_session::{ChannelKind, MouseButton, SpiceConfig, SpiceError, SpiceSession, Status};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, UnixListener};

const SPICE_MAGIC: u32 = 0x51444552;
const SESSION_ID: u32 = 0x11223344;

const MSG_SET_ACK: u16 = 3;
const MSG_PING: u16 = 4;
const MSG_MAIN_INIT: u16 = 103;
const MSG_MAIN_CHANNELS_LIST: u16 = 104;
const MSG_MAIN_MOUSE_MODE: u16 = 105;
const MSG_MAIN_MULTI_MEDIA_TIME: u16 = 106;
const MSG_INPUTS_INIT: u16 = 101;

const MSGC_ACK_SYNC: u16 = 1;
const MSGC_ACK: u16 = 2;
const MSGC_PONG: u16 = 3;
const MSGC_DISCONNECTING: u16 = 6;
const MSGC_MAIN_ATTACH_CHANNELS: u16 = 104;
const MSGC_INPUTS_MOUSE_MOTION: u16 = 111;
const MSGC_INPUTS_MOUSE_PRESS: u16 = 113;

fn test_key() -> Vec<u8> {
    let key = RsaPrivateKey::new(&mut OsRng, 1024).expect("key generation");
    let der = key
        .to_public_key()
        .to_public_key_der()
        .expect("SPKI encoding")
        .as_bytes()
        .to_vec();
    assert_eq!(der.len(), 162, "RSA-1024 SPKI should be 162 bytes");
    der
}

fn mini(msg_type: u16, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(6 + payload.len());
    buf.extend_from_slice(&msg_type.to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    buf
}

async fn read_client_packet<S>(stream: &mut S) -> (u16, Vec<u8>)
where
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; 6];
    stream.read_exact(&mut header).await.unwrap();
    let msg_type = u16::from_le_bytes([header[0], header[1]]);
    let size = u32::from_le_bytes([header[2], header[3], header[4], header[5]]) as usize;
    let mut payload = vec![0u8; size];
    stream.read_exact(&mut payload).await.unwrap();
    (msg_type, payload)
}

/// Accept one channel's link handshake: validate the connect packet,
/// send a link reply carrying the public key and capability lists, then
/// consume the auth mechanism and ticket and answer with `auth_result`.
async fn serve_handshake<S>(
    stream: &mut S,
    pub_key_der: &[u8],
    expect_channel_type: u8,
    expect_connection_id: u32,
    auth_result: u32,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut header = [0u8; 16];
    stream.read_exact(&mut header).await.unwrap();
    assert_eq!(&header[0..4], &SPICE_MAGIC.to_le_bytes());
    assert_eq!(&header[4..8], &2u32.to_le_bytes());
    let size = u32::from_le_bytes(header[12..16].try_into().unwrap()) as usize;

    let mut body = vec![0u8; size];
    stream.read_exact(&mut body).await.unwrap();
    assert_eq!(
        u32::from_le_bytes(body[0..4].try_into().unwrap()),
        expect_connection_id
    );
    assert_eq!(body[4], expect_channel_type);

    // Fixed reply struct plus one common and one channel capability
    // word at caps_offset 178.
    let mut reply_body = Vec::new();
    reply_body.extend_from_slice(&0u32.to_le_bytes());
    reply_body.extend_from_slice(pub_key_der);
    reply_body.extend_from_slice(&1u32.to_le_bytes());
    reply_body.extend_from_slice(&1u32.to_le_bytes());
    reply_body.extend_from_slice(&178u32.to_le_bytes());
    reply_body.extend_from_slice(&0x0Bu32.to_le_bytes()); // auth selection, spice auth, mini header
    reply_body.extend_from_slice(&0x04u32.to_le_bytes()); // main: agent connected tokens

    let mut reply = Vec::new();
    reply.extend_from_slice(&SPICE_MAGIC.to_le_bytes());
    reply.extend_from_slice(&2u32.to_le_bytes());
    reply.extend_from_slice(&2u32.to_le_bytes());
    reply.extend_from_slice(&(reply_body.len() as u32).to_le_bytes());
    reply.extend_from_slice(&reply_body);
    stream.write_all(&reply).await.unwrap();

    let mut mechanism = [0u8; 4];
    stream.read_exact(&mut mechanism).await.unwrap();
    assert_eq!(u32::from_le_bytes(mechanism), 1, "spice auth selected");

    // The RSA-1024 ticket is exactly the key size.
    let mut ticket = [0u8; 128];
    stream.read_exact(&mut ticket).await.unwrap();

    stream.write_all(&auth_result.to_le_bytes()).await.unwrap();
}

fn main_init_payload(mouse_mode: u32) -> Vec<u8> {
    let mut payload = Vec::new();
    for value in [SESSION_ID, 1, 3, mouse_mode, 0, 0, 0, 0] {
        payload.extend_from_slice(&value.to_le_bytes());
    }
    payload
}

async fn drive_until<F>(session: &SpiceSession, mut done: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..500 {
        if done() {
            return;
        }
        assert_eq!(session.process(Duration::from_millis(20)).await, Status::Run);
    }
    panic!("condition not reached while processing");
}

#[tokio::test]
async fn full_session_against_mock_server() {
    let pub_key_der = test_key();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        let (mut main, _) = listener.accept().await.unwrap();
        serve_handshake(&mut main, &pub_key_der, 1, 0, 0).await;

        // Mouse already in client mode, no agent.
        main.write_all(&mini(MSG_MAIN_INIT, &main_init_payload(2)))
            .await
            .unwrap();
        let (msg_type, payload) = read_client_packet(&mut main).await;
        assert_eq!(msg_type, MSGC_MAIN_ATTACH_CHANNELS);
        assert!(payload.is_empty());

        // Ack window of three: the sync reply comes straight away, the
        // first one-byte ack only after three further message headers.
        let mut set_ack = Vec::new();
        set_ack.extend_from_slice(&42u32.to_le_bytes());
        set_ack.extend_from_slice(&3u32.to_le_bytes());
        main.write_all(&mini(MSG_SET_ACK, &set_ack)).await.unwrap();
        let (msg_type, payload) = read_client_packet(&mut main).await;
        assert_eq!(msg_type, MSGC_ACK_SYNC);
        assert_eq!(payload, 42u32.to_le_bytes());

        let mut ping = Vec::new();
        ping.extend_from_slice(&7u32.to_le_bytes());
        ping.extend_from_slice(&0x1122334455667788u64.to_le_bytes());
        ping.extend_from_slice(&[0xAA; 32]);
        main.write_all(&mini(MSG_PING, &ping)).await.unwrap();
        let (msg_type, payload) = read_client_packet(&mut main).await;
        assert_eq!(msg_type, MSGC_PONG);
        assert_eq!(&payload[0..4], &7u32.to_le_bytes());
        assert_eq!(&payload[4..12], &0x1122334455667788u64.to_le_bytes());

        main.write_all(&mini(MSG_MAIN_MOUSE_MODE, &2u32.to_le_bytes()))
            .await
            .unwrap();
        main.write_all(&mini(MSG_MAIN_MULTI_MEDIA_TIME, &0u32.to_le_bytes()))
            .await
            .unwrap();
        let (msg_type, payload) = read_client_packet(&mut main).await;
        assert_eq!(msg_type, MSGC_ACK);
        assert_eq!(payload.len(), 1);

        // Advertise an inputs channel; the client auto-connects it.
        let mut list = Vec::new();
        list.extend_from_slice(&1u32.to_le_bytes());
        list.push(3); // inputs
        list.push(0);
        main.write_all(&mini(MSG_MAIN_CHANNELS_LIST, &list))
            .await
            .unwrap();

        let (mut inputs, _) = listener.accept().await.unwrap();
        serve_handshake(&mut inputs, &pub_key_der, 3, SESSION_ID, 0).await;
        inputs
            .write_all(&mini(MSG_INPUTS_INIT, &0u16.to_le_bytes()))
            .await
            .unwrap();

        // Button press, then a 300/-5 motion split into three clamped
        // packets carrying the held-button mask, all in one burst.
        let (msg_type, payload) = read_client_packet(&mut inputs).await;
        assert_eq!(msg_type, MSGC_INPUTS_MOUSE_PRESS);
        assert_eq!(payload, vec![1, 1, 0]);

        let mut burst = [0u8; 3 * 16];
        inputs.read_exact(&mut burst).await.unwrap();
        let expected = [(127i32, -5i32), (127, 0), (46, 0)];
        for (i, (dx, dy)) in expected.iter().enumerate() {
            let pkt = &burst[i * 16..(i + 1) * 16];
            assert_eq!(&pkt[0..2], &MSGC_INPUTS_MOUSE_MOTION.to_le_bytes());
            assert_eq!(&pkt[2..6], &10u32.to_le_bytes());
            assert_eq!(&pkt[6..10], &dx.to_le_bytes());
            assert_eq!(&pkt[10..14], &dy.to_le_bytes());
            assert_eq!(&pkt[14..16], &1u16.to_le_bytes());
        }

        // Application-requested inputs teardown.
        let (msg_type, payload) = read_client_packet(&mut inputs).await;
        assert_eq!(msg_type, MSGC_DISCONNECTING);
        assert_eq!(payload.len(), 12);
        assert_eq!(&payload[8..12], &0u32.to_le_bytes());

        // The channel can come back on demand.
        let (mut inputs2, _) = listener.accept().await.unwrap();
        serve_handshake(&mut inputs2, &pub_key_der, 3, SESSION_ID, 0).await;

        // Full disconnect: channels close in reverse order.
        let (msg_type, _) = read_client_packet(&mut inputs2).await;
        assert_eq!(msg_type, MSGC_DISCONNECTING);
        let (msg_type, _) = read_client_packet(&mut main).await;
        assert_eq!(msg_type, MSGC_DISCONNECTING);
    });

    let ready = Arc::new(AtomicBool::new(false));
    let ready_flag = ready.clone();
    let mut config = SpiceConfig {
        host: "127.0.0.1".into(),
        port,
        password: "s3cr3t".into(),
        ready: Some(Box::new(move || {
            ready_flag.store(true, Ordering::Release);
        })),
        ..Default::default()
    };
    config.inputs.enable = true;
    config.inputs.auto_connect = true;

    let session = SpiceSession::connect(config).await.unwrap();
    assert!(session.channel_connected(ChannelKind::Main));
    assert!(!session.has_channel(ChannelKind::Display));

    drive_until(&session, || {
        ready.load(Ordering::Acquire) && session.channel_connected(ChannelKind::Inputs)
    })
    .await;
    assert!(session.has_channel(ChannelKind::Inputs));

    session.mouse_press(MouseButton::Left).await.unwrap();
    session.mouse_motion(300, -5).await.unwrap();

    session.disconnect_channel(ChannelKind::Inputs).unwrap();
    drive_until(&session, || !session.channel_connected(ChannelKind::Inputs)).await;

    // Still advertised, so it can be reconnected on demand.
    assert!(session.has_channel(ChannelKind::Inputs));
    session.connect_channel(ChannelKind::Inputs).await.unwrap();
    assert!(session.channel_connected(ChannelKind::Inputs));

    session.disconnect().await;
    assert_eq!(
        session.process(Duration::from_millis(20)).await,
        Status::Shutdown
    );

    server.await.unwrap();
}

#[tokio::test]
async fn unix_socket_session_disconnects_gracefully() {
    let pub_key_der = test_key();
    let path = std::env::temp_dir().join(format!(
        "spice-session-test-{}-{:x}.sock",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    let _ = std::fs::remove_file(&path);
    let listener = UnixListener::bind(&path).unwrap();

    let server = tokio::spawn(async move {
        let (mut main, _) = listener.accept().await.unwrap();
        serve_handshake(&mut main, &pub_key_der, 1, 0, 0).await;

        main.write_all(&mini(MSG_MAIN_INIT, &main_init_payload(2)))
            .await
            .unwrap();
        let (msg_type, _) = read_client_packet(&mut main).await;
        assert_eq!(msg_type, MSGC_MAIN_ATTACH_CHANNELS);

        // No channels to offer; the session is ready as-is.
        main.write_all(&mini(MSG_MAIN_CHANNELS_LIST, &0u32.to_le_bytes()))
            .await
            .unwrap();

        let (msg_type, payload) = read_client_packet(&mut main).await;
        assert_eq!(msg_type, MSGC_DISCONNECTING);
        assert_eq!(payload.len(), 12);
    });

    let ready = Arc::new(AtomicBool::new(false));
    let ready_flag = ready.clone();
    let config = SpiceConfig {
        host: path.to_str().unwrap().into(),
        port: 0,
        password: "".into(),
        ready: Some(Box::new(move || {
            ready_flag.store(true, Ordering::Release);
        })),
        ..Default::default()
    };

    let session = SpiceSession::connect(config).await.unwrap();
    drive_until(&session, || ready.load(Ordering::Acquire)).await;

    session.disconnect().await;
    assert_eq!(
        session.process(Duration::from_millis(20)).await,
        Status::Shutdown
    );

    server.await.unwrap();
    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn authentication_failure_surfaces_from_connect() {
    let pub_key_der = test_key();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        let (mut main, _) = listener.accept().await.unwrap();
        // 7 is permission denied.
        serve_handshake(&mut main, &pub_key_der, 1, 0, 7).await;
    });

    let config = SpiceConfig {
        host: "127.0.0.1".into(),
        port,
        password: "wrong".into(),
        ..Default::default()
    };

    let err = SpiceSession::connect(config)
        .await
        .err()
        .expect("connect should fail");
    assert!(
        matches!(err, SpiceError::AuthenticationFailed),
        "unexpected error: {err:?}"
    );

    server.await.unwrap();
}

#[tokio::test]
async fn enabled_channels_require_their_callbacks() {
    let mut config = SpiceConfig {
        host: "127.0.0.1".into(),
        port: 5900,
        password: "".into(),
        ..Default::default()
    };
    config.clipboard.enable = true;

    let err = SpiceSession::connect(config)
        .await
        .err()
        .expect("connect should fail validation");
    assert!(matches!(err, SpiceError::Config(_)), "unexpected error: {err:?}");
}
