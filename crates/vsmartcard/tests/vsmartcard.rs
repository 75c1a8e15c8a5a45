//! Socket level tests for both ends of the vsmartcard protocol

mod common;

use std::io::Cursor;
use std::thread;
use std::time::Duration;

use common::{ECHO_ATR, EchoCard, ScriptedReader, TEST_TIMEOUT};
use hex_literal::hex;
use rcard_apdu_core::{CardChannel, Command, Error, TransportError};
use rcard_transport_vsmartcard::{
    CancelToken, VirtualCard, VirtualCardChannel, VirtualCardConfig, VpcdProto,
};

fn connector(port: u16) -> VirtualCardChannel {
    VirtualCardChannel::new(
        VirtualCardConfig::connector("127.0.0.1", port)
            .with_connect_timeout(Some(TEST_TIMEOUT))
            .with_read_timeout(Some(TEST_TIMEOUT)),
    )
}

#[test]
fn test_connector_exchanges_apdu_with_listening_peer() {
    let (listener, port) = common::loopback_listener();

    let peer = thread::spawn(move || {
        let mut stream = common::accept(&listener);
        assert_eq!(common::read_exact(&mut stream, 3), hex!("000101"));
        assert_eq!(common::read_frame(&mut stream), hex!("00A40400023F00"));
        common::write_frame(&mut stream, &hex!("9000"));
        // RESET on close
        assert_eq!(common::read_exact(&mut stream, 3), hex!("000102"));
    });

    let mut channel = connector(port);
    assert!(!channel.is_connected());

    let command = Command::from_bytes(&hex!("00A40400023F00")).unwrap();
    let response = channel.transmit(&command).unwrap();
    assert_eq!(response.sw(), 0x9000);
    assert!(response.data().is_empty());
    assert!(channel.is_connected());

    channel.close().unwrap();
    peer.join().unwrap();
}

#[test]
fn test_listener_channel_drives_virtual_card() {
    let mut channel = VirtualCardChannel::new(
        VirtualCardConfig::listener(0)
            .with_connect_timeout(Some(TEST_TIMEOUT))
            .with_read_timeout(Some(TEST_TIMEOUT)),
    );
    let port = channel.bind().unwrap().port();

    let card = thread::spawn(move || {
        let mut card = VirtualCard::new(
            EchoCard::default(),
            VirtualCardConfig::connector("127.0.0.1", port).with_connect_timeout(Some(TEST_TIMEOUT)),
        );
        card.run().unwrap();
        (card.served(), card.into_inner())
    });

    assert_eq!(channel.atr().unwrap().as_bytes(), ECHO_ATR);

    let response = channel
        .transmit(&Command::select_aid(hex!("A000000003").to_vec()))
        .unwrap();
    assert!(response.is_success());
    assert_eq!(response.data(), hex!("A000000003"));

    channel.close().unwrap();

    let (served, echo) = card.join().unwrap();
    assert_eq!(served, 1);
    assert_eq!(echo.commands.len(), 1);
    // POWER_ON, GET_ATR and RESET each query the ATR
    assert_eq!(echo.atr_requests, 3);
}

#[test]
fn test_close_is_idempotent_and_final() {
    let mut channel = connector(1);
    channel.close().unwrap();
    channel.close().unwrap();
    assert!(matches!(
        channel.transmit(&Command::new(0x00, 0xB0, 0x00, 0x00)),
        Err(Error::Closed)
    ));

    let (listener, port) = common::loopback_listener();
    let peer = thread::spawn(move || {
        let mut stream = common::accept(&listener);
        assert_eq!(common::read_exact(&mut stream, 3), hex!("000101"));
        assert_eq!(common::read_exact(&mut stream, 3), hex!("000104"));
        common::write_frame(&mut stream, &ECHO_ATR);
    });

    let mut channel = connector(port);
    assert_eq!(channel.atr().unwrap().as_bytes(), ECHO_ATR);
    peer.join().unwrap();

    // The peer is gone, so the RESET frame may fail; close still succeeds
    channel.close().unwrap();
    channel.close().unwrap();
    assert!(matches!(channel.atr(), Err(Error::Closed)));
}

#[test]
fn test_accept_honours_deadline_and_cancellation() {
    let mut channel = VirtualCardChannel::new(
        VirtualCardConfig::listener(0).with_connect_timeout(Some(Duration::from_millis(50))),
    );
    channel.bind().unwrap();
    assert!(matches!(
        channel.atr(),
        Err(Error::Transport(TransportError::Timeout))
    ));

    let cancel = CancelToken::new();
    let mut channel =
        VirtualCardChannel::new(VirtualCardConfig::listener(0)).with_cancel_token(cancel.clone());
    channel.bind().unwrap();

    let trigger = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        cancel.cancel();
    });
    assert!(matches!(
        channel.transmit(&Command::new(0x00, 0xB0, 0x00, 0x00)),
        Err(Error::Transport(TransportError::Cancelled))
    ));
    trigger.join().unwrap();
}

#[test]
fn test_bind_rejected_for_connector() {
    let mut channel = connector(1);
    assert!(matches!(channel.bind(), Err(Error::Unsupported(_))));
}

#[test]
fn test_oversized_response_is_transmit_error() {
    let (listener, port) = common::loopback_listener();
    let peer = thread::spawn(move || {
        let mut stream = common::accept(&listener);
        common::read_exact(&mut stream, 3);
        common::read_frame(&mut stream);
        common::write_frame(&mut stream, &[0u8; 16]);
    });

    let mut channel = VirtualCardChannel::new(
        VirtualCardConfig::connector("127.0.0.1", port)
            .with_read_timeout(Some(TEST_TIMEOUT))
            .with_max_response_len(8),
    );
    let err = channel
        .transmit(&Command::new(0x00, 0xB0, 0x00, 0x00))
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Transmit(TransportError::FrameTooLarge { len: 16, max: 8 })
    ));
    assert!(err.is_terminal());
    peer.join().unwrap();
}

#[test]
fn test_peer_disconnect_mid_frame() {
    let (listener, port) = common::loopback_listener();
    let peer = thread::spawn(move || {
        let mut stream = common::accept(&listener);
        common::read_exact(&mut stream, 3);
        common::read_frame(&mut stream);
        // Announce four bytes, deliver two, hang up
        std::io::Write::write_all(&mut stream, &hex!("00049000")).unwrap();
    });

    let mut channel = connector(port);
    let err = channel
        .transmit(&Command::new(0x00, 0xB0, 0x00, 0x00))
        .unwrap_err();
    peer.join().unwrap();
    assert!(matches!(
        err,
        Error::Transmit(TransportError::ConnectionClosed {
            expected: 4,
            received: 2
        })
    ));
}

#[test]
fn test_virtual_card_serve_loop() {
    let frames = [
        &hex!("000101")[..],         // POWER_ON
        &hex!("000104")[..],         // GET_ATR
        &hex!("000100")[..],         // POWER_OFF, ignored
        &hex!("000109")[..],         // unknown, ignored
        &hex!("000200A4")[..],       // malformed APDU
        &hex!("000500CA9F7F00")[..], // GET DATA
    ]
    .concat();

    let mut proto = VpcdProto::new(Cursor::new(frames), Vec::new());
    let mut card = VirtualCard::new(EchoCard::default(), VirtualCardConfig::default());
    card.serve(&mut proto).unwrap();
    assert_eq!(card.served(), 2);

    let (_, written) = proto.into_inner();
    let expected = [
        &hex!("0005 3B80800101")[..],
        &hex!("0002 6F00")[..],
        &hex!("0002 9000")[..],
    ]
    .concat();
    assert_eq!(written, expected);
}

#[test]
fn test_virtual_card_stops_on_reader_stalling_mid_frame() {
    let reader = ScriptedReader::new([
        Some(hex!("000101").to_vec()), // POWER_ON
        None,                          // idle between frames
        Some(hex!("00").to_vec()),     // first header byte only
        None,
        Some(hex!("0104").to_vec()), // rest of a GET_ATR frame
    ]);
    let mut proto = VpcdProto::new(reader, Vec::new());
    let mut card = VirtualCard::new(EchoCard::default(), VirtualCardConfig::default());

    let err = card.serve(&mut proto).unwrap_err();
    assert!(matches!(
        err,
        Error::Transport(TransportError::Stalled {
            expected: 2,
            received: 1
        })
    ));
    assert_eq!(card.channel().atr_requests, 1);
    assert!(proto.into_inner().1.is_empty());
}

#[test]
fn test_virtual_card_rejects_reader_hanging_up_inside_command_frame() {
    let mut proto = VpcdProto::new(Cursor::new(hex!("0001").to_vec()), Vec::new());
    let mut card = VirtualCard::new(EchoCard::default(), VirtualCardConfig::default());
    assert!(matches!(
        card.serve(&mut proto),
        Err(Error::Transport(TransportError::ConnectionClosed {
            expected: 1,
            received: 0
        }))
    ));
}
