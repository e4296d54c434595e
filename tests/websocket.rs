extern crate futures;
extern crate netbuf;
extern crate tk_wire;
extern crate tokio_io;

mod support;

use std::sync::{Arc, Mutex};

use futures::Async;
use netbuf::Buf;

use support::{frame, parse_frames, resolve, Pipe};
use tk_wire::websocket::{Config, DeflateConfig, DeflateParams, Error};
use tk_wire::websocket::{Opcode, Role, WebSocket};

const MASK: [u8; 4] = [0x11, 0x22, 0x33, 0x44];

fn config() -> Arc<Config> {
    Config::new().done()
}

fn client(pipe: &Pipe) -> WebSocket<Pipe> {
    WebSocket::new(pipe.clone(), Role::Client, &config(), None)
}

fn server(pipe: &Pipe) -> WebSocket<Pipe> {
    WebSocket::new(pipe.clone(), Role::Server, &config(), None)
}

fn read_msg(ws: &mut WebSocket<Pipe>, buf: &mut Buf)
    -> Result<Opcode, Error>
{
    for _ in 0..100 {
        match ws.read_message(buf) {
            Ok(Async::Ready(opcode)) => return Ok(opcode),
            Ok(Async::NotReady) => {}
            Err(e) => return Err(e),
        }
    }
    panic!("read did not resolve");
}

fn read_err(input: &[u8]) -> Error {
    let pipe = Pipe::new();
    pipe.add_input(input);
    let mut ws = server(&pipe);
    let mut buf = Buf::new();
    read_msg(&mut ws, &mut buf).unwrap_err()
}

#[test]
fn client_text_message_on_the_wire() {
    let pipe = Pipe::new();
    let mut ws = client(&pipe);
    resolve(ws.write(b"Hello")).unwrap();

    let wire = pipe.output();
    // single frame: fin, text opcode, masked, 7-bit length
    assert_eq!(wire[0], 0x81);
    assert_eq!(wire[1], 0x80 | 5);
    let frames = parse_frames(&wire);
    assert_eq!(frames.len(), 1);
    assert!(frames[0].fin);
    assert!(frames[0].masked);
    assert_eq!(frames[0].opcode, 1);
    assert_eq!(frames[0].payload, b"Hello");
}

#[test]
fn text_round_trip_client_to_server() {
    let client_pipe = Pipe::new();
    let mut sender = client(&client_pipe);
    resolve(sender.write(b"Hello")).unwrap();

    let server_pipe = Pipe::new();
    server_pipe.add_input(&client_pipe.output());
    let mut receiver = server(&server_pipe);
    let mut buf = Buf::new();
    assert_eq!(read_msg(&mut receiver, &mut buf).unwrap(), Opcode::Text);
    assert_eq!(&buf[..], b"Hello");
}

#[test]
fn text_round_trip_server_to_client() {
    let server_pipe = Pipe::new();
    let mut sender = server(&server_pipe);
    resolve(sender.write(b"Hello")).unwrap();
    let wire = server_pipe.output();
    // servers never mask
    assert_eq!(&wire[..], b"\x81\x05Hello");

    let client_pipe = Pipe::new();
    client_pipe.add_input(&wire);
    let mut receiver = client(&client_pipe);
    let mut buf = Buf::new();
    assert_eq!(read_msg(&mut receiver, &mut buf).unwrap(), Opcode::Text);
    assert_eq!(&buf[..], b"Hello");
}

#[test]
fn binary_messages() {
    let pipe = Pipe::new();
    let mut ws = client(&pipe);
    ws.sender().set_binary();
    resolve(ws.write(b"\x00\x01\x02")).unwrap();
    let frames = parse_frames(&pipe.output());
    assert_eq!(frames[0].opcode, 2);
    assert_eq!(frames[0].payload, b"\x00\x01\x02");
}

#[test]
fn fragmented_message_reassembles() {
    let pipe = Pipe::new();
    pipe.add_input(&frame(false, false, 0x1, Some(MASK), b"Hel"));
    pipe.add_input(&frame(true, false, 0x0, Some(MASK), b"lo"));
    let mut ws = server(&pipe);
    let mut buf = Buf::new();
    assert_eq!(read_msg(&mut ws, &mut buf).unwrap(), Opcode::Text);
    assert_eq!(&buf[..], b"Hello");
}

#[test]
fn read_frame_reports_fragments() {
    let pipe = Pipe::new();
    pipe.add_input(&frame(false, false, 0x2, Some(MASK), b"ab"));
    pipe.add_input(&frame(true, false, 0x0, Some(MASK), b"cd"));
    let ws = server(&pipe);
    let (_, mut receiver) = ws.split();
    let mut buf = Buf::new();
    match receiver.read_frame(&mut buf).unwrap() {
        Async::Ready(info) => {
            assert_eq!(info.opcode, Opcode::Binary);
            assert!(!info.fin);
        }
        Async::NotReady => panic!("frame expected"),
    }
    match receiver.read_frame(&mut buf).unwrap() {
        Async::Ready(info) => {
            // continuation frames report the message opcode
            assert_eq!(info.opcode, Opcode::Binary);
            assert!(info.fin);
        }
        Async::NotReady => panic!("frame expected"),
    }
    assert_eq!(&buf[..], b"abcd");
}

#[test]
fn ping_gets_automatic_pong() {
    let pipe = Pipe::new();
    pipe.add_input(&frame(true, false, 0x9, Some(MASK), b"marco"));
    let mut ws = server(&pipe);
    let pings = Arc::new(Mutex::new(Vec::new()));
    let record = pings.clone();
    ws.receiver().set_ping_handler(move |is_pong, payload| {
        record.lock().unwrap().push((is_pong, payload.to_vec()));
    });
    let mut buf = Buf::new();
    match ws.read_message(&mut buf) {
        Ok(Async::NotReady) => {}
        other => panic!("unexpected read result: {:?}",
            other.map(|_| ())),
    }
    let frames = parse_frames(&pipe.output());
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].opcode, 0xA);
    assert!(!frames[0].masked);
    assert_eq!(frames[0].payload, b"marco");
    assert_eq!(&pings.lock().unwrap()[..],
        &[(false, b"marco".to_vec())][..]);
}

#[test]
fn pong_invokes_callback() {
    let pipe = Pipe::new();
    pipe.add_input(&frame(true, false, 0xA, Some(MASK), b"polo"));
    let mut ws = server(&pipe);
    let pings = Arc::new(Mutex::new(Vec::new()));
    let record = pings.clone();
    ws.receiver().set_ping_handler(move |is_pong, payload| {
        record.lock().unwrap().push((is_pong, payload.to_vec()));
    });
    let mut buf = Buf::new();
    assert!(matches!(ws.read_message(&mut buf), Ok(Async::NotReady)));
    // no frame goes out in response to a pong
    assert_eq!(pipe.output().len(), 0);
    assert_eq!(&pings.lock().unwrap()[..],
        &[(true, b"polo".to_vec())][..]);
}

#[test]
fn close_handshake_is_mirrored() {
    let pipe = Pipe::new();
    let mut payload = vec![0x03, 0xE8];
    payload.extend_from_slice(b"bye");
    pipe.add_input(&frame(true, false, 0x8, Some(MASK), &payload));
    let mut ws = server(&pipe);
    let mut buf = Buf::new();

    let err = read_msg(&mut ws, &mut buf).unwrap_err();
    assert!(err.is_closed());
    let reason = ws.receiver().close_reason().unwrap();
    assert_eq!(reason.code, Some(1000));
    assert_eq!(reason.reason, "bye");

    let frames = parse_frames(&pipe.output());
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].opcode, 0x8);
    assert_eq!(frames[0].payload, vec![0x03, 0xE8]);

    // the connection stays closed
    assert!(read_msg(&mut ws, &mut buf).unwrap_err().is_closed());
}

#[test]
fn local_close_refuses_writes() {
    let pipe = Pipe::new();
    let ws = server(&pipe);
    let (mut sender, _receiver) = ws.split();
    sender.send_close(1000, "done").unwrap();

    let frames = parse_frames(&pipe.output());
    assert_eq!(frames[0].opcode, 0x8);
    assert_eq!(&frames[0].payload[..2], &[0x03, 0xE8]);
    assert_eq!(&frames[0].payload[2..], b"done");

    assert!(resolve(sender.write(b"late")).unwrap_err().is_closed());
    assert!(sender.send_ping(b"x").unwrap_err().is_closed());
    assert!(sender.send_close(1000, "again").unwrap_err().is_closed());
}

#[test]
fn invalid_close_code_is_refused() {
    let pipe = Pipe::new();
    let ws = server(&pipe);
    let (mut sender, _receiver) = ws.split();
    let err = sender.send_close(1005, "nope").unwrap_err();
    assert!(format!("{:?}", err).contains("InvalidCloseCode"));
    assert_eq!(pipe.output().len(), 0);
}

#[test]
fn protocol_errors() {
    // lone continuation frame
    let err = read_err(&frame(true, false, 0x0, Some(MASK), b"x"));
    assert!(format!("{:?}", err).contains("UnexpectedContinuation"));
    // new data frame while a message is unfinished
    let mut input = frame(false, false, 0x1, Some(MASK), b"a");
    input.extend(frame(true, false, 0x2, Some(MASK), b"b"));
    let err = read_err(&input);
    assert!(format!("{:?}", err).contains("UnfinishedMessage"));
    // servers require masked input
    let err = read_err(&frame(true, false, 0x1, None, b"x"));
    assert!(format!("{:?}", err).contains("BadMask"));
    // control frames carry at most 125 bytes
    let err = read_err(&frame(true, false, 0x9, Some(MASK), &[0; 126]));
    assert!(format!("{:?}", err).contains("OversizedControl"));
    // rsv1 without negotiated compression
    let err = read_err(&frame(true, true, 0x1, Some(MASK), b"x"));
    assert!(format!("{:?}", err).contains("ReservedBits"));
    // close frame with a one-byte payload
    let err = read_err(&frame(true, false, 0x8, Some(MASK), b"\x03"));
    assert!(format!("{:?}", err).contains("BadCloseFrame"));
    // close code reserved for local reporting
    let err = read_err(&frame(true, false, 0x8, Some(MASK), b"\x03\xED"));
    assert!(format!("{:?}", err).contains("InvalidCloseCode"));
}

#[test]
fn text_message_must_be_utf8() {
    let err = read_err(&frame(true, false, 0x1, Some(MASK), b"\xFF\xFE"));
    assert!(format!("{:?}", err).contains("BadUtf8"));
    // utf-8 sequence split across fragments is fine
    let pipe = Pipe::new();
    let bytes = "здравствуй".as_bytes();
    pipe.add_input(&frame(false, false, 0x1, Some(MASK), &bytes[..3]));
    pipe.add_input(&frame(true, false, 0x0, Some(MASK), &bytes[3..]));
    let mut ws = server(&pipe);
    let mut buf = Buf::new();
    assert_eq!(read_msg(&mut ws, &mut buf).unwrap(), Opcode::Text);
    assert_eq!(&buf[..], bytes);
    // but a sequence cut at message end is not
    let err = read_err(&frame(true, false, 0x1, Some(MASK),
        &"ы".as_bytes()[..1]));
    assert!(format!("{:?}", err).contains("BadUtf8"));
}

#[test]
fn message_size_limit() {
    let pipe = Pipe::new();
    pipe.add_input(&frame(true, false, 0x1, Some(MASK), b"abcdef"));
    let mut cfg = Config::new();
    cfg.read_message_max(4);
    let mut ws = WebSocket::new(pipe.clone(), Role::Server,
        &cfg.done(), None);
    let mut buf = Buf::new();
    let err = read_msg(&mut ws, &mut buf).unwrap_err();
    assert!(format!("{:?}", err).contains("TooLong"));
}

#[test]
fn auto_fragmentation() {
    let pipe = Pipe::new();
    let mut cfg = Config::new();
    cfg.write_buffer_size(3);
    let mut ws = WebSocket::new(pipe.clone(), Role::Client,
        &cfg.done(), None);
    resolve(ws.write(b"HelloWorld")).unwrap();

    let frames = parse_frames(&pipe.output());
    assert_eq!(frames.len(), 4);
    assert_eq!(frames[0].opcode, 1);
    assert!(!frames[0].fin);
    for f in &frames[1..] {
        assert_eq!(f.opcode, 0);
    }
    assert!(frames[3].fin);
    let whole: Vec<u8> = frames.iter()
        .flat_map(|f| f.payload.clone())
        .collect();
    assert_eq!(whole, b"HelloWorld");
}

#[test]
fn no_fragmentation_when_disabled() {
    let pipe = Pipe::new();
    let mut cfg = Config::new();
    cfg.write_buffer_size(3).auto_fragment(false);
    let mut ws = WebSocket::new(pipe.clone(), Role::Client,
        &cfg.done(), None);
    resolve(ws.write(b"HelloWorld")).unwrap();
    let frames = parse_frames(&pipe.output());
    assert_eq!(frames.len(), 1);
    assert!(frames[0].fin);
    assert_eq!(frames[0].payload, b"HelloWorld");
}

#[test]
fn explicit_frame_writes() {
    let pipe = Pipe::new();
    let ws = server(&pipe);
    let (mut sender, _receiver) = ws.split();
    resolve(sender.write_frame(false, b"Hel")).unwrap();
    resolve(sender.write_frame(true, b"lo")).unwrap();
    resolve(sender.write(b"next")).unwrap();

    let frames = parse_frames(&pipe.output());
    assert_eq!(frames.len(), 3);
    assert_eq!((frames[0].opcode, frames[0].fin), (1, false));
    assert_eq!((frames[1].opcode, frames[1].fin), (0, true));
    assert_eq!((frames[2].opcode, frames[2].fin), (1, true));
    assert_eq!(frames[1].payload, b"lo");
}

#[test]
fn sender_control_frames() {
    let pipe = Pipe::new();
    let ws = server(&pipe);
    let (mut sender, _receiver) = ws.split();
    sender.send_ping(b"hi").unwrap();
    sender.send_pong(b"there").unwrap();
    let frames = parse_frames(&pipe.output());
    assert_eq!(frames[0].opcode, 0x9);
    assert_eq!(frames[0].payload, b"hi");
    assert_eq!(frames[1].opcode, 0xA);
    assert_eq!(frames[1].payload, b"there");
}

#[test]
fn permessage_deflate_round_trip() {
    let params = DeflateParams {
        server_no_context_takeover: false,
        client_no_context_takeover: false,
        server_max_window_bits: 15,
        client_max_window_bits: 15,
    };
    let mut deflate = DeflateConfig::default();
    deflate.client_enable = true;
    deflate.server_enable = true;
    let mut cfg = Config::new();
    cfg.permessage_deflate(deflate);
    let cfg = cfg.done();

    let client_pipe = Pipe::new();
    let mut sender = WebSocket::new(client_pipe.clone(), Role::Client,
        &cfg, Some(params));
    let payload = b"compress me compress me compress me";
    resolve(sender.write(payload)).unwrap();

    let wire = client_pipe.output();
    let frames = parse_frames(&wire);
    assert!(frames[0].rsv1);
    assert_ne!(frames[0].payload, &payload[..]);

    let server_pipe = Pipe::new();
    server_pipe.add_input(&wire);
    let mut receiver = WebSocket::new(server_pipe.clone(), Role::Server,
        &cfg, Some(params));
    let mut buf = Buf::new();
    assert_eq!(read_msg(&mut receiver, &mut buf).unwrap(), Opcode::Text);
    assert_eq!(&buf[..], &payload[..]);
}

#[test]
fn eof_without_close_is_an_error() {
    let pipe = Pipe::new();
    pipe.set_eof();
    let mut ws = server(&pipe);
    let mut buf = Buf::new();
    let err = read_msg(&mut ws, &mut buf).unwrap_err();
    assert!(!err.is_closed());
    assert!(format!("{:?}", err).contains("Io"));
}
