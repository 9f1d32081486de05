//! Unit tests for the NDJSON codec: framing, chunk boundaries, the line cap.

use acp_bridge::rpc::codec::{JsonRpcCodec, MAX_LINE_BYTES};
use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

#[test]
fn decodes_single_line() {
    let mut codec = JsonRpcCodec::new();
    let mut buf = BytesMut::from(&b"{\"a\":1}\n"[..]);
    let line = codec.decode(&mut buf).expect("decode").expect("one line");
    assert_eq!(line, "{\"a\":1}");
}

#[test]
fn buffers_partial_line_until_newline() {
    let mut codec = JsonRpcCodec::new();
    let mut buf = BytesMut::from(&b"{\"a\""[..]);
    assert!(codec.decode(&mut buf).expect("decode").is_none());

    buf.extend_from_slice(b":1}\n{\"b\":2}\n");
    assert_eq!(codec.decode(&mut buf).expect("decode").unwrap(), "{\"a\":1}");
    assert_eq!(codec.decode(&mut buf).expect("decode").unwrap(), "{\"b\":2}");
    assert!(codec.decode(&mut buf).expect("decode").is_none());
}

#[test]
fn delivers_frames_in_order_regardless_of_chunking() {
    // The same byte stream split at every possible boundary must produce
    // the same decoded sequence.
    let stream = b"{\"n\":1}\n{\"n\":2}\n{\"n\":3}\n";
    for split in 0..stream.len() {
        let mut codec = JsonRpcCodec::new();
        let mut buf = BytesMut::new();
        let mut decoded = Vec::new();

        for chunk in [&stream[..split], &stream[split..]] {
            buf.extend_from_slice(chunk);
            while let Some(line) = codec.decode(&mut buf).expect("decode") {
                decoded.push(line);
            }
        }

        assert_eq!(
            decoded,
            vec!["{\"n\":1}", "{\"n\":2}", "{\"n\":3}"],
            "split at byte {split}"
        );
    }
}

#[test]
fn bytes_after_last_newline_are_retained() {
    let mut codec = JsonRpcCodec::new();
    let mut buf = BytesMut::from(&b"{\"n\":1}\n{\"part"[..]);
    assert_eq!(codec.decode(&mut buf).expect("decode").unwrap(), "{\"n\":1}");
    assert!(codec.decode(&mut buf).expect("decode").is_none());

    buf.extend_from_slice(b"ial\":true}\n");
    assert_eq!(
        codec.decode(&mut buf).expect("decode").unwrap(),
        "{\"partial\":true}"
    );
}

#[test]
fn oversized_line_is_rejected() {
    let mut codec = JsonRpcCodec::new();
    let mut buf = BytesMut::new();
    buf.extend_from_slice(&vec![b'x'; MAX_LINE_BYTES + 16]);
    buf.extend_from_slice(b"\n");

    let err = codec.decode(&mut buf).expect_err("line too long");
    assert!(err.to_string().contains("line too long"), "{err}");
}

#[test]
fn stream_resyncs_after_an_oversized_line() {
    let mut codec = JsonRpcCodec::with_max_line_bytes(8);
    let mut buf = BytesMut::from(&b"way too long for the cap\n{\"n\":1}\n"[..]);

    assert!(codec.decode(&mut buf).is_err(), "oversized line reported");
    assert_eq!(codec.decode(&mut buf).expect("decode").unwrap(), "{\"n\":1}");
}

#[test]
fn oversized_partial_line_is_discarded_up_to_the_next_newline() {
    let mut codec = JsonRpcCodec::with_max_line_bytes(8);

    // The partial line blows the cap before its newline arrives.
    let mut buf = BytesMut::from(&b"0123456789abcdef"[..]);
    assert!(codec.decode(&mut buf).is_err(), "overflow reported once");
    assert!(buf.is_empty(), "overflowing bytes dropped");

    // The tail of the bad line is swallowed; the next line decodes.
    buf.extend_from_slice(b"tail\n{\"n\":2}\n");
    assert_eq!(codec.decode(&mut buf).expect("decode").unwrap(), "{\"n\":2}");
}

#[test]
fn custom_cap_is_honored() {
    let mut codec = JsonRpcCodec::with_max_line_bytes(4);
    assert_eq!(codec.max_line_bytes(), 4);

    let mut buf = BytesMut::from(&b"abcd\ntoolong\n"[..]);
    assert_eq!(codec.decode(&mut buf).expect("decode").unwrap(), "abcd");
    assert!(codec.decode(&mut buf).is_err(), "second line exceeds cap");
}

#[test]
fn trailing_carriage_return_is_stripped() {
    let mut codec = JsonRpcCodec::new();
    let mut buf = BytesMut::from(&b"{\"a\":1}\r\n"[..]);
    assert_eq!(codec.decode(&mut buf).expect("decode").unwrap(), "{\"a\":1}");
}

#[test]
fn invalid_utf8_is_a_recoverable_error() {
    let mut codec = JsonRpcCodec::new();
    let mut buf = BytesMut::from(&[0xff, 0xfe, b'\n', b'{', b'}', b'\n'][..]);

    let err = codec.decode(&mut buf).expect_err("not utf-8");
    assert!(err.to_string().contains("UTF-8"), "{err}");
    assert_eq!(codec.decode(&mut buf).expect("decode").unwrap(), "{}");
}

#[test]
fn eof_flushes_an_unterminated_tail() {
    let mut codec = JsonRpcCodec::new();
    let mut buf = BytesMut::from(&b"{\"a\":1}\n{\"tail\":true}"[..]);

    assert_eq!(codec.decode(&mut buf).expect("decode").unwrap(), "{\"a\":1}");
    assert!(codec.decode(&mut buf).expect("decode").is_none());
    assert_eq!(
        codec.decode_eof(&mut buf).expect("decode eof").unwrap(),
        "{\"tail\":true}"
    );
    assert!(codec.decode_eof(&mut buf).expect("decode eof").is_none());
}

#[test]
fn encoder_appends_newline() {
    let mut codec = JsonRpcCodec::new();
    let mut buf = BytesMut::new();
    codec
        .encode("{\"ok\":true}".to_owned(), &mut buf)
        .expect("encode");
    assert_eq!(&buf[..], b"{\"ok\":true}\n");
}
