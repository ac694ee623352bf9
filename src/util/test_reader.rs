//! In-process fake LLRP reader for tests
// (c) 2025 the llrpd contributors
//
// A real reader is a TCP server; so is the fake. Tests script it frame
// by frame: accept, answer the version handshake, then reply (or
// misbehave) however the scenario requires.

use std::net::SocketAddr;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

use crate::protocol::frame::{FrameReader, FrameWriter};
use crate::protocol::header::{Header, MessageType};
use crate::protocol::status::PARAM_LLRP_STATUS;

/// Encodes an `LLRPStatus` TLV parameter.
pub(crate) fn status_param(code: u16, description: &str) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u16(PARAM_LLRP_STATUS);
    #[allow(clippy::cast_possible_truncation)]
    buf.put_u16((8 + description.len()) as u16);
    buf.put_u16(code);
    #[allow(clippy::cast_possible_truncation)]
    buf.put_u16(description.len() as u16);
    buf.put_slice(description.as_bytes());
    buf.freeze()
}

/// A listening fake reader.
pub(crate) struct FakeReader {
    listener: TcpListener,
    pub(crate) addr: SocketAddr,
}

impl FakeReader {
    pub(crate) async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local_addr");
        Self { listener, addr }
    }

    pub(crate) async fn accept(&self) -> FakeSession {
        let (stream, _) = self.listener.accept().await.expect("accept");
        FakeSession::new(stream)
    }
}

/// One accepted connection, scripted by the test.
pub(crate) struct FakeSession {
    reader: FrameReader<OwnedReadHalf>,
    writer: FrameWriter<OwnedWriteHalf>,
}

impl FakeSession {
    fn new(stream: TcpStream) -> Self {
        let (r, w) = stream.into_split();
        Self {
            reader: FrameReader::new(r),
            writer: FrameWriter::new(w),
        }
    }

    /// Reads the next request frame in full.
    pub(crate) async fn next(&mut self) -> Option<(Header, Bytes)> {
        let header = self.reader.next().await.expect("read frame")?;
        let payload = self
            .reader
            .payload(header.payload_len)
            .await
            .expect("read payload");
        Some((header, payload))
    }

    /// Sends a frame with the given type and id.
    pub(crate) async fn send(&mut self, mtype: MessageType, id: u32, payload: &[u8]) {
        let header = Header::for_payload(1, mtype, payload.len(), id).expect("header");
        self.writer.send(&header, payload).await.expect("send");
    }

    /// Writes raw bytes, no framing. For playing a misbehaving peer.
    pub(crate) async fn send_raw(&mut self, bytes: &[u8]) {
        use tokio::io::AsyncWriteExt as _;
        self.writer.get_mut().write_all(bytes).await.expect("raw write");
        self.writer.get_mut().flush().await.expect("raw flush");
    }

    /// Sends a status-only response frame.
    pub(crate) async fn send_status(&mut self, mtype: MessageType, id: u32, code: u16) {
        let body = status_param(code, "");
        self.send(mtype, id, &body).await;
    }

    /// Answers the version handshake the way pre-1.1 firmware does:
    /// `ErrorMessage` to the probe, leaving the client at version 1.
    pub(crate) async fn handshake_v1(&mut self) {
        let (header, _) = self.next().await.expect("handshake probe");
        assert_eq!(header.message_type, MessageType::GET_SUPPORTED_VERSION);
        self.send_status(MessageType::ERROR_MESSAGE, header.message_id, 109)
            .await; // M_UnsupportedMessage
    }

    /// Answers the version handshake as an LLRP 1.1 reader: reports
    /// support for version 2 and accepts the switch.
    pub(crate) async fn handshake_v2(&mut self) {
        let (header, _) = self.next().await.expect("handshake probe");
        assert_eq!(header.message_type, MessageType::GET_SUPPORTED_VERSION);
        let mut body = BytesMut::new();
        body.put_u8(1);
        body.put_u8(2);
        body.put_slice(&status_param(0, ""));
        self.send(
            MessageType::GET_SUPPORTED_VERSION_RESPONSE,
            header.message_id,
            &body,
        )
        .await;

        let (header, payload) = self.next().await.expect("version switch");
        assert_eq!(header.message_type, MessageType::SET_PROTOCOL_VERSION);
        assert_eq!(payload.as_ref(), [2]);
        self.send_status(
            MessageType::SET_PROTOCOL_VERSION_RESPONSE,
            header.message_id,
            0,
        )
        .await;
    }

    /// Drops the connection, no goodbye.
    pub(crate) fn abort(self) {}
}
