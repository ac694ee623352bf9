//! Framed LLRP streams: one header, then exactly `payload_len` bytes
// (c) 2025 the llrpd contributors

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::header::{FrameError, HEADER_LEN, Header};

/// Reads LLRP frames off the receive side of a socket.
///
/// Payloads are length-limited reads over the same stream, so they are
/// serial by construction: the payload of one frame must be consumed
/// ([`payload`](Self::payload)) or discarded
/// ([`skip_payload`](Self::skip_payload)) before the next header can be
/// read. An unconsumed remainder is drained automatically by the next
/// [`next`](Self::next) call.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    /// Payload bytes of the current frame not yet pulled off the wire.
    undrained: u64,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wraps the read half of a connection.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            undrained: 0,
        }
    }

    /// Reads the next message header.
    ///
    /// Returns `Ok(None)` on a clean end-of-stream at a frame boundary.
    /// EOF part-way through a header surfaces as
    /// [`FrameError::ShortHeader`].
    pub async fn next(&mut self) -> Result<Option<Header>, FrameError> {
        self.discard_remaining().await?;
        let mut buf = [0u8; HEADER_LEN];
        let mut filled = 0;
        while filled < HEADER_LEN {
            let n = self.inner.read(&mut buf[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(FrameError::ShortHeader { got: filled });
            }
            filled += n;
        }
        let header = Header::decode(&buf)?;
        self.undrained = u64::from(header.payload_len);
        Ok(Some(header))
    }

    /// Reads the current frame's payload in full.
    ///
    /// `len` must be the `payload_len` of the header most recently
    /// returned by [`next`](Self::next). A stream that ends first is a
    /// fatal framing error.
    pub async fn payload(&mut self, len: u32) -> Result<Bytes, FrameError> {
        debug_assert_eq!(u64::from(len), self.undrained);
        let expected = u64::from(len);
        let mut buf = BytesMut::zeroed(len as usize);
        let mut got: u64 = 0;
        while got < expected {
            #[allow(clippy::cast_possible_truncation)] // got < expected <= u32::MAX
            let n = self.inner.read(&mut buf[got as usize..]).await?;
            if n == 0 {
                return Err(FrameError::PayloadReadShort { expected, got });
            }
            got += n as u64;
            self.undrained = expected - got;
        }
        Ok(buf.freeze())
    }

    /// Discards the current frame's payload without buffering it.
    pub async fn skip_payload(&mut self) -> Result<(), FrameError> {
        self.discard_remaining().await
    }

    async fn discard_remaining(&mut self) -> Result<(), FrameError> {
        if self.undrained == 0 {
            return Ok(());
        }
        let expected = self.undrained;
        let mut scratch = [0u8; 4096];
        while self.undrained > 0 {
            #[allow(clippy::cast_possible_truncation)] // bounded by scratch.len()
            let want = self.undrained.min(scratch.len() as u64) as usize;
            let n = self.inner.read(&mut scratch[..want]).await?;
            if n == 0 {
                return Err(FrameError::PayloadReadShort {
                    expected,
                    got: expected - self.undrained,
                });
            }
            self.undrained -= n as u64;
        }
        Ok(())
    }
}

/// Writes LLRP frames onto the send side of a socket.
///
/// Exactly `payload_len` bytes follow each header; a source that comes
/// up short, or an I/O failure once the header is on the wire, leaves
/// the peer desynchronised and is therefore fatal to the connection.
#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Wraps the write half of a connection.
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Writes one frame from an in-memory payload.
    pub async fn send(&mut self, header: &Header, payload: &[u8]) -> Result<(), FrameError> {
        debug_assert_eq!(payload.len() as u64, u64::from(header.payload_len));
        let wire = header.encode()?;
        self.inner.write_all(&wire).await?;
        self.copy_body(header, payload).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Writes one frame, streaming the payload from `source`.
    ///
    /// The source must produce exactly `header.payload_len` bytes.
    pub async fn send_streaming<S: AsyncRead + Unpin>(
        &mut self,
        header: &Header,
        source: &mut S,
    ) -> Result<(), FrameError> {
        let wire = header.encode()?;
        self.inner.write_all(&wire).await?;
        let expected = u64::from(header.payload_len);
        let mut limited = source.take(expected);
        let mut written: u64 = 0;
        let mut scratch = [0u8; 4096];
        loop {
            let n = limited.read(&mut scratch).await?;
            if n == 0 {
                break;
            }
            self.inner
                .write_all(&scratch[..n])
                .await
                .map_err(|source| FrameError::PayloadWriteInterrupted {
                    expected,
                    written,
                    source,
                })?;
            written += n as u64;
        }
        if written != expected {
            return Err(FrameError::PayloadReadShort {
                expected,
                got: written,
            });
        }
        self.inner.flush().await?;
        Ok(())
    }

    /// Shuts the write half down, flushing first.
    pub async fn shutdown(&mut self) -> Result<(), FrameError> {
        self.inner.shutdown().await?;
        Ok(())
    }

    /// The underlying writer. Bytes written here bypass framing; test
    /// harnesses use this to play a misbehaving peer.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    async fn copy_body(&mut self, header: &Header, payload: &[u8]) -> Result<(), FrameError> {
        let expected = u64::from(header.payload_len);
        let mut written: u64 = 0;
        while (written as usize) < payload.len() {
            match self.inner.write(&payload[written as usize..]).await {
                Ok(n) => written += n as u64,
                Err(source) => {
                    return Err(FrameError::PayloadWriteInterrupted {
                        expected,
                        written,
                        source,
                    });
                }
            }
        }
        Ok(())
    }
}
