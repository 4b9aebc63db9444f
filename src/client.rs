//! Async client for the length-prefixed wire format.
//!
//! Runs on tokio rather than the reactor: a client typically owns one
//! connection and is happy to await each reply.

use bytes::Bytes;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::trace;

use crate::error::{FrameError, Result};
use crate::wire::{FrameLimits, LENGTH_PREFIX_LEN};

/// A framed connection over any async byte stream.
pub struct FrameClient<S> {
    stream: S,
    limits: FrameLimits,
}

impl FrameClient<TcpStream> {
    /// Connect to a frame server.
    pub async fn connect<A: ToSocketAddrs>(addr: A, limits: FrameLimits) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream, limits))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> FrameClient<S> {
    pub fn new(stream: S, limits: FrameLimits) -> Self {
        Self { stream, limits }
    }

    /// Send one frame.
    pub async fn send(&mut self, payload: &[u8]) -> Result<()> {
        let wire = self.limits.encode(payload)?;
        self.stream.write_all(&wire).await?;
        self.stream.flush().await?;
        trace!(len = payload.len(), "Frame sent");
        Ok(())
    }

    /// Receive one frame.
    ///
    /// Returns `Ok(None)` if the peer closed the stream between frames and
    /// `ConnectionClosed` if it closed mid-frame.
    pub async fn recv(&mut self) -> Result<Option<Bytes>> {
        let mut prefix = [0u8; LENGTH_PREFIX_LEN];
        let mut filled = 0;
        while filled < LENGTH_PREFIX_LEN {
            let n = self.stream.read(&mut prefix[filled..]).await?;
            if n == 0 {
                return if filled == 0 {
                    Ok(None)
                } else {
                    Err(FrameError::ConnectionClosed)
                };
            }
            filled += n;
        }

        let declared = self.limits.byte_order.read_len(prefix);
        let len = self.limits.check_declared(declared)?;

        let mut body = vec![0u8; len];
        self.stream
            .read_exact(&mut body)
            .await
            .map_err(|e| match e.kind() {
                io::ErrorKind::UnexpectedEof => FrameError::ConnectionClosed,
                _ => FrameError::Io(e),
            })?;

        trace!(len, "Frame received");
        Ok(Some(Bytes::from(body)))
    }

    /// Send one frame and wait for the next frame in reply.
    pub async fn request(&mut self, payload: &[u8]) -> Result<Bytes> {
        self.send(payload).await?;
        self.recv().await?.ok_or(FrameError::ConnectionClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Violation;
    use crate::wire::ByteOrder;
    use tokio_test::io::Builder;

    #[test]
    fn test_request_roundtrip() {
        let mock = Builder::new()
            .write(b"\x00\x00\x00\x05hello")
            .read(b"\x00\x00\x00\x05hello")
            .build();
        let mut client = FrameClient::new(mock, FrameLimits::default());

        let reply = tokio_test::block_on(client.request(b"hello")).unwrap();
        assert_eq!(reply, Bytes::from_static(b"hello"));
    }

    #[test]
    fn test_recv_fragmented() {
        let mock = Builder::new()
            .read(&[0x00, 0x00])
            .read(&[0x00, 0x03, b'a'])
            .read(b"bc")
            .read(&[0, 0, 0, 0])
            .build();
        let mut client = FrameClient::new(mock, FrameLimits::default());

        tokio_test::block_on(async {
            assert_eq!(client.recv().await.unwrap(), Some(Bytes::from_static(b"abc")));
            assert_eq!(client.recv().await.unwrap(), Some(Bytes::new()));
            assert_eq!(client.recv().await.unwrap(), None);
        });
    }

    #[test]
    fn test_recv_negative_length() {
        let mock = Builder::new().read(&[0xff, 0xff, 0xff, 0xff]).build();
        let mut client = FrameClient::new(mock, FrameLimits::default());

        match tokio_test::block_on(client.recv()) {
            Err(FrameError::ProtocolViolation(Violation::NegativeLength(-1))) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_recv_too_large() {
        let limits = FrameLimits {
            max_frame_size: 4,
            byte_order: ByteOrder::Big,
        };
        let mock = Builder::new().read(&[0, 0, 0, 5]).build();
        let mut client = FrameClient::new(mock, limits);

        match tokio_test::block_on(client.recv()) {
            Err(FrameError::ProtocolViolation(Violation::FrameTooLarge { len: 5, max: 4 })) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_recv_eof_mid_frame() {
        let mock = Builder::new().read(b"\x00\x00\x00\x05he").build();
        let mut client = FrameClient::new(mock, FrameLimits::default());

        assert!(matches!(
            tokio_test::block_on(client.recv()),
            Err(FrameError::ConnectionClosed)
        ));
    }

    #[test]
    fn test_little_endian_send() {
        let limits = FrameLimits {
            byte_order: ByteOrder::Little,
            ..FrameLimits::default()
        };
        let mock = Builder::new().write(b"\x02\x00\x00\x00hi").build();
        let mut client = FrameClient::new(mock, limits);

        tokio_test::block_on(client.send(b"hi")).unwrap();
    }
}
