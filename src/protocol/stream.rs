use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::Framed;

use super::codec::PacketCodec;
use super::error::{MysqlError, ProtocolError};
use super::packets::{encode_eof, encode_err, OkPacket};

/// Packet transport over any byte stream.
///
/// Every read or write failure is reported as a fatal [`ProtocolError`];
/// the caller must drop the stream afterwards.
pub struct PacketStream<S> {
    framed: Framed<S, PacketCodec>,
}

impl<S> PacketStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            framed: Framed::new(stream, PacketCodec::new()),
        }
    }

    /// Read one logical packet, reassembling split frames
    pub async fn read_packet(&mut self) -> Result<Bytes, ProtocolError> {
        match self.framed.next().await {
            Some(result) => result,
            None => Err(ProtocolError::ConnectionClosed),
        }
    }

    /// Write and flush one logical packet
    pub async fn write_packet(&mut self, payload: &[u8]) -> Result<(), ProtocolError> {
        self.framed.send(payload).await
    }

    /// Buffer a packet without flushing; pair with [`flush`](Self::flush)
    pub async fn queue_packet(&mut self, payload: &[u8]) -> Result<(), ProtocolError> {
        self.framed.feed(payload).await
    }

    pub async fn flush(&mut self) -> Result<(), ProtocolError> {
        SinkExt::<&[u8]>::flush(&mut self.framed).await
    }

    pub fn sequence(&self) -> u8 {
        self.framed.codec().sequence()
    }

    pub fn reset_sequence(&mut self) {
        self.framed.codec_mut().reset_sequence();
    }

    pub fn get_ref(&self) -> &S {
        self.framed.get_ref()
    }

    pub async fn write_ok(&mut self, ok: &OkPacket, capabilities: u32) -> Result<(), ProtocolError> {
        let payload = ok.encode(capabilities);
        self.write_packet(&payload).await
    }

    pub async fn write_err(
        &mut self,
        err: &MysqlError,
        capabilities: u32,
    ) -> Result<(), ProtocolError> {
        let payload = encode_err(err, capabilities);
        self.write_packet(&payload).await
    }

    pub async fn queue_eof(&mut self, status: u16, capabilities: u32) -> Result<(), ProtocolError> {
        let payload: BytesMut = encode_eof(status, capabilities);
        self.queue_packet(&payload).await
    }

    /// Flush pending writes and shut the write half down
    pub async fn shutdown(&mut self) -> Result<(), ProtocolError> {
        self.flush().await?;
        self.framed.get_mut().shutdown().await?;
        Ok(())
    }
}
