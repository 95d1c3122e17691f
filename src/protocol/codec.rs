use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::constants::{MAX_PAYLOAD_LEN, PACKET_HEADER_SIZE};
use super::error::ProtocolError;

/// MySQL packet codec for use with tokio Framed.
///
/// Owns the connection's sequence counter, which advances by one for every
/// frame read or written. Logical packets larger than `MAX_PAYLOAD_LEN` are
/// split into max-size frames followed by a shorter terminal frame, and are
/// reassembled on the way in.
#[derive(Debug, Default)]
pub struct PacketCodec {
    sequence: u8,
    partial: BytesMut,
}

impl PacketCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence number expected on the next frame
    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    /// Start a new exchange (client command or backend command)
    pub fn reset_sequence(&mut self) {
        self.sequence = 0;
    }

    pub fn set_sequence(&mut self, sequence: u8) {
        self.sequence = sequence;
    }
}

impl Decoder for PacketCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if src.len() < PACKET_HEADER_SIZE {
                return Ok(None);
            }

            let len = (src[0] as usize) | ((src[1] as usize) << 8) | ((src[2] as usize) << 16);
            let seq = src[3];
            if seq != self.sequence {
                self.partial.clear();
                return Err(ProtocolError::SequenceMismatch {
                    expected: self.sequence,
                    got: seq,
                });
            }

            if src.len() < PACKET_HEADER_SIZE + len {
                src.reserve(PACKET_HEADER_SIZE + len - src.len());
                return Ok(None);
            }

            src.advance(PACKET_HEADER_SIZE);
            let chunk = src.split_to(len);
            self.sequence = self.sequence.wrapping_add(1);

            if len == MAX_PAYLOAD_LEN {
                self.partial.extend_from_slice(&chunk);
                continue;
            }

            if self.partial.is_empty() {
                return Ok(Some(chunk.freeze()));
            }
            self.partial.extend_from_slice(&chunk);
            return Ok(Some(self.partial.split().freeze()));
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(packet) => Ok(Some(packet)),
            None if buf.is_empty() && self.partial.is_empty() => Ok(None),
            None => Err(ProtocolError::ConnectionClosed),
        }
    }
}

impl Encoder<&[u8]> for PacketCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: &[u8], dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut rest = item;
        loop {
            let n = rest.len().min(MAX_PAYLOAD_LEN);
            dst.reserve(PACKET_HEADER_SIZE + n);
            dst.put_uint_le(n as u64, 3);
            dst.put_u8(self.sequence);
            dst.extend_from_slice(&rest[..n]);
            self.sequence = self.sequence.wrapping_add(1);
            rest = &rest[n..];

            // A max-size frame always needs a follower, even an empty one
            if n < MAX_PAYLOAD_LEN {
                return Ok(());
            }
        }
    }
}

impl Encoder<Bytes> for PacketCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        Encoder::<&[u8]>::encode(self, &item[..], dst)
    }
}
