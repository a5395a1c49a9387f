//! Wire framing for packets on the tunnel stream.
//!
//! QUIC streams are byte streams; send boundaries on one side do not surface
//! as receive boundaries on the other. Every packet is therefore prefixed
//! with a 2-byte big-endian length and reassembled on the receiver before it
//! enters the egress queue.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use quictun_core::MAX_PACKET_SIZE;
use snafu::{Snafu, ensure};
use tokio_util::codec::{Decoder, Encoder};

const FRAME_HEADER_LEN: usize = 2;

#[derive(Debug, Snafu)]
pub enum FrameError {
	#[snafu(display("Frame of {len} bytes exceeds the {MAX_PACKET_SIZE}-byte packet limit"))]
	Oversize { len: usize },

	#[snafu(display("IO error on the tunnel stream"))]
	Io { source: std::io::Error },
}

impl From<std::io::Error> for FrameError {
	fn from(source: std::io::Error) -> Self {
		FrameError::Io { source }
	}
}

/// Length-prefixed packet frames: `u16` big-endian length, then the raw
/// IPv4 datagram.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec;

impl Encoder<Bytes> for FrameCodec {
	type Error = FrameError;

	fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
		ensure!(item.len() <= MAX_PACKET_SIZE, OversizeSnafu { len: item.len() });
		dst.reserve(FRAME_HEADER_LEN + item.len());
		dst.put_u16(item.len() as u16);
		dst.put_slice(&item);
		Ok(())
	}
}

impl Decoder for FrameCodec {
	type Error = FrameError;
	type Item = Bytes;

	fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
		if src.len() < FRAME_HEADER_LEN {
			return Ok(None);
		}
		let len = usize::from(u16::from_be_bytes([src[0], src[1]]));
		ensure!(len <= MAX_PACKET_SIZE, OversizeSnafu { len });
		if src.len() < FRAME_HEADER_LEN + len {
			src.reserve(FRAME_HEADER_LEN + len - src.len());
			return Ok(None);
		}
		src.advance(FRAME_HEADER_LEN);
		Ok(Some(src.split_to(len).freeze()))
	}
}

#[cfg(test)]
mod test {
	use tokio_util::codec::{Decoder as _, Encoder as _};

	use super::*;

	#[test]
	fn frame_survives_encode_decode() {
		let packet = Bytes::from(vec![0x45u8; 28]);
		let mut wire = BytesMut::new();
		FrameCodec.encode(packet.clone(), &mut wire).unwrap();
		assert_eq!(wire.len(), FRAME_HEADER_LEN + 28);

		let decoded = FrameCodec.decode(&mut wire).unwrap().unwrap();
		assert_eq!(decoded, packet);
		assert!(wire.is_empty());
	}

	#[test]
	fn partial_frame_yields_none() {
		let packet = Bytes::from(vec![7u8; 100]);
		let mut wire = BytesMut::new();
		FrameCodec.encode(packet.clone(), &mut wire).unwrap();

		// Feed the bytes one half at a time, as the stream may deliver them.
		let tail = wire.split_off(40);
		assert!(FrameCodec.decode(&mut wire).unwrap().is_none());
		wire.unsplit(tail);
		assert_eq!(FrameCodec.decode(&mut wire).unwrap().unwrap(), packet);
	}

	#[test]
	fn back_to_back_frames_keep_boundaries() {
		let first = Bytes::from(vec![1u8; 20]);
		let second = Bytes::from(vec![2u8; 1500]);
		let mut wire = BytesMut::new();
		FrameCodec.encode(first.clone(), &mut wire).unwrap();
		FrameCodec.encode(second.clone(), &mut wire).unwrap();

		assert_eq!(FrameCodec.decode(&mut wire).unwrap().unwrap(), first);
		assert_eq!(FrameCodec.decode(&mut wire).unwrap().unwrap(), second);
		assert!(FrameCodec.decode(&mut wire).unwrap().is_none());
	}

	#[test]
	fn oversized_packet_is_not_encoded() {
		let mut wire = BytesMut::new();
		let err = FrameCodec
			.encode(Bytes::from(vec![0u8; MAX_PACKET_SIZE + 1]), &mut wire)
			.unwrap_err();
		assert!(matches!(err, FrameError::Oversize { len: 1501 }));
		assert!(wire.is_empty());
	}

	#[test]
	fn oversized_length_on_the_wire_is_rejected() {
		let mut wire = BytesMut::new();
		wire.put_u16(1501);
		wire.put_slice(&[0u8; 32]);
		assert!(matches!(
			FrameCodec.decode(&mut wire),
			Err(FrameError::Oversize { len: 1501 })
		));
	}
}
