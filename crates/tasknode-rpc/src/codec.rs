use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::error::RpcError;
use crate::frames::{decode, encode, Frame};

/// Largest accepted frame body.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Length-prefixed bincode [`Frame`]s.
#[derive(Debug)]
pub struct FrameCodec {
    inner: LengthDelimitedCodec,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .length_field_length(4)
                .big_endian()
                .max_frame_length(MAX_FRAME_BYTES)
                .new_codec(),
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = RpcError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, RpcError> {
        match self.inner.decode(src)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = RpcError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), RpcError> {
        let body = encode(&frame)?;
        self.inner.encode(Bytes::from(body), dst)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::{ReqFrame, ResFrame};

    #[test]
    fn frames_split_across_reads() {
        let mut codec = FrameCodec::new();
        let mut wire = BytesMut::new();
        let first = Frame::Request(ReqFrame {
            id: 1,
            method: "Serve.Ping".into(),
            body: vec![],
        });
        let second = Frame::Response(ResFrame::ok(1, vec![1, 2, 3]));
        codec.encode(first.clone(), &mut wire).unwrap();
        codec.encode(second.clone(), &mut wire).unwrap();

        // Feed the bytes one at a time.
        let mut buf = BytesMut::new();
        let mut out = Vec::new();
        for byte in wire.iter() {
            buf.extend_from_slice(&[*byte]);
            while let Some(frame) = codec.decode(&mut buf).unwrap() {
                out.push(frame);
            }
        }
        assert_eq!(out, vec![first, second]);
    }

    #[test]
    fn length_prefix_is_big_endian_u32() {
        let mut codec = FrameCodec::new();
        let mut wire = BytesMut::new();
        codec
            .encode(Frame::Response(ResFrame::ok(0, vec![])), &mut wire)
            .unwrap();
        let len = u32::from_be_bytes([wire[0], wire[1], wire[2], wire[3]]) as usize;
        assert_eq!(len, wire.len() - 4);
    }

    #[test]
    fn oversized_length_rejected() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&u32::MAX.to_be_bytes());
        assert!(codec.decode(&mut buf).is_err());
    }
}
