//! Length-prefixed frame codec for the telemetry transport.
//!
//! Frame layout, all little-endian:
//!
//! ```text
//! [u32 body_len][u8 frame_kind][body]
//! frame_kind 0 (Sample):    [u16 topic_len][topic utf8][i64 timestamp_us][u8 payload_kind][payload]
//! frame_kind 1 (Subscribe): [u16 topic_len][topic utf8]
//! ```

use byteorder::{ByteOrder, LittleEndian};
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::payload::{Payload, PayloadKind};

const FRAME_SAMPLE: u8 = 0;
const FRAME_SUBSCRIBE: u8 = 1;

/// One timestamped sample on one topic.
#[derive(Debug, Clone)]
pub struct Sample {
    pub topic: String,
    pub timestamp_us: i64,
    pub payload: Payload,
}

#[derive(Debug, Clone)]
pub enum Frame {
    Sample(Sample),
    Subscribe { topic: String },
}

#[derive(Debug, Default)]
pub struct FrameCodec {}

fn io_err(msg: String) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg)
}

fn parse_topic(body: &mut &[u8]) -> std::io::Result<String> {
    if body.len() < 2 {
        return Err(io_err("frame body too short for topic length".into()));
    }
    let topic_len = LittleEndian::read_u16(&body[..2]) as usize;
    *body = &body[2..];
    if body.len() < topic_len {
        return Err(io_err("frame body too short for topic".into()));
    }
    let topic = std::str::from_utf8(&body[..topic_len])
        .map_err(|e| io_err(format!("topic is not utf8: {e}")))?
        .to_string();
    *body = &body[topic_len..];
    Ok(topic)
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> std::io::Result<Option<Frame>> {
        if buf.len() < 4 {
            return Ok(None);
        }
        let body_len = LittleEndian::read_u32(&buf[..4]) as usize;
        if buf.len() < 4 + body_len {
            buf.reserve(4 + body_len - buf.len());
            return Ok(None);
        }
        buf.advance(4);
        let body_bytes = buf.split_to(body_len);
        let mut body: &[u8] = &body_bytes;
        if body.is_empty() {
            return Err(io_err("empty frame".into()));
        }
        let frame_kind = body[0];
        body = &body[1..];
        match frame_kind {
            FRAME_SAMPLE => {
                let topic = parse_topic(&mut body)?;
                if body.len() < 9 {
                    return Err(io_err("sample frame too short".into()));
                }
                let timestamp_us = LittleEndian::read_i64(&body[..8]);
                let kind = PayloadKind::from_u8(body[8])
                    .ok_or_else(|| io_err(format!("unknown payload kind {}", body[8])))?;
                let payload = Payload::decode(kind, &body[9..])
                    .map_err(|e| io_err(format!("payload decode: {e}")))?;
                Ok(Some(Frame::Sample(Sample {
                    topic,
                    timestamp_us,
                    payload,
                })))
            }
            FRAME_SUBSCRIBE => {
                let topic = parse_topic(&mut body)?;
                Ok(Some(Frame::Subscribe { topic }))
            }
            other => Err(io_err(format!("unknown frame kind {other}"))),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: Frame, dest: &mut BytesMut) -> std::io::Result<()> {
        let mut body = Vec::with_capacity(64);
        match &item {
            Frame::Sample(s) => {
                body.push(FRAME_SAMPLE);
                body.extend_from_slice(&(s.topic.len() as u16).to_le_bytes());
                body.extend_from_slice(s.topic.as_bytes());
                body.extend_from_slice(&s.timestamp_us.to_le_bytes());
                body.push(s.payload.kind() as u8);
                s.payload.encode(&mut body);
            }
            Frame::Subscribe { topic } => {
                body.push(FRAME_SUBSCRIBE);
                body.extend_from_slice(&(topic.len() as u16).to_le_bytes());
                body.extend_from_slice(topic.as_bytes());
            }
        }
        dest.reserve(4 + body.len());
        dest.put_u32_le(body.len() as u32);
        dest.put_slice(&body);
        Ok(())
    }
}
