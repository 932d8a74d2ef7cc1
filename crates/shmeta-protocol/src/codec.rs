use std::io::{ErrorKind as IoErrorKind, Read, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ProtocolError, ProtocolResult};
use crate::message::{Request, Response, MAX_MESSAGE_SIZE};

/// A message that can travel in a frame.
pub trait WireMessage: Serialize + DeserializeOwned {
    fn type_tag(&self) -> u8;
}

impl WireMessage for Request {
    fn type_tag(&self) -> u8 {
        Request::type_tag(self)
    }
}

impl WireMessage for Response {
    fn type_tag(&self) -> u8 {
        Response::type_tag(self)
    }
}

/// Codec for shmeta frames: `[4 bytes len][1 byte tag][bincode payload]`.
///
/// `len` counts the tag and the payload.
pub struct MetaCodec;

impl MetaCodec {
    /// Encode a message with framing.
    pub fn encode<M: WireMessage>(msg: &M) -> ProtocolResult<Vec<u8>> {
        let payload =
            bincode::serialize(msg).map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: payload.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        let len = u32::try_from(payload.len() + 1).map_err(|_| ProtocolError::MessageTooLarge {
            size: payload.len(),
            max: MAX_MESSAGE_SIZE,
        })?;
        let mut buf = Vec::with_capacity(4 + 1 + payload.len());
        buf.extend_from_slice(&len.to_be_bytes());
        buf.push(msg.type_tag());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Validate a frame header and return the body length (tag + payload).
    pub fn body_len(header: [u8; 4]) -> ProtocolResult<usize> {
        let len = u32::from_be_bytes(header) as usize;
        if len < 1 {
            return Err(ProtocolError::FramingError("zero-length frame".into()));
        }
        if len - 1 > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: len - 1,
                max: MAX_MESSAGE_SIZE,
            });
        }
        Ok(len)
    }

    /// Decode a frame body (tag + payload). The tag must agree with the
    /// decoded message.
    pub fn decode_body<M: WireMessage>(body: &[u8]) -> ProtocolResult<M> {
        let (tag, payload) = body
            .split_first()
            .ok_or_else(|| ProtocolError::FramingError("empty body".into()))?;
        let msg: M = bincode::deserialize(payload)
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        if msg.type_tag() != *tag {
            return Err(ProtocolError::FramingError(format!(
                "tag {tag} does not match payload tag {}",
                msg.type_tag()
            )));
        }
        Ok(msg)
    }

    /// Decode a complete frame. Returns (message, bytes_consumed).
    pub fn decode<M: WireMessage>(data: &[u8]) -> ProtocolResult<(M, usize)> {
        if data.len() < 5 {
            return Err(ProtocolError::FramingError("too short".into()));
        }
        let mut header = [0u8; 4];
        header.copy_from_slice(&data[0..4]);
        let len = Self::body_len(header)?;
        let total = 4 + len;
        if data.len() < total {
            return Err(ProtocolError::FramingError(format!(
                "incomplete: have {}, need {}",
                data.len(),
                total
            )));
        }
        let msg = Self::decode_body(&data[4..total])?;
        Ok((msg, total))
    }

    /// Write one framed message to a blocking stream.
    pub fn write_frame<W: Write, M: WireMessage>(writer: &mut W, msg: &M) -> ProtocolResult<()> {
        let buf = Self::encode(msg)?;
        writer.write_all(&buf)?;
        writer.flush()?;
        Ok(())
    }

    /// Read one framed message from a blocking stream.
    ///
    /// End of stream before the header is reported as
    /// [`ProtocolError::Disconnected`].
    pub fn read_frame<R: Read, M: WireMessage>(reader: &mut R) -> ProtocolResult<M> {
        let mut header = [0u8; 4];
        match reader.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == IoErrorKind::UnexpectedEof => {
                return Err(ProtocolError::Disconnected)
            }
            Err(e) => return Err(e.into()),
        }
        let len = Self::body_len(header)?;
        let mut body = vec![0u8; len];
        reader.read_exact(&mut body)?;
        Self::decode_body(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ClientKind, PROTOCOL_VERSION};
    use shmeta_meta::ObjectMeta;
    use shmeta_types::{ErrorKind, ObjectId};

    #[test]
    fn request_frame_roundtrip() {
        let mut meta = ObjectMeta::new("pair");
        meta.set("label", "x").unwrap();
        meta.add_member("first", ObjectId::from_raw(3)).unwrap();
        let msg = Request::CreateData {
            record: meta.to_record(),
        };
        let encoded = MetaCodec::encode(&msg).unwrap();
        let (decoded, consumed): (Request, usize) = MetaCodec::decode(&encoded).unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(decoded, msg);
    }

    #[test]
    fn header_carries_tag() {
        let msg = Request::Register {
            kind: ClientKind::Rpc,
            version: PROTOCOL_VERSION,
        };
        let encoded = MetaCodec::encode(&msg).unwrap();
        assert_eq!(encoded[4], msg.type_tag());
    }

    #[test]
    fn mismatched_tag_is_rejected() {
        let mut encoded = MetaCodec::encode(&Response::Synced).unwrap();
        encoded[4] = Response::Exited.type_tag();
        let err = MetaCodec::decode::<Response>(&encoded).unwrap_err();
        assert!(matches!(err, ProtocolError::FramingError(_)));
    }

    #[test]
    fn decode_truncated() {
        let err = MetaCodec::decode::<Request>(&[0, 0, 0]).unwrap_err();
        assert!(matches!(err, ProtocolError::FramingError(_)));

        let encoded = MetaCodec::encode(&Request::SyncMeta).unwrap();
        let err = MetaCodec::decode::<Request>(&encoded[..encoded.len() - 1]);
        // SyncMeta has a 4-byte payload, so dropping a byte leaves it incomplete.
        assert!(matches!(err, Err(ProtocolError::FramingError(_))));
    }

    #[test]
    fn decode_zero_length() {
        let err = MetaCodec::decode::<Request>(&[0u8, 0, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, ProtocolError::FramingError(_)));
    }

    #[test]
    fn oversized_header_is_rejected() {
        let header = (u32::try_from(MAX_MESSAGE_SIZE).unwrap() + 2).to_be_bytes();
        let err = MetaCodec::body_len(header).unwrap_err();
        assert!(matches!(err, ProtocolError::MessageTooLarge { .. }));
    }

    #[test]
    fn stream_read_write() {
        let mut buf = Vec::new();
        MetaCodec::write_frame(&mut buf, &Request::Exit).unwrap();
        MetaCodec::write_frame(
            &mut buf,
            &Response::error(ErrorKind::NotFound, "gone"),
        )
        .unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let first: Request = MetaCodec::read_frame(&mut cursor).unwrap();
        assert_eq!(first, Request::Exit);
        let second: Response = MetaCodec::read_frame(&mut cursor).unwrap();
        assert_eq!(second, Response::error(ErrorKind::NotFound, "gone"));
        let eof = MetaCodec::read_frame::<_, Request>(&mut cursor).unwrap_err();
        assert!(matches!(eof, ProtocolError::Disconnected));
    }
}
