//! Packet layout for the LiveLink face protocol
//!
//! One datagram per frame:
//! - u32 version (LE)
//! - subject id bytes (UTF-8, no length prefix)
//! - i32 name length (BE) + name bytes
//! - u32 frame count, u32 sub-frame (BE)
//! - u32 frame rate, u32 rate denominator (BE)
//! - u8 channel count + count × f32 (BE)

use bytes::{Buf, BufMut, Bytes, BytesMut};

use facelink_core::{FaceLinkError, FaceLinkResult, SubjectId, FRAME_RATE};

/// Protocol version understood by the receiving engine
pub const PROTOCOL_VERSION: u32 = 6;

/// Fixed sub-frame value sent with every timecode
pub const SUB_FRAME: u32 = 1_056_060_032;

/// Denominator sent with the frame rate
pub const FRAME_RATE_DENOMINATOR: u32 = FRAME_RATE / 60;

/// Encoded size of a packet for a given id, name and channel count
pub fn packet_size(id_len: usize, name_len: usize, channels: usize) -> usize {
    4 + id_len + 4 + name_len + 8 + 8 + 1 + channels * 4
}

/// Immutable, fully encoded frame ready for transmission
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedPacket(Bytes);

impl EncodedPacket {
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl std::fmt::Debug for EncodedPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EncodedPacket({} bytes)", self.0.len())
    }
}

impl From<Bytes> for EncodedPacket {
    fn from(bytes: Bytes) -> Self {
        EncodedPacket(bytes)
    }
}

/// Fields of a packet on the wire
#[derive(Clone, Debug, PartialEq)]
pub struct PacketFields<'a> {
    pub subject_id: &'a SubjectId,
    pub name: &'a str,
    pub frame_count: u32,
    pub values: &'a [f32],
}

impl PacketFields<'_> {
    /// Serialize to the wire layout. Values are written as given.
    pub fn serialize(&self) -> FaceLinkResult<EncodedPacket> {
        if self.values.len() > u8::MAX as usize {
            return Err(FaceLinkError::MalformedPacket(format!(
                "too many channels: {}",
                self.values.len()
            )));
        }

        let id = self.subject_id.as_bytes();
        let name = self.name.as_bytes();
        let mut buf = BytesMut::with_capacity(packet_size(id.len(), name.len(), self.values.len()));

        buf.put_u32_le(PROTOCOL_VERSION);
        buf.put_slice(id);
        buf.put_i32(name.len() as i32);
        buf.put_slice(name);
        buf.put_u32(self.frame_count);
        buf.put_u32(SUB_FRAME);
        buf.put_u32(FRAME_RATE);
        buf.put_u32(FRAME_RATE_DENOMINATOR);
        buf.put_u8(self.values.len() as u8);
        for v in self.values {
            buf.put_f32(*v);
        }

        Ok(EncodedPacket(buf.freeze()))
    }
}

/// A parsed packet
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedPacket {
    pub version: u32,
    pub subject_id: String,
    pub name: String,
    pub frame_count: u32,
    pub sub_frame: u32,
    pub frame_rate: u32,
    pub frame_rate_denominator: u32,
    pub values: Vec<f32>,
}

/// Parse a packet. The subject id carries no length prefix, so its length
/// must be known to the reader.
pub fn decode_packet(buf: &[u8], subject_id_len: usize) -> FaceLinkResult<DecodedPacket> {
    let mut cur = buf;

    need(cur, 4 + subject_id_len + 4)?;
    let version = cur.get_u32_le();
    let subject_id = utf8(&cur[..subject_id_len])?;
    cur.advance(subject_id_len);

    let name_len = cur.get_i32();
    if name_len < 0 {
        return Err(FaceLinkError::MalformedPacket(format!(
            "negative name length {name_len}"
        )));
    }
    let name_len = name_len as usize;
    need(cur, name_len + 17)?;
    let name = utf8(&cur[..name_len])?;
    cur.advance(name_len);

    let frame_count = cur.get_u32();
    let sub_frame = cur.get_u32();
    let frame_rate = cur.get_u32();
    let frame_rate_denominator = cur.get_u32();
    let count = cur.get_u8() as usize;

    need(cur, count * 4)?;
    let values = (0..count).map(|_| cur.get_f32()).collect();

    if cur.has_remaining() {
        return Err(FaceLinkError::MalformedPacket(format!(
            "{} trailing bytes",
            cur.remaining()
        )));
    }

    Ok(DecodedPacket {
        version,
        subject_id,
        name,
        frame_count,
        sub_frame,
        frame_rate,
        frame_rate_denominator,
        values,
    })
}

fn need(cur: &[u8], n: usize) -> FaceLinkResult<()> {
    if cur.len() < n {
        return Err(FaceLinkError::MalformedPacket(format!(
            "buffer too short: expected {n}, got {}",
            cur.len()
        )));
    }
    Ok(())
}

fn utf8(bytes: &[u8]) -> FaceLinkResult<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| FaceLinkError::MalformedPacket(format!("invalid utf-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_layout() {
        let id = SubjectId::new("ab");
        let packet = PacketFields {
            subject_id: &id,
            name: "Face",
            frame_count: 0x01020304,
            values: &[1.0, 0.5],
        }
        .serialize()
        .unwrap();

        let mut expected = Vec::new();
        expected.extend_from_slice(&[6, 0, 0, 0]);
        expected.extend_from_slice(b"$ab");
        expected.extend_from_slice(&[0, 0, 0, 4]);
        expected.extend_from_slice(b"Face");
        expected.extend_from_slice(&[1, 2, 3, 4]);
        expected.extend_from_slice(&SUB_FRAME.to_be_bytes());
        expected.extend_from_slice(&[0, 0, 0, 60]);
        expected.extend_from_slice(&[0, 0, 0, 1]);
        expected.push(2);
        expected.extend_from_slice(&[0x3f, 0x80, 0, 0]);
        expected.extend_from_slice(&[0x3f, 0x00, 0, 0]);

        assert_eq!(packet.as_bytes(), expected.as_slice());
        assert_eq!(packet.len(), packet_size(3, 4, 2));
    }

    #[test]
    fn test_decode_reads_back_fields() {
        let id = SubjectId::new("subject");
        let values = vec![0.25; 61];
        let packet = PacketFields {
            subject_id: &id,
            name: "Face",
            frame_count: 42,
            values: &values,
        }
        .serialize()
        .unwrap();

        let decoded = decode_packet(packet.as_bytes(), id.as_str().len()).unwrap();
        assert_eq!(decoded.version, PROTOCOL_VERSION);
        assert_eq!(decoded.subject_id, "$subject");
        assert_eq!(decoded.name, "Face");
        assert_eq!(decoded.frame_count, 42);
        assert_eq!(decoded.sub_frame, SUB_FRAME);
        assert_eq!(decoded.frame_rate, 60);
        assert_eq!(decoded.frame_rate_denominator, 1);
        assert_eq!(decoded.values, values);
    }

    #[test]
    fn test_decode_truncated() {
        let id = SubjectId::new("x");
        let packet = PacketFields {
            subject_id: &id,
            name: "n",
            frame_count: 1,
            values: &[0.0; 61],
        }
        .serialize()
        .unwrap();
        let bytes = packet.as_bytes();
        let result = decode_packet(&bytes[..bytes.len() - 1], 2);
        assert!(matches!(result, Err(FaceLinkError::MalformedPacket(_))));
    }
}
