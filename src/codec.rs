//! The seam to attribute encoding. This layer only interprets the fixed packet header - what
//!  follows it is handed to an [AttributeCodec].

use anyhow::bail;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use crate::packet::PacketHeader;

pub trait AttributeCodec {
    type Attributes;

    /// appends the encoded attributes to a buffer that already contains the packet header
    fn encode(&self, attributes: &Self::Attributes, buf: &mut BytesMut) -> anyhow::Result<()>;

    fn decode(&self, header: &PacketHeader, data: &[u8]) -> anyhow::Result<Self::Attributes>;
}

/// Passes attribute data through as raw bytes, without looking at it
#[derive(Debug, Clone, Copy, Default)]
pub struct OpaqueCodec;
impl AttributeCodec for OpaqueCodec {
    type Attributes = Bytes;

    fn encode(&self, attributes: &Bytes, buf: &mut BytesMut) -> anyhow::Result<()> {
        buf.put_slice(attributes);
        Ok(())
    }

    fn decode(&self, _header: &PacketHeader, data: &[u8]) -> anyhow::Result<Bytes> {
        Ok(Bytes::copy_from_slice(data))
    }
}

/// An attribute in its generic type-length-value form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAttribute {
    pub attr_type: u8,
    pub value: Bytes,
}

impl RawAttribute {
    pub const MAX_VALUE_LEN: usize = 253;

    pub fn new(attr_type: u8, value: &[u8]) -> RawAttribute {
        RawAttribute {
            attr_type,
            value: Bytes::copy_from_slice(value),
        }
    }
}

/// Splits attribute data into type-length-value triples without interpreting values. This
///  rejects packets whose attribute framing is broken, which is as far as this layer goes.
#[derive(Debug, Clone, Copy, Default)]
pub struct TlvCodec;
impl AttributeCodec for TlvCodec {
    type Attributes = Vec<RawAttribute>;

    fn encode(&self, attributes: &Vec<RawAttribute>, buf: &mut BytesMut) -> anyhow::Result<()> {
        for attr in attributes {
            if attr.value.len() > RawAttribute::MAX_VALUE_LEN {
                bail!("attribute {} has a value of {} bytes, the maximum is {}", attr.attr_type, attr.value.len(), RawAttribute::MAX_VALUE_LEN);
            }
            buf.put_u8(attr.attr_type);
            buf.put_u8((attr.value.len() + 2) as u8);
            buf.put_slice(&attr.value);
        }
        Ok(())
    }

    fn decode(&self, header: &PacketHeader, mut data: &[u8]) -> anyhow::Result<Vec<RawAttribute>> {
        let mut result = Vec::new();
        while data.has_remaining() {
            if data.remaining() < 2 {
                bail!("truncated attribute header in packet {}", header.id);
            }
            let attr_type = data.get_u8();
            let len = data.get_u8() as usize;
            if len < 2 {
                bail!("attribute {} has invalid length {}", attr_type, len);
            }
            if data.remaining() < len - 2 {
                bail!("attribute {} with length {} overflows the packet", attr_type, len);
            }
            result.push(RawAttribute {
                attr_type,
                value: data.copy_to_bytes(len - 2),
            });
        }
        Ok(result)
    }
}
