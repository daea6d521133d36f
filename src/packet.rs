pub mod code;

use anyhow::bail;
use bytes::{Buf, BufMut, Bytes};

pub const HEADER_LEN: usize = 20;
pub const AUTHENTICATOR_LEN: usize = 16;

/// The largest packet the protocol allows (RFC 2865 section 3)
pub const MAX_PACKET_LEN: usize = 4096;

pub type Authenticator = [u8; AUTHENTICATOR_LEN];

/// The fixed header that starts every packet. This is the only part of a packet this layer
///  interprets: it is sufficient for framing and for correlating responses with requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PacketHeader {
    pub code: u8,
    pub id: u8,
    /// total length including the header
    pub length: u16,
    pub authenticator: Authenticator,
}

impl PacketHeader {
    pub const LENGTH_OFFSET: usize = 2;
    pub const AUTHENTICATOR_OFFSET: usize = 4;

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.code);
        buf.put_u8(self.id);
        buf.put_u16(self.length);
        buf.put_slice(&self.authenticator);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<PacketHeader> {
        if buf.remaining() < HEADER_LEN {
            bail!("incomplete packet header: {} bytes", buf.remaining());
        }

        let code = buf.get_u8();
        let id = buf.get_u8();
        let length = buf.get_u16();
        let mut authenticator = [0u8; AUTHENTICATOR_LEN];
        buf.copy_to_slice(&mut authenticator);

        Ok(PacketHeader {
            code,
            id,
            length,
            authenticator,
        })
    }

    /// Reads the declared total length from the start of a (possibly incomplete) packet, without
    ///  requiring the rest of the header to be present
    pub fn peek_length(data: &[u8]) -> Option<usize> {
        let raw = data.get(Self::LENGTH_OFFSET..Self::LENGTH_OFFSET + 2)?;
        Some(u16::from_be_bytes([raw[0], raw[1]]) as usize)
    }

    pub(crate) fn patch_id_and_length(wire: &mut [u8], id: u8) {
        let len = wire.len() as u16;
        wire[1] = id;
        wire[Self::LENGTH_OFFSET..Self::LENGTH_OFFSET + 2].copy_from_slice(&len.to_be_bytes());
    }

    pub(crate) fn authenticator_of(wire: &[u8]) -> Authenticator {
        let mut result = [0u8; AUTHENTICATOR_LEN];
        result.copy_from_slice(&wire[Self::AUTHENTICATOR_OFFSET..HEADER_LEN]);
        result
    }
}

/// A packet as seen by callers of the packet transport contract.
///
/// For an outgoing request, the caller sets `code` (and optionally `authenticator`), and
///  `write()` fills in `id` and `data`. Incoming packets are fully populated from the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    pub code: u8,
    pub id: u8,
    pub authenticator: Authenticator,
    /// the complete encoded packet, header included; empty until the packet was written or read
    pub data: Bytes,
    serial: Option<u64>,
}

impl Packet {
    /// A new request with a random request authenticator
    pub fn new(code: u8) -> Packet {
        Self::with_authenticator(code, rand::random())
    }

    pub fn with_authenticator(code: u8, authenticator: Authenticator) -> Packet {
        Packet {
            code,
            id: 0,
            authenticator,
            data: Bytes::new(),
            serial: None,
        }
    }

    pub(crate) fn from_wire(header: &PacketHeader, data: Bytes, serial: Option<u64>) -> Packet {
        Packet {
            code: header.code,
            id: header.id,
            authenticator: header.authenticator,
            data,
            serial,
        }
    }

    pub fn header(&self) -> PacketHeader {
        PacketHeader {
            code: self.code,
            id: self.id,
            length: self.data.len() as u16,
            authenticator: self.authenticator,
        }
    }

    /// The attribute part of the encoded packet
    pub fn attribute_data(&self) -> &[u8] {
        if self.data.len() < HEADER_LEN {
            &[]
        }
        else {
            &self.data[HEADER_LEN..]
        }
    }

    /// The channel-unique number a request was assigned when it was written. It identifies the
    ///  request even after its identifier was freed and reused.
    pub fn serial(&self) -> Option<u64> {
        self.serial
    }

    pub(crate) fn set_written(&mut self, id: u8, data: Bytes, serial: u64) {
        self.id = id;
        self.authenticator = PacketHeader::authenticator_of(&data);
        self.data = data;
        self.serial = Some(serial);
    }
}
