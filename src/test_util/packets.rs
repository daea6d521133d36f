use bytes::{BufMut, BytesMut};
use crate::packet::{Authenticator, PacketHeader, HEADER_LEN};

/// an encoded packet with a zero authenticator and the given attribute bytes
pub fn frame_bytes(code: u8, id: u8, attributes: &[u8]) -> Vec<u8> {
    frame_bytes_with_authenticator(code, id, [0; 16], attributes)
}

pub fn frame_bytes_with_authenticator(code: u8, id: u8, authenticator: Authenticator, attributes: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    PacketHeader {
        code,
        id,
        length: (HEADER_LEN + attributes.len()) as u16,
        authenticator,
    }.ser(&mut buf);
    buf.put_slice(attributes);
    buf.to_vec()
}

/// A packet whose length field says `declared_len`, followed by `num_attribute_bytes` zero bytes
///  regardless of what the length field claims - for testing framing of inconsistent input
pub fn frame_with_declared_len(code: u8, id: u8, declared_len: u16, num_attribute_bytes: usize) -> Vec<u8> {
    let mut buf = BytesMut::new();
    PacketHeader {
        code,
        id,
        length: declared_len,
        authenticator: [0; 16],
    }.ser(&mut buf);
    buf.put_bytes(0, num_attribute_bytes);
    buf.to_vec()
}

/// A reply to an encoded request, carrying the request's authenticator. This is what
///  [EchoAuthenticatorCheck](crate::test_util::echo_check::EchoAuthenticatorCheck) expects.
pub fn reply_to(request_wire: &[u8], reply_code: u8, attributes: &[u8]) -> Vec<u8> {
    let header = PacketHeader::deser(&mut &request_wire[..])
        .expect("test code should pass a valid request");
    frame_bytes_with_authenticator(reply_code, header.id, header.authenticator, attributes)
}
