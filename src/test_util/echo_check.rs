use crate::integrity::IntegrityCheck;
use crate::packet::{HEADER_LEN, PacketHeader};

/// An [IntegrityCheck] for tests: a response is accepted only if it carries the request's
///  authenticator unchanged, see [reply_to](crate::test_util::packets::reply_to)
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoAuthenticatorCheck;
impl IntegrityCheck for EchoAuthenticatorCheck {
    fn sign_request(&self, _wire: &mut [u8]) -> anyhow::Result<()> {
        Ok(())
    }

    fn verify_response(&self, request: &[u8], response: &[u8]) -> bool {
        if request.len() < HEADER_LEN || response.len() < HEADER_LEN {
            return false;
        }
        PacketHeader::authenticator_of(request) == PacketHeader::authenticator_of(response)
    }
}
