use std::fmt::{Debug, Formatter};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// The packet codes this layer knows by name. Codes are carried as plain `u8` everywhere else
///  since the identifier space and retry configuration are generic over the code.
#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum PacketCode {
    AccessRequest = 1,
    AccessAccept = 2,
    AccessReject = 3,
    AccountingRequest = 4,
    AccountingResponse = 5,
    AccessChallenge = 11,
    StatusServer = 12,
    StatusClient = 13,
    DisconnectRequest = 40,
    DisconnectAck = 41,
    DisconnectNak = 42,
    CoaRequest = 43,
    CoaAck = 44,
    CoaNak = 45,
    ProtocolError = 52,
}

const REQUEST_CODES: [PacketCode; 5] = [
    PacketCode::AccessRequest,
    PacketCode::AccountingRequest,
    PacketCode::StatusServer,
    PacketCode::DisconnectRequest,
    PacketCode::CoaRequest,
];

impl PacketCode {
    /// The reply codes a server may legitimately answer a request of this code with. Empty for
    ///  codes that are not requests.
    pub fn allowed_replies(self) -> &'static [PacketCode] {
        use PacketCode::*;

        match self {
            AccessRequest => &[AccessAccept, AccessReject, AccessChallenge, ProtocolError],
            AccountingRequest => &[AccountingResponse, ProtocolError],
            StatusServer => &[AccessAccept, AccessReject, AccountingResponse],
            DisconnectRequest => &[DisconnectAck, DisconnectNak, ProtocolError],
            CoaRequest => &[CoaAck, CoaNak, ProtocolError],
            _ => &[],
        }
    }
}

/// Maps the code of an incoming reply to the request codes whose identifier spaces may hold the
///  request it answers. A code that is not a known reply maps to itself, which keeps the
///  layer usable for peers that echo the request code.
pub fn request_codes_for_reply(reply_code: u8) -> Vec<u8> {
    let result: Vec<u8> = match PacketCode::try_from(reply_code) {
        Ok(reply) => REQUEST_CODES.iter()
            .filter(|request| request.allowed_replies().contains(&reply))
            .map(|&request| request.into())
            .collect(),
        Err(_) => Vec::new(),
    };

    if result.is_empty() {
        vec![reply_code]
    }
    else {
        result
    }
}

/// Formats a raw code with its name where known - for logging
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CodeName(pub u8);
impl Debug for CodeName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match PacketCode::try_from(self.0) {
            Ok(code) => write!(f, "{:?}({})", code, self.0),
            Err(_) => write!(f, "{}", self.0),
        }
    }
}
