#[cfg(test)] use mockall::automock;

/// This is the seam for the protocol's integrity algorithm (request / response authenticators,
///  message authenticators etc.). The packet layer treats the authenticator field as opaque: it
///  lets an [IntegrityCheck] sign outgoing requests and verify a response against the request it
///  appears to answer before accepting the match.
#[cfg_attr(test, automock)]
pub trait IntegrityCheck {
    /// Called with a fully encoded request (identifier and length already in place) before its
    ///  first transmission. Implementations may rewrite the authenticator field or attributes
    ///  in place, but not change the length.
    fn sign_request(&self, wire: &mut [u8]) -> anyhow::Result<()>;

    /// `true` if `response` is a legitimate response to `request`, both given as complete
    ///  encoded packets. A `false` result causes the response to be dropped.
    fn verify_response(&self, request: &[u8], response: &[u8]) -> bool;
}

/// Leaves requests as they are and accepts every response whose code and identifier match
#[derive(Debug, Clone, Copy, Default)]
pub struct NoIntegrityCheck;
impl IntegrityCheck for NoIntegrityCheck {
    fn sign_request(&self, _wire: &mut [u8]) -> anyhow::Result<()> {
        Ok(())
    }

    fn verify_response(&self, _request: &[u8], _response: &[u8]) -> bool {
        true
    }
}
