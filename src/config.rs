use std::time::Duration;
use anyhow::{bail, Context};
use rustc_hash::FxHashMap;
use crate::packet::code::{CodeName, PacketCode};
use crate::packet::{HEADER_LEN, MAX_PACKET_LEN};
use crate::retry::RetryPolicy;

/// Configuration of a client channel. It is fixed when the channel is created and shared
///  read-only afterwards.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// The largest packet that is sent or accepted. The protocol limit is 4096 bytes, and there
    ///  should rarely be a reason to change this except for testing or for peers with larger
    ///  extensions.
    pub max_packet_len: usize,

    /// Retry policies by request code. Writing a packet with a code that has no policy here is
    ///  rejected: there is no default, since request codes differ widely in how they should
    ///  be retried (accounting vs. status probes, for example).
    pub retry_policies: FxHashMap<u8, RetryPolicy>,

    /// Start allocating identifiers at a random position for each code rather than at 0, which
    ///  makes identifiers harder to predict for an off-path attacker
    pub randomize_initial_ids: bool,

    /// The number of bytes that may be queued while the transport is not accepting writes.
    ///  Writes beyond this are refused with a transient error.
    pub max_pending_output: usize,

    /// RFC 6613 forbids retransmission on a stream connection since the stream itself is
    ///  reliable: on a stream, expiry of a request's timer normally only counts the attempt.
    ///  Setting this sends the request again anyway, e.g. for peers that drop requests under
    ///  load.
    pub retransmit_on_stream: bool,
}

impl ClientConfig {
    /// A configuration without any retry policies - policies for the codes that are actually
    ///  used must be added
    pub fn new() -> ClientConfig {
        ClientConfig {
            max_packet_len: MAX_PACKET_LEN,
            retry_policies: FxHashMap::default(),
            randomize_initial_ids: true,
            max_pending_output: 64*1024,
            retransmit_on_stream: false,
        }
    }

    /// Policies for all request codes, with timing as recommended by RFC 5080 section 2.2.1:
    ///  starting at 2 seconds, doubling up to 16 seconds, giving up after 5 transmissions or
    ///  30 seconds.
    pub fn default_radius() -> ClientConfig {
        let mut result = Self::new();
        for code in [PacketCode::AccessRequest, PacketCode::AccountingRequest, PacketCode::DisconnectRequest, PacketCode::CoaRequest] {
            result.retry_policies.insert(code.into(), RetryPolicy::exponential(
                Duration::from_secs(2),
                Duration::from_secs(16),
                5,
                Duration::from_secs(30),
            ));
        }

        // Status-Server is a liveness probe: retrying it for long defeats its purpose
        result.retry_policies.insert(PacketCode::StatusServer.into(), RetryPolicy::fixed(Duration::from_secs(5), 1));
        result
    }

    pub fn with_retry_policy(mut self, code: u8, policy: RetryPolicy) -> ClientConfig {
        self.retry_policies.insert(code, policy);
        self
    }

    pub fn retry_policy(&self, code: u8) -> Option<&RetryPolicy> {
        self.retry_policies.get(&code)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_packet_len < HEADER_LEN {
            bail!("max_packet_len {} is shorter than the packet header", self.max_packet_len);
        }
        if self.max_packet_len > u16::MAX as usize {
            bail!("max_packet_len {} can not be represented in the length field", self.max_packet_len);
        }
        if self.max_pending_output < self.max_packet_len {
            bail!("max_pending_output {} must hold at least one packet of {} bytes", self.max_pending_output, self.max_packet_len);
        }

        for (&code, policy) in &self.retry_policies {
            policy.validate()
                .with_context(|| format!("retry policy for code {:?}", CodeName(code)))?;
        }
        Ok(())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use super::*;

    #[test]
    fn test_default_radius() {
        let config = ClientConfig::default_radius();
        config.validate().unwrap();

        for code in [1, 4, 12, 40, 43] {
            assert!(config.retry_policy(code).is_some(), "code {}", code);
        }
        assert!(config.retry_policy(2).is_none());
        assert_eq!(config.retry_policy(12).unwrap().max_attempts, 1);
    }

    #[test]
    fn test_with_retry_policy() {
        let config = ClientConfig::new()
            .with_retry_policy(4, RetryPolicy::fixed(Duration::from_secs(1), 3));
        assert_eq!(config.retry_policy(4).unwrap().max_attempts, 3);
        assert!(config.retry_policy(1).is_none());
    }

    #[rstest]
    #[case::default(|_: &mut ClientConfig| {}, true)]
    #[case::header_only(|c: &mut ClientConfig| c.max_packet_len = 20, true)]
    #[case::too_short(|c: &mut ClientConfig| c.max_packet_len = 19, false)]
    #[case::too_long(|c: &mut ClientConfig| { c.max_packet_len = 70_000; c.max_pending_output = 100_000; }, false)]
    #[case::pending_output_too_small(|c: &mut ClientConfig| c.max_pending_output = 1000, false)]
    #[case::invalid_policy(|c: &mut ClientConfig| { c.retry_policies.insert(1, RetryPolicy::fixed(Duration::from_secs(1), 0)); }, false)]
    #[case::unbounded_timeout(|c: &mut ClientConfig| { c.retry_policies.insert(1, RetryPolicy::fixed(Duration::MAX, 3)); }, false)]
    fn test_validate(#[case] modify: fn(&mut ClientConfig), #[case] valid: bool) {
        let mut config = ClientConfig::default_radius();
        modify(&mut config);
        assert_eq!(config.validate().is_ok(), valid);
    }
}
