use crate::error::{FailureCause, PacketError};
use crate::packet::Packet;

/// Why a request completed without a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// the retry policy gave up after this many transmissions
    Exhausted { attempts: u32 },
    /// the channel failed while the request was outstanding
    ChannelFailed(FailureCause),
}

/// The completion of a request, as returned by [PacketBio::read]. Every request that was written
///  and not released completes exactly once.
#[derive(Debug)]
pub enum ReadOutcome<Ctx, A> {
    Response {
        ctx: Ctx,
        request: Packet,
        response: Packet,
        attributes: A,
    },
    Failed {
        ctx: Ctx,
        request: Packet,
        reason: FailureReason,
    },
}

impl<Ctx, A> ReadOutcome<Ctx, A> {
    pub fn ctx(&self) -> &Ctx {
        match self {
            ReadOutcome::Response { ctx, .. } => ctx,
            ReadOutcome::Failed { ctx, .. } => ctx,
        }
    }

    pub fn request(&self) -> &Packet {
        match self {
            ReadOutcome::Response { request, .. } => request,
            ReadOutcome::Failed { request, .. } => request,
        }
    }

    pub fn is_response(&self) -> bool {
        matches!(self, ReadOutcome::Response { .. })
    }
}

/// The packet transport contract: a uniform, non-blocking way of exchanging packets over any
///  packet source.
///
/// `Ctx` is the caller's correlation token for a request. It is stored with the request and
///  handed back with its completion, and never looked at otherwise.
pub trait PacketBio {
    type Ctx;
    type Attributes;

    /// Returns the next completed request, or `None` if nothing is available right now. This
    ///  never blocks.
    fn read(&mut self) -> Result<Option<ReadOutcome<Self::Ctx, Self::Attributes>>, PacketError>;

    /// Encodes and sends a request, assigning its identifier. The identifier and the encoded
    ///  packet are written back to `packet`. Completion is reported by a later
    ///  [read](PacketBio::read).
    fn write(&mut self, ctx: Self::Ctx, packet: &mut Packet, attributes: &Self::Attributes) -> Result<(), PacketError>;

    /// Cancels an outstanding request: it is forgotten without a completion being reported.
    ///  Releasing a request that already completed or was released before does nothing.
    ///
    /// The default implementation is for packet sources that have nothing to cancel.
    fn release(&mut self, _ctx: &Self::Ctx, _packet: &Packet) -> Result<(), PacketError> {
        Ok(())
    }
}
