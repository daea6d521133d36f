use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use bytes::{Bytes, BytesMut};
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};
use crate::codec::AttributeCodec;
use crate::config::ClientConfig;
use crate::error::{FailureCause, PacketError};
use crate::frame::FrameAssembler;
use crate::id_table::IdTable;
use crate::integrity::{IntegrityCheck, NoIntegrityCheck};
use crate::packet::code::{request_codes_for_reply, CodeName};
use crate::packet::{Packet, PacketHeader, HEADER_LEN};
use crate::packet_bio::{FailureReason, PacketBio, ReadOutcome};
use crate::retry::{RetryDecision, RetryState};
use crate::transport::{ByteTransport, Transfer, TransportKind};

struct RequestEntry<Ctx> {
    ctx: Ctx,
    serial: u64,
    /// the request as written, including the encoded packet that is retransmitted
    request: Packet,
    retry: RetryState,
}

/// an encoded request waiting for the transport to accept it
struct QueuedFrame {
    serial: u64,
    data: Bytes,
}

/// The client side of a packet channel: it sends requests over a [ByteTransport] and
///  correlates responses with them.
///
/// A `ClientBio` is a plain state machine that never blocks and does not spawn anything. It is
///  driven from the outside:
/// * [PacketBio::write] and [PacketBio::read] when there is a request to send or the transport
///    is readable
/// * [ClientBio::fire_expired] when the time returned by [ClientBio::next_deadline] is reached
/// * [ClientBio::flush] when the transport becomes writable with output pending
///
/// Dropping the `ClientBio` cancels all outstanding requests.
pub struct ClientBio<T: ByteTransport, C: AttributeCodec, Ctx, I: IntegrityCheck = NoIntegrityCheck> {
    config: Arc<ClientConfig>,
    transport: T,
    codec: C,
    integrity: I,
    assembler: FrameAssembler,
    ids: IdTable<RequestEntry<Ctx>>,
    /// (deadline, serial) -> (code, identifier): one timer per outstanding request
    timers: BTreeMap<(Instant, u64), (u8, u8)>,
    completions: VecDeque<ReadOutcome<Ctx, C::Attributes>>,
    /// whole frames the transport did not accept yet, in sending order
    output: VecDeque<QueuedFrame>,
    /// stream transports only: the number of bytes of the front frame that were already written
    front_written: usize,
    next_serial: u64,
    failure: Option<FailureCause>,
}

impl<T: ByteTransport, C: AttributeCodec, Ctx, I: IntegrityCheck> ClientBio<T, C, Ctx, I> {
    pub fn new(config: Arc<ClientConfig>, transport: T, codec: C, integrity: I) -> anyhow::Result<ClientBio<T, C, Ctx, I>> {
        config.validate()?;

        let assembler = FrameAssembler::new(transport.kind(), config.max_packet_len);
        let ids = IdTable::new(config.randomize_initial_ids);
        Ok(ClientBio {
            config,
            transport,
            codec,
            integrity,
            assembler,
            ids,
            timers: Default::default(),
            completions: Default::default(),
            output: Default::default(),
            front_written: 0,
            next_serial: 0,
            failure: None,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// the number of requests that were written and did not complete yet
    pub fn outstanding(&self) -> usize {
        self.ids.len()
    }

    pub fn outstanding_for(&self, code: u8) -> usize {
        self.ids.num_used(code)
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    pub fn has_pending_output(&self) -> bool {
        !self.output.is_empty()
    }

    /// the number of queued bytes that were not written yet
    pub fn pending_output_len(&self) -> usize {
        self.output.iter()
            .map(|frame| frame.data.len())
            .sum::<usize>() - self.front_written
    }

    /// The earliest point in time at which [ClientBio::fire_expired] has something to do, or
    ///  `None` if there are no outstanding requests
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.first_key_value()
            .map(|(&(deadline, _), _)| deadline)
    }

    /// Handles all requests whose deadline is at or before `now`, retransmitting them or
    ///  queueing their terminal failure for [PacketBio::read]. Returns the number of requests
    ///  whose timer fired.
    pub fn fire_expired(&mut self, now: Instant) -> usize {
        let mut num_fired = 0;
        while let Some(timer) = self.timers.first_entry() {
            if timer.key().0 > now {
                break;
            }
            let ((_, serial), (code, id)) = timer.remove_entry();
            num_fired += 1;
            self.on_expiry(now, serial, code, id);
        }
        num_fired
    }

    fn on_expiry(&mut self, now: Instant, serial: u64, code: u8, id: u8) {
        let Some(entry) = self.ids.lookup_mut(code, id) else {
            trace!("timer for {:?}/{} fired after the request completed", CodeName(code), id);
            return;
        };
        if entry.serial != serial {
            trace!("timer for {:?}/{} fired for an earlier request with that identifier", CodeName(code), id);
            return;
        }

        match entry.retry.on_expiry(now) {
            RetryDecision::Retransmit => {
                let attempt = entry.retry.attempt();
                let wire = entry.request.data.clone();
                self.timers.insert((entry.retry.deadline(), serial), (code, id));

                if self.assembler.kind() == TransportKind::Stream && !self.config.retransmit_on_stream {
                    trace!("no response for {:?}/{}, counting attempt {} without sending on a stream", CodeName(code), id, attempt);
                    return;
                }
                if self.output.iter().any(|frame| frame.serial == serial) {
                    debug!("no response for {:?}/{}, attempt {}: still waiting to be sent", CodeName(code), id, attempt);
                    return;
                }
                if self.pending_output_len() + wire.len() > self.config.max_pending_output {
                    debug!("output queue is full, skipping retransmission #{} of {:?}/{}", attempt, CodeName(code), id);
                    return;
                }

                debug!("no response for {:?}/{}, sending attempt {}", CodeName(code), id, attempt);
                if let Err(cause) = self.transmit(serial, wire) {
                    self.fail_channel(cause);
                }
            }
            RetryDecision::Exhausted => {
                let entry = self.ids.free(code, id)
                    .expect("entry was looked up above");
                self.discard_queued(serial);
                let attempts = entry.retry.attempt();
                debug!("giving up on {:?}/{} after {} attempts", CodeName(code), id, attempts);
                self.completions.push_back(ReadOutcome::Failed {
                    ctx: entry.ctx,
                    request: entry.request,
                    reason: FailureReason::Exhausted { attempts },
                });
            }
        }
    }

    /// Sends output that is queued because the transport was not accepting writes.
    ///
    /// A transport failure here fails the channel: the failures of all outstanding requests
    ///  are then available through [PacketBio::read].
    pub fn flush(&mut self) -> Result<(), PacketError> {
        if let Some(cause) = &self.failure {
            return Err(PacketError::ChannelFailed(cause.clone()));
        }
        if let Err(cause) = self.flush_pending() {
            self.fail_channel(cause.clone());
            return Err(PacketError::ChannelFailed(cause));
        }
        Ok(())
    }

    fn transmit(&mut self, serial: u64, wire: Bytes) -> Result<(), FailureCause> {
        self.output.push_back(QueuedFrame { serial, data: wire });
        self.flush_pending()
    }

    fn flush_pending(&mut self) -> Result<(), FailureCause> {
        while let Some(front) = self.output.front() {
            let frame_len = front.data.len();
            let remaining = &front.data[self.front_written..];
            let remaining_len = remaining.len();

            match self.transport.try_write(remaining)? {
                Transfer::Done(0) | Transfer::WouldBlock => {
                    trace!("transport not accepting writes, {} frames pending", self.output.len());
                    break;
                }
                Transfer::Done(n) => match self.assembler.kind() {
                    TransportKind::Datagram => {
                        if n < remaining_len {
                            warn!("transport accepted only {} of {} bytes of a datagram", n, remaining_len);
                        }
                        else {
                            trace!("sent datagram of {} bytes", n);
                        }
                        self.output.pop_front();
                    }
                    TransportKind::Stream => {
                        trace!("wrote {} bytes to stream", n);
                        self.front_written += n;
                        if self.front_written >= frame_len {
                            self.output.pop_front();
                            self.front_written = 0;
                        }
                    }
                },
                Transfer::Closed => return Err(FailureCause::Closed),
            }
        }
        Ok(())
    }

    /// Removes a request's frame from the output queue unless the transport already accepted
    ///  part of it: a partially written frame must be completed to keep the stream in sync.
    fn discard_queued(&mut self, serial: u64) {
        let Some(idx) = self.output.iter().position(|frame| frame.serial == serial) else {
            return;
        };
        if idx == 0 && self.front_written > 0 {
            trace!("request is partially written, sending the rest of it");
            return;
        }
        self.output.remove(idx);
        trace!("discarded queued frame of request #{}", serial);
    }

    /// Marks the channel as unusable. All outstanding requests fail, their completions are
    ///  queued for `read`, and all further writes are refused.
    pub fn fail_channel(&mut self, cause: FailureCause) {
        if self.failure.is_some() {
            return;
        }

        match &cause {
            FailureCause::Closed => warn!("transport closed, failing {} outstanding requests", self.ids.len()),
            FailureCause::Io { .. } => error!("{}, failing {} outstanding requests", cause, self.ids.len()),
        }

        self.timers.clear();
        self.output.clear();
        self.front_written = 0;
        for (_, _, entry) in self.ids.drain() {
            self.completions.push_back(ReadOutcome::Failed {
                ctx: entry.ctx,
                request: entry.request,
                reason: FailureReason::ChannelFailed(cause.clone()),
            });
        }
        self.failure = Some(cause);
    }

    /// Correlates a received frame with an outstanding request, completing the request if it
    ///  matches. Anything that does not match is dropped.
    fn process_frame(&mut self, frame: Bytes) -> Option<ReadOutcome<Ctx, C::Attributes>> {
        let header = match PacketHeader::deser(&mut &frame[..]) {
            Ok(header) => header,
            Err(e) => {
                debug!("dropping frame: {}", e);
                return None;
            }
        };
        trace!("received {:?}/{} with {} bytes", CodeName(header.code), header.id, frame.len());

        let mut matched = None;
        for request_code in request_codes_for_reply(header.code) {
            let Some(entry) = self.ids.lookup(request_code, header.id) else { continue };
            if self.integrity.verify_response(&entry.request.data, &frame) {
                matched = Some(request_code);
                break;
            }
            warn!("response {:?}/{} failed the integrity check against request {:?}/{} - dropping it", CodeName(header.code), header.id, CodeName(request_code), header.id);
        }
        let Some(request_code) = matched else {
            debug!("no outstanding request for response {:?}/{} - dropping it", CodeName(header.code), header.id);
            return None;
        };

        let attributes = match self.codec.decode(&header, &frame[HEADER_LEN..]) {
            Ok(attributes) => attributes,
            Err(e) => {
                debug!("dropping response {:?}/{} with malformed attributes: {:#}", CodeName(header.code), header.id, e);
                return None;
            }
        };

        let entry = self.ids.free(request_code, header.id)
            .expect("entry was looked up above");
        self.timers.remove(&(entry.retry.deadline(), entry.serial));
        self.discard_queued(entry.serial);
        trace!("{:?}/{} completed after {} attempts", CodeName(request_code), header.id, entry.retry.attempt());

        Some(ReadOutcome::Response {
            ctx: entry.ctx,
            request: entry.request,
            response: Packet::from_wire(&header, frame, None),
            attributes,
        })
    }
}

impl<T: ByteTransport, C: AttributeCodec, Ctx, I: IntegrityCheck> PacketBio for ClientBio<T, C, Ctx, I> {
    type Ctx = Ctx;
    type Attributes = C::Attributes;

    fn read(&mut self) -> Result<Option<ReadOutcome<Ctx, C::Attributes>>, PacketError> {
        loop {
            if let Some(outcome) = self.completions.pop_front() {
                return Ok(Some(outcome));
            }
            if let Some(cause) = &self.failure {
                return Err(PacketError::ChannelFailed(cause.clone()));
            }

            while let Some(frame) = self.assembler.next_frame() {
                match frame {
                    Ok(frame) => {
                        if let Some(outcome) = self.process_frame(frame) {
                            return Ok(Some(outcome));
                        }
                    }
                    Err(e) => debug!("dropping received data: {}", e),
                }
            }

            match self.assembler.read_from(&mut self.transport) {
                Ok(Transfer::Done(_)) => {}
                Ok(Transfer::WouldBlock) => return Ok(None),
                Ok(Transfer::Closed) => self.fail_channel(FailureCause::Closed),
                Err(e) => self.fail_channel(e.into()),
            }
        }
    }

    fn write(&mut self, ctx: Ctx, packet: &mut Packet, attributes: &C::Attributes) -> Result<(), PacketError> {
        if let Some(cause) = &self.failure {
            return Err(PacketError::ChannelFailed(cause.clone()));
        }
        let code = packet.code;
        let Some(policy) = self.config.retry_policy(code).cloned() else {
            return Err(PacketError::NoRetryPolicy { code });
        };

        let mut buf = BytesMut::with_capacity(HEADER_LEN);
        PacketHeader {
            code,
            id: 0,
            length: 0,
            authenticator: packet.authenticator,
        }.ser(&mut buf);
        self.codec.encode(attributes, &mut buf)
            .map_err(PacketError::Encode)?;

        if buf.len() > self.config.max_packet_len {
            return Err(PacketError::PacketTooLarge { len: buf.len(), max: self.config.max_packet_len });
        }
        let pending = self.pending_output_len();
        if pending + buf.len() > self.config.max_pending_output {
            return Err(PacketError::OutputBlocked { pending });
        }

        let id = self.ids.allocate(code)
            .map_err(|_| PacketError::Busy { code })?;
        PacketHeader::patch_id_and_length(&mut buf, id);
        self.integrity.sign_request(&mut buf)
            .map_err(PacketError::Encode)?;

        let wire = buf.freeze();
        let serial = self.next_serial;
        self.next_serial += 1;
        packet.set_written(id, wire.clone(), serial);

        trace!("sending {:?}/{} with {} bytes", CodeName(code), id, wire.len());
        if let Err(cause) = self.transmit(serial, wire) {
            self.fail_channel(cause.clone());
            return Err(PacketError::ChannelFailed(cause));
        }

        let retry = RetryState::start(policy, Instant::now());
        self.timers.insert((retry.deadline(), serial), (code, id));
        self.ids.bind(code, id, RequestEntry {
            ctx,
            serial,
            request: packet.clone(),
            retry,
        });
        Ok(())
    }

    fn release(&mut self, _ctx: &Ctx, packet: &Packet) -> Result<(), PacketError> {
        let Some(serial) = packet.serial() else {
            return Ok(());
        };
        let is_outstanding = self.ids.lookup(packet.code, packet.id)
            .map(|entry| entry.serial == serial)
            .unwrap_or(false);
        if !is_outstanding {
            trace!("releasing {:?}/{} which is not outstanding", CodeName(packet.code), packet.id);
            return Ok(());
        }

        let entry = self.ids.free(packet.code, packet.id)
            .expect("entry was looked up above");
        self.timers.remove(&(entry.retry.deadline(), serial));
        self.discard_queued(serial);
        debug!("released {:?}/{}", CodeName(packet.code), packet.id);
        Ok(())
    }
}
