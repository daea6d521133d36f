//! Packet boundary detection on top of a [ByteTransport].
//!
//! For datagram transports, every read yields at most one packet, and a datagram is never
//!  combined with data from another one. For stream transports, bytes are accumulated until the
//!  length declared in the header is available.
//!
//! Malformed input is reported as a [FrameError] and discarded; the assembler itself always
//!  remains usable.

use std::cmp::min;
use std::io;
use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;
use tracing::{debug, trace};
use crate::packet::{PacketHeader, HEADER_LEN};
use crate::transport::{ByteTransport, Transfer, TransportKind};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("datagram of {len} bytes is shorter than the packet header")]
    TooShort { len: usize },
    #[error("declared length {declared} is shorter than the packet header")]
    BadLength { declared: usize },
    #[error("declared length {declared} exceeds {received} received bytes")]
    LengthMismatch { declared: usize, received: usize },
    #[error("declared length {declared} exceeds the maximum packet size {max}")]
    Oversized { declared: usize, max: usize },
}

pub struct FrameAssembler {
    kind: TransportKind,
    max_packet_len: usize,
    /// stream: accumulated bytes starting at a packet boundary. datagram: the most recently
    ///  received, not yet extracted datagram
    buf: BytesMut,
    has_datagram: bool,
    /// stream: number of bytes of a rejected frame that are still to be discarded as they arrive
    skip: usize,
}

impl FrameAssembler {
    pub fn new(kind: TransportKind, max_packet_len: usize) -> FrameAssembler {
        FrameAssembler {
            kind,
            max_packet_len,
            buf: BytesMut::with_capacity(max_packet_len),
            has_datagram: false,
            skip: 0,
        }
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// number of bytes held that were not yet extracted as a frame
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    /// Performs a single read from the transport into the assembler's buffer. The caller is
    ///  expected to extract all available frames with [FrameAssembler::next_frame] before reading
    ///  again.
    pub fn read_from(&mut self, transport: &mut impl ByteTransport) -> io::Result<Transfer> {
        match self.kind {
            TransportKind::Datagram => self.read_datagram(transport),
            TransportKind::Stream => self.read_stream(transport),
        }
    }

    fn read_datagram(&mut self, transport: &mut impl ByteTransport) -> io::Result<Transfer> {
        if self.has_datagram {
            debug!("discarding unprocessed datagram of {} bytes", self.buf.len());
        }

        self.buf.clear();
        self.buf.resize(self.max_packet_len, 0);
        let result = transport.try_read(&mut self.buf);

        match result {
            Ok(Transfer::Done(n)) => {
                trace!("received datagram of {} bytes", n);
                self.buf.truncate(n);
                self.has_datagram = true;
            }
            _ => {
                self.buf.clear();
                self.has_datagram = false;
            }
        }
        result
    }

    fn read_stream(&mut self, transport: &mut impl ByteTransport) -> io::Result<Transfer> {
        let start = self.buf.len();
        debug_assert!(start < self.max_packet_len, "stream buffer full without a complete frame");

        self.buf.resize(self.max_packet_len, 0);
        let result = transport.try_read(&mut self.buf[start..]);

        let num_read = match result {
            Ok(Transfer::Done(n)) => n,
            _ => 0,
        };
        self.buf.truncate(start + num_read);
        if num_read > 0 {
            trace!("received {} bytes from stream, {} bytes buffered", num_read, self.buf.len());
        }
        self.discard_skipped();
        result
    }

    fn discard_skipped(&mut self) {
        if self.skip == 0 {
            return;
        }
        let n = min(self.skip, self.buf.len());
        self.buf.advance(n);
        self.skip -= n;
        if self.skip == 0 {
            debug!("finished discarding rejected frame, resynchronized");
        }
    }

    /// Extracts the next complete frame from data that was already read, if there is one.
    ///
    /// A `Some(Err(..))` result means that data was discarded. Callers should log it and keep
    ///  calling this function, since there may be more data after the discarded part.
    pub fn next_frame(&mut self) -> Option<Result<Bytes, FrameError>> {
        match self.kind {
            TransportKind::Datagram => self.next_datagram_frame(),
            TransportKind::Stream => self.next_stream_frame(),
        }
    }

    fn next_datagram_frame(&mut self) -> Option<Result<Bytes, FrameError>> {
        if !self.has_datagram {
            return None;
        }
        self.has_datagram = false;

        let mut datagram = self.buf.split();
        let received = datagram.len();

        if received < HEADER_LEN {
            return Some(Err(FrameError::TooShort { len: received }));
        }

        let declared = PacketHeader::peek_length(&datagram)
            .expect("length is part of the header");
        if let Err(e) = self.check_declared_length(declared) {
            return Some(Err(e));
        }
        if declared > received {
            return Some(Err(FrameError::LengthMismatch { declared, received }));
        }

        if declared < received {
            // RFC 2865: octets beyond the declared length are padding
            trace!("ignoring {} bytes of padding after datagram", received - declared);
            datagram.truncate(declared);
        }
        Some(Ok(datagram.freeze()))
    }

    fn next_stream_frame(&mut self) -> Option<Result<Bytes, FrameError>> {
        self.discard_skipped();

        let declared = PacketHeader::peek_length(&self.buf)?;
        if self.buf.len() < HEADER_LEN {
            return None;
        }

        match self.check_declared_length(declared) {
            Ok(()) => {}
            Err(e @ FrameError::Oversized { .. }) => {
                // the length field is plausible, so skipping it keeps us in sync with the stream
                self.skip = declared;
                self.discard_skipped();
                return Some(Err(e));
            }
            Err(e) => {
                // there is no way to find the next packet boundary
                self.buf.clear();
                return Some(Err(e));
            }
        }

        if self.buf.len() < declared {
            return None;
        }
        Some(Ok(self.buf.split_to(declared).freeze()))
    }

    fn check_declared_length(&self, declared: usize) -> Result<(), FrameError> {
        if declared < HEADER_LEN {
            return Err(FrameError::BadLength { declared });
        }
        if declared > self.max_packet_len {
            return Err(FrameError::Oversized { declared, max: self.max_packet_len });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use crate::packet::MAX_PACKET_LEN;
    use crate::test_util::memory_transport::MemoryTransport;
    use crate::test_util::packets::{frame_bytes, frame_with_declared_len};
    use super::*;

    fn drain(assembler: &mut FrameAssembler) -> Vec<Result<Bytes, FrameError>> {
        let mut result = Vec::new();
        while let Some(f) = assembler.next_frame() {
            result.push(f);
        }
        result
    }

    #[test]
    fn test_datagram_complete() {
        let packet = frame_bytes(2, 7, &[1, 3, 9]);
        let mut transport = MemoryTransport::datagram();
        transport.push_incoming(&packet);

        let mut assembler = FrameAssembler::new(TransportKind::Datagram, MAX_PACKET_LEN);
        assert_eq!(assembler.read_from(&mut transport).unwrap(), Transfer::Done(23));
        assert_eq!(drain(&mut assembler), vec![Ok(Bytes::from(packet))]);

        assert_eq!(assembler.read_from(&mut transport).unwrap(), Transfer::WouldBlock);
        assert!(drain(&mut assembler).is_empty());
    }

    #[rstest]
    #[case::empty(vec![], FrameError::TooShort { len: 0 })]
    #[case::three_bytes(vec![2, 1, 0], FrameError::TooShort { len: 3 })]
    #[case::header_minus_one(vec![0; 19], FrameError::TooShort { len: 19 })]
    #[case::length_below_header(frame_with_declared_len(2, 1, 19, 0), FrameError::BadLength { declared: 19 })]
    #[case::length_exceeds_received(frame_with_declared_len(2, 1, 30, 5), FrameError::LengthMismatch { declared: 30, received: 25 })]
    #[case::oversized(frame_with_declared_len(2, 1, 5000, 5), FrameError::Oversized { declared: 5000, max: MAX_PACKET_LEN })]
    fn test_datagram_malformed(#[case] datagram: Vec<u8>, #[case] expected: FrameError) {
        let mut transport = MemoryTransport::datagram();
        transport.push_incoming(&datagram);
        let good = frame_bytes(2, 8, &[]);
        transport.push_incoming(&good);

        let mut assembler = FrameAssembler::new(TransportKind::Datagram, MAX_PACKET_LEN);
        assembler.read_from(&mut transport).unwrap();
        assert_eq!(drain(&mut assembler), vec![Err(expected)]);

        // the assembler stays usable
        assembler.read_from(&mut transport).unwrap();
        assert_eq!(drain(&mut assembler), vec![Ok(Bytes::from(good))]);
    }

    #[test]
    fn test_datagram_padding_is_trimmed() {
        let packet = frame_bytes(5, 3, &[1, 2, 0]);
        let mut padded = packet.clone();
        padded.extend_from_slice(&[0, 0, 0, 0]);

        let mut transport = MemoryTransport::datagram();
        transport.push_incoming(&padded);

        let mut assembler = FrameAssembler::new(TransportKind::Datagram, MAX_PACKET_LEN);
        assembler.read_from(&mut transport).unwrap();
        assert_eq!(drain(&mut assembler), vec![Ok(Bytes::from(packet))]);
    }

    #[rstest]
    #[case::single_chunk(vec![71])]
    #[case::chunk_per_frame(vec![23, 20, 28])]
    #[case::byte_by_byte(vec![1; 71])]
    #[case::split_header(vec![3, 30, 38])]
    #[case::split_inside_frames(vec![30, 41])]
    fn test_stream_reassembly(#[case] chunk_sizes: Vec<usize>) {
        let f1 = frame_bytes(2, 1, &[1, 3, 7]);
        let f2 = frame_bytes(3, 2, &[]);
        let f3 = frame_bytes(11, 3, &[18, 8, 1, 2, 3, 4, 5, 6]);
        let all: Vec<u8> = [f1.clone(), f2.clone(), f3.clone()].concat();

        let mut transport = MemoryTransport::stream();
        let mut offs = 0;
        for size in chunk_sizes {
            let end = min(offs + size, all.len());
            transport.push_incoming(&all[offs..end]);
            offs = end;
        }
        assert_eq!(offs, all.len());

        let mut assembler = FrameAssembler::new(TransportKind::Stream, MAX_PACKET_LEN);
        let mut frames = Vec::new();
        while assembler.read_from(&mut transport).unwrap() != Transfer::WouldBlock {
            frames.extend(drain(&mut assembler));
        }

        assert_eq!(frames, vec![Ok(Bytes::from(f1)), Ok(Bytes::from(f2)), Ok(Bytes::from(f3))]);
        assert_eq!(assembler.buffered_len(), 0);
    }

    #[test]
    fn test_stream_partial_frame_is_retained() {
        let f1 = frame_bytes(2, 1, &[1, 3, 7]);

        let mut transport = MemoryTransport::stream();
        transport.push_incoming(&f1[..21]);

        let mut assembler = FrameAssembler::new(TransportKind::Stream, MAX_PACKET_LEN);
        assembler.read_from(&mut transport).unwrap();
        assert!(drain(&mut assembler).is_empty());
        assert_eq!(assembler.buffered_len(), 21);

        transport.push_incoming(&f1[21..]);
        assembler.read_from(&mut transport).unwrap();
        assert_eq!(drain(&mut assembler), vec![Ok(Bytes::from(f1))]);
    }

    #[test]
    fn test_stream_oversized_frame_is_skipped() {
        let oversized = frame_with_declared_len(2, 1, 300, 280);
        let good = frame_bytes(2, 2, &[]);

        let mut transport = MemoryTransport::stream();
        transport.push_incoming(&oversized[..100]);
        transport.push_incoming(&oversized[100..]);
        transport.push_incoming(&good);

        let mut assembler = FrameAssembler::new(TransportKind::Stream, 256);
        let mut frames = Vec::new();
        while assembler.read_from(&mut transport).unwrap() != Transfer::WouldBlock {
            frames.extend(drain(&mut assembler));
        }

        assert_eq!(frames, vec![
            Err(FrameError::Oversized { declared: 300, max: 256 }),
            Ok(Bytes::from(good)),
        ]);
    }

    #[test]
    fn test_stream_bad_length_discards_buffer() {
        let bad = frame_with_declared_len(2, 1, 4, 10);

        let mut transport = MemoryTransport::stream();
        transport.push_incoming(&bad);

        let mut assembler = FrameAssembler::new(TransportKind::Stream, MAX_PACKET_LEN);
        assembler.read_from(&mut transport).unwrap();
        assert_eq!(drain(&mut assembler), vec![Err(FrameError::BadLength { declared: 4 })]);
        assert_eq!(assembler.buffered_len(), 0);
    }

    #[test]
    fn test_stream_closed() {
        let mut transport = MemoryTransport::stream();
        transport.close();

        let mut assembler = FrameAssembler::new(TransportKind::Stream, MAX_PACKET_LEN);
        assert_eq!(assembler.read_from(&mut transport).unwrap(), Transfer::Closed);
    }
}
