use std::cmp::min;
use std::collections::VecDeque;
use std::io;
use bytes::Bytes;
use crate::transport::{ByteTransport, Transfer, TransportKind};

/// An in-memory [ByteTransport] with scripted incoming data and recorded outgoing data.
///
/// For datagram transports, each chunk passed to [MemoryTransport::push_incoming] is one
///  datagram. For stream transports, a single read never crosses a chunk boundary, which allows
///  tests to control exactly how the byte stream is split up.
pub struct MemoryTransport {
    kind: TransportKind,
    incoming: VecDeque<Vec<u8>>,
    sent: Vec<Bytes>,
    closed: bool,
    read_error: Option<io::ErrorKind>,
    write_error: Option<io::ErrorKind>,
    write_budget: Option<usize>,
}

impl MemoryTransport {
    pub fn new(kind: TransportKind) -> MemoryTransport {
        MemoryTransport {
            kind,
            incoming: Default::default(),
            sent: Default::default(),
            closed: false,
            read_error: None,
            write_error: None,
            write_budget: None,
        }
    }

    pub fn datagram() -> MemoryTransport {
        Self::new(TransportKind::Datagram)
    }

    pub fn stream() -> MemoryTransport {
        Self::new(TransportKind::Stream)
    }

    pub fn push_incoming(&mut self, data: &[u8]) {
        self.incoming.push_back(data.to_vec());
    }

    /// returns everything written so far, clearing the internal buffer
    pub fn take_sent(&mut self) -> Vec<Bytes> {
        std::mem::take(&mut self.sent)
    }

    /// all bytes written so far as a single stream, clearing the internal buffer
    pub fn take_sent_stream(&mut self) -> Vec<u8> {
        self.take_sent().concat()
    }

    /// simulates EOF: reads return `Closed` once the scripted incoming data is consumed
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// the next read fails with an error of the given kind
    pub fn fail_next_read(&mut self, kind: io::ErrorKind) {
        self.read_error = Some(kind);
    }

    /// the next write fails with an error of the given kind
    pub fn fail_next_write(&mut self, kind: io::ErrorKind) {
        self.write_error = Some(kind);
    }

    /// Limits the number of bytes accepted by writes until the limit is changed again. `None`
    ///  means unlimited, `Some(0)` makes every write return `WouldBlock`.
    pub fn limit_writes(&mut self, budget: Option<usize>) {
        self.write_budget = budget;
    }
}

impl ByteTransport for MemoryTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<Transfer> {
        if let Some(kind) = self.read_error.take() {
            return Err(io::Error::from(kind));
        }

        let Some(chunk) = self.incoming.front_mut() else {
            return Ok(if self.closed { Transfer::Closed } else { Transfer::WouldBlock });
        };

        let n = min(buf.len(), chunk.len());
        buf[..n].copy_from_slice(&chunk[..n]);

        match self.kind {
            // the rest of a datagram that does not fit is lost, like with a real socket
            TransportKind::Datagram => {
                self.incoming.pop_front();
            }
            TransportKind::Stream => {
                chunk.drain(..n);
                if chunk.is_empty() {
                    self.incoming.pop_front();
                }
            }
        }
        Ok(Transfer::Done(n))
    }

    fn try_write(&mut self, buf: &[u8]) -> io::Result<Transfer> {
        if let Some(kind) = self.write_error.take() {
            return Err(io::Error::from(kind));
        }
        if self.closed {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }

        let n = match (self.kind, self.write_budget) {
            (_, None) => buf.len(),
            (TransportKind::Datagram, Some(budget)) => {
                if budget < buf.len() {
                    return Ok(Transfer::WouldBlock);
                }
                buf.len()
            }
            (TransportKind::Stream, Some(budget)) => min(budget, buf.len()),
        };
        if n == 0 && !buf.is_empty() {
            return Ok(Transfer::WouldBlock);
        }

        if let Some(budget) = &mut self.write_budget {
            *budget -= n;
        }
        self.sent.push(Bytes::copy_from_slice(&buf[..n]));
        Ok(Transfer::Done(n))
    }
}
