use std::io;
use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use tokio::net::{TcpStream, UdpSocket};
use tracing::{debug, trace};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportKind {
    /// every read returns at most one complete datagram, message boundaries are preserved
    Datagram,
    /// reads return arbitrary chunks of a byte stream
    Stream,
}

/// The result of a single non-blocking transfer attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transfer {
    Done(usize),
    WouldBlock,
    /// the peer closed the connection (EOF on a stream)
    Closed,
}

/// This is the abstraction for the raw, non-blocking byte transport underneath a packet channel,
///  introduced to decouple packet handling from sockets and to facilitate mocking the I/O part
///  away for testing.
///
/// Implementations must never block: if no data is available or the socket buffer is full,
///  they return [Transfer::WouldBlock].
#[cfg_attr(test, automock)]
pub trait ByteTransport {
    fn kind(&self) -> TransportKind;

    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<Transfer>;

    fn try_write(&mut self, buf: &[u8]) -> io::Result<Transfer>;
}

/// Async readiness notification for transports that are driven by tokio
#[async_trait]
pub trait Readiness: Sync {
    async fn readable(&self) -> io::Result<()>;

    async fn writable(&self) -> io::Result<()>;
}

fn would_block_to_transfer(result: io::Result<usize>) -> io::Result<Transfer> {
    match result {
        Ok(n) => Ok(Transfer::Done(n)),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(Transfer::WouldBlock),
        Err(e) => Err(e),
    }
}

/// A *connected* UDP socket
impl ByteTransport for UdpSocket {
    fn kind(&self) -> TransportKind {
        TransportKind::Datagram
    }

    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<Transfer> {
        match self.try_recv(buf) {
            // an ICMP 'port unreachable' for an earlier datagram shows up here. The server may
            //  well come back, and retransmission takes care of the lost request
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                debug!("UDP socket: peer refused an earlier datagram");
                Ok(Transfer::WouldBlock)
            }
            other => would_block_to_transfer(other),
        }
    }

    fn try_write(&mut self, buf: &[u8]) -> io::Result<Transfer> {
        trace!("UDP socket: sending datagram of {} bytes", buf.len());
        match self.try_send(buf) {
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                debug!("UDP socket: peer refused an earlier datagram");
                Ok(Transfer::WouldBlock)
            }
            other => would_block_to_transfer(other),
        }
    }
}

#[async_trait]
impl Readiness for UdpSocket {
    async fn readable(&self) -> io::Result<()> {
        UdpSocket::readable(self).await
    }

    async fn writable(&self) -> io::Result<()> {
        UdpSocket::writable(self).await
    }
}

impl ByteTransport for TcpStream {
    fn kind(&self) -> TransportKind {
        TransportKind::Stream
    }

    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<Transfer> {
        if buf.is_empty() {
            return Ok(Transfer::Done(0));
        }
        match TcpStream::try_read(self, buf) {
            // streams report EOF as a zero length read
            Ok(0) => Ok(Transfer::Closed),
            other => would_block_to_transfer(other),
        }
    }

    fn try_write(&mut self, buf: &[u8]) -> io::Result<Transfer> {
        would_block_to_transfer(TcpStream::try_write(self, buf))
    }
}

#[async_trait]
impl Readiness for TcpStream {
    async fn readable(&self) -> io::Result<()> {
        TcpStream::readable(self).await
    }

    async fn writable(&self) -> io::Result<()> {
        TcpStream::writable(self).await
    }
}
