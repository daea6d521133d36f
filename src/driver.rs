//! An async driver for a [ClientBio] on top of tokio: it waits for socket readiness and for the
//!  channel's next deadline, and turns a channel into a stream of completed requests.
//!
//! The driver is optional - applications with their own event loop use the [ClientBio] directly.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use anyhow::Context;
use tokio::net::{TcpStream, UdpSocket};
use tokio::select;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};
use crate::client::ClientBio;
use crate::codec::AttributeCodec;
use crate::config::ClientConfig;
use crate::error::PacketError;
use crate::integrity::IntegrityCheck;
use crate::packet::Packet;
use crate::packet_bio::{PacketBio, ReadOutcome};
use crate::transport::{ByteTransport, Readiness};

enum Wake {
    Readable,
    Writable,
    Deadline,
    Failed(io::Error),
}

pub struct ClientDriver<T: ByteTransport + Readiness, C: AttributeCodec, Ctx, I: IntegrityCheck> {
    bio: ClientBio<T, C, Ctx, I>,
}

impl<T: ByteTransport + Readiness, C: AttributeCodec, Ctx, I: IntegrityCheck> ClientDriver<T, C, Ctx, I> {
    pub fn new(bio: ClientBio<T, C, Ctx, I>) -> ClientDriver<T, C, Ctx, I> {
        ClientDriver { bio }
    }

    pub fn bio(&self) -> &ClientBio<T, C, Ctx, I> {
        &self.bio
    }

    pub fn bio_mut(&mut self) -> &mut ClientBio<T, C, Ctx, I> {
        &mut self.bio
    }

    pub fn into_bio(self) -> ClientBio<T, C, Ctx, I> {
        self.bio
    }

    /// Sends a request, see [PacketBio::write]. Transient errors (`Busy`, `OutputBlocked`) are
    ///  returned to the caller, who may retry after the next completion.
    pub fn send(&mut self, ctx: Ctx, packet: &mut Packet, attributes: &C::Attributes) -> Result<(), PacketError> {
        self.bio.write(ctx, packet, attributes)
    }

    pub fn release(&mut self, ctx: &Ctx, packet: &Packet) -> Result<(), PacketError> {
        self.bio.release(ctx, packet)
    }

    /// Waits for the next request to complete, handling retransmissions and queued output along
    ///  the way.
    ///
    /// This waits indefinitely if there are no outstanding requests, so it is typically used in
    ///  a `select!` together with whatever produces requests. It is cancellation safe: no state
    ///  is lost if the future is dropped. Once the channel failed and all failures of outstanding
    ///  requests were returned, this returns the fatal error.
    pub async fn next_outcome(&mut self) -> Result<ReadOutcome<Ctx, C::Attributes>, PacketError> {
        loop {
            if let Some(outcome) = self.bio.read()? {
                return Ok(outcome);
            }

            let deadline = self.bio.next_deadline();
            let wants_write = self.bio.has_pending_output();

            let wake = {
                let transport = self.bio.transport();
                select! {
                    r = transport.readable() => match r {
                        Ok(()) => Wake::Readable,
                        Err(e) => Wake::Failed(e),
                    },
                    r = transport.writable(), if wants_write => match r {
                        Ok(()) => Wake::Writable,
                        Err(e) => Wake::Failed(e),
                    },
                    _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => Wake::Deadline,
                }
            };

            match wake {
                Wake::Readable => {}
                Wake::Writable => {
                    if let Err(e) = self.bio.flush() {
                        // the failures of outstanding requests are reported through read()
                        debug!("flushing failed: {}", e);
                    }
                }
                Wake::Deadline => {
                    self.bio.fire_expired(Instant::now());
                }
                Wake::Failed(e) => {
                    self.bio.fail_channel(e.into());
                }
            }
        }
    }
}

/// Creates a channel over a UDP socket connected to `server`, bound to an ephemeral local port
pub async fn connect_udp<C: AttributeCodec, Ctx, I: IntegrityCheck>(server: SocketAddr, config: Arc<ClientConfig>, codec: C, integrity: I) -> anyhow::Result<ClientDriver<UdpSocket, C, Ctx, I>> {
    let local_addr: SocketAddr = if server.is_ipv4() {
        "0.0.0.0:0".parse()?
    }
    else {
        "[::]:0".parse()?
    };

    let socket = UdpSocket::bind(local_addr).await
        .context("binding UDP socket")?;
    socket.connect(server).await
        .with_context(|| format!("connecting UDP socket to {}", server))?;
    info!("UDP client channel {} -> {}", socket.local_addr()?, server);

    Ok(ClientDriver::new(ClientBio::new(config, socket, codec, integrity)?))
}

/// Creates a channel over a TCP connection to `server`
pub async fn connect_tcp<C: AttributeCodec, Ctx, I: IntegrityCheck>(server: SocketAddr, config: Arc<ClientConfig>, codec: C, integrity: I) -> anyhow::Result<ClientDriver<TcpStream, C, Ctx, I>> {
    let stream = TcpStream::connect(server).await
        .with_context(|| format!("connecting to {}", server))?;
    stream.set_nodelay(true)?;
    info!("TCP client channel {} -> {}", stream.local_addr()?, server);

    Ok(ClientDriver::new(ClientBio::new(config, stream, codec, integrity)?))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;
    use bytes::Bytes;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use crate::codec::OpaqueCodec;
    use crate::error::FailureCause;
    use crate::packet::{PacketHeader, HEADER_LEN};
    use crate::packet_bio::FailureReason;
    use crate::retry::RetryPolicy;
    use crate::test_util::echo_check::EchoAuthenticatorCheck;
    use crate::test_util::packets::reply_to;
    use super::*;

    fn config() -> Arc<ClientConfig> {
        Arc::new(ClientConfig::new()
            .with_retry_policy(1, RetryPolicy::fixed(Duration::from_secs(1), 3)))
    }

    /// answers every request with an Access-Accept carrying a single attribute
    async fn run_udp_responder(socket: UdpSocket) {
        let mut buf = [0u8; 4096];
        loop {
            let Ok((n, from)) = socket.recv_from(&mut buf).await else { return };
            let reply = reply_to(&buf[..n], 2, &[18, 4, b'o', b'k']);
            if socket.send_to(&reply, from).await.is_err() {
                return;
            }
        }
    }

    #[tokio::test]
    async fn test_udp_request_response() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();
        tokio::spawn(run_udp_responder(server));

        let mut driver = connect_udp(server_addr, config(), OpaqueCodec, EchoAuthenticatorCheck).await.unwrap();

        for i in 0..3u32 {
            let mut request = Packet::new(1);
            driver.send(i, &mut request, &Bytes::new()).unwrap();

            let outcome = tokio::time::timeout(Duration::from_secs(5), driver.next_outcome()).await
                .expect("no response in time")
                .unwrap();
            match outcome {
                ReadOutcome::Response { ctx, request: r, response, attributes } => {
                    assert_eq!(ctx, i);
                    assert_eq!(r, request);
                    assert_eq!(response.code, 2);
                    assert_eq!(attributes.as_ref(), &[18, 4, b'o', b'k']);
                }
                ReadOutcome::Failed { reason, .. } => panic!("request failed: {:?}", reason),
            }
        }
        assert_eq!(driver.bio().outstanding(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_udp_no_response() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut driver = connect_udp(server.local_addr().unwrap(), config(), OpaqueCodec, EchoAuthenticatorCheck).await.unwrap();

        let t0 = Instant::now();
        let mut request = Packet::new(1);
        driver.send(5u32, &mut request, &Bytes::new()).unwrap();

        match driver.next_outcome().await.unwrap() {
            ReadOutcome::Failed { ctx, reason, .. } => {
                assert_eq!(ctx, 5);
                assert_eq!(reason, FailureReason::Exhausted { attempts: 3 });
            }
            ReadOutcome::Response { .. } => panic!("there is no responder"),
        }
        let elapsed = Instant::now() - t0;
        assert!(elapsed >= Duration::from_secs(3) && elapsed < Duration::from_secs(4), "{:?}", elapsed);

        let mut buf = [0u8; 4096];
        let mut num_received = 0;
        while let Ok((n, _)) = server.try_recv_from(&mut buf) {
            assert_eq!(&buf[..n], request.data.as_ref());
            num_received += 1;
        }
        assert_eq!(num_received, 3);
    }

    #[tokio::test]
    async fn test_tcp_request_response_then_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server_addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();

            let mut header = [0u8; HEADER_LEN];
            stream.read_exact(&mut header).await.unwrap();
            let len = PacketHeader::peek_length(&header).unwrap();
            let mut request = header.to_vec();
            request.resize(len, 0);
            stream.read_exact(&mut request[HEADER_LEN..]).await.unwrap();

            // deliver the response in two parts to exercise reassembly
            let reply = reply_to(&request, 2, &[1, 3, b'x']);
            stream.write_all(&reply[..7]).await.unwrap();
            stream.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            stream.write_all(&reply[7..]).await.unwrap();
            stream.shutdown().await.unwrap();
        });

        let mut driver = connect_tcp(server_addr, config(), OpaqueCodec, EchoAuthenticatorCheck).await.unwrap();
        let mut request = Packet::new(1);
        driver.send(1u32, &mut request, &Bytes::from_static(&[1, 5, b'b', b'o', b'b'])).unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(5), driver.next_outcome()).await.unwrap().unwrap();
        assert!(outcome.is_response());
        assert_eq!(outcome.ctx(), &1);

        let result = tokio::time::timeout(Duration::from_secs(5), driver.next_outcome()).await.unwrap();
        assert!(matches!(result, Err(PacketError::ChannelFailed(FailureCause::Closed))));
        assert!(driver.bio().is_failed());
    }
}
