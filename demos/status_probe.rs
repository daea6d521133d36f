use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use clap::Parser;
use clap_derive::Parser;
use radius_bio::codec::{RawAttribute, TlvCodec};
use radius_bio::config::ClientConfig;
use radius_bio::driver::{connect_tcp, connect_udp, ClientDriver};
use radius_bio::integrity::NoIntegrityCheck;
use radius_bio::packet::code::{CodeName, PacketCode};
use radius_bio::packet::Packet;
use radius_bio::packet_bio::ReadOutcome;
use radius_bio::retry::RetryPolicy;
use radius_bio::transport::{ByteTransport, Readiness};
use tracing::{info, warn, Level};

/// Sends Status-Server probes to a server and reports whether and how it answers. Servers that
///  insist on a Message-Authenticator will silently drop the probes.
#[derive(Parser)]
struct Args {
    server_address: String,

    #[clap(long, default_value_t = 3)]
    count: u32,

    #[clap(long, default_value_t = false)]
    tcp: bool,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose { Level::TRACE } else { Level::INFO })
        .try_init()
        .ok();

    let server: SocketAddr = args.server_address.parse()?;
    let config = Arc::new(ClientConfig::new()
        .with_retry_policy(PacketCode::StatusServer.into(), RetryPolicy::fixed(Duration::from_secs(2), 3)));

    if args.tcp {
        probe(connect_tcp(server, config, TlvCodec, NoIntegrityCheck).await?, args.count).await
    }
    else {
        probe(connect_udp(server, config, TlvCodec, NoIntegrityCheck).await?, args.count).await
    }
}

async fn probe<T: ByteTransport + Readiness>(mut driver: ClientDriver<T, TlvCodec, u32, NoIntegrityCheck>, count: u32) -> anyhow::Result<()> {
    // NAS-Identifier
    let attributes = vec![RawAttribute::new(32, b"status-probe")];

    for n in 0..count {
        let mut packet = Packet::new(PacketCode::StatusServer.into());
        driver.send(n, &mut packet, &attributes)?;

        match driver.next_outcome().await? {
            ReadOutcome::Response { ctx, response, attributes, .. } => {
                info!("probe #{}: {:?} with {} attributes", ctx, CodeName(response.code), attributes.len());
                for attr in attributes {
                    info!("    type {}: {:?}", attr.attr_type, attr.value);
                }
            }
            ReadOutcome::Failed { ctx, reason, .. } => {
                warn!("probe #{}: no answer - {:?}", ctx, reason);
            }
        }
    }
    Ok(())
}
