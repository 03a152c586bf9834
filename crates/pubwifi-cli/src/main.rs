//! PubWIFI CLI tools: secret generation, loopback self-test.

#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use pubwifi_common::TunnelConfig;
use pubwifi_tunnel::{channel_interface, InterfaceHost, TunnelPump, UdpTransport};
use seal_crypto::{Role, SharedSecret};
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "pubwifi")]
#[command(about = "PubWIFI tunnel tools")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a new shared secret
    Keygen {
        /// Output file path
        #[arg(short, long, default_value = "pubwifi.secret")]
        output: PathBuf,
    },

    /// Run two tunnels back to back over loopback UDP and report stats
    Loopback {
        /// Number of packets to push through the tunnel
        #[arg(short, long, default_value_t = 1000)]
        packets: u32,

        /// Shared secret file (a fresh secret is generated if omitted)
        #[arg(short, long)]
        secret: Option<PathBuf>,

        #[command(flatten)]
        tunnel: TunnelArgs,
    },

    /// Show version information
    Version,
}

#[derive(ClapArgs, Debug)]
struct TunnelArgs {
    /// JSON tunnel config file
    #[arg(short, long, env = "PUBWIFI_CONFIG")]
    config: Option<PathBuf>,

    /// Replay window size (overrides the config file)
    #[arg(long, env = "PUBWIFI_REPLAY_WINDOW")]
    replay_window: Option<u64>,

    /// Shutdown timeout in milliseconds (overrides the config file)
    #[arg(long, env = "PUBWIFI_SHUTDOWN_TIMEOUT_MS")]
    shutdown_timeout_ms: Option<u64>,

    /// Failure ratio that puts the tunnel in the error state (overrides the config file)
    #[arg(long, env = "PUBWIFI_FAILURE_THRESHOLD")]
    failure_threshold: Option<f64>,
}

impl TunnelArgs {
    fn resolve(&self) -> Result<TunnelConfig> {
        let mut config = match &self.config {
            Some(path) => TunnelConfig::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => TunnelConfig::default(),
        };
        if let Some(size) = self.replay_window {
            config.replay_window_size = size;
        }
        if let Some(ms) = self.shutdown_timeout_ms {
            config.shutdown_timeout_ms = ms;
        }
        if let Some(threshold) = self.failure_threshold {
            config.failure_threshold = threshold;
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    pubwifi_common::init_tracing();

    let args = Args::parse();

    match args.command {
        Command::Keygen { output } => {
            let secret = SharedSecret::generate();
            secret.save(&output)?;
            println!("Shared secret: {}", output.display());
        }
        Command::Loopback {
            packets,
            secret,
            tunnel,
        } => {
            let config = tunnel.resolve()?;
            let secret = match secret {
                Some(path) => SharedSecret::load(&path)?,
                None => SharedSecret::generate(),
            };

            let rt = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            rt.block_on(run_loopback(config, secret, packets))?;
        }
        Command::Version => {
            println!("pubwifi {}", env!("CARGO_PKG_VERSION"));
            println!("Wire version: {}", seal_core::SEAL_VERSION);
        }
    }

    Ok(())
}

struct Endpoint {
    pump: TunnelPump,
    host: InterfaceHost,
}

async fn start_endpoint(
    config: &TunnelConfig,
    secret: &SharedSecret,
    role: Role,
    socket: UdpSocket,
) -> Result<Endpoint> {
    let pump = TunnelPump::new(config.clone())?;
    let keys = pump.key_store();
    keys.establish(secret.as_bytes(), role)?;

    let (iface, host) = channel_interface(1024);
    pump.start(keys, Arc::new(iface), Arc::new(UdpTransport::from_socket(socket)))
        .await?;
    Ok(Endpoint { pump, host })
}

/// 20-byte IPv4 header, 8-byte UDP header, 4-byte counter.
fn probe_packet(index: u32) -> Vec<u8> {
    let mut packet = vec![
        0x45, 0x00, 0x00, 0x20, 0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0x00, 0x00, 10, 99, 0, 2, 10,
        99, 0, 1,
    ];
    packet.extend_from_slice(&[0xC0, 0x00, 0xC0, 0x01, 0x00, 0x0C, 0x00, 0x00]);
    packet.extend_from_slice(&index.to_be_bytes());
    packet
}

async fn run_loopback(config: TunnelConfig, secret: SharedSecret, packets: u32) -> Result<()> {
    let a = UdpSocket::bind("127.0.0.1:0").await?;
    let b = UdpSocket::bind("127.0.0.1:0").await?;
    a.connect(b.local_addr()?).await?;
    b.connect(a.local_addr()?).await?;
    info!(initiator = %a.local_addr()?, responder = %b.local_addr()?, "loopback sockets ready");

    let client = start_endpoint(&config, &secret, Role::Initiator, a).await?;
    let mut server = start_endpoint(&config, &secret, Role::Responder, b).await?;

    let started = Instant::now();
    let sender = {
        let host = client.host;
        tokio::spawn(async move {
            for i in 0..packets {
                if host.inject(probe_packet(i)).await.is_err() {
                    break;
                }
            }
            host
        })
    };

    let mut delivered = 0u32;
    while delivered < packets {
        match timeout(Duration::from_secs(2), server.host.next_packet()).await {
            Ok(Some(_)) => delivered += 1,
            Ok(None) => return Err(anyhow!("responder interface closed")),
            Err(_) => {
                warn!(delivered, packets, "no packet for 2s, giving up");
                break;
            }
        }
    }
    let elapsed = started.elapsed();
    let _host = sender.await?;

    let client_stats = client.pump.stats();
    let server_stats = server.pump.stats();
    client.pump.stop().await;
    server.pump.stop().await;

    println!(
        "Delivered {}/{} packets in {:?}",
        delivered, packets, elapsed
    );
    println!("Initiator: {}", serde_json::to_string_pretty(&client_stats)?);
    println!("Responder: {}", serde_json::to_string_pretty(&server_stats)?);

    if delivered < packets {
        return Err(anyhow!("lost {} packets", packets - delivered));
    }
    Ok(())
}
