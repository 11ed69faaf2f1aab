use std::io::{self, BufRead};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use arq_link::config::LinkConfig;
use arq_link::end_point::EndPoint;
use arq_link::persistence::{FileSequenceStore, NoSequenceStore, SequenceStore};
use clap::Parser;
use clap_derive::{Parser, Subcommand};
use tokio::select;
use tracing::{error, info, Level};

/// A peer on a stop-and-wait link. Run `listen` on one side and `send` or `probe` on the other.
#[derive(Parser)]
struct Args {
    /// local address to bind to
    #[clap(long, default_value = "0.0.0.0:4440")]
    bind: SocketAddr,

    /// initial peer address, defaults to broadcast until a peer is heard from
    #[clap(long, default_value = "255.255.255.255:4440")]
    peer: SocketAddr,

    #[clap(long, default_value_t = 1000)]
    resend_interval_millis: u64,

    /// give up a send after this many retransmissions instead of retrying forever
    #[clap(long)]
    max_retransmissions: Option<u32>,

    /// persist the last sent sequence number in this file
    #[clap(long)]
    sequence_file: Option<PathBuf>,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// print every received payload as text
    Listen,
    /// send each line of stdin as one payload
    Send,
    /// measure the round trip time to the peer
    Probe {
        #[clap(long, default_value_t = 5)]
        count: u32,
    },
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    let mut config = LinkConfig::default_ipv4();
    config.bind_addr = args.bind;
    config.destination = args.peer;
    config.broadcast = args.peer.ip() == Ipv4Addr::BROADCAST;
    config.resend_interval = Duration::from_millis(args.resend_interval_millis);
    config.max_retransmissions = args.max_retransmissions;

    let store: Arc<dyn SequenceStore> = match args.sequence_file {
        Some(path) => Arc::new(FileSequenceStore::new(path)),
        None => Arc::new(NoSequenceStore),
    };

    let end_point = Arc::new(EndPoint::new(config, store).await?);

    select! {
        result = run(end_point.clone(), args.command) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted");
            end_point.reset().await;
            Ok(())
        }
    }
}

async fn run(end_point: Arc<EndPoint>, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Listen => {
            loop {
                let payload = end_point.receive().await?;
                println!("{}", String::from_utf8_lossy(&payload));
            }
        }
        Command::Send => {
            let lines = tokio::task::spawn_blocking(|| io::stdin().lock().lines().collect::<Result<Vec<_>, _>>()).await??;
            for line in lines.into_iter().filter(|l| !l.is_empty()) {
                match end_point.send(line.as_bytes()).await {
                    Ok(()) => info!("delivered {:?}", line),
                    Err(e) => error!("failed to deliver {:?}: {}", line, e),
                }
            }
            Ok(())
        }
        Command::Probe { count } => {
            for _ in 0..count {
                match end_point.probe(Duration::from_secs(2)).await {
                    Ok(rtt) => println!("probe answered after {:?}", rtt),
                    Err(e) => println!("{}", e),
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            Ok(())
        }
    }
}
