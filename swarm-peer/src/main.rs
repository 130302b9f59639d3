//! Swarm peer: console chat over UDP with hello-gossip peer discovery.

mod config;
mod console;
mod udp;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use swarm_core::{ClientLoop, Command, Credentials, PeerId};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::udp::UdpTransport;

const VERSION: &str = env!("CARGO_PKG_VERSION");

const USAGE: &str = "usage: swarm-peer [--config <path>] [bind-address]";

#[derive(Debug, Default, PartialEq, Eq)]
struct Args {
    version: bool,
    help: bool,
    config: Option<PathBuf>,
    bind: Option<String>,
}

impl Args {
    fn parse(args: impl IntoIterator<Item = String>) -> anyhow::Result<Self> {
        let mut out = Args::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--version" | "-V" => out.version = true,
                "--help" | "-h" => out.help = true,
                "--config" | "-c" => {
                    let path = args.next().context("--config needs a path")?;
                    out.config = Some(PathBuf::from(path));
                }
                s if s.starts_with('-') => bail!("unknown option {}\n{}", s, USAGE),
                s => {
                    if out.bind.is_some() {
                        bail!("unexpected argument {}\n{}", s, USAGE);
                    }
                    out.bind = Some(s.to_string());
                }
            }
        }
        Ok(out)
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse(std::env::args().skip(1))?;
    if args.version {
        println!("swarm-peer {}", VERSION);
        return Ok(());
    }
    if args.help {
        println!("{}", USAGE);
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cfg = config::load(args.config.as_deref())?;
    let bind = args.bind.unwrap_or_else(|| cfg.bind.clone());
    let credentials = Credentials::new(cfg.token.clone());
    let wait = Duration::from_millis(cfg.wait_ms);
    let transport = UdpTransport::new(cfg.udp_settings());

    let rt = tokio::runtime::Runtime::new()?;
    let outcome = rt.block_on(async move {
        let (tx, mut rx) = mpsc::unbounded_channel();

        tokio::spawn(console::run_console(tx.clone()));
        let signal_tx = tx;
        tokio::spawn(async move {
            if shutdown_signal().await.is_ok() {
                info!("shutdown signal received");
                let _ = signal_tx.send(Command::Quit);
            }
        });

        let client = tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let mut client = ClientLoop::new(transport, print_chat).with_wait_timeout(wait);
            client
                .start(&bind, &credentials)
                .with_context(|| format!("starting on {}", bind))?;
            client.run(|| rx.try_recv().ok());
            Ok(())
        });
        match client.await {
            Ok(result) => result,
            Err(e) => Err(anyhow::Error::new(e).context("client loop panicked")),
        }
    });
    // stdin reads park a blocking thread; do not wait on it
    rt.shutdown_timeout(Duration::from_millis(200));
    outcome
}

fn print_chat(from: PeerId, text: &str) {
    println!("Peer {}: {}", from, text);
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
