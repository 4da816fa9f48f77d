use clap::{Parser, Subcommand};
use std::time::Duration;
use tableside::{init_tracing, watch, WatchArgs};
use tableside_relay::{serve, RelayArgs, RelayConfig};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "tableside")]
#[command(about = "Tableside - live card table overlay and development relay")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay and a terminal overlay against it
    Both {
        #[command(flatten)]
        relay: RelayArgs,
        #[command(flatten)]
        watch: WatchArgs,
    },
    /// Run only the relay
    Relay {
        #[command(flatten)]
        relay: RelayArgs,
    },
    /// Run only a terminal overlay
    Watch {
        #[command(flatten)]
        watch: WatchArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Both { relay, watch } => run_both(relay.into(), watch).await,
        Commands::Relay { relay } => serve(relay.into()).await,
        Commands::Watch { watch: args } => watch(args).await,
    }
}

async fn run_both(relay: RelayConfig, mut args: WatchArgs) -> anyhow::Result<()> {
    if args.server.is_none() {
        args.server = Some(format!("ws://{}/ws", relay.addr));
    }
    info!(addr = %relay.addr, "starting relay");
    let server = tokio::spawn(async move {
        if let Err(e) = serve(relay).await {
            error!(error = %e, "relay stopped");
        }
    });

    // Give the listener a moment before the overlay's first connect.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let result = watch(args).await;
    server.abort();
    result
}
