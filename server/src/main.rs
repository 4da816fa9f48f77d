use clap::Parser;
use tableside_relay::{serve, RelayArgs};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tableside-relay")]
#[command(about = "Replays scripted table events to overlays over WebSocket")]
struct Cli {
    #[command(flatten)]
    relay: RelayArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    serve(cli.relay.into()).await
}
