use clap::Parser;
use tableside::{init_tracing, watch, WatchArgs};

#[derive(Parser)]
#[command(name = "watch")]
#[command(about = "Terminal overlay for a live card table")]
struct Cli {
    #[command(flatten)]
    watch: WatchArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    watch(Cli::parse().watch).await
}
