use clap::Args;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::RelayConfig;

/// Command-line flags for the relay, shared by every binary that hosts it.
#[derive(Args, Debug, Clone)]
pub struct RelayArgs {
    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:9001", env = "TABLESIDE_RELAY_ADDR")]
    pub addr: SocketAddr,
    /// Directory of <channel>.jsonl scripts
    #[arg(short, long)]
    pub scripts: Option<PathBuf>,
    /// JSON file for the config endpoints
    #[arg(short, long)]
    pub fixtures: Option<PathBuf>,
    /// Restart each script when it ends
    #[arg(short = 'l', long = "loop")]
    pub loop_scripts: bool,
}

impl From<RelayArgs> for RelayConfig {
    fn from(args: RelayArgs) -> Self {
        Self {
            addr: args.addr,
            scripts: args.scripts,
            fixtures: args.fixtures,
            loop_scripts: args.loop_scripts,
        }
    }
}
