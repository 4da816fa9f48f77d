//! Shared pieces of the `tableside` and `watch` binaries: the terminal
//! overlay and the stdin command loop that drives it.

use anyhow::Context;
use clap::Args;
use std::path::PathBuf;
use tableside_client::{Overlay, OverlayConfig, TextRenderer};
use tableside_protocol::ClientAction;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// Log to stderr so the table drawn on stdout stays readable.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
}

#[derive(Args, Debug, Clone, Default)]
pub struct WatchArgs {
    /// JSON overlay config; flags below override it
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// WebSocket endpoint of the event stream
    #[arg(long, env = "TABLESIDE_SERVER")]
    pub server: Option<String>,
    /// Channel to watch
    #[arg(short, long)]
    pub channel: Option<String>,
    /// Page URL carrying a `channel` query parameter
    #[arg(long)]
    pub page_url: Option<String>,
    /// Identity token from the host page
    #[arg(long, env = "TABLESIDE_TOKEN", hide_env_values = true)]
    pub token: Option<String>,
    /// Secret for verifying the identity token
    #[arg(long, env = "TABLESIDE_TOKEN_SECRET", hide_env_values = true)]
    pub token_secret: Option<String>,
    /// Base URL of the profile service
    #[arg(short, long)]
    pub profile: Option<String>,
    /// Base URL for sprites and card skins
    #[arg(long)]
    pub assets: Option<String>,
    /// Login of the person watching
    #[arg(short, long)]
    pub viewer: Option<String>,
    /// Print a plain-language description with every redraw
    #[arg(long)]
    pub accessible: bool,
    /// Disable card animations
    #[arg(long)]
    pub no_animations: bool,
    /// Ignore stdin instead of reading commands from it
    #[arg(long)]
    pub no_commands: bool,
}

impl WatchArgs {
    pub fn overlay_config(&self) -> anyhow::Result<OverlayConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
                serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
            }
            None => OverlayConfig::default(),
        };

        if let Some(server) = &self.server {
            config.server_url = server.clone();
        }
        if let Some(channel) = &self.channel {
            let query = url::form_urlencoded::Serializer::new(String::new())
                .append_pair("channel", channel)
                .finish();
            config.page_url = Some(format!("?{query}"));
        } else if let Some(page_url) = &self.page_url {
            config.page_url = Some(page_url.clone());
        }
        for (slot, value) in [
            (&mut config.token, &self.token),
            (&mut config.token_secret, &self.token_secret),
            (&mut config.profile_url, &self.profile),
            (&mut config.asset_base_url, &self.assets),
            (&mut config.viewer, &self.viewer),
        ] {
            if value.is_some() {
                *slot = value.clone();
            }
        }
        config.accessibility |= self.accessible;
        if self.no_animations {
            config.animations = false;
        }
        Ok(config)
    }
}

/// Run a terminal overlay until its connection gives up.
pub async fn watch(args: WatchArgs) -> anyhow::Result<()> {
    let config = args.overlay_config()?;
    let overlay = Overlay::bootstrap(config, TextRenderer::new(std::io::stdout())).await?;

    let actions = if args.no_commands {
        None
    } else {
        print_help();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(read_commands(tx));
        Some(rx)
    };
    overlay.run_with(actions).await?;
    Ok(())
}

async fn read_commands(tx: mpsc::UnboundedSender<ClientAction>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "help" {
            print_help();
            continue;
        }
        match parse_command(line) {
            Some(action) => {
                if tx.send(action).is_err() {
                    break;
                }
            }
            None => println!("❓ Unknown command: {line}"),
        }
    }
}

fn print_help() {
    println!("📋 Commands:");
    println!("  hit | stand | double | surrender | split");
    println!("  switch <hand>   - play another split hand");
    println!("  insure yes|no   - answer the insurance offer");
    println!("  check | call | fold");
    println!("  raise <amount>");
    println!("  hold <i> ...    - keep cards by position");
    println!("  draw | start    - table control");
}

/// Map one line of input to an action.
pub fn parse_command(input: &str) -> Option<ClientAction> {
    let parts: Vec<&str> = input.split_whitespace().collect();
    let (command, args) = parts.split_first()?;

    match command.to_lowercase().as_str() {
        "hit" => Some(ClientAction::PlayerHit),
        "stand" => Some(ClientAction::PlayerStand),
        "double" => Some(ClientAction::PlayerDouble),
        "surrender" => Some(ClientAction::PlayerSurrender),
        "split" => Some(ClientAction::PlayerSplit),
        "switch" => {
            let hand_index = args.first()?.parse().ok()?;
            Some(ClientAction::PlayerSwitchHand { hand_index })
        }
        "insure" | "insurance" => {
            let accept = match args.first().map(|a| a.to_lowercase()) {
                None => true,
                Some(a) if a == "yes" || a == "y" => true,
                Some(a) if a == "no" || a == "n" => false,
                Some(_) => return None,
            };
            Some(ClientAction::PlayerInsurance { accept })
        }
        "check" => Some(ClientAction::PlayerCheck),
        "call" => Some(ClientAction::PlayerCall),
        "raise" => {
            let amount = args.first()?.parse().ok()?;
            Some(ClientAction::PlayerRaise { amount })
        }
        "fold" => Some(ClientAction::PlayerFold),
        "hold" => {
            let indices = args.iter().map(|a| a.parse()).collect::<Result<Vec<usize>, _>>().ok()?;
            Some(ClientAction::PlayerHold { indices })
        }
        "draw" => Some(ClientAction::ForceDraw),
        "start" => Some(ClientAction::StartRound),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_map_to_actions() {
        assert_eq!(parse_command("hit"), Some(ClientAction::PlayerHit));
        assert_eq!(parse_command("  RAISE 40 "), Some(ClientAction::PlayerRaise { amount: 40 }));
        assert_eq!(parse_command("switch 1"), Some(ClientAction::PlayerSwitchHand { hand_index: 1 }));
        assert_eq!(parse_command("insure no"), Some(ClientAction::PlayerInsurance { accept: false }));
        assert_eq!(parse_command("insure"), Some(ClientAction::PlayerInsurance { accept: true }));
        assert_eq!(parse_command("hold 0 2"), Some(ClientAction::PlayerHold { indices: vec![0, 2] }));
        assert_eq!(parse_command("hold"), Some(ClientAction::PlayerHold { indices: vec![] }));
    }

    #[test]
    fn bad_commands_are_rejected() {
        assert_eq!(parse_command(""), None);
        assert_eq!(parse_command("raise"), None);
        assert_eq!(parse_command("raise lots"), None);
        assert_eq!(parse_command("hold 1 x"), None);
        assert_eq!(parse_command("insure maybe"), None);
        assert_eq!(parse_command("dance"), None);
    }

    #[test]
    fn channel_flag_becomes_a_query_parameter() {
        let args = WatchArgs {
            channel: Some("table 3".into()),
            page_url: Some("https://ignored/?channel=other".into()),
            viewer: Some("ann".into()),
            no_animations: true,
            ..Default::default()
        };
        let config = args.overlay_config().unwrap();
        assert_eq!(config.page_url.as_deref(), Some("?channel=table+3"));
        assert_eq!(
            tableside_client::channel::channel_from_query(config.page_url.as_deref().unwrap()).as_deref(),
            Some("table 3")
        );
        assert_eq!(config.viewer.as_deref(), Some("ann"));
        assert!(!config.animations);
        assert_eq!(config.server_url, OverlayConfig::default().server_url);
    }

    #[test]
    fn flags_override_the_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("overlay.json");
        std::fs::write(&path, r#"{"server_url": "ws://file/ws", "seat_count": 4, "viewer": "bob"}"#).unwrap();

        let args = WatchArgs {
            config: Some(path),
            server: Some("ws://flag/ws".into()),
            ..Default::default()
        };
        let config = args.overlay_config().unwrap();
        assert_eq!(config.server_url, "ws://flag/ws");
        assert_eq!(config.seat_count, 4);
        assert_eq!(config.viewer.as_deref(), Some("bob"));
    }
}
