use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "infermesh-node")]
#[command(version, about = "Peer-to-peer streamed chat completions", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize node configuration and generate a keypair
    Init(InitArgs),
    /// Start the node
    Start(StartArgs),
    /// Generate a new keypair
    Keygen(KeygenArgs),
    /// One-shot chat against a discovered peer
    Chat(ChatArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct InitArgs {
    /// Config file path
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Data directory path
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    /// Overwrite existing config/keypair
    #[arg(long, default_value_t = false)]
    pub force: bool,
    /// Model of interest (client) or served model (node)
    #[arg(long)]
    pub model: Option<String>,
    /// Role: client or node
    #[arg(long)]
    pub role: Option<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct StartArgs {
    /// Config file path
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Data directory override
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    /// Listen address override (multiaddr)
    #[arg(long)]
    pub listen_addr: Option<String>,
    /// Comma-separated bootstrap peers
    #[arg(long)]
    pub bootstrap_peers: Option<String>,
    /// Role override: client or node
    #[arg(long)]
    pub role: Option<String>,
    /// Model override
    #[arg(long)]
    pub model: Option<String>,
    /// Inference backend URL override
    #[arg(long)]
    pub backend_url: Option<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct KeygenArgs {
    /// Output path for keypair
    #[arg(long)]
    pub output: Option<PathBuf>,
    /// Display peer ID after generation
    #[arg(long, default_value_t = false)]
    pub show_peer_id: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct ChatArgs {
    /// Config file path
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Comma-separated bootstrap peers
    #[arg(long)]
    pub bootstrap_peers: Option<String>,
    /// Model to chat with
    #[arg(long)]
    pub model: Option<String>,
    /// Prompt to send once a hosting peer is discovered
    #[arg(long)]
    pub prompt: String,
    /// Seconds to wait for a hosting peer before giving up
    #[arg(long, default_value_t = 30)]
    pub discovery_wait_secs: u64,
}

pub fn parse_cli() -> Cli {
    Cli::parse()
}
