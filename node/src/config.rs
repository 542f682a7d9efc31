use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use config as config_rs;
use libp2p::Multiaddr;
use network::{NetworkConfig, NodeRole, ProtocolConfig};

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct NodeConfiguration {
    pub role: NodeRole,
    /// Model of interest (client role) or locally served model (node role).
    pub model: String,
    pub data_dir: PathBuf,
    pub keypair_path: PathBuf,
    pub network: NetworkConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub backend: BackendConfig,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct BackendConfig {
    pub url: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: backend::DEFAULT_OLLAMA_URL.to_string(),
        }
    }
}

impl NodeConfiguration {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();

        let format = if ext == "toml" {
            config_rs::FileFormat::Toml
        } else {
            config_rs::FileFormat::Json
        };

        let cfg = config_rs::Config::builder()
            .add_source(config_rs::File::from(path).format(format))
            .build()
            .with_context(|| format!("failed to load config file: {}", path.display()))?;

        cfg.try_deserialize::<NodeConfiguration>()
            .with_context(|| format!("failed to deserialize config: {}", path.display()))
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create config parent directory: {}", parent.display())
            })?;
        }

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();

        let out = if ext == "toml" {
            toml::to_string_pretty(self).context("failed to serialize config as toml")?
        } else {
            serde_json::to_string_pretty(self).context("failed to serialize config as json")?
        };

        std::fs::write(path, out)
            .with_context(|| format!("failed to write config file: {}", path.display()))?;
        Ok(())
    }

    pub fn merge_with_env(mut self) -> Self {
        if let Ok(v) = std::env::var("INFERMESH_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("INFERMESH_LISTEN_ADDR") {
            if let Ok(ma) = v.parse::<Multiaddr>() {
                self.network.listen_addr = ma;
            }
        }
        if let Ok(v) = std::env::var("INFERMESH_BOOTSTRAP_PEERS") {
            let peers = parse_multiaddr_list(&v);
            if !peers.is_empty() {
                self.network.bootstrap_peers = peers;
            }
        }
        if let Ok(v) = std::env::var("INFERMESH_ROLE") {
            if let Ok(role) = v.parse::<NodeRole>() {
                self.role = role;
            }
        }
        if let Ok(v) = std::env::var("INFERMESH_MODEL") {
            if !v.trim().is_empty() {
                self.model = v;
            }
        }
        if let Ok(v) = std::env::var("INFERMESH_BACKEND_URL") {
            if !v.trim().is_empty() {
                self.backend.url = v;
            }
        }

        self.keypair_path = crate::keypair::default_keypair_path(&self.data_dir);
        self
    }

    pub fn merge_with_cli(mut self, cli: &crate::cli::Cli) -> Self {
        match &cli.command {
            crate::cli::Commands::Init(args) => {
                if let Some(v) = &args.data_dir {
                    self.data_dir = v.clone();
                }
                if let Some(v) = &args.model {
                    self.model = v.clone();
                }
                if let Some(v) = &args.role {
                    if let Ok(role) = v.parse::<NodeRole>() {
                        self.role = role;
                    }
                }
                self.keypair_path = crate::keypair::default_keypair_path(&self.data_dir);
            }
            crate::cli::Commands::Start(args) => {
                if let Some(v) = &args.data_dir {
                    self.data_dir = v.clone();
                }
                if let Some(v) = &args.listen_addr {
                    if let Ok(ma) = v.parse::<Multiaddr>() {
                        self.network.listen_addr = ma;
                    }
                }
                if let Some(v) = &args.bootstrap_peers {
                    let peers = parse_multiaddr_list(v);
                    if !peers.is_empty() {
                        self.network.bootstrap_peers = peers;
                    }
                }
                if let Some(v) = &args.role {
                    if let Ok(role) = v.parse::<NodeRole>() {
                        self.role = role;
                    }
                }
                if let Some(v) = &args.model {
                    self.model = v.clone();
                }
                if let Some(v) = &args.backend_url {
                    self.backend.url = v.clone();
                }
                self.keypair_path = crate::keypair::default_keypair_path(&self.data_dir);
            }
            crate::cli::Commands::Chat(args) => {
                if let Some(v) = &args.bootstrap_peers {
                    let peers = parse_multiaddr_list(v);
                    if !peers.is_empty() {
                        self.network.bootstrap_peers = peers;
                    }
                }
                if let Some(v) = &args.model {
                    self.model = v.clone();
                }
            }
            _ => {}
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(anyhow!("model: must not be empty"));
        }

        std::fs::create_dir_all(&self.data_dir).with_context(|| {
            format!(
                "data_dir: failed to create or access directory: {}",
                self.data_dir.display()
            )
        })?;

        if let Some(parent) = self.keypair_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!(
                    "keypair_path: failed to create parent directory: {}",
                    parent.display()
                )
            })?;
        }

        if self.backend.url.trim().is_empty() {
            return Err(anyhow!("backend.url: must not be empty"));
        }

        Ok(())
    }

    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        base.join("infermesh").join("config.toml")
    }

    pub fn default_data_dir() -> PathBuf {
        let base = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        base.join("infermesh")
    }
}

impl Default for NodeConfiguration {
    fn default() -> Self {
        let data_dir = Self::default_data_dir();
        Self {
            role: NodeRole::Client,
            model: "llama3.2:latest".to_string(),
            data_dir: data_dir.clone(),
            keypair_path: crate::keypair::default_keypair_path(&data_dir),
            network: NetworkConfig::default(),
            protocol: ProtocolConfig::default(),
            backend: BackendConfig::default(),
        }
    }
}

fn parse_multiaddr_list(raw: &str) -> Vec<Multiaddr> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<Multiaddr>().ok())
        .collect()
}
