mod cli;
mod config;
mod keypair;

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use backend::OllamaBackend;
use futures::StreamExt;
use network::{
    completion_chunks, content_address, ChatMessage, ChatRequest, InferenceBackend, NodeRole,
    Orchestrator, SwarmNode,
};

fn main() -> Result<()> {
    tokio::runtime::Runtime::new()?.block_on(async_main())
}

async fn async_main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = crate::cli::parse_cli();

    match &cli.command {
        crate::cli::Commands::Init(args) => {
            let config_path = args
                .config
                .clone()
                .unwrap_or_else(crate::config::NodeConfiguration::default_config_path);

            let mut cfg = crate::config::NodeConfiguration::default();
            cfg = cfg.merge_with_env();
            cfg = cfg.merge_with_cli(&cli);

            if !args.force {
                if config_path.exists() {
                    return Err(anyhow!(
                        "config file already exists: {} (use --force to overwrite)",
                        config_path.display()
                    ));
                }
                if crate::keypair::keypair_exists(&cfg.keypair_path) {
                    return Err(anyhow!(
                        "keypair already exists: {} (use --force to overwrite)",
                        cfg.keypair_path.display()
                    ));
                }
            }

            std::fs::create_dir_all(&cfg.data_dir).with_context(|| {
                format!("failed to create data_dir: {}", cfg.data_dir.display())
            })?;

            let kp = crate::keypair::generate_keypair();
            crate::keypair::save_keypair(&kp, &cfg.keypair_path)?;

            cfg.save_to_file(&config_path)?;

            println!(
                "init complete: config_path={}, data_dir={}, peer_id={}",
                config_path.display(),
                cfg.data_dir.display(),
                libp2p::PeerId::from(kp.public())
            );
        }
        crate::cli::Commands::Start(args) => {
            let config_path = args
                .config
                .clone()
                .unwrap_or_else(crate::config::NodeConfiguration::default_config_path);

            let mut cfg = if config_path.exists() {
                crate::config::NodeConfiguration::load_from_file(&config_path)?
            } else {
                println!(
                    "config not found; using defaults: {}",
                    config_path.display()
                );
                crate::config::NodeConfiguration::default()
            };

            cfg = cfg.merge_with_env();
            cfg = cfg.merge_with_cli(&cli);
            cfg.validate()?;

            let kp = if crate::keypair::keypair_exists(&cfg.keypair_path) {
                crate::keypair::load_keypair(&cfg.keypair_path)?
            } else {
                let kp = crate::keypair::generate_keypair();
                crate::keypair::save_keypair(&kp, &cfg.keypair_path)?;
                kp
            };

            run_node(cfg, kp).await?;
        }
        crate::cli::Commands::Keygen(args) => {
            let kp = crate::keypair::generate_keypair();

            let out = args
                .output
                .clone()
                .unwrap_or_else(|| PathBuf::from("node_keypair.bin"));
            crate::keypair::save_keypair(&kp, &out)?;

            if args.show_peer_id {
                println!(
                    "generated keypair: peer_id={}",
                    libp2p::PeerId::from(kp.public())
                );
            }
        }
        crate::cli::Commands::Chat(args) => {
            let config_path = args
                .config
                .clone()
                .unwrap_or_else(crate::config::NodeConfiguration::default_config_path);

            let mut cfg = if config_path.exists() {
                crate::config::NodeConfiguration::load_from_file(&config_path)?
            } else {
                crate::config::NodeConfiguration::default()
            };
            cfg = cfg.merge_with_env();
            cfg = cfg.merge_with_cli(&cli);
            cfg.role = NodeRole::Client;

            run_chat(cfg, args.clone()).await?;
        }
    }

    Ok(())
}

async fn run_node(cfg: crate::config::NodeConfiguration, kp: libp2p::identity::Keypair) -> Result<()> {
    let (swarm_node, handle, event_rx, inbound_rx) = SwarmNode::new(kp, &cfg.network)?;
    let local_peer_id = swarm_node.local_peer_id;

    tracing::info!(
        peer_id = %local_peer_id,
        role = ?cfg.role,
        model = %cfg.model,
        listen_addr = %cfg.network.listen_addr,
        "starting node"
    );

    let inference: Option<Arc<dyn InferenceBackend>> = match cfg.role {
        NodeRole::Node => Some(Arc::new(OllamaBackend::new(&cfg.backend.url))),
        NodeRole::Client => None,
    };

    let orchestrator = Orchestrator::new(
        cfg.role,
        cfg.model.clone(),
        local_peer_id,
        Arc::new(handle),
        inference,
        &cfg.protocol,
    )?;

    tokio::spawn(swarm_node.run());
    tokio::spawn(orchestrator.run(event_rx, inbound_rx));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received, exiting");
    Ok(())
}

async fn run_chat(cfg: crate::config::NodeConfiguration, args: crate::cli::ChatArgs) -> Result<()> {
    let kp = crate::keypair::generate_keypair();
    let (swarm_node, handle, event_rx, inbound_rx) = SwarmNode::new(kp, &cfg.network)?;
    let local_peer_id = swarm_node.local_peer_id;

    let orchestrator = Orchestrator::new(
        NodeRole::Client,
        cfg.model.clone(),
        local_peer_id,
        Arc::new(handle),
        None,
        &cfg.protocol,
    )?;
    let directory = orchestrator.directory();
    let client = orchestrator.message_client();

    tokio::spawn(swarm_node.run());
    tokio::spawn(orchestrator.run(event_rx, inbound_rx));

    let address = content_address(&cfg.model);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(args.discovery_wait_secs);
    while directory.peers_for(&address).is_empty() {
        if tokio::time::Instant::now() >= deadline {
            return Err(anyhow!(
                "no peer hosting {} discovered within {}s",
                cfg.model,
                args.discovery_wait_secs
            ));
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }

    let request = ChatRequest {
        model: cfg.model.clone(),
        messages: vec![ChatMessage::user(args.prompt)],
        stream: true,
    };
    let packets = client.send_message(request).await?;
    let chunks = completion_chunks(packets);
    futures::pin_mut!(chunks);

    while let Some(item) = chunks.next().await {
        let chunk = item?;
        if let Some(content) = chunk
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
        {
            print!("{content}");
            std::io::stdout().flush().ok();
        }
    }
    println!();
    Ok(())
}
