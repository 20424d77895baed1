use super::check::check_fleet;
use anyhow::Context;
use clap::{Parser, Subcommand};
use log::info;
use ocrd_network::remote::{HostKeyPolicy, RemoteConnectionFactory};
use ocrd_network::ProcessingServerConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub(crate) struct Cli {
    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    pub(crate) log_level: Option<String>,

    #[command(subcommand)]
    pub(crate) command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Parse a processing server config and print what it deploys
    Validate {
        /// Path to the YAML config
        #[arg(long)]
        config: PathBuf,
    },

    /// Connect to every host of a config and verify shell and docker access
    Check {
        /// Path to the YAML config
        #[arg(long)]
        config: PathBuf,

        /// How to treat unknown ssh host keys: auto-add, trust-on-first-use or strict
        #[arg(long, default_value = "auto-add")]
        host_key_policy: HostKeyPolicy,

        /// Per-host deadline in seconds
        #[arg(long, default_value = "30")]
        timeout: u64,
    },
}

impl Cli {
    pub(crate) async fn run(&self) -> anyhow::Result<()> {
        match &self.command {
            Commands::Validate { config } => {
                let config = load(config)?;
                print_summary(&config);
                Ok(())
            }
            Commands::Check {
                config,
                host_key_policy,
                timeout,
            } => {
                let config = load(config)?;
                info!(
                    "Checking {} host(s) with host key policy {host_key_policy}",
                    config.hosts.len()
                );
                let factory = RemoteConnectionFactory::new(*host_key_policy);
                check_fleet(&factory, &config, Duration::from_secs(*timeout)).await
            }
        }
    }
}

fn load(path: &Path) -> anyhow::Result<ProcessingServerConfig> {
    ProcessingServerConfig::load(path)
        .with_context(|| format!("invalid processing server config {}", path.display()))
}

fn print_summary(config: &ProcessingServerConfig) {
    println!(
        "database: {}:{} (ssh as {})",
        config.mongo.address, config.mongo.port, config.mongo.ssh.username
    );
    println!(
        "process_queue: {}:{} (ssh as {})",
        config.queue.address, config.queue.port, config.queue.ssh.username
    );
    for host in &config.hosts {
        println!("host {} (ssh as {}):", host.address, host.username);
        for worker in &host.workers {
            println!(
                "  {} x{} [{}]",
                worker.name, worker.count, worker.deploy_type
            );
        }
    }
    println!(
        "{} host(s), {} worker instance(s)",
        config.hosts.len(),
        config.worker_count()
    );
}
