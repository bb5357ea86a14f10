// CLI module - command-line argument parsing and handlers
//
// The gateway runs in the foreground; flags override the config file, and
// the `config` subcommand answers where configuration comes from.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{Config, VERSION};

/// CCProxy - Anthropic Messages gateway for alternative LLM backends
#[derive(Parser)]
#[command(name = "ccproxy")]
#[command(version = VERSION)]
#[command(about = "Translate Anthropic Messages API traffic to other LLM backends", long_about = None)]
pub struct Cli {
    /// Path to the config file (default: ~/.ccproxy/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the bind host
    #[arg(long)]
    pub host: Option<String>,

    /// Override the bind port
    #[arg(long)]
    pub port: Option<u16>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect configuration
    Config {
        /// Show the effective configuration summary
        #[arg(long)]
        show: bool,

        /// Show the config file search paths
        #[arg(long)]
        path: bool,
    },
}

/// Handle a subcommand. Returns true if one was handled (exit after).
pub fn handle_subcommand(cli: &Cli) -> bool {
    match &cli.command {
        Some(Commands::Config { show, path }) => {
            if *path {
                for candidate in Config::default_paths() {
                    let marker = if candidate.exists() { " (found)" } else { "" };
                    println!("{}{}", candidate.display(), marker);
                }
            } else if *show {
                match Config::load(cli.config.as_deref()) {
                    Ok(config) => print_summary(&config),
                    Err(e) => {
                        eprintln!("config error: {:#}", e);
                        std::process::exit(1);
                    }
                }
            } else {
                println!("Usage: ccproxy config [--show|--path]");
            }
            true
        }
        None => false,
    }
}

fn print_summary(config: &Config) {
    println!("bind: {}:{}", config.host, config.port);
    println!("api_key: {}", if config.api_key.is_some() { "set" } else { "not set (localhost only)" });
    println!(
        "timeout: {}s, body cap: {} bytes",
        config.performance.request_timeout_secs, config.performance.max_request_body_size
    );
    println!("providers:");
    let mut names: Vec<_> = config.providers.keys().collect();
    names.sort();
    for name in names {
        let provider = &config.providers[name];
        println!(
            "  {} -> {} [{}] ({} models{})",
            name,
            provider.base_url,
            provider.message_format.as_str(),
            provider.models.len(),
            if provider.enabled { "" } else { ", disabled" }
        );
    }
    println!(
        "routes: default={},{}",
        config.routes.default.provider, config.routes.default.model
    );
}
