// CCProxy - local gateway between the Anthropic Messages API and other
// LLM backends
//
// Claude Code speaks the Anthropic wire format; ccproxy accepts that
// traffic, routes each request to a configured provider, translates the
// request and response (including SSE streams) between formats, and
// relays the result.
//
// Architecture:
// - config: layered TOML + env configuration, realized once at startup
// - router: (model, token count, thinking) -> (provider, upstream model)
// - registry: copy-on-write provider store, mutable via admin endpoints
// - transform: per-provider format conversion chains
// - proxy: the axum server, dispatch, auth, and resilience pieces

mod cli;
mod config;
mod error;
mod logging;
mod proxy;
mod registry;
mod router;
mod sse;
mod token_count;
mod transform;

use anyhow::Result;
use clap::Parser;

use cli::Cli;
use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    if cli::handle_subcommand(&args) {
        return Ok(());
    }

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    let _log_guard = logging::init(&config.log)?;
    tracing::info!(version = config::VERSION, "starting ccproxy");

    proxy::run(config).await
}
