// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use dispatch_actions::{ActionRegistry, ReadFileAction, WriteFileAction, ShellAction};
use dispatch_agents::EchoAgent;
use dispatch_config::Config;
use dispatch_core::{Agent, Dispatcher, DispatcherOptions, Transport};
use dispatch_store::SqliteStore;
use dispatch_transports::StdioTransport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::ShowConfig) => {
            let config = dispatch_config::load(cli.config.as_deref())?;
            println!("{}", serde_yaml::to_string(&config)?);
            return Ok(());
        }
        Some(Commands::Validate) => {
            let config = dispatch_config::load(cli.config.as_deref())?;
            init_logging(cli.verbose, &config.logging.level);
            tracing::info!("configuration is valid");
            return Ok(());
        }
        Some(Commands::Run) | None => {
            let config = dispatch_config::load(cli.config.as_deref())?;
            init_logging(cli.verbose, &config.logging.level);
            run(config).await
        }
    }
}

fn init_logging(verbosity: u8, configured_level: &str) {
    let fallback = match verbosity {
        0 => configured_level.to_string(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init();
}

async fn run(config: Config) -> anyhow::Result<()> {
    let store: Option<Arc<dyn dispatch_core::Store>> = if config.store.path.is_empty() {
        None
    } else {
        let store = SqliteStore::open(PathBuf::from(&config.store.path))
            .with_context(|| format!("opening store at {}", config.store.path))?
            .with_audit_cap(config.store.audit_cap);
        Some(Arc::new(store))
    };

    let mut registry = ActionRegistry::new();
    if let Some(shell) = &config.actions.shell {
        registry
            .register(Arc::new(ShellAction::new(
                shell.allowed.clone(),
                shell.workdir.clone().map(PathBuf::from),
                Duration::from_secs(shell.timeout_secs),
                shell.max_output,
            )))
            .context("registering shell action")?;
    }
    if let Some(read_file) = &config.actions.read_file {
        registry
            .register(Arc::new(ReadFileAction::new(
                read_file.roots.iter().map(PathBuf::from).collect(),
                read_file.max_bytes,
                read_file.default_limit,
            )))
            .context("registering read_file action")?;
    }
    if let Some(write_file) = &config.actions.write_file {
        registry
            .register(Arc::new(WriteFileAction::new(
                write_file.roots.iter().map(PathBuf::from).collect(),
                write_file.max_bytes,
                write_file.allow_write,
            )))
            .context("registering write_file action")?;
    }
    let actions = Arc::new(registry);

    let agent: Arc<dyn Agent> = match config.agent.kind.as_str() {
        "echo" => match &config.agent.sticky_session {
            Some(id) => Arc::new(EchoAgent::with_sticky_session(id.clone())),
            None => Arc::new(EchoAgent::new()),
        },
        other => anyhow::bail!("unknown agent kind: {other}"),
    };

    let mut transports: Vec<Arc<dyn Transport>> = Vec::new();
    for spec in &config.transports {
        match spec.kind.as_str() {
            "stdio" => {
                let id = if spec.id.is_empty() { "stdio".to_string() } else { spec.id.clone() };
                transports.push(Arc::new(StdioTransport::new(id)));
            }
            "mock" => {
                tracing::warn!("skipping mock transport: test-only, not usable from config");
            }
            other => anyhow::bail!("unknown transport kind: {other}"),
        }
    }
    if transports.is_empty() {
        tracing::warn!("no transports configured, defaulting to stdio");
        transports.push(Arc::new(StdioTransport::new("stdio")));
    }

    let options = DispatcherOptions {
        req_timeout: Duration::from_secs(config.dispatcher.req_timeout_secs),
        action_timeout: Duration::from_secs(config.dispatcher.action_timeout_secs),
        allowed_actions: config.dispatcher.allowed_actions.iter().cloned().collect::<HashSet<_>>(),
        allowed_senders: HashSet::new(),
        audit_sink: None,
        store,
        session_timeout: Duration::from_secs(config.dispatcher.session_timeout_mins * 60),
        initial_prompt: config.dispatcher.initial_prompt.clone(),
        max_reply_chars: config.dispatcher.max_reply_chars,
    }
    .with_allowed_senders(config.dispatcher.allowed_senders.clone());

    let dispatcher = Dispatcher::new(transports, agent, actions, options);

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
        shutdown.cancel();
    });

    dispatcher.start(cancel).await
}
