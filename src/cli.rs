// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "dispatchd", version, about = "A message-driven agent dispatcher")]
pub struct Cli {
    /// Explicit config file; overrides every discovered layer.
    #[arg(long, global = true, env = "DISPATCHD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace). Overridden by RUST_LOG.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the dispatcher: wires transports, the agent, and actions from
    /// config, then runs until Ctrl-C.
    Run,
    /// Print the fully merged configuration as YAML and exit.
    ShowConfig,
    /// Load and validate configuration without starting anything.
    Validate,
}
