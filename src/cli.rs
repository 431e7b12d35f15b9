//! Command-line interface definition for furlist-auth
//!
//! This module defines the CLI structure using clap's derive API.  The
//! commands drive the same client façade a browser front end would.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// furlist-auth - log in to an atproto PDS from the terminal
#[derive(Parser, Debug, Clone)]
#[command(name = "furlist-auth")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Directory for stored session state (overrides storage.path)
    #[arg(long, env = "FURLIST_STORAGE_PATH")]
    pub storage_path: Option<PathBuf>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Log in; leave out --host to use the default issuer
    Login {
        /// PDS host, bare (`my.pds.example`) or as a URL
        #[arg(long)]
        host: Option<String>,
    },

    /// Complete a login from the URL the browser was redirected to
    Callback {
        /// Full redirect URL, including its query string
        url: String,
    },

    /// Revoke and forget the current session
    Logout,

    /// Show the stored session and host preference
    Status,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/config.yaml".to_string()),
            verbose: false,
            storage_path: None,
            command: Commands::Status,
        }
    }
}
