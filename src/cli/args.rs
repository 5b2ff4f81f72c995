//! CLI argument parsing using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Noble Human - guided self-reflection exercises
#[derive(Parser, Debug, Clone)]
#[command(name = "noble-human")]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Settings file (default: ~/.noble-human/settings.toml)
    #[arg(short = 'c', long, global = true, env = "NOBLE_HUMAN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Database file, overriding the settings file (":memory:" for a throwaway store)
    #[arg(long, global = true, env = "NOBLE_HUMAN_DATABASE")]
    pub database: Option<String>,

    /// Show verbose output (debug information)
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the HTTP server
    Serve {
        /// Override the listen address from settings
        #[arg(long)]
        host: Option<String>,

        /// Override the port from settings (0 picks a free port)
        #[arg(short = 'p', long)]
        port: Option<u16>,
    },

    /// Load exercises from a JSON file, replacing exercises with the same id
    Seed {
        /// A JSON array of exercises, or `{ "exercises": [...] }`
        file: PathBuf,
    },

    /// Create a user and print its id (the session cookie value)
    CreateUser {
        #[arg(long)]
        email: String,

        /// Grant access to the admin endpoints
        #[arg(long)]
        admin: bool,

        /// Profile bio used to personalise conversations
        #[arg(long)]
        bio: Option<String>,
    },

    /// Write a settings file with the defaults, if none exists
    InitConfig,
}

impl Args {
    /// Default tracing directive for this invocation.
    pub fn log_directive(&self) -> &'static str {
        if self.verbose {
            "noble_human=debug"
        } else {
            "noble_human=info"
        }
    }
}
