//! Noble Human server and operator commands.
//!
//! ```bash
//! # Write ~/.noble-human/settings.toml with the defaults
//! noble-human init-config
//!
//! # Load exercises and create a user
//! noble-human seed exercises.json
//! noble-human create-user --email ada@example.com --admin
//!
//! # Run the HTTP server
//! ANTHROPIC_API_KEY=... noble-human serve --port 3000
//! ```

use anyhow::Result;
use clap::Parser;

use noble_human::cli::{init_tracing, run, Args};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_directive());
    run(args).await
}
