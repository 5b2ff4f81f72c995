//! Operator command-line interface.
//!
//! ```text
//! noble-human serve [--host H] [--port P]
//! noble-human seed <exercises.json>
//! noble-human create-user --email E [--admin] [--bio B]
//! noble-human init-config
//! ```
//!
//! `--config` (or `NOBLE_HUMAN_CONFIG`) selects the settings file and
//! `--verbose` raises the default log level to debug. `RUST_LOG` overrides
//! both.

mod args;
mod commands;

pub use args::{Args, Command};
pub use commands::{create_user, init_config, init_tracing, load_settings, open_store, run, seed, serve};
