//! TOML-based settings for Noble Human.
//!
//! Settings are loaded from `~/.noble-human/settings.toml` (or the path given
//! with `--config` / `NOBLE_HUMAN_CONFIG`) with environment variable
//! interpolation support.
//!
//! # Usage
//!
//! ```rust,ignore
//! use noble_human::settings::SettingsManager;
//!
//! let manager = SettingsManager::new().await?;
//! let settings = manager.get();
//! println!("listening on {}:{}", settings.server.host, settings.server.port);
//! ```

pub mod loader;
pub mod schema;

pub use loader::{settings_path, SettingsManager};
pub use schema::{AiProvider, AiSettings, NobleSettings, DEFAULT_COMPLETION_MESSAGE};
