//! Operator commands: bootstrap, serve, seed, create-user, init-config.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use super::args::{Args, Command};
use crate::content::{Exercise, User, UserData};
use crate::error::NobleError;
use crate::llm::create_llm;
use crate::server::start_server;
use crate::settings::{NobleSettings, SettingsManager};
use crate::store::{Repository, SqliteStore};

/// Initialise logging. Safe to call more than once.
pub fn init_tracing(directive: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(directive));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Load `.env`, then the settings file.
pub async fn load_settings(args: &Args) -> Result<SettingsManager> {
    if let Err(e) = dotenvy::dotenv() {
        // Only warn on errors other than file not found
        if !matches!(e, dotenvy::Error::Io(_)) {
            tracing::warn!("Failed to load .env file: {}", e);
        }
    }

    let manager = match &args.config {
        Some(path) => SettingsManager::with_path(path.clone()).await,
        None => SettingsManager::new().await,
    }
    .context("Failed to load settings")?;
    Ok(manager)
}

/// Open the store named by the settings, or by `--database`.
pub fn open_store(settings: &NobleSettings, database: Option<&str>) -> Result<Arc<SqliteStore>> {
    let path = match database {
        Some(path) => PathBuf::from(path),
        None => settings.database.resolved_path(),
    };
    let store = SqliteStore::open(&path)
        .with_context(|| format!("Failed to open database at {}", path.display()))?;
    tracing::debug!("Opened database at {}", path.display());
    Ok(Arc::new(store))
}

/// Run the parsed command.
pub async fn run(args: Args) -> Result<()> {
    let manager = load_settings(&args).await?;

    if args.command == Command::InitConfig {
        return init_config(&manager).await;
    }

    let settings = manager.get().clone();
    let store = open_store(&settings, args.database.as_deref())?;

    match args.command {
        Command::Serve { host, port } => serve(settings, store, host, port).await,
        Command::Seed { file } => {
            let count = seed(store.as_ref(), &file).await?;
            println!("Seeded {} exercise(s) from {}", count, file.display());
            Ok(())
        }
        Command::CreateUser { email, admin, bio } => {
            let user = create_user(store.as_ref(), &email, admin, bio).await?;
            println!("{}", user.id);
            Ok(())
        }
        Command::InitConfig => Ok(()),
    }
}

/// Serve until Ctrl-C.
pub async fn serve(
    mut settings: NobleSettings,
    store: Arc<SqliteStore>,
    host: Option<String>,
    port: Option<u16>,
) -> Result<()> {
    if let Some(host) = host {
        settings.server.host = host;
    }
    if let Some(port) = port {
        settings.server.port = port;
    }

    let llm = create_llm(&settings.ai).context("Failed to configure the language model")?;
    let (addr, shutdown) = start_server(&settings, store, llm).await?;
    println!("Listening on http://{}", addr);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutting down");
    shutdown.cancel();
    Ok(())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SeedFile {
    List(Vec<Exercise>),
    Wrapped { exercises: Vec<Exercise> },
}

/// Load exercises from a JSON file. Every exercise is validated before any
/// is written.
pub async fn seed(repo: &dyn Repository, path: &Path) -> Result<usize> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let parsed: SeedFile = serde_json::from_str(&contents)
        .with_context(|| format!("{} is not a list of exercises", path.display()))?;
    let mut exercises = match parsed {
        SeedFile::List(exercises) | SeedFile::Wrapped { exercises } => exercises,
    };

    for exercise in &mut exercises {
        exercise.normalize();
        exercise
            .validate()
            .with_context(|| format!("Invalid exercise '{}'", exercise.id))?;
    }
    for exercise in &exercises {
        repo.save_exercise(exercise).await?;
        tracing::info!(exercise_id = %exercise.id, steps = exercise.steps.len(), "Seeded exercise");
    }
    Ok(exercises.len())
}

pub async fn create_user(
    repo: &dyn Repository,
    email: &str,
    admin: bool,
    bio: Option<String>,
) -> Result<User> {
    let email = email.trim();
    if email.is_empty() || !email.contains('@') {
        bail!("'{}' is not an email address", email);
    }
    let data = UserData {
        bio: bio.unwrap_or_default(),
        urls: Vec::new(),
    };

    match repo.create_user(email, admin, &data).await {
        Ok(user) => {
            tracing::info!(user_id = %user.id, admin, "Created user");
            Ok(user)
        }
        Err(NobleError::Conflict(_)) => bail!("A user with email '{}' already exists", email),
        Err(e) => Err(e.into()),
    }
}

pub async fn init_config(manager: &SettingsManager) -> Result<()> {
    if manager.ensure_settings_file().await? {
        println!("Wrote default settings to {}", manager.path().display());
    } else {
        println!("Settings already exist at {}", manager.path().display());
    }
    Ok(())
}
