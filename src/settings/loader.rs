//! Loading `settings.toml` and resolving environment references.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::schema::{data_dir, NobleSettings};

/// Header written above generated settings files.
const TEMPLATE_HEADER: &str = "\
# Noble Human settings
#
# String values may reference environment variables as $VAR or ${VAR}.
# The chat persona and exercise-completed templates are edited from the
# admin settings page and stored in the database, not here.

";

/// Environment variables consulted when no API key is configured.
const API_KEY_VARS: &[&str] = &["ANTHROPIC_API_KEY"];

/// `~/.noble-human/settings.toml`
pub fn settings_path() -> PathBuf {
    data_dir().join("settings.toml")
}

/// Settings loaded from one file, with environment references resolved.
pub struct SettingsManager {
    settings: NobleSettings,
    path: PathBuf,
}

impl SettingsManager {
    /// Load from the default location.
    pub async fn new() -> Result<Self> {
        Self::with_path(settings_path()).await
    }

    /// Load from a specific file. A missing file yields defaults.
    pub async fn with_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut settings = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read settings file {:?}", path))?;
            let settings: NobleSettings =
                toml::from_str(&contents).context("Failed to deserialize settings")?;
            tracing::info!("Loaded settings from {:?}", path);
            settings
        } else {
            tracing::debug!("Settings file not found at {:?}, using defaults", path);
            NobleSettings::default()
        };
        resolve_env_vars(&mut settings);

        Ok(Self { settings, path })
    }

    pub fn get(&self) -> &NobleSettings {
        &self.settings
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the defaults if no file exists yet. Returns `true` if a file
    /// was created.
    pub async fn ensure_settings_file(&self) -> Result<bool> {
        if self.path.exists() {
            return Ok(false);
        }

        let defaults = toml::to_string_pretty(&NobleSettings::default())
            .context("Failed to serialize default settings")?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }
        // Write to a temp file, then rename over the target
        let temp_path = self.path.with_extension("toml.tmp");
        tokio::fs::write(&temp_path, format!("{}{}", TEMPLATE_HEADER, defaults)).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;

        tracing::info!("Generated settings file at {:?}", self.path);
        Ok(true)
    }
}

fn resolve_env_vars(settings: &mut NobleSettings) {
    let strings = [
        &mut settings.server.host,
        &mut settings.server.session_cookie,
        &mut settings.ai.model,
        &mut settings.prompts.persona,
        &mut settings.prompts.completion_fallback,
    ];
    for value in strings {
        if let Some(resolved) = resolve_env_ref(value) {
            *value = resolved;
        }
    }

    let optionals = [
        &mut settings.database.path,
        &mut settings.ai.api_key,
        &mut settings.ai.base_url,
    ];
    for value in optionals {
        if let Some(v) = value.as_deref() {
            if is_env_ref(v) {
                // An unresolved reference is treated as unset
                *value = resolve_env_ref(v);
            }
        }
    }

    if settings.ai.api_key.as_deref().map_or(true, str::is_empty) {
        settings.ai.api_key = first_env_var(API_KEY_VARS);
    }
}

fn is_env_ref(value: &str) -> bool {
    value.trim().starts_with('$')
}

/// Resolve a `$VAR` or `${VAR}` reference. `None` if the value is not a
/// reference or the variable is unset.
fn resolve_env_ref(value: &str) -> Option<String> {
    let trimmed = value.trim();
    let name = trimmed.strip_prefix('$')?;
    let name = name
        .strip_prefix('{')
        .and_then(|n| n.strip_suffix('}'))
        .unwrap_or(name);
    std::env::var(name).ok()
}

fn first_env_var(names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::schema::AiProvider;

    #[test]
    fn test_resolve_env_ref_formats() {
        std::env::set_var("NH_TEST_VAR_1", "test_value_1");

        assert_eq!(resolve_env_ref("$NH_TEST_VAR_1"), Some("test_value_1".to_string()));
        assert_eq!(resolve_env_ref("${NH_TEST_VAR_1}"), Some("test_value_1".to_string()));
        assert_eq!(resolve_env_ref(" $NH_TEST_VAR_1 "), Some("test_value_1".to_string()));

        std::env::remove_var("NH_TEST_VAR_1");
    }

    #[test]
    fn test_resolve_env_ref_no_match() {
        assert_eq!(resolve_env_ref("regular_value"), None);
        assert_eq!(resolve_env_ref("$NONEXISTENT_VAR_XYZ_12345"), None);
    }

    #[test]
    fn test_first_env_var_skips_unset_and_empty() {
        std::env::set_var("NH_EMPTY_SETTING_TEST", "");
        std::env::set_var("NH_FULL_SETTING_TEST", "from_env");

        assert_eq!(
            first_env_var(&["NH_UNSET_SETTING_TEST", "NH_EMPTY_SETTING_TEST", "NH_FULL_SETTING_TEST"]),
            Some("from_env".to_string())
        );
        assert_eq!(first_env_var(&["NH_UNSET_SETTING_TEST"]), None);

        std::env::remove_var("NH_EMPTY_SETTING_TEST");
        std::env::remove_var("NH_FULL_SETTING_TEST");
    }

    #[tokio::test]
    async fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SettingsManager::with_path(dir.path().join("settings.toml"))
            .await
            .unwrap();

        assert_eq!(manager.get().server.port, 3000);
        assert!(!manager.path().exists());
    }

    #[tokio::test]
    async fn test_load_resolves_env_references() {
        std::env::set_var("NH_TEST_DB_PATH", "/tmp/nh-test.db");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        tokio::fs::write(
            &path,
            "[database]\npath = \"${NH_TEST_DB_PATH}\"\n\n[ai]\nprovider = \"none\"\nbase_url = \"$NH_UNSET_URL_98765\"\n",
        )
        .await
        .unwrap();

        let manager = SettingsManager::with_path(&path).await.unwrap();
        let settings = manager.get();
        assert_eq!(settings.database.path.as_deref(), Some("/tmp/nh-test.db"));
        assert_eq!(settings.ai.provider, AiProvider::None);
        assert_eq!(settings.ai.base_url, None);

        std::env::remove_var("NH_TEST_DB_PATH");
    }

    #[tokio::test]
    async fn test_ensure_settings_file_writes_parseable_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.toml");
        let manager = SettingsManager::with_path(&path).await.unwrap();

        assert!(manager.ensure_settings_file().await.unwrap());
        assert!(!manager.ensure_settings_file().await.unwrap());
        assert!(!path.with_extension("toml.tmp").exists());

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(contents.starts_with("# Noble Human settings"));
        let parsed: NobleSettings = toml::from_str(&contents).unwrap();
        assert_eq!(parsed, NobleSettings::default());
    }
}
