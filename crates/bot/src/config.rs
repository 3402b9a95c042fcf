use std::{
    env, fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context};
use bot_api::CatalogEntry;
use config::{builder::DefaultState, Config, ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use shared::error::DEFAULT_ERROR_TEXT;

pub const CONFIG_FILE: &str = "bot.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub telegram_token: String,
    pub telegram_api_url: String,
    pub database_url: String,
    pub images_dir: PathBuf,
    /// Program and leading arguments of the external renderer.
    pub render_command: Vec<String>,
    pub workers: Option<usize>,
    pub poll_timeout_secs: u64,
    pub restart_delay_secs: u64,
    pub error_text: String,
    pub health_bind: Option<String>,
    pub log_filter: String,
    /// Replaces the built-in transform rows when set.
    pub catalog: Option<Vec<Vec<CatalogEntry>>>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            telegram_token: String::new(),
            telegram_api_url: "https://api.telegram.org".into(),
            database_url: "sqlite://./data/bot.db".into(),
            images_dir: PathBuf::from("./images"),
            render_command: Vec::new(),
            workers: None,
            poll_timeout_secs: 30,
            restart_delay_secs: 15,
            error_text: DEFAULT_ERROR_TEXT.into(),
            health_bind: None,
            log_filter: "info".into(),
            catalog: None,
        }
    }
}

impl Settings {
    pub fn worker_count(&self) -> usize {
        self.workers
            .filter(|&workers| workers > 0)
            .unwrap_or_else(cpu_count)
    }
}

pub fn cpu_count() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

/// Defaults, then `bot.toml`, then `TELEGRAM_TOKEN` / `DATABASE_URL`, then
/// `APP__*` variables.
pub fn load_settings() -> anyhow::Result<Settings> {
    load_settings_from(Path::new(CONFIG_FILE))
}

pub(crate) fn load_settings_from(path: &Path) -> anyhow::Result<Settings> {
    let mut builder = Config::builder()
        .add_source(Config::try_from(&Settings::default())?)
        .add_source(File::from(path).required(false))
        .add_source(
            Environment::with_prefix("APP")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .list_separator(" ")
                .with_list_parse_key("render_command"),
        );
    builder = legacy_override(builder, "telegram_token", "TELEGRAM_TOKEN")?;
    builder = legacy_override(builder, "database_url", "DATABASE_URL")?;

    let settings: Settings = builder
        .build()?
        .try_deserialize()
        .with_context(|| format!("invalid configuration in '{}'", path.display()))?;

    if settings.telegram_token.trim().is_empty() {
        bail!("telegram_token is not configured; set APP__TELEGRAM_TOKEN or TELEGRAM_TOKEN");
    }
    Ok(settings)
}

// The APP__ form of a key wins over its plain variable.
fn legacy_override(
    builder: ConfigBuilder<DefaultState>,
    key: &str,
    var: &str,
) -> anyhow::Result<ConfigBuilder<DefaultState>> {
    let prefixed = format!("APP__{}", key.to_ascii_uppercase());
    if env::var_os(&prefixed).is_some() {
        return Ok(builder);
    }
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(builder.set_override(key, value)?),
        _ => Ok(builder),
    }
}

/// Normalizes the configured URL and creates the database directory.
pub fn prepare_database_url(raw: &str) -> anyhow::Result<String> {
    let database_url = normalize_database_url(raw);
    if let Some(path) = sqlite_file_path(&database_url) {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory '{}'", parent.display())
            })?;
        }
    }
    Ok(database_url)
}

pub(crate) fn normalize_database_url(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return Settings::default().database_url;
    }
    if raw.starts_with("sqlite::memory:") {
        return raw.to_string();
    }
    if let Some(rest) = raw.strip_prefix("sqlite://") {
        let rest = rest.replace('\\', "/");
        if has_drive_prefix(&rest) {
            return format!("sqlite:{rest}");
        }
        return format!("sqlite://{rest}");
    }
    if let Some(rest) = raw.strip_prefix("sqlite:") {
        let rest = rest.replace('\\', "/");
        if has_drive_prefix(&rest) {
            return format!("sqlite:{rest}");
        }
        return format!("sqlite://{rest}");
    }
    if raw.contains("://") {
        return raw.to_string();
    }
    let path = raw.replace('\\', "/");
    if has_drive_prefix(&path) {
        format!("sqlite:{path}")
    } else {
        format!("sqlite://{path}")
    }
}

fn sqlite_file_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") {
        return None;
    }
    let rest = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next().unwrap_or_default();
    (!path.is_empty()).then(|| PathBuf::from(path))
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
