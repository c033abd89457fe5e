use std::{fs, io::ErrorKind, path::Path, time::Duration};

use anyhow::Context;
use console_core::transport::normalize_base_url;
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "console.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    pub stale_after_secs: Option<u64>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000/api/v1".into(),
            request_timeout_secs: 30,
            stale_after_secs: None,
            email: None,
            password: None,
            log_level: "info".into(),
        }
    }
}

impl Settings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn stale_after(&self) -> Option<Duration> {
        self.stale_after_secs.map(Duration::from_secs)
    }

    pub fn credentials(&self) -> anyhow::Result<(&str, &str)> {
        match (self.email.as_deref(), self.password.as_deref()) {
            (Some(email), Some(password)) => Ok((email, password)),
            _ => anyhow::bail!(
                "credentials missing: pass --email/--password or set TRIAGE_EMAIL/TRIAGE_PASSWORD"
            ),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    api_base_url: Option<String>,
    request_timeout_secs: Option<u64>,
    stale_after_secs: Option<u64>,
    email: Option<String>,
    password: Option<String>,
    log_level: Option<String>,
}

/// Command-line values that win over every other layer.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub api_url: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Defaults, then the config file, then the environment, then `overrides`.
///
/// An explicitly named config file must exist; the default one is optional.
pub fn load_settings(config_path: Option<&Path>, overrides: Overrides) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    let path = config_path.unwrap_or(Path::new(DEFAULT_CONFIG_FILE));
    match fs::read_to_string(path) {
        Ok(raw) => {
            apply_file(&mut settings, &raw)
                .with_context(|| format!("invalid config file '{}'", path.display()))?;
        }
        Err(err) if err.kind() == ErrorKind::NotFound && config_path.is_none() => {}
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read '{}'", path.display()));
        }
    }

    apply_env(&mut settings, |name| std::env::var(name).ok())?;
    apply_overrides(&mut settings, overrides);

    settings.api_base_url = normalize_base_url(&settings.api_base_url)?;
    Ok(settings)
}

fn apply_file(settings: &mut Settings, raw: &str) -> anyhow::Result<()> {
    let file_cfg: FileSettings = toml::from_str(raw)?;
    if let Some(v) = file_cfg.api_base_url {
        settings.api_base_url = v;
    }
    if let Some(v) = file_cfg.request_timeout_secs {
        settings.request_timeout_secs = v;
    }
    if let Some(v) = file_cfg.stale_after_secs {
        settings.stale_after_secs = Some(v);
    }
    if let Some(v) = file_cfg.email {
        settings.email = Some(v);
    }
    if let Some(v) = file_cfg.password {
        settings.password = Some(v);
    }
    if let Some(v) = file_cfg.log_level {
        settings.log_level = v;
    }
    Ok(())
}

fn apply_env(
    settings: &mut Settings,
    var: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<()> {
    if let Some(v) = var("TRIAGE_API_URL") {
        settings.api_base_url = v;
    }
    if let Some(v) = var("APP__API_BASE_URL") {
        settings.api_base_url = v;
    }

    if let Some(v) = var("APP__REQUEST_TIMEOUT_SECS") {
        settings.request_timeout_secs = v
            .trim()
            .parse()
            .with_context(|| format!("APP__REQUEST_TIMEOUT_SECS is not a number: {v}"))?;
    }
    if let Some(v) = var("APP__STALE_AFTER_SECS") {
        settings.stale_after_secs = Some(
            v.trim()
                .parse()
                .with_context(|| format!("APP__STALE_AFTER_SECS is not a number: {v}"))?,
        );
    }

    if let Some(v) = var("TRIAGE_EMAIL") {
        settings.email = Some(v);
    }
    if let Some(v) = var("TRIAGE_PASSWORD") {
        settings.password = Some(v);
    }

    if let Some(v) = var("APP__LOG_LEVEL") {
        settings.log_level = v;
    }
    Ok(())
}

fn apply_overrides(settings: &mut Settings, overrides: Overrides) {
    if let Some(v) = overrides.api_url {
        settings.api_base_url = v;
    }
    if let Some(v) = overrides.email {
        settings.email = Some(v);
    }
    if let Some(v) = overrides.password {
        settings.password = Some(v);
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
