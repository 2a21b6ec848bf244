use std::{
    collections::BTreeSet,
    env, fs,
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::{
    error::ConfigLoadError,
    models::{Settings, SettingsSource},
};

/// Outcome of [`load_settings`].
#[derive(Debug, Clone)]
pub struct SettingsLoad {
    /// Validated settings with environment overrides applied.
    pub settings: Settings,
    /// Where the base settings came from.
    pub source: SettingsSource,
    /// Whether a `.env` file was found and loaded.
    pub env_file_loaded: bool,
}

/// Loads settings for the running process.
///
/// Evaluation order:
/// 1) `$OCTOPOES_CONFIG_PATH` (TOML or JSON file),
/// 2) `$OCTOPOES_CONFIG_JSON` (inline JSON),
/// 3) `octopoes.toml` / `config/octopoes.toml` when present,
/// 4) defaults.
///
/// Individual environment variables are applied on top, then the result is
/// validated. A `.env` file in the working directory is honoured.
pub fn load_settings() -> Result<SettingsLoad, ConfigLoadError> {
    let env_file_loaded = dotenvy::dotenv().is_ok();
    let lookup = |key: &str| env::var(key).ok();

    let (mut settings, source) = load_base(&lookup)?;
    apply_env_overrides(&mut settings, &lookup)?;
    settings.validate()?;

    debug!(?source, "settings resolved");
    Ok(SettingsLoad {
        settings,
        source,
        env_file_loaded,
    })
}

/// Base settings from the first available source, before environment
/// overrides.
pub fn load_base<F>(
    lookup: &F,
) -> Result<(Settings, SettingsSource), ConfigLoadError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path_str) = lookup("OCTOPOES_CONFIG_PATH")
        && !path_str.trim().is_empty()
    {
        let path = PathBuf::from(path_str);
        let settings = load_from_file(&path)?;
        return Ok((settings, SettingsSource::EnvPath(path)));
    }

    if let Some(raw) = lookup("OCTOPOES_CONFIG_JSON")
        && !raw.trim().is_empty()
    {
        let settings = parse_json(&raw, "OCTOPOES_CONFIG_JSON")?;
        return Ok((settings, SettingsSource::EnvInline));
    }

    if let Some(path) = find_default_file() {
        let settings = load_from_file(&path)?;
        return Ok((settings, SettingsSource::File(path)));
    }

    Ok((Settings::default(), SettingsSource::Default))
}

/// Reads a TOML or JSON file, chosen by extension.
pub fn load_from_file(path: &Path) -> Result<Settings, ConfigLoadError> {
    let contents =
        fs::read_to_string(path).map_err(|source| ConfigLoadError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    let origin = path.display().to_string();

    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => parse_json(&contents, &origin),
        Some("toml") => {
            toml::from_str(&contents).map_err(|err| ConfigLoadError::Parse {
                origin,
                message: err.to_string(),
            })
        }
        _ => parse_from_str(&contents, &origin),
    }
}

/// Parses settings of unknown format.
pub fn parse_from_str(
    contents: &str,
    origin: &str,
) -> Result<Settings, ConfigLoadError> {
    // Try TOML first, then JSON.
    toml::from_str(contents).or_else(|toml_err| {
        serde_json::from_str(contents).map_err(|json_err| {
            ConfigLoadError::Parse {
                origin: origin.to_string(),
                message: format!(
                    "toml error: {toml_err}; json error: {json_err}"
                ),
            }
        })
    })
}

/// Parses JSON settings; `origin` names the source in errors.
pub fn parse_json(raw: &str, origin: &str) -> Result<Settings, ConfigLoadError> {
    serde_json::from_str(raw).map_err(|err| ConfigLoadError::Parse {
        origin: origin.to_string(),
        message: err.to_string(),
    })
}

fn find_default_file() -> Option<PathBuf> {
    const CANDIDATES: &[&str] = &[
        "octopoes.toml",
        "octopoes.json",
        "config/octopoes.toml",
        "config/octopoes.json",
    ];

    CANDIDATES
        .iter()
        .map(Path::new)
        .find(|path| path.exists())
        .map(|path| path.to_path_buf())
}

/// Applies single-value environment overrides on top of `settings`.
pub fn apply_env_overrides<F>(
    settings: &mut Settings,
    lookup: &F,
) -> Result<(), ConfigLoadError>
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(url) = non_empty("XTDB_URI") {
        settings.xtdb.url = url;
    }
    if let Some(client) = non_empty("XTDB_CLIENT") {
        settings.xtdb.client = client;
    }
    if let Some(url) = non_empty("QUEUE_URI") {
        settings.broker.url = url;
    }
    if let Some(queue) = non_empty("EVENT_QUEUE") {
        settings.broker.event_queue = queue;
    }
    if let Some(raw) = non_empty("EVENT_BATCH_SIZE") {
        settings.broker.batch_size = raw.trim().parse().map_err(|err| {
            ConfigLoadError::InvalidEnv {
                key: "EVENT_BATCH_SIZE",
                message: format!("{err}"),
            }
        })?;
    }
    if let Some(raw) = non_empty("EVENT_FLUSH_INTERVAL") {
        let interval = humantime::parse_duration(raw.trim()).map_err(|err| {
            ConfigLoadError::InvalidEnv {
                key: "EVENT_FLUSH_INTERVAL",
                message: err.to_string(),
            }
        })?;
        settings.broker.flush_interval_ms =
            u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
    }
    if let Some(raw) = non_empty("BITS_ENABLED") {
        settings.bits.enabled = split_list(&raw);
    }
    if let Some(raw) = non_empty("BITS_DISABLED") {
        settings.bits.disabled = split_list(&raw);
    }
    if let Some(filter) = non_empty("OCTOPOES_LOG") {
        settings.log_filter = filter;
    }

    Ok(())
}

fn split_list(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(
        pairs: &[(&str, &str)],
    ) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn env_overrides_replace_individual_fields() {
        let mut settings = Settings::default();
        let lookup = lookup_from(&[
            ("XTDB_URI", "http://xtdb:3000"),
            ("EVENT_BATCH_SIZE", "10"),
            ("EVENT_FLUSH_INTERVAL", "250ms"),
            ("BITS_DISABLED", "dns-resolving, port-classification-ip"),
            ("BITS_ENABLED", ""),
        ]);

        apply_env_overrides(&mut settings, &lookup).unwrap();

        assert_eq!(settings.xtdb.url, "http://xtdb:3000");
        assert_eq!(settings.broker.batch_size, 10);
        assert_eq!(settings.broker.flush_interval_ms, 250);
        assert_eq!(settings.bits.disabled.len(), 2);
        assert!(settings.bits.enabled.is_empty());
    }

    #[test]
    fn bad_numbers_name_the_variable() {
        let mut settings = Settings::default();
        let lookup = lookup_from(&[("EVENT_BATCH_SIZE", "lots")]);
        let err = apply_env_overrides(&mut settings, &lookup).unwrap_err();
        assert!(matches!(
            err,
            ConfigLoadError::InvalidEnv {
                key: "EVENT_BATCH_SIZE",
                ..
            }
        ));
    }

    #[test]
    fn inline_json_is_used_when_no_path_is_set() {
        let lookup = lookup_from(&[(
            "OCTOPOES_CONFIG_JSON",
            r#"{"broker": {"batch_size": 3}}"#,
        )]);
        let (settings, source) = load_base(&lookup).unwrap();
        assert_eq!(source, SettingsSource::EnvInline);
        assert_eq!(settings.broker.batch_size, 3);
        assert_eq!(settings.broker.event_queue, "octopoes");
    }

    #[test]
    fn parse_from_str_accepts_json_fallback() {
        let settings =
            parse_from_str(r#"{"log_filter": "debug"}"#, "inline").unwrap();
        assert_eq!(settings.log_filter, "debug");
    }
}
