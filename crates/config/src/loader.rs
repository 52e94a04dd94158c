use std::{
    path::{Path, PathBuf},
    sync::Mutex,
};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::RukunConfig};

/// Standard config file names, checked in order.
pub(crate) const CONFIG_FILENAMES: &[&str] =
    &["rukun.toml", "rukun.yaml", "rukun.yml", "rukun.json"];

static DATA_DIR_OVERRIDE: Mutex<Option<PathBuf>> = Mutex::new(None);

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<RukunConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./rukun.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/rukun/rukun.{toml,yaml,yml,json}` (user-global)
///
/// Returns `RukunConfig::default()` if no config file is found or the file
/// fails to parse. Environment overrides are applied in both cases.
pub fn discover_and_load() -> RukunConfig {
    let mut config = match find_config_file() {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            load_config(&path).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                RukunConfig::default()
            })
        },
        None => {
            debug!("no config file found, using defaults");
            RukunConfig::default()
        },
    };
    apply_env_overrides(&mut config);
    config
}

/// Find the first config file in standard locations.
pub(crate) fn find_config_file() -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(PathBuf::from)
        .chain(
            config_dir()
                .into_iter()
                .flat_map(|dir| CONFIG_FILENAMES.iter().map(move |n| dir.join(n))),
        )
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/rukun/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "rukun").map(|d| d.config_dir().to_path_buf())
}

/// Directory for runtime state (the SQLite database by default).
///
/// An explicit override from [`set_data_dir`] wins, then the platform data
/// directory, then `./.rukun`.
pub fn data_dir() -> PathBuf {
    let guard = DATA_DIR_OVERRIDE.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(dir) = guard.as_ref() {
        return dir.clone();
    }
    directories::ProjectDirs::from("", "", "rukun")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".rukun"))
}

/// Override the data directory (`--data-dir`).
pub fn set_data_dir(dir: PathBuf) {
    *DATA_DIR_OVERRIDE.lock().unwrap_or_else(|e| e.into_inner()) = Some(dir);
}

pub fn clear_data_dir() {
    *DATA_DIR_OVERRIDE.lock().unwrap_or_else(|e| e.into_inner()) = None;
}

/// Apply `RUKUN_*` environment overrides on top of file values.
pub fn apply_env_overrides(config: &mut RukunConfig) {
    apply_env_overrides_with(config, |name| std::env::var(name).ok());
}

pub(crate) fn apply_env_overrides_with(
    config: &mut RukunConfig,
    lookup: impl Fn(&str) -> Option<String>,
) {
    if let Some(path) = lookup("RUKUN_DATABASE_PATH") {
        config.database.path = Some(path);
    }
    if let Some(ms) = parse_override(&lookup, "RUKUN_WORKER_INTERVAL_MS") {
        config.notifications.worker_interval_ms = ms;
    }
    if let Some(n) = parse_override(&lookup, "RUKUN_WORKER_BATCH_SIZE") {
        config.notifications.batch_size = n;
    }
    if let Some(dir) = lookup("RUKUN_WA_AUTH_DIR") {
        config.channel.whatsapp.auth_dir = dir;
    }
    if let Some(dir) = lookup("RUKUN_WA_SIDECAR_DIR") {
        config.channel.whatsapp.sidecar_dir = dir;
    }
    if let Some(port) = parse_override(&lookup, "RUKUN_WA_SIDECAR_PORT") {
        config.channel.whatsapp.sidecar_port = port;
    }
}

fn parse_override<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(var = name, value = %raw, "ignoring unparseable environment override");
            None
        },
    }
}

pub(crate) fn parse_config(raw: &str, path: &Path) -> anyhow::Result<RukunConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, std::collections::HashMap};

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn loads_each_supported_format() {
        let dir = tempfile::tempdir().unwrap();

        let toml_path = dir.path().join("rukun.toml");
        std::fs::write(&toml_path, "[notifications]\nbatch_size = 20\n").unwrap();
        assert_eq!(load_config(&toml_path).unwrap().notifications.batch_size, 20);

        let yaml_path = dir.path().join("rukun.yaml");
        std::fs::write(&yaml_path, "channel:\n  session_name: rt-05\n").unwrap();
        assert_eq!(load_config(&yaml_path).unwrap().channel.session_name, "rt-05");

        let json_path = dir.path().join("rukun.json");
        std::fs::write(&json_path, r#"{"metrics":{"enabled":true}}"#).unwrap();
        assert!(load_config(&json_path).unwrap().metrics.enabled);
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rukun.ini");
        std::fs::write(&path, "x=1").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(&dir.path().join("rukun.toml")).is_err());
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let mut cfg = RukunConfig::default();
        apply_env_overrides_with(
            &mut cfg,
            env(&[
                ("RUKUN_DATABASE_PATH", "/tmp/portal.db"),
                ("RUKUN_WORKER_INTERVAL_MS", "2500"),
                ("RUKUN_WORKER_BATCH_SIZE", "7"),
                ("RUKUN_WA_AUTH_DIR", "/srv/wa"),
                ("RUKUN_WA_SIDECAR_DIR", "/opt/sidecar"),
                ("RUKUN_WA_SIDECAR_PORT", "4100"),
            ]),
        );
        assert_eq!(cfg.database.path.as_deref(), Some("/tmp/portal.db"));
        assert_eq!(cfg.notifications.worker_interval_ms, 2500);
        assert_eq!(cfg.notifications.batch_size, 7);
        assert_eq!(cfg.channel.whatsapp.auth_dir, "/srv/wa");
        assert_eq!(cfg.channel.whatsapp.sidecar_dir, "/opt/sidecar");
        assert_eq!(cfg.channel.whatsapp.sidecar_port, 4100);
    }

    #[test]
    fn unparseable_numeric_override_is_ignored() {
        let mut cfg = RukunConfig::default();
        apply_env_overrides_with(
            &mut cfg,
            env(&[
                ("RUKUN_WORKER_INTERVAL_MS", "soon"),
                ("RUKUN_WA_SIDECAR_PORT", "70000"),
            ]),
        );
        assert_eq!(cfg.notifications.worker_interval_ms, 15_000);
        assert_eq!(cfg.channel.whatsapp.sidecar_port, 3291);
    }

    #[test]
    fn data_dir_override_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        set_data_dir(dir.path().to_path_buf());
        assert_eq!(data_dir(), dir.path());
        assert_eq!(
            RukunConfig::default().database_path(),
            dir.path().join("rukun.db")
        );
        clear_data_dir();
        assert_ne!(data_dir(), dir.path());
    }
}
