//! Configuration validation engine.
//!
//! Checks a config file against the known schema, flags unknown or
//! misspelled keys, and reports settings that would make the delivery
//! worker or the channel session misbehave.

use std::{
    collections::HashMap,
    net::SocketAddr,
    path::{Path, PathBuf},
};

use crate::schema::{MAX_BATCH_SIZE, MIN_BATCH_SIZE, RukunConfig};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "syntax", "unknown-field", "type-error", "range", "worker"
    pub category: &'static str,
    /// Dotted path, e.g. "channel.reconnect.max_delay_ms"
    pub path: String,
    pub message: String,
}

/// Result of validating a configuration file.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

// ── Schema tree for unknown-field detection ─────────────────────────────────

enum KnownKeys {
    Struct(HashMap<&'static str, KnownKeys>),
    Leaf,
}

/// Mirror of every field in `schema.rs`.
fn build_schema_map() -> KnownKeys {
    use KnownKeys::{Leaf, Struct};

    let reconnect = Struct(HashMap::from([
        ("initial_delay_ms", Leaf),
        ("max_delay_ms", Leaf),
        ("check_interval_ms", Leaf),
    ]));

    let whatsapp = Struct(HashMap::from([
        ("auth_dir", Leaf),
        ("sidecar_dir", Leaf),
        ("sidecar_port", Leaf),
        ("auto_start_sidecar", Leaf),
    ]));

    Struct(HashMap::from([
        ("database", Struct(HashMap::from([("path", Leaf)]))),
        (
            "notifications",
            Struct(HashMap::from([
                ("enabled", Leaf),
                ("worker_interval_ms", Leaf),
                ("batch_size", Leaf),
            ])),
        ),
        (
            "channel",
            Struct(HashMap::from([
                ("session_name", Leaf),
                ("send_timeout_secs", Leaf),
                ("handshake_timeout_secs", Leaf),
                ("reconnect", reconnect),
                ("whatsapp", whatsapp),
            ])),
        ),
        (
            "metrics",
            Struct(HashMap::from([("enabled", Leaf), ("listen", Leaf)])),
        ),
    ]))
}

// ── Levenshtein distance ────────────────────────────────────────────────────

fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_chars.len()]
}

/// Closest candidate within `max_distance` edits, if any.
fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    candidates
        .iter()
        .map(|&c| (c, levenshtein(needle, c)))
        .filter(|&(_, d)| d > 0 && d <= max_distance)
        .min_by_key(|&(_, d)| d)
        .map(|(c, _)| c)
}

// ── Core validation ─────────────────────────────────────────────────────────

/// Validate a config file at the given path, or the discovered config file
/// when `path` is `None`.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let config_path = path
        .map(Path::to_path_buf)
        .or_else(crate::loader::find_config_file);

    let Some(actual_path) = config_path else {
        return ValidationResult {
            diagnostics: vec![Diagnostic {
                severity: Severity::Info,
                category: "syntax",
                path: String::new(),
                message: "no config file found; using defaults".into(),
            }],
            config_path: None,
        };
    };

    let ext = actual_path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("toml")
        .to_string();

    let mut result = match std::fs::read_to_string(&actual_path) {
        Ok(content) => validate_str(&content, &ext),
        Err(e) => ValidationResult {
            diagnostics: vec![Diagnostic {
                severity: Severity::Error,
                category: "syntax",
                path: String::new(),
                message: format!("failed to read config file: {e}"),
            }],
            config_path: None,
        },
    };
    result.config_path = Some(actual_path);
    result
}

/// Validate a TOML document without touching the file system.
#[must_use]
pub fn validate_toml_str(toml_str: &str) -> ValidationResult {
    validate_str(toml_str, "toml")
}

fn validate_str(raw: &str, ext: &str) -> ValidationResult {
    let mut diagnostics = Vec::new();

    // Every format is parsed into a toml::Value so one walker covers all.
    let parsed: Result<toml::Value, String> = match ext {
        "toml" => toml::from_str(raw).map_err(|e| e.to_string()),
        "yaml" | "yml" => serde_yaml::from_str(raw).map_err(|e| e.to_string()),
        "json" => serde_json::from_str(raw).map_err(|e| e.to_string()),
        other => Err(format!("unsupported config format: .{other}")),
    };

    let value = match parsed {
        // An empty YAML document parses as null, which toml::Value rejects.
        Err(_) if raw.trim().is_empty() => toml::Value::Table(toml::map::Map::new()),
        Ok(v) => v,
        Err(e) => {
            diagnostics.push(Diagnostic {
                severity: Severity::Error,
                category: "syntax",
                path: String::new(),
                message: format!("syntax error: {e}"),
            });
            return ValidationResult {
                diagnostics,
                config_path: None,
            };
        },
    };

    check_unknown_fields(&value, &build_schema_map(), "", &mut diagnostics);

    match value.try_into::<RukunConfig>() {
        Ok(config) => check_semantics(&config, &mut diagnostics),
        Err(e) => diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "type-error",
            path: String::new(),
            message: format!("type error: {e}"),
        }),
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

fn check_unknown_fields(
    value: &toml::Value,
    schema: &KnownKeys,
    prefix: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let (toml::Value::Table(table), KnownKeys::Struct(fields)) = (value, schema) else {
        return;
    };
    let known: Vec<&str> = fields.keys().copied().collect();

    for (key, child) in table {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        if let Some(child_schema) = fields.get(key.as_str()) {
            check_unknown_fields(child, child_schema, &path, diagnostics);
            continue;
        }
        let message = match suggest(key, &known, 3) {
            Some(s) => format!("unknown field (did you mean \"{s}\"?)"),
            None => "unknown field".to_string(),
        };
        diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "unknown-field",
            path,
            message,
        });
    }
}

fn check_semantics(config: &RukunConfig, diagnostics: &mut Vec<Diagnostic>) {
    let mut push = |severity, category, path: &str, message: String| {
        diagnostics.push(Diagnostic {
            severity,
            category,
            path: path.into(),
            message,
        });
    };

    let n = &config.notifications;
    if !(MIN_BATCH_SIZE..=MAX_BATCH_SIZE).contains(&n.batch_size) {
        push(
            Severity::Warning,
            "range",
            "notifications.batch_size",
            format!(
                "batch_size {} is outside {MIN_BATCH_SIZE}..={MAX_BATCH_SIZE}; it will be clamped to {}",
                n.batch_size,
                n.effective_batch_size()
            ),
        );
    }
    if !n.worker_enabled() {
        push(
            Severity::Info,
            "worker",
            "notifications",
            "delivery worker is disabled; queued notifications will not be sent".into(),
        );
    }

    let ch = &config.channel;
    let session_name = ch.session_name.trim();
    if session_name.is_empty() {
        push(
            Severity::Error,
            "range",
            "channel.session_name",
            "session_name must not be empty".into(),
        );
    } else if session_name.contains(['/', '\\']) || session_name.contains("..") {
        push(
            Severity::Error,
            "range",
            "channel.session_name",
            "session_name is used as a directory name and must not contain path separators"
                .into(),
        );
    }
    if ch.send_timeout_secs == 0 {
        push(
            Severity::Error,
            "range",
            "channel.send_timeout_secs",
            "send_timeout_secs must be greater than 0".into(),
        );
    }
    if ch.handshake_timeout_secs == 0 {
        push(
            Severity::Error,
            "range",
            "channel.handshake_timeout_secs",
            "handshake_timeout_secs must be greater than 0".into(),
        );
    }

    let rc = &ch.reconnect;
    if rc.initial_delay_ms == 0 {
        push(
            Severity::Warning,
            "range",
            "channel.reconnect.initial_delay_ms",
            "initial_delay_ms is 0; failed handshakes will be retried without delay".into(),
        );
    }
    if rc.max_delay_ms < rc.initial_delay_ms {
        push(
            Severity::Error,
            "range",
            "channel.reconnect.max_delay_ms",
            format!(
                "max_delay_ms ({}) is lower than initial_delay_ms ({})",
                rc.max_delay_ms, rc.initial_delay_ms
            ),
        );
    }
    if rc.check_interval_ms == 0 {
        push(
            Severity::Error,
            "range",
            "channel.reconnect.check_interval_ms",
            "check_interval_ms must be greater than 0".into(),
        );
    }

    if ch.whatsapp.sidecar_port == 0 {
        push(
            Severity::Error,
            "range",
            "channel.whatsapp.sidecar_port",
            "sidecar_port must be a fixed, non-zero port".into(),
        );
    }
    if ch.whatsapp.auth_dir.trim().is_empty() {
        push(
            Severity::Error,
            "range",
            "channel.whatsapp.auth_dir",
            "auth_dir must not be empty".into(),
        );
    }

    if config.metrics.enabled && config.metrics.listen.parse::<SocketAddr>().is_err() {
        push(
            Severity::Error,
            "range",
            "metrics.listen",
            format!(
                "\"{}\" is not a valid socket address (expected host:port)",
                config.metrics.listen
            ),
        );
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
