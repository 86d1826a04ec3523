//! Layered settings loading.
//!
//! Compiled defaults, then the JSON settings file merged over them, then
//! `VIGIL_DB_*` environment variables, then validation. A file value of
//! `null` keeps the layer below.

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::{DatabaseSettings, Settings, SslMode};

/// `~/.vigil/settings.json`, or under `/tmp` when `HOME` is unset.
pub fn settings_path() -> PathBuf {
    std::env::var_os("HOME")
        .map_or_else(|| PathBuf::from("/tmp"), PathBuf::from)
        .join(".vigil")
        .join("settings.json")
}

/// Load settings from [`settings_path`].
pub fn load_settings() -> Result<Settings> {
    load_settings_from_path(&settings_path())
}

/// Load settings with `path` as the file layer.
///
/// A missing file is not an error. Malformed JSON and settings that fail
/// [`DatabaseSettings::validate`] are.
pub fn load_settings_from_path(path: &Path) -> Result<Settings> {
    let mut document = serde_json::to_value(Settings::default())?;
    match std::fs::read_to_string(path) {
        Ok(content) => {
            debug!(path = %path.display(), "merging settings file");
            let overlay: Value = serde_json::from_str(&content)?;
            document = deep_merge(document, overlay);
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no settings file, using defaults");
        }
        Err(source) => {
            return Err(SettingsError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    }

    let mut settings: Settings = serde_json::from_value(document)?;
    apply_env_overrides(&mut settings.database, |key| std::env::var(key).ok());
    settings.database.validate()?;
    Ok(settings)
}

/// Merge `overlay` into `base`. Objects merge per key; anything else in
/// `overlay` replaces `base`, except `null`, which is skipped.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, value) in overlay.into_iter().filter(|(_, v)| !v.is_null()) {
                let merged = match base.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                let _ = base.insert(key, merged);
            }
            Value::Object(base)
        }
        (_, overlay) => overlay,
    }
}

/// Apply `VIGIL_DB_*` overrides read through `lookup`. Empty values are
/// treated as unset; unparsable or out-of-range values are skipped with a
/// warning.
pub fn apply_env_overrides(db: &mut DatabaseSettings, lookup: impl Fn(&str) -> Option<String>) {
    let read = |key: &str| lookup(key).filter(|v| !v.is_empty());
    let parsed = |key: &str, apply: &mut dyn FnMut(&str) -> Option<()>| match read(key) {
        Some(raw) if apply(&raw).is_none() => {
            warn!(key, value = %raw, "ignoring invalid environment override");
        }
        _ => {}
    };

    if let Some(host) = read("VIGIL_DB_HOST") {
        db.host = host;
    }
    if let Some(name) = read("VIGIL_DB_NAME") {
        db.db_name = name;
    }
    if let Some(user) = read("VIGIL_DB_USER") {
        db.user = user;
    }
    if let Some(password) = read("VIGIL_DB_PASSWORD") {
        db.password = password;
    }

    parsed("VIGIL_DB_IN_MEMORY", &mut |raw: &str| {
        db.in_memory = parse_bool(raw)?;
        Some(())
    });
    parsed("VIGIL_DB_PORT", &mut |raw: &str| {
        db.port = parse_in_range(raw, 1..=u16::MAX)?;
        Some(())
    });
    parsed("VIGIL_DB_SSL_MODE", &mut |raw: &str| {
        db.ssl_mode = SslMode::parse(raw)?;
        Some(())
    });
    parsed("VIGIL_DB_MAX_CONN", &mut |raw: &str| {
        db.max_conn = parse_in_range(raw, 1..=1_000)?;
        Some(())
    });
    parsed("VIGIL_DB_CONNECTION_TIMEOUT_MS", &mut |raw: &str| {
        db.connection_timeout_ms = parse_in_range(raw, 1..=600_000)?;
        Some(())
    });
    parsed("VIGIL_DB_OPERATION_TIMEOUT_MS", &mut |raw: &str| {
        db.operation_timeout_ms = Some(parse_in_range(raw, 1..=3_600_000)?);
        Some(())
    });
}

/// `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`, any case.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse `raw` and accept it only inside `range`.
pub fn parse_in_range<T>(raw: &str, range: RangeInclusive<T>) -> Option<T>
where
    T: FromStr + PartialOrd,
{
    raw.trim().parse().ok().filter(|n| range.contains(n))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
