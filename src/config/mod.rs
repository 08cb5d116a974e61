//! Configuration: options expressible via a JSON config file and via
//! environment variables, merged with environment winning, registry lists
//! deduplicated and order-preserving.

use std::path::Path;

use rama::error::{ErrorContext as _, OpaqueError};
use serde::{Deserialize, Serialize};

/// The configured `logging level` option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LoggingLevel {
    Silent,
    #[default]
    Normal,
    Verbose,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    scan_timeout_ms: Option<u64>,
    #[serde(default)]
    minimum_package_age_hours: Option<u64>,
    #[serde(default)]
    minimum_package_age_exclusions: Vec<String>,
    #[serde(default)]
    npm_custom_registries: Vec<String>,
    #[serde(default)]
    pip_custom_registries: Vec<String>,
    #[serde(default)]
    logging_level: Option<LoggingLevel>,
}

/// Effective, merged configuration (env ∪ file, env wins on scalars).
#[derive(Debug, Clone)]
pub struct Config {
    pub scan_timeout_ms: u64,
    pub minimum_package_age_hours: Option<u64>,
    pub minimum_package_age_exclusions: Vec<String>,
    pub npm_custom_registries: Vec<String>,
    pub pip_custom_registries: Vec<String>,
    pub logging_level: LoggingLevel,
}

const DEFAULT_SCAN_TIMEOUT_MS: u64 = 10_000;

impl Default for Config {
    fn default() -> Self {
        Self {
            scan_timeout_ms: DEFAULT_SCAN_TIMEOUT_MS,
            minimum_package_age_hours: None,
            minimum_package_age_exclusions: Vec::new(),
            npm_custom_registries: Vec::new(),
            pip_custom_registries: Vec::new(),
            logging_level: LoggingLevel::Normal,
        }
    }
}

impl Config {
    /// Loads the JSON config file (if present) and overlays environment
    /// variables on top, env winning for scalars and merging (union,
    /// deduplicated, order-preserving) for registry/exclusion lists.
    pub fn load(config_path: Option<&Path>, data_dir: &Path) -> Result<Self, OpaqueError> {
        let default_path = data_dir.join("config.json");
        let path = config_path.unwrap_or(&default_path);

        let file_config = match std::fs::read(path) {
            Ok(raw) => serde_json::from_slice(&raw)
                .with_context(|| format!("parse config file '{}'", path.display()))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => FileConfig::default(),
            Err(err) => {
                return Err(err).with_context(|| format!("read config file '{}'", path.display()));
            }
        };

        Ok(Self::merge(file_config, EnvConfig::from_env()))
    }

    fn merge(file: FileConfig, env: EnvConfig) -> Self {
        Self {
            scan_timeout_ms: env
                .scan_timeout_ms
                .or(file.scan_timeout_ms)
                .unwrap_or(DEFAULT_SCAN_TIMEOUT_MS),
            minimum_package_age_hours: env
                .minimum_package_age_hours
                .or(file.minimum_package_age_hours),
            minimum_package_age_exclusions: merge_lists(
                &env.minimum_package_age_exclusions,
                &file.minimum_package_age_exclusions,
                normalize_package_name,
            ),
            npm_custom_registries: merge_lists(
                &env.npm_custom_registries,
                &file.npm_custom_registries,
                normalize_registry,
            ),
            pip_custom_registries: merge_lists(
                &env.pip_custom_registries,
                &file.pip_custom_registries,
                normalize_registry,
            ),
            logging_level: env.logging_level.or(file.logging_level).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Default)]
struct EnvConfig {
    scan_timeout_ms: Option<u64>,
    minimum_package_age_hours: Option<u64>,
    minimum_package_age_exclusions: Vec<String>,
    npm_custom_registries: Vec<String>,
    pip_custom_registries: Vec<String>,
    logging_level: Option<LoggingLevel>,
}

impl EnvConfig {
    fn from_env() -> Self {
        Self {
            scan_timeout_ms: env_u64("SAFE_CHAIN_SCAN_TIMEOUT_MS"),
            minimum_package_age_hours: env_u64("SAFE_CHAIN_MIN_PACKAGE_AGE_HOURS"),
            minimum_package_age_exclusions: env_list("SAFE_CHAIN_MIN_PACKAGE_AGE_EXCLUSIONS"),
            npm_custom_registries: env_list("SAFE_CHAIN_NPM_REGISTRIES"),
            pip_custom_registries: env_list("SAFE_CHAIN_PIP_REGISTRIES"),
            logging_level: std::env::var("SAFE_CHAIN_LOG_LEVEL").ok().and_then(|v| {
                match v.trim().to_ascii_lowercase().as_str() {
                    "silent" => Some(LoggingLevel::Silent),
                    "normal" => Some(LoggingLevel::Normal),
                    "verbose" => Some(LoggingLevel::Verbose),
                    _ => None,
                }
            }),
        }
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_list(key: &str) -> Vec<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.split(',').map(str::to_owned).collect())
        .unwrap_or_default()
}

/// Union of `primary` and `secondary`, deduplicated and order-preserving
/// (primary entries keep priority of position), each entry normalized and
/// empty entries dropped. Idempotent: `merge_lists(merge_lists(a, b), []) ==
/// merge_lists(a, b)`.
fn merge_lists(
    primary: &[String],
    secondary: &[String],
    normalize: impl Fn(&str) -> Option<String>,
) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for raw in primary.iter().chain(secondary.iter()) {
        let Some(entry) = normalize(raw) else {
            continue;
        };
        if seen.insert(entry.clone()) {
            out.push(entry);
        }
    }
    out
}

fn normalize_registry(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let stripped = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);
    let stripped = stripped.trim();
    (!stripped.is_empty()).then(|| stripped.to_owned())
}

fn normalize_package_name(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_lists_dedup_order_preserving() {
        let primary = vec!["Foo".to_owned(), "bar".to_owned()];
        let secondary = vec!["bar".to_owned(), "baz".to_owned()];
        let merged = merge_lists(&primary, &secondary, normalize_package_name);
        assert_eq!(merged, vec!["Foo", "bar", "baz"]);
    }

    #[test]
    fn test_merge_lists_idempotent() {
        let primary = vec!["one".to_owned(), "two".to_owned()];
        let secondary = vec!["two".to_owned(), "three".to_owned()];
        let once = merge_lists(&primary, &secondary, normalize_package_name);
        let twice = merge_lists(&once, &[], normalize_package_name);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_normalize_registry_strips_scheme_and_whitespace() {
        assert_eq!(
            normalize_registry("  https://private-pypi.internal.com  "),
            Some("private-pypi.internal.com".to_owned())
        );
        assert_eq!(normalize_registry("http://x.example.com"), Some("x.example.com".to_owned()));
        assert_eq!(normalize_registry("   "), None);
    }

    #[test]
    fn test_merge_scan_timeout_env_wins() {
        let file = FileConfig {
            scan_timeout_ms: Some(5_000),
            ..Default::default()
        };
        let env = EnvConfig {
            scan_timeout_ms: Some(20_000),
            ..Default::default()
        };
        let cfg = Config::merge(file, env);
        assert_eq!(cfg.scan_timeout_ms, 20_000);
    }

    #[test]
    fn test_merge_scan_timeout_falls_back_to_default() {
        let cfg = Config::merge(FileConfig::default(), EnvConfig::default());
        assert_eq!(cfg.scan_timeout_ms, DEFAULT_SCAN_TIMEOUT_MS);
    }
}
