//! Front-end configuration from environment variables.
//!
//! A single engine is described directly by `PIPELINE_*` variables. Several
//! engines are described by a JSON file named in `PIPELINE_ENGINES_FILE`:
//!
//! ```json
//! {
//!   "default_engine": "mecab",
//!   "engines": {
//!     "mecab": { "command": "mecab", "response_sentinel": "EOS" },
//!     "udpipe": { "command": "python3 udpipe.py en.udpipe all" }
//!   }
//! }
//! ```

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;
use worker_bridge::{SentinelMatch, WorkerConfig};

/// Default listen address
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";

/// Engine name used when only `PIPELINE_WORKER_CMD` is set
pub const DEFAULT_ENGINE_NAME: &str = "default";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} must be set (or PIPELINE_ENGINES_FILE)")]
    MissingVar(&'static str),

    #[error("Invalid value {value:?} for {var}")]
    InvalidValue { var: &'static str, value: String },

    #[error("Failed to read engines file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse engines file {path}: {source}")]
    ParseFile {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("No engines configured")]
    NoEngines,

    #[error("Default engine {0:?} is not configured")]
    UnknownDefault(String),

    #[error("Several engines configured; set default_engine")]
    AmbiguousDefault,
}

/// On-disk engines description
#[derive(Debug, Deserialize)]
struct EnginesFile {
    #[serde(default)]
    default_engine: Option<String>,
    engines: BTreeMap<String, WorkerConfig>,
}

/// Everything the front-end needs to start
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub default_engine: String,
    pub engines: BTreeMap<String, WorkerConfig>,
}

impl ServerConfig {
    /// One engine under the given name
    pub fn single(name: impl Into<String>, worker: WorkerConfig) -> Self {
        let name = name.into();
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            default_engine: name.clone(),
            engines: BTreeMap::from([(name, worker)]),
        }
    }

    pub fn with_bind_addr(mut self, bind_addr: impl Into<String>) -> Self {
        self.bind_addr = bind_addr.into();
        self
    }

    /// Build from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_addr = lookup("PIPELINE_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());

        let config = match lookup("PIPELINE_ENGINES_FILE") {
            Some(path) => Self::from_file(PathBuf::from(path), lookup("PIPELINE_ENGINE"))?,
            None => Self::from_vars(&lookup)?,
        };
        Ok(config.with_bind_addr(bind_addr))
    }

    fn from_file(path: PathBuf, default_override: Option<String>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::ReadFile {
            path: path.clone(),
            source,
        })?;
        let file: EnginesFile = serde_json::from_str(&raw)
            .map_err(|source| ConfigError::ParseFile { path, source })?;

        let default_engine = match default_override.or(file.default_engine) {
            Some(name) => name,
            None if file.engines.len() == 1 => file
                .engines
                .keys()
                .next()
                .cloned()
                .ok_or(ConfigError::NoEngines)?,
            None if file.engines.is_empty() => return Err(ConfigError::NoEngines),
            None => return Err(ConfigError::AmbiguousDefault),
        };

        let config = Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            default_engine,
            engines: file.engines,
        };
        config.check()?;
        Ok(config)
    }

    fn from_vars<F>(lookup: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let command = lookup("PIPELINE_WORKER_CMD")
            .filter(|c| !c.trim().is_empty())
            .ok_or(ConfigError::MissingVar("PIPELINE_WORKER_CMD"))?;
        let name = lookup("PIPELINE_ENGINE").unwrap_or_else(|| DEFAULT_ENGINE_NAME.to_string());

        let mut worker = WorkerConfig::new(command);
        if let Some(marker) = lookup("PIPELINE_READY_MARKER") {
            worker.ready_marker = Some(marker);
        }
        if let Some(sentinel) = lookup("PIPELINE_REQUEST_SENTINEL") {
            worker.request_sentinel = sentinel;
        }
        if let Some(sentinel) = lookup("PIPELINE_RESPONSE_SENTINEL") {
            worker.response_sentinel = sentinel;
        }
        if let Some(marker) = lookup("PIPELINE_RESULT_MARKER") {
            worker.result_marker = Some(marker);
        }
        if let Some(value) = lookup("PIPELINE_SENTINEL_MATCH") {
            worker.sentinel_match = match value.trim().to_ascii_lowercase().as_str() {
                "line" | "" => SentinelMatch::Line,
                "prompt" => SentinelMatch::Prompt,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        var: "PIPELINE_SENTINEL_MATCH",
                        value,
                    })
                }
            };
        }
        if let Some(prefix) = lookup("PIPELINE_PROPERTY_PREFIX").filter(|p| !p.is_empty()) {
            worker.property_prefix = Some(prefix);
        }
        if let Some(value) = lookup("PIPELINE_RESTART_ON_EXIT") {
            worker.restart_on_exit = parse_bool("PIPELINE_RESTART_ON_EXIT", &value)?;
        }

        Ok(Self::single(name, worker))
    }

    fn check(&self) -> Result<(), ConfigError> {
        if self.engines.is_empty() {
            return Err(ConfigError::NoEngines);
        }
        if !self.engines.contains_key(&self.default_engine) {
            return Err(ConfigError::UnknownDefault(self.default_engine.clone()));
        }
        Ok(())
    }
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            var,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_single_engine_from_vars() {
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("PIPELINE_WORKER_CMD", "java -cp jigg.jar Pipeline"),
            ("PIPELINE_READY_MARKER", "> "),
            ("PIPELINE_RESULT_MARKER", "<sentences>"),
            ("PIPELINE_RESTART_ON_EXIT", "true"),
        ]))
        .unwrap();

        assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR);
        assert_eq!(config.default_engine, DEFAULT_ENGINE_NAME);
        let worker = &config.engines[DEFAULT_ENGINE_NAME];
        assert_eq!(worker.command, "java -cp jigg.jar Pipeline");
        assert_eq!(worker.ready_marker.as_deref(), Some("> "));
        assert_eq!(worker.result_marker.as_deref(), Some("<sentences>"));
        assert_eq!(worker.response_sentinel, "END");
        assert!(worker.restart_on_exit);
    }

    #[test]
    fn test_prompt_engine_from_vars() {
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("PIPELINE_WORKER_CMD", "java -cp jigg.jar Pipeline"),
            ("PIPELINE_RESPONSE_SENTINEL", ">"),
            ("PIPELINE_SENTINEL_MATCH", "Prompt"),
            ("PIPELINE_PROPERTY_PREFIX", "#prop "),
        ]))
        .unwrap();
        let worker = &config.engines[DEFAULT_ENGINE_NAME];
        assert_eq!(worker.sentinel_match, SentinelMatch::Prompt);
        assert_eq!(worker.property_prefix.as_deref(), Some("#prop "));

        let err = ServerConfig::from_lookup(lookup_from(&[
            ("PIPELINE_WORKER_CMD", "cat"),
            ("PIPELINE_SENTINEL_MATCH", "eventually"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                var: "PIPELINE_SENTINEL_MATCH",
                ..
            }
        ));
    }

    #[test]
    fn test_missing_command() {
        let err = ServerConfig::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar("PIPELINE_WORKER_CMD")));
    }

    #[test]
    fn test_invalid_bool() {
        let err = ServerConfig::from_lookup(lookup_from(&[
            ("PIPELINE_WORKER_CMD", "cat"),
            ("PIPELINE_RESTART_ON_EXIT", "sometimes"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_engines_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "default_engine": "udpipe",
                "engines": {{
                    "udpipe": {{ "command": "python3 udpipe.py model all" }},
                    "depccg": {{ "command": "python3 depccg.py src model 1 en", "timeouts": {{ "max_ms": 60000 }} }}
                }}
            }}"#
        )
        .unwrap();

        let path = file.path().to_string_lossy().to_string();
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("PIPELINE_ENGINES_FILE", path.as_str()),
            ("PIPELINE_BIND_ADDR", "0.0.0.0:9000"),
        ]))
        .unwrap();

        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.default_engine, "udpipe");
        assert_eq!(config.engines.len(), 2);
        assert_eq!(
            config.engines["depccg"].timeouts.max,
            std::time::Duration::from_secs(60)
        );
    }

    #[test]
    fn test_engines_file_default_must_exist() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "default_engine": "knp", "engines": {{ "mecab": {{ "command": "mecab" }} }} }}"#
        )
        .unwrap();

        let path = file.path().to_string_lossy().to_string();
        let err = ServerConfig::from_lookup(lookup_from(&[("PIPELINE_ENGINES_FILE", path.as_str())]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownDefault(name) if name == "knp"));
    }

    #[test]
    fn test_engines_file_single_engine_is_default() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "engines": {{ "mecab": {{ "command": "mecab" }} }} }}"#).unwrap();

        let path = file.path().to_string_lossy().to_string();
        let config =
            ServerConfig::from_lookup(lookup_from(&[("PIPELINE_ENGINES_FILE", path.as_str())])).unwrap();
        assert_eq!(config.default_engine, "mecab");
    }

    #[test]
    fn test_missing_engines_file() {
        let err = ServerConfig::from_lookup(lookup_from(&[(
            "PIPELINE_ENGINES_FILE",
            "/nonexistent/engines.json",
        )]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }
}
