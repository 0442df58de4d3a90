//! Configuration sources and the typed server configuration.
//!
//! Keys are dotted (`http.port`). [`YamlConfig`] flattens nested maps into
//! dotted keys; [`EnvConfig`] maps `http.port` to `BOOT_HTTP_PORT`;
//! [`LayeredConfig`] asks each source in turn.
//!
//! ```yaml
//! http:
//!   port: 8080
//!   context_path: /api
//!   404: pages/404.html
//! aspect:
//!   fail_closed: true
//! ```

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde_yaml::Value as YamlValue;
use tracing::debug;

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse(serde_yaml::Error),
    Invalid {
        key: String,
        value: String,
        expected: &'static str,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "IO error reading {}: {}", path.display(), source)
            }
            ConfigError::Parse(e) => write!(f, "Parse error: {e}"),
            ConfigError::Invalid {
                key,
                value,
                expected,
            } => write!(f, "Invalid value '{value}' for '{key}': expected {expected}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Parse(e) => Some(e),
            ConfigError::Invalid { .. } => None,
        }
    }
}

/// Dotted-key configuration lookups.
pub trait ConfigSource: Send + Sync {
    fn get_str(&self, key: &str) -> Option<String>;

    fn get_i64(&self, key: &str) -> Result<Option<i64>, ConfigError> {
        match self.get_str(key) {
            None => Ok(None),
            Some(raw) => raw.trim().parse().map(Some).map_err(|_| ConfigError::Invalid {
                key: key.to_string(),
                value: raw,
                expected: "integer",
            }),
        }
    }

    fn get_bool(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        match self.get_str(key) {
            None => Ok(None),
            Some(raw) => match raw.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(Some(true)),
                "false" | "0" | "no" | "off" => Ok(Some(false)),
                _ => Err(ConfigError::Invalid {
                    key: key.to_string(),
                    value: raw,
                    expected: "boolean",
                }),
            },
        }
    }
}

/// A YAML document flattened to dotted keys.
#[derive(Debug, Clone, Default)]
pub struct YamlConfig {
    values: HashMap<String, String>,
}

fn scalar_to_string(value: &YamlValue) -> Option<String> {
    match value {
        YamlValue::String(s) => Some(s.clone()),
        YamlValue::Number(n) => Some(n.to_string()),
        YamlValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn flatten(prefix: &str, value: &YamlValue, out: &mut HashMap<String, String>) {
    match value {
        YamlValue::Mapping(map) => {
            for (k, v) in map {
                let Some(key) = scalar_to_string(k) else {
                    continue;
                };
                let full = if prefix.is_empty() {
                    key
                } else {
                    format!("{prefix}.{key}")
                };
                flatten(&full, v, out);
            }
        }
        YamlValue::Sequence(items) => {
            let joined: Vec<String> = items.iter().filter_map(scalar_to_string).collect();
            out.insert(prefix.to_string(), joined.join(","));
        }
        YamlValue::Tagged(tagged) => flatten(prefix, &tagged.value, out),
        YamlValue::Null => {}
        scalar => {
            if let Some(s) = scalar_to_string(scalar) {
                out.insert(prefix.to_string(), s);
            }
        }
    }
}

impl YamlConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&content)?;
        debug!(path = %path.display(), keys = config.values.len(), "Configuration file loaded");
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let doc: YamlValue = serde_yaml::from_str(content).map_err(ConfigError::Parse)?;
        let mut values = HashMap::new();
        flatten("", &doc, &mut values);
        Ok(Self { values })
    }

    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.values.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }
}

impl ConfigSource for YamlConfig {
    fn get_str(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// Environment variables: `http.port` is read from `<PREFIX>HTTP_PORT`.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    prefix: String,
    vars: Option<HashMap<String, String>>,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self::new("BOOT_")
    }
}

impl EnvConfig {
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            vars: None,
        }
    }

    /// Read from a fixed set of variables instead of the process environment.
    #[must_use]
    pub fn with_vars<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.vars = Some(vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect());
        self
    }

    #[must_use]
    pub fn var_name(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key.replace(['.', '-'], "_").to_uppercase())
    }
}

impl ConfigSource for EnvConfig {
    fn get_str(&self, key: &str) -> Option<String> {
        let name = self.var_name(key);
        match &self.vars {
            Some(vars) => vars.get(&name).cloned(),
            None => env::var(&name).ok(),
        }
    }
}

/// Sources in priority order; the first one with a key wins.
#[derive(Default)]
pub struct LayeredConfig {
    layers: Vec<Box<dyn ConfigSource>>,
}

impl LayeredConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a lower-priority layer.
    #[must_use]
    pub fn with(mut self, source: impl ConfigSource + 'static) -> Self {
        self.layers.push(Box::new(source));
        self
    }

    /// Environment over an optional YAML file.
    pub fn standard(path: Option<&Path>) -> Result<Self, ConfigError> {
        let layered = Self::new().with(EnvConfig::default());
        Ok(match path {
            Some(p) => layered.with(YamlConfig::load(p)?),
            None => layered,
        })
    }
}

impl ConfigSource for LayeredConfig {
    fn get_str(&self, key: &str) -> Option<String> {
        self.layers.iter().find_map(|layer| layer.get_str(key))
    }
}

impl fmt::Debug for LayeredConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayeredConfig")
            .field("layers", &self.layers.len())
            .finish()
    }
}

/// Typed server settings, read once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// `http.port`, default 80. `0` picks a free port.
    pub port: u16,
    /// `http.context_path`, normalized to `/x` or `None`
    pub context_path: Option<String>,
    /// `http.page`: static page root, for transports that serve one
    pub page: Option<PathBuf>,
    /// `http.404`: body served on routing misses
    pub not_found_page: Option<PathBuf>,
    /// `http.500`: body served on action faults
    pub error_page: Option<PathBuf>,
    /// `http.max_live_time_of_static_res`, in seconds
    pub max_live_time_of_static_res: Option<u64>,
    /// `http.use_session`
    pub use_session: bool,
    /// `http.check_host`
    pub check_host: bool,
    /// `aspect.fail_closed`
    pub fail_closed: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 80,
            context_path: None,
            page: None,
            not_found_page: None,
            error_page: None,
            max_live_time_of_static_res: None,
            use_session: false,
            check_host: false,
            fail_closed: false,
        }
    }
}

fn normalize_context_path(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        None
    } else {
        Some(format!("/{trimmed}"))
    }
}

impl ServerConfig {
    pub fn from_source(source: &dyn ConfigSource) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let port = match source.get_i64("http.port")? {
            None => defaults.port,
            Some(p) => u16::try_from(p).map_err(|_| ConfigError::Invalid {
                key: "http.port".to_string(),
                value: p.to_string(),
                expected: "port number (0-65535)",
            })?,
        };
        let max_live = match source.get_i64("http.max_live_time_of_static_res")? {
            None => None,
            Some(v) => Some(u64::try_from(v).map_err(|_| ConfigError::Invalid {
                key: "http.max_live_time_of_static_res".to_string(),
                value: v.to_string(),
                expected: "non-negative integer",
            })?),
        };
        let path = |key: &str| {
            source
                .get_str(key)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
        };

        Ok(Self {
            port,
            context_path: source
                .get_str("http.context_path")
                .and_then(|c| normalize_context_path(&c)),
            page: path("http.page"),
            not_found_page: path("http.404"),
            error_page: path("http.500"),
            max_live_time_of_static_res: max_live,
            use_session: source.get_bool("http.use_session")?.unwrap_or(defaults.use_session),
            check_host: source.get_bool("http.check_host")?.unwrap_or(defaults.check_host),
            fail_closed: source.get_bool("aspect.fail_closed")?.unwrap_or(defaults.fail_closed),
        })
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_context_path(mut self, context_path: &str) -> Self {
        self.context_path = normalize_context_path(context_path);
        self
    }

    /// `http://localhost[:port][context_path]`, the port omitted when it is 80.
    #[must_use]
    pub fn base_url(&self) -> String {
        self.base_url_for_port(self.port)
    }

    #[must_use]
    pub fn base_url_for_port(&self, port: u16) -> String {
        let mut url = String::from("http://localhost");
        if port != 80 {
            url.push_str(&format!(":{port}"));
        }
        if let Some(ctx) = &self.context_path {
            url.push_str(ctx);
        }
        url
    }
}
