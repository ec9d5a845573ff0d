use serde::Deserialize;
use std::{env, fs, time::Duration};
use tracing::{info, warn};

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct EmbedderConfig {
    pub store: StoreConfig,
    pub bus: BusConfig,
    pub server: ServerConfig,
    pub model: ModelConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Redis,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: Backend,
    pub redis_url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Redis,
            redis_url: "redis://localhost:6379".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Upper bound on how long a listener waits before re-checking
    /// cancellation.
    pub poll_timeout_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 1000,
        }
    }
}

impl BusConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub batch_size: usize,
    /// Agreed vector length. Unset disables the check.
    pub dimension: Option<usize>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost".to_string(),
            port: 11434,
            name: "all-minilm".to_string(),
            batch_size: 32,
            dimension: None,
        }
    }
}

pub fn load() -> EmbedderConfig {
    let path = env::var("EMBEDDER_CONFIG_PATH").unwrap_or_else(|_| "embedder.yaml".to_string());
    let mut config = match fs::read_to_string(&path) {
        Ok(contents) => parse(&contents).unwrap_or_else(|err| {
            warn!(error = %err, path = %path, "Failed to parse embedder config, using defaults");
            EmbedderConfig::default()
        }),
        Err(err) => {
            warn!(error = %err, path = %path, "Embedder config not found, using defaults");
            EmbedderConfig::default()
        }
    };

    apply_overrides(&mut config, |key| env::var(key).ok());

    info!(
        backend = ?config.store.backend,
        poll_timeout_ms = config.bus.poll_timeout_ms,
        bind = %config.server.bind_address(),
        model = %config.model.name,
        dimension = ?config.model.dimension,
        "Embedder config loaded"
    );

    config
}

pub fn parse(contents: &str) -> Result<EmbedderConfig, serde_yaml::Error> {
    serde_yaml::from_str(contents)
}

/// Applies environment overrides, reading variables through `lookup`.
pub fn apply_overrides<F>(config: &mut EmbedderConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup("REDIS_URL") {
        config.store.redis_url = value;
    }

    if let Some(value) = lookup("STORE_BACKEND") {
        match value.to_ascii_lowercase().as_str() {
            "redis" => config.store.backend = Backend::Redis,
            "memory" => config.store.backend = Backend::Memory,
            other => warn!(value = %other, "Unknown STORE_BACKEND override"),
        }
    }

    override_parsed(&lookup, "BUS_POLL_TIMEOUT_MS", &mut config.bus.poll_timeout_ms);

    for key in ["EMBEDDER_HOST", "PYTHON_API_HOST"] {
        if let Some(value) = lookup(key) {
            config.server.host = value;
            break;
        }
    }
    for key in ["EMBEDDER_PORT", "PYTHON_API_PORT"] {
        if lookup(key).is_some() {
            override_parsed(&lookup, key, &mut config.server.port);
            break;
        }
    }

    if let Some(value) = lookup("OLLAMA_HOST") {
        config.model.host = value;
    }
    override_parsed(&lookup, "OLLAMA_PORT", &mut config.model.port);
    if let Some(value) = lookup("OLLAMA_EMBEDDING_MODEL") {
        config.model.name = value;
    }
    override_parsed(&lookup, "OLLAMA_BATCH_SIZE", &mut config.model.batch_size);

    if let Some(value) = lookup("EMBEDDING_DIMENSION") {
        match value.parse::<usize>() {
            Ok(dimension) => config.model.dimension = Some(dimension),
            Err(err) => warn!(error = %err, "Failed to parse EMBEDDING_DIMENSION override"),
        }
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(value) = lookup(key) {
        match value.parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(err) => warn!(error = %err, key = %key, "Failed to parse override"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EmbedderConfig::default();
        assert_eq!(config.store.backend, Backend::Redis);
        assert_eq!(config.store.redis_url, "redis://localhost:6379");
        assert_eq!(config.bus.poll_timeout(), Duration::from_secs(1));
        assert_eq!(config.server.bind_address(), "0.0.0.0:8000");
    }

    #[test]
    fn test_parse_partial_yaml() {
        let config = parse(
            "store:\n  backend: memory\nbus:\n  poll_timeout_ms: 250\nmodel:\n  dimension: 384\n",
        )
        .unwrap();

        assert_eq!(config.store.backend, Backend::Memory);
        assert_eq!(config.store.redis_url, "redis://localhost:6379");
        assert_eq!(config.bus.poll_timeout_ms, 250);
        assert_eq!(config.model.dimension, Some(384));
        assert_eq!(config.server.port, 8000);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = EmbedderConfig::default();
        apply_overrides(
            &mut config,
            lookup_from(&[
                ("REDIS_URL", "redis://redis:6379"),
                ("STORE_BACKEND", "MEMORY"),
                ("BUS_POLL_TIMEOUT_MS", "50"),
                ("PYTHON_API_HOST", "127.0.0.1"),
                ("PYTHON_API_PORT", "9000"),
                ("OLLAMA_EMBEDDING_MODEL", "nomic-embed-text"),
                ("EMBEDDING_DIMENSION", "768"),
            ]),
        );

        assert_eq!(config.store.redis_url, "redis://redis:6379");
        assert_eq!(config.store.backend, Backend::Memory);
        assert_eq!(config.bus.poll_timeout_ms, 50);
        assert_eq!(config.server.bind_address(), "127.0.0.1:9000");
        assert_eq!(config.model.name, "nomic-embed-text");
        assert_eq!(config.model.dimension, Some(768));
    }

    #[test]
    fn test_embedder_vars_take_precedence() {
        let mut config = EmbedderConfig::default();
        apply_overrides(
            &mut config,
            lookup_from(&[("EMBEDDER_PORT", "7000"), ("PYTHON_API_PORT", "9000")]),
        );
        assert_eq!(config.server.port, 7000);
    }

    #[test]
    fn test_bad_overrides_keep_previous_values() {
        let mut config = EmbedderConfig::default();
        apply_overrides(
            &mut config,
            lookup_from(&[
                ("BUS_POLL_TIMEOUT_MS", "soon"),
                ("STORE_BACKEND", "postgres"),
                ("EMBEDDING_DIMENSION", "-1"),
            ]),
        );
        assert_eq!(config.bus.poll_timeout_ms, 1000);
        assert_eq!(config.store.backend, Backend::Redis);
        assert_eq!(config.model.dimension, None);
    }
}
