use reqwest::Url;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::ConfigError;
use crate::reconciler::MergePolicy;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/";
/// Snapshot resource, relative to the base URL.
pub const CONTAINERS_PATH: &str = "containers";
/// Stream resource, relative to the origin the stream is served from.
pub const STREAM_PATH: &str = "containers/ws";

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_RECONNECT_INITIAL_MS: u64 = 1_000;
const DEFAULT_RECONNECT_MAX_MS: u64 = 30_000;

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub base_url: String,
    /// Explicit stream endpoint. When unset it is derived from `base_url`.
    pub stream_url: Option<String>,
    pub request_timeout: Duration,
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
    pub merge_policy: MergePolicy,
}

// Partial config for layering
#[derive(Deserialize, Default, Debug, Clone, PartialEq)]
pub struct PartialClientConfig {
    pub base_url: Option<String>,
    pub stream_url: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub reconnect_initial_ms: Option<u64>,
    pub reconnect_max_ms: Option<u64>,
    pub merge_policy: Option<MergePolicy>,
}

impl PartialClientConfig {
    /// Reads a TOML file. A missing file yields an empty layer.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Reads `BASE_URL`, `REQUEST_TIMEOUT_SECS`, ... from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        envy::from_env::<Self>().map_err(ConfigError::Env)
    }

    /// Same as [`PartialClientConfig::from_env`] over an explicit set of variables.
    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::from_iter::<_, Self>(vars).map_err(ConfigError::Env)
    }

    /// Fills every unset field of `self` from `fallback`.
    pub fn or(self, fallback: Self) -> Self {
        Self {
            base_url: self.base_url.or(fallback.base_url),
            stream_url: self.stream_url.or(fallback.stream_url),
            request_timeout_secs: self.request_timeout_secs.or(fallback.request_timeout_secs),
            reconnect_initial_ms: self.reconnect_initial_ms.or(fallback.reconnect_initial_ms),
            reconnect_max_ms: self.reconnect_max_ms.or(fallback.reconnect_max_ms),
            merge_policy: self.merge_policy.or(fallback.merge_policy),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            stream_url: None,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            reconnect_initial: Duration::from_millis(DEFAULT_RECONNECT_INITIAL_MS),
            reconnect_max: Duration::from_millis(DEFAULT_RECONNECT_MAX_MS),
            merge_policy: MergePolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Loads `.env`, then the optional TOML file, then environment variables. The
    /// environment overrides the file.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_overrides(config_path, PartialClientConfig::default())
    }

    /// Like [`ClientConfig::load`], with `overrides` (e.g. command-line flags) taking
    /// precedence over everything else.
    pub fn load_with_overrides(
        config_path: Option<&Path>,
        overrides: PartialClientConfig,
    ) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let file_config = match config_path {
            Some(path) => {
                info!(path = %path.display(), "Loading client config file.");
                PartialClientConfig::from_file(path)?
            }
            None => PartialClientConfig::default(),
        };
        let env_config = PartialClientConfig::from_env()?;

        Self::from_partial(overrides.or(env_config).or(file_config))
    }

    /// Applies defaults to a merged layer and validates the result.
    pub fn from_partial(partial: PartialClientConfig) -> Result<Self, ConfigError> {
        let config = Self {
            base_url: partial
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            stream_url: partial.stream_url.filter(|url| !url.trim().is_empty()),
            request_timeout: Duration::from_secs(
                partial
                    .request_timeout_secs
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            ),
            reconnect_initial: Duration::from_millis(
                partial
                    .reconnect_initial_ms
                    .unwrap_or(DEFAULT_RECONNECT_INITIAL_MS),
            ),
            reconnect_max: Duration::from_millis(
                partial.reconnect_max_ms.unwrap_or(DEFAULT_RECONNECT_MAX_MS),
            ),
            merge_policy: partial.merge_policy.unwrap_or_default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_base_url(&self.base_url)?;
        if self.request_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "request_timeout_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.reconnect_initial.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "reconnect_initial_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.reconnect_initial > self.reconnect_max {
            return Err(ConfigError::InvalidValue {
                key: "reconnect_max_ms",
                reason: format!(
                    "cap {}ms is below the initial delay {}ms",
                    self.reconnect_max.as_millis(),
                    self.reconnect_initial.as_millis()
                ),
            });
        }
        self.stream_endpoint()?;
        Ok(())
    }

    /// The WebSocket endpoint for live updates.
    ///
    /// Derived from the base URL (`http` -> `ws`, `https` -> `wss`, plus `/containers/ws`)
    /// unless `stream_url` is set. An explicit endpoint on a different host than the base
    /// URL is accepted but logged, since both are expected to be served by one backend.
    pub fn stream_endpoint(&self) -> Result<String, ConfigError> {
        let base = parse_base_url(&self.base_url)?;

        let Some(explicit) = &self.stream_url else {
            return derive_stream_url(&base);
        };

        let stream = Url::parse(explicit).map_err(|e| ConfigError::InvalidUrl {
            url: explicit.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(stream.scheme(), "ws" | "wss") {
            return Err(ConfigError::InvalidUrl {
                url: explicit.clone(),
                reason: format!("unsupported scheme {:?}, expected ws or wss", stream.scheme()),
            });
        }
        if stream.host_str() != base.host_str()
            || stream.port_or_known_default() != base.port_or_known_default()
        {
            warn!(
                base_url = %base,
                stream_url = %stream,
                "Stream endpoint host differs from the base URL host."
            );
        }
        Ok(stream.to_string())
    }
}

fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme {:?}, expected http or https", url.scheme()),
        });
    }
    Ok(url)
}

fn derive_stream_url(base: &Url) -> Result<String, ConfigError> {
    let scheme = if base.scheme() == "https" { "wss" } else { "ws" };
    let mut url = base.clone();
    url.set_scheme(scheme).map_err(|_| ConfigError::InvalidUrl {
        url: base.to_string(),
        reason: format!("cannot switch scheme to {scheme}"),
    })?;
    let path = format!("{}/{}", base.path().trim_end_matches('/'), STREAM_PATH);
    url.set_path(&path);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url.to_string())
}
