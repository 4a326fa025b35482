use serde::Deserialize;

/// Connection settings for the hosted identity & data service.
///
/// Every field can be set via an environment variable prefixed with
/// `HEARTH__`, e.g. `HEARTH__API_URL`. Defaults point at a local
/// development stack.
#[derive(Debug, Deserialize, Clone)]
pub struct RemoteConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_api_key")]
    pub api_key: String,
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,
}

fn default_api_url() -> String { "http://localhost:54321".into() }
fn default_api_key() -> String { "dev-anon-key".into() }
fn default_http_timeout_ms() -> u64 { 8_000 }

impl RemoteConfig {
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("HEARTH").separator("__"))
            .build()?;
        Ok(config.try_deserialize().unwrap_or_else(|_| Self::default()))
    }

    /// Config pointed at an explicit base URL, used by tests and tools.
    pub fn for_url(api_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            api_key: api_key.into(),
            http_timeout_ms: default_http_timeout_ms(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_key: default_api_key(),
            http_timeout_ms: default_http_timeout_ms(),
        }
    }
}
