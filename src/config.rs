use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Complete server configuration.
///
/// Built from defaults, then an optional TOML file, then environment
/// variables; CLI flags are applied last by the binary.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: HttpConfig,
    pub mcp: McpProtocolConfig,
    pub sessions: SessionConfig,
    pub amap: AmapConfig,
    pub llm: LlmConfig,
    pub browser: BrowserConfig,
    pub valuation: ValuationConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
    pub enable_cors: bool,
    /// Largest accepted request body, in bytes.
    pub max_request_size: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            enable_cors: true,
            max_request_size: 4 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct McpProtocolConfig {
    pub protocol_version: String,
    pub server_name: String,
    pub server_version: String,
    /// Answer every session with JSON bodies instead of negotiating SSE.
    pub json_response: bool,
}

impl Default for McpProtocolConfig {
    fn default() -> Self {
        Self {
            protocol_version: "2025-03-26".to_string(),
            server_name: "playwright-mcp-http-server".to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            json_response: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Sessions idle longer than this are evicted; `"0s"` keeps them forever.
    #[serde(with = "duration_string")]
    pub idle_timeout: Duration,
    #[serde(with = "duration_string")]
    pub sweep_interval: Duration,
    pub max_sessions: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(60),
            max_sessions: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AmapConfig {
    pub base_url: String,
    pub key: String,
    #[serde(with = "duration_string")]
    pub timeout: Duration,
}

impl Default for AmapConfig {
    fn default() -> Self {
        Self {
            base_url: "https://restapi.amap.com".to_string(),
            key: String::new(),
            timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    #[serde(with = "duration_string")]
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.moonshot.cn/v1".to_string(),
            api_key: String::new(),
            model: "moonshot-v1-8k".to_string(),
            temperature: 0.3,
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Browser automation backend.
    pub base_url: String,
    #[serde(with = "duration_string")]
    pub timeout: Duration,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8931".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ValuationConfig {
    pub lookup_nearby_services: bool,
    pub nearby_radius_m: u32,
}

impl Default for ValuationConfig {
    fn default() -> Self {
        Self {
            lookup_nearby_services: false,
            nearby_radius_m: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: ServerConfig = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Defaults, then the optional file, then process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Override fields from environment variables looked up through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |names: &[&str]| names.iter().find_map(|name| lookup(name));

        if let Some(host) = lookup("HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("PORT must be a port number, got '{port}'"))?;
        }
        if let Some(url) = lookup("AMAP_API_BASE_URL") {
            self.amap.base_url = url;
        }
        if let Some(key) = lookup("AMAP_HTTP_KEY") {
            self.amap.key = key;
        }
        if let Some(timeout) = lookup("AMAP_HTTP_TIMEOUT") {
            let millis: u64 = timeout.parse().with_context(|| {
                format!("AMAP_HTTP_TIMEOUT must be milliseconds, got '{timeout}'")
            })?;
            self.amap.timeout = Duration::from_millis(millis);
        }
        if let Some(url) = first(&["LLM_BASE_URL", "MOONSHOT_BASE_URL"]) {
            self.llm.base_url = url;
        }
        if let Some(key) = first(&["LLM_API_KEY", "MOONSHOT_API_KEY"]) {
            self.llm.api_key = key;
        }
        if let Some(model) = lookup("LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(url) = lookup("BROWSER_BASE_URL") {
            self.browser.base_url = url;
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = level;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            bail!("server.port must be non-zero");
        }
        for (name, value) in [
            ("amap.base_url", &self.amap.base_url),
            ("llm.base_url", &self.llm.base_url),
            ("browser.base_url", &self.browser.base_url),
        ] {
            url::Url::parse(value).with_context(|| format!("{name} is not a valid URL: '{value}'"))?;
        }
        for (name, value) in [
            ("amap.timeout", self.amap.timeout),
            ("llm.timeout", self.llm.timeout),
            ("browser.timeout", self.browser.timeout),
        ] {
            if value.is_zero() {
                bail!("{name} must be greater than zero");
            }
        }
        if self.sessions.max_sessions == 0 {
            bail!("sessions.max_sessions must be at least 1");
        }
        if !self.sessions.idle_timeout.is_zero() && self.sessions.sweep_interval.is_zero() {
            bail!("sessions.sweep_interval must be greater than zero when idle eviction is on");
        }
        Ok(())
    }
}

// Helper module for duration serialization
mod duration_string {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if let Some(millis) = s.strip_suffix("ms") {
            let millis: u64 = millis.parse().map_err(serde::de::Error::custom)?;
            Ok(Duration::from_millis(millis))
        } else if let Some(stripped) = s.strip_suffix('s') {
            let secs: u64 = stripped.parse().map_err(serde::de::Error::custom)?;
            Ok(Duration::from_secs(secs))
        } else {
            Err(serde::de::Error::custom(
                "Expected duration string ending with 's' or 'ms'",
            ))
        }
    }
}
