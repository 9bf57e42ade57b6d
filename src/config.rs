use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

// ---------------------------------------------------------------------------
// Environment override tracking
// ---------------------------------------------------------------------------

/// Tracks which configuration settings are overridden by environment variables.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    overrides: HashMap<String, String>,
}

impl EnvOverrides {
    /// Get all overrides as a map of setting key -> env var name.
    pub fn all(&self) -> &HashMap<String, String> {
        &self.overrides
    }

    fn record(&mut self, key: &str, env_var: &str) {
        self.overrides.insert(key.to_string(), env_var.to_string());
    }
}

// ---------------------------------------------------------------------------
// Main configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Env var overrides are not read from TOML.
    #[serde(skip)]
    pub env_overrides: EnvOverrides,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Allowed browser origins. Empty means any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Largest accepted request body. Attachments travel inline as base64.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

/// The generative API the relay forwards to.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Name of the environment variable holding the API key. Read on every
    /// request, so rotating the key does not need a restart.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Fallback key from the config file, used when the env var is unset.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Idle guard on the response stream. Unset means no read timeout.
    #[serde(default)]
    pub read_timeout_secs: Option<u64>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            api_key: None,
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: None,
        }
    }
}

impl UpstreamConfig {
    /// Resolve the API key: the configured env var first, then the file value.
    /// Empty values count as missing.
    pub fn resolve_api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| self.api_key.clone().filter(|k| !k.trim().is_empty()))
    }
}

/// Settings for the terminal chat front-end.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the relay the chat front-end talks to.
    #[serde(default = "default_relay_url")]
    pub relay_url: String,
    #[serde(default = "default_welcome_message")]
    pub welcome_message: String,
    /// Initial state of the search-grounding toggle.
    #[serde(default)]
    pub use_google_search: bool,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Idle guard on the relay stream. Unset means no read timeout.
    #[serde(default)]
    pub read_timeout_secs: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: default_relay_url(),
            welcome_message: default_welcome_message(),
            use_google_search: false,
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

const fn default_port() -> u16 {
    8400
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
const fn default_max_body_bytes() -> usize {
    32 * 1024 * 1024
}
fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}
fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_api_key_env() -> String {
    "API_KEY".to_string()
}
const fn default_connect_timeout() -> u64 {
    10
}
fn default_relay_url() -> String {
    "http://127.0.0.1:8400".to_string()
}
fn default_welcome_message() -> String {
    "Hello! I'm Gemini. Ask me anything, attach a file, or turn on Google Search for answers with sources."
        .to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

// ---------------------------------------------------------------------------
// Config loading and env overrides
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a TOML file, then apply environment variable
    /// overrides. Any setting prefixed with `CHATRELAY_` takes precedence over
    /// the file value and is tracked in `env_overrides`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            config
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }


    /// Apply environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        let mut ov = EnvOverrides::default();

        macro_rules! env_str {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = val;
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_bool {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_opt {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    if let Ok(parsed) = val.parse() {
                        $field = Some(parsed);
                        ov.record($key, $env);
                    }
                }
            };
        }
        macro_rules! env_parse {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    if let Ok(parsed) = val.parse() {
                        $field = parsed;
                        ov.record($key, $env);
                    }
                }
            };
        }

        // -- Server --
        env_str!("server.host", "CHATRELAY_SERVER_HOST", self.server.host);
        env_parse!("server.port", "CHATRELAY_SERVER_PORT", self.server.port);
        if let Ok(val) = std::env::var("CHATRELAY_SERVER_CORS_ORIGINS") {
            self.server.cors_origins = val
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            ov.record("server.cors_origins", "CHATRELAY_SERVER_CORS_ORIGINS");
        }

        env_parse!(
            "server.max_body_bytes",
            "CHATRELAY_SERVER_MAX_BODY_BYTES",
            self.server.max_body_bytes
        );

        // -- Upstream --
        env_str!("upstream.base_url", "CHATRELAY_UPSTREAM_BASE_URL", self.upstream.base_url);
        env_str!("upstream.model", "CHATRELAY_UPSTREAM_MODEL", self.upstream.model);
        env_str!(
            "upstream.api_key_env",
            "CHATRELAY_UPSTREAM_API_KEY_ENV",
            self.upstream.api_key_env
        );
        env_parse!(
            "upstream.connect_timeout_secs",
            "CHATRELAY_UPSTREAM_CONNECT_TIMEOUT",
            self.upstream.connect_timeout_secs
        );
        env_opt!(
            "upstream.read_timeout_secs",
            "CHATRELAY_UPSTREAM_READ_TIMEOUT",
            self.upstream.read_timeout_secs
        );

        // -- Client --
        env_str!("client.relay_url", "CHATRELAY_CLIENT_RELAY_URL", self.client.relay_url);
        env_bool!(
            "client.use_google_search",
            "CHATRELAY_CLIENT_GOOGLE_SEARCH",
            self.client.use_google_search
        );
        env_parse!(
            "client.connect_timeout_secs",
            "CHATRELAY_CLIENT_CONNECT_TIMEOUT",
            self.client.connect_timeout_secs
        );
        env_opt!(
            "client.read_timeout_secs",
            "CHATRELAY_CLIENT_READ_TIMEOUT",
            self.client.read_timeout_secs
        );

        // -- Logging --
        env_str!("logging.level", "CHATRELAY_LOG_LEVEL", self.logging.level);
        env_bool!("logging.json", "CHATRELAY_LOG_JSON", self.logging.json);

        self.env_overrides = ov;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8400);
        assert_eq!(config.upstream.model, "gemini-2.5-flash");
        assert_eq!(config.upstream.api_key_env, "API_KEY");
        assert!(config.upstream.api_key.is_none());
        assert_eq!(config.client.relay_url, "http://127.0.0.1:8400");
        assert!(!config.client.use_google_search);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
    }

    #[test]
    fn test_env_overrides_tracking() {
        let mut ov = EnvOverrides::default();
        assert!(ov.all().is_empty());

        ov.record("server.host", "CHATRELAY_SERVER_HOST");
        assert_eq!(
            ov.all().get("server.host").map(String::as_str),
            Some("CHATRELAY_SERVER_HOST")
        );
        assert_eq!(ov.all().len(), 1);
    }

    #[test]
    fn test_env_override_applies() {
        // SAFETY: No other test reads these variables.
        unsafe {
            std::env::set_var("CHATRELAY_UPSTREAM_READ_TIMEOUT", "42");
            std::env::set_var("CHATRELAY_CLIENT_RELAY_URL", "http://relay.internal:9000");
            std::env::set_var("CHATRELAY_CLIENT_GOOGLE_SEARCH", "on");
        }

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config.upstream.read_timeout_secs, Some(42));
        assert_eq!(config.client.relay_url, "http://relay.internal:9000");
        assert!(config.client.use_google_search);

        let overrides = config.env_overrides.all();
        assert!(overrides.contains_key("upstream.read_timeout_secs"));
        assert_eq!(
            overrides.get("client.relay_url").map(String::as_str),
            Some("CHATRELAY_CLIENT_RELAY_URL")
        );
        assert!(!overrides.contains_key("server.host"));

        unsafe {
            std::env::remove_var("CHATRELAY_UPSTREAM_READ_TIMEOUT");
            std::env::remove_var("CHATRELAY_CLIENT_RELAY_URL");
            std::env::remove_var("CHATRELAY_CLIENT_GOOGLE_SEARCH");
        }
    }

    #[test]
    fn test_streaming_clients_have_no_read_timeout_by_default() {
        let config = Config::default();
        assert_eq!(config.upstream.read_timeout_secs, None);
        assert_eq!(config.client.read_timeout_secs, None);
        assert_eq!(config.client.connect_timeout_secs, 10);
    }

    #[test]
    fn test_env_parse_ignores_garbage() {
        // SAFETY: No other test reads this variable.
        unsafe { std::env::set_var("CHATRELAY_UPSTREAM_CONNECT_TIMEOUT", "soon"); }
        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.upstream.connect_timeout_secs, 10);
        assert!(!config.env_overrides.all().contains_key("upstream.connect_timeout_secs"));
        unsafe { std::env::remove_var("CHATRELAY_UPSTREAM_CONNECT_TIMEOUT"); }
    }

    #[test]
    fn test_env_cors_origins_split() {
        // SAFETY: No other test reads this variable.
        unsafe { std::env::set_var("CHATRELAY_SERVER_CORS_ORIGINS", "http://a.com, http://b.com,,"); }
        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.server.cors_origins, vec!["http://a.com", "http://b.com"]);
        unsafe { std::env::remove_var("CHATRELAY_SERVER_CORS_ORIGINS"); }
    }

    #[test]
    fn test_resolve_api_key_prefers_env() {
        let mut upstream = UpstreamConfig {
            api_key_env: "CHATRELAY_TEST_KEY_PREFERS_ENV".into(),
            api_key: Some("from-file".into()),
            ..UpstreamConfig::default()
        };
        assert_eq!(upstream.resolve_api_key().as_deref(), Some("from-file"));

        // SAFETY: The variable name is unique to this test.
        unsafe { std::env::set_var("CHATRELAY_TEST_KEY_PREFERS_ENV", "from-env"); }
        assert_eq!(upstream.resolve_api_key().as_deref(), Some("from-env"));

        unsafe { std::env::set_var("CHATRELAY_TEST_KEY_PREFERS_ENV", "  "); }
        assert_eq!(upstream.resolve_api_key().as_deref(), Some("from-file"));
        unsafe { std::env::remove_var("CHATRELAY_TEST_KEY_PREFERS_ENV"); }

        upstream.api_key = None;
        assert!(upstream.resolve_api_key().is_none());
    }

    #[test]
    fn test_listen_addr() {
        let config = Config::default();
        assert_eq!(config.listen_addr(), "127.0.0.1:8400");
    }

    #[test]
    fn test_config_load_missing_file() {
        let path = Path::new("/tmp/nonexistent_chatrelay_config_test.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.server.port, 8400);
    }

    #[test]
    fn test_config_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.toml");
        std::fs::write(
            &path,
            r#"
[server]
host = "0.0.0.0"
port = 9000

[upstream]
model = "gemini-2.0-flash"
api_key_env = "MY_GEMINI_KEY"

[client]
use_google_search = true

[logging]
level = "debug"
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.upstream.model, "gemini-2.0-flash");
        assert_eq!(config.upstream.api_key_env, "MY_GEMINI_KEY");
        assert_eq!(config.upstream.base_url, "https://generativelanguage.googleapis.com");
        assert!(config.client.use_google_search);
        assert_eq!(config.logging.level, "debug");
    }
}
