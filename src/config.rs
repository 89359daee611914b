use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub txgraph: TxgraphConfig,
    pub oracle: OracleConfig,
    pub traversal: TraversalConfig,
    #[serde(default)]
    pub http_server: HttpServerConfig,
}

/// Storage and logging settings
#[derive(Debug, Clone, Deserialize)]
pub struct TxgraphConfig {
    pub db_path: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Reasoning oracle configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OracleConfig {
    pub provider: String,
    pub api_key_env: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Model used for action selection (cheap, deterministic)
    pub decide_model: String,
    #[serde(default)]
    pub decide_temperature: f32,
    /// Model used for set selection
    pub select_model: String,
    #[serde(default = "default_select_temperature")]
    pub select_temperature: f32,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Exploration loop configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TraversalConfig {
    /// Top-level consideration nodes offered to the oracle before anything is expanded.
    pub roots: Vec<String>,
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    /// Overall deadline for one resolve; 0 disables it.
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HttpServerConfig {
    #[serde(default = "default_http_port")]
    pub port: u16,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            port: default_http_port(),
            allowed_origins: Vec::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_select_temperature() -> f32 {
    0.3
}

fn default_max_retries() -> usize {
    2
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_max_turns() -> usize {
    12
}

fn default_deadline_secs() -> u64 {
    120
}

fn default_cache_capacity() -> usize {
    256
}

fn default_http_port() -> u16 {
    8080
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in TXGRAPH_CONFIG environment variable
    /// 2. ./config.toml in current directory
    pub fn load() -> Result<Self> {
        // .env is optional
        let _ = dotenv::dotenv();

        let config_path = std::env::var("TXGRAPH_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config = Self::from_toml(&config_str)?;
        config.validate()?;

        Ok(config)
    }

    /// Parse configuration text without touching the environment
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("Failed to parse config.toml")
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.oracle.provider != "openai" {
            anyhow::bail!(
                "Unsupported oracle.provider '{}'. Only 'openai' is available.",
                self.oracle.provider
            );
        }

        std::env::var(&self.oracle.api_key_env).with_context(|| {
            format!(
                "Environment variable {} not set. Set it in your .env file or as an environment variable with your OpenAI API key.",
                self.oracle.api_key_env
            )
        })?;

        if self.traversal.roots.is_empty() {
            anyhow::bail!("traversal.roots must list at least one top-level consideration");
        }

        if self.traversal.roots.iter().any(|r| r.trim().is_empty()) {
            anyhow::bail!("traversal.roots must not contain blank names");
        }

        if self.traversal.max_turns == 0 {
            anyhow::bail!("traversal.max_turns must be greater than 0");
        }

        for (name, t) in [
            ("decide_temperature", self.oracle.decide_temperature),
            ("select_temperature", self.oracle.select_temperature),
        ] {
            if !(0.0..=2.0).contains(&t) {
                anyhow::bail!("oracle.{} must be between 0.0 and 2.0", name);
            }
        }

        Ok(())
    }

    /// Get database path
    pub fn db_path(&self) -> &Path {
        &self.txgraph.db_path
    }

    /// Resolve deadline, if one is configured
    pub fn deadline(&self) -> Option<Duration> {
        match self.traversal.deadline_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Serialize config tests that mutate process-wide cwd and env so they don't race.
    static CONFIG_TEST_LOCK: Mutex<()> = Mutex::new(());

    const TEST_CONFIG: &str = r#"
[txgraph]
db_path = "./test.db"
log_level = "debug"

[oracle]
provider = "openai"
api_key_env = "TXGRAPH_TEST_OPENAI_KEY"
decide_model = "gpt-4.1-nano"
select_model = "gpt-4.1"

[traversal]
roots = ["SYMPTOM PROFILE", "PROSTATE SIZE / VOLUME"]
max_turns = 8
"#;

    /// Restores cwd when dropped (e.g. on panic).
    struct CwdGuard(std::path::PathBuf);
    impl Drop for CwdGuard {
        fn drop(&mut self) {
            let _ = std::env::set_current_dir(&self.0);
        }
    }

    fn with_config_env(config_path: &std::path::Path, api_key: Option<&str>, f: impl FnOnce()) {
        let original_config = std::env::var("TXGRAPH_CONFIG").ok();
        std::env::set_var("TXGRAPH_CONFIG", config_path.to_str().unwrap());
        match api_key {
            Some(k) => std::env::set_var("TXGRAPH_TEST_OPENAI_KEY", k),
            None => std::env::remove_var("TXGRAPH_TEST_OPENAI_KEY"),
        }
        f();
        std::env::remove_var("TXGRAPH_CONFIG");
        std::env::remove_var("TXGRAPH_TEST_OPENAI_KEY");
        if let Some(val) = original_config {
            std::env::set_var("TXGRAPH_CONFIG", val);
        }
    }

    fn write_config(temp_dir: &TempDir, content: &str) -> PathBuf {
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, content).unwrap();
        config_path.canonicalize().unwrap()
    }

    #[test]
    fn test_config_load_success() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let config_path = write_config(&temp_dir, TEST_CONFIG);
        let _cwd = CwdGuard(std::env::current_dir().unwrap());
        std::env::set_current_dir(temp_dir.path()).unwrap();
        with_config_env(&config_path, Some("test-key"), || {
            let config = Config::load();
            assert!(config.is_ok(), "Config::load() failed: {:?}", config.err());
            let config = config.unwrap();
            assert_eq!(config.txgraph.log_level, "debug");
            assert_eq!(config.traversal.max_turns, 8);
            assert_eq!(config.traversal.roots.len(), 2);
            assert_eq!(config.oracle.base_url, "https://api.openai.com/v1");
            assert_eq!(config.oracle.max_retries, 2);
            assert_eq!(config.traversal.cache_capacity, 256);
            assert_eq!(config.http_server.port, 8080);
        });
    }

    #[test]
    fn test_config_missing_api_key() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let config_path = write_config(&temp_dir, TEST_CONFIG);
        let _cwd = CwdGuard(std::env::current_dir().unwrap());
        std::env::set_current_dir(temp_dir.path()).unwrap();
        with_config_env(&config_path, None, || {
            let config = Config::load();
            assert!(config.is_err(), "Expected missing API key error");
            assert!(config.unwrap_err().to_string().contains("TXGRAPH_TEST_OPENAI_KEY"));
        });
    }

    #[test]
    fn test_config_loads_from_env_file() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let config_path = write_config(&temp_dir, TEST_CONFIG);
        fs::write(
            temp_dir.path().join(".env"),
            "TXGRAPH_TEST_OPENAI_KEY=test-key-from-env-file\n",
        )
        .unwrap();
        let _cwd = CwdGuard(std::env::current_dir().unwrap());
        std::env::set_current_dir(temp_dir.path()).unwrap();
        with_config_env(&config_path, None, || {
            let config = Config::load();
            assert!(config.is_ok(), "Config should load with API key from .env file");
        });
    }

    #[test]
    fn test_config_rejects_empty_roots() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let content = TEST_CONFIG.replace(
            r#"roots = ["SYMPTOM PROFILE", "PROSTATE SIZE / VOLUME"]"#,
            "roots = []",
        );
        let config_path = write_config(&temp_dir, &content);
        let _cwd = CwdGuard(std::env::current_dir().unwrap());
        std::env::set_current_dir(temp_dir.path()).unwrap();
        with_config_env(&config_path, Some("test-key"), || {
            let err = Config::load().unwrap_err();
            assert!(err.to_string().contains("traversal.roots"));
        });
    }

    #[test]
    fn test_config_rejects_unknown_provider() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let content = TEST_CONFIG.replace(r#"provider = "openai""#, r#"provider = "local""#);
        let config_path = write_config(&temp_dir, &content);
        let _cwd = CwdGuard(std::env::current_dir().unwrap());
        std::env::set_current_dir(temp_dir.path()).unwrap();
        with_config_env(&config_path, Some("test-key"), || {
            let err = Config::load().unwrap_err();
            assert!(err.to_string().contains("oracle.provider"));
        });
    }

    #[test]
    fn test_deadline_zero_disables() {
        let mut config = Config::from_toml(TEST_CONFIG).unwrap();
        assert_eq!(config.deadline(), Some(Duration::from_secs(120)));
        config.traversal.deadline_secs = 0;
        assert_eq!(config.deadline(), None);
    }

    #[test]
    fn test_config_invalid_path() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let original = std::env::var("TXGRAPH_CONFIG").ok();
        std::env::set_var("TXGRAPH_CONFIG", "nonexistent.toml");
        let config = Config::load();
        assert!(config.is_err());
        std::env::remove_var("TXGRAPH_CONFIG");
        if let Some(v) = original {
            std::env::set_var("TXGRAPH_CONFIG", v);
        }
    }
}
