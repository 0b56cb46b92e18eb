//! Configuration management
//!
//! Sources, lowest precedence first: built-in defaults, an optional
//! `config.{toml,json,yaml}` in the config directory, `QSYNC_*` environment
//! variables (`__` separates nesting, e.g. `QSYNC_AUTHORITY__BASE_URL`), and
//! a few plain environment variables kept for existing deployments.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Synchronization engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub authority: AuthorityConfig,

    #[serde(default)]
    pub stream: StreamConfig,

    #[serde(default)]
    pub reader: ReaderConfig,

    #[serde(default)]
    pub dedup: DedupConfig,
}

fn default_port() -> u16 {
    8089
}

/// Where the queue agent lives and how to talk to it
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorityConfig {
    pub base_url: Option<String>,
    pub shared_secret: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            shared_secret: None,
            timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    4000
}

/// How directive stream URLs are built
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamConfig {
    /// Public HTTPS prefix the player fetches audio from
    pub base_url: Option<String>,
    /// Artwork used when the snapshot has none
    pub fallback_art_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReaderConfig {
    #[serde(default = "default_first_settle_ms")]
    pub first_settle_ms: u64,
    #[serde(default = "default_second_settle_ms")]
    pub second_settle_ms: u64,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            first_settle_ms: default_first_settle_ms(),
            second_settle_ms: default_second_settle_ms(),
        }
    }
}

fn default_first_settle_ms() -> u64 {
    400
}

fn default_second_settle_ms() -> u64 {
    200
}

#[derive(Debug, Clone, Deserialize)]
pub struct DedupConfig {
    #[serde(default = "default_advance_window_secs")]
    pub advance_window_secs: u64,
    #[serde(default = "default_enqueue_window_secs")]
    pub enqueue_window_secs: u64,
    #[serde(default = "default_enqueue_link_window_secs")]
    pub enqueue_link_window_secs: u64,
    #[serde(default = "default_in_flight_secs")]
    pub in_flight_secs: u64,
    /// Shared ledger; process memory when unset
    pub redis_url: Option<String>,
    /// Bound on each Redis connect and command
    #[serde(default = "default_redis_timeout_ms")]
    pub redis_timeout_ms: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            advance_window_secs: default_advance_window_secs(),
            enqueue_window_secs: default_enqueue_window_secs(),
            enqueue_link_window_secs: default_enqueue_link_window_secs(),
            in_flight_secs: default_in_flight_secs(),
            redis_url: None,
            redis_timeout_ms: default_redis_timeout_ms(),
        }
    }
}

fn default_advance_window_secs() -> u64 {
    15
}

fn default_enqueue_window_secs() -> u64 {
    5
}

fn default_enqueue_link_window_secs() -> u64 {
    20
}

fn default_in_flight_secs() -> u64 {
    10
}

fn default_redis_timeout_ms() -> u64 {
    1000
}

impl Config {
    /// Reject configurations that cannot work for any event.
    ///
    /// Runs at startup so a missing secret or URL fails loudly instead of
    /// silently turning every event into a no-op.
    pub fn validate(&self) -> Result<()> {
        let base_url = self
            .authority
            .base_url
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| anyhow!("authority.base_url is required (QUEUE_AUTHORITY_URL)"))?;
        url::Url::parse(base_url)
            .map_err(|e| anyhow!("authority.base_url is not a valid URL: {}", e))?;

        if self
            .authority
            .shared_secret
            .as_deref()
            .map_or(true, str::is_empty)
        {
            return Err(anyhow!(
                "authority.shared_secret is required (QUEUE_SHARED_KEY)"
            ));
        }

        let stream_base = self
            .stream
            .base_url
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| anyhow!("stream.base_url is required (STREAM_BASE_URL)"))?;
        url::Url::parse(stream_base)
            .map_err(|e| anyhow!("stream.base_url is not a valid URL: {}", e))?;

        if self.dedup.enqueue_link_window_secs < self.dedup.advance_window_secs {
            return Err(anyhow!(
                "dedup.enqueue_link_window_secs ({}) must not be shorter than dedup.advance_window_secs ({})",
                self.dedup.enqueue_link_window_secs,
                self.dedup.advance_window_secs
            ));
        }

        Ok(())
    }
}

/// Queue agent configuration (runs next to MPD)
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_agent_port")]
    pub port: u16,
    pub shared_secret: Option<String>,
    #[serde(default)]
    pub mpd: MpdConfig,
    /// Delay between the priming play and stop
    #[serde(default = "default_prime_delay_ms")]
    pub prime_delay_ms: u64,
    /// Prefix for cover art URLs (`<art_base_url>/coverart.php/<file>`)
    pub art_base_url: Option<String>,
}

fn default_agent_port() -> u16 {
    8090
}

fn default_prime_delay_ms() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct MpdConfig {
    #[serde(default = "default_mpd_host")]
    pub host: String,
    #[serde(default = "default_mpd_port")]
    pub port: u16,
    pub password: Option<String>,
    #[serde(default = "default_mpd_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for MpdConfig {
    fn default() -> Self {
        Self {
            host: default_mpd_host(),
            port: default_mpd_port(),
            password: None,
            timeout_ms: default_mpd_timeout_ms(),
        }
    }
}

fn default_mpd_host() -> String {
    "127.0.0.1".to_string()
}

fn default_mpd_port() -> u16 {
    6600
}

fn default_mpd_timeout_ms() -> u64 {
    3000
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.shared_secret.as_deref().map_or(true, str::is_empty) {
            return Err(anyhow!(
                "agent.shared_secret is required (QUEUE_SHARED_KEY)"
            ));
        }
        if self.mpd.host.trim().is_empty() {
            return Err(anyhow!("agent.mpd.host must not be empty"));
        }
        Ok(())
    }
}

/// Get config directory (QSYNC_CONFIG_DIR, XDG_CONFIG_HOME or platform default)
pub fn get_config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("QSYNC_CONFIG_DIR") {
        return PathBuf::from(dir);
    }

    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join("Library/Application Support/voice-queue-bridge");
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            return PathBuf::from(xdg).join("voice-queue-bridge");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".config/voice-queue-bridge");
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("voice-queue-bridge");
        }
    }

    PathBuf::from(".")
}

/// Parse a port from the named env var, ignoring unparsable values
fn env_port(name: &str) -> Option<i64> {
    std::env::var(name)
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .map(i64::from)
}

/// Port precedence shared by both binaries: QSYNC_PORT > PORT > file > default
fn apply_port_override(
    builder: ::config::ConfigBuilder<::config::builder::DefaultState>,
    key: &str,
) -> Result<::config::ConfigBuilder<::config::builder::DefaultState>> {
    let port = if std::env::var("QSYNC_PORT").is_ok() {
        env_port("QSYNC_PORT")
    } else {
        env_port("PORT")
    };
    Ok(match port {
        Some(port) => builder.set_override(key, port)?,
        None => builder,
    })
}

fn base_builder(file_stem: &str) -> ::config::ConfigBuilder<::config::builder::DefaultState> {
    let config_dir = get_config_dir();
    ::config::Config::builder().add_source(
        ::config::File::with_name(&config_dir.join(file_stem).to_string_lossy()).required(false),
    )
}

/// Load engine configuration. Does not validate; call [`Config::validate`].
pub fn load_config() -> Result<Config> {
    let mut builder = base_builder("config")
        .set_default("port", default_port() as i64)?
        .add_source(
            ::config::Environment::with_prefix("QSYNC")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    builder = apply_port_override(builder, "port")?;

    if let Ok(url) = std::env::var("QUEUE_AUTHORITY_URL") {
        builder = builder.set_override("authority.base_url", url)?;
    }
    if let Ok(key) = std::env::var("QUEUE_SHARED_KEY") {
        builder = builder.set_override("authority.shared_secret", key)?;
    }
    if let Ok(url) = std::env::var("STREAM_BASE_URL") {
        builder = builder.set_override("stream.base_url", url)?;
    }
    if let Ok(url) = std::env::var("REDIS_URL") {
        builder = builder.set_override("dedup.redis_url", url)?;
    }

    Ok(builder.build()?.try_deserialize()?)
}

/// Load queue agent configuration from `agent.*` / `QSYNC_AGENT__*`
pub fn load_agent_config() -> Result<AgentConfig> {
    let mut builder = base_builder("agent")
        .set_default("port", default_agent_port() as i64)?
        .add_source(
            ::config::Environment::with_prefix("QSYNC_AGENT")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

    builder = apply_port_override(builder, "port")?;

    if let Ok(key) = std::env::var("QUEUE_SHARED_KEY") {
        builder = builder.set_override("shared_secret", key)?;
    }
    if let Ok(host) = std::env::var("MPD_HOST") {
        builder = builder.set_override("mpd.host", host)?;
    }
    if let Some(port) = env_port("MPD_PORT") {
        builder = builder.set_override("mpd.port", port)?;
    }

    Ok(builder.build()?.try_deserialize()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    const ENV_VARS: &[&str] = &[
        "QSYNC_PORT",
        "PORT",
        "QUEUE_AUTHORITY_URL",
        "QUEUE_SHARED_KEY",
        "STREAM_BASE_URL",
        "REDIS_URL",
        "MPD_HOST",
        "MPD_PORT",
        "QSYNC_DEDUP__ADVANCE_WINDOW_SECS",
    ];

    fn clean_env(config_dir: &std::path::Path) {
        for var in ENV_VARS {
            env::remove_var(var);
        }
        env::set_var("QSYNC_CONFIG_DIR", config_dir);
    }

    fn valid_engine_env() {
        env::set_var("QUEUE_AUTHORITY_URL", "http://moode.local:8090");
        env::set_var("QUEUE_SHARED_KEY", "s3cret");
        env::set_var("STREAM_BASE_URL", "https://music.example.net/stream");
    }

    #[test]
    #[serial]
    fn defaults_without_sources() {
        let dir = tempfile::tempdir().expect("create temp dir");
        clean_env(dir.path());

        let config = load_config().expect("config should load");
        env::remove_var("QSYNC_CONFIG_DIR");

        assert_eq!(config.port, 8089);
        assert_eq!(config.authority.timeout_ms, 4000);
        assert_eq!(config.reader.first_settle_ms, 400);
        assert_eq!(config.reader.second_settle_ms, 200);
        assert_eq!(config.dedup.advance_window_secs, 15);
        assert_eq!(config.dedup.enqueue_window_secs, 5);
        assert_eq!(config.dedup.enqueue_link_window_secs, 20);
        assert!(config.dedup.redis_url.is_none());
        assert_eq!(config.dedup.redis_timeout_ms, 1000);
    }

    #[test]
    #[serial]
    fn missing_secret_fails_validation() {
        let dir = tempfile::tempdir().expect("create temp dir");
        clean_env(dir.path());
        env::set_var("QUEUE_AUTHORITY_URL", "http://moode.local:8090");
        env::set_var("STREAM_BASE_URL", "https://music.example.net/stream");

        let config = load_config().expect("config should load");
        clean_env(dir.path());
        env::remove_var("QSYNC_CONFIG_DIR");

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("shared_secret"));
    }

    #[test]
    #[serial]
    fn missing_base_url_fails_validation() {
        let dir = tempfile::tempdir().expect("create temp dir");
        clean_env(dir.path());
        env::set_var("QUEUE_SHARED_KEY", "s3cret");
        env::set_var("STREAM_BASE_URL", "https://music.example.net/stream");

        let config = load_config().expect("config should load");
        clean_env(dir.path());
        env::remove_var("QSYNC_CONFIG_DIR");

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("base_url"));
    }

    #[test]
    #[serial]
    fn legacy_env_vars_fill_engine_config() {
        let dir = tempfile::tempdir().expect("create temp dir");
        clean_env(dir.path());
        valid_engine_env();

        let config = load_config().expect("config should load");
        clean_env(dir.path());
        env::remove_var("QSYNC_CONFIG_DIR");

        config.validate().expect("config should validate");
        assert_eq!(
            config.authority.base_url.as_deref(),
            Some("http://moode.local:8090")
        );
        assert_eq!(config.authority.shared_secret.as_deref(), Some("s3cret"));
    }

    #[test]
    #[serial]
    fn nested_env_overrides_windows() {
        let dir = tempfile::tempdir().expect("create temp dir");
        clean_env(dir.path());
        env::set_var("QSYNC_DEDUP__ADVANCE_WINDOW_SECS", "30");

        let config = load_config().expect("config should load");
        clean_env(dir.path());
        env::remove_var("QSYNC_CONFIG_DIR");

        assert_eq!(config.dedup.advance_window_secs, 30);
    }

    #[test]
    #[serial]
    fn link_window_shorter_than_advance_is_rejected() {
        let dir = tempfile::tempdir().expect("create temp dir");
        clean_env(dir.path());
        valid_engine_env();

        let mut config = load_config().expect("config should load");
        clean_env(dir.path());
        env::remove_var("QSYNC_CONFIG_DIR");

        config.dedup.enqueue_link_window_secs = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn qsync_port_takes_precedence_over_port() {
        let dir = tempfile::tempdir().expect("create temp dir");
        clean_env(dir.path());
        env::set_var("QSYNC_PORT", "5000");
        env::set_var("PORT", "3000");

        let config = load_config().expect("config should load");
        clean_env(dir.path());
        env::remove_var("QSYNC_CONFIG_DIR");

        assert_eq!(config.port, 5000);
    }

    #[test]
    #[serial]
    fn invalid_port_uses_default() {
        let dir = tempfile::tempdir().expect("create temp dir");
        clean_env(dir.path());
        env::set_var("PORT", "not-a-number");

        let config = load_config().expect("config should load");
        clean_env(dir.path());
        env::remove_var("QSYNC_CONFIG_DIR");

        assert_eq!(config.port, 8089);
    }

    #[test]
    #[serial]
    fn config_file_is_read_from_config_dir() {
        let dir = tempfile::tempdir().expect("create temp dir");
        std::fs::write(
            dir.path().join("config.toml"),
            r#"
port = 9100

[authority]
base_url = "http://10.0.0.5:8090"
shared_secret = "from-file"

[stream]
base_url = "https://music.example.net/stream"
"#,
        )
        .expect("write config file");
        clean_env(dir.path());

        let config = load_config().expect("config should load");
        env::remove_var("QSYNC_CONFIG_DIR");

        config.validate().expect("config should validate");
        assert_eq!(config.port, 9100);
        assert_eq!(config.authority.shared_secret.as_deref(), Some("from-file"));
    }

    #[test]
    #[serial]
    fn agent_config_reads_mpd_env() {
        let dir = tempfile::tempdir().expect("create temp dir");
        clean_env(dir.path());
        env::set_var("QUEUE_SHARED_KEY", "s3cret");
        env::set_var("MPD_HOST", "192.168.1.20");
        env::set_var("MPD_PORT", "6601");

        let config = load_agent_config().expect("agent config should load");
        clean_env(dir.path());
        env::remove_var("QSYNC_CONFIG_DIR");

        config.validate().expect("agent config should validate");
        assert_eq!(config.port, 8090);
        assert_eq!(config.mpd.host, "192.168.1.20");
        assert_eq!(config.mpd.port, 6601);
        assert_eq!(config.prime_delay_ms, 300);
    }

    #[test]
    #[serial]
    fn agent_without_secret_fails_validation() {
        let dir = tempfile::tempdir().expect("create temp dir");
        clean_env(dir.path());

        let config = load_agent_config().expect("agent config should load");
        env::remove_var("QSYNC_CONFIG_DIR");

        assert!(config.validate().is_err());
    }
}
