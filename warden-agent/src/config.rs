//! Configuration for the warden agent.
//!
//! Configuration can be loaded from multiple sources with the following precedence (highest to
//! lowest):
//!
//! 1. Environment variables (prefixed with `WARDEN__`)
//! 2. YAML configuration file (specified via `-c` or `--config` flag)
//! 3. Defaults
//!
//! See [`Config`] for a description of all configuration fields and their defaults.
//!
//! # Environment Variables
//!
//! Environment variables use `WARDEN__` as a prefix and double underscores (`__`) to denote
//! nested configuration structures. For example:
//!
//! - `WARDEN__API_URL=https://console.example.com/api/` sets the console API root
//! - `WARDEN__CREDENTIALS__USERNAME=agent` sets the sign-in username
//! - `WARDEN__TRIGGERS__POLL_INTERVAL=30s` sets the polling interval
//!
//! # YAML Configuration File
//!
//! The above configuration in YAML format would look like this:
//!
//! ```yaml
//! api_url: https://console.example.com/api/
//!
//! credentials:
//!   username: agent
//!   password: hunter2
//!
//! triggers:
//!   poll_interval: 30s
//! ```

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use figment::providers::{Env, Format, Serialized, Yaml};
use secrecy::{CloneableSecret, SecretBox, SerializableSecret, zeroize::Zeroize};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;
use warden_client::SessionConfig;
use warden_client::guard::DEFAULT_LOGIN_PATH;
use warden_client::triggers::TriggerConfig;
use warden_types::NavEntry;

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "WARDEN__";

/// Newtype around `String` that may protect against accidental
/// logging of secrets in our configuration struct. Use with
/// [`secrecy::SecretBox`].
#[derive(Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConfigSecret(String);

impl ConfigSecret {
    /// Returns the secret as a string slice.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for ConfigSecret {
    fn from(str: &str) -> Self {
        ConfigSecret(str.to_string())
    }
}

impl std::ops::Deref for ConfigSecret {
    type Target = str;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Debug for ConfigSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "[redacted]")
    }
}

impl CloneableSecret for ConfigSecret {}
impl SerializableSecret for ConfigSecret {}
impl Zeroize for ConfigSecret {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

/// Credentials the agent signs in with when no persisted session can be restored.
///
/// Used in: [`Config::credentials`]
#[derive(Debug, Deserialize, Serialize)]
pub struct Credentials {
    /// Login name.
    ///
    /// # Environment Variable
    ///
    /// `WARDEN__CREDENTIALS__USERNAME`
    pub username: String,

    /// Password.
    ///
    /// # Environment Variable
    ///
    /// `WARDEN__CREDENTIALS__PASSWORD`
    pub password: SecretBox<ConfigSecret>,
}

/// Session persistence and consistency settings.
///
/// Used in: [`Config::session`]
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Session {
    /// File the session token is persisted to.
    ///
    /// When set, the agent restores its session from this file on start-up instead of signing
    /// in again. When `None`, the token is only kept in memory.
    ///
    /// # Default
    ///
    /// `None`
    ///
    /// # Environment Variable
    ///
    /// `WARDEN__SESSION__TOKEN_FILE`
    pub token_file: Option<PathBuf>,

    /// Discard refresh responses that resolve after a newer refresh has been applied.
    ///
    /// # Default
    ///
    /// `false` (the last response to resolve wins)
    ///
    /// # Environment Variable
    ///
    /// `WARDEN__SESSION__DISCARD_STALE_REFRESHES`
    pub discard_stale_refreshes: bool,
}

impl Session {
    /// Returns the settings for the session store.
    pub fn store_config(&self) -> SessionConfig {
        SessionConfig {
            discard_stale_refreshes: self.discard_stale_refreshes,
        }
    }
}

/// Guard settings.
///
/// Used in: [`Config::guards`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Guards {
    /// Location of the sign-in page used for authentication redirects.
    ///
    /// # Default
    ///
    /// `"/login"`
    ///
    /// # Environment Variable
    ///
    /// `WARDEN__GUARDS__LOGIN_PATH`
    pub login_path: String,

    /// Block pages whose capability check fails.
    ///
    /// When disabled, failed page-level checks are only logged and individual elements are
    /// expected to hide themselves.
    ///
    /// # Default
    ///
    /// `false`
    ///
    /// # Environment Variable
    ///
    /// `WARDEN__GUARDS__ENFORCE`
    pub enforce: bool,
}

impl Default for Guards {
    fn default() -> Self {
        Self {
            login_path: DEFAULT_LOGIN_PATH.to_owned(),
            enforce: false,
        }
    }
}

/// [Sentry](https://sentry.io/) error tracking configuration.
///
/// Sentry is disabled by default and only enabled when a DSN is provided.
///
/// Used in: [`Config::sentry`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Sentry {
    /// Sentry DSN (Data Source Name).
    ///
    /// # Default
    ///
    /// `None` (Sentry disabled)
    ///
    /// # Environment Variable
    ///
    /// `WARDEN__SENTRY__DSN`
    pub dsn: Option<SecretBox<ConfigSecret>>,

    /// Environment name for this deployment, e.g. `"production"`.
    ///
    /// # Environment Variable
    ///
    /// `WARDEN__SENTRY__ENVIRONMENT`
    pub environment: Option<Cow<'static, str>>,

    /// Name identifying this agent instance.
    ///
    /// # Environment Variable
    ///
    /// `WARDEN__SENTRY__SERVER_NAME`
    pub server_name: Option<Cow<'static, str>>,

    /// Sample rate for error events, between `0.0` and `1.0`.
    ///
    /// # Default
    ///
    /// `1.0`
    ///
    /// # Environment Variable
    ///
    /// `WARDEN__SENTRY__SAMPLE_RATE`
    pub sample_rate: f32,

    /// Sample rate for performance traces, between `0.0` and `1.0`.
    ///
    /// # Default
    ///
    /// `0.01`
    ///
    /// # Environment Variable
    ///
    /// `WARDEN__SENTRY__TRACES_SAMPLE_RATE`
    pub traces_sample_rate: f32,

    /// Enable debug output of the Sentry SDK.
    ///
    /// # Environment Variable
    ///
    /// `WARDEN__SENTRY__DEBUG`
    pub debug: bool,

    /// Additional tags attached to every event.
    ///
    /// # Environment Variables
    ///
    /// `WARDEN__SENTRY__TAGS__<KEY>=<VALUE>`
    pub tags: BTreeMap<String, String>,
}

impl Sentry {
    /// Returns whether Sentry is enabled.
    pub fn is_enabled(&self) -> bool {
        self.dsn.is_some()
    }
}

impl Default for Sentry {
    fn default() -> Self {
        Self {
            dsn: None,
            environment: None,
            server_name: None,
            sample_rate: 1.0,
            traces_sample_rate: 0.01,
            debug: false,
            tags: BTreeMap::new(),
        }
    }
}

/// Log output format.
///
/// Used in: [`Logging::format`]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Pretty output when attached to a terminal, JSON otherwise.
    Auto,
    /// Multi-line human readable output.
    Pretty,
    /// Single-line output without timestamps.
    Simplified,
    /// One JSON object per line.
    Json,
}

/// Error returned when parsing an unknown [`LogFormat`].
#[derive(Clone, Debug)]
pub struct FormatParseError(String);

impl fmt::Display for FormatParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            r#"error parsing "{}" as format: expected one of "auto", "pretty", "simplified", "json""#,
            self.0
        )
    }
}

impl std::str::FromStr for LogFormat {
    type Err = FormatParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let result = match s {
            "" => LogFormat::Auto,
            s if s.eq_ignore_ascii_case("auto") => LogFormat::Auto,
            s if s.eq_ignore_ascii_case("pretty") => LogFormat::Pretty,
            s if s.eq_ignore_ascii_case("simplified") => LogFormat::Simplified,
            s if s.eq_ignore_ascii_case("json") => LogFormat::Json,
            s => return Err(FormatParseError(s.into())),
        };

        Ok(result)
    }
}

impl std::error::Error for FormatParseError {}

mod display_fromstr {
    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
        T: std::fmt::Display,
    {
        serializer.collect_str(&value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        D: serde::Deserializer<'de>,
        T: std::str::FromStr,
        <T as std::str::FromStr>::Err: std::fmt::Display,
    {
        use serde::Deserialize;
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Logging configuration.
///
/// `RUST_LOG` takes precedence over [`Logging::level`] when set.
///
/// Used in: [`Config::logging`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Logging {
    /// Minimum level of emitted log lines.
    ///
    /// # Default
    ///
    /// `info`
    ///
    /// # Environment Variable
    ///
    /// `WARDEN__LOGGING__LEVEL`
    #[serde(with = "display_fromstr")]
    pub level: LevelFilter,

    /// Output format.
    ///
    /// # Default
    ///
    /// `auto`
    ///
    /// # Environment Variable
    ///
    /// `WARDEN__LOGGING__FORMAT`
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
        }
    }
}

/// Main configuration struct for the warden agent.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Root of the console API. Request paths are resolved relative to it.
    ///
    /// # Default
    ///
    /// `"http://localhost:3000/api/"`
    ///
    /// # Environment Variable
    ///
    /// `WARDEN__API_URL`
    pub api_url: String,

    /// Total timeout for each request to the console.
    ///
    /// # Default
    ///
    /// `30s`
    ///
    /// # Environment Variable
    ///
    /// `WARDEN__TIMEOUT`
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Credentials used when no persisted session can be restored.
    pub credentials: Option<Credentials>,

    /// Session persistence and consistency settings.
    pub session: Session,

    /// Which refresh triggers the `run` command starts.
    ///
    /// # Environment Variables
    ///
    /// - `WARDEN__TRIGGERS__POLLING=false`
    /// - `WARDEN__TRIGGERS__POLL_INTERVAL=30s`
    pub triggers: TriggerConfig,

    /// Guard settings.
    pub guards: Guards,

    /// Navigation menu evaluated by the `whoami` command.
    ///
    /// Only configurable through the YAML file.
    pub navigation: Vec<NavEntry>,

    /// Logging configuration.
    pub logging: Logging,

    /// Sentry configuration.
    pub sentry: Sentry,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:3000/api/".to_owned(),
            timeout: Duration::from_secs(30),
            credentials: None,
            session: Session::default(),
            triggers: TriggerConfig::default(),
            guards: Guards::default(),
            navigation: Vec::new(),
            logging: Logging::default(),
            sentry: Sentry::default(),
        }
    }
}

impl Config {
    /// Loads the configuration from defaults, the optional YAML file at `path` and the
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        Ok(config)
    }
}
