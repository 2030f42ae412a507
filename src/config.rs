use crate::logging::LoggingConfig;
use crate::mips::MipsClient;
use crate::telegram::TelegramGateway;
use log::LevelFilter;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const ENV_KEY: &str = "ENV";
pub const LOG_LEVEL_KEY: &str = "LOGGING_LEVEL";
pub const CONFIG_DIR_KEY: &str = "CONFIG_DIR";
pub const DEFAULT_CONFIG_DIR: &str = "./config";

pub const MIPS_TARGET: &str = "mips";
pub const TELEGRAM_TARGET: &str = "telegram";
pub const SHEETS_TARGET: &str = "google_sheets";

const TELEGRAM_BASE_URL: &str = "https://api.telegram.org";
const SHEETS_BASE_URL: &str = "https://sheets.googleapis.com";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set in the environment")]
    MissingEnv(&'static str),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("target {target}: rps for {scope} must be a positive number, got {rps}")]
    InvalidRps {
        target: String,
        scope: String,
        rps: f64,
    },
    #[error("target {target}: {reason}")]
    InvalidRateConfig { target: String, reason: String },
    #[error("target {target}: invalid base url {url:?}: {source}")]
    InvalidUrl {
        target: String,
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("target {0}: timeout must be at least one second")]
    InvalidTimeout(String),
    #[error("unknown target {0}")]
    UnknownTarget(String),
    #[error("target {target} has no rate limit configured for method {method:?}")]
    UnknownMethod { target: String, method: String },
    #[error("invalid logging setup: {0}")]
    Logging(String),
}

/// How a target's `rps_config` is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParsingMode {
    /// One ceiling per named method.
    Method,
    /// A single ceiling for every call to the target.
    Blanket,
}

impl fmt::Display for ParsingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParsingMode::Method => f.write_str("method"),
            ParsingMode::Blanket => f.write_str("blanket"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateScope {
    Blanket,
    /// Lower-cased method name.
    Method(String),
}

impl fmt::Display for RateScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateScope::Blanket => f.write_str("blanket"),
            RateScope::Method(m) => f.write_str(m),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitSpec {
    pub scope: RateScope,
    pub rps: f64,
}

/// Validated rate settings of a single target.
///
/// In blanket mode `specs` holds exactly one blanket entry; in method mode
/// it holds one entry per distinct method. `burst` is the bucket capacity.
#[derive(Debug, Clone, PartialEq)]
pub struct RateConfig {
    pub parsing_mode: ParsingMode,
    pub specs: Vec<RateLimitSpec>,
    pub burst: u32,
}

fn check_rps(target: &str, scope: &RateScope, rps: f64) -> Result<(), ConfigError> {
    if rps.is_finite() && rps > 0.0 {
        return Ok(());
    }
    Err(ConfigError::InvalidRps {
        target: target.to_string(),
        scope: scope.to_string(),
        rps,
    })
}

impl RateConfig {
    pub fn blanket(rps: f64) -> Result<Self, ConfigError> {
        let cfg = Self {
            parsing_mode: ParsingMode::Blanket,
            specs: vec![RateLimitSpec {
                scope: RateScope::Blanket,
                rps,
            }],
            burst: 1,
        };
        cfg.validate("<unnamed>")?;
        Ok(cfg)
    }

    pub fn per_method<S: AsRef<str>>(
        methods: impl IntoIterator<Item = (S, f64)>,
    ) -> Result<Self, ConfigError> {
        let cfg = Self {
            parsing_mode: ParsingMode::Method,
            specs: methods
                .into_iter()
                .map(|(name, rps)| RateLimitSpec {
                    scope: RateScope::Method(name.as_ref().to_ascii_lowercase()),
                    rps,
                })
                .collect(),
            burst: 1,
        };
        cfg.validate("<unnamed>")?;
        Ok(cfg)
    }

    pub fn with_burst(mut self, burst: u32) -> Result<Self, ConfigError> {
        self.burst = burst;
        self.validate("<unnamed>")?;
        Ok(self)
    }

    /// Checks every invariant the gate relies on.
    pub fn validate(&self, target: &str) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidRateConfig {
            target: target.to_string(),
            reason: reason.to_string(),
        };
        if self.burst == 0 {
            return Err(invalid("burst must be at least 1"));
        }
        match self.parsing_mode {
            ParsingMode::Blanket => {
                if self.specs.len() != 1 || self.specs[0].scope != RateScope::Blanket {
                    return Err(invalid("blanket mode needs exactly one rps value"));
                }
            }
            ParsingMode::Method => {
                if self.specs.is_empty() {
                    return Err(invalid("method mode needs at least one method"));
                }
                let mut seen = Vec::with_capacity(self.specs.len());
                for spec in &self.specs {
                    match &spec.scope {
                        RateScope::Blanket => {
                            return Err(invalid("method mode cannot hold a blanket rps"))
                        }
                        RateScope::Method(m) if seen.contains(&m) => {
                            return Err(invalid(&format!("method {m} is configured twice")))
                        }
                        RateScope::Method(m) => seen.push(m),
                    }
                }
            }
        }
        for spec in &self.specs {
            check_rps(target, &spec.scope, spec.rps)?;
        }
        Ok(())
    }

    /// Fails when method mode leaves out any of `methods`; blanket mode
    /// covers every method.
    pub fn require(&self, target: &str, methods: &[&str]) -> Result<(), ConfigError> {
        if self.parsing_mode == ParsingMode::Blanket {
            return Ok(());
        }
        for method in methods {
            let wanted = method.to_ascii_lowercase();
            let configured = self
                .specs
                .iter()
                .any(|spec| matches!(&spec.scope, RateScope::Method(m) if *m == wanted));
            if !configured {
                return Err(ConfigError::UnknownMethod {
                    target: target.to_string(),
                    method: wanted,
                });
            }
        }
        Ok(())
    }

    /// Builds the config from the YAML `rps_config_parsing_mode`/`rps_config` pair.
    fn from_raw(target: &str, mode: ParsingMode, raw: RawRpsConfig) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidRateConfig {
            target: target.to_string(),
            reason: reason.to_string(),
        };
        let specs = match mode {
            ParsingMode::Blanket => {
                if raw.method.is_some() {
                    return Err(invalid("rps_config.method is not allowed in blanket mode"));
                }
                let rps = raw
                    .rps
                    .ok_or_else(|| invalid("rps_config.rps is required in blanket mode"))?;
                vec![RateLimitSpec {
                    scope: RateScope::Blanket,
                    rps,
                }]
            }
            ParsingMode::Method => {
                if raw.rps.is_some() {
                    return Err(invalid("rps_config.rps is not allowed in method mode"));
                }
                let methods = raw
                    .method
                    .ok_or_else(|| invalid("rps_config.method is required in method mode"))?;
                methods
                    .into_iter()
                    .map(|(name, m)| RateLimitSpec {
                        scope: RateScope::Method(name.to_ascii_lowercase()),
                        rps: m.rps,
                    })
                    .collect()
            }
        };
        let cfg = Self {
            parsing_mode: mode,
            specs,
            burst: raw.burst.unwrap_or(1),
        };
        cfg.validate(target)?;
        Ok(cfg)
    }
}

/// A remote endpoint with its own timeout and rate ceiling.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub name: String,
    pub base_url: Url,
    pub timeout: Duration,
    pub rate: RateConfig,
}

impl Target {
    pub fn new(
        name: &str,
        base_url: &str,
        timeout_secs: u64,
        rate: RateConfig,
    ) -> Result<Self, ConfigError> {
        let base_url = Url::parse(base_url).map_err(|source| ConfigError::InvalidUrl {
            target: name.to_string(),
            url: base_url.to_string(),
            source,
        })?;
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout(name.to_string()));
        }
        rate.validate(name)?;
        Ok(Self {
            name: name.to_string(),
            base_url,
            timeout: Duration::from_secs(timeout_secs),
            rate,
        })
    }

    /// `base_url` joined with `path`, without doubling slashes.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: base_url={} timeout={}s mode={}",
            self.name,
            self.base_url,
            self.timeout.as_secs(),
            self.rate.parsing_mode
        )?;
        for spec in &self.rate.specs {
            write!(f, " {}={}rps", spec.scope, spec.rps)?;
        }
        if self.rate.burst > 1 {
            write!(f, " burst={}", self.rate.burst)?;
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct MipsConfig {
    pub user: String,
    pub password: String,
    pub target: Target,
}

impl fmt::Debug for MipsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MipsConfig")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("target", &self.target)
            .finish()
    }
}

#[derive(Clone)]
pub struct TelegramConfig {
    pub bot_secret: String,
    pub chat_id: i64,
    pub log_chat_id: i64,
    pub target: Target,
}

impl fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_secret", &"<redacted>")
            .field("chat_id", &self.chat_id)
            .field("log_chat_id", &self.log_chat_id)
            .field("target", &self.target)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TabConfig {
    pub name: String,
    #[serde(default)]
    pub row_limit: Option<u64>,
}

/// Google Sheets settings. Only the target is used by this crate; the
/// spreadsheet layout is carried for the external sheet tooling.
#[derive(Debug, Clone)]
pub struct SheetsConfig {
    pub spreadsheet: String,
    pub tabs: BTreeMap<String, TabConfig>,
    pub token: PathBuf,
    pub target: Target,
}

/// Runtime configuration of the job.
///
/// Sourced from `<config_dir>/<ENV>.yaml` and the secrets file it points to.
#[derive(Debug, Clone)]
pub struct Config {
    pub env: String,
    pub log_level: LevelFilter,
    pub sleep_between_runs: Duration,
    pub mips: MipsConfig,
    pub telegram: TelegramConfig,
    pub sheets: SheetsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize)]
struct RawMethodRps {
    rps: f64,
}

#[derive(Debug, Default, Deserialize)]
struct RawRpsConfig {
    #[serde(default)]
    method: Option<BTreeMap<String, RawMethodRps>>,
    #[serde(default)]
    rps: Option<f64>,
    #[serde(default)]
    burst: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawMips {
    base_url: String,
    timeout: u64,
    rps_config_parsing_mode: ParsingMode,
    rps_config: RawRpsConfig,
}

#[derive(Debug, Deserialize)]
struct RawTelegram {
    #[serde(default)]
    base_url: Option<String>,
    chat_id: i64,
    log_chat_id: i64,
    timeout: u64,
    rps_config_parsing_mode: ParsingMode,
    rps_config: RawRpsConfig,
}

fn default_sheets_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize)]
struct RawSheets {
    #[serde(default)]
    base_url: Option<String>,
    spreadsheet: String,
    #[serde(default)]
    tabs: BTreeMap<String, TabConfig>,
    token: PathBuf,
    read_rps: f64,
    write_rps: f64,
    #[serde(default = "default_sheets_timeout")]
    request_timeout: u64,
}

fn default_sleep_between_runs() -> u64 {
    60
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    secrets_yaml: PathBuf,
    #[serde(default = "default_sleep_between_runs")]
    sleep_between_runs: u64,
    mips: RawMips,
    telegram: RawTelegram,
    google_sheets: RawSheets,
    #[serde(default)]
    logging: Option<LoggingConfig>,
}

#[derive(Debug, Deserialize)]
struct RawMipsSecrets {
    user: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct RawTelegramSecrets {
    bot_secret: String,
}

#[derive(Debug, Deserialize)]
struct RawSecrets {
    mips: RawMipsSecrets,
    telegram: RawTelegramSecrets,
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_yaml<T: for<'de> Deserialize<'de>>(path: &Path, text: &str) -> Result<T, ConfigError> {
    serde_yaml::from_str(text).map_err(|source| ConfigError::Yaml {
        path: path.to_path_buf(),
        source,
    })
}

pub fn parse_log_level(raw: &str) -> Result<LevelFilter, ConfigError> {
    LevelFilter::from_str(raw.trim())
        .map_err(|_| ConfigError::Logging(format!("unknown log level {raw:?}")))
}

impl Config {
    /// Load configuration from environment.
    ///
    /// Env vars (a `.env` file in the working directory is honoured):
    /// - ENV [required]: name of the config file, `<ENV>.yaml`
    /// - CONFIG_DIR (default: ./config)
    /// - LOGGING_LEVEL (default: debug)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_in(None)
    }

    /// Same as [`Config::from_env`] but `config_dir` wins over `CONFIG_DIR`.
    pub fn from_env_in(config_dir: Option<&Path>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let env_name = env::var(ENV_KEY).map_err(|_| ConfigError::MissingEnv(ENV_KEY))?;
        let dir = match config_dir {
            Some(d) => d.to_path_buf(),
            None => env::var(CONFIG_DIR_KEY)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_DIR)),
        };
        let mut cfg = Self::load(&dir, &env_name)?;
        if let Ok(raw) = env::var(LOG_LEVEL_KEY) {
            cfg.log_level = parse_log_level(&raw)?;
        }
        Ok(cfg)
    }

    /// Reads `<config_dir>/<env_name>.yaml` and its secrets file.
    pub fn load(config_dir: &Path, env_name: &str) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(format!("{env_name}.yaml"));
        let raw: RawConfig = parse_yaml(&config_path, &read_file(&config_path)?)?;
        let secrets_path = raw.secrets_yaml.clone();
        let secrets: RawSecrets = parse_yaml(&secrets_path, &read_file(&secrets_path)?)?;
        Self::from_raw(env_name, raw, secrets)
    }

    /// Parses both documents from memory; used by [`Config::load`] and tests.
    pub fn from_yaml_str(env_name: &str, config: &str, secrets: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = parse_yaml(Path::new(&format!("{env_name}.yaml")), config)?;
        let secrets: RawSecrets = parse_yaml(&raw.secrets_yaml, secrets)?;
        Self::from_raw(env_name, raw, secrets)
    }

    fn from_raw(env_name: &str, raw: RawConfig, secrets: RawSecrets) -> Result<Self, ConfigError> {
        let mips_rate = RateConfig::from_raw(
            MIPS_TARGET,
            raw.mips.rps_config_parsing_mode,
            raw.mips.rps_config,
        )?;
        mips_rate.require(MIPS_TARGET, MipsClient::REQUIRED_METHODS)?;
        let mips = MipsConfig {
            user: secrets.mips.user,
            password: secrets.mips.password,
            target: Target::new(MIPS_TARGET, &raw.mips.base_url, raw.mips.timeout, mips_rate)?,
        };

        let tg_rate = RateConfig::from_raw(
            TELEGRAM_TARGET,
            raw.telegram.rps_config_parsing_mode,
            raw.telegram.rps_config,
        )?;
        tg_rate.require(TELEGRAM_TARGET, TelegramGateway::REQUIRED_METHODS)?;
        let tg_url = raw
            .telegram
            .base_url
            .unwrap_or_else(|| TELEGRAM_BASE_URL.to_string());
        let telegram = TelegramConfig {
            bot_secret: secrets.telegram.bot_secret,
            chat_id: raw.telegram.chat_id,
            log_chat_id: raw.telegram.log_chat_id,
            target: Target::new(TELEGRAM_TARGET, &tg_url, raw.telegram.timeout, tg_rate)?,
        };

        let gs = raw.google_sheets;
        let sheets_rate = RateConfig::per_method([("read", gs.read_rps), ("write", gs.write_rps)])
            .map_err(|e| match e {
                ConfigError::InvalidRps { scope, rps, .. } => ConfigError::InvalidRps {
                    target: SHEETS_TARGET.to_string(),
                    scope,
                    rps,
                },
                other => other,
            })?;
        let sheets_url = gs.base_url.unwrap_or_else(|| SHEETS_BASE_URL.to_string());
        let sheets = SheetsConfig {
            spreadsheet: gs.spreadsheet,
            tabs: gs.tabs,
            token: gs.token,
            target: Target::new(SHEETS_TARGET, &sheets_url, gs.request_timeout, sheets_rate)?,
        };

        let logging = raw.logging.unwrap_or_default();
        logging.validate()?;

        Ok(Self {
            env: env_name.to_string(),
            log_level: LevelFilter::Debug,
            sleep_between_runs: Duration::from_secs(raw.sleep_between_runs),
            mips,
            telegram,
            sheets,
            logging,
        })
    }

    pub fn targets(&self) -> [&Target; 3] {
        [&self.mips.target, &self.telegram.target, &self.sheets.target]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRETS: &str = r#"
mips:
  user: robot
  password: hunter2
telegram:
  bot_secret: "123:abc"
"#;

    fn config_yaml(mips_rps: &str, tg_rps: &str) -> String {
        format!(
            r#"
secrets_yaml: secrets.yaml
sleep_between_runs: 300
mips:
  base_url: "http://127.0.0.1:9000/MIPS"
  timeout: 30
{mips_rps}
telegram:
  chat_id: 100
  log_chat_id: 200
  timeout: 10
{tg_rps}
google_sheets:
  spreadsheet: sheet-id
  token: ./sa.json
  read_rps: 1
  write_rps: 0.5
  tabs:
    control_panel:
      name: Control Panel
      schema:
        toggle: {{ sheet_name: Toggle, type: Utf8 }}
    execute_logs:
      name: Execute Logs
      row_limit: 1000
"#
        )
    }

    const MIPS_METHOD: &str = r#"
  rps_config_parsing_mode: method
  rps_config:
    method:
      get: { rps: 10 }
      put: { rps: 5 }
      post: { rps: 5 }
"#;

    const TG_BLANKET: &str = r#"
  rps_config_parsing_mode: blanket
  rps_config:
    rps: 1
"#;

    #[test]
    fn parses_full_config() {
        let cfg = Config::from_yaml_str("test", &config_yaml(MIPS_METHOD, TG_BLANKET), SECRETS)
            .unwrap();
        assert_eq!(cfg.env, "test");
        assert_eq!(cfg.sleep_between_runs, Duration::from_secs(300));
        assert_eq!(cfg.mips.user, "robot");
        assert_eq!(cfg.mips.target.rate.parsing_mode, ParsingMode::Method);
        assert_eq!(cfg.mips.target.rate.specs.len(), 3);
        assert_eq!(cfg.telegram.target.rate.parsing_mode, ParsingMode::Blanket);
        assert_eq!(cfg.telegram.target.base_url.as_str(), "https://api.telegram.org/");
        assert_eq!(cfg.sheets.target.timeout, Duration::from_secs(60));
        assert_eq!(cfg.sheets.tabs["execute_logs"].row_limit, Some(1000));
        assert_eq!(cfg.sheets.tabs["control_panel"].name, "Control Panel");
        assert_eq!(cfg.targets().len(), 3);
    }

    #[test]
    fn debug_output_hides_secrets() {
        let cfg = Config::from_yaml_str("test", &config_yaml(MIPS_METHOD, TG_BLANKET), SECRETS)
            .unwrap();
        let dbg = format!("{:?}", cfg);
        assert!(!dbg.contains("hunter2"));
        assert!(!dbg.contains("123:abc"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn rejects_non_positive_rps_at_load() {
        let zero = r#"
  rps_config_parsing_mode: method
  rps_config:
    method:
      get: { rps: 0 }
"#;
        let err = Config::from_yaml_str("test", &config_yaml(zero, TG_BLANKET), SECRETS)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRps { ref target, .. } if target == "mips"));

        let negative = r#"
  rps_config_parsing_mode: blanket
  rps_config:
    rps: -2
"#;
        let err = Config::from_yaml_str("test", &config_yaml(MIPS_METHOD, negative), SECRETS)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRps { ref target, .. } if target == "telegram"));
    }

    #[test]
    fn rejects_mode_shape_mismatch() {
        let blanket_with_methods = r#"
  rps_config_parsing_mode: blanket
  rps_config:
    method:
      get: { rps: 1 }
"#;
        let err = Config::from_yaml_str(
            "test",
            &config_yaml(blanket_with_methods, TG_BLANKET),
            SECRETS,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRateConfig { .. }));

        let method_without_table = r#"
  rps_config_parsing_mode: method
  rps_config:
    rps: 3
"#;
        let err = Config::from_yaml_str(
            "test",
            &config_yaml(method_without_table, TG_BLANKET),
            SECRETS,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRateConfig { .. }));
    }

    #[test]
    fn rejects_missing_gateway_methods_at_load() {
        let get_only = r#"
  rps_config_parsing_mode: method
  rps_config:
    method:
      get: { rps: 10 }
"#;
        let err = Config::from_yaml_str("test", &config_yaml(get_only, TG_BLANKET), SECRETS)
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::UnknownMethod { ref target, ref method } if target == "mips" && method == "post"
        ));

        let tg_get_only = r#"
  rps_config_parsing_mode: method
  rps_config:
    method:
      GET: { rps: 1 }
"#;
        let err = Config::from_yaml_str("test", &config_yaml(MIPS_METHOD, tg_get_only), SECRETS)
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::UnknownMethod { ref target, ref method } if target == "telegram" && method == "post"
        ));

        let tg_upper_post = tg_get_only.replace("GET", "POST");
        assert!(Config::from_yaml_str("test", &config_yaml(MIPS_METHOD, &tg_upper_post), SECRETS).is_ok());
    }

    #[test]
    fn require_ignores_blanket_mode() {
        assert!(RateConfig::blanket(1.0).unwrap().require("t", &["patch"]).is_ok());
        let cfg = RateConfig::per_method([("get", 1.0)]).unwrap();
        assert!(cfg.require("t", &["GET"]).is_ok());
        assert!(matches!(
            cfg.require("t", &["get", "delete"]),
            Err(ConfigError::UnknownMethod { ref method, .. }) if method == "delete"
        ));
    }

    #[test]
    fn rejects_unknown_parsing_mode() {
        let bogus = r#"
  rps_config_parsing_mode: sometimes
  rps_config:
    rps: 3
"#;
        let err =
            Config::from_yaml_str("test", &config_yaml(MIPS_METHOD, bogus), SECRETS).unwrap_err();
        assert!(matches!(err, ConfigError::Yaml { .. }));
    }

    #[test]
    fn sheets_rates_are_validated() {
        let yaml = config_yaml(MIPS_METHOD, TG_BLANKET).replace("write_rps: 0.5", "write_rps: 0");
        let err = Config::from_yaml_str("test", &yaml, SECRETS).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidRps { ref target, ref scope, .. } if target == "google_sheets" && scope == "write"
        ));
    }

    #[test]
    fn rate_config_constructors_validate() {
        assert!(RateConfig::blanket(f64::NAN).is_err());
        assert!(RateConfig::blanket(f64::INFINITY).is_err());
        assert!(RateConfig::per_method(Vec::<(&str, f64)>::new()).is_err());
        assert!(RateConfig::per_method([("GET", 1.0), ("get", 2.0)]).is_err());
        assert!(RateConfig::blanket(1.0).unwrap().with_burst(0).is_err());
        let cfg = RateConfig::per_method([("GET", 1.5)]).unwrap();
        assert_eq!(cfg.specs[0].scope, RateScope::Method("get".into()));
    }

    #[test]
    fn target_endpoint_joins_paths() {
        let t = Target::new("mips", "http://h:9000/MIPS/", 5, RateConfig::blanket(1.0).unwrap())
            .unwrap();
        assert_eq!(t.endpoint("/signin"), "http://h:9000/MIPS/signin");
        assert_eq!(t.endpoint("devices-mips"), "http://h:9000/MIPS/devices-mips");
        assert!(Target::new("mips", "not a url", 5, RateConfig::blanket(1.0).unwrap()).is_err());
        assert!(matches!(
            Target::new("mips", "http://h", 0, RateConfig::blanket(1.0).unwrap()),
            Err(ConfigError::InvalidTimeout(_))
        ));
    }

    #[test]
    fn target_display_lists_scopes() {
        let t = Target::new(
            "mips",
            "http://h:9000/MIPS",
            30,
            RateConfig::per_method([("get", 10.0), ("put", 5.0)]).unwrap(),
        )
        .unwrap();
        let s = t.to_string();
        assert!(s.starts_with("mips: "));
        assert!(s.contains("mode=method"));
        assert!(s.contains("get=10rps"));
        assert!(s.contains("put=5rps"));
    }

    #[test]
    fn log_level_parsing() {
        assert_eq!(parse_log_level("INFO").unwrap(), LevelFilter::Info);
        assert_eq!(parse_log_level(" debug ").unwrap(), LevelFilter::Debug);
        assert!(parse_log_level("verbose").is_err());
    }
}
