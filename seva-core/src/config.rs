//! Process configuration resolved once at startup.
//!
//! Order of precedence (later wins):
//! 1. Environment-specific defaults (development / staging / production)
//! 2. `SEVA_*` environment variables
//!
//! Every violation is collected; callers get the full list instead of the
//! first failure so an operator can fix a deployment in one pass.

use std::fmt::Display;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono_tz::Tz;
use serde::{Serialize, Serializer};

use crate::environment::Environment;
use crate::error::ConfigError;
use crate::secret::Secret;

/// Recognised environment keys
pub mod keys {
    pub const ENV: &str = "SEVA_ENV";
    pub const DRIVER: &str = "SEVA_DB_DRIVER";
    pub const HOST: &str = "SEVA_DB_HOST";
    pub const PORT: &str = "SEVA_DB_PORT";
    pub const NAME: &str = "SEVA_DB_NAME";
    pub const USER: &str = "SEVA_DB_USER";
    pub const PASSWORD: &str = "SEVA_DB_PASSWORD";
    pub const CHARSET: &str = "SEVA_DB_CHARSET";
    pub const COLLATION: &str = "SEVA_DB_COLLATION";
    pub const TIMEZONE: &str = "SEVA_DB_TIMEZONE";
    pub const CONNECT_TIMEOUT: &str = "SEVA_DB_CONNECT_TIMEOUT";
    pub const QUERY_TIMEOUT: &str = "SEVA_DB_QUERY_TIMEOUT";
    pub const RETRIES: &str = "SEVA_DB_RETRIES";
    pub const MAX_RECONNECTS: &str = "SEVA_DB_MAX_RECONNECTS";
    pub const HEALTH_INTERVAL: &str = "SEVA_DB_HEALTH_INTERVAL";
    pub const POOLING: &str = "SEVA_DB_POOLING";
    pub const SLOW_QUERY_MS: &str = "SEVA_DB_SLOW_QUERY_MS";
    pub const TLS_MODE: &str = "SEVA_DB_TLS_MODE";
    pub const SSL_CA: &str = "SEVA_DB_SSL_CA";
    pub const SSL_CERT: &str = "SEVA_DB_SSL_CERT";
    pub const SSL_KEY: &str = "SEVA_DB_SSL_KEY";
    pub const FAILOVER_HOSTS: &str = "SEVA_DB_FAILOVER_HOSTS";
    pub const READ_HOST: &str = "SEVA_DB_READ_HOST";
    pub const IP_ALLOWLIST: &str = "SEVA_IP_ALLOWLIST";
    pub const RATE_LIMIT_MAX: &str = "SEVA_RATE_LIMIT_MAX";
    pub const RATE_LIMIT_WINDOW: &str = "SEVA_RATE_LIMIT_WINDOW";
    pub const RATE_LIMIT_LEDGER: &str = "SEVA_RATE_LIMIT_LEDGER";
    pub const LOG_DIR: &str = "SEVA_LOG_DIR";
    pub const BIND: &str = "SEVA_BIND";
    pub const CORS_PERMISSIVE: &str = "SEVA_CORS_PERMISSIVE";
}

const SUPPORTED_CHARSETS: &[&str] = &["utf8mb4", "utf8mb3", "utf8", "latin1", "ascii", "sql_ascii"];

/// Database client driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    MySql,
    Postgres,
    Sqlite,
}

impl Driver {
    pub fn default_port(self) -> u16 {
        match self {
            Self::MySql => 3306,
            Self::Postgres => 5432,
            Self::Sqlite => 0,
        }
    }

    /// SQLite addresses a file, not a host.
    pub fn is_networked(self) -> bool {
        !matches!(self, Self::Sqlite)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::MySql => "mysql",
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
        }
    }
}

impl FromStr for Driver {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(Self::MySql),
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            "sqlite" | "sqlite3" => Ok(Self::Sqlite),
            other => Err(format!("unknown driver '{}'", other)),
        }
    }
}

/// Transport security requirement for database connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TlsMode {
    Disabled,
    Preferred,
    Required,
    VerifyCa,
}

impl FromStr for TlsMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disabled" | "disable" | "off" => Ok(Self::Disabled),
            "preferred" | "prefer" => Ok(Self::Preferred),
            "required" | "require" => Ok(Self::Required),
            "verify-ca" | "verify_ca" => Ok(Self::VerifyCa),
            other => Err(format!("unknown TLS mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TlsConfig {
    pub mode: TlsMode,
    pub ca: Option<PathBuf>,
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
}

/// Immutable database connection settings.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionConfig {
    pub driver: Driver,
    pub host: String,
    pub port: u16,
    /// Database name, or the file path for SQLite (`:memory:` allowed).
    pub database: String,
    pub username: String,
    pub password: Secret,
    pub charset: String,
    pub collation: String,
    #[serde(serialize_with = "serialize_tz")]
    pub timezone: Tz,
    #[serde(serialize_with = "serialize_secs")]
    pub connect_timeout: Duration,
    #[serde(serialize_with = "serialize_secs")]
    pub query_timeout: Duration,
    /// Attempts against the primary host per connect cycle.
    pub retries: u32,
    /// Consecutive exhausted connect cycles tolerated before cooling down.
    pub max_reconnect_attempts: u32,
    #[serde(serialize_with = "serialize_secs")]
    pub health_check_interval: Duration,
    pub pooling: bool,
    #[serde(serialize_with = "serialize_millis")]
    pub slow_query_threshold: Duration,
    pub tls: TlsConfig,
    /// Tried in order, one attempt each, after the primary is exhausted.
    pub failover_hosts: Vec<String>,
    /// Distinct read replica, if any.
    pub read_host: Option<String>,
}

impl ConnectionConfig {
    /// Environment-specific defaults before any override is applied.
    pub fn defaults(environment: Environment, driver: Driver) -> Self {
        let (name, user, tls_mode) = match environment {
            Environment::Development => ("kiit_seva_dev", "root", TlsMode::Disabled),
            Environment::Staging => ("kiit_seva_staging", "seva", TlsMode::Preferred),
            Environment::Production => ("kiit_seva", "seva", TlsMode::Required),
        };
        let database = match driver {
            Driver::Sqlite => format!("{}.db", name),
            _ => name.to_string(),
        };
        let prod = environment.is_production();

        Self {
            driver,
            host: "localhost".to_string(),
            port: driver.default_port(),
            database,
            username: user.to_string(),
            password: Secret::default(),
            charset: "utf8mb4".to_string(),
            collation: "utf8mb4_unicode_ci".to_string(),
            timezone: chrono_tz::Asia::Kolkata,
            connect_timeout: Duration::from_secs(if prod { 5 } else { 10 }),
            query_timeout: Duration::from_secs(30),
            retries: if prod { 5 } else { 3 },
            max_reconnect_attempts: if prod { 10 } else { 5 },
            health_check_interval: Duration::from_secs(match environment {
                Environment::Development => 30,
                _ => 60,
            }),
            pooling: prod,
            slow_query_threshold: Duration::from_millis(if prod { 500 } else { 1000 }),
            tls: TlsConfig {
                mode: tls_mode,
                ca: None,
                cert: None,
                key: None,
            },
            failover_hosts: Vec::new(),
            read_host: None,
        }
    }

    /// `host:port/database` without credentials, for diagnostics.
    pub fn describe(&self, host: &str) -> String {
        if self.driver.is_networked() {
            format!("{}:{}/{}", host, self.port, self.database)
        } else {
            self.database.clone()
        }
    }
}

/// Request-admission settings.
#[derive(Debug, Clone, Serialize)]
pub struct SecurityConfig {
    /// Enforced in production only. Empty disables the check.
    pub ip_allowlist: Vec<IpAddr>,
    pub rate_limit_max: u32,
    #[serde(serialize_with = "serialize_secs")]
    pub rate_limit_window: Duration,
    pub ledger_path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub cors_permissive: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            cors_permissive: false,
        }
    }
}

/// Everything the process reads from its environment.
#[derive(Debug, Clone, Serialize)]
pub struct SevaConfig {
    pub environment: Environment,
    pub database: ConnectionConfig,
    pub security: SecurityConfig,
    pub server: ServerConfig,
    pub log_dir: Option<PathBuf>,
}

impl SevaConfig {
    /// Resolve from the process environment.
    pub fn from_env() -> Result<Self, Vec<ConfigError>> {
        Self::resolve(|key| std::env::var(key).ok())
    }

    /// Resolve from an arbitrary key lookup.
    pub fn resolve<F>(lookup: F) -> Result<Self, Vec<ConfigError>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut r = Resolver {
            lookup,
            errors: Vec::new(),
        };

        let environment = r.parsed(keys::ENV, Environment::default());
        let driver = r.parsed(keys::DRIVER, Driver::MySql);
        let database = resolve_database(&mut r, environment, driver);
        let security = resolve_security(&mut r, environment);

        let server = ServerConfig {
            bind_addr: r.parsed(keys::BIND, ServerConfig::default().bind_addr),
            cors_permissive: r.flag(keys::CORS_PERMISSIVE, false),
        };
        let log_dir = r.raw(keys::LOG_DIR).map(PathBuf::from);

        if r.errors.is_empty() {
            Ok(Self {
                environment,
                database,
                security,
                server,
                log_dir,
            })
        } else {
            Err(r.errors)
        }
    }
}

fn resolve_database<F>(r: &mut Resolver<F>, environment: Environment, driver: Driver) -> ConnectionConfig
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = ConnectionConfig::defaults(environment, driver);

    let host = r.string(keys::HOST, &defaults.host);
    if driver.is_networked() && host.is_empty() {
        r.errors.push(ConfigError::Empty { key: keys::HOST });
    }

    let port = if driver.is_networked() {
        r.bounded(keys::PORT, defaults.port as u64, 1, 65_535) as u16
    } else {
        defaults.port
    };

    let database = r.string(keys::NAME, &defaults.database);
    if database.is_empty() {
        r.errors.push(ConfigError::Empty { key: keys::NAME });
    }

    let charset = r.string(keys::CHARSET, &defaults.charset);
    if !SUPPORTED_CHARSETS.contains(&charset.to_ascii_lowercase().replace('-', "").as_str()) {
        r.errors.push(ConfigError::UnsupportedCharset {
            key: keys::CHARSET,
            value: charset.clone(),
        });
    }

    let collation = r.string(keys::COLLATION, &defaults.collation);
    if driver == Driver::MySql && !collation.to_ascii_lowercase().starts_with(&charset.to_ascii_lowercase()) {
        r.errors.push(ConfigError::Invalid {
            key: keys::COLLATION,
            value: collation.clone(),
            reason: format!("collation does not belong to charset '{}'", charset),
        });
    }

    let tls = resolve_tls(r, defaults.tls.mode);

    let failover_hosts = r
        .list(keys::FAILOVER_HOSTS)
        .into_iter()
        .filter(|h| {
            if h == &host {
                tracing::warn!(host = %h, "ignoring failover host identical to primary");
                false
            } else {
                true
            }
        })
        .collect();

    let read_host = r.raw(keys::READ_HOST).filter(|h| h != &host);

    ConnectionConfig {
        driver,
        port,
        database,
        username: r.string(keys::USER, &defaults.username),
        password: Secret::new(r.raw(keys::PASSWORD).unwrap_or_default()),
        charset,
        collation,
        timezone: r.parsed(keys::TIMEZONE, defaults.timezone),
        connect_timeout: Duration::from_secs(r.bounded(
            keys::CONNECT_TIMEOUT,
            defaults.connect_timeout.as_secs(),
            1,
            60,
        )),
        query_timeout: Duration::from_secs(r.bounded(
            keys::QUERY_TIMEOUT,
            defaults.query_timeout.as_secs(),
            1,
            300,
        )),
        retries: r.bounded(keys::RETRIES, defaults.retries as u64, 1, 10) as u32,
        max_reconnect_attempts: r.bounded(
            keys::MAX_RECONNECTS,
            defaults.max_reconnect_attempts as u64,
            1,
            100,
        ) as u32,
        health_check_interval: Duration::from_secs(r.bounded(
            keys::HEALTH_INTERVAL,
            defaults.health_check_interval.as_secs(),
            5,
            3600,
        )),
        pooling: r.flag(keys::POOLING, defaults.pooling),
        slow_query_threshold: Duration::from_millis(r.bounded(
            keys::SLOW_QUERY_MS,
            defaults.slow_query_threshold.as_millis() as u64,
            1,
            600_000,
        )),
        tls,
        failover_hosts,
        read_host,
        host,
    }
}

fn resolve_tls<F>(r: &mut Resolver<F>, default_mode: TlsMode) -> TlsConfig
where
    F: Fn(&str) -> Option<String>,
{
    let mode = r.parsed(keys::TLS_MODE, default_mode);
    let ca = r.existing_file(keys::SSL_CA);
    let cert = r.existing_file(keys::SSL_CERT);
    let key = r.existing_file(keys::SSL_KEY);

    if mode == TlsMode::VerifyCa && r.raw(keys::SSL_CA).is_none() {
        r.errors.push(ConfigError::Invalid {
            key: keys::TLS_MODE,
            value: "verify-ca".to_string(),
            reason: format!("{} is required", keys::SSL_CA),
        });
    }
    let cert_value = r.raw(keys::SSL_CERT);
    if cert_value.is_some() != r.raw(keys::SSL_KEY).is_some() {
        r.errors.push(ConfigError::Invalid {
            key: keys::SSL_CERT,
            value: cert_value.unwrap_or_default(),
            reason: format!("{} and {} must be set together", keys::SSL_CERT, keys::SSL_KEY),
        });
    }

    TlsConfig { mode, ca, cert, key }
}

fn resolve_security<F>(r: &mut Resolver<F>, environment: Environment) -> SecurityConfig
where
    F: Fn(&str) -> Option<String>,
{
    let mut ip_allowlist = Vec::new();
    for entry in r.list(keys::IP_ALLOWLIST) {
        match entry.parse::<IpAddr>() {
            Ok(ip) => ip_allowlist.push(ip),
            Err(e) => r.errors.push(ConfigError::Invalid {
                key: keys::IP_ALLOWLIST,
                value: entry,
                reason: e.to_string(),
            }),
        }
    }

    let default_max = if environment.is_production() { 60 } else { 120 };
    let ledger_path = r
        .raw(keys::RATE_LIMIT_LEDGER)
        .map(PathBuf::from)
        .unwrap_or_else(default_ledger_path);

    SecurityConfig {
        ip_allowlist,
        rate_limit_max: r.bounded(keys::RATE_LIMIT_MAX, default_max, 1, 100_000) as u32,
        rate_limit_window: Duration::from_secs(r.bounded(keys::RATE_LIMIT_WINDOW, 60, 1, 86_400)),
        ledger_path,
    }
}

fn default_ledger_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("seva")
        .join("rate_limit.json")
}

/// Reads keys and accumulates every violation.
struct Resolver<F> {
    lookup: F,
    errors: Vec<ConfigError>,
}

impl<F> Resolver<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Trimmed value; blank counts as absent.
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.raw(key).unwrap_or_else(|| default.to_string())
    }

    fn parsed<T>(&mut self, key: &'static str, default: T) -> T
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.raw(key) {
            None => default,
            Some(value) => match value.parse::<T>() {
                Ok(parsed) => parsed,
                Err(e) => {
                    self.errors.push(ConfigError::Invalid {
                        key,
                        reason: e.to_string(),
                        value,
                    });
                    default
                }
            },
        }
    }

    fn bounded(&mut self, key: &'static str, default: u64, min: u64, max: u64) -> u64 {
        let Some(value) = self.raw(key) else {
            return default;
        };
        match value.parse::<i64>() {
            Ok(n) if n >= min as i64 && n <= max as i64 => n as u64,
            Ok(n) => {
                self.errors.push(ConfigError::OutOfRange {
                    key,
                    value: n,
                    min: min as i64,
                    max: max as i64,
                });
                default
            }
            Err(e) => {
                self.errors.push(ConfigError::Invalid {
                    key,
                    value,
                    reason: e.to_string(),
                });
                default
            }
        }
    }

    fn flag(&mut self, key: &'static str, default: bool) -> bool {
        let Some(value) = self.raw(key) else {
            return default;
        };
        match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => {
                self.errors.push(ConfigError::Invalid {
                    key,
                    value,
                    reason: "expected a boolean".to_string(),
                });
                default
            }
        }
    }

    fn list(&self, key: &str) -> Vec<String> {
        self.raw(key)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn existing_file(&mut self, key: &'static str) -> Option<PathBuf> {
        let path = PathBuf::from(self.raw(key)?);
        if !path.is_file() {
            self.errors.push(ConfigError::MissingFile {
                key,
                path: path.clone(),
            });
        }
        Some(path)
    }
}

fn serialize_secs<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_secs())
}

fn serialize_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

fn serialize_tz<S: Serializer>(tz: &Tz, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(tz.name())
}
