use crate::{Result, SpendqlError};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

pub const SCHEME: &str = "postgres";

pub const DEFAULT_DATABASE: &str = "spend";
pub const DEFAULT_USERNAME: &str = "postgres";
pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 5432;
pub const DEFAULT_SCHEMA: &str = "public";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_HTTP_PORT: u16 = 5000;

/// Where to reach the database, as a percent-encoded `postgres://` URI.
///
/// The password never appears in `Display` or `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionEndpoint {
    url: Url,
    username: String,
    host: String,
    port: u16,
    database: String,
    has_password: bool,
}

impl ConnectionEndpoint {
    pub fn new(
        username: &str,
        password: Option<&str>,
        host: &str,
        port: u16,
        database: &str,
    ) -> Result<Self> {
        // IPv6 literals need brackets to survive URI parsing.
        let authority = if host.contains(':') && !host.starts_with('[') {
            format!("[{host}]")
        } else {
            host.to_string()
        };

        let mut url = Url::parse(&format!("{SCHEME}://{authority}/"))
            .map_err(|e| SpendqlError::Config(format!("invalid host {host:?}: {e}")))?;
        if url.host_str().map_or(true, str::is_empty) {
            return Err(SpendqlError::Config("host must not be empty".to_string()));
        }
        url.set_username(username)
            .map_err(|_| SpendqlError::Config(format!("invalid username {username:?}")))?;
        if let Some(password) = password {
            url.set_password(Some(password))
                .map_err(|_| SpendqlError::Config("invalid password".to_string()))?;
        }
        url.set_port(Some(port))
            .map_err(|_| SpendqlError::Config(format!("invalid port {port}")))?;
        url.path_segments_mut()
            .map_err(|_| SpendqlError::Config(format!("invalid host {host:?}")))?
            .pop_if_empty()
            .push(database);

        Ok(Self {
            url,
            username: username.to_string(),
            host: host.to_string(),
            port,
            database: database.to_string(),
            has_password: password.is_some(),
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn has_password(&self) -> bool {
        self.has_password
    }

    /// The full URI including the password. Never log this.
    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    /// The URI to open a connection with.
    ///
    /// Fails when no password was configured, so a connection attempt can
    /// never fall through to whatever ambient credentials the host offers.
    pub fn connection_uri(&self) -> Result<&str> {
        if !self.has_password {
            return Err(SpendqlError::Authentication(format!(
                "no password configured for role {:?} (set PGPASSWORD)",
                self.username
            )));
        }
        Ok(self.url.as_str())
    }

    fn redacted(&self) -> Url {
        let mut shown = self.url.clone();
        if self.has_password {
            let _ = shown.set_password(Some("***"));
        }
        shown
    }
}

impl fmt::Display for ConnectionEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.redacted().as_str())
    }
}

impl fmt::Debug for ConnectionEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ConnectionEndpoint")
            .field(&self.redacted().as_str())
            .finish()
    }
}

/// Database role assumed for every query unless something more specific applies.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DefaultRole(String);

impl DefaultRole {
    pub fn new(role: impl Into<String>) -> Self {
        Self(role.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DefaultRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS),
        }
    }
}

/// Everything the process needs to know before it can serve a request.
#[derive(Debug, Clone)]
pub struct Settings {
    pub endpoint: ConnectionEndpoint,
    pub default_role: DefaultRole,
    pub schemas: Vec<String>,
    pub pool: PoolSettings,
    pub http_port: u16,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve settings through `lookup`. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let database = var("PGDATABASE").unwrap_or_else(|| DEFAULT_DATABASE.to_string());
        let username = var("PGUSER").unwrap_or_else(|| DEFAULT_USERNAME.to_string());
        let password = var("PGPASSWORD");
        let host = var("PGHOST").unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = parse_or("PGPORT", var("PGPORT"), DEFAULT_PORT)?;

        let endpoint =
            ConnectionEndpoint::new(&username, password.as_deref(), &host, port, &database)?;
        if !endpoint.has_password() {
            tracing::warn!(role = %username, "PGPASSWORD is not set; connections will be refused");
        }

        let schemas = var("SPENDQL_SCHEMAS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect::<Vec<_>>()
            })
            .filter(|list| !list.is_empty())
            .unwrap_or_else(|| vec![DEFAULT_SCHEMA.to_string()]);

        let pool = PoolSettings {
            max_connections: parse_or(
                "SPENDQL_POOL_MAX_CONNECTIONS",
                var("SPENDQL_POOL_MAX_CONNECTIONS"),
                DEFAULT_MAX_CONNECTIONS,
            )?,
            acquire_timeout: Duration::from_secs(parse_or(
                "SPENDQL_ACQUIRE_TIMEOUT_SECS",
                var("SPENDQL_ACQUIRE_TIMEOUT_SECS"),
                DEFAULT_ACQUIRE_TIMEOUT_SECS,
            )?),
        };

        Ok(Self {
            default_role: DefaultRole::new(endpoint.username()),
            endpoint,
            schemas,
            pool,
            http_port: parse_or("PORT", var("PORT"), DEFAULT_HTTP_PORT)?,
        })
    }
}

fn parse_or<T: FromStr>(key: &str, raw: Option<String>, default: T) -> Result<T> {
    match raw {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| SpendqlError::Config(format!("{key} has invalid value {raw:?}"))),
        None => Ok(default),
    }
}
