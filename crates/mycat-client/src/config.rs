//! Client configuration.

use std::fmt::Write as _;
use std::time::Duration;

use mycat_auth::{AuthMethod, Credentials};

use crate::error::{Error, Result};

/// Default X Protocol port.
pub const DEFAULT_PORT: u16 = 33060;

/// Transport used to reach the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    /// TCP/IP.
    #[default]
    Tcp,
    /// Unix domain socket; `server` is the socket path.
    Unix,
    /// Windows named pipe.
    Pipe,
    /// Windows shared memory.
    Memory,
}

impl Protocol {
    fn parse(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "tcp" | "socket" | "sockets" => Ok(Self::Tcp),
            "unix" | "unixsocket" => Ok(Self::Unix),
            "pipe" | "namedpipe" => Ok(Self::Pipe),
            "memory" | "sharedmemory" => Ok(Self::Memory),
            _ => Err(Error::Config(format!("invalid protocol: {value}"))),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Unix => "unix",
            Self::Pipe => "pipe",
            Self::Memory => "memory",
        }
    }
}

/// TLS requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum SslMode {
    /// Never use TLS.
    None,
    /// Use TLS when the server offers it.
    #[default]
    Preferred,
    /// Require TLS.
    Required,
    /// Require TLS and verify the CA.
    VerifyCa,
    /// Require TLS, verify the CA and the host name.
    VerifyFull,
}

impl SslMode {
    fn parse(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "none" | "disabled" => Ok(Self::None),
            "preferred" | "prefered" => Ok(Self::Preferred),
            "required" => Ok(Self::Required),
            "verifyca" | "verify_ca" => Ok(Self::VerifyCa),
            "verifyfull" | "verify_identity" => Ok(Self::VerifyFull),
            _ => Err(Error::Config(format!("invalid ssl mode: {value}"))),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Preferred => "preferred",
            Self::Required => "required",
            Self::VerifyCa => "verifyca",
            Self::VerifyFull => "verifyfull",
        }
    }

    /// Whether the connection must not proceed without TLS.
    #[must_use]
    pub fn requires_tls(self) -> bool {
        self >= Self::Required
    }
}

/// Requested authentication mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMode {
    /// PLAIN over TLS, otherwise SHA256_MEMORY falling back to MYSQL41.
    #[default]
    Default,
    /// A specific mechanism.
    Method(AuthMethod),
}

impl AuthMode {
    fn parse(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "default" => Ok(Self::Default),
            "plain" => Ok(Self::Method(AuthMethod::Plain)),
            "mysql41" => Ok(Self::Method(AuthMethod::MySql41)),
            "external" => Ok(Self::Method(AuthMethod::External)),
            "sha256_memory" | "sha256memory" => Ok(Self::Method(AuthMethod::Sha256Memory)),
            "scram-sha-1" => Ok(Self::Method(AuthMethod::ScramSha1)),
            "scram-sha-256" => Ok(Self::Method(AuthMethod::ScramSha256)),
            "ldap_sasl" | "mysql_ldap_sasl" => Ok(Self::Method(AuthMethod::LdapSasl)),
            _ => Err(Error::Config(format!("invalid auth mode: {value}"))),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Method(AuthMethod::Plain) => "plain",
            Self::Method(AuthMethod::MySql41) => "mysql41",
            Self::Method(AuthMethod::External) => "external",
            Self::Method(AuthMethod::Sha256Memory) => "sha256_memory",
            Self::Method(AuthMethod::ScramSha1) => "scram-sha-1",
            Self::Method(AuthMethod::ScramSha256) => "scram-sha-256",
            Self::Method(AuthMethod::LdapSasl) => "ldap_sasl",
        }
    }
}

/// SSH tunnel settings.
#[derive(Clone, PartialEq, Eq)]
pub struct SshConfig {
    /// SSH server; tunnelling is off when unset.
    pub host_name: Option<String>,
    /// SSH port.
    pub port: u16,
    /// SSH user.
    pub user_name: Option<String>,
    /// SSH password.
    pub password: Option<String>,
    /// Private key file.
    pub key_file: Option<String>,
    /// Private key pass phrase.
    pub pass_phrase: Option<String>,
}

impl SshConfig {
    /// Whether a tunnel has been requested.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.host_name.as_deref().is_some_and(|h| !h.is_empty())
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            host_name: None,
            port: 22,
            user_name: None,
            password: None,
            key_file: None,
            pass_phrase: None,
        }
    }
}

impl std::fmt::Debug for SshConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshConfig")
            .field("host_name", &self.host_name)
            .field("port", &self.port)
            .field("user_name", &self.user_name)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("key_file", &self.key_file)
            .finish_non_exhaustive()
    }
}

/// Configuration for connecting to a MySQL server.
#[derive(Clone, PartialEq, Eq)]
pub struct Config {
    /// Host list: comma separated, each entry `host` or `host:port`.
    pub server: String,

    /// Port for entries without one (default: 33060).
    pub port: u16,

    /// Transport.
    pub protocol: Protocol,

    /// User name.
    pub user_id: String,

    /// Password.
    pub password: String,

    /// Default database.
    pub database: Option<String>,

    /// Whether sessions are pooled.
    pub pooling: bool,

    /// Idle sessions kept by the pool.
    pub min_pool_size: u32,

    /// Upper bound on pooled sessions.
    pub max_pool_size: u32,

    /// Seconds a pooled session may live; 0 is unlimited.
    pub connection_lifetime: u32,

    /// Procedure metadata cache capacity; 0 disables caching.
    pub procedure_cache_size: usize,

    /// Default command timeout in seconds; 0 is unlimited.
    pub default_command_timeout: u32,

    /// Connection timeout in seconds; 0 is unlimited.
    pub connection_timeout: u32,

    /// TLS requirement.
    pub ssl_mode: SslMode,

    /// Authentication mechanism.
    pub auth: AuthMode,

    /// Enlist in the ambient transaction on open.
    pub auto_enlist: bool,

    /// Keep the password in the connection string once open.
    pub persist_security_info: bool,

    /// Trace every command through the tracing hook.
    pub logging: bool,

    /// Report inefficient usage patterns.
    pub use_usage_advisor: bool,

    /// Resolve `server` through a DNS SRV lookup.
    pub dns_srv: bool,

    /// Character set applied with `SET NAMES` after the handshake.
    pub character_set: Option<String>,

    /// SSH tunnel.
    pub ssh: SshConfig,

    /// Set only on the side connection used to kill queries.
    pub(crate) kill_query: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: "localhost".to_string(),
            port: DEFAULT_PORT,
            protocol: Protocol::Tcp,
            user_id: String::new(),
            password: String::new(),
            database: None,
            pooling: true,
            min_pool_size: 0,
            max_pool_size: 100,
            connection_lifetime: 0,
            procedure_cache_size: 25,
            default_command_timeout: 30,
            connection_timeout: 15,
            ssl_mode: SslMode::Preferred,
            auth: AuthMode::Default,
            auto_enlist: true,
            persist_security_info: false,
            logging: false,
            use_usage_advisor: false,
            dns_srv: false,
            character_set: None,
            ssh: SshConfig::default(),
            kill_query: false,
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(Error::Config(format!("invalid boolean for {key}: {value}"))),
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("invalid value for {key}: {value}")))
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

/// Split `key=value;` pairs, honouring single or double quoted values.
fn split_pairs(conn_str: &str) -> Result<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    let mut chars = conn_str.chars().peekable();

    loop {
        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            chars.next();
            if c == '=' {
                break;
            }
            if c == ';' {
                if key.trim().is_empty() {
                    key.clear();
                    continue;
                }
                return Err(Error::Config(format!("invalid key-value: {}", key.trim())));
            }
            key.push(c);
        }
        let key = key.trim().to_string();
        if key.is_empty() {
            if chars.peek().is_none() {
                break;
            }
            return Err(Error::Config("empty key in connection string".into()));
        }

        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }

        let mut value = String::new();
        match chars.peek().copied() {
            Some(quote @ ('"' | '\'')) => {
                chars.next();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    if c == quote {
                        if chars.peek() == Some(&quote) {
                            chars.next();
                            value.push(quote);
                            continue;
                        }
                        closed = true;
                        break;
                    }
                    value.push(c);
                }
                if !closed {
                    return Err(Error::Config(format!("unterminated quote for {key}")));
                }
                for c in chars.by_ref() {
                    if c == ';' {
                        break;
                    }
                }
            }
            _ => {
                for c in chars.by_ref() {
                    if c == ';' {
                        break;
                    }
                    value.push(c);
                }
                value = value.trim().to_string();
            }
        }
        pairs.push((key, value));
    }

    Ok(pairs)
}

fn quote_value(value: &str) -> String {
    if value.contains([';', '=', '"', '\'']) || value.trim() != value {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

impl Config {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a connection string into configuration.
    ///
    /// Keys are case-insensitive and ignore spaces, dashes and underscores:
    /// ```text
    /// server=db1:33060,db2;user id=app;password=secret;database=shop;pooling=false
    /// ```
    pub fn from_connection_string(conn_str: &str) -> Result<Self> {
        let mut config = Self::default();

        for (raw_key, value) in split_pairs(conn_str)? {
            let key: String = raw_key
                .to_lowercase()
                .chars()
                .filter(|c| !matches!(c, ' ' | '-' | '_'))
                .collect();
            let value = value.as_str();

            match key.as_str() {
                "server" | "host" | "datasource" | "address" | "addr" | "networkaddress" => {
                    config.server = value.to_string();
                }
                "port" => config.port = parse_num(&raw_key, value)?,
                "protocol" | "connectionprotocol" | "connectiontype" => {
                    config.protocol = Protocol::parse(value)?;
                }
                "userid" | "uid" | "user" | "username" => config.user_id = value.to_string(),
                "password" | "pwd" => config.password = value.to_string(),
                "database" | "initialcatalog" => config.database = non_empty(value),
                "pooling" => config.pooling = parse_bool(&raw_key, value)?,
                "minpoolsize" | "minimumpoolsize" => {
                    config.min_pool_size = parse_num(&raw_key, value)?;
                }
                "maxpoolsize" | "maximumpoolsize" => {
                    config.max_pool_size = parse_num(&raw_key, value)?;
                }
                "connectionlifetime" => config.connection_lifetime = parse_num(&raw_key, value)?,
                "procedurecachesize" | "procedurecache" => {
                    config.procedure_cache_size = parse_num(&raw_key, value)?;
                }
                "defaultcommandtimeout" | "commandtimeout" => {
                    config.default_command_timeout = parse_num(&raw_key, value)?;
                }
                "connectiontimeout" | "connecttimeout" => {
                    config.connection_timeout = parse_num(&raw_key, value)?;
                }
                "sslmode" => config.ssl_mode = SslMode::parse(value)?,
                "auth" | "authentication" => config.auth = AuthMode::parse(value)?,
                "autoenlist" => config.auto_enlist = parse_bool(&raw_key, value)?,
                "persistsecurityinfo" => {
                    config.persist_security_info = parse_bool(&raw_key, value)?;
                }
                "logging" => config.logging = parse_bool(&raw_key, value)?,
                "useusageadvisor" | "usageadvisor" => {
                    config.use_usage_advisor = parse_bool(&raw_key, value)?;
                }
                "dnssrv" => config.dns_srv = parse_bool(&raw_key, value)?,
                "characterset" | "charset" => config.character_set = non_empty(value),
                "sshhostname" => config.ssh.host_name = non_empty(value),
                "sshport" => config.ssh.port = parse_num(&raw_key, value)?,
                "sshusername" => config.ssh.user_name = non_empty(value),
                "sshpassword" => config.ssh.password = non_empty(value),
                "sshkeyfile" => config.ssh.key_file = non_empty(value),
                "sshpassphrase" => config.ssh.pass_phrase = non_empty(value),
                _ => {
                    // Ignore unknown options for forward compatibility
                    tracing::debug!(
                        key = raw_key.as_str(),
                        "ignoring unknown connection string option"
                    );
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.server.trim().is_empty() {
            return Err(Error::Config("server must not be empty".into()));
        }
        if self.max_pool_size == 0 {
            return Err(Error::Config("max pool size must be greater than 0".into()));
        }
        if self.min_pool_size > self.max_pool_size {
            return Err(Error::Config(format!(
                "min pool size ({}) exceeds max pool size ({})",
                self.min_pool_size, self.max_pool_size
            )));
        }
        if self.dns_srv {
            if self.protocol != Protocol::Tcp {
                return Err(Error::Config("dns srv requires the tcp protocol".into()));
            }
            if self.server.contains(',') {
                return Err(Error::Config(
                    "dns srv does not accept multiple hosts".into(),
                ));
            }
        }
        Ok(())
    }

    /// Serialize back to a connection string.
    ///
    /// Keys are written in a fixed order. Passwords are only included when
    /// `include_secrets` is set.
    #[must_use]
    pub fn to_connection_string(&self, include_secrets: bool) -> String {
        let mut out = String::new();
        let mut put = |key: &str, value: &str| {
            let _ = write!(out, "{key}={};", quote_value(value));
        };

        put("server", &self.server);
        put("port", &self.port.to_string());
        put("protocol", self.protocol.as_str());
        put("user id", &self.user_id);
        if include_secrets {
            put("password", &self.password);
        }
        if let Some(db) = &self.database {
            put("database", db);
        }
        put("pooling", &self.pooling.to_string());
        put("min pool size", &self.min_pool_size.to_string());
        put("max pool size", &self.max_pool_size.to_string());
        put("connection lifetime", &self.connection_lifetime.to_string());
        put("procedure cache size", &self.procedure_cache_size.to_string());
        put(
            "default command timeout",
            &self.default_command_timeout.to_string(),
        );
        put("connection timeout", &self.connection_timeout.to_string());
        put("ssl mode", self.ssl_mode.as_str());
        put("auth", self.auth.as_str());
        put("auto enlist", &self.auto_enlist.to_string());
        put(
            "persist security info",
            &self.persist_security_info.to_string(),
        );
        put("logging", &self.logging.to_string());
        put("use usage advisor", &self.use_usage_advisor.to_string());
        put("dns srv", &self.dns_srv.to_string());
        if let Some(cs) = &self.character_set {
            put("character set", cs);
        }
        if let Some(host) = &self.ssh.host_name {
            put("ssh host name", host);
            put("ssh port", &self.ssh.port.to_string());
            if let Some(user) = &self.ssh.user_name {
                put("ssh user name", user);
            }
            if let Some(key_file) = &self.ssh.key_file {
                put("ssh key file", key_file);
            }
            if include_secrets {
                if let Some(pw) = &self.ssh.password {
                    put("ssh password", pw);
                }
                if let Some(phrase) = &self.ssh.pass_phrase {
                    put("ssh pass phrase", phrase);
                }
            }
        }
        out
    }

    /// Canonical key under which equivalent settings share a pool.
    ///
    /// Two configurations parsed from differently ordered or differently
    /// cased connection strings produce the same key.
    #[must_use]
    pub fn equivalence_key(&self) -> String {
        let mut canonical = self.clone();
        canonical.server = canonical
            .server
            .split(',')
            .map(|h| h.trim().to_ascii_lowercase())
            .collect::<Vec<_>>()
            .join(",");
        let mut key = canonical.to_connection_string(true);
        if self.kill_query {
            key.push_str("kill query=true;");
        }
        key
    }

    /// Candidate `(host, port)` pairs from the static server list.
    pub fn hosts(&self) -> Result<Vec<(String, u16)>> {
        if self.protocol != Protocol::Tcp {
            return Ok(vec![(self.server.clone(), self.port)]);
        }
        let mut hosts = Vec::new();
        for entry in self.server.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let (host, port) = if let Some(rest) = entry.strip_prefix('[') {
                // [ipv6]:port
                let (host, tail) = rest
                    .split_once(']')
                    .ok_or_else(|| Error::Config(format!("invalid host: {entry}")))?;
                match tail.strip_prefix(':') {
                    Some(port) => (host, parse_num("port", port)?),
                    None => (host, self.port),
                }
            } else if entry.matches(':').count() == 1 {
                let (host, port) = entry
                    .split_once(':')
                    .ok_or_else(|| Error::Config(format!("invalid host: {entry}")))?;
                (host, parse_num("port", port)?)
            } else {
                (entry, self.port)
            };
            hosts.push((host.to_string(), port));
        }
        if hosts.is_empty() {
            return Err(Error::Config("server must not be empty".into()));
        }
        Ok(hosts)
    }

    /// Credentials for the handshake.
    #[must_use]
    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.user_id.clone(), self.password.clone())
            .with_schema(self.database.clone().unwrap_or_default())
    }

    /// Connection timeout, `None` when unlimited.
    #[must_use]
    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.connection_timeout > 0).then(|| Duration::from_secs(u64::from(self.connection_timeout)))
    }

    /// Default command timeout, `None` when unlimited.
    #[must_use]
    pub fn command_timeout(&self) -> Option<Duration> {
        (self.default_command_timeout > 0)
            .then(|| Duration::from_secs(u64::from(self.default_command_timeout)))
    }

    /// Pooled session lifetime, `None` when unlimited.
    #[must_use]
    pub fn lifetime(&self) -> Option<Duration> {
        (self.connection_lifetime > 0)
            .then(|| Duration::from_secs(u64::from(self.connection_lifetime)))
    }

    /// Whether this is the kill-query side connection.
    #[must_use]
    pub fn is_kill_query(&self) -> bool {
        self.kill_query
    }

    /// Set the server host list.
    #[must_use]
    pub fn server(mut self, server: impl Into<String>) -> Self {
        self.server = server.into();
        self
    }

    /// Set the server port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the transport.
    #[must_use]
    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Set the user name.
    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user_id = user.into();
        self
    }

    /// Set the password.
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    /// Set the database name.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = non_empty(&database.into());
        self
    }

    /// Enable or disable pooling.
    #[must_use]
    pub fn pooling(mut self, enabled: bool) -> Self {
        self.pooling = enabled;
        self
    }

    /// Set the pool bounds.
    #[must_use]
    pub fn pool_size(mut self, min: u32, max: u32) -> Self {
        self.min_pool_size = min;
        self.max_pool_size = max;
        self
    }

    /// Set the pooled session lifetime in seconds.
    #[must_use]
    pub fn connection_lifetime(mut self, seconds: u32) -> Self {
        self.connection_lifetime = seconds;
        self
    }

    /// Set the procedure cache capacity.
    #[must_use]
    pub fn procedure_cache_size(mut self, size: usize) -> Self {
        self.procedure_cache_size = size;
        self
    }

    /// Set the default command timeout in seconds.
    #[must_use]
    pub fn default_command_timeout(mut self, seconds: u32) -> Self {
        self.default_command_timeout = seconds;
        self
    }

    /// Set the connection timeout in seconds.
    #[must_use]
    pub fn connection_timeout(mut self, seconds: u32) -> Self {
        self.connection_timeout = seconds;
        self
    }

    /// Set the TLS requirement.
    #[must_use]
    pub fn ssl_mode(mut self, mode: SslMode) -> Self {
        self.ssl_mode = mode;
        self
    }

    /// Set the authentication mechanism.
    #[must_use]
    pub fn auth(mut self, auth: AuthMode) -> Self {
        self.auth = auth;
        self
    }

    /// Enable or disable auto-enlistment.
    #[must_use]
    pub fn auto_enlist(mut self, enabled: bool) -> Self {
        self.auto_enlist = enabled;
        self
    }

    /// Keep the password visible in the connection string once open.
    #[must_use]
    pub fn persist_security_info(mut self, enabled: bool) -> Self {
        self.persist_security_info = enabled;
        self
    }

    /// Enable command tracing.
    #[must_use]
    pub fn logging(mut self, enabled: bool) -> Self {
        self.logging = enabled;
        self
    }

    /// Enable the usage advisor.
    #[must_use]
    pub fn use_usage_advisor(mut self, enabled: bool) -> Self {
        self.use_usage_advisor = enabled;
        self
    }

    /// Resolve the server through DNS SRV.
    #[must_use]
    pub fn dns_srv(mut self, enabled: bool) -> Self {
        self.dns_srv = enabled;
        self
    }

    /// Set the character set.
    #[must_use]
    pub fn character_set(mut self, charset: impl Into<String>) -> Self {
        self.character_set = non_empty(&charset.into());
        self
    }

    /// Set the SSH tunnel.
    #[must_use]
    pub fn ssh(mut self, ssh: SshConfig) -> Self {
        self.ssh = ssh;
        self
    }

    /// Create a new configuration pointing at a single host (for failover).
    #[must_use]
    pub fn with_host(mut self, host: &str, port: u16) -> Self {
        self.server = host.to_string();
        self.port = port;
        self
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("protocol", &self.protocol)
            .field("user_id", &self.user_id)
            .field("password", &"[REDACTED]")
            .field("database", &self.database)
            .field("pooling", &self.pooling)
            .field("ssl_mode", &self.ssl_mode)
            .field("auth", &self.auth)
            .field("auto_enlist", &self.auto_enlist)
            .field("ssh", &self.ssh)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_string_parsing() {
        let config = Config::from_connection_string(
            "Server=localhost;Database=test;User Id=root;Password=secret;",
        )
        .unwrap();

        assert_eq!(config.server, "localhost");
        assert_eq!(config.database, Some("test".to_string()));
        assert_eq!(config.user_id, "root");
        assert_eq!(config.port, DEFAULT_PORT);
        assert!(config.pooling);
        assert_eq!(config.procedure_cache_size, 25);
    }

    #[test]
    fn test_aliases_and_key_normalization() {
        let config = Config::from_connection_string(
            "data source=db;UID=app;pwd=x;Max_Pool-Size=7;ConnectTimeout=3;AutoEnlist=no",
        )
        .unwrap();
        assert_eq!(config.server, "db");
        assert_eq!(config.user_id, "app");
        assert_eq!(config.max_pool_size, 7);
        assert_eq!(config.connection_timeout, 3);
        assert!(!config.auto_enlist);
    }

    #[test]
    fn test_quoted_values() {
        let config =
            Config::from_connection_string("server=h;password=\"a;b=c\";user='o''brien'").unwrap();
        assert_eq!(config.password, "a;b=c");
        assert_eq!(config.user_id, "o'brien");
    }

    #[test]
    fn test_invalid_values() {
        assert!(Config::from_connection_string("pooling=maybe").is_err());
        assert!(Config::from_connection_string("port=abc").is_err());
        assert!(Config::from_connection_string("ssl mode=sometimes").is_err());
        assert!(Config::from_connection_string("min pool size=5;max pool size=2").is_err());
        assert!(Config::from_connection_string("server=a,b;dns srv=true").is_err());
        assert!(Config::from_connection_string("server=a;justakey;").is_err());
    }

    #[test]
    fn test_unknown_key_ignored() {
        let config = Config::from_connection_string("server=h;frobnicate=1").unwrap();
        assert_eq!(config.server, "h");
    }

    #[test]
    fn test_host_list() {
        let config = Config::new().server("a:3306, b ,[::1]:4000,[fe80::1]");
        assert_eq!(
            config.hosts().unwrap(),
            vec![
                ("a".to_string(), 3306),
                ("b".to_string(), DEFAULT_PORT),
                ("::1".to_string(), 4000),
                ("fe80::1".to_string(), DEFAULT_PORT),
            ]
        );
    }

    #[test]
    fn test_round_trip_without_secrets() {
        let config = Config::new()
            .server("h")
            .user("u")
            .password("p")
            .database("d")
            .character_set("utf8mb4");
        let redacted = config.to_connection_string(false);
        assert!(!redacted.contains("password"));

        let full = Config::from_connection_string(&config.to_connection_string(true)).unwrap();
        assert_eq!(full, config);
    }

    #[test]
    fn test_equivalence_key_is_order_independent() {
        let a = Config::from_connection_string("server=DB1;user=u;pooling=true;port=1").unwrap();
        let b = Config::from_connection_string("Port=1;Pooling=yes;User Id=u;Server=db1").unwrap();
        assert_eq!(a.equivalence_key(), b.equivalence_key());

        let c = a.clone().database("other");
        assert_ne!(a.equivalence_key(), c.equivalence_key());
    }

    #[test]
    fn test_ssl_mode_ordering() {
        assert!(!SslMode::Preferred.requires_tls());
        assert!(SslMode::Required.requires_tls());
        assert!(SslMode::VerifyFull.requires_tls());
    }

    #[test]
    fn test_auth_mode() {
        let config = Config::from_connection_string("auth=SCRAM-SHA-256").unwrap();
        assert_eq!(config.auth, AuthMode::Method(AuthMethod::ScramSha256));
        assert!(Config::from_connection_string("auth=kerberos").is_err());
    }

    #[test]
    fn test_debug_redacts_password() {
        let debug = format!("{:?}", Config::new().password("hunter2"));
        assert!(!debug.contains("hunter2"));
    }
}
