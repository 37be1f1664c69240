//! volrepl Configuration
//!
//! Endpoint and timeout settings, resolved once at start-up and handed to
//! the client explicitly.

use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

/// Environment variable naming the controller endpoint
pub const ADDRESS_ENV: &str = "CSI_ADDRESS";

/// Endpoint used when neither flag, environment nor config file sets one
pub const DEFAULT_ADDRESS: &str = "/run/csi/socket";

/// Default call timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound on establishing the channel
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Controller endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Unix domain socket path
    Unix(PathBuf),
    /// TCP `host:port`
    Tcp(String),
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::Config("endpoint address cannot be empty".into()));
        }

        if let Some(path) = s.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(Error::Config(format!("invalid unix endpoint: {}", s)));
            }
            return Ok(Endpoint::Unix(PathBuf::from(path)));
        }

        if s.starts_with('/') {
            return Ok(Endpoint::Unix(PathBuf::from(s)));
        }

        let addr = s.strip_prefix("tcp://").unwrap_or(s);
        match addr.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                Ok(Endpoint::Tcp(addr.to_string()))
            }
            _ => Err(Error::Config(format!(
                "invalid endpoint {}: expected unix:///path, /path or host:port",
                s
            ))),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Unix(path) => write!(f, "unix://{}", path.display()),
            Endpoint::Tcp(addr) => write!(f, "tcp://{}", addr),
        }
    }
}

/// Settings read from an optional TOML file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Controller endpoint
    #[serde(default)]
    pub address: Option<String>,

    /// Call timeout, e.g. "30s"
    #[serde(default)]
    pub timeout: Option<String>,

    /// Connection establishment timeout, e.g. "10s"
    #[serde(default)]
    pub connect_timeout: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default)]
    pub log_level: Option<String>,
}

impl FileConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

/// Resolved client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Controller endpoint
    pub endpoint: Endpoint,
    /// Deadline for each call, including any reconnect it needs
    pub timeout: Duration,
    /// Bound on establishing the initial channel
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::Unix(PathBuf::from(DEFAULT_ADDRESS)),
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl ClientConfig {
    /// Resolve the configuration.
    ///
    /// The address comes from the flag, then the environment, then the
    /// config file, then [`DEFAULT_ADDRESS`]; empty values count as unset.
    /// A timeout flag wins over the file, which wins over [`DEFAULT_TIMEOUT`].
    /// The connect timeout is only read from the file.
    pub fn resolve(
        address_flag: Option<&str>,
        address_env: Option<&str>,
        timeout_flag: Option<Duration>,
        file: Option<&FileConfig>,
    ) -> Result<Self> {
        let file_address = file.and_then(|f| f.address.as_deref());
        let address = [address_flag, address_env, file_address]
            .into_iter()
            .flatten()
            .find(|a| !a.trim().is_empty())
            .unwrap_or(DEFAULT_ADDRESS);

        let timeout = match (timeout_flag, file.and_then(|f| f.timeout.as_deref())) {
            (Some(timeout), _) => timeout,
            (None, Some(raw)) => parse_duration(raw).map_err(Error::Config)?,
            (None, None) => DEFAULT_TIMEOUT,
        };

        let connect_timeout = match file.and_then(|f| f.connect_timeout.as_deref()) {
            Some(raw) => parse_duration(raw).map_err(Error::Config)?,
            None => DEFAULT_CONNECT_TIMEOUT,
        };

        let config = Self {
            endpoint: address.parse()?,
            timeout,
            connect_timeout,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(Error::Config("timeout must be greater than zero".into()));
        }
        if self.connect_timeout.is_zero() {
            return Err(Error::Config("connect_timeout must be greater than zero".into()));
        }
        Ok(())
    }
}

/// Parse a duration such as "30s", "1ms", "1m30s" or "1.5h".
///
/// Units: ns, us (or µs), ms, s, m, h. A bare "0" is accepted.
pub fn parse_duration(input: &str) -> std::result::Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("duration cannot be empty".to_string());
    }
    if input == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = 0f64;
    let mut rest = input;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return Err(format!("invalid duration {:?}", input));
        }
        let value: f64 = rest[..number_len]
            .parse()
            .map_err(|_| format!("invalid duration {:?}", input))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let nanos_per_unit = match &rest[..unit_len] {
            "ns" => 1e0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            "" => return Err(format!("missing unit in duration {:?}", input)),
            unit => return Err(format!("unknown unit {:?} in duration {:?}", unit, input)),
        };
        rest = &rest[unit_len..];

        total += value * nanos_per_unit;
    }

    if !total.is_finite() || total > u64::MAX as f64 {
        return Err(format!("duration {:?} out of range", input));
    }
    Ok(Duration::from_nanos(total as u64))
}
