// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::encoding::LineEncoding;
use crate::error::ShipError;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Domain appended to the region to form the default ingestion endpoint.
pub const INGESTION_DOMAIN: &str = "data.logs.insight.rapid7.com";
/// Port of the token TCP input.
pub const DEFAULT_PORT: u16 = 443;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(10);

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Data storage region of the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Eu,
    Us,
    Ca,
    Au,
}

impl Region {
    pub const ALL: [Region; 4] = [Region::Eu, Region::Us, Region::Ca, Region::Au];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eu => "eu",
            Self::Us => "us",
            Self::Ca => "ca",
            Self::Au => "au",
        }
    }

    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}.{INGESTION_DOMAIN}", self.as_str())
    }
}

impl FromStr for Region {
    type Err = ShipError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|region| region.as_str() == normalized)
            .ok_or_else(|| {
                ShipError::InvalidConfig(format!(
                    "Unknown region '{}'. Must be one of: eu, us, ca, au",
                    s.trim()
                ))
            })
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration handed to the pipeline at construction time
#[derive(Clone)]
pub struct ShipperConfig {
    /// Log token, prefixed verbatim to every shipped line
    pub token: String,
    /// Region used to derive the endpoint when no explicit endpoint is set
    pub region: Option<Region>,
    /// Explicit ingestion hostname overriding the region default
    pub endpoint: Option<String>,
    pub port: u16,
    /// Bounds each TCP connect attempt and the TLS handshake
    pub connect_timeout: Duration,
    /// How long closing waits for queued lines to be shipped
    pub shutdown_grace_period: Duration,
    pub line_encoding: LineEncoding,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ShipperConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            region: None,
            endpoint: None,
            port: DEFAULT_PORT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            shutdown_grace_period: DEFAULT_SHUTDOWN_GRACE_PERIOD,
            line_encoding: LineEncoding::default(),
            log_level: "info".to_string(),
        }
    }
}

impl fmt::Debug for ShipperConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShipperConfig")
            .field("token", &"<redacted>")
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("port", &self.port)
            .field("connect_timeout", &self.connect_timeout)
            .field("shutdown_grace_period", &self.shutdown_grace_period)
            .field("line_encoding", &self.line_encoding)
            .field("log_level", &self.log_level)
            .finish()
    }
}

impl ShipperConfig {
    #[must_use]
    pub fn new(token: impl Into<String>, region: Region) -> Self {
        Self {
            token: token.into(),
            region: Some(region),
            ..Default::default()
        }
    }

    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ShipError> {
        let token = env::var("INSIGHT_TOKEN").unwrap_or_default();
        let region = match env::var("INSIGHT_REGION") {
            Ok(val) if !val.trim().is_empty() => Some(val.parse::<Region>()?),
            _ => None,
        };
        let endpoint = env::var("INSIGHT_ENDPOINT").ok();
        let port = env::var("INSIGHT_PORT")
            .ok()
            .and_then(|port| port.parse::<u16>().ok())
            .unwrap_or(DEFAULT_PORT);
        let connect_timeout = env::var("INSIGHT_CONNECT_TIMEOUT_SECS")
            .ok()
            .and_then(|secs| secs.parse::<u64>().ok())
            .map_or(DEFAULT_CONNECT_TIMEOUT, Duration::from_secs);
        let shutdown_grace_period = env::var("INSIGHT_SHUTDOWN_GRACE_SECS")
            .ok()
            .and_then(|secs| secs.parse::<u64>().ok())
            .map_or(DEFAULT_SHUTDOWN_GRACE_PERIOD, Duration::from_secs);
        let line_encoding = match env::var("INSIGHT_LINE_ENCODING") {
            Ok(val) => val.parse::<LineEncoding>()?,
            Err(_) => LineEncoding::default(),
        };
        let log_level = env::var("INSIGHT_LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or_else(|_| "info".to_string());

        let config = Self {
            token,
            region,
            endpoint,
            port,
            connect_timeout,
            shutdown_grace_period,
            line_encoding,
            log_level,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ShipError> {
        if self.token.trim().is_empty() {
            return Err(ShipError::InvalidConfig(
                "A log token is required".to_string(),
            ));
        }

        if self.port == 0 {
            return Err(ShipError::InvalidConfig(
                "Port must be greater than 0".to_string(),
            ));
        }

        if self.connect_timeout.is_zero() {
            return Err(ShipError::InvalidConfig(
                "Connect timeout must be greater than 0".to_string(),
            ));
        }

        if self.shutdown_grace_period.is_zero() {
            return Err(ShipError::InvalidConfig(
                "Shutdown grace period must be greater than 0".to_string(),
            ));
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ShipError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        self.resolve_endpoint().map(|_| ())
    }

    /// Returns the hostname to connect to: the explicit endpoint when set,
    /// otherwise the region default.
    pub fn resolve_endpoint(&self) -> Result<String, ShipError> {
        if let Some(endpoint) = self.endpoint.as_deref().map(str::trim) {
            if !endpoint.is_empty() {
                return Ok(endpoint.to_string());
            }
        }
        self.region.map(|region| region.endpoint()).ok_or_else(|| {
            ShipError::InvalidConfig("Either a region or an endpoint is required".to_string())
        })
    }
}
