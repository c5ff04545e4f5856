use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use crate::allocation::engine::EngineConfig;
use crate::allocation::features::{FeatureSchema, DEFAULT_MAX_DISTANCE_KM};
use crate::allocation::scoring::{PredictorConfig, ScoringPolicy};

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub allocation: AllocationSettings,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            allocation: AllocationSettings::from_env()?,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Predictor location and scoring behaviour for allocation runs.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationSettings {
    pub predictor: PredictorConfig,
    pub allow_fallback: bool,
    pub policy: ScoringPolicy,
}

impl Default for AllocationSettings {
    fn default() -> Self {
        Self {
            predictor: PredictorConfig::default(),
            allow_fallback: true,
            policy: ScoringPolicy::default(),
        }
    }
}

impl AllocationSettings {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let model_path = env::var("ALLOC_MODEL_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.predictor.model_path);
        let model_version =
            env::var("ALLOC_MODEL_VERSION").unwrap_or(defaults.predictor.model_version);

        let schema = match env::var("ALLOC_FEATURE_SCHEMA") {
            Ok(raw) => raw
                .parse::<FeatureSchema>()
                .map_err(|_| invalid("ALLOC_FEATURE_SCHEMA", &raw))?,
            Err(_) => defaults.predictor.schema,
        };

        let max_distance_km = match env::var("ALLOC_MAX_DISTANCE_KM") {
            Ok(raw) => raw
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|value| value.is_finite() && *value > 0.0)
                .ok_or_else(|| invalid("ALLOC_MAX_DISTANCE_KM", &raw))?,
            Err(_) => DEFAULT_MAX_DISTANCE_KM,
        };

        let allow_fallback = match env::var("ALLOC_ALLOW_FALLBACK") {
            Ok(raw) => parse_bool(&raw).ok_or_else(|| invalid("ALLOC_ALLOW_FALLBACK", &raw))?,
            Err(_) => defaults.allow_fallback,
        };

        // `0` disables the boost
        let seniority_boost =
            optional_number("ALLOC_SENIORITY_BOOST", defaults.policy.seniority_boost)?
                .filter(|boost| *boost > 0.0);
        let disability_floor =
            optional_number("ALLOC_DISABILITY_FLOOR", defaults.policy.disability_floor)?;

        Ok(Self {
            predictor: PredictorConfig {
                schema,
                model_path,
                model_version,
                max_distance_km,
            },
            allow_fallback,
            policy: ScoringPolicy {
                seniority_boost,
                disability_floor,
            },
        })
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            allow_fallback: self.allow_fallback,
            policy: self.policy,
        }
    }
}

fn invalid(variable: &'static str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        variable,
        value: value.to_string(),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// `off`/`none`/empty disables the adjustment; unset keeps the default.
fn optional_number(
    variable: &'static str,
    default: Option<f64>,
) -> Result<Option<f64>, ConfigError> {
    let Ok(raw) = env::var(variable) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "off" | "none" => Ok(None),
        value => value
            .parse::<f64>()
            .ok()
            .filter(|number| number.is_finite() && *number >= 0.0)
            .map(Some)
            .ok_or_else(|| invalid(variable, &raw)),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidValue { variable: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidValue { variable, value } => {
                write!(f, "{variable} has an invalid value: {value:?}")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort | ConfigError::InvalidValue { .. } => None,
            ConfigError::InvalidHost { source } => Some(source),
        }
    }
}
