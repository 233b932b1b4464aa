//! Configuration: a small hand-written CLI argument loop (no external
//! parser; CLI parsing is an external collaborator, only its interface is
//! specified) overlaid with the three environment variables.

use std::net::SocketAddr;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required flag --{0}")]
    MissingFlag(&'static str),
    #[error("unrecognized argument: {0}")]
    UnrecognizedArgument(String),
    #[error("--address is not a valid socket address: {0}")]
    InvalidAddress(String),
    #[error("--{flag} is not valid base64: {source}")]
    InvalidBase64 {
        flag: &'static str,
        #[source]
        source: base64::DecodeError,
    },
    #[error("--{0} must decode to exactly 32 bytes")]
    WrongKeyLength(&'static str),
    #[error("environment variable {0} is not a valid integer: {1}")]
    InvalidEnvInt(&'static str, String),
}

pub struct Config {
    pub address: SocketAddr,
    pub backend_url: String,
    pub private_key: [u8; 32],
    pub backend_public_key: [u8; 32],
    pub log_level: u8,
    pub ping_interval_ms: u64,
    pub max_sessions: usize,
}

fn decode_key(flag: &'static str, value: &str) -> Result<[u8; 32], ConfigError> {
    let bytes = BASE64
        .decode(value)
        .map_err(|source| ConfigError::InvalidBase64 { flag, source })?;
    bytes.try_into().map_err(|_| ConfigError::WrongKeyLength(flag))
}

fn env_or_default<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidEnvInt(name, raw)),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn parse<I: Iterator<Item = String>>(mut args: I) -> Result<Self, ConfigError> {
        let mut address = None;
        let mut backend_url = None;
        let mut private_key = None;
        let mut backend_public_key = None;

        while let Some(flag) = args.next() {
            let mut value = || args.next().ok_or_else(|| ConfigError::MissingFlag("value"));
            match flag.as_str() {
                "--address" => address = Some(value()?),
                "--backend" => backend_url = Some(value()?),
                "--private-key" => private_key = Some(value()?),
                "--backend-public-key" => backend_public_key = Some(value()?),
                other => return Err(ConfigError::UnrecognizedArgument(other.to_string())),
            }
        }

        let address_str = address.ok_or(ConfigError::MissingFlag("address"))?;
        let address: SocketAddr = address_str
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(address_str))?;
        let backend_url = backend_url.ok_or(ConfigError::MissingFlag("backend"))?;
        let private_key = decode_key("private-key", &private_key.ok_or(ConfigError::MissingFlag("private-key"))?)?;
        let backend_public_key = decode_key(
            "backend-public-key",
            &backend_public_key.ok_or(ConfigError::MissingFlag("backend-public-key"))?,
        )?;

        let log_level: u8 = env_or_default("RELAY_LOG_LEVEL", 3)?;
        let ping_interval_ms: u64 = env_or_default("RELAY_PING_INTERVAL_MS", 100)?;
        let max_sessions: usize = env_or_default("RELAY_MAX_SESSIONS", 1_000_000)?;

        Ok(Config {
            address,
            backend_url,
            private_key,
            backend_public_key,
            log_level,
            ping_interval_ms,
            max_sessions,
        })
    }
}

/// Maps `RELAY_LOG_LEVEL` (0..5) onto a `tracing` level filter string.
pub fn log_level_filter(level: u8) -> &'static str {
    match level {
        0 => "off",
        1 => "error",
        2 => "warn",
        3 => "info",
        4 => "debug",
        _ => "trace",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> impl Iterator<Item = String> {
        items.iter().map(|s| s.to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn parses_minimal_valid_config() {
        let key = BASE64.encode([1u8; 32]);
        let config = Config::parse(args(&[
            "--address",
            "203.0.113.5:40000",
            "--backend",
            "https://backend.example",
            "--private-key",
            &key,
            "--backend-public-key",
            &key,
        ]))
        .unwrap();
        assert_eq!(config.address.to_string(), "203.0.113.5:40000");
        assert_eq!(config.private_key, [1u8; 32]);
        assert_eq!(config.log_level, 3);
        assert_eq!(config.ping_interval_ms, 100);
        assert_eq!(config.max_sessions, 1_000_000);
    }

    #[test]
    fn missing_flag_is_an_error() {
        let err = Config::parse(args(&["--address", "203.0.113.5:40000"])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingFlag(_)));
    }

    #[test]
    fn wrong_key_length_is_rejected() {
        let short_key = BASE64.encode([1u8; 16]);
        let err = Config::parse(args(&[
            "--address",
            "203.0.113.5:40000",
            "--backend",
            "https://backend.example",
            "--private-key",
            &short_key,
            "--backend-public-key",
            &short_key,
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::WrongKeyLength("private-key")));
    }

    #[test]
    fn log_level_maps_onto_tracing_filters() {
        assert_eq!(log_level_filter(0), "off");
        assert_eq!(log_level_filter(5), "trace");
        assert_eq!(log_level_filter(9), "trace");
    }
}
