//! Bridge configuration.
//!
//! The host process location comes from process-start arguments
//! (`--host`, `--port`); everything else has a fixed default that callers can
//! override with the `with_*` builders.

use std::time::Duration;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 13000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid port '{0}'")]
    InvalidPort(String),
    #[error("{0} requires a value")]
    MissingValue(&'static str),
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub host: String,
    pub port: u16,
    /// Flat delay before a reconnect attempt. No backoff, no jitter.
    pub reconnect_delay: Duration,
    /// Tick of the `wait_connected` poll.
    pub poll_interval: Duration,
    /// Invocation timeout when the caller does not set one.
    pub default_timeout: Duration,
    /// Request timeout of the one-shot HTTP client.
    pub one_shot_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            reconnect_delay: Duration::from_secs(5),
            poll_interval: Duration::from_millis(100),
            default_timeout: Duration::from_secs(15),
            one_shot_timeout: Duration::from_secs(30),
        }
    }
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from process-start arguments, excluding argv[0].
    ///
    /// Accepts `--host <h>`, `--host=<h>`, `--port <p>`, `--port=<p>`. Other
    /// arguments belong to the embedding process and are skipped.
    pub fn from_args<I, S>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut config = Self::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            let arg = arg.as_ref();
            let (flag, inline) = match arg.split_once('=') {
                Some((flag, value)) => (flag, Some(value.to_string())),
                None => (arg, None),
            };
            match flag {
                "--host" => {
                    config.host = match inline {
                        Some(v) => v,
                        None => next_value(&mut args, "--host")?,
                    };
                }
                "--port" => {
                    let raw = match inline {
                        Some(v) => v,
                        None => next_value(&mut args, "--port")?,
                    };
                    config.port = parse_port(&raw)?;
                }
                _ => {}
            }
        }

        Ok(config)
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_one_shot_timeout(mut self, timeout: Duration) -> Self {
        self.one_shot_timeout = timeout;
        self
    }

    pub fn persistent_url(&self) -> String {
        format!("ws://{}:{}/ws", self.host, self.port)
    }

    pub fn one_shot_url(&self) -> String {
        format!("http://{}:{}/", self.host, self.port)
    }
}

fn next_value<I, S>(args: &mut I, flag: &'static str) -> Result<String, ConfigError>
where
    I: Iterator<Item = S>,
    S: AsRef<str>,
{
    args.next()
        .map(|v| v.as_ref().to_string())
        .ok_or(ConfigError::MissingValue(flag))
}

fn parse_port(raw: &str) -> Result<u16, ConfigError> {
    match raw.parse::<u16>() {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(ConfigError::InvalidPort(raw.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 13000);
        assert_eq!(config.reconnect_delay, Duration::from_secs(5));
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert_eq!(config.default_timeout, Duration::from_secs(15));
    }

    #[test]
    fn no_args_yields_loopback_default() {
        let config = BridgeConfig::from_args(Vec::<String>::new()).unwrap();
        assert_eq!(config.persistent_url(), "ws://127.0.0.1:13000/ws");
        assert_eq!(config.one_shot_url(), "http://127.0.0.1:13000/");
    }

    #[test]
    fn parses_separate_and_inline_values() {
        let config = BridgeConfig::from_args(["--host", "10.0.0.2", "--port=14000"]).unwrap();
        assert_eq!(config.host, "10.0.0.2");
        assert_eq!(config.port, 14000);

        let config = BridgeConfig::from_args(["--host=::1", "--port", "15000"]).unwrap();
        assert_eq!(config.host, "::1");
        assert_eq!(config.port, 15000);
    }

    #[test]
    fn foreign_args_are_skipped() {
        let config =
            BridgeConfig::from_args(["--no-sandbox", "--port", "13001", "qq://launch"]).unwrap();
        assert_eq!(config.port, 13001);
        assert_eq!(config.host, DEFAULT_HOST);
    }

    #[test]
    fn bad_port_is_rejected() {
        assert!(matches!(
            BridgeConfig::from_args(["--port", "http"]),
            Err(ConfigError::InvalidPort(_))
        ));
        assert!(matches!(
            BridgeConfig::from_args(["--port=0"]),
            Err(ConfigError::InvalidPort(_))
        ));
        assert!(matches!(
            BridgeConfig::from_args(["--port"]),
            Err(ConfigError::MissingValue("--port"))
        ));
    }

    #[test]
    fn builder_pattern() {
        let config = BridgeConfig::new()
            .with_host("localhost")
            .with_port(9)
            .with_reconnect_delay(Duration::from_millis(50))
            .with_poll_interval(Duration::from_millis(10))
            .with_default_timeout(Duration::from_secs(1))
            .with_one_shot_timeout(Duration::from_secs(2));
        assert_eq!(config.persistent_url(), "ws://localhost:9/ws");
        assert_eq!(config.reconnect_delay, Duration::from_millis(50));
        assert_eq!(config.one_shot_timeout, Duration::from_secs(2));
    }
}
