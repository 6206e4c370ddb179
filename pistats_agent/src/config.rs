//! Agent configuration from `PISTATS_*` environment variables.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8765;
pub const DEFAULT_TICK_MS: u64 = 1_000;
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_PING_SECS: u64 = 20;
pub const DEFAULT_PONG_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub tick: Duration,
    pub send_timeout: Duration,
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build a config from any key lookup; lets tests inject values
    /// without touching process-global environment.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let host = get("PISTATS_HOST")
            .and_then(|v| v.parse().ok())
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        let port = parse_or(&get, "PISTATS_PORT", DEFAULT_PORT);
        Self {
            host,
            port,
            tick: Duration::from_millis(parse_or(&get, "PISTATS_TICK_MS", DEFAULT_TICK_MS)),
            send_timeout: Duration::from_millis(parse_or(
                &get,
                "PISTATS_SEND_TIMEOUT_MS",
                DEFAULT_SEND_TIMEOUT_MS,
            )),
            ping_interval: Duration::from_secs(parse_or(
                &get,
                "PISTATS_PING_SECS",
                DEFAULT_PING_SECS,
            )),
            pong_timeout: Duration::from_secs(parse_or(
                &get,
                "PISTATS_PONG_TIMEOUT_SECS",
                DEFAULT_PONG_TIMEOUT_SECS,
            )),
        }
    }
}

fn parse_or<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        let map: HashMap<&str, &str> = pairs.iter().copied().collect();
        move |k| map.get(k).map(|v| v.to_string())
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = Config::from_lookup(|_| None);
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.host, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(cfg.tick, Duration::from_millis(1_000));
        assert_eq!(cfg.ping_interval, Duration::from_secs(20));
    }

    #[test]
    fn env_overrides_apply() {
        let cfg = Config::from_lookup(lookup(&[
            ("PISTATS_HOST", "127.0.0.1"),
            ("PISTATS_PORT", "9999"),
            ("PISTATS_TICK_MS", "250"),
        ]));
        assert_eq!(cfg.host.to_string(), "127.0.0.1");
        assert_eq!(cfg.port, 9999);
        assert_eq!(cfg.tick, Duration::from_millis(250));
    }

    #[test]
    fn garbage_values_fall_back_to_defaults() {
        let cfg = Config::from_lookup(lookup(&[
            ("PISTATS_PORT", "not-a-port"),
            ("PISTATS_TICK_MS", "-5"),
        ]));
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.tick, Duration::from_millis(DEFAULT_TICK_MS));
    }
}
