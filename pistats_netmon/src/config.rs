//! Monitor configuration from `PISTATS_*` environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_IFACE: &str = "wlan0";
pub const DEFAULT_POLL_SECS: u64 = 5;
pub const DEFAULT_PROBE_ADDR: &str = "8.8.8.8:53";
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 3_000;
pub const DEFAULT_GRACE_SECS: u64 = 5;
pub const DEFAULT_BACKOFF_SECS: u64 = 5;
pub const AGENT_BIN_NAME: &str = "pistats_agent";

#[derive(Debug, Clone)]
pub struct Config {
    pub iface: String,
    pub poll_interval: Duration,
    pub probe_addr: SocketAddr,
    pub probe_timeout: Duration,
    pub agent_bin: PathBuf,
    pub grace: Duration,
    pub backoff: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            iface: get("PISTATS_IFACE").unwrap_or_else(|| DEFAULT_IFACE.into()),
            poll_interval: Duration::from_secs(parse_or(
                &get,
                "PISTATS_POLL_SECS",
                DEFAULT_POLL_SECS,
            )),
            probe_addr: get("PISTATS_PROBE_ADDR")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_probe_addr),
            probe_timeout: Duration::from_millis(parse_or(
                &get,
                "PISTATS_PROBE_TIMEOUT_MS",
                DEFAULT_PROBE_TIMEOUT_MS,
            )),
            agent_bin: get("PISTATS_AGENT_BIN")
                .map(PathBuf::from)
                .unwrap_or_else(default_agent_bin),
            grace: Duration::from_secs(parse_or(&get, "PISTATS_GRACE_SECS", DEFAULT_GRACE_SECS)),
            backoff: Duration::from_secs(parse_or(
                &get,
                "PISTATS_BACKOFF_SECS",
                DEFAULT_BACKOFF_SECS,
            )),
        }
    }
}

fn default_probe_addr() -> SocketAddr {
    // constant is well-formed; fall back to an explicit parse for clarity
    DEFAULT_PROBE_ADDR
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([8, 8, 8, 8], 53)))
}

/// The broadcaster usually ships next to the monitor binary.
fn default_agent_bin() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.join(AGENT_BIN_NAME)))
        .filter(|p| p.exists())
        .unwrap_or_else(|| PathBuf::from(AGENT_BIN_NAME))
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

    #[test]
    fn defaults_when_unset() {
        let cfg = Config::from_lookup(|_| None);
        assert_eq!(cfg.iface, "wlan0");
        assert_eq!(cfg.poll_interval, Duration::from_secs(5));
        assert_eq!(cfg.probe_addr, SocketAddr::from(([8, 8, 8, 8], 53)));
        assert_eq!(cfg.grace, Duration::from_secs(5));
    }

    #[test]
    fn overrides_apply() {
        let cfg = Config::from_lookup(|k| match k {
            "PISTATS_IFACE" => Some("eth0".into()),
            "PISTATS_POLL_SECS" => Some("1".into()),
            "PISTATS_PROBE_ADDR" => Some("1.1.1.1:53".into()),
            _ => None,
        });
        assert_eq!(cfg.iface, "eth0");
        assert_eq!(cfg.poll_interval, Duration::from_secs(1));
        assert_eq!(cfg.probe_addr, SocketAddr::from(([1, 1, 1, 1], 53)));
    }
}
