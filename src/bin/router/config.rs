use std::time::Duration;

use clap::Parser;
use muster::duration::parse_duration;

/// Router process configuration, loaded once at startup from flags/env vars.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Self-registering reverse-proxy fleet: router")]
pub struct Config {
    /// host:port the registry server binds, for backend POST/DELETE.
    #[arg(long, env = "REGISTRY_ADDR", default_value = ":8081")]
    pub registry_addr: String,

    /// host:port the client-facing router server binds.
    #[arg(long, env = "HTTP_ADDR", default_value = ":8080")]
    pub http_addr: String,

    /// How long a backend may go without a heartbeat before eviction.
    #[arg(long, env = "MAX_CLIENT_NO_NOTIF", default_value = "2s", value_parser = parse_duration)]
    pub max_client_no_notif: Duration,

    /// Latency above which a sample is classified "slow".
    #[arg(long, env = "SLOW_THRESHOLD", default_value = "500ms", value_parser = parse_duration)]
    pub slow_threshold: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_parses_from_args() {
        let cfg = Config::try_parse_from([
            "musterd",
            "--registry-addr",
            ":9081",
            "--max-client-no-notif",
            "3s",
        ])
        .unwrap();
        assert_eq!(cfg.registry_addr, ":9081");
        assert_eq!(cfg.max_client_no_notif, Duration::from_secs(3));
    }

    #[test]
    fn test_config_defaults_apply_when_flags_are_absent() {
        let cfg = Config::try_parse_from(["musterd"]).unwrap();
        assert_eq!(cfg.registry_addr, ":8081");
        assert_eq!(cfg.http_addr, ":8080");
        assert_eq!(cfg.max_client_no_notif, Duration::from_secs(2));
        assert_eq!(cfg.slow_threshold, Duration::from_millis(500));
    }

    #[test]
    fn test_config_malformed_duration_is_rejected() {
        let result = Config::try_parse_from(["musterd", "--slow-threshold", "banana"]);
        assert!(result.is_err());
    }
}
