use std::time::Duration;

use clap::Parser;
use muster::duration::parse_duration;

/// Worker process configuration, loaded once at startup from flags/env vars.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Self-registering reverse-proxy fleet: worker")]
pub struct Config {
    /// host:port of the registry server to heartbeat against.
    #[arg(long, env = "REGISTRY_ADDR")]
    pub registry_addr: String,

    /// host:port this worker's echo service binds. `:0` binds an ephemeral port.
    #[arg(long, env = "WORKER_ADDR", default_value = ":0")]
    pub worker_addr: String,

    /// host:port advertised to the registry. Defaults to the bound address.
    #[arg(long, env = "ADVERTISE_ADDR")]
    pub advertise_addr: Option<String>,

    /// How often to heartbeat the registry.
    #[arg(long, env = "REGISTRY_INTERVAL", default_value = "1s", value_parser = parse_duration)]
    pub registry_interval: Duration,

    /// Artificial delay applied to every echoed request.
    #[arg(long, env = "WORKER_DELAY", default_value = "0s", value_parser = parse_duration)]
    pub worker_delay: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_registry_addr_is_required() {
        let result = Config::try_parse_from(["musterw"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_config_defaults_apply_when_optional_vars_are_absent() {
        let cfg = Config::try_parse_from(["musterw", "--registry-addr", ":8081"]).unwrap();
        assert_eq!(cfg.worker_addr, ":0");
        assert!(cfg.advertise_addr.is_none());
        assert_eq!(cfg.registry_interval, Duration::from_secs(1));
        assert_eq!(cfg.worker_delay, Duration::ZERO);
    }

    #[test]
    fn test_config_malformed_duration_is_rejected() {
        let result = Config::try_parse_from([
            "musterw",
            "--registry-addr",
            ":8081",
            "--registry-interval",
            "banana",
        ]);
        assert!(result.is_err());
    }
}
