// 📜 Logging - tracing subscriber shared by the CLI and the server
// The filter comes from RUST_LOG, falling back to the configured default level.
// Output is either human-readable or JSON lines.

use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Directive used when `RUST_LOG` is not set, e.g. `info` or `edi_orchestrator=debug`
    pub default_directive: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            default_directive: "info".to_string(),
            json: false,
        }
    }
}

impl LogConfig {
    /// 0 = warn, 1 = info, 2 = debug, 3+ = trace
    pub fn from_verbosity(verbosity: u8, json: bool) -> Self {
        let level = match verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        LogConfig {
            default_directive: level.to_string(),
            json,
        }
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.default_directive))
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let registry = tracing_subscriber::registry().with(config.filter());

    let result = if config.json {
        registry.with(fmt::layer().json().with_target(true)).try_init()
    } else {
        registry.with(fmt::layer().with_target(false)).try_init()
    };

    result.map_err(|e| anyhow!("failed to initialise logging: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(LogConfig::from_verbosity(0, false).default_directive, "warn");
        assert_eq!(LogConfig::from_verbosity(1, false).default_directive, "info");
        assert_eq!(LogConfig::from_verbosity(2, true).default_directive, "debug");
        assert_eq!(LogConfig::from_verbosity(9, false).default_directive, "trace");
        assert!(LogConfig::from_verbosity(2, true).json);
    }
}
