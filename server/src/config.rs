//! Server configuration.
//!
//! Loaded from a TOML file; every section has defaults so a missing file
//! or empty table still yields a runnable server.

use serde::Deserialize;
use std::path::Path;

/// Server configuration loaded from a TOML file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Worker thread configuration.
    #[serde(default)]
    pub workers: WorkersConfig,

    /// Engine limits.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Listeners. Defaults to one listener on port 60008.
    #[serde(default)]
    pub listener: Vec<ListenerConfig>,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&raw)?;
        Ok(config)
    }

    /// Listener ports, falling back to the default port when the config
    /// names none.
    pub fn ports(&self) -> Vec<u16> {
        if self.listener.is_empty() {
            vec![60008]
        } else {
            self.listener.iter().map(|l| l.port).collect()
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkersConfig {
    /// Number of worker threads. 0 = number of CPUs.
    #[serde(default)]
    pub threads: usize,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Maximum simultaneously connected clients.
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,

    /// TCP listen backlog.
    #[serde(default = "default_backlog")]
    pub backlog: i32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_clients: default_max_clients(),
            backlog: default_backlog(),
        }
    }
}

fn default_max_clients() -> usize {
    200_000
}

fn default_backlog() -> i32 {
    100_000
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListenerConfig {
    pub port: u16,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level filter used when RUST_LOG is not set.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Include timestamps in log lines.
    #[serde(default = "default_true")]
    pub timestamps: bool,

    /// Include thread names in log lines.
    #[serde(default = "default_true")]
    pub thread_names: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            timestamps: true,
            thread_names: true,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_has_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.ports(), vec![60008]);
        assert_eq!(config.engine.max_clients, 200_000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn listeners_and_limits_parse() {
        let config: Config = toml::from_str(
            r#"
            [workers]
            threads = 4

            [engine]
            max_clients = 1024

            [[listener]]
            port = 60008

            [[listener]]
            port = 60009
            "#,
        )
        .unwrap();
        assert_eq!(config.workers.threads, 4);
        assert_eq!(config.engine.max_clients, 1024);
        assert_eq!(config.ports(), vec![60008, 60009]);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(toml::from_str::<Config>("[engine]\nmax_conns = 1").is_err());
    }
}
