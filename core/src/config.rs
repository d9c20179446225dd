use std::{fs, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use event_api::ChannelId;
use serde::Deserialize;

use crate::{cli::Cli, source::DelaySchedule, supervisor::BackoffPolicy};

/// Runtime configuration resolved from CLI, environment, config file and
/// defaults, in that order of precedence.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Host the HTTP listener binds to.
    pub host: String,
    pub port: u16,
    /// Channel ids served, in the order `/channels` reports them.
    pub channels: Vec<ChannelId>,
    pub schedule: DelaySchedule,
    /// Upper bound of parked connections per channel; `None` is unbounded.
    pub max_waiters_per_channel: Option<usize>,
    pub backoff: BackoffPolicy,
    /// `EnvFilter` directive for logging.
    pub log_filter: String,
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8091,
            channels: vec![ChannelId(1), ChannelId(2), ChannelId(3)],
            schedule: DelaySchedule::default(),
            max_waiters_per_channel: None,
            backoff: BackoffPolicy::default(),
            log_filter: "info".into(),
            log_file: None,
        }
    }
}

#[derive(Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    server: FileServer,
    #[serde(default)]
    source: FileSource,
    #[serde(default)]
    distributor: FileDistributor,
    #[serde(default)]
    supervisor: FileSupervisor,
    #[serde(default)]
    logging: FileLogging,
}

#[derive(Deserialize, Default)]
struct FileServer {
    host: Option<String>,
    port: Option<u16>,
    channels: Option<Vec<u32>>,
}

#[derive(Deserialize, Default)]
struct FileSource {
    base_units: Option<u32>,
    spread_units: Option<u32>,
    unit_ms: Option<u64>,
}

#[derive(Deserialize, Default)]
struct FileDistributor {
    max_waiters_per_channel: Option<usize>,
}

#[derive(Deserialize, Default)]
struct FileSupervisor {
    first_backoff_ms: Option<u64>,
    max_backoff_ms: Option<u64>,
    factor: Option<f64>,
}

#[derive(Deserialize, Default)]
struct FileLogging {
    filter: Option<String>,
    file: Option<PathBuf>,
}

impl Config {
    /// Resolve configuration from CLI, environment variables, config file and defaults.
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut cfg = Config::default();
        let mut channels: Vec<u32> = cfg.channels.iter().map(|c| c.0).collect();

        // config file path precedence: CLI -> ENV -> default
        let config_path = cli
            .config
            .clone()
            .or_else(|| std::env::var("EVENTHUB_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("config/eventhub.toml"));

        if let Ok(bytes) = fs::read(&config_path) {
            let contents = String::from_utf8_lossy(&bytes);
            let file: FileConfig = toml::from_str(&contents)
                .with_context(|| format!("invalid config file {}", config_path.display()))?;
            if let Some(h) = file.server.host {
                cfg.host = h;
            }
            if let Some(p) = file.server.port {
                cfg.port = p;
            }
            if let Some(c) = file.server.channels {
                channels = c;
            }
            if let Some(b) = file.source.base_units {
                cfg.schedule.base = b;
            }
            if let Some(s) = file.source.spread_units {
                cfg.schedule.spread = s;
            }
            if let Some(ms) = file.source.unit_ms {
                cfg.schedule.unit = Duration::from_millis(ms);
            }
            cfg.max_waiters_per_channel = file.distributor.max_waiters_per_channel;
            if let Some(ms) = file.supervisor.first_backoff_ms {
                cfg.backoff.first = Duration::from_millis(ms);
            }
            if let Some(ms) = file.supervisor.max_backoff_ms {
                cfg.backoff.max = Duration::from_millis(ms);
            }
            if let Some(f) = file.supervisor.factor {
                cfg.backoff.factor = f;
            }
            if let Some(f) = file.logging.filter {
                cfg.log_filter = f;
            }
            cfg.log_file = file.logging.file;
        }

        // environment overrides
        if let Ok(h) = std::env::var("EVENTHUB_HOST") {
            cfg.host = h;
        }
        if let Ok(p) = std::env::var("EVENTHUB_PORT") {
            if let Ok(p) = p.parse::<u16>() {
                cfg.port = p;
            }
        }
        if let Ok(c) = std::env::var("EVENTHUB_CHANNELS") {
            if let Ok(c) = c
                .split(',')
                .map(|s| s.trim().parse::<u32>())
                .collect::<Result<Vec<_>, _>>()
            {
                channels = c;
            }
        }
        if let Ok(l) = std::env::var("EVENTHUB_LOG") {
            cfg.log_filter = l;
        }

        // CLI overrides
        if let Some(h) = &cli.host {
            cfg.host = h.clone();
        }
        if let Some(p) = cli.port {
            cfg.port = p;
        }
        if let Some(c) = &cli.channels {
            channels = c.clone();
        }
        if let Some(l) = &cli.log {
            cfg.log_filter = l.clone();
        }
        if let Some(f) = &cli.log_file {
            cfg.log_file = Some(f.clone());
        }

        cfg.channels = Vec::with_capacity(channels.len());
        for id in channels {
            if !cfg.channels.contains(&ChannelId(id)) {
                cfg.channels.push(ChannelId(id));
            }
        }

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("invalid_port");
        }
        if self.channels.is_empty() {
            anyhow::bail!("no_channels");
        }
        if self.schedule.unit.is_zero() {
            anyhow::bail!("invalid_source_unit");
        }
        if self.schedule.checked_max().is_none() {
            anyhow::bail!("invalid_source_schedule");
        }
        if self.max_waiters_per_channel == Some(0) {
            anyhow::bail!("invalid_max_waiters");
        }
        if !(self.backoff.factor >= 1.0) || self.backoff.first > self.backoff.max {
            anyhow::bail!("invalid_backoff");
        }
        Ok(())
    }

    /// Address string the HTTP listener binds to.
    pub fn bind(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    fn clear_env() {
        for key in [
            "EVENTHUB_CONFIG",
            "EVENTHUB_HOST",
            "EVENTHUB_PORT",
            "EVENTHUB_CHANNELS",
            "EVENTHUB_LOG",
        ] {
            std::env::remove_var(key);
        }
    }

    fn cli_with_file(contents: &str) -> (tempfile::TempDir, Cli) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.toml");
        fs::write(&path, contents).unwrap();
        let cli = Cli {
            config: Some(path),
            ..Default::default()
        };
        (dir, cli)
    }

    #[test]
    #[serial]
    fn missing_keys_defaults() {
        clear_env();
        let (_dir, cli) = cli_with_file("");
        let cfg = Config::load(&cli).unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.bind(), "0.0.0.0:8091");
        assert_eq!(cfg.channels, vec![ChannelId(1), ChannelId(2), ChannelId(3)]);
        assert_eq!(cfg.max_waiters_per_channel, None);
    }

    #[test]
    #[serial]
    fn valid_config_parses() {
        clear_env();
        let (_dir, cli) = cli_with_file(
            "[server]\nhost=\"127.0.0.1\"\nport=5555\nchannels=[4,5]\n\
             [source]\nbase_units=1\nspread_units=0\nunit_ms=10\n\
             [distributor]\nmax_waiters_per_channel=8\n\
             [logging]\nfilter=\"debug\"\nfile=\"log.txt\"\n",
        );
        let cfg = Config::load(&cli).unwrap();
        assert_eq!(cfg.bind(), "127.0.0.1:5555");
        assert_eq!(cfg.channels, vec![ChannelId(4), ChannelId(5)]);
        assert_eq!(cfg.schedule.min(), Duration::from_millis(10));
        assert_eq!(cfg.schedule.max(), Duration::from_millis(10));
        assert_eq!(cfg.max_waiters_per_channel, Some(8));
        assert_eq!(cfg.log_filter, "debug");
        assert_eq!(cfg.log_file, Some(PathBuf::from("log.txt")));
    }

    #[test]
    #[serial]
    fn precedence_cli_env_file() {
        clear_env();
        let (_dir, mut cli) = cli_with_file("[server]\nport=1111\nchannels=[1]\n");
        std::env::set_var("EVENTHUB_PORT", "2222");
        std::env::set_var("EVENTHUB_CHANNELS", "7, 8");
        cli.port = Some(3333);
        let cfg = Config::load(&cli).unwrap();
        assert_eq!(cfg.port, 3333);
        assert_eq!(cfg.channels, vec![ChannelId(7), ChannelId(8)]);
        cli.channels = Some(vec![9]);
        let cfg = Config::load(&cli).unwrap();
        assert_eq!(cfg.channels, vec![ChannelId(9)]);
        clear_env();
    }

    #[test]
    #[serial]
    fn duplicate_channels_keep_first_order() {
        clear_env();
        let (_dir, cli) = cli_with_file("[server]\nchannels=[3,1,3,2,1]\n");
        let cfg = Config::load(&cli).unwrap();
        assert_eq!(cfg.channels, vec![ChannelId(3), ChannelId(1), ChannelId(2)]);
    }

    #[test]
    #[serial]
    fn invalid_values_fail() {
        clear_env();
        for bad in [
            "[server]\nport=0\n",
            "[server]\nchannels=[]\n",
            "[source]\nunit_ms=0\n",
            "[source]\nbase_units=4294967295\nspread_units=7\n",
            "[source]\nbase_units=4294967295\nspread_units=0\nunit_ms=9223372036854775807\n",
            "[distributor]\nmax_waiters_per_channel=0\n",
            "[supervisor]\nfactor=0.5\n",
            "[server\n",
        ] {
            let (_dir, cli) = cli_with_file(bad);
            assert!(Config::load(&cli).is_err(), "accepted: {bad}");
        }
    }

    #[test]
    #[serial]
    fn ipv6_host_is_bracketed() {
        clear_env();
        let (_dir, cli) = cli_with_file("[server]\nhost=\"::1\"\n");
        let cfg = Config::load(&cli).unwrap();
        assert_eq!(cfg.bind(), "[::1]:8091");
    }
}
