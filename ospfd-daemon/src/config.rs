//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

#![allow(clippy::derivable_impls)]

use ospfd_engine::config::InstanceCfg;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub logging: Logging,
    pub notifications: Notifications,
    pub ospf: InstanceCfg,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Logging {
    pub file: LoggingFile,
    pub stdout: LoggingStdout,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingFile {
    pub enabled: bool,
    pub dir: String,
    pub name: String,
    pub rotation: LoggingFileRotation,
    #[serde(flatten)]
    pub fmt: LoggingFmt,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingStdout {
    pub enabled: bool,
    #[serde(flatten)]
    pub fmt: LoggingFmt,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingFmt {
    pub style: LoggingFmtStyle,
    pub colors: bool,
    pub show_thread_id: bool,
    pub show_source: bool,
}

#[derive(Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LoggingFileRotation {
    #[default]
    Never,
    Hourly,
    Daily,
}

#[derive(Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LoggingFmtStyle {
    Compact,
    Full,
    Json,
    Pretty,
}

// Interface notifications published by the ASIC driver.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Notifications {
    pub enabled: bool,
    // Unix socket streaming one JSON notification per line.
    pub path: String,
    // Seconds to wait before reconnecting.
    pub reconnect_interval: u16,
}

#[derive(Debug)]
pub enum Error {
    Read(String, std::io::Error),
    Parse(String, toml::de::Error),
}

// ===== impl Config =====

impl Config {
    const DFLT_FILEPATH: &'static str = "/etc/ospfd.toml";

    // Loads the configuration file.
    //
    // A missing default file isn't an error: the daemon then runs with the
    // default configuration.
    pub(crate) fn load(config_file: Option<&str>) -> Result<Config, Error> {
        let path = config_file.unwrap_or(Config::DFLT_FILEPATH);

        match std::fs::read_to_string(path) {
            Ok(config_str) => Config::parse(&config_str)
                .map_err(|error| Error::Parse(path.to_owned(), error)),
            Err(error)
                if config_file.is_none()
                    && error.kind() == std::io::ErrorKind::NotFound =>
            {
                eprintln!("Failed to load configuration file: {error}");
                eprintln!("Falling back to default configuration...");
                Ok(Config::default())
            }
            Err(error) => Err(Error::Read(path.to_owned(), error)),
        }
    }

    pub(crate) fn parse(config_str: &str) -> Result<Config, toml::de::Error> {
        toml::from_str(config_str)
    }
}

impl Default for Config {
    fn default() -> Config {
        Config {
            logging: Default::default(),
            notifications: Default::default(),
            ospf: Default::default(),
        }
    }
}

// ===== impl LoggingFile =====

impl Default for LoggingFile {
    fn default() -> LoggingFile {
        LoggingFile {
            enabled: false,
            dir: "/var/log".to_owned(),
            name: "ospfd.log".to_owned(),
            rotation: Default::default(),
            fmt: Default::default(),
        }
    }
}

// ===== impl LoggingStdout =====

impl Default for LoggingStdout {
    fn default() -> LoggingStdout {
        LoggingStdout {
            enabled: true,
            fmt: Default::default(),
        }
    }
}

// ===== impl LoggingFmt =====

impl Default for LoggingFmt {
    fn default() -> LoggingFmt {
        LoggingFmt {
            style: LoggingFmtStyle::Full,
            colors: false,
            show_thread_id: false,
            show_source: false,
        }
    }
}

// ===== impl Notifications =====

impl Default for Notifications {
    fn default() -> Notifications {
        Notifications {
            enabled: true,
            path: "/var/run/asic/notifications.sock".to_owned(),
            reconnect_interval: 1,
        }
    }
}

// ===== impl Error =====

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Read(path, ..) => {
                write!(f, "failed to read configuration file {path}")
            }
            Error::Parse(path, ..) => {
                write!(f, "failed to parse configuration file {path}")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Read(_, error) => Some(error),
            Error::Parse(_, error) => Some(error),
        }
    }
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use const_addrs::ip4;
    use ospfd_engine::interface::InterfaceType;

    use super::*;

    #[test]
    fn parse_empty() {
        let config = Config::parse("").unwrap();
        assert!(config.logging.stdout.enabled);
        assert!(!config.logging.file.enabled);
        assert_eq!(config.logging.stdout.fmt.style, LoggingFmtStyle::Full);
        assert!(config.notifications.enabled);
        assert_eq!(config.ospf, InstanceCfg::default());
    }

    #[test]
    fn parse_full() {
        let config = Config::parse(
            r#"
            [logging.stdout]
            enabled = false

            [logging.file]
            enabled = true
            dir = "/tmp"
            rotation = "daily"
            style = "json"

            [notifications]
            path = "/tmp/asic.sock"

            [ospf]
            router_id = "1.1.1.1"
            spf_initial_delay = 100

            [ospf.areas."0.0.0.1"]
            summary = false

            [ospf.interfaces.eth0]
            area_id = "0.0.0.1"
            if_type = "point-to-point"
            cost = 100
            auth_key = "secret"

            [ospf.interfaces.eth1]
            "#,
        )
        .unwrap();

        assert!(!config.logging.stdout.enabled);
        assert!(config.logging.file.enabled);
        assert_eq!(config.logging.file.dir, "/tmp");
        assert_eq!(config.logging.file.name, "ospfd.log");
        assert_eq!(config.logging.file.rotation, LoggingFileRotation::Daily);
        assert_eq!(config.logging.file.fmt.style, LoggingFmtStyle::Json);
        assert_eq!(config.notifications.path, "/tmp/asic.sock");

        let ospf = &config.ospf;
        assert!(ospf.enabled);
        assert_eq!(ospf.router_id, Some(ip4!("1.1.1.1")));
        assert_eq!(ospf.spf_initial_delay, 100);
        assert!(!ospf.areas[&ip4!("0.0.0.1")].summary);

        let eth0 = &ospf.interfaces["eth0"];
        assert_eq!(eth0.area_id, ip4!("0.0.0.1"));
        assert_eq!(eth0.if_type, InterfaceType::PointToPoint);
        assert_eq!(eth0.cost, 100);
        assert_eq!(eth0.priority, 1);
        assert_eq!(eth0.auth_key.as_deref(), Some("secret"));

        let eth1 = &ospf.interfaces["eth1"];
        assert_eq!(eth1.area_id, ip4!("0.0.0.0"));
        assert_eq!(eth1.hello_interval, 10);
        assert_eq!(eth1.dead_interval, 40);
    }

    #[test]
    fn parse_unknown_field() {
        assert!(
            Config::parse("[ospf]\nrouter_identifier = \"1.1.1.1\"").is_err()
        );
        assert!(Config::parse("[logging]\njournald = true").is_err());
    }

    #[test]
    fn load_missing_file() {
        let error = Config::load(Some("/nonexistent/ospfd.toml")).unwrap_err();
        assert!(matches!(error, Error::Read(..)));
    }
}
