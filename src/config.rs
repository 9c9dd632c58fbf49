use crate::version::Version;
use crate::version_switch;
use crate::{muted_error, weak_error};
use log::error;
use serde::{Deserialize, Serialize};
use std::fs::read_to_string;

/// Optional backend features. Selected once per session instead of layering behavior
/// per backend version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    /// Threads run and stop independently. When disabled a stop or resume of any thread
    /// applies to every thread of its process.
    pub non_stop: bool,
    /// Backend accepts `--thread-group` on execution commands and reports a pid on
    /// `thread-group-started`.
    pub multi_process: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            non_stop: true,
            multi_process: true,
        }
    }
}

impl Capabilities {
    /// Return capabilities supported by a backend version.
    ///
    /// # Arguments
    ///
    /// * `version`: backend version
    /// * `non_stop`: true if non-stop mode requested by the user
    pub fn for_version(version: Version, non_stop: bool) -> Self {
        let (non_stop_supported, multi_process) = version_switch!(version,
            (0, 0, 0) ..= (6, u32::MAX, u32::MAX) => (false, false),
            (7, 0, 0) ..= (7, 1, u32::MAX) => (true, false),
            (7, 2, 0) ..= (u32::MAX, u32::MAX, u32::MAX) => (true, true),
        )
        .unwrap_or((false, false));

        Self {
            non_stop: non_stop && non_stop_supported,
            multi_process,
        }
    }
}

/// Session tuning parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How many exited processes are remembered.
    pub exited_capacity: usize,
    /// Number of scheduling turns a command result is delayed relative to notifications.
    pub result_buffer_turns: u32,
    pub capabilities: Capabilities,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            exited_capacity: 5,
            result_buffer_turns: 2,
            capabilities: Capabilities::default(),
        }
    }
}

impl SessionConfig {
    const DEFAULT_PATH: &'static str = ".config/gdb-session/session.toml";

    /// Parse configuration from a toml document.
    pub fn from_toml(data: &str) -> anyhow::Result<Self> {
        let mut config: SessionConfig = toml::de::from_str(data)?;
        if config.exited_capacity == 0 {
            config.exited_capacity = 1;
        }
        Ok(config)
    }

    /// Load configuration from file. Return [`None`] on errors.
    /// If `path` is not set, `~/.config/gdb-session/session.toml` is used.
    pub fn from_file(path: Option<&str>) -> Option<Self> {
        let data = match path {
            None => {
                let path = home::home_dir()?;
                let path = path.join(Self::DEFAULT_PATH);
                muted_error!(read_to_string(path))?
            }
            Some(path) => match read_to_string(path) {
                Ok(data) => data,
                Err(err) => {
                    error!("Error while load session config file: {err}");
                    return None;
                }
            },
        };

        weak_error!(Self::from_toml(&data))
    }
}
