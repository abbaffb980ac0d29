use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::transmit::WaitPolicy;

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(rename = "board-id")]
    pub board_id: u8,
    #[serde(default)]
    pub wait: Wait,
    /// cand gateway receiving every transmitted frame
    #[serde(default)]
    pub gateway: Option<SocketAddr>,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Wait {
    #[default]
    #[serde(rename = "forever")]
    Forever,
    #[serde(rename = "spins")]
    Spins(u32),
    #[serde(rename = "timeout-ms")]
    TimeoutMs(u64),
}

impl From<Wait> for WaitPolicy {
    fn from(wait: Wait) -> WaitPolicy {
        match wait {
            Wait::Forever => WaitPolicy::Forever,
            Wait::Spins(spins) => WaitPolicy::Spins(spins),
            Wait::TimeoutMs(ms) => WaitPolicy::Timeout(Duration::from_millis(ms)),
        }
    }
}

impl Config {
    pub fn new(board_id: u8) -> Config {
        Config {
            board_id,
            wait: Wait::default(),
            gateway: None,
        }
    }

    pub fn parse(text: &str) -> crate::Result<Config> {
        Ok(toml::from_str(text)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> crate::Result<Config> {
        let text = std::fs::read_to_string(path)?;
        let config = Config::parse(&text)?;
        log::debug!("Loaded config: {:?}", config);
        Ok(config)
    }
}
