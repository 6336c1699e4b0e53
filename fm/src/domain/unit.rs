//! Systemd unit vocabulary
//!
//! `UnitAction` is what an operator can ask the process manager to do;
//! `UnitStatus` is what a status query reports back.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Control action applied to a shard's unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitAction {
    Start,
    Stop,
    Restart,
    Enable,
    Disable,
}

impl UnitAction {
    /// All actions, in the order the global panel lists them
    pub const ALL: [UnitAction; 5] = [Self::Start, Self::Stop, Self::Enable, Self::Disable, Self::Restart];

    /// The systemctl verb for this action
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
            Self::Enable => "enable",
            Self::Disable => "disable",
        }
    }
}

impl fmt::Display for UnitAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.verb())
    }
}

impl FromStr for UnitAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "restart" => Ok(Self::Restart),
            "enable" => Ok(Self::Enable),
            "disable" => Ok(Self::Disable),
            other => Err(format!("unknown action '{}'", other)),
        }
    }
}

/// Result of a process-manager status query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UnitStatus {
    pub running: bool,
    pub enabled: bool,
}
