use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

pub mod notify_ipc;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SessionState {
    #[serde(default)]
    pub is_logged_in: bool,
    #[serde(default)]
    pub is_authenticating: bool,
}

/// Coarse operational mode reported by the device.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SystemCondition {
    Idle,
    Initializing,
    Aligning,
    Activated,
    Recording,
    Fault,
}

impl Default for SystemCondition {
    fn default() -> Self {
        Self::Idle
    }
}

impl SystemCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemCondition::Idle => "idle",
            SystemCondition::Initializing => "initializing",
            SystemCondition::Aligning => "aligning",
            SystemCondition::Activated => "activated",
            SystemCondition::Recording => "recording",
            SystemCondition::Fault => "fault",
        }
    }

    /// True while the device is capturing data for a job, i.e. the modes
    /// in which job metadata changes underneath the console.
    pub fn is_capturing(&self) -> bool {
        matches!(self, SystemCondition::Recording | SystemCondition::Activated)
    }
}

impl fmt::Display for SystemCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SystemCondition {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "idle" => Ok(SystemCondition::Idle),
            "initializing" => Ok(SystemCondition::Initializing),
            "aligning" => Ok(SystemCondition::Aligning),
            "activated" => Ok(SystemCondition::Activated),
            "recording" => Ok(SystemCondition::Recording),
            "fault" => Ok(SystemCondition::Fault),
            other => Err(format!("Unknown condition: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct JobRef {
    pub name: String,
}

impl JobRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RtkFixQuality {
    None,
    Float,
    Fixed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RtkStatus {
    pub fix_quality: RtkFixQuality,
    #[serde(default)]
    pub satellites: Option<u8>,
    #[serde(default)]
    pub hrms_m: Option<f64>,
}

/// Snapshot returned by the device's state query. Firmware revisions add
/// fields freely; anything this console does not model lands in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemState {
    pub condition: SystemCondition,
    #[serde(default)]
    pub active_job: Option<JobRef>,
    #[serde(default)]
    pub rtk: Option<RtkStatus>,
    #[serde(default)]
    pub battery_percent: Option<u8>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobDetail {
    pub name: String,
    #[serde(default)]
    pub point_count: Option<u64>,
    #[serde(default)]
    pub scan_count: Option<u32>,
    #[serde(default)]
    pub size_bytes: Option<u64>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, flatten)]
    pub extra: HashMap<String, Value>,
}
