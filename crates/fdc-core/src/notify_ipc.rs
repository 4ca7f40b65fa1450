use crate::SystemCondition;
use serde::de::{self, DeserializeOwned, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024;
pub const CURRENT_NOTIFY_VERSION: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NotifyVersion(pub u16);

impl NotifyVersion {
    pub const CURRENT: Self = Self(CURRENT_NOTIFY_VERSION);
}

impl Default for NotifyVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl Serialize for NotifyVersion {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for NotifyVersion {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct NotifyVersionVisitor;

        impl<'de> Visitor<'de> for NotifyVersionVisitor {
            type Value = NotifyVersion;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a notify version as string or integer")
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                let version = u16::try_from(value)
                    .map_err(|_| E::custom(format!("notify version out of range: {value}")))?;
                Ok(NotifyVersion(version))
            }

            fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                if value < 0 {
                    return Err(E::custom(format!(
                        "notify version cannot be negative: {value}"
                    )));
                }
                self.visit_u64(value as u64)
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                let cleaned = value.trim().trim_start_matches('v');
                let version = cleaned
                    .parse::<u16>()
                    .map_err(|err| E::custom(format!("invalid notify version '{value}': {err}")))?;
                Ok(NotifyVersion(version))
            }

            fn visit_string<E>(self, value: String) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                self.visit_str(&value)
            }
        }

        deserializer.deserialize_any(NotifyVersionVisitor)
    }
}

/// Server-initiated message on the push channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PushEnvelope {
    #[serde(default)]
    pub version: NotifyVersion,
    pub device_id: String,
    pub timestamp: String,
    #[serde(flatten)]
    pub msg: PushMsg,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum PushMsg {
    StateChanged(StateChangedPayload),
    JobProgress(JobProgressPayload),
    LogEvent(LogEventPayload),
    Heartbeat(HeartbeatPayload),
}

impl PushMsg {
    pub fn is_heartbeat(&self) -> bool {
        matches!(self, PushMsg::Heartbeat(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateChangedPayload {
    pub condition: SystemCondition,
    #[serde(default)]
    pub previous: Option<SystemCondition>,
    #[serde(default)]
    pub job_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobProgressPayload {
    pub job_name: String,
    #[serde(default)]
    pub point_count: Option<u64>,
    #[serde(default)]
    pub scan_count: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogEventPayload {
    pub level: String,
    pub message: String,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeartbeatPayload {
    pub uptime_secs: u64,
    #[serde(default)]
    pub sent_at_ms: Option<i64>,
}

/// First frame the console sends after the socket opens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscribeRequest {
    #[serde(default)]
    pub version: NotifyVersion,
    pub client_id: String,
    #[serde(default)]
    pub topics: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },
    #[error("frame encode failed: {0}")]
    Encode(String),
    #[error("frame decode failed: {0}")]
    Decode(String),
}

pub fn encode_frame<T: Serialize>(
    value: &T,
    max_frame_bytes: usize,
) -> Result<Vec<u8>, FrameError> {
    let encoded = serde_json::to_vec(value).map_err(|err| FrameError::Encode(err.to_string()))?;
    if encoded.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: encoded.len(),
            max: max_frame_bytes,
        });
    }
    Ok(encoded)
}

pub fn decode_frame<T: DeserializeOwned>(
    bytes: &[u8],
    max_frame_bytes: usize,
) -> Result<T, FrameError> {
    let mut raw = bytes;
    if raw.ends_with(b"\n") {
        raw = &raw[..raw.len() - 1];
    }
    if raw.ends_with(b"\r") {
        raw = &raw[..raw.len() - 1];
    }
    if raw.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: raw.len(),
            max: max_frame_bytes,
        });
    }
    serde_json::from_slice(raw).map_err(|err| FrameError::Decode(err.to_string()))
}
