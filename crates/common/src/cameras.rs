use serde::{Deserialize, Deserializer, Serialize};

/// One entry of the control plane's camera roster.
///
/// Immutable for the lifetime of a supervisor; roster changes are only
/// picked up by restarting the fleet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CameraConfig {
    pub id: String,
    pub rtsp: String,
    /// Upper bound, in seconds, handed to one relay run. Advisory: the
    /// relay tool enforces it, the supervisor just waits.
    #[serde(rename = "time_limit", deserialize_with = "number_or_string")]
    pub time_limit_secs: u64,
}

// The control plane has emitted `time_limit` both as a JSON number and as
// quoted text; accept either.
fn number_or_string<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}
