use std::fmt;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::warn;

/// Codec family reported by the probe tool, normalized to the relay
/// dispatch key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Codec {
  /// Long-lived copy family.
  H264,
  /// Segmented-playlist family.
  Hevc,
  /// Recognized probe output with no relay mapping.
  Other(String),
  /// The probe produced nothing usable.
  Unknown,
}

impl Codec {
  pub fn from_probe_output(raw: &str) -> Self {
    match raw.trim() {
      "" => Codec::Unknown,
      "h264" => Codec::H264,
      "hevc" | "h265" => Codec::Hevc,
      other => Codec::Other(other.to_string()),
    }
  }

  /// Tag sent to the control plane and printed in logs.
  pub fn as_str(&self) -> &str {
    match self {
      Codec::H264 => "h264",
      Codec::Hevc => "hevc",
      Codec::Other(tag) => tag,
      Codec::Unknown => "unknown",
    }
  }
}

impl fmt::Display for Codec {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Asks ffprobe for the first video stream's codec name.
///
/// Launch failure, non-zero exit, empty output and timeout all collapse to
/// `Codec::Unknown`; retrying is the supervisor's call, not ours.
pub async fn detect(rtsp: &str, limit: Duration) -> Codec {
  let probe = Command::new("ffprobe")
    .args([
      "-v", "error",
      "-select_streams", "v:0",
      "-show_entries", "stream=codec_name",
      "-of", "default=nw=1:nk=1",
      rtsp,
    ])
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::null())
    .kill_on_drop(true)
    .output();

  let output = match tokio::time::timeout(limit, probe).await {
    Ok(Ok(output)) => output,
    Ok(Err(e)) => {
      warn!(%rtsp, "ffprobe failed to run: {e}");
      return Codec::Unknown;
    }
    Err(_) => {
      warn!(%rtsp, timeout = ?limit, "ffprobe timed out");
      return Codec::Unknown;
    }
  };

  if !output.status.success() {
    warn!(%rtsp, status = ?output.status, "ffprobe exited non-zero");
    return Codec::Unknown;
  }

  match String::from_utf8(output.stdout) {
    Ok(stdout) => Codec::from_probe_output(&stdout),
    Err(_) => Codec::Unknown,
  }
}
