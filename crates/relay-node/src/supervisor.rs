use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use common::cameras::CameraConfig;
use common::control_plane::ControlPlane;
use common::source::Endpoint;
use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::codec::{self, Codec};
use crate::relay::{build_relay_command, RelayCommand};

/// Terminal conditions for one camera's supervision. An unreachable host
/// and a relay exit are not terminal and never appear here; they loop.
#[derive(Debug, Error)]
pub enum SupervisionEnd {
  #[error("could not determine codec for {rtsp}")]
  UndeterminedCodec { rtsp: String },
  #[error("unsupported codec '{codec}' for {rtsp}")]
  UnsupportedCodec { codec: String, rtsp: String },
  #[error("control plane request failed for camera {camera_id}: {source:#}")]
  ControlPlane {
    camera_id: String,
    #[source]
    source: anyhow::Error,
  },
}

/// Timing and retry knobs for the supervision loop.
#[derive(Clone, Debug)]
pub struct SupervisorPolicy {
  /// Liveness probe connect timeout.
  pub probe_timeout: Duration,
  /// Fixed wait between liveness re-checks while the camera is down.
  /// Unbounded retries, no jitter.
  pub retry_interval: Duration,
  /// Upper bound on one ffprobe run.
  pub detect_timeout: Duration,
  /// Attempts for one ingest-URL fetch before supervision ends.
  pub stream_url_attempts: u32,
  /// Wait between ingest-URL attempts.
  pub stream_url_retry_delay: Duration,
}

impl Default for SupervisorPolicy {
  fn default() -> Self {
    Self {
      probe_timeout: Duration::from_secs(env_u64("PROBE_TIMEOUT_SECS", 5)),
      retry_interval: Duration::from_secs(env_u64("RETRY_INTERVAL_SECS", 30)),
      detect_timeout: Duration::from_secs(env_u64("CODEC_DETECT_TIMEOUT_SECS", 15)),
      stream_url_attempts: env_u32("STREAM_URL_ATTEMPTS", 3),
      stream_url_retry_delay: Duration::from_secs(env_u64("STREAM_URL_RETRY_SECS", 2)),
    }
  }
}

fn env_u32(key: &str, def: u32) -> u32 { std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(def) }
fn env_u64(key: &str, def: u64) -> u64 { std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(def) }

/// Side-effecting operations the supervisor drives, behind a trait so the
/// loop can run against fakes under a paused clock.
#[async_trait]
pub trait CameraRuntime: Send + Sync {
  async fn host_is_up(&self, host: &str, port: u16, timeout: Duration) -> bool;

  async fn detect_codec(&self, rtsp: &str, timeout: Duration) -> Codec;

  /// Spawns the relay and waits for it to exit. An error means the spawn
  /// itself failed; the relay's own exit status is deliberately ignored.
  /// Dropping the returned future must kill the relay process.
  async fn run_relay(&self, command: &RelayCommand) -> Result<()>;
}

/// Production runtime: real sockets and real subprocesses.
pub struct ProcessRuntime;

#[async_trait]
impl CameraRuntime for ProcessRuntime {
  async fn host_is_up(&self, host: &str, port: u16, timeout: Duration) -> bool {
    crate::probe::host_is_up(host, port, timeout).await
  }

  async fn detect_codec(&self, rtsp: &str, timeout: Duration) -> Codec {
    codec::detect(rtsp, timeout).await
  }

  async fn run_relay(&self, command: &RelayCommand) -> Result<()> {
    let mut child = Command::new(&command.program)
      .args(&command.args)
      .stdin(Stdio::null())
      .stdout(Stdio::null())
      .stderr(Stdio::null())
      .kill_on_drop(true)
      .spawn()
      .with_context(|| format!("spawning {}", command.program))?;
    child.wait().await.context("waiting for relay process")?;
    Ok(())
  }
}

/// Per-camera supervision loop.
///
/// Iterative cycle: check liveness, detect codec, fetch an ingest URL,
/// run the relay until it exits, start over. A down camera waits the
/// fixed retry interval; a relay exit goes straight back to the liveness
/// check, which supplies the wait if the camera actually died. The only
/// terminal outcomes are shutdown (`Ok`) and a `SupervisionEnd`.
pub struct Supervisor {
  camera: CameraConfig,
  endpoint: Endpoint,
  policy: SupervisorPolicy,
  control: Arc<dyn ControlPlane>,
  runtime: Arc<dyn CameraRuntime>,
  cancel: CancellationToken,
}

impl Supervisor {
  pub fn new(
    camera: CameraConfig,
    endpoint: Endpoint,
    policy: SupervisorPolicy,
    control: Arc<dyn ControlPlane>,
    runtime: Arc<dyn CameraRuntime>,
    cancel: CancellationToken,
  ) -> Self {
    Self { camera, endpoint, policy, control, runtime, cancel }
  }

  pub fn camera_id(&self) -> &str {
    &self.camera.id
  }

  pub async fn run(&self) -> Result<(), SupervisionEnd> {
    loop {
      if self.cancel.is_cancelled() {
        return Ok(());
      }

      let up = self
        .runtime
        .host_is_up(&self.endpoint.host, self.endpoint.port, self.policy.probe_timeout)
        .await;
      if !up {
        warn!(
          camera = %self.camera.id,
          endpoint = %self.endpoint,
          retry_in = ?self.policy.retry_interval,
          "camera is down, will re-check"
        );
        if self.sleep_or_cancel(self.policy.retry_interval).await {
          return Ok(());
        }
        continue;
      }

      let detected = self
        .runtime
        .detect_codec(&self.camera.rtsp, self.policy.detect_timeout)
        .await;
      if detected == Codec::Unknown {
        return Err(SupervisionEnd::UndeterminedCodec { rtsp: self.camera.rtsp.clone() });
      }

      let ingest_url = match self.fetch_stream_url(&detected).await {
        Ok(url) => url,
        Err(e) => {
          if self.cancel.is_cancelled() {
            return Ok(());
          }
          return Err(SupervisionEnd::ControlPlane {
            camera_id: self.camera.id.clone(),
            source: e,
          });
        }
      };

      let command = build_relay_command(
        &detected,
        &self.camera.rtsp,
        &ingest_url,
        Duration::from_secs(self.camera.time_limit_secs),
      )
      .map_err(|unsupported| SupervisionEnd::UnsupportedCodec {
        codec: unsupported.0,
        rtsp: self.camera.rtsp.clone(),
      })?;

      info!(camera = %self.camera.id, codec = %detected, %ingest_url, "starting relay");
      tokio::select! {
        _ = self.cancel.cancelled() => {
          // Dropping the relay future kills the child.
          info!(camera = %self.camera.id, "shutdown requested, stopping relay");
          return Ok(());
        }
        result = self.runtime.run_relay(&command) => match result {
          Ok(()) => info!(camera = %self.camera.id, "relay exited, re-checking liveness"),
          Err(e) => warn!(camera = %self.camera.id, "relay did not start: {e:#}"),
        }
      }
      // No delay here: the liveness check supplies the wait when the
      // camera is actually down.
    }
  }

  /// Bounded retry around the per-attempt ingest URL. Destinations may be
  /// reassigned between attempts, so the result is never cached.
  async fn fetch_stream_url(&self, detected: &Codec) -> Result<String> {
    let mut last_err = None;
    for attempt in 1..=self.policy.stream_url_attempts.max(1) {
      match self.control.stream_url(&self.camera.id, detected.as_str()).await {
        Ok(url) => return Ok(url),
        Err(e) => {
          warn!(camera = %self.camera.id, attempt, "stream url request failed: {e:#}");
          last_err = Some(e);
        }
      }
      if attempt < self.policy.stream_url_attempts
        && self.sleep_or_cancel(self.policy.stream_url_retry_delay).await
      {
        break;
      }
    }
    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("no stream url attempts made")))
  }

  /// Returns true if shutdown was requested while sleeping.
  async fn sleep_or_cancel(&self, interval: Duration) -> bool {
    tokio::select! {
      _ = self.cancel.cancelled() => true,
      _ = tokio::time::sleep(interval) => false,
    }
  }
}
