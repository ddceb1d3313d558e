//! Supervision loop tests for relay-node.
//!
//! Everything here runs against fake runtimes under a paused tokio clock,
//! so "30 seconds of backoff" costs no wall time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use common::cameras::CameraConfig;
use common::control_plane::ControlPlane;
use common::source::Endpoint;
use relay_node::codec::Codec;
use relay_node::fleet::run_fleet;
use relay_node::relay::RelayCommand;
use relay_node::supervisor::{CameraRuntime, SupervisionEnd, Supervisor, SupervisorPolicy};
use tokio_util::sync::CancellationToken;

struct FakeRuntime {
    host_up: bool,
    /// Detected codec per source url; missing entries detect as Unknown.
    codecs: HashMap<String, Codec>,
    /// How long one fake relay run takes before "exiting".
    relay_duration: Duration,
    probe_calls: AtomicU32,
    detect_calls: AtomicU32,
    relay_runs: AtomicU32,
    relayed_sources: Mutex<Vec<String>>,
}

impl FakeRuntime {
    fn new(host_up: bool, codecs: &[(&str, Codec)], relay_duration: Duration) -> Arc<Self> {
        Arc::new(Self {
            host_up,
            codecs: codecs
                .iter()
                .map(|(rtsp, codec)| (rtsp.to_string(), codec.clone()))
                .collect(),
            relay_duration,
            probe_calls: AtomicU32::new(0),
            detect_calls: AtomicU32::new(0),
            relay_runs: AtomicU32::new(0),
            relayed_sources: Mutex::new(Vec::new()),
        })
    }

    fn probes(&self) -> u32 {
        self.probe_calls.load(Ordering::SeqCst)
    }

    fn detects(&self) -> u32 {
        self.detect_calls.load(Ordering::SeqCst)
    }

    fn relays(&self) -> u32 {
        self.relay_runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CameraRuntime for FakeRuntime {
    async fn host_is_up(&self, _host: &str, _port: u16, _timeout: Duration) -> bool {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        self.host_up
    }

    async fn detect_codec(&self, rtsp: &str, _timeout: Duration) -> Codec {
        self.detect_calls.fetch_add(1, Ordering::SeqCst);
        self.codecs.get(rtsp).cloned().unwrap_or(Codec::Unknown)
    }

    async fn run_relay(&self, command: &RelayCommand) -> Result<()> {
        self.relay_runs.fetch_add(1, Ordering::SeqCst);
        if let Some(source) = command
            .args
            .iter()
            .position(|a| a == "-i")
            .and_then(|i| command.args.get(i + 1))
        {
            self.relayed_sources.lock().unwrap().push(source.clone());
        }
        tokio::time::sleep(self.relay_duration).await;
        Ok(())
    }
}

struct FakeControlPlane {
    /// None makes every stream-url request fail.
    url: Option<String>,
    stream_url_calls: AtomicU32,
}

impl FakeControlPlane {
    fn serving(url: &str) -> Arc<Self> {
        Arc::new(Self {
            url: Some(url.to_string()),
            stream_url_calls: AtomicU32::new(0),
        })
    }

    fn down() -> Arc<Self> {
        Arc::new(Self {
            url: None,
            stream_url_calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn list_cameras(&self) -> Result<Vec<CameraConfig>> {
        Ok(Vec::new())
    }

    async fn stream_url(&self, _camera_id: &str, _codec: &str) -> Result<String> {
        self.stream_url_calls.fetch_add(1, Ordering::SeqCst);
        self.url
            .clone()
            .ok_or_else(|| anyhow!("control plane unreachable"))
    }
}

fn camera(id: &str, rtsp: &str) -> CameraConfig {
    CameraConfig {
        id: id.to_string(),
        rtsp: rtsp.to_string(),
        time_limit_secs: 3600,
    }
}

fn policy() -> SupervisorPolicy {
    SupervisorPolicy {
        probe_timeout: Duration::from_secs(5),
        retry_interval: Duration::from_secs(30),
        detect_timeout: Duration::from_secs(15),
        stream_url_attempts: 3,
        stream_url_retry_delay: Duration::from_secs(2),
    }
}

fn supervisor(
    cam: CameraConfig,
    control: Arc<dyn ControlPlane>,
    runtime: Arc<dyn CameraRuntime>,
    cancel: CancellationToken,
) -> Supervisor {
    let endpoint = Endpoint::from_source_url(&cam.rtsp).unwrap();
    Supervisor::new(cam, endpoint, policy(), control, runtime, cancel)
}

const CAM_RTSP: &str = "rtsp://user:pw@10.0.0.5:554/ch0";

#[tokio::test(start_paused = true)]
async fn down_camera_retries_forever_without_detecting_codec() {
    let runtime = FakeRuntime::new(false, &[], Duration::from_secs(1));
    let control = FakeControlPlane::serving("rtmp://ingest/live/1");
    let cancel = CancellationToken::new();

    let sup = supervisor(camera("cam-1", CAM_RTSP), control, runtime.clone(), cancel.clone());
    let handle = tokio::spawn(async move { sup.run().await });

    // Ten 30-second backoff intervals.
    tokio::time::sleep(Duration::from_secs(301)).await;
    cancel.cancel();
    handle.await.unwrap().unwrap();

    let probes = runtime.probes();
    assert!((10..=12).contains(&probes), "expected ~11 probes, got {probes}");
    assert_eq!(runtime.detects(), 0, "detector must not run while the camera is down");
}

#[tokio::test(start_paused = true)]
async fn immediate_relay_exit_reenters_liveness_iteratively() {
    let runtime = FakeRuntime::new(true, &[(CAM_RTSP, Codec::H264)], Duration::from_secs(1));
    let control = FakeControlPlane::serving("rtmp://ingest/live/1");
    let cancel = CancellationToken::new();

    let sup = supervisor(camera("cam-1", CAM_RTSP), control, runtime.clone(), cancel.clone());
    let handle = tokio::spawn(async move { sup.run().await });

    tokio::time::sleep(Duration::from_secs(120)).await;
    cancel.cancel();
    handle.await.unwrap().unwrap();

    // One relay run per second of paused time; each one went back through
    // the liveness check first.
    assert!(runtime.relays() >= 50, "relay runs: {}", runtime.relays());
    assert!(runtime.probes() >= runtime.relays());
}

#[tokio::test(start_paused = true)]
async fn h264_happy_path_reprobes_after_relay_exit() {
    let runtime = FakeRuntime::new(true, &[(CAM_RTSP, Codec::H264)], Duration::from_secs(5));
    let control = FakeControlPlane::serving("rtmp://ingest/live/1");
    let cancel = CancellationToken::new();

    let sup = supervisor(camera("cam-1", CAM_RTSP), control.clone(), runtime.clone(), cancel.clone());
    let handle = tokio::spawn(async move { sup.run().await });

    // First relay runs t=0..5; the second attempt starts with a fresh probe.
    tokio::time::sleep(Duration::from_secs(7)).await;
    cancel.cancel();
    handle.await.unwrap().unwrap();

    assert_eq!(runtime.probes(), 2);
    assert_eq!(runtime.relays(), 2);
    // The ingest target is fetched per attempt, never cached.
    assert_eq!(control.stream_url_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn undetermined_codec_is_terminal_for_the_camera() {
    let runtime = FakeRuntime::new(true, &[], Duration::from_secs(1));
    let control = FakeControlPlane::serving("rtmp://ingest/live/1");
    let cancel = CancellationToken::new();

    let sup = supervisor(camera("cam-1", CAM_RTSP), control, runtime.clone(), cancel);
    let end = sup.run().await.unwrap_err();

    assert!(matches!(end, SupervisionEnd::UndeterminedCodec { .. }), "got: {end}");
    assert_eq!(runtime.detects(), 1);
    assert_eq!(runtime.relays(), 0);
}

#[tokio::test(start_paused = true)]
async fn control_plane_failure_ends_supervision_after_bounded_retries() {
    let runtime = FakeRuntime::new(true, &[(CAM_RTSP, Codec::H264)], Duration::from_secs(1));
    let control = FakeControlPlane::down();
    let cancel = CancellationToken::new();

    let sup = supervisor(camera("cam-1", CAM_RTSP), control.clone(), runtime.clone(), cancel);
    let end = sup.run().await.unwrap_err();

    assert!(matches!(end, SupervisionEnd::ControlPlane { .. }), "got: {end}");
    assert_eq!(control.stream_url_calls.load(Ordering::SeqCst), 3);
    assert_eq!(runtime.relays(), 0);
}

#[tokio::test(start_paused = true)]
async fn unsupported_codec_ends_one_camera_without_touching_siblings() {
    const VP9_RTSP: &str = "rtsp://10.0.0.9:554/ch0";
    let runtime = FakeRuntime::new(
        true,
        &[(CAM_RTSP, Codec::H264), (VP9_RTSP, Codec::Other("vp9".into()))],
        Duration::from_secs(5),
    );
    let control = FakeControlPlane::serving("rtmp://ingest/live/1");
    let cancel = CancellationToken::new();

    let cameras = vec![camera("cam-ok", CAM_RTSP), camera("cam-vp9", VP9_RTSP)];
    let fleet = tokio::spawn(run_fleet(
        cameras,
        policy(),
        control,
        runtime.clone(),
        cancel.clone(),
    ));

    tokio::time::sleep(Duration::from_secs(60)).await;
    cancel.cancel();
    fleet.await.unwrap();

    // The healthy camera kept looping after the vp9 camera's loop ended.
    assert!(runtime.relays() >= 5, "relay runs: {}", runtime.relays());
    let sources = runtime.relayed_sources.lock().unwrap();
    assert!(sources.iter().all(|s| s == CAM_RTSP), "vp9 camera must never reach the relay");
}

#[tokio::test(start_paused = true)]
async fn empty_roster_returns_immediately() {
    let runtime = FakeRuntime::new(true, &[], Duration::from_secs(1));
    let control = FakeControlPlane::serving("rtmp://ingest/live/1");

    run_fleet(Vec::new(), policy(), control, runtime.clone(), CancellationToken::new()).await;

    assert_eq!(runtime.probes(), 0);
}

#[tokio::test(start_paused = true)]
async fn unparseable_source_url_skips_only_that_camera() {
    let runtime = FakeRuntime::new(true, &[(CAM_RTSP, Codec::H264)], Duration::from_secs(5));
    let control = FakeControlPlane::serving("rtmp://ingest/live/1");
    let cancel = CancellationToken::new();

    let cameras = vec![camera("cam-bad", "not a url"), camera("cam-ok", CAM_RTSP)];
    let fleet = tokio::spawn(run_fleet(
        cameras,
        policy(),
        control,
        runtime.clone(),
        cancel.clone(),
    ));

    tokio::time::sleep(Duration::from_secs(20)).await;
    cancel.cancel();
    fleet.await.unwrap();

    assert!(runtime.relays() >= 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_interrupts_a_long_running_relay() {
    // A relay that would run for an hour of simulated time.
    let runtime = FakeRuntime::new(true, &[(CAM_RTSP, Codec::H264)], Duration::from_secs(3600));
    let control = FakeControlPlane::serving("rtmp://ingest/live/1");
    let cancel = CancellationToken::new();

    let sup = supervisor(camera("cam-1", CAM_RTSP), control, runtime.clone(), cancel.clone());
    let handle = tokio::spawn(async move { sup.run().await });

    tokio::time::sleep(Duration::from_secs(10)).await;
    cancel.cancel();
    handle.await.unwrap().unwrap();

    assert_eq!(runtime.relays(), 1);
}
