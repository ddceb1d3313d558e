use std::sync::Arc;

use common::cameras::CameraConfig;
use common::control_plane::ControlPlane;
use common::source::Endpoint;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::supervisor::{CameraRuntime, Supervisor, SupervisorPolicy};

/// Starts one supervisor task per camera and joins them all.
///
/// Each supervisor is its own error boundary: a camera whose loop ends,
/// or whose task panics, is logged and never takes a sibling down. The
/// cancellation token stops every loop at its next checkpoint.
pub async fn run_fleet(
  cameras: Vec<CameraConfig>,
  policy: SupervisorPolicy,
  control: Arc<dyn ControlPlane>,
  runtime: Arc<dyn CameraRuntime>,
  cancel: CancellationToken,
) {
  if cameras.is_empty() {
    warn!("no cameras configured, nothing to supervise");
    return;
  }

  let mut tasks = JoinSet::new();
  for camera in cameras {
    let endpoint = match Endpoint::from_source_url(&camera.rtsp) {
      Ok(endpoint) => endpoint,
      Err(e) => {
        error!(camera = %camera.id, "unusable source url, skipping camera: {e:#}");
        continue;
      }
    };

    info!(camera = %camera.id, %endpoint, "starting supervisor");
    let supervisor = Supervisor::new(
      camera,
      endpoint,
      policy.clone(),
      Arc::clone(&control),
      Arc::clone(&runtime),
      cancel.child_token(),
    );
    tasks.spawn(async move {
      let id = supervisor.camera_id().to_string();
      (id, supervisor.run().await)
    });
  }

  while let Some(joined) = tasks.join_next().await {
    match joined {
      Ok((id, Ok(()))) => info!(camera = %id, "supervisor stopped"),
      Ok((id, Err(end))) => warn!(camera = %id, error = %end, "supervision ended for camera"),
      Err(e) => error!("supervisor task panicked: {e}"),
    }
  }
}
