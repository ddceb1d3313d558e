use std::sync::Arc;

use anyhow::{Context, Result};
use common::control_plane::{ControlPlane, ControlPlaneClient};
use tokio_util::sync::CancellationToken;
use tracing::info;

use relay_node::config::Config;
use relay_node::fleet;
use relay_node::supervisor::{ProcessRuntime, SupervisorPolicy};

#[tokio::main]
async fn main() -> Result<()> {
  let log_config = telemetry::LogConfig::new("relay-node")
    .with_version(env!("CARGO_PKG_VERSION"));
  let _log_guard = telemetry::init_structured_logging(log_config);

  let config = Config::from_env()?;
  let control: Arc<dyn ControlPlane> =
    Arc::new(ControlPlaneClient::new(&config.base_uri, &config.bearer)?);

  let cameras = control
    .list_cameras()
    .await
    .context("fetching camera roster")?;
  info!(count = cameras.len(), "fetched camera roster");

  let cancel = CancellationToken::new();
  tokio::spawn(shutdown_signal(cancel.clone()));

  fleet::run_fleet(
    cameras,
    SupervisorPolicy::default(),
    control,
    Arc::new(ProcessRuntime),
    cancel,
  )
  .await;

  info!("all supervisors stopped, exiting");
  Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
  let ctrl_c = async {
    if let Err(e) = tokio::signal::ctrl_c().await {
      tracing::error!("failed to listen for ctrl-c: {e}");
      std::future::pending::<()>().await;
    }
  };

  #[cfg(unix)]
  let terminate = async {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
      Ok(mut sigterm) => {
        sigterm.recv().await;
      }
      Err(e) => {
        tracing::error!("failed to listen for SIGTERM: {e}");
        std::future::pending::<()>().await;
      }
    }
  };
  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
    _ = ctrl_c => {}
    _ = terminate => {}
  }

  tracing::info!("shutdown signal received, stopping supervisors");
  cancel.cancel();
}
