use anyhow::{Context, Result};
use fleetwatch_controlplane::{Config, ControlPlane};
use fleetwatch_shared_observability::init_tracing;

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing("fleetwatch_controlplane");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(async {
        let control_plane = ControlPlane::bootstrap(Config::from_env());
        control_plane.run().await;
    });

    Ok(())
}
