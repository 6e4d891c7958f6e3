use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::time::sleep;
use tracing::{info, warn};

use beamflow_core::config::Config;
use beamflow_core::types::Value;
use beamflow_core::utils::spawn_and_log;
use beamflow_devices::devices::{
    MoveFault, SimulatedAttenuator, SimulatedDetectorDistance, SimulatedEnergy, SimulatedShutter,
};
use beamflow_devices::{BeamlineRegistry, Role};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Optional config file as first argument, BEAMFLOW__* variables on top
    let path = std::env::args().nth(1);
    let config = Config::load(path.as_deref()).context("Failed to load configuration")?;
    beamflow_core::init_with_config(&config)?;
    beamflow_devices::init()?;

    info!("Effective configuration:\n{}", config.to_toml_string()?);

    let (registry, bus) = BeamlineRegistry::with_bus(config);

    // Wire the simulated controllers
    let energy = Arc::new(SimulatedEnergy::new(12.7).with_settle_time(Duration::from_millis(200)));
    let attenuator = Arc::new(SimulatedAttenuator::new(100.0));
    let detector = Arc::new(SimulatedDetectorDistance::new(2.1));
    let shutter = Arc::new(SimulatedShutter::new(false));

    registry.attach_energy(energy.clone())?;
    registry.attach_transmission(attenuator.clone())?;
    registry.attach_resolution(detector.clone())?;
    registry.attach_fast_shutter(shutter.clone())?;

    // Resolving installs the bridges; subscribe to every attribute
    for role in Role::ALL {
        let adapter = registry.attribute(role)?;
        let mut rx = bus.subscribe(adapter.namespace())?;
        let namespace = adapter.namespace().to_string();

        spawn_and_log(&format!("listener {}", namespace), async move {
            while let Ok(notification) = rx.recv().await {
                info!(
                    namespace = %namespace,
                    value = %notification.value,
                    state = %notification.state,
                    message = %notification.message,
                    "Attribute changed"
                );
            }
            Ok::<(), anyhow::Error>(())
        });
    }

    let snapshot = registry.snapshot().await;
    info!("Initial snapshot:\n{}", serde_json::to_string_pretty(&snapshot)?);

    let energy_attr = registry.resolve_attribute("Energy")?;
    let value = energy_attr.set(Value::from(9.5)).await?;
    info!(%value, "Energy moved");

    registry
        .resolve_attribute("transmission")?
        .set(Value::from("25.5"))
        .await?;

    registry.resolve_attribute("resolution")?.set(Value::from(1.8)).await?;

    let shutter_attr = registry.resolve_attribute("fast_shutter")?;
    let value = shutter_attr.set(Value::Null).await?;
    info!(%value, "Fast shutter toggled");

    // Someone else moves the detector
    detector.emit_external(2.4);

    // An interrupted move surfaces as an error and leaves the attribute aborted
    energy.faults().fail_next_move(MoveFault::Interrupt);
    if let Err(e) = energy_attr.set(Value::from(11.0)).await {
        warn!(error = %e, state = %energy_attr.state().await, "Energy move failed");
    }

    // Out-of-range requests never reach the controller
    if let Err(e) = registry.resolve_attribute("transmission")?.set(Value::from(5000)).await {
        warn!(error = %e, "Request refused");
    }

    sleep(Duration::from_millis(100)).await;

    let snapshot = registry.snapshot().await;
    info!("Final snapshot:\n{}", serde_json::to_string_pretty(&snapshot)?);
    info!(
        energy_moves = energy.move_count(),
        attenuator_moves = attenuator.move_count(),
        shutter_moves = shutter.move_count(),
        "Done"
    );

    Ok(())
}
