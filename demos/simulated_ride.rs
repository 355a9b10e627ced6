use futures::stream;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;
use virtual_trainer::{CharacteristicId, Event, GattServer, Result, Trainer, TrainerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("🚴 Virtual Trainer Simulated Ride Example");

    let server = GattServer::new(Trainer::new(TrainerConfig::default()));
    info!(
        "Advertising '{}' with services {:?}",
        server.device_name(),
        server.advertised_services()
    );

    // Pretend a central subscribed to the measurement characteristics
    for id in [
        CharacteristicId::CyclingPowerMeasurement,
        CharacteristicId::IndoorBikeData,
        CharacteristicId::HeartRateMeasurement,
    ] {
        let (tx, mut rx) = mpsc::unbounded_channel();
        server.subscribe(id.uuid(), tx).await?;
        tokio::spawn(async move {
            while let Some(payload) = rx.recv().await {
                println!("{id:<28} {payload:02X?}");
            }
        });
    }

    // Ten seconds of riding, one event per second
    let ride = stream::unfold(0u32, |second| async move {
        if second == 10 {
            return None;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
        let event = Event {
            watts: Some(150 + i16::try_from(second * 5).unwrap_or(0)),
            cadence: Some(85),
            heart_rate: Some(120 + u8::try_from(second).unwrap_or(0)),
            revolutions: Some(second * 3 / 2),
            ..Default::default()
        };
        Some((event, second + 1))
    });

    server.trainer().run(Box::pin(ride)).await;

    // Telemetry goes quiet; the trainer reports a stop on its own
    info!("⏸️  Telemetry stopped, waiting for the liveness watchdog");
    tokio::time::sleep(Duration::from_secs(2)).await;

    if let Some(event) = server.trainer().last_event().await {
        info!("Last event: {event:?}");
    }

    server.trainer().shutdown().await;
    info!("✅ Ride finished");
    Ok(())
}
