use tokio::sync::mpsc;
use tracing::{info, warn};
use virtual_trainer::{
    CharacteristicId, GattServer, Result, Trainer, TrainerConfig, WriteOutcome,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("🎛️  Virtual Trainer Control Session Example");

    let server = GattServer::new(Trainer::new(TrainerConfig::default()));
    let control_point = CharacteristicId::FitnessMachineControlPoint.uuid();

    let (tx, mut indications) = mpsc::unbounded_channel();
    server.subscribe(control_point, tx).await?;
    let (tx, mut status) = mpsc::unbounded_channel();
    server
        .subscribe(CharacteristicId::FitnessMachineStatus.uuid(), tx)
        .await?;

    // A central running a structured workout
    let writes: [(&str, &[u8]); 6] = [
        ("Set target power before control", &[0x05, 0xC8, 0x00]),
        ("Request control", &[0x00]),
        ("Start", &[0x07]),
        ("Target power 200 W", &[0x05, 0xC8, 0x00]),
        ("Simulation, 4.5 % grade", &[0x11, 0x00, 0x00, 0xC2, 0x01, 0x28, 0x33]),
        ("Reset", &[0x01]),
    ];

    for (label, data) in writes {
        info!("➡️  {label}: {data:02X?}");
        match server.write(control_point, data).await? {
            WriteOutcome::ControlPoint(Some(response)) => {
                info!("   result {:?}", response.result);
            }
            other => warn!("   unexpected outcome {other:?}"),
        }

        while let Ok(indication) = indications.try_recv() {
            println!("   control point <- {indication:02X?}");
        }
        while let Ok(notification) = status.try_recv() {
            println!("   status        <- {notification:02X?}");
        }
    }

    // The training application drains its command queue
    loop {
        let record = server.trainer().next_command_record().await;
        let json = serde_json::to_string(&record).unwrap_or_default();
        println!("📥 {json}");
        if record.is_empty() {
            break;
        }
    }

    info!(
        "Session state: {}",
        server.trainer().control_session().await.state()
    );
    Ok(())
}
