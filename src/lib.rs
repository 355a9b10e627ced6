#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

//! # Virtual Trainer
//!
//! The core of a software-emulated Bluetooth Low Energy smart trainer.
//!
//! A training application pushes telemetry (power, cadence, heart rate, crank
//! revolutions, steering angle) into a [`Trainer`]. The trainer republishes it on the
//! standard Cycling Power, Fitness Machine and Heart Rate characteristics, runs the
//! Fitness Machine Control Point on behalf of whichever central holds control, and
//! answers the challenge handshake of a proprietary steering accessory. Commands
//! accepted on the control point are queued for the application to poll.
//!
//! The BLE radio itself is not part of this crate. A transport drives a
//! [`GattServer`], which exposes the GATT table and maps attribute reads, writes and
//! subscriptions onto the trainer.
//!
//! ## Liveness
//!
//! If no telemetry arrives for 1.5 s (configurable through [`TrainerConfig`]) the
//! trainer synthesizes a single stop event, so connected centrals see power, cadence
//! and heart rate fall to zero instead of freezing on the last value.
//!
//! ## Quick Start
//!
//! ```no_run
//! use virtual_trainer::{CharacteristicId, Event, GattServer, Trainer, TrainerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = GattServer::new(Trainer::new(TrainerConfig::default()));
//!
//!     // A central subscribes to the control point and takes control
//!     let (tx, mut indications) = tokio::sync::mpsc::unbounded_channel();
//!     let control_point = CharacteristicId::FitnessMachineControlPoint.uuid();
//!     server.subscribe(control_point, tx).await?;
//!     server.write(control_point, &[0x00]).await?;
//!     println!("Response: {:02X?}", indications.recv().await);
//!
//!     // The training application feeds telemetry
//!     server
//!         .trainer()
//!         .update(Event {
//!             watts: Some(210),
//!             cadence: Some(90),
//!             ..Default::default()
//!         })
//!         .await;
//!
//!     // ... and picks up commands
//!     let record = server.trainer().next_command_record().await;
//!     println!("Command: {}", serde_json::to_string(&record)?);
//!
//!     Ok(())
//! }
//! ```

/// Control-point state machine
pub mod control;
/// Error types and handling
pub mod error;
/// GATT table and transport adapter
pub mod gatt;
/// Characteristic payload encoding and control-point decoding
pub mod protocol;
/// Shared trainer session and liveness watchdog
pub mod session;
/// Steering accessory handshake
pub mod steering;
/// Type definitions and data structures
pub mod types;

// Re-export the main types for convenient usage
pub use error::{Result, TrainerError};
pub use gatt::{CharacteristicId, GattServer, ServiceId, WriteOutcome};
pub use protocol::{ControlRequest, ControlResponse, MachineStatus, OpCode, ResultCode};
pub use session::{Subscriber, Trainer};
pub use types::{
    Command, CommandRecord, ControlPolicy, ControlSession, ControlState, Event,
    SimulationParameters, TrainerConfig,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
