//! GATT table of the emulated trainer and the adapter surface a BLE stack drives.
//!
//! The radio side lives outside this crate. A transport maps its attribute callbacks
//! onto [`GattServer`]: reads of static characteristics, writes on the control point
//! and steering Rx, and subscriptions that hand over a channel for notifications and
//! indications.

use bytes::Bytes;
use std::fmt;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    error::{Result, TrainerError},
    protocol::{
        cycling_power_feature, fitness_machine_feature, sensor_location, supported_power_range,
        ControlResponse,
    },
    session::{Subscriber, Trainer},
};

const fn sig_uuid(short: u16) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | 0x0000_0000_0000_1000_8000_0080_5f9b_34fb)
}

const fn steering_uuid(short: u16) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | 0x347b_0000_7635_408b_8918_8ff3_949c_e592)
}

/// Cycling Power service
pub const CYCLING_POWER_SERVICE_UUID: Uuid = sig_uuid(0x1818);
/// Fitness Machine service
pub const FITNESS_MACHINE_SERVICE_UUID: Uuid = sig_uuid(0x1826);
/// Heart Rate service
pub const HEART_RATE_SERVICE_UUID: Uuid = sig_uuid(0x180D);
/// Proprietary steering service
pub const STEERING_SERVICE_UUID: Uuid = steering_uuid(0x0001);

/// Characteristic User Description descriptor
pub const USER_DESCRIPTION_UUID: Uuid = sig_uuid(0x2901);
/// Client Characteristic Configuration descriptor
pub const CLIENT_CONFIGURATION_UUID: Uuid = sig_uuid(0x2902);
/// Server Characteristic Configuration descriptor
pub const SERVER_CONFIGURATION_UUID: Uuid = sig_uuid(0x2903);

/// Value returned by the vendor-opaque readable steering characteristics
pub const VENDOR_READ_VALUE: u8 = 0xFF;

/// Characteristic properties as the ATT property bit field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Properties(u8);

impl Properties {
    /// Readable
    pub const READ: Self = Self(0x02);
    /// Writable with response
    pub const WRITE: Self = Self(0x08);
    /// Notifies
    pub const NOTIFY: Self = Self(0x10);
    /// Indicates
    pub const INDICATE: Self = Self(0x20);

    /// Both sets of properties
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Whether every property of `other` is present
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether a central can subscribe
    #[must_use]
    pub const fn is_subscribable(self) -> bool {
        self.contains(Self::NOTIFY) || self.contains(Self::INDICATE)
    }

    /// Raw property bits
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }
}

/// Services exposed by the trainer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceId {
    /// Cycling Power (0x1818)
    CyclingPower,
    /// Fitness Machine (0x1826)
    FitnessMachine,
    /// Heart Rate (0x180D)
    HeartRate,
    /// Proprietary steering accessory
    Steering,
}

impl ServiceId {
    /// Every service, in table order
    pub const ALL: [Self; 4] = [
        Self::CyclingPower,
        Self::FitnessMachine,
        Self::HeartRate,
        Self::Steering,
    ];

    /// Service UUID
    #[must_use]
    pub const fn uuid(self) -> Uuid {
        match self {
            Self::CyclingPower => CYCLING_POWER_SERVICE_UUID,
            Self::FitnessMachine => FITNESS_MACHINE_SERVICE_UUID,
            Self::HeartRate => HEART_RATE_SERVICE_UUID,
            Self::Steering => STEERING_SERVICE_UUID,
        }
    }

    /// Characteristics of this service
    #[must_use]
    pub fn characteristics(self) -> Vec<CharacteristicId> {
        CharacteristicId::ALL
            .into_iter()
            .filter(|id| id.service() == self)
            .collect()
    }
}

/// Every characteristic in the trainer's GATT table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CharacteristicId {
    /// Cycling Power Measurement (0x2A63), notify
    CyclingPowerMeasurement,
    /// Cycling Power Feature (0x2A65), read
    CyclingPowerFeature,
    /// Sensor Location (0x2A5D), read
    SensorLocation,
    /// Fitness Machine Feature (0x2ACC), read
    FitnessMachineFeature,
    /// Indoor Bike Data (0x2AD2), notify
    IndoorBikeData,
    /// Fitness Machine Control Point (0x2AD9), write and indicate
    FitnessMachineControlPoint,
    /// Fitness Machine Status (0x2ADA), notify
    FitnessMachineStatus,
    /// Supported Power Range (0x2AD8), read
    SupportedPowerRange,
    /// Heart Rate Measurement (0x2A37), notify
    HeartRateMeasurement,
    /// Steering angle, notify
    SteeringAngle,
    /// Steering handshake commands from the central, write
    SteeringRx,
    /// Steering handshake answers to the central, indicate
    SteeringTx,
    /// Vendor characteristic 0x0012, writes are ignored
    SteeringVendorWrite,
    /// Vendor characteristic 0x0013, reads `FF`
    SteeringVendorRead,
    /// Vendor characteristic 0x0014, notify, never emits
    SteeringVendorNotify,
    /// Vendor characteristic 0x0019, reads `FF`
    SteeringVendorStatus,
}

impl CharacteristicId {
    /// Every characteristic, in table order
    pub const ALL: [Self; 16] = [
        Self::CyclingPowerMeasurement,
        Self::CyclingPowerFeature,
        Self::SensorLocation,
        Self::FitnessMachineFeature,
        Self::IndoorBikeData,
        Self::FitnessMachineControlPoint,
        Self::FitnessMachineStatus,
        Self::SupportedPowerRange,
        Self::HeartRateMeasurement,
        Self::SteeringAngle,
        Self::SteeringRx,
        Self::SteeringTx,
        Self::SteeringVendorWrite,
        Self::SteeringVendorRead,
        Self::SteeringVendorNotify,
        Self::SteeringVendorStatus,
    ];

    /// Characteristic UUID
    #[must_use]
    pub const fn uuid(self) -> Uuid {
        match self {
            Self::CyclingPowerMeasurement => sig_uuid(0x2A63),
            Self::CyclingPowerFeature => sig_uuid(0x2A65),
            Self::SensorLocation => sig_uuid(0x2A5D),
            Self::FitnessMachineFeature => sig_uuid(0x2ACC),
            Self::IndoorBikeData => sig_uuid(0x2AD2),
            Self::FitnessMachineControlPoint => sig_uuid(0x2AD9),
            Self::FitnessMachineStatus => sig_uuid(0x2ADA),
            Self::SupportedPowerRange => sig_uuid(0x2AD8),
            Self::HeartRateMeasurement => sig_uuid(0x2A37),
            Self::SteeringAngle => steering_uuid(0x0030),
            Self::SteeringRx => steering_uuid(0x0031),
            Self::SteeringTx => steering_uuid(0x0032),
            Self::SteeringVendorWrite => steering_uuid(0x0012),
            Self::SteeringVendorRead => steering_uuid(0x0013),
            Self::SteeringVendorNotify => steering_uuid(0x0014),
            Self::SteeringVendorStatus => steering_uuid(0x0019),
        }
    }

    /// Look a characteristic up by UUID
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Option<Self> {
        Self::ALL.into_iter().find(|id| id.uuid() == uuid)
    }

    /// Owning service
    #[must_use]
    pub const fn service(self) -> ServiceId {
        match self {
            Self::CyclingPowerMeasurement | Self::CyclingPowerFeature | Self::SensorLocation => {
                ServiceId::CyclingPower
            }
            Self::FitnessMachineFeature
            | Self::IndoorBikeData
            | Self::FitnessMachineControlPoint
            | Self::FitnessMachineStatus
            | Self::SupportedPowerRange => ServiceId::FitnessMachine,
            Self::HeartRateMeasurement => ServiceId::HeartRate,
            Self::SteeringAngle
            | Self::SteeringRx
            | Self::SteeringTx
            | Self::SteeringVendorWrite
            | Self::SteeringVendorRead
            | Self::SteeringVendorNotify
            | Self::SteeringVendorStatus => ServiceId::Steering,
        }
    }

    /// ATT properties
    #[must_use]
    pub const fn properties(self) -> Properties {
        match self {
            Self::CyclingPowerFeature
            | Self::SensorLocation
            | Self::FitnessMachineFeature
            | Self::SupportedPowerRange
            | Self::SteeringVendorRead
            | Self::SteeringVendorStatus => Properties::READ,
            Self::CyclingPowerMeasurement
            | Self::IndoorBikeData
            | Self::FitnessMachineStatus
            | Self::HeartRateMeasurement
            | Self::SteeringAngle
            | Self::SteeringVendorNotify => Properties::NOTIFY,
            Self::FitnessMachineControlPoint => Properties::WRITE.union(Properties::INDICATE),
            Self::SteeringRx | Self::SteeringVendorWrite => Properties::WRITE,
            Self::SteeringTx => Properties::INDICATE,
        }
    }

    /// Human readable name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::CyclingPowerMeasurement => "Cycling Power Measurement",
            Self::CyclingPowerFeature => "Cycling Power Feature",
            Self::SensorLocation => "Sensor Location",
            Self::FitnessMachineFeature => "Fitness Machine Feature",
            Self::IndoorBikeData => "Indoor Bike Data",
            Self::FitnessMachineControlPoint => "Fitness Machine Control Point",
            Self::FitnessMachineStatus => "Fitness Machine Status",
            Self::SupportedPowerRange => "Supported Power Range",
            Self::HeartRateMeasurement => "Heart Rate Measurement",
            Self::SteeringAngle => "Steering Angle",
            Self::SteeringRx => "Steering Rx",
            Self::SteeringTx => "Steering Tx",
            Self::SteeringVendorWrite => "Steering 0x0012",
            Self::SteeringVendorRead => "Steering 0x0013",
            Self::SteeringVendorNotify => "Steering 0x0014",
            Self::SteeringVendorStatus => "Steering 0x0019",
        }
    }

    /// Descriptors attached to this characteristic
    ///
    /// Every characteristic carries a user description. Notifying and indicating
    /// characteristics also carry client and server configuration descriptors.
    #[must_use]
    pub fn descriptors(self) -> Vec<DescriptorDefinition> {
        let mut descriptors = vec![DescriptorDefinition {
            uuid: USER_DESCRIPTION_UUID,
            value: Bytes::from_static(self.name().as_bytes()),
        }];

        if self.properties().is_subscribable() {
            descriptors.push(DescriptorDefinition {
                uuid: CLIENT_CONFIGURATION_UUID,
                value: Bytes::from_static(&[0x00, 0x00]),
            });
            descriptors.push(DescriptorDefinition {
                uuid: SERVER_CONFIGURATION_UUID,
                value: Bytes::from_static(&[0x00, 0x00]),
            });
        }

        descriptors
    }

    /// Full definition for building a GATT table
    #[must_use]
    pub fn definition(self) -> CharacteristicDefinition {
        CharacteristicDefinition {
            id: self,
            uuid: self.uuid(),
            properties: self.properties(),
            descriptors: self.descriptors(),
        }
    }
}

impl fmt::Display for CharacteristicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Descriptor with its initial value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorDefinition {
    /// Descriptor UUID
    pub uuid: Uuid,
    /// Initial value
    pub value: Bytes,
}

/// Characteristic entry of the GATT table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicDefinition {
    /// Which characteristic this is
    pub id: CharacteristicId,
    /// Characteristic UUID
    pub uuid: Uuid,
    /// ATT properties
    pub properties: Properties,
    /// Attached descriptors
    pub descriptors: Vec<DescriptorDefinition>,
}

/// Service entry of the GATT table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDefinition {
    /// Which service this is
    pub id: ServiceId,
    /// Service UUID
    pub uuid: Uuid,
    /// Characteristics in declaration order
    pub characteristics: Vec<CharacteristicDefinition>,
}

/// Adapter between a BLE stack and a [`Trainer`]
///
/// Writes are acknowledged at the ATT layer as soon as they are accepted; the
/// protocol-level answer (control-point response or steering answer) travels as an
/// indication to the subscriber.
#[derive(Clone)]
pub struct GattServer {
    trainer: Trainer,
}

impl GattServer {
    /// Expose a trainer over GATT
    #[must_use]
    pub const fn new(trainer: Trainer) -> Self {
        Self { trainer }
    }

    /// Underlying trainer
    #[must_use]
    pub const fn trainer(&self) -> &Trainer {
        &self.trainer
    }

    /// Advertised local name
    #[must_use]
    pub fn device_name(&self) -> &str {
        &self.trainer.config().device_name
    }

    /// Service UUIDs placed in the advertising data
    #[must_use]
    pub fn advertised_services(&self) -> Vec<Uuid> {
        vec![FITNESS_MACHINE_SERVICE_UUID, HEART_RATE_SERVICE_UUID]
    }

    /// The complete GATT table
    #[must_use]
    pub fn services(&self) -> Vec<ServiceDefinition> {
        ServiceId::ALL
            .into_iter()
            .map(|id| ServiceDefinition {
                id,
                uuid: id.uuid(),
                characteristics: id
                    .characteristics()
                    .into_iter()
                    .map(CharacteristicId::definition)
                    .collect(),
            })
            .collect()
    }

    /// Resolve a characteristic UUID
    ///
    /// # Errors
    ///
    /// Returns [`TrainerError::UnknownCharacteristic`] if the UUID is not in the table.
    pub fn characteristic(&self, uuid: Uuid) -> Result<CharacteristicId> {
        CharacteristicId::from_uuid(uuid).ok_or(TrainerError::UnknownCharacteristic(uuid))
    }

    /// Serve a read request
    ///
    /// # Errors
    ///
    /// Returns [`TrainerError::UnknownCharacteristic`] for an unknown UUID, or
    /// [`TrainerError::NotReadable`] for a characteristic without the read property.
    pub fn read(&self, uuid: Uuid) -> Result<Bytes> {
        let id = self.characteristic(uuid)?;
        let value = match id {
            CharacteristicId::CyclingPowerFeature => cycling_power_feature(),
            CharacteristicId::SensorLocation => sensor_location(),
            CharacteristicId::FitnessMachineFeature => fitness_machine_feature(),
            CharacteristicId::SupportedPowerRange => supported_power_range(),
            CharacteristicId::SteeringVendorRead | CharacteristicId::SteeringVendorStatus => {
                Bytes::from_static(&[VENDOR_READ_VALUE])
            }
            _ => return Err(TrainerError::NotReadable(id)),
        };

        debug!("Read {id} -> {value:02X?}");
        Ok(value)
    }

    /// Serve a write request
    ///
    /// A successful return is the ATT write acknowledgment. The acknowledgment does not
    /// depend on the content: a control-point request that is refused is still
    /// acknowledged, with the refusal carried in the response indication.
    ///
    /// # Errors
    ///
    /// Returns [`TrainerError::UnknownCharacteristic`] for an unknown UUID, or
    /// [`TrainerError::NotWritable`] for a characteristic without the write property.
    pub async fn write(&self, uuid: Uuid, data: &[u8]) -> Result<WriteOutcome> {
        let id = self.characteristic(uuid)?;
        debug!("Write {id} <- {data:02X?}");

        let outcome = match id {
            CharacteristicId::FitnessMachineControlPoint => {
                WriteOutcome::ControlPoint(self.trainer.write_control_point(data).await)
            }
            CharacteristicId::SteeringRx => {
                WriteOutcome::Steering(self.trainer.write_steering(data).await)
            }
            CharacteristicId::SteeringVendorWrite => WriteOutcome::Ignored,
            _ => return Err(TrainerError::NotWritable(id)),
        };

        Ok(outcome)
    }

    /// Register the channel that receives a characteristic's notifications or indications
    ///
    /// # Errors
    ///
    /// Returns [`TrainerError::UnknownCharacteristic`] for an unknown UUID, or
    /// [`TrainerError::NotSubscribable`] for a characteristic that neither notifies
    /// nor indicates.
    pub async fn subscribe(&self, uuid: Uuid, subscriber: Subscriber) -> Result<()> {
        let id = self.characteristic(uuid)?;
        if !id.properties().is_subscribable() {
            return Err(TrainerError::NotSubscribable(id));
        }

        self.trainer.subscribe(id, subscriber).await;
        Ok(())
    }

    /// Drop the subscription for a characteristic
    ///
    /// # Errors
    ///
    /// Returns [`TrainerError::UnknownCharacteristic`] for an unknown UUID.
    pub async fn unsubscribe(&self, uuid: Uuid) -> Result<()> {
        let id = self.characteristic(uuid)?;
        self.trainer.unsubscribe(id).await;
        Ok(())
    }

    /// Called when the last central disconnects
    pub async fn disconnected(&self) {
        info!("Central disconnected, dropping subscriptions");
        for id in CharacteristicId::ALL {
            if id.properties().is_subscribable() {
                self.trainer.unsubscribe(id).await;
            }
        }
    }
}

/// What an acknowledged write produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Control-point response, absent for an empty write
    ControlPoint(Option<ControlResponse>),
    /// Steering answer, absent when the command calls for none
    Steering(Option<Bytes>),
    /// Write accepted and discarded
    Ignored,
}
