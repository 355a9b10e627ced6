use crate::{
    error::{Result, TrainerError},
    types::{Event, SimulationParameters},
};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// First byte of every control-point response indication
pub const RESPONSE_CODE: u8 = 0x80;

/// Cycling Power Measurement flag: crank revolution data present
pub const CRANK_REVOLUTION_DATA_PRESENT: u16 = 1 << 5;

/// Cycling Power Feature flag: crank revolution data supported
pub const CRANK_REVOLUTION_DATA_SUPPORTED: u32 = 1 << 3;

/// Sensor Location value for a rear hub
pub const SENSOR_LOCATION_REAR_HUB: u8 = 13;

/// Indoor Bike Data flag: instantaneous cadence present
pub const INSTANTANEOUS_CADENCE_PRESENT: u16 = 1 << 2;

/// Indoor Bike Data flag: instantaneous power present
pub const INSTANTANEOUS_POWER_PRESENT: u16 = 1 << 6;

/// Largest Indoor Bike Data payload this peripheral produces
pub const INDOOR_BIKE_DATA_MAX_SIZE: usize = 30;

/// Fitness Machine Feature: cadence supported
pub const CADENCE_SUPPORTED: u32 = 1 << 1;

/// Fitness Machine Feature: heart rate measurement supported
pub const HEART_RATE_MEASUREMENT_SUPPORTED: u32 = 1 << 10;

/// Fitness Machine Feature: power measurement supported
pub const POWER_MEASUREMENT_SUPPORTED: u32 = 1 << 14;

/// Target Setting Feature: indoor bike simulation parameters supported
pub const INDOOR_BIKE_SIMULATION_SUPPORTED: u32 = 1 << 13;

/// Lowest target power accepted, in watts
pub const MINIMUM_POWER: i16 = 0;

/// Highest target power accepted, in watts
pub const MAXIMUM_POWER: i16 = 1_000;

/// Target power resolution, in watts
pub const MINIMUM_POWER_INCREMENT: u16 = 1;

/// Heart Rate Measurement flags byte: 8-bit value format
pub const HEART_RATE_FORMAT_UINT8: u8 = 0x00;

/// Fitness Machine Control Point operation codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    /// Ask for exclusive control of the machine
    RequestControl = 0x00,
    /// Release control and return to the initial state
    Reset = 0x01,
    /// ERG mode target in watts
    SetTargetPower = 0x05,
    /// Start or resume the workout
    StartOrResume = 0x07,
    /// Stop or pause the workout
    StopOrPause = 0x08,
    /// Wind, grade, Crr and Cw for simulation mode
    SetIndoorBikeSimulation = 0x11,
}

impl OpCode {
    /// Convert from u8
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::RequestControl),
            0x01 => Some(Self::Reset),
            0x05 => Some(Self::SetTargetPower),
            0x07 => Some(Self::StartOrResume),
            0x08 => Some(Self::StopOrPause),
            0x11 => Some(Self::SetIndoorBikeSimulation),
            _ => None,
        }
    }

    /// Parameter bytes that must follow the opcode
    #[must_use]
    pub const fn parameter_len(self) -> usize {
        match self {
            Self::SetTargetPower => 2,
            Self::SetIndoorBikeSimulation => 6,
            Self::RequestControl | Self::Reset | Self::StartOrResume | Self::StopOrPause => 0,
        }
    }
}

/// Result codes carried in control-point responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResultCode {
    /// Request executed
    Success = 0x01,
    /// Opcode not implemented by this machine
    OpCodeNotSupported = 0x02,
    /// Parameters missing or out of range
    InvalidParameter = 0x03,
    /// Request conflicts with the current run state
    OperationFailed = 0x04,
    /// Requesting central does not hold control
    ControlNotPermitted = 0x05,
}

impl ResultCode {
    /// Convert from u8
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Success),
            0x02 => Some(Self::OpCodeNotSupported),
            0x03 => Some(Self::InvalidParameter),
            0x04 => Some(Self::OperationFailed),
            0x05 => Some(Self::ControlNotPermitted),
            _ => None,
        }
    }
}

/// Decoded control-point write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRequest {
    /// RequestControl
    RequestControl,
    /// Reset
    Reset,
    /// SetTargetPower with watts
    SetTargetPower(i16),
    /// StartOrResume
    StartOrResume,
    /// StopOrPause
    StopOrPause,
    /// SetIndoorBikeSimulation with raw parameters
    SetIndoorBikeSimulation(SimulationParameters),
    /// Any opcode this machine does not implement
    Unsupported(u8),
}

impl ControlRequest {
    /// Parse a control-point write
    ///
    /// Layout: opcode (u8) followed by little-endian parameters.
    ///
    /// # Errors
    ///
    /// Returns [`TrainerError::ParseError`] for an empty write and
    /// [`TrainerError::InvalidParameters`] when the parameters are shorter than the
    /// opcode requires. Trailing bytes beyond the parameters are ignored.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut buf = data;
        if !buf.has_remaining() {
            return Err(TrainerError::ParseError(
                "Empty control point write".to_string(),
            ));
        }

        let code = buf.get_u8();
        let Some(opcode) = OpCode::from_u8(code) else {
            return Ok(Self::Unsupported(code));
        };

        if buf.remaining() < opcode.parameter_len() {
            return Err(TrainerError::InvalidParameters(format!(
                "{opcode:?} needs {} parameter bytes, got {}",
                opcode.parameter_len(),
                buf.remaining()
            )));
        }

        let request = match opcode {
            OpCode::RequestControl => Self::RequestControl,
            OpCode::Reset => Self::Reset,
            OpCode::SetTargetPower => Self::SetTargetPower(buf.get_i16_le()),
            OpCode::StartOrResume => Self::StartOrResume,
            OpCode::StopOrPause => Self::StopOrPause,
            OpCode::SetIndoorBikeSimulation => {
                let wind_speed = buf.get_i16_le();
                let grade = buf.get_i16_le();
                let crr = buf.get_u8();
                let cw = buf.get_u8();
                Self::SetIndoorBikeSimulation(SimulationParameters::new(wind_speed, grade, crr, cw))
            }
        };

        Ok(request)
    }

    /// Opcode byte as it appeared on the wire
    #[must_use]
    pub const fn opcode(&self) -> u8 {
        match self {
            Self::RequestControl => OpCode::RequestControl as u8,
            Self::Reset => OpCode::Reset as u8,
            Self::SetTargetPower(_) => OpCode::SetTargetPower as u8,
            Self::StartOrResume => OpCode::StartOrResume as u8,
            Self::StopOrPause => OpCode::StopOrPause as u8,
            Self::SetIndoorBikeSimulation(_) => OpCode::SetIndoorBikeSimulation as u8,
            Self::Unsupported(code) => *code,
        }
    }
}

/// Control-point response, indicated after every handled write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlResponse {
    /// Opcode of the request being answered
    pub opcode: u8,
    /// Outcome
    pub result: ResultCode,
}

impl ControlResponse {
    /// Create a response
    #[must_use]
    pub const fn new(opcode: u8, result: ResultCode) -> Self {
        Self { opcode, result }
    }

    /// Serialize as `{0x80, opcode, result}`
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(3);
        buf.put_u8(RESPONSE_CODE);
        buf.put_u8(self.opcode);
        buf.put_u8(self.result as u8);
        buf.freeze()
    }

    /// Parse a response indication
    ///
    /// # Errors
    ///
    /// Returns [`TrainerError::ParseError`] if the buffer is not a 3-byte response.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() != 3 || data[0] != RESPONSE_CODE {
            return Err(TrainerError::ParseError(format!(
                "Not a control point response: {data:02X?}"
            )));
        }

        let result = ResultCode::from_u8(data[2]).ok_or_else(|| {
            TrainerError::ParseError(format!("Unknown result code: {:02X}", data[2]))
        })?;

        Ok(Self::new(data[1], result))
    }
}

/// Fitness Machine Status notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineStatus {
    /// Control was released
    Reset,
    /// Machine stopped or paused by the user
    StoppedByUser,
    /// Machine started or resumed by the user
    StartedByUser,
    /// Target power changed, in watts
    TargetPowerChanged(i16),
    /// Simulation parameters changed, raw units
    SimulationParametersChanged(SimulationParameters),
}

impl MachineStatus {
    /// Status op code
    #[must_use]
    pub const fn code(&self) -> u8 {
        match self {
            Self::Reset => 0x01,
            Self::StoppedByUser => 0x02,
            Self::StartedByUser => 0x04,
            Self::TargetPowerChanged(_) => 0x08,
            Self::SimulationParametersChanged(_) => 0x12,
        }
    }

    /// Serialize the notification (1, 3 or 7 bytes)
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(7);
        buf.put_u8(self.code());

        match self {
            Self::TargetPowerChanged(watts) => buf.put_i16_le(*watts),
            Self::SimulationParametersChanged(params) => {
                buf.put_i16_le(params.wind_speed);
                buf.put_i16_le(params.grade);
                buf.put_u8(params.crr);
                buf.put_u8(params.cw);
            }
            Self::Reset | Self::StoppedByUser | Self::StartedByUser => {}
        }

        buf.freeze()
    }
}

/// Crank event time in 1/1024 s ticks, truncated to 16 bits
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn crank_event_time(now_ms: u64) -> u16 {
    (now_ms.wrapping_mul(1_000) / 1_024) as u16
}

/// Encode a Cycling Power Measurement (0x2A63)
///
/// Layout: flags (u16), instantaneous power (i16), then cumulative crank revolutions
/// (u16) and last crank event time (u16) when revolutions are present. Instantaneous
/// power is the mandatory field of this characteristic, so it has no presence bit.
///
/// Returns `None` if the event carries neither power nor revolutions.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn encode_cycling_power_measurement(event: &Event, now_ms: u64) -> Option<Bytes> {
    if event.watts.is_none() && event.revolutions.is_none() {
        return None;
    }

    let mut flags = 0u16;
    if event.revolutions.is_some() {
        flags |= CRANK_REVOLUTION_DATA_PRESENT;
    }

    let mut buf = BytesMut::with_capacity(8);
    buf.put_u16_le(flags);
    buf.put_i16_le(event.watts.unwrap_or(0));

    if let Some(revolutions) = event.revolutions {
        buf.put_u16_le((revolutions & 0xFFFF) as u16);
        buf.put_u16_le(crank_event_time(now_ms));
    }

    Some(buf.freeze())
}

/// Cycling Power Feature (0x2A65) value
#[must_use]
pub fn cycling_power_feature() -> Bytes {
    Bytes::copy_from_slice(&CRANK_REVOLUTION_DATA_SUPPORTED.to_le_bytes())
}

/// Sensor Location (0x2A5D) value
#[must_use]
pub fn sensor_location() -> Bytes {
    Bytes::from_static(&[SENSOR_LOCATION_REAR_HUB])
}

/// Fitness Machine Feature (0x2ACC) value: machine features then target setting features
#[must_use]
pub fn fitness_machine_feature() -> Bytes {
    let mut buf = BytesMut::with_capacity(8);
    buf.put_u32_le(CADENCE_SUPPORTED | HEART_RATE_MEASUREMENT_SUPPORTED | POWER_MEASUREMENT_SUPPORTED);
    buf.put_u32_le(INDOOR_BIKE_SIMULATION_SUPPORTED);
    buf.freeze()
}

/// Supported Power Range (0x2AD8) value
#[must_use]
pub fn supported_power_range() -> Bytes {
    let mut buf = BytesMut::with_capacity(6);
    buf.put_i16_le(MINIMUM_POWER);
    buf.put_i16_le(MAXIMUM_POWER);
    buf.put_u16_le(MINIMUM_POWER_INCREMENT);
    buf.freeze()
}

/// Encode Indoor Bike Data (0x2AD2)
///
/// Layout: flags (u16), instantaneous speed (u16, always zero), then cadence in
/// 0.5 rpm units and power in watts, each only when present.
///
/// Returns `None` when the event has neither cadence nor power; nothing is notified then.
#[must_use]
pub fn encode_indoor_bike_data(event: &Event) -> Option<Bytes> {
    let mut flags = 0u16;
    let mut buf = BytesMut::with_capacity(INDOOR_BIKE_DATA_MAX_SIZE);
    buf.put_u16_le(0);
    buf.put_u16_le(0);

    if let Some(cadence) = event.cadence {
        flags |= INSTANTANEOUS_CADENCE_PRESENT;
        buf.put_u16_le(cadence.saturating_mul(2));
    }

    if let Some(watts) = event.watts {
        flags |= INSTANTANEOUS_POWER_PRESENT;
        buf.put_i16_le(watts);
    }

    if flags == 0 {
        return None;
    }

    buf[..2].copy_from_slice(&flags.to_le_bytes());
    Some(buf.freeze())
}

/// Encode a Heart Rate Measurement (0x2A37), if the event has a heart rate
#[must_use]
pub fn encode_heart_rate_measurement(event: &Event) -> Option<Bytes> {
    let bpm = event.heart_rate?;
    Some(Bytes::copy_from_slice(&[HEART_RATE_FORMAT_UINT8, bpm]))
}

/// Encode the steering angle as a little-endian IEEE-754 float, if present
#[must_use]
pub fn encode_steering_angle(event: &Event) -> Option<Bytes> {
    let angle = event.steering_angle?;
    Some(Bytes::copy_from_slice(&angle.to_le_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> Event {
        Event::default()
    }

    #[test]
    fn test_cycling_power_measurement_power_only() {
        let bytes = encode_cycling_power_measurement(
            &Event {
                watts: Some(250),
                ..event()
            },
            0,
        )
        .unwrap();

        assert_eq!(bytes.len(), 4);
        assert_eq!(&bytes[0..2], &0u16.to_le_bytes());
        assert_eq!(&bytes[2..4], &250i16.to_le_bytes());
    }

    #[test]
    fn test_cycling_power_measurement_revolutions_wrap() {
        let bytes = encode_cycling_power_measurement(
            &Event {
                watts: Some(-5),
                revolutions: Some(70_000),
                ..event()
            },
            2_048,
        )
        .unwrap();

        assert_eq!(bytes.len(), 8);
        assert_eq!(u16::from_le_bytes([bytes[0], bytes[1]]), CRANK_REVOLUTION_DATA_PRESENT);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), -5);
        assert_eq!(u16::from_le_bytes([bytes[4], bytes[5]]), 4_464);
        assert_eq!(u16::from_le_bytes([bytes[6], bytes[7]]), 2_000);
    }

    #[test]
    fn test_cycling_power_measurement_absent() {
        let only_cadence = Event {
            cadence: Some(90),
            ..event()
        };
        assert!(encode_cycling_power_measurement(&only_cadence, 0).is_none());
    }

    #[test]
    fn test_crank_event_time_truncation() {
        assert_eq!(crank_event_time(0), 0);
        assert_eq!(crank_event_time(1_024), 1_000);
        // 67_109 ms is 65_536.1 ticks
        assert_eq!(crank_event_time(67_109), 0);
    }

    #[test]
    fn test_indoor_bike_data_empty_event() {
        assert!(encode_indoor_bike_data(&event()).is_none());
        assert!(encode_indoor_bike_data(&Event {
            heart_rate: Some(140),
            ..event()
        })
        .is_none());
    }

    #[test]
    fn test_indoor_bike_data_power_only() {
        let bytes = encode_indoor_bike_data(&Event {
            watts: Some(120),
            ..event()
        })
        .unwrap();

        assert_eq!(bytes.len(), 6);
        assert_eq!(u16::from_le_bytes([bytes[0], bytes[1]]), INSTANTANEOUS_POWER_PRESENT);
        assert_eq!(&bytes[2..4], &[0, 0]);
        assert_eq!(i16::from_le_bytes([bytes[4], bytes[5]]), 120);
    }

    #[test]
    fn test_indoor_bike_data_cadence_and_power() {
        let bytes = encode_indoor_bike_data(&Event {
            cadence: Some(90),
            watts: Some(200),
            ..event()
        })
        .unwrap();

        assert_eq!(bytes.len(), 8);
        assert_eq!(
            u16::from_le_bytes([bytes[0], bytes[1]]),
            INSTANTANEOUS_CADENCE_PRESENT | INSTANTANEOUS_POWER_PRESENT
        );
        assert_eq!(u16::from_le_bytes([bytes[4], bytes[5]]), 180);
        assert_eq!(i16::from_le_bytes([bytes[6], bytes[7]]), 200);
    }

    #[test]
    fn test_cycling_power_measurement_revolutions_only() {
        let bytes = encode_cycling_power_measurement(
            &Event {
                revolutions: Some(12),
                ..event()
            },
            1_024,
        )
        .unwrap();

        assert_eq!(&bytes[..], &[0x20, 0x00, 0x00, 0x00, 0x0C, 0x00, 0xE8, 0x03]);
    }

    #[test]
    fn test_indoor_bike_data_cadence_only() {
        let bytes = encode_indoor_bike_data(&Event {
            cadence: Some(90),
            ..event()
        })
        .unwrap();

        assert_eq!(&bytes[..], &[0x04, 0x00, 0x00, 0x00, 0xB4, 0x00]);
    }

    #[test]
    fn test_payload_lengths_follow_flags() {
        for mask in 0u8..32 {
            let sample = Event {
                watts: (mask & 0x01 != 0).then_some(100),
                cadence: (mask & 0x02 != 0).then_some(80),
                revolutions: (mask & 0x04 != 0).then_some(7),
                heart_rate: (mask & 0x08 != 0).then_some(130),
                steering_angle: (mask & 0x10 != 0).then_some(-2.5),
                ..event()
            };

            match encode_cycling_power_measurement(&sample, 0) {
                Some(bytes) => {
                    let flags = u16::from_le_bytes([bytes[0], bytes[1]]);
                    let expected = if flags & CRANK_REVOLUTION_DATA_PRESENT == 0 { 4 } else { 8 };
                    assert_eq!(bytes.len(), expected, "cycling power, mask {mask:05b}");
                    assert_eq!(flags & CRANK_REVOLUTION_DATA_PRESENT != 0, sample.revolutions.is_some());
                }
                None => assert!(sample.watts.is_none() && sample.revolutions.is_none()),
            }

            match encode_indoor_bike_data(&sample) {
                Some(bytes) => {
                    let flags = u16::from_le_bytes([bytes[0], bytes[1]]);
                    let mut expected = 4;
                    if flags & INSTANTANEOUS_CADENCE_PRESENT != 0 {
                        expected += 2;
                    }
                    if flags & INSTANTANEOUS_POWER_PRESENT != 0 {
                        expected += 2;
                    }
                    assert_eq!(bytes.len(), expected, "indoor bike data, mask {mask:05b}");
                    assert_eq!(flags & INSTANTANEOUS_CADENCE_PRESENT != 0, sample.cadence.is_some());
                    assert_eq!(flags & INSTANTANEOUS_POWER_PRESENT != 0, sample.watts.is_some());
                }
                None => assert!(sample.watts.is_none() && sample.cadence.is_none()),
            }

            assert_eq!(
                encode_heart_rate_measurement(&sample).map(|bytes| bytes.len()),
                sample.heart_rate.map(|_| 2)
            );
            assert_eq!(
                encode_steering_angle(&sample).map(|bytes| bytes.len()),
                sample.steering_angle.map(|_| 4)
            );
        }
    }

    #[test]
    fn test_heart_rate_and_steering() {
        assert!(encode_heart_rate_measurement(&event()).is_none());
        let hr = encode_heart_rate_measurement(&Event {
            heart_rate: Some(152),
            ..event()
        })
        .unwrap();
        assert_eq!(&hr[..], &[0x00, 152]);

        assert!(encode_steering_angle(&event()).is_none());
        let steering = encode_steering_angle(&Event {
            steering_angle: Some(-12.5),
            ..event()
        })
        .unwrap();
        assert_eq!(&steering[..], &(-12.5f32).to_le_bytes());
    }

    #[test]
    fn test_constant_characteristics() {
        assert_eq!(&cycling_power_feature()[..], &[0x08, 0, 0, 0]);
        assert_eq!(&sensor_location()[..], &[13]);
        assert_eq!(
            &fitness_machine_feature()[..],
            &[0x02, 0x44, 0x00, 0x00, 0x00, 0x20, 0x00, 0x00]
        );
        assert_eq!(&supported_power_range()[..], &[0, 0, 0xE8, 0x03, 1, 0]);
    }

    #[test]
    fn test_control_request_parsing() {
        assert_eq!(
            ControlRequest::from_bytes(&[0x00]).unwrap(),
            ControlRequest::RequestControl
        );
        assert_eq!(
            ControlRequest::from_bytes(&[0x05, 0xC8, 0x00]).unwrap(),
            ControlRequest::SetTargetPower(200)
        );
        assert_eq!(
            ControlRequest::from_bytes(&[0x11, 0x18, 0xFC, 0xFA, 0x00, 0x28, 0x33]).unwrap(),
            ControlRequest::SetIndoorBikeSimulation(SimulationParameters::new(-1000, 250, 40, 51))
        );
        assert_eq!(
            ControlRequest::from_bytes(&[0x42, 0x01]).unwrap(),
            ControlRequest::Unsupported(0x42)
        );
    }

    #[test]
    fn test_control_request_bounds() {
        let empty = ControlRequest::from_bytes(&[]);
        assert!(matches!(empty, Err(TrainerError::ParseError(_))));

        let short_power = ControlRequest::from_bytes(&[0x05, 0xC8]);
        assert!(matches!(short_power, Err(TrainerError::InvalidParameters(_))));

        let short_sim = ControlRequest::from_bytes(&[0x11, 0, 0, 0, 0, 0]);
        assert!(matches!(short_sim, Err(TrainerError::InvalidParameters(_))));
    }

    #[test]
    fn test_control_response_bytes() {
        let response = ControlResponse::new(OpCode::StartOrResume as u8, ResultCode::OperationFailed);
        let bytes = response.to_bytes();
        assert_eq!(&bytes[..], &[0x80, 0x07, 0x04]);
        assert_eq!(ControlResponse::from_bytes(&bytes).unwrap(), response);
        assert!(ControlResponse::from_bytes(&[0x80, 0x07]).is_err());
        assert!(ControlResponse::from_bytes(&[0x80, 0x07, 0x09]).is_err());
    }

    #[test]
    fn test_machine_status_bytes() {
        assert_eq!(&MachineStatus::Reset.to_bytes()[..], &[0x01]);
        assert_eq!(&MachineStatus::StoppedByUser.to_bytes()[..], &[0x02]);
        assert_eq!(&MachineStatus::StartedByUser.to_bytes()[..], &[0x04]);
        assert_eq!(
            &MachineStatus::TargetPowerChanged(-20).to_bytes()[..],
            &[0x08, 0xEC, 0xFF]
        );
        assert_eq!(
            &MachineStatus::SimulationParametersChanged(SimulationParameters::new(
                -1000, 250, 40, 51
            ))
            .to_bytes()[..],
            &[0x12, 0x18, 0xFC, 0xFA, 0x00, 0x28, 0x33]
        );
    }
}
