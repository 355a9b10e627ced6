use serde::{ser::SerializeMap, Deserialize, Serialize, Serializer};
use std::{fmt, time::Duration};

/// Telemetry update received from the training application
///
/// Every field is optional. A field that is absent is left out of every characteristic
/// payload (and its presence flag cleared); it is never encoded as zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Instantaneous power in watts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watts: Option<i16>,
    /// Instantaneous cadence in rpm
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cadence: Option<u16>,
    /// Heart rate in beats per minute
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heart_rate: Option<u8>,
    /// Cumulative crank revolutions (only the low 16 bits go on the wire)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revolutions: Option<u32>,
    /// Steering angle in degrees, negative to the left
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steering_angle: Option<f32>,
    /// Target power in watts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_power: Option<i16>,
    /// Simulated head wind in m/s
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wind_speed: Option<f64>,
    /// Simulated grade in percent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grade: Option<f64>,
    /// Rolling resistance coefficient (Crr)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rolling_resistance_coefficient: Option<f64>,
    /// Wind resistance coefficient (Cw) in kg/m
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wind_resistance_coefficient: Option<f64>,
    /// Marks the terminal event of a ride; a stop event does not re-arm the liveness timer
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stop: bool,
}

impl Event {
    /// The event synthesized when telemetry has gone silent
    ///
    /// Power, cadence and heart rate drop to zero. Revolutions are left out so the
    /// cumulative crank counter seen by centrals never runs backwards.
    #[must_use]
    pub const fn stopped() -> Self {
        Self {
            watts: Some(0),
            cadence: Some(0),
            heart_rate: Some(0),
            revolutions: None,
            steering_angle: None,
            target_power: None,
            wind_speed: None,
            grade: None,
            rolling_resistance_coefficient: None,
            wind_resistance_coefficient: None,
            stop: true,
        }
    }

    /// Whether this event ends the ride
    #[must_use]
    pub const fn is_stop(&self) -> bool {
        self.stop
    }
}

/// Indoor bike simulation parameters in their raw wire units
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationParameters {
    /// Wind speed in 0.001 m/s
    pub wind_speed: i16,
    /// Grade in 0.01 %
    pub grade: i16,
    /// Rolling resistance coefficient in 0.0001
    pub crr: u8,
    /// Wind resistance coefficient in 0.01 kg/m
    pub cw: u8,
}

impl SimulationParameters {
    /// Create simulation parameters from raw wire values
    #[must_use]
    pub const fn new(wind_speed: i16, grade: i16, crr: u8, cw: u8) -> Self {
        Self {
            wind_speed,
            grade,
            crr,
            cw,
        }
    }

    /// Wind speed in m/s
    #[must_use]
    pub fn wind_speed_mps(&self) -> f64 {
        f64::from(self.wind_speed) / 1_000.0
    }

    /// Grade in percent
    #[must_use]
    pub fn grade_percent(&self) -> f64 {
        f64::from(self.grade) / 100.0
    }

    /// Rolling resistance coefficient
    #[must_use]
    pub fn rolling_resistance(&self) -> f64 {
        f64::from(self.crr) / 10_000.0
    }

    /// Wind resistance coefficient in kg/m
    #[must_use]
    pub fn wind_resistance(&self) -> f64 {
        f64::from(self.cw) / 100.0
    }
}

/// Control message queued for the training application to pick up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Command {
    /// Central switched to ERG mode
    TargetPower {
        /// Target power in watts
        target_power: i16,
    },
    /// Central switched to simulation mode
    Simulation {
        /// Wind speed in m/s
        wind_speed: f64,
        /// Grade in percent
        grade: f64,
        /// Rolling resistance coefficient
        rolling_resistance_coefficient: f64,
        /// Wind resistance coefficient in kg/m
        wind_resistance_coefficient: f64,
    },
}

impl Command {
    /// Build a simulation command from raw control-point parameters
    #[must_use]
    pub fn simulation(params: &SimulationParameters) -> Self {
        Self::Simulation {
            wind_speed: params.wind_speed_mps(),
            grade: params.grade_percent(),
            rolling_resistance_coefficient: params.rolling_resistance(),
            wind_resistance_coefficient: params.wind_resistance(),
        }
    }
}

/// Poll result handed to the external consumer; serializes to `{}` when nothing is pending
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandRecord(pub Option<Command>);

impl CommandRecord {
    /// Whether the queue was empty when this record was taken
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    /// Take the command out of the record
    #[must_use]
    pub fn into_inner(self) -> Option<Command> {
        self.0
    }
}

impl Serialize for CommandRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match &self.0 {
            Some(command) => command.serialize(serializer),
            None => serializer.serialize_map(Some(0))?.end(),
        }
    }
}

/// Authority and run state of the control point
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlState {
    /// No central holds control
    #[default]
    NoControl,
    /// A central holds control, machine stopped or paused
    Stopped,
    /// A central holds control, machine started or resumed
    Started,
}

impl fmt::Display for ControlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoControl => write!(f, "No Control"),
            Self::Stopped => write!(f, "Controlled (stopped)"),
            Self::Started => write!(f, "Controlled (started)"),
        }
    }
}

/// Control-point session of one trainer
///
/// Holding the run state inside [`ControlState`] makes "started without control"
/// unrepresentable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlSession {
    state: ControlState,
}

impl ControlSession {
    /// Create a session in the given state
    #[must_use]
    pub const fn new(state: ControlState) -> Self {
        Self { state }
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> ControlState {
        self.state
    }

    /// Whether a central holds control
    #[must_use]
    pub const fn has_control(&self) -> bool {
        !matches!(self.state, ControlState::NoControl)
    }

    /// Whether the machine has been started by the controlling central
    #[must_use]
    pub const fn is_started(&self) -> bool {
        matches!(self.state, ControlState::Started)
    }
}

/// How a RequestControl on an already-controlled session is answered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlPolicy {
    /// Succeed again and leave the session untouched
    #[default]
    Regrant,
    /// Refuse with ControlNotPermitted until the holder resets
    Exclusive,
}

/// Trainer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainerConfig {
    /// Local name advertised by the peripheral
    pub device_name: String,
    /// Silence after which a stop event is synthesized, in milliseconds
    pub liveness_timeout_ms: u64,
    /// Answer to RequestControl while control is already held
    pub control_policy: ControlPolicy,
}

impl TrainerConfig {
    /// Liveness horizon as a [`Duration`]
    #[must_use]
    pub const fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.liveness_timeout_ms)
    }
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            device_name: "FortiusANT Trainer".to_string(),
            liveness_timeout_ms: 1_500,
            control_policy: ControlPolicy::Regrant,
        }
    }
}
