//! Fitness Machine Control Point state machine.
//!
//! ```text
//!              RequestControl              StartOrResume
//!  NoControl ─────────────────▶ Stopped ─────────────────▶ Started
//!      ▲                          │  ▲       StopOrPause      │
//!      │           Reset          │  └────────────────────────┘
//!      └──────────────────────────┴───────────────────────────┘
//! ```
//!
//! [`transition`] is a pure function of the current [`ControlSession`] and a decoded
//! request. It returns the next session together with everything the caller must
//! emit: the result code for the response indication, an optional command for the
//! training application and an optional Fitness Machine Status notification.

use tracing::{debug, info, warn};

use crate::{
    error::TrainerError,
    protocol::{ControlRequest, ControlResponse, MachineStatus, ResultCode},
    types::{Command, ControlPolicy, ControlSession, ControlState},
};

/// Result of applying one request to a session
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// Session after the request
    pub session: ControlSession,
    /// Result code to indicate back to the central
    pub result: ResultCode,
    /// Command to queue for the training application
    pub command: Option<Command>,
    /// Status to broadcast on the Fitness Machine Status characteristic
    pub status: Option<MachineStatus>,
}

impl Transition {
    const fn accepted(session: ControlSession) -> Self {
        Self {
            session,
            result: ResultCode::Success,
            command: None,
            status: None,
        }
    }

    const fn rejected(session: ControlSession, result: ResultCode) -> Self {
        Self {
            session,
            result,
            command: None,
            status: None,
        }
    }

    fn with_command(mut self, command: Command) -> Self {
        self.command = Some(command);
        self
    }

    const fn with_status(mut self, status: MachineStatus) -> Self {
        self.status = Some(status);
        self
    }
}

/// Apply a decoded control-point request to a session
#[must_use]
pub fn transition(
    session: ControlSession,
    request: &ControlRequest,
    policy: ControlPolicy,
) -> Transition {
    use ControlState::{NoControl, Started, Stopped};

    match (*request, session.state()) {
        (ControlRequest::Unsupported(code), _) => {
            warn!("Unsupported control point opcode {code:02X}");
            Transition::rejected(session, ResultCode::OpCodeNotSupported)
        }
        (ControlRequest::RequestControl, NoControl) => {
            info!("Control granted");
            Transition::accepted(ControlSession::new(Stopped))
        }
        (ControlRequest::RequestControl, _) => match policy {
            ControlPolicy::Regrant => {
                debug!("Control requested while already held, granting again");
                Transition::accepted(session)
            }
            ControlPolicy::Exclusive => {
                warn!("Control requested while already held");
                Transition::rejected(session, ResultCode::ControlNotPermitted)
            }
        },
        (_, NoControl) => {
            warn!("{request:?} rejected, no central has control");
            Transition::rejected(session, ResultCode::ControlNotPermitted)
        }
        (ControlRequest::Reset, _) => {
            info!("Control reset");
            Transition::accepted(ControlSession::new(NoControl)).with_status(MachineStatus::Reset)
        }
        (ControlRequest::SetTargetPower(watts), _) => {
            debug!("Target power {watts} W");
            Transition::accepted(session)
                .with_command(Command::TargetPower {
                    target_power: watts,
                })
                .with_status(MachineStatus::TargetPowerChanged(watts))
        }
        (ControlRequest::StartOrResume, Started) => {
            warn!("Start requested but already started");
            Transition::rejected(session, ResultCode::OperationFailed)
        }
        (ControlRequest::StartOrResume, Stopped) => {
            info!("Started");
            Transition::accepted(ControlSession::new(Started))
                .with_status(MachineStatus::StartedByUser)
        }
        (ControlRequest::StopOrPause, Stopped) => {
            warn!("Stop requested but already stopped");
            Transition::rejected(session, ResultCode::OperationFailed)
        }
        (ControlRequest::StopOrPause, Started) => {
            info!("Stopped");
            Transition::accepted(ControlSession::new(Stopped))
                .with_status(MachineStatus::StoppedByUser)
        }
        (ControlRequest::SetIndoorBikeSimulation(params), _) => {
            debug!(
                "Simulation: wind {:.3} m/s, grade {:.2} %, crr {:.4}, cw {:.2} kg/m",
                params.wind_speed_mps(),
                params.grade_percent(),
                params.rolling_resistance(),
                params.wind_resistance()
            );
            Transition::accepted(session)
                .with_command(Command::simulation(&params))
                .with_status(MachineStatus::SimulationParametersChanged(params))
        }
    }
}

/// A handled control-point write: the transition and the response to indicate
#[derive(Debug, Clone, PartialEq)]
pub struct ControlOutcome {
    /// State change and side effects
    pub transition: Transition,
    /// Response indication
    pub response: ControlResponse,
}

/// Decode a raw control-point write and apply it
///
/// Undersized parameters are answered with [`ResultCode::InvalidParameter`] and leave
/// the session untouched. An empty write has no opcode to answer and yields `None`.
#[must_use]
pub fn handle_write(
    session: ControlSession,
    data: &[u8],
    policy: ControlPolicy,
) -> Option<ControlOutcome> {
    match ControlRequest::from_bytes(data) {
        Ok(request) => {
            let transition = transition(session, &request, policy);
            let response = ControlResponse::new(request.opcode(), transition.result);
            Some(ControlOutcome {
                transition,
                response,
            })
        }
        Err(TrainerError::InvalidParameters(reason)) => {
            warn!("Rejecting control point write {data:02X?}: {reason}");
            let opcode = data.first().copied()?;
            Some(ControlOutcome {
                transition: Transition::rejected(session, ResultCode::InvalidParameter),
                response: ControlResponse::new(opcode, ResultCode::InvalidParameter),
            })
        }
        Err(e) => {
            warn!("Ignoring control point write {data:02X?}: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{protocol::OpCode, types::SimulationParameters};

    fn run(requests: &[ControlRequest], policy: ControlPolicy) -> (ControlSession, Vec<ResultCode>) {
        let mut session = ControlSession::default();
        let mut results = Vec::new();
        for request in requests {
            let outcome = transition(session, request, policy);
            session = outcome.session;
            results.push(outcome.result);
        }
        (session, results)
    }

    #[test]
    fn test_start_twice_fails() {
        let (session, results) = run(
            &[
                ControlRequest::RequestControl,
                ControlRequest::StartOrResume,
                ControlRequest::StartOrResume,
            ],
            ControlPolicy::Regrant,
        );
        assert_eq!(
            results,
            vec![ResultCode::Success, ResultCode::Success, ResultCode::OperationFailed]
        );
        assert!(session.is_started());
    }

    #[test]
    fn test_start_without_control() {
        let (session, results) = run(&[ControlRequest::StartOrResume], ControlPolicy::Regrant);
        assert_eq!(results, vec![ResultCode::ControlNotPermitted]);
        assert!(!session.has_control());
    }

    #[test]
    fn test_reset_revokes_control() {
        let (session, results) = run(
            &[
                ControlRequest::RequestControl,
                ControlRequest::Reset,
                ControlRequest::SetTargetPower(150),
            ],
            ControlPolicy::Regrant,
        );
        assert_eq!(
            results,
            vec![ResultCode::Success, ResultCode::Success, ResultCode::ControlNotPermitted]
        );
        assert_eq!(session.state(), ControlState::NoControl);
    }

    #[test]
    fn test_reset_twice() {
        let (_, results) = run(
            &[
                ControlRequest::RequestControl,
                ControlRequest::Reset,
                ControlRequest::Reset,
            ],
            ControlPolicy::Regrant,
        );
        assert_eq!(
            results,
            vec![ResultCode::Success, ResultCode::Success, ResultCode::ControlNotPermitted]
        );
    }

    #[test]
    fn test_reset_while_started_clears_run_state() {
        let started = ControlSession::new(ControlState::Started);
        let outcome = transition(started, &ControlRequest::Reset, ControlPolicy::Regrant);
        assert_eq!(outcome.result, ResultCode::Success);
        assert!(!outcome.session.has_control());
        assert!(!outcome.session.is_started());
        assert_eq!(outcome.status, Some(MachineStatus::Reset));
    }

    #[test]
    fn test_stop_transitions() {
        let (session, results) = run(
            &[
                ControlRequest::RequestControl,
                ControlRequest::StopOrPause,
                ControlRequest::StartOrResume,
                ControlRequest::StopOrPause,
            ],
            ControlPolicy::Regrant,
        );
        assert_eq!(
            results,
            vec![
                ResultCode::Success,
                ResultCode::OperationFailed,
                ResultCode::Success,
                ResultCode::Success
            ]
        );
        assert_eq!(session.state(), ControlState::Stopped);
    }

    #[test]
    fn test_request_control_policies() {
        let started = ControlSession::new(ControlState::Started);

        let regrant = transition(started, &ControlRequest::RequestControl, ControlPolicy::Regrant);
        assert_eq!(regrant.result, ResultCode::Success);
        assert_eq!(regrant.session, started);

        let exclusive =
            transition(started, &ControlRequest::RequestControl, ControlPolicy::Exclusive);
        assert_eq!(exclusive.result, ResultCode::ControlNotPermitted);
        assert_eq!(exclusive.session, started);
    }

    #[test]
    fn test_target_power_side_effects() {
        let controlled = ControlSession::new(ControlState::Stopped);
        let outcome = transition(
            controlled,
            &ControlRequest::SetTargetPower(210),
            ControlPolicy::Regrant,
        );
        assert_eq!(outcome.result, ResultCode::Success);
        assert_eq!(
            outcome.command,
            Some(Command::TargetPower { target_power: 210 })
        );
        assert_eq!(outcome.status, Some(MachineStatus::TargetPowerChanged(210)));
        assert_eq!(outcome.session, controlled);
    }

    #[test]
    fn test_simulation_side_effects() {
        let params = SimulationParameters::new(0, -300, 33, 51);
        let outcome = transition(
            ControlSession::new(ControlState::Started),
            &ControlRequest::SetIndoorBikeSimulation(params),
            ControlPolicy::Regrant,
        );
        assert_eq!(outcome.result, ResultCode::Success);
        assert_eq!(
            outcome.status,
            Some(MachineStatus::SimulationParametersChanged(params))
        );
        match outcome.command {
            Some(Command::Simulation { grade, .. }) => assert!((grade + 3.0).abs() < 1e-9),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_unsupported_opcode_any_state() {
        for state in [ControlState::NoControl, ControlState::Stopped, ControlState::Started] {
            let session = ControlSession::new(state);
            let outcome = transition(session, &ControlRequest::Unsupported(0x03), ControlPolicy::Regrant);
            assert_eq!(outcome.result, ResultCode::OpCodeNotSupported);
            assert_eq!(outcome.session, session);
            assert!(outcome.status.is_none());
        }
    }

    #[test]
    fn test_rejections_emit_nothing() {
        let outcome = transition(
            ControlSession::default(),
            &ControlRequest::SetTargetPower(100),
            ControlPolicy::Regrant,
        );
        assert!(outcome.command.is_none());
        assert!(outcome.status.is_none());
    }

    #[test]
    fn test_handle_write_response_bytes() {
        let outcome = handle_write(ControlSession::default(), &[0x00], ControlPolicy::Regrant).unwrap();
        assert_eq!(&outcome.response.to_bytes()[..], &[0x80, 0x00, 0x01]);
        assert!(outcome.transition.session.has_control());
    }

    #[test]
    fn test_handle_write_undersized() {
        let controlled = ControlSession::new(ControlState::Stopped);
        let outcome = handle_write(controlled, &[0x05, 0x64], ControlPolicy::Regrant).unwrap();
        assert_eq!(
            outcome.response,
            ControlResponse::new(OpCode::SetTargetPower as u8, ResultCode::InvalidParameter)
        );
        assert_eq!(outcome.transition.session, controlled);
        assert!(outcome.transition.command.is_none());

        assert!(handle_write(controlled, &[], ControlPolicy::Regrant).is_none());
    }
}
