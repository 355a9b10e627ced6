use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    control,
    gatt::CharacteristicId,
    protocol::{
        encode_cycling_power_measurement, encode_heart_rate_measurement, encode_indoor_bike_data,
        encode_steering_angle, ControlResponse,
    },
    steering,
    types::{Command, CommandRecord, ControlSession, Event, TrainerConfig},
};

/// Channel end a transport registers to receive one characteristic's notifications
pub type Subscriber = mpsc::UnboundedSender<Bytes>;

/// One emulated trainer and the session it shares with every connected central
///
/// `Trainer` is a cheap handle: clones share the same session. Telemetry updates,
/// control-point writes, steering writes and the liveness timer all serialize on one
/// lock, so no two of them ever interleave.
///
/// # Examples
///
/// ```no_run
/// use virtual_trainer::{CharacteristicId, Event, Trainer, TrainerConfig};
///
/// #[tokio::main]
/// async fn main() {
///     let trainer = Trainer::new(TrainerConfig::default());
///
///     let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
///     trainer.subscribe(CharacteristicId::IndoorBikeData, tx).await;
///
///     trainer
///         .update(Event {
///             watts: Some(180),
///             cadence: Some(88),
///             ..Default::default()
///         })
///         .await;
///
///     if let Some(notification) = rx.recv().await {
///         println!("Indoor bike data: {notification:02X?}");
///     }
/// }
/// ```
#[derive(Clone)]
pub struct Trainer {
    config: Arc<TrainerConfig>,
    state: Arc<Mutex<SessionState>>,
}

#[derive(Default)]
struct SessionState {
    control: ControlSession,
    commands: VecDeque<Command>,
    subscribers: HashMap<CharacteristicId, Subscriber>,
    last_event: Option<Event>,
    liveness: Option<LivenessTimer>,
    generation: u64,
}

/// Owned token for the one pending liveness callback
struct LivenessTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

impl SessionState {
    fn deliver(&mut self, id: CharacteristicId, payload: Bytes) {
        let Some(subscriber) = self.subscribers.get(&id) else {
            debug!("No subscriber for {id}, dropping {payload:02X?}");
            return;
        };

        debug!("{id} <- {payload:02X?}");
        if subscriber.send(payload).is_err() {
            warn!("Subscriber for {id} went away, unsubscribing");
            self.subscribers.remove(&id);
        }
    }

    fn deliver_optional(&mut self, id: CharacteristicId, payload: Option<Bytes>) {
        if let Some(payload) = payload {
            self.deliver(id, payload);
        }
    }

    fn cancel_liveness(&mut self) {
        if let Some(timer) = self.liveness.take() {
            timer.handle.abort();
        }
    }
}

impl Trainer {
    /// Create a trainer with its own session
    #[must_use]
    pub fn new(config: TrainerConfig) -> Self {
        info!("Creating virtual trainer '{}'", config.device_name);
        Self {
            config: Arc::new(config),
            state: Arc::new(Mutex::new(SessionState::default())),
        }
    }

    /// Trainer configuration
    #[must_use]
    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Accept a telemetry event
    ///
    /// The event is encoded for every subscribed measurement characteristic and the
    /// liveness timer is re-armed, unless the event is a stop event.
    pub async fn update(&self, event: Event) {
        let mut state = self.state.lock().await;
        self.accept(&mut state, event);
    }

    /// Feed every event of a stream into [`Trainer::update`] until the stream ends
    pub async fn run<S>(&self, mut events: S)
    where
        S: Stream<Item = Event> + Unpin,
    {
        while let Some(event) = events.next().await {
            self.update(event).await;
        }
        info!("Telemetry source closed");
    }

    /// Handle a write on the Fitness Machine Control Point
    ///
    /// The write itself is always acknowledged by the transport. The returned response
    /// has already been indicated to the control-point subscriber if there is one, and
    /// dropped otherwise. Returns `None` for an empty write.
    pub async fn write_control_point(&self, data: &[u8]) -> Option<ControlResponse> {
        let mut state = self.state.lock().await;
        let outcome = control::handle_write(state.control, data, self.config.control_policy)?;

        state.control = outcome.transition.session;
        if let Some(command) = outcome.transition.command {
            debug!("Queueing {command:?}");
            state.commands.push_back(command);
        }
        if let Some(status) = outcome.transition.status {
            state.deliver(CharacteristicId::FitnessMachineStatus, status.to_bytes());
        }
        state.deliver(
            CharacteristicId::FitnessMachineControlPoint,
            outcome.response.to_bytes(),
        );

        Some(outcome.response)
    }

    /// Handle a write on the steering Rx characteristic
    ///
    /// Returns the answer, which has been indicated on Tx if a central subscribed to it.
    pub async fn write_steering(&self, data: &[u8]) -> Option<Bytes> {
        let mut state = self.state.lock().await;
        let answer = steering::respond(data)?;
        state.deliver(CharacteristicId::SteeringTx, answer.clone());
        Some(answer)
    }

    /// Register the subscriber for a characteristic, replacing any previous one
    pub async fn subscribe(&self, id: CharacteristicId, subscriber: Subscriber) {
        let mut state = self.state.lock().await;
        info!("Subscribed to {id}");
        state.subscribers.insert(id, subscriber);

        if id == CharacteristicId::SteeringTx {
            state.deliver(id, steering::greeting());
        }
    }

    /// Remove the subscriber for a characteristic
    pub async fn unsubscribe(&self, id: CharacteristicId) {
        let mut state = self.state.lock().await;
        if state.subscribers.remove(&id).is_some() {
            info!("Unsubscribed from {id}");
        }
    }

    /// Whether a characteristic currently has a live subscriber
    pub async fn is_subscribed(&self, id: CharacteristicId) -> bool {
        self.state
            .lock()
            .await
            .subscribers
            .get(&id)
            .is_some_and(|subscriber| !subscriber.is_closed())
    }

    /// Take the oldest command queued by the control point
    pub async fn poll_command(&self) -> Option<Command> {
        self.state.lock().await.commands.pop_front()
    }

    /// Take the oldest command as a record, empty when nothing is queued
    pub async fn next_command_record(&self) -> CommandRecord {
        CommandRecord(self.poll_command().await)
    }

    /// Number of commands waiting for the training application
    pub async fn pending_commands(&self) -> usize {
        self.state.lock().await.commands.len()
    }

    /// Current control-point session
    pub async fn control_session(&self) -> ControlSession {
        self.state.lock().await.control
    }

    /// Most recently accepted event, synthesized stop events included
    pub async fn last_event(&self) -> Option<Event> {
        self.state.lock().await.last_event.clone()
    }

    /// Whether a liveness callback is pending
    pub async fn is_liveness_armed(&self) -> bool {
        self.state.lock().await.liveness.is_some()
    }

    /// Cancel the pending liveness callback, if any
    pub async fn shutdown(&self) {
        self.state.lock().await.cancel_liveness();
        info!("Trainer '{}' shut down", self.config.device_name);
    }

    fn accept(&self, state: &mut SessionState, event: Event) {
        debug!("Accepting {event:?}");
        state.cancel_liveness();

        let now_ms = unix_millis();
        state.deliver_optional(
            CharacteristicId::CyclingPowerMeasurement,
            encode_cycling_power_measurement(&event, now_ms),
        );
        state.deliver_optional(
            CharacteristicId::IndoorBikeData,
            encode_indoor_bike_data(&event),
        );
        state.deliver_optional(
            CharacteristicId::HeartRateMeasurement,
            encode_heart_rate_measurement(&event),
        );
        state.deliver_optional(
            CharacteristicId::SteeringAngle,
            encode_steering_angle(&event),
        );

        if !event.is_stop() {
            self.arm_liveness(state);
        }
        state.last_event = Some(event);
    }

    fn arm_liveness(&self, state: &mut SessionState) {
        state.generation = state.generation.wrapping_add(1);
        let generation = state.generation;
        let timeout = self.config.liveness_timeout();
        let trainer = self.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            trainer.liveness_expired(generation).await;
        });

        state.liveness = Some(LivenessTimer { generation, handle });
    }

    async fn liveness_expired(&self, generation: u64) {
        let mut state = self.state.lock().await;
        match &state.liveness {
            Some(timer) if timer.generation == generation => {}
            _ => {
                debug!("Liveness timer {generation} superseded");
                return;
            }
        }
        state.liveness = None;

        info!(
            "No telemetry for {} ms, sending stop",
            self.config.liveness_timeout_ms
        );
        self.accept(&mut state, Event::stopped());
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
        })
}
