//! Session controller.
//!
//! A single task owns every piece of session state and serializes all of its
//! inputs: host commands from [`SessionHandle`], transport events, timer
//! firings and the result of the start sequence. Transitions run to
//! completion before the next input is taken, so nothing can interleave.

use std::fmt;
use std::sync::Arc;

use rand::seq::SliceRandom;
use realtime_voice_types::events::client::{
    ConversationItemCreateEvent, ResponseCreateEvent, SessionUpdateEvent,
};
use realtime_voice_types::{ClientEvent, Item, MessageItem, MessageRole};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::consts::CAPTURE_TICK;
use crate::error::{Error, Result};
use crate::reassembler::{Reassembler, Reassembly};
use crate::token::TokenProvider;
use crate::transport::{ConnectivityState, EventSink, Negotiator, Transport, TransportEvent};

mod observer;
mod state;
mod timers;

pub use observer::SessionObserver;
pub use state::{Affordance, ConnectionState, Status};
use timers::{TimerKind, Timers};

const DISCONNECTED_LABEL: &str = "disconnected";

/// Everything the controller task reacts to besides host commands.
pub(crate) enum Input {
    Transport { epoch: u64, event: TransportEvent },
    Timer { epoch: u64, kind: TimerKind, id: u64 },
    Opened { epoch: u64, result: Result<Box<dyn Transport>> },
}

impl fmt::Debug for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Input::Transport { epoch, event } => f
                .debug_struct("Transport")
                .field("epoch", epoch)
                .field("event", event)
                .finish(),
            Input::Timer { epoch, kind, id } => f
                .debug_struct("Timer")
                .field("epoch", epoch)
                .field("kind", kind)
                .field("id", id)
                .finish(),
            Input::Opened { epoch, result } => f
                .debug_struct("Opened")
                .field("epoch", epoch)
                .field("ok", &result.is_ok())
                .finish(),
        }
    }
}

enum Command {
    Start,
    Stop,
    Shutdown(oneshot::Sender<()>),
}

/// Host side of a running controller.
///
/// Dropping the handle disposes the controller: any session is torn down and
/// no timers or connections are left behind.
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<Status>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Starts a session, tearing down the active one first.
    ///
    /// Quota is the host's concern and must be checked before calling this.
    pub async fn start(&self) -> Result<()> {
        self.commands.send(Command::Start).await.map_err(|_| Error::ControllerGone)
    }

    pub async fn stop(&self) -> Result<()> {
        self.commands.send(Command::Stop).await.map_err(|_| Error::ControllerGone)
    }

    pub fn status(&self) -> watch::Receiver<Status> {
        self.status.clone()
    }

    pub fn current_status(&self) -> Status {
        self.status.borrow().clone()
    }

    /// Tears down and waits for the controller task to exit.
    pub async fn shutdown(self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.commands
            .send(Command::Shutdown(done_tx))
            .await
            .map_err(|_| Error::ControllerGone)?;
        done_rx.await.map_err(|_| Error::ControllerGone)?;
        self.task.await.map_err(|_| Error::ControllerGone)
    }
}

pub struct SessionController {
    config: Arc<Config>,
    tokens: Arc<dyn TokenProvider>,
    negotiator: Arc<dyn Negotiator>,
    observer: Arc<dyn SessionObserver>,
    inputs: mpsc::Sender<Input>,
    timers: Timers,
    status: watch::Sender<Status>,
    epoch: u64,
    state: ConnectionState,
    transport: Option<Box<dyn Transport>>,
    channel_open: bool,
    started: bool,
    remaining: u32,
    reassembler: Reassembler,
}

impl SessionController {
    /// Spawns the controller task on the current runtime.
    pub fn spawn(
        config: Config,
        tokens: Arc<dyn TokenProvider>,
        negotiator: Arc<dyn Negotiator>,
        observer: Arc<dyn SessionObserver>,
    ) -> SessionHandle {
        let (command_tx, command_rx) = mpsc::channel(config.capacity());
        let (input_tx, input_rx) = mpsc::channel(config.capacity());
        let (status_tx, status_rx) = watch::channel(Status::from(ConnectionState::Idle));

        let controller = SessionController {
            remaining: config.capture_budget_secs(),
            config: Arc::new(config),
            tokens,
            negotiator,
            observer,
            inputs: input_tx.clone(),
            timers: Timers::new(input_tx),
            status: status_tx,
            epoch: 0,
            state: ConnectionState::Idle,
            transport: None,
            channel_open: false,
            started: false,
            reassembler: Reassembler::new(),
        };
        let task = tokio::spawn(controller.run(command_rx, input_rx));

        SessionHandle {
            commands: command_tx,
            status: status_rx,
            task,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut inputs: mpsc::Receiver<Input>,
    ) {
        loop {
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(Command::Start) => self.start().await,
                    Some(Command::Stop) => self.stop().await,
                    Some(Command::Shutdown(done)) => {
                        self.dispose().await;
                        let _ = done.send(());
                        break;
                    }
                    None => {
                        tracing::debug!("Session handle dropped");
                        self.dispose().await;
                        break;
                    }
                },
                Some(input) = inputs.recv() => self.handle(input).await,
            }
        }
        tracing::debug!("Session controller stopped");
    }

    async fn handle(&mut self, input: Input) {
        match input {
            Input::Opened { epoch, result } => self.on_opened(epoch, result).await,
            Input::Transport { epoch, event } => {
                if epoch != self.epoch {
                    tracing::debug!(
                        epoch,
                        current = self.epoch,
                        "Dropping stale transport event: {:?}",
                        event
                    );
                    return;
                }
                self.on_transport(event).await;
            }
            Input::Timer { epoch, kind, id } => {
                if epoch != self.epoch || !self.timers.fired(kind, id) {
                    tracing::debug!(epoch, id, "Dropping superseded timer: {:?}", kind);
                    return;
                }
                self.on_timer(kind).await;
            }
        }
    }

    async fn start(&mut self) {
        if self.state.is_active() {
            tracing::info!(
                state = ?self.state,
                "Start requested while active, closing current session"
            );
            self.teardown(ConnectionState::Closed.into()).await;
        }
        self.timers.cancel_all();

        self.epoch += 1;
        self.reassembler.reset();
        self.channel_open = false;
        self.started = false;
        self.remaining = self.config.capture_budget_secs();
        self.set_state(ConnectionState::Connecting);
        tracing::info!(epoch = self.epoch, "Session connecting");

        let epoch = self.epoch;
        let sink = EventSink::new(epoch, self.inputs.clone());
        let inputs = self.inputs.clone();
        let tokens = self.tokens.clone();
        let negotiator = self.negotiator.clone();
        tokio::spawn(async move {
            let result = match tokens.fetch_token().await {
                Ok(credential) => negotiator.open(credential, sink).await,
                Err(e) => Err(e),
            };
            if let Err(mpsc::error::SendError(Input::Opened { result: Ok(mut transport), .. })) =
                inputs.send(Input::Opened { epoch, result }).await
            {
                tracing::debug!("Controller gone before transport opened, closing it");
                transport.close().await;
            }
        });
    }

    async fn stop(&mut self) {
        if self.state.is_active() {
            tracing::info!(state = ?self.state, "Stop requested");
            self.teardown(ConnectionState::Closed.into()).await;
        } else {
            tracing::debug!(state = ?self.state, "Stop requested with no active session");
        }
        self.timers.cancel_all();
    }

    async fn dispose(&mut self) {
        tracing::debug!(pending_timers = self.timers.pending(), "Disposing session controller");
        if self.state.is_active() {
            self.teardown(ConnectionState::Closed.into()).await;
        }
        self.timers.cancel_all();
    }

    async fn on_opened(&mut self, epoch: u64, result: Result<Box<dyn Transport>>) {
        if epoch != self.epoch || self.state != ConnectionState::Connecting {
            if let Ok(mut transport) = result {
                tracing::debug!(epoch, "Closing transport of an abandoned start");
                transport.close().await;
            }
            return;
        }

        match result {
            Ok(transport) => {
                self.transport = Some(transport);
                if self.channel_open {
                    self.go_live();
                }
            }
            Err(e) => self.fail(e).await,
        }
    }

    async fn on_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::ChannelOpen => {
                self.channel_open = true;
                if self.state == ConnectionState::Connecting && self.transport.is_some() {
                    self.go_live();
                }
            }
            TransportEvent::Message(raw) => self.on_message(&raw),
            TransportEvent::Connectivity(connectivity) => {
                tracing::info!(state = connectivity.label(), "Connectivity changed");
                if connectivity.is_lost() {
                    self.on_lost(connectivity).await;
                }
            }
            TransportEvent::ChannelClosed => {
                if self.state.is_active() {
                    self.on_lost(ConnectivityState::Closed).await;
                }
            }
        }
    }

    fn on_message(&mut self, raw: &str) {
        if !matches!(self.state, ConnectionState::Live | ConnectionState::Responding) {
            tracing::debug!(state = ?self.state, "Ignoring event outside a live session");
            return;
        }

        match self.reassembler.on_event(raw) {
            Ok(Reassembly::Appended { terminal }) => {
                self.begin_responding();
                self.timers.arm(self.epoch, TimerKind::Silence, self.config.silence_timeout());
                if terminal {
                    let grace = self.config.terminal_grace();
                    self.timers.arm_once(self.epoch, TimerKind::TerminalGrace, grace);
                }
            }
            Ok(Reassembly::Terminal) => {
                if self.reassembler.has_pending() {
                    let grace = self.config.terminal_grace();
                    self.timers.arm_once(self.epoch, TimerKind::TerminalGrace, grace);
                } else {
                    tracing::debug!("Terminal marker with nothing buffered");
                }
            }
            Ok(Reassembly::Echo | Reassembly::Ignored | Reassembly::Duplicate) => {}
            Err(e) => tracing::warn!("Dropping malformed event: {}", e),
        }
    }

    async fn on_lost(&mut self, connectivity: ConnectivityState) {
        match self.state {
            ConnectionState::Live | ConnectionState::Responding => {
                tracing::warn!(state = connectivity.label(), "Connection lost");
                self.teardown(Status::new(ConnectionState::Closed, DISCONNECTED_LABEL)).await;
                if self.config.auto_reconnect() {
                    tracing::info!("Reconnecting in {:?}", self.config.reconnect_delay());
                    self.timers
                        .arm(self.epoch, TimerKind::Reconnect, self.config.reconnect_delay());
                }
            }
            ConnectionState::Connecting if self.transport.is_some() => {
                let reason =
                    format!("connection {} before the session went live", connectivity.label());
                self.fail(Error::TransportDisconnect(reason)).await;
            }
            _ => {}
        }
    }

    async fn on_timer(&mut self, kind: TimerKind) {
        match kind {
            TimerKind::CaptureTick => {
                if self.state != ConnectionState::Live {
                    return;
                }
                self.remaining = self.remaining.saturating_sub(1);
                if self.remaining == 0 {
                    tracing::info!("Capture budget exhausted");
                    self.begin_responding();
                    self.timers.arm(self.epoch, TimerKind::Silence, self.config.silence_timeout());
                } else {
                    self.publish();
                    self.timers.arm(self.epoch, TimerKind::CaptureTick, CAPTURE_TICK);
                }
            }
            TimerKind::Silence => self.complete("silence").await,
            TimerKind::TerminalGrace => self.complete("terminal marker").await,
            TimerKind::ConfigureSession => {
                let update = SessionUpdateEvent::new(self.config.session().clone());
                let event = ClientEvent::SessionUpdate(update);
                self.send(event).await;
            }
            TimerKind::SeedConversation => self.seed_conversation().await,
            TimerKind::Reconnect => {
                if !self.state.is_active() {
                    tracing::info!("Reconnecting");
                    self.start().await;
                }
            }
        }
    }

    fn go_live(&mut self) {
        self.remaining = self.config.capture_budget_secs();
        self.set_state(ConnectionState::Live);
        tracing::info!(epoch = self.epoch, "Session live");

        self.timers.arm(self.epoch, TimerKind::CaptureTick, CAPTURE_TICK);
        self.timers
            .arm(self.epoch, TimerKind::ConfigureSession, self.config.session_update_delay());
        self.timers
            .arm(self.epoch, TimerKind::SeedConversation, self.config.seed_delay());

        self.started = true;
        self.observer.on_start();
    }

    /// Turn end: capture stops, the transport stays open for the response.
    fn begin_responding(&mut self) {
        if self.state != ConnectionState::Live {
            return;
        }
        self.timers.cancel(TimerKind::CaptureTick);
        if let Some(transport) = self.transport.as_mut().filter(|t| t.is_capturing()) {
            transport.stop_capture();
        }
        self.set_state(ConnectionState::Responding);
        tracing::info!("Assistant responding, capture stopped");
    }

    async fn complete(&mut self, trigger: &str) {
        if !matches!(self.state, ConnectionState::Live | ConnectionState::Responding) {
            return;
        }
        tracing::info!(trigger, "Response complete");
        self.timers.cancel(TimerKind::Silence);
        self.timers.cancel(TimerKind::TerminalGrace);
        self.deliver();
        self.teardown(ConnectionState::Closed.into()).await;
    }

    fn deliver(&mut self) {
        if let Some(message) = self.reassembler.take_message() {
            tracing::info!("Delivering response: {:?}", message);
            self.observer.on_message(message);
        }
    }

    async fn seed_conversation(&mut self) {
        let Some(phrase) = self.pick_seed_phrase() else {
            return;
        };
        tracing::debug!("Seeding conversation with {:?}", phrase);

        let item = MessageItem::builder()
            .with_role(MessageRole::User)
            .with_input_text(&phrase)
            .build();
        let create = ConversationItemCreateEvent::new(Item::Message(item));
        let item_event = ClientEvent::ConversationItemCreate(create);
        if self.send(item_event).await {
            self.send(ClientEvent::ResponseCreate(ResponseCreateEvent::new())).await;
        }
    }

    fn pick_seed_phrase(&self) -> Option<String> {
        self.config.seed_phrases().choose(&mut rand::thread_rng()).cloned()
    }

    /// Writes one control message. Failures are logged; connectivity loss is
    /// reported separately by the transport.
    async fn send(&mut self, event: ClientEvent) -> bool {
        let Some(transport) = self.transport.as_mut() else {
            tracing::debug!(
                event_type = event.event_type(),
                "No transport, dropping outbound event"
            );
            return false;
        };
        let text = match serde_json::to_string(&event) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("failed to serialize event: {}", e);
                return false;
            }
        };
        tracing::debug!(event_type = event.event_type(), "Sending event");
        match transport.send(text).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(event_type = event.event_type(), "failed to send event: {}", e);
                false
            }
        }
    }

    async fn fail(&mut self, error: Error) {
        tracing::error!(epoch = self.epoch, "Session failed: {}", error);
        self.teardown(Status::from(ConnectionState::Error).with_error(error.user_message()))
            .await;
    }

    /// Releases everything the session holds. Safe to call repeatedly; only the
    /// first call after a session became active does any work.
    async fn teardown(&mut self, status: Status) {
        self.timers.cancel_all();
        if !self.state.is_active() && self.transport.is_none() {
            return;
        }

        self.epoch += 1;
        self.deliver();
        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
        }
        self.channel_open = false;
        self.state = status.state();
        tracing::info!(state = ?self.state, label = status.label(), "Session closed");
        self.status.send_replace(status);

        if std::mem::take(&mut self.started) {
            self.observer.on_stop();
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        self.publish();
    }

    fn publish(&self) {
        let mut status = Status::new(self.state, self.state.label());
        if self.state == ConnectionState::Live {
            status = status.with_remaining_seconds(self.remaining);
        }
        self.status.send_replace(status);
    }
}
