use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mockall::mock;
use realtime_voice::{
    Config, ConnectionState, ConnectivityState, Error, EventSink, Negotiator, Result,
    SessionController, SessionHandle, SessionObserver, StaticTokenProvider, Status, TokenProvider,
    Transport, TransportEvent,
};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq)]
enum Callback {
    Start,
    Stop,
    Message(String),
}

#[derive(Default)]
struct RecordingObserver {
    calls: Mutex<Vec<Callback>>,
}

impl RecordingObserver {
    fn calls(&self) -> Vec<Callback> {
        self.calls.lock().unwrap().clone()
    }

    fn messages(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Callback::Message(text) => Some(text),
                _ => None,
            })
            .collect()
    }
}

impl SessionObserver for RecordingObserver {
    fn on_start(&self) {
        self.calls.lock().unwrap().push(Callback::Start);
    }

    fn on_stop(&self) {
        self.calls.lock().unwrap().push(Callback::Stop);
    }

    fn on_message(&self, text: String) {
        self.calls.lock().unwrap().push(Callback::Message(text));
    }
}

#[derive(Debug)]
struct Wire {
    sent: Vec<String>,
    capturing: bool,
    stop_calls: usize,
    closes: usize,
}

struct FakeTransport {
    wire: Arc<Mutex<Wire>>,
    update_delay: Duration,
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&mut self, text: String) -> Result<()> {
        if text.contains("\"session.update\"") {
            tokio::time::sleep(self.update_delay).await;
        }
        self.wire.lock().unwrap().sent.push(text);
        Ok(())
    }

    fn stop_capture(&mut self) {
        let mut wire = self.wire.lock().unwrap();
        wire.capturing = false;
        wire.stop_calls += 1;
    }

    fn is_capturing(&self) -> bool {
        self.wire.lock().unwrap().capturing
    }

    async fn close(&mut self) {
        let mut wire = self.wire.lock().unwrap();
        wire.capturing = false;
        wire.closes += 1;
    }
}

struct Connection {
    credential: String,
    sink: EventSink,
    wire: Arc<Mutex<Wire>>,
}

/// Opens in-memory transports, or fails with the configured error.
struct FakeNegotiator {
    failure: Option<fn() -> Error>,
    open_delay: Duration,
    update_delay: Duration,
    connections: Mutex<Vec<Connection>>,
}

impl FakeNegotiator {
    fn new() -> Self {
        Self {
            failure: None,
            open_delay: Duration::ZERO,
            update_delay: Duration::ZERO,
            connections: Mutex::new(Vec::new()),
        }
    }

    fn failing(failure: fn() -> Error) -> Self {
        Self {
            failure: Some(failure),
            ..Self::new()
        }
    }

    fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    /// Transports opened from now on stall this long sending `session.update`.
    fn with_update_delay(mut self, delay: Duration) -> Self {
        self.update_delay = delay;
        self
    }

    fn opened(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    fn sink(&self, index: usize) -> EventSink {
        self.connections.lock().unwrap()[index].sink.clone()
    }

    fn wire(&self, index: usize) -> Arc<Mutex<Wire>> {
        self.connections.lock().unwrap()[index].wire.clone()
    }

    fn sent_types(&self, index: usize) -> Vec<String> {
        let wire = self.wire(index);
        let wire = wire.lock().unwrap();
        wire.sent
            .iter()
            .map(|text| {
                let value: Value = serde_json::from_str(text).unwrap();
                value["type"].as_str().unwrap().to_string()
            })
            .collect()
    }
}

#[async_trait]
impl Negotiator for FakeNegotiator {
    async fn open(&self, credential: SecretString, sink: EventSink) -> Result<Box<dyn Transport>> {
        if let Some(failure) = self.failure {
            return Err(failure());
        }
        tokio::time::sleep(self.open_delay).await;

        let wire = Arc::new(Mutex::new(Wire {
            sent: Vec::new(),
            capturing: true,
            stop_calls: 0,
            closes: 0,
        }));
        sink.emit(TransportEvent::ChannelOpen).await;
        self.connections.lock().unwrap().push(Connection {
            credential: credential.expose_secret().to_string(),
            sink,
            wire: wire.clone(),
        });
        Ok(Box::new(FakeTransport {
            wire,
            update_delay: self.update_delay,
        }))
    }
}

mock! {
    pub Tokens {}
    #[async_trait]
    impl TokenProvider for Tokens {
        async fn fetch_token(&self) -> Result<SecretString>;
    }
}

struct Harness {
    handle: SessionHandle,
    status: watch::Receiver<Status>,
    negotiator: Arc<FakeNegotiator>,
    observer: Arc<RecordingObserver>,
}

impl Harness {
    fn new(negotiator: FakeNegotiator) -> Self {
        Self::with_config(negotiator, Config::builder().with_api_key("sk-test").build().unwrap())
    }

    fn with_config(negotiator: FakeNegotiator, config: Config) -> Self {
        let tokens = Arc::new(StaticTokenProvider::new(SecretString::from("ek_test".to_string())));
        Self::with_tokens(negotiator, config, tokens)
    }

    fn with_tokens(
        negotiator: FakeNegotiator,
        config: Config,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        let negotiator = Arc::new(negotiator);
        let observer = Arc::new(RecordingObserver::default());
        let handle = SessionController::spawn(config, tokens, negotiator.clone(), observer.clone());
        let status = handle.status();
        Self {
            handle,
            status,
            negotiator,
            observer,
        }
    }

    async fn wait_for(&mut self, state: ConnectionState) -> Status {
        self.status.wait_for(|status| status.state() == state).await.unwrap().clone()
    }

    async fn start_live(&mut self) -> EventSink {
        self.handle.start().await.unwrap();
        self.wait_for(ConnectionState::Live).await;
        self.negotiator.sink(self.negotiator.opened() - 1)
    }
}

fn delta(text: &str) -> TransportEvent {
    let event = json!({"type": "response.audio_transcript.delta", "delta": text});
    TransportEvent::Message(event.to_string())
}

#[tokio::test(start_paused = true)]
async fn fragments_are_delivered_once_after_silence() {
    let mut harness = Harness::new(FakeNegotiator::new());
    let sink = harness.start_live().await;
    assert_eq!(harness.negotiator.connections.lock().unwrap()[0].credential, "ek_test");

    // Session configuration, then the seed utterance and a response request.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(
        harness.negotiator.sent_types(0),
        vec!["session.update", "conversation.item.create", "response.create"]
    );

    for fragment in ["Wo", "of", "!"] {
        sink.emit(delta(fragment)).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    let last_fragment = Instant::now() - Duration::from_millis(200);
    assert_eq!(harness.handle.current_status().state(), ConnectionState::Responding);
    assert!(!harness.negotiator.wire(0).lock().unwrap().capturing);
    assert_eq!(harness.negotiator.wire(0).lock().unwrap().stop_calls, 1);

    harness.wait_for(ConnectionState::Closed).await;
    assert!(last_fragment.elapsed() >= Duration::from_secs(1));

    assert_eq!(
        harness.observer.calls(),
        vec![Callback::Start, Callback::Message("Woof!".to_string()), Callback::Stop]
    );
    assert_eq!(harness.negotiator.wire(0).lock().unwrap().closes, 1);
}

#[tokio::test(start_paused = true)]
async fn seed_utterance_is_a_user_message() {
    let mut harness = Harness::new(FakeNegotiator::new());
    harness.start_live().await;
    tokio::time::sleep(Duration::from_millis(1100)).await;

    let wire = harness.negotiator.wire(0);
    let wire = wire.lock().unwrap();
    let update: Value = serde_json::from_str(&wire.sent[0]).unwrap();
    assert_eq!(update["session"]["modalities"], json!(["text", "audio"]));
    assert!(update["session"]["instructions"].is_string());

    let seed: Value = serde_json::from_str(&wire.sent[1]).unwrap();
    assert_eq!(seed["item"]["role"], "user");
    assert_eq!(seed["item"]["type"], "message");
    assert_eq!(seed["item"]["content"][0]["type"], "input_text");
    assert!(!seed["item"]["content"][0]["text"].as_str().unwrap().is_empty());

    let response: Value = serde_json::from_str(&wire.sent[2]).unwrap();
    assert_eq!(response, json!({"type": "response.create", "response": {}}));
}

#[tokio::test(start_paused = true)]
async fn terminal_marker_preempts_silence_timer() {
    let mut harness = Harness::new(FakeNegotiator::new());
    let sink = harness.start_live().await;

    sink.emit(delta("Hello there.")).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let marked = Instant::now();
    sink.emit(TransportEvent::Message(json!({"type": "response.end"}).to_string()))
        .await;

    harness.wait_for(ConnectionState::Closed).await;
    let waited = marked.elapsed();
    assert!(waited >= Duration::from_millis(500));
    assert!(waited < Duration::from_secs(1));
    assert_eq!(harness.observer.messages(), vec!["Hello there.".to_string()]);

    // The cancelled silence timer must not deliver again.
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(harness.observer.messages().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_before_response_tears_down_once() {
    let mut harness = Harness::new(FakeNegotiator::new());
    harness.start_live().await;

    harness.handle.stop().await.unwrap();
    harness.wait_for(ConnectionState::Closed).await;
    harness.handle.stop().await.unwrap();

    // No timer survives: nothing is sent and the state never changes again.
    tokio::time::sleep(Duration::from_secs(30)).await;
    let wire = harness.negotiator.wire(0);
    assert_eq!(wire.lock().unwrap().closes, 1);
    assert!(wire.lock().unwrap().sent.is_empty());
    assert_eq!(harness.handle.current_status().state(), ConnectionState::Closed);
    assert_eq!(harness.observer.calls(), vec![Callback::Start, Callback::Stop]);
}

#[tokio::test(start_paused = true)]
async fn capture_budget_forces_turn_end() {
    let mut harness = Harness::new(FakeNegotiator::new());
    harness.start_live().await;
    let went_live = Instant::now();
    assert_eq!(harness.handle.current_status().remaining_seconds(), Some(10));

    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert_eq!(harness.handle.current_status().remaining_seconds(), Some(7));

    let status = harness.wait_for(ConnectionState::Responding).await;
    assert!(went_live.elapsed() >= Duration::from_secs(10));
    assert!(status.is_generating());
    assert_eq!(status.remaining_seconds(), None);
    assert!(!harness.negotiator.wire(0).lock().unwrap().capturing);
    assert_eq!(harness.negotiator.wire(0).lock().unwrap().closes, 0);
}

#[tokio::test(start_paused = true)]
async fn silent_turn_closes_after_budget() {
    let mut harness = Harness::new(FakeNegotiator::new());
    harness.start_live().await;
    let went_live = Instant::now();

    harness.wait_for(ConnectionState::Responding).await;
    harness.wait_for(ConnectionState::Closed).await;
    assert!(went_live.elapsed() >= Duration::from_secs(11));
    assert!(went_live.elapsed() < Duration::from_secs(12));

    assert_eq!(harness.negotiator.wire(0).lock().unwrap().closes, 1);
    assert_eq!(harness.observer.calls(), vec![Callback::Start, Callback::Stop]);
}

#[tokio::test(start_paused = true)]
async fn turn_end_leaves_idle_capture_alone() {
    let mut harness = Harness::new(FakeNegotiator::new());
    let sink = harness.start_live().await;
    harness.negotiator.wire(0).lock().unwrap().capturing = false;

    sink.emit(delta("Already quiet")).await;
    harness.wait_for(ConnectionState::Responding).await;
    assert_eq!(harness.negotiator.wire(0).lock().unwrap().stop_calls, 0);
}

#[tokio::test(start_paused = true)]
async fn replaced_silence_timer_does_not_complete_early() {
    // The controller stalls on session.update while the first silence timer
    // fires, so that firing sits in the queue behind a newer fragment.
    let negotiator = FakeNegotiator::new().with_update_delay(Duration::from_millis(600));
    let mut harness = Harness::new(negotiator);
    let sink = harness.start_live().await;
    let went_live = Instant::now();

    sink.emit(delta("Alpha ")).await;
    tokio::time::sleep(Duration::from_millis(900)).await;
    sink.emit(delta("Beta ")).await;
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(harness.handle.current_status().state(), ConnectionState::Responding);
    sink.emit(delta("Gamma")).await;

    harness.wait_for(ConnectionState::Closed).await;
    assert!(went_live.elapsed() >= Duration::from_millis(2300));
    assert_eq!(harness.observer.messages(), vec!["Alpha Beta Gamma".to_string()]);
    assert_eq!(harness.negotiator.wire(0).lock().unwrap().closes, 1);
}

#[tokio::test(start_paused = true)]
async fn media_error_never_starts() {
    let negotiator = FakeNegotiator::failing(|| Error::Media("permission denied".to_string()));
    let mut harness = Harness::new(negotiator);
    harness.handle.start().await.unwrap();

    let status = harness.wait_for(ConnectionState::Error).await;
    assert_eq!(status.error(), Some("Microphone unavailable or permission denied"));
    assert_eq!(status.display_text(), "Microphone unavailable or permission denied");
    assert_eq!(harness.negotiator.opened(), 0);
    assert!(harness.observer.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn token_error_stops_before_negotiation() {
    let mut tokens = MockTokens::new();
    tokens
        .expect_fetch_token()
        .times(1)
        .returning(|| Err(Error::Token("endpoint unreachable".to_string())));

    let config = Config::builder().with_api_key("sk-test").build().unwrap();
    let mut harness = Harness::with_tokens(FakeNegotiator::new(), config, Arc::new(tokens));
    harness.handle.start().await.unwrap();

    let status = harness.wait_for(ConnectionState::Error).await;
    assert_eq!(status.display_text(), "Could not obtain a session credential");
    assert_eq!(harness.negotiator.opened(), 0);
    assert!(harness.observer.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn negotiation_error_surfaces_status_code() {
    let negotiator = FakeNegotiator::failing(|| Error::negotiation_status(401, "bad key"));
    let mut harness = Harness::new(negotiator);
    harness.handle.start().await.unwrap();

    let status = harness.wait_for(ConnectionState::Error).await;
    assert_eq!(status.error(), Some("Could not connect to the voice service (HTTP 401)"));
}

#[tokio::test(start_paused = true)]
async fn redelivered_events_are_ignored() {
    let mut harness = Harness::new(FakeNegotiator::new());
    let sink = harness.start_live().await;

    let event =
        json!({"type": "response.text.delta", "event_id": "evt_42", "delta": "Hi"}).to_string();
    sink.emit(TransportEvent::Message(event.clone())).await;
    sink.emit(TransportEvent::Message(event)).await;

    harness.wait_for(ConnectionState::Closed).await;
    assert_eq!(harness.observer.messages(), vec!["Hi".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn events_without_text_change_nothing() {
    let mut harness = Harness::new(FakeNegotiator::new());
    let sink = harness.start_live().await;

    let created = json!({"type": "session.created", "session": {}});
    sink.emit(TransportEvent::Message(created.to_string())).await;
    sink.emit(TransportEvent::Message("not json at all".to_string())).await;
    let echo = json!({
        "type": "conversation.item.created",
        "item": {"role": "user", "content": [{"text": "Hello!"}]}
    });
    sink.emit(TransportEvent::Message(echo.to_string())).await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(harness.handle.current_status().state(), ConnectionState::Live);
    assert!(harness.negotiator.wire(0).lock().unwrap().capturing);
    assert_eq!(harness.observer.calls(), vec![Callback::Start]);
}

#[tokio::test(start_paused = true)]
async fn connectivity_loss_flushes_buffered_response() {
    let mut harness = Harness::new(FakeNegotiator::new());
    let sink = harness.start_live().await;

    sink.emit(delta("Partial answer")).await;
    sink.emit(TransportEvent::Connectivity(ConnectivityState::Failed)).await;

    let status = harness.wait_for(ConnectionState::Closed).await;
    assert_eq!(status.display_text(), "disconnected");
    assert_eq!(
        harness.observer.calls(),
        vec![Callback::Start, Callback::Message("Partial answer".to_string()), Callback::Stop]
    );
    assert_eq!(harness.negotiator.wire(0).lock().unwrap().closes, 1);

    // Reconnect is opt-in.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(harness.negotiator.opened(), 1);
}

#[tokio::test(start_paused = true)]
async fn opt_in_reconnect_after_loss() {
    let config = Config::builder()
        .with_api_key("sk-test")
        .with_auto_reconnect(Duration::from_secs(2))
        .build()
        .unwrap();
    let mut harness = Harness::with_config(FakeNegotiator::new(), config);
    let sink = harness.start_live().await;

    sink.emit(TransportEvent::Connectivity(ConnectivityState::Disconnected)).await;
    harness.wait_for(ConnectionState::Closed).await;

    harness.wait_for(ConnectionState::Live).await;
    assert_eq!(harness.negotiator.opened(), 2);
    assert_eq!(harness.negotiator.wire(0).lock().unwrap().closes, 1);
    assert_eq!(
        harness.observer.calls(),
        vec![Callback::Start, Callback::Stop, Callback::Start]
    );
}

#[tokio::test(start_paused = true)]
async fn stale_events_from_a_previous_session_are_dropped() {
    let mut harness = Harness::new(FakeNegotiator::new());
    let old_sink = harness.start_live().await;

    // Restarting closes the first transport before opening the second.
    harness.handle.start().await.unwrap();
    while harness.negotiator.opened() < 2 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    harness.wait_for(ConnectionState::Live).await;
    assert_eq!(harness.negotiator.wire(0).lock().unwrap().closes, 1);
    assert_eq!(harness.negotiator.wire(1).lock().unwrap().closes, 0);

    old_sink.emit(delta("from the old session")).await;
    old_sink.emit(TransportEvent::Connectivity(ConnectivityState::Failed)).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(harness.handle.current_status().state(), ConnectionState::Live);
    assert!(harness.observer.messages().is_empty());
}

#[tokio::test(start_paused = true)]
async fn stop_while_connecting_closes_late_transport() {
    let mut harness = Harness::new(FakeNegotiator::new().with_open_delay(Duration::from_secs(1)));
    harness.handle.start().await.unwrap();
    harness.wait_for(ConnectionState::Connecting).await;
    harness.handle.stop().await.unwrap();
    harness.wait_for(ConnectionState::Closed).await;

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(harness.negotiator.opened(), 1);
    assert_eq!(harness.negotiator.wire(0).lock().unwrap().closes, 1);
    assert_eq!(harness.handle.current_status().state(), ConnectionState::Closed);
    assert!(harness.observer.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn dropping_the_handle_disposes_the_session() {
    let mut harness = Harness::new(FakeNegotiator::new());
    harness.start_live().await;

    let Harness {
        handle,
        negotiator,
        observer,
        ..
    } = harness;
    drop(handle);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(negotiator.wire(0).lock().unwrap().closes, 1);
    assert_eq!(observer.calls(), vec![Callback::Start, Callback::Stop]);
}

#[tokio::test(start_paused = true)]
async fn shutdown_waits_for_teardown() {
    let mut harness = Harness::new(FakeNegotiator::new());
    harness.start_live().await;

    let negotiator = harness.negotiator.clone();
    harness.handle.shutdown().await.unwrap();
    assert_eq!(negotiator.wire(0).lock().unwrap().closes, 1);
}
