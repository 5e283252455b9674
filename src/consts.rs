use std::time::Duration;

pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";

pub const REALTIME_URL: &str = "https://api.openai.com/v1/realtime";
pub const TOKEN_URL: &str = "https://api.openai.com/v1/realtime/sessions";
pub const DEFAULT_MODEL: &str = "gpt-4o-realtime-preview-2024-12-17";
pub const DEFAULT_STUN_URL: &str = "stun:stun.l.google.com:19302";
pub const DATA_CHANNEL_LABEL: &str = "oai-events";

pub const AUTHORIZATION_HEADER: &str = "Authorization";
pub const CONTENT_TYPE_HEADER: &str = "Content-Type";
pub const SDP_CONTENT_TYPE: &str = "application/sdp";

pub const CAPTURE_BUDGET_SECS: u32 = 10;
pub const CAPTURE_TICK: Duration = Duration::from_secs(1);
pub const SILENCE_TIMEOUT: Duration = Duration::from_millis(1000);
pub const TERMINAL_GRACE: Duration = Duration::from_millis(500);
pub const SESSION_UPDATE_DELAY: Duration = Duration::from_millis(500);
pub const SEED_DELAY: Duration = Duration::from_millis(1000);
pub const ICE_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const ICE_GATHERING_TIMEOUT: Duration = Duration::from_secs(5);
pub const RECONNECT_DELAY: Duration = Duration::from_secs(2);
pub const CHANNEL_CAPACITY: usize = 1024;

pub const DEFAULT_INSTRUCTIONS: &str =
    "You are a friendly voice assistant. Keep every reply short, warm and conversational.";

pub const SEED_PHRASES: &[&str] = &[
    "Hello!",
    "Hi there, are you listening?",
    "Hey, let's talk.",
    "Good to hear you. Shall we start?",
];
