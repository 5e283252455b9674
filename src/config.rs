//! Session configuration.
//!
//! Defaults mirror the behaviour of a single push-to-talk turn: ten seconds of
//! capture, one second of silence to close a response, half a second of grace
//! after an explicit terminal marker.

use std::env;
use std::time::Duration;

use realtime_voice_types::audio::Voice;
use realtime_voice_types::Session;
use secrecy::SecretString;

use crate::consts;
use crate::media::AudioConstraints;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value}")]
    InvalidVar { name: String, value: String },
    #[error("At least one seed phrase is required")]
    NoSeedPhrases,
    #[error("Capture budget must be at least one second")]
    ZeroCaptureBudget,
    #[error("Queue capacity must be at least one")]
    ZeroCapacity,
}

#[derive(Debug, Clone)]
pub struct Config {
    realtime_url: String,
    model: String,
    api_key: SecretString,
    token_url: String,
    stun_urls: Vec<String>,
    data_channel_label: String,
    input_device: Option<String>,
    constraints: AudioConstraints,
    session: Session,
    seed_phrases: Vec<String>,
    capture_budget_secs: u32,
    silence_timeout: Duration,
    terminal_grace: Duration,
    session_update_delay: Duration,
    seed_delay: Duration,
    ice_poll_interval: Duration,
    ice_gathering_timeout: Duration,
    auto_reconnect: bool,
    reconnect_delay: Duration,
    capacity: usize,
}

pub struct ConfigBuilder {
    config: Config,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::new(),
        }
    }

    pub fn with_realtime_url(mut self, realtime_url: &str) -> Self {
        self.config.realtime_url = realtime_url.to_string();
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.config.model = model.to_string();
        self
    }

    pub fn with_api_key(mut self, api_key: &str) -> Self {
        self.config.api_key = SecretString::from(api_key.to_string());
        self
    }

    pub fn with_token_url(mut self, token_url: &str) -> Self {
        self.config.token_url = token_url.to_string();
        self
    }

    pub fn with_stun_urls(mut self, stun_urls: Vec<String>) -> Self {
        self.config.stun_urls = stun_urls;
        self
    }

    pub fn with_data_channel_label(mut self, label: &str) -> Self {
        self.config.data_channel_label = label.to_string();
        self
    }

    pub fn with_input_device(mut self, device: &str) -> Self {
        self.config.input_device = Some(device.to_string());
        self
    }

    pub fn with_constraints(mut self, constraints: AudioConstraints) -> Self {
        self.config.constraints = constraints;
        self
    }

    pub fn with_session(mut self, session: Session) -> Self {
        self.config.session = session;
        self
    }

    pub fn with_seed_phrases(mut self, phrases: Vec<String>) -> Self {
        self.config.seed_phrases = phrases;
        self
    }

    pub fn with_capture_budget_secs(mut self, secs: u32) -> Self {
        self.config.capture_budget_secs = secs;
        self
    }

    pub fn with_silence_timeout(mut self, timeout: Duration) -> Self {
        self.config.silence_timeout = timeout;
        self
    }

    pub fn with_terminal_grace(mut self, grace: Duration) -> Self {
        self.config.terminal_grace = grace;
        self
    }

    pub fn with_session_update_delay(mut self, delay: Duration) -> Self {
        self.config.session_update_delay = delay;
        self
    }

    pub fn with_seed_delay(mut self, delay: Duration) -> Self {
        self.config.seed_delay = delay;
        self
    }

    pub fn with_ice_gathering(mut self, poll_interval: Duration, timeout: Duration) -> Self {
        self.config.ice_poll_interval = poll_interval;
        self.config.ice_gathering_timeout = timeout;
        self
    }

    pub fn with_auto_reconnect(mut self, delay: Duration) -> Self {
        self.config.auto_reconnect = true;
        self.config.reconnect_delay = delay;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.config.capacity = capacity;
        self
    }

    pub fn build(self) -> Result<Config, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            realtime_url: consts::REALTIME_URL.to_string(),
            model: consts::DEFAULT_MODEL.to_string(),
            api_key: env::var(consts::OPENAI_API_KEY).unwrap_or_default().into(),
            token_url: consts::TOKEN_URL.to_string(),
            stun_urls: vec![consts::DEFAULT_STUN_URL.to_string()],
            data_channel_label: consts::DATA_CHANNEL_LABEL.to_string(),
            input_device: None,
            constraints: AudioConstraints::default(),
            session: Session::new()
                .with_modalities_enable_audio()
                .with_voice(Voice::Verse)
                .with_temperature(0.8)
                .with_instructions(consts::DEFAULT_INSTRUCTIONS)
                .build(),
            seed_phrases: consts::SEED_PHRASES.iter().map(|s| s.to_string()).collect(),
            capture_budget_secs: consts::CAPTURE_BUDGET_SECS,
            silence_timeout: consts::SILENCE_TIMEOUT,
            terminal_grace: consts::TERMINAL_GRACE,
            session_update_delay: consts::SESSION_UPDATE_DELAY,
            seed_delay: consts::SEED_DELAY,
            ice_poll_interval: consts::ICE_POLL_INTERVAL,
            ice_gathering_timeout: consts::ICE_GATHERING_TIMEOUT,
            auto_reconnect: false,
            reconnect_delay: consts::RECONNECT_DELAY,
            capacity: consts::CHANNEL_CAPACITY,
        }
    }

    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// A builder seeded with this configuration, for overriding a few fields.
    pub fn into_builder(self) -> ConfigBuilder {
        ConfigBuilder { config: self }
    }

    /// Loads configuration from the environment (and `.env` when present).
    ///
    // *   `OPENAI_API_KEY`: secret used to mint session credentials.
    // *   `REALTIME_URL`, `REALTIME_MODEL`, `REALTIME_TOKEN_URL`: endpoint overrides.
    // *   `REALTIME_VOICE`: output voice, e.g. "verse".
    // *   `REALTIME_CAPTURE_SECONDS`: capture budget per turn.
    // *   `REALTIME_AUTO_RECONNECT`: "true" to reconnect after a dropped connection.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let mut builder = ConfigBuilder::new();
        if let Ok(url) = env::var("REALTIME_URL") {
            builder = builder.with_realtime_url(&url);
        }
        if let Ok(model) = env::var("REALTIME_MODEL") {
            builder = builder.with_model(&model);
        }
        if let Ok(url) = env::var("REALTIME_TOKEN_URL") {
            builder = builder.with_token_url(&url);
        }
        if let Ok(voice) = env::var("REALTIME_VOICE") {
            let session = builder.config.session.clone();
            let mut configurator = Session::new()
                .with_modalities(session.modalities().to_vec())
                .with_temperature(session.temperature())
                .with_voice(Voice::from(voice.as_str()));
            if let Some(instructions) = session.instructions() {
                configurator = configurator.with_instructions(instructions);
            }
            builder = builder.with_session(configurator.build());
        }
        if let Ok(secs) = env::var("REALTIME_CAPTURE_SECONDS") {
            let parsed = secs.parse::<u32>().map_err(|_| ConfigError::InvalidVar {
                name: "REALTIME_CAPTURE_SECONDS".to_string(),
                value: secs.clone(),
            })?;
            builder = builder.with_capture_budget_secs(parsed);
        }
        if let Ok(flag) = env::var("REALTIME_AUTO_RECONNECT") {
            match flag.to_lowercase().as_str() {
                "1" | "true" | "yes" => {
                    builder = builder.with_auto_reconnect(consts::RECONNECT_DELAY)
                }
                "0" | "false" | "no" => {}
                _ => {
                    return Err(ConfigError::InvalidVar {
                        name: "REALTIME_AUTO_RECONNECT".to_string(),
                        value: flag,
                    })
                }
            }
        }

        builder.build()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.seed_phrases.is_empty() {
            return Err(ConfigError::NoSeedPhrases);
        }
        if self.capture_budget_secs == 0 {
            return Err(ConfigError::ZeroCaptureBudget);
        }
        if self.capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        Ok(())
    }

    pub fn realtime_url(&self) -> &str {
        &self.realtime_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn api_key(&self) -> &SecretString {
        &self.api_key
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    pub fn stun_urls(&self) -> &[String] {
        &self.stun_urls
    }

    pub fn data_channel_label(&self) -> &str {
        &self.data_channel_label
    }

    pub fn input_device(&self) -> Option<&str> {
        self.input_device.as_deref()
    }

    pub fn constraints(&self) -> &AudioConstraints {
        &self.constraints
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn seed_phrases(&self) -> &[String] {
        &self.seed_phrases
    }

    pub fn capture_budget_secs(&self) -> u32 {
        self.capture_budget_secs
    }

    pub fn silence_timeout(&self) -> Duration {
        self.silence_timeout
    }

    pub fn terminal_grace(&self) -> Duration {
        self.terminal_grace
    }

    pub fn session_update_delay(&self) -> Duration {
        self.session_update_delay
    }

    pub fn seed_delay(&self) -> Duration {
        self.seed_delay
    }

    pub fn ice_poll_interval(&self) -> Duration {
        self.ice_poll_interval
    }

    pub fn ice_gathering_timeout(&self) -> Duration {
        self.ice_gathering_timeout
    }

    pub fn auto_reconnect(&self) -> bool {
        self.auto_reconnect
    }

    pub fn reconnect_delay(&self) -> Duration {
        self.reconnect_delay
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
