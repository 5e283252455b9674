/// Lifecycle of one session. `Closed` and `Error` are terminal for that session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Live,
    Responding,
    Closed,
    Error,
}

/// Visual treatment of the start/stop control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affordance {
    Idle,
    Connecting,
    Listening,
    Responding,
    Error,
}

impl ConnectionState {
    /// Holds (or is acquiring) a transport.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Live | ConnectionState::Responding
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Live => "listening",
            ConnectionState::Responding => "responding",
            ConnectionState::Closed => "closed",
            ConnectionState::Error => "error",
        }
    }

    pub fn affordance(&self) -> Affordance {
        match self {
            ConnectionState::Idle | ConnectionState::Closed => Affordance::Idle,
            ConnectionState::Connecting => Affordance::Connecting,
            ConnectionState::Live => Affordance::Listening,
            ConnectionState::Responding => Affordance::Responding,
            ConnectionState::Error => Affordance::Error,
        }
    }
}

/// Snapshot published to the host after every transition.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Status {
    state: ConnectionState,
    label: String,
    remaining_seconds: Option<u32>,
    error: Option<String>,
}

impl Status {
    pub(crate) fn new(state: ConnectionState, label: &str) -> Self {
        Self {
            state,
            label: label.to_string(),
            remaining_seconds: None,
            error: None,
        }
    }

    pub(crate) fn with_remaining_seconds(mut self, remaining: u32) -> Self {
        self.remaining_seconds = Some(remaining);
        self
    }

    pub(crate) fn with_error(mut self, error: String) -> Self {
        self.error = Some(error);
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn label(&self) -> &str {
        if self.label.is_empty() {
            self.state.label()
        } else {
            &self.label
        }
    }

    /// Seconds of capture left; only present while listening.
    pub fn remaining_seconds(&self) -> Option<u32> {
        self.remaining_seconds
    }

    /// Whether the assistant is producing a response.
    pub fn is_generating(&self) -> bool {
        self.state == ConnectionState::Responding
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// The latest error when present, else the connection label.
    pub fn display_text(&self) -> &str {
        self.error().unwrap_or_else(|| self.label())
    }
}

impl From<ConnectionState> for Status {
    fn from(state: ConnectionState) -> Self {
        Status::new(state, state.label())
    }
}
