pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Capture device denied or unavailable.
    #[error("media error: {0}")]
    Media(String),

    /// SDP exchange or peer-connection setup failed.
    #[error(
        "negotiation error{}: {message}",
        .status.map(|s| format!(" (status {s})")).unwrap_or_default()
    )]
    Negotiation { status: Option<u16>, message: String },

    /// Credential fetch failed or returned an unusable credential.
    #[error("token error: {0}")]
    Token(String),

    /// Connectivity lost mid-session.
    #[error("transport disconnected: {0}")]
    TransportDisconnect(String),

    /// Malformed inbound event.
    #[error("malformed event: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("session controller is no longer running")]
    ControllerGone,
}

impl Error {
    pub fn negotiation(message: impl Into<String>) -> Self {
        Error::Negotiation {
            status: None,
            message: message.into(),
        }
    }

    pub fn negotiation_status(status: u16, message: impl Into<String>) -> Self {
        Error::Negotiation {
            status: Some(status),
            message: message.into(),
        }
    }

    /// The cause as shown to the user in the status line.
    pub fn user_message(&self) -> String {
        match self {
            Error::Media(_) => "Microphone unavailable or permission denied".to_string(),
            Error::Negotiation { status: Some(status), .. } => {
                format!("Could not connect to the voice service (HTTP {status})")
            }
            Error::Negotiation { status: None, .. } => {
                "Could not connect to the voice service".to_string()
            }
            Error::Token(_) => "Could not obtain a session credential".to_string(),
            Error::TransportDisconnect(_) => "Connection lost".to_string(),
            Error::Parse(_) => "Received a malformed event".to_string(),
            Error::ControllerGone => "Voice session is no longer available".to_string(),
        }
    }
}
